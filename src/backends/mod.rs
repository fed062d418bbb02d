//! Container-engine backed collaborators
//!
//! Each backend shells out through [`SafeCommandExecutor`] and turns a
//! nonzero exit into an error carrying the tool's combined output.

pub mod docker_engine;
pub mod docker_registry;
pub mod trivy_scanner;

pub use docker_engine::DockerBuildEngine;
pub use docker_registry::DockerRegistryClient;
pub use trivy_scanner::TrivyScanEngine;

use crate::core::config::SUPPORTED_ENGINES;
use crate::security::{SafeCommandExecutor, combined_output};
use std::process::Output;

/// Run `command` and fail with its combined output unless it exits zero
pub(crate) async fn run_checked(
    executor: &SafeCommandExecutor,
    command: &str,
    args: &[String],
) -> anyhow::Result<Output> {
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    let output = executor.execute(command, &args).await?;
    ensure_success(command, &args, output)
}

pub(crate) fn ensure_success(command: &str, args: &[&str], output: Output) -> anyhow::Result<Output> {
    if !output.status.success() {
        let subcommand = match args {
            ["--config", _, rest @ ..] => rest.first(),
            _ => args.first(),
        }
        .copied()
        .unwrap_or_default();
        anyhow::bail!(
            "{} {} exited with {}\n{}",
            command,
            subcommand,
            output.status,
            combined_output(&output)
        );
    }

    Ok(output)
}

/// Reject engines the backends cannot drive
pub(crate) fn check_engine(engine: &str) -> anyhow::Result<()> {
    if !SUPPORTED_ENGINES.contains(&engine) {
        anyhow::bail!(
            "unsupported container engine '{}' (expected one of: {})",
            engine,
            SUPPORTED_ENGINES.join(", ")
        );
    }
    Ok(())
}
