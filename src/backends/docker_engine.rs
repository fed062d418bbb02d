//! Docker/Podman build engine
//!
//! Builds one platform per invocation and loads the result into the local
//! image store under a throwaway `localhost/image-publisher:<uuid>` tag.

use crate::backends::{check_engine, run_checked};
use crate::core::config::BuildConfig;
use crate::core::traits::{BuildEngine, BuildRequest, ImageArtifact};
use crate::security::SafeCommandExecutor;
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Local repository every built variant is tagged into
const LOCAL_REPOSITORY: &str = "localhost/image-publisher";

pub struct DockerBuildEngine {
    engine: String,
    executor: SafeCommandExecutor,
}

impl DockerBuildEngine {
    /// # Arguments
    ///
    /// * `config` - Engine binary and per-build timeout
    /// * `working_dir` - Directory the engine runs in
    pub fn new(config: &BuildConfig, working_dir: &Path) -> anyhow::Result<Self> {
        check_engine(&config.engine)?;

        let executor = SafeCommandExecutor::new(working_dir)?
            .with_timeout(Duration::from_secs(config.timeout_secs));

        Ok(Self {
            engine: config.engine.clone(),
            executor,
        })
    }

    /// Arguments of the build invocation for `request`, tagged as `tag`
    fn build_command(&self, request: &BuildRequest, tag: &str) -> Vec<String> {
        let mut args: Vec<String> = if self.engine == "docker" {
            vec!["buildx".into(), "build".into()]
        } else {
            vec!["build".into()]
        };

        args.push("--platform".into());
        args.push(request.platform.to_string());

        for (key, value) in &request.build_args {
            args.push("--build-arg".into());
            args.push(format!("{}={}", key, value));
        }
        for (key, value) in &request.labels {
            args.push("--label".into());
            args.push(format!("{}={}", key, value));
        }

        args.push("--file".into());
        args.push(request.source.dockerfile().display().to_string());
        args.push("--tag".into());
        args.push(tag.to_string());

        // buildx keeps results in the builder cache unless asked to load them
        if self.engine == "docker" {
            args.push("--load".into());
        }

        args.push(request.source.root().display().to_string());
        args
    }

    fn remove_command(artifact: &ImageArtifact) -> Vec<String> {
        vec!["rmi".to_string(), "--force".to_string(), artifact.id.clone()]
    }
}

#[async_trait]
impl BuildEngine for DockerBuildEngine {
    fn name(&self) -> &str {
        &self.engine
    }

    async fn build(&self, request: &BuildRequest) -> anyhow::Result<ImageArtifact> {
        let tag = format!("{}:{}", LOCAL_REPOSITORY, Uuid::new_v4());
        let args = self.build_command(request, &tag);

        debug!(tag = %tag, "Invoking container build");
        run_checked(&self.executor, &self.engine, &args).await?;

        Ok(ImageArtifact {
            id: tag,
            platform: request.platform,
            build_args: request.build_args.clone(),
            labels: request.labels.clone(),
        })
    }

    async fn export_archive(&self, artifact: &ImageArtifact, dest: &Path) -> anyhow::Result<()> {
        let args = vec![
            "save".to_string(),
            "--output".to_string(),
            dest.display().to_string(),
            artifact.id.clone(),
        ];

        run_checked(&self.executor, &self.engine, &args).await?;
        Ok(())
    }

    async fn remove(&self, artifact: &ImageArtifact) -> anyhow::Result<()> {
        debug!(tag = %artifact.id, "Removing local image");
        run_checked(&self.executor, &self.engine, &Self::remove_command(artifact)).await?;
        Ok(())
    }
}
