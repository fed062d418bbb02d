//! SafeCommandExecutor: whitelisted, asynchronous execution of container tooling
//!
//! # Security Features
//!
//! - **Whitelist-based validation**: Only container engine and scanner binaries can execute
//! - **Injection prevention**: Arguments are passed as a vector, never through a shell
//! - **Working directory validation**: Validates existence before execution
//! - **Timeout control**: Prevents hanging builds, scans and pushes
//! - **Cancellation**: Children are killed when the awaiting future is dropped
//!
//! # Example
//!
//! ```rust,no_run
//! use image_publisher::SafeCommandExecutor;
//! use std::time::Duration;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let mut executor = SafeCommandExecutor::new(std::env::temp_dir())?;
//! executor.set_timeout(Duration::from_secs(30));
//!
//! let output = executor.execute("docker", &["--version"]).await?;
//! println!("{}", String::from_utf8_lossy(&output.stdout));
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Allowed commands whitelist.
///
/// Only these commands can be executed via SafeCommandExecutor.
const ALLOWED_COMMANDS: &[&str] = &["docker", "podman", "trivy"];

/// Errors that can occur during command execution
#[derive(Error, Debug)]
pub enum CommandError {
    /// Command is not in the allowed whitelist
    #[error("Command '{0}' is not in the allowed whitelist")]
    CommandNotAllowed(String),

    /// Working directory does not exist or is not accessible
    #[error("Working directory does not exist: {0}")]
    InvalidWorkingDirectory(PathBuf),

    /// Command execution failed (e.g., binary not found, permission denied)
    #[error("Command execution failed: {0}")]
    ExecutionFailed(String),

    /// Command exceeded the timeout duration
    #[error("Command timeout after {0:?}")]
    Timeout(Duration),
}

/// Safe command executor with security controls
#[derive(Debug, Clone)]
pub struct SafeCommandExecutor {
    /// Working directory where commands will be executed
    working_dir: PathBuf,
    /// Optional timeout for command execution
    timeout: Option<Duration>,
}

impl SafeCommandExecutor {
    /// Create a new SafeCommandExecutor with working directory validation.
    ///
    /// # Errors
    ///
    /// Returns `CommandError::InvalidWorkingDirectory` if the directory does not exist.
    pub fn new<P: AsRef<Path>>(working_dir: P) -> Result<Self, CommandError> {
        let working_dir = working_dir.as_ref().to_path_buf();

        if !working_dir.is_dir() {
            return Err(CommandError::InvalidWorkingDirectory(working_dir));
        }

        Ok(Self {
            working_dir,
            timeout: None,
        })
    }

    /// Set command execution timeout.
    ///
    /// Commands exceeding this duration are killed.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = Some(timeout);
    }

    /// Builder form of [`set_timeout`](Self::set_timeout)
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.set_timeout(timeout);
        self
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Whether `command` may be executed
    pub fn is_allowed(command: &str) -> bool {
        ALLOWED_COMMANDS.contains(&command)
    }

    /// Execute a command with whitelist validation.
    ///
    /// A nonzero exit status is not an error here; callers inspect
    /// `Output::status` themselves.
    ///
    /// # Errors
    ///
    /// - `CommandError::CommandNotAllowed` - Command not in whitelist
    /// - `CommandError::ExecutionFailed` - Binary not found or execution error
    /// - `CommandError::Timeout` - Timeout elapsed; the child is killed
    pub async fn execute(&self, command: &str, args: &[&str]) -> Result<Output, CommandError> {
        self.run(command, args, None).await
    }

    /// Execute a command, writing `stdin` to its standard input.
    ///
    /// Used to hand secrets to tools (e.g. `--password-stdin`) without
    /// putting them on the command line.
    pub async fn execute_with_stdin(
        &self,
        command: &str,
        args: &[&str],
        stdin: &[u8],
    ) -> Result<Output, CommandError> {
        self.run(command, args, Some(stdin)).await
    }

    async fn run(
        &self,
        command: &str,
        args: &[&str],
        stdin: Option<&[u8]>,
    ) -> Result<Output, CommandError> {
        // Whitelist validation: Only pre-approved commands
        if !Self::is_allowed(command) {
            return Err(CommandError::CommandNotAllowed(command.to_string()));
        }

        debug!(command, ?args, "Executing command");

        let mut child = Command::new(command)
            .args(args)
            .current_dir(&self.working_dir)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CommandError::ExecutionFailed(format!("{}: {}", command, e)))?;

        if let Some(input) = stdin
            && let Some(mut pipe) = child.stdin.take()
        {
            pipe.write_all(input)
                .await
                .map_err(|e| CommandError::ExecutionFailed(e.to_string()))?;
            // Close stdin so the child sees EOF
            drop(pipe);
        }

        let output = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, child.wait_with_output())
                .await
                .map_err(|_| CommandError::Timeout(timeout))?,
            None => child.wait_with_output().await,
        }
        .map_err(|e| CommandError::ExecutionFailed(e.to_string()))?;

        debug!(command, status = ?output.status.code(), "Command finished");

        Ok(output)
    }
}

/// Combined, trimmed stdout and stderr of a finished command
pub fn combined_output(output: &Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    match (stdout.trim(), stderr.trim()) {
        ("", err) => err.to_string(),
        (out, "") => out.to_string(),
        (out, err) => format!("{}\n{}", out, err),
    }
}
