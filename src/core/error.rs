//! Error handling for the image pipeline
//!
//! Every failure aborts the remainder of the pipeline. Errors carry the
//! originating collaborator's message so operators can diagnose them without
//! re-running anything.

use thiserror::Error;

/// Main error type for pipeline operations
#[derive(Error, Debug)]
pub enum PipelineError {
    // Build errors
    #[error("[{platform}] image build failed: {message}")]
    BuildFailure { platform: String, message: String },

    // Scan errors
    #[error("[{platform}] vulnerability scan failed: {message}")]
    ScanFailure { platform: String, message: String },

    // Publish errors
    #[error("[{reference}] publish failed: {message}")]
    PublishFailure { reference: String, message: String },

    // Input errors
    #[error("invalid {field}: {message}")]
    InvalidInput { field: String, message: String },

    // Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    // Cancellation
    #[error("pipeline cancelled during {stage}")]
    Cancelled { stage: String },
}

impl PipelineError {
    /// Pipeline stage this error originated from
    pub fn stage(&self) -> &str {
        match self {
            Self::BuildFailure { .. } => "build",
            Self::ScanFailure { .. } => "scan",
            Self::PublishFailure { .. } => "publish",
            Self::InvalidInput { .. } => "input",
            Self::Config(_) => "config",
            Self::Cancelled { stage } => stage,
        }
    }

    /// Get error code for this error
    pub fn code(&self) -> &'static str {
        match self {
            Self::BuildFailure { .. } => "BUILD_FAILURE",
            Self::ScanFailure { .. } => "SCAN_FAILURE",
            Self::PublishFailure { .. } => "PUBLISH_FAILURE",
            Self::InvalidInput { .. } => "INVALID_INPUT",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Cancelled { .. } => "CANCELLED",
        }
    }

    /// Get suggested actions for this error
    pub fn suggested_actions(&self) -> Vec<&'static str> {
        match self {
            Self::BuildFailure { .. } => vec![
                "Check the Dockerfile and the build context",
                "Make sure the base image can be pulled",
                "Make sure buildx and QEMU support the target platform",
            ],
            Self::ScanFailure { .. } => vec![
                "Review the findings table above",
                "Update the base image or the vulnerable packages",
                "Check that the scanner image can be pulled",
            ],
            Self::PublishFailure { .. } => vec![
                "Check the registry credentials",
                "Check network access to the registry",
            ],
            Self::InvalidInput { .. } => vec!["Fix the reported argument and run again"],
            Self::Config(_) => vec![
                "Check .image-publisher.yaml",
                "Run `image-publisher check` to validate the configuration",
            ],
            Self::Cancelled { .. } => vec!["Run the pipeline again"],
        }
    }
}
