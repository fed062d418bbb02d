//! Core traits and types for the image pipeline
//!
//! This module defines the data shapes that flow between the build, scan and
//! publish steps, and the collaborator traits the steps drive. Collaborators
//! are opaque: they report failures as `anyhow` errors whose messages are
//! carried verbatim into [`PipelineError`](crate::core::PipelineError).

use crate::core::error::PipelineError;
use crate::security::RegistryCredentials;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Version used when none is supplied
pub const DEFAULT_VERSION: &str = "latest";

/// Build argument names stamped into every build
pub const BUILD_ARG_BASE_URL: &str = "BASE_URL";
pub const BUILD_ARG_GIT_SHA: &str = "GIT_SHA";
pub const BUILD_ARG_VERSION: &str = "VERSION";

/// Label recording the build's creation time
pub const CREATED_LABEL: &str = "org.opencontainers.image.created";

// ============================================================================
// Severity Levels
// ============================================================================

/// Vulnerability severity level that fails a scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Critical,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "CRITICAL",
            Severity::High => "HIGH",
        }
    }
}

/// Severities that fail a scan
pub const SCAN_SEVERITIES: &[Severity] = &[Severity::Critical, Severity::High];

// ============================================================================
// Platforms
// ============================================================================

/// Target OS/architecture pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Platform {
    #[serde(rename = "linux/amd64")]
    LinuxAmd64,
    #[serde(rename = "linux/arm64")]
    LinuxArm64,
}

impl Platform {
    /// The fixed set every publish builds, in build order
    pub const SUPPORTED: [Platform; 2] = [Platform::LinuxAmd64, Platform::LinuxArm64];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::LinuxAmd64 => "linux/amd64",
            Platform::LinuxArm64 => "linux/arm64",
        }
    }

    pub fn os(&self) -> &'static str {
        "linux"
    }

    pub fn arch(&self) -> &'static str {
        match self {
            Platform::LinuxAmd64 => "amd64",
            Platform::LinuxArm64 => "arm64",
        }
    }

    /// Tag-safe form, e.g. `linux-amd64`
    pub fn slug(&self) -> String {
        format!("{}-{}", self.os(), self.arch())
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Platform::SUPPORTED
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| PipelineError::InvalidInput {
                field: "platform".to_string(),
                message: format!(
                    "'{}' is not supported (expected one of: {})",
                    s,
                    Platform::SUPPORTED.map(|p| p.as_str()).join(", ")
                ),
            })
    }
}

// ============================================================================
// Source tree
// ============================================================================

/// Directory of build inputs: a build descriptor plus its context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceTree {
    root: PathBuf,
    dockerfile: PathBuf,
}

impl SourceTree {
    /// Open a source tree, checking that it contains the build descriptor
    ///
    /// # Arguments
    ///
    /// * `root` - Build context directory
    /// * `dockerfile` - Descriptor path relative to `root`
    pub fn open<P: AsRef<Path>>(root: P, dockerfile: &str) -> Result<Self, PipelineError> {
        let root = root.as_ref().to_path_buf();

        if !root.is_dir() {
            return Err(PipelineError::InvalidInput {
                field: "source".to_string(),
                message: format!("{} is not a directory", root.display()),
            });
        }

        let dockerfile = root.join(dockerfile);
        if !dockerfile.is_file() {
            return Err(PipelineError::InvalidInput {
                field: "source".to_string(),
                message: format!("build descriptor not found: {}", dockerfile.display()),
            });
        }

        Ok(Self { root, dockerfile })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dockerfile(&self) -> &Path {
        &self.dockerfile
    }
}

// ============================================================================
// Tags
// ============================================================================

/// Version and commit identifiers stamped into every build
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageTags {
    version: String,
    sha: String,
}

impl ImageTags {
    /// An empty version falls back to `latest`; an empty SHA is rejected.
    pub fn new(version: impl Into<String>, sha: impl Into<String>) -> Result<Self, PipelineError> {
        let version = version.into().trim().to_string();
        let sha = sha.into().trim().to_string();

        if sha.is_empty() {
            return Err(PipelineError::InvalidInput {
                field: "sha".to_string(),
                message: "must not be empty".to_string(),
            });
        }

        let version = if version.is_empty() {
            DEFAULT_VERSION.to_string()
        } else {
            version
        };

        Ok(Self { version, sha })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn sha(&self) -> &str {
        &self.sha
    }

    /// The three build arguments every build receives
    pub fn build_args(&self, base_url: &str) -> BTreeMap<String, String> {
        BTreeMap::from([
            (BUILD_ARG_BASE_URL.to_string(), base_url.to_string()),
            (BUILD_ARG_GIT_SHA.to_string(), self.sha.clone()),
            (BUILD_ARG_VERSION.to_string(), self.version.clone()),
        ])
    }
}

// ============================================================================
// Build
// ============================================================================

/// Everything the build engine needs for one platform build
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub source: SourceTree,
    pub platform: Platform,
    pub build_args: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
}

/// A built, platform-specific image held by the build engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageArtifact {
    /// Engine-local handle (a local image tag)
    pub id: String,
    pub platform: Platform,
    #[serde(rename = "buildArgs")]
    pub build_args: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
}

impl ImageArtifact {
    /// Value of the creation-time label, if present
    pub fn created(&self) -> Option<&str> {
        self.labels.get(CREATED_LABEL).map(|s| s.as_str())
    }
}

// ============================================================================
// Scan
// ============================================================================

/// Captured output of a passing scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanReport {
    pub platform: Platform,
    pub output: String,
}

// ============================================================================
// Collaborator traits
// ============================================================================

/// Turns a source tree and build arguments into a runnable image
#[async_trait]
pub trait BuildEngine: Send + Sync {
    /// Engine name (e.g., "docker")
    fn name(&self) -> &str;

    /// Build one platform variant with the requested build args and labels
    async fn build(&self, request: &BuildRequest) -> anyhow::Result<ImageArtifact>;

    /// Write the artifact to a single-file archive at `dest`
    async fn export_archive(&self, artifact: &ImageArtifact, dest: &Path) -> anyhow::Result<()>;

    /// Delete the artifact from the engine's local image store
    async fn remove(&self, artifact: &ImageArtifact) -> anyhow::Result<()>;
}

/// Scans an exported image archive
#[async_trait]
pub trait ScanEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Scan the archive, filtering on `severities`
    ///
    /// Returns the human-readable findings table when no qualifying finding
    /// exists. Any nonzero exit is an error whose message embeds the table.
    async fn scan_archive(&self, archive: &Path, severities: &[Severity]) -> anyhow::Result<String>;
}

/// Pushes platform variants as one manifest list
#[async_trait]
pub trait RegistryClient: Send + Sync {
    fn name(&self) -> &str;

    /// Push `variants` under `reference` and return the pushed reference
    async fn push_manifest_list(
        &self,
        reference: &str,
        variants: &[ImageArtifact],
        credentials: Option<&RegistryCredentials>,
    ) -> anyhow::Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_platform_parse_and_display() {
        let platform: Platform = "linux/arm64".parse().unwrap();
        assert_eq!(platform, Platform::LinuxArm64);
        assert_eq!(platform.to_string(), "linux/arm64");
        assert_eq!(platform.slug(), "linux-arm64");
    }

    #[test]
    fn test_platform_rejects_unsupported() {
        let result = "windows/amd64".parse::<Platform>();
        assert!(matches!(result, Err(PipelineError::InvalidInput { .. })));
    }

    #[test]
    fn test_supported_platforms_are_fixed() {
        assert_eq!(
            Platform::SUPPORTED.map(|p| p.as_str()),
            ["linux/amd64", "linux/arm64"]
        );
    }

    #[test]
    fn test_platform_serialization() {
        let json = serde_json::to_string(&Platform::LinuxAmd64).unwrap();
        assert_eq!(json, r#""linux/amd64""#);
    }

    #[test]
    fn test_tags_require_sha() {
        let result = ImageTags::new("v1.0.0", "  ");
        assert!(matches!(
            result,
            Err(PipelineError::InvalidInput { ref field, .. }) if field == "sha"
        ));
    }

    #[test]
    fn test_tags_default_version() {
        let tags = ImageTags::new("", "abc123").unwrap();
        assert_eq!(tags.version(), "latest");
    }

    #[test]
    fn test_build_args_are_exactly_three() {
        let tags = ImageTags::new("v1.0.0", "abc123").unwrap();
        let args = tags.build_args("http://localhost:8080/");

        assert_eq!(args.len(), 3);
        assert_eq!(args["BASE_URL"], "http://localhost:8080/");
        assert_eq!(args["GIT_SHA"], "abc123");
        assert_eq!(args["VERSION"], "v1.0.0");
    }

    #[test]
    fn test_source_tree_requires_dockerfile() {
        let temp_dir = TempDir::new().unwrap();
        let result = SourceTree::open(temp_dir.path(), "Dockerfile");
        assert!(matches!(result, Err(PipelineError::InvalidInput { .. })));

        std::fs::write(temp_dir.path().join("Dockerfile"), "FROM alpine\n").unwrap();
        let source = SourceTree::open(temp_dir.path(), "Dockerfile").unwrap();
        assert_eq!(source.root(), temp_dir.path());
        assert!(source.dockerfile().ends_with("Dockerfile"));
    }

    #[test]
    fn test_source_tree_rejects_missing_directory() {
        let result = SourceTree::open("/nonexistent/source/tree", "Dockerfile");
        assert!(result.is_err());
    }

    #[test]
    fn test_severity_serialization() {
        let json = serde_json::to_string(&Severity::Critical).unwrap();
        assert_eq!(json, r#""CRITICAL""#);
        assert_eq!(
            SCAN_SEVERITIES.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
            vec!["CRITICAL", "HIGH"]
        );
    }
}
