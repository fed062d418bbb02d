//! Configuration structures and types for image-publisher
//!
//! Parameter defaults live here as typed values instead of omitted-argument
//! conventions. Every field is optional in the YAML file; missing values fall
//! back to the defaults documented on each field.

use crate::orchestration::registry_target::DEFAULT_REGISTRY;
use serde::{Deserialize, Serialize};

/// Default value of the `BASE_URL` build argument
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080/";

/// Default containerised scanner image
pub const DEFAULT_SCANNER_IMAGE: &str = "docker.io/aquasec/trivy:0.68.2";

/// Container engines the backends know how to drive
pub const SUPPORTED_ENGINES: &[&str] = &["docker", "podman"];

/// Root configuration object
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Image version tag (default: "latest")
    pub version: String,

    /// Target registry host (default: "ttl.sh")
    pub registry: String,

    /// Value of the BASE_URL build argument (default: "http://localhost:8080/")
    #[serde(rename = "baseUrl")]
    pub base_url: String,

    /// Build settings
    pub build: BuildConfig,

    /// Scan settings
    pub scan: ScanConfig,

    /// Publish settings
    pub publish: PublishConfig,

    /// Extend from base configuration file (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extends: Option<String>,
}

/// Build settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BuildConfig {
    /// Container engine binary (default: "docker")
    pub engine: String,

    /// Build descriptor relative to the source tree (default: "Dockerfile")
    pub dockerfile: String,

    /// Timeout per platform build in seconds (default: 1800)
    #[serde(rename = "timeoutSecs")]
    pub timeout_secs: u64,
}

/// Scan settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScanConfig {
    /// Scanner image (default: "docker.io/aquasec/trivy:0.68.2")
    pub image: String,

    /// Timeout per scan in seconds (default: 900)
    #[serde(rename = "timeoutSecs")]
    pub timeout_secs: u64,
}

/// Publish settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PublishConfig {
    /// Registry username (ignored for the ephemeral registry)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Registry password; `${VAR}` placeholders are expanded at load time
    #[serde(skip_serializing)]
    pub password: Option<String>,

    /// Timeout for the whole push in seconds (default: 600)
    #[serde(rename = "timeoutSecs")]
    pub timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            version: crate::core::traits::DEFAULT_VERSION.to_string(),
            registry: DEFAULT_REGISTRY.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            build: BuildConfig::default(),
            scan: ScanConfig::default(),
            publish: PublishConfig::default(),
            extends: None,
        }
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            engine: "docker".to_string(),
            dockerfile: "Dockerfile".to_string(),
            timeout_secs: 1800,
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            image: DEFAULT_SCANNER_IMAGE.to_string(),
            timeout_secs: 900,
        }
    }
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            username: None,
            password: None,
            timeout_secs: 600,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.version, "latest");
        assert_eq!(config.registry, "ttl.sh");
        assert_eq!(config.base_url, "http://localhost:8080/");
        assert_eq!(config.build.engine, "docker");
        assert!(config.publish.username.is_none());
    }

    #[test]
    fn test_default_scanner_image_is_pinned_and_qualified() {
        let image = ScanConfig::default().image;
        assert_eq!(image, "docker.io/aquasec/trivy:0.68.2");
        assert!(!image.ends_with(":latest"));
        assert!(image.split('/').next().is_some_and(|host| host.contains('.')));
    }

    #[test]
    fn test_deserialize_partial_config() {
        let yaml = r#"
registry: myregistry.example
build:
  engine: podman
publish:
  username: u
"#;
        let config: PipelineConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.registry, "myregistry.example");
        assert_eq!(config.build.engine, "podman");
        assert_eq!(config.build.dockerfile, "Dockerfile");
        assert_eq!(config.publish.username.as_deref(), Some("u"));
        assert_eq!(config.version, "latest");
    }

    #[test]
    fn test_password_is_never_serialized() {
        let mut config = PipelineConfig::default();
        config.publish.password = Some("hunter2".to_string());

        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(!yaml.contains("hunter2"));
        assert!(yaml.contains("baseUrl: http://localhost:8080/"));
    }
}
