//! Containerised Trivy scan engine
//!
//! Runs the scanner image through the container engine with the archive's
//! directory mounted read-only. `--exit-code 1` makes any finding at the
//! requested severities a nonzero exit.

use crate::backends::{check_engine, ensure_success};
use crate::core::config::ScanConfig;
use crate::core::traits::{ScanEngine, Severity};
use crate::security::SafeCommandExecutor;
use anyhow::Context;
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

/// Mount point of the archive directory inside the scanner container
const SCAN_MOUNT: &str = "/scan";

pub struct TrivyScanEngine {
    engine: String,
    image: String,
    executor: SafeCommandExecutor,
}

impl TrivyScanEngine {
    pub fn new(engine: &str, config: &ScanConfig, working_dir: &Path) -> anyhow::Result<Self> {
        check_engine(engine)?;

        let executor = SafeCommandExecutor::new(working_dir)?
            .with_timeout(Duration::from_secs(config.timeout_secs));

        Ok(Self {
            engine: engine.to_string(),
            image: config.image.clone(),
            executor,
        })
    }

    fn scan_command(&self, archive: &Path, severities: &[Severity]) -> anyhow::Result<Vec<String>> {
        let dir = archive
            .parent()
            .with_context(|| format!("archive has no parent directory: {}", archive.display()))?;
        let file = archive
            .file_name()
            .with_context(|| format!("archive has no file name: {}", archive.display()))?;

        let severity = severities
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(",");

        Ok(vec![
            "run".to_string(),
            "--rm".to_string(),
            "--volume".to_string(),
            format!("{}:{}:ro", dir.display(), SCAN_MOUNT),
            self.image.clone(),
            "image".to_string(),
            "--input".to_string(),
            format!("{}/{}", SCAN_MOUNT, file.to_string_lossy()),
            "--severity".to_string(),
            severity,
            "--exit-code".to_string(),
            "1".to_string(),
            "--format".to_string(),
            "table".to_string(),
            "--no-progress".to_string(),
        ])
    }
}

#[async_trait]
impl ScanEngine for TrivyScanEngine {
    fn name(&self) -> &str {
        "trivy"
    }

    async fn scan_archive(&self, archive: &Path, severities: &[Severity]) -> anyhow::Result<String> {
        let args = self.scan_command(archive, severities)?;
        let args: Vec<&str> = args.iter().map(String::as_str).collect();

        let output = self.executor.execute(&self.engine, &args).await?;
        let output = ensure_success(&self.engine, &args, output)?;

        Ok(String::from_utf8_lossy(&output.stdout).trim_end().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::traits::SCAN_SEVERITIES;
    use tempfile::TempDir;

    #[test]
    fn test_scan_command() {
        let temp_dir = TempDir::new().unwrap();
        let scanner =
            TrivyScanEngine::new("docker", &ScanConfig::default(), temp_dir.path()).unwrap();
        let archive = temp_dir.path().join("image.tar");

        let args = scanner.scan_command(&archive, SCAN_SEVERITIES).unwrap();

        assert_eq!(&args[..2], ["run", "--rm"]);
        assert_eq!(
            args[3],
            format!("{}:/scan:ro", temp_dir.path().display())
        );
        assert_eq!(args[4], "docker.io/aquasec/trivy:0.68.2");
        assert!(args.windows(2).any(|w| w == ["--input", "/scan/image.tar"]));
        assert!(args.windows(2).any(|w| w == ["--severity", "CRITICAL,HIGH"]));
        assert!(args.windows(2).any(|w| w == ["--exit-code", "1"]));
        assert!(args.windows(2).any(|w| w == ["--format", "table"]));
    }

    #[test]
    fn test_custom_scanner_image() {
        let temp_dir = TempDir::new().unwrap();
        let config = ScanConfig {
            image: "mirror.example/trivy:0.50.0".to_string(),
            ..ScanConfig::default()
        };
        let scanner = TrivyScanEngine::new("podman", &config, temp_dir.path()).unwrap();

        let args = scanner
            .scan_command(&temp_dir.path().join("image.tar"), SCAN_SEVERITIES)
            .unwrap();
        assert_eq!(args[4], "mirror.example/trivy:0.50.0");
    }
}
