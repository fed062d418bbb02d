//! Vulnerability Scanner - gates an image on CRITICAL/HIGH findings
//!
//! The artifact is exported to a single-file archive in a private temporary
//! directory, then handed to the scan engine with the fixed severity filter.
//! A finding and a scanner crash are the same failure here.

use crate::core::error::PipelineError;
use crate::core::session::Session;
use crate::core::traits::{BuildEngine, ImageArtifact, SCAN_SEVERITIES, ScanEngine, ScanReport};
use std::sync::Arc;
use tracing::{info, instrument};

/// Archive file name inside the scan directory
const ARCHIVE_NAME: &str = "image.tar";

pub struct VulnerabilityScanner {
    engine: Arc<dyn BuildEngine>,
    scanner: Arc<dyn ScanEngine>,
}

impl VulnerabilityScanner {
    pub fn new(session: &Session) -> Self {
        Self {
            engine: Arc::clone(&session.engine),
            scanner: Arc::clone(&session.scanner),
        }
    }

    /// Scan `artifact`, failing on any CRITICAL or HIGH finding
    ///
    /// On success the findings table is written to stderr for the audit trail.
    #[instrument(skip_all, fields(platform = %artifact.platform))]
    pub async fn scan(&self, artifact: &ImageArtifact) -> Result<ScanReport, PipelineError> {
        let failure = |message: String| PipelineError::ScanFailure {
            platform: artifact.platform.to_string(),
            message,
        };

        let scan_dir = tempfile::Builder::new()
            .prefix("image-publisher-scan-")
            .tempdir()
            .map_err(|e| failure(format!("failed to create scan directory: {}", e)))?;
        let archive = scan_dir.path().join(ARCHIVE_NAME);

        info!(artifact = %artifact.id, "Exporting image archive");
        self.engine
            .export_archive(artifact, &archive)
            .await
            .map_err(|e| failure(format!("failed to export image archive: {:#}", e)))?;

        info!(
            scanner = self.scanner.name(),
            severities = ?SCAN_SEVERITIES,
            "Scanning image"
        );
        let output = self
            .scanner
            .scan_archive(&archive, SCAN_SEVERITIES)
            .await
            .map_err(|e| failure(format!("{:#}", e)))?;

        eprintln!("{}", output);
        info!("Scan passed");

        Ok(ScanReport {
            platform: artifact.platform,
            output,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::traits::{Platform, Severity};
    use crate::fakes::{FakeSession, artifact};

    #[tokio::test]
    async fn test_clean_scan_returns_output() {
        let fakes = FakeSession::new();
        let scanner = VulnerabilityScanner::new(&fakes.session());

        let report = scanner.scan(&artifact(Platform::LinuxAmd64)).await.unwrap();

        assert_eq!(report.platform, Platform::LinuxAmd64);
        assert!(!report.output.is_empty());
    }

    #[tokio::test]
    async fn test_scan_uses_fixed_severities_and_exported_archive() {
        let fakes = FakeSession::new();
        let scanner = VulnerabilityScanner::new(&fakes.session());
        let image = artifact(Platform::LinuxArm64);

        scanner.scan(&image).await.unwrap();

        let exports = fakes.engine.exports();
        assert_eq!(exports.len(), 1);
        assert_eq!(exports[0].0, image.id);
        assert!(exports[0].1.ends_with("image.tar"));

        let scans = fakes.scanner.scans();
        assert_eq!(scans.len(), 1);
        assert_eq!(scans[0].0, exports[0].1);
        assert_eq!(scans[0].1, vec![Severity::Critical, Severity::High]);
    }

    #[tokio::test]
    async fn test_finding_is_scan_failure_with_table() {
        let fakes = FakeSession::new();
        let table = "│ openssl │ CVE-2024-0001 │ CRITICAL │";
        fakes.scanner.fail_for(Platform::LinuxAmd64, table);
        let scanner = VulnerabilityScanner::new(&fakes.session());

        let error = scanner.scan(&artifact(Platform::LinuxAmd64)).await.unwrap_err();

        assert!(matches!(error, PipelineError::ScanFailure { .. }));
        assert!(error.to_string().contains(table));
    }

    #[tokio::test]
    async fn test_export_failure_is_scan_failure() {
        let fakes = FakeSession::new();
        fakes.engine.fail_export("no space left on device");
        let scanner = VulnerabilityScanner::new(&fakes.session());

        let error = scanner.scan(&artifact(Platform::LinuxAmd64)).await.unwrap_err();

        assert_eq!(error.code(), "SCAN_FAILURE");
        assert!(error.to_string().contains("no space left on device"));
        assert!(fakes.scanner.scans().is_empty());
    }
}
