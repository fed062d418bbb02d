//! Publish Orchestrator - builds, scans and publishes the multi-platform image
//!
//! Manages the complete publishing workflow:
//! - Build every supported platform in order
//! - Scan each variant right after it is built, aborting on the first failure
//! - Resolve the registry reference and credentials
//! - Push one manifest list holding every variant
//!
//! Nothing is pushed unless every platform passed its scan, and the locally
//! built variants are removed once the publish ends, however it ends.

use crate::core::config::{DEFAULT_BASE_URL, PipelineConfig};
use crate::core::error::PipelineError;
use crate::core::session::Session;
use crate::core::traits::{
    BuildEngine, ImageArtifact, ImageTags, Platform, RegistryClient, ScanReport, SourceTree,
};
use crate::orchestration::image_builder::ImageBuilder;
use crate::orchestration::registry_target::RegistryTarget;
use crate::orchestration::vulnerability_scanner::VulnerabilityScanner;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Inputs of one publish
#[derive(Debug)]
pub struct PublishRequest {
    /// Logical image name
    pub name: String,

    /// Version and commit SHA
    pub tags: ImageTags,

    /// Target registry host
    pub registry: String,

    /// Registry username (ignored for the ephemeral registry)
    pub username: String,

    /// Registry password (ignored for the ephemeral registry)
    pub password: SecretString,

    /// Value of the BASE_URL build argument
    pub base_url: String,

    /// Build and scan only, skip the registry push
    pub dry_run: bool,
}

impl PublishRequest {
    /// Request for `name` at `sha` using the configured defaults
    pub fn from_config(
        name: impl Into<String>,
        sha: impl Into<String>,
        config: &PipelineConfig,
    ) -> Result<Self, PipelineError> {
        Ok(Self {
            name: name.into(),
            tags: ImageTags::new(config.version.clone(), sha)?,
            registry: config.registry.clone(),
            username: config.publish.username.clone().unwrap_or_default(),
            password: SecretString::from(config.publish.password.clone().unwrap_or_default()),
            base_url: config.base_url.clone(),
            dry_run: false,
        })
    }
}

/// Publishing report returned after a publish
#[derive(Debug, Clone, Serialize)]
pub struct PublishReport {
    pub reference: String,
    pub platforms: Vec<Platform>,
    pub scans: Vec<ScanReport>,
    pub pushed: bool,
    #[serde(rename = "publishedAt", skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(rename = "durationMs")]
    pub duration_ms: u64,
}

/// Main publish orchestrator
pub struct PublishOrchestrator {
    builder: ImageBuilder,
    scanner: VulnerabilityScanner,
    engine: Arc<dyn BuildEngine>,
    registry: Arc<dyn RegistryClient>,
}

impl PublishOrchestrator {
    pub fn new(session: &Session) -> Self {
        Self {
            builder: ImageBuilder::new(session),
            scanner: VulnerabilityScanner::new(session),
            engine: Arc::clone(&session.engine),
            registry: Arc::clone(&session.registry),
        }
    }

    /// Publish and return the final image reference
    pub async fn publish(
        &self,
        source: &SourceTree,
        request: PublishRequest,
    ) -> Result<String, PipelineError> {
        self.publish_with_report(source, request)
            .await
            .map(|report| report.reference)
    }

    /// Publish and return the full report
    ///
    /// # Returns
    ///
    /// Report with the reference, the per-platform scan output and timing
    pub async fn publish_with_report(
        &self,
        source: &SourceTree,
        request: PublishRequest,
    ) -> Result<PublishReport, PipelineError> {
        self.publish_until(source, request, std::future::pending::<()>())
            .await
    }

    /// Publish unless `cancel` completes first
    ///
    /// Cancellation abandons the outstanding build, scan or push, never
    /// pushes, and returns [`PipelineError::Cancelled`] naming that stage.
    /// Locally built images are removed on every path.
    pub async fn publish_until<C: Future>(
        &self,
        source: &SourceTree,
        request: PublishRequest,
        cancel: C,
    ) -> Result<PublishReport, PipelineError> {
        let start_time = Instant::now();
        validate_name(&request.name)?;

        let mut built = BuiltImages::new(Arc::clone(&self.engine));
        let stage = Mutex::new("build");

        let result = tokio::select! {
            result = self.run(source, request, &mut built, &stage, start_time) => result,
            _ = cancel => {
                let stage = *stage.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                warn!(stage, "Publish cancelled");
                Err(PipelineError::Cancelled { stage: stage.to_string() })
            }
        };

        built.remove_all().await;
        result
    }

    async fn run(
        &self,
        source: &SourceTree,
        request: PublishRequest,
        built: &mut BuiltImages,
        stage: &Mutex<&'static str>,
        start_time: Instant,
    ) -> Result<PublishReport, PipelineError> {
        let enter = |name: &'static str| {
            *stage.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = name;
        };
        let base_url = match request.base_url.trim() {
            "" => DEFAULT_BASE_URL,
            url => url,
        };

        info!(
            name = %request.name,
            version = request.tags.version(),
            sha = request.tags.sha(),
            registry = %request.registry,
            "Starting publish"
        );

        // 1-2. Build and gate each platform, stopping at the first failure
        let mut scans = Vec::with_capacity(Platform::SUPPORTED.len());

        for platform in Platform::SUPPORTED {
            enter("build");
            let artifact = self
                .builder
                .build(source, platform, &request.tags, base_url)
                .await?;
            let artifact = built.push(artifact);

            enter("scan");
            let report = self.scanner.scan(artifact).await.inspect_err(|e| {
                warn!(platform = %platform, code = e.code(), "Aborting publish");
            })?;

            scans.push(report);
        }

        // 3. Registry reference
        let target = RegistryTarget::resolve(
            &request.registry,
            &request.name,
            request.tags.version(),
            &request.username,
            request.password,
        );
        let variants = built.artifacts();
        let platforms: Vec<Platform> = variants.iter().map(|v| v.platform).collect();

        if request.dry_run {
            info!(reference = target.reference(), "Dry run: skipping push");
            return Ok(PublishReport {
                reference: target.reference().to_string(),
                platforms,
                scans,
                pushed: false,
                published_at: None,
                duration_ms: start_time.elapsed().as_millis() as u64,
            });
        }

        // 4. Push the manifest list
        enter("publish");
        info!(
            reference = target.reference(),
            authenticated = !target.is_ephemeral(),
            variants = variants.len(),
            "Pushing manifest list"
        );

        let reference = self
            .registry
            .push_manifest_list(target.reference(), variants, target.credentials())
            .await
            .map_err(|e| {
                let message = format!("{:#}", e);
                PipelineError::PublishFailure {
                    reference: target.reference().to_string(),
                    message: match target.credentials() {
                        Some(credentials) => credentials.mask_in(&message),
                        None => message,
                    },
                }
            })?;

        info!(reference = %reference, "Published");

        // 5. Done
        Ok(PublishReport {
            reference,
            platforms,
            scans,
            pushed: true,
            published_at: Some(Utc::now()),
            duration_ms: start_time.elapsed().as_millis() as u64,
        })
    }
}

/// Variants built during one publish, removed from the engine when it ends
struct BuiltImages {
    engine: Arc<dyn BuildEngine>,
    artifacts: Vec<ImageArtifact>,
}

impl BuiltImages {
    fn new(engine: Arc<dyn BuildEngine>) -> Self {
        Self {
            engine,
            artifacts: Vec::with_capacity(Platform::SUPPORTED.len()),
        }
    }

    fn push(&mut self, artifact: ImageArtifact) -> &ImageArtifact {
        self.artifacts.push(artifact);
        &self.artifacts[self.artifacts.len() - 1]
    }

    fn artifacts(&self) -> &[ImageArtifact] {
        &self.artifacts
    }

    async fn remove_all(&mut self) {
        let artifacts = std::mem::take(&mut self.artifacts);
        remove_images(self.engine.as_ref(), &artifacts).await;
    }
}

impl Drop for BuiltImages {
    // Reached with artifacts left only when the publish future itself is dropped
    fn drop(&mut self) {
        if self.artifacts.is_empty() {
            return;
        }

        let artifacts = std::mem::take(&mut self.artifacts);
        let engine = Arc::clone(&self.engine);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    remove_images(engine.as_ref(), &artifacts).await;
                });
            }
            Err(_) => warn!(
                count = artifacts.len(),
                "No runtime left to remove built images"
            ),
        }
    }
}

async fn remove_images(engine: &dyn BuildEngine, artifacts: &[ImageArtifact]) {
    for artifact in artifacts {
        match engine.remove(artifact).await {
            Ok(()) => debug!(artifact = %artifact.id, "Removed local image"),
            Err(e) => warn!(
                artifact = %artifact.id,
                error = %format!("{:#}", e),
                "Failed to remove local image"
            ),
        }
    }
}

/// Image names must be non-empty lowercase repository paths
fn validate_name(name: &str) -> Result<(), PipelineError> {
    let invalid = |message: &str| PipelineError::InvalidInput {
        field: "name".to_string(),
        message: message.to_string(),
    };

    if name.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-' | '/'))
    {
        return Err(invalid(
            "may only contain lowercase letters, digits, '.', '_', '-' and '/'",
        ));
    }
    if name.starts_with(['.', '_', '-', '/']) || name.ends_with(['.', '_', '-', '/']) {
        return Err(invalid("must start and end with a letter or digit"));
    }

    Ok(())
}
