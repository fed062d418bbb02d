//! Image Builder - builds one platform variant of the image
//!
//! Stamps the version, SHA and base URL into the build arguments and records
//! the build's creation time as a label. Build engine failures are surfaced
//! unchanged inside [`PipelineError::BuildFailure`].

use crate::core::error::PipelineError;
use crate::core::session::Session;
use crate::core::traits::{
    BuildEngine, BuildRequest, CREATED_LABEL, ImageArtifact, ImageTags, Platform, SourceTree,
};
use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tracing::{info, instrument, warn};

/// Builds platform-specific images through the session's build engine
pub struct ImageBuilder {
    engine: Arc<dyn BuildEngine>,
    /// Last creation timestamp handed out; keeps labels non-decreasing
    last_created: Mutex<Option<DateTime<Utc>>>,
}

impl ImageBuilder {
    pub fn new(session: &Session) -> Self {
        Self {
            engine: Arc::clone(&session.engine),
            last_created: Mutex::new(None),
        }
    }

    /// Build `source` for `platform`
    ///
    /// # Arguments
    ///
    /// * `source` - Validated source tree
    /// * `platform` - One of [`Platform::SUPPORTED`]
    /// * `tags` - Version and SHA stamped into the build
    /// * `base_url` - Value of the `BASE_URL` build argument
    #[instrument(skip_all, fields(platform = %platform))]
    pub async fn build(
        &self,
        source: &SourceTree,
        platform: Platform,
        tags: &ImageTags,
        base_url: &str,
    ) -> Result<ImageArtifact, PipelineError> {
        let created = self.next_created();
        let request = BuildRequest {
            source: source.clone(),
            platform,
            build_args: tags.build_args(base_url),
            labels: BTreeMap::from([(
                CREATED_LABEL.to_string(),
                created.to_rfc3339_opts(SecondsFormat::Secs, true),
            )]),
        };

        info!(
            engine = self.engine.name(),
            version = tags.version(),
            sha = tags.sha(),
            "Building image"
        );

        let mut artifact =
            self.engine
                .build(&request)
                .await
                .map_err(|e| PipelineError::BuildFailure {
                    platform: platform.to_string(),
                    message: format!("{:#}", e),
                })?;

        // The artifact reports exactly what was requested, whatever the engine echoed back
        artifact.platform = platform;
        artifact.build_args = request.build_args;
        artifact.labels = request.labels;

        info!(artifact = %artifact.id, "Image built");
        Ok(artifact)
    }

    /// [`build`](Self::build) unless `cancel` completes first
    ///
    /// A pending cancellation wins over a finished build. The engine call is
    /// dropped, which kills the underlying build process.
    pub async fn build_until<C: Future>(
        &self,
        source: &SourceTree,
        platform: Platform,
        tags: &ImageTags,
        base_url: &str,
        cancel: C,
    ) -> Result<ImageArtifact, PipelineError> {
        tokio::select! {
            biased;
            _ = cancel => {
                warn!(platform = %platform, "Build cancelled");
                Err(PipelineError::Cancelled { stage: "build".to_string() })
            }
            result = self.build(source, platform, tags, base_url) => result,
        }
    }

    /// Current wall-clock time, never earlier than the previous build's
    fn next_created(&self) -> DateTime<Utc> {
        let now = Utc::now();
        let mut last = self
            .last_created
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let created = match *last {
            Some(previous) if previous > now => previous,
            _ => now,
        };
        *last = Some(created);
        created
    }
}
