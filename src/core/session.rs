//! Explicit collaborator session
//!
//! Every component receives its collaborators through a [`Session`] instead of
//! reaching for a process-wide client, so tests can hand each call its own
//! fakes.

use crate::backends::{DockerBuildEngine, DockerRegistryClient, TrivyScanEngine};
use crate::core::config::PipelineConfig;
use crate::core::traits::{BuildEngine, RegistryClient, ScanEngine};
use std::path::Path;
use std::sync::Arc;

/// Handles to the build engine, scanner and registry used by one pipeline
#[derive(Clone)]
pub struct Session {
    pub engine: Arc<dyn BuildEngine>,
    pub scanner: Arc<dyn ScanEngine>,
    pub registry: Arc<dyn RegistryClient>,
}

impl Session {
    pub fn new(
        engine: Arc<dyn BuildEngine>,
        scanner: Arc<dyn ScanEngine>,
        registry: Arc<dyn RegistryClient>,
    ) -> Self {
        Self {
            engine,
            scanner,
            registry,
        }
    }

    /// Wire the container-engine backed collaborators
    ///
    /// # Arguments
    ///
    /// * `config` - Effective pipeline configuration
    /// * `working_dir` - Directory commands run in (normally the source tree)
    pub fn docker(config: &PipelineConfig, working_dir: &Path) -> anyhow::Result<Self> {
        let engine = DockerBuildEngine::new(&config.build, working_dir)?;
        let scanner = TrivyScanEngine::new(&config.build.engine, &config.scan, working_dir)?;
        let registry = DockerRegistryClient::new(&config.build.engine, &config.publish, working_dir)?;

        Ok(Self::new(Arc::new(engine), Arc::new(scanner), Arc::new(registry)))
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("engine", &self.engine.name())
            .field("scanner", &self.scanner.name())
            .field("registry", &self.registry.name())
            .finish()
    }
}
