//! In-memory fakes for the collaborator traits (testing only)
//!
//! Provides `FakeBuildEngine`, `FakeScanEngine` and `FakeRegistryClient`,
//! which record every call and can be told to fail, plus `FakeSession` to
//! wire all three into a [`Session`].

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, bail};
use async_trait::async_trait;
use secrecy::ExposeSecret;
use tokio::sync::Notify;

use crate::core::session::Session;
use crate::core::traits::*;
use crate::security::RegistryCredentials;

/// Findings table printed by a clean fake scan
pub const CLEAN_SCAN_OUTPUT: &str = "Total: 0 (CRITICAL: 0, HIGH: 0)";

/// A built artifact for `platform` with no build args or labels
pub fn artifact(platform: Platform) -> ImageArtifact {
    ImageArtifact {
        id: format!("localhost/image-publisher:{}", platform.slug()),
        platform,
        build_args: BTreeMap::new(),
        labels: BTreeMap::new(),
    }
}

// ---------------------------------------------------------------------------
// FakeBuildEngine
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct EngineState {
    builds: Vec<BuildRequest>,
    exports: Vec<(String, PathBuf)>,
    removals: Vec<String>,
    build_failures: HashMap<Platform, String>,
    export_failure: Option<String>,
}

/// Build engine that records requests and writes the platform name as the archive
#[derive(Debug, Default)]
pub struct FakeBuildEngine {
    state: Mutex<EngineState>,
}

impl FakeBuildEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every build of `platform` with `message`
    pub fn fail_build(&self, platform: Platform, message: &str) {
        let mut state = self.state.lock().unwrap();
        state.build_failures.insert(platform, message.to_string());
    }

    /// Fail every export with `message`
    pub fn fail_export(&self, message: &str) {
        self.state.lock().unwrap().export_failure = Some(message.to_string());
    }

    pub fn builds(&self) -> Vec<BuildRequest> {
        self.state.lock().unwrap().builds.clone()
    }

    /// `(artifact id, archive path)` per export
    pub fn exports(&self) -> Vec<(String, PathBuf)> {
        self.state.lock().unwrap().exports.clone()
    }

    /// Ids of removed artifacts, in order
    pub fn removals(&self) -> Vec<String> {
        self.state.lock().unwrap().removals.clone()
    }
}

#[async_trait]
impl BuildEngine for FakeBuildEngine {
    fn name(&self) -> &str {
        "fake"
    }

    async fn build(&self, request: &BuildRequest) -> anyhow::Result<ImageArtifact> {
        let mut state = self.state.lock().unwrap();
        state.builds.push(request.clone());

        if let Some(message) = state.build_failures.get(&request.platform) {
            bail!("{}", message);
        }

        Ok(ImageArtifact {
            id: artifact_id(request.platform, state.builds.len()),
            platform: request.platform,
            build_args: request.build_args.clone(),
            labels: request.labels.clone(),
        })
    }

    async fn export_archive(&self, artifact: &ImageArtifact, dest: &Path) -> anyhow::Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            if let Some(message) = &state.export_failure {
                bail!("{}", message);
            }
            state
                .exports
                .push((artifact.id.clone(), dest.to_path_buf()));
        }

        std::fs::write(dest, artifact.platform.as_str())
            .with_context(|| format!("failed to write {}", dest.display()))
    }

    async fn remove(&self, artifact: &ImageArtifact) -> anyhow::Result<()> {
        self.state.lock().unwrap().removals.push(artifact.id.clone());
        Ok(())
    }
}

fn artifact_id(platform: Platform, build_number: usize) -> String {
    format!("localhost/image-publisher:{}-{}", platform.slug(), build_number)
}

// ---------------------------------------------------------------------------
// FakeScanEngine
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct ScannerState {
    scans: Vec<(PathBuf, Vec<Severity>)>,
    findings: HashMap<Platform, String>,
    gate: Option<Arc<Notify>>,
}

/// Scan engine keyed on the platform written into the archive by [`FakeBuildEngine`]
#[derive(Debug, Default)]
pub struct FakeScanEngine {
    state: Mutex<ScannerState>,
}

impl FakeScanEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `table` as a qualifying finding for `platform`
    pub fn fail_for(&self, platform: Platform, table: &str) {
        let mut state = self.state.lock().unwrap();
        state.findings.insert(platform, table.to_string());
    }

    /// Make every scan wait for `gate` to be notified before finishing
    pub fn hold_until(&self, gate: Arc<Notify>) {
        self.state.lock().unwrap().gate = Some(gate);
    }

    pub fn scans(&self) -> Vec<(PathBuf, Vec<Severity>)> {
        self.state.lock().unwrap().scans.clone()
    }
}

#[async_trait]
impl ScanEngine for FakeScanEngine {
    fn name(&self) -> &str {
        "fake"
    }

    async fn scan_archive(&self, archive: &Path, severities: &[Severity]) -> anyhow::Result<String> {
        let contents = std::fs::read_to_string(archive)
            .with_context(|| format!("failed to read {}", archive.display()))?;
        let platform: Platform = contents.parse()?;

        let gate = self.state.lock().unwrap().gate.clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let mut state = self.state.lock().unwrap();
        state
            .scans
            .push((archive.to_path_buf(), severities.to_vec()));

        match state.findings.get(&platform) {
            Some(table) => bail!("scanner exited with status 1\n{}", table),
            None => Ok(CLEAN_SCAN_OUTPUT.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// FakeRegistryClient
// ---------------------------------------------------------------------------

/// One recorded manifest-list push
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushRecord {
    pub reference: String,
    pub platforms: Vec<Platform>,
    pub variant_ids: Vec<String>,
    /// `(username, password)` when credentials were attached
    pub credentials: Option<(String, String)>,
}

#[derive(Debug, Default)]
struct RegistryState {
    pushes: Vec<PushRecord>,
    failure: Option<String>,
}

/// Registry client that records pushes instead of contacting a registry
#[derive(Debug, Default)]
pub struct FakeRegistryClient {
    state: Mutex<RegistryState>,
}

impl FakeRegistryClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every push with `message`
    pub fn fail_with(&self, message: &str) {
        self.state.lock().unwrap().failure = Some(message.to_string());
    }

    /// Successful pushes, in order
    pub fn pushes(&self) -> Vec<PushRecord> {
        self.state.lock().unwrap().pushes.clone()
    }
}

#[async_trait]
impl RegistryClient for FakeRegistryClient {
    fn name(&self) -> &str {
        "fake"
    }

    async fn push_manifest_list(
        &self,
        reference: &str,
        variants: &[ImageArtifact],
        credentials: Option<&RegistryCredentials>,
    ) -> anyhow::Result<String> {
        let mut state = self.state.lock().unwrap();
        if let Some(message) = &state.failure {
            bail!("{}", message);
        }

        state.pushes.push(PushRecord {
            reference: reference.to_string(),
            platforms: variants.iter().map(|v| v.platform).collect(),
            variant_ids: variants.iter().map(|v| v.id.clone()).collect(),
            credentials: credentials.map(|c| {
                (
                    c.username().to_string(),
                    c.password().expose_secret().to_string(),
                )
            }),
        });

        Ok(reference.to_string())
    }
}

// ---------------------------------------------------------------------------
// FakeSession
// ---------------------------------------------------------------------------

/// The three fakes, kept reachable for assertions after wiring a [`Session`]
#[derive(Debug, Clone, Default)]
pub struct FakeSession {
    pub engine: Arc<FakeBuildEngine>,
    pub scanner: Arc<FakeScanEngine>,
    pub registry: Arc<FakeRegistryClient>,
}

impl FakeSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(&self) -> Session {
        Session::new(
            self.engine.clone(),
            self.scanner.clone(),
            self.registry.clone(),
        )
    }
}
