//! End-to-end pipeline behaviour against in-memory collaborators.

use image_publisher::fakes::FakeSession;
use image_publisher::{
    ConfigLoadOptions, ConfigLoader, ConfigOverrides, ImageTags, PipelineError, Platform,
    PublishOrchestrator, PublishRequest, SourceTree, ValidationScope,
};
use secrecy::SecretString;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Notify;

fn source_tree() -> (TempDir, SourceTree) {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("Dockerfile"),
        "FROM alpine\nARG VERSION\nARG GIT_SHA\nARG BASE_URL\n",
    )
    .unwrap();
    let tree = SourceTree::open(dir.path(), "Dockerfile").unwrap();
    (dir, tree)
}

fn request(registry: &str) -> PublishRequest {
    PublishRequest {
        name: "app".to_string(),
        tags: ImageTags::new("v1.0.0", "abc123").unwrap(),
        registry: registry.to_string(),
        username: "u".to_string(),
        password: SecretString::from("p"),
        base_url: "http://localhost:8080/".to_string(),
        dry_run: false,
    }
}

#[tokio::test]
async fn ephemeral_registry_publish() {
    let (_dir, tree) = source_tree();
    let fakes = FakeSession::new();
    let orchestrator = PublishOrchestrator::new(&fakes.session());

    let reference = orchestrator.publish(&tree, request("ttl.sh")).await.unwrap();

    let suffix = reference.strip_prefix("ttl.sh/app-").unwrap();
    assert!(!suffix.is_empty());
    assert!(suffix.chars().all(|c| c.is_ascii_digit()));

    let pushes = fakes.registry.pushes();
    assert_eq!(pushes.len(), 1);
    assert!(pushes[0].credentials.is_none());
    assert_eq!(pushes[0].platforms, vec![Platform::LinuxAmd64, Platform::LinuxArm64]);
}

#[tokio::test]
async fn private_registry_publish() {
    let (_dir, tree) = source_tree();
    let fakes = FakeSession::new();
    let orchestrator = PublishOrchestrator::new(&fakes.session());

    let reference = orchestrator
        .publish(&tree, request("myregistry.example"))
        .await
        .unwrap();

    assert_eq!(reference, "myregistry.example/u/app:v1.0.0");
    assert_eq!(
        fakes.registry.pushes()[0].credentials,
        Some(("u".to_string(), "p".to_string()))
    );
}

#[tokio::test]
async fn every_build_receives_the_same_arguments() {
    let (_dir, tree) = source_tree();
    let fakes = FakeSession::new();
    let orchestrator = PublishOrchestrator::new(&fakes.session());

    orchestrator.publish(&tree, request("ttl.sh")).await.unwrap();

    let builds = fakes.engine.builds();
    assert_eq!(builds.len(), 2);
    for build in &builds {
        assert_eq!(build.build_args.len(), 3);
        assert_eq!(build.build_args["VERSION"], "v1.0.0");
        assert_eq!(build.build_args["GIT_SHA"], "abc123");
        assert_eq!(build.build_args["BASE_URL"], "http://localhost:8080/");
        assert_eq!(build.labels.len(), 1);
        assert!(build.labels.contains_key("org.opencontainers.image.created"));
    }
}

#[tokio::test]
async fn scan_finding_blocks_publish() {
    let (_dir, tree) = source_tree();
    let fakes = FakeSession::new();
    let table = "libssl3 │ CVE-2024-9999 │ HIGH │ fixed in 3.0.15";
    fakes.scanner.fail_for(Platform::LinuxAmd64, table);
    let orchestrator = PublishOrchestrator::new(&fakes.session());

    let error = orchestrator
        .publish(&tree, request("myregistry.example"))
        .await
        .unwrap_err();

    assert!(matches!(error, PipelineError::ScanFailure { .. }));
    assert!(error.to_string().contains(table));
    assert!(fakes.registry.pushes().is_empty());
    assert!(
        fakes
            .engine
            .builds()
            .iter()
            .all(|b| b.platform == Platform::LinuxAmd64)
    );
}

#[tokio::test]
async fn finding_on_second_platform_still_blocks_publish() {
    let (_dir, tree) = source_tree();
    let fakes = FakeSession::new();
    fakes.scanner.fail_for(Platform::LinuxArm64, "CRITICAL");
    let orchestrator = PublishOrchestrator::new(&fakes.session());

    let error = orchestrator
        .publish(&tree, request("ttl.sh"))
        .await
        .unwrap_err();

    match error {
        PipelineError::ScanFailure { platform, .. } => assert_eq!(platform, "linux/arm64"),
        other => panic!("unexpected error: {other}"),
    }
    assert!(fakes.registry.pushes().is_empty());
}

#[tokio::test]
async fn build_failure_blocks_publish() {
    let (_dir, tree) = source_tree();
    let fakes = FakeSession::new();
    fakes
        .engine
        .fail_build(Platform::LinuxAmd64, "failed to compute cache key");
    let orchestrator = PublishOrchestrator::new(&fakes.session());

    let error = orchestrator
        .publish(&tree, request("ttl.sh"))
        .await
        .unwrap_err();

    assert_eq!(error.code(), "BUILD_FAILURE");
    assert!(error.to_string().contains("failed to compute cache key"));
    assert!(fakes.scanner.scans().is_empty());
    assert!(fakes.registry.pushes().is_empty());
}

#[tokio::test]
async fn configured_request_publishes_to_ephemeral_registry() {
    let (dir, tree) = source_tree();
    let home = TempDir::new().unwrap();
    let options = ConfigLoadOptions {
        project_path: dir.path().to_path_buf(),
        home_dir: Some(home.path().to_path_buf()),
        cli_args: ConfigOverrides::default(),
        env: HashMap::new(),
    };
    let config = ConfigLoader::load_validated(options, ValidationScope::Publish)
        .await
        .unwrap();

    let fakes = FakeSession::new();
    let orchestrator = PublishOrchestrator::new(&fakes.session());
    let request = PublishRequest::from_config("app", "abc123", &config).unwrap();

    let report = orchestrator.publish_with_report(&tree, request).await.unwrap();

    assert!(report.reference.starts_with("ttl.sh/app-"));
    assert!(report.pushed);
    assert_eq!(fakes.engine.builds()[0].build_args["VERSION"], "latest");
}

#[tokio::test]
async fn private_registry_build_config_needs_no_username() {
    let (dir, _tree) = source_tree();
    let home = TempDir::new().unwrap();
    let options = ConfigLoadOptions {
        project_path: dir.path().to_path_buf(),
        home_dir: Some(home.path().to_path_buf()),
        cli_args: ConfigOverrides::default(),
        env: HashMap::from([(
            "IMAGE_PUBLISHER_REGISTRY".to_string(),
            "myregistry.example".to_string(),
        )]),
    };

    assert!(
        ConfigLoader::load_validated(options.clone(), ValidationScope::Build)
            .await
            .is_ok()
    );
    let error = ConfigLoader::load_validated(options, ValidationScope::Publish)
        .await
        .unwrap_err();
    assert_eq!(error.code(), "CONFIG_ERROR");
}

#[tokio::test]
async fn cancelled_publish_leaves_nothing_behind() {
    let (_dir, tree) = source_tree();
    let fakes = FakeSession::new();
    let gate = Arc::new(Notify::new());
    fakes.scanner.hold_until(Arc::clone(&gate));
    let orchestrator = PublishOrchestrator::new(&fakes.session());

    let error = orchestrator
        .publish_until(
            &tree,
            request("myregistry.example"),
            tokio::time::sleep(Duration::from_millis(20)),
        )
        .await
        .unwrap_err();

    assert!(matches!(error, PipelineError::Cancelled { .. }));
    assert!(fakes.registry.pushes().is_empty());
    assert_eq!(fakes.engine.removals().len(), fakes.engine.builds().len());
}
