//! Docker/Podman registry client
//!
//! Pushes each platform variant under a per-platform tag, then assembles and
//! pushes a manifest list under the final reference. Every push uses its own
//! temporary auth store, so credentials never reach the user's engine config
//! and vanish with the store even when the push is cancelled. Passwords reach
//! the engine over stdin only.

use crate::backends::{check_engine, ensure_success, run_checked};
use crate::core::config::PublishConfig;
use crate::core::traits::{ImageArtifact, RegistryClient};
use crate::orchestration::registry_target::{registry_host, split_reference};
use crate::security::{RegistryCredentials, SafeCommandExecutor};
use anyhow::{Context, anyhow};
use async_trait::async_trait;
use secrecy::ExposeSecret;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Auth file name inside the per-push store (podman)
const AUTH_FILE: &str = "auth.json";

pub struct DockerRegistryClient {
    engine: String,
    executor: SafeCommandExecutor,
    timeout: Duration,
}

impl DockerRegistryClient {
    /// `config.timeout_secs` bounds each engine command and the push as a whole
    pub fn new(engine: &str, config: &PublishConfig, working_dir: &Path) -> anyhow::Result<Self> {
        check_engine(engine)?;

        let timeout = Duration::from_secs(config.timeout_secs);
        Ok(Self {
            engine: engine.to_string(),
            executor: SafeCommandExecutor::new(working_dir)?.with_timeout(timeout),
            timeout,
        })
    }

    /// Registry reference a single platform variant is pushed to
    fn variant_reference(reference: &str, variant: &ImageArtifact) -> String {
        match split_reference(reference) {
            (repository, Some(tag)) => format!("{}:{}-{}", repository, tag, variant.platform.slug()),
            (repository, None) => format!("{}:{}", repository, variant.platform.slug()),
        }
    }

    /// Point `args` at the auth store in `auth_dir`
    ///
    /// Docker takes a global `--config` directory; podman takes `--authfile`
    /// on the subcommands that talk to a registry.
    fn with_auth(&self, auth_dir: &Path, mut args: Vec<String>) -> Vec<String> {
        if self.engine == "docker" {
            let mut full = vec!["--config".to_string(), auth_dir.display().to_string()];
            full.append(&mut args);
            return full;
        }

        let position = match (args.first().map(String::as_str), args.get(1).map(String::as_str)) {
            (Some("login" | "push"), _) => Some(1),
            (Some("manifest"), Some("add" | "push")) => Some(2),
            _ => None,
        };
        if let Some(i) = position {
            args.insert(i, "--authfile".to_string());
            args.insert(i + 1, auth_dir.join(AUTH_FILE).display().to_string());
        }
        args
    }

    fn login_command(host: &str, credentials: &RegistryCredentials) -> Vec<String> {
        vec![
            "login".to_string(),
            host.to_string(),
            "--username".to_string(),
            credentials.username().to_string(),
            "--password-stdin".to_string(),
        ]
    }

    /// Commands assembling and pushing the manifest list from pushed variants
    fn manifest_commands(
        &self,
        reference: &str,
        variants: &[(String, &ImageArtifact)],
    ) -> Vec<Vec<String>> {
        let mut commands = Vec::new();

        if self.engine == "docker" {
            let mut create = vec![
                "manifest".to_string(),
                "create".to_string(),
                "--amend".to_string(),
                reference.to_string(),
            ];
            create.extend(variants.iter().map(|(r, _)| r.clone()));
            commands.push(create);

            for (variant_ref, artifact) in variants {
                commands.push(vec![
                    "manifest".to_string(),
                    "annotate".to_string(),
                    "--os".to_string(),
                    artifact.platform.os().to_string(),
                    "--arch".to_string(),
                    artifact.platform.arch().to_string(),
                    reference.to_string(),
                    variant_ref.clone(),
                ]);
            }

            commands.push(vec![
                "manifest".to_string(),
                "push".to_string(),
                "--purge".to_string(),
                reference.to_string(),
            ]);
        } else {
            commands.push(vec![
                "manifest".to_string(),
                "create".to_string(),
                reference.to_string(),
            ]);

            for (variant_ref, artifact) in variants {
                commands.push(vec![
                    "manifest".to_string(),
                    "add".to_string(),
                    "--os".to_string(),
                    artifact.platform.os().to_string(),
                    "--arch".to_string(),
                    artifact.platform.arch().to_string(),
                    reference.to_string(),
                    format!("docker://{}", variant_ref),
                ]);
            }

            // --rm drops the local manifest list once pushed
            commands.push(vec![
                "manifest".to_string(),
                "push".to_string(),
                "--all".to_string(),
                "--rm".to_string(),
                reference.to_string(),
                format!("docker://{}", reference),
            ]);
        }

        commands
    }

    async fn login(
        &self,
        auth_dir: &Path,
        host: &str,
        credentials: &RegistryCredentials,
    ) -> anyhow::Result<()> {
        let args = self.with_auth(auth_dir, Self::login_command(host, credentials));
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self
            .executor
            .execute_with_stdin(
                &self.engine,
                &args,
                credentials.password().expose_secret().as_bytes(),
            )
            .await
            .map_err(|e| anyhow!(credentials.mask_in(&e.to_string())))?;

        ensure_success(&self.engine, &args, output)
            .map_err(|e| anyhow!(credentials.mask_in(&format!("{:#}", e))))?;
        Ok(())
    }

    async fn push_variants(
        &self,
        auth_dir: &Path,
        reference: &str,
        variants: &[ImageArtifact],
        tagged: &mut Vec<String>,
    ) -> anyhow::Result<()> {
        let mut pushed = Vec::with_capacity(variants.len());

        for variant in variants {
            let variant_ref = Self::variant_reference(reference, variant);
            debug!(variant = %variant_ref, platform = %variant.platform, "Pushing variant");

            run_checked(
                &self.executor,
                &self.engine,
                &self.with_auth(
                    auth_dir,
                    vec!["tag".to_string(), variant.id.clone(), variant_ref.clone()],
                ),
            )
            .await?;
            tagged.push(variant_ref.clone());

            run_checked(
                &self.executor,
                &self.engine,
                &self.with_auth(auth_dir, vec!["push".to_string(), variant_ref.clone()]),
            )
            .await?;

            pushed.push((variant_ref, variant));
        }

        for args in self.manifest_commands(reference, &pushed) {
            run_checked(&self.executor, &self.engine, &self.with_auth(auth_dir, args)).await?;
        }

        Ok(())
    }

    fn untag_command(variant_ref: &str) -> Vec<String> {
        vec!["rmi".to_string(), variant_ref.to_string()]
    }

    /// Drop the per-platform tags added for the push
    async fn untag(&self, auth_dir: &Path, tagged: &[String]) {
        for variant_ref in tagged {
            let args = self.with_auth(auth_dir, Self::untag_command(variant_ref));
            if let Err(e) = run_checked(&self.executor, &self.engine, &args).await {
                warn!(variant = %variant_ref, error = %format!("{:#}", e), "Failed to remove variant tag");
            }
        }
    }

    async fn publish(
        &self,
        reference: &str,
        variants: &[ImageArtifact],
        credentials: Option<&RegistryCredentials>,
    ) -> anyhow::Result<()> {
        let auth_store = tempfile::Builder::new()
            .prefix("image-publisher-auth-")
            .tempdir()
            .context("failed to create registry auth store")?;

        if let Some(credentials) = credentials {
            let host = registry_host(reference);
            info!(host, username = credentials.username(), "Logging in to registry");
            self.login(auth_store.path(), host, credentials).await?;
        }

        let mut tagged = Vec::with_capacity(variants.len());
        let result = self
            .push_variants(auth_store.path(), reference, variants, &mut tagged)
            .await;
        self.untag(auth_store.path(), &tagged).await;

        result
    }
}

#[async_trait]
impl RegistryClient for DockerRegistryClient {
    fn name(&self) -> &str {
        &self.engine
    }

    async fn push_manifest_list(
        &self,
        reference: &str,
        variants: &[ImageArtifact],
        credentials: Option<&RegistryCredentials>,
    ) -> anyhow::Result<String> {
        tokio::time::timeout(self.timeout, self.publish(reference, variants, credentials))
            .await
            .map_err(|_| anyhow!("push of {} timed out after {:?}", reference, self.timeout))??;

        Ok(reference.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::traits::Platform;
    use crate::fakes::artifact;
    use secrecy::SecretString;
    use tempfile::TempDir;

    fn client(engine: &str, temp_dir: &TempDir) -> DockerRegistryClient {
        DockerRegistryClient::new(engine, &PublishConfig::default(), temp_dir.path()).unwrap()
    }

    #[test]
    fn test_every_command_is_bounded_by_publish_timeout() {
        let temp_dir = TempDir::new().unwrap();
        let config = PublishConfig {
            timeout_secs: 1,
            ..PublishConfig::default()
        };

        let client = DockerRegistryClient::new("docker", &config, temp_dir.path()).unwrap();

        assert_eq!(client.executor.timeout(), Some(Duration::from_secs(1)));
        assert_eq!(client.timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_login_command_keeps_password_off_argv() {
        let credentials = RegistryCredentials::new("u", SecretString::from("hunter2-hunter2"));

        let args = DockerRegistryClient::login_command("myregistry.example", &credentials);

        assert_eq!(
            args,
            ["login", "myregistry.example", "--username", "u", "--password-stdin"]
        );
        assert!(args.iter().all(|a| !a.contains("hunter2")));
    }

    #[test]
    fn test_docker_commands_use_private_config_dir() {
        let temp_dir = TempDir::new().unwrap();
        let auth_dir = temp_dir.path().join("auth");

        let args = client("docker", &temp_dir).with_auth(
            &auth_dir,
            vec!["login".to_string(), "myregistry.example".to_string()],
        );

        assert_eq!(
            args,
            [
                "--config".to_string(),
                auth_dir.display().to_string(),
                "login".to_string(),
                "myregistry.example".to_string()
            ]
        );
    }

    #[test]
    fn test_podman_authfile_placement() {
        let temp_dir = TempDir::new().unwrap();
        let auth_dir = temp_dir.path().join("auth");
        let auth_file = auth_dir.join("auth.json").display().to_string();
        let podman = client("podman", &temp_dir);

        let login = podman.with_auth(&auth_dir, vec!["login".to_string(), "r.example".to_string()]);
        assert_eq!(login[..3], ["login".to_string(), "--authfile".to_string(), auth_file.clone()]);

        let push = podman.with_auth(
            &auth_dir,
            vec!["manifest".to_string(), "push".to_string(), "r.example/u/app".to_string()],
        );
        assert_eq!(
            push[..4],
            [
                "manifest".to_string(),
                "push".to_string(),
                "--authfile".to_string(),
                auth_file
            ]
        );

        let tag = podman.with_auth(&auth_dir, vec!["tag".to_string(), "a".to_string(), "b".to_string()]);
        assert_eq!(tag, ["tag", "a", "b"]);
    }

    #[test]
    fn test_untag_removes_only_the_variant_tag() {
        let temp_dir = TempDir::new().unwrap();
        let auth_dir = temp_dir.path().join("auth");
        let variant_ref = "r.example/u/app:v1-linux-arm64";

        let podman = client("podman", &temp_dir)
            .with_auth(&auth_dir, DockerRegistryClient::untag_command(variant_ref));
        assert_eq!(podman, ["rmi", variant_ref]);

        let docker = client("docker", &temp_dir)
            .with_auth(&auth_dir, DockerRegistryClient::untag_command(variant_ref));
        assert_eq!(docker[2..], ["rmi".to_string(), variant_ref.to_string()]);
        assert!(!docker.iter().any(|a| a == "--force"));
    }

    #[test]
    fn test_variant_reference_with_tag() {
        let amd64 = artifact(Platform::LinuxAmd64);
        assert_eq!(
            DockerRegistryClient::variant_reference("myregistry.example/u/app:v1.0.0", &amd64),
            "myregistry.example/u/app:v1.0.0-linux-amd64"
        );
    }

    #[test]
    fn test_variant_reference_without_tag() {
        let arm64 = artifact(Platform::LinuxArm64);
        assert_eq!(
            DockerRegistryClient::variant_reference("ttl.sh/app-42", &arm64),
            "ttl.sh/app-42:linux-arm64"
        );
    }

    #[test]
    fn test_docker_manifest_commands() {
        let temp_dir = TempDir::new().unwrap();
        let amd64 = artifact(Platform::LinuxAmd64);
        let arm64 = artifact(Platform::LinuxArm64);
        let variants = vec![
            ("ttl.sh/app-42:linux-amd64".to_string(), &amd64),
            ("ttl.sh/app-42:linux-arm64".to_string(), &arm64),
        ];

        let commands = client("docker", &temp_dir).manifest_commands("ttl.sh/app-42", &variants);

        assert_eq!(commands.len(), 4);
        assert_eq!(
            commands[0],
            [
                "manifest",
                "create",
                "--amend",
                "ttl.sh/app-42",
                "ttl.sh/app-42:linux-amd64",
                "ttl.sh/app-42:linux-arm64"
            ]
        );
        assert!(commands[2].windows(2).any(|w| w == ["--arch", "arm64"]));
        assert_eq!(commands[3], ["manifest", "push", "--purge", "ttl.sh/app-42"]);
    }

    #[test]
    fn test_podman_manifest_commands() {
        let temp_dir = TempDir::new().unwrap();
        let amd64 = artifact(Platform::LinuxAmd64);
        let variants = vec![("ttl.sh/app-42:linux-amd64".to_string(), &amd64)];

        let commands = client("podman", &temp_dir).manifest_commands("ttl.sh/app-42", &variants);

        assert_eq!(commands[0], ["manifest", "create", "ttl.sh/app-42"]);
        assert_eq!(
            commands[1].last().unwrap(),
            "docker://ttl.sh/app-42:linux-amd64"
        );
        assert_eq!(
            commands[2],
            [
                "manifest",
                "push",
                "--all",
                "--rm",
                "ttl.sh/app-42",
                "docker://ttl.sh/app-42"
            ]
        );
    }
}
