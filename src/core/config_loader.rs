//! Configuration file loader for image-publisher
//!
//! This module provides configuration loading, validation, and merging capabilities.

use super::config::*;
use crate::core::error::PipelineError;
use crate::orchestration::registry_target::DEFAULT_REGISTRY;
use regex::Regex;
use serde_yaml::{Mapping, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

/// Configuration file name
pub const CONFIG_FILENAME: &str = ".image-publisher.yaml";

/// Environment variable pattern (${VAR_NAME})
const ENV_VAR_PATTERN: &str = r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}";

/// Maximum depth of `extends` chains
const MAX_EXTENDS_DEPTH: usize = 8;

/// Explicit overrides applied on top of file configuration
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigOverrides {
    pub version: Option<String>,
    pub registry: Option<String>,
    pub base_url: Option<String>,
    pub engine: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ConfigOverrides {
    /// Read overrides from `IMAGE_PUBLISHER_*` variables
    pub fn from_env(env: &HashMap<String, String>) -> Self {
        let get = |key: &str| env.get(key).filter(|v| !v.is_empty()).cloned();

        Self {
            version: get("IMAGE_PUBLISHER_VERSION"),
            registry: get("IMAGE_PUBLISHER_REGISTRY"),
            base_url: get("IMAGE_PUBLISHER_BASE_URL"),
            engine: get("IMAGE_PUBLISHER_ENGINE"),
            username: get("IMAGE_PUBLISHER_USERNAME"),
            password: get("IMAGE_PUBLISHER_PASSWORD"),
        }
    }

    fn apply(&self, config: &mut PipelineConfig) {
        if let Some(version) = &self.version {
            config.version = version.clone();
        }
        if let Some(registry) = &self.registry {
            config.registry = registry.clone();
        }
        if let Some(base_url) = &self.base_url {
            config.base_url = base_url.clone();
        }
        if let Some(engine) = &self.engine {
            config.build.engine = engine.clone();
        }
        if let Some(username) = &self.username {
            config.publish.username = Some(username.clone());
        }
        if let Some(password) = &self.password {
            config.publish.password = Some(password.clone());
        }
    }
}

/// Configuration load options
#[derive(Debug, Clone)]
pub struct ConfigLoadOptions {
    /// Project path to load config from
    pub project_path: PathBuf,

    /// Home directory holding the global config (None skips it)
    pub home_dir: Option<PathBuf>,

    /// CLI arguments (highest priority)
    pub cli_args: ConfigOverrides,

    /// Environment variables
    pub env: HashMap<String, String>,
}

impl ConfigLoadOptions {
    /// Options for the current process environment
    pub fn from_process<P: Into<PathBuf>>(project_path: P, cli_args: ConfigOverrides) -> Self {
        Self {
            project_path: project_path.into(),
            home_dir: std::env::var_os("HOME").map(PathBuf::from),
            cli_args,
            env: std::env::vars().collect(),
        }
    }
}

/// Which command the configuration is validated for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationScope {
    /// Building only; registry credentials are not consulted
    Build,
    /// Building, scanning and pushing
    Publish,
}

/// Configuration validation result
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigValidationResult {
    /// Is configuration valid?
    pub valid: bool,

    /// Validation errors
    pub errors: Vec<ConfigValidationError>,

    /// Validation warnings
    pub warnings: Vec<ConfigValidationWarning>,
}

/// Configuration validation error
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigValidationError {
    /// Field path (e.g., "build.engine")
    pub field: String,

    /// Error message
    pub message: String,
}

/// Configuration validation warning
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigValidationWarning {
    /// Field path
    pub field: String,

    /// Warning message
    pub message: String,

    /// Suggestion
    pub suggestion: Option<String>,
}

/// Configuration file loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from multiple sources with priority
    ///
    /// Priority (high to low):
    /// 1. CLI arguments
    /// 2. Environment variables
    /// 3. Project config (<project>/.image-publisher.yaml)
    /// 4. Global config (~/.image-publisher.yaml)
    /// 5. Default values
    pub async fn load(options: ConfigLoadOptions) -> Result<PipelineConfig, PipelineError> {
        let mut merged = Value::Mapping(Mapping::new());

        // 4. Global config
        if let Some(home_dir) = &options.home_dir
            && let Some(global) = Self::load_config_file(&home_dir.join(CONFIG_FILENAME), 0).await?
        {
            Self::merge_values(&mut merged, global);
        }

        // 3. Project config
        let project_file = options.project_path.join(CONFIG_FILENAME);
        if let Some(project) = Self::load_config_file(&project_file, 0).await? {
            Self::merge_values(&mut merged, project);
        }

        // 5. Defaults fill whatever the files left out
        let mut config: PipelineConfig = serde_yaml::from_value(merged)
            .map_err(|e| PipelineError::Config(format!("Failed to parse YAML config: {}", e)))?;

        // 2. Environment variables
        ConfigOverrides::from_env(&options.env).apply(&mut config);

        // 1. CLI arguments
        options.cli_args.apply(&mut config);

        Self::expand_env_vars(config, &options.env)
    }

    /// Load a YAML file as a raw value, resolving `extends`
    fn load_config_file(
        file_path: &Path,
        depth: usize,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Option<Value>, PipelineError>> + Send + '_>,
    > {
        Box::pin(async move {
            if depth > MAX_EXTENDS_DEPTH {
                return Err(PipelineError::Config(format!(
                    "extends chain deeper than {} at {}",
                    MAX_EXTENDS_DEPTH,
                    file_path.display()
                )));
            }

            if !file_path.exists() {
                return Ok(None);
            }

            debug!(path = %file_path.display(), "Loading config file");

            let content = fs::read_to_string(file_path).await.map_err(|e| {
                PipelineError::Config(format!(
                    "Failed to read config file {}: {}",
                    file_path.display(),
                    e
                ))
            })?;

            let value: Value = serde_yaml::from_str(&content).map_err(|e| {
                PipelineError::Config(format!(
                    "Failed to parse YAML config {}: {}",
                    file_path.display(),
                    e
                ))
            })?;

            // An empty file parses as null
            let value = match value {
                Value::Null => Value::Mapping(Mapping::new()),
                other => other,
            };

            let extends = value
                .get("extends")
                .and_then(Value::as_str)
                .map(str::to_string);

            if let Some(extends_path) = extends {
                let base_path = file_path
                    .parent()
                    .ok_or_else(|| PipelineError::Config("Invalid config file path".to_string()))?
                    .join(extends_path);

                if let Some(mut base) = Self::load_config_file(&base_path, depth + 1).await? {
                    Self::merge_values(&mut base, value);
                    return Ok(Some(base));
                }
            }

            Ok(Some(value))
        })
    }

    /// Deep-merge `source` into `target`; mappings merge key by key, everything else replaces
    fn merge_values(target: &mut Value, source: Value) {
        match (target, source) {
            (Value::Mapping(target_map), Value::Mapping(source_map)) => {
                for (key, source_value) in source_map {
                    match target_map.get_mut(&key) {
                        Some(target_value) => Self::merge_values(target_value, source_value),
                        None => {
                            target_map.insert(key, source_value);
                        }
                    }
                }
            }
            (target, source) => *target = source,
        }
    }

    /// Expand `${VAR}` placeholders in the credential fields
    fn expand_env_vars(
        mut config: PipelineConfig,
        env: &HashMap<String, String>,
    ) -> Result<PipelineConfig, PipelineError> {
        if let Some(username) = &config.publish.username {
            config.publish.username = Some(Self::expand_string(username, env)?);
        }
        if let Some(password) = &config.publish.password {
            config.publish.password = Some(Self::expand_string(password, env)?);
        }

        Ok(config)
    }

    /// Expand environment variables in a single string
    ///
    /// Unlike other settings, a credential with an unresolved placeholder is
    /// unusable, so a missing variable is an error.
    fn expand_string(input: &str, env: &HashMap<String, String>) -> Result<String, PipelineError> {
        let env_var_regex = Regex::new(ENV_VAR_PATTERN)
            .map_err(|e| PipelineError::Config(format!("Invalid placeholder pattern: {}", e)))?;

        let mut result = input.to_string();
        for cap in env_var_regex.captures_iter(input) {
            let var_name = &cap[1];

            match env.get(var_name) {
                Some(value) => {
                    result = result.replace(&format!("${{{}}}", var_name), value);
                }
                None => {
                    return Err(PipelineError::Config(format!(
                        "Environment variable {} not found",
                        var_name
                    )));
                }
            }
        }

        Ok(result)
    }

    /// Validate configuration for publishing
    pub fn validate(config: &PipelineConfig) -> ConfigValidationResult {
        Self::validate_for(config, ValidationScope::Publish)
    }

    /// Validate configuration for the command described by `scope`
    pub fn validate_for(config: &PipelineConfig, scope: ValidationScope) -> ConfigValidationResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        // 1. Registry
        if config.registry.trim().is_empty() {
            errors.push(ConfigValidationError {
                field: "registry".to_string(),
                message: "registry must not be empty".to_string(),
            });
        } else if config.registry.contains("://") {
            errors.push(ConfigValidationError {
                field: "registry".to_string(),
                message: "registry must be a host name, not a URL".to_string(),
            });
        }

        // 2. Version
        Self::validate_version(&config.version, &mut warnings);

        // 3. Base URL
        if !(config.base_url.starts_with("http://") || config.base_url.starts_with("https://")) {
            errors.push(ConfigValidationError {
                field: "baseUrl".to_string(),
                message: format!("'{}' is not an http(s) URL", config.base_url),
            });
        }

        // 4. Build settings
        if !SUPPORTED_ENGINES.contains(&config.build.engine.as_str()) {
            errors.push(ConfigValidationError {
                field: "build.engine".to_string(),
                message: format!(
                    "unknown engine '{}' (expected one of: {})",
                    config.build.engine,
                    SUPPORTED_ENGINES.join(", ")
                ),
            });
        }
        if config.build.dockerfile.trim().is_empty() {
            errors.push(ConfigValidationError {
                field: "build.dockerfile".to_string(),
                message: "dockerfile must not be empty".to_string(),
            });
        }

        // 5. Timeouts
        for (field, value) in [
            ("build.timeoutSecs", config.build.timeout_secs),
            ("scan.timeoutSecs", config.scan.timeout_secs),
            ("publish.timeoutSecs", config.publish.timeout_secs),
        ] {
            if value == 0 {
                errors.push(ConfigValidationError {
                    field: field.to_string(),
                    message: "timeout must be greater than zero".to_string(),
                });
            }
        }

        // 6. Credentials
        if scope == ValidationScope::Publish {
            Self::validate_credentials(config, &mut errors, &mut warnings);
        }

        ConfigValidationResult {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    /// `latest` or a semantic version with an optional `v` prefix
    fn validate_version(version: &str, warnings: &mut Vec<ConfigValidationWarning>) {
        if version == crate::core::traits::DEFAULT_VERSION {
            return;
        }

        let bare = version.strip_prefix('v').unwrap_or(version);
        if semver::Version::parse(bare).is_err() {
            warnings.push(ConfigValidationWarning {
                field: "version".to_string(),
                message: format!("'{}' is not a semantic version", version),
                suggestion: Some("Use a tag such as v1.0.0".to_string()),
            });
        }
    }

    fn validate_credentials(
        config: &PipelineConfig,
        errors: &mut Vec<ConfigValidationError>,
        warnings: &mut Vec<ConfigValidationWarning>,
    ) {
        let has_username = config
            .publish
            .username
            .as_ref()
            .is_some_and(|u| !u.is_empty());
        let has_password = config
            .publish
            .password
            .as_ref()
            .is_some_and(|p| !p.is_empty());

        if config.registry == DEFAULT_REGISTRY {
            if has_username || has_password {
                warnings.push(ConfigValidationWarning {
                    field: "publish".to_string(),
                    message: format!("credentials are ignored for {}", DEFAULT_REGISTRY),
                    suggestion: None,
                });
            }
            return;
        }

        if !has_username {
            errors.push(ConfigValidationError {
                field: "publish.username".to_string(),
                message: format!("username is required for {}", config.registry),
            });
        }
        if !has_password {
            warnings.push(ConfigValidationWarning {
                field: "publish.password".to_string(),
                message: "no password configured".to_string(),
                suggestion: Some("Set IMAGE_PUBLISHER_PASSWORD or publish.password".to_string()),
            });
        }
    }

    /// Load and fail on validation errors, logging warnings
    pub async fn load_validated(
        options: ConfigLoadOptions,
        scope: ValidationScope,
    ) -> Result<PipelineConfig, PipelineError> {
        let config = Self::load(options).await?;
        let result = Self::validate_for(&config, scope);

        for warning in &result.warnings {
            warn!(field = %warning.field, "{}", warning.message);
        }

        if !result.valid {
            return Err(PipelineError::Config(Self::format_validation_result(&result)));
        }

        Ok(config)
    }

    /// Format validation result as human-readable string
    pub fn format_validation_result(result: &ConfigValidationResult) -> String {
        let mut lines = Vec::new();

        if result.valid {
            lines.push("Configuration is valid".to_string());
        } else {
            lines.push("Configuration has errors".to_string());
        }

        if !result.errors.is_empty() {
            lines.push("\nErrors:".to_string());
            for error in &result.errors {
                lines.push(format!("  - [{}] {}", error.field, error.message));
            }
        }

        if !result.warnings.is_empty() {
            lines.push("\nWarnings:".to_string());
            for warning in &result.warnings {
                lines.push(format!("  - [{}] {}", warning.field, warning.message));
                if let Some(suggestion) = &warning.suggestion {
                    lines.push(format!("    Suggestion: {}", suggestion));
                }
            }
        }

        lines.join("\n")
    }
}
