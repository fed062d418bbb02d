//! Image Publisher CLI
//!
//! Builds, scans and publishes a multi-platform container image

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use image_publisher::{
    ConfigLoadOptions, ConfigLoader, ConfigOverrides, ImageBuilder, ImageTags, PipelineConfig,
    PipelineError, Platform, PublishOrchestrator, PublishRequest, Session, SourceTree,
    ValidationScope,
};
use std::path::PathBuf;
use std::process;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Multi-platform container image build, scan and publish pipeline
#[derive(Parser)]
#[command(name = "image-publisher")]
#[command(version)]
#[command(about = "Build, scan and publish a multi-platform container image", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Options shared by every subcommand that reads configuration
#[derive(clap::Args)]
struct PipelineArgs {
    /// Source tree (defaults to current directory)
    #[arg(long, short, value_name = "SOURCE")]
    source: Option<PathBuf>,

    /// Image version tag
    #[arg(long)]
    version: Option<String>,

    /// Value of the BASE_URL build argument
    #[arg(long)]
    base_url: Option<String>,

    /// Container engine (docker|podman)
    #[arg(long)]
    engine: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a single platform variant
    Build {
        #[command(flatten)]
        pipeline: PipelineArgs,

        /// Commit SHA stamped into the image
        #[arg(long, env = "GIT_SHA")]
        sha: String,

        /// Target platform
        #[arg(long, default_value = "linux/amd64")]
        platform: String,
    },

    /// Build, scan and publish every supported platform
    Publish {
        /// Logical image name
        name: String,

        #[command(flatten)]
        pipeline: PipelineArgs,

        /// Commit SHA stamped into the image
        #[arg(long, env = "GIT_SHA")]
        sha: String,

        /// Target registry host
        #[arg(long)]
        registry: Option<String>,

        /// Registry username
        #[arg(long)]
        username: Option<String>,

        /// Build and scan only, skip the push
        #[arg(long)]
        dry_run: bool,

        /// Print the full publish report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check configuration and source tree
    Check {
        #[command(flatten)]
        pipeline: PipelineArgs,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_format);

    match run(cli.command).await {
        Ok(exit_code) => process::exit(exit_code),
        Err(e) => {
            eprintln!("\n❌ Error");
            match e.downcast_ref::<PipelineError>() {
                Some(pipeline_error) => {
                    eprintln!(
                        "[{}] {} (stage: {})",
                        pipeline_error.code(),
                        pipeline_error,
                        pipeline_error.stage()
                    );
                    eprintln!("\nSuggested actions:");
                    for action in pipeline_error.suggested_actions() {
                        eprintln!("  - {}", action);
                    }
                }
                None => eprintln!("{:#}", e),
            }
            process::exit(1);
        }
    }
}

fn init_tracing(verbose: bool, format: LogFormat) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("image_publisher={}", level.as_str())));

    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        LogFormat::Text => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
    }
}

async fn run(command: Commands) -> Result<i32> {
    match command {
        Commands::Build {
            pipeline,
            sha,
            platform,
        } => build_command(pipeline, sha, platform).await,
        Commands::Publish {
            name,
            pipeline,
            sha,
            registry,
            username,
            dry_run,
            json,
        } => {
            let overrides = ConfigOverrides {
                registry,
                username,
                ..pipeline.overrides()
            };
            publish_command(name, pipeline.source_path(), overrides, sha, dry_run, json).await
        }
        Commands::Check { pipeline } => check_command(pipeline).await,
    }
}

impl PipelineArgs {
    fn source_path(&self) -> PathBuf {
        self.source.clone().unwrap_or_else(|| PathBuf::from("."))
    }

    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            version: self.version.clone(),
            base_url: self.base_url.clone(),
            engine: self.engine.clone(),
            ..ConfigOverrides::default()
        }
    }
}

/// Load validated configuration and open the source tree it describes
async fn prepare(
    source: PathBuf,
    overrides: ConfigOverrides,
    scope: ValidationScope,
) -> Result<(PipelineConfig, SourceTree, Session)> {
    let options = ConfigLoadOptions::from_process(&source, overrides);
    let config = ConfigLoader::load_validated(options, scope).await?;
    let tree = SourceTree::open(&source, &config.build.dockerfile)?;
    let session = Session::docker(&config, tree.root())
        .map_err(|e| PipelineError::Config(format!("{:#}", e)))?;

    Ok((config, tree, session))
}

async fn build_command(pipeline: PipelineArgs, sha: String, platform: String) -> Result<i32> {
    let platform: Platform = platform.parse()?;
    let (config, tree, session) = prepare(
        pipeline.source_path(),
        pipeline.overrides(),
        ValidationScope::Build,
    )
    .await?;
    let tags = ImageTags::new(config.version.clone(), sha)?;
    let builder = ImageBuilder::new(&session);

    let artifact = builder
        .build_until(&tree, platform, &tags, &config.base_url, interrupted())
        .await?;

    println!("{}", serde_json::to_string_pretty(&artifact)?);
    Ok(0)
}

async fn publish_command(
    name: String,
    source: PathBuf,
    overrides: ConfigOverrides,
    sha: String,
    dry_run: bool,
    json: bool,
) -> Result<i32> {
    let (config, tree, session) = prepare(source, overrides, ValidationScope::Publish).await?;
    let mut request = PublishRequest::from_config(name, sha, &config)?;
    request.dry_run = dry_run;

    let orchestrator = PublishOrchestrator::new(&session);
    let report = orchestrator
        .publish_until(&tree, request, interrupted())
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        if !report.pushed {
            eprintln!("🔍 Dry run: nothing was pushed");
        }
        println!("{}", report.reference);
    }

    Ok(0)
}

/// Resolves on Ctrl-C; never resolves if the handler cannot be installed
async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Ctrl-C handler unavailable");
        std::future::pending::<()>().await;
    }
}

async fn check_command(pipeline: PipelineArgs) -> Result<i32> {
    println!("\n🔍 Image Publisher Check\n");

    let source = pipeline.source_path();
    let options = ConfigLoadOptions::from_process(&source, pipeline.overrides());
    let config = ConfigLoader::load(options).await?;
    let result = ConfigLoader::validate(&config);

    println!("{}", ConfigLoader::format_validation_result(&result));

    let tree_ok = match SourceTree::open(&source, &config.build.dockerfile) {
        Ok(tree) => {
            println!("✅ Build descriptor: {}", tree.dockerfile().display());
            true
        }
        Err(e) => {
            println!("❌ {}", e);
            false
        }
    };

    println!(
        "\nPlatforms: {}",
        Platform::SUPPORTED.map(|p| p.as_str()).join(", ")
    );
    println!("Registry:  {}", config.registry);

    Ok(if result.valid && tree_ok { 0 } else { 1 })
}
