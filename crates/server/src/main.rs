use std::path::PathBuf;

use anyhow::Context;
use archreg_core::{ArchitectureRuntime, BootstrapError};
use clap::{Args, Parser, Subcommand};
use tracing::info;

use archreg_server::config::ServerConfig;
use archreg_server::launch::{LaunchPlan, LaunchSettings, RegistrySources};
use archreg_server::logging;

#[derive(Parser)]
#[command(
    name = "archreg-server",
    about = "Model architecture registry: verify, inspect and preflight model launches"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

/// Flags every subcommand accepts. Unset flags fall back to the config file.
#[derive(Args, Debug, Default)]
struct RegistryArgs {
    /// Extra architecture declaration table (TOML), appended to the built-in one
    #[arg(long)]
    registry: Option<PathBuf>,

    /// Directory of `<ArchitectureId>.json` configuration schemas
    #[arg(long)]
    config_schema_dir: Option<PathBuf>,

    /// HuggingFace model revision
    #[arg(long)]
    revision: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Bootstrap and verify the architecture registry, then print the report
    Verify {
        #[command(flatten)]
        registry: RegistryArgs,
    },
    /// List every registered architecture
    List {
        #[command(flatten)]
        registry: RegistryArgs,
    },
    /// Resolve a model's configuration and print it as JSON
    Resolve {
        /// Model ID (HuggingFace Hub format) or local directory
        #[arg(long)]
        model: Option<String>,

        #[command(flatten)]
        registry: RegistryArgs,
    },
    /// Run the full startup sequence and print the launch plan
    Preflight {
        /// Model ID (HuggingFace Hub format) or local directory
        #[arg(long)]
        model: Option<String>,

        /// Draft model ID for speculative decoding
        #[arg(long)]
        draft_model: Option<String>,

        /// Number of speculative tokens per step
        #[arg(long)]
        num_speculative_tokens: Option<usize>,

        /// Model name reported to clients. Defaults to the model identifier.
        #[arg(long)]
        served_model_name: Option<String>,

        /// Data type for model weights (auto, bf16, fp16, fp32)
        #[arg(long)]
        dtype: Option<String>,

        /// Maximum context length. Defaults to the checkpoint's.
        #[arg(long)]
        max_model_len: Option<usize>,

        /// Fraction of GPU memory to use (0.0-1.0)
        #[arg(long)]
        gpu_memory_utilization: Option<f32>,

        /// Tensor parallel size
        #[arg(long)]
        tensor_parallel_size: Option<usize>,

        /// Persist the effective settings to the config file
        #[arg(long)]
        save_config: bool,

        #[command(flatten)]
        registry: RegistryArgs,
    },
}

impl RegistryArgs {
    fn into_config(self) -> ServerConfig {
        ServerConfig {
            registry: self.registry,
            config_schema_dir: self.config_schema_dir,
            revision: self.revision,
            log_level: self.log_level,
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load config from file first
    let mut config = ServerConfig::load();
    if let Some(path) = ServerConfig::default_path() {
        if path.exists() {
            eprintln!("Loaded config from: {}", path.display());
        }
    }

    let cli = Cli::parse();

    match cli.command {
        Command::Verify { registry } => {
            config.merge(&registry.into_config());
            init_logging(&config)?;
            run_verify(&config)
        }
        Command::List { registry } => {
            config.merge(&registry.into_config());
            init_logging(&config)?;
            run_list(&config)
        }
        Command::Resolve { model, registry } => {
            config.merge(&ServerConfig {
                model,
                ..registry.into_config()
            });
            init_logging(&config)?;
            run_resolve(&config).await
        }
        Command::Preflight {
            model,
            draft_model,
            num_speculative_tokens,
            served_model_name,
            dtype,
            max_model_len,
            gpu_memory_utilization,
            tensor_parallel_size,
            save_config,
            registry,
        } => {
            config.merge(&ServerConfig {
                model,
                draft_model,
                num_speculative_tokens,
                served_model_name,
                dtype,
                max_model_len,
                gpu_memory_utilization,
                tensor_parallel_size,
                ..registry.into_config()
            });
            init_logging(&config)?;
            if save_config {
                let path = config.save().context("failed to save config")?;
                eprintln!("Saved config to: {}", path.display());
            }
            run_preflight(&config).await
        }
    }
}

fn init_logging(config: &ServerConfig) -> anyhow::Result<()> {
    logging::init(config.log_level.as_deref().unwrap_or("info"))
}

fn sources(config: &ServerConfig) -> RegistrySources {
    RegistrySources {
        registry: config.registry.clone(),
        config_schema_dir: config.config_schema_dir.clone(),
        revision: config.revision.clone(),
    }
}

/// Bootstrap the runtime. A failed verification prints the full report to
/// stdout before the error propagates.
fn bootstrap(config: &ServerConfig) -> anyhow::Result<ArchitectureRuntime> {
    let builder = sources(config)
        .runtime_builder()
        .context("failed to load architecture declarations")?;
    match builder.bootstrap() {
        Ok(runtime) => Ok(runtime),
        Err(BootstrapError::Verification(report)) => {
            println!("{report}");
            anyhow::bail!(
                "architecture verification failed for {} architecture(s)",
                report.failed_architectures().len()
            )
        }
        Err(e) => Err(e.into()),
    }
}

fn require_model(config: &ServerConfig) -> anyhow::Result<&str> {
    config
        .model
        .as_deref()
        .context("no model given: pass --model or set `model` in the config file")
}

fn run_verify(config: &ServerConfig) -> anyhow::Result<()> {
    let runtime = bootstrap(config)?;
    println!("{}", runtime.verification_report());
    Ok(())
}

fn run_list(config: &ServerConfig) -> anyhow::Result<()> {
    let runtime = bootstrap(config)?;
    let speculative = runtime.speculative();
    println!(
        "{:<40} {:<28} {:<16} LOADER",
        "ARCHITECTURE", "MODALITIES", "SPECULATIVE"
    );
    for entry in runtime.registry().entries() {
        let modalities = entry
            .modality_tags
            .iter()
            .map(|t| t.as_str())
            .collect::<Vec<_>>()
            .join(",");
        let role = speculative.compatibility(&entry.architecture_id)?.role.to_string();
        println!(
            "{:<40} {:<28} {:<16} {}",
            entry.architecture_id, modalities, role, entry.loader_reference
        );
    }
    Ok(())
}

async fn run_resolve(config: &ServerConfig) -> anyhow::Result<()> {
    let model = require_model(config)?;
    let runtime = bootstrap(config)?;
    let prepared = runtime.prepare_model(model).await?;
    info!(
        model,
        architecture = prepared.architecture_id(),
        strategy = %prepared.resolved.config.strategy,
        "configuration resolved"
    );
    println!(
        "{}",
        serde_json::to_string_pretty(prepared.resolved.config.as_ref())?
    );
    Ok(())
}

async fn run_preflight(config: &ServerConfig) -> anyhow::Result<()> {
    let model = require_model(config)?;
    let defaults = LaunchSettings::default();
    let settings = LaunchSettings {
        served_model_name: config.served_model_name.clone(),
        dtype: config.dtype.clone().unwrap_or(defaults.dtype),
        max_model_len: config.max_model_len,
        gpu_memory_utilization: config
            .gpu_memory_utilization
            .unwrap_or(defaults.gpu_memory_utilization),
        tensor_parallel_size: config
            .tensor_parallel_size
            .unwrap_or(defaults.tensor_parallel_size),
        num_speculative_tokens: config
            .num_speculative_tokens
            .unwrap_or(defaults.num_speculative_tokens),
    };
    settings.validate(config.draft_model.is_some())?;

    let runtime = bootstrap(config)?;
    let plan = match config.draft_model.as_deref() {
        Some(draft) => {
            let prepared = runtime.prepare_speculative(model, draft).await?;
            LaunchPlan::build(
                &settings,
                &prepared.target,
                Some((&prepared.draft, &prepared.pairing)),
            )?
        }
        None => {
            let target = runtime.prepare_model(model).await?;
            LaunchPlan::build(&settings, &target, None)?
        }
    };

    info!(
        model = %plan.served_model_name,
        architecture = %plan.target.architecture,
        max_model_len = plan.max_model_len,
        speculative = plan.speculative.is_some(),
        "preflight complete, ready to serve"
    );
    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}
