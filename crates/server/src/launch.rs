//! Startup plumbing shared by the CLI subcommands: building the architecture
//! runtime from on-disk sources, and turning prepared models into a launch
//! plan for the engine.

use std::path::PathBuf;
use std::sync::Arc;

use archreg_core::{
    configs::{ConfigDescriptor, SchemaDirSource},
    loader::HubFetcher,
    models::{DeclarationError, DeclarationTable},
    multimodal::{ModalityTag, MultimodalSubsystem},
    spec_decode::{SharedLayout, SpeculativePairing},
    ArchitectureRuntime, PreparedModel, RuntimeBuilder,
};
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

/// Context length used when neither the CLI nor the checkpoint gives one.
pub const DEFAULT_MAX_MODEL_LEN: usize = 2048;

/// Where architecture declarations and configuration schemas come from, on
/// top of the built-in ones.
#[derive(Debug, Clone, Default)]
pub struct RegistrySources {
    pub registry: Option<PathBuf>,
    pub config_schema_dir: Option<PathBuf>,
    pub revision: Option<String>,
}

impl RegistrySources {
    pub fn runtime_builder(&self) -> Result<RuntimeBuilder, DeclarationError> {
        let fetcher = match &self.revision {
            Some(revision) => HubFetcher::new(revision.clone()),
            None => HubFetcher::default(),
        };
        let mut builder = ArchitectureRuntime::builder().fetcher(Arc::new(fetcher));
        if let Some(path) = &self.registry {
            builder = builder.declarations(DeclarationTable::load(path)?);
        }
        if let Some(dir) = &self.config_schema_dir {
            builder = builder.source(Arc::new(SchemaDirSource::new(dir.clone())));
        }
        Ok(builder)
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum LaunchError {
    #[error("gpu_memory_utilization must be in (0, 1], got {0}")]
    GpuMemoryUtilization(f32),
    #[error("tensor_parallel_size must be at least 1")]
    TensorParallelSize,
    #[error("num_speculative_tokens must be at least 1 when a draft model is set")]
    SpeculativeTokens,
    #[error("max_model_len {requested} exceeds the {limit} positions {architecture} supports")]
    ContextTooLong {
        architecture: String,
        requested: usize,
        limit: usize,
    },
}

/// Engine-facing knobs from the CLI and config file.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchSettings {
    pub served_model_name: Option<String>,
    pub dtype: String,
    pub max_model_len: Option<usize>,
    pub gpu_memory_utilization: f32,
    pub tensor_parallel_size: usize,
    pub num_speculative_tokens: usize,
}

impl Default for LaunchSettings {
    fn default() -> Self {
        Self {
            served_model_name: None,
            dtype: "auto".to_string(),
            max_model_len: None,
            gpu_memory_utilization: 0.9,
            tensor_parallel_size: 1,
            num_speculative_tokens: 3,
        }
    }
}

impl LaunchSettings {
    pub fn validate(&self, speculative: bool) -> Result<(), LaunchError> {
        let util = self.gpu_memory_utilization;
        if !(util > 0.0 && util <= 1.0) {
            return Err(LaunchError::GpuMemoryUtilization(util));
        }
        if self.tensor_parallel_size == 0 {
            return Err(LaunchError::TensorParallelSize);
        }
        if speculative && self.num_speculative_tokens == 0 {
            return Err(LaunchError::SpeculativeTokens);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelPlan {
    pub locator: String,
    pub architecture: String,
    pub implementation: String,
    pub kind: String,
    pub modalities: Vec<ModalityTag>,
    pub subsystems: Vec<MultimodalSubsystem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_position_embeddings: Option<usize>,
}

impl ModelPlan {
    pub fn from_prepared(model: &PreparedModel) -> Self {
        Self {
            locator: model.resolved.locator.clone(),
            architecture: model.architecture_id().to_string(),
            implementation: model.implementation.reference.to_string(),
            kind: model.implementation.kind.to_string(),
            modalities: model.resolved.entry.modality_tags.iter().copied().collect(),
            subsystems: model.subsystems.iter().copied().collect(),
            max_position_embeddings: max_positions(&model.resolved.config),
        }
    }
}

/// First `max_position_embeddings` found walking the descriptor tree; for
/// multimodal checkpoints it lives in the text sub-config.
fn max_positions(config: &ConfigDescriptor) -> Option<usize> {
    config
        .walk()
        .into_iter()
        .find_map(|d| d.get_i64("max_position_embeddings"))
        .and_then(|n| usize::try_from(n).ok())
}

#[derive(Debug, Clone, Serialize)]
pub struct SpeculativeLaunch {
    pub draft: ModelPlan,
    pub num_speculative_tokens: usize,
    pub shared_layout: SharedLayout,
}

/// Everything the engine needs to start serving.
#[derive(Debug, Clone, Serialize)]
pub struct LaunchPlan {
    pub served_model_name: String,
    pub dtype: String,
    pub max_model_len: usize,
    pub gpu_memory_utilization: f32,
    pub tensor_parallel_size: usize,
    pub target: ModelPlan,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speculative: Option<SpeculativeLaunch>,
}

impl LaunchPlan {
    pub fn build(
        settings: &LaunchSettings,
        target: &PreparedModel,
        speculative: Option<(&PreparedModel, &SpeculativePairing)>,
    ) -> Result<Self, LaunchError> {
        settings.validate(speculative.is_some())?;
        let target_plan = ModelPlan::from_prepared(target);

        let max_model_len = match (settings.max_model_len, target_plan.max_position_embeddings) {
            (Some(requested), Some(limit)) if requested > limit => {
                return Err(LaunchError::ContextTooLong {
                    architecture: target_plan.architecture.clone(),
                    requested,
                    limit,
                });
            }
            (Some(requested), _) => requested,
            (None, Some(limit)) => limit,
            (None, None) => {
                warn!(
                    architecture = %target_plan.architecture,
                    default = DEFAULT_MAX_MODEL_LEN,
                    "checkpoint does not declare a context length"
                );
                DEFAULT_MAX_MODEL_LEN
            }
        };

        let speculative = speculative.map(|(draft, pairing)| SpeculativeLaunch {
            draft: ModelPlan::from_prepared(draft),
            num_speculative_tokens: settings.num_speculative_tokens,
            shared_layout: pairing.adapter.shared_layout(),
        });

        Ok(Self {
            served_model_name: settings
                .served_model_name
                .clone()
                .unwrap_or_else(|| target_plan.locator.clone()),
            dtype: settings.dtype.clone(),
            max_model_len,
            gpu_memory_utilization: settings.gpu_memory_utilization,
            tensor_parallel_size: settings.tensor_parallel_size,
            target: target_plan,
            speculative,
        })
    }
}
