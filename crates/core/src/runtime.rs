//! Bootstrap and the ready-to-serve runtime.
//!
//! [`RuntimeBuilder::bootstrap`] registers every declared architecture,
//! freezes the registry, and runs the startup verifier. An
//! [`ArchitectureRuntime`] only exists once all of that succeeded.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use futures::future::try_join;
use thiserror::Error;
use tracing::{debug, info};

use crate::configs::{
    ConfigDescriptor, ConfigResolver, ConfigSource, ExplicitConfigMapping, ModelLoadError, ResolvedModel,
    StaticConfigSource,
};
use crate::loader::{DescriptorFetcher, HubFetcher};
use crate::models::{
    register_all, ArchitectureRegistry, DeclarationTable, ImplementationCatalog,
    ImplementationHandle, RegisterDeclarationsError, StaticCatalog,
};
use crate::multimodal::{required_subsystems, MultimodalSubsystem};
use crate::spec_decode::{
    SpeculativeCompatibility, SpeculativeDecodeAdapter, SpeculativeDecodeMismatchError,
    SpeculativePairing,
};
use crate::verify::{BuildTimeVerifier, VerificationReport};

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("failed to register architectures: {0}")]
    Registry(#[from] RegisterDeclarationsError),
    #[error("architecture verification failed\n{0}")]
    Verification(VerificationReport),
}

#[derive(Debug, Error)]
pub enum SpeculativeSetupError {
    #[error("failed to prepare {role} model: {source}")]
    Load {
        role: &'static str,
        #[source]
        source: ModelLoadError,
    },
    #[error(transparent)]
    Mismatch(#[from] SpeculativeDecodeMismatchError),
    #[error(
        "{role} {architecture_id} declares {declared}-wide hidden states, \
         but its checkpoint has hidden_size {checkpoint}"
    )]
    HiddenSize {
        role: &'static str,
        architecture_id: String,
        declared: usize,
        checkpoint: usize,
    },
}

pub struct RuntimeBuilder {
    declarations: DeclarationTable,
    mapping: ExplicitConfigMapping,
    source: Arc<dyn ConfigSource>,
    catalog: Arc<dyn ImplementationCatalog>,
    fetcher: Arc<dyn DescriptorFetcher>,
}

impl Default for RuntimeBuilder {
    /// Built-in declarations, mapping and catalog; no external source.
    fn default() -> Self {
        Self {
            declarations: DeclarationTable::builtin(),
            mapping: ExplicitConfigMapping::builtin(),
            source: Arc::new(StaticConfigSource::new()),
            catalog: Arc::new(StaticCatalog::builtin()),
            fetcher: Arc::new(HubFetcher::default()),
        }
    }
}

impl RuntimeBuilder {
    /// Builder with no architectures at all.
    pub fn empty() -> Self {
        Self {
            declarations: DeclarationTable::default(),
            mapping: ExplicitConfigMapping::new(),
            source: Arc::new(StaticConfigSource::new()),
            catalog: Arc::new(StaticCatalog::new()),
            fetcher: Arc::new(HubFetcher::default()),
        }
    }

    /// Append declarations after the ones already present.
    pub fn declarations(mut self, table: DeclarationTable) -> Self {
        self.declarations.extend(table);
        self
    }

    pub fn mapping(mut self, mapping: ExplicitConfigMapping) -> Self {
        self.mapping = mapping;
        self
    }

    pub fn source(mut self, source: Arc<dyn ConfigSource>) -> Self {
        self.source = source;
        self
    }

    pub fn catalog(mut self, catalog: Arc<dyn ImplementationCatalog>) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn fetcher(mut self, fetcher: Arc<dyn DescriptorFetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn bootstrap(self) -> Result<ArchitectureRuntime, BootstrapError> {
        let registry = Arc::new(ArchitectureRegistry::new());
        register_all(&registry, self.declarations.architectures)?;
        registry.freeze();

        let report = BuildTimeVerifier::new(self.catalog.as_ref(), &self.mapping, self.source.as_ref())
            .report(&registry);
        if !report.is_ok() {
            return Err(BootstrapError::Verification(report));
        }

        let resolver = ConfigResolver::new(
            Arc::clone(&registry),
            self.mapping,
            self.source,
            self.fetcher,
        );
        let speculative = SpeculativeDecodeAdapter::new(Arc::clone(&registry));
        info!(architectures = registry.len(), "architecture runtime ready");
        Ok(ArchitectureRuntime {
            registry,
            resolver,
            speculative,
            catalog: self.catalog,
            report,
        })
    }
}

/// A model ready to hand to the loader: implementation, configuration and
/// the engine subsystems its modalities need.
#[derive(Debug, Clone)]
pub struct PreparedModel {
    pub resolved: ResolvedModel,
    pub implementation: ImplementationHandle,
    pub subsystems: BTreeSet<MultimodalSubsystem>,
}

impl PreparedModel {
    pub fn architecture_id(&self) -> &str {
        &self.resolved.entry.architecture_id
    }
}

#[derive(Debug)]
pub struct SpeculativePlan {
    pub target: PreparedModel,
    pub draft: PreparedModel,
    pub pairing: Arc<SpeculativePairing>,
}

pub struct ArchitectureRuntime {
    registry: Arc<ArchitectureRegistry>,
    resolver: ConfigResolver,
    speculative: SpeculativeDecodeAdapter,
    catalog: Arc<dyn ImplementationCatalog>,
    report: VerificationReport,
}

impl fmt::Debug for ArchitectureRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchitectureRuntime")
            .field("registry", &self.registry)
            .field("resolver", &self.resolver)
            .finish()
    }
}

impl ArchitectureRuntime {
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::default()
    }

    pub fn registry(&self) -> &Arc<ArchitectureRegistry> {
        &self.registry
    }

    pub fn resolver(&self) -> &ConfigResolver {
        &self.resolver
    }

    pub fn speculative(&self) -> &SpeculativeDecodeAdapter {
        &self.speculative
    }

    pub fn verification_report(&self) -> &VerificationReport {
        &self.report
    }

    /// Fetch and resolve the model at `locator` and locate its implementation.
    pub async fn prepare_model(&self, locator: &str) -> Result<PreparedModel, ModelLoadError> {
        let resolved = self.resolver.resolve_model(locator).await?;
        let implementation = self
            .catalog
            .locate(&resolved.entry.loader_reference)
            .map_err(|source| ModelLoadError::Implementation {
                architecture_id: resolved.entry.architecture_id.clone(),
                source,
            })?;
        let subsystems = required_subsystems(&resolved.entry.modality_tags);
        Ok(PreparedModel {
            resolved,
            implementation,
            subsystems,
        })
    }

    /// Pairing for two registered architectures.
    pub fn speculative_pairing(
        &self,
        target_id: &str,
        draft_id: &str,
    ) -> Result<Arc<SpeculativePairing>, SpeculativeDecodeMismatchError> {
        self.speculative.check_compatibility(target_id, draft_id)
    }

    /// Prepare a target and a draft model concurrently, then check that
    /// they can be paired and that each checkpoint's `hidden_size` matches
    /// the width its architecture declared.
    pub async fn prepare_speculative(
        &self,
        target_locator: &str,
        draft_locator: &str,
    ) -> Result<SpeculativePlan, SpeculativeSetupError> {
        let target = async {
            self.prepare_model(target_locator)
                .await
                .map_err(|source| SpeculativeSetupError::Load {
                    role: "target",
                    source,
                })
        };
        let draft = async {
            self.prepare_model(draft_locator)
                .await
                .map_err(|source| SpeculativeSetupError::Load {
                    role: "draft",
                    source,
                })
        };
        let (target, draft) = try_join(target, draft).await?;
        let pairing = self.speculative_pairing(target.architecture_id(), draft.architecture_id())?;
        check_hidden_size("target", &target, &pairing.target)?;
        check_hidden_size("draft", &draft, &pairing.draft)?;
        Ok(SpeculativePlan {
            target,
            draft,
            pairing,
        })
    }
}

/// Top-level `hidden_size`, else the text sub-config's.
fn model_hidden_size(config: &ConfigDescriptor) -> Option<usize> {
    config
        .get_i64("hidden_size")
        .or_else(|| config.nested("text_config")?.get_i64("hidden_size"))
        .and_then(|n| usize::try_from(n).ok())
}

fn check_hidden_size(
    role: &'static str,
    model: &PreparedModel,
    facts: &SpeculativeCompatibility,
) -> Result<(), SpeculativeSetupError> {
    let Some(adapter) = &facts.hidden_state_adapter else {
        return Ok(());
    };
    let Some(checkpoint) = model_hidden_size(&model.resolved.config) else {
        debug!(architecture = model.architecture_id(), role, "checkpoint has no hidden_size");
        return Ok(());
    };
    let declared = adapter.layer_width();
    if declared != checkpoint {
        return Err(SpeculativeSetupError::HiddenSize {
            role,
            architecture_id: model.architecture_id().to_string(),
            declared,
            checkpoint,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CheckpointDescriptor;
    use crate::configs::ResolutionStrategy;
    use crate::testing::{StaticFetcher, OMEGA17_VL_EXP_CONFIG, QWEN3_06B_CONFIG};

    #[test]
    fn builtin_bootstrap_verifies() {
        let runtime = ArchitectureRuntime::builder().bootstrap().unwrap();
        assert!(runtime.registry().is_frozen());
        assert!(runtime.verification_report().is_ok());
        assert_eq!(
            runtime.verification_report().checked,
            runtime.registry().len()
        );
    }

    #[test]
    fn declaration_without_config_fails_bootstrap() {
        let extra = DeclarationTable::from_toml_str(
            r#"
            [[architecture]]
            id = "MysteryForCausalLM"
            loader = "models::llama::LlamaForCausalLM"
            "#,
        )
        .unwrap();
        let err = ArchitectureRuntime::builder()
            .declarations(extra)
            .bootstrap()
            .unwrap_err();
        match err {
            BootstrapError::Verification(report) => {
                assert_eq!(report.failed_architectures(), vec!["MysteryForCausalLM"]);
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn duplicate_declaration_fails_bootstrap() {
        let extra = DeclarationTable::from_toml_str(
            r#"
            [[architecture]]
            id = "LlamaForCausalLM"
            loader = "models::llama::LlamaForCausalLM"
            "#,
        )
        .unwrap();
        assert!(matches!(
            ArchitectureRuntime::builder().declarations(extra).bootstrap(),
            Err(BootstrapError::Registry(_))
        ));
    }

    #[tokio::test]
    async fn prepare_builtin_qwen3() {
        let fetcher = StaticFetcher::new().with(
            "Qwen/Qwen3-0.6B",
            CheckpointDescriptor::from_json_str(QWEN3_06B_CONFIG).unwrap(),
        );
        let runtime = ArchitectureRuntime::builder()
            .fetcher(Arc::new(fetcher))
            .bootstrap()
            .unwrap();
        let prepared = runtime.prepare_model("Qwen/Qwen3-0.6B").await.unwrap();
        assert_eq!(prepared.architecture_id(), "Qwen3ForCausalLM");
        assert_eq!(prepared.resolved.config.class_name, "Qwen3Config");
        assert_eq!(prepared.resolved.config.get_i64("hidden_size"), Some(1024));
        assert!(prepared.subsystems.is_empty());
    }

    #[tokio::test]
    async fn prepare_speculative_reports_load_side() {
        let fetcher = StaticFetcher::new().with(
            "Qwen/Qwen3-0.6B",
            CheckpointDescriptor::from_json_str(QWEN3_06B_CONFIG).unwrap(),
        );
        let runtime = ArchitectureRuntime::builder()
            .fetcher(Arc::new(fetcher))
            .bootstrap()
            .unwrap();
        let err = runtime
            .prepare_speculative("Qwen/Qwen3-0.6B", "org/missing-draft")
            .await
            .unwrap_err();
        assert!(matches!(err, SpeculativeSetupError::Load { role: "draft", .. }));
    }

    fn builtin_runtime(fetcher: StaticFetcher) -> ArchitectureRuntime {
        ArchitectureRuntime::builder()
            .fetcher(Arc::new(fetcher))
            .bootstrap()
            .unwrap()
    }

    #[tokio::test]
    async fn omega17_resolves_through_model_type_alias() {
        let runtime = builtin_runtime(StaticFetcher::new().with(
            "org/omega17-vl-exp",
            CheckpointDescriptor::from_json_str(OMEGA17_VL_EXP_CONFIG).unwrap(),
        ));
        let prepared = runtime.prepare_model("org/omega17-vl-exp").await.unwrap();

        assert_eq!(prepared.architecture_id(), "Omega17VLExpForConditionalGeneration");
        assert_eq!(
            prepared.implementation.reference.to_string(),
            "models::omega17_vl_exp::Omega17VLExpForConditionalGeneration"
        );
        let config = &prepared.resolved.config;
        assert_eq!(config.class_name, "Qwen3VLMoeConfig");
        assert_eq!(config.strategy, ResolutionStrategy::ModelTypeAlias);
        let text = config.nested("text_config").unwrap();
        assert_eq!(text.get_i64("hidden_size"), Some(2048));
        assert_eq!(text.get_i64("num_experts"), Some(128));
        assert_eq!(config.nested("vision_config").unwrap().get_i64("depth"), Some(27));
        assert!(prepared
            .subsystems
            .contains(&MultimodalSubsystem::VideoProcessor));
    }

    #[tokio::test]
    async fn prepare_speculative_checks_checkpoint_hidden_size() {
        let llama = CheckpointDescriptor::new(["LlamaForCausalLM"])
            .with_model_type("llama")
            .with_field("hidden_size", 4096)
            .with_field("num_attention_heads", 32)
            .with_field("num_hidden_layers", 32)
            .with_field("intermediate_size", 11008)
            .with_field("vocab_size", 32000);
        let runtime = builtin_runtime(
            StaticFetcher::new()
                .with("meta/llama", llama)
                .with(
                    "Qwen/Qwen3-0.6B",
                    CheckpointDescriptor::from_json_str(QWEN3_06B_CONFIG).unwrap(),
                )
                .with(
                    "org/qwen3-8b",
                    CheckpointDescriptor::from_json_str(QWEN3_06B_CONFIG)
                        .unwrap()
                        .with_field("hidden_size", 4096),
                ),
        );

        // Declared widths differ: 4096 against 1024.
        let err = runtime
            .prepare_speculative("meta/llama", "Qwen/Qwen3-0.6B")
            .await
            .unwrap_err();
        assert!(matches!(err, SpeculativeSetupError::Mismatch(_)), "{err}");

        // Declared widths agree, the checkpoint does not.
        let err = runtime
            .prepare_speculative("org/qwen3-8b", "Qwen/Qwen3-0.6B")
            .await
            .unwrap_err();
        match err {
            SpeculativeSetupError::HiddenSize {
                role,
                architecture_id,
                declared,
                checkpoint,
            } => {
                assert_eq!(role, "target");
                assert_eq!(architecture_id, "Qwen3ForCausalLM");
                assert_eq!((declared, checkpoint), (1024, 4096));
            }
            other => panic!("unexpected error {other}"),
        }

        let plan = runtime
            .prepare_speculative("Qwen/Qwen3-0.6B", "Qwen/Qwen3-0.6B")
            .await
            .unwrap();
        assert_eq!(plan.pairing.adapter.shared_layout().width, 1024);
    }

    #[test]
    fn hidden_size_falls_back_to_text_config() {
        let checkpoint = CheckpointDescriptor::from_json_str(OMEGA17_VL_EXP_CONFIG).unwrap();
        let runtime = builtin_runtime(StaticFetcher::new());
        let config = runtime.resolver().resolve(&checkpoint).unwrap();
        assert_eq!(model_hidden_size(&config), Some(2048));
    }
}
