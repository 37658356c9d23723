//! Configuration resolution through a chain of strategies.
//!
//! For one checkpoint the resolver tries, in order:
//! 1. the explicit mapping, by architecture id;
//! 2. the external configuration source, auto-detecting the class it
//!    publishes for the architecture;
//! 3. the explicit class registered for the checkpoint's `model_type`.
//!
//! The first tier with a class wins and is authoritative: if it rejects the
//! checkpoint, later tiers are not consulted and values are never merged
//! across tiers. Nested sub-configs resolve against the child classes of the
//! chosen class; any failure below the top level fails the whole resolution
//! and nothing partial is returned.
//!
//! [`select_class`] is the chain itself; the startup verifier walks it too,
//! so an architecture resolves with the class it was verified against.
//! [`ConfigResolver::resolve_model`] adds fetching on top and coalesces
//! concurrent requests for the same locator into one fetch.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::descriptor::{json_kind, ConfigDescriptor, FieldValue, ResolutionStrategy};
use super::mapping::ExplicitConfigMapping;
use super::schema::{ConfigClass, FieldType};
use super::source::ConfigSource;
use crate::config::CheckpointDescriptor;
use crate::loader::{DescriptorFetcher, FetchError};
use crate::models::{ArchitectureEntry, ArchitectureRegistry, LocateError, RegistryError};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ViolationKind {
    #[error("missing required field")]
    MissingField,
    #[error("expected {expected}, found {found}")]
    TypeMismatch {
        expected: FieldType,
        found: &'static str,
    },
    #[error("missing required sub-config")]
    MissingNested,
    #[error("sub-config must be an object, found {found}")]
    NotAnObject { found: &'static str },
}

/// Where a checkpoint breaks a class's schema. `path` is dotted through
/// nested slots (`vision_config.depth`).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{path}: {kind}")]
pub struct SchemaViolation {
    pub path: String,
    pub kind: ViolationKind,
}

impl SchemaViolation {
    fn new(path: impl Into<String>, kind: ViolationKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }

    fn nested_in(mut self, slot: &str) -> Self {
        self.path = format!("{slot}.{}", self.path);
        self
    }
}

/// Outcome of one tier of the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    NoClass,
    SourceFailed(String),
    Rejected {
        class: String,
        violation: SchemaViolation,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyAttempt {
    pub strategy: ResolutionStrategy,
    pub outcome: AttemptOutcome,
}

impl fmt::Display for StrategyAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            AttemptOutcome::NoClass => write!(f, "{}: no configuration class", self.strategy),
            AttemptOutcome::SourceFailed(msg) => write!(f, "{}: {msg}", self.strategy),
            AttemptOutcome::Rejected { class, violation } => {
                write!(f, "{}: {class} rejected {violation}", self.strategy)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionFailure {
    #[error("checkpoint declares no architecture")]
    MissingArchitecture,
    #[error("unresolved architecture")]
    UnresolvedArchitecture,
    #[error("invalid configuration for {class}: {violation}")]
    InvalidConfig {
        class: String,
        violation: SchemaViolation,
    },
}

fn format_attempts(attempts: &[StrategyAttempt]) -> String {
    attempts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot resolve configuration for {architecture_id}: {reason} [{}]", format_attempts(.attempts))]
pub struct ConfigResolutionError {
    pub architecture_id: String,
    pub reason: ResolutionFailure,
    /// Every tier consulted, in order.
    pub attempts: Vec<StrategyAttempt>,
}

impl ConfigResolutionError {
    pub fn strategies(&self) -> Vec<ResolutionStrategy> {
        self.attempts.iter().map(|a| a.strategy).collect()
    }
}

/// Class picked by the strategy chain for one architecture.
#[derive(Debug, Clone)]
pub struct ClassSelection {
    /// Winning tier and its class. `None` when every tier came up empty.
    pub chosen: Option<(ResolutionStrategy, Arc<ConfigClass>)>,
    /// Tiers consulted before the winner, in order.
    pub attempts: Vec<StrategyAttempt>,
}

impl ClassSelection {
    /// Error message of a configuration source that failed along the way.
    pub fn source_failure(&self) -> Option<&str> {
        self.attempts.iter().find_map(|a| match &a.outcome {
            AttemptOutcome::SourceFailed(msg) => Some(msg.as_str()),
            _ => None,
        })
    }
}

/// Walk the strategy chain for `architecture_id`. `model_type` feeds the
/// last tier only; a source failure is recorded and the chain goes on.
pub fn select_class(
    mapping: &ExplicitConfigMapping,
    source: &dyn ConfigSource,
    architecture_id: &str,
    model_type: Option<&str>,
) -> ClassSelection {
    let mut attempts = Vec::with_capacity(3);
    let chosen = |strategy, class, attempts| ClassSelection {
        chosen: Some((strategy, class)),
        attempts,
    };

    if let Some(class) = mapping.get(architecture_id) {
        return chosen(ResolutionStrategy::ExplicitMapping, class, attempts);
    }
    attempts.push(StrategyAttempt {
        strategy: ResolutionStrategy::ExplicitMapping,
        outcome: AttemptOutcome::NoClass,
    });

    match source.lookup(architecture_id) {
        Ok(Some(class)) => return chosen(ResolutionStrategy::AutoDetect, class, attempts),
        Ok(None) => attempts.push(StrategyAttempt {
            strategy: ResolutionStrategy::AutoDetect,
            outcome: AttemptOutcome::NoClass,
        }),
        Err(e) => {
            warn!(architecture = %architecture_id, source = source.name(), error = %e, "configuration source failed");
            attempts.push(StrategyAttempt {
                strategy: ResolutionStrategy::AutoDetect,
                outcome: AttemptOutcome::SourceFailed(e.to_string()),
            });
        }
    }

    if let Some(model_type) = model_type {
        if let Some(class) = mapping.alias(model_type) {
            debug!(architecture = %architecture_id, model_type, class = %class.name, "using model_type alias");
            return chosen(ResolutionStrategy::ModelTypeAlias, class, attempts);
        }
        attempts.push(StrategyAttempt {
            strategy: ResolutionStrategy::ModelTypeAlias,
            outcome: AttemptOutcome::NoClass,
        });
    }
    ClassSelection {
        chosen: None,
        attempts,
    }
}

fn missing_architecture(checkpoint: &CheckpointDescriptor) -> ConfigResolutionError {
    ConfigResolutionError {
        architecture_id: checkpoint
            .model_type
            .clone()
            .unwrap_or_else(|| "<unknown>".to_string()),
        reason: ResolutionFailure::MissingArchitecture,
        attempts: Vec::new(),
    }
}

/// Failure to prepare a model from its locator.
#[derive(Debug, Clone, Error)]
pub enum ModelLoadError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Unregistered(#[from] RegistryError),
    #[error(transparent)]
    Resolution(#[from] ConfigResolutionError),
    #[error("implementation for {architecture_id} unavailable: {source}")]
    Implementation {
        architecture_id: String,
        #[source]
        source: LocateError,
    },
}

/// A model whose implementation and configuration are both known.
#[derive(Debug, Clone)]
pub struct ResolvedModel {
    pub locator: String,
    pub entry: Arc<ArchitectureEntry>,
    pub checkpoint: Arc<CheckpointDescriptor>,
    pub config: Arc<ConfigDescriptor>,
}

type InFlight = Shared<BoxFuture<'static, Result<ResolvedModel, ModelLoadError>>>;

struct Inner {
    registry: Arc<ArchitectureRegistry>,
    mapping: ExplicitConfigMapping,
    source: Arc<dyn ConfigSource>,
    fetcher: Arc<dyn DescriptorFetcher>,
    inflight: Mutex<HashMap<String, InFlight>>,
}

/// Cheap to clone; clones share the in-flight table.
#[derive(Clone)]
pub struct ConfigResolver {
    inner: Arc<Inner>,
}

impl fmt::Debug for ConfigResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigResolver")
            .field("explicit_classes", &self.inner.mapping.len())
            .field("source", &self.inner.source.name())
            .finish()
    }
}

impl ConfigResolver {
    pub fn new(
        registry: Arc<ArchitectureRegistry>,
        mapping: ExplicitConfigMapping,
        source: Arc<dyn ConfigSource>,
        fetcher: Arc<dyn DescriptorFetcher>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                mapping,
                source,
                fetcher,
                inflight: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn mapping(&self) -> &ExplicitConfigMapping {
        &self.inner.mapping
    }

    /// Resolve a checkpoint's configuration through the strategy chain.
    pub fn resolve(
        &self,
        checkpoint: &CheckpointDescriptor,
    ) -> Result<ConfigDescriptor, ConfigResolutionError> {
        self.inner.resolve(checkpoint)
    }

    /// Fetch, identify and resolve the model at `locator`.
    ///
    /// Concurrent calls for the same locator share one fetch and one
    /// resolution; every caller sees the same result.
    pub async fn resolve_model(&self, locator: &str) -> Result<ResolvedModel, ModelLoadError> {
        let shared = {
            let mut inflight = self.inner.inflight();
            match inflight.get(locator) {
                Some(pending) => {
                    debug!(model = locator, "joining in-flight resolution");
                    pending.clone()
                }
                None => {
                    let inner = Arc::clone(&self.inner);
                    let key = locator.to_string();
                    let fut = async move { inner.load(key).await }.boxed().shared();
                    inflight.insert(locator.to_string(), fut.clone());
                    fut
                }
            }
        };

        let result = shared.clone().await;

        // Whoever finishes first clears the slot so later calls start fresh.
        let mut inflight = self.inner.inflight();
        if inflight.get(locator).is_some_and(|f| f.ptr_eq(&shared)) {
            inflight.remove(locator);
        }
        result
    }
}

impl Inner {
    fn inflight(&self) -> MutexGuard<'_, HashMap<String, InFlight>> {
        self.inflight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn load(self: Arc<Self>, locator: String) -> Result<ResolvedModel, ModelLoadError> {
        let checkpoint = self.fetcher.fetch(&locator).await?;
        if checkpoint.architectures.is_empty() {
            return Err(missing_architecture(&checkpoint).into());
        }
        let entry = self.registry.resolve_first(&checkpoint.architectures)?;
        let config = self.resolve(&checkpoint)?;
        info!(
            model = %locator,
            architecture = %entry.architecture_id,
            class = %config.class_name,
            strategy = %config.strategy,
            "resolved model"
        );
        Ok(ResolvedModel {
            locator,
            entry,
            checkpoint: Arc::new(checkpoint),
            config: Arc::new(config),
        })
    }

    /// First declared architecture the registry knows, else the first one
    /// declared.
    fn select_architecture(&self, checkpoint: &CheckpointDescriptor) -> Option<String> {
        match self.registry.resolve_first(&checkpoint.architectures) {
            Ok(entry) => Some(entry.architecture_id.clone()),
            Err(_) => checkpoint.primary_architecture().map(str::to_string),
        }
    }

    fn resolve(
        &self,
        checkpoint: &CheckpointDescriptor,
    ) -> Result<ConfigDescriptor, ConfigResolutionError> {
        let Some(architecture_id) = self.select_architecture(checkpoint) else {
            return Err(missing_architecture(checkpoint));
        };

        // A model_type declared at registration is what verification saw.
        let declared = self
            .registry
            .resolve(&architecture_id)
            .ok()
            .and_then(|entry| entry.model_type.clone());
        let model_type = declared.as_deref().or(checkpoint.model_type.as_deref());

        let ClassSelection { chosen, mut attempts } = select_class(
            &self.mapping,
            self.source.as_ref(),
            &architecture_id,
            model_type,
        );
        let Some((strategy, class)) = chosen else {
            return Err(ConfigResolutionError {
                architecture_id,
                reason: ResolutionFailure::UnresolvedArchitecture,
                attempts,
            });
        };

        match instantiate(&class, &architecture_id, strategy, None, &checkpoint.fields) {
            Ok(descriptor) => {
                debug!(architecture = %architecture_id, class = %class.name, %strategy, "configuration resolved");
                Ok(descriptor)
            }
            Err(violation) => {
                warn!(architecture = %architecture_id, class = %class.name, %strategy, %violation, "checkpoint rejected");
                attempts.push(StrategyAttempt {
                    strategy,
                    outcome: AttemptOutcome::Rejected {
                        class: class.name.clone(),
                        violation: violation.clone(),
                    },
                });
                Err(ConfigResolutionError {
                    architecture_id,
                    reason: ResolutionFailure::InvalidConfig {
                        class: class.name.clone(),
                        violation,
                    },
                    attempts,
                })
            }
        }
    }
}

/// Build a descriptor for `class` from `raw`, recursing into nested slots.
/// Nothing is returned unless every level validates.
fn instantiate(
    class: &ConfigClass,
    architecture_id: &str,
    strategy: ResolutionStrategy,
    slot: Option<&str>,
    raw: &Map<String, Value>,
) -> Result<ConfigDescriptor, SchemaViolation> {
    let mut fields = BTreeMap::new();
    for spec in &class.fields {
        let present = raw.get(&spec.name).filter(|v| !v.is_null());
        let value = match (present, &spec.default) {
            (Some(v), _) => Some((v, json_kind(v))),
            (None, Some(default)) => Some((default, "default")),
            (None, None) if spec.required => {
                return Err(SchemaViolation::new(&spec.name, ViolationKind::MissingField));
            }
            (None, None) => None,
        };
        if let Some((v, found)) = value {
            let typed = FieldValue::from_json(spec.ty, v).ok_or_else(|| {
                SchemaViolation::new(
                    &spec.name,
                    ViolationKind::TypeMismatch {
                        expected: spec.ty,
                        found,
                    },
                )
            })?;
            fields.insert(spec.name.clone(), typed);
        }
    }

    let mut nested_configs = Vec::with_capacity(class.nested.len());
    for nested in &class.nested {
        let child_raw = if nested.flattened {
            Some(raw)
        } else {
            match raw.get(&nested.slot) {
                None | Some(Value::Null) => None,
                Some(Value::Object(map)) => Some(map),
                Some(other) => {
                    return Err(SchemaViolation::new(
                        &nested.slot,
                        ViolationKind::NotAnObject {
                            found: json_kind(other),
                        },
                    ));
                }
            }
        };
        match child_raw {
            Some(child_raw) => {
                let child = instantiate(
                    &nested.class,
                    architecture_id,
                    strategy,
                    Some(&nested.slot),
                    child_raw,
                )
                .map_err(|v| if nested.flattened { v } else { v.nested_in(&nested.slot) })?;
                nested_configs.push(child);
            }
            None if nested.required => {
                return Err(SchemaViolation::new(
                    &nested.slot,
                    ViolationKind::MissingNested,
                ));
            }
            None => {}
        }
    }

    let consumed = class.consumed_keys();
    let extra = raw
        .iter()
        .filter(|(k, _)| !consumed.contains(k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    Ok(ConfigDescriptor {
        architecture_id: architecture_id.to_string(),
        class_name: class.name.clone(),
        strategy,
        slot: slot.map(str::to_string),
        fields,
        nested_configs,
        extra,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configs::schema::{FieldSpec, NestedSpec};
    use crate::configs::source::StaticConfigSource;
    use crate::models::{ArchitectureEntry, LoaderReference};
    use crate::testing::{
        tiny_text_checkpoint, tiny_text_class, tiny_vl_checkpoint, tiny_vl_class, StaticFetcher,
        QWEN3_VL_MOE_CONFIG,
    };
    use serde_json::json;

    fn registry(ids: &[&str]) -> Arc<ArchitectureRegistry> {
        let registry = ArchitectureRegistry::new();
        for id in ids {
            registry
                .register(ArchitectureEntry::new(*id, LoaderReference::new("models::test", *id)))
                .unwrap();
        }
        registry.freeze();
        Arc::new(registry)
    }

    fn resolver(
        ids: &[&str],
        mapping: ExplicitConfigMapping,
        source: StaticConfigSource,
    ) -> ConfigResolver {
        ConfigResolver::new(
            registry(ids),
            mapping,
            Arc::new(source),
            Arc::new(StaticFetcher::new()),
        )
    }

    #[test]
    fn explicit_mapping_wins() {
        let resolver = resolver(
            &["TinyForCausalLM"],
            ExplicitConfigMapping::new().with("TinyForCausalLM", tiny_text_class("TinyConfig")),
            StaticConfigSource::new().with("TinyForCausalLM", tiny_text_class("ShouldNotBeUsed")),
        );
        let config = resolver.resolve(&tiny_text_checkpoint("TinyForCausalLM")).unwrap();
        assert_eq!(config.strategy, ResolutionStrategy::ExplicitMapping);
        assert_eq!(config.class_name, "TinyConfig");
        assert_eq!(config.get_i64("hidden_size"), Some(64));
    }

    #[test]
    fn falls_back_to_auto_detect() {
        let resolver = resolver(
            &["TinyForCausalLM"],
            ExplicitConfigMapping::new(),
            StaticConfigSource::new().with("TinyForCausalLM", tiny_text_class("DetectedConfig")),
        );
        let config = resolver.resolve(&tiny_text_checkpoint("TinyForCausalLM")).unwrap();
        assert_eq!(config.strategy, ResolutionStrategy::AutoDetect);
        assert_eq!(config.class_name, "DetectedConfig");
    }

    #[test]
    fn removing_explicit_mapping_switches_to_auto_detect() {
        let mut mapping =
            ExplicitConfigMapping::new().with("TinyForCausalLM", tiny_text_class("TinyConfig"));
        mapping.remove("TinyForCausalLM");
        let resolver = resolver(
            &["TinyForCausalLM"],
            mapping,
            StaticConfigSource::new().with("TinyForCausalLM", tiny_text_class("DetectedConfig")),
        );
        let config = resolver.resolve(&tiny_text_checkpoint("TinyForCausalLM")).unwrap();
        assert_eq!(config.strategy, ResolutionStrategy::AutoDetect);
    }

    #[test]
    fn no_class_anywhere_is_unresolved() {
        let resolver = resolver(
            &["TinyForCausalLM"],
            ExplicitConfigMapping::new(),
            StaticConfigSource::new(),
        );
        let err = resolver
            .resolve(&tiny_text_checkpoint("TinyForCausalLM"))
            .unwrap_err();
        assert_eq!(err.reason, ResolutionFailure::UnresolvedArchitecture);
        assert_eq!(
            err.strategies(),
            vec![ResolutionStrategy::ExplicitMapping, ResolutionStrategy::AutoDetect]
        );
        let msg = err.to_string();
        assert!(msg.contains("explicit-mapping") && msg.contains("auto-detect"), "{msg}");
    }

    #[test]
    fn explicit_rejection_does_not_fall_through() {
        let strict = ConfigClass::new("Strict")
            .field(FieldSpec::required("num_experts", FieldType::Integer));
        let resolver = resolver(
            &["TinyForCausalLM"],
            ExplicitConfigMapping::new().with("TinyForCausalLM", strict),
            StaticConfigSource::new().with("TinyForCausalLM", tiny_text_class("Lenient")),
        );
        let err = resolver
            .resolve(&tiny_text_checkpoint("TinyForCausalLM"))
            .unwrap_err();
        assert!(matches!(
            err.reason,
            ResolutionFailure::InvalidConfig { ref class, .. } if class == "Strict"
        ));
        assert_eq!(err.strategies(), vec![ResolutionStrategy::ExplicitMapping]);
    }

    #[test]
    fn nested_configs_resolve_with_parent() {
        let resolver = resolver(
            &["TinyVLForConditionalGeneration"],
            ExplicitConfigMapping::new(),
            StaticConfigSource::new()
                .with("TinyVLForConditionalGeneration", tiny_vl_class("TinyVLConfig")),
        );
        let config = resolver
            .resolve(&tiny_vl_checkpoint("TinyVLForConditionalGeneration"))
            .unwrap();
        let vision = config.nested("vision_config").expect("vision sub-config");
        assert_eq!(vision.get_i64("depth"), Some(2));
        assert_eq!(vision.strategy, ResolutionStrategy::AutoDetect);
        assert_eq!(vision.slot.as_deref(), Some("vision_config"));
    }

    #[test]
    fn nested_failure_fails_the_whole_resolution() {
        let resolver = resolver(
            &["TinyVLForConditionalGeneration"],
            ExplicitConfigMapping::new()
                .with("TinyVLForConditionalGeneration", tiny_vl_class("TinyVLConfig")),
            StaticConfigSource::new(),
        );
        let mut checkpoint = tiny_vl_checkpoint("TinyVLForConditionalGeneration");
        checkpoint.fields["vision_config"]
            .as_object_mut()
            .unwrap()
            .remove("depth");

        let err = resolver.resolve(&checkpoint).unwrap_err();
        match err.reason {
            ResolutionFailure::InvalidConfig { violation, .. } => {
                assert_eq!(violation.path, "vision_config.depth");
                assert_eq!(violation.kind, ViolationKind::MissingField);
            }
            other => panic!("unexpected reason {other:?}"),
        }
    }

    #[test]
    fn missing_required_sub_config() {
        let resolver = resolver(
            &["TinyVLForConditionalGeneration"],
            ExplicitConfigMapping::new()
                .with("TinyVLForConditionalGeneration", tiny_vl_class("TinyVLConfig")),
            StaticConfigSource::new(),
        );
        let mut checkpoint = tiny_vl_checkpoint("TinyVLForConditionalGeneration");
        checkpoint.fields.remove("vision_config");
        let err = resolver.resolve(&checkpoint).unwrap_err();
        assert!(matches!(
            err.reason,
            ResolutionFailure::InvalidConfig { ref violation, .. }
                if violation.kind == ViolationKind::MissingNested
        ));
    }

    #[test]
    fn defaults_fill_absent_and_null_fields() {
        let class = ConfigClass::new("C")
            .field(FieldSpec::required("hidden_size", FieldType::Integer))
            .field(FieldSpec::optional("rope_theta", FieldType::Float).with_default(10000.0))
            .field(FieldSpec::optional("sliding_window", FieldType::Integer));
        let resolver = resolver(&["C"], ExplicitConfigMapping::new().with("C", class), StaticConfigSource::new());
        let checkpoint = CheckpointDescriptor::new(["C"])
            .with_field("hidden_size", 8)
            .with_field("sliding_window", Value::Null)
            .with_field("initializer_range", 0.02);
        let config = resolver.resolve(&checkpoint).unwrap();
        assert_eq!(config.get_f64("rope_theta"), Some(10000.0));
        assert!(config.get("sliding_window").is_none());
        assert_eq!(config.extra["initializer_range"], json!(0.02));
    }

    #[test]
    fn type_mismatch_names_the_field() {
        let class = ConfigClass::new("C").field(FieldSpec::required("hidden_size", FieldType::Integer));
        let resolver = resolver(&["C"], ExplicitConfigMapping::new().with("C", class), StaticConfigSource::new());
        let checkpoint = CheckpointDescriptor::new(["C"]).with_field("hidden_size", "big");
        let err = resolver.resolve(&checkpoint).unwrap_err();
        assert!(err.to_string().contains("hidden_size: expected integer, found string"), "{err}");
    }

    #[test]
    fn model_type_reaches_explicit_class() {
        let resolver = resolver(
            &["RenamedForCausalLM"],
            ExplicitConfigMapping::new().with(
                "TinyForCausalLM",
                tiny_text_class("TinyConfig").with_model_type("tiny"),
            ),
            StaticConfigSource::new(),
        );
        let checkpoint = tiny_text_checkpoint("RenamedForCausalLM").with_model_type("tiny");
        let config = resolver.resolve(&checkpoint).unwrap();
        assert_eq!(config.class_name, "TinyConfig");
        assert_eq!(config.architecture_id, "RenamedForCausalLM");
        assert_eq!(config.strategy, ResolutionStrategy::ModelTypeAlias);
    }

    #[test]
    fn source_class_beats_colliding_model_type() {
        let variant = ConfigClass::new("NewLlamaVariantConfig")
            .field(FieldSpec::required("hidden_size", FieldType::Integer));
        let checkpoint = CheckpointDescriptor::new(["NewLlamaVariantForCausalLM"])
            .with_model_type("llama")
            .with_field("hidden_size", 4096);

        let with_source = resolver(
            &["NewLlamaVariantForCausalLM"],
            ExplicitConfigMapping::builtin(),
            StaticConfigSource::new().with("NewLlamaVariantForCausalLM", variant),
        );
        let config = with_source.resolve(&checkpoint).unwrap();
        assert_eq!(config.strategy, ResolutionStrategy::AutoDetect);
        assert_eq!(config.class_name, "NewLlamaVariantConfig");

        // Without a source class the alias is the last resort, and LlamaConfig
        // wants more than this checkpoint has.
        let resolver = resolver(
            &["NewLlamaVariantForCausalLM"],
            ExplicitConfigMapping::builtin(),
            StaticConfigSource::new(),
        );
        let err = resolver.resolve(&checkpoint).unwrap_err();
        assert!(matches!(
            err.reason,
            ResolutionFailure::InvalidConfig { ref class, .. } if class == "LlamaConfig"
        ));
        assert_eq!(
            err.strategies(),
            vec![
                ResolutionStrategy::ExplicitMapping,
                ResolutionStrategy::AutoDetect,
                ResolutionStrategy::ModelTypeAlias,
            ]
        );
    }

    #[test]
    fn failing_source_still_reaches_alias() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("RenamedForCausalLM.json"), "{ not json").unwrap();
        let resolver = ConfigResolver::new(
            registry(&["RenamedForCausalLM"]),
            ExplicitConfigMapping::new().with(
                "TinyForCausalLM",
                tiny_text_class("TinyConfig").with_model_type("tiny"),
            ),
            Arc::new(crate::configs::SchemaDirSource::new(dir.path())),
            Arc::new(StaticFetcher::new()),
        );
        let checkpoint = tiny_text_checkpoint("RenamedForCausalLM").with_model_type("tiny");
        let config = resolver.resolve(&checkpoint).unwrap();
        assert_eq!(config.strategy, ResolutionStrategy::ModelTypeAlias);

        let selection = select_class(
            resolver.mapping(),
            &crate::configs::SchemaDirSource::new(dir.path()),
            "RenamedForCausalLM",
            None,
        );
        assert!(selection.chosen.is_none());
        assert!(selection.source_failure().is_some());
    }

    #[test]
    fn registered_model_type_wins_over_checkpoint() {
        let registry = ArchitectureRegistry::new();
        registry
            .register(
                ArchitectureEntry::new(
                    "RenamedForCausalLM",
                    LoaderReference::new("models::test", "RenamedForCausalLM"),
                )
                .with_model_type("tiny"),
            )
            .unwrap();
        registry.freeze();
        let resolver = ConfigResolver::new(
            Arc::new(registry),
            ExplicitConfigMapping::new()
                .with("TinyForCausalLM", tiny_text_class("TinyConfig").with_model_type("tiny"))
                .with("OtherForCausalLM", tiny_text_class("OtherConfig").with_model_type("other")),
            Arc::new(StaticConfigSource::new()),
            Arc::new(StaticFetcher::new()),
        );
        let checkpoint = tiny_text_checkpoint("RenamedForCausalLM").with_model_type("other");
        assert_eq!(resolver.resolve(&checkpoint).unwrap().class_name, "TinyConfig");
    }

    #[test]
    fn empty_architectures_is_missing_architecture() {
        let resolver = resolver(&[], ExplicitConfigMapping::new(), StaticConfigSource::new());
        let err = resolver.resolve(&CheckpointDescriptor::default()).unwrap_err();
        assert_eq!(err.reason, ResolutionFailure::MissingArchitecture);
    }

    #[test]
    fn flattened_nested_reads_parent_fields() {
        let text = ConfigClass::new("Text")
            .field(FieldSpec::required("hidden_size", FieldType::Integer));
        let class = ConfigClass::new("Combined")
            .field(FieldSpec::optional("image_token_id", FieldType::Integer))
            .nested(NestedSpec::flattened("text_config", text));
        let resolver = resolver(&["Combined"], ExplicitConfigMapping::new().with("Combined", class), StaticConfigSource::new());
        let checkpoint = CheckpointDescriptor::new(["Combined"])
            .with_field("hidden_size", 32)
            .with_field("image_token_id", 7);
        let config = resolver.resolve(&checkpoint).unwrap();
        assert_eq!(config.nested("text_config").unwrap().get_i64("hidden_size"), Some(32));
        assert!(config.extra.is_empty());

        let err = resolver
            .resolve(&CheckpointDescriptor::new(["Combined"]))
            .unwrap_err();
        assert!(matches!(
            err.reason,
            ResolutionFailure::InvalidConfig { ref violation, .. } if violation.path == "hidden_size"
        ));
    }

    #[test]
    fn builtin_qwen3_vl_moe_resolves_full_checkpoint() {
        let resolver = resolver(
            &["Qwen3VLMoeForConditionalGeneration"],
            ExplicitConfigMapping::builtin(),
            StaticConfigSource::new(),
        );
        let checkpoint = CheckpointDescriptor::from_json_str(QWEN3_VL_MOE_CONFIG).unwrap();
        let config = resolver.resolve(&checkpoint).unwrap();

        assert_eq!(config.class_name, "Qwen3VLMoeConfig");
        let text = config.nested("text_config").unwrap();
        assert_eq!(text.get_i64("num_experts"), Some(128));
        assert_eq!(text.get_f64("rope_theta"), Some(5_000_000.0));
        let vision = config.nested("vision_config").unwrap();
        assert_eq!(vision.get_i64("out_hidden_size"), Some(2048));
        assert_eq!(
            vision.get("deepstack_visual_indexes"),
            Some(&FieldValue::IntegerList(vec![8, 16, 24]))
        );
        // Keys no class declares survive untyped.
        assert_eq!(text.extra["router_aux_loss_coef"], json!(0.001));
    }

    #[tokio::test]
    async fn resolve_model_reports_unregistered_architecture() {
        let fetcher = StaticFetcher::new().with("org/unknown", tiny_text_checkpoint("UnknownForCausalLM"));
        let resolver = ConfigResolver::new(
            registry(&["TinyForCausalLM"]),
            ExplicitConfigMapping::new(),
            Arc::new(StaticConfigSource::new()),
            Arc::new(fetcher),
        );
        let err = resolver.resolve_model("org/unknown").await.unwrap_err();
        assert!(matches!(
            err,
            ModelLoadError::Unregistered(RegistryError::UnregisteredArchitecture(_))
        ));
    }

    #[tokio::test]
    async fn resolve_model_reports_missing_architecture() {
        let fetcher = StaticFetcher::new().with(
            "org/anonymous",
            CheckpointDescriptor::default().with_model_type("llama"),
        );
        let resolver = ConfigResolver::new(
            registry(&["LlamaForCausalLM"]),
            ExplicitConfigMapping::builtin(),
            Arc::new(StaticConfigSource::new()),
            Arc::new(fetcher),
        );
        let err = resolver.resolve_model("org/anonymous").await.unwrap_err();
        match err {
            ModelLoadError::Resolution(e) => {
                assert_eq!(e.reason, ResolutionFailure::MissingArchitecture);
                assert_eq!(e.architecture_id, "llama");
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[tokio::test]
    async fn resolve_model_reports_fetch_failure() {
        let resolver = resolver(&[], ExplicitConfigMapping::new(), StaticConfigSource::new());
        let err = resolver.resolve_model("org/missing").await.unwrap_err();
        assert!(matches!(err, ModelLoadError::Fetch(FetchError::NotFound(_))));
    }

    #[tokio::test]
    async fn concurrent_requests_share_one_fetch() {
        let fetcher = Arc::new(
            StaticFetcher::new()
                .with("org/tiny", tiny_text_checkpoint("TinyForCausalLM"))
                .with_delay(std::time::Duration::from_millis(25)),
        );
        let resolver = ConfigResolver::new(
            registry(&["TinyForCausalLM"]),
            ExplicitConfigMapping::new().with("TinyForCausalLM", tiny_text_class("TinyConfig")),
            Arc::new(StaticConfigSource::new()),
            Arc::clone(&fetcher) as Arc<dyn DescriptorFetcher>,
        );

        let results =
            futures::future::join_all((0..8).map(|_| resolver.resolve_model("org/tiny"))).await;
        assert_eq!(fetcher.fetch_count(), 1);
        let first = results[0].as_ref().unwrap();
        for result in &results {
            let resolved = result.as_ref().unwrap();
            assert!(Arc::ptr_eq(&resolved.config, &first.config));
        }

        resolver.resolve_model("org/tiny").await.unwrap();
        assert_eq!(fetcher.fetch_count(), 2);
    }
}
