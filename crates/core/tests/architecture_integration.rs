//! Integration tests for bootstrap, config resolution and speculative pairing.
//!
//! Everything runs in memory or against temp directories; no network.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use archreg_core::{
    config::CheckpointDescriptor,
    configs::{
        ConfigClass, ExplicitConfigMapping, FieldSpec, FieldType, NestedSpec, ResolutionStrategy,
        SchemaDirSource, StaticConfigSource,
    },
    loader::{DescriptorFetcher, FetchError},
    models::{
        ArchitectureDeclaration, ArchitectureRegistry, DeclarationTable, ImplementationKind,
        LoaderReference, StaticCatalog,
    },
    multimodal::{ModalityTag, MultimodalSubsystem},
    spec_decode::{SpeculativeDecodeMismatchError, SpeculativeUse},
    verify::BuildTimeVerifier,
    ArchitectureRuntime, RuntimeBuilder,
};
use async_trait::async_trait;
use serde_json::json;

// ─── Fixtures ────────────────────────────────────────────────────────────────

struct CountingFetcher {
    descriptors: HashMap<String, CheckpointDescriptor>,
    fetches: AtomicUsize,
}

impl CountingFetcher {
    fn new(descriptors: impl IntoIterator<Item = (&'static str, CheckpointDescriptor)>) -> Self {
        Self {
            descriptors: descriptors
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
            fetches: AtomicUsize::new(0),
        }
    }

    fn count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DescriptorFetcher for CountingFetcher {
    async fn fetch(&self, locator: &str) -> Result<CheckpointDescriptor, FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.descriptors
            .get(locator)
            .cloned()
            .ok_or_else(|| FetchError::NotFound(locator.to_string()))
    }
}

fn text_class(name: &str) -> ConfigClass {
    ConfigClass::new(name)
        .field(FieldSpec::required("hidden_size", FieldType::Integer))
        .field(FieldSpec::required("num_hidden_layers", FieldType::Integer))
        .field(FieldSpec::optional("rms_norm_eps", FieldType::Float).with_default(1e-6))
}

fn vision_language_class(name: &str) -> ConfigClass {
    let vision = ConfigClass::new(format!("{name}Vision"))
        .field(FieldSpec::required("depth", FieldType::Integer))
        .field(FieldSpec::required("patch_size", FieldType::Integer));
    text_class(name).nested(NestedSpec::subtree("vision_config", vision))
}

fn checkpoint_a() -> CheckpointDescriptor {
    CheckpointDescriptor::new(["AForCausalLM"])
        .with_field("hidden_size", 64)
        .with_field("num_hidden_layers", 2)
}

fn checkpoint_b() -> CheckpointDescriptor {
    CheckpointDescriptor::new(["BForConditionalGeneration"])
        .with_model_type("b_vl")
        .with_field("hidden_size", 64)
        .with_field("num_hidden_layers", 2)
        .with_field("vision_config", json!({"depth": 4, "patch_size": 14}))
}

const DECLARATIONS: &str = r#"
[[architecture]]
id = "AForCausalLM"
modalities = ["text"]
loader = "plugins::a::AForCausalLM"

[architecture.speculative]
role = "none"

[architecture.speculative.hidden_state]
native_width = 64
native_norm = "rms_norm"
shared = { width = 64, norm = "rms_norm" }

[[architecture]]
id = "BForConditionalGeneration"
modalities = ["vision-language"]
loader = "plugins::b::BForConditionalGeneration"

[architecture.speculative]
role = "verify-capable"

[architecture.speculative.hidden_state]
native_width = 64
native_norm = "rms_norm"
shared = { width = 64, norm = "rms_norm" }
"#;

fn plugin_catalog() -> StaticCatalog {
    StaticCatalog::new()
        .with("plugins::a", "AForCausalLM", ImplementationKind::CausalLm)
        .with(
            "plugins::b",
            "BForConditionalGeneration",
            ImplementationKind::ConditionalGeneration,
        )
}

fn plugin_runtime(fetcher: Arc<CountingFetcher>) -> ArchitectureRuntime {
    RuntimeBuilder::empty()
        .declarations(DeclarationTable::from_toml_str(DECLARATIONS).unwrap())
        .mapping(ExplicitConfigMapping::new().with("AForCausalLM", text_class("AConfig")))
        .source(Arc::new(
            StaticConfigSource::new()
                .with("BForConditionalGeneration", vision_language_class("BConfig")),
        ))
        .catalog(Arc::new(plugin_catalog()))
        .fetcher(fetcher)
        .bootstrap()
        .expect("bootstrap should verify")
}

// ─── End-to-end ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn end_to_end_explicit_and_auto_detected_architectures() {
    let fetcher = Arc::new(CountingFetcher::new([
        ("org/a", checkpoint_a()),
        ("org/b", checkpoint_b()),
    ]));
    let runtime = plugin_runtime(Arc::clone(&fetcher));
    assert!(runtime.registry().is_frozen());
    assert_eq!(runtime.verification_report().checked, 2);

    let a = runtime.prepare_model("org/a").await.unwrap();
    assert_eq!(a.resolved.config.strategy, ResolutionStrategy::ExplicitMapping);
    assert!(a.resolved.config.nested_configs.is_empty());
    assert!(a.subsystems.is_empty());

    let b = runtime.prepare_model("org/b").await.unwrap();
    assert_eq!(b.architecture_id(), "BForConditionalGeneration");
    assert_eq!(b.resolved.config.strategy, ResolutionStrategy::AutoDetect);
    assert_eq!(b.resolved.config.nested_configs.len(), 1);
    let vision = b.resolved.config.nested("vision_config").unwrap();
    assert_eq!(vision.get_i64("depth"), Some(4));
    assert!(b.resolved.entry.modality_tags.contains(&ModalityTag::VisionLanguage));
    assert!(b.subsystems.contains(&MultimodalSubsystem::ImageProcessor));

    let err = runtime
        .speculative_pairing("BForConditionalGeneration", "AForCausalLM")
        .unwrap_err();
    assert_eq!(
        err,
        SpeculativeDecodeMismatchError::RoleExcluded {
            architecture_id: "AForCausalLM".to_string(),
            requested: SpeculativeUse::Draft,
            role: archreg_core::spec_decode::SpeculativeRole::None,
        }
    );
}

#[tokio::test]
async fn prepare_speculative_rejects_role_none_draft() {
    let fetcher = Arc::new(CountingFetcher::new([
        ("org/a", checkpoint_a()),
        ("org/b", checkpoint_b()),
    ]));
    let runtime = plugin_runtime(fetcher);
    let err = runtime.prepare_speculative("org/b", "org/a").await.unwrap_err();
    assert!(err.to_string().contains("AForCausalLM cannot be used as draft"), "{err}");
}

// ─── Verification ────────────────────────────────────────────────────────────

#[test]
fn one_broken_loader_among_four_reports_exactly_one_failure() {
    let registry = ArchitectureRegistry::new();
    let ids = ["W", "X", "Y", "Z"];
    for id in ids {
        let module = if id == "Y" { "plugins::gone" } else { "plugins::ok" };
        let declaration = ArchitectureDeclaration {
            id: id.to_string(),
            modalities: vec![ModalityTag::Text],
            loader: LoaderReference::new(module, id),
            model_type: None,
            speculative: None,
        };
        registry.register(declaration.into_entry().unwrap()).unwrap();
    }
    registry.freeze();

    let catalog = ids.iter().fold(StaticCatalog::new(), |c, id| {
        c.with("plugins::ok", id, ImplementationKind::CausalLm)
    });
    let mapping = ids.iter().fold(ExplicitConfigMapping::new(), |m, id| {
        m.with(*id, text_class(&format!("{id}Config")))
    });
    let source = StaticConfigSource::new();
    let verifier = BuildTimeVerifier::new(&catalog, &mapping, &source);

    let failures = verifier.verify(&registry).unwrap_err();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].architecture_id, "Y");
    assert!(failures[0].to_string().contains("plugins::gone::Y"));

    for entry in registry.entries() {
        let own = verifier.verify_entry(&entry);
        assert_eq!(own.is_empty(), entry.architecture_id != "Y");
    }
}

// ─── Resolution order ────────────────────────────────────────────────────────

#[tokio::test]
async fn removing_explicit_mapping_falls_back_to_auto_detect() {
    let build = |mapping: ExplicitConfigMapping| {
        let fetcher = Arc::new(CountingFetcher::new([("org/a", checkpoint_a())]));
        RuntimeBuilder::empty()
            .declarations(DeclarationTable::from_toml_str(DECLARATIONS).unwrap())
            .mapping(mapping)
            .source(Arc::new(
                StaticConfigSource::new()
                    .with("AForCausalLM", text_class("ADetected"))
                    .with("BForConditionalGeneration", vision_language_class("BConfig")),
            ))
            .catalog(Arc::new(plugin_catalog()))
            .fetcher(fetcher)
            .bootstrap()
            .unwrap()
    };

    let mut mapping = ExplicitConfigMapping::new().with("AForCausalLM", text_class("AConfig"));
    let with_explicit = build(mapping.clone()).prepare_model("org/a").await.unwrap();
    assert_eq!(with_explicit.resolved.config.class_name, "AConfig");

    mapping.remove("AForCausalLM");
    let without = build(mapping).prepare_model("org/a").await.unwrap();
    assert_eq!(without.resolved.config.class_name, "ADetected");
    assert_eq!(without.resolved.config.strategy, ResolutionStrategy::AutoDetect);
}

#[tokio::test]
async fn nested_failure_leaves_no_partial_descriptor() {
    let mut broken = checkpoint_b();
    broken
        .fields
        .insert("vision_config".to_string(), json!({"depth": 4}));
    let fetcher = Arc::new(CountingFetcher::new([("org/b", broken)]));
    let runtime = plugin_runtime(fetcher);

    let err = runtime.prepare_model("org/b").await.unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("BForConditionalGeneration"), "{msg}");
    assert!(msg.contains("vision_config.patch_size"), "{msg}");
}

// ─── Coalescing ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn concurrent_resolutions_share_one_fetch() {
    let fetcher = Arc::new(CountingFetcher::new([
        ("org/a", checkpoint_a()),
        ("org/b", checkpoint_b()),
    ]));
    let runtime = Arc::new(plugin_runtime(Arc::clone(&fetcher)));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let runtime = Arc::clone(&runtime);
            tokio::spawn(async move { runtime.prepare_model("org/b").await })
        })
        .collect();
    let mut configs = Vec::new();
    for handle in handles {
        configs.push(handle.await.unwrap().unwrap().resolved.config);
    }
    assert_eq!(fetcher.count(), 1);
    assert!(configs.windows(2).all(|w| w[0] == w[1]));

    // A finished resolution is not reused; the next call fetches again.
    runtime.prepare_model("org/b").await.unwrap();
    assert_eq!(fetcher.count(), 2);

    // Different locators do not share a fetch.
    let (a, b) = tokio::join!(runtime.prepare_model("org/a"), runtime.prepare_model("org/b"));
    assert!(a.is_ok() && b.is_ok());
    assert_eq!(fetcher.count(), 4);
}

#[tokio::test]
async fn coalesced_failures_reach_every_caller() {
    let fetcher = Arc::new(CountingFetcher::new([]));
    let runtime = Arc::new(plugin_runtime(Arc::clone(&fetcher)));
    let results = futures::future::join_all(
        (0..4).map(|_| runtime.prepare_model("org/missing")),
    )
    .await;
    assert!(results.iter().all(Result::is_err));
    assert_eq!(fetcher.count(), 1);
}

// ─── Schema directory source ────────────────────────────────────────────────

#[tokio::test]
async fn schema_directory_publishes_new_architecture() {
    let dir = tempfile::tempdir().unwrap();
    let class = vision_language_class("BConfig");
    std::fs::write(
        dir.path().join("BForConditionalGeneration.json"),
        serde_json::to_string_pretty(&class).unwrap(),
    )
    .unwrap();

    let fetcher = Arc::new(CountingFetcher::new([("org/b", checkpoint_b())]));
    let runtime = RuntimeBuilder::empty()
        .declarations(DeclarationTable::from_toml_str(DECLARATIONS).unwrap())
        .mapping(ExplicitConfigMapping::new().with("AForCausalLM", text_class("AConfig")))
        .source(Arc::new(SchemaDirSource::new(dir.path())))
        .catalog(Arc::new(plugin_catalog()))
        .fetcher(fetcher)
        .bootstrap()
        .unwrap();

    let b = runtime.prepare_model("org/b").await.unwrap();
    assert_eq!(b.resolved.config.class_name, "BConfig");
    assert_eq!(b.resolved.config.strategy, ResolutionStrategy::AutoDetect);
}

#[test]
fn bootstrap_without_schema_file_lists_the_architecture() {
    let dir = tempfile::tempdir().unwrap();
    let err = RuntimeBuilder::empty()
        .declarations(DeclarationTable::from_toml_str(DECLARATIONS).unwrap())
        .mapping(ExplicitConfigMapping::new().with("AForCausalLM", text_class("AConfig")))
        .source(Arc::new(SchemaDirSource::new(dir.path())))
        .catalog(Arc::new(plugin_catalog()))
        .bootstrap()
        .unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("BForConditionalGeneration"), "{msg}");
    assert!(msg.contains("1 passed, 1 failed"), "{msg}");
}

// ─── Model-type aliases ─────────────────────────────────────────────────────

#[tokio::test]
async fn new_architecture_reusing_builtin_model_type_keeps_its_source_class() {
    let extra = DeclarationTable::from_toml_str(
        r#"
        [[architecture]]
        id = "NewLlamaVariantForCausalLM"
        loader = "models::llama::LlamaForCausalLM"
        "#,
    )
    .unwrap();
    let variant = ConfigClass::new("NewLlamaVariantConfig")
        .field(FieldSpec::required("hidden_size", FieldType::Integer));
    let checkpoint = CheckpointDescriptor::new(["NewLlamaVariantForCausalLM"])
        .with_model_type("llama")
        .with_field("hidden_size", 4096);
    let fetcher = Arc::new(CountingFetcher::new([("org/new-llama", checkpoint)]));

    let runtime = ArchitectureRuntime::builder()
        .declarations(extra)
        .source(Arc::new(
            StaticConfigSource::new().with("NewLlamaVariantForCausalLM", variant),
        ))
        .fetcher(fetcher)
        .bootstrap()
        .unwrap();
    assert!(runtime.verification_report().is_ok());

    let prepared = runtime.prepare_model("org/new-llama").await.unwrap();
    assert_eq!(prepared.architecture_id(), "NewLlamaVariantForCausalLM");
    assert_eq!(prepared.resolved.config.class_name, "NewLlamaVariantConfig");
    assert_eq!(prepared.resolved.config.strategy, ResolutionStrategy::AutoDetect);
}

#[tokio::test]
async fn null_architectures_is_a_missing_architecture() {
    let checkpoint: CheckpointDescriptor =
        serde_json::from_value(json!({"architectures": null, "model_type": "llama", "hidden_size": 8}))
            .unwrap();
    let fetcher = Arc::new(CountingFetcher::new([("org/anonymous", checkpoint)]));
    let runtime = ArchitectureRuntime::builder().fetcher(fetcher).bootstrap().unwrap();

    let err = runtime.prepare_model("org/anonymous").await.unwrap_err();
    assert!(
        err.to_string().contains("checkpoint declares no architecture"),
        "{err}"
    );
}
