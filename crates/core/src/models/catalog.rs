//! Catalog of model implementations that loader references point into.
//!
//! Registration only stores a [`LoaderReference`]; nothing is looked up
//! until the startup verifier (or a model load) asks the catalog to locate
//! it. The catalog is the seam to the model-loading subsystem.

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

use super::registry::LoaderReference;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocateError {
    #[error("module {0} not found")]
    ModuleNotFound(String),
    #[error("module {module} has no class {class}")]
    ClassNotFound { module: String, class: String },
}

/// Entry point shape of an implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImplementationKind {
    CausalLm,
    ConditionalGeneration,
    Encoder,
    EncoderDecoder,
    DraftHead,
}

impl ImplementationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ImplementationKind::CausalLm => "causal-lm",
            ImplementationKind::ConditionalGeneration => "conditional-generation",
            ImplementationKind::Encoder => "encoder",
            ImplementationKind::EncoderDecoder => "encoder-decoder",
            ImplementationKind::DraftHead => "draft-head",
        }
    }
}

impl fmt::Display for ImplementationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A located implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImplementationHandle {
    pub reference: LoaderReference,
    pub kind: ImplementationKind,
}

pub trait ImplementationCatalog: Send + Sync {
    fn locate(&self, reference: &LoaderReference) -> Result<ImplementationHandle, LocateError>;
}

/// Catalog backed by an in-memory table.
#[derive(Debug, Default, Clone)]
pub struct StaticCatalog {
    modules: HashMap<String, HashMap<String, ImplementationKind>>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Implementations compiled into the engine.
    pub fn builtin() -> Self {
        use ImplementationKind::*;
        [
            ("models::llama", "LlamaForCausalLM", CausalLm),
            ("models::mistral", "MistralForCausalLM", CausalLm),
            ("models::qwen3", "Qwen3ForCausalLM", CausalLm),
            ("models::eagle_llama", "EagleLlamaForCausalLM", DraftHead),
            ("models::eagle3", "Eagle3LlamaForCausalLM", DraftHead),
            ("models::qwen3_next", "Qwen3NextForCausalLM", CausalLm),
            ("models::qwen2_vl", "Qwen2VLForConditionalGeneration", ConditionalGeneration),
            ("models::qwen3_vl", "Qwen3VLForConditionalGeneration", ConditionalGeneration),
            ("models::qwen3_vl_moe", "Qwen3VLMoeForConditionalGeneration", ConditionalGeneration),
            (
                "models::omega17_vl_exp",
                "Omega17VLExpForConditionalGeneration",
                ConditionalGeneration,
            ),
            ("models::bert", "BertModel", Encoder),
            ("models::whisper", "WhisperForConditionalGeneration", EncoderDecoder),
        ]
        .into_iter()
        .fold(Self::new(), |catalog, (module, class, kind)| {
            catalog.with(module, class, kind)
        })
    }

    pub fn with(mut self, module: &str, class: &str, kind: ImplementationKind) -> Self {
        self.insert(module, class, kind);
        self
    }

    pub fn insert(&mut self, module: &str, class: &str, kind: ImplementationKind) {
        self.modules
            .entry(module.to_string())
            .or_default()
            .insert(class.to_string(), kind);
    }
}

impl ImplementationCatalog for StaticCatalog {
    fn locate(&self, reference: &LoaderReference) -> Result<ImplementationHandle, LocateError> {
        let classes = self
            .modules
            .get(&reference.module)
            .ok_or_else(|| LocateError::ModuleNotFound(reference.module.clone()))?;
        let kind = classes
            .get(&reference.class)
            .copied()
            .ok_or_else(|| LocateError::ClassNotFound {
                module: reference.module.clone(),
                class: reference.class.clone(),
            })?;
        Ok(ImplementationHandle {
            reference: reference.clone(),
            kind,
        })
    }
}
