//! Architecture declaration tables.
//!
//! Architectures are declared as data: the built-in table below, plus any
//! number of TOML tables loaded at startup. Each row turns into one
//! [`ArchitectureEntry`] at bootstrap.
//!
//! ```toml
//! [[architecture]]
//! id = "Omega17VLExpForConditionalGeneration"
//! modalities = ["text", "vision-language", "video"]
//! loader = "models::omega17_vl_exp::Omega17VLExpForConditionalGeneration"
//! model_type = "omega17_vl_exp"
//!
//! [[architecture]]
//! id = "Eagle3LlamaForCausalLM"
//! modalities = ["text"]
//! loader = "models::eagle3::Eagle3LlamaForCausalLM"
//!
//! [architecture.speculative]
//! role = "draft-capable"
//!
//! [architecture.speculative.hidden_state]
//! native_width = 12288
//! native_norm = "none"
//! steps = [{ op = "chunk_mean", chunks = 3 }, { op = "rms_norm" }]
//! shared = { width = 4096, norm = "rms_norm" }
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use super::registry::{ArchitectureEntry, ArchitectureRegistry, LoaderReference, RegistryError};
use crate::multimodal::ModalityTag;
use crate::spec_decode::{
    HiddenStateAdapter, HiddenStateStep, NormConvention, SharedLayout, SpeculativeDeclaration,
    SpeculativeRole,
};

#[derive(Debug, Error)]
pub enum DeclarationError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid declaration table: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("architecture {0} declares no modalities")]
    NoModalities(String),
}

fn default_modalities() -> Vec<ModalityTag> {
    vec![ModalityTag::Text]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchitectureDeclaration {
    pub id: String,
    #[serde(default = "default_modalities")]
    pub modalities: Vec<ModalityTag>,
    pub loader: LoaderReference,
    /// Checkpoint `model_type` that reaches a configuration class by alias
    /// when no class is mapped to `id`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speculative: Option<SpeculativeDeclaration>,
}

impl ArchitectureDeclaration {
    pub fn into_entry(self) -> Result<ArchitectureEntry, DeclarationError> {
        if self.modalities.is_empty() {
            return Err(DeclarationError::NoModalities(self.id));
        }
        let mut entry = ArchitectureEntry::new(self.id, self.loader).with_modalities(self.modalities);
        entry.model_type = self.model_type;
        entry.speculative = self.speculative;
        Ok(entry)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeclarationTable {
    #[serde(default, rename = "architecture")]
    pub architectures: Vec<ArchitectureDeclaration>,
}

impl DeclarationTable {
    pub fn from_toml_str(s: &str) -> Result<Self, DeclarationError> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: &Path) -> Result<Self, DeclarationError> {
        let content = std::fs::read_to_string(path).map_err(|source| DeclarationError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn builtin() -> Self {
        Self {
            architectures: builtin_declarations(),
        }
    }

    pub fn extend(&mut self, other: DeclarationTable) {
        self.architectures.extend(other.architectures);
    }
}

/// Register every declaration, in order. Stops at the first failure.
pub fn register_all(
    registry: &ArchitectureRegistry,
    declarations: impl IntoIterator<Item = ArchitectureDeclaration>,
) -> Result<usize, RegisterDeclarationsError> {
    let mut count = 0;
    for declaration in declarations {
        registry.register(declaration.into_entry()?)?;
        count += 1;
    }
    info!(architectures = count, "registered architecture declarations");
    Ok(count)
}

#[derive(Debug, Error)]
pub enum RegisterDeclarationsError {
    #[error(transparent)]
    Declaration(#[from] DeclarationError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

fn decl(id: &str, module: &str, modalities: &[ModalityTag]) -> ArchitectureDeclaration {
    ArchitectureDeclaration {
        id: id.to_string(),
        modalities: modalities.to_vec(),
        loader: LoaderReference::new(module, id),
        model_type: None,
        speculative: None,
    }
}

fn model_type(mut declaration: ArchitectureDeclaration, model_type: &str) -> ArchitectureDeclaration {
    declaration.model_type = Some(model_type.to_string());
    declaration
}

fn speculative(
    mut declaration: ArchitectureDeclaration,
    role: SpeculativeRole,
    hidden_state: HiddenStateAdapter,
) -> ArchitectureDeclaration {
    declaration.speculative = Some(SpeculativeDeclaration::new(role, hidden_state));
    declaration
}

/// Architectures compiled into the engine.
pub fn builtin_declarations() -> Vec<ArchitectureDeclaration> {
    use ModalityTag::*;
    let post_norm_4096 = HiddenStateAdapter::identity(4096, NormConvention::RmsNorm);
    vec![
        speculative(
            decl("LlamaForCausalLM", "models::llama", &[Text]),
            SpeculativeRole::Both,
            post_norm_4096.clone(),
        ),
        decl("MistralForCausalLM", "models::mistral", &[Text]),
        // Width of Qwen3-0.6B, the usual Qwen3 draft.
        speculative(
            decl("Qwen3ForCausalLM", "models::qwen3", &[Text]),
            SpeculativeRole::Both,
            HiddenStateAdapter::identity(1024, NormConvention::RmsNorm),
        ),
        decl("Qwen3NextForCausalLM", "models::qwen3_next", &[Text]),
        speculative(
            decl("EagleLlamaForCausalLM", "models::eagle_llama", &[Text]),
            SpeculativeRole::DraftCapable,
            post_norm_4096,
        ),
        // Eagle-3 reads three concatenated target layers.
        speculative(
            decl("Eagle3LlamaForCausalLM", "models::eagle3", &[Text]),
            SpeculativeRole::DraftCapable,
            HiddenStateAdapter::with_steps(
                3 * 4096,
                NormConvention::None,
                vec![
                    HiddenStateStep::ChunkMean { chunks: 3 },
                    HiddenStateStep::RmsNorm { eps: 1e-6 },
                ],
                SharedLayout {
                    width: 4096,
                    norm: NormConvention::RmsNorm,
                },
            ),
        ),
        decl(
            "Qwen2VLForConditionalGeneration",
            "models::qwen2_vl",
            &[Text, VisionLanguage, Video],
        ),
        decl(
            "Qwen3VLForConditionalGeneration",
            "models::qwen3_vl",
            &[Text, VisionLanguage, Video],
        ),
        speculative(
            decl(
                "Qwen3VLMoeForConditionalGeneration",
                "models::qwen3_vl_moe",
                &[Text, VisionLanguage, Video],
            ),
            SpeculativeRole::VerifyCapable,
            HiddenStateAdapter::identity(2048, NormConvention::RmsNorm),
        ),
        // No class is mapped to this id; its checkpoints resolve through
        // the model_type alias on Qwen3VLMoeConfig.
        speculative(
            model_type(
                decl(
                    "Omega17VLExpForConditionalGeneration",
                    "models::omega17_vl_exp",
                    &[Text, VisionLanguage, Video],
                ),
                "omega17_vl_exp",
            ),
            SpeculativeRole::VerifyCapable,
            HiddenStateAdapter::identity(2048, NormConvention::RmsNorm),
        ),
        decl("BertModel", "models::bert", &[Embedding]),
        decl("WhisperForConditionalGeneration", "models::whisper", &[Audio]),
    ]
}
