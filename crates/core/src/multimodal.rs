//! Modality tags and the engine subsystems they switch on.
//!
//! An architecture declares which input modalities it consumes. The engine
//! uses that declaration to decide which preprocessing subsystems to start
//! for a model; a text-only model never pays for an image processor.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Input modality an architecture consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModalityTag {
    /// Plain token input.
    Text,
    /// Interleaved text and image input (LLaVA, Qwen-VL style).
    VisionLanguage,
    /// Audio input (Whisper-style encoders).
    Audio,
    /// Video frames, processed as image sequences.
    Video,
    /// Pooling models producing embeddings instead of tokens.
    Embedding,
}

impl ModalityTag {
    pub const ALL: [ModalityTag; 5] = [
        ModalityTag::Text,
        ModalityTag::VisionLanguage,
        ModalityTag::Audio,
        ModalityTag::Video,
        ModalityTag::Embedding,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ModalityTag::Text => "text",
            ModalityTag::VisionLanguage => "vision-language",
            ModalityTag::Audio => "audio",
            ModalityTag::Video => "video",
            ModalityTag::Embedding => "embedding",
        }
    }
}

impl fmt::Display for ModalityTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModalityTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "text" => Ok(ModalityTag::Text),
            "vision-language" | "vl" | "vision" => Ok(ModalityTag::VisionLanguage),
            "audio" => Ok(ModalityTag::Audio),
            "video" => Ok(ModalityTag::Video),
            "embedding" | "pooling" => Ok(ModalityTag::Embedding),
            other => Err(format!("unknown modality tag: {other}")),
        }
    }
}

/// Engine subsystem that is started on demand for multimodal models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MultimodalSubsystem {
    ImageProcessor,
    VideoProcessor,
    AudioProcessor,
    PoolingHead,
}

/// Subsystems the engine must activate for a model with the given tags.
///
/// Video reuses the image processor for per-frame encoding, so it activates
/// both.
pub fn required_subsystems(tags: &BTreeSet<ModalityTag>) -> BTreeSet<MultimodalSubsystem> {
    let mut out = BTreeSet::new();
    for tag in tags {
        match tag {
            ModalityTag::Text => {}
            ModalityTag::VisionLanguage => {
                out.insert(MultimodalSubsystem::ImageProcessor);
            }
            ModalityTag::Video => {
                out.insert(MultimodalSubsystem::ImageProcessor);
                out.insert(MultimodalSubsystem::VideoProcessor);
            }
            ModalityTag::Audio => {
                out.insert(MultimodalSubsystem::AudioProcessor);
            }
            ModalityTag::Embedding => {
                out.insert(MultimodalSubsystem::PoolingHead);
            }
        }
    }
    out
}
