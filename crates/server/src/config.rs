//! Configuration persistence for archreg-server.
//!
//! Configuration is loaded with the following priority:
//! 1. CLI arguments (highest priority)
//! 2. Config file (~/.config/archreg-server/config.toml)
//! 3. Default values (lowest priority)

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Persistent configuration stored in TOML format.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Model identifier (HuggingFace Hub format or local directory).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Draft model for speculative decoding.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub draft_model: Option<String>,

    /// Number of speculative tokens per step.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_speculative_tokens: Option<usize>,

    /// Model name reported to clients. Defaults to the model identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub served_model_name: Option<String>,

    /// Data type for model weights (auto, bf16, fp16, fp32).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dtype: Option<String>,

    /// Maximum model context length.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_model_len: Option<usize>,

    /// Fraction of GPU memory to use (0.0-1.0).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpu_memory_utilization: Option<f32>,

    /// Tensor parallel size.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tensor_parallel_size: Option<usize>,

    /// HuggingFace model revision.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,

    /// Extra architecture declaration table (TOML).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry: Option<PathBuf>,

    /// Directory of `<ArchitectureId>.json` configuration schemas.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_schema_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
}

impl ServerConfig {
    /// Get the default config file path.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("archreg-server").join("config.toml"))
    }

    /// Load configuration from the default path.
    pub fn load() -> Self {
        Self::default_path()
            .and_then(|path| Self::load_from(&path).ok())
            .unwrap_or_default()
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
        toml::from_str(&content).map_err(ConfigError::Parse)
    }

    /// Save configuration to the default path.
    pub fn save(&self) -> Result<PathBuf, ConfigError> {
        let path = Self::default_path().ok_or(ConfigError::NoConfigDir)?;
        self.save_to(&path)?;
        Ok(path)
    }

    /// Save configuration to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(ConfigError::Io)?;
        }

        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        fs::write(path, content).map_err(ConfigError::Io)?;
        Ok(())
    }

    /// Merge with another config, preferring values from `other`.
    pub fn merge(&mut self, other: &ServerConfig) {
        if other.model.is_some() {
            self.model = other.model.clone();
        }
        if other.draft_model.is_some() {
            self.draft_model = other.draft_model.clone();
        }
        if other.num_speculative_tokens.is_some() {
            self.num_speculative_tokens = other.num_speculative_tokens;
        }
        if other.served_model_name.is_some() {
            self.served_model_name = other.served_model_name.clone();
        }
        if other.dtype.is_some() {
            self.dtype = other.dtype.clone();
        }
        if other.max_model_len.is_some() {
            self.max_model_len = other.max_model_len;
        }
        if other.gpu_memory_utilization.is_some() {
            self.gpu_memory_utilization = other.gpu_memory_utilization;
        }
        if other.tensor_parallel_size.is_some() {
            self.tensor_parallel_size = other.tensor_parallel_size;
        }
        if other.revision.is_some() {
            self.revision = other.revision.clone();
        }
        if other.registry.is_some() {
            self.registry = other.registry.clone();
        }
        if other.config_schema_dir.is_some() {
            self.config_schema_dir = other.config_schema_dir.clone();
        }
        if other.log_level.is_some() {
            self.log_level = other.log_level.clone();
        }
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading/writing config file.
    Io(std::io::Error),
    /// Error parsing TOML.
    Parse(toml::de::Error),
    /// Error serializing to TOML.
    Serialize(toml::ser::Error),
    /// No config directory available.
    NoConfigDir,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Serialize(e) => write!(f, "Serialize error: {}", e),
            ConfigError::NoConfigDir => write!(f, "No config directory available"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let config = ServerConfig {
            model: Some("Qwen/Qwen3-0.6B".to_string()),
            registry: Some(PathBuf::from("/etc/archreg/extra.toml")),
            max_model_len: Some(4096),
            ..Default::default()
        };

        config.save_to(&path).unwrap();
        let loaded = ServerConfig::load_from(&path).unwrap();

        assert_eq!(loaded, config);
    }

    #[test]
    fn test_save_creates_parent_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("deeper").join("config.toml");

        ServerConfig::default().save_to(&path).unwrap();
        assert!(path.exists());
        assert_eq!(ServerConfig::load_from(&path).unwrap(), ServerConfig::default());
    }

    #[test]
    fn test_merge() {
        let mut base = ServerConfig {
            model: Some("base-model".to_string()),
            dtype: Some("bf16".to_string()),
            ..Default::default()
        };

        let override_config = ServerConfig {
            dtype: Some("fp16".to_string()),
            config_schema_dir: Some(PathBuf::from("schemas")),
            ..Default::default()
        };

        base.merge(&override_config);

        assert_eq!(base.model, Some("base-model".to_string())); // Unchanged
        assert_eq!(base.dtype, Some("fp16".to_string())); // Overridden
        assert_eq!(base.config_schema_dir, Some(PathBuf::from("schemas"))); // Added
    }

    #[test]
    fn test_parse_error_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "max_model_len = \"lots\"").unwrap();

        let err = ServerConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().starts_with("Parse error"));
    }
}
