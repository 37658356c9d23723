//! External configuration sources: the auto-detect tier of the resolver.
//!
//! A source publishes configuration classes it knows about, keyed by
//! architecture id. It is consulted only when the explicit mapping has no
//! class for an architecture.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tracing::debug;

use super::schema::ConfigClass;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    #[error("failed to read {path}: {message}")]
    Io { path: PathBuf, message: String },
    #[error("invalid configuration schema in {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

pub trait ConfigSource: Send + Sync {
    /// Short name used in logs and error messages.
    fn name(&self) -> &str;

    /// Class published for `architecture_id`. `Ok(None)` means the source
    /// simply does not know the architecture; `Err` means it claims to but
    /// the class cannot be produced.
    fn lookup(&self, architecture_id: &str) -> Result<Option<Arc<ConfigClass>>, SourceError>;
}

/// In-memory source.
#[derive(Debug, Default)]
pub struct StaticConfigSource {
    classes: HashMap<String, Arc<ConfigClass>>,
}

impl StaticConfigSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, architecture_id: impl Into<String>, class: ConfigClass) -> Self {
        self.insert(architecture_id, class);
        self
    }

    pub fn insert(&mut self, architecture_id: impl Into<String>, class: ConfigClass) {
        self.classes.insert(architecture_id.into(), Arc::new(class));
    }
}

impl ConfigSource for StaticConfigSource {
    fn name(&self) -> &str {
        "static"
    }

    fn lookup(&self, architecture_id: &str) -> Result<Option<Arc<ConfigClass>>, SourceError> {
        Ok(self.classes.get(architecture_id).cloned())
    }
}

/// Directory of `<ArchitectureId>.json` schema files, each holding one
/// serialized [`ConfigClass`]. Files are read on first lookup and cached.
#[derive(Debug)]
pub struct SchemaDirSource {
    dir: PathBuf,
    cache: Mutex<HashMap<String, Arc<ConfigClass>>>,
}

impl SchemaDirSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn read_class(&self, path: &Path) -> Result<ConfigClass, SourceError> {
        let content = std::fs::read_to_string(path).map_err(|e| SourceError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        serde_json::from_str(&content).map_err(|e| SourceError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }
}

fn is_plain_identifier(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl ConfigSource for SchemaDirSource {
    fn name(&self) -> &str {
        "schema-dir"
    }

    fn lookup(&self, architecture_id: &str) -> Result<Option<Arc<ConfigClass>>, SourceError> {
        // Ids come from checkpoints; keep them from escaping the directory.
        if !is_plain_identifier(architecture_id) {
            return Ok(None);
        }
        if let Some(class) = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(architecture_id)
        {
            return Ok(Some(Arc::clone(class)));
        }

        let path = self.dir.join(format!("{architecture_id}.json"));
        if !path.is_file() {
            return Ok(None);
        }
        let mut class = self.read_class(&path)?;
        if class.name.is_empty() {
            return Err(SourceError::Parse {
                path,
                message: "missing class name".to_string(),
            });
        }
        class.name = class.name.trim().to_string();
        debug!(architecture = architecture_id, path = %path.display(), "loaded configuration schema");

        let class = Arc::new(class);
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        let stored = cache
            .entry(architecture_id.to_string())
            .or_insert_with(|| Arc::clone(&class));
        Ok(Some(Arc::clone(stored)))
    }
}
