//! Process-wide architecture registry.
//!
//! The registry has two phases. During bootstrap it is populated, single
//! threaded, from the declaration table. [`ArchitectureRegistry::freeze`]
//! then publishes the table through a `OnceLock`; from that point every
//! lookup is a plain read with no locking, and every late registration fails.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::multimodal::ModalityTag;
use crate::spec_decode::SpeculativeDeclaration;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("architecture {0} is already registered")]
    DuplicateArchitecture(String),
    #[error("registry is frozen, cannot register {0}")]
    RegistryFrozen(String),
    #[error("unsupported architecture: {0}")]
    UnregisteredArchitecture(String),
}

/// Lazily resolved locator of an implementation: `module::path::Class`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LoaderReference {
    pub module: String,
    pub class: String,
}

impl LoaderReference {
    pub fn new(module: impl Into<String>, class: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            class: class.into(),
        }
    }
}

impl fmt::Display for LoaderReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.module, self.class)
    }
}

impl FromStr for LoaderReference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (module, class) = s
            .trim()
            .rsplit_once("::")
            .ok_or_else(|| format!("loader reference {s:?} is not of the form module::Class"))?;
        let valid_ident = |part: &str| {
            !part.is_empty() && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        };
        if !module.split("::").all(valid_ident) || !valid_ident(class) {
            return Err(format!("loader reference {s:?} contains an invalid path segment"));
        }
        Ok(Self::new(module, class))
    }
}

impl TryFrom<String> for LoaderReference {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<LoaderReference> for String {
    fn from(value: LoaderReference) -> Self {
        value.to_string()
    }
}

/// One pluggable model architecture.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchitectureEntry {
    /// Class name a checkpoint declares in its `architectures` list.
    pub architecture_id: String,
    pub modality_tags: BTreeSet<ModalityTag>,
    pub loader_reference: LoaderReference,
    /// Checkpoint `model_type` this architecture ships with, used to reach a
    /// configuration class by alias.
    pub model_type: Option<String>,
    /// `None` means the architecture never takes part in speculative decoding.
    pub speculative: Option<SpeculativeDeclaration>,
}

impl ArchitectureEntry {
    pub fn new(architecture_id: impl Into<String>, loader_reference: LoaderReference) -> Self {
        Self {
            architecture_id: architecture_id.into(),
            modality_tags: BTreeSet::from([ModalityTag::Text]),
            loader_reference,
            model_type: None,
            speculative: None,
        }
    }

    pub fn with_modalities(mut self, tags: impl IntoIterator<Item = ModalityTag>) -> Self {
        self.modality_tags = tags.into_iter().collect();
        self
    }

    pub fn with_speculative(mut self, declaration: SpeculativeDeclaration) -> Self {
        self.speculative = Some(declaration);
        self
    }

    pub fn with_model_type(mut self, model_type: impl Into<String>) -> Self {
        self.model_type = Some(model_type.into());
        self
    }
}

#[derive(Default)]
struct Table {
    order: Vec<Arc<ArchitectureEntry>>,
    by_id: HashMap<String, Arc<ArchitectureEntry>>,
}

impl Table {
    fn get(&self, architecture_id: &str) -> Result<Arc<ArchitectureEntry>, RegistryError> {
        self.by_id
            .get(architecture_id)
            .cloned()
            .ok_or_else(|| RegistryError::UnregisteredArchitecture(architecture_id.to_string()))
    }
}

/// Architecture id → entry table with an explicit freeze boundary.
#[derive(Default)]
pub struct ArchitectureRegistry {
    bootstrap: Mutex<Table>,
    frozen: OnceLock<Table>,
}

impl ArchitectureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn bootstrap_table(&self) -> MutexGuard<'_, Table> {
        self.bootstrap.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert one entry. Fails on a duplicate id (the first registration is
    /// kept) or once the registry is frozen.
    pub fn register(&self, entry: ArchitectureEntry) -> Result<(), RegistryError> {
        let mut table = self.bootstrap_table();
        if self.frozen.get().is_some() {
            return Err(RegistryError::RegistryFrozen(entry.architecture_id));
        }
        if table.by_id.contains_key(&entry.architecture_id) {
            return Err(RegistryError::DuplicateArchitecture(entry.architecture_id));
        }
        debug!(
            architecture = %entry.architecture_id,
            loader = %entry.loader_reference,
            "registering architecture"
        );
        let entry = Arc::new(entry);
        table
            .by_id
            .insert(entry.architecture_id.clone(), Arc::clone(&entry));
        table.order.push(entry);
        Ok(())
    }

    /// Make the registry immutable for the rest of the process. Calling it
    /// again is a no-op.
    pub fn freeze(&self) {
        let mut table = self.bootstrap_table();
        if self.frozen.get().is_some() {
            return;
        }
        let published = std::mem::take(&mut *table);
        let count = published.order.len();
        // The bootstrap lock is held, so no other freeze can race this set.
        let _ = self.frozen.set(published);
        info!(architectures = count, "architecture registry frozen");
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.get().is_some()
    }

    /// Look up one architecture. Lock-free once frozen.
    pub fn resolve(&self, architecture_id: &str) -> Result<Arc<ArchitectureEntry>, RegistryError> {
        if let Some(table) = self.frozen.get() {
            return table.get(architecture_id);
        }
        let table = self.bootstrap_table();
        match self.frozen.get() {
            Some(frozen) => frozen.get(architecture_id),
            None => table.get(architecture_id),
        }
    }

    /// Resolve the first registered id among a checkpoint's declared
    /// architectures.
    pub fn resolve_first<S: AsRef<str>>(
        &self,
        architectures: &[S],
    ) -> Result<Arc<ArchitectureEntry>, RegistryError> {
        if architectures.is_empty() {
            return Err(RegistryError::UnregisteredArchitecture(
                "empty architectures list".to_string(),
            ));
        }
        for arch in architectures {
            if let Ok(entry) = self.resolve(arch.as_ref()) {
                return Ok(entry);
            }
        }
        let names: Vec<&str> = architectures.iter().map(AsRef::as_ref).collect();
        Err(RegistryError::UnregisteredArchitecture(names.join(", ")))
    }

    /// Snapshot of all entries in registration order.
    pub fn entries(&self) -> Vec<Arc<ArchitectureEntry>> {
        if let Some(table) = self.frozen.get() {
            return table.order.clone();
        }
        let table = self.bootstrap_table();
        match self.frozen.get() {
            Some(frozen) => frozen.order.clone(),
            None => table.order.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for ArchitectureRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchitectureRegistry")
            .field("frozen", &self.is_frozen())
            .field("architectures", &self.len())
            .finish()
    }
}
