//! Explicit architecture → configuration class mapping. Its id keys are the
//! first tier of the resolver chain; its `model_type` aliases are the last.

use std::collections::HashMap;
use std::sync::Arc;

use super::builtin;
use super::schema::ConfigClass;

/// Classes keyed by architecture id, with secondary keys on the checkpoint
/// `model_type` values each class answers to.
#[derive(Debug, Clone, Default)]
pub struct ExplicitConfigMapping {
    by_architecture: HashMap<String, Arc<ConfigClass>>,
    by_model_type: HashMap<String, Arc<ConfigClass>>,
}

impl ExplicitConfigMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mapping for every architecture compiled into the engine.
    pub fn builtin() -> Self {
        let mut mapping = Self::new();
        for (architecture_id, class) in builtin::builtin_classes() {
            mapping.insert(architecture_id, class);
        }
        mapping
    }

    pub fn with(mut self, architecture_id: impl Into<String>, class: ConfigClass) -> Self {
        self.insert(architecture_id, class);
        self
    }

    /// Map `architecture_id` to `class`. Each of the class's `model_type`
    /// aliases points at it too, unless another class claimed it first.
    pub fn insert(&mut self, architecture_id: impl Into<String>, class: ConfigClass) {
        let class = Arc::new(class);
        for model_type in &class.model_types {
            self.by_model_type
                .entry(model_type.clone())
                .or_insert_with(|| Arc::clone(&class));
        }
        self.by_architecture.insert(architecture_id.into(), class);
    }

    /// Drop the mapping for `architecture_id`, along with every `model_type`
    /// alias pointing at the same class.
    pub fn remove(&mut self, architecture_id: &str) -> Option<Arc<ConfigClass>> {
        let class = self.by_architecture.remove(architecture_id)?;
        self.by_model_type.retain(|_, c| !Arc::ptr_eq(c, &class));
        Some(class)
    }

    /// Class mapped to exactly this architecture id.
    pub fn get(&self, architecture_id: &str) -> Option<Arc<ConfigClass>> {
        self.by_architecture.get(architecture_id).cloned()
    }

    /// Class answering to a checkpoint `model_type`.
    pub fn alias(&self, model_type: &str) -> Option<Arc<ConfigClass>> {
        self.by_model_type.get(model_type).cloned()
    }

    pub fn contains(&self, architecture_id: &str) -> bool {
        self.by_architecture.contains_key(architecture_id)
    }

    pub fn len(&self) -> usize {
        self.by_architecture.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_architecture.is_empty()
    }
}
