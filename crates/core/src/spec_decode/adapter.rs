use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use candle_core::Tensor;
use thiserror::Error;
use tracing::debug;

use super::hidden_state::{AdapterError, HiddenStateAdapter, SharedLayout};
use super::{SpeculativeCompatibility, SpeculativeRole};
use crate::models::{ArchitectureRegistry, RegistryError};

/// Side of a pairing an architecture was asked to play.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeculativeUse {
    Draft,
    Target,
}

impl fmt::Display for SpeculativeUse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpeculativeUse::Draft => f.write_str("draft"),
            SpeculativeUse::Target => f.write_str("target"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpeculativeDecodeMismatchError {
    #[error("{architecture_id} cannot be used as {requested} (speculative role: {role})")]
    RoleExcluded {
        architecture_id: String,
        requested: SpeculativeUse,
        role: SpeculativeRole,
    },
    #[error("{architecture_id} has an invalid hidden state adapter: {reason}")]
    InvalidAdapter {
        architecture_id: String,
        reason: String,
    },
    #[error(
        "hidden state layouts differ: draft {draft} produces {draft_layout:?}, \
         target {target} produces {target_layout:?}"
    )]
    LayoutMismatch {
        target: String,
        draft: String,
        target_layout: SharedLayout,
        draft_layout: SharedLayout,
    },
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Hidden-state translation for one target/draft pair.
#[derive(Debug, Clone, PartialEq)]
pub struct ComposedAdapter {
    target: HiddenStateAdapter,
    draft: HiddenStateAdapter,
    shared: SharedLayout,
}

impl ComposedAdapter {
    pub fn shared_layout(&self) -> SharedLayout {
        self.shared
    }

    /// Target hidden states in the shared layout.
    pub fn translate_target(&self, xs: &Tensor) -> Result<Tensor, AdapterError> {
        self.target.apply(xs)
    }

    /// Draft hidden states in the shared layout.
    pub fn translate_draft(&self, xs: &Tensor) -> Result<Tensor, AdapterError> {
        self.draft.apply(xs)
    }
}

/// A validated target/draft pairing. Shared between every caller that asks
/// for the same pair.
#[derive(Debug)]
pub struct SpeculativePairing {
    pub target: Arc<SpeculativeCompatibility>,
    pub draft: Arc<SpeculativeCompatibility>,
    pub adapter: ComposedAdapter,
}

/// Decides target/draft compatibility from declared facts and caches both
/// the per-architecture facts and the validated pairings.
pub struct SpeculativeDecodeAdapter {
    registry: Arc<ArchitectureRegistry>,
    facts: Mutex<HashMap<String, Arc<SpeculativeCompatibility>>>,
    pairings: Mutex<HashMap<(String, String), Arc<SpeculativePairing>>>,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SpeculativeDecodeAdapter {
    pub fn new(registry: Arc<ArchitectureRegistry>) -> Self {
        Self {
            registry,
            facts: Mutex::new(HashMap::new()),
            pairings: Mutex::new(HashMap::new()),
        }
    }

    /// Compatibility facts for one registered architecture.
    pub fn compatibility(
        &self,
        architecture_id: &str,
    ) -> Result<Arc<SpeculativeCompatibility>, SpeculativeDecodeMismatchError> {
        if let Some(facts) = locked(&self.facts).get(architecture_id) {
            return Ok(Arc::clone(facts));
        }
        let entry = self.registry.resolve(architecture_id)?;
        let computed = Arc::new(SpeculativeCompatibility::from_entry(&entry));
        let mut facts = locked(&self.facts);
        let stored = facts
            .entry(architecture_id.to_string())
            .or_insert(computed);
        Ok(Arc::clone(stored))
    }

    /// Check that `draft_id` may draft for `target_id` and build the adapter
    /// translating both into their shared hidden-state layout.
    pub fn check_compatibility(
        &self,
        target_id: &str,
        draft_id: &str,
    ) -> Result<Arc<SpeculativePairing>, SpeculativeDecodeMismatchError> {
        let key = (target_id.to_string(), draft_id.to_string());
        if let Some(pairing) = locked(&self.pairings).get(&key) {
            return Ok(Arc::clone(pairing));
        }

        let target = self.compatibility(target_id)?;
        let draft = self.compatibility(draft_id)?;
        let adapter = compose(&target, &draft)?;
        debug!(
            target = target_id,
            draft = draft_id,
            width = adapter.shared.width,
            "speculative pairing accepted"
        );

        let pairing = Arc::new(SpeculativePairing {
            target,
            draft,
            adapter,
        });
        // Two racing callers may both build a pairing; the first stored wins
        // and both get it.
        let mut pairings = locked(&self.pairings);
        Ok(Arc::clone(pairings.entry(key).or_insert(pairing)))
    }
}

impl fmt::Debug for SpeculativeDecodeAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpeculativeDecodeAdapter")
            .field("cached_pairings", &locked(&self.pairings).len())
            .finish()
    }
}

fn adapter_for(
    facts: &SpeculativeCompatibility,
    requested: SpeculativeUse,
) -> Result<HiddenStateAdapter, SpeculativeDecodeMismatchError> {
    let allowed = match requested {
        SpeculativeUse::Draft => facts.role.can_draft(),
        SpeculativeUse::Target => facts.role.can_verify(),
    };
    let adapter = match (&facts.hidden_state_adapter, allowed) {
        (Some(adapter), true) => adapter,
        _ => {
            return Err(SpeculativeDecodeMismatchError::RoleExcluded {
                architecture_id: facts.architecture_id.clone(),
                requested,
                role: facts.role,
            })
        }
    };
    adapter
        .validate()
        .map_err(|e| SpeculativeDecodeMismatchError::InvalidAdapter {
            architecture_id: facts.architecture_id.clone(),
            reason: e.to_string(),
        })?;
    Ok(adapter.clone())
}

fn compose(
    target: &SpeculativeCompatibility,
    draft: &SpeculativeCompatibility,
) -> Result<ComposedAdapter, SpeculativeDecodeMismatchError> {
    let target_adapter = adapter_for(target, SpeculativeUse::Target)?;
    let draft_adapter = adapter_for(draft, SpeculativeUse::Draft)?;
    if target_adapter.shared != draft_adapter.shared {
        return Err(SpeculativeDecodeMismatchError::LayoutMismatch {
            target: target.architecture_id.clone(),
            draft: draft.architecture_id.clone(),
            target_layout: target_adapter.shared,
            draft_layout: draft_adapter.shared,
        });
    }
    Ok(ComposedAdapter {
        shared: target_adapter.shared,
        target: target_adapter,
        draft: draft_adapter,
    })
}
