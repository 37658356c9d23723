//! Speculative-decoding compatibility between architectures.
//!
//! Each architecture declares up front whether it can draft, verify, both, or
//! neither, and how its native hidden states map to a shared layout
//! ([`HiddenStateAdapter`]). Pairing decisions are then pure lookups:
//! [`SpeculativeDecodeAdapter::check_compatibility`] never branches on which
//! architecture it is looking at, only on the declared facts.

mod adapter;
pub mod hidden_state;

pub use adapter::{
    ComposedAdapter, SpeculativeDecodeAdapter, SpeculativeDecodeMismatchError, SpeculativePairing,
    SpeculativeUse,
};
pub use hidden_state::{
    AdapterError, HiddenStateAdapter, HiddenStateStep, NormConvention, SharedLayout,
};

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::ArchitectureEntry;

/// What an architecture may do in a speculative pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SpeculativeRole {
    DraftCapable,
    VerifyCapable,
    Both,
    None,
}

impl SpeculativeRole {
    pub fn can_draft(self) -> bool {
        matches!(self, SpeculativeRole::DraftCapable | SpeculativeRole::Both)
    }

    pub fn can_verify(self) -> bool {
        matches!(self, SpeculativeRole::VerifyCapable | SpeculativeRole::Both)
    }
}

impl fmt::Display for SpeculativeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SpeculativeRole::DraftCapable => "draft-capable",
            SpeculativeRole::VerifyCapable => "verify-capable",
            SpeculativeRole::Both => "both",
            SpeculativeRole::None => "none",
        };
        f.write_str(s)
    }
}

/// Declared speculative-decoding facts for one architecture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeculativeDeclaration {
    pub role: SpeculativeRole,
    pub hidden_state: HiddenStateAdapter,
}

impl SpeculativeDeclaration {
    pub fn new(role: SpeculativeRole, hidden_state: HiddenStateAdapter) -> Self {
        Self { role, hidden_state }
    }
}

/// Per-architecture compatibility facts, derived once from the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeculativeCompatibility {
    pub architecture_id: String,
    pub role: SpeculativeRole,
    /// Present whenever `role` is not [`SpeculativeRole::None`].
    pub hidden_state_adapter: Option<HiddenStateAdapter>,
}

impl SpeculativeCompatibility {
    pub fn from_entry(entry: &ArchitectureEntry) -> Self {
        match &entry.speculative {
            Some(decl) if decl.role != SpeculativeRole::None => Self {
                architecture_id: entry.architecture_id.clone(),
                role: decl.role,
                hidden_state_adapter: Some(decl.hidden_state.clone()),
            },
            _ => Self {
                architecture_id: entry.architecture_id.clone(),
                role: SpeculativeRole::None,
                hidden_state_adapter: None,
            },
        }
    }
}
