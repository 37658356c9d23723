//! Startup verification of the frozen registry.
//!
//! Every registered architecture is checked independently: its loader
//! reference must locate an implementation, and the class the resolver chain
//! would pick for it must exist and be well-formed. Classes the chain never
//! reaches are not inspected. Failures are collected rather than stopping at
//! the first one, so one run reports every broken entry.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info};

use crate::configs::{select_class, ConfigSource, ExplicitConfigMapping, SchemaError};
use crate::models::{ArchitectureEntry, ArchitectureRegistry, ImplementationCatalog, LocateError};
use crate::spec_decode::SpeculativeRole;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailureKind {
    #[error("loader reference {reference} cannot be resolved: {source}")]
    Loader {
        reference: String,
        #[source]
        source: LocateError,
    },
    #[error("no configuration class in the explicit mapping, the {source_name} source or a model_type alias")]
    NoConfigClass { source_name: String },
    #[error("configuration class {class} is malformed: {source}")]
    MalformedConfig {
        class: String,
        #[source]
        source: SchemaError,
    },
    #[error("configuration source {source_name} failed: {message}")]
    Source {
        source_name: String,
        message: String,
    },
    #[error("speculative declaration is invalid: {0}")]
    Speculative(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{architecture_id}: {kind}")]
pub struct VerificationFailure {
    pub architecture_id: String,
    pub kind: FailureKind,
}

/// Summary of one verification run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationReport {
    pub checked: usize,
    pub failures: Vec<VerificationFailure>,
}

impl VerificationReport {
    pub fn passed(&self) -> usize {
        self.checked - self.failed_architectures().len()
    }

    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }

    /// Distinct failing ids, in registration order.
    pub fn failed_architectures(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = Vec::new();
        for failure in &self.failures {
            if !ids.contains(&failure.architecture_id.as_str()) {
                ids.push(&failure.architecture_id);
            }
        }
        ids
    }
}

impl fmt::Display for VerificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "verified {} architectures: {} passed, {} failed",
            self.checked,
            self.passed(),
            self.failed_architectures().len()
        )?;
        for failure in &self.failures {
            write!(f, "\n  - {failure}")?;
        }
        Ok(())
    }
}

pub struct BuildTimeVerifier<'a> {
    catalog: &'a dyn ImplementationCatalog,
    mapping: &'a ExplicitConfigMapping,
    source: &'a dyn ConfigSource,
}

impl<'a> BuildTimeVerifier<'a> {
    pub fn new(
        catalog: &'a dyn ImplementationCatalog,
        mapping: &'a ExplicitConfigMapping,
        source: &'a dyn ConfigSource,
    ) -> Self {
        Self {
            catalog,
            mapping,
            source,
        }
    }

    /// Check every registered architecture; `Err` carries all failures.
    pub fn verify(&self, registry: &ArchitectureRegistry) -> Result<(), Vec<VerificationFailure>> {
        let report = self.report(registry);
        if report.is_ok() {
            Ok(())
        } else {
            Err(report.failures)
        }
    }

    pub fn report(&self, registry: &ArchitectureRegistry) -> VerificationReport {
        let entries = registry.entries();
        let failures: Vec<_> = entries
            .iter()
            .flat_map(|entry| self.verify_entry(entry))
            .collect();
        let report = VerificationReport {
            checked: entries.len(),
            failures,
        };
        if report.is_ok() {
            info!(architectures = report.checked, "architecture verification passed");
        } else {
            for failure in &report.failures {
                error!(architecture = %failure.architecture_id, "{}", failure.kind);
            }
        }
        report
    }

    /// Failures for a single entry; empty when it is usable.
    pub fn verify_entry(&self, entry: &Arc<ArchitectureEntry>) -> Vec<VerificationFailure> {
        let id = &entry.architecture_id;
        let fail = |kind| VerificationFailure {
            architecture_id: id.clone(),
            kind,
        };
        let mut failures = Vec::new();

        if let Err(source) = self.catalog.locate(&entry.loader_reference) {
            failures.push(fail(FailureKind::Loader {
                reference: entry.loader_reference.to_string(),
                source,
            }));
        }

        let selection = select_class(self.mapping, self.source, id, entry.model_type.as_deref());
        match (&selection.chosen, selection.source_failure()) {
            (Some((_, class)), _) => {
                if let Err(source) = class.check_well_formed() {
                    failures.push(fail(FailureKind::MalformedConfig {
                        class: class.name.clone(),
                        source,
                    }));
                }
            }
            (None, Some(message)) => failures.push(fail(FailureKind::Source {
                source_name: self.source.name().to_string(),
                message: message.to_string(),
            })),
            (None, None) => failures.push(fail(FailureKind::NoConfigClass {
                source_name: self.source.name().to_string(),
            })),
        }

        if let Some(spec) = &entry.speculative {
            if spec.role != SpeculativeRole::None {
                if let Err(e) = spec.hidden_state.validate() {
                    failures.push(fail(FailureKind::Speculative(e.to_string())));
                }
            }
        }
        failures
    }
}
