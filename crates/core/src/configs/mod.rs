//! Configuration classes and their resolution for checkpoints.

pub mod builtin;
mod descriptor;
mod mapping;
mod resolver;
mod schema;
mod source;

pub use descriptor::{ConfigDescriptor, FieldValue, ResolutionStrategy};
pub use mapping::ExplicitConfigMapping;
pub use resolver::{
    select_class, AttemptOutcome, ClassSelection, ConfigResolutionError, ConfigResolver,
    ModelLoadError, ResolutionFailure, ResolvedModel, SchemaViolation, StrategyAttempt,
    ViolationKind,
};
pub use schema::{ConfigClass, FieldSpec, FieldType, NestedSpec, SchemaError};
pub use source::{ConfigSource, SchemaDirSource, SourceError, StaticConfigSource};
