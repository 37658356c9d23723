//! Pluggable model architectures: the registry, the declaration tables that
//! feed it, and the catalog its loader references resolve against.

mod catalog;
mod declarations;
mod registry;

pub use catalog::{
    ImplementationCatalog, ImplementationHandle, ImplementationKind, LocateError, StaticCatalog,
};
pub use declarations::{
    builtin_declarations, register_all, ArchitectureDeclaration, DeclarationError,
    DeclarationTable, RegisterDeclarationsError,
};
pub use registry::{ArchitectureEntry, ArchitectureRegistry, LoaderReference, RegistryError};
