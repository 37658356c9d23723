pub mod config;
pub mod configs;
pub mod loader;
pub mod models;
pub mod multimodal;
pub mod runtime;
pub mod spec_decode;
pub mod verify;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use runtime::{ArchitectureRuntime, BootstrapError, PreparedModel, RuntimeBuilder};
