//! Shared test utilities for archreg-core.
//!
//! Tiny checkpoints and configuration classes, a scripted descriptor
//! fetcher, and a catalog builder for registry fixtures.

mod mock_fetcher;
mod tiny_config;

pub use mock_fetcher::{fixture_catalog, StaticFetcher};
pub use tiny_config::{
    tiny_text_checkpoint, tiny_text_class, tiny_vl_checkpoint, tiny_vl_class,
    OMEGA17_VL_EXP_CONFIG, QWEN3_06B_CONFIG, QWEN3_VL_MOE_CONFIG,
};
