use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::config::CheckpointDescriptor;
use crate::loader::{DescriptorFetcher, FetchError};
use crate::models::{ImplementationKind, StaticCatalog};

/// Fetcher serving descriptors from memory. Counts every fetch and can
/// hold each one open for `delay` so concurrent callers overlap.
#[derive(Debug, Default)]
pub struct StaticFetcher {
    descriptors: HashMap<String, CheckpointDescriptor>,
    delay: Option<Duration>,
    fetches: AtomicUsize,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, locator: &str, descriptor: CheckpointDescriptor) -> Self {
        self.descriptors.insert(locator.to_string(), descriptor);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of `fetch` calls so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DescriptorFetcher for StaticFetcher {
    async fn fetch(&self, locator: &str) -> Result<CheckpointDescriptor, FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.descriptors
            .get(locator)
            .cloned()
            .ok_or_else(|| FetchError::NotFound(locator.to_string()))
    }
}

/// Catalog holding `models::fixture::<id>` for every id.
pub fn fixture_catalog(ids: &[&str]) -> StaticCatalog {
    ids.iter().fold(StaticCatalog::new(), |catalog, id| {
        catalog.with("models::fixture", id, ImplementationKind::CausalLm)
    })
}
