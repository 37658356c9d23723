use std::path::{Path, PathBuf};

use async_trait::async_trait;
use hf_hub::{api::sync::Api, Repo, RepoType};
use thiserror::Error;
use tracing::debug;

use crate::config::CheckpointDescriptor;

/// Errors raised while fetching a checkpoint's `config.json`.
///
/// Cloneable so one failed fetch can be handed to every coalesced waiter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("failed to read {path}: {message}")]
    Io { path: PathBuf, message: String },
    #[error("invalid config.json for {locator}: {message}")]
    Parse { locator: String, message: String },
    #[error("failed to download config.json for {locator}: {message}")]
    Remote { locator: String, message: String },
    #[error("fetch task for {locator} failed: {message}")]
    Task { locator: String, message: String },
    #[error("no checkpoint found for {0}")]
    NotFound(String),
}

/// Source of checkpoint descriptors, keyed by model locator.
#[async_trait]
pub trait DescriptorFetcher: Send + Sync {
    async fn fetch(&self, locator: &str) -> Result<CheckpointDescriptor, FetchError>;
}

/// Reads `config.json` from a local directory, or downloads it from the
/// HuggingFace Hub (or uses the cache) when the locator is a repo id.
#[derive(Debug, Clone)]
pub struct HubFetcher {
    revision: String,
}

impl Default for HubFetcher {
    fn default() -> Self {
        Self {
            revision: "main".to_string(),
        }
    }
}

impl HubFetcher {
    pub fn new(revision: impl Into<String>) -> Self {
        Self {
            revision: revision.into(),
        }
    }

    pub fn revision(&self) -> &str {
        &self.revision
    }
}

fn parse_descriptor(locator: &str, content: &str) -> Result<CheckpointDescriptor, FetchError> {
    CheckpointDescriptor::from_json_str(content).map_err(|e| FetchError::Parse {
        locator: locator.to_string(),
        message: e.to_string(),
    })
}

/// Blocking download through the hf-hub sync API.
fn fetch_from_hub(locator: &str, revision: &str) -> Result<PathBuf, FetchError> {
    let remote = |e: hf_hub::api::sync::ApiError| FetchError::Remote {
        locator: locator.to_string(),
        message: e.to_string(),
    };
    let api = Api::new().map_err(remote)?;
    let repo = api.repo(Repo::with_revision(
        locator.to_string(),
        RepoType::Model,
        revision.to_string(),
    ));
    repo.get("config.json").map_err(remote)
}

#[async_trait]
impl DescriptorFetcher for HubFetcher {
    async fn fetch(&self, locator: &str) -> Result<CheckpointDescriptor, FetchError> {
        let local = Path::new(locator);
        let config_path = if local.is_dir() {
            local.join("config.json")
        } else if local.is_file() {
            local.to_path_buf()
        } else {
            debug!(model = locator, revision = %self.revision, "fetching config.json from hub");
            let owned = locator.to_string();
            let revision = self.revision.clone();
            tokio::task::spawn_blocking(move || fetch_from_hub(&owned, &revision))
                .await
                .map_err(|e| FetchError::Task {
                    locator: locator.to_string(),
                    message: e.to_string(),
                })??
        };

        let content = tokio::fs::read_to_string(&config_path)
            .await
            .map_err(|e| FetchError::Io {
                path: config_path.clone(),
                message: e.to_string(),
            })?;
        parse_descriptor(locator, &content)
    }
}
