use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::RestoreError;
use crate::blob::{Blob, BlobStore, BLOB_NAME_HEADER, HEADER_PREFIX, REPO_NAME_HEADER};
use crate::content::{find_asset_by_name, Asset, BlobRef, MetadataStore, Repository, SHA1};
use crate::task::dry_run_prefix;

pub const RAW_FORMAT: &str = "raw";

/// Format specific metadata reconstruction from a blob
#[async_trait]
pub trait RestoreBlobStrategy: Send + Sync {
    /// Recreate whatever records the format keeps for this blob
    async fn restore(
        &self,
        properties: &BTreeMap<String, String>,
        blob: &Blob,
        blob_store: &dyn BlobStore,
        dry_run: bool,
    ) -> Result<(), RestoreError>;

    /// Called once per repository after a batch of restores
    async fn after(&self, updated: bool, repository: &Repository) -> Result<(), RestoreError>;
}

/// Strategies keyed by format name with an optional fallback
pub struct StrategyRegistry<S: ?Sized> {
    strategies: BTreeMap<String, Arc<S>>,
    default: Option<Arc<S>>,
}

impl<S: ?Sized> StrategyRegistry<S> {
    pub fn new() -> Self {
        Self {
            strategies: BTreeMap::new(),
            default: None,
        }
    }

    pub fn register(&mut self, format: &str, strategy: Arc<S>) {
        self.strategies.insert(format.to_string(), strategy);
    }

    pub fn set_default(&mut self, strategy: Arc<S>) {
        self.default = Some(strategy);
    }

    pub fn get(&self, format: &str) -> Option<Arc<S>> {
        self.strategies.get(format).cloned()
    }

    pub fn get_or_default(&self, format: &str) -> Option<Arc<S>> {
        self.get(format).or_else(|| self.default.clone())
    }

    pub fn formats(&self) -> impl Iterator<Item = &str> {
        self.strategies.keys().map(String::as_str)
    }
}

impl<S: ?Sized> Default for StrategyRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: ?Sized> Clone for StrategyRegistry<S> {
    fn clone(&self) -> Self {
        Self {
            strategies: self.strategies.clone(),
            default: self.default.clone(),
        }
    }
}

impl<S: ?Sized> std::fmt::Debug for StrategyRegistry<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyRegistry")
            .field("formats", &self.strategies.keys().collect::<Vec<_>>())
            .field("has_default", &self.default.is_some())
            .finish()
    }
}

/// Raw repositories keep one asset per blob, named by the
///  blob's name header
#[derive(Debug, Clone)]
pub struct RawRestoreBlobStrategy {
    metadata: Arc<dyn MetadataStore>,
}

impl RawRestoreBlobStrategy {
    pub fn new(metadata: Arc<dyn MetadataStore>) -> Self {
        Self { metadata }
    }
}

fn header<'a>(properties: &'a BTreeMap<String, String>, key: &str) -> Result<&'a str, RestoreError> {
    properties
        .get(&format!("{HEADER_PREFIX}{key}"))
        .map(String::as_str)
        .ok_or_else(|| RestoreError::InvalidBlob(format!("missing header {key}")))
}

#[async_trait]
impl RestoreBlobStrategy for RawRestoreBlobStrategy {
    async fn restore(
        &self,
        properties: &BTreeMap<String, String>,
        blob: &Blob,
        blob_store: &dyn BlobStore,
        dry_run: bool,
    ) -> Result<(), RestoreError> {
        let repository = header(properties, REPO_NAME_HEADER)?;
        let name = header(properties, BLOB_NAME_HEADER)?;
        let prefix = dry_run_prefix(dry_run);

        if find_asset_by_name(self.metadata.as_ref(), repository, name)
            .await?
            .is_some()
        {
            tracing::debug!(repository, name, "asset already exists, skipping restore");
            return Ok(());
        }

        tracing::info!(repository, name, blob_id = %blob.id, "{prefix}restoring asset");
        if dry_run {
            return Ok(());
        }

        let mut asset = Asset::new(repository, name);
        asset.blob_ref = Some(BlobRef::new(blob_store.name(), blob.id.clone()));
        asset.blob_created = Some(blob.metrics.created);
        if let Some(sha1) = &blob.metrics.sha1 {
            asset.checksums.insert(SHA1.to_string(), sha1.clone());
        }
        self.metadata.save_asset(asset).await?;
        Ok(())
    }

    async fn after(&self, updated: bool, repository: &Repository) -> Result<(), RestoreError> {
        // raw keeps no derived indices
        tracing::debug!(repository = %repository.name, updated, "raw restore finished");
        Ok(())
    }
}
