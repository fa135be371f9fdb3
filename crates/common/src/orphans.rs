use std::collections::BTreeMap;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use serde::Serialize;

use crate::blob::{BlobId, BlobStore, BlobStoreError, BlobStoreManager};
use crate::content::{find_asset_by_name, BlobRef, ContentError, MetadataStore, Repository};
use crate::task::ProgressLogger;

#[derive(thiserror::Error, Debug)]
pub enum OrphanError {
    /// The repository's storage attributes name no blob store
    #[error("repository '{0}' has no blob store name configured")]
    MissingBlobStoreName(String),
    #[error("blob store '{0}' is not configured")]
    UnknownBlobStore(String),
    #[error("blob store error: {0}")]
    BlobStore(#[from] BlobStoreError),
    #[error("content error: {0}")]
    Content(#[from] ContentError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrphanReason {
    /// The repository named in the blob header no longer exists
    RepositoryMissing,
    /// No asset carries the blob's name
    AssetMissing,
    /// The asset now points at a different blob
    BlobRefChanged,
}

impl Display for OrphanReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OrphanReason::RepositoryMissing => "repository missing",
            OrphanReason::AssetMissing => "asset missing",
            OrphanReason::BlobRefChanged => "blob ref changed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrphanedBlob {
    pub blob_store: String,
    pub blob_id: BlobId,
    pub repository: String,
    pub blob_name: String,
    pub reason: OrphanReason,
}

/// Receives every orphan a scan finds
#[async_trait]
pub trait OrphanHandler: Send + Sync {
    async fn handle(&self, orphan: &OrphanedBlob) -> Result<(), OrphanError>;
}

/// Keeps every orphan it is handed
#[derive(Debug, Default)]
pub struct OrphanCollector {
    orphans: Mutex<Vec<OrphanedBlob>>,
}

impl OrphanCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_inner(self) -> Vec<OrphanedBlob> {
        self.orphans.into_inner()
    }
}

#[async_trait]
impl OrphanHandler for OrphanCollector {
    async fn handle(&self, orphan: &OrphanedBlob) -> Result<(), OrphanError> {
        self.orphans.lock().push(orphan.clone());
        Ok(())
    }
}

struct HardDelete {
    store: Arc<dyn BlobStore>,
}

#[async_trait]
impl OrphanHandler for HardDelete {
    async fn handle(&self, orphan: &OrphanedBlob) -> Result<(), OrphanError> {
        if self.store.delete_hard(&orphan.blob_id).await? {
            tracing::info!(
                blob_store = %orphan.blob_store,
                blob_id = %orphan.blob_id,
                repository = %orphan.repository,
                blob_name = %orphan.blob_name,
                reason = %orphan.reason,
                "deleted orphaned blob"
            );
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OrphanScanStats {
    pub scanned: usize,
    pub orphans: usize,
    pub errors: usize,
}

/// Reverse consistency check: blobs that no asset points at
#[derive(Debug, Clone)]
pub struct OrphanedBlobFinder {
    blob_stores: BlobStoreManager,
    metadata: Arc<dyn MetadataStore>,
    progress_interval: Duration,
}

impl OrphanedBlobFinder {
    pub fn new(blob_stores: BlobStoreManager, metadata: Arc<dyn MetadataStore>) -> Self {
        Self {
            blob_stores,
            metadata,
            progress_interval: ProgressLogger::DEFAULT_INTERVAL,
        }
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Stream every orphaned blob of a repository to `handler`
    pub async fn detect(
        &self,
        repository: &Repository,
        handler: &dyn OrphanHandler,
    ) -> Result<OrphanScanStats, OrphanError> {
        let store = self.repository_store(repository)?;
        Ok(self
            .scan_store(store.as_ref(), Some(&repository.name), handler)
            .await)
    }

    /// Hard delete every orphaned blob of a repository
    pub async fn delete(&self, repository: &Repository) -> Result<OrphanScanStats, OrphanError> {
        let store = self.repository_store(repository)?;
        let handler = HardDelete {
            store: store.clone(),
        };
        Ok(self
            .scan_store(store.as_ref(), Some(&repository.name), &handler)
            .await)
    }

    /// Hard delete orphans across every blob store. A store that
    ///  fails is logged and the rest are still swept.
    pub async fn delete_all(&self) -> BTreeMap<String, OrphanScanStats> {
        let mut results = BTreeMap::new();
        for store in self.blob_stores.stores() {
            let handler = HardDelete {
                store: store.clone(),
            };
            let stats = self.scan_store(store.as_ref(), None, &handler).await;
            if stats.errors > 0 {
                tracing::warn!(
                    blob_store = store.name(),
                    errors = stats.errors,
                    "orphan sweep finished with errors"
                );
            }
            results.insert(store.name().to_string(), stats);
        }
        results
    }

    fn repository_store(&self, repository: &Repository) -> Result<Arc<dyn BlobStore>, OrphanError> {
        let name = repository
            .blob_store_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| OrphanError::MissingBlobStoreName(repository.name.clone()))?;
        self.blob_stores
            .get(name)
            .ok_or_else(|| OrphanError::UnknownBlobStore(name.to_string()))
    }

    /// Walk a store's blob ids. With `only_repository` set, blobs
    ///  written by other repositories are left alone.
    async fn scan_store(
        &self,
        store: &dyn BlobStore,
        only_repository: Option<&str>,
        handler: &dyn OrphanHandler,
    ) -> OrphanScanStats {
        let mut stats = OrphanScanStats::default();
        let mut progress = ProgressLogger::new(self.progress_interval);
        let mut ids = store.blob_ids();
        while let Some(next) = ids.next().await {
            let id = match next {
                Ok(id) => id,
                Err(e) => {
                    tracing::warn!(blob_store = store.name(), "failed to enumerate blob: {}", e);
                    stats.errors += 1;
                    continue;
                }
            };
            stats.scanned += 1;

            let handled = match self.classify(store, &id, only_repository).await {
                Ok(Some(orphan)) => {
                    stats.orphans += 1;
                    handler.handle(&orphan).await
                }
                Ok(None) => Ok(()),
                Err(e) => Err(e),
            };
            if let Err(e) = handled {
                tracing::warn!(blob_store = store.name(), blob_id = %id, "error processing blob: {}", e);
                stats.errors += 1;
            }

            if progress.should_log() {
                tracing::info!(
                    blob_store = store.name(),
                    elapsed = %progress.elapsed_display(),
                    scanned = stats.scanned,
                    orphans = stats.orphans,
                    "orphan scan in progress"
                );
            }
        }
        tracing::info!(
            blob_store = store.name(),
            elapsed = %progress.elapsed_display(),
            scanned = stats.scanned,
            orphans = stats.orphans,
            errors = stats.errors,
            "orphan scan complete"
        );
        stats
    }

    async fn classify(
        &self,
        store: &dyn BlobStore,
        id: &BlobId,
        only_repository: Option<&str>,
    ) -> Result<Option<OrphanedBlob>, OrphanError> {
        let Some(attributes) = store.attributes(id).await? else {
            return Ok(None);
        };
        // soft deleted blobs are left to the store's compaction
        if attributes.deleted {
            return Ok(None);
        }
        let (Some(repository), Some(blob_name)) =
            (attributes.repository_name(), attributes.blob_name())
        else {
            tracing::debug!(blob_id = %id, "blob header names no repository/asset, skipping");
            return Ok(None);
        };
        if only_repository.is_some_and(|only| only != repository) {
            return Ok(None);
        }
        let orphan = |reason| OrphanedBlob {
            blob_store: store.name().to_string(),
            blob_id: id.clone(),
            repository: repository.to_string(),
            blob_name: blob_name.to_string(),
            reason,
        };

        if self.metadata.repository(repository).await?.is_none() {
            return Ok(Some(orphan(OrphanReason::RepositoryMissing)));
        }

        let asset = find_asset_by_name(self.metadata.as_ref(), repository, blob_name).await?;
        let current = asset
            .as_ref()
            .and_then(|asset| asset.blob_ref.as_ref())
            .map(|blob_ref| &blob_ref.blob_id);
        if current == Some(id) {
            return Ok(None);
        }
        // another asset may still point at this blob
        let blob_ref = BlobRef::new(store.name(), id.clone());
        if self
            .metadata
            .find_asset_by_blob_ref(repository, &blob_ref)
            .await?
            .is_some()
        {
            return Ok(None);
        }
        let reason = if asset.is_some() {
            OrphanReason::BlobRefChanged
        } else {
            OrphanReason::AssetMissing
        };
        Ok(Some(orphan(reason)))
    }
}
