use std::sync::Arc;

use async_trait::async_trait;

use super::{Asset, ContentError, MetadataStore, Repository};
use crate::blob::{BlobStoreError, BlobStoreManager};

#[derive(thiserror::Error, Debug)]
pub enum MaintenanceError {
    #[error("content error: {0}")]
    Content(#[from] ContentError),
    #[error("blob store error: {0}")]
    BlobStore(#[from] BlobStoreError),
}

/// Removes assets on behalf of the consistency jobs
#[async_trait]
pub trait MaintenanceService: Send + Sync {
    async fn delete_asset(&self, repository: &Repository, asset: &Asset)
        -> Result<(), MaintenanceError>;
}

/// Deletes the asset record, then soft deletes its blob so
///  the store's compaction can reclaim it
#[derive(Debug, Clone)]
pub struct ContentMaintenance {
    metadata: Arc<dyn MetadataStore>,
    blob_stores: BlobStoreManager,
}

impl ContentMaintenance {
    pub fn new(metadata: Arc<dyn MetadataStore>, blob_stores: BlobStoreManager) -> Self {
        Self {
            metadata,
            blob_stores,
        }
    }
}

#[async_trait]
impl MaintenanceService for ContentMaintenance {
    async fn delete_asset(
        &self,
        repository: &Repository,
        asset: &Asset,
    ) -> Result<(), MaintenanceError> {
        let removed = self
            .metadata
            .delete_asset(&repository.name, &asset.path)
            .await?;
        if !removed {
            tracing::debug!(repository = %repository.name, path = %asset.path, "asset already gone");
        }

        let Some(blob_ref) = &asset.blob_ref else {
            return Ok(());
        };
        match self.blob_stores.get(&blob_ref.store) {
            Some(store) => {
                let reason = format!("Deleting asset {}", asset.path);
                store.delete(&blob_ref.blob_id, &reason).await?;
            }
            None => {
                tracing::warn!(
                    repository = %repository.name,
                    blob_ref = %blob_ref,
                    "blob store for deleted asset is not configured"
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::{BlobStore, MemoryBlobStore};
    use crate::content::{BlobRef, MemoryMetadataStore};
    use bytes::Bytes;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn test_delete_asset_soft_deletes_blob() {
        let blobs = Arc::new(MemoryBlobStore::new("default"));
        let metadata = Arc::new(MemoryMetadataStore::new());
        let repo = Repository::hosted("r", "raw", "default");
        metadata.save_repository(repo.clone()).await.unwrap();

        let blob = blobs
            .create(Bytes::from_static(b"x"), BTreeMap::new())
            .await
            .unwrap();
        let asset = Asset::new("r", "a.txt").with_blob(
            BlobRef::new("default", blob.id.clone()),
            blob.metrics.sha1.as_deref().unwrap(),
        );
        metadata.save_asset(asset.clone()).await.unwrap();

        let manager = BlobStoreManager::new().with_store(blobs.clone());
        let maintenance = ContentMaintenance::new(metadata.clone(), manager);
        maintenance.delete_asset(&repo, &asset).await.unwrap();

        assert!(metadata.find_asset("r", "a.txt").await.unwrap().is_none());
        assert!(blobs.attributes(&blob.id).await.unwrap().unwrap().deleted);
    }
}
