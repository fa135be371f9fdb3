use std::sync::Arc;

use async_trait::async_trait;

use super::{find_asset_by_name, BlobRef, MetadataStore};
use crate::blob::{BlobAttributes, BlobId, BlobStoreUsageChecker};

/// A blob is in use when the asset named by its headers
///  still points at it
#[derive(Debug, Clone)]
pub struct MetadataUsageChecker {
    metadata: Arc<dyn MetadataStore>,
}

impl MetadataUsageChecker {
    pub fn new(metadata: Arc<dyn MetadataStore>) -> Self {
        Self { metadata }
    }
}

#[async_trait]
impl BlobStoreUsageChecker for MetadataUsageChecker {
    async fn in_use(&self, blob_store: &str, id: &BlobId, attributes: &BlobAttributes) -> bool {
        let (Some(repository), Some(blob_name)) =
            (attributes.repository_name(), attributes.blob_name())
        else {
            return false;
        };
        let expected = BlobRef::new(blob_store, id.clone());
        match find_asset_by_name(self.metadata.as_ref(), repository, blob_name).await {
            Ok(Some(asset)) => asset.blob_ref.as_ref() == Some(&expected),
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(blob_id = %id, repository, "usage check failed: {}", e);
                false
            }
        }
    }
}
