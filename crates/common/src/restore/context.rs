use std::collections::BTreeMap;
use std::sync::Arc;

use crate::blob::{Blob, BlobAttributes, BlobId, BlobStore, BlobStoreError};
use crate::content::{ContentError, MetadataStore, Repository};

use super::strategy::{RestoreBlobStrategy, StrategyRegistry};

#[derive(thiserror::Error, Debug)]
pub enum ContextError {
    #[error("blob not found")]
    BlobMissing,
    #[error("blob attributes not found")]
    AttributesMissing,
    #[error("blob header names no repository")]
    RepositoryNameMissing,
    #[error("repository '{0}' not found")]
    RepositoryMissing(String),
    #[error("blob store error: {0}")]
    BlobStore(#[from] BlobStoreError),
    #[error("content error: {0}")]
    Content(#[from] ContentError),
}

impl ContextError {
    /// A broken link in the chain rather than a failing lookup
    pub fn is_unresolved(&self) -> bool {
        matches!(
            self,
            ContextError::BlobMissing
                | ContextError::AttributesMissing
                | ContextError::RepositoryNameMissing
                | ContextError::RepositoryMissing(_)
        )
    }
}

/// Everything needed to restore one blob
pub struct RestoreContext {
    pub blob_id: BlobId,
    pub blob: Blob,
    pub attributes: BlobAttributes,
    pub properties: BTreeMap<String, String>,
    pub repository_name: String,
    pub repository: Repository,
    /// None when no strategy handles the repository's format
    pub strategy: Option<Arc<dyn RestoreBlobStrategy>>,
}

impl RestoreContext {
    /// Resolve blob -> attributes -> properties -> repository name
    ///  -> repository -> strategy, stopping at the first missing link
    pub async fn build(
        blob_store: &dyn BlobStore,
        metadata: &dyn MetadataStore,
        strategies: &StrategyRegistry<dyn RestoreBlobStrategy>,
        blob_id: &BlobId,
    ) -> Result<Self, ContextError> {
        let blob = blob_store
            .get_with_deleted(blob_id, true)
            .await?
            .ok_or(ContextError::BlobMissing)?;
        let attributes = blob_store
            .attributes(blob_id)
            .await?
            .ok_or(ContextError::AttributesMissing)?;
        let properties = attributes.properties();
        let repository_name = attributes
            .repository_name()
            .ok_or(ContextError::RepositoryNameMissing)?
            .to_string();
        let repository = metadata
            .repository(&repository_name)
            .await?
            .ok_or_else(|| ContextError::RepositoryMissing(repository_name.clone()))?;
        let strategy = strategies.get(&repository.format);

        Ok(Self {
            blob_id: blob_id.clone(),
            blob,
            attributes,
            properties,
            repository_name,
            repository,
            strategy,
        })
    }
}
