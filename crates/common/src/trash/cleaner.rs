use std::io::ErrorKind;
use std::sync::Arc;

use async_trait::async_trait;

use super::storage::ItemStorage;
use super::{TrashError, TRASH_SEGMENT};
use crate::content::Repository;

/// Removes on-disk folders left behind when a repository is deleted
#[async_trait]
pub trait FolderCleaner: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;

    /// Whether this cleaner handles repositories of this kind/format
    fn supports(&self, _repository: &Repository) -> bool {
        true
    }

    async fn delete_repository_folders(&self, repository: &Repository) -> Result<(), TrashError>;
}

async fn remove_dir_if_present(path: &std::path::Path) -> Result<bool, TrashError> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Removes the repository's trash subtree
#[derive(Debug, Clone)]
pub struct TrashFolderCleaner {
    storage: Arc<dyn ItemStorage>,
}

impl TrashFolderCleaner {
    pub fn new(storage: Arc<dyn ItemStorage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl FolderCleaner for TrashFolderCleaner {
    fn name(&self) -> &str {
        "trash"
    }

    async fn delete_repository_folders(&self, repository: &Repository) -> Result<(), TrashError> {
        let root = self
            .storage
            .repository_root(&repository.name)?
            .ok_or_else(|| TrashError::Unsupported("storage has no local folders".to_string()))?;
        if remove_dir_if_present(&root.join(TRASH_SEGMENT)).await? {
            tracing::info!(repository = %repository.name, "removed trash folder");
        }
        Ok(())
    }
}

/// Removes the repository's whole storage folder. Groups hold no
///  storage of their own.
#[derive(Debug, Clone)]
pub struct StorageFolderCleaner {
    storage: Arc<dyn ItemStorage>,
}

impl StorageFolderCleaner {
    pub fn new(storage: Arc<dyn ItemStorage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl FolderCleaner for StorageFolderCleaner {
    fn name(&self) -> &str {
        "storage"
    }

    fn supports(&self, repository: &Repository) -> bool {
        repository.kind != crate::content::RepositoryKind::Group
    }

    async fn delete_repository_folders(&self, repository: &Repository) -> Result<(), TrashError> {
        let root = self
            .storage
            .repository_root(&repository.name)?
            .ok_or_else(|| TrashError::Unsupported("storage has no local folders".to_string()))?;
        if remove_dir_if_present(&root).await? {
            tracing::info!(repository = %repository.name, "removed storage folder");
        }
        Ok(())
    }
}
