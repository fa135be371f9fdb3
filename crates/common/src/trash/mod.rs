use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

mod cleaner;
mod storage;

pub use cleaner::{FolderCleaner, StorageFolderCleaner, TrashFolderCleaner};
pub use storage::{FsItemStorage, ItemStorage, StorageError};

use crate::content::Repository;

/// Reserved root segment under which trashed items live
pub const TRASH_SEGMENT: &str = ".trash";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteOperation {
    #[default]
    MoveToTrash,
    DeletePermanently,
}

impl std::fmt::Display for DeleteOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeleteOperation::MoveToTrash => f.write_str("move_to_trash"),
            DeleteOperation::DeletePermanently => f.write_str("delete_permanently"),
        }
    }
}

/// Per call options. An operation set here wins over the
///  manager's configured default.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeleteRequest {
    pub operation: Option<DeleteOperation>,
}

impl DeleteRequest {
    pub fn with_operation(operation: DeleteOperation) -> Self {
        Self {
            operation: Some(operation),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TrashConfig {
    pub default_operation: DeleteOperation,
    /// Repository agnostic trash folder swept by `purge_all`
    pub legacy_trash_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurgeAge {
    /// Purge everything regardless of age
    All,
    OlderThan(Duration),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeStats {
    pub files_deleted: usize,
    pub dirs_deleted: usize,
}

impl std::ops::AddAssign for PurgeStats {
    fn add_assign(&mut self, other: Self) {
        self.files_deleted += other.files_deleted;
        self.dirs_deleted += other.dirs_deleted;
    }
}

#[derive(thiserror::Error, Debug)]
pub enum TrashError {
    /// Storage refuses the operation; a configuration problem
    #[error("unsupported trash operation: {0}")]
    Unsupported(String),
    #[error("storage error: {0}")]
    Storage(StorageError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("purge task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl From<StorageError> for TrashError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::Unsupported(msg) => TrashError::Unsupported(msg),
            other => TrashError::Storage(other),
        }
    }
}

/// `a/b.txt` -> `.trash/a/b.txt`. Paths already in the trash pass through.
pub fn trashed_path(path: &str) -> String {
    let path = path.trim_start_matches('/');
    if is_trashed(path) {
        path.to_string()
    } else {
        format!("{TRASH_SEGMENT}/{path}")
    }
}

/// `.trash/a/b.txt` -> `a/b.txt`
pub fn untrashed_path(path: &str) -> String {
    let path = path.trim_start_matches('/');
    path.strip_prefix(TRASH_SEGMENT)
        .and_then(|rest| rest.strip_prefix('/'))
        .unwrap_or(path)
        .to_string()
}

fn is_trashed(path: &str) -> bool {
    path == TRASH_SEGMENT
        || path
            .strip_prefix(TRASH_SEGMENT)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Run a storage step treating a vanished item as done.
///  Returns whether the step actually touched anything.
fn ignore_missing(result: Result<(), StorageError>) -> Result<bool, TrashError> {
    match result {
        Ok(()) => Ok(true),
        Err(StorageError::NotFound(path)) => {
            tracing::debug!(path = %path, "item already gone");
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

/// Soft delete front for repository item storage
#[derive(Debug, Clone)]
pub struct TrashManager {
    config: TrashConfig,
    storage: Arc<dyn ItemStorage>,
    cleaners: Vec<Arc<dyn FolderCleaner>>,
}

impl TrashManager {
    pub fn new(config: TrashConfig, storage: Arc<dyn ItemStorage>) -> Self {
        Self {
            config,
            storage,
            cleaners: Vec::new(),
        }
    }

    /// Manager with the trash and storage folder cleaners registered
    pub fn with_default_cleaners(config: TrashConfig, storage: Arc<dyn ItemStorage>) -> Self {
        let mut manager = Self::new(config, storage.clone());
        manager.register_cleaner(Arc::new(TrashFolderCleaner::new(storage.clone())));
        manager.register_cleaner(Arc::new(StorageFolderCleaner::new(storage)));
        manager
    }

    pub fn register_cleaner(&mut self, cleaner: Arc<dyn FolderCleaner>) {
        self.cleaners.push(cleaner);
    }

    pub fn effective_operation(&self, request: &DeleteRequest) -> DeleteOperation {
        request.operation.unwrap_or(self.config.default_operation)
    }

    /// Delete an item, moving it to the trash first unless the
    ///  effective operation is a permanent delete.
    ///
    /// Deleting an item that is already in the trash removes it for good.
    pub async fn delete(
        &self,
        repository: &str,
        path: &str,
        request: &DeleteRequest,
    ) -> Result<(), TrashError> {
        let operation = self.effective_operation(request);
        if operation == DeleteOperation::MoveToTrash {
            self.move_to_trash(repository, path).await?;
        }
        // the item has moved by now, so this is a no-op unless
        //  the delete is permanent or the item was already trashed
        ignore_missing(self.storage.delete_item(repository, path).await)?;
        tracing::debug!(repository, path, %operation, "deleted item");
        Ok(())
    }

    async fn move_to_trash(&self, repository: &str, path: &str) -> Result<(), TrashError> {
        let trashed = trashed_path(path);
        if trashed == path.trim_start_matches('/') {
            return Ok(());
        }
        if self.storage.exists(repository, &trashed).await? {
            let stamp = chrono::Utc::now().format("%Y%m%d%H%M%S%3f").to_string();
            let mut aside = format!("{trashed}.{stamp}");
            let mut counter = 1u32;
            while self.storage.exists(repository, &aside).await? {
                aside = format!("{trashed}.{stamp}-{counter}");
                counter += 1;
            }
            tracing::debug!(repository, from = %trashed, to = %aside, "renaming trash occupant aside");
            ignore_missing(self.storage.move_item(repository, &trashed, &aside).await)?;
        }
        ignore_missing(self.storage.move_item(repository, path, &trashed).await)?;
        Ok(())
    }

    /// Move a trashed item back to its original path. Returns false
    ///  when the original path is occupied or the item is gone.
    pub async fn undelete(&self, repository: &str, path: &str) -> Result<bool, TrashError> {
        let trashed = trashed_path(path);
        let original = untrashed_path(path);
        if self.storage.exists(repository, &original).await? {
            tracing::debug!(repository, path = %original, "original path occupied, not restoring");
            return Ok(false);
        }
        let restored = ignore_missing(
            self.storage
                .move_item(repository, &trashed, &original)
                .await,
        )?;
        if restored {
            tracing::info!(repository, path = %original, "restored item from trash");
        }
        Ok(restored)
    }

    /// Delete trashed files of a repository older than `age`, then any
    ///  folders the sweep left empty. The trash root itself stays.
    pub async fn purge(&self, repository: &str, age: PurgeAge) -> Result<PurgeStats, TrashError> {
        let root = self.storage.repository_root(repository)?.ok_or_else(|| {
            TrashError::Unsupported(format!(
                "repository '{repository}' storage has no local trash to purge"
            ))
        })?;
        let stats = purge_tree(root.join(TRASH_SEGMENT), age).await?;
        tracing::info!(
            repository,
            files = stats.files_deleted,
            dirs = stats.dirs_deleted,
            "purged trash"
        );
        Ok(stats)
    }

    /// Purge every repository's trash, then the legacy trash folder
    pub async fn purge_all(&self, age: PurgeAge) -> Result<PurgeStats, TrashError> {
        let mut stats = PurgeStats::default();
        for repository in self.storage.repositories().await? {
            stats += self.purge(&repository, age).await?;
        }
        if let Some(legacy) = &self.config.legacy_trash_dir {
            let legacy_stats = purge_tree(legacy.clone(), age).await?;
            tracing::info!(
                path = %legacy.display(),
                files = legacy_stats.files_deleted,
                "purged legacy trash"
            );
            stats += legacy_stats;
        }
        Ok(stats)
    }

    /// Run every applicable folder cleaner for a deleted repository.
    ///  A failing cleaner is logged and the rest still run.
    pub async fn remove_repository_folders(&self, repository: &Repository) {
        for cleaner in self.cleaners.iter().filter(|c| c.supports(repository)) {
            if let Err(e) = cleaner.delete_repository_folders(repository).await {
                tracing::warn!(
                    repository = %repository.name,
                    cleaner = cleaner.name(),
                    "folder cleanup failed: {}",
                    e
                );
            }
        }
    }
}

async fn purge_tree(root: PathBuf, age: PurgeAge) -> Result<PurgeStats, TrashError> {
    let cutoff = match age {
        PurgeAge::All => None,
        PurgeAge::OlderThan(age) => Some(SystemTime::now() - age),
    };
    Ok(tokio::task::spawn_blocking(move || purge_tree_blocking(&root, cutoff)).await?)
}

fn purge_tree_blocking(root: &Path, cutoff: Option<SystemTime>) -> PurgeStats {
    let mut stats = PurgeStats::default();
    if !root.exists() {
        return stats;
    }
    for entry in walkdir::WalkDir::new(root).contents_first(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::debug!("skipping unreadable trash entry: {}", e);
                continue;
            }
        };
        let path = entry.path();
        if entry.file_type().is_dir() {
            if path == root {
                continue;
            }
            // only succeeds for folders left empty
            if std::fs::remove_dir(path).is_ok() {
                stats.dirs_deleted += 1;
            }
            continue;
        }
        if let Some(cutoff) = cutoff {
            let expired = entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .is_some_and(|modified| modified < cutoff);
            if !expired {
                continue;
            }
        }
        match std::fs::remove_file(path) {
            Ok(()) => stats.files_deleted += 1,
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %path.display(), "failed to purge file: {}", e),
        }
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trashed_path_is_idempotent() {
        assert_eq!(trashed_path("a/b.txt"), ".trash/a/b.txt");
        assert_eq!(trashed_path("/a/b.txt"), ".trash/a/b.txt");
        assert_eq!(trashed_path(".trash/a/b.txt"), ".trash/a/b.txt");
        assert_eq!(trashed_path(".trashy/a"), ".trash/.trashy/a");
    }

    #[test]
    fn test_untrashed_path() {
        assert_eq!(untrashed_path(".trash/a/b.txt"), "a/b.txt");
        assert_eq!(untrashed_path("a/b.txt"), "a/b.txt");
    }

    #[test]
    fn test_effective_operation_prefers_request() {
        let dir = tempfile::tempdir().unwrap();
        let manager = TrashManager::new(
            TrashConfig::default(),
            Arc::new(FsItemStorage::new(dir.path())),
        );
        assert_eq!(
            manager.effective_operation(&DeleteRequest::default()),
            DeleteOperation::MoveToTrash
        );
        assert_eq!(
            manager.effective_operation(&DeleteRequest::with_operation(
                DeleteOperation::DeletePermanently
            )),
            DeleteOperation::DeletePermanently
        );
    }

    #[test]
    fn test_purge_keeps_root_and_fresh_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join(".trash");
        std::fs::create_dir_all(root.join("a/b")).unwrap();
        std::fs::write(root.join("a/b/x.txt"), b"x").unwrap();

        let cutoff = SystemTime::now() - Duration::from_secs(3600);
        let stats = purge_tree_blocking(&root, Some(cutoff));
        assert_eq!(stats, PurgeStats::default());
        assert!(root.join("a/b/x.txt").exists());

        let stats = purge_tree_blocking(&root, None);
        assert_eq!(stats.files_deleted, 1);
        assert_eq!(stats.dirs_deleted, 2);
        assert!(root.exists());
    }
}
