use std::fmt::Debug;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;

#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("item not found: {0}")]
    NotFound(String),
    #[error("unsupported storage operation: {0}")]
    Unsupported(String),
    #[error("invalid item path: {0}")]
    InvalidPath(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Repository item storage addressed by (repository, relative path)
#[async_trait]
pub trait ItemStorage: Send + Sync + Debug {
    async fn exists(&self, repository: &str, path: &str) -> Result<bool, StorageError>;

    /// Move an item, creating parent folders at the destination.
    ///
    /// Should fail with `StorageError::NotFound` if `from` is missing
    async fn move_item(&self, repository: &str, from: &str, to: &str) -> Result<(), StorageError>;

    /// Should fail with `StorageError::NotFound` if the item is missing
    async fn delete_item(&self, repository: &str, path: &str) -> Result<(), StorageError>;

    /// Local folder of a repository when the storage is filesystem backed.
    ///
    /// Should fail with `StorageError::InvalidPath` if the name would
    ///  leave the storage root
    fn repository_root(&self, repository: &str) -> Result<Option<PathBuf>, StorageError>;

    async fn repositories(&self) -> Result<Vec<String>, StorageError>;
}

/// Items stored as plain files under `<root>/<repository>/<path>`
#[derive(Debug, Clone)]
pub struct FsItemStorage {
    root: PathBuf,
}

impl FsItemStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, repository: &str, path: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(path.trim_start_matches('/'));
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if !is_plain_name(repository) || escapes {
            return Err(StorageError::InvalidPath(format!("{repository}:{path}")));
        }
        Ok(self.root.join(repository).join(relative))
    }
}

/// A single normal path segment
fn is_plain_name(name: &str) -> bool {
    !name.contains(['/', '\\'])
        && matches!(
            Path::new(name).components().collect::<Vec<_>>().as_slice(),
            [Component::Normal(_)]
        )
}

fn map_io(e: std::io::Error, path: &Path) -> StorageError {
    match e.kind() {
        ErrorKind::NotFound => StorageError::NotFound(path.display().to_string()),
        ErrorKind::Unsupported | ErrorKind::PermissionDenied => {
            StorageError::Unsupported(format!("{}: {}", path.display(), e))
        }
        _ => StorageError::Io(e),
    }
}

#[async_trait]
impl ItemStorage for FsItemStorage {
    async fn exists(&self, repository: &str, path: &str) -> Result<bool, StorageError> {
        let path = self.resolve(repository, path)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    async fn move_item(&self, repository: &str, from: &str, to: &str) -> Result<(), StorageError> {
        let from = self.resolve(repository, from)?;
        let to = self.resolve(repository, to)?;
        if !tokio::fs::try_exists(&from).await? {
            return Err(StorageError::NotFound(from.display().to_string()));
        }
        if let Some(parent) = to.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| map_io(e, parent))?;
        }
        tokio::fs::rename(&from, &to)
            .await
            .map_err(|e| map_io(e, &from))
    }

    async fn delete_item(&self, repository: &str, path: &str) -> Result<(), StorageError> {
        let path = self.resolve(repository, path)?;
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|e| map_io(e, &path))?;
        let result = if metadata.is_dir() {
            tokio::fs::remove_dir_all(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        };
        result.map_err(|e| map_io(e, &path))
    }

    fn repository_root(&self, repository: &str) -> Result<Option<PathBuf>, StorageError> {
        if !is_plain_name(repository) {
            return Err(StorageError::InvalidPath(repository.to_string()));
        }
        Ok(Some(self.root.join(repository)))
    }

    async fn repositories(&self) -> Result<Vec<String>, StorageError> {
        let mut repositories = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(repositories),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                repositories.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        repositories.sort();
        Ok(repositories)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rejects_escaping_paths() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsItemStorage::new(dir.path());

        assert!(matches!(
            storage.exists("r", "../../etc/passwd").await,
            Err(StorageError::InvalidPath(_))
        ));
        assert!(matches!(
            storage.exists("a/b", "x").await,
            Err(StorageError::InvalidPath(_))
        ));
        assert!(matches!(
            storage.exists("..", "x").await,
            Err(StorageError::InvalidPath(_))
        ));
    }

    #[test]
    fn test_repository_root_rejects_non_plain_names() {
        let storage = FsItemStorage::new("/depot/storage");
        for name in ["", ".", "..", "a/b", "a\\b", "/abs"] {
            assert!(
                matches!(storage.repository_root(name), Err(StorageError::InvalidPath(_))),
                "accepted {name:?}"
            );
        }
        assert_eq!(
            storage.repository_root("raw-hosted").unwrap(),
            Some(PathBuf::from("/depot/storage/raw-hosted"))
        );
        assert!(storage.repository_root("..hidden").is_ok());
    }

    #[tokio::test]
    async fn test_move_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsItemStorage::new(dir.path());
        std::fs::create_dir_all(dir.path().join("r/a")).unwrap();
        std::fs::write(dir.path().join("r/a/x.txt"), b"x").unwrap();

        storage.move_item("r", "a/x.txt", "b/c/x.txt").await.unwrap();
        assert!(!storage.exists("r", "a/x.txt").await.unwrap());
        assert!(storage.exists("r", "/b/c/x.txt").await.unwrap());

        assert!(matches!(
            storage.move_item("r", "a/x.txt", "z.txt").await,
            Err(StorageError::NotFound(_))
        ));

        storage.delete_item("r", "b/c/x.txt").await.unwrap();
        assert!(matches!(
            storage.delete_item("r", "b/c/x.txt").await,
            Err(StorageError::NotFound(_))
        ));
        assert_eq!(storage.repositories().await.unwrap(), vec!["r".to_string()]);
    }
}
