use std::{fs, path::PathBuf, sync::Arc, time::Duration};

use common::blob::BlobStoreManager;
use common::trash::{DeleteOperation, FsItemStorage, TrashConfig, TrashManager};
use object_store::{ObjectBlobStore, ObjectBlobStoreError, ObjectStoreConfig};
use serde::{Deserialize, Serialize};

use crate::database::{Database, DatabaseSetupError};

pub const APP_NAME: &str = "depot";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const DB_FILE_NAME: &str = "metadata.sqlite";
pub const BLOBS_DIR_NAME: &str = "blobs";
pub const STORAGE_DIR_NAME: &str = "storage";
pub const TRASH_DIR_NAME: &str = "trash";
pub const DEFAULT_BLOB_STORE: &str = "default";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// What a trash delete does when the caller does not say
    #[serde(default)]
    pub delete_operation: DeleteOperation,
    #[serde(default = "default_blob_stores")]
    pub blob_stores: Vec<BlobStoreEntry>,
    #[serde(default = "default_progress_interval_secs")]
    pub progress_interval_secs: u64,
    /// Assets fetched per metadata page
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_blob_stores() -> Vec<BlobStoreEntry> {
    vec![BlobStoreEntry {
        name: DEFAULT_BLOB_STORE.to_string(),
        backend: BlobStoreBackend::Filesystem { path: None },
    }]
}

fn default_progress_interval_secs() -> u64 {
    60
}

fn default_page_size() -> usize {
    100
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            delete_operation: DeleteOperation::default(),
            blob_stores: default_blob_stores(),
            progress_interval_secs: default_progress_interval_secs(),
            page_size: default_page_size(),
        }
    }
}

impl AppConfig {
    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs(self.progress_interval_secs.max(1))
    }
}

/// A named blob store and where its bytes live
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobStoreEntry {
    pub name: String,
    #[serde(flatten)]
    pub backend: BlobStoreBackend,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlobStoreBackend {
    /// SQLite + local filesystem
    Filesystem {
        /// Defaults to depot_dir/blobs/<name>/
        path: Option<PathBuf>,
    },

    /// S3-compatible object storage; attributes stay in a local
    ///  SQLite file under depot_dir/blobs/
    S3 {
        /// S3 endpoint URL (e.g., "http://localhost:9000" for MinIO)
        endpoint: String,
        access_key: String,
        secret_key: String,
        bucket: String,
        region: Option<String>,
    },

    /// Nothing survives the process
    Memory,
}

#[derive(Debug, Clone)]
pub struct AppState {
    /// Path to the depot directory (~/.depot)
    pub depot_dir: PathBuf,
    pub db_path: PathBuf,
    pub blobs_path: PathBuf,
    /// Repository item storage managed by the trash manager
    pub storage_path: PathBuf,
    /// Repository-agnostic trash swept by `purge` alongside the repositories
    pub trash_path: PathBuf,
    pub config_path: PathBuf,
    pub config: AppConfig,
}

impl AppState {
    /// Get the depot directory path (custom or default ~/.depot)
    pub fn depot_dir(custom_path: Option<PathBuf>) -> Result<PathBuf, StateError> {
        if let Some(path) = custom_path {
            return Ok(path);
        }

        let home = dirs::home_dir().ok_or(StateError::NoHomeDirectory)?;
        Ok(home.join(format!(".{}", APP_NAME)))
    }

    /// Initialize a new depot state directory
    pub fn init(
        custom_path: Option<PathBuf>,
        config: Option<AppConfig>,
    ) -> Result<Self, StateError> {
        let depot_dir = Self::depot_dir(custom_path)?;

        if depot_dir.exists() {
            return Err(StateError::AlreadyInitialized);
        }

        fs::create_dir_all(&depot_dir)?;

        let state = Self::paths(depot_dir, config.unwrap_or_default());
        fs::create_dir_all(&state.blobs_path)?;
        fs::create_dir_all(&state.storage_path)?;
        fs::create_dir_all(&state.trash_path)?;

        let config_toml = toml::to_string_pretty(&state.config)?;
        fs::write(&state.config_path, config_toml)?;

        // The schema is created on first connect
        fs::write(&state.db_path, "")?;

        Ok(state)
    }

    /// Load existing state from the depot directory
    pub fn load(custom_path: Option<PathBuf>) -> Result<Self, StateError> {
        let depot_dir = Self::depot_dir(custom_path)?;

        if !depot_dir.exists() {
            return Err(StateError::NotInitialized);
        }

        let config_path = depot_dir.join(CONFIG_FILE_NAME);
        if !config_path.exists() {
            return Err(StateError::MissingFile(CONFIG_FILE_NAME.to_string()));
        }
        let config_toml = fs::read_to_string(&config_path)?;
        let config: AppConfig = toml::from_str(&config_toml)?;

        let state = Self::paths(depot_dir, config);
        for (path, name) in [
            (&state.db_path, DB_FILE_NAME),
            (&state.blobs_path, "blobs/"),
            (&state.storage_path, "storage/"),
            (&state.trash_path, "trash/"),
        ] {
            if !path.exists() {
                return Err(StateError::MissingFile(name.to_string()));
            }
        }

        let mut names: Vec<&str> = state.config.blob_stores.iter().map(|s| s.name.as_str()).collect();
        names.sort_unstable();
        if let Some(pair) = names.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(StateError::DuplicateBlobStore(pair[0].to_string()));
        }

        Ok(state)
    }

    fn paths(depot_dir: PathBuf, config: AppConfig) -> Self {
        Self {
            db_path: depot_dir.join(DB_FILE_NAME),
            blobs_path: depot_dir.join(BLOBS_DIR_NAME),
            storage_path: depot_dir.join(STORAGE_DIR_NAME),
            trash_path: depot_dir.join(TRASH_DIR_NAME),
            config_path: depot_dir.join(CONFIG_FILE_NAME),
            depot_dir,
            config,
        }
    }

    pub async fn database(&self) -> Result<Database, StateError> {
        let url = url::Url::parse(&format!("sqlite://{}", self.db_path.display()))
            .map_err(|e| StateError::InvalidConfig(e.to_string()))?;
        Ok(Database::connect(&url).await?)
    }

    /// Open every configured blob store
    pub async fn blob_stores(&self) -> Result<BlobStoreManager, StateError> {
        let mut manager = BlobStoreManager::new();
        for entry in &self.config.blob_stores {
            let store = self.open_blob_store(entry).await?;
            tracing::debug!(blob_store = %entry.name, "opened blob store");
            manager.register(Arc::new(store));
        }
        Ok(manager)
    }

    /// Open one configured blob store by name, for operations
    ///  that need the concrete store rather than the trait
    pub async fn blob_store(&self, name: &str) -> Result<Option<ObjectBlobStore>, StateError> {
        match self.config.blob_stores.iter().find(|entry| entry.name == name) {
            Some(entry) => Ok(Some(self.open_blob_store(entry).await?)),
            None => Ok(None),
        }
    }

    async fn open_blob_store(&self, entry: &BlobStoreEntry) -> Result<ObjectBlobStore, StateError> {
        let store = match &entry.backend {
            BlobStoreBackend::Filesystem { path } => {
                let dir = path
                    .clone()
                    .unwrap_or_else(|| self.blobs_path.join(&entry.name));
                ObjectBlobStore::new_local(entry.name.clone(), &dir).await?
            }
            BlobStoreBackend::S3 {
                endpoint,
                access_key,
                secret_key,
                bucket,
                region,
            } => {
                let db_path = self.blobs_path.join(format!("{}.db", entry.name));
                let config = ObjectStoreConfig::S3 {
                    endpoint: endpoint.clone(),
                    access_key: access_key.clone(),
                    secret_key: secret_key.clone(),
                    bucket: bucket.clone(),
                    region: region.clone(),
                };
                ObjectBlobStore::new(entry.name.clone(), &db_path, config).await?
            }
            BlobStoreBackend::Memory => ObjectBlobStore::new_ephemeral(entry.name.clone()).await?,
        };
        Ok(store)
    }

    pub fn trash_config(&self) -> TrashConfig {
        TrashConfig {
            default_operation: self.config.delete_operation,
            legacy_trash_dir: Some(self.trash_path.clone()),
        }
    }

    pub fn trash_manager(&self) -> TrashManager {
        TrashManager::with_default_cleaners(
            self.trash_config(),
            Arc::new(FsItemStorage::new(self.storage_path.clone())),
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("depot directory not initialized. Run 'depot init' first")]
    NotInitialized,

    #[error("depot directory already initialized")]
    AlreadyInitialized,

    #[error("no home directory found")]
    NoHomeDirectory,

    #[error("missing required file: {0}")]
    MissingFile(String),

    #[error("blob store configured twice: {0}")]
    DuplicateBlobStore(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("database error: {0}")]
    Database(#[from] DatabaseSetupError),

    #[error("blob store error: {0}")]
    BlobStore(#[from] ObjectBlobStoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("depot");

        let state = AppState::init(Some(root.clone()), None).unwrap();
        assert!(state.blobs_path.exists());
        assert!(state.storage_path.exists());

        let loaded = AppState::load(Some(root.clone())).unwrap();
        assert_eq!(loaded.config, AppConfig::default());
        assert_eq!(loaded.trash_config().legacy_trash_dir, Some(root.join("trash")));

        assert!(matches!(
            AppState::init(Some(root), None),
            Err(StateError::AlreadyInitialized)
        ));
    }

    #[test]
    fn test_load_requires_init() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            AppState::load(Some(dir.path().join("missing"))),
            Err(StateError::NotInitialized)
        ));
    }

    #[test]
    fn test_config_parses_blob_stores() {
        let config: AppConfig = toml::from_str(
            r#"
            delete_operation = "delete_permanently"
            page_size = 25

            [[blob_stores]]
            name = "default"
            type = "filesystem"

            [[blob_stores]]
            name = "scratch"
            type = "memory"
            "#,
        )
        .unwrap();

        assert_eq!(config.delete_operation, DeleteOperation::DeletePermanently);
        assert_eq!(config.page_size, 25);
        assert_eq!(config.progress_interval_secs, 60);
        assert_eq!(config.blob_stores.len(), 2);
        assert_eq!(config.blob_stores[1].backend, BlobStoreBackend::Memory);
    }

    #[test]
    fn test_duplicate_blob_store_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("depot");
        let mut config = AppConfig::default();
        config.blob_stores.push(config.blob_stores[0].clone());
        AppState::init(Some(root.clone()), Some(config)).unwrap();

        assert!(matches!(
            AppState::load(Some(root)),
            Err(StateError::DuplicateBlobStore(name)) if name == "default"
        ));
    }
}
