use std::path::PathBuf;
use std::sync::Arc;

use common::blob::BlobStoreManager;
use common::content::{ContentMaintenance, MetadataStore, MetadataUsageChecker, Repository};
use common::dead_blobs::DeadBlobFinder;
use common::orphans::OrphanedBlobFinder;
use common::restore::{
    DefaultIntegrityCheckStrategy, IntegrityCheckStrategy, RawRestoreBlobStrategy,
    RestoreMetadataTask, StrategyRegistry, RAW_FORMAT,
};
use common::task::CancellationToken;
use common::trash::TrashManager;

use crate::database::Database;
use crate::state::{AppState, StateError};

#[derive(Debug, thiserror::Error)]
pub enum ServicesError {
    #[error(transparent)]
    State(#[from] StateError),
    #[error("repository not found: {0}")]
    UnknownRepository(String),
    #[error("metadata error: {0}")]
    Content(#[from] common::content::ContentError),
}

/// Everything a command needs, opened from one depot directory
#[derive(Debug, Clone)]
pub struct Services {
    pub state: AppState,
    pub database: Database,
    pub blob_stores: BlobStoreManager,
}

impl Services {
    pub async fn open(custom_path: Option<PathBuf>) -> Result<Self, ServicesError> {
        let state = AppState::load(custom_path)?;
        Self::from_state(state).await
    }

    pub async fn from_state(state: AppState) -> Result<Self, ServicesError> {
        let database = state.database().await?;
        let blob_stores = state.blob_stores().await?;
        tracing::debug!(
            depot_dir = %state.depot_dir.display(),
            blob_stores = blob_stores.names().count(),
            "services ready"
        );
        Ok(Self {
            state,
            database,
            blob_stores,
        })
    }

    pub fn metadata(&self) -> Arc<dyn MetadataStore> {
        Arc::new(self.database.clone())
    }

    pub async fn repository(&self, name: &str) -> Result<Repository, ServicesError> {
        self.database
            .repository(name)
            .await?
            .ok_or_else(|| ServicesError::UnknownRepository(name.to_string()))
    }

    pub fn dead_blob_finder(&self) -> DeadBlobFinder {
        DeadBlobFinder::new(self.blob_stores.clone(), self.metadata())
    }

    pub fn orphan_finder(&self) -> OrphanedBlobFinder {
        OrphanedBlobFinder::new(self.blob_stores.clone(), self.metadata())
            .with_progress_interval(self.state.config.progress_interval())
    }

    /// Restore task with the raw format registered and the default
    ///  integrity strategy sized from the config
    pub fn restore_task(&self, cancel: CancellationToken) -> RestoreMetadataTask {
        let metadata = self.metadata();
        let config = &self.state.config;

        let mut integrity: StrategyRegistry<dyn IntegrityCheckStrategy> = StrategyRegistry::new();
        integrity.set_default(Arc::new(
            DefaultIntegrityCheckStrategy::new(metadata.clone())
                .with_page_size(config.page_size)
                .with_progress_interval(config.progress_interval()),
        ));

        let maintenance = Arc::new(ContentMaintenance::new(
            metadata.clone(),
            self.blob_stores.clone(),
        ));
        RestoreMetadataTask::new(
            self.blob_stores.clone(),
            metadata.clone(),
            maintenance,
            Arc::new(self.database.clone()),
        )
        .with_restore_strategy(RAW_FORMAT, Arc::new(RawRestoreBlobStrategy::new(metadata.clone())))
        .with_integrity_strategies(integrity)
        .with_usage_checker(Arc::new(MetadataUsageChecker::new(metadata)))
        .with_cancellation(cancel)
        .with_progress_interval(config.progress_interval())
    }

    pub fn trash_manager(&self) -> TrashManager {
        self.state.trash_manager()
    }
}
