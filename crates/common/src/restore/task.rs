use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;

use super::context::{ContextError, RestoreContext};
use super::integrity::{
    DefaultIntegrityCheckStrategy, DeleteAssetHandler, IntegrityCheckStrategy,
    IntegrityFailureHandler,
};
use super::strategy::{RestoreBlobStrategy, StrategyRegistry};
use super::{RestoreError, RestoreMetadataConfig, RestoreSummary, TaskError};
use crate::blob::{BlobId, BlobStore, BlobStoreError, BlobStoreManager, BlobStoreUsageChecker};
use crate::content::{MaintenanceService, MetadataStore, Repository, RepositoryKind};
use crate::task::{check_move_conflicts, dry_run_prefix, CancellationToken, ProgressLogger, TaskRegistry};

#[derive(thiserror::Error, Debug)]
enum BlobFailure {
    #[error(transparent)]
    Context(#[from] ContextError),
    #[error("restore failed: {0}")]
    Restore(#[from] RestoreError),
    #[error("undelete failed: {0}")]
    Undelete(#[from] BlobStoreError),
}

#[derive(Debug, Default)]
struct BlobOutcome {
    undeleted: bool,
    /// No restore strategy is registered for the repository format
    unsupported: bool,
}

/// Rebuilds metadata from blob headers, optionally un-deletes
///  blobs, then verifies the result
pub struct RestoreMetadataTask {
    blob_stores: BlobStoreManager,
    metadata: Arc<dyn MetadataStore>,
    maintenance: Arc<dyn MaintenanceService>,
    registry: Arc<dyn TaskRegistry>,
    restore_strategies: StrategyRegistry<dyn RestoreBlobStrategy>,
    integrity_strategies: StrategyRegistry<dyn IntegrityCheckStrategy>,
    usage_checker: Option<Arc<dyn BlobStoreUsageChecker>>,
    failure_handler: Option<Arc<dyn IntegrityFailureHandler>>,
    cancel: CancellationToken,
    progress_interval: Duration,
}

impl RestoreMetadataTask {
    /// Task with the default integrity strategy as fallback and no
    ///  format restore strategies
    pub fn new(
        blob_stores: BlobStoreManager,
        metadata: Arc<dyn MetadataStore>,
        maintenance: Arc<dyn MaintenanceService>,
        registry: Arc<dyn TaskRegistry>,
    ) -> Self {
        let mut integrity_strategies: StrategyRegistry<dyn IntegrityCheckStrategy> =
            StrategyRegistry::new();
        integrity_strategies.set_default(Arc::new(DefaultIntegrityCheckStrategy::new(
            metadata.clone(),
        )));
        Self {
            blob_stores,
            metadata,
            maintenance,
            registry,
            restore_strategies: StrategyRegistry::new(),
            integrity_strategies,
            usage_checker: None,
            failure_handler: None,
            cancel: CancellationToken::new(),
            progress_interval: ProgressLogger::DEFAULT_INTERVAL,
        }
    }

    pub fn with_restore_strategy(
        mut self,
        format: &str,
        strategy: Arc<dyn RestoreBlobStrategy>,
    ) -> Self {
        self.restore_strategies.register(format, strategy);
        self
    }

    pub fn with_integrity_strategies(
        mut self,
        strategies: StrategyRegistry<dyn IntegrityCheckStrategy>,
    ) -> Self {
        self.integrity_strategies = strategies;
        self
    }

    pub fn with_usage_checker(mut self, checker: Arc<dyn BlobStoreUsageChecker>) -> Self {
        self.usage_checker = Some(checker);
        self
    }

    /// Replace the default delete-the-asset reaction to integrity failures
    pub fn with_failure_handler(mut self, handler: Arc<dyn IntegrityFailureHandler>) -> Self {
        self.failure_handler = Some(handler);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn execute(&self, config: &RestoreMetadataConfig) -> Result<RestoreSummary, TaskError> {
        let blob_store = self
            .blob_stores
            .get(&config.blob_store_name)
            .ok_or_else(|| TaskError::UnknownBlobStore(config.blob_store_name.clone()))?;
        check_move_conflicts(self.registry.as_ref(), &config.blob_store_name).await?;

        let prefix = dry_run_prefix(config.dry_run);
        if config.dry_run {
            tracing::info!("{prefix}Actions will be logged, but no changes will be made.");
        }

        let mut summary = RestoreSummary::default();
        let mut touched: BTreeMap<String, Repository> = BTreeMap::new();

        if config.restore_blobs || config.undelete_blobs {
            self.restore_pass(blob_store.as_ref(), config, &mut summary, &mut touched)
                .await;
        } else {
            tracing::warn!("No repair/restore operations selected");
        }
        if summary.cancelled {
            return Ok(summary);
        }

        if config.restore_blobs && !config.dry_run {
            self.refresh_assets(&touched).await;
        }

        if config.integrity_check {
            self.integrity_pass(blob_store.as_ref(), config, &mut summary)
                .await?;
        } else {
            tracing::warn!("Integrity check operation not selected");
        }

        tracing::info!(
            blob_store = %config.blob_store_name,
            processed = summary.processed,
            undeleted = summary.undeleted,
            unresolved = summary.unresolved,
            unsupported = summary.unsupported,
            failed = summary.failed,
            integrity_failures = summary.integrity_failures,
            cancelled = summary.cancelled,
            "{prefix}restore metadata task finished"
        );
        Ok(summary)
    }

    async fn restore_pass(
        &self,
        blob_store: &dyn BlobStore,
        config: &RestoreMetadataConfig,
        summary: &mut RestoreSummary,
        touched: &mut BTreeMap<String, Repository>,
    ) {
        let prefix = dry_run_prefix(config.dry_run);
        let mut ids = match config.since_days() {
            Some(days) => blob_store.blob_ids_updated_since(days),
            None => blob_store.blob_ids(),
        };
        let mut progress = ProgressLogger::new(self.progress_interval);

        while let Some(next) = ids.next().await {
            if self.cancel.is_cancelled() {
                tracing::info!(
                    "{prefix}Restore metadata task for {} was canceled",
                    blob_store.name()
                );
                summary.cancelled = true;
                break;
            }
            let blob_id = match next {
                Ok(blob_id) => blob_id,
                Err(e) => {
                    tracing::error!(blob_store = blob_store.name(), "failed to enumerate blob: {}", e);
                    summary.failed += 1;
                    continue;
                }
            };

            match self.restore_blob(blob_store, &blob_id, config, touched).await {
                Ok(outcome) => {
                    if outcome.undeleted {
                        summary.undeleted += 1;
                    }
                    if outcome.unsupported {
                        summary.unsupported += 1;
                    }
                }
                Err(BlobFailure::Context(e)) if e.is_unresolved() => {
                    tracing::warn!(blob_id = %blob_id, "{prefix}skipping blob: {}", e);
                    summary.unresolved += 1;
                }
                Err(e) => {
                    tracing::error!(blob_id = %blob_id, "{prefix}error restoring blob: {}", e);
                    summary.failed += 1;
                }
            }
            summary.processed += 1;

            if progress.should_log() {
                tracing::info!(
                    "{prefix}Elapsed time: {}, processed: {}, un-deleted: {}",
                    progress.elapsed_display(),
                    summary.processed,
                    summary.undeleted
                );
            }
        }
        tracing::info!(
            "{prefix}Elapsed time: {}, processed: {}, un-deleted: {}",
            progress.elapsed_display(),
            summary.processed,
            summary.undeleted
        );
    }

    async fn restore_blob(
        &self,
        blob_store: &dyn BlobStore,
        blob_id: &BlobId,
        config: &RestoreMetadataConfig,
        touched: &mut BTreeMap<String, Repository>,
    ) -> Result<BlobOutcome, BlobFailure> {
        let mut outcome = BlobOutcome::default();
        let context = RestoreContext::build(
            blob_store,
            self.metadata.as_ref(),
            &self.restore_strategies,
            blob_id,
        )
        .await?;

        if config.restore_blobs && !context.attributes.deleted {
            match &context.strategy {
                Some(strategy) => {
                    strategy
                        .restore(&context.properties, &context.blob, blob_store, config.dry_run)
                        .await?;
                    if !config.dry_run {
                        touched
                            .entry(context.repository_name.clone())
                            .or_insert_with(|| context.repository.clone());
                    }
                }
                None => {
                    tracing::warn!(
                        blob_id = %blob_id,
                        repository = %context.repository_name,
                        format = %context.repository.format,
                        "no restore strategy for format"
                    );
                    outcome.unsupported = true;
                }
            }
        }

        if config.undelete_blobs {
            outcome.undeleted = blob_store
                .undelete(
                    self.usage_checker.as_deref(),
                    blob_id,
                    &context.attributes,
                    config.dry_run,
                )
                .await?;
        }
        Ok(outcome)
    }

    /// Give each touched repository's strategy one pass after the batch
    async fn refresh_assets(&self, touched: &BTreeMap<String, Repository>) {
        for repository in touched.values() {
            let Some(strategy) = self.restore_strategies.get(&repository.format) else {
                continue;
            };
            if let Err(e) = strategy.after(true, repository).await {
                tracing::error!(repository = %repository.name, "failed to refresh assets: {}", e);
            }
        }
    }

    async fn integrity_pass(
        &self,
        blob_store: &dyn BlobStore,
        config: &RestoreMetadataConfig,
        summary: &mut RestoreSummary,
    ) -> Result<(), TaskError> {
        let handler: Arc<dyn IntegrityFailureHandler> = match &self.failure_handler {
            Some(handler) => handler.clone(),
            None => Arc::new(DeleteAssetHandler::new(
                self.maintenance.clone(),
                config.dry_run,
            )),
        };
        let repositories = self
            .metadata
            .repositories_for_blob_store(blob_store.name())
            .await?;

        for repository in repositories
            .iter()
            .filter(|repo| repo.kind != RepositoryKind::Group && repo.started)
        {
            let strategy = self
                .integrity_strategies
                .get_or_default(&repository.format)
                .ok_or_else(|| TaskError::MissingDefaultStrategy(repository.format.clone()))?;
            let result = strategy
                .check(
                    repository,
                    blob_store,
                    &self.cancel,
                    config.since_days(),
                    handler.as_ref(),
                )
                .await;
            match result {
                Ok(report) => {
                    summary.integrity_failures += report.failed;
                    if report.cancelled {
                        summary.cancelled = true;
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!(
                        repository = %repository.name,
                        "integrity check failed to run: {}",
                        e
                    );
                    summary.failed += 1;
                }
            }
        }
        Ok(())
    }
}
