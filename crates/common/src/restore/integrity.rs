use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;

use crate::blob::{BlobAttributes, BlobStore};
use crate::content::{
    names_match, Asset, ContentError, MaintenanceService, MetadataStore, Repository,
};
use crate::dead_blobs::DEFAULT_PAGE_SIZE;
use crate::task::{dry_run_prefix, CancellationToken, ProgressLogger};

/// Why an asset failed its integrity check
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum IntegrityError {
    #[error("error accessing blob: {0}")]
    ErrorAccessingBlob(String),
    #[error("properties missing")]
    PropertiesMissing,
    #[error("marked deleted, will be purged on compaction")]
    MarkedDeleted,
    #[error("data missing")]
    DataMissing,
    #[error("asset sha1 missing")]
    AssetSha1Missing,
    #[error("asset name missing")]
    AssetNameMissing,
    #[error("blob name missing")]
    BlobNameMissing,
    #[error("blob metrics missing sha1")]
    BlobMetricsMissingSha1,
    #[error("name mismatch: asset {asset}, blob {blob}")]
    NameMismatch { asset: String, blob: String },
    #[error("sha1 mismatch: asset {asset}, blob {blob}")]
    Sha1Mismatch { asset: String, blob: String },
    #[error("error processing asset: {0}")]
    Processing(String),
}

#[derive(thiserror::Error, Debug)]
pub enum IntegrityCheckError {
    #[error("content error: {0}")]
    Content(#[from] ContentError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntegrityReport {
    pub checked: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: bool,
}

/// Invoked once per asset that fails its check
#[async_trait]
pub trait IntegrityFailureHandler: Send + Sync {
    async fn on_failure(&self, repository: &Repository, asset: &Asset, reason: &IntegrityError);
}

/// Removes failing assets through the maintenance service
#[derive(Clone)]
pub struct DeleteAssetHandler {
    maintenance: Arc<dyn MaintenanceService>,
    dry_run: bool,
}

impl DeleteAssetHandler {
    pub fn new(maintenance: Arc<dyn MaintenanceService>, dry_run: bool) -> Self {
        Self {
            maintenance,
            dry_run,
        }
    }
}

#[async_trait]
impl IntegrityFailureHandler for DeleteAssetHandler {
    async fn on_failure(&self, repository: &Repository, asset: &Asset, reason: &IntegrityError) {
        tracing::info!(
            repository = %repository.name,
            path = %asset.path,
            %reason,
            "{}Removing asset, blob integrity check failed",
            dry_run_prefix(self.dry_run)
        );
        if self.dry_run {
            return;
        }
        if let Err(e) = self.maintenance.delete_asset(repository, asset).await {
            tracing::error!(
                repository = %repository.name,
                path = %asset.path,
                "failed to remove asset: {}",
                e
            );
        }
    }
}

/// Per format verification that assets and blobs agree
#[async_trait]
pub trait IntegrityCheckStrategy: Send + Sync {
    /// Check every asset of `repository`, handing failures to `handler`.
    ///  Only assets whose blob was created in the last `since_days`
    ///  days are checked when it is set.
    async fn check(
        &self,
        repository: &Repository,
        blob_store: &dyn BlobStore,
        cancel: &CancellationToken,
        since_days: Option<u32>,
        handler: &dyn IntegrityFailureHandler,
    ) -> Result<IntegrityReport, IntegrityCheckError>;
}

#[derive(Debug, Clone)]
pub struct DefaultIntegrityCheckStrategy {
    metadata: Arc<dyn MetadataStore>,
    page_size: usize,
    progress_interval: Duration,
}

impl DefaultIntegrityCheckStrategy {
    pub fn new(metadata: Arc<dyn MetadataStore>) -> Self {
        Self {
            metadata,
            page_size: DEFAULT_PAGE_SIZE,
            progress_interval: ProgressLogger::DEFAULT_INTERVAL,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    async fn check_asset(
        &self,
        asset: &Asset,
        blob_store: &dyn BlobStore,
    ) -> Result<(), IntegrityError> {
        let blob_ref = asset
            .blob_ref
            .as_ref()
            .ok_or_else(|| IntegrityError::ErrorAccessingBlob("no blob reference".to_string()))?;
        if blob_ref.store != blob_store.name() {
            return Err(IntegrityError::Processing(format!(
                "blob ref {} is not in blob store {}",
                blob_ref,
                blob_store.name()
            )));
        }

        let attributes = blob_store
            .attributes(&blob_ref.blob_id)
            .await
            .map_err(|e| IntegrityError::ErrorAccessingBlob(e.to_string()))?
            .ok_or(IntegrityError::PropertiesMissing)?;
        if attributes.deleted {
            return Err(IntegrityError::MarkedDeleted);
        }

        let mut stream = blob_store
            .open(&blob_ref.blob_id)
            .await
            .map_err(|_| IntegrityError::DataMissing)?;
        if let Some(Err(_)) = stream.next().await {
            return Err(IntegrityError::DataMissing);
        }
        drop(stream);

        verify_metadata(asset, &attributes)
    }
}

/// Compare the asset's recorded checksum and name with the blob's
fn verify_metadata(asset: &Asset, attributes: &BlobAttributes) -> Result<(), IntegrityError> {
    let asset_sha1 = asset.sha1().ok_or(IntegrityError::AssetSha1Missing)?;
    if asset.path.is_empty() {
        return Err(IntegrityError::AssetNameMissing);
    }
    let blob_sha1 = attributes
        .metrics
        .sha1
        .as_deref()
        .ok_or(IntegrityError::BlobMetricsMissingSha1)?;
    let blob_name = attributes.blob_name().ok_or(IntegrityError::BlobNameMissing)?;

    if asset_sha1 != blob_sha1 {
        return Err(IntegrityError::Sha1Mismatch {
            asset: asset_sha1.to_string(),
            blob: blob_sha1.to_string(),
        });
    }
    if !names_match(&asset.path, blob_name) {
        return Err(IntegrityError::NameMismatch {
            asset: asset.path.clone(),
            blob: blob_name.to_string(),
        });
    }
    Ok(())
}

#[async_trait]
impl IntegrityCheckStrategy for DefaultIntegrityCheckStrategy {
    async fn check(
        &self,
        repository: &Repository,
        blob_store: &dyn BlobStore,
        cancel: &CancellationToken,
        since_days: Option<u32>,
        handler: &dyn IntegrityFailureHandler,
    ) -> Result<IntegrityReport, IntegrityCheckError> {
        tracing::info!(
            repository = %repository.name,
            blob_store = blob_store.name(),
            "checking integrity of assets"
        );
        let cutoff = since_days
            .and_then(crate::blob::days_ago)
            .map(|since| since.date_naive());

        let mut report = IntegrityReport::default();
        let mut progress = ProgressLogger::new(self.progress_interval);
        let mut token: Option<String> = None;
        loop {
            let page = self
                .metadata
                .browse_assets(&repository.name, self.page_size, token.as_deref())
                .await?;
            for asset in &page.items {
                if cancel.is_cancelled() {
                    tracing::warn!(repository = %repository.name, "cancelling blob integrity check");
                    report.cancelled = true;
                    return Ok(report);
                }
                let too_old = match (cutoff, asset.blob_created) {
                    (Some(cutoff), Some(created)) => created.date_naive() < cutoff,
                    _ => false,
                };
                if too_old {
                    report.skipped += 1;
                    continue;
                }

                report.checked += 1;
                if let Err(reason) = self.check_asset(asset, blob_store).await {
                    report.failed += 1;
                    tracing::warn!(
                        repository = %repository.name,
                        path = %asset.path,
                        "integrity check failed: {}",
                        reason
                    );
                    handler.on_failure(repository, asset, &reason).await;
                }

                if progress.should_log() {
                    tracing::info!(
                        repository = %repository.name,
                        elapsed = %progress.elapsed_display(),
                        checked = report.checked,
                        failed = report.failed,
                        "integrity check in progress"
                    );
                }
            }
            match page.next_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        tracing::info!(
            repository = %repository.name,
            elapsed = %progress.elapsed_display(),
            checked = report.checked,
            failed = report.failed,
            skipped = report.skipped,
            "integrity check complete"
        );
        Ok(report)
    }
}
