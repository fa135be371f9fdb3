use std::fmt::Display;
use std::sync::Arc;

use futures::StreamExt;
use serde::Serialize;

use crate::blob::{BlobStore, BlobStoreError, BlobStoreManager};
use crate::content::{Asset, ContentError, MetadataStore, Repository};

pub const DEFAULT_PAGE_SIZE: usize = 100;

#[derive(thiserror::Error, Debug)]
pub enum DeadBlobError {
    #[error("content error: {0}")]
    Content(#[from] ContentError),
}

/// Terminal classification of one inspected asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultState {
    Ok,
    /// No blob ref, or the referenced blob does not exist
    MissingBlobRef,
    /// Attributes exist but the bytes cannot be read
    UnavailableBlob,
    Sha1Disagreement,
    /// Blob removed between listing and re-check
    Deleted,
    /// Asset removed between listing and re-check
    AssetDeleted,
}

impl Display for ResultState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ResultState::Ok => "OK",
            ResultState::MissingBlobRef => "MISSING_BLOB_REF",
            ResultState::UnavailableBlob => "UNAVAILABLE_BLOB",
            ResultState::Sha1Disagreement => "SHA1_DISAGREEMENT",
            ResultState::Deleted => "DELETED",
            ResultState::AssetDeleted => "ASSET_DELETED",
        };
        f.write_str(s)
    }
}

/// A reported problem. `asset` is `None` when the asset was
///  deleted while the scan was running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeadBlobResult {
    pub repository: String,
    pub asset: Option<Asset>,
    pub state: ResultState,
    pub error: String,
}

impl DeadBlobResult {
    pub fn path(&self) -> Option<&str> {
        self.asset.as_ref().map(|a| a.path.as_str())
    }
}

type Failure = (ResultState, String);

/// Forward consistency check: does every asset's blob exist,
///  read, and hash the way the asset says it does.
#[derive(Debug, Clone)]
pub struct DeadBlobFinder {
    blob_stores: BlobStoreManager,
    metadata: Arc<dyn MetadataStore>,
}

impl DeadBlobFinder {
    pub fn new(blob_stores: BlobStoreManager, metadata: Arc<dyn MetadataStore>) -> Self {
        Self {
            blob_stores,
            metadata,
        }
    }

    /// Collect every problem found in a repository. Healthy
    ///  assets produce no result.
    pub async fn find(
        &self,
        repository: &Repository,
        ignore_missing_blob_ref: bool,
    ) -> Result<Vec<DeadBlobResult>, DeadBlobError> {
        let mut results = Vec::new();
        self.find_and_process_batch(
            repository,
            ignore_missing_blob_ref,
            DEFAULT_PAGE_SIZE,
            |result| results.push(result),
        )
        .await?;
        Ok(results)
    }

    /// Page through a repository's assets, handing each problem to
    ///  `consumer` as it is found. Returns the number of assets inspected.
    pub async fn find_and_process_batch<F>(
        &self,
        repository: &Repository,
        ignore_missing_blob_ref: bool,
        page_size: usize,
        mut consumer: F,
    ) -> Result<usize, DeadBlobError>
    where
        F: FnMut(DeadBlobResult) + Send,
    {
        if repository.blob_store_name.is_none() {
            tracing::debug!(repository = %repository.name, "repository has no content, nothing to check");
            return Ok(0);
        }

        let page_size = page_size.max(1);
        let mut inspected = 0;
        let mut reported = 0;
        let mut token: Option<String> = None;
        loop {
            let page = self
                .metadata
                .browse_assets(&repository.name, page_size, token.as_deref())
                .await?;
            for asset in &page.items {
                inspected += 1;
                if let Some(result) = self
                    .check_asset(repository, asset, ignore_missing_blob_ref)
                    .await
                {
                    tracing::debug!(
                        repository = %repository.name,
                        path = ?result.path(),
                        state = %result.state,
                        "{}",
                        result.error
                    );
                    reported += 1;
                    consumer(result);
                }
            }
            match page.next_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        tracing::info!(
            repository = %repository.name,
            inspected,
            reported,
            "dead blob scan complete"
        );
        Ok(inspected)
    }

    /// Inspect, and on a suspect result reload the asset and
    ///  inspect again so only persistent failures are reported
    async fn check_asset(
        &self,
        repository: &Repository,
        asset: &Asset,
        ignore_missing_blob_ref: bool,
    ) -> Option<DeadBlobResult> {
        let first = self.inspect(asset, ignore_missing_blob_ref).await?;

        let reloaded = match self.metadata.find_asset(&repository.name, &asset.path).await {
            Ok(reloaded) => reloaded,
            Err(e) => {
                tracing::warn!(
                    repository = %repository.name,
                    path = %asset.path,
                    "failed to reload asset for re-check: {}",
                    e
                );
                return Some(self.result(repository, Some(asset.clone()), first));
            }
        };
        let Some(reloaded) = reloaded else {
            return Some(self.result(
                repository,
                None,
                (
                    ResultState::AssetDeleted,
                    format!("Asset {} was deleted during inspection", asset.path),
                ),
            ));
        };
        let failure = self.inspect(&reloaded, ignore_missing_blob_ref).await?;
        Some(self.result(repository, Some(reloaded), failure))
    }

    fn result(
        &self,
        repository: &Repository,
        asset: Option<Asset>,
        (state, error): Failure,
    ) -> DeadBlobResult {
        DeadBlobResult {
            repository: repository.name.clone(),
            asset,
            state,
            error,
        }
    }

    async fn inspect(&self, asset: &Asset, ignore_missing_blob_ref: bool) -> Option<Failure> {
        let Some(blob_ref) = &asset.blob_ref else {
            if ignore_missing_blob_ref {
                return None;
            }
            return Some((
                ResultState::MissingBlobRef,
                "Blob not found.".to_string(),
            ));
        };

        let Some(store) = self.blob_stores.get(&blob_ref.store) else {
            return Some((
                ResultState::UnavailableBlob,
                format!("Blob store '{}' is not configured", blob_ref.store),
            ));
        };

        let attributes = match store.attributes(&blob_ref.blob_id).await {
            Ok(Some(attributes)) => attributes,
            Ok(None) => return Some((ResultState::MissingBlobRef, "Blob not found.".to_string())),
            Err(e) => return Some(classify(e)),
        };
        if attributes.deleted {
            return Some((
                ResultState::Deleted,
                format!(
                    "Blob is marked deleted: {}",
                    attributes.deleted_reason.as_deref().unwrap_or("no reason recorded")
                ),
            ));
        }

        // zero length blobs legitimately have nothing to read
        if attributes.metrics.content_size > 0 {
            if let Some(failure) = check_content_readable(store.as_ref(), asset).await {
                return Some(failure);
            }
        }

        let blob_sha1 = attributes.metrics.sha1.as_deref();
        let asset_sha1 = asset.sha1();
        if blob_sha1 != asset_sha1 {
            return Some((
                ResultState::Sha1Disagreement,
                format!(
                    "Blob sha1 {} does not match asset sha1 {}",
                    blob_sha1.unwrap_or("<none>"),
                    asset_sha1.unwrap_or("<none>")
                ),
            ));
        }
        None
    }
}

fn classify(e: BlobStoreError) -> Failure {
    match e {
        BlobStoreError::Deleted(_) | BlobStoreError::NotFound(_) => {
            (ResultState::Deleted, "Blob has been deleted".to_string())
        }
        other => (
            ResultState::UnavailableBlob,
            format!("Blob content is unavailable: {other}"),
        ),
    }
}

/// Read until the first non-empty chunk
async fn check_content_readable(store: &dyn BlobStore, asset: &Asset) -> Option<Failure> {
    let blob_ref = asset.blob_ref.as_ref()?;
    let mut stream = match store.open(&blob_ref.blob_id).await {
        Ok(stream) => stream,
        Err(e) => return Some(classify(e)),
    };
    loop {
        match stream.next().await {
            Some(Ok(chunk)) if chunk.is_empty() => continue,
            Some(Ok(_)) => return None,
            Some(Err(e)) => return Some(classify(e)),
            None => {
                return Some((
                    ResultState::UnavailableBlob,
                    "Blob content is unavailable (0 bytes available)".to_string(),
                ))
            }
        }
    }
}
