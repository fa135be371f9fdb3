use serde::{Deserialize, Serialize};

use crate::blob::BlobStoreError;
use crate::content::ContentError;
use crate::task::TaskConflictError;

mod context;
mod integrity;
mod strategy;
mod task;

pub use context::{ContextError, RestoreContext};
pub use integrity::{
    DefaultIntegrityCheckStrategy, DeleteAssetHandler, IntegrityCheckError, IntegrityCheckStrategy,
    IntegrityError, IntegrityFailureHandler, IntegrityReport,
};
pub use strategy::{RawRestoreBlobStrategy, RestoreBlobStrategy, StrategyRegistry, RAW_FORMAT};
pub use task::RestoreMetadataTask;

/// Errors a format strategy can raise for a single blob
#[derive(thiserror::Error, Debug)]
pub enum RestoreError {
    #[error("invalid blob: {0}")]
    InvalidBlob(String),
    #[error("blob store error: {0}")]
    BlobStore(#[from] BlobStoreError),
    #[error("content error: {0}")]
    Content(#[from] ContentError),
}

/// Errors that stop the whole task
#[derive(thiserror::Error, Debug)]
pub enum TaskError {
    #[error(transparent)]
    Conflict(#[from] TaskConflictError),
    #[error("blob store '{0}' is not configured")]
    UnknownBlobStore(String),
    #[error("no integrity check strategy for format '{0}' and no default configured")]
    MissingDefaultStrategy(String),
    #[error("content error: {0}")]
    Content(#[from] ContentError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreMetadataConfig {
    pub blob_store_name: String,
    pub restore_blobs: bool,
    pub undelete_blobs: bool,
    pub integrity_check: bool,
    /// Limit to blobs touched in the last N days; negative or
    ///  absent scans everything
    pub since_days: Option<i64>,
    pub dry_run: bool,
}

impl RestoreMetadataConfig {
    pub fn new(blob_store_name: &str) -> Self {
        Self {
            blob_store_name: blob_store_name.to_string(),
            restore_blobs: false,
            undelete_blobs: false,
            integrity_check: false,
            since_days: None,
            dry_run: false,
        }
    }

    pub fn since_days(&self) -> Option<u32> {
        self.since_days
            .filter(|days| *days >= 0)
            .map(|days| u32::try_from(days).unwrap_or(u32::MAX))
    }
}

/// Counters reported when the task finishes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RestoreSummary {
    pub processed: usize,
    pub undeleted: usize,
    /// Blobs skipped because a context link did not resolve
    pub unresolved: usize,
    /// Blobs whose repository format has no restore strategy
    pub unsupported: usize,
    pub failed: usize,
    pub integrity_failures: usize,
    pub cancelled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_since_days_negative_means_full_scan() {
        let mut config = RestoreMetadataConfig::new("default");
        assert_eq!(config.since_days(), None);
        config.since_days = Some(-1);
        assert_eq!(config.since_days(), None);
        config.since_days = Some(0);
        assert_eq!(config.since_days(), Some(0));
        config.since_days = Some(7);
        assert_eq!(config.since_days(), Some(7));
    }
}
