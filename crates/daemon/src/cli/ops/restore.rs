use clap::Args;

use common::restore::{RestoreMetadataConfig, RestoreSummary, TaskError};
use common::task::{TaskInfo, TaskRegistryError};
use depot_daemon::ServicesError;

/// Task type recorded while a restore runs
pub const RESTORE_TYPE_ID: &str = "blobstore.restore-metadata";

#[derive(Args, Debug, Clone)]
pub struct Restore {
    /// Blob store to scan
    #[arg(long)]
    pub blob_store: String,

    /// Recreate assets missing from the metadata store
    #[arg(long)]
    pub restore_blobs: bool,

    /// Undelete soft-deleted blobs that are still referenced
    #[arg(long)]
    pub undelete_blobs: bool,

    /// Verify every asset of the affected repositories afterwards
    #[arg(long)]
    pub integrity_check: bool,

    /// Only blobs touched in the last N days; negative scans everything
    #[arg(long, allow_negative_numbers = true)]
    pub since_days: Option<i64>,

    /// Log what would change without writing
    #[arg(long)]
    pub dry_run: bool,
}

impl Restore {
    fn config(&self) -> RestoreMetadataConfig {
        RestoreMetadataConfig {
            restore_blobs: self.restore_blobs,
            undelete_blobs: self.undelete_blobs,
            integrity_check: self.integrity_check,
            since_days: self.since_days,
            dry_run: self.dry_run,
            ..RestoreMetadataConfig::new(&self.blob_store)
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RestoreOpError {
    #[error(transparent)]
    Services(#[from] ServicesError),
    #[error("task registry error: {0}")]
    Registry(#[from] TaskRegistryError),
    #[error("restore failed: {0}")]
    Task(#[from] TaskError),
}

fn format_summary(summary: &RestoreSummary, dry_run: bool) -> String {
    let mut lines = Vec::new();
    if summary.cancelled {
        lines.push("Restore cancelled before completion".to_string());
    }
    lines.push(format!(
        "{}processed {} blobs: {} undeleted, {} unresolved, {} unsupported, {} failed",
        common::task::dry_run_prefix(dry_run),
        summary.processed,
        summary.undeleted,
        summary.unresolved,
        summary.unsupported,
        summary.failed
    ));
    lines.push(format!("integrity failures: {}", summary.integrity_failures));
    lines.join("\n")
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Restore {
    type Error = RestoreOpError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let services = ctx.services().await?;
        let config = self.config();

        let info = TaskInfo::new(RESTORE_TYPE_ID, &format!("restore {}", self.blob_store))
            .with_param("blobStoreName", &self.blob_store);
        services.database.start_task(&info).await?;

        let result = services
            .restore_task(ctx.cancel.clone())
            .execute(&config)
            .await;

        if let Err(e) = services.database.finish_task(&info.id).await {
            tracing::warn!(task = %info.id, "failed to clear running task record: {}", e);
        }

        Ok(format_summary(&result?, self.dry_run))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_map_onto_config() {
        let op = Restore {
            blob_store: "default".to_string(),
            restore_blobs: true,
            undelete_blobs: false,
            integrity_check: true,
            since_days: Some(-1),
            dry_run: true,
        };
        let config = op.config();
        assert_eq!(config.blob_store_name, "default");
        assert!(config.restore_blobs && config.integrity_check && config.dry_run);
        assert!(!config.undelete_blobs);
        assert_eq!(config.since_days(), None);
    }

    #[test]
    fn test_summary_marks_dry_run_and_cancel() {
        let summary = RestoreSummary {
            processed: 3,
            cancelled: true,
            ..RestoreSummary::default()
        };
        let text = format_summary(&summary, true);
        assert!(text.starts_with("Restore cancelled"));
        assert!(text.contains("[DRY RUN] processed 3 blobs"));
    }
}
