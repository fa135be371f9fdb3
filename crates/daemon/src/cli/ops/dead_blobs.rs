use clap::Args;

use common::dead_blobs::{DeadBlobError, DeadBlobResult};
use depot_daemon::ServicesError;

#[derive(Args, Debug, Clone)]
pub struct DeadBlobs {
    /// Repository to scan
    #[arg(long)]
    pub repository: String,

    /// Do not report assets that never had a blob
    #[arg(long)]
    pub ignore_missing_blob_ref: bool,

    /// Assets fetched per metadata page (defaults to the configured page size)
    #[arg(long)]
    pub page_size: Option<usize>,
}

#[derive(Debug, thiserror::Error)]
pub enum DeadBlobsError {
    #[error(transparent)]
    Services(#[from] ServicesError),
    #[error("dead blob scan failed: {0}")]
    Scan(#[from] DeadBlobError),
}

fn format_result(result: &DeadBlobResult) -> String {
    format!(
        "{} {} [{}] {}",
        result.repository,
        result.path().unwrap_or("<deleted>"),
        result.state,
        result.error
    )
}

#[async_trait::async_trait]
impl crate::cli::op::Op for DeadBlobs {
    type Error = DeadBlobsError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let services = ctx.services().await?;
        let repository = services.repository(&self.repository).await?;
        let page_size = self.page_size.unwrap_or(services.state.config.page_size);

        let mut lines = Vec::new();
        let inspected = services
            .dead_blob_finder()
            .find_and_process_batch(
                &repository,
                self.ignore_missing_blob_ref,
                page_size,
                |result| lines.push(format_result(&result)),
            )
            .await?;

        if lines.is_empty() {
            return Ok(format!(
                "Inspected {} assets in {}, no dead blobs found",
                inspected, repository.name
            ));
        }
        lines.push(format!(
            "Inspected {} assets in {}, {} problems",
            inspected,
            repository.name,
            lines.len()
        ));
        Ok(lines.join("\n"))
    }
}
