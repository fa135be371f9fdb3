use clap::Args;

use common::orphans::{OrphanCollector, OrphanError};
use depot_daemon::ServicesError;

#[derive(Args, Debug, Clone)]
pub struct Detect {
    /// Repository whose blob store is scanned
    #[arg(long)]
    pub repository: String,
}

#[derive(Debug, thiserror::Error)]
pub enum DetectError {
    #[error(transparent)]
    Services(#[from] ServicesError),
    #[error("orphan scan failed: {0}")]
    Scan(#[from] OrphanError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Detect {
    type Error = DetectError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let services = ctx.services().await?;
        let repository = services.repository(&self.repository).await?;

        let collector = OrphanCollector::new();
        let stats = services
            .orphan_finder()
            .detect(&repository, &collector)
            .await?;

        let mut lines: Vec<String> = collector
            .into_inner()
            .iter()
            .map(|orphan| {
                format!(
                    "{}:{} {} ({})",
                    orphan.blob_store, orphan.blob_id, orphan.blob_name, orphan.reason
                )
            })
            .collect();
        lines.push(format!(
            "Scanned {} blobs, {} orphaned, {} errors",
            stats.scanned, stats.orphans, stats.errors
        ));
        Ok(lines.join("\n"))
    }
}
