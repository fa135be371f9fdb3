use clap::Args;

use common::orphans::OrphanError;
use depot_daemon::ServicesError;

#[derive(Args, Debug, Clone)]
pub struct Delete {
    /// Limit to one repository; every blob store is swept when omitted
    #[arg(long)]
    pub repository: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum DeleteError {
    #[error(transparent)]
    Services(#[from] ServicesError),
    #[error("orphan delete failed: {0}")]
    Delete(#[from] OrphanError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Delete {
    type Error = DeleteError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let services = ctx.services().await?;
        let finder = services.orphan_finder();

        if let Some(name) = &self.repository {
            let repository = services.repository(name).await?;
            let stats = finder.delete(&repository).await?;
            return Ok(format!(
                "Deleted {} orphaned blobs from {} ({} scanned, {} errors)",
                stats.orphans, repository.name, stats.scanned, stats.errors
            ));
        }

        let results = finder.delete_all().await;
        if results.is_empty() {
            return Ok("No blob stores configured".to_string());
        }
        let output = results
            .iter()
            .map(|(store, stats)| {
                format!(
                    "{}: deleted {} orphaned blobs ({} scanned, {} errors)",
                    store, stats.orphans, stats.scanned, stats.errors
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        Ok(output)
    }
}
