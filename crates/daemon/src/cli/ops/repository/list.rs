use clap::Args;

use common::content::{ContentError, MetadataStore};
use depot_daemon::ServicesError;

#[derive(Args, Debug, Clone)]
pub struct List;

#[derive(Debug, thiserror::Error)]
pub enum ListError {
    #[error(transparent)]
    Services(#[from] ServicesError),
    #[error("metadata error: {0}")]
    Content(#[from] ContentError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for List {
    type Error = ListError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let services = ctx.services().await?;
        let repositories = services.database.repositories().await?;

        if repositories.is_empty() {
            return Ok("No repositories found".to_string());
        }

        let output = repositories
            .iter()
            .map(|repo| {
                format!(
                    "{} ({} {}) [{}]",
                    repo.name,
                    repo.format,
                    repo.kind,
                    repo.blob_store_name.as_deref().unwrap_or("-")
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        Ok(output)
    }
}
