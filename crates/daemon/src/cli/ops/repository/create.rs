use clap::Args;

use common::content::{ContentError, MetadataStore, Repository, RepositoryKind};
use depot_daemon::state::DEFAULT_BLOB_STORE;
use depot_daemon::ServicesError;

#[derive(Args, Debug, Clone)]
pub struct Create {
    /// Repository name
    #[arg(long)]
    pub name: String,

    /// Format used to pick restore and integrity strategies
    #[arg(long, default_value = "raw")]
    pub format: String,

    /// hosted, proxy or group
    #[arg(long, default_value = "hosted")]
    pub kind: RepositoryKind,

    /// Blob store backing the repository (ignored for groups)
    #[arg(long, default_value = DEFAULT_BLOB_STORE)]
    pub blob_store: String,
}

#[derive(Debug, thiserror::Error)]
pub enum CreateError {
    #[error(transparent)]
    Services(#[from] ServicesError),
    #[error("metadata error: {0}")]
    Content(#[from] ContentError),
    #[error("blob store '{0}' is not configured")]
    UnknownBlobStore(String),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Create {
    type Error = CreateError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let services = ctx.services().await?;

        let blob_store_name = match self.kind {
            RepositoryKind::Group => None,
            _ => {
                if services.blob_stores.get(&self.blob_store).is_none() {
                    return Err(CreateError::UnknownBlobStore(self.blob_store.clone()));
                }
                Some(self.blob_store.clone())
            }
        };

        let repository = Repository {
            name: self.name.clone(),
            format: self.format.clone(),
            kind: self.kind,
            blob_store_name,
            started: true,
        };
        services.database.save_repository(repository).await?;

        Ok(format!("Saved repository {} ({} {})", self.name, self.format, self.kind))
    }
}
