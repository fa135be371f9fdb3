use clap::Args;

use depot_daemon::state::{AppState, StateError, DEFAULT_BLOB_STORE};
use object_store::ObjectBlobStoreError;

/// Rebuild blob attribute rows from the content objects and their
///  mirrored headers, after the attributes database was lost
#[derive(Args, Debug, Clone)]
pub struct Recover {
    #[arg(long, default_value = DEFAULT_BLOB_STORE)]
    pub blob_store: String,
}

#[derive(Debug, thiserror::Error)]
pub enum RecoverError {
    #[error("state error: {0}")]
    State(#[from] StateError),
    #[error("blob store error: {0}")]
    BlobStore(#[from] ObjectBlobStoreError),
    #[error("blob store '{0}' is not configured")]
    UnknownBlobStore(String),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Recover {
    type Error = RecoverError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let state = AppState::load(ctx.config_path.clone())?;
        let store = state
            .blob_store(&self.blob_store)
            .await?
            .ok_or_else(|| RecoverError::UnknownBlobStore(self.blob_store.clone()))?;

        let stats = store.recover_attributes().await?;
        Ok(format!(
            "{}: {} content objects, {} attribute rows added, {} already present, {} errors",
            self.blob_store, stats.found, stats.added, stats.existing, stats.errors
        ))
    }
}
