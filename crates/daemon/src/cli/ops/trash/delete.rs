use clap::Args;

use common::trash::{DeleteOperation, DeleteRequest, TrashError};
use depot_daemon::state::{AppState, StateError};

#[derive(Args, Debug, Clone)]
pub struct Delete {
    #[arg(long)]
    pub repository: String,

    /// Item path inside the repository storage
    #[arg(long)]
    pub path: String,

    /// Skip the trash regardless of the configured default
    #[arg(long)]
    pub permanently: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum DeleteError {
    #[error("state error: {0}")]
    State(#[from] StateError),
    #[error("trash error: {0}")]
    Trash(#[from] TrashError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Delete {
    type Error = DeleteError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let state = AppState::load(ctx.config_path.clone())?;
        let trash = state.trash_manager();

        let request = if self.permanently {
            DeleteRequest::with_operation(DeleteOperation::DeletePermanently)
        } else {
            DeleteRequest::default()
        };
        trash.delete(&self.repository, &self.path, &request).await?;

        Ok(format!(
            "{} {}/{}",
            trash.effective_operation(&request),
            self.repository,
            self.path
        ))
    }
}
