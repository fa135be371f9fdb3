use clap::Args;

use common::trash::TrashError;
use depot_daemon::state::{AppState, StateError};

#[derive(Args, Debug, Clone)]
pub struct Undelete {
    #[arg(long)]
    pub repository: String,

    /// Original item path, without the trash prefix
    #[arg(long)]
    pub path: String,
}

#[derive(Debug, thiserror::Error)]
pub enum UndeleteError {
    #[error("state error: {0}")]
    State(#[from] StateError),
    #[error("trash error: {0}")]
    Trash(#[from] TrashError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Undelete {
    type Error = UndeleteError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let state = AppState::load(ctx.config_path.clone())?;
        let restored = state
            .trash_manager()
            .undelete(&self.repository, &self.path)
            .await?;

        if restored {
            Ok(format!("Restored {}/{}", self.repository, self.path))
        } else {
            Ok(format!(
                "Nothing restored: {}/{} is not in the trash or the original path is taken",
                self.repository, self.path
            ))
        }
    }
}
