use std::time::Duration;

use clap::Args;

use common::trash::{PurgeAge, TrashError};
use depot_daemon::state::{AppState, StateError};

const SECS_PER_DAY: u64 = 24 * 60 * 60;

#[derive(Args, Debug, Clone)]
pub struct Purge {
    /// Limit to one repository; every repository and the shared trash otherwise
    #[arg(long)]
    pub repository: Option<String>,

    /// Only purge items untouched for this many days
    #[arg(long)]
    pub older_than_days: Option<u64>,
}

impl Purge {
    fn age(&self) -> PurgeAge {
        match self.older_than_days {
            Some(days) => PurgeAge::OlderThan(Duration::from_secs(days.saturating_mul(SECS_PER_DAY))),
            None => PurgeAge::All,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PurgeError {
    #[error("state error: {0}")]
    State(#[from] StateError),
    #[error("trash error: {0}")]
    Trash(#[from] TrashError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Purge {
    type Error = PurgeError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let state = AppState::load(ctx.config_path.clone())?;
        let trash = state.trash_manager();

        let stats = match &self.repository {
            Some(repository) => trash.purge(repository, self.age()).await?,
            None => trash.purge_all(self.age()).await?,
        };
        Ok(format!(
            "Purged {} files and {} directories",
            stats.files_deleted, stats.dirs_deleted
        ))
    }
}
