use clap::Args;

use common::trash::DeleteOperation;
use depot_daemon::state::{AppConfig, AppState, StateError};
use depot_daemon::{Services, ServicesError};

#[derive(Args, Debug, Clone)]
pub struct Init {
    /// Delete permanently instead of moving to trash by default
    #[arg(long)]
    pub delete_permanently: bool,

    /// Assets fetched per metadata page
    #[arg(long)]
    pub page_size: Option<usize>,
}

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("state error: {0}")]
    State(#[from] StateError),
    #[error(transparent)]
    Services(#[from] ServicesError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Init {
    type Error = InitError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let mut config = AppConfig::default();
        if self.delete_permanently {
            config.delete_operation = DeleteOperation::DeletePermanently;
        }
        if let Some(page_size) = self.page_size {
            config.page_size = page_size.max(1);
        }

        let state = AppState::init(ctx.config_path.clone(), Some(config))?;
        // first connect creates the schema and the default blob store
        let services = Services::from_state(state).await?;

        let stores = services.blob_stores.names().collect::<Vec<_>>().join(", ");
        Ok(format!(
            "Initialized depot at {}\n  blob stores: {}\n  delete operation: {}",
            services.state.depot_dir.display(),
            stores,
            services.state.config.delete_operation
        ))
    }
}
