use clap::{Args, Subcommand};

pub mod create;
pub mod list;

use crate::cli::op::Op;

crate::command_enum! {
    (Create, create::Create),
    (List, list::List),
}

pub type RepositoryCommand = Command;

#[derive(Args, Debug, Clone)]
pub struct Repository {
    #[command(subcommand)]
    pub command: RepositoryCommand,
}

#[async_trait::async_trait]
impl Op for Repository {
    type Error = OpError;
    type Output = OpOutput;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        self.command.execute(ctx).await
    }
}
