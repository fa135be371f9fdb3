use clap::{Args, Subcommand};

pub mod delete;
pub mod purge;
pub mod undelete;

use crate::cli::op::Op;

crate::command_enum! {
    (Delete, delete::Delete),
    (Undelete, undelete::Undelete),
    (Purge, purge::Purge),
}

pub type TrashCommand = Command;

#[derive(Args, Debug, Clone)]
pub struct Trash {
    #[command(subcommand)]
    pub command: TrashCommand,
}

#[async_trait::async_trait]
impl Op for Trash {
    type Error = OpError;
    type Output = OpOutput;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        self.command.execute(ctx).await
    }
}
