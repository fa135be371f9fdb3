use clap::{Args, Subcommand};

pub mod delete;
pub mod detect;

use crate::cli::op::Op;

crate::command_enum! {
    (Detect, detect::Detect),
    (Delete, delete::Delete),
}

pub type OrphansCommand = Command;

#[derive(Args, Debug, Clone)]
pub struct Orphans {
    #[command(subcommand)]
    pub command: OrphansCommand,
}

#[async_trait::async_trait]
impl Op for Orphans {
    type Error = OpError;
    type Output = OpOutput;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        self.command.execute(ctx).await
    }
}
