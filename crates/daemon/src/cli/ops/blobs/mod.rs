use clap::{Args, Subcommand};

pub mod recover;

use crate::cli::op::Op;

crate::command_enum! {
    (Recover, recover::Recover),
}

pub type BlobsCommand = Command;

#[derive(Args, Debug, Clone)]
pub struct Blobs {
    #[command(subcommand)]
    pub command: BlobsCommand,
}

#[async_trait::async_trait]
impl Op for Blobs {
    type Error = OpError;
    type Output = OpOutput;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        self.command.execute(ctx).await
    }
}
