use std::error::Error;
use std::path::PathBuf;

use common::task::CancellationToken;
use depot_daemon::{Services, ServicesError};

#[derive(Clone)]
pub struct OpContext {
    /// Optional custom config path (defaults to ~/.depot)
    pub config_path: Option<PathBuf>,
    /// Cancelled on SIGINT/SIGTERM
    pub cancel: CancellationToken,
}

impl OpContext {
    pub fn new(config_path: Option<PathBuf>, cancel: CancellationToken) -> Self {
        Self {
            config_path,
            cancel,
        }
    }

    /// Open the database and blob stores of the configured depot
    pub async fn services(&self) -> Result<Services, ServicesError> {
        Services::open(self.config_path.clone()).await
    }
}

#[async_trait::async_trait]
pub trait Op: Send + Sync {
    type Error: Error + Send + Sync + 'static;
    type Output;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error>;
}

#[macro_export]
macro_rules! command_enum {
    ($(($variant:ident, $type:ty)),* $(,)?) => {
        #[derive(Subcommand, Debug, Clone)]
        pub enum Command {
            $($variant($type),)*
        }

        #[derive(Debug)]
        pub enum OpOutput {
            $($variant(<$type as $crate::cli::op::Op>::Output),)*
        }

        #[derive(Debug, thiserror::Error)]
        pub enum OpError {
            $(
                #[error(transparent)]
                $variant(<$type as $crate::cli::op::Op>::Error),
            )*
        }

        #[async_trait::async_trait]
        impl $crate::cli::op::Op for Command {
            type Output = OpOutput;
            type Error = OpError;

            async fn execute(&self, ctx: &$crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
                match self {
                    $(
                        Command::$variant(op) => {
                            op.execute(ctx).await
                                .map(OpOutput::$variant)
                                .map_err(OpError::$variant)
                        },
                    )*
                }
            }
        }

        impl std::fmt::Display for OpOutput {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $(
                        OpOutput::$variant(output) => write!(f, "{}", output),
                    )*
                }
            }
        }
    };
}
