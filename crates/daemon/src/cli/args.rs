pub use clap::Parser;

use std::path::PathBuf;

use tracing::level_filters::LevelFilter;

#[derive(Parser, Debug)]
#[command(name = "depot")]
#[command(about = "Find and repair drift between repository metadata and blob stores")]
pub struct Args {
    /// Path to the depot config directory (defaults to ~/.depot)
    #[arg(long, global = true)]
    pub config_path: Option<PathBuf>,

    /// Log level written to stderr (RUST_LOG overrides it)
    #[arg(long, global = true, default_value = "info")]
    pub log_level: LevelFilter,

    /// Also write daily rolling log files here
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: crate::Command,
}
