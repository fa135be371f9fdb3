mod cli;

use clap::{Parser, Subcommand};
use cli::{args::Args, op::Op, Blobs, DeadBlobs, Init, Orphans, Repository, Restore, Trash, Version};
use common::task::CancellationToken;
use depot_daemon::process::{cancel_on_shutdown_signal, init_logging, LogConfig};

command_enum! {
    (Init, Init),
    (Version, Version),
    (Repository, Repository),
    (DeadBlobs, DeadBlobs),
    (Orphans, Orphans),
    (Restore, Restore),
    (Trash, Trash),
    (Blobs, Blobs),
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let log_config = LogConfig {
        log_level: args.log_level,
        log_dir: args.log_dir.clone(),
    };
    // dropping the guards flushes the writers
    let guards = init_logging(&log_config);

    let cancel = CancellationToken::new();
    let signals = cancel_on_shutdown_signal(cancel.clone());
    let ctx = cli::op::OpContext::new(args.config_path, cancel.clone());

    let code = match args.command.execute(&ctx).await {
        Ok(output) => {
            println!("{}", output);
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    };

    cancel.cancel();
    let _ = signals.await;
    drop(guards);
    std::process::exit(code);
}
