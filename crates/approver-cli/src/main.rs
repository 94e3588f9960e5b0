mod cli;
mod external;
mod review;
mod validate;

use anyhow::Result;
use approver_core::external::CancellationToken;
use clap::Parser;
use tracing::warn;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use cli::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level_filter = if cli.verbose { "debug" } else { "info" };
    let filter_layer = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level_filter));
    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    // `review` is synchronous; the only thing the tokio runtime buys us here
    // is a place to run the Ctrl-C listener concurrently with it.
    let cancel = CancellationToken::new();
    let watcher_cancel = cancel.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("received Ctrl-C, cancelling in-flight review");
            watcher_cancel.cancel();
        }
    });

    let command = cli.command;
    let result = tokio::task::spawn_blocking(move || match &command {
        Command::Review(args) => review::run(args, &cancel),
        Command::Validate(args) => validate::run(args),
    })
    .await?;

    watcher.abort();
    result
}
