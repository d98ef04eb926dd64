//! Verde CLI - Report city incidents from the terminal
//!
//! Reports are saved locally when the API is unreachable and sent later.

mod cli;
mod commands;
mod error;

#[cfg(test)]
mod tests;

use clap::Parser;

use crate::cli::{Cli, Commands};
use crate::commands::categories::run_categories;
use crate::commands::common::CliContext;
use crate::commands::config::run_config;
use crate::commands::drain::run_drain;
use crate::commands::pending::{run_pending, run_rejected, run_requeue};
use crate::commands::submit::{run_submit, SubmitArgs};
use crate::commands::watch::run_watch;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("verde=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    let ctx = CliContext::resolve(cli.config, cli.db_path, cli.offline)?;

    match cli.command {
        Commands::Submit {
            category,
            subcategory,
            description,
            address,
            location,
            photos,
            videos,
        } => {
            let args = SubmitArgs {
                category,
                subcategory,
                description,
                address,
                location,
                photos,
                videos,
            };
            run_submit(args, &ctx).await?;
        }
        Commands::Pending { json } => run_pending(json, &ctx).await?,
        Commands::Rejected { json } => run_rejected(json, &ctx).await?,
        Commands::Requeue { key } => run_requeue(&key, &ctx).await?,
        Commands::Drain => run_drain(&ctx).await?,
        Commands::Watch { mine } => run_watch(mine, &ctx).await?,
        Commands::Categories { json, refresh } => run_categories(json, refresh, &ctx).await?,
        Commands::Config { command } => run_config(command, &ctx)?,
    }

    Ok(())
}
