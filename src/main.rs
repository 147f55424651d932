// src/main.rs

mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Rebuild {
            repo,
            version,
            arch,
            packages,
            common,
            timeout_secs,
            json,
        } => commands::cmd_rebuild(repo, version, arch, packages, common, timeout_secs, json),
        Commands::Store {
            bucket,
            common,
            command,
        } => commands::cmd_store(bucket, common, command),
    }
}
