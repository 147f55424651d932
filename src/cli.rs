// src/cli.rs
//! CLI definitions for pkgrelay
//!
//! This module contains all command-line interface definitions using clap.
//! The actual command implementations are in the `commands` module.

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "pkgrelay")]
#[command(version)]
#[command(about = "Rebuild, sign and republish package repositories in object storage", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Merge new packages into every remote repository of a definition
    Rebuild {
        /// Repository definition name
        repo: String,

        /// Release version of the packages (e.g. 4.2.1, 4.3.0-rc1)
        #[arg(short, long)]
        version: String,

        /// Build architecture
        #[arg(short, long)]
        arch: String,

        /// Package files or glob patterns
        #[arg(required = true)]
        packages: Vec<String>,

        #[command(flatten)]
        common: CommonArgs,

        /// Give up on transfers after this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Print the final job status as JSON
        #[arg(long)]
        json: bool,
    },

    /// Direct bucket operations
    Store {
        /// Bucket name
        bucket: String,

        #[command(flatten)]
        common: CommonArgs,

        #[command(subcommand)]
        command: StoreCommands,
    },
}

#[derive(Args)]
pub struct CommonArgs {
    /// Configuration file
    #[arg(short, long, default_value = "pkgrelay.toml")]
    pub config: String,

    /// Credential profile
    #[arg(short, long)]
    pub profile: Option<String>,

    /// Log writes and deletes instead of performing them
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Subcommand)]
pub enum StoreCommands {
    /// Upload a local tree under a prefix
    SyncTo {
        local_dir: String,
        prefix: String,
    },

    /// Download a prefix into a local tree
    SyncFrom {
        prefix: String,
        local_dir: String,
    },

    /// Upload one file
    Put {
        local: String,
        key: String,
    },

    /// Download one object
    Get {
        key: String,
        local: String,
    },

    /// Delete objects by key
    Delete {
        #[arg(required = true)]
        keys: Vec<String>,
    },

    /// Delete every object under a prefix
    DeletePrefix {
        prefix: String,
    },

    /// Delete objects under a prefix whose full key matches a regular expression
    DeleteMatching {
        prefix: String,
        pattern: String,
    },
}
