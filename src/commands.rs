// src/commands.rs
//! Command handlers for the pkgrelay CLI

use crate::cli::{CommonArgs, StoreCommands};
use anyhow::{Context, Result, bail};
use pkgrelay::store::Bucket;
use pkgrelay::{BuildJob, HandleRegistry, JobOptions, RepositoryConfig, SyncOptions};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

fn load_config(path: &str) -> Result<RepositoryConfig> {
    RepositoryConfig::load(Path::new(path))
        .with_context(|| format!("Failed to load configuration from {}", path))
}

/// Run a repository rebuild and report its status
pub fn cmd_rebuild(
    repo: String,
    version: String,
    arch: String,
    packages: Vec<String>,
    common: CommonArgs,
    timeout_secs: Option<u64>,
    json: bool,
) -> Result<()> {
    let conf = Arc::new(load_config(&common.config)?);
    let options = JobOptions {
        repo,
        version,
        arch,
        profile: common.profile,
        packages,
        dry_run: common.dry_run,
    };

    let registry = HandleRegistry::new();
    let job = BuildJob::from_options(conf, &options)
        .context("Failed to create rebuild job")?
        .with_registry(registry.clone());

    let deadline = timeout_secs.map(|secs| Instant::now() + Duration::from_secs(secs));
    job.run(deadline);

    let leaked = registry.shutdown();
    if leaked > 0 {
        warn!("{} bucket handles were still open after the job", leaked);
    }

    let status = job.status();
    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!(
            "{}: {} ({} errors)",
            status.id,
            if status.succeeded() { "succeeded" } else { "failed" },
            status.errors.len()
        );
        for error in &status.errors {
            println!("  {}", error);
        }
    }

    if !status.succeeded() {
        bail!("Job {} completed with errors", status.id);
    }
    Ok(())
}

/// Run one bucket operation
pub fn cmd_store(bucket: String, common: CommonArgs, command: StoreCommands) -> Result<()> {
    let conf = load_config(&common.config)?;
    let connector = conf.store.connector(common.profile.as_deref())?;
    let registry = HandleRegistry::new();

    let mut handle = Bucket::new(&bucket, connector, registry.clone());
    handle.set_num_jobs(conf.store.jobs)?;
    handle.set_num_retries(conf.store.retries)?;
    handle
        .open()
        .with_context(|| format!("Failed to open bucket {}", bucket))?;

    let mut handle = if common.dry_run {
        let mut dry = handle.dry_run_clone()?;
        dry.open()?;
        handle.close();
        dry
    } else {
        handle
    };

    let options = SyncOptions::default();
    match command {
        StoreCommands::SyncTo { local_dir, prefix } => {
            handle.sync_to(Path::new(&local_dir), &prefix, &options)?;
        }
        StoreCommands::SyncFrom { prefix, local_dir } => {
            handle.sync_from(&prefix, Path::new(&local_dir), &options)?;
        }
        StoreCommands::Put { local, key } => {
            handle.put(Path::new(&local), &key)?;
            info!("Uploaded {} to {}/{}", local, bucket, key);
        }
        StoreCommands::Get { key, local } => {
            handle.get(&key, Path::new(&local))?;
            info!("Downloaded {}/{} to {}", bucket, key, local);
        }
        StoreCommands::Delete { keys } => {
            if let [key] = keys.as_slice() {
                handle.delete(key)?;
            } else {
                handle.delete_many(&keys)?;
            }
        }
        StoreCommands::DeletePrefix { prefix } => handle.delete_prefix(&prefix)?,
        StoreCommands::DeleteMatching { prefix, pattern } => {
            handle.delete_matching(&prefix, &pattern)?;
        }
    }

    handle.close();
    registry.shutdown();
    Ok(())
}
