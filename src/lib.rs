// src/lib.rs

//! pkgrelay
//!
//! Rebuilds RPM and DEB repositories hosted in object storage as part of a
//! release pipeline: new packages are merged into each remote repository,
//! metadata is regenerated and signed, and the changed trees are synced back.
//!
//! # Architecture
//!
//! - [`store`]: retrying bucket handles with per-handle transfer pools,
//!   tree sync in both directions, batched deletes and dry-run derivation
//! - [`repobuild`]: the build job, fanning out one thread per remote
//!   repository and aggregating failures instead of stopping at the first
//! - [`catcher`]: the error aggregator both layers share

pub mod catcher;
pub mod config;
mod error;
pub mod repobuild;
pub mod store;
pub mod version;

pub use catcher::{AggregateError, Catcher};
pub use config::{PackageFormat, RepositoryConfig, RepositoryDefinition};
pub use error::{Error, Result};
pub use repobuild::{BuildJob, JobOptions, JobStatus, RepoBuilder, Signer};
pub use store::{Bucket, HandleRegistry, ObjectStore, StoreConnector, SyncOptions};
pub use version::ReleaseVersion;
