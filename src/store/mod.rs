// src/store/mod.rs

//! Object-store access for repository trees
//!
//! This module provides:
//! - The [`ObjectStore`] backend abstraction (S3, local filesystem, memory)
//! - [`Bucket`], a retrying handle with its own transfer worker pool
//! - Tree-level sync in both directions with unchanged-file skipping
//! - A dry-run decorator that observes but suppresses mutating calls

mod bucket;
mod dry_run;
mod filesystem;
mod memory;
mod pool;
mod registry;
mod retry;
#[cfg(feature = "s3")]
mod s3;

pub use bucket::{Bucket, DEFAULT_JOBS, ListIter, SyncOptions};
pub use dry_run::DryRunStore;
pub use filesystem::{FilesystemConnector, FilesystemStore};
pub use memory::{MemoryConnector, MemoryStore, OpCounts};
pub use pool::{Direction, SyncUnit, Transfer, UnitOutcome, WorkerPool};
pub use registry::{HandleId, HandleRegistry};
pub use retry::{Backoff, BackoffConfig, DEFAULT_ATTEMPTS, RetryPolicy};
#[cfg(feature = "s3")]
pub use s3::{S3Connector, S3Store};

use crate::error::{Error, Result};
use md5::{Digest, Md5};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::sync::Arc;

/// Objects per listing request
pub const LIST_PAGE_SIZE: usize = 1000;

/// Keys per bulk-delete request (hard protocol limit)
pub const MAX_DELETE_BATCH: usize = 1000;

/// Content type used when the extension is unknown
pub const DEFAULT_CONTENT_TYPE: &str = "text/plain";

/// Access control applied to newly written objects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Permission {
    #[default]
    Private,
    PublicRead,
}

impl Permission {
    /// Canned ACL name understood by S3-compatible stores
    pub fn as_acl(&self) -> &'static str {
        match self {
            Permission::Private => "private",
            Permission::PublicRead => "public-read",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_acl())
    }
}

/// One remote object record from a listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    /// Entity tag; the MD5 of the content for single-part uploads
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

impl ObjectInfo {
    /// Whether the local file has the same content as this object
    ///
    /// Sizes must match and the ETag must equal the local MD5. Multipart
    /// ETags (`<hash>-<parts>`) cannot be compared and never match.
    pub fn matches_local(&self, path: &Path) -> Result<bool> {
        let meta = match std::fs::metadata(path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => {
                return Err(Error::IoError(format!(
                    "Failed to stat {}: {}",
                    path.display(),
                    e
                )));
            }
        };

        if !meta.is_file() || meta.len() != self.size {
            return Ok(false);
        }

        let Some(etag) = self.etag.as_deref() else {
            return Ok(false);
        };
        let etag = etag.trim_matches('"');
        if etag.contains('-') {
            return Ok(false);
        }

        Ok(file_md5(path)?.eq_ignore_ascii_case(etag))
    }
}

/// A single page of listing results
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub objects: Vec<ObjectInfo>,
    /// More results exist after the last object of this page
    pub is_truncated: bool,
}

/// Blocking object-store backend
///
/// Implementations perform exactly one remote request per call; retries,
/// batching and dry-run behavior are layered on top by [`Bucket`].
pub trait ObjectStore: Send + Sync + 'static {
    /// List up to `max_keys` objects under `prefix` whose keys sort after `marker`
    fn list_page(&self, prefix: &str, marker: Option<&str>, max_keys: usize) -> Result<ListPage>;

    fn exists(&self, key: &str) -> Result<bool>;

    fn get(&self, key: &str) -> Result<Vec<u8>>;

    fn put(&self, key: &str, data: &[u8], content_type: &str, permission: Permission) -> Result<()>;

    fn delete(&self, key: &str) -> Result<()>;

    /// Delete up to [`MAX_DELETE_BATCH`] keys in one request
    fn delete_batch(&self, keys: &[String]) -> Result<()>;

    /// Backend identifier used in logs
    fn backend_name(&self) -> &'static str;
}

/// Credential-carrying factory for per-bucket backends
///
/// Cloned handles share the connector, so they share credentials and
/// region while owning independent worker pools.
pub trait StoreConnector: Send + Sync + 'static {
    fn connect(&self, bucket: &str) -> Result<Arc<dyn ObjectStore>>;

    fn describe(&self) -> String;
}

/// Join a key prefix and a relative path with single `/` separators
pub fn join_key(prefix: &str, rest: &str) -> String {
    let prefix = prefix.trim_matches('/');
    let rest = rest.trim_start_matches('/');
    match (prefix.is_empty(), rest.is_empty()) {
        (true, _) => rest.to_string(),
        (false, true) => prefix.to_string(),
        (false, false) => format!("{prefix}/{rest}"),
    }
}

/// Non-empty prefixes are listed as directories
///
/// Without the trailing slash, `repo/4.2` would also match `repo/4.20/...`.
pub fn normalize_prefix(prefix: &str) -> String {
    if prefix.is_empty() || prefix.ends_with('/') {
        prefix.to_string()
    } else {
        format!("{prefix}/")
    }
}

/// Convert a relative filesystem path into a `/`-separated key fragment
pub fn path_to_key(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Resolve a content type from a file name's extension
pub fn content_type_for(file_name: &str) -> &'static str {
    let ext = match file_name.rsplit_once('.') {
        Some((_, ext)) => ext.to_ascii_lowercase(),
        None => return DEFAULT_CONTENT_TYPE,
    };

    match ext.as_str() {
        "deb" => "application/octet-stream",
        "gz" | "tgz" => "application/x-gzip",
        "json" => "application/json",
        "rpm" => "application/x-redhat-package-manager",
        "txt" => "text/plain",
        "yaml" | "yml" => "text/x-yaml",
        "xml" => "application/xml",
        "asc" | "gpg" | "sig" => "application/pgp-signature",
        "html" | "htm" => "text/html",
        _ => DEFAULT_CONTENT_TYPE,
    }
}

/// MD5 of a byte slice as lowercase hex, the ETag of a single-part upload
pub fn md5_hex(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

/// MD5 of a file's content as lowercase hex
pub fn file_md5(path: &Path) -> Result<String> {
    let mut file = File::open(path)
        .map_err(|e| Error::IoError(format!("Failed to open {}: {}", path.display(), e)))?;

    let mut hasher = Md5::new();
    let mut buffer = [0u8; 8192];
    loop {
        let n = file
            .read(&mut buffer)
            .map_err(|e| Error::IoError(format!("Failed to read {}: {}", path.display(), e)))?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}
