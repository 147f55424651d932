// src/store/bucket.rs

//! Bucket handles
//!
//! A [`Bucket`] addresses one remote container. While open it owns a
//! [`WorkerPool`] for file-level transfers; every remote call runs under the
//! handle's [`RetryPolicy`]. Handles are never shared between threads:
//! concurrent work clones the handle, and each clone gets its own pool.

use super::pool::{Direction, SyncUnit, Transfer, WorkerPool};
use super::{
    BackoffConfig, DryRunStore, HandleId, HandleRegistry, ListPage, LIST_PAGE_SIZE,
    MAX_DELETE_BATCH, ObjectInfo, ObjectStore, Permission, RetryPolicy, StoreConnector,
    content_type_for, join_key, normalize_prefix, path_to_key,
};
use super::DEFAULT_ATTEMPTS;
use crate::catcher::Catcher;
use crate::error::{Error, Result};
use parking_lot::RwLock;
use regex::Regex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fs;
use std::path::{Component, Path};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Default worker-pool size
pub const DEFAULT_JOBS: usize = 8;

/// Options for tree-level sync
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    /// Units not finished by this instant fail with a deadline error
    pub deadline: Option<Instant>,
}

impl SyncOptions {
    pub fn with_deadline(deadline: Option<Instant>) -> Self {
        Self { deadline }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Settings {
    permission: Permission,
    policy: RetryPolicy,
}

/// Backend plus the settings remote calls are made with
///
/// Shared between a bucket and the sync units it queues.
pub(crate) struct Connection {
    bucket: String,
    raw: Arc<dyn ObjectStore>,
    store: Arc<dyn ObjectStore>,
    settings: RwLock<Settings>,
}

impl Connection {
    pub(crate) fn new(
        bucket: &str,
        raw: Arc<dyn ObjectStore>,
        dry_run: bool,
        permission: Permission,
        policy: RetryPolicy,
    ) -> Self {
        let store: Arc<dyn ObjectStore> = if dry_run {
            Arc::new(DryRunStore::new(Arc::clone(&raw)))
        } else {
            Arc::clone(&raw)
        };

        Self {
            bucket: bucket.to_string(),
            raw,
            store,
            settings: RwLock::new(Settings { permission, policy }),
        }
    }

    /// A new connection over the same backend with independent settings
    fn fork(&self, dry_run: bool) -> Self {
        let settings = *self.settings.read();
        Self::new(
            &self.bucket,
            Arc::clone(&self.raw),
            dry_run,
            settings.permission,
            settings.policy,
        )
    }

    fn policy(&self) -> RetryPolicy {
        self.settings.read().policy
    }

    fn set_policy(&self, policy: RetryPolicy) {
        self.settings.write().policy = policy;
    }

    fn set_permission(&self, permission: Permission) {
        self.settings.write().permission = permission;
    }

    fn target(&self, key: &str) -> String {
        format!("{}/{}", self.bucket, key)
    }

    fn exists(&self, key: &str, deadline: Option<Instant>) -> Result<bool> {
        self.policy()
            .run("exists", &self.target(key), deadline, || self.store.exists(key))
    }

    fn list_page(&self, prefix: &str, marker: Option<&str>, deadline: Option<Instant>) -> Result<ListPage> {
        self.policy().run("list", &self.target(prefix), deadline, || {
            self.store.list_page(prefix, marker, LIST_PAGE_SIZE)
        })
    }

    pub(crate) fn upload(&self, local: &Path, key: &str, deadline: Option<Instant>) -> Result<()> {
        let data = fs::read(local)
            .map_err(|e| Error::IoError(format!("Failed to read {}: {}", local.display(), e)))?;
        let content_type = content_type_for(key);
        let Settings { permission, policy } = *self.settings.read();

        policy.run("put", &self.target(key), deadline, || {
            self.store.put(key, &data, content_type, permission)
        })?;

        debug!("Uploaded {} to {} ({} bytes)", local.display(), self.target(key), data.len());
        Ok(())
    }

    pub(crate) fn download(&self, key: &str, local: &Path, deadline: Option<Instant>) -> Result<()> {
        let data = self
            .policy()
            .run("get", &self.target(key), deadline, || self.store.get(key))?;

        if let Some(parent) = local.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                Error::IoError(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }
        fs::write(local, &data)
            .map_err(|e| Error::IoError(format!("Failed to write {}: {}", local.display(), e)))?;

        debug!("Downloaded {} to {} ({} bytes)", self.target(key), local.display(), data.len());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.policy()
            .run("delete", &self.target(key), None, || self.store.delete(key))
    }

    fn delete_batch(&self, keys: &[String]) -> Result<()> {
        let target = format!("{} ({} keys)", self.bucket, keys.len());
        self.policy()
            .run("delete batch", &target, None, || self.store.delete_batch(keys))
    }
}

/// Lazy listing of every object under a prefix
///
/// Pages are fetched on demand, [`LIST_PAGE_SIZE`] objects at a time, using
/// the last key seen as the cursor. A failed page is yielded as an error
/// and ends the iteration.
pub struct ListIter {
    conn: Arc<Connection>,
    prefix: String,
    marker: Option<String>,
    buffer: VecDeque<ObjectInfo>,
    deadline: Option<Instant>,
    done: bool,
}

impl Iterator for ListIter {
    type Item = Result<ObjectInfo>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(object) = self.buffer.pop_front() {
                return Some(Ok(object));
            }
            if self.done {
                return None;
            }

            match self
                .conn
                .list_page(&self.prefix, self.marker.as_deref(), self.deadline)
            {
                Ok(page) => {
                    self.done = !page.is_truncated || page.objects.is_empty();
                    if let Some(last) = page.objects.last() {
                        self.marker = Some(last.key.clone());
                    }
                    self.buffer.extend(page.objects);
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

/// Handle to one remote bucket
pub struct Bucket {
    name: String,
    connector: Arc<dyn StoreConnector>,
    registry: HandleRegistry,
    id: HandleId,
    connection: Option<Arc<Connection>>,
    pool: Option<WorkerPool>,
    dry_run: bool,
    num_jobs: usize,
    num_retries: u32,
    permission: Permission,
    backoff: BackoffConfig,
}

impl Bucket {
    /// Create a closed handle
    pub fn new(name: &str, connector: Arc<dyn StoreConnector>, registry: HandleRegistry) -> Self {
        let id = registry.next_id();
        Self {
            name: name.to_string(),
            connector,
            registry,
            id,
            connection: None,
            pool: None,
            dry_run: false,
            num_jobs: DEFAULT_JOBS,
            num_retries: DEFAULT_ATTEMPTS,
            permission: Permission::default(),
            backoff: BackoffConfig::default(),
        }
    }

    /// Create and open a handle
    pub fn open_new(
        name: &str,
        connector: Arc<dyn StoreConnector>,
        registry: HandleRegistry,
    ) -> Result<Self> {
        let mut bucket = Self::new(name, connector, registry);
        bucket.open()?;
        Ok(bucket)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn is_open(&self) -> bool {
        self.pool.is_some()
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn num_jobs(&self) -> usize {
        self.num_jobs
    }

    pub fn num_retries(&self) -> u32 {
        self.num_retries
    }

    pub fn permission(&self) -> Permission {
        self.permission
    }

    fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.num_retries, self.backoff)
    }

    /// Set the worker-pool size used by the next open
    pub fn set_num_jobs(&mut self, jobs: usize) -> Result<()> {
        if self.is_open() {
            return Err(Error::ConfigError(format!(
                "Cannot change the job count of open bucket {}",
                self.name
            )));
        }
        if jobs == 0 {
            return Err(Error::ConfigError("Job count must be at least 1".to_string()));
        }
        self.num_jobs = jobs;
        Ok(())
    }

    /// Set the attempt budget for remote calls
    pub fn set_num_retries(&mut self, retries: u32) -> Result<()> {
        if retries == 0 {
            return Err(Error::ConfigError("Retry count must be at least 1".to_string()));
        }
        self.num_retries = retries;
        if let Some(conn) = &self.connection {
            conn.set_policy(self.policy());
        }
        Ok(())
    }

    /// Set the permission applied to objects written from now on
    pub fn set_permission(&mut self, permission: Permission) {
        self.permission = permission;
        if let Some(conn) = &self.connection {
            conn.set_permission(permission);
        }
    }

    pub fn set_backoff(&mut self, backoff: BackoffConfig) {
        self.backoff = backoff;
        if let Some(conn) = &self.connection {
            conn.set_policy(self.policy());
        }
    }

    /// Connect if needed and start the worker pool; a no-op when open
    pub fn open(&mut self) -> Result<()> {
        if self.is_open() {
            return Ok(());
        }

        if self.connection.is_none() {
            let raw = self.connector.connect(&self.name)?;
            self.connection = Some(Arc::new(Connection::new(
                &self.name,
                raw,
                self.dry_run,
                self.permission,
                self.policy(),
            )));
        }

        let mut pool = WorkerPool::new(self.num_jobs);
        pool.start()?;
        self.pool = Some(pool);
        self.registry.register(self.id, &self.name);

        debug!(
            "Opened bucket {} via {} ({} workers{})",
            self.name,
            self.connector.describe(),
            self.num_jobs,
            if self.dry_run { ", dry run" } else { "" }
        );
        Ok(())
    }

    /// Drain and release the worker pool; a no-op when closed
    pub fn close(&mut self) {
        let Some(mut pool) = self.pool.take() else {
            return;
        };
        pool.stop();
        self.registry.remove(self.id);
        debug!("Closed bucket {}", self.name);
    }

    fn derive(&self, dry_run: bool) -> Result<Self> {
        let mut clone = Self {
            name: self.name.clone(),
            connector: Arc::clone(&self.connector),
            registry: self.registry.clone(),
            id: self.registry.next_id(),
            connection: self.connection.as_ref().map(|c| Arc::new(c.fork(dry_run))),
            pool: None,
            dry_run,
            num_jobs: self.num_jobs,
            num_retries: self.num_retries,
            permission: self.permission,
            backoff: self.backoff,
        };

        if self.is_open() {
            clone.open()?;
        }
        Ok(clone)
    }

    /// Independent handle with the same settings and its own worker pool
    ///
    /// The clone is open if this handle is open.
    pub fn try_clone(&self) -> Result<Self> {
        self.derive(self.dry_run)
    }

    /// As [`Bucket::try_clone`], with writes and deletes suppressed
    pub fn dry_run_clone(&self) -> Result<Self> {
        self.derive(true)
    }

    fn connection(&self) -> Result<&Arc<Connection>> {
        match (&self.connection, self.is_open()) {
            (Some(conn), true) => Ok(conn),
            _ => Err(Error::InitError(format!("Bucket {} is not open", self.name))),
        }
    }

    fn pool(&self) -> Result<&WorkerPool> {
        self.pool
            .as_ref()
            .ok_or_else(|| Error::InitError(format!("Bucket {} is not open", self.name)))
    }

    pub fn exists(&self, key: &str) -> Result<bool> {
        self.connection()?.exists(key, None)
    }

    /// Upload a local file to `key`
    pub fn put(&self, local: &Path, key: &str) -> Result<()> {
        self.connection()?.upload(local, key, None)
    }

    /// Download `key` into a local file, creating parent directories
    pub fn get(&self, key: &str, local: &Path) -> Result<()> {
        self.connection()?.download(key, local, None)
    }

    pub fn delete(&self, key: &str) -> Result<()> {
        self.connection()?.delete(key)
    }

    /// Every object under `prefix`, fetched lazily
    pub fn list(&self, prefix: &str) -> Result<ListIter> {
        self.list_until(prefix, None)
    }

    fn list_until(&self, prefix: &str, deadline: Option<Instant>) -> Result<ListIter> {
        Ok(ListIter {
            conn: Arc::clone(self.connection()?),
            prefix: normalize_prefix(prefix),
            marker: None,
            buffer: VecDeque::new(),
            deadline,
            done: false,
        })
    }

    /// Delete the given keys
    ///
    /// A single key is deleted directly. Otherwise duplicates are removed,
    /// the keys are checked against one listing of their common directory,
    /// and missing keys are skipped with a warning; the rest go out in bulk
    /// requests.
    pub fn delete_many<S: AsRef<str>>(&self, keys: &[S]) -> Result<()> {
        let mut seen = HashSet::new();
        let unique: Vec<&str> = keys
            .iter()
            .map(|key| key.as_ref())
            .filter(|key| seen.insert(*key))
            .collect();

        match unique.as_slice() {
            [] => return self.delete_group(Vec::new()),
            [key] => return self.delete(key),
            _ => {}
        }

        let prefix = common_dir(&unique);
        let listed = self
            .list(prefix)?
            .map(|object| object.map(|o| o.key))
            .collect::<Result<HashSet<_>>>()?;

        let mut existing = Vec::with_capacity(unique.len());
        for key in unique {
            if listed.contains(key) {
                existing.push(key.to_string());
            } else {
                warn!("{} does not exist in bucket {}, not deleting", key, self.name);
            }
        }

        self.delete_group(existing)
    }

    /// Delete every object under `prefix`
    pub fn delete_prefix(&self, prefix: &str) -> Result<()> {
        let keys = self
            .list(prefix)?
            .map(|object| object.map(|o| o.key))
            .collect::<Result<Vec<_>>>()?;
        self.delete_group(keys)
    }

    /// Delete every object under `prefix` whose full key matches `pattern`
    pub fn delete_matching(&self, prefix: &str, pattern: &str) -> Result<()> {
        let regex = Regex::new(pattern)
            .map_err(|e| Error::ParseError(format!("Invalid pattern '{}': {}", pattern, e)))?;

        let mut keys = Vec::new();
        for object in self.list(prefix)? {
            let object = object?;
            if regex.is_match(&object.key) {
                keys.push(object.key);
            }
        }
        self.delete_group(keys)
    }

    /// Send keys out in bulk deletes of at most [`MAX_DELETE_BATCH`]
    ///
    /// Every batch is attempted; failures are aggregated.
    fn delete_group(&self, keys: Vec<String>) -> Result<()> {
        if keys.is_empty() {
            debug!("Nothing to delete in bucket {}", self.name);
            return Ok(());
        }

        let conn = self.connection()?;
        let batches = keys.len().div_ceil(MAX_DELETE_BATCH);
        info!(
            "Deleting {} objects from bucket {} in {} batch(es)",
            keys.len(),
            self.name,
            batches
        );

        let catcher = Catcher::new();
        for batch in keys.chunks(MAX_DELETE_BATCH) {
            catcher.add_result(conn.delete_batch(batch));
        }
        catcher.resolve()
    }

    /// Upload the tree under `local_dir` to `remote_prefix`
    ///
    /// Files whose content already matches the remote object are skipped.
    /// Walk, submission and transfer failures are all collected and
    /// returned together once the pool drains.
    pub fn sync_to(&mut self, local_dir: &Path, remote_prefix: &str, options: &SyncOptions) -> Result<()> {
        let conn = Arc::clone(self.connection()?);

        let mut remote: HashMap<String, ObjectInfo> = HashMap::new();
        for object in self.list_until(remote_prefix, options.deadline)? {
            let object = object?;
            remote.insert(object.key.clone(), object);
        }

        let catcher = Catcher::new();
        let pool = self.pool()?;
        let mut submitted = 0usize;

        for entry in WalkDir::new(local_dir).follow_links(true) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    catcher.add(Error::IoError(format!(
                        "Failed to walk {}: {}",
                        local_dir.display(),
                        e
                    )));
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let Ok(relative) = entry.path().strip_prefix(local_dir) else {
                continue;
            };
            let key = join_key(remote_prefix, &path_to_key(relative));
            let existing = remote.remove(&key);
            let unit = SyncUnit::upload(
                Arc::clone(&conn),
                entry.into_path(),
                key,
                existing,
                options.deadline,
            );
            if catcher.check(pool.submit(unit)).is_some() {
                submitted += 1;
            }
        }

        self.finish_sync(Direction::Upload, submitted, catcher, local_dir, remote_prefix)
    }

    /// Download every object under `remote_prefix` into `local_dir`
    ///
    /// Local paths mirror the keys with the prefix stripped. Files whose
    /// content already matches are left alone, so repeated runs against an
    /// unchanged prefix transfer nothing.
    pub fn sync_from(&mut self, remote_prefix: &str, local_dir: &Path, options: &SyncOptions) -> Result<()> {
        let conn = Arc::clone(self.connection()?);
        let prefix = normalize_prefix(remote_prefix);

        let catcher = Catcher::new();
        let pool = self.pool()?;
        let mut submitted = 0usize;

        for object in self.list_until(&prefix, options.deadline)? {
            let object = match object {
                Ok(object) => object,
                Err(e) => {
                    catcher.add(e);
                    break;
                }
            };

            let relative = object.key.strip_prefix(&prefix).unwrap_or(&object.key);
            if relative.is_empty() || relative.ends_with('/') {
                continue;
            }
            let relative = Path::new(relative);
            if !relative.components().all(|c| matches!(c, Component::Normal(_))) {
                catcher.add(Error::StoreError(format!(
                    "Refusing to download {} outside {}",
                    object.key,
                    local_dir.display()
                )));
                continue;
            }

            let unit = SyncUnit::download(
                Arc::clone(&conn),
                object.key.clone(),
                local_dir.join(relative),
                Some(object),
                options.deadline,
            );
            if catcher.check(pool.submit(unit)).is_some() {
                submitted += 1;
            }
        }

        self.finish_sync(Direction::Download, submitted, catcher, local_dir, &prefix)
    }

    /// Wait for the pool to drain and fold unit outcomes into `catcher`
    fn finish_sync(
        &self,
        direction: Direction,
        submitted: usize,
        catcher: Catcher,
        local_dir: &Path,
        remote_prefix: &str,
    ) -> Result<()> {
        let pool = self.pool()?;
        pool.wait();

        let mut copied = 0usize;
        let mut unchanged = 0usize;
        for outcome in pool.results() {
            match catcher.check(outcome.result) {
                Some(Transfer::Copied) => copied += 1,
                Some(Transfer::Unchanged) => unchanged += 1,
                None => {}
            }
        }

        let (verb, from, to) = match direction {
            Direction::Upload => ("Uploaded", local_dir.display().to_string(), self.target(remote_prefix)),
            Direction::Download => ("Downloaded", self.target(remote_prefix), local_dir.display().to_string()),
        };
        if catcher.has_errors() {
            warn!(
                "{} {} of {} files from {} to {} ({} unchanged, {} errors)",
                verb,
                copied,
                submitted,
                from,
                to,
                unchanged,
                catcher.len()
            );
        } else {
            info!(
                "{} {} of {} files from {} to {} ({} unchanged)",
                verb, copied, submitted, from, to, unchanged
            );
        }

        catcher.resolve()
    }

    fn target(&self, prefix: &str) -> String {
        format!("{}/{}", self.name, prefix)
    }
}

impl Drop for Bucket {
    fn drop(&mut self) {
        self.close();
    }
}

/// Longest directory prefix (with trailing slash) shared by every key
fn common_dir<'a>(keys: &[&'a str]) -> &'a str {
    let Some((first, rest)) = keys.split_first() else {
        return "";
    };
    let mut len = first.len();
    for key in rest {
        len = first
            .bytes()
            .zip(key.bytes())
            .take(len)
            .take_while(|(a, b)| a == b)
            .count();
    }
    match first.as_bytes()[..len].iter().rposition(|&b| b == b'/') {
        Some(slash) => &first[..=slash],
        None => "",
    }
}
