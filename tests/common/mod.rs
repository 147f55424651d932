// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

#![allow(dead_code)]

use parking_lot::Mutex;
use pkgrelay::config::PackageFormat;
use pkgrelay::repobuild::{RepoBuilder, SignRequest, Signer};
use pkgrelay::store::{
    BackoffConfig, Bucket, HandleRegistry, ListPage, MemoryConnector, MemoryStore, ObjectStore,
    Permission, StoreConnector,
};
use pkgrelay::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Open a bucket over `connector` with millisecond backoff
pub fn open_bucket(name: &str, connector: Arc<dyn StoreConnector>, retries: u32) -> Bucket {
    let mut bucket = Bucket::new(name, connector, HandleRegistry::new());
    bucket.set_num_jobs(4).unwrap();
    bucket.set_num_retries(retries).unwrap();
    bucket.set_backoff(BackoffConfig::fast());
    bucket.open().unwrap();
    bucket
}

/// Write `files` (relative path, content) under `root`
pub fn write_tree(root: &Path, files: &[(&str, &str)]) {
    for (path, content) in files {
        let path = root.join(path);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }
}

/// Memory store that fails selected calls
///
/// The first `failures` puts and gets fail with a transient error. Keys
/// containing one of `broken` fail on every put and get.
pub struct FlakyStore {
    inner: Arc<MemoryStore>,
    failures: AtomicUsize,
    broken: Vec<String>,
    pub put_attempts: AtomicUsize,
    pub get_attempts: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: Arc<MemoryStore>, failures: usize) -> Self {
        Self {
            inner,
            failures: AtomicUsize::new(failures),
            broken: Vec::new(),
            put_attempts: AtomicUsize::new(0),
            get_attempts: AtomicUsize::new(0),
        }
    }

    pub fn with_broken(mut self, fragment: &str) -> Self {
        self.broken.push(fragment.to_string());
        self
    }

    fn check(&self, key: &str) -> Result<()> {
        if self.broken.iter().any(|b| key.contains(b.as_str())) {
            return Err(Error::StoreError(format!("{} is unavailable", key)));
        }
        let remaining = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if remaining.is_ok() {
            return Err(Error::StoreError(format!("transient failure on {}", key)));
        }
        Ok(())
    }
}

impl ObjectStore for FlakyStore {
    fn list_page(&self, prefix: &str, marker: Option<&str>, max_keys: usize) -> Result<ListPage> {
        self.inner.list_page(prefix, marker, max_keys)
    }

    fn exists(&self, key: &str) -> Result<bool> {
        self.inner.exists(key)
    }

    fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.get_attempts.fetch_add(1, Ordering::SeqCst);
        self.check(key)?;
        self.inner.get(key)
    }

    fn put(&self, key: &str, data: &[u8], content_type: &str, permission: Permission) -> Result<()> {
        self.put_attempts.fetch_add(1, Ordering::SeqCst);
        self.check(key)?;
        self.inner.put(key, data, content_type, permission)
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(key)
    }

    fn delete_batch(&self, keys: &[String]) -> Result<()> {
        self.inner.delete_batch(keys)
    }

    fn backend_name(&self) -> &'static str {
        "flaky"
    }
}

/// Connector handing out one shared [`FlakyStore`]
pub struct FlakyConnector {
    pub store: Arc<FlakyStore>,
}

impl FlakyConnector {
    pub fn new(store: FlakyStore) -> Self {
        Self {
            store: Arc::new(store),
        }
    }
}

impl StoreConnector for FlakyConnector {
    fn connect(&self, _bucket: &str) -> Result<Arc<dyn ObjectStore>> {
        Ok(self.store.clone())
    }

    fn describe(&self) -> String {
        "flaky".to_string()
    }
}

/// Memory connector plus the store behind `bucket`
pub fn memory_bucket_store(bucket: &str) -> (Arc<MemoryConnector>, Arc<MemoryStore>) {
    let connector = Arc::new(MemoryConnector::new());
    let store = connector.store(bucket);
    (connector, store)
}

/// Format builder that writes a fake package and fake metadata
///
/// RPM trees get `<location>/<arch>/RPMS/<package>` and
/// `repodata/repomd.xml`; DEB trees get
/// `<location>/main/binary-<arch>/<package>` and a component `Release`.
pub struct MockBuilder {
    format: PackageFormat,
    arch: String,
    package: String,
    fail_rebuild_on: Option<String>,
    pub injected: Mutex<Vec<(PathBuf, String)>>,
}

impl MockBuilder {
    pub fn new(format: PackageFormat, arch: &str, package: &str) -> Self {
        Self {
            format,
            arch: arch.to_string(),
            package: package.to_string(),
            fail_rebuild_on: None,
            injected: Mutex::new(Vec::new()),
        }
    }

    /// Fail `rebuild_repo` for working directories containing `fragment`
    pub fn failing_on(mut self, fragment: &str) -> Self {
        self.fail_rebuild_on = Some(fragment.to_string());
        self
    }
}

impl RepoBuilder for MockBuilder {
    fn inject_package(&self, local: &Path, location: &str) -> Result<PathBuf> {
        self.injected
            .lock()
            .push((local.to_path_buf(), location.to_string()));

        let (changed, staging) = match self.format {
            PackageFormat::Rpm => {
                let changed = local.join(location).join(&self.arch);
                let staging = changed.join("RPMS");
                (changed, staging)
            }
            PackageFormat::Deb => {
                let changed = local
                    .join(location)
                    .join("main")
                    .join(format!("binary-{}", self.arch));
                (changed.clone(), changed)
            }
        };
        fs::create_dir_all(&staging).map_err(|e| Error::IoError(e.to_string()))?;
        fs::write(staging.join(&self.package), self.package.as_bytes())
            .map_err(|e| Error::IoError(e.to_string()))?;
        Ok(changed)
    }

    fn rebuild_repo(&self, changed: &Path) -> Result<()> {
        if let Some(fragment) = &self.fail_rebuild_on
            && changed.to_string_lossy().contains(fragment.as_str())
        {
            return Err(Error::BuildFailed(format!(
                "metadata tool failed in {}",
                changed.display()
            )));
        }

        let (dir, file) = match self.format {
            PackageFormat::Rpm => (changed.join("repodata"), "repomd.xml"),
            PackageFormat::Deb => (
                changed.parent().unwrap_or(changed).to_path_buf(),
                "Release",
            ),
        };
        fs::create_dir_all(&dir).map_err(|e| Error::IoError(e.to_string()))?;
        fs::write(dir.join(file), format!("{} for {}", file, self.package))
            .map_err(|e| Error::IoError(e.to_string()))
    }
}

/// Signer that records requests and always succeeds
#[derive(Default)]
pub struct RecordingSigner {
    pub requests: Mutex<Vec<SignRequest>>,
}

impl Signer for RecordingSigner {
    fn sign(&self, request: &SignRequest) -> Result<String> {
        self.requests.lock().push(request.clone());
        Ok(format!("signed {}", request.path.display()))
    }
}
