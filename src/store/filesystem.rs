// src/store/filesystem.rs

//! Object store on a local directory
//!
//! Objects live at `<root>/<bucket>/<key>`. Useful for mirrors served by a
//! plain web server and for exercising sync without network access.

use super::{ListPage, ObjectInfo, ObjectStore, Permission, StoreConnector, file_md5, path_to_key};
use crate::error::{Error, Result};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

/// Prefix of in-flight write files, hidden from listings
const TEMP_PREFIX: &str = ".pkgrelay-tmp-";

/// One bucket directory
#[derive(Debug, Clone)]
pub struct FilesystemStore {
    dir: PathBuf,
}

impl FilesystemStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Map a key to a path inside the bucket directory
    fn object_path(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let valid = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(Error::ParseError(format!("Invalid object key '{}'", key)));
        }
        Ok(self.dir.join(relative))
    }

    fn entry_key(&self, entry: &DirEntry) -> Option<String> {
        entry
            .path()
            .strip_prefix(&self.dir)
            .ok()
            .map(path_to_key)
    }
}

/// File name as it sorts inside a key: directories are followed by '/'
fn sort_name(entry: &DirEntry) -> Vec<u8> {
    let mut name = entry.file_name().as_encoded_bytes().to_vec();
    if entry.file_type().is_dir() {
        name.push(b'/');
    }
    name
}

/// Whether a directory whose keys all start with `dir` can hold a key
/// under `prefix` that sorts after `marker`
fn subtree_wanted(dir: &str, prefix: &str, marker: Option<&str>) -> bool {
    let in_prefix = dir.starts_with(prefix) || prefix.starts_with(dir);
    let after_marker = marker.is_none_or(|m| m.starts_with(dir) || dir > m);
    in_prefix && after_marker
}

impl ObjectStore for FilesystemStore {
    fn list_page(&self, prefix: &str, marker: Option<&str>, max_keys: usize) -> Result<ListPage> {
        let base = prefix.rfind('/').map_or("", |slash| &prefix[..slash]);
        let root = if base.is_empty() {
            self.dir.clone()
        } else {
            self.object_path(base)?
        };
        if !root.is_dir() {
            return Ok(ListPage::default());
        }

        let list_error = |e: &dyn std::fmt::Display| {
            Error::StoreError(format!("Failed to list {}: {}", self.dir.display(), e))
        };

        // Visiting siblings in key order makes the walk yield sorted keys
        let walker = WalkDir::new(&root)
            .sort_by(|a, b| sort_name(a).cmp(&sort_name(b)))
            .into_iter()
            .filter_entry(|entry| {
                if entry.depth() == 0 || !entry.file_type().is_dir() {
                    return true;
                }
                match self.entry_key(entry) {
                    Some(key) => subtree_wanted(&format!("{key}/"), prefix, marker),
                    None => false,
                }
            });

        let mut objects = Vec::new();
        let mut is_truncated = false;
        for entry in walker {
            let entry = entry.map_err(|e| list_error(&e))?;
            if !entry.file_type().is_file()
                || entry.file_name().to_string_lossy().starts_with(TEMP_PREFIX)
            {
                continue;
            }

            let key = self
                .entry_key(&entry)
                .ok_or_else(|| list_error(&entry.path().display()))?;
            if !key.starts_with(prefix) || marker.is_some_and(|m| key.as_str() <= m) {
                continue;
            }
            if objects.len() == max_keys {
                is_truncated = true;
                break;
            }

            let size = entry
                .metadata()
                .map_err(|e| Error::StoreError(format!("Failed to stat {}: {}", key, e)))?
                .len();
            objects.push(ObjectInfo {
                etag: Some(file_md5(entry.path())?),
                key,
                size,
                last_modified: None,
            });
        }

        Ok(ListPage {
            objects,
            is_truncated,
        })
    }

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.object_path(key)?.is_file())
    }

    fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.object_path(key)?;
        fs::read(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => Error::NotFoundError(format!("Object {} does not exist", key)),
            _ => Error::StoreError(format!("Failed to read {}: {}", path.display(), e)),
        })
    }

    fn put(&self, key: &str, data: &[u8], _content_type: &str, _permission: Permission) -> Result<()> {
        let path = self.object_path(key)?;
        let parent = path
            .parent()
            .ok_or_else(|| Error::ParseError(format!("Invalid object key '{}'", key)))?;
        fs::create_dir_all(parent).map_err(|e| {
            Error::StoreError(format!("Failed to create {}: {}", parent.display(), e))
        })?;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp = parent.join(format!("{TEMP_PREFIX}{}-{}", std::process::id(), file_name));
        fs::write(&temp, data)
            .map_err(|e| Error::StoreError(format!("Failed to write {}: {}", temp.display(), e)))?;
        fs::rename(&temp, &path).map_err(|e| {
            let _ = fs::remove_file(&temp);
            Error::StoreError(format!("Failed to move {} into place: {}", path.display(), e))
        })?;

        debug!("Stored {} ({} bytes)", path.display(), data.len());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let path = self.object_path(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::StoreError(format!(
                "Failed to delete {}: {}",
                path.display(),
                e
            ))),
        }
    }

    fn delete_batch(&self, keys: &[String]) -> Result<()> {
        let failed: Vec<String> = keys
            .iter()
            .filter_map(|key| self.delete(key).err().map(|e| e.to_string()))
            .collect();
        if failed.is_empty() {
            Ok(())
        } else {
            Err(Error::StoreError(format!(
                "{} of {} deletes failed: {}",
                failed.len(),
                keys.len(),
                failed.join("; ")
            )))
        }
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }
}

/// Connector mapping bucket names to directories under a root
#[derive(Debug, Clone)]
pub struct FilesystemConnector {
    root: PathBuf,
}

impl FilesystemConnector {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl StoreConnector for FilesystemConnector {
    fn connect(&self, bucket: &str) -> Result<Arc<dyn ObjectStore>> {
        if bucket.is_empty() || bucket.contains('/') || bucket == "." || bucket == ".." {
            return Err(Error::ConfigError(format!("Invalid bucket name '{}'", bucket)));
        }
        Ok(Arc::new(FilesystemStore::new(self.root.join(bucket))))
    }

    fn describe(&self) -> String {
        format!("filesystem:{}", self.root.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{BackoffConfig, RetryPolicy, md5_hex};
    use std::cell::Cell;
    use tempfile::TempDir;

    #[test]
    fn test_put_get_list_delete() {
        let dir = TempDir::new().unwrap();
        let store = FilesystemStore::new(dir.path().join("bucket"));

        store.put("4.2/x86_64/a.rpm", b"aaa", "application/x-redhat-package-manager", Permission::PublicRead).unwrap();
        store.put("4.2/x86_64/b.rpm", b"bb", "application/x-redhat-package-manager", Permission::PublicRead).unwrap();
        store.put("4.20/x86_64/c.rpm", b"c", "application/x-redhat-package-manager", Permission::PublicRead).unwrap();

        assert!(store.exists("4.2/x86_64/a.rpm").unwrap());
        assert_eq!(store.get("4.2/x86_64/b.rpm").unwrap(), b"bb");

        let page = store.list_page("4.2/", None, 1000).unwrap();
        let keys: Vec<_> = page.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["4.2/x86_64/a.rpm", "4.2/x86_64/b.rpm"]);
        assert_eq!(page.objects[0].etag.as_deref(), Some(md5_hex(b"aaa").as_str()));

        store.delete_batch(&["4.2/x86_64/a.rpm".to_string(), "missing".to_string()]).unwrap();
        assert!(!store.exists("4.2/x86_64/a.rpm").unwrap());
    }

    #[test]
    fn test_marker_and_truncation() {
        let dir = TempDir::new().unwrap();
        let store = FilesystemStore::new(dir.path());
        for name in ["a", "b", "c"] {
            store.put(name, name.as_bytes(), "text/plain", Permission::Private).unwrap();
        }
        let page = store.list_page("", Some("a"), 1).unwrap();
        assert_eq!(page.objects[0].key, "b");
        assert!(page.is_truncated);
    }

    #[test]
    fn test_walk_yields_key_order_across_pages() {
        let dir = TempDir::new().unwrap();
        let store = FilesystemStore::new(dir.path());
        // '-' and '.' sort before '/', so these interleave with the "a/" subtree
        for key in ["a/b", "a-b", "a.rpm", "ab/c", "a/c/d", "b"] {
            store.put(key, b"x", "text/plain", Permission::Private).unwrap();
        }

        let mut keys = Vec::new();
        let mut marker: Option<String> = None;
        loop {
            let page = store.list_page("", marker.as_deref(), 2).unwrap();
            keys.extend(page.objects.iter().map(|o| o.key.clone()));
            marker = keys.last().cloned();
            if !page.is_truncated {
                break;
            }
        }
        assert_eq!(keys, vec!["a-b", "a.rpm", "a/b", "a/c/d", "ab/c", "b"]);
    }

    #[test]
    fn test_listing_under_nested_prefix() {
        let dir = TempDir::new().unwrap();
        let store = FilesystemStore::new(dir.path());
        for key in ["4.2/x86_64/RPMS/a.rpm", "4.2/x86_64/RPMS/b.rpm", "4.2/x86_64/repodata/repomd.xml"] {
            store.put(key, b"x", "text/plain", Permission::Private).unwrap();
        }

        let page = store.list_page("4.2/x86_64/RPMS/", Some("4.2/x86_64/RPMS/a.rpm"), 10).unwrap();
        let keys: Vec<_> = page.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["4.2/x86_64/RPMS/b.rpm"]);
        assert!(!page.is_truncated);
        assert!(store.list_page("4.3/", None, 10).unwrap().objects.is_empty());
    }

    #[test]
    fn test_subtree_pruning() {
        assert!(subtree_wanted("a/", "", None));
        assert!(subtree_wanted("4.2/", "4.2/x86_64/", None));
        assert!(!subtree_wanted("4.20/", "4.2/", None));
        assert!(subtree_wanted("a/", "", Some("a/b")));
        assert!(!subtree_wanted("a/", "", Some("b")));
        assert!(subtree_wanted("c/", "", Some("b")));
    }

    #[test]
    fn test_rejects_escaping_keys() {
        let dir = TempDir::new().unwrap();
        let store = FilesystemStore::new(dir.path());
        assert!(matches!(
            store.put("../escape", b"x", "text/plain", Permission::Private),
            Err(Error::ParseError(_))
        ));
        assert!(matches!(store.get("/etc/passwd"), Err(Error::ParseError(_))));
        assert!(matches!(store.exists(""), Err(Error::ParseError(_))));
    }

    #[test]
    fn test_invalid_key_is_not_retried() {
        let dir = TempDir::new().unwrap();
        let store = FilesystemStore::new(dir.path());
        let calls = Cell::new(0u32);

        let err = RetryPolicy::new(5, BackoffConfig::fast())
            .run("put", "bucket/../escape", None, || {
                calls.set(calls.get() + 1);
                store.put("../escape", b"x", "text/plain", Permission::Private)
            })
            .unwrap_err();

        assert_eq!(calls.get(), 1);
        assert!(matches!(err, Error::ParseError(_)));
        assert!(!dir.path().parent().unwrap().join("escape").exists());
    }

    #[test]
    fn test_missing_bucket_lists_empty() {
        let dir = TempDir::new().unwrap();
        let connector = FilesystemConnector::new(dir.path());
        let store = connector.connect("not-created-yet").unwrap();
        assert!(store.list_page("", None, 10).unwrap().objects.is_empty());
        assert!(connector.connect("a/b").is_err());
    }
}
