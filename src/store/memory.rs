// src/store/memory.rs

//! In-process object store
//!
//! Used for tests and local experiments. Every call is counted so callers
//! can assert exactly which remote operations a code path performed.

use super::{ListPage, ObjectInfo, ObjectStore, Permission, StoreConnector, md5_hex};
use crate::error::{Error, Result};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    etag: String,
    content_type: String,
    permission: Permission,
}

/// Snapshot of how many times each operation was called
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpCounts {
    pub list: usize,
    pub exists: usize,
    pub get: usize,
    pub put: usize,
    pub delete: usize,
    pub delete_batch: usize,
}

impl OpCounts {
    /// Calls that modify the store
    pub fn mutations(&self) -> usize {
        self.put + self.delete + self.delete_batch
    }
}

#[derive(Debug, Default)]
struct Counters {
    list: AtomicUsize,
    exists: AtomicUsize,
    get: AtomicUsize,
    put: AtomicUsize,
    delete: AtomicUsize,
    delete_batch: AtomicUsize,
}

/// Object store backed by an ordered in-memory map
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: RwLock<BTreeMap<String, StoredObject>>,
    counters: Counters,
    batch_sizes: Mutex<Vec<usize>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object without counting it as a put
    pub fn insert(&self, key: &str, data: impl Into<Vec<u8>>) {
        let data = data.into();
        let object = StoredObject {
            etag: md5_hex(&data),
            data,
            content_type: super::content_type_for(key).to_string(),
            permission: Permission::Private,
        };
        self.objects.write().insert(key.to_string(), object);
    }

    /// Content of an object, bypassing the counters
    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.read().get(key).map(|o| o.data.clone())
    }

    pub fn content_type(&self, key: &str) -> Option<String> {
        self.objects.read().get(key).map(|o| o.content_type.clone())
    }

    pub fn permission(&self, key: &str) -> Option<Permission> {
        self.objects.read().get(key).map(|o| o.permission)
    }

    /// All keys in lexical order
    pub fn keys(&self) -> Vec<String> {
        self.objects.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    pub fn counts(&self) -> OpCounts {
        let c = &self.counters;
        OpCounts {
            list: c.list.load(Ordering::SeqCst),
            exists: c.exists.load(Ordering::SeqCst),
            get: c.get.load(Ordering::SeqCst),
            put: c.put.load(Ordering::SeqCst),
            delete: c.delete.load(Ordering::SeqCst),
            delete_batch: c.delete_batch.load(Ordering::SeqCst),
        }
    }

    /// Number of keys sent in each bulk delete, in call order
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.lock().clone()
    }
}

impl ObjectStore for MemoryStore {
    fn list_page(&self, prefix: &str, marker: Option<&str>, max_keys: usize) -> Result<ListPage> {
        self.counters.list.fetch_add(1, Ordering::SeqCst);

        let objects = self.objects.read();
        let lower = match marker {
            Some(marker) => Bound::Excluded(marker.to_string()),
            None => Bound::Included(prefix.to_string()),
        };

        let mut page: Vec<ObjectInfo> = objects
            .range((lower, Bound::Unbounded))
            .skip_while(|(key, _)| !key.starts_with(prefix) && key.as_str() < prefix)
            .take_while(|(key, _)| key.starts_with(prefix))
            .take(max_keys.saturating_add(1))
            .map(|(key, object)| ObjectInfo {
                key: key.clone(),
                size: object.data.len() as u64,
                etag: Some(format!("\"{}\"", object.etag)),
                last_modified: None,
            })
            .collect();

        let is_truncated = page.len() > max_keys;
        page.truncate(max_keys);

        Ok(ListPage {
            objects: page,
            is_truncated,
        })
    }

    fn exists(&self, key: &str) -> Result<bool> {
        self.counters.exists.fetch_add(1, Ordering::SeqCst);
        Ok(self.objects.read().contains_key(key))
    }

    fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.counters.get.fetch_add(1, Ordering::SeqCst);
        self.objects
            .read()
            .get(key)
            .map(|o| o.data.clone())
            .ok_or_else(|| Error::NotFoundError(format!("Object {} does not exist", key)))
    }

    fn put(&self, key: &str, data: &[u8], content_type: &str, permission: Permission) -> Result<()> {
        self.counters.put.fetch_add(1, Ordering::SeqCst);
        let object = StoredObject {
            data: data.to_vec(),
            etag: md5_hex(data),
            content_type: content_type.to_string(),
            permission,
        };
        self.objects.write().insert(key.to_string(), object);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.counters.delete.fetch_add(1, Ordering::SeqCst);
        self.objects.write().remove(key);
        Ok(())
    }

    fn delete_batch(&self, keys: &[String]) -> Result<()> {
        self.counters.delete_batch.fetch_add(1, Ordering::SeqCst);
        if keys.len() > super::MAX_DELETE_BATCH {
            return Err(Error::StoreError(format!(
                "Bulk delete of {} keys exceeds the limit of {}",
                keys.len(),
                super::MAX_DELETE_BATCH
            )));
        }

        self.batch_sizes.lock().push(keys.len());
        let mut objects = self.objects.write();
        for key in keys {
            objects.remove(key);
        }
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

/// Connector handing out one shared [`MemoryStore`] per bucket name
#[derive(Debug, Default)]
pub struct MemoryConnector {
    buckets: Mutex<HashMap<String, Arc<MemoryStore>>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// The store behind a bucket name, created on first use
    pub fn store(&self, bucket: &str) -> Arc<MemoryStore> {
        self.buckets
            .lock()
            .entry(bucket.to_string())
            .or_insert_with(|| Arc::new(MemoryStore::new()))
            .clone()
    }
}

impl StoreConnector for MemoryConnector {
    fn connect(&self, bucket: &str) -> Result<Arc<dyn ObjectStore>> {
        Ok(self.store(bucket))
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
