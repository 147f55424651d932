// src/store/dry_run.rs

//! Dry-run decorator
//!
//! Wraps any [`ObjectStore`]: reads pass through untouched, writes and
//! deletes are logged and reported as successful without reaching the
//! wrapped store.

use super::{ListPage, ObjectStore, Permission};
use crate::error::Result;
use std::sync::Arc;
use tracing::info;

pub struct DryRunStore {
    inner: Arc<dyn ObjectStore>,
}

impl DryRunStore {
    pub fn new(inner: Arc<dyn ObjectStore>) -> Self {
        Self { inner }
    }
}

impl ObjectStore for DryRunStore {
    fn list_page(&self, prefix: &str, marker: Option<&str>, max_keys: usize) -> Result<ListPage> {
        self.inner.list_page(prefix, marker, max_keys)
    }

    fn exists(&self, key: &str) -> Result<bool> {
        self.inner.exists(key)
    }

    fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.inner.get(key)
    }

    fn put(&self, key: &str, data: &[u8], content_type: &str, permission: Permission) -> Result<()> {
        info!(
            "[dry run] would upload {} ({} bytes, {}, {})",
            key,
            data.len(),
            content_type,
            permission
        );
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        info!("[dry run] would delete {}", key);
        Ok(())
    }

    fn delete_batch(&self, keys: &[String]) -> Result<()> {
        info!("[dry run] would delete {} objects", keys.len());
        for key in keys {
            info!("[dry run]   {}", key);
        }
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        self.inner.backend_name()
    }
}
