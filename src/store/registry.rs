// src/store/registry.rs

//! Tracking of open bucket handles
//!
//! The registry is owned by whoever orchestrates a run and handed to the
//! buckets it creates; clones of a bucket register with the same registry.
//! It exists for bulk cleanup and leak reporting only, never for
//! coordinating operations.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// Identifier of one registered handle
pub type HandleId = u64;

#[derive(Debug, Default)]
struct Inner {
    next_id: AtomicU64,
    live: Mutex<HashMap<HandleId, String>>,
}

/// Shared set of currently open bucket handles
#[derive(Debug, Clone, Default)]
pub struct HandleRegistry {
    inner: Arc<Inner>,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh handle id
    pub fn next_id(&self) -> HandleId {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Record an open handle
    pub fn register(&self, id: HandleId, bucket: &str) {
        debug!("Registering bucket handle {} ({})", id, bucket);
        self.inner.live.lock().insert(id, bucket.to_string());
    }

    /// Forget a handle; returns whether it was registered
    pub fn remove(&self, id: HandleId) -> bool {
        self.inner.live.lock().remove(&id).is_some()
    }

    /// Number of open handles
    pub fn live(&self) -> usize {
        self.inner.live.lock().len()
    }

    /// Bucket names of open handles, sorted by handle id
    pub fn live_handles(&self) -> Vec<(HandleId, String)> {
        let mut handles: Vec<_> = self
            .inner
            .live
            .lock()
            .iter()
            .map(|(id, name)| (*id, name.clone()))
            .collect();
        handles.sort_by_key(|(id, _)| *id);
        handles
    }

    /// Report and forget every handle that is still open
    ///
    /// Returns the number of leaked handles.
    pub fn shutdown(&self) -> usize {
        let leaked: Vec<_> = self.inner.live.lock().drain().collect();
        for (id, bucket) in &leaked {
            warn!("Bucket handle {} ({}) was never closed", id, bucket);
        }
        leaked.len()
    }
}
