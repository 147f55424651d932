// src/store/pool.rs

//! Fixed-size transfer worker pool
//!
//! Each [`super::Bucket`] owns one pool while open. Sync operations submit
//! every file-level [`SyncUnit`] up front, [`WorkerPool::wait`] until all
//! of them have finished processing, then drain [`WorkerPool::results`].

use super::ObjectInfo;
use super::bucket::Connection;
use crate::error::{Error, Result};
use parking_lot::{Condvar, Mutex};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, trace};

/// Transfer direction of a sync unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Local file to remote object
    Upload,
    /// Remote object to local file
    Download,
}

/// What a finished unit did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    Copied,
    /// Content already matched; nothing was sent
    Unchanged,
}

/// One file-level transfer
pub struct SyncUnit {
    pub direction: Direction,
    pub local: PathBuf,
    pub key: String,
    /// Remote record from the pre-fetched listing, if the object exists
    pub remote: Option<ObjectInfo>,
    pub deadline: Option<Instant>,
    conn: Arc<Connection>,
}

impl SyncUnit {
    pub(crate) fn upload(
        conn: Arc<Connection>,
        local: PathBuf,
        key: String,
        remote: Option<ObjectInfo>,
        deadline: Option<Instant>,
    ) -> Self {
        Self {
            direction: Direction::Upload,
            local,
            key,
            remote,
            deadline,
            conn,
        }
    }

    pub(crate) fn download(
        conn: Arc<Connection>,
        key: String,
        local: PathBuf,
        remote: Option<ObjectInfo>,
        deadline: Option<Instant>,
    ) -> Self {
        Self {
            direction: Direction::Download,
            local,
            key,
            remote,
            deadline,
            conn,
        }
    }

    fn execute(&self) -> Result<Transfer> {
        if let Some(deadline) = self.deadline
            && Instant::now() >= deadline
        {
            return Err(Error::DeadlineExceeded(format!(
                "{:?} of {} not started before deadline",
                self.direction, self.key
            )));
        }

        if let Some(remote) = &self.remote
            && remote.matches_local(&self.local)?
        {
            trace!("{} unchanged, skipping", self.key);
            return Ok(Transfer::Unchanged);
        }

        match self.direction {
            Direction::Upload => self.conn.upload(&self.local, &self.key, self.deadline)?,
            Direction::Download => self.conn.download(&self.key, &self.local, self.deadline)?,
        }
        Ok(Transfer::Copied)
    }

    fn run(self) -> UnitOutcome {
        let result = self.execute();
        UnitOutcome {
            direction: self.direction,
            key: self.key,
            local: self.local,
            result,
        }
    }
}

/// Terminal outcome of one unit
#[derive(Debug)]
pub struct UnitOutcome {
    pub direction: Direction,
    pub key: String,
    pub local: PathBuf,
    pub result: Result<Transfer>,
}

/// Count of submitted units that have not finished processing
#[derive(Debug, Default)]
struct Pending {
    count: Mutex<usize>,
    idle: Condvar,
}

impl Pending {
    fn add(&self) {
        *self.count.lock() += 1;
    }

    fn done(&self) {
        let mut count = self.count.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.idle.notify_all();
        }
    }

    fn wait(&self) {
        let mut count = self.count.lock();
        while *count > 0 {
            self.idle.wait(&mut count);
        }
    }
}

/// Marks a unit finished even if processing panics
struct DoneGuard<'a>(&'a Pending);

impl Drop for DoneGuard<'_> {
    fn drop(&mut self) {
        self.0.done();
    }
}

/// Bounded pool of transfer threads
pub struct WorkerPool {
    size: usize,
    queue: Option<flume::Sender<SyncUnit>>,
    workers: Vec<JoinHandle<()>>,
    pending: Arc<Pending>,
    outcomes_tx: flume::Sender<UnitOutcome>,
    outcomes_rx: flume::Receiver<UnitOutcome>,
}

impl WorkerPool {
    /// Create a stopped pool of `size` workers (at least one)
    pub fn new(size: usize) -> Self {
        let (outcomes_tx, outcomes_rx) = flume::unbounded();
        Self {
            size: size.max(1),
            queue: None,
            workers: Vec::new(),
            pending: Arc::new(Pending::default()),
            outcomes_tx,
            outcomes_rx,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_started(&self) -> bool {
        self.queue.is_some()
    }

    /// Spawn the workers; a no-op on a running pool
    pub fn start(&mut self) -> Result<()> {
        if self.is_started() {
            return Ok(());
        }

        let (tx, rx) = flume::bounded::<SyncUnit>(self.size * 2);
        for i in 0..self.size {
            let rx = rx.clone();
            let pending = Arc::clone(&self.pending);
            let outcomes = self.outcomes_tx.clone();

            let handle = thread::Builder::new()
                .name(format!("pkgrelay-sync-{i}"))
                .spawn(move || {
                    while let Ok(unit) = rx.recv() {
                        let _done = DoneGuard(&pending);
                        // Receiver outlives every worker
                        let _ = outcomes.send(unit.run());
                    }
                })
                .map_err(|e| {
                    Error::InitError(format!("Failed to spawn sync worker {}: {}", i, e))
                });

            match handle {
                Ok(handle) => self.workers.push(handle),
                Err(e) => {
                    // Release the workers that did start
                    drop(tx);
                    self.join_workers();
                    return Err(e);
                }
            }
        }

        self.queue = Some(tx);
        debug!("Started sync worker pool with {} workers", self.size);
        Ok(())
    }

    /// Queue a unit, blocking while the queue is full
    pub fn submit(&self, unit: SyncUnit) -> Result<()> {
        let queue = self
            .queue
            .as_ref()
            .ok_or_else(|| Error::InitError("Worker pool is not started".to_string()))?;

        self.pending.add();
        queue.send(unit).map_err(|_| {
            self.pending.done();
            Error::InitError("Worker pool queue is closed".to_string())
        })
    }

    /// Block until every submitted unit has finished processing
    pub fn wait(&self) {
        self.pending.wait();
    }

    /// Take the outcomes of all units finished so far
    ///
    /// Each outcome is handed out exactly once.
    pub fn results(&self) -> Vec<UnitOutcome> {
        self.outcomes_rx.try_iter().collect()
    }

    /// Finish queued work and release the workers; safe to call repeatedly
    pub fn stop(&mut self) {
        if self.queue.take().is_none() {
            return;
        }
        self.join_workers();
        debug!("Stopped sync worker pool");
    }

    fn join_workers(&mut self) {
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop();
    }
}
