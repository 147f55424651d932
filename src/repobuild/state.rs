// src/repobuild/state.rs
//! Shared job-status primitives
//!
//! A build job's state is written from one thread per remote repository:
//! errors go into an append-only [`Catcher`], and the completion flag flips
//! from false to true exactly once.

use crate::catcher::Catcher;
use crate::config::PackageFormat;
use crate::error::Error;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Allocate a job id of the form `build-<format>-repo.<n>`
pub fn next_job_id(format: PackageFormat) -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    format!("build-{}-repo.{}", format, COUNTER.fetch_add(1, Ordering::Relaxed))
}

#[derive(Debug, Default)]
struct Progress {
    completed: bool,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

/// Mutable state of one build job
#[derive(Debug, Default)]
pub struct JobState {
    errors: Catcher,
    progress: Mutex<Progress>,
    working_dirs: Mutex<Vec<String>>,
}

impl JobState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&self, err: Error) {
        self.errors.add(err);
    }

    pub fn has_errors(&self) -> bool {
        self.errors.has_errors()
    }

    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    pub fn error_messages(&self) -> Vec<String> {
        self.errors.messages()
    }

    pub fn add_working_dir(&self, remote: &str) {
        self.working_dirs.lock().push(remote.to_string());
    }

    pub fn working_dirs(&self) -> Vec<String> {
        self.working_dirs.lock().clone()
    }

    pub fn mark_started(&self) {
        let mut progress = self.progress.lock();
        if progress.started_at.is_none() {
            progress.started_at = Some(Utc::now());
        }
    }

    /// Flip the completion flag; returns false if it was already set
    pub fn mark_complete(&self) -> bool {
        let mut progress = self.progress.lock();
        if progress.completed {
            return false;
        }
        progress.completed = true;
        progress.finished_at = Some(Utc::now());
        true
    }

    pub fn is_complete(&self) -> bool {
        self.progress.lock().completed
    }

    /// Snapshot for reporting
    pub fn status(&self, id: &str, kind: &str) -> JobStatus {
        let progress = self.progress.lock();
        let errors = self.errors.messages();
        let duration_secs = match (progress.started_at, progress.finished_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds() as f64 / 1000.0),
            _ => None,
        };

        JobStatus {
            id: id.to_string(),
            kind: kind.to_string(),
            completed: progress.completed,
            error: if errors.is_empty() {
                None
            } else {
                Some(errors.join("\n"))
            },
            errors,
            started_at: progress.started_at,
            finished_at: progress.finished_at,
            duration_secs,
        }
    }
}

/// Serializable job status, as reported to callers and submission services
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub id: String,
    pub kind: String,
    pub completed: bool,
    pub errors: Vec<String>,
    /// All error messages joined, absent on success
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_secs: Option<f64>,
}

impl JobStatus {
    pub fn succeeded(&self) -> bool {
        self.completed && self.errors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_ids_are_unique() {
        let a = next_job_id(PackageFormat::Rpm);
        let b = next_job_id(PackageFormat::Rpm);
        assert!(a.starts_with("build-rpm-repo."));
        assert_ne!(a, b);
    }

    #[test]
    fn test_complete_exactly_once() {
        let state = JobState::new();
        state.mark_started();
        assert!(!state.is_complete());
        assert!(state.mark_complete());
        assert!(!state.mark_complete());
        assert!(state.is_complete());
    }

    #[test]
    fn test_status_snapshot() {
        let state = JobState::new();
        state.mark_started();
        state.add_error(Error::StoreError("boom".to_string()));
        state.mark_complete();

        let status = state.status("build-deb-repo.1", "build-repo");
        assert!(status.completed);
        assert!(!status.succeeded());
        assert_eq!(status.errors, vec!["Store error: boom"]);
        assert_eq!(status.error.as_deref(), Some("Store error: boom"));
        assert!(status.duration_secs.is_some());

        let json = serde_json::to_string(&status).unwrap();
        let back: JobStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, "build-deb-repo.1");
    }
}
