// src/catcher.rs

//! Error aggregation for concurrent operations
//!
//! A [`Catcher`] collects failures from many threads without ever
//! short-circuiting: callers keep going after a failure and resolve the
//! catcher once everything has joined.

use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::fmt;

/// Several errors reported as one
#[derive(Debug)]
pub struct AggregateError {
    errors: Vec<Error>,
}

impl AggregateError {
    pub fn new(errors: Vec<Error>) -> Self {
        Self { errors }
    }

    /// The collected errors, in the order they were added
    pub fn errors(&self) -> &[Error] {
        &self.errors
    }

    pub fn into_errors(self) -> Vec<Error> {
        self.errors
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} errors:", self.errors.len())?;
        for err in &self.errors {
            write!(f, "\n  - {err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}

/// Thread-safe, append-only error collector
#[derive(Debug, Default)]
pub struct Catcher {
    errors: Mutex<Vec<Error>>,
}

impl Catcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an error
    pub fn add(&self, err: Error) {
        self.errors.lock().push(err);
    }

    /// Record the error of a unit result, if any
    pub fn add_result(&self, result: Result<()>) {
        if let Err(err) = result {
            self.add(err);
        }
    }

    /// Record the error of a result, if any, and return its value
    pub fn check<T>(&self, result: Result<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                self.add(err);
                None
            }
        }
    }

    /// Record every error yielded by an iterator of results
    pub fn extend<I>(&self, results: I)
    where
        I: IntoIterator<Item = Result<()>>,
    {
        let mut errors = self.errors.lock();
        errors.extend(results.into_iter().filter_map(|r| r.err()));
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.lock().is_empty()
    }

    /// Render every collected error, one per line
    pub fn messages(&self) -> Vec<String> {
        self.errors.lock().iter().map(|e| e.to_string()).collect()
    }

    /// Turn the collected errors into a single result
    ///
    /// No errors resolves to `Ok(())`, one error is returned as is, and
    /// more than one is wrapped in [`Error::Aggregate`].
    pub fn resolve(self) -> Result<()> {
        let mut errors = self.errors.into_inner();
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Error::Aggregate(AggregateError::new(errors))),
        }
    }
}
