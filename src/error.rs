// src/error.rs

//! Error types for repository rebuilding and object-store synchronization

use crate::catcher::AggregateError;
use thiserror::Error;

/// Result type used throughout pkgrelay
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the store layer and the build job
#[derive(Error, Debug)]
pub enum Error {
    /// Local filesystem failure (directory creation, linking, reads, writes)
    #[error("I/O error: {0}")]
    IoError(String),

    /// Invalid or incomplete configuration
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Failure to initialize a component (queues, clients, runtimes)
    #[error("Initialization error: {0}")]
    InitError(String),

    /// Failure reported by an object-store backend
    #[error("Store error: {0}")]
    StoreError(String),

    /// Requested object or file does not exist
    #[error("Not found: {0}")]
    NotFoundError(String),

    /// Malformed input (versions, expressions, object keys)
    #[error("Parse error: {0}")]
    ParseError(String),

    /// A remote operation failed on every attempt of its retry budget
    #[error("{operation} {target} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        operation: &'static str,
        target: String,
        attempts: u32,
        #[source]
        source: Box<Error>,
    },

    /// The run's deadline passed before the operation could complete
    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// The signing capability failed or was not configured
    #[error("Signing failed: {0}")]
    SigningFailed(String),

    /// Repository metadata could not be regenerated
    #[error("Build failed: {0}")]
    BuildFailed(String),

    /// Package format the operation cannot handle
    #[error("Unsupported package format: {0}")]
    UnsupportedFormat(String),

    /// A structured error annotated with where it happened
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<Error>,
    },

    /// Several independent failures collected by a [`crate::Catcher`]
    #[error(transparent)]
    Aggregate(#[from] AggregateError),
}

impl Error {
    /// Number of leaf errors this error represents
    pub fn count(&self) -> usize {
        match self {
            Error::Aggregate(agg) => agg.errors().iter().map(Error::count).sum(),
            Error::Context { source, .. } => source.count(),
            _ => 1,
        }
    }

    /// Whether this error, or any error it wraps, is a deadline failure
    pub fn is_deadline(&self) -> bool {
        match self {
            Error::DeadlineExceeded(_) => true,
            Error::RetriesExhausted { source, .. } | Error::Context { source, .. } => {
                source.is_deadline()
            }
            Error::Aggregate(agg) => agg.errors().iter().any(Error::is_deadline),
            _ => false,
        }
    }

    /// Whether another attempt of the same remote call could succeed
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Error::NotFoundError(_)
                | Error::ConfigError(_)
                | Error::ParseError(_)
                | Error::DeadlineExceeded(_)
                | Error::UnsupportedFormat(_)
                | Error::RetriesExhausted { .. }
                | Error::Context { .. }
                | Error::Aggregate(_)
        )
    }

    /// Prefix the message with additional context
    ///
    /// Message variants keep their variant; structured errors are wrapped
    /// in [`Error::Context`].
    pub fn context(self, context: impl std::fmt::Display) -> Self {
        match self {
            Error::IoError(msg) => Error::IoError(format!("{context}: {msg}")),
            Error::ConfigError(msg) => Error::ConfigError(format!("{context}: {msg}")),
            Error::InitError(msg) => Error::InitError(format!("{context}: {msg}")),
            Error::StoreError(msg) => Error::StoreError(format!("{context}: {msg}")),
            Error::NotFoundError(msg) => Error::NotFoundError(format!("{context}: {msg}")),
            Error::ParseError(msg) => Error::ParseError(format!("{context}: {msg}")),
            Error::DeadlineExceeded(msg) => Error::DeadlineExceeded(format!("{context}: {msg}")),
            Error::SigningFailed(msg) => Error::SigningFailed(format!("{context}: {msg}")),
            Error::BuildFailed(msg) => Error::BuildFailed(format!("{context}: {msg}")),
            Error::UnsupportedFormat(msg) => Error::UnsupportedFormat(format!("{context}: {msg}")),
            other => Error::Context {
                context: context.to_string(),
                source: Box::new(other),
            },
        }
    }
}
