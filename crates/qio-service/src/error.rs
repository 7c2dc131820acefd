//! Error types for the queue service.
//!
//! Three families of errors exist, matching who has to deal with them:
//!
//! - [`ServiceError`]: returned to whoever configures, starts or stops the
//!   service. Configuration problems surface here, before any thread runs.
//! - [`EnqueueError`]: returned to producers. It always hands the rejected
//!   item back so nothing is dropped silently.
//! - [`SinkError`]: returned by sinks. Workers never propagate it; they
//!   report it through the error reporter and move on.

use std::fmt;

use qio_core::CoreError;
use thiserror::Error;

/// Convenience type alias for `Result<T, ServiceError>`.
pub type Result<T> = std::result::Result<T, ServiceError>;

/// Lifecycle and configuration errors.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Invalid service configuration.
    ///
    /// ## Causes
    /// - No destinations configured
    /// - Zero worker threads or a zero flush interval
    /// - A builder was finished without a mapper or sink
    #[error("Configuration error: {0}")]
    Config(String),

    /// `start()` was called on a service that is running or stopped.
    #[error("Queue service already started")]
    AlreadyStarted,

    /// An operation needed a running service.
    #[error("Queue service is not running")]
    NotRunning,

    /// The OS refused to spawn a worker thread.
    #[error("Failed to spawn worker {worker}: {source}")]
    Spawn {
        worker: usize,
        #[source]
        source: std::io::Error,
    },

    /// Limits or accumulator settings rejected by the core.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The configuration file is not valid TOML for [`crate::ServiceConfig`].
    #[error("Failed to parse configuration: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// The configuration file could not be read.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure reported by a sink for one put call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    /// Throttling, timeouts, unavailable endpoints. Worth retrying.
    #[error("Transient sink failure: {0}")]
    Transient(String),

    /// Bad destination, rejected payload, missing permissions.
    #[error("Permanent sink failure: {0}")]
    Permanent(String),
}

impl SinkError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SinkError::Transient(_))
    }

    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            SinkError::Transient(_) => "transient",
            SinkError::Permanent(_) => "permanent",
        }
    }
}

/// An item the input queue refused. The item is handed back.
pub enum EnqueueError<In> {
    /// The bounded queue stayed full for the whole enqueue timeout.
    Full(In),
    /// The service has stopped, or never started and was dropped.
    Closed(In),
}

impl<In> EnqueueError<In> {
    /// Recover the rejected item.
    pub fn into_inner(self) -> In {
        match self {
            EnqueueError::Full(item) | EnqueueError::Closed(item) => item,
        }
    }

    pub fn is_full(&self) -> bool {
        matches!(self, EnqueueError::Full(_))
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, EnqueueError::Closed(_))
    }
}

impl<In> fmt::Debug for EnqueueError<In> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnqueueError::Full(_) => write!(f, "Full(..)"),
            EnqueueError::Closed(_) => write!(f, "Closed(..)"),
        }
    }
}

impl<In> fmt::Display for EnqueueError<In> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnqueueError::Full(_) => write!(f, "input queue is full"),
            EnqueueError::Closed(_) => write!(f, "input queue is closed"),
        }
    }
}

impl<In> std::error::Error for EnqueueError<In> {}
