//! Sink abstraction.
//!
//! A sink delivers sealed batches to named destinations (streams). Workers
//! call it synchronously from their own thread, so implementations must be
//! `Send + Sync` and may block for the duration of a put.

use std::fmt;
use std::sync::Arc;

use qio_core::WireRecord;
use serde::{Deserialize, Serialize};

use crate::error::SinkError;

/// How a sealed batch is handed to the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PutMode {
    /// One `put_one` call per record.
    Single,
    /// One `put_batch` call per destination.
    #[default]
    Batch,
}

impl fmt::Display for PutMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PutMode::Single => write!(f, "SINGLE"),
            PutMode::Batch => write!(f, "BATCH"),
        }
    }
}

/// Destination for sealed batches.
///
/// Errors are reported, never retried by the worker. Wrap a sink in
/// [`crate::retry::RetryingSink`] to retry transient failures.
pub trait Sink: Send + Sync {
    /// Deliver one record to `destination`.
    fn put_one(
        &self,
        record: &WireRecord,
        destination: &str,
        partition_key: Option<&str>,
    ) -> Result<(), SinkError>;

    /// Deliver a whole batch to `destination` in one call.
    fn put_batch(
        &self,
        records: &[WireRecord],
        destination: &str,
        partition_key: Option<&str>,
    ) -> Result<(), SinkError>;
}

impl<S: Sink + ?Sized> Sink for Arc<S> {
    fn put_one(
        &self,
        record: &WireRecord,
        destination: &str,
        partition_key: Option<&str>,
    ) -> Result<(), SinkError> {
        (**self).put_one(record, destination, partition_key)
    }

    fn put_batch(
        &self,
        records: &[WireRecord],
        destination: &str,
        partition_key: Option<&str>,
    ) -> Result<(), SinkError> {
        (**self).put_batch(records, destination, partition_key)
    }
}

impl<S: Sink + ?Sized> Sink for Box<S> {
    fn put_one(
        &self,
        record: &WireRecord,
        destination: &str,
        partition_key: Option<&str>,
    ) -> Result<(), SinkError> {
        (**self).put_one(record, destination, partition_key)
    }

    fn put_batch(
        &self,
        records: &[WireRecord],
        destination: &str,
        partition_key: Option<&str>,
    ) -> Result<(), SinkError> {
        (**self).put_batch(records, destination, partition_key)
    }
}
