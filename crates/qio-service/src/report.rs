//! Failure reporting.
//!
//! Workers never return errors to producers: by the time something fails,
//! the producer has long moved on. Every failure is instead handed to an
//! [`ErrorReporter`] together with whatever the worker still owns (the item,
//! or the size of the batch that was lost). The default reporter logs.
//!
//! ```text
//! failure                 owner handed back      worker continues?
//! ----------------------  ---------------------  -----------------
//! Oversized               item                   yes
//! Unmappable              item                   yes
//! SinkFailed              batch size             yes
//! ConfigurationFatal      item                   no, worker stops
//! ```

use std::fmt;

use crossbeam::channel::{Receiver, Sender};
use qio_core::CoreError;
use tracing::{error, warn};

use crate::error::SinkError;

/// Something the pipeline could not deliver.
pub enum PipelineFailure<In> {
    /// The item's record exceeds the per-record limit and was dropped.
    Oversized { item: In, size: usize, limit: usize },

    /// The mapper (or codec) failed on this item.
    Unmappable { item: In, error: CoreError },

    /// A put to `destination` failed. The batch is not retried.
    SinkFailed {
        destination: String,
        records: usize,
        items: usize,
        error: SinkError,
    },

    /// A record did not fit into a fresh, empty batch. The limits make the
    /// pipeline unable to progress, so the worker stops.
    ConfigurationFatal {
        worker: usize,
        item: In,
        detail: String,
    },
}

impl<In> PipelineFailure<In> {
    /// Short label used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineFailure::Oversized { .. } => "oversized",
            PipelineFailure::Unmappable { .. } => "unmappable",
            PipelineFailure::SinkFailed { .. } => "sink_failed",
            PipelineFailure::ConfigurationFatal { .. } => "fatal",
        }
    }

    /// The rejected item, when the failure concerns a single item.
    pub fn item(&self) -> Option<&In> {
        match self {
            PipelineFailure::Oversized { item, .. }
            | PipelineFailure::Unmappable { item, .. }
            | PipelineFailure::ConfigurationFatal { item, .. } => Some(item),
            PipelineFailure::SinkFailed { .. } => None,
        }
    }

    pub fn into_item(self) -> Option<In> {
        match self {
            PipelineFailure::Oversized { item, .. }
            | PipelineFailure::Unmappable { item, .. }
            | PipelineFailure::ConfigurationFatal { item, .. } => Some(item),
            PipelineFailure::SinkFailed { .. } => None,
        }
    }
}

impl<In> fmt::Debug for PipelineFailure<In> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineFailure::Oversized { size, limit, .. } => f
                .debug_struct("Oversized")
                .field("size", size)
                .field("limit", limit)
                .finish_non_exhaustive(),
            PipelineFailure::Unmappable { error, .. } => f
                .debug_struct("Unmappable")
                .field("error", error)
                .finish_non_exhaustive(),
            PipelineFailure::SinkFailed {
                destination,
                records,
                items,
                error,
            } => f
                .debug_struct("SinkFailed")
                .field("destination", destination)
                .field("records", records)
                .field("items", items)
                .field("error", error)
                .finish(),
            PipelineFailure::ConfigurationFatal { worker, detail, .. } => f
                .debug_struct("ConfigurationFatal")
                .field("worker", worker)
                .field("detail", detail)
                .finish_non_exhaustive(),
        }
    }
}

impl<In> fmt::Display for PipelineFailure<In> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineFailure::Oversized { size, limit, .. } => {
                write!(f, "record of {} bytes exceeds the {} byte limit", size, limit)
            }
            PipelineFailure::Unmappable { error, .. } => write!(f, "item not mappable: {}", error),
            PipelineFailure::SinkFailed {
                destination,
                records,
                error,
                ..
            } => write!(f, "put of {} records to '{}' failed: {}", records, destination, error),
            PipelineFailure::ConfigurationFatal { worker, detail, .. } => {
                write!(f, "worker {} stopped: {}", worker, detail)
            }
        }
    }
}

/// Receives every failure the workers observe.
///
/// Called from worker threads; implementations must not block for long.
pub trait ErrorReporter<In>: Send + Sync {
    fn report(&self, failure: PipelineFailure<In>);
}

impl<In, F> ErrorReporter<In> for F
where
    F: Fn(PipelineFailure<In>) + Send + Sync,
{
    fn report(&self, failure: PipelineFailure<In>) {
        self(failure)
    }
}

/// Logs failures: WARN for dropped items and failed puts, ERROR for fatal ones.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl<In> ErrorReporter<In> for LogReporter {
    fn report(&self, failure: PipelineFailure<In>) {
        match &failure {
            PipelineFailure::Oversized { size, limit, .. } => {
                warn!(size = size, limit = limit, "Dropping oversized record");
            }
            PipelineFailure::Unmappable { error, .. } => {
                warn!(error = %error, "Dropping unmappable item");
            }
            PipelineFailure::SinkFailed {
                destination,
                records,
                items,
                error,
            } => {
                warn!(
                    destination = %destination,
                    records = records,
                    items = items,
                    retryable = error.is_retryable(),
                    error = %error,
                    "Sink put failed, batch dropped"
                );
            }
            PipelineFailure::ConfigurationFatal { worker, detail, .. } => {
                error!(worker = worker, detail = %detail, "Worker stopped by configuration error");
            }
        }
    }
}

/// Forwards failures to a channel, for callers that want to inspect or
/// re-submit rejected items.
pub struct ChannelReporter<In> {
    tx: Sender<PipelineFailure<In>>,
}

impl<In> ChannelReporter<In> {
    /// Reporter plus the receiving end of an unbounded channel.
    pub fn new() -> (Self, Receiver<PipelineFailure<In>>) {
        let (tx, rx) = crossbeam::channel::unbounded();
        (Self { tx }, rx)
    }
}

impl<In: Send> ErrorReporter<In> for ChannelReporter<In> {
    fn report(&self, failure: PipelineFailure<In>) {
        if let Err(err) = self.tx.send(failure) {
            LogReporter.report(err.into_inner());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_and_item() {
        let failure = PipelineFailure::Oversized {
            item: "big".to_string(),
            size: 2000,
            limit: 1000,
        };
        assert_eq!(failure.kind(), "oversized");
        assert_eq!(failure.item().map(String::as_str), Some("big"));
        assert_eq!(failure.to_string(), "record of 2000 bytes exceeds the 1000 byte limit");

        let failure: PipelineFailure<String> = PipelineFailure::SinkFailed {
            destination: "s".into(),
            records: 3,
            items: 3,
            error: SinkError::Permanent("gone".into()),
        };
        assert!(failure.item().is_none());
        assert!(failure.into_item().is_none());
    }

    #[test]
    fn test_channel_reporter() {
        let (reporter, rx) = ChannelReporter::new();
        reporter.report(PipelineFailure::Unmappable {
            item: 7u32,
            error: CoreError::EmptyRecord,
        });
        let failure = rx.try_recv().unwrap();
        assert_eq!(failure.kind(), "unmappable");
        assert_eq!(failure.into_item(), Some(7));
    }

    #[test]
    fn test_channel_reporter_falls_back_to_log_when_closed() {
        let (reporter, rx) = ChannelReporter::new();
        drop(rx);
        reporter.report(PipelineFailure::Oversized {
            item: 1u8,
            size: 10,
            limit: 5,
        });
    }

    #[test]
    fn test_closure_reporter() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let seen = AtomicUsize::new(0);
        let reporter = |failure: PipelineFailure<u32>| {
            seen.fetch_add(failure.into_item().unwrap_or(0) as usize, Ordering::SeqCst);
        };
        reporter.report(PipelineFailure::ConfigurationFatal {
            worker: 0,
            item: 5,
            detail: "no room".into(),
        });
        assert_eq!(seen.load(Ordering::SeqCst), 5);
    }
}
