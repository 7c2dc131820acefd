//! Pipeline metrics.
//!
//! Two layers:
//!
//! - Process-wide Prometheus collectors in [`REGISTRY`], shared by every
//!   service in the process. Call [`init`] once (it is idempotent) and
//!   expose [`gather_text`] from whatever HTTP endpoint the application has.
//! - Per-service [`PipelineCounters`], plain atomics behind
//!   [`crate::QueueService::stats`], so one service's numbers can be read
//!   without the others mixed in.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Once;

use lazy_static::lazy_static;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

static INIT: Once = Once::new();

lazy_static! {
    /// Registry holding every qio collector.
    pub static ref REGISTRY: Registry = Registry::new();

    /// Items admitted into a batch
    pub static ref RECORDS_ACCEPTED_TOTAL: IntCounter = IntCounter::new(
        "qio_records_accepted_total",
        "Items accepted into a batch"
    ).expect("metric can be created");

    /// Items dropped before reaching a batch
    pub static ref RECORDS_REJECTED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("qio_records_rejected_total", "Items dropped before reaching a batch"),
        &["reason"]
    ).expect("metric can be created");

    /// Flushes by trigger
    pub static ref BATCHES_FLUSHED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("qio_batches_flushed_total", "Non-empty batches flushed"),
        &["trigger"]
    ).expect("metric can be created");

    /// Failed sink calls
    pub static ref SINK_FAILURES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("qio_sink_failures_total", "Failed sink put calls"),
        &["kind"]
    ).expect("metric can be created");

    /// Sealed batch payload size
    pub static ref BATCH_BYTES: Histogram = Histogram::with_opts(
        HistogramOpts::new("qio_batch_bytes", "Sealed batch payload size in bytes")
            .buckets(prometheus::exponential_buckets(1024.0, 4.0, 8).expect("valid buckets"))
    ).expect("metric can be created");

    /// Items per sealed batch
    pub static ref BATCH_RECORDS: Histogram = Histogram::with_opts(
        HistogramOpts::new("qio_batch_records", "Items per sealed batch")
            .buckets(vec![1.0, 10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 5000.0])
    ).expect("metric can be created");

    /// Workers currently consuming
    pub static ref WORKERS_RUNNING: IntGauge = IntGauge::new(
        "qio_workers_running",
        "Consumer workers currently running"
    ).expect("metric can be created");
}

/// Initialize metrics registry.
/// Can be called multiple times safely (idempotent)
pub fn init() {
    INIT.call_once(|| {
        REGISTRY
            .register(Box::new(RECORDS_ACCEPTED_TOTAL.clone()))
            .expect("records_accepted_total can be registered");
        REGISTRY
            .register(Box::new(RECORDS_REJECTED_TOTAL.clone()))
            .expect("records_rejected_total can be registered");
        REGISTRY
            .register(Box::new(BATCHES_FLUSHED_TOTAL.clone()))
            .expect("batches_flushed_total can be registered");
        REGISTRY
            .register(Box::new(SINK_FAILURES_TOTAL.clone()))
            .expect("sink_failures_total can be registered");
        REGISTRY
            .register(Box::new(BATCH_BYTES.clone()))
            .expect("batch_bytes can be registered");
        REGISTRY
            .register(Box::new(BATCH_RECORDS.clone()))
            .expect("batch_records can be registered");
        REGISTRY
            .register(Box::new(WORKERS_RUNNING.clone()))
            .expect("workers_running can be registered");
    });
}

/// Render every registered collector in the Prometheus text format.
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => String::from_utf8_lossy(&buffer).into_owned(),
        Err(e) => format!("# failed to encode metrics: {}\n", e),
    }
}

/// Per-service counters, updated by the workers.
#[derive(Debug, Default)]
pub struct PipelineCounters {
    pub(crate) enqueued: AtomicU64,
    pub(crate) accepted: AtomicU64,
    pub(crate) oversized: AtomicU64,
    pub(crate) unmappable: AtomicU64,
    pub(crate) delivered_items: AtomicU64,
    pub(crate) sink_failures: AtomicU64,
    pub(crate) flushes_saturated: AtomicU64,
    pub(crate) flushes_batch_full: AtomicU64,
    pub(crate) flushes_timeout: AtomicU64,
    pub(crate) flushes_shutdown: AtomicU64,
    pub(crate) fatal_workers: AtomicU64,
}

impl PipelineCounters {
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ServiceStats {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        ServiceStats {
            enqueued: load(&self.enqueued),
            accepted: load(&self.accepted),
            oversized: load(&self.oversized),
            unmappable: load(&self.unmappable),
            delivered_items: load(&self.delivered_items),
            sink_failures: load(&self.sink_failures),
            flushes_saturated: load(&self.flushes_saturated),
            flushes_batch_full: load(&self.flushes_batch_full),
            flushes_timeout: load(&self.flushes_timeout),
            flushes_shutdown: load(&self.flushes_shutdown),
            fatal_workers: load(&self.fatal_workers),
        }
    }
}

/// Point-in-time view of one service's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServiceStats {
    /// Items accepted by the input queue
    pub enqueued: u64,
    /// Items admitted into a batch
    pub accepted: u64,
    /// Items dropped for exceeding the record limit
    pub oversized: u64,
    /// Items the mapper could not encode
    pub unmappable: u64,
    /// Items in batches whose every put succeeded
    pub delivered_items: u64,
    /// Failed sink calls
    pub sink_failures: u64,
    pub flushes_saturated: u64,
    pub flushes_batch_full: u64,
    pub flushes_timeout: u64,
    pub flushes_shutdown: u64,
    /// Workers stopped by a configuration fatal error
    pub fatal_workers: u64,
}

impl ServiceStats {
    /// Non-empty flushes across all triggers.
    pub fn flushes(&self) -> u64 {
        self.flushes_saturated + self.flushes_batch_full + self.flushes_timeout + self.flushes_shutdown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registration() {
        init();
        init();
    }

    #[test]
    fn test_gather_text_contains_registered_metrics() {
        init();
        RECORDS_REJECTED_TOTAL.with_label_values(&["oversized"]).inc();
        let text = gather_text();
        assert!(text.contains("qio_records_rejected_total"));
        assert!(text.contains("qio_workers_running"));
    }

    #[test]
    fn test_counters_snapshot() {
        let counters = PipelineCounters::default();
        PipelineCounters::incr(&counters.flushes_timeout);
        PipelineCounters::incr(&counters.flushes_shutdown);
        PipelineCounters::add(&counters.accepted, 7);

        let stats = counters.snapshot();
        assert_eq!(stats.accepted, 7);
        assert_eq!(stats.flushes(), 2);
        assert_eq!(stats.oversized, 0);
    }
}
