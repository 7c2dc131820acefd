//! Consumer worker.
//!
//! Each worker runs on its own OS thread and owns exactly one accumulator at
//! a time. The loop blocks on the shared input queue for at most the time
//! left until the next timed flush:
//!
//! ```text
//!            ┌─────────────────────────────────────────────┐
//!            │ select!                                     │
//!            │   input     -> offer item                   │
//!            │                 BatchFull  -> flush, retry  │
//!            │                 saturated  -> flush         │
//!            │   shutdown  -> drain queue, final flush     │
//!            │   timeout   -> (nothing)                    │
//!            └──────────────┬──────────────────────────────┘
//!                           │
//!                 flush interval elapsed? -> flush (timeout)
//! ```
//!
//! Flushing swaps in a fresh accumulator, seals the full
//! one, derives the partition key once, and puts the batch to every
//! destination in order. Sink failures are reported and the batch is gone;
//! the worker never re-enqueues.

use std::mem;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::channel::{select, Receiver};
use qio_core::{Accumulator, Batch, Entry, Offer};
use tracing::{debug, error, info, warn};

use crate::error::SinkError;
use crate::metrics::{self, PipelineCounters};
use crate::partition::PartitionKeyFn;
use crate::report::{ErrorReporter, PipelineFailure};
use crate::traits::{PutMode, Sink};
use crate::trigger::FlushTrigger;

/// Why a batch was flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// The accumulator reported it had no room for another expected record.
    Saturated,
    /// An offered record did not fit.
    BatchFull,
    /// The flush interval elapsed.
    Timeout,
    /// The service is stopping.
    Shutdown,
}

impl FlushReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlushReason::Saturated => "saturated",
            FlushReason::BatchFull => "batch_full",
            FlushReason::Timeout => "timeout",
            FlushReason::Shutdown => "shutdown",
        }
    }
}

/// How a worker thread ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// Shutdown requested (or queue closed); the queue was drained.
    Drained,
    /// A record could not fit an empty batch; the worker gave up.
    Fatal,
}

/// Creates the empty accumulator for each flush cycle.
pub(crate) type NewAccumulator<In> = Arc<dyn Fn() -> Box<dyn Accumulator<In>> + Send + Sync>;

/// Collaborators shared by every worker of one service.
pub(crate) struct WorkerContext<In> {
    pub(crate) new_accumulator: NewAccumulator<In>,
    pub(crate) sink: Arc<dyn Sink>,
    pub(crate) destinations: Vec<String>,
    pub(crate) put_mode: PutMode,
    pub(crate) partition_key: Option<Arc<dyn PartitionKeyFn<In>>>,
    pub(crate) reporter: Arc<dyn ErrorReporter<In>>,
    pub(crate) counters: Arc<PipelineCounters>,
    pub(crate) flush_interval: Duration,
    pub(crate) drain_timeout: Duration,
}

/// A record that did not fit a fresh accumulator.
struct Fatal<In> {
    item: In,
    detail: String,
}

pub(crate) struct ConsumerWorker<In> {
    id: usize,
    ctx: Arc<WorkerContext<In>>,
    input: Receiver<In>,
    shutdown: Receiver<()>,
    accumulator: Box<dyn Accumulator<In>>,
    trigger: FlushTrigger,
}

impl<In: Send + 'static> ConsumerWorker<In> {
    pub(crate) fn new(
        id: usize,
        ctx: Arc<WorkerContext<In>>,
        input: Receiver<In>,
        shutdown: Receiver<()>,
    ) -> Self {
        let accumulator = (ctx.new_accumulator)();
        let trigger = FlushTrigger::new(ctx.flush_interval);
        Self {
            id,
            ctx,
            input,
            shutdown,
            accumulator,
            trigger,
        }
    }

    /// Consume until shutdown, then drain. Blocks the calling thread.
    pub(crate) fn run(mut self) -> WorkerExit {
        info!(worker = self.id, "Consumer worker started");
        metrics::WORKERS_RUNNING.inc();

        let exit = match self.consume() {
            Ok(()) => self.drain(),
            Err(fatal) => self.fail(fatal),
        };

        metrics::WORKERS_RUNNING.dec();
        exit
    }

    fn consume(&mut self) -> Result<(), Fatal<In>> {
        let input = self.input.clone();
        let shutdown = self.shutdown.clone();

        loop {
            let wait = self.trigger.remaining();
            select! {
                recv(input) -> msg => match msg {
                    Ok(item) => self.handle(item)?,
                    Err(_) => {
                        debug!(worker = self.id, "Input queue disconnected");
                        return Ok(());
                    }
                },
                recv(shutdown) -> _ => {
                    debug!(worker = self.id, "Shutdown requested");
                    return Ok(());
                },
                default(wait) => {},
            }

            if self.trigger.is_due() {
                self.flush(FlushReason::Timeout);
            }
        }
    }

    /// Pull whatever is still queued, bounded by the drain timeout, then flush.
    fn drain(&mut self) -> WorkerExit {
        let deadline = Instant::now() + self.ctx.drain_timeout;
        let mut drained = 0usize;

        while Instant::now() < deadline {
            match self.input.try_recv() {
                Ok(item) => {
                    drained += 1;
                    if let Err(fatal) = self.handle(item) {
                        return self.fail(fatal);
                    }
                }
                Err(_) => break,
            }
        }

        let left = self.input.len();
        if left > 0 {
            warn!(
                worker = self.id,
                remaining = left,
                "Drain timeout reached with items still queued"
            );
        }

        self.flush(FlushReason::Shutdown);
        info!(worker = self.id, drained = drained, "Consumer worker stopped");
        WorkerExit::Drained
    }

    fn fail(&mut self, fatal: Fatal<In>) -> WorkerExit {
        error!(
            worker = self.id,
            detail = %fatal.detail,
            "Record does not fit an empty batch, stopping worker"
        );
        PipelineCounters::incr(&self.ctx.counters.fatal_workers);
        metrics::RECORDS_REJECTED_TOTAL
            .with_label_values(&["fatal"])
            .inc();

        self.flush(FlushReason::Shutdown);
        self.ctx.reporter.report(PipelineFailure::ConfigurationFatal {
            worker: self.id,
            item: fatal.item,
            detail: fatal.detail,
        });
        WorkerExit::Fatal
    }

    /// Offer one item, flushing and retrying once when the batch is full.
    fn handle(&mut self, item: In) -> Result<(), Fatal<In>> {
        let offer = self.accumulator.offer(item);
        let Some(entry) = self.settle(offer) else {
            return Ok(());
        };

        self.flush(FlushReason::BatchFull);

        let offer = self.accumulator.offer_entry(entry);
        match self.settle(offer) {
            None => Ok(()),
            Some(entry) => Err(self.fatal(entry)),
        }
    }

    /// Account for an offer outcome. Hands `BatchFull` entries back.
    fn settle(&mut self, offer: Offer<In>) -> Option<Entry<In>> {
        match offer {
            Offer::Accepted => {
                PipelineCounters::incr(&self.ctx.counters.accepted);
                metrics::RECORDS_ACCEPTED_TOTAL.inc();
                if self.accumulator.is_saturated() {
                    self.flush(FlushReason::Saturated);
                }
                None
            }
            Offer::TooLarge { entry, size, limit } => {
                PipelineCounters::incr(&self.ctx.counters.oversized);
                metrics::RECORDS_REJECTED_TOTAL
                    .with_label_values(&["oversized"])
                    .inc();
                self.ctx.reporter.report(PipelineFailure::Oversized {
                    item: entry.item,
                    size,
                    limit,
                });
                None
            }
            Offer::Failed { item, error } => {
                PipelineCounters::incr(&self.ctx.counters.unmappable);
                metrics::RECORDS_REJECTED_TOTAL
                    .with_label_values(&["unmappable"])
                    .inc();
                self.ctx
                    .reporter
                    .report(PipelineFailure::Unmappable { item, error });
                None
            }
            Offer::BatchFull(entry) => Some(entry),
        }
    }

    fn fatal(&self, entry: Entry<In>) -> Fatal<In> {
        let limits = self.accumulator.limits();
        Fatal {
            detail: format!(
                "record of {} bytes rejected by an empty batch (max_batch_bytes {}, max_records {:?})",
                entry.record.len(),
                limits.max_batch_bytes,
                limits.max_records
            ),
            item: entry.item,
        }
    }

    /// Seal the current batch and deliver it. Always restarts the flush timer.
    fn flush(&mut self, reason: FlushReason) {
        if !self.accumulator.is_empty() {
            let full = mem::replace(&mut self.accumulator, (self.ctx.new_accumulator)());
            self.deliver(full.into_batch(), reason);
        }
        self.trigger.reset();
    }

    fn deliver(&self, batch: Batch<In>, reason: FlushReason) {
        let ctx = &self.ctx;
        let key = ctx.partition_key.as_ref().map(|f| f.derive(&batch.items));
        let bytes = batch.payload_bytes();
        let mut failures = 0usize;

        for destination in &ctx.destinations {
            match ctx.put_mode {
                PutMode::Batch => {
                    if let Err(error) =
                        ctx.sink
                            .put_batch(&batch.records, destination, key.as_deref())
                    {
                        failures += 1;
                        self.sink_failed(destination, batch.records.len(), batch.len(), error);
                    }
                }
                PutMode::Single => {
                    for (index, record) in batch.records.iter().enumerate() {
                        if let Err(error) = ctx.sink.put_one(record, destination, key.as_deref()) {
                            failures += 1;
                            self.sink_failed(destination, 1, batch.items_in_record(index), error);
                        }
                    }
                }
            }
        }

        if failures == 0 {
            PipelineCounters::add(&ctx.counters.delivered_items, batch.len());
        }
        PipelineCounters::incr(match reason {
            FlushReason::Saturated => &ctx.counters.flushes_saturated,
            FlushReason::BatchFull => &ctx.counters.flushes_batch_full,
            FlushReason::Timeout => &ctx.counters.flushes_timeout,
            FlushReason::Shutdown => &ctx.counters.flushes_shutdown,
        });
        metrics::BATCHES_FLUSHED_TOTAL
            .with_label_values(&[reason.as_str()])
            .inc();
        metrics::BATCH_BYTES.observe(bytes as f64);
        metrics::BATCH_RECORDS.observe(batch.len() as f64);

        debug!(
            worker = self.id,
            trigger = reason.as_str(),
            items = batch.len(),
            records = batch.records.len(),
            bytes = bytes,
            destinations = ctx.destinations.len(),
            failures = failures,
            "Batch flushed"
        );
    }

    fn sink_failed(&self, destination: &str, records: usize, items: usize, error: SinkError) {
        PipelineCounters::incr(&self.ctx.counters.sink_failures);
        metrics::SINK_FAILURES_TOTAL
            .with_label_values(&[error.kind()])
            .inc();
        self.ctx.reporter.report(PipelineFailure::SinkFailed {
            destination: destination.to_string(),
            records,
            items,
            error,
        });
    }
}
