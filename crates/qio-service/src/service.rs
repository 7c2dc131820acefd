//! Queue service lifecycle.
//!
//! A [`QueueService`] owns the input queue and a fixed pool of consumer
//! workers. Producers hand items to an [`Enqueuer`] (or the service itself);
//! workers batch them and deliver to the sink.
//!
//! ```text
//!   producers ──enqueue──▶ ┌────────────────┐
//!                          │  input queue   │ (bounded or unbounded)
//!                          └───────┬────────┘
//!                    ┌─────────────┼─────────────┐
//!                    ▼             ▼             ▼
//!               worker 0      worker 1  ...  worker N-1
//!                    │             │             │
//!                    └────────── sink ───────────┘
//! ```
//!
//! # Lifecycle
//!
//! `Created` → `start()` → `Running` → `stop()` → `Stopped`. Items enqueued
//! while `Created` wait in the queue until the workers start. After `stop()`
//! every enqueue is rejected with [`EnqueueError::Closed`].
//!
//! `stop()` closes the queue, signals every worker, and waits for them to
//! drain and flush. Workers still busy after the drain timeout are detached
//! rather than joined. Once the workers are gone the service releases its
//! end of the queue, so a producer racing with `stop()` gets its item back
//! instead of leaving it in a queue nobody reads.

use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{Receiver, SendTimeoutError, Sender, TrySendError};
use qio_core::{AccumulatorFactory, RecordMapper};
use tracing::{error, info, warn};

use crate::config::ServiceConfig;
use crate::error::{EnqueueError, Result, ServiceError};
use crate::metrics::{self, PipelineCounters, ServiceStats};
use crate::partition::PartitionKeyFn;
use crate::report::{ErrorReporter, LogReporter};
use crate::retry::RetryingSink;
use crate::traits::Sink;
use crate::worker::{ConsumerWorker, WorkerContext, WorkerExit};

/// Time allowed on top of the drain timeout for the final flush.
const FINAL_FLUSH_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Created,
    Running,
    Stopped,
}

/// Outcome of [`QueueService::stop`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Workers that finished and were joined
    pub workers_joined: usize,
    /// Workers still running at the deadline, left to finish on their own
    pub workers_detached: usize,
    /// Joined workers that had stopped on a configuration error
    pub workers_fatal: usize,
    /// Items left in the queue when the service stopped
    pub undelivered: usize,
}

impl ShutdownReport {
    /// Every worker was joined and nothing was left behind.
    pub fn is_clean(&self) -> bool {
        self.workers_detached == 0 && self.workers_fatal == 0 && self.undelivered == 0
    }
}

/// Producer handle to the input queue. Cheap to clone and `Send`.
pub struct Enqueuer<In> {
    tx: Sender<In>,
    open: Arc<AtomicBool>,
    timeout: Option<Duration>,
    counters: Arc<PipelineCounters>,
}

impl<In> Clone for Enqueuer<In> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            open: Arc::clone(&self.open),
            timeout: self.timeout,
            counters: Arc::clone(&self.counters),
        }
    }
}

impl<In> Enqueuer<In> {
    /// Queue an item for batching.
    ///
    /// With a bounded queue and no enqueue timeout this fails fast with
    /// [`EnqueueError::Full`]; with a timeout it waits up to that long.
    /// The item is handed back in every error.
    pub fn enqueue(&self, item: In) -> std::result::Result<(), EnqueueError<In>> {
        if !self.open.load(Ordering::Acquire) {
            return Err(EnqueueError::Closed(item));
        }

        let sent = match self.timeout {
            None => self.tx.try_send(item).map_err(|e| match e {
                TrySendError::Full(item) => EnqueueError::Full(item),
                TrySendError::Disconnected(item) => EnqueueError::Closed(item),
            }),
            Some(timeout) => self.tx.send_timeout(item, timeout).map_err(|e| match e {
                SendTimeoutError::Timeout(item) => EnqueueError::Full(item),
                SendTimeoutError::Disconnected(item) => EnqueueError::Closed(item),
            }),
        };

        if sent.is_ok() {
            PipelineCounters::incr(&self.counters.enqueued);
        }
        sent
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}

struct WorkerHandle {
    id: usize,
    thread: JoinHandle<WorkerExit>,
}

/// Sends the worker id when the thread ends, panics included.
struct DoneGuard {
    id: usize,
    tx: Sender<usize>,
}

impl Drop for DoneGuard {
    fn drop(&mut self) {
        let _ = self.tx.send(self.id);
    }
}

/// Batching queue service.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use qio_core::StringMapper;
/// use qio_service::{MemorySink, QueueService, ServiceConfig};
///
/// let sink = Arc::new(MemorySink::new());
/// let config = ServiceConfig {
///     destinations: vec!["events".to_string()],
///     ..Default::default()
/// };
///
/// let mut service = QueueService::configure(config, StringMapper, sink.clone()).unwrap();
/// service.start().unwrap();
/// service.enqueue("hello".to_string()).unwrap();
///
/// let report = service.stop().unwrap();
/// assert_eq!(report.workers_joined, 2);
/// assert_eq!(sink.total_records(), 1);
/// ```
pub struct QueueService<In: Send + 'static> {
    config: ServiceConfig,
    ctx: Arc<WorkerContext<In>>,
    enqueuer: Enqueuer<In>,
    input: Option<Receiver<In>>,
    state: ServiceState,
    shutdown: Option<Sender<()>>,
    done: Option<Receiver<usize>>,
    workers: Vec<WorkerHandle>,
}

impl<In: Send + 'static> QueueService<In> {
    pub fn builder(config: ServiceConfig) -> QueueServiceBuilder<In> {
        QueueServiceBuilder::new(config)
    }

    /// Build a service from a config, a mapper and a sink, with the default
    /// reporter and no partition key.
    pub fn configure(
        config: ServiceConfig,
        mapper: impl RecordMapper<In> + 'static,
        sink: impl Sink + 'static,
    ) -> Result<Self> {
        QueueServiceBuilder::new(config)
            .mapper(mapper)
            .sink(sink)
            .build()
    }

    /// Spawn the worker threads.
    ///
    /// # Errors
    ///
    /// [`ServiceError::AlreadyStarted`] unless the service is `Created`.
    /// [`ServiceError::Spawn`] when a thread cannot be created; workers
    /// already spawned are stopped and the service ends up `Stopped`.
    pub fn start(&mut self) -> Result<()> {
        if self.state != ServiceState::Created {
            return Err(ServiceError::AlreadyStarted);
        }
        let Some(input) = self.input.clone() else {
            return Err(ServiceError::AlreadyStarted);
        };
        metrics::init();

        let (shutdown_tx, shutdown_rx) = crossbeam::channel::bounded::<()>(0);
        let (done_tx, done_rx) = crossbeam::channel::unbounded();
        self.shutdown = Some(shutdown_tx);
        self.done = Some(done_rx);
        self.state = ServiceState::Running;

        for id in 0..self.config.worker_threads {
            let worker = ConsumerWorker::new(
                id,
                Arc::clone(&self.ctx),
                input.clone(),
                shutdown_rx.clone(),
            );
            let guard = DoneGuard {
                id,
                tx: done_tx.clone(),
            };

            let spawned = thread::Builder::new()
                .name(format!("qio-worker-{}", id))
                .spawn(move || {
                    let _guard = guard;
                    worker.run()
                });

            match spawned {
                Ok(thread) => self.workers.push(WorkerHandle { id, thread }),
                Err(source) => {
                    error!(worker = id, error = %source, "Failed to spawn worker");
                    let _ = self.stop();
                    return Err(ServiceError::Spawn { worker: id, source });
                }
            }
        }

        info!(
            workers = self.config.worker_threads,
            destinations = ?self.config.destinations,
            strategy = %self.config.strategy,
            put_mode = %self.config.put_mode,
            "Queue service started"
        );
        Ok(())
    }

    /// Close the queue, let the workers drain, and join them.
    ///
    /// # Errors
    ///
    /// [`ServiceError::NotRunning`] unless the service is `Running`.
    pub fn stop(&mut self) -> Result<ShutdownReport> {
        if self.state != ServiceState::Running {
            return Err(ServiceError::NotRunning);
        }
        info!(queued = self.queue_len(), "Stopping queue service");

        self.enqueuer.open.store(false, Ordering::Release);
        self.state = ServiceState::Stopped;
        // Disconnecting the zero-capacity channel wakes every worker.
        drop(self.shutdown.take());

        let deadline = Instant::now() + self.config.drain_timeout() + FINAL_FLUSH_GRACE;
        let mut pending = mem::take(&mut self.workers);
        let mut report = ShutdownReport::default();

        if let Some(done) = self.done.take() {
            while !pending.is_empty() {
                let Ok(id) = done.recv_deadline(deadline) else {
                    break;
                };
                let Some(pos) = pending.iter().position(|w| w.id == id) else {
                    continue;
                };
                let worker = pending.swap_remove(pos);
                match worker.thread.join() {
                    Ok(WorkerExit::Drained) => {}
                    Ok(WorkerExit::Fatal) => report.workers_fatal += 1,
                    Err(_) => error!(worker = worker.id, "Worker panicked"),
                }
                report.workers_joined += 1;
            }
        }

        for worker in pending {
            warn!(
                worker = worker.id,
                "Worker still running after drain timeout, detaching"
            );
            report.workers_detached += 1;
        }

        report.undelivered = self.queue_len();
        // Late sends now fail with `Disconnected` unless a detached worker
        // still holds a receiver.
        self.input = None;
        if report.undelivered > 0 {
            warn!(
                undelivered = report.undelivered,
                "Items left in queue after shutdown"
            );
        }

        info!(
            joined = report.workers_joined,
            detached = report.workers_detached,
            fatal = report.workers_fatal,
            "Queue service stopped"
        );
        Ok(report)
    }

    /// Queue an item. See [`Enqueuer::enqueue`].
    pub fn enqueue(&self, item: In) -> std::result::Result<(), EnqueueError<In>> {
        self.enqueuer.enqueue(item)
    }

    /// A producer handle that can be moved to other threads.
    pub fn enqueuer(&self) -> Enqueuer<In> {
        self.enqueuer.clone()
    }

    pub fn state(&self) -> ServiceState {
        self.state
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Items waiting in the input queue. Zero once the service has stopped.
    pub fn queue_len(&self) -> usize {
        self.input.as_ref().map_or(0, Receiver::len)
    }

    /// Worker threads currently owned by the service.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn stats(&self) -> ServiceStats {
        self.ctx.counters.snapshot()
    }
}

impl<In: Send + 'static> Drop for QueueService<In> {
    fn drop(&mut self) {
        if self.state == ServiceState::Running {
            if let Err(e) = self.stop() {
                warn!(error = %e, "Failed to stop queue service on drop");
            }
        }
    }
}

/// Builder for [`QueueService`].
///
/// A sink and either a mapper or a ready [`AccumulatorFactory`] are required.
pub struct QueueServiceBuilder<In> {
    config: ServiceConfig,
    mapper: Option<Arc<dyn RecordMapper<In>>>,
    factory: Option<AccumulatorFactory<In>>,
    sink: Option<Arc<dyn Sink>>,
    partition_key: Option<Arc<dyn PartitionKeyFn<In>>>,
    reporter: Option<Arc<dyn ErrorReporter<In>>>,
}

impl<In: Send + 'static> QueueServiceBuilder<In> {
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            config,
            mapper: None,
            factory: None,
            sink: None,
            partition_key: None,
            reporter: None,
        }
    }

    /// Item to record encoder. Combined with the config's strategy, limits
    /// and compression level to build the accumulator factory.
    pub fn mapper(mut self, mapper: impl RecordMapper<In> + 'static) -> Self {
        self.mapper = Some(Arc::new(mapper));
        self
    }

    /// Use a prebuilt factory instead of a mapper. Its strategy and limits
    /// take precedence over the config's.
    pub fn accumulator_factory(mut self, factory: AccumulatorFactory<In>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn sink(mut self, sink: impl Sink + 'static) -> Self {
        self.sink = Some(Arc::new(sink));
        self
    }

    pub fn partition_key(mut self, key: impl PartitionKeyFn<In> + 'static) -> Self {
        self.partition_key = Some(Arc::new(key));
        self
    }

    /// Where failures go (default: [`LogReporter`]).
    pub fn reporter(mut self, reporter: impl ErrorReporter<In> + 'static) -> Self {
        self.reporter = Some(Arc::new(reporter));
        self
    }

    pub fn build(self) -> Result<QueueService<In>> {
        self.config.validate()?;

        let factory = match (self.factory, self.mapper) {
            (Some(factory), _) => factory,
            (None, Some(mapper)) => AccumulatorFactory::new(
                self.config.strategy,
                self.config.limits,
                mapper,
                self.config.compression_level,
            )?,
            (None, None) => {
                return Err(ServiceError::Config(
                    "a record mapper or accumulator factory is required".to_string(),
                ))
            }
        };

        let sink = self
            .sink
            .ok_or_else(|| ServiceError::Config("sink is required".to_string()))?;
        let sink: Arc<dyn Sink> = match &self.config.retry {
            Some(policy) => Arc::new(RetryingSink::new(sink, policy.clone())),
            None => sink,
        };

        let reporter = self
            .reporter
            .unwrap_or_else(|| Arc::new(LogReporter) as Arc<dyn ErrorReporter<In>>);

        let (tx, rx) = match self.config.queue_capacity {
            Some(capacity) => crossbeam::channel::bounded(capacity),
            None => crossbeam::channel::unbounded(),
        };

        let counters = Arc::new(PipelineCounters::default());
        let ctx = Arc::new(WorkerContext {
            new_accumulator: Arc::new(move || factory.create()),
            sink,
            destinations: self.config.destinations.clone(),
            put_mode: self.config.put_mode,
            partition_key: self.partition_key,
            reporter,
            counters: Arc::clone(&counters),
            flush_interval: self.config.flush_interval(),
            drain_timeout: self.config.drain_timeout(),
        });

        let enqueuer = Enqueuer {
            tx,
            open: Arc::new(AtomicBool::new(true)),
            timeout: self.config.enqueue_timeout(),
            counters,
        };

        Ok(QueueService {
            config: self.config,
            ctx,
            enqueuer,
            input: Some(rx),
            state: ServiceState::Created,
            shutdown: None,
            done: None,
            workers: Vec::new(),
        })
    }
}
