//! qio service - threaded batching queue
//!
//! Producers enqueue items; a pool of worker threads packs them into
//! size-bounded batches (see `qio_core`) and puts each sealed batch to one
//! or more destinations through a [`Sink`]. A batch is flushed when it is
//! saturated, when the next record does not fit, when the flush interval
//! elapses, or when the service stops.
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use qio_core::JsonLinesMapper;
//! use qio_service::{MemorySink, PutMode, QueueService, ServiceConfig};
//!
//! let sink = Arc::new(MemorySink::new());
//! let config = ServiceConfig {
//!     destinations: vec!["orders".to_string()],
//!     put_mode: PutMode::Batch,
//!     worker_threads: 1,
//!     ..Default::default()
//! };
//!
//! let mut service = QueueService::builder(config)
//!     .mapper(JsonLinesMapper)
//!     .sink(sink.clone())
//!     .build()
//!     .unwrap();
//!
//! service.start().unwrap();
//! service.enqueue(serde_json::json!({"id": 1})).unwrap();
//! service.stop().unwrap();
//!
//! assert_eq!(sink.records()[0].data().as_ref(), b"{\"id\":1}\n");
//! ```

pub mod config;
pub mod error;
pub mod metrics;
pub mod partition;
pub mod report;
pub mod retry;
pub mod service;
pub mod sinks;
pub mod traits;
pub mod trigger;
pub mod worker;

pub use config::ServiceConfig;
pub use error::{EnqueueError, Result, ServiceError, SinkError};
pub use metrics::{PipelineCounters, ServiceStats};
pub use partition::{FixedKey, HashedKey, PartitionKeyFn};
pub use report::{ChannelReporter, ErrorReporter, LogReporter, PipelineFailure};
pub use retry::{RetryPolicy, RetryingSink};
pub use service::{Enqueuer, QueueService, QueueServiceBuilder, ServiceState, ShutdownReport};
pub use sinks::{LoggingSink, MemorySink, PutCall};
pub use traits::{PutMode, Sink};
pub use trigger::FlushTrigger;
pub use worker::{FlushReason, WorkerExit};
