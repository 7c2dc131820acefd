//! qio core: records, mappers and size-bounded batch accumulation.
//!
//! This crate has no threads and no I/O. It answers one question for the
//! queue service: "given the items seen so far, is there room for this one,
//! and what bytes go to the sink when the batch is sealed?"
//!
//! ## Main types
//!
//! - [`WireRecord`]: immutable bytes handed to a sink
//! - [`RecordMapper`]: item to record encoding ([`JsonLinesMapper`],
//!   [`StringMapper`], [`BytesMapper`], or any closure)
//! - [`Limits`]: record and batch bounds, with presets for managed streams
//! - [`Accumulator`]: one flush cycle's pending batch
//!   ([`BasicAccumulator`], [`GzipAccumulator`])
//! - [`AccumulatorFactory`]: creates a fresh accumulator after every flush
//! - [`GzipStream`]: incremental gzip framing with exact size accounting

pub mod accumulator;
pub mod error;
pub mod gzip;
pub mod limits;
pub mod mapper;
pub mod record;

pub use accumulator::{
    Accumulator, AccumulatorFactory, BasicAccumulator, Batch, Encoding, Entry, GzipAccumulator,
    Offer, StrategyKind, DEFAULT_COMPRESSION_LEVEL,
};
pub use error::{CoreError, Result};
pub use gzip::{GzipStream, Probe, FRAMING_OVERHEAD};
pub use limits::Limits;
pub use mapper::{BytesMapper, JsonLinesMapper, RecordMapper, StringMapper};
pub use record::WireRecord;
