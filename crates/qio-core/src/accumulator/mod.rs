//! Batch accumulation.
//!
//! An accumulator collects items for one flush cycle. Each item is mapped to
//! a [`WireRecord`] exactly once, checked against the configured [`Limits`],
//! and either accepted or handed back to the caller:
//!
//! ```text
//!                 offer(item)
//!                      |
//!                 map to record ---- error ----> Offer::Failed { item, error }
//!                      |
//!        record too large? ---- yes ----> Offer::TooLarge { entry, .. }
//!                      |
//!        batch would overflow? ---- yes ----> Offer::BatchFull(entry)
//!                      |
//!               Offer::Accepted
//! ```
//!
//! A rejected offer never changes the accumulator. The caller reacts to
//! `BatchFull` by flushing (taking the batch out with [`Accumulator::into_batch`]),
//! creating a fresh accumulator from the [`AccumulatorFactory`], and offering
//! the returned [`Entry`] again with [`Accumulator::offer_entry`].
//!
//! Two strategies exist:
//!
//! - [`BasicAccumulator`] sums raw record sizes and emits the records as-is.
//! - [`GzipAccumulator`] folds records into gzip members, each no larger
//!   than `max_record_bytes`, and emits one compressed record per member.

mod basic;
mod factory;
mod gzip;

pub use basic::BasicAccumulator;
pub use factory::{AccumulatorFactory, StrategyKind, DEFAULT_COMPRESSION_LEVEL};
pub use gzip::GzipAccumulator;

use crate::error::CoreError;
use crate::limits::Limits;
use crate::mapper::RecordMapper;
use crate::record::WireRecord;

/// An item paired with its encoded record.
#[derive(Debug, Clone)]
pub struct Entry<In> {
    pub item: In,
    pub record: WireRecord,
}

/// Outcome of offering an item to an accumulator.
#[derive(Debug)]
pub enum Offer<In> {
    /// The item is now part of the pending batch.
    Accepted,

    /// The record alone exceeds `max_record_bytes`. It can never be sent.
    TooLarge {
        entry: Entry<In>,
        size: usize,
        limit: usize,
    },

    /// The record fits on its own but not in the current batch.
    BatchFull(Entry<In>),

    /// The item could not be mapped or compressed.
    Failed { item: In, error: CoreError },
}

impl<In> Offer<In> {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Offer::Accepted)
    }
}

/// How the records of a batch are encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// One record per accepted item.
    Raw,
    /// Gzip members, each holding the bytes of one or more items.
    Gzip,
}

/// A sealed batch, ready for a sink.
#[derive(Debug)]
pub struct Batch<In> {
    /// Accepted items, in acceptance order.
    pub items: Vec<In>,
    /// Records to hand to the sink.
    pub records: Vec<WireRecord>,
    /// Items carried by each record, parallel to `records`.
    pub record_items: Vec<usize>,
    pub encoding: Encoding,
}

impl<In> Batch<In> {
    pub fn empty(encoding: Encoding) -> Self {
        Self {
            items: Vec::new(),
            records: Vec::new(),
            record_items: Vec::new(),
            encoding,
        }
    }

    /// Number of accepted items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Total bytes across all records.
    pub fn payload_bytes(&self) -> usize {
        self.records.iter().map(WireRecord::len).sum()
    }

    /// Items packed into the record at `index`.
    pub fn items_in_record(&self, index: usize) -> usize {
        self.record_items.get(index).copied().unwrap_or(0)
    }
}

/// A size-bounded pending batch for one flush cycle.
///
/// Implementations are not shared between threads; each worker owns its
/// current accumulator and replaces it wholesale on flush.
pub trait Accumulator<In>: Send {
    /// Map `item` and offer the resulting entry.
    fn offer(&mut self, item: In) -> Offer<In> {
        match self.mapper().map(&item) {
            Ok(record) => self.offer_entry(Entry { item, record }),
            Err(error) => Offer::Failed { item, error },
        }
    }

    /// Offer an already mapped entry.
    fn offer_entry(&mut self, entry: Entry<In>) -> Offer<In>;

    /// True when the batch should be flushed without waiting for the timer.
    fn is_saturated(&self) -> bool;

    /// Number of accepted items.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Accumulated bytes, as measured against `max_batch_bytes`.
    fn current_size(&self) -> usize;

    fn limits(&self) -> &Limits;

    fn mapper(&self) -> &dyn RecordMapper<In>;

    /// Seal the batch.
    fn into_batch(self: Box<Self>) -> Batch<In>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_payload_bytes() {
        let batch = Batch {
            items: vec![1, 2],
            records: vec![WireRecord::new(vec![0u8; 3]), WireRecord::new(vec![0u8; 4])],
            record_items: vec![1, 1],
            encoding: Encoding::Raw,
        };
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.payload_bytes(), 7);
        assert_eq!(batch.items_in_record(1), 1);
        assert_eq!(batch.items_in_record(2), 0);
        assert!(Batch::<u8>::empty(Encoding::Gzip).is_empty());
    }
}
