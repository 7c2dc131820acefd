use std::sync::Arc;

use tracing::trace;

use super::{Accumulator, Batch, Encoding, Entry, Offer};
use crate::error::CoreError;
use crate::limits::Limits;
use crate::mapper::RecordMapper;

/// Accumulates records uncompressed, measuring the sum of their raw sizes.
///
/// A record is admitted when `current + len < max_batch_bytes`, so a sealed
/// batch is always strictly below the batch limit. The batch is saturated as
/// soon as a record of `expected_record_bytes` would no longer be admitted.
pub struct BasicAccumulator<In> {
    mapper: Arc<dyn RecordMapper<In>>,
    limits: Limits,
    batch: Batch<In>,
    current_size: usize,
}

impl<In> BasicAccumulator<In> {
    pub fn new(limits: Limits, mapper: Arc<dyn RecordMapper<In>>) -> Self {
        Self {
            mapper,
            limits,
            batch: Batch::empty(Encoding::Raw),
            current_size: 0,
        }
    }
}

impl<In: Send> Accumulator<In> for BasicAccumulator<In> {
    fn offer_entry(&mut self, entry: Entry<In>) -> Offer<In> {
        let size = entry.record.len();
        if size == 0 {
            return Offer::Failed {
                item: entry.item,
                error: CoreError::EmptyRecord,
            };
        }

        if size > self.limits.max_record_bytes {
            return Offer::TooLarge {
                entry,
                size,
                limit: self.limits.max_record_bytes,
            };
        }

        if self.limits.at_record_cap(self.batch.len())
            || self.current_size + size >= self.limits.max_batch_bytes
        {
            return Offer::BatchFull(entry);
        }

        self.current_size += size;
        self.batch.items.push(entry.item);
        self.batch.records.push(entry.record);
        self.batch.record_items.push(1);

        trace!(
            record_bytes = size,
            batch_bytes = self.current_size,
            records = self.batch.len(),
            "Record accepted"
        );

        Offer::Accepted
    }

    fn is_saturated(&self) -> bool {
        if self.batch.is_empty() {
            return false;
        }
        self.limits.at_record_cap(self.batch.len())
            || self.current_size + self.limits.expected_record_bytes >= self.limits.max_batch_bytes
    }

    fn len(&self) -> usize {
        self.batch.len()
    }

    fn current_size(&self) -> usize {
        self.current_size
    }

    fn limits(&self) -> &Limits {
        &self.limits
    }

    fn mapper(&self) -> &dyn RecordMapper<In> {
        self.mapper.as_ref()
    }

    fn into_batch(self: Box<Self>) -> Batch<In> {
        self.batch
    }
}
