use std::mem;
use std::sync::Arc;

use flate2::Compression;
use tracing::trace;

use super::{Accumulator, Batch, Encoding, Entry, Offer};
use crate::error::CoreError;
use crate::gzip::{GzipStream, FRAMING_OVERHEAD};
use crate::limits::Limits;
use crate::mapper::RecordMapper;
use crate::record::WireRecord;

/// Folds records into gzip members and measures compressed bytes.
///
/// Admission works in compressed space:
///
/// - a record is too large when a member holding only that record would
///   exceed `max_record_bytes`;
/// - it joins the open member when the member, sealed, stays within
///   `max_record_bytes`; otherwise the open member is sealed and the record
///   starts a new one;
/// - either way the sealed size of every member together must stay strictly
///   below `max_batch_bytes`.
///
/// Member growth is the exact delta reported by a probe of the member's
/// stream, and each member adds the constant gzip framing. Every member
/// becomes one [`WireRecord`], so the sink never sees a record above the
/// per-record limit.
pub struct GzipAccumulator<In> {
    mapper: Arc<dyn RecordMapper<In>>,
    limits: Limits,
    level: Compression,
    stream: GzipStream,
    sealed: Vec<WireRecord>,
    sealed_items: Vec<usize>,
    sealed_bytes: usize,
    raw_bytes: usize,
    items: Vec<In>,
}

impl<In> GzipAccumulator<In> {
    pub fn new(limits: Limits, mapper: Arc<dyn RecordMapper<In>>, level: Compression) -> Self {
        Self {
            mapper,
            limits,
            level,
            stream: GzipStream::new(level),
            sealed: Vec::new(),
            sealed_items: Vec::new(),
            sealed_bytes: 0,
            raw_bytes: 0,
            items: Vec::new(),
        }
    }

    /// Uncompressed bytes accepted so far.
    pub fn raw_size(&self) -> usize {
        self.raw_bytes
    }

    /// Members the batch would emit if sealed now.
    pub fn members(&self) -> usize {
        self.sealed.len() + usize::from(self.stream.records() > 0)
    }

    /// Sealed size of the open member, zero while it is empty.
    fn open_len(&self) -> usize {
        if self.stream.records() == 0 {
            0
        } else {
            self.stream.compressed_len() + FRAMING_OVERHEAD
        }
    }

    fn seal_open(&mut self) {
        if self.stream.records() == 0 {
            return;
        }
        let stream = mem::replace(&mut self.stream, GzipStream::new(self.level));
        let items = stream.records();
        let member = stream.finish();
        self.sealed_bytes += member.len();
        self.sealed_items.push(items);
        self.sealed.push(WireRecord::new(member));
    }

    fn admit(&mut self, entry: Entry<In>, delta: usize) -> Offer<In> {
        self.raw_bytes += entry.record.len();
        self.items.push(entry.item);

        trace!(
            raw_bytes = entry.record.len(),
            compressed_delta = delta,
            batch_bytes = self.sealed_bytes + self.open_len(),
            members = self.members(),
            records = self.items.len(),
            "Record compressed into batch"
        );

        Offer::Accepted
    }
}

impl<In: Send> Accumulator<In> for GzipAccumulator<In> {
    fn offer_entry(&mut self, entry: Entry<In>) -> Offer<In> {
        if entry.record.is_empty() {
            return Offer::Failed {
                item: entry.item,
                error: CoreError::EmptyRecord,
            };
        }

        // The record framed as a member of its own.
        let mut fresh = GzipStream::new(self.level);
        let alone = match fresh.probe(entry.record.data()) {
            Ok(probe) => probe,
            Err(err) => {
                return Offer::Failed {
                    item: entry.item,
                    error: err.into(),
                }
            }
        };
        let alone_len = alone.delta_len() + FRAMING_OVERHEAD;
        if alone_len > self.limits.max_record_bytes {
            return Offer::TooLarge {
                entry,
                size: alone_len,
                limit: self.limits.max_record_bytes,
            };
        }

        if self.limits.at_record_cap(self.items.len()) {
            return Offer::BatchFull(entry);
        }

        if self.stream.records() > 0 {
            let probe = match self.stream.probe(entry.record.data()) {
                Ok(probe) => probe,
                Err(err) => {
                    return Offer::Failed {
                        item: entry.item,
                        error: err.into(),
                    }
                }
            };
            let grown = self.stream.compressed_len() + probe.delta_len() + FRAMING_OVERHEAD;
            if grown <= self.limits.max_record_bytes {
                if self.sealed_bytes + grown >= self.limits.max_batch_bytes {
                    self.stream.discard(probe);
                    return Offer::BatchFull(entry);
                }
                let delta = probe.delta_len();
                self.stream.commit(probe, entry.record.data());
                return self.admit(entry, delta);
            }
            self.stream.discard(probe);
        }

        if self.current_size() + alone_len >= self.limits.max_batch_bytes {
            return Offer::BatchFull(entry);
        }

        self.seal_open();
        let delta = alone.delta_len();
        fresh.commit(alone, entry.record.data());
        self.stream = fresh;
        self.admit(entry, delta)
    }

    fn is_saturated(&self) -> bool {
        if self.items.is_empty() {
            return false;
        }
        self.limits.at_record_cap(self.items.len())
            || self.current_size() + self.limits.expected_record_bytes >= self.limits.max_batch_bytes
    }

    fn len(&self) -> usize {
        self.items.len()
    }

    /// Sealed size of every member, the open one included.
    fn current_size(&self) -> usize {
        self.sealed_bytes + self.open_len()
    }

    fn limits(&self) -> &Limits {
        &self.limits
    }

    fn mapper(&self) -> &dyn RecordMapper<In> {
        self.mapper.as_ref()
    }

    fn into_batch(self: Box<Self>) -> Batch<In> {
        let mut this = *self;
        if this.items.is_empty() {
            return Batch::empty(Encoding::Gzip);
        }
        this.seal_open();
        Batch {
            items: this.items,
            records: this.sealed,
            record_items: this.sealed_items,
            encoding: Encoding::Gzip,
        }
    }
}
