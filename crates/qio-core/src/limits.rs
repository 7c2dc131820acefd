//! Size limits enforced by the accumulators.
//!
//! Stream sinks cap three things: the size of a single record, the size of
//! one put request, and the number of records in one put request. The
//! presets mirror the two common managed stream flavours:
//!
//! ```text
//! preset            record      batch     records/batch
//! ----------------  ----------  --------  -------------
//! delivery_stream   1000 KiB    4 MiB     500
//! data_stream       1 MiB       5 MiB     500
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

pub const KIB: usize = 1024;
pub const MIB: usize = 1024 * KIB;

/// Largest record a delivery stream accepts.
pub const DELIVERY_STREAM_RECORD_MAX_BYTES: usize = 1000 * KIB;
/// Largest batch put a delivery stream accepts.
pub const DELIVERY_STREAM_BATCH_MAX_BYTES: usize = 4 * MIB;
/// Most records a delivery stream accepts in one batch put.
pub const DELIVERY_STREAM_BATCH_MAX_RECORDS: usize = 500;

/// Largest record a data stream accepts.
pub const DATA_STREAM_RECORD_MAX_BYTES: usize = MIB;
/// Largest batch put a data stream accepts.
pub const DATA_STREAM_BATCH_MAX_BYTES: usize = 5 * MIB;
/// Most records a data stream accepts in one batch put.
pub const DATA_STREAM_BATCH_MAX_RECORDS: usize = 500;

fn default_expected_record_bytes() -> usize {
    1
}

/// Batch and record size limits.
///
/// A batch is flushable when it holds at least one item; it is *saturated*
/// once another record of `expected_record_bytes` would no longer fit. For
/// the gzip strategy all byte figures refer to compressed bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limits {
    /// Exclusive upper bound on accumulated batch bytes.
    pub max_batch_bytes: usize,

    /// Inclusive upper bound on a single record.
    pub max_record_bytes: usize,

    /// Optional cap on records per batch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_records: Option<usize>,

    /// Record size the saturation check reserves room for.
    ///
    /// The default of 1 marks a batch saturated only when not even a one
    /// byte record would fit, so most batches close on `BatchFull` and the
    /// rejected record is retried against a fresh batch. Setting this near
    /// the typical record size closes batches eagerly instead, trading a
    /// little fill for skipping that retry.
    #[serde(default = "default_expected_record_bytes")]
    pub expected_record_bytes: usize,
}

impl Limits {
    /// Byte limits only, no record-count cap.
    pub fn new(max_batch_bytes: usize, max_record_bytes: usize) -> Self {
        Self {
            max_batch_bytes,
            max_record_bytes,
            max_records: None,
            expected_record_bytes: default_expected_record_bytes(),
        }
    }

    /// Limits of a managed delivery stream batch put.
    pub fn delivery_stream() -> Self {
        Self::new(
            DELIVERY_STREAM_BATCH_MAX_BYTES,
            DELIVERY_STREAM_RECORD_MAX_BYTES,
        )
        .with_max_records(DELIVERY_STREAM_BATCH_MAX_RECORDS)
    }

    /// Limits of a managed data stream batch put.
    pub fn data_stream() -> Self {
        Self::new(DATA_STREAM_BATCH_MAX_BYTES, DATA_STREAM_RECORD_MAX_BYTES)
            .with_max_records(DATA_STREAM_BATCH_MAX_RECORDS)
    }

    pub fn with_max_records(mut self, max_records: usize) -> Self {
        self.max_records = Some(max_records);
        self
    }

    pub fn with_expected_record_bytes(mut self, bytes: usize) -> Self {
        self.expected_record_bytes = bytes;
        self
    }

    /// True when `count` records already reach the record-count cap.
    pub fn at_record_cap(&self, count: usize) -> bool {
        self.max_records.is_some_and(|max| count >= max)
    }

    /// Check the limits are internally consistent.
    pub fn validate(&self) -> Result<()> {
        if self.max_batch_bytes == 0 {
            return Err(CoreError::InvalidLimits(
                "max_batch_bytes must be greater than 0".to_string(),
            ));
        }
        if self.max_record_bytes == 0 {
            return Err(CoreError::InvalidLimits(
                "max_record_bytes must be greater than 0".to_string(),
            ));
        }
        if self.max_record_bytes >= self.max_batch_bytes {
            return Err(CoreError::InvalidLimits(format!(
                "max_record_bytes ({}) must be smaller than max_batch_bytes ({})",
                self.max_record_bytes, self.max_batch_bytes
            )));
        }
        if self.max_records == Some(0) {
            return Err(CoreError::InvalidLimits(
                "max_records must be greater than 0".to_string(),
            ));
        }
        if self.expected_record_bytes == 0 || self.expected_record_bytes > self.max_record_bytes {
            return Err(CoreError::InvalidLimits(format!(
                "expected_record_bytes ({}) must be in 1..={}",
                self.expected_record_bytes, self.max_record_bytes
            )));
        }
        Ok(())
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self::delivery_stream()
    }
}
