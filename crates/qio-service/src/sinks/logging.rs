//! Sink that only logs what it would have sent.

use qio_core::WireRecord;
use tracing::info;

use crate::error::SinkError;
use crate::traits::Sink;

/// Dry-run sink: logs each put at INFO and always succeeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingSink;

impl Sink for LoggingSink {
    fn put_one(
        &self,
        record: &WireRecord,
        destination: &str,
        partition_key: Option<&str>,
    ) -> Result<(), SinkError> {
        info!(
            destination = destination,
            partition_key = partition_key.unwrap_or("-"),
            bytes = record.len(),
            "put record"
        );
        Ok(())
    }

    fn put_batch(
        &self,
        records: &[WireRecord],
        destination: &str,
        partition_key: Option<&str>,
    ) -> Result<(), SinkError> {
        info!(
            destination = destination,
            partition_key = partition_key.unwrap_or("-"),
            records = records.len(),
            bytes = records.iter().map(WireRecord::len).sum::<usize>(),
            "put record batch"
        );
        Ok(())
    }
}
