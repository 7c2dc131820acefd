//! Item to wire-record encoding.
//!
//! A [`RecordMapper`] is the single place where an application item becomes
//! bytes. Accumulators call it exactly once per offered item; the resulting
//! [`WireRecord`] travels with the item through retries so it is never
//! re-encoded.
//!
//! Any `Fn(&In) -> Result<WireRecord>` closure is a mapper, and three stock
//! mappers cover the common cases:
//!
//! - [`JsonLinesMapper`]: `serde_json` encoding terminated by `\n`
//! - [`StringMapper`]: UTF-8 text terminated by `\n`
//! - [`BytesMapper`]: the item's bytes as-is

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;

use crate::error::Result;
use crate::record::WireRecord;

/// Converts an item into the bytes a sink will receive.
pub trait RecordMapper<In>: Send + Sync {
    fn map(&self, item: &In) -> Result<WireRecord>;
}

impl<In, F> RecordMapper<In> for F
where
    F: Fn(&In) -> Result<WireRecord> + Send + Sync,
{
    fn map(&self, item: &In) -> Result<WireRecord> {
        self(item)
    }
}

/// Encodes any `Serialize` item as one line of JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonLinesMapper;

impl<In: Serialize> RecordMapper<In> for JsonLinesMapper {
    fn map(&self, item: &In) -> Result<WireRecord> {
        let mut buf = serde_json::to_vec(item)?;
        buf.push(b'\n');
        Ok(WireRecord::new(buf))
    }
}

/// Encodes text items as newline-terminated UTF-8.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringMapper;

impl<In: AsRef<str>> RecordMapper<In> for StringMapper {
    fn map(&self, item: &In) -> Result<WireRecord> {
        let text = item.as_ref();
        let mut buf = BytesMut::with_capacity(text.len() + 1);
        buf.put_slice(text.as_bytes());
        buf.put_u8(b'\n');
        Ok(WireRecord::new(buf.freeze()))
    }
}

/// Passes byte items through untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesMapper;

impl<In: AsRef<[u8]>> RecordMapper<In> for BytesMapper {
    fn map(&self, item: &In) -> Result<WireRecord> {
        Ok(WireRecord::new(Bytes::copy_from_slice(item.as_ref())))
    }
}
