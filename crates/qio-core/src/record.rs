//! The unit handed to a sink.

use bytes::Bytes;

/// An immutable blob of bytes destined for a stream sink.
///
/// Cloning is cheap: the payload is reference counted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct WireRecord {
    data: Bytes,
}

impl WireRecord {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    /// Raw payload.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_bytes(self) -> Bytes {
        self.data
    }
}

impl From<Bytes> for WireRecord {
    fn from(data: Bytes) -> Self {
        Self { data }
    }
}

impl From<Vec<u8>> for WireRecord {
    fn from(data: Vec<u8>) -> Self {
        Self { data: data.into() }
    }
}

impl From<String> for WireRecord {
    fn from(data: String) -> Self {
        Self { data: data.into() }
    }
}

impl AsRef<[u8]> for WireRecord {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}
