//! Partition key derivation.
//!
//! A partition key is derived once per sealed batch, from the batch's items,
//! and passed to every put for that batch. Without a key function the sink
//! receives `None` and picks its own routing.

use std::hash::{Hash, Hasher};

use siphasher::sip::SipHasher13;

/// Derives a partition key from the items of a batch.
pub trait PartitionKeyFn<In>: Send + Sync {
    fn derive(&self, items: &[In]) -> String;
}

impl<In, F> PartitionKeyFn<In> for F
where
    F: Fn(&[In]) -> String + Send + Sync,
{
    fn derive(&self, items: &[In]) -> String {
        self(items)
    }
}

/// The same key for every batch.
#[derive(Debug, Clone)]
pub struct FixedKey(String);

impl FixedKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }
}

impl<In> PartitionKeyFn<In> for FixedKey {
    fn derive(&self, _items: &[In]) -> String {
        self.0.clone()
    }
}

/// Hex SipHash of the batch's items.
///
/// Equal batches map to equal keys; different batches spread evenly over
/// the key space.
#[derive(Debug, Clone, Copy, Default)]
pub struct HashedKey {
    key0: u64,
    key1: u64,
}

impl HashedKey {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a keyed hash, so keys are not predictable from item contents.
    pub fn with_keys(key0: u64, key1: u64) -> Self {
        Self { key0, key1 }
    }
}

impl<In: Hash> PartitionKeyFn<In> for HashedKey {
    fn derive(&self, items: &[In]) -> String {
        let mut hasher = SipHasher13::new_with_keys(self.key0, self.key1);
        items.hash(&mut hasher);
        format!("{:016x}", hasher.finish())
    }
}
