//! Error types for qio-core.
//!
//! Everything that can go wrong while turning an item into wire bytes or
//! while folding wire bytes into a batch ends up here. Errors are kept small
//! and carry a readable message, so the service layer can hand them to an
//! error reporter together with the item that caused them.

use thiserror::Error;

/// Convenience type alias for `Result<T, CoreError>`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors produced by mappers, limits validation and the accumulators.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The record mapper could not encode an item.
    ///
    /// The item itself is returned to the caller alongside this error, so
    /// nothing is silently dropped.
    #[error("Mapping error: {0}")]
    Mapping(String),

    /// The mapper produced a zero-length record.
    ///
    /// Empty records are rejected so that "no pending items" and "zero
    /// accumulated bytes" always mean the same thing.
    #[error("Mapper produced an empty record")]
    EmptyRecord,

    /// The gzip codec failed while probing, committing or sealing a stream.
    #[error("Compression error: {0}")]
    Compression(#[from] std::io::Error),

    /// A `Limits` value or accumulator setting is inconsistent.
    #[error("Invalid limits: {0}")]
    InvalidLimits(String),
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Mapping(err.to_string())
    }
}

impl From<flate2::CompressError> for CoreError {
    fn from(err: flate2::CompressError) -> Self {
        CoreError::Compression(std::io::Error::other(err))
    }
}
