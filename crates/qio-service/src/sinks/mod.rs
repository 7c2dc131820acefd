//! Stock sink implementations.
//!
//! Real stream clients live in application code; these two cover tests,
//! local runs and dry runs.

pub mod logging;
pub mod memory;

pub use logging::LoggingSink;
pub use memory::{MemorySink, PutCall};
