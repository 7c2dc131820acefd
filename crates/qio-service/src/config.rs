//! Service Configuration
//!
//! [`ServiceConfig`] holds everything the queue service needs except the
//! code-level collaborators (mapper, sink, partition key function and error
//! reporter), which are passed to the builder.
//!
//! - **destinations**: stream names every batch is sent to, in order
//! - **put_mode**: `single` (one put per record) or `batch` (default)
//! - **strategy**: `basic` (default) or `smart_gzip`
//! - **limits**: record and batch bounds (default: delivery stream limits)
//! - **worker_threads**: number of consumer workers (default: 2)
//! - **flush_interval_ms**: maximum age of a non-empty batch (default: 10s)
//! - **queue_capacity**: bound on the input queue, unbounded when absent
//! - **enqueue_timeout_ms**: how long `enqueue` waits on a full queue
//! - **drain_timeout_ms**: how long `stop` lets workers drain (default: 30s)
//! - **compression_level**: gzip level for `smart_gzip` (default: 6)
//! - **retry**: optional retry policy wrapped around the sink
//!
//! ## Usage
//!
//! ```
//! use qio_service::{PutMode, ServiceConfig};
//!
//! let config = ServiceConfig::from_toml_str(r#"
//!     destinations = ["clickstream"]
//!     put_mode = "batch"
//!     strategy = "smart_gzip"
//!     worker_threads = 4
//!
//!     [limits]
//!     max_batch_bytes = 1024000
//!     max_record_bytes = 512000
//! "#).unwrap();
//!
//! assert_eq!(config.put_mode, PutMode::Batch);
//! assert_eq!(config.flush_interval_ms, 10_000);
//! ```

use std::path::Path;
use std::time::Duration;

use qio_core::{Limits, StrategyKind, DEFAULT_COMPRESSION_LEVEL};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ServiceError};
use crate::retry::RetryPolicy;
use crate::traits::PutMode;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Destination stream names
    #[serde(default)]
    pub destinations: Vec<String>,

    /// How batches are handed to the sink (default: batch)
    #[serde(default)]
    pub put_mode: PutMode,

    /// Accumulation strategy (default: basic)
    #[serde(default)]
    pub strategy: StrategyKind,

    /// Record and batch limits (default: delivery stream)
    #[serde(default)]
    pub limits: Limits,

    /// Number of consumer workers (default: 2)
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    /// Flush interval in milliseconds (default: 10 seconds)
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    /// Input queue bound, unbounded when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_capacity: Option<usize>,

    /// Enqueue wait on a full queue in milliseconds, fail fast when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enqueue_timeout_ms: Option<u64>,

    /// Drain budget on stop in milliseconds (default: 30 seconds)
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,

    /// Gzip level 0-9 for the smart gzip strategy (default: 6)
    #[serde(default = "default_compression_level")]
    pub compression_level: u32,

    /// Retry transient sink failures with this policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
}

fn default_worker_threads() -> usize {
    2
}

fn default_flush_interval_ms() -> u64 {
    10_000
}

fn default_drain_timeout_ms() -> u64 {
    30_000
}

fn default_compression_level() -> u32 {
    DEFAULT_COMPRESSION_LEVEL
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            destinations: Vec::new(),
            put_mode: PutMode::default(),
            strategy: StrategyKind::default(),
            limits: Limits::default(),
            worker_threads: default_worker_threads(),
            flush_interval_ms: default_flush_interval_ms(),
            queue_capacity: None,
            enqueue_timeout_ms: None,
            drain_timeout_ms: default_drain_timeout_ms(),
            compression_level: default_compression_level(),
            retry: None,
        }
    }
}

impl ServiceConfig {
    /// Parse a TOML document. Missing fields take their defaults.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: ServiceConfig = toml::from_str(contents)?;
        Ok(config)
    }

    /// Load and parse a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ServiceError::Config(e.to_string()))
    }

    /// Check everything that can be checked without the collaborators.
    pub fn validate(&self) -> Result<()> {
        if self.destinations.is_empty() {
            return Err(ServiceError::Config(
                "at least one destination is required".to_string(),
            ));
        }
        if let Some(blank) = self.destinations.iter().find(|d| d.trim().is_empty()) {
            return Err(ServiceError::Config(format!(
                "destination names must not be blank: {:?}",
                blank
            )));
        }
        if self.worker_threads == 0 {
            return Err(ServiceError::Config(
                "worker_threads must be at least 1".to_string(),
            ));
        }
        if self.flush_interval_ms == 0 {
            return Err(ServiceError::Config(
                "flush_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.queue_capacity == Some(0) {
            return Err(ServiceError::Config(
                "queue_capacity must be greater than 0".to_string(),
            ));
        }
        if self.compression_level > 9 {
            return Err(ServiceError::Config(format!(
                "compression_level must be in 0..=9, got {}",
                self.compression_level
            )));
        }
        self.limits.validate()?;
        Ok(())
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn enqueue_timeout(&self) -> Option<Duration> {
        self.enqueue_timeout_ms.map(Duration::from_millis)
    }
}
