//! Retry Logic with Exponential Backoff
//!
//! Workers report sink failures and move on; they never retry on their own.
//! [`RetryingSink`] wraps any [`Sink`] and retries transient failures in
//! place, on the worker's thread, before the failure reaches the reporter.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐
//! │  worker      │ flush(batch)
//! └──────┬───────┘
//!        │
//!        ▼
//! ┌──────────────────────────────┐
//! │  RetryingSink                │
//! │  - max_retries: 5            │
//! │  - initial_backoff: 100ms    │
//! │  - max_backoff: 30s          │
//! │  - backoff_multiplier: 2.0   │
//! │  - jitter: ±25%              │
//! └──────┬───────────────────────┘
//!        │
//!        ├─→ Attempt 1: Immediate
//!        ├─→ Attempt 2: Wait ~100ms
//!        ├─→ Attempt 3: Wait ~200ms
//!        └─→ ...
//!        ▼
//! ┌──────────────┐
//! │  inner sink  │
//! └──────────────┘
//! ```
//!
//! ## Retryable vs Non-Retryable Errors
//!
//! - [`SinkError::Transient`]: throttling, timeouts. Retried.
//! - [`SinkError::Permanent`]: unknown destination, rejected payload.
//!   Returned immediately.
//!
//! A worker blocked in a retry loop is not consuming its queue, so keep
//! `max_backoff` well below the flush interval in latency sensitive setups.

use std::thread::sleep;
use std::time::Duration;

use qio_core::WireRecord;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::SinkError;
use crate::traits::Sink;

/// Retry policy configuration for exponential backoff.
///
/// # Backoff Calculation
///
/// ```text
/// backoff = min(initial_backoff * multiplier^attempt, max_backoff)
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts
    pub max_retries: usize,

    /// Initial backoff duration
    #[serde(with = "millis")]
    pub initial_backoff: Duration,

    /// Maximum backoff duration
    #[serde(with = "millis")]
    pub max_backoff: Duration,

    /// Backoff multiplier for exponential growth
    pub backoff_multiplier: f64,

    /// Randomize each backoff by ±25%
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

fn default_jitter() -> bool {
    true
}

impl Default for RetryPolicy {
    /// 5 retries, 100ms initial backoff doubling up to 30s, with jitter.
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn new(
        max_retries: usize,
        initial_backoff: Duration,
        max_backoff: Duration,
        backoff_multiplier: f64,
    ) -> Self {
        Self {
            max_retries,
            initial_backoff,
            max_backoff,
            backoff_multiplier,
            jitter: true,
        }
    }

    /// Never retry.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Calculate backoff duration for a given attempt number (0-indexed).
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    /// use qio_service::RetryPolicy;
    ///
    /// let policy = RetryPolicy::default();
    /// assert_eq!(policy.backoff(0), Duration::from_millis(100));
    /// assert_eq!(policy.backoff(1), Duration::from_millis(200));
    /// assert_eq!(policy.backoff(20), Duration::from_secs(30));
    /// ```
    pub fn backoff(&self, attempt: usize) -> Duration {
        let backoff_ms =
            self.initial_backoff.as_millis() as f64 * self.backoff_multiplier.powi(attempt as i32);
        let backoff = Duration::from_millis(backoff_ms as u64);
        backoff.min(self.max_backoff)
    }

    /// Backoff with ±25% jitter applied when enabled.
    ///
    /// ```text
    /// jittered_backoff = backoff * (0.75 + random(0.0, 0.5))
    /// ```
    pub fn jittered_backoff(&self, attempt: usize) -> Duration {
        let backoff = self.backoff(attempt);
        if !self.jitter {
            return backoff;
        }
        let jitter_factor = 0.75 + rand::random::<f64>() * 0.5;
        Duration::from_millis((backoff.as_millis() as f64 * jitter_factor) as u64)
    }

    /// Check if an error is retryable.
    pub fn is_retryable(&self, error: &SinkError) -> bool {
        error.is_retryable()
    }

    /// Run `operation` until it succeeds, fails permanently, or retries run out.
    pub fn run<T, F>(&self, mut operation: F) -> Result<T, SinkError>
    where
        F: FnMut() -> Result<T, SinkError>,
    {
        let mut attempt = 0;

        loop {
            match operation() {
                Ok(result) => {
                    if attempt > 0 {
                        debug!(attempt = attempt + 1, "Sink put succeeded after retry");
                    }
                    return Ok(result);
                }
                Err(error) => {
                    if !self.is_retryable(&error) {
                        warn!(error = %error, "Non-retryable sink error, giving up");
                        return Err(error);
                    }

                    if attempt >= self.max_retries {
                        warn!(
                            attempt = attempt + 1,
                            max_retries = self.max_retries,
                            error = %error,
                            "Max retries exhausted, giving up"
                        );
                        return Err(error);
                    }

                    let backoff = self.jittered_backoff(attempt);
                    warn!(
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %error,
                        "Retryable sink error, backing off"
                    );

                    sleep(backoff);
                    attempt += 1;
                }
            }
        }
    }
}

/// Sink adapter that retries transient failures of the wrapped sink.
pub struct RetryingSink<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S: Sink> RetryingSink<S> {
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: Sink> Sink for RetryingSink<S> {
    fn put_one(
        &self,
        record: &WireRecord,
        destination: &str,
        partition_key: Option<&str>,
    ) -> Result<(), SinkError> {
        self.policy
            .run(|| self.inner.put_one(record, destination, partition_key))
    }

    fn put_batch(
        &self,
        records: &[WireRecord],
        destination: &str,
        partition_key: Option<&str>,
    ) -> Result<(), SinkError> {
        self.policy
            .run(|| self.inner.put_batch(records, destination, partition_key))
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sinks::MemorySink;
    use std::cell::Cell;

    fn fast_policy(max_retries: usize) -> RetryPolicy {
        RetryPolicy::new(
            max_retries,
            Duration::from_millis(1),
            Duration::from_millis(5),
            2.0,
        )
        .without_jitter()
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 5);
        assert_eq!(policy.initial_backoff, Duration::from_millis(100));
        assert_eq!(policy.max_backoff, Duration::from_secs(30));
        assert_eq!(policy.backoff_multiplier, 2.0);
    }

    #[test]
    fn test_backoff_calculation() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(400));
        assert_eq!(policy.backoff(3), Duration::from_millis(800));
        assert_eq!(policy.backoff(10), Duration::from_secs(30));
    }

    #[test]
    fn test_jitter_range() {
        let policy = RetryPolicy::default();
        for _ in 0..100 {
            let backoff = policy.jittered_backoff(0);
            assert!(backoff >= Duration::from_millis(75));
            assert!(backoff <= Duration::from_millis(125));
        }
        assert_eq!(
            policy.clone().without_jitter().jittered_backoff(0),
            Duration::from_millis(100)
        );
    }

    #[test]
    fn test_retry_until_success() {
        let calls = Cell::new(0);
        let result = fast_policy(3).run(|| {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(SinkError::Transient("throttled".into()))
            } else {
                Ok(calls.get())
            }
        });
        assert_eq!(result, Ok(3));
    }

    #[test]
    fn test_permanent_error_not_retried() {
        let calls = Cell::new(0);
        let result: Result<(), _> = fast_policy(5).run(|| {
            calls.set(calls.get() + 1);
            Err(SinkError::Permanent("no such stream".into()))
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_retries_exhausted() {
        let calls = Cell::new(0);
        let result: Result<(), _> = fast_policy(2).run(|| {
            calls.set(calls.get() + 1);
            Err(SinkError::Transient("throttled".into()))
        });
        assert_eq!(result, Err(SinkError::Transient("throttled".into())));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_retrying_sink_wraps_inner() {
        let inner = MemorySink::new();
        inner.fail_next(SinkError::Transient("throttled".into()));
        inner.fail_next(SinkError::Transient("throttled".into()));

        let sink = RetryingSink::new(inner, fast_policy(3));
        let record = WireRecord::from("payload".to_string());
        sink.put_batch(std::slice::from_ref(&record), "events", None)
            .unwrap();

        assert_eq!(sink.inner().failed_calls(), 2);
        assert_eq!(sink.inner().call_count(), 1);
    }

    #[test]
    fn test_policy_from_toml() {
        let policy: RetryPolicy = toml::from_str(
            r#"
            max_retries = 2
            initial_backoff = 50
            max_backoff = 1000
            backoff_multiplier = 3.0
            "#,
        )
        .unwrap();
        assert_eq!(policy.initial_backoff, Duration::from_millis(50));
        assert!(policy.jitter);
    }
}
