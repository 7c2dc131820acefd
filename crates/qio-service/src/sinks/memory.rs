//! In-memory sink that records every put call.
//!
//! Used by the test suites to observe exactly what the workers sent, and
//! to script failures. Calls are kept in arrival order across all workers.
//!
//! ```
//! use std::time::Duration;
//! use qio_core::WireRecord;
//! use qio_service::{MemorySink, Sink};
//!
//! let sink = MemorySink::new();
//! sink.put_batch(&[WireRecord::from("a".to_string())], "clicks", None).unwrap();
//! assert!(sink.wait_for_records(1, Duration::from_millis(10)));
//! assert_eq!(sink.calls()[0].destination, "clicks");
//! ```

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use qio_core::WireRecord;

use crate::error::SinkError;
use crate::traits::{PutMode, Sink};

/// One observed put call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutCall {
    pub destination: String,
    pub partition_key: Option<String>,
    pub mode: PutMode,
    pub records: Vec<WireRecord>,
}

#[derive(Default)]
struct State {
    calls: Vec<PutCall>,
    failures: VecDeque<SinkError>,
    failed_calls: usize,
}

/// Sink that keeps every successful call in memory.
#[derive(Default)]
pub struct MemorySink {
    state: Mutex<State>,
    changed: Condvar,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fail the next put call with `error`. Failures queue up in order.
    pub fn fail_next(&self, error: SinkError) {
        self.lock().failures.push_back(error);
    }

    /// Successful calls, in arrival order.
    pub fn calls(&self) -> Vec<PutCall> {
        self.lock().calls.clone()
    }

    /// Records of each successful call.
    pub fn batches(&self) -> Vec<Vec<WireRecord>> {
        self.lock().calls.iter().map(|c| c.records.clone()).collect()
    }

    /// Every delivered record, flattened in arrival order.
    pub fn records(&self) -> Vec<WireRecord> {
        self.lock()
            .calls
            .iter()
            .flat_map(|c| c.records.iter().cloned())
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.lock().calls.len()
    }

    /// Calls that consumed a scripted failure.
    pub fn failed_calls(&self) -> usize {
        self.lock().failed_calls
    }

    pub fn total_records(&self) -> usize {
        self.lock().calls.iter().map(|c| c.records.len()).sum()
    }

    /// Block until at least `count` records were delivered or `timeout` elapses.
    pub fn wait_for_records(&self, count: usize, timeout: Duration) -> bool {
        self.wait_until(timeout, |state| {
            state.calls.iter().map(|c| c.records.len()).sum::<usize>() >= count
        })
    }

    /// Block until at least `count` successful calls happened or `timeout` elapses.
    pub fn wait_for_calls(&self, count: usize, timeout: Duration) -> bool {
        self.wait_until(timeout, |state| state.calls.len() >= count)
    }

    fn wait_until(&self, timeout: Duration, done: impl Fn(&State) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if done(&state) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = self
                .changed
                .wait_timeout(state, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
    }

    fn record(&self, call: PutCall) -> Result<(), SinkError> {
        let mut state = self.lock();
        if let Some(error) = state.failures.pop_front() {
            state.failed_calls += 1;
            drop(state);
            self.changed.notify_all();
            return Err(error);
        }
        state.calls.push(call);
        drop(state);
        self.changed.notify_all();
        Ok(())
    }
}

impl Sink for MemorySink {
    fn put_one(
        &self,
        record: &WireRecord,
        destination: &str,
        partition_key: Option<&str>,
    ) -> Result<(), SinkError> {
        self.record(PutCall {
            destination: destination.to_string(),
            partition_key: partition_key.map(str::to_string),
            mode: PutMode::Single,
            records: vec![record.clone()],
        })
    }

    fn put_batch(
        &self,
        records: &[WireRecord],
        destination: &str,
        partition_key: Option<&str>,
    ) -> Result<(), SinkError> {
        self.record(PutCall {
            destination: destination.to_string(),
            partition_key: partition_key.map(str::to_string),
            mode: PutMode::Batch,
            records: records.to_vec(),
        })
    }
}
