//! Time-based flush trigger.
//!
//! Each worker owns one trigger. It records when the worker last flushed and
//! answers two questions: is a flush due, and how long may the worker block
//! waiting for input before it has to check again.

use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct FlushTrigger {
    interval: Duration,
    last_flush: Instant,
}

impl FlushTrigger {
    pub fn new(interval: Duration) -> Self {
        Self::started_at(interval, Instant::now())
    }

    pub fn started_at(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            last_flush: now,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// When the next timed flush is due.
    pub fn deadline(&self) -> Instant {
        self.last_flush + self.interval
    }

    pub fn is_due(&self) -> bool {
        self.is_due_at(Instant::now())
    }

    /// True once `interval` has elapsed since the last flush.
    pub fn is_due_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_flush) >= self.interval
    }

    /// Time left until the next timed flush, zero when overdue.
    pub fn remaining(&self) -> Duration {
        self.remaining_at(Instant::now())
    }

    pub fn remaining_at(&self, now: Instant) -> Duration {
        self.deadline().saturating_duration_since(now)
    }

    /// Restart the interval. Called after every flush, including empty ones.
    pub fn reset(&mut self) {
        self.reset_at(Instant::now());
    }

    pub fn reset_at(&mut self, now: Instant) {
        self.last_flush = now;
    }
}
