// src/core/monitor/debounce.rs

//! Trailing-edge debounce with a max-wait ceiling, as a plain state machine.
//!
//! A batch is due `window` after the most recent push, but never later than
//! `max_wait` after the first push of the batch. The caller owns the timer:
//! it sleeps until `deadline()` and then calls `take()`.

use tokio::time::{Duration, Instant};

#[derive(Debug)]
pub struct Debouncer<T> {
    window: Duration,
    max_wait: Duration,
    pending: Vec<T>,
    first_at: Option<Instant>,
    last_at: Option<Instant>,
}

impl<T> Debouncer<T> {
    pub fn new(window: Duration, max_wait: Duration) -> Self {
        Self {
            window,
            max_wait: max_wait.max(window),
            pending: Vec::new(),
            first_at: None,
            last_at: None,
        }
    }

    /// Adds an item, starting a batch if none is pending.
    pub fn push(&mut self, item: T, now: Instant) {
        self.first_at.get_or_insert(now);
        self.last_at = Some(now);
        self.pending.push(item);
    }

    /// When the pending batch must be flushed, or `None` if nothing is pending.
    pub fn deadline(&self) -> Option<Instant> {
        let first = self.first_at?;
        let last = self.last_at?;
        Some((last + self.window).min(first + self.max_wait))
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.deadline().is_some_and(|deadline| now >= deadline)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Removes and returns the pending batch in arrival order.
    pub fn take(&mut self) -> Vec<T> {
        self.first_at = None;
        self.last_at = None;
        std::mem::take(&mut self.pending)
    }
}
