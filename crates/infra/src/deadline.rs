//! Per-operation deadlines.

use std::time::{Duration, Instant};

use crate::error::StockError;

/// Point in time after which an operation must stop retrying.
///
/// Checked before every storage write, so an expired deadline never leaves a half
/// applied movement behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    /// No deadline.
    pub fn none() -> Self {
        Self { at: None }
    }

    pub fn at(instant: Instant) -> Self {
        Self { at: Some(instant) }
    }

    pub fn after(timeout: Duration) -> Self {
        Self::at(Instant::now() + timeout)
    }

    pub fn is_expired(&self) -> bool {
        self.at.is_some_and(|at| Instant::now() >= at)
    }

    /// Time left, or `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.at.map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn check(&self) -> Result<(), StockError> {
        if self.is_expired() {
            Err(StockError::DeadlineExceeded)
        } else {
            Ok(())
        }
    }

    /// Clamp a wait so it never overshoots the deadline.
    pub fn clamp(&self, wait: Duration) -> Duration {
        match self.remaining() {
            Some(left) => wait.min(left),
            None => wait,
        }
    }
}
