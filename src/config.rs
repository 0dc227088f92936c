//! Configuration and tuning for the scheduler and demultiplexer.
//!
//! This module provides:
//! - A plain configuration type with sensible defaults
//! - Validation for guardrail invariants
//! - Layered loading (defaults + environment overrides)
//!
//! Note: parsing is intentionally minimal and deterministic.

use std::time::Duration;

use crate::error::{Error, ErrorKind};

/// Configuration for a [`Scheduler`](crate::Scheduler).
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Capacity of the per-worker event batch buffer.
    pub events_capacity: usize,
    /// Backstop timeout for each kernel wait. Workers re-check the stop
    /// flag and outstanding-work count after every wait, so this bounds
    /// shutdown latency when an interrupt is lost to a race.
    pub poll_timeout: Duration,
    /// Maximum number of retired resource slots the pool retains for reuse.
    pub pool_retain: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            events_capacity: 64,
            poll_timeout: Duration::from_millis(500),
            pool_retain: 256,
        }
    }
}

impl SchedulerConfig {
    /// Validates the configuration for basic sanity.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidState`] when a field is outside its
    /// guardrail range.
    pub fn validate(&self) -> Result<(), Error> {
        if self.events_capacity == 0 {
            return Err(Error::new(ErrorKind::InvalidState)
                .with_message("events_capacity must be non-zero"));
        }
        if self.poll_timeout < Duration::from_millis(1) {
            return Err(Error::new(ErrorKind::InvalidState)
                .with_message("poll_timeout below 1ms spins the worker loop"));
        }
        Ok(())
    }

    /// Applies `REMUX_*` environment overrides on top of `self`.
    ///
    /// Unparseable values are ignored rather than failing startup; the
    /// result should still be passed through [`validate`](Self::validate).
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(v) = env_usize("REMUX_EVENTS_CAPACITY") {
            self.events_capacity = v;
        }
        if let Some(v) = env_usize("REMUX_POLL_TIMEOUT_MS") {
            self.poll_timeout = Duration::from_millis(v as u64);
        }
        if let Some(v) = env_usize("REMUX_POOL_RETAIN") {
            self.pool_retain = v;
        }
        self
    }

    /// Default configuration with environment overrides applied.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}
