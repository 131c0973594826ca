//! Bounded exponential backoff around any [`EventSource`]. Only transient errors retry.

use super::{EventSource, RawEvent};
use crate::clock::{Clock, StopSignal};
use crate::config::RetryConfig;
use crate::error::{Result, StreamError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }

    /// Backoff after the `attempt`-th failure (1-based): doubles, capped at `max_backoff`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

pub struct RetryingSource<S> {
    inner: S,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
    stop: StopSignal,
}

impl<S: EventSource> RetryingSource<S> {
    pub fn new(inner: S, policy: RetryPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner,
            policy,
            clock,
            stop: StopSignal::new(),
        }
    }

    /// Cut backoff sleeps short when `stop` is requested.
    pub fn with_stop(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: EventSource> EventSource for RetryingSource<S> {
    fn fetch(&self, trail: &str, max_results: usize) -> Result<Vec<RawEvent>> {
        let mut attempt = 1;
        loop {
            match self.inner.fetch(trail, max_results) {
                Ok(events) => {
                    if attempt > 1 {
                        info!(trail, attempt, "fetch recovered after retry");
                    }
                    return Ok(events);
                }
                Err(e) if e.is_retryable() => {
                    if attempt >= self.policy.max_attempts || self.stop.is_requested() {
                        return Err(StreamError::TransientSource(format!(
                            "giving up after {} attempt(s): {}",
                            attempt, e
                        )));
                    }
                    let backoff = self.policy.backoff_for(attempt);
                    warn!(
                        trail,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "transient fetch failure; retrying"
                    );
                    self.clock.sleep(backoff, &self.stop);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
