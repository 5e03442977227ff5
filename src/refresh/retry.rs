//! Bounded retry policy for the freshness probe.

use crate::error::{BotError, Result};
use crate::scheduler::clock::Clock;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Result of one attempt.
#[derive(Debug)]
pub enum Attempt<T> {
    /// Finished; stop retrying.
    Done(T),
    /// The remote side is not ready yet; try again after the interval.
    NotReady,
    /// The attempt failed; try again, and report this error if it was the last.
    Failed(BotError),
}

/// Fixed-interval retry with a maximum number of attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    interval: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            interval,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run `op` until it reports [`Attempt::Done`] or attempts run out,
    /// sleeping on `clock` between attempts.
    ///
    /// # Errors
    ///
    /// When attempts run out: the last attempt's error if it failed,
    /// otherwise [`BotError::StaleProbeTimeout`].
    pub async fn run<T, F, Fut>(&self, clock: &dyn Clock, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Attempt<T>>,
    {
        let mut last_error = None;
        for attempt in 1..=self.max_attempts {
            match op(attempt).await {
                Attempt::Done(value) => return Ok(value),
                Attempt::NotReady => {
                    debug!("attempt {attempt}/{} not ready", self.max_attempts);
                    last_error = None;
                }
                Attempt::Failed(e) => {
                    warn!("attempt {attempt}/{} failed: {e}", self.max_attempts);
                    last_error = Some(e);
                }
            }
            if attempt < self.max_attempts {
                clock.sleep(self.interval).await;
            }
        }
        Err(last_error.unwrap_or(BotError::StaleProbeTimeout {
            attempts: self.max_attempts,
        }))
    }
}
