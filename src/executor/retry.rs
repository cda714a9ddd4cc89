//! Retry with exponential backoff
//!
//! An operation moves `Pending -> Attempting -> Success`, back to `Pending`
//! after a retryable failure and a backoff sleep, or to terminal failure.

use crate::constants::{DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY_MS};
use crate::error::{ErrorKind, InventoryError};
use log::{debug, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Slice used when sleeping so a cancel request is noticed promptly
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Backoff schedule and attempt limit for one operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
        }
    }
}

/// Result of running an operation under a policy
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T, InventoryError>,
    /// Attempts actually made
    pub attempts: u32,
}

impl<T> RetryOutcome<T> {
    /// Attempts made beyond the first
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// Policy with no backoff, for rehearsals and tests
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO, Duration::ZERO)
    }

    /// Delay before attempt `attempt + 1`, after `attempt` has failed
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let factor = 1u32 << exponent;
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    /// Whether a failure on `attempt` may be retried
    ///
    /// Accessor-provided kinds are trusted; `Other` falls back to the
    /// message heuristic. Authentication failures get one retry, for an
    /// expired session that the accessor re-establishes.
    pub fn is_retryable(error: &InventoryError, attempt: u32) -> bool {
        let kind = match error.kind() {
            ErrorKind::Other => ErrorKind::classify(error.message()),
            kind => kind,
        };
        match kind {
            ErrorKind::Transient => true,
            ErrorKind::Authentication => attempt == 1,
            _ => false,
        }
    }

    /// Run `op` until it succeeds, fails terminally or runs out of attempts
    ///
    /// `op` receives the 1-based attempt number. Setting `cancel` interrupts
    /// a backoff sleep and stops further attempts.
    pub fn execute<T, F>(&self, cancel: &AtomicBool, mut op: F) -> RetryOutcome<T>
    where
        F: FnMut(u32) -> Result<T, InventoryError>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => {
                    return RetryOutcome {
                        result: Ok(value),
                        attempts: attempt,
                    }
                }
                Err(error) => {
                    let retryable = Self::is_retryable(&error, attempt);
                    if !retryable || attempt >= self.max_attempts {
                        if retryable {
                            warn!("Giving up after {} attempts: {}", attempt, error);
                        }
                        return RetryOutcome {
                            result: Err(error),
                            attempts: attempt,
                        };
                    }

                    let delay = self.delay_for(attempt);
                    debug!(
                        "Attempt {}/{} failed ({}), retrying in {:?}",
                        attempt, self.max_attempts, error, delay
                    );
                    if !sleep_unless_cancelled(delay, cancel) {
                        return RetryOutcome {
                            result: Err(error),
                            attempts: attempt,
                        };
                    }
                    attempt += 1;
                }
            }
        }
    }
}

/// Sleep for `delay`; returns false if `cancel` was set meanwhile
fn sleep_unless_cancelled(delay: Duration, cancel: &AtomicBool) -> bool {
    let deadline = Instant::now() + delay;
    loop {
        if cancel.load(Ordering::Relaxed) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep(SLEEP_SLICE.min(deadline - now));
    }
}
