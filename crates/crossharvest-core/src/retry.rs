//! Retry with capped exponential backoff and jitter for API requests

use std::time::Duration;

use rand::Rng;

use crate::clock::Clock;
use crate::error::FetchError;

/// Backoff parameters for one logical request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound of the random delay added to each backoff
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            max_jitter: Duration::from_millis(250),
        }
    }
}

/// Where a request is in its retry lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    Attempting { attempt: u32 },
    BackingOff { attempt: u32, delay: Duration },
    Exhausted { attempts: u32 },
    Succeeded { attempts: u32 },
}

impl RetryPolicy {
    /// Deterministic part of the wait after failed attempt `attempt` (1-based):
    /// `base * 2^(attempt-1)`, capped at `max_delay`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exp)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    fn jitter(&self) -> Duration {
        let max_ms = self.max_jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }

    /// Next state after attempt `attempt` finished with `outcome`.
    pub fn transition(&self, attempt: u32, outcome: Result<(), &FetchError>) -> RetryState {
        match outcome {
            Ok(()) => RetryState::Succeeded { attempts: attempt },
            Err(e) if e.is_retryable() && attempt < self.max_attempts => RetryState::BackingOff {
                attempt,
                delay: self.backoff_delay(attempt),
            },
            Err(_) => RetryState::Exhausted { attempts: attempt },
        }
    }
}

/// Run `attempt_fn` until it succeeds, fails fatally, or the policy runs out.
///
/// Transient failures that exhaust the budget come back as `Fatal`, carrying
/// the attempt count and the last cause.
pub fn retry_with_backoff<T>(
    policy: &RetryPolicy,
    clock: &dyn Clock,
    label: &str,
    mut attempt_fn: impl FnMut(u32) -> Result<T, FetchError>,
) -> Result<T, FetchError> {
    let mut state = RetryState::Attempting { attempt: 1 };
    loop {
        state = match state {
            RetryState::Attempting { attempt } => {
                let result = attempt_fn(attempt);
                match policy.transition(attempt, result.as_ref().map(|_| ())) {
                    RetryState::BackingOff { attempt, delay } => {
                        if let Err(e) = &result {
                            log::debug!(
                                "{label}: attempt {attempt}/{} failed: {e}, retrying in {delay:?}",
                                policy.max_attempts
                            );
                        }
                        RetryState::BackingOff { attempt, delay }
                    }
                    RetryState::Exhausted { attempts } => {
                        return result.map_err(|e| {
                            log::warn!("{label}: failed permanently: {e}");
                            e.exhausted(attempts)
                        });
                    }
                    _ => return result,
                }
            }
            RetryState::BackingOff { attempt, delay } => {
                clock.sleep(delay + policy.jitter());
                RetryState::Attempting {
                    attempt: attempt + 1,
                }
            }
            RetryState::Exhausted { .. } | RetryState::Succeeded { .. } => {
                unreachable!("terminal retry states return directly")
            }
        };
    }
}
