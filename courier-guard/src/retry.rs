//! Classified retry with randomized exponential backoff.
//!
//! Retryable errors are re-attempted after a wait drawn uniformly from
//! `[0, min(max_wait, initial_wait * 2^attempt)]` until the next wait would
//! carry the call past `max_total_deadline`; the last error is then returned
//! unchanged. Fatal and circuit-open errors are returned immediately.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use courier_domain::{Classify, ErrorClass, Fault};
use rand::Rng;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// =============================================================================
// Configuration
// =============================================================================

/// Retry configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Base of the exponential backoff
    pub initial_wait: Duration,
    /// Cap on a single backoff interval
    pub max_wait: Duration,
    /// Overall budget measured from the first attempt
    pub max_total_deadline: Duration,
    /// Optional per-attempt timeout; elapsing is a retryable failure
    pub attempt_timeout: Option<Duration>,
}

impl RetryConfig {
    /// Preset for long-lived subscription listening.
    pub fn listen() -> Self {
        Self {
            initial_wait: Duration::from_secs(1),
            max_wait: Duration::from_secs(30),
            max_total_deadline: Duration::from_secs(90),
            attempt_timeout: None,
        }
    }

    /// Preset for publishing a single message.
    pub fn publish() -> Self {
        Self {
            initial_wait: Duration::from_millis(100),
            max_wait: Duration::from_secs(5),
            max_total_deadline: Duration::from_secs(10),
            attempt_timeout: Some(Duration::from_secs(10)),
        }
    }

    /// Upper bound of the wait before retry number `attempt` (0-based).
    pub fn backoff_ceiling(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.initial_wait.saturating_mul(factor).min(self.max_wait)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::listen()
    }
}

// =============================================================================
// Attempts
// =============================================================================

/// A per-attempt timeout elapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Attempt timed out after {0:?}")]
pub struct AttemptTimeout(pub Duration);

impl From<AttemptTimeout> for Fault {
    fn from(timeout: AttemptTimeout) -> Self {
        Fault::TimedOut(timeout.to_string())
    }
}

/// State of a retry loop after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryAttempt {
    /// Number of failed attempts so far, minus one (0 after the first failure)
    pub attempt: u32,
    /// Time since the first attempt started
    pub elapsed: Duration,
    /// Classification of the last error
    pub last_class: ErrorClass,
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep for the given interval, then try again
    RetryAfter(Duration),
    /// Surface the last error
    GiveUp,
}

// =============================================================================
// Retry Policy
// =============================================================================

/// Reusable retry policy.
///
/// Wraps any future-returning operation whose error implements
/// [`Classify`]. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
    cancel: Option<CancellationToken>,
}

impl RetryPolicy {
    /// Create a policy from configuration.
    pub fn new(config: RetryConfig) -> Self {
        Self { config, cancel: None }
    }

    /// Abort backoff waits when `token` is cancelled.
    ///
    /// A cancelled loop returns the last observed error.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Active configuration.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Decide whether to retry after `attempt`.
    pub fn decide(&self, attempt: &RetryAttempt) -> RetryDecision {
        if attempt.last_class != ErrorClass::Retryable {
            return RetryDecision::GiveUp;
        }

        let ceiling = self.config.backoff_ceiling(attempt.attempt);
        let wait = jitter(ceiling);

        if attempt.elapsed.saturating_add(wait) >= self.config.max_total_deadline {
            return RetryDecision::GiveUp;
        }

        RetryDecision::RetryAfter(wait)
    }

    /// Run `operation` until it succeeds, fails non-retryably, or the
    /// deadline is reached.
    pub async fn run<F, Fut, T, E>(&self, operation_name: &str, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + From<AttemptTimeout> + Display,
    {
        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            let result = match self.config.attempt_timeout {
                Some(limit) => match tokio::time::timeout(limit, operation()).await {
                    Ok(result) => result,
                    Err(_) => Err(E::from(AttemptTimeout(limit))),
                },
                None => operation().await,
            };

            let error = match result {
                Ok(value) => {
                    if attempt > 0 {
                        info!(
                            operation = operation_name,
                            attempts = attempt + 1,
                            "Operation succeeded after retry"
                        );
                    }
                    return Ok(value);
                },
                Err(error) => error,
            };

            let state = RetryAttempt {
                attempt,
                elapsed: started.elapsed(),
                last_class: error.class(),
            };

            let wait = match self.decide(&state) {
                RetryDecision::RetryAfter(wait) => wait,
                RetryDecision::GiveUp => {
                    if state.last_class == ErrorClass::Retryable {
                        warn!(
                            operation = operation_name,
                            attempts = attempt + 1,
                            elapsed_ms = state.elapsed.as_millis() as u64,
                            error = %error,
                            "Retry deadline reached, giving up"
                        );
                    } else {
                        debug!(
                            operation = operation_name,
                            class = %state.last_class,
                            error = %error,
                            "Error not retryable"
                        );
                    }
                    return Err(error);
                },
            };

            warn!(
                operation = operation_name,
                attempt = attempt + 1,
                wait_ms = wait.as_millis() as u64,
                error = %error,
                "Retryable error, backing off"
            );

            if let Some(token) = &self.cancel {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        info!(operation = operation_name, "Retry cancelled by shutdown");
                        return Err(error);
                    }
                    _ = tokio::time::sleep(wait) => {}
                }
            } else {
                tokio::time::sleep(wait).await;
            }

            attempt = attempt.saturating_add(1);
        }
    }
}

/// Uniform draw from `[0, ceiling]` at millisecond granularity.
fn jitter(ceiling: Duration) -> Duration {
    let max_ms = u64::try_from(ceiling.as_millis()).unwrap_or(u64::MAX);
    Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
}

// =============================================================================
// Tests
// =============================================================================
