//! Courier Guard Layer
//!
//! Resilience primitives wrapped around every external call: a per-dependency
//! circuit breaker and a classified retry policy with jittered backoff.
//! Neither knows anything about messages or ledgers; both speak only
//! [`courier_domain::Classify`].

#![warn(clippy::all)]

pub mod breaker;
pub mod retry;

pub use breaker::{BreakerConfig, BreakerError, BreakerState, CircuitBreaker, FailureFilter, Phase};
pub use retry::{AttemptTimeout, RetryAttempt, RetryConfig, RetryDecision, RetryPolicy};
