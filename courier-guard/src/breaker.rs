//! Circuit breaker guarding calls into an unreliable dependency.
//!
//! # State machine
//!
//! ```text
//!            failure_count >= failure_threshold
//!   CLOSED ─────────────────────────────────────▶ OPEN
//!     ▲                                           │  ▲
//!     │ success_count >= half_open_threshold      │  │ any counted failure
//!     │                                           ▼  │
//!     └──────────────────────────────────────── HALF_OPEN
//!                      recovery_timeout elapsed (trial admitted)
//! ```
//!
//! Counters reset on every phase transition. Every check-and-transition runs
//! under one mutex, which is never held across the protected call.
//!
//! Two callers that both observe an elapsed recovery timeout before either
//! records its outcome are both admitted as trials.
//!
//! By default only retryable errors count as failures
//! ([`FailureFilter::RetryableOnly`]): a malformed payload says nothing about
//! the dependency's health. Use [`FailureFilter::AllErrors`] to count every
//! error, fatal ones included.

use std::fmt;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use courier_domain::{Classify, ErrorClass};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::retry::AttemptTimeout;

// =============================================================================
// Configuration
// =============================================================================

/// Which error classes count as breaker failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureFilter {
    /// Only transient infrastructure faults trip the breaker
    RetryableOnly,
    /// Retryable and fatal errors both trip the breaker
    AllErrors,
}

impl FailureFilter {
    /// Whether an error of `class` counts against the breaker.
    pub fn counts(&self, class: ErrorClass) -> bool {
        match (self, class) {
            (_, ErrorClass::CircuitOpen) => false,
            (FailureFilter::RetryableOnly, ErrorClass::Retryable) => true,
            (FailureFilter::RetryableOnly, ErrorClass::Fatal) => false,
            (FailureFilter::AllErrors, _) => true,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures in CLOSED before opening
    pub failure_threshold: u32,
    /// Time spent OPEN before a trial call is admitted
    pub recovery_timeout: Duration,
    /// Successes in HALF_OPEN before closing
    pub half_open_success_threshold: u32,
    /// Error classes that count as failures
    pub failure_filter: FailureFilter,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(10),
            half_open_success_threshold: 3,
            failure_filter: FailureFilter::RetryableOnly,
        }
    }
}

// =============================================================================
// State
// =============================================================================

/// Breaker phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Calls pass through
    Closed,
    /// Calls rejected without running
    Open,
    /// Trial calls pass through
    HalfOpen,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Closed => write!(f, "CLOSED"),
            Phase::Open => write!(f, "OPEN"),
            Phase::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Snapshot of a circuit's state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerState {
    /// Current phase
    pub phase: Phase,
    /// Consecutive counted failures (CLOSED)
    pub failure_count: u32,
    /// Consecutive successes (HALF_OPEN)
    pub success_count: u32,
    /// When the circuit last opened; `None` unless OPEN or HALF_OPEN
    pub opened_at: Option<Instant>,
}

impl BreakerState {
    fn closed() -> Self {
        Self {
            phase: Phase::Closed,
            failure_count: 0,
            success_count: 0,
            opened_at: None,
        }
    }

    fn transition(&mut self, phase: Phase) {
        self.phase = phase;
        self.failure_count = 0;
        self.success_count = 0;
        match phase {
            Phase::Open => self.opened_at = Some(Instant::now()),
            Phase::Closed => self.opened_at = None,
            Phase::HalfOpen => {},
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Error returned by [`CircuitBreaker::execute`].
#[derive(Debug, thiserror::Error)]
pub enum BreakerError<E> {
    /// Rejected without running the operation
    #[error("Circuit `{circuit}` is open, retry in {retry_in:?}")]
    Open {
        /// Circuit name
        circuit: String,
        /// Time left until a trial call is admitted
        retry_in: Duration,
    },

    /// The operation ran and failed
    #[error("{0}")]
    Inner(#[source] E),
}

impl<E> BreakerError<E> {
    /// Check if this is a fast rejection.
    pub fn is_open(&self) -> bool {
        matches!(self, BreakerError::Open { .. })
    }

    /// The operation's own error, if it ran.
    pub fn into_inner(self) -> Option<E> {
        match self {
            BreakerError::Inner(e) => Some(e),
            BreakerError::Open { .. } => None,
        }
    }
}

impl<E: Classify> Classify for BreakerError<E> {
    fn class(&self) -> ErrorClass {
        match self {
            BreakerError::Open { .. } => ErrorClass::CircuitOpen,
            BreakerError::Inner(e) => e.class(),
        }
    }
}

impl<E: From<AttemptTimeout>> From<AttemptTimeout> for BreakerError<E> {
    fn from(timeout: AttemptTimeout) -> Self {
        BreakerError::Inner(E::from(timeout))
    }
}

// =============================================================================
// Circuit Breaker
// =============================================================================

/// A named circuit breaker.
///
/// One instance per protected call-site, shared via `Arc` by all callers.
/// State lives in memory and resets to CLOSED on restart.
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Create a new breaker in the CLOSED phase.
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: Mutex::new(BreakerState::closed()),
        }
    }

    /// Circuit name (used in logs and rejections).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Active configuration.
    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> BreakerState {
        self.lock().clone()
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.lock().phase
    }

    /// Run `operation` under breaker protection.
    ///
    /// # Returns
    /// * `Ok(T)` - operation succeeded
    /// * `Err(BreakerError::Open)` - circuit open, operation not invoked
    /// * `Err(BreakerError::Inner(E))` - operation failed
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify,
    {
        self.admit()?;

        match operation().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            },
            Err(error) => {
                if self.config.failure_filter.counts(error.class()) {
                    self.record_failure();
                } else {
                    debug!(circuit = %self.name, class = %error.class(), "Error not counted by breaker");
                }
                Err(BreakerError::Inner(error))
            },
        }
    }

    /// Force the circuit OPEN (manual intervention).
    pub fn force_open(&self) {
        let mut state = self.lock();
        state.transition(Phase::Open);
        warn!(circuit = %self.name, "Circuit breaker manually OPENED");
    }

    /// Force the circuit CLOSED (manual recovery).
    pub fn force_close(&self) {
        let mut state = self.lock();
        state.transition(Phase::Closed);
        info!(circuit = %self.name, "Circuit breaker manually CLOSED");
    }

    /// Decide whether a call may proceed, moving OPEN → HALF_OPEN once the
    /// recovery timeout has elapsed.
    fn admit<E>(&self) -> Result<(), BreakerError<E>> {
        let mut state = self.lock();

        if state.phase != Phase::Open {
            return Ok(());
        }

        let elapsed = state.opened_at.map(|at| at.elapsed()).unwrap_or(Duration::MAX);
        if elapsed >= self.config.recovery_timeout {
            state.transition(Phase::HalfOpen);
            info!(
                circuit = %self.name,
                elapsed_ms = elapsed.as_millis() as u64,
                "Circuit breaker HALF_OPEN, admitting trial call"
            );
            return Ok(());
        }

        let retry_in = self.config.recovery_timeout - elapsed;
        debug!(
            circuit = %self.name,
            retry_in_ms = retry_in.as_millis() as u64,
            "Circuit breaker OPEN, rejecting call"
        );
        Err(BreakerError::Open { circuit: self.name.clone(), retry_in })
    }

    fn record_success(&self) {
        let mut state = self.lock();

        match state.phase {
            Phase::Closed => state.failure_count = 0,
            Phase::HalfOpen => {
                state.success_count += 1;
                if state.success_count >= self.config.half_open_success_threshold {
                    state.transition(Phase::Closed);
                    info!(circuit = %self.name, "Circuit breaker CLOSED after successful trials");
                } else {
                    debug!(
                        circuit = %self.name,
                        successes = state.success_count,
                        threshold = self.config.half_open_success_threshold,
                        "Circuit breaker trial succeeded"
                    );
                }
            },
            // Admitted before another caller opened the circuit
            Phase::Open => {},
        }
    }

    fn record_failure(&self) {
        let mut state = self.lock();

        match state.phase {
            Phase::Closed => {
                state.failure_count += 1;
                if state.failure_count >= self.config.failure_threshold {
                    let failures = state.failure_count;
                    state.transition(Phase::Open);
                    warn!(
                        circuit = %self.name,
                        failures,
                        recovery_timeout_ms = self.config.recovery_timeout.as_millis() as u64,
                        "Circuit breaker OPENED after consecutive failures"
                    );
                } else {
                    debug!(
                        circuit = %self.name,
                        failures = state.failure_count,
                        threshold = self.config.failure_threshold,
                        "Circuit breaker failure recorded"
                    );
                }
            },
            Phase::HalfOpen => {
                state.transition(Phase::Open);
                warn!(circuit = %self.name, "Circuit breaker re-OPENED after failed trial");
            },
            Phase::Open => {},
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
