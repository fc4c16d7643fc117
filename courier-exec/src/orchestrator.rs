//! Delivery Orchestrator: one inbound delivery, end to end.
//!
//! # Flow
//!
//! ```text
//! Delivery → dedup key → ledger check → store PENDING
//!          → retry(breaker(timeout(processor))) → mark PROCESSED → ack
//! ```
//!
//! Any failure before the ledger update nacks the delivery and leaves the
//! record PENDING, so redelivery reprocesses it. The ack is only ever sent
//! after `mark_processed` has succeeded.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use courier_domain::{
    Classify, DedupKey, DeliveryId, ErrorClass, Fault, InboundMessage, DEFAULT_DEDUP_ATTRIBUTE,
};
use courier_guard::{AttemptTimeout, BreakerError, CircuitBreaker, RetryConfig, RetryPolicy};
use courier_store::{IdempotencyLedger, LedgerError};

use crate::error::{ExecError, ExecResult};
use crate::ports::{Delivery, Processor};

// =============================================================================
// Configuration
// =============================================================================

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Attribute carrying the deduplication key
    pub dedup_attribute: String,
    /// Bound on one processor invocation; elapsing counts as a retryable failure
    pub processing_timeout: Duration,
    /// Bound on one ledger call
    pub ledger_timeout: Duration,
    /// Bound on the ack or nack sent to the broker
    pub settle_timeout: Duration,
    /// Retry policy for processor invocations and ledger calls
    pub retry: RetryConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            dedup_attribute: DEFAULT_DEDUP_ATTRIBUTE.to_string(),
            processing_timeout: Duration::from_secs(30),
            ledger_timeout: Duration::from_secs(5),
            settle_timeout: Duration::from_secs(10),
            retry: RetryConfig::default(),
        }
    }
}

// =============================================================================
// Outcome
// =============================================================================

/// Why a delivery was nacked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NackReason {
    /// Dedup attribute absent or blank
    MissingDedupKey,
    /// Processor circuit rejected the call
    CircuitOpen,
    /// Retryable failures outlasted the retry deadline (or shutdown interrupted)
    RetriesExhausted,
    /// Processor reported a permanent fault
    Fatal,
    /// Ledger could not be read or updated
    LedgerUnavailable,
}

impl fmt::Display for NackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            NackReason::MissingDedupKey => "missing_dedup_key",
            NackReason::CircuitOpen => "circuit_open",
            NackReason::RetriesExhausted => "retries_exhausted",
            NackReason::Fatal => "fatal",
            NackReason::LedgerUnavailable => "ledger_unavailable",
        };
        f.write_str(reason)
    }
}

/// Terminal outcome of handling one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Processed and recorded; acked
    Processed,
    /// Key already processed; acked without invoking the processor
    Duplicate,
    /// Not processed; nacked for redelivery or dead-lettering
    Nacked(NackReason),
}

impl DeliveryOutcome {
    /// Whether this outcome settles with an ack.
    pub fn is_ack(&self) -> bool {
        matches!(self, DeliveryOutcome::Processed | DeliveryOutcome::Duplicate)
    }
}

// =============================================================================
// Stats
// =============================================================================

/// Running counters, updated as deliveries settle.
#[derive(Debug, Default)]
pub struct DeliveryStats {
    processed: AtomicU64,
    duplicates: AtomicU64,
    nacked: AtomicU64,
}

/// Point-in-time copy of [`DeliveryStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Deliveries processed and acked
    pub processed: u64,
    /// Redeliveries acked without processing
    pub duplicates: u64,
    /// Deliveries nacked
    pub nacked: u64,
}

impl DeliveryStats {
    fn record(&self, outcome: DeliveryOutcome) {
        let counter = match outcome {
            DeliveryOutcome::Processed => &self.processed,
            DeliveryOutcome::Duplicate => &self.duplicates,
            DeliveryOutcome::Nacked(_) => &self.nacked,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the current counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            nacked: self.nacked.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Drives each delivery through dedup, guarded processing and settlement.
///
/// Built once per process and shared via `Arc` by all in-flight tasks.
pub struct DeliveryOrchestrator<L: ?Sized, P: ?Sized> {
    ledger: Arc<L>,
    processor: Arc<P>,
    breaker: Arc<CircuitBreaker>,
    processing_retry: RetryPolicy,
    ledger_retry: RetryPolicy,
    config: OrchestratorConfig,
    stats: DeliveryStats,
}

impl<L, P> DeliveryOrchestrator<L, P>
where
    L: IdempotencyLedger + ?Sized,
    P: Processor + ?Sized,
{
    /// Create a new orchestrator.
    pub fn new(
        ledger: Arc<L>,
        processor: Arc<P>,
        breaker: Arc<CircuitBreaker>,
        config: OrchestratorConfig,
    ) -> Self {
        let processing_retry = RetryPolicy::new(config.retry.clone());
        let ledger_retry = RetryPolicy::new(RetryConfig {
            attempt_timeout: Some(config.ledger_timeout),
            ..config.retry.clone()
        });

        Self {
            ledger,
            processor,
            breaker,
            processing_retry,
            ledger_retry,
            config,
            stats: DeliveryStats::default(),
        }
    }

    /// Cut backoff waits short when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.processing_retry = self.processing_retry.with_cancellation(token.clone());
        self.ledger_retry = self.ledger_retry.with_cancellation(token);
        self
    }

    /// Breaker guarding the processor.
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Counters so far.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Handle one delivery and settle it.
    ///
    /// # Returns
    /// * `Ok(outcome)` - the delivery was acked or nacked per `outcome`
    /// * `Err(ExecError::Settle)` - the broker rejected the ack/nack or did
    ///   not answer within `settle_timeout`; the broker will redeliver
    pub async fn handle(&self, delivery: Delivery) -> ExecResult<DeliveryOutcome> {
        let delivery_id = delivery.message.delivery_id.clone();
        let outcome = self.evaluate(&delivery.message).await;

        let settle_timeout = self.config.settle_timeout;
        let settled = if outcome.is_ack() {
            tokio::time::timeout(settle_timeout, delivery.ack()).await
        } else {
            tokio::time::timeout(settle_timeout, delivery.nack()).await
        }
        .unwrap_or_else(|_| Err(Fault::from(AttemptTimeout(settle_timeout))));
        self.stats.record(outcome);

        match settled {
            Ok(()) => Ok(outcome),
            Err(source) => {
                error!(%delivery_id, ?outcome, error = %source, "Failed to settle delivery");
                Err(ExecError::Settle { delivery_id, source })
            },
        }
    }

    /// Run every step short of settlement.
    async fn evaluate(&self, message: &InboundMessage) -> DeliveryOutcome {
        let delivery_id = &message.delivery_id;

        let key = match message.dedup_key(&self.config.dedup_attribute) {
            Ok(key) => key,
            Err(e) => {
                warn!(%delivery_id, error = %e, "Rejecting delivery without dedup key");
                return DeliveryOutcome::Nacked(NackReason::MissingDedupKey);
            },
        };

        match self.ensure_recorded(&key, message).await {
            Ok(Recorded::AlreadyProcessed) => {
                info!(%delivery_id, dedup_key = %key, "Duplicate delivery, acknowledging");
                return DeliveryOutcome::Duplicate;
            },
            Ok(Recorded::Pending) => {},
            Err(e) => {
                error!(%delivery_id, dedup_key = %key, error = %e, "Ledger check failed");
                return DeliveryOutcome::Nacked(NackReason::LedgerUnavailable);
            },
        }

        if let Err(e) = self.process(&message.payload).await {
            let reason = match e.class() {
                ErrorClass::CircuitOpen => NackReason::CircuitOpen,
                ErrorClass::Retryable => NackReason::RetriesExhausted,
                ErrorClass::Fatal => NackReason::Fatal,
            };
            warn!(%delivery_id, dedup_key = %key, %reason, error = %e, "Processing failed, nacking");
            return DeliveryOutcome::Nacked(reason);
        }

        let ledger = &*self.ledger;
        let marked = self
            .ledger_retry
            .run("ledger.mark_processed", || ledger.mark_processed(&key))
            .await;

        if let Err(e) = marked {
            // Effect happened but is unrecorded; redelivery will reprocess
            error!(
                %delivery_id,
                dedup_key = %key,
                error = %e,
                "Processed but failed to record, nacking"
            );
            return DeliveryOutcome::Nacked(NackReason::LedgerUnavailable);
        }

        info!(%delivery_id, dedup_key = %key, "Delivery processed");
        DeliveryOutcome::Processed
    }

    /// Dedup check, then insert a PENDING record if none exists.
    async fn ensure_recorded(
        &self,
        key: &DedupKey,
        message: &InboundMessage,
    ) -> Result<Recorded, LedgerError> {
        let ledger = &*self.ledger;

        if self.ledger_retry.run("ledger.is_processed", || ledger.is_processed(key)).await? {
            return Ok(Recorded::AlreadyProcessed);
        }

        if !self.ledger_retry.run("ledger.exists", || ledger.exists(key)).await? {
            let delivery_id: &DeliveryId = &message.delivery_id;
            let payload = message.payload.as_slice();
            let stored = self
                .ledger_retry
                .run("ledger.store", || ledger.store(key, delivery_id, payload))
                .await;

            match stored {
                Ok(()) => debug!(dedup_key = %key, "Ledger record created"),
                Err(LedgerError::DuplicateKey(_)) => {
                    debug!(dedup_key = %key, "Concurrent delivery stored the record first");
                },
                Err(e) => return Err(e),
            }
        }

        Ok(Recorded::Pending)
    }

    /// Invoke the processor under retry, breaker and timeout.
    async fn process(&self, payload: &[u8]) -> Result<(), BreakerError<Fault>> {
        let breaker = &*self.breaker;
        let processor = &*self.processor;
        let timeout = self.config.processing_timeout;

        self.processing_retry
            .run("processor.run", move || async move {
                breaker
                    .execute(move || async move {
                        match tokio::time::timeout(timeout, processor.run(payload)).await {
                            Ok(result) => result,
                            Err(_) => Err(Fault::from(AttemptTimeout(timeout))),
                        }
                    })
                    .await
            })
            .await
    }
}

enum Recorded {
    AlreadyProcessed,
    Pending,
}

impl<L: ?Sized, P: ?Sized> fmt::Debug for DeliveryOrchestrator<L, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryOrchestrator")
            .field("breaker", &self.breaker)
            .field("config", &self.config)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}
