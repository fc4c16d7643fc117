//! Daemon: Main runtime loop.
//!
//! The Daemon ties together all components:
//! - Broker source (deliveries in)
//! - Delivery orchestrator (ledger, breaker, retry, processor)
//! - Shutdown token (graceful stop)
//!
//! # Lifecycle
//!
//! 1. Acquire an in-flight permit
//! 2. Receive the next delivery (retried with the listen preset)
//! 3. Spawn its orchestration; the permit is released when it settles
//! 4. On cancellation: stop receiving, cut backoff waits short, drain
//!    in-flight tasks, log a summary

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use courier_exec::{
    BrokerSender, BrokerSource, ChannelBroker, DeliveryOrchestrator, DeliveryOutcome, ExecResult,
    Processor, StatsSnapshot, StubProcessor,
};
use courier_guard::{CircuitBreaker, RetryConfig, RetryPolicy};
use courier_store::{IdempotencyLedger, MemoryLedger};

use crate::config::Config;
use crate::error::{DaemonError, DaemonResult};

// =============================================================================
// Daemon
// =============================================================================

/// The main Courier daemon.
pub struct Daemon<B: ?Sized, L: ?Sized, P: ?Sized> {
    /// Configuration
    config: Config,
    /// Where deliveries come from
    source: Arc<B>,
    /// Per-delivery pipeline, shared by all in-flight tasks
    orchestrator: Arc<DeliveryOrchestrator<L, P>>,
    /// Retry around `receive`
    listen_retry: RetryPolicy,
    /// Cancelled to request shutdown
    shutdown: CancellationToken,
}

impl Daemon<ChannelBroker, MemoryLedger, StubProcessor> {
    /// Create a new daemon with stub components (for testing/development).
    ///
    /// Returns the sender feeding the in-process broker. The daemon stops on
    /// its own once every sender is dropped and the queue is drained.
    pub fn new_stub(config: Config) -> (Self, BrokerSender) {
        let (broker, sender) = ChannelBroker::new();
        let daemon = Self::new(
            config,
            Arc::new(broker),
            Arc::new(MemoryLedger::new()),
            Arc::new(StubProcessor::new()),
        );
        (daemon, sender)
    }
}

impl<B, L, P> Daemon<B, L, P>
where
    B: BrokerSource + ?Sized + 'static,
    L: IdempotencyLedger + ?Sized + 'static,
    P: Processor + ?Sized + 'static,
{
    /// Create a new daemon with provided components.
    pub fn new(config: Config, source: Arc<B>, ledger: Arc<L>, processor: Arc<P>) -> Self {
        let shutdown = CancellationToken::new();
        let breaker = Arc::new(CircuitBreaker::new("processor", config.breaker.clone()));
        let orchestrator = Arc::new(
            DeliveryOrchestrator::new(ledger, processor, breaker, config.orchestrator())
                .with_cancellation(shutdown.clone()),
        );
        let listen_retry = RetryPolicy::new(RetryConfig::listen()).with_cancellation(shutdown.clone());

        Self { config, source, orchestrator, listen_retry, shutdown }
    }

    /// Token that stops the daemon when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Broker source.
    pub fn source(&self) -> &Arc<B> {
        &self.source
    }

    /// Delivery orchestrator.
    pub fn orchestrator(&self) -> &Arc<DeliveryOrchestrator<L, P>> {
        &self.orchestrator
    }

    /// Run the daemon.
    ///
    /// Returns when shutdown is requested, the source closes, or receiving
    /// fails permanently. In-flight deliveries are always drained first.
    pub async fn run(self) -> DaemonResult<StatsSnapshot> {
        info!(
            version = env!("CARGO_PKG_VERSION"),
            environment = %self.config.environment,
            subscription = %self.config.broker.subscription,
            max_in_flight = self.config.pipeline.max_in_flight,
            "Starting Courier daemon"
        );

        let permits = Arc::new(Semaphore::new(self.config.pipeline.max_in_flight));
        let mut tasks: JoinSet<ExecResult<DeliveryOutcome>> = JoinSet::new();
        let source = &*self.source;

        let result = loop {
            while let Some(joined) = tasks.try_join_next() {
                Self::log_settled(joined);
            }

            let permit = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break Ok(()),
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break Ok(()),
                },
            };

            let received = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break Ok(()),
                received = self.listen_retry.run("broker.receive", || source.receive()) => received,
            };

            match received {
                Ok(Some(delivery)) => {
                    debug!(delivery_id = %delivery.message.delivery_id, "Delivery received");
                    let orchestrator = Arc::clone(&self.orchestrator);
                    tasks.spawn(async move {
                        let _permit = permit;
                        orchestrator.handle(delivery).await
                    });
                },
                Ok(None) => {
                    info!("Broker source closed");
                    break Ok(());
                },
                Err(fault) if self.shutdown.is_cancelled() => {
                    debug!(error = %fault, "Receive interrupted by shutdown");
                    break Ok(());
                },
                Err(fault) => {
                    error!(error = %fault, "Receiving failed, stopping daemon");
                    break Err(DaemonError::Broker(fault));
                },
            }
        };

        self.drain(tasks).await;
        result.map(|()| self.orchestrator.stats())
    }

    /// Wait for in-flight deliveries to settle, then log the summary.
    async fn drain(&self, mut tasks: JoinSet<ExecResult<DeliveryOutcome>>) {
        if !tasks.is_empty() {
            info!(in_flight = tasks.len(), "Waiting for in-flight deliveries to settle");
        }
        while let Some(joined) = tasks.join_next().await {
            Self::log_settled(joined);
        }

        let stats = self.orchestrator.stats();
        let breaker = self.orchestrator.breaker().state();
        info!(
            processed = stats.processed,
            duplicates = stats.duplicates,
            nacked = stats.nacked,
            breaker_phase = %breaker.phase,
            "Shutdown complete"
        );
    }

    fn log_settled(joined: Result<ExecResult<DeliveryOutcome>, JoinError>) {
        match joined {
            Ok(Ok(outcome)) => debug!(?outcome, "Delivery settled"),
            Ok(Err(e)) => warn!(error = %e, "Delivery left unsettled"),
            Err(e) => error!(error = %e, "Delivery task panicked or was aborted"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
