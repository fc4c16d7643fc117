//! End-to-end tests for the delivery pipeline over in-memory adapters.
//!
//! Exercises redelivery, concurrent duplicates and circuit recovery with
//! the channel broker, the memory ledger and the stub processor.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use courier_domain::{DedupKey, Fault, LedgerStatus};
use courier_exec::stub::message;
use courier_exec::{
    BrokerSource, ChannelBroker, DeliveryOrchestrator, DeliveryOutcome, NackReason,
    OrchestratorConfig, Settlement, StubProcessor,
};
use courier_guard::{BreakerConfig, CircuitBreaker, Phase, RetryConfig};
use courier_store::{IdempotencyLedger, MemoryLedger};

type Orchestrator = DeliveryOrchestrator<MemoryLedger, StubProcessor>;

fn build(ledger: Arc<MemoryLedger>, processor: Arc<StubProcessor>) -> Arc<Orchestrator> {
    let breaker = Arc::new(CircuitBreaker::new("processor", BreakerConfig::default()));
    let config = OrchestratorConfig {
        retry: RetryConfig {
            initial_wait: Duration::from_millis(10),
            max_wait: Duration::from_millis(200),
            max_total_deadline: Duration::from_secs(5),
            attempt_timeout: None,
        },
        ..OrchestratorConfig::default()
    };
    Arc::new(DeliveryOrchestrator::new(ledger, processor, breaker, config))
}

#[tokio::test(start_paused = true)]
async fn test_order_redelivered_after_ack_is_not_reprocessed() -> Result<()> {
    let ledger = Arc::new(MemoryLedger::new());
    let processor = Arc::new(StubProcessor::new());
    let orchestrator = build(ledger.clone(), processor.clone());
    let (broker, sender) = ChannelBroker::new();

    let first = sender.send_keyed("order-1", r#"{"order_id":"order-1","amount":25}"#).unwrap();
    let second = sender.send_keyed("order-1", r#"{"order_id":"order-1","amount":25}"#).unwrap();
    drop(sender);

    let mut outcomes = Vec::new();
    while let Some(delivery) = broker.receive().await? {
        outcomes.push(orchestrator.handle(delivery).await?);
    }

    assert_eq!(outcomes, vec![DeliveryOutcome::Processed, DeliveryOutcome::Duplicate]);
    assert_eq!(processor.calls(), 1);

    let settlements = broker.settlements();
    assert_eq!(settlements.settlement(&first), Some(Settlement::Acked));
    assert_eq!(settlements.settlement(&second), Some(Settlement::Acked));

    let record = ledger.get(&DedupKey::new("order-1")?).await?.unwrap();
    assert_eq!(record.status, LedgerStatus::Processed);
    assert_eq!(record.delivery_id, first);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_duplicates_store_exactly_one_record() -> Result<()> {
    let ledger = Arc::new(MemoryLedger::new());
    let processor = Arc::new(StubProcessor::new());
    let orchestrator = build(ledger.clone(), processor.clone());
    let (broker, sender) = ChannelBroker::new();

    for _ in 0..8 {
        sender.send_keyed("order-race", "x").unwrap();
    }
    drop(sender);

    let mut tasks = tokio::task::JoinSet::new();
    while let Some(delivery) = broker.receive().await? {
        let orchestrator = orchestrator.clone();
        tasks.spawn(async move { orchestrator.handle(delivery).await });
    }

    let mut outcomes = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        outcomes.push(joined??);
    }

    // Every copy is acked; the processor may run more than once because two
    // copies can both pass the dedup check before either marks the key.
    assert_eq!(outcomes.len(), 8);
    assert!(outcomes.iter().all(DeliveryOutcome::is_ack));
    assert!(processor.calls() >= 1);
    assert_eq!(ledger.len(), 1);
    assert!(ledger.is_processed(&DedupKey::new("order-race")?).await?);
    assert_eq!(broker.settlements().acked(), 8);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_circuit_recovers_after_outage() -> Result<()> {
    let ledger = Arc::new(MemoryLedger::new());
    let processor = Arc::new(StubProcessor::new());
    let orchestrator = build(ledger.clone(), processor.clone());
    let log = courier_exec::SettlementLog::new();

    processor.fail_always(Fault::Unavailable("downstream 503".into()));
    let outcome = orchestrator
        .handle(log.delivery(message(&[("order_id", "order-a")], "a")))
        .await?;
    assert_eq!(outcome, DeliveryOutcome::Nacked(NackReason::CircuitOpen));
    assert_eq!(orchestrator.breaker().phase(), Phase::Open);

    // Still inside the recovery window: rejected without calling the processor
    let calls_while_open = processor.calls();
    let outcome = orchestrator
        .handle(log.delivery(message(&[("order_id", "order-b")], "b")))
        .await?;
    assert_eq!(outcome, DeliveryOutcome::Nacked(NackReason::CircuitOpen));
    assert_eq!(processor.calls(), calls_while_open);

    processor.recover();
    tokio::time::advance(Duration::from_secs(11)).await;

    // Three successful trials close the circuit again
    for key in ["order-a", "order-b", "order-c"] {
        let outcome = orchestrator.handle(log.delivery(message(&[("order_id", key)], key))).await?;
        assert_eq!(outcome, DeliveryOutcome::Processed);
    }
    assert_eq!(orchestrator.breaker().phase(), Phase::Closed);
    assert_eq!(orchestrator.stats().processed, 3);
    assert_eq!(orchestrator.stats().nacked, 2);
    Ok(())
}
