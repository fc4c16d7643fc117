//! Restart test for the daemon over the PostgreSQL ledger.
//!
//! A record left PENDING by a crashed run is reprocessed on restart, and a
//! PROCESSED record is acknowledged without reprocessing.
//!
//! Run with: `cargo test -p courierd --features postgres -- --ignored`

#![cfg(feature = "postgres")]

use std::sync::Arc;

use courier_domain::{DedupKey, DeliveryId, LedgerStatus};
use courier_exec::{ChannelBroker, StubProcessor};
use courier_store::{IdempotencyLedger, PgLedger};
use courierd::{Config, Daemon};

#[sqlx::test(migrations = "../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_restart_resumes_from_ledger(pool: sqlx::PgPool) {
    let ledger = Arc::new(PgLedger::new(pool));

    // State left by a previous run
    let pending = DedupKey::new("order-pending").unwrap();
    let done = DedupKey::new("order-done").unwrap();
    let old_delivery = DeliveryId::new("d-old").unwrap();
    ledger.store(&pending, &old_delivery, b"p").await.unwrap();
    ledger.store(&done, &old_delivery, b"d").await.unwrap();
    ledger.mark_processed(&done).await.unwrap();

    let (broker, sender) = ChannelBroker::new();
    let processor = Arc::new(StubProcessor::new());
    let daemon = Daemon::new(Config::test(), Arc::new(broker), ledger.clone(), processor.clone());
    sender.send_keyed("order-pending", "p").unwrap();
    sender.send_keyed("order-done", "d").unwrap();
    drop(sender);

    let stats = daemon.run().await.unwrap();

    assert_eq!(stats.processed, 1);
    assert_eq!(stats.duplicates, 1);
    assert_eq!(processor.processed(), vec![b"p".to_vec()]);
    assert_eq!(ledger.get(&pending).await.unwrap().unwrap().status, LedgerStatus::Processed);
}
