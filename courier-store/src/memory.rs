//! In-memory ledger implementation
//!
//! Used for testing and development without a database.
//! Thread-safe using RwLock for concurrent access; the lock is never held
//! across an await point.

use crate::error::LedgerError;
use crate::repository::IdempotencyLedger;
use async_trait::async_trait;
use courier_domain::{DedupKey, DeliveryId, LedgerRecord};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tracing::debug;

/// In-memory idempotency ledger
///
/// Supports failure injection ([`set_unavailable`](Self::set_unavailable))
/// and artificial latency ([`set_latency`](Self::set_latency)) so callers
/// can exercise their retry and timeout paths.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    records: RwLock<HashMap<DedupKey, LedgerRecord>>,
    unavailable: AtomicBool,
    latency_ms: AtomicU64,
}

impl MemoryLedger {
    /// Create a new empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with [`LedgerError::Unavailable`]
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Delay every subsequent call by `latency`
    pub fn set_latency(&self, latency: Duration) {
        let ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.latency_ms.store(ms, Ordering::SeqCst);
    }

    /// Number of records (any status)
    pub fn len(&self) -> usize {
        self.read().map(|records| records.len()).unwrap_or(0)
    }

    /// Whether the ledger holds no records
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clear all records (useful for test setup)
    pub fn clear(&self) {
        if let Ok(mut records) = self.write() {
            records.clear();
        }
    }

    async fn gate(&self) -> Result<(), LedgerError> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("memory ledger marked unavailable".to_string()));
        }
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<DedupKey, LedgerRecord>>, LedgerError> {
        self.records
            .read()
            .map_err(|_| LedgerError::Unavailable("ledger lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<DedupKey, LedgerRecord>>, LedgerError> {
        self.records
            .write()
            .map_err(|_| LedgerError::Unavailable("ledger lock poisoned".to_string()))
    }
}

#[async_trait]
impl IdempotencyLedger for MemoryLedger {
    async fn exists(&self, key: &DedupKey) -> Result<bool, LedgerError> {
        self.gate().await?;
        Ok(self.read()?.contains_key(key))
    }

    async fn is_processed(&self, key: &DedupKey) -> Result<bool, LedgerError> {
        self.gate().await?;
        Ok(self.read()?.get(key).is_some_and(LedgerRecord::is_processed))
    }

    async fn store(
        &self,
        key: &DedupKey,
        delivery_id: &DeliveryId,
        payload: &[u8],
    ) -> Result<(), LedgerError> {
        self.gate().await?;

        let mut records = self.write()?;
        if records.contains_key(key) {
            return Err(LedgerError::DuplicateKey(key.clone()));
        }

        records.insert(
            key.clone(),
            LedgerRecord::pending(key.clone(), delivery_id.clone(), payload.to_vec()),
        );
        debug!(dedup_key = %key, delivery_id = %delivery_id, "Ledger record stored");
        Ok(())
    }

    async fn mark_processed(&self, key: &DedupKey) -> Result<(), LedgerError> {
        self.gate().await?;

        let mut records = self.write()?;
        let record = records.get_mut(key).ok_or_else(|| LedgerError::NotFound(key.clone()))?;
        record.mark_processed();
        debug!(dedup_key = %key, "Ledger record marked processed");
        Ok(())
    }

    async fn get(&self, key: &DedupKey) -> Result<Option<LedgerRecord>, LedgerError> {
        self.gate().await?;
        Ok(self.read()?.get(key).cloned())
    }
}
