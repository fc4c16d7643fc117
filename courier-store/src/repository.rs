//! Ledger trait definition (Port)
//!
//! The pipeline depends only on this trait. Implementations can be
//! PostgreSQL, in-memory, or a mock for testing.

use crate::error::LedgerError;
use async_trait::async_trait;
use courier_domain::{DedupKey, DeliveryId, LedgerRecord};

/// Durable record of which deduplication keys have been seen and completed.
///
/// Every call must be bounded by the caller's timeout; implementations
/// report transient backend faults as [`LedgerError::Unavailable`].
#[async_trait]
pub trait IdempotencyLedger: Send + Sync {
    /// Whether any record exists for `key`, regardless of status
    async fn exists(&self, key: &DedupKey) -> Result<bool, LedgerError>;

    /// Whether a record exists for `key` with status PROCESSED
    async fn is_processed(&self, key: &DedupKey) -> Result<bool, LedgerError>;

    /// Insert a new PENDING record.
    ///
    /// Returns [`LedgerError::DuplicateKey`] if a record already exists.
    async fn store(
        &self,
        key: &DedupKey,
        delivery_id: &DeliveryId,
        payload: &[u8],
    ) -> Result<(), LedgerError>;

    /// Flip the record for `key` to PROCESSED.
    ///
    /// Idempotent on an already processed record. Returns
    /// [`LedgerError::NotFound`] if no record exists.
    async fn mark_processed(&self, key: &DedupKey) -> Result<(), LedgerError>;

    /// Load the full record for `key`, if any
    async fn get(&self, key: &DedupKey) -> Result<Option<LedgerRecord>, LedgerError>;
}
