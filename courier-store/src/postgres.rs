//! PostgreSQL ledger implementation
//!
//! Backs the ledger with the `idempotency_ledger` table created by
//! `migrations/001_idempotency_ledger.sql`. Uniqueness of the dedup key
//! is enforced by the primary key, so concurrent `store` calls for the
//! same key have exactly one winner.

use crate::error::LedgerError;
use crate::repository::IdempotencyLedger;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier_domain::{DedupKey, DeliveryId, LedgerRecord, LedgerStatus};
use sqlx::{PgPool, Row};
use tracing::debug;

const UNIQUE_VIOLATION: &str = "23505";

/// PostgreSQL-backed idempotency ledger
#[derive(Debug, Clone)]
pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    /// Create a ledger over an existing pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Underlying connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some(UNIQUE_VIOLATION))
}

fn parse_record(row: &sqlx::postgres::PgRow) -> Result<LedgerRecord, LedgerError> {
    let dedup_key: String = row.try_get("dedup_key")?;
    let delivery_id: String = row.try_get("delivery_id")?;
    let payload: Vec<u8> = row.try_get("payload")?;
    let status: String = row.try_get("status")?;
    let created_at: DateTime<Utc> = row.try_get("created_at")?;

    Ok(LedgerRecord {
        dedup_key: DedupKey::new(dedup_key)?,
        delivery_id: DeliveryId::new(delivery_id)?,
        payload,
        status: status.parse::<LedgerStatus>()?,
        created_at,
    })
}

#[async_trait]
impl IdempotencyLedger for PgLedger {
    async fn exists(&self, key: &DedupKey) -> Result<bool, LedgerError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM idempotency_ledger WHERE dedup_key = $1)",
        )
        .bind(key.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn is_processed(&self, key: &DedupKey) -> Result<bool, LedgerError> {
        let processed: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM idempotency_ledger
                WHERE dedup_key = $1 AND status = $2
            )
            "#,
        )
        .bind(key.as_str())
        .bind(LedgerStatus::Processed.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(processed)
    }

    async fn store(
        &self,
        key: &DedupKey,
        delivery_id: &DeliveryId,
        payload: &[u8],
    ) -> Result<(), LedgerError> {
        let result = sqlx::query(
            r#"
            INSERT INTO idempotency_ledger (dedup_key, delivery_id, payload, status, created_at)
            VALUES ($1, $2, $3, $4, NOW())
            "#,
        )
        .bind(key.as_str())
        .bind(delivery_id.as_str())
        .bind(payload)
        .bind(LedgerStatus::Pending.as_str())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                debug!(dedup_key = %key, delivery_id = %delivery_id, "Ledger record stored");
                Ok(())
            },
            Err(err) if is_unique_violation(&err) => Err(LedgerError::DuplicateKey(key.clone())),
            Err(err) => Err(err.into()),
        }
    }

    async fn mark_processed(&self, key: &DedupKey) -> Result<(), LedgerError> {
        let result = sqlx::query(
            r#"
            UPDATE idempotency_ledger
            SET status = $2,
                processed_at = COALESCE(processed_at, NOW())
            WHERE dedup_key = $1
            "#,
        )
        .bind(key.as_str())
        .bind(LedgerStatus::Processed.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::NotFound(key.clone()));
        }

        debug!(dedup_key = %key, "Ledger record marked processed");
        Ok(())
    }

    async fn get(&self, key: &DedupKey) -> Result<Option<LedgerRecord>, LedgerError> {
        let row = sqlx::query(
            r#"
            SELECT dedup_key, delivery_id, payload, status, created_at
            FROM idempotency_ledger
            WHERE dedup_key = $1
            "#,
        )
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(parse_record).transpose()
    }
}
