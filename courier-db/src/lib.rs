//! Database lifecycle management for Courier.
//!
//! Provides migration running, status checking and a ledger summary.

use sqlx::{PgPool, Row};
use tracing::{info, warn};

/// Result type for DB operations.
pub type Result<T> = std::result::Result<T, anyhow::Error>;

/// One applied migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMigration {
    /// Migration version (file prefix)
    pub version: i64,
    /// Migration description (file name after the prefix)
    pub description: String,
    /// Whether the migration completed
    pub success: bool,
}

/// Row counts of the idempotency ledger by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerSummary {
    /// Records still PENDING (stored, never marked processed)
    pub pending: i64,
    /// Records PROCESSED
    pub processed: i64,
}

/// Run all pending migrations.
///
/// Uses sqlx migrations from the workspace `migrations` directory.
/// Idempotent: safe to run multiple times.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    info!("Running database migrations...");

    sqlx::migrate!("../migrations").run(pool).await?;

    info!("Migrations completed successfully");
    Ok(())
}

/// Check database connectivity and migration status.
///
/// Logs and returns the latest applied migrations (newest first). An empty
/// list means no migration has been run yet.
pub async fn status(pool: &PgPool) -> Result<Vec<AppliedMigration>> {
    let result: i32 = sqlx::query_scalar("SELECT 1").fetch_one(pool).await?;

    if result != 1 {
        return Err(anyhow::anyhow!("Database connectivity check failed"));
    }

    info!("Database connectivity: OK");

    // Runtime query: the migrations table may not exist yet
    let rows = sqlx::query(
        r#"
        SELECT version, description, success
        FROM _sqlx_migrations
        ORDER BY version DESC
        LIMIT 10
        "#,
    )
    .fetch_all(pool)
    .await;

    let rows = match rows {
        Ok(rows) => rows,
        Err(e) if e.to_string().contains("_sqlx_migrations") => {
            warn!("Migration table not found (run migrations first)");
            return Ok(Vec::new());
        },
        Err(e) => return Err(e.into()),
    };

    let mut applied = Vec::with_capacity(rows.len());
    for row in rows {
        let migration = AppliedMigration {
            version: row.try_get("version")?,
            description: row.try_get("description")?,
            success: row.try_get("success")?,
        };
        info!(
            version = migration.version,
            description = %migration.description,
            success = migration.success,
            "Applied migration"
        );
        applied.push(migration);
    }

    if applied.is_empty() {
        warn!("No migrations found in database (run migrations first)");
    }

    Ok(applied)
}

/// Count ledger records by status.
pub async fn ledger_summary(pool: &PgPool) -> Result<LedgerSummary> {
    let row = sqlx::query(
        r#"
        SELECT
            COUNT(*) FILTER (WHERE status = 'PENDING')   AS pending,
            COUNT(*) FILTER (WHERE status = 'PROCESSED') AS processed
        FROM idempotency_ledger
        "#,
    )
    .fetch_one(pool)
    .await?;

    let summary = LedgerSummary {
        pending: row.try_get("pending")?,
        processed: row.try_get("processed")?,
    };

    info!(pending = summary.pending, processed = summary.processed, "Ledger summary");
    Ok(summary)
}
