//! Database CLI subcommands for courierd.
//!
//! Provides `db migrate`, `db status`, and `db ledger` commands.

use anyhow::{anyhow, Result};
use tracing::info;

use courier_db::{ledger_summary, migrate, status};

/// Run database CLI subcommands.
///
/// Supported commands:
/// - `courierd db migrate` - Run pending migrations
/// - `courierd db status` - Check connectivity and migration status
/// - `courierd db ledger` - Count ledger records by status
pub async fn run_db_command(args: &[String], database_url: Option<&str>) -> Result<()> {
    let command = args
        .get(2)
        .ok_or_else(|| anyhow!("Usage: courierd db <migrate|status|ledger>"))?;

    let database_url = database_url
        .ok_or_else(|| anyhow!("DATABASE_URL environment variable is required for db commands"))?;

    let pool = sqlx::PgPool::connect(database_url).await?;

    match command.as_str() {
        "migrate" => {
            migrate(&pool).await?;
        },
        "status" => {
            let applied = status(&pool).await?;
            info!(applied = applied.len(), "Migration status checked");
        },
        "ledger" => {
            ledger_summary(&pool).await?;
        },
        other => {
            return Err(anyhow!("Unknown db command: {}. Use migrate, status, or ledger", other));
        },
    }

    Ok(())
}
