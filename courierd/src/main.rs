//! Courier Daemon
//!
//! Runtime host for the resilient delivery pipeline.
//!
//! # Usage
//!
//! ```bash
//! # Start with default configuration
//! cargo run -p courierd
//!
//! # Start with custom environment
//! COURIER_ENV=test COURIER_MAX_IN_FLIGHT=4 cargo run -p courierd
//!
//! # Database subcommands (feature `postgres`)
//! cargo run -p courierd --features postgres -- db migrate
//! ```
//!
//! # Environment Variables
//!
//! - `COURIER_ENV`: Environment (test, development, production)
//! - `COURIER_TOPIC` / `COURIER_SUBSCRIPTION`: Routing (default: orders / orders-sub)
//! - `COURIER_DEDUP_ATTRIBUTE`: Dedup attribute (default: order_id)
//! - `COURIER_MAX_IN_FLIGHT`: Concurrent deliveries (default: 2)
//! - `COURIER_BREAKER_*`: Breaker thresholds and recovery timeout
//! - `COURIER_RETRY_*`: Backoff base, cap and deadline
//! - `COURIER_LOG_FORMAT`: pretty or json (default: pretty)
//! - `DATABASE_URL`: PostgreSQL ledger (required with `postgres`)

use std::sync::Arc;

use courier_exec::{BrokerSource, ChannelBroker, Processor, StatsSnapshot, StubProcessor};
use courier_store::IdempotencyLedger;
use courierd::{telemetry, Config, Daemon};
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    telemetry::init(config.log_format)?;

    let args: Vec<String> = std::env::args().collect();
    if args.get(1).map(String::as_str) == Some("db") {
        #[cfg(feature = "postgres")]
        return courierd::db::run_db_command(&args, config.database_url.as_deref()).await;

        #[cfg(not(feature = "postgres"))]
        anyhow::bail!("courierd was built without the `postgres` feature");
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %config.environment,
        topic = %config.broker.topic,
        subscription = %config.broker.subscription,
        "Courier Daemon"
    );

    // The in-process broker stands in for a real subscription client;
    // keep its sender alive so the daemon runs until interrupted.
    let (broker, _sender) = ChannelBroker::new();
    let processor = Arc::new(StubProcessor::new());

    #[cfg(feature = "postgres")]
    let stats = {
        let database_url = config
            .database_url
            .clone()
            .ok_or_else(|| anyhow::anyhow!("DATABASE_URL is required when built with postgres"))?;
        let pool = sqlx::PgPool::connect(&database_url).await?;
        courier_db::migrate(&pool).await?;

        let ledger = Arc::new(courier_store::PgLedger::new(pool));
        run_until_signal(Daemon::new(config, Arc::new(broker), ledger, processor)).await?
    };

    #[cfg(not(feature = "postgres"))]
    let stats = {
        let ledger = Arc::new(courier_store::MemoryLedger::new());
        run_until_signal(Daemon::new(config, Arc::new(broker), ledger, processor)).await?
    };

    info!(
        processed = stats.processed,
        duplicates = stats.duplicates,
        nacked = stats.nacked,
        "Courier Daemon stopped"
    );
    Ok(())
}

/// Run `daemon`, cancelling it on SIGINT.
async fn run_until_signal<B, L, P>(daemon: Daemon<B, L, P>) -> anyhow::Result<StatsSnapshot>
where
    B: BrokerSource + ?Sized + 'static,
    L: IdempotencyLedger + ?Sized + 'static,
    P: Processor + ?Sized + 'static,
{
    let token = daemon.shutdown_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received shutdown signal");
                token.cancel();
            },
            Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
        }
    });

    Ok(daemon.run().await?)
}
