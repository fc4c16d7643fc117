//! Courier Daemon Library
//!
//! Runtime host for the delivery pipeline.
//!
//! # Architecture
//!
//! ```text
//! BrokerSource → Daemon (bounded dispatch) → DeliveryOrchestrator → ack/nack
//!                    ↑
//!              Shutdown token (SIGINT)
//! ```
//!
//! # Components
//!
//! - **Daemon**: Receive loop, in-flight bound, graceful drain
//! - **Config**: Environment-based configuration
//! - **Telemetry**: Tracing subscriber setup
//! - **Db**: Database subcommands (feature `postgres`)
//!
//! # Example
//!
//! ```rust,ignore
//! use courierd::{Config, Daemon};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::from_env().expect("Failed to load config");
//!     let (daemon, _sender) = Daemon::new_stub(config);
//!     daemon.run().await.expect("Daemon error");
//! }
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod daemon;
pub mod error;
pub mod telemetry;

#[cfg(feature = "postgres")]
pub mod db;

// Re-exports for convenience
pub use config::{BrokerConfig, Config, Environment, LogFormat, PipelineConfig};
pub use daemon::Daemon;
pub use error::{DaemonError, DaemonResult};
