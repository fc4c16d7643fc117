//! Courier Storage Layer
//!
//! Persistence for the idempotency ledger.
//!
//! # Architecture
//!
//! - **Ledger trait**: [`IdempotencyLedger`] defines the storage interface (port)
//! - **In-memory ledger**: fast implementation for tests and development
//! - **PostgreSQL ledger**: production implementation (feature `postgres`)
//!
//! # Usage
//!
//! ```rust
//! use courier_domain::{DedupKey, DeliveryId};
//! use courier_store::{IdempotencyLedger, MemoryLedger};
//!
//! #[tokio::main]
//! async fn main() {
//!     let ledger = MemoryLedger::new();
//!     let key = DedupKey::new("order-42").unwrap();
//!     let delivery = DeliveryId::new("d-1").unwrap();
//!
//!     ledger.store(&key, &delivery, b"{}").await.unwrap();
//!     assert!(!ledger.is_processed(&key).await.unwrap());
//!
//!     ledger.mark_processed(&key).await.unwrap();
//!     assert!(ledger.is_processed(&key).await.unwrap());
//! }
//! ```

#![warn(clippy::all)]

// Modules
mod error;
mod memory;
#[cfg(feature = "postgres")]
mod postgres;
mod repository;

// Re-exports
pub use error::LedgerError;
pub use memory::MemoryLedger;
#[cfg(feature = "postgres")]
pub use postgres::PgLedger;
pub use repository::IdempotencyLedger;
