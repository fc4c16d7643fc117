//! Courier Domain Layer
//!
//! Pure domain types with zero I/O dependencies.
//! Contains the inbound message model, ledger records, and the error
//! classification contract shared by the pipeline.

#![warn(missing_docs)]
#![warn(clippy::all)]

// Public modules
pub mod entities;
pub mod fault;
pub mod value_objects;

// Re-export commonly used types
pub use entities::{InboundMessage, LedgerRecord, LedgerStatus, DEFAULT_DEDUP_ATTRIBUTE};
pub use fault::{Classify, ErrorClass, Fault};
pub use value_objects::{DedupKey, DeliveryId, DomainError};
