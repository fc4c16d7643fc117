//! Courier Execution Layer
//!
//! Exactly-once-effect delivery over an at-least-once broker.
//!
//! # Architecture
//!
//! ```text
//! BrokerSource → DeliveryOrchestrator → Ledger check → Processor → Ledger update → ack/nack
//! ```
//!
//! # Components
//!
//! - **Ports**: Traits for the broker, the processor and publishing
//! - **Orchestrator**: Dedup, guarded processing and settlement of one delivery
//! - **Publisher**: Serialization plus classified retry for outbound messages
//! - **Stub**: Test implementations for development
//!
//! # Example
//!
//! ```rust,ignore
//! use courier_exec::{DeliveryOrchestrator, OrchestratorConfig, StubProcessor};
//! use courier_guard::{BreakerConfig, CircuitBreaker};
//! use courier_store::MemoryLedger;
//! use std::sync::Arc;
//!
//! let orchestrator = DeliveryOrchestrator::new(
//!     Arc::new(MemoryLedger::new()),
//!     Arc::new(StubProcessor::new()),
//!     Arc::new(CircuitBreaker::new("processor", BreakerConfig::default())),
//!     OrchestratorConfig::default(),
//! );
//!
//! let outcome = orchestrator.handle(delivery).await?;
//! ```

#![warn(clippy::all)]

pub mod error;
pub mod orchestrator;
pub mod ports;
pub mod publisher;
pub mod stub;

// Re-exports for convenience
pub use error::{ExecError, ExecResult};
pub use orchestrator::{
    DeliveryOrchestrator, DeliveryOutcome, DeliveryStats, NackReason, OrchestratorConfig,
    StatsSnapshot,
};
pub use ports::{AckHandle, BrokerSource, Delivery, Processor, PublishPort};
pub use publisher::Publisher;
pub use stub::{
    BrokerSender, ChannelBroker, PublishedMessage, Settlement, SettlementLog, StubProcessor,
    StubPublishPort,
};
