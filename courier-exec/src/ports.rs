//! Execution layer port definitions.
//!
//! Ports define the interfaces for external services (broker, processor).
//! Adapters implement these ports for specific services (Pub/Sub, stub, etc.).

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;

use courier_domain::{Fault, InboundMessage};

// =============================================================================
// Processor Port
// =============================================================================

/// Port for the downstream business handler.
///
/// Must be safe to invoke more than once with the same payload; the
/// pipeline guarantees exactly-once *effect*, not exactly-once invocation.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Process a message payload.
    ///
    /// Transient faults must be reported with a retryable [`Fault`] variant
    /// so the pipeline can retry them.
    async fn run(&self, payload: &[u8]) -> Result<(), Fault>;
}

// =============================================================================
// Broker Ports
// =============================================================================

/// Settlement handle for one delivery.
///
/// Exactly one of `ack` / `nack` is called, at most once.
#[async_trait]
pub trait AckHandle: Send {
    /// Positively acknowledge; the broker stops redelivering.
    async fn ack(self: Box<Self>) -> Result<(), Fault>;

    /// Negatively acknowledge; the broker redelivers or dead-letters.
    async fn nack(self: Box<Self>) -> Result<(), Fault>;
}

/// A received message paired with its settlement handle.
pub struct Delivery {
    /// The message itself
    pub message: InboundMessage,
    handle: Box<dyn AckHandle>,
}

impl Delivery {
    /// Pair a message with its handle.
    pub fn new(message: InboundMessage, handle: Box<dyn AckHandle>) -> Self {
        Self { message, handle }
    }

    /// Acknowledge this delivery, consuming it.
    pub async fn ack(self) -> Result<(), Fault> {
        self.handle.ack().await
    }

    /// Negatively acknowledge this delivery, consuming it.
    pub async fn nack(self) -> Result<(), Fault> {
        self.handle.nack().await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery").field("message", &self.message).finish_non_exhaustive()
    }
}

/// Port for pulling deliveries from a subscription.
#[async_trait]
pub trait BrokerSource: Send + Sync {
    /// Wait for the next delivery.
    ///
    /// Returns `Ok(None)` once the source is closed and drained.
    async fn receive(&self) -> Result<Option<Delivery>, Fault>;
}

/// Port for publishing to a topic.
#[async_trait]
pub trait PublishPort: Send + Sync {
    /// Publish `payload` with `attributes`, returning the broker message id.
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        attributes: HashMap<String, String>,
    ) -> Result<String, Fault>;
}
