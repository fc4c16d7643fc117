//! Execution layer error types.

use courier_domain::{DeliveryId, Fault};
use thiserror::Error;

/// Errors that can occur during execution operations.
#[derive(Debug, Error)]
pub enum ExecError {
    /// Broker rejected an ack or nack
    #[error("Failed to settle delivery {delivery_id}: {source}")]
    Settle {
        /// Delivery that could not be settled
        delivery_id: DeliveryId,
        /// Broker fault
        #[source]
        source: Fault,
    },

    /// Message could not be serialized for publishing
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Publish failed after retries, or with a permanent fault
    #[error("Publish to `{topic}` failed: {source}")]
    Publish {
        /// Destination topic
        topic: String,
        /// Last fault observed
        #[source]
        source: Fault,
    },
}

/// Result type for execution operations.
pub type ExecResult<T> = Result<T, ExecError>;
