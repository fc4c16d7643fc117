//! Domain Entities for Courier
//!
//! The inbound message as seen by the core, and the ledger record that
//! tracks whether its effect has been applied.

use crate::value_objects::{DedupKey, DeliveryId, DomainError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Attribute carrying the dedup key unless configured otherwise.
pub const DEFAULT_DEDUP_ATTRIBUTE: &str = "order_id";

// =============================================================================
// Inbound Message
// =============================================================================

/// A message delivered by the broker.
///
/// Read-only to the core. The ack/nack handles are owned by the broker
/// adapter and travel alongside the message, not inside it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Broker-assigned delivery identifier
    pub delivery_id: DeliveryId,
    /// String key-value attributes (dedup key lives here)
    pub attributes: HashMap<String, String>,
    /// Opaque payload
    pub payload: Vec<u8>,
}

impl InboundMessage {
    /// Create a new inbound message.
    pub fn new(
        delivery_id: DeliveryId,
        attributes: HashMap<String, String>,
        payload: Vec<u8>,
    ) -> Self {
        Self { delivery_id, attributes, payload }
    }

    /// Look up an attribute by name.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Extract the dedup key from the named attribute.
    ///
    /// # Errors
    /// - `DomainError::MissingDedupAttribute` if the attribute is absent
    /// - `DomainError::InvalidDedupKey` if it is present but blank
    pub fn dedup_key(&self, attribute: &str) -> Result<DedupKey, DomainError> {
        let raw = self
            .attribute(attribute)
            .ok_or_else(|| DomainError::MissingDedupAttribute(attribute.to_string()))?;
        DedupKey::new(raw)
    }
}

// =============================================================================
// Ledger Record
// =============================================================================

/// Processing status of a ledger record.
///
/// Transitions only `Pending → Processed`, never reversed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerStatus {
    /// Stored, effect not yet confirmed
    Pending,
    /// Processing call returned successfully
    Processed,
}

impl LedgerStatus {
    /// Stable storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerStatus::Pending => "PENDING",
            LedgerStatus::Processed => "PROCESSED",
        }
    }

    /// Check whether moving to `next` is allowed.
    pub fn can_transition_to(&self, next: LedgerStatus) -> bool {
        matches!(
            (self, next),
            (LedgerStatus::Pending, LedgerStatus::Processed)
                | (LedgerStatus::Processed, LedgerStatus::Processed)
        )
    }
}

impl fmt::Display for LedgerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LedgerStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(LedgerStatus::Pending),
            "PROCESSED" => Ok(LedgerStatus::Processed),
            other => Err(DomainError::InvalidLedgerStatus(other.to_string())),
        }
    }
}

/// One record per dedup key in the idempotency ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRecord {
    /// Primary key, immutable
    pub dedup_key: DedupKey,
    /// Delivery that first stored the record (informational)
    pub delivery_id: DeliveryId,
    /// Payload snapshot for audit/replay
    pub payload: Vec<u8>,
    /// Current status
    pub status: LedgerStatus,
    /// Insertion time, never updated
    pub created_at: DateTime<Utc>,
}

impl LedgerRecord {
    /// Create a new pending record stamped with the current time.
    pub fn pending(dedup_key: DedupKey, delivery_id: DeliveryId, payload: Vec<u8>) -> Self {
        Self {
            dedup_key,
            delivery_id,
            payload,
            status: LedgerStatus::Pending,
            created_at: Utc::now(),
        }
    }

    /// Check if the effect has been applied.
    pub fn is_processed(&self) -> bool {
        matches!(self.status, LedgerStatus::Processed)
    }

    /// Mark the record processed. Idempotent.
    pub fn mark_processed(&mut self) {
        self.status = LedgerStatus::Processed;
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn message_with(attrs: &[(&str, &str)]) -> InboundMessage {
        InboundMessage::new(
            DeliveryId::new("d1").unwrap(),
            attrs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            b"{}".to_vec(),
        )
    }

    #[test]
    fn test_dedup_key_extraction() {
        let msg = message_with(&[(DEFAULT_DEDUP_ATTRIBUTE, "order-1")]);
        assert_eq!(msg.dedup_key(DEFAULT_DEDUP_ATTRIBUTE).unwrap().as_str(), "order-1");
    }

    #[test]
    fn test_dedup_key_missing_attribute() {
        let msg = message_with(&[("other", "x")]);
        assert_eq!(
            msg.dedup_key(DEFAULT_DEDUP_ATTRIBUTE),
            Err(DomainError::MissingDedupAttribute("order_id".to_string()))
        );
    }

    #[test]
    fn test_dedup_key_blank_attribute() {
        let msg = message_with(&[(DEFAULT_DEDUP_ATTRIBUTE, "")]);
        assert!(matches!(
            msg.dedup_key(DEFAULT_DEDUP_ATTRIBUTE),
            Err(DomainError::InvalidDedupKey(_))
        ));
    }

    #[test]
    fn test_status_transitions_are_forward_only() {
        assert!(LedgerStatus::Pending.can_transition_to(LedgerStatus::Processed));
        assert!(LedgerStatus::Processed.can_transition_to(LedgerStatus::Processed));
        assert!(!LedgerStatus::Processed.can_transition_to(LedgerStatus::Pending));
    }

    #[test]
    fn test_status_round_trips_through_storage_form() {
        for status in [LedgerStatus::Pending, LedgerStatus::Processed] {
            assert_eq!(status.as_str().parse::<LedgerStatus>().unwrap(), status);
        }
        assert!("DONE".parse::<LedgerStatus>().is_err());
    }

    #[test]
    fn test_record_mark_processed_is_idempotent() {
        let mut record = LedgerRecord::pending(
            DedupKey::new("order-1").unwrap(),
            DeliveryId::new("d1").unwrap(),
            vec![1, 2, 3],
        );
        assert!(!record.is_processed());

        record.mark_processed();
        record.mark_processed();
        assert!(record.is_processed());
    }
}
