//! Value Objects for the Courier domain
//!
//! Immutable, validated identifiers carried by every delivery.
//! All value objects enforce invariants at construction time.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Domain errors for value object validation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomainError {
    /// Dedup key must be non-empty
    #[error("Invalid dedup key: {0}")]
    InvalidDedupKey(String),

    /// Delivery id must be non-empty
    #[error("Invalid delivery id: {0}")]
    InvalidDeliveryId(String),

    /// Message is missing its deduplication attribute
    #[error("Missing dedup attribute `{0}`")]
    MissingDedupAttribute(String),

    /// Unknown ledger status value
    #[error("Invalid ledger status: {0}")]
    InvalidLedgerStatus(String),

    /// Invalid state transition
    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),
}

// =============================================================================
// DedupKey
// =============================================================================

/// Business-level deduplication key (e.g. an order id)
///
/// # Invariants
/// - Must be non-empty after trimming whitespace
/// - Immutable once created
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DedupKey(String);

impl DedupKey {
    /// Create a new DedupKey with validation
    ///
    /// # Examples
    /// ```
    /// # use courier_domain::DedupKey;
    /// let key = DedupKey::new("order-1").unwrap();
    /// assert_eq!(key.as_str(), "order-1");
    /// assert!(DedupKey::new("   ").is_err());
    /// ```
    ///
    /// # Errors
    /// Returns `DomainError::InvalidDedupKey` if the value is blank
    pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(DomainError::InvalidDedupKey("Dedup key must be non-empty".to_string()));
        }
        Ok(Self(value))
    }

    /// Get the key as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for DedupKey {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<DedupKey> for String {
    fn from(key: DedupKey) -> Self {
        key.0
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// DeliveryId
// =============================================================================

/// Broker-assigned identifier of a single delivery attempt
///
/// Informational only: two deliveries of the same logical message carry
/// different delivery ids but the same [`DedupKey`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeliveryId(String);

impl DeliveryId {
    /// Create a new DeliveryId with validation
    ///
    /// # Errors
    /// Returns `DomainError::InvalidDeliveryId` if the value is empty
    pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        if value.is_empty() {
            return Err(DomainError::InvalidDeliveryId("Delivery id must be non-empty".to_string()));
        }
        Ok(Self(value))
    }

    /// Get the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for DeliveryId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<DeliveryId> for String {
    fn from(id: DeliveryId) -> Self {
        id.0
    }
}

impl fmt::Display for DeliveryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_key_rejects_blank() {
        assert!(DedupKey::new("").is_err());
        assert!(DedupKey::new(" \t").is_err());
        assert_eq!(DedupKey::new("order-1").unwrap().as_str(), "order-1");
    }

    #[test]
    fn test_delivery_id_rejects_empty() {
        assert!(matches!(DeliveryId::new(""), Err(DomainError::InvalidDeliveryId(_))));
        assert_eq!(DeliveryId::new("d1").unwrap().to_string(), "d1");
    }

    #[test]
    fn test_dedup_key_serde_validates() {
        let key: DedupKey = serde_json::from_str("\"order-7\"").unwrap();
        assert_eq!(key.as_str(), "order-7");

        let blank: Result<DedupKey, _> = serde_json::from_str("\"\"");
        assert!(blank.is_err());
    }
}
