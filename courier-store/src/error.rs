//! Ledger errors

use courier_domain::{Classify, DedupKey, DomainError, ErrorClass};
use courier_guard::AttemptTimeout;
use thiserror::Error;

/// Errors raised by an [`IdempotencyLedger`](crate::IdempotencyLedger)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// A record already exists for this key
    #[error("Duplicate ledger record for key {0}")]
    DuplicateKey(DedupKey),

    /// No record exists for this key
    #[error("Ledger record not found for key {0}")]
    NotFound(DedupKey),

    /// Backing store unreachable, timed out, or otherwise transiently failing
    #[error("Ledger unavailable: {0}")]
    Unavailable(String),

    /// Stored data failed domain validation
    #[error("Corrupt ledger record: {0}")]
    Corrupt(String),

    /// Domain error passthrough
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),
}

impl Classify for LedgerError {
    fn class(&self) -> ErrorClass {
        match self {
            LedgerError::Unavailable(_) => ErrorClass::Retryable,
            LedgerError::DuplicateKey(_)
            | LedgerError::NotFound(_)
            | LedgerError::Corrupt(_)
            | LedgerError::Domain(_) => ErrorClass::Fatal,
        }
    }
}

impl From<AttemptTimeout> for LedgerError {
    fn from(timeout: AttemptTimeout) -> Self {
        LedgerError::Unavailable(timeout.to_string())
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                LedgerError::Corrupt(err.to_string())
            },
            _ => LedgerError::Unavailable(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_only_unavailable_is_retryable() {
        let key = DedupKey::new("order-1").unwrap();

        assert!(LedgerError::Unavailable("connection reset".into()).is_retryable());
        assert_eq!(LedgerError::DuplicateKey(key.clone()).class(), ErrorClass::Fatal);
        assert_eq!(LedgerError::NotFound(key).class(), ErrorClass::Fatal);
        assert_eq!(LedgerError::Corrupt("bad status".into()).class(), ErrorClass::Fatal);
    }

    #[test]
    fn test_timeout_maps_to_unavailable() {
        let err = LedgerError::from(AttemptTimeout(Duration::from_secs(5)));
        assert!(matches!(err, LedgerError::Unavailable(_)));
        assert!(err.is_retryable());
    }
}
