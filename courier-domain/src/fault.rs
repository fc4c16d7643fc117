//! Error classification shared by every layer.
//!
//! Low-level errors are classified once, where they originate, and the
//! classification travels with them. Callers branch on [`ErrorClass`],
//! never on storage- or transport-specific details.

use std::fmt;

/// Coarse classification of a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Transient infrastructure fault, worth retrying with backoff
    Retryable,
    /// Permanent error, surfaced immediately
    Fatal,
    /// Rejected by an open circuit before the operation ran
    CircuitOpen,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorClass::Retryable => write!(f, "retryable"),
            ErrorClass::Fatal => write!(f, "fatal"),
            ErrorClass::CircuitOpen => write!(f, "circuit_open"),
        }
    }
}

/// Errors that know their own [`ErrorClass`].
pub trait Classify {
    /// Classification of this error.
    fn class(&self) -> ErrorClass;

    /// Shorthand for `class() == Retryable`.
    fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Retryable
    }
}

/// Classified fault raised by external collaborators (processor, broker,
/// publisher).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Fault {
    /// Service temporarily down (503)
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Rate limit or quota exceeded (429)
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Transient server fault (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// Concurrent update conflict
    #[error("Aborted: {0}")]
    Aborted(String),

    /// Resource not visible yet (propagation delay)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Call exceeded its caller-supplied deadline
    #[error("Timed out: {0}")]
    TimedOut(String),

    /// Message cannot be processed as sent
    #[error("Malformed message: {0}")]
    Malformed(String),

    /// Programming or assertion fault
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl Classify for Fault {
    fn class(&self) -> ErrorClass {
        match self {
            Fault::Unavailable(_)
            | Fault::ResourceExhausted(_)
            | Fault::Internal(_)
            | Fault::Aborted(_)
            | Fault::NotFound(_)
            | Fault::TimedOut(_) => ErrorClass::Retryable,
            Fault::Malformed(_) | Fault::Unexpected(_) => ErrorClass::Fatal,
        }
    }
}

impl<E: Classify + ?Sized> Classify for Box<E> {
    fn class(&self) -> ErrorClass {
        (**self).class()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_faults_are_retryable() {
        for fault in [
            Fault::Unavailable("503".into()),
            Fault::ResourceExhausted("429".into()),
            Fault::Internal("500".into()),
            Fault::Aborted("conflict".into()),
            Fault::NotFound("subscription".into()),
            Fault::TimedOut("30s".into()),
        ] {
            assert!(fault.is_retryable(), "{fault} should be retryable");
        }
    }

    #[test]
    fn test_permanent_faults_are_fatal() {
        assert_eq!(Fault::Malformed("bad json".into()).class(), ErrorClass::Fatal);
        assert_eq!(Fault::Unexpected("bug".into()).class(), ErrorClass::Fatal);
    }
}
