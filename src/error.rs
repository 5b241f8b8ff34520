//! Error taxonomy for the decision engine.
//!
//! Data errors concern one transaction and leave the engine usable. Configuration
//! errors mean the engine itself is broken: the orchestrator latches the first one
//! and refuses further decisions until a valid model is installed.

use thiserror::Error;

/// Which side of the taxonomy an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The identifier or its record is invalid or missing.
    Data,
    /// The engine is misconfigured; no decision can be trusted.
    Configuration,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PatrolError {
    #[error("invalid transaction identifier: {0:?}")]
    InvalidIdentifier(String),

    #[error("transaction {0} not found")]
    NotFound(String),

    #[error("transaction {transaction_id}: field `{field}` {reason}")]
    IncompleteRecord {
        transaction_id: String,
        field: String,
        reason: String,
    },

    #[error("transaction {transaction_id} matches {count} records")]
    AmbiguousRecord { transaction_id: String, count: usize },

    #[error("feature lookup failed for {transaction_id}: {message}")]
    LookupFailed {
        transaction_id: String,
        message: String,
    },

    #[error("risk model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("feature schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("model produced invalid risk score {0}")]
    InvalidScore(f64),

    #[error("configuration error: {0}")]
    Config(String),
}

impl PatrolError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PatrolError::InvalidIdentifier(_)
            | PatrolError::NotFound(_)
            | PatrolError::IncompleteRecord { .. }
            | PatrolError::AmbiguousRecord { .. }
            | PatrolError::LookupFailed { .. } => ErrorKind::Data,
            PatrolError::ModelUnavailable(_)
            | PatrolError::SchemaMismatch(_)
            | PatrolError::InvalidScore(_)
            | PatrolError::Config(_) => ErrorKind::Configuration,
        }
    }

    /// Fatal errors stop the engine from producing any further decision.
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Configuration
    }
}

pub type Result<T> = std::result::Result<T, PatrolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_errors_are_not_fatal() {
        assert!(!PatrolError::NotFound("t".into()).is_fatal());
        let e = PatrolError::IncompleteRecord {
            transaction_id: "t".into(),
            field: "user_age".into(),
            reason: "is missing".into(),
        };
        assert_eq!(e.kind(), ErrorKind::Data);
    }

    #[test]
    fn configuration_errors_are_fatal() {
        assert!(PatrolError::SchemaMismatch("x".into()).is_fatal());
        assert!(PatrolError::ModelUnavailable("x".into()).is_fatal());
        assert!(PatrolError::InvalidScore(f64::NAN).is_fatal());
    }

    #[test]
    fn messages_name_the_transaction() {
        let e = PatrolError::NotFound("TXN-DOES-NOT-EXIST".into());
        assert_eq!(e.to_string(), "transaction TXN-DOES-NOT-EXIST not found");
    }
}
