//! Feature resolution: transaction identifier → fixed-schema numeric vector.

pub(crate) mod schema;
mod sqlite;
mod table;

pub use schema::{FeatureSchema, FieldKind, FieldSpec, Record};
pub use sqlite::SqliteFeatureStore;
pub use table::FeatureTable;

use crate::error::{PatrolError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque, non-empty key naming one payment-card transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TransactionId(String);

impl TransactionId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(PatrolError::InvalidIdentifier(id));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TransactionId {
    type Error = PatrolError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<TransactionId> for String {
    fn from(id: TransactionId) -> Self {
        id.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Model input for one transaction, in schema order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub transaction_id: TransactionId,
    pub account_id: Option<String>,
    /// Fingerprint of the schema the values were assembled against
    pub schema_fingerprint: String,
    pub values: Vec<f64>,
    /// Fields filled from their documented default
    pub imputed: Vec<String>,
}

impl FeatureVector {
    pub fn dim(&self) -> usize {
        self.values.len()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }
}

/// Read-only lookup from identifier to feature vector.
pub trait FeatureResolver: Send + Sync {
    /// Fails with `NotFound`, `AmbiguousRecord`, `IncompleteRecord` or `LookupFailed`.
    fn resolve(&self, id: &TransactionId) -> Result<FeatureVector>;

    /// Schema every resolved vector conforms to.
    fn schema(&self) -> &FeatureSchema;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_identifier_rejected() {
        assert!(matches!(
            TransactionId::new("  "),
            Err(PatrolError::InvalidIdentifier(_))
        ));
        assert_eq!(TransactionId::new("t-1").unwrap().as_str(), "t-1");
    }

    #[test]
    fn identifier_deserialization_validates() {
        let ok: TransactionId = serde_json::from_str("\"t-1\"").unwrap();
        assert_eq!(ok.to_string(), "t-1");
        assert!(serde_json::from_str::<TransactionId>("\"\"").is_err());
    }
}
