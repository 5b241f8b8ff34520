//! Versioned schema contract between the training side and feature resolvers.
//!
//! A schema lists fields in model input order. Numeric fields accept JSON numbers,
//! numeric strings and booleans. Categorical fields map a string level to its
//! index in `levels`. A value that is missing, null, unparseable, non-finite or an
//! unknown level is imputed from the field's `default`; a field without a default
//! makes the record incomplete.

use super::{FeatureVector, TransactionId};
use crate::error::{PatrolError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::OnceLock;

/// Raw record as stored by the backing table: column name → value.
pub type Record = serde_json::Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Numeric,
    Categorical { levels: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    /// Imputed value when the record cannot supply one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub version: String,
    pub fields: Vec<FieldSpec>,
    #[serde(skip)]
    fingerprint: OnceLock<String>,
}

impl PartialEq for FeatureSchema {
    fn eq(&self, other: &Self) -> bool {
        self.version == other.version && self.fields == other.fields
    }
}

enum Extracted {
    Value(f64),
    Unusable(String),
}

impl FeatureSchema {
    pub fn new(version: impl Into<String>, fields: Vec<FieldSpec>) -> Self {
        Self {
            version: version.into(),
            fields,
            fingerprint: OnceLock::new(),
        }
    }

    /// Parse a standalone schema file.
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| PatrolError::Config(format!("read schema {}: {}", path.display(), e)))?;
        let schema: Self = serde_json::from_str(&data)
            .map_err(|e| PatrolError::Config(format!("parse schema {}: {}", path.display(), e)))?;
        schema.validate()?;
        Ok(schema)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Reject empty schemas, duplicate names, non-finite defaults and empty level lists.
    pub fn validate(&self) -> Result<()> {
        if self.fields.is_empty() {
            return Err(PatrolError::Config(format!("schema {} has no fields", self.version)));
        }
        let mut seen = std::collections::HashSet::new();
        for field in &self.fields {
            if !seen.insert(field.name.as_str()) {
                return Err(PatrolError::Config(format!(
                    "schema {} lists `{}` twice",
                    self.version, field.name
                )));
            }
            if matches!(field.default, Some(d) if !d.is_finite()) {
                return Err(PatrolError::Config(format!(
                    "schema {}: default for `{}` is not finite",
                    self.version, field.name
                )));
            }
            if let FieldKind::Categorical { levels } = &field.kind {
                if levels.is_empty() {
                    return Err(PatrolError::Config(format!(
                        "schema {}: categorical `{}` has no levels",
                        self.version, field.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// SHA-256 over version, ordered field names and categorical levels, hex encoded.
    /// Two schemas with the same fingerprint produce interchangeable vectors.
    pub fn fingerprint(&self) -> &str {
        self.fingerprint.get_or_init(|| {
            let mut hasher = Sha256::new();
            hasher.update(self.version.as_bytes());
            for field in &self.fields {
                hasher.update([0u8]);
                hasher.update(field.name.as_bytes());
                if let FieldKind::Categorical { levels } = &field.kind {
                    for level in levels {
                        hasher.update([1u8]);
                        hasher.update(level.as_bytes());
                    }
                }
            }
            hex(&hasher.finalize())
        })
    }

    /// Build the model input for one record, imputing per field defaults.
    pub fn assemble(
        &self,
        transaction_id: &TransactionId,
        account_id: Option<String>,
        record: &Record,
    ) -> Result<FeatureVector> {
        let mut values = Vec::with_capacity(self.fields.len());
        let mut imputed = Vec::new();

        for field in &self.fields {
            match extract(field, record.get(&field.name)) {
                Extracted::Value(v) => values.push(v),
                Extracted::Unusable(reason) => match field.default {
                    Some(d) => {
                        tracing::debug!(
                            transaction_id = %transaction_id,
                            field = %field.name,
                            reason = %reason,
                            default = d,
                            "imputed feature"
                        );
                        values.push(d);
                        imputed.push(field.name.clone());
                    }
                    None => {
                        return Err(PatrolError::IncompleteRecord {
                            transaction_id: transaction_id.to_string(),
                            field: field.name.clone(),
                            reason,
                        })
                    }
                },
            }
        }

        Ok(FeatureVector {
            transaction_id: transaction_id.clone(),
            account_id,
            schema_fingerprint: self.fingerprint().to_string(),
            values,
            imputed,
        })
    }
}

fn extract(field: &FieldSpec, value: Option<&Value>) -> Extracted {
    let value = match value {
        None => return Extracted::Unusable("is missing".to_string()),
        Some(Value::Null) => return Extracted::Unusable("is null".to_string()),
        Some(v) => v,
    };

    let parsed = match (&field.kind, value) {
        (FieldKind::Numeric, Value::Number(n)) => n.as_f64(),
        (FieldKind::Numeric, Value::String(s)) => s.trim().parse::<f64>().ok(),
        (FieldKind::Numeric, Value::Bool(b)) => Some(if *b { 1.0 } else { 0.0 }),
        (FieldKind::Categorical { levels }, Value::String(s)) => {
            match levels.iter().position(|l| l == s) {
                Some(idx) => Some(idx as f64),
                None => return Extracted::Unusable(format!("has unknown level {:?}", s)),
            }
        }
        // Already-encoded level index
        (FieldKind::Categorical { levels }, Value::Number(n)) => n
            .as_u64()
            .filter(|idx| (*idx as usize) < levels.len())
            .map(|idx| idx as f64),
        _ => None,
    };

    match parsed {
        Some(v) if v.is_finite() => Extracted::Value(v),
        Some(_) => Extracted::Unusable("is not finite".to_string()),
        None => Extracted::Unusable(format!("is malformed: {}", value)),
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Hex SHA-256 of arbitrary bytes (artifact digests).
pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    hex(&Sha256::digest(bytes))
}
