//! In-memory feature table loaded once from a JSON-lines export.

use super::{FeatureResolver, FeatureSchema, FeatureVector, Record, TransactionId};
use crate::error::{PatrolError, Result};
use std::collections::HashMap;
use std::path::Path;

pub struct FeatureTable {
    schema: FeatureSchema,
    account_field: Option<String>,
    /// Identifier → every record carrying it; more than one is ambiguous.
    rows: HashMap<String, Vec<Record>>,
}

impl FeatureTable {
    pub fn new(schema: FeatureSchema, account_field: Option<String>) -> Self {
        Self {
            schema,
            account_field,
            rows: HashMap::new(),
        }
    }

    /// Load one JSON object per line; blank lines are skipped.
    pub fn load(
        path: &Path,
        schema: FeatureSchema,
        id_field: &str,
        account_field: Option<String>,
    ) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| PatrolError::Config(format!("read table {}: {}", path.display(), e)))?;
        let mut table = Self::new(schema, account_field);
        for (lineno, line) in data.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record: Record = serde_json::from_str(line).map_err(|e| {
                PatrolError::Config(format!("{}:{}: {}", path.display(), lineno + 1, e))
            })?;
            table.insert(id_field, record).map_err(|e| {
                PatrolError::Config(format!("{}:{}: {}", path.display(), lineno + 1, e))
            })?;
        }
        tracing::info!(
            path = %path.display(),
            transactions = table.len(),
            "feature table loaded"
        );
        Ok(table)
    }

    /// Index a record under the value of `id_field`.
    pub fn insert(&mut self, id_field: &str, record: Record) -> Result<()> {
        let id = match record.get(id_field) {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(serde_json::Value::Number(n)) => n.to_string(),
            _ => {
                return Err(PatrolError::Config(format!(
                    "record has no `{}` identifier",
                    id_field
                )))
            }
        };
        self.rows.entry(id).or_default().push(record);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl FeatureResolver for FeatureTable {
    fn resolve(&self, id: &TransactionId) -> Result<FeatureVector> {
        let records = self
            .rows
            .get(id.as_str())
            .ok_or_else(|| PatrolError::NotFound(id.to_string()))?;
        let record = match records.as_slice() {
            [one] => one,
            many => {
                return Err(PatrolError::AmbiguousRecord {
                    transaction_id: id.to_string(),
                    count: many.len(),
                })
            }
        };
        let account_id = self
            .account_field
            .as_ref()
            .and_then(|f| record.get(f))
            .and_then(account_string);
        self.schema.assemble(id, account_id, record)
    }

    fn schema(&self) -> &FeatureSchema {
        &self.schema
    }
}

pub(super) fn account_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
