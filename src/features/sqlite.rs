//! SQLite-backed feature store. Each row holds one transaction's raw columns as a JSON payload.
//!
//! The table layout is fixed: `tr_id` and `account_id` are store columns, not record fields.
//! A row without an `account_id` falls back to the configured account field of its payload.

use super::table::account_string;
use super::{FeatureResolver, FeatureSchema, FeatureVector, Record, TransactionId};
use crate::error::{PatrolError, Result};
use rusqlite::{params, Connection, OpenFlags};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

const LOOKUP: &str = "SELECT account_id, payload FROM features WHERE tr_id = ?1 LIMIT 2";

pub struct SqliteFeatureStore {
    /// One connection per concurrent reader; a writable store has exactly one.
    conns: Vec<Mutex<Connection>>,
    next: AtomicUsize,
    schema: FeatureSchema,
    account_field: Option<String>,
}

fn config_err(path: &Path, e: rusqlite::Error) -> PatrolError {
    PatrolError::Config(format!("feature store {}: {}", path.display(), e))
}

impl SqliteFeatureStore {
    /// Open or create the store at path.
    pub fn open(path: &Path, schema: FeatureSchema) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| config_err(path, e))?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS features (
                tr_id TEXT NOT NULL,
                account_id TEXT,
                payload TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_features_tr_id ON features(tr_id);
            "#,
        )
        .map_err(|e| config_err(path, e))?;
        Ok(Self::with_connections(vec![conn], schema))
    }

    /// Open an existing store without write access, with `readers` connections so
    /// concurrent lookups do not queue on one handle. A store missing the `features`
    /// table or its columns can never answer, so it is refused here.
    pub fn open_read_only(path: &Path, schema: FeatureSchema, readers: usize) -> Result<Self> {
        let mut conns = Vec::with_capacity(readers.max(1));
        for _ in 0..readers.max(1) {
            let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
                .map_err(|e| config_err(path, e))?;
            conn.prepare_cached(LOOKUP).map_err(|e| config_err(path, e))?;
            conns.push(conn);
        }
        tracing::info!(path = %path.display(), readers = conns.len(), "feature store opened");
        Ok(Self::with_connections(conns, schema))
    }

    fn with_connections(conns: Vec<Connection>, schema: FeatureSchema) -> Self {
        Self {
            conns: conns.into_iter().map(Mutex::new).collect(),
            next: AtomicUsize::new(0),
            schema,
            account_field: Some("account_id".to_string()),
        }
    }

    /// Payload field consulted when a row has no `account_id` column value.
    pub fn with_account_field(mut self, account_field: Option<String>) -> Self {
        self.account_field = account_field;
        self
    }

    /// Insert a raw record. Identifiers are not unique at this layer; duplicates surface on lookup.
    pub fn insert_record(
        &self,
        transaction_id: &str,
        account_id: Option<&str>,
        record: &Record,
    ) -> Result<()> {
        let payload = serde_json::to_string(record)
            .map_err(|e| PatrolError::Config(format!("encode record {}: {}", transaction_id, e)))?;
        let conn = self.lock(transaction_id)?;
        conn.execute(
            "INSERT INTO features (tr_id, account_id, payload) VALUES (?1, ?2, ?3)",
            params![transaction_id, account_id, payload],
        )
        .map_err(|e| lookup_failed(transaction_id, e))?;
        Ok(())
    }

    /// Insert a record keyed by its `id_field`, with the account taken from the configured field.
    pub fn insert(&self, id_field: &str, record: &Record) -> Result<()> {
        let id = record
            .get(id_field)
            .and_then(account_string)
            .ok_or_else(|| PatrolError::Config(format!("record has no `{}` identifier", id_field)))?;
        let account = self
            .account_field
            .as_deref()
            .and_then(|f| record.get(f))
            .and_then(account_string);
        self.insert_record(&id, account.as_deref(), record)
    }

    /// Any idle connection, else wait on the next one in turn.
    fn lock(&self, transaction_id: &str) -> Result<MutexGuard<'_, Connection>> {
        let start = self.next.fetch_add(1, Ordering::Relaxed) % self.conns.len();
        for offset in 0..self.conns.len() {
            if let Ok(guard) = self.conns[(start + offset) % self.conns.len()].try_lock() {
                return Ok(guard);
            }
        }
        self.conns[start].lock().map_err(|_| PatrolError::LookupFailed {
            transaction_id: transaction_id.to_string(),
            message: "connection lock poisoned".to_string(),
        })
    }
}

fn lookup_failed(transaction_id: &str, e: impl std::fmt::Display) -> PatrolError {
    PatrolError::LookupFailed {
        transaction_id: transaction_id.to_string(),
        message: e.to_string(),
    }
}

impl FeatureResolver for SqliteFeatureStore {
    fn resolve(&self, id: &TransactionId) -> Result<FeatureVector> {
        let rows: Vec<(Option<String>, String)> = {
            let conn = self.lock(id.as_str())?;
            let mut stmt = conn
                .prepare_cached(LOOKUP)
                .map_err(|e| lookup_failed(id.as_str(), e))?;
            let mapped = stmt
                .query_map(params![id.as_str()], |row| Ok((row.get(0)?, row.get(1)?)))
                .map_err(|e| lookup_failed(id.as_str(), e))?;
            let collected = mapped
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| lookup_failed(id.as_str(), e))?;
            collected
        };

        let (account_id, payload) = match rows.len() {
            0 => return Err(PatrolError::NotFound(id.to_string())),
            1 => rows.into_iter().next().ok_or_else(|| PatrolError::NotFound(id.to_string()))?,
            _ => {
                let count: i64 = self
                    .lock(id.as_str())?
                    .query_row(
                        "SELECT COUNT(*) FROM features WHERE tr_id = ?1",
                        params![id.as_str()],
                        |row| row.get(0),
                    )
                    .map_err(|e| lookup_failed(id.as_str(), e))?;
                return Err(PatrolError::AmbiguousRecord {
                    transaction_id: id.to_string(),
                    count: count as usize,
                });
            }
        };

        let record: Record = serde_json::from_str(&payload).map_err(|e| PatrolError::IncompleteRecord {
            transaction_id: id.to_string(),
            field: "payload".to_string(),
            reason: format!("is not a JSON object: {}", e),
        })?;
        let account_id = account_id.or_else(|| {
            self.account_field
                .as_deref()
                .and_then(|f| record.get(f))
                .and_then(account_string)
        });
        self.schema.assemble(id, account_id, &record)
    }

    fn schema(&self) -> &FeatureSchema {
        &self.schema
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{FieldKind, FieldSpec};
    use serde_json::json;

    fn schema() -> FeatureSchema {
        FeatureSchema::new(
            "t",
            vec![
                FieldSpec {
                    name: "tr_amount_gbp".into(),
                    kind: FieldKind::Numeric,
                    default: None,
                },
                FieldSpec {
                    name: "tr_hour".into(),
                    kind: FieldKind::Numeric,
                    default: Some(12.0),
                },
            ],
        )
    }

    fn record(v: serde_json::Value) -> Record {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn insert_and_resolve() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteFeatureStore::open(&dir.path().join("f.db"), schema()).unwrap();
        store
            .insert_record("t-1", Some("acct-1"), &record(json!({"tr_amount_gbp": 99.0})))
            .unwrap();
        let fv = store.resolve(&TransactionId::new("t-1").unwrap()).unwrap();
        assert_eq!(fv.values, vec![99.0, 12.0]);
        assert_eq!(fv.imputed, vec!["tr_hour"]);
        assert_eq!(fv.account_id.as_deref(), Some("acct-1"));
    }

    #[test]
    fn missing_and_duplicate_rows() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteFeatureStore::open(&dir.path().join("f.db"), schema()).unwrap();
        let id = TransactionId::new("dup").unwrap();
        assert_eq!(store.resolve(&id).unwrap_err(), PatrolError::NotFound("dup".into()));

        for amount in [1.0, 2.0, 3.0] {
            store
                .insert_record("dup", None, &record(json!({"tr_amount_gbp": amount})))
                .unwrap();
        }
        assert_eq!(
            store.resolve(&id).unwrap_err(),
            PatrolError::AmbiguousRecord {
                transaction_id: "dup".into(),
                count: 3
            }
        );
    }

    #[test]
    fn reopened_read_only_store_serves_lookups() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.db");
        {
            let store = SqliteFeatureStore::open(&path, schema()).unwrap();
            store
                .insert_record("t-2", None, &record(json!({"tr_amount_gbp": "5", "tr_hour": 3})))
                .unwrap();
        }
        let store = SqliteFeatureStore::open_read_only(&path, schema(), 2).unwrap();
        let fv = store.resolve(&TransactionId::new("t-2").unwrap()).unwrap();
        assert_eq!(fv.values, vec![5.0, 3.0]);
    }

    #[test]
    fn store_without_features_table_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("other.db");
        Connection::open(&path)
            .unwrap()
            .execute_batch("CREATE TABLE other (x INTEGER);")
            .unwrap();
        assert!(matches!(
            SqliteFeatureStore::open_read_only(&path, schema(), 1),
            Err(PatrolError::Config(_))
        ));
    }

    #[test]
    fn store_missing_payload_column_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy.db");
        Connection::open(&path)
            .unwrap()
            .execute_batch("CREATE TABLE features (tr_id TEXT, account_id TEXT);")
            .unwrap();
        assert!(matches!(
            SqliteFeatureStore::open_read_only(&path, schema(), 1),
            Err(PatrolError::Config(_))
        ));
    }

    #[test]
    fn account_taken_from_configured_payload_field() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.db");
        {
            let store = SqliteFeatureStore::open(&path, schema())
                .unwrap()
                .with_account_field(Some("user_id".into()));
            store
                .insert("tr_id", &record(json!({"tr_id": "t-3", "user_id": "u-7", "tr_amount_gbp": 1.0})))
                .unwrap();
            store
                .insert_record("t-4", None, &record(json!({"user_id": "u-8", "tr_amount_gbp": 2.0})))
                .unwrap();
            assert!(store.insert("tr_id", &record(json!({"tr_amount_gbp": 3.0}))).is_err());
        }
        let store = SqliteFeatureStore::open_read_only(&path, schema(), 1)
            .unwrap()
            .with_account_field(Some("user_id".into()));
        let fv = store.resolve(&TransactionId::new("t-3").unwrap()).unwrap();
        assert_eq!(fv.account_id.as_deref(), Some("u-7"));
        // No account column value: read from the payload.
        let fv = store.resolve(&TransactionId::new("t-4").unwrap()).unwrap();
        assert_eq!(fv.account_id.as_deref(), Some("u-8"));
    }

    #[test]
    fn pooled_readers_serve_concurrent_lookups() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.db");
        {
            let store = SqliteFeatureStore::open(&path, schema()).unwrap();
            for i in 0..16 {
                store
                    .insert_record(&format!("t-{}", i), None, &record(json!({"tr_amount_gbp": i})))
                    .unwrap();
            }
        }
        let store = std::sync::Arc::new(SqliteFeatureStore::open_read_only(&path, schema(), 4).unwrap());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    (0..16)
                        .map(|i| {
                            let id = TransactionId::new(format!("t-{}", i)).unwrap();
                            store.resolve(&id).unwrap().values[0]
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let expected: Vec<f64> = (0..16).map(|i| i as f64).collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), expected);
        }
    }
}
