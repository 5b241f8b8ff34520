//! JSON log lines: one JSON object per line (ndjson) for ingestion and audit.

use crate::error::{ErrorKind, PatrolError};
use crate::patrol::Decision;
use serde::Serialize;
use std::io::Write;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Result line written by the host for each requested identifier.
#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DecisionLine<'a> {
    Decided(&'a Decision),
    Failed {
        transaction_id: &'a str,
        kind: &'static str,
        error: String,
    },
}

impl<'a> DecisionLine<'a> {
    pub fn failed(transaction_id: &'a str, e: &PatrolError) -> Self {
        let kind = match e.kind() {
            ErrorKind::Data => "data",
            ErrorKind::Configuration => "configuration",
        };
        DecisionLine::Failed {
            transaction_id,
            kind,
            error: e.to_string(),
        }
    }
}

pub struct StructuredLogger;

impl StructuredLogger {
    /// Route tracing to stderr; stdout is reserved for decision lines. `RUST_LOG` wins
    /// over `level`, and an unparsable level falls back to `info`. Returns false when a
    /// subscriber was already installed.
    pub fn init(json: bool, level: &str) -> bool {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(level))
            .unwrap_or_else(|_| EnvFilter::new("info"));
        let events = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true);
        let events = if json {
            events.json().flatten_event(true).boxed()
        } else {
            events.compact().boxed()
        };
        tracing_subscriber::registry()
            .with(filter)
            .with(events)
            .try_init()
            .is_ok()
    }

    /// Emit a single JSON line without going through tracing.
    pub fn emit_json(event: &impl Serialize, w: &mut impl Write) -> std::io::Result<()> {
        let line = serde_json::to_string(event)?;
        writeln!(w, "{}", line)
    }
}
