//! Structured logging: tracing subscriber setup and JSON decision lines.

mod format;

pub use format::{DecisionLine, StructuredLogger};
