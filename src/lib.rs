//! Card Patrol: fraud decision engine for payment-card transactions.
//!
//! Modular structure:
//! - [`features`]: Schema contract and feature resolvers (JSON-lines table, SQLite store)
//! - [`model`]: Risk models (JSON logistic / tree-ensemble artifacts, ONNX)
//! - [`risk`]: Threshold policy and hard-block overrides
//! - [`patrol`]: Orchestrator: identifier → features → score → PASS/LOCK
//! - [`batch`]: Bounded concurrent evaluation of identifier lists
//! - [`logging`]: Structured JSON logging

pub mod batch;
pub mod config;
pub mod error;
pub mod features;
pub mod logging;
pub mod model;
pub mod patrol;
pub mod risk;

pub use config::PatrolConfig;
pub use error::{ErrorKind, PatrolError, Result};
pub use features::{FeatureResolver, FeatureSchema, FeatureVector, TransactionId};
pub use logging::StructuredLogger;
pub use model::{RiskModel, RiskScore};
pub use patrol::{Decision, Patrol};
pub use risk::{Action, DecisionPolicy, HardBlock, Overrides, Threshold};
