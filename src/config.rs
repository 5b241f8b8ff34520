//! Engine configuration. Threshold and hard-block lists are policy, set here rather than in code.

use crate::error::{PatrolError, Result};
use crate::features::{FeatureSchema, FieldKind, FieldSpec};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Env var naming the config file.
pub const CONFIG_PATH_ENV: &str = "PATROL_CONFIG_PATH";
/// Env var overriding `policy.threshold`.
pub const THRESHOLD_ENV: &str = "PATROL_THRESHOLD";

/// Calibrated cut point of the production XGBoost model.
pub const DEFAULT_THRESHOLD: f64 = 0.2810381;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PatrolConfig {
    /// Risk model artifact
    pub model: ModelConfig,
    /// Feature lookup backing store and schema
    pub features: FeaturesConfig,
    /// Threshold and hard-block overrides
    pub policy: PolicyConfig,
    pub runtime: RuntimeConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFormat {
    /// Pick by file extension: `.onnx` is ONNX, anything else a JSON artifact.
    #[default]
    Auto,
    Json,
    Onnx,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub path: PathBuf,
    pub format: ModelFormat,
    /// Intra-op threads for ONNX sessions
    pub onnx_threads: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeatureSource {
    /// JSON-lines file loaded into memory at startup
    Table { path: PathBuf },
    /// SQLite feature store
    Sqlite { path: PathBuf },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeaturesConfig {
    pub source: FeatureSource,
    /// Record column holding the transaction identifier
    pub id_field: String,
    /// Record column holding the owning account, if any
    pub account_field: Option<String>,
    /// Schema file. Required for ONNX models; JSON artifacts embed their own.
    pub schema_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HardBlockConfig {
    /// JSON file `{"transactions": [...], "accounts": [...]}`
    pub path: Option<PathBuf>,
    pub transactions: Vec<String>,
    pub accounts: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// LOCK at or above this score (0.0–1.0)
    pub threshold: f64,
    pub hard_block: Option<HardBlockConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Concurrent evaluations in batch mode
    pub workers: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub json: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("hypertuned_xgb_model.json"),
            format: ModelFormat::Auto,
            onnx_threads: 1,
        }
    }
}

impl Default for FeatureSource {
    fn default() -> Self {
        FeatureSource::Table {
            path: PathBuf::from("transactions.jsonl"),
        }
    }
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            source: FeatureSource::default(),
            id_field: "tr_id".to_string(),
            account_field: Some("user_id".to_string()),
            schema_path: None,
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            hard_block: None,
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self { workers: 4 }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: true,
        }
    }
}

impl PatrolConfig {
    /// Load from JSON file if present, otherwise defaults. A file that exists but
    /// cannot be read or parsed is an error, never silently replaced by defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "config file not found; using defaults");
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path)
            .map_err(|e| PatrolError::Config(format!("read {}: {}", path.display(), e)))?;
        serde_json::from_str(&data)
            .map_err(|e| PatrolError::Config(format!("parse {}: {}", path.display(), e)))
    }

    /// Load from `PATROL_CONFIG_PATH` (default `patrol.json`) and apply env overrides.
    pub fn from_env() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("patrol.json"));
        let mut config = Self::load(&path)?;
        if let Ok(raw) = std::env::var(THRESHOLD_ENV) {
            config.apply_threshold_override(&raw)?;
        }
        Ok(config)
    }

    pub fn apply_threshold_override(&mut self, raw: &str) -> Result<()> {
        let threshold = raw
            .trim()
            .parse::<f64>()
            .map_err(|e| PatrolError::Config(format!("{}={:?}: {}", THRESHOLD_ENV, raw, e)))?;
        self.policy.threshold = threshold;
        Ok(())
    }
}

/// Column layout the production model was trained on.
pub fn default_schema() -> FeatureSchema {
    fn categorical(name: &str, levels: &[&str]) -> FieldSpec {
        FieldSpec {
            name: name.to_string(),
            kind: FieldKind::Categorical {
                levels: levels.iter().map(|s| s.to_string()).collect(),
            },
            default: None,
        }
    }
    fn numeric(name: &str) -> FieldSpec {
        FieldSpec {
            name: name.to_string(),
            kind: FieldKind::Numeric,
            default: None,
        }
    }
    FeatureSchema::new(
        "patrol-v1",
        vec![
            categorical(
                "tr_type",
                &["ATM", "CARD_PAYMENT", "CASHBACK", "EXCHANGE", "FEE", "REFUND", "TOPUP", "TRANSFER"],
            ),
            categorical("tr_state", &["COMPLETED", "DECLINED", "FAILED", "PENDING", "REVERTED"]),
            numeric("tr_amount_gbp"),
            categorical("tr_currency", &["EUR", "GBP", "OTHER", "USD"]),
            categorical("user_country", &["FR", "GB", "IE", "OTHER", "PL", "RO"]),
            numeric("user_age"),
            numeric("account_age"),
            numeric("tr_day"),
            numeric("tr_weekday"),
            numeric("tr_hour"),
        ],
    )
}
