//! Pre-trained fraud classifiers: feature vector → probability of fraud.

mod artifact;
mod onnx;

pub use artifact::{ArtifactModel, Estimator, Tree, TreeNode};
pub use onnx::OnnxModel;

use crate::config::{ModelConfig, ModelFormat};
use crate::error::{PatrolError, Result};
use crate::features::{FeatureSchema, FeatureVector};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Model-estimated probability of fraud, guaranteed finite and in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct RiskScore(f64);

impl RiskScore {
    /// Out-of-range output means the model is broken, not the transaction.
    pub fn new(value: f64) -> Result<Self> {
        if value.is_finite() && (0.0..=1.0).contains(&value) {
            Ok(Self(value))
        } else {
            Err(PatrolError::InvalidScore(value))
        }
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

/// Identification of the loaded artifact, recorded with every decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub version: String,
    pub kind: String,
    /// SHA-256 of the artifact bytes
    pub digest: String,
}

/// Immutable, stateless scorer. Same vector in, same score out.
pub trait RiskModel: Send + Sync {
    fn info(&self) -> &ModelInfo;

    /// Input layout the model was trained on.
    fn schema(&self) -> &FeatureSchema;

    /// Score one vector. Fails with `SchemaMismatch` when the vector was not
    /// built for this model's schema; never pads or truncates.
    fn score(&self, features: &FeatureVector) -> Result<RiskScore>;
}

/// Arity first, then fingerprint: arity gives the clearer message.
pub fn check_schema(schema: &FeatureSchema, features: &FeatureVector) -> Result<()> {
    if features.dim() != schema.len() {
        return Err(PatrolError::SchemaMismatch(format!(
            "transaction {}: expected {} features ({}), got {}",
            features.transaction_id,
            schema.len(),
            schema.version,
            features.dim()
        )));
    }
    if features.schema_fingerprint != schema.fingerprint() {
        return Err(PatrolError::SchemaMismatch(format!(
            "transaction {}: vector built for schema {}, model expects {} ({})",
            features.transaction_id,
            features.schema_fingerprint,
            schema.fingerprint(),
            schema.version
        )));
    }
    Ok(())
}

/// Standard logistic link.
pub(crate) fn sigmoid(margin: f64) -> f64 {
    1.0 / (1.0 + (-margin).exp())
}

/// Load the configured artifact once. Any failure is `ModelUnavailable`.
///
/// `schema` is required for ONNX models. For JSON artifacts it is optional and,
/// when given, must match the embedded schema.
pub fn load_model(config: &ModelConfig, schema: Option<FeatureSchema>) -> Result<Box<dyn RiskModel>> {
    let format = match config.format {
        ModelFormat::Auto => detect_format(&config.path),
        f => f,
    };
    let model: Box<dyn RiskModel> = match format {
        ModelFormat::Onnx => {
            let schema = schema.ok_or_else(|| {
                PatrolError::ModelUnavailable(format!(
                    "{}: ONNX models need features.schema_path",
                    config.path.display()
                ))
            })?;
            Box::new(OnnxModel::load(&config.path, schema, config.onnx_threads)?)
        }
        _ => {
            let model = ArtifactModel::load(&config.path)?;
            if let Some(schema) = schema {
                if schema.fingerprint() != model.schema().fingerprint() {
                    return Err(PatrolError::SchemaMismatch(format!(
                        "schema file {} ({}) differs from model schema {} ({})",
                        schema.version,
                        schema.fingerprint(),
                        model.schema().version,
                        model.schema().fingerprint()
                    )));
                }
            }
            Box::new(model)
        }
    };
    tracing::info!(
        path = %config.path.display(),
        version = %model.info().version,
        kind = %model.info().kind,
        digest = %model.info().digest,
        features = model.schema().len(),
        "risk model loaded"
    );
    Ok(model)
}

fn detect_format(path: &Path) -> ModelFormat {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("onnx") => ModelFormat::Onnx,
        _ => ModelFormat::Json,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn risk_score_bounds() {
        assert!(RiskScore::new(0.0).is_ok());
        assert!(RiskScore::new(1.0).is_ok());
        assert_eq!(RiskScore::new(1.01), Err(PatrolError::InvalidScore(1.01)));
        assert!(RiskScore::new(-0.1).is_err());
        assert!(matches!(RiskScore::new(f64::NAN), Err(PatrolError::InvalidScore(_))));
    }

    #[test]
    fn format_detection() {
        assert_eq!(detect_format(Path::new("m.onnx")), ModelFormat::Onnx);
        assert_eq!(detect_format(Path::new("m.ONNX")), ModelFormat::Onnx);
        assert_eq!(detect_format(Path::new("m.json")), ModelFormat::Json);
    }

    #[test]
    fn missing_artifact_is_unavailable() {
        let config = ModelConfig {
            path: PathBuf::from("nonexistent-model.json"),
            ..ModelConfig::default()
        };
        assert!(matches!(
            load_model(&config, None),
            Err(PatrolError::ModelUnavailable(_))
        ));
    }

    #[test]
    fn onnx_without_schema_is_unavailable() {
        let config = ModelConfig {
            path: PathBuf::from("model.onnx"),
            ..ModelConfig::default()
        };
        assert!(matches!(
            load_model(&config, None),
            Err(PatrolError::ModelUnavailable(_))
        ));
    }

    #[test]
    fn sigmoid_midpoint() {
        assert_eq!(sigmoid(0.0), 0.5);
        assert!(sigmoid(10.0) > 0.99);
    }
}
