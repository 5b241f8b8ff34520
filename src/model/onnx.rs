//! ONNX Runtime classifier. Input: [1, feature_dim] f32. Output: class probabilities,
//! positive (fraud) class at index 1. Export tree models with zipmap disabled so the
//! probabilities come back as a plain tensor.

use super::{check_schema, ModelInfo, RiskModel, RiskScore};
use crate::error::{PatrolError, Result};
use crate::features::schema::sha256_hex;
use crate::features::{FeatureSchema, FeatureVector};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use std::path::Path;
use std::sync::Mutex;

pub struct OnnxModel {
    /// ORT needs exclusive access to run; the graph itself is never modified.
    session: Mutex<Session>,
    input_name: String,
    info: ModelInfo,
    schema: FeatureSchema,
}

fn unavailable(e: impl std::fmt::Display) -> PatrolError {
    PatrolError::ModelUnavailable(e.to_string())
}

impl OnnxModel {
    /// Load model from path. A missing or invalid file is `ModelUnavailable`; there is no no-op mode.
    pub fn load(path: &Path, schema: FeatureSchema, intra_threads: usize) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| unavailable(format!("{}: {}", path.display(), e)))?;

        let session = Session::builder()
            .map_err(unavailable)?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(unavailable)?
            .with_intra_threads(intra_threads.max(1))
            .map_err(unavailable)?
            .commit_from_file(path)
            .map_err(|e| unavailable(format!("{}: {}", path.display(), e)))?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .unwrap_or_else(|| "float_input".to_string());

        let version = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("onnx")
            .to_string();

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            info: ModelInfo {
                version,
                kind: "onnx".to_string(),
                digest: sha256_hex(&bytes),
            },
            schema,
        })
    }
}

impl RiskModel for OnnxModel {
    fn info(&self) -> &ModelInfo {
        &self.info
    }

    fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    fn score(&self, features: &FeatureVector) -> Result<RiskScore> {
        check_schema(&self.schema, features)?;

        let data: Vec<f32> = features.values.iter().map(|v| *v as f32).collect();
        let shape = vec![1_i64, data.len() as i64];
        let input = Tensor::from_array((shape, data)).map_err(unavailable)?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| unavailable("session lock poisoned"))?;
        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => input])
            .map_err(unavailable)?;

        for (name, output) in outputs.iter() {
            if name.contains("label") {
                continue;
            }
            if let Ok((shape, data)) = output.try_extract_tensor::<f32>() {
                let dims: Vec<i64> = shape.iter().copied().collect();
                if let Some(p) = positive_class(&dims, data) {
                    return RiskScore::new(p as f64);
                }
            }
        }
        Err(unavailable(format!(
            "model {} produced no probability tensor",
            self.info.version
        )))
    }
}

/// Probability of the fraud class from a [1, classes] or [classes] tensor.
fn positive_class(dims: &[i64], data: &[f32]) -> Option<f32> {
    let classes = match dims {
        [1, n] | [n] => *n,
        _ => return None,
    };
    match classes {
        1 => data.first().copied(),
        n if n >= 2 => data.get(1).copied(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positive_class_layouts() {
        assert_eq!(positive_class(&[1, 2], &[0.3, 0.7]), Some(0.7));
        assert_eq!(positive_class(&[2], &[0.3, 0.7]), Some(0.7));
        assert_eq!(positive_class(&[1, 1], &[0.4]), Some(0.4));
        assert_eq!(positive_class(&[4, 2], &[0.0; 8]), None);
        assert_eq!(positive_class(&[1, 2], &[0.1]), None);
    }

    #[test]
    fn missing_file_is_unavailable() {
        let schema = crate::config::default_schema();
        let err = OnnxModel::load(Path::new("nonexistent.onnx"), schema, 1)
            .err()
            .unwrap();
        assert!(matches!(err, PatrolError::ModelUnavailable(_)));
    }
}
