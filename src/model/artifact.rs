//! JSON model artifact: embedded schema plus a logistic or gradient-boosted tree estimator.
//!
//! Tree ensembles follow the XGBoost dump layout: node 0 is the root, a split sends
//! `value < threshold` to `yes` and everything else to `no`, and the leaf sum plus
//! `base_margin` goes through the logistic link.

use super::{check_schema, sigmoid, ModelInfo, RiskModel, RiskScore};
use crate::error::{PatrolError, Result};
use crate::features::schema::sha256_hex;
use crate::features::{FeatureSchema, FeatureVector};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TreeNode {
    Split {
        split: usize,
        threshold: f64,
        yes: usize,
        no: usize,
    },
    Leaf {
        leaf: f64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tree {
    pub nodes: Vec<TreeNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Estimator {
    Logistic {
        intercept: f64,
        coefficients: Vec<f64>,
        /// Standardisation applied before the dot product; absent means identity.
        #[serde(default)]
        mean: Option<Vec<f64>>,
        #[serde(default)]
        scale: Option<Vec<f64>>,
    },
    TreeEnsemble {
        #[serde(default)]
        base_margin: f64,
        trees: Vec<Tree>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Artifact {
    version: String,
    schema: FeatureSchema,
    estimator: Estimator,
}

/// Bound on a single logistic term. Far past where the logistic link saturates, so
/// clamping never moves a score, but a sum of clamped terms cannot overflow.
const TERM_LIMIT: f64 = 1e12;

pub struct ArtifactModel {
    info: ModelInfo,
    schema: FeatureSchema,
    estimator: Estimator,
}

fn unavailable(msg: impl Into<String>) -> PatrolError {
    PatrolError::ModelUnavailable(msg.into())
}

impl ArtifactModel {
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| unavailable(format!("{}: {}", path.display(), e)))?;
        Self::from_slice(&bytes)
            .map_err(|e| unavailable(format!("{}: {}", path.display(), e)))
    }

    /// Parse and validate artifact bytes; the digest covers the bytes as given.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let artifact: Artifact = serde_json::from_slice(bytes).map_err(|e| unavailable(e.to_string()))?;
        artifact.schema.validate().map_err(|e| unavailable(e.to_string()))?;
        validate_estimator(&artifact.estimator, artifact.schema.len())?;
        let kind = match artifact.estimator {
            Estimator::Logistic { .. } => "logistic",
            Estimator::TreeEnsemble { .. } => "tree_ensemble",
        };
        Ok(Self {
            info: ModelInfo {
                version: artifact.version,
                kind: kind.to_string(),
                digest: sha256_hex(bytes),
            },
            schema: artifact.schema,
            estimator: artifact.estimator,
        })
    }

    fn margin(&self, x: &[f64]) -> f64 {
        match &self.estimator {
            Estimator::Logistic {
                intercept,
                coefficients,
                mean,
                scale,
            } => {
                let mut z = *intercept;
                for (i, (value, coef)) in x.iter().zip(coefficients).enumerate() {
                    if *coef == 0.0 {
                        continue;
                    }
                    let centred = value - mean.as_ref().map_or(0.0, |m| m[i]);
                    let scaled = centred / scale.as_ref().map_or(1.0, |s| s[i]);
                    // Finite inputs can still overflow to ±inf here; inf - inf would be NaN.
                    z += (coef * scaled).clamp(-TERM_LIMIT, TERM_LIMIT);
                }
                z
            }
            Estimator::TreeEnsemble { base_margin, trees } => {
                base_margin + trees.iter().map(|t| eval_tree(t, x)).sum::<f64>()
            }
        }
    }
}

fn eval_tree(tree: &Tree, x: &[f64]) -> f64 {
    // Validation guarantees children sit after their parent, so this terminates.
    let mut idx = 0;
    loop {
        match &tree.nodes[idx] {
            TreeNode::Leaf { leaf } => return *leaf,
            TreeNode::Split {
                split,
                threshold,
                yes,
                no,
            } => {
                idx = if x[*split] < *threshold { *yes } else { *no };
            }
        }
    }
}

fn validate_estimator(estimator: &Estimator, dim: usize) -> Result<()> {
    match estimator {
        Estimator::Logistic {
            intercept,
            coefficients,
            mean,
            scale,
        } => {
            if coefficients.len() != dim {
                return Err(unavailable(format!(
                    "{} coefficients for {} features",
                    coefficients.len(),
                    dim
                )));
            }
            if let Some(m) = mean {
                if m.len() != dim {
                    return Err(unavailable(format!("{} means for {} features", m.len(), dim)));
                }
            }
            if let Some(s) = scale {
                if s.len() != dim {
                    return Err(unavailable(format!("{} scales for {} features", s.len(), dim)));
                }
                if s.iter().any(|v| *v == 0.0 || !v.is_finite()) {
                    return Err(unavailable("scale contains zero or non-finite entry"));
                }
            }
            let all_finite = std::iter::once(intercept)
                .chain(coefficients)
                .chain(mean.iter().flatten())
                .all(|v| v.is_finite());
            if !all_finite {
                return Err(unavailable("logistic parameters must be finite"));
            }
        }
        Estimator::TreeEnsemble { base_margin, trees } => {
            if !base_margin.is_finite() {
                return Err(unavailable("base_margin must be finite"));
            }
            if trees.is_empty() {
                return Err(unavailable("tree ensemble has no trees"));
            }
            for (t, tree) in trees.iter().enumerate() {
                if tree.nodes.is_empty() {
                    return Err(unavailable(format!("tree {} is empty", t)));
                }
                for (i, node) in tree.nodes.iter().enumerate() {
                    match node {
                        TreeNode::Leaf { leaf } if !leaf.is_finite() => {
                            return Err(unavailable(format!("tree {} node {}: leaf not finite", t, i)));
                        }
                        TreeNode::Split {
                            split,
                            threshold,
                            yes,
                            no,
                        } => {
                            if *split >= dim {
                                return Err(unavailable(format!(
                                    "tree {} node {}: splits on feature {} of {}",
                                    t, i, split, dim
                                )));
                            }
                            if threshold.is_nan() {
                                return Err(unavailable(format!("tree {} node {}: NaN threshold", t, i)));
                            }
                            let len = tree.nodes.len();
                            if *yes <= i || *no <= i || *yes >= len || *no >= len {
                                return Err(unavailable(format!(
                                    "tree {} node {}: children {}/{} out of order",
                                    t, i, yes, no
                                )));
                            }
                        }
                        TreeNode::Leaf { .. } => {}
                    }
                }
            }
        }
    }
    Ok(())
}

impl RiskModel for ArtifactModel {
    fn info(&self) -> &ModelInfo {
        &self.info
    }

    fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    fn score(&self, features: &FeatureVector) -> Result<RiskScore> {
        check_schema(&self.schema, features)?;
        RiskScore::new(sigmoid(self.margin(features.as_slice())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{FieldKind, FieldSpec, TransactionId};
    use serde_json::json;

    fn schema_json() -> serde_json::Value {
        json!({
            "version": "t-v1",
            "fields": [
                {"name": "tr_amount_gbp", "kind": "numeric"},
                {"name": "tr_currency", "kind": {"categorical": {"levels": ["EUR", "GBP"]}}, "default": 1.0}
            ]
        })
    }

    fn vector(model: &ArtifactModel, values: Vec<f64>) -> FeatureVector {
        FeatureVector {
            transaction_id: TransactionId::new("t").unwrap(),
            account_id: None,
            schema_fingerprint: model.schema().fingerprint().to_string(),
            values,
            imputed: vec![],
        }
    }

    fn trees() -> ArtifactModel {
        let bytes = serde_json::to_vec(&json!({
            "version": "xgb-test",
            "schema": schema_json(),
            "estimator": {
                "type": "tree_ensemble",
                "base_margin": 0.0,
                "trees": [
                    {"nodes": [
                        {"split": 0, "threshold": 100.0, "yes": 1, "no": 2},
                        {"leaf": -1.0},
                        {"split": 1, "threshold": 0.5, "yes": 3, "no": 4},
                        {"leaf": 2.0},
                        {"leaf": 1.0}
                    ]},
                    {"nodes": [{"leaf": 0.0}]}
                ]
            }
        }))
        .unwrap();
        ArtifactModel::from_slice(&bytes).unwrap()
    }

    #[test]
    fn tree_routing_follows_thresholds() {
        let m = trees();
        assert_eq!(m.info().kind, "tree_ensemble");
        assert_eq!(m.info().digest.len(), 64);
        let low = m.score(&vector(&m, vec![50.0, 0.0])).unwrap();
        assert_eq!(low.value(), sigmoid(-1.0));
        let eur = m.score(&vector(&m, vec![500.0, 0.0])).unwrap();
        assert_eq!(eur.value(), sigmoid(2.0));
        let gbp = m.score(&vector(&m, vec![500.0, 1.0])).unwrap();
        assert_eq!(gbp.value(), sigmoid(1.0));
        // Equality goes right, as in XGBoost.
        let edge = m.score(&vector(&m, vec![100.0, 1.0])).unwrap();
        assert_eq!(edge.value(), sigmoid(1.0));
    }

    #[test]
    fn logistic_with_standardisation() {
        let bytes = serde_json::to_vec(&json!({
            "version": "lr-test",
            "schema": schema_json(),
            "estimator": {
                "type": "logistic",
                "intercept": -1.0,
                "coefficients": [2.0, 0.5],
                "mean": [10.0, 0.0],
                "scale": [5.0, 1.0]
            }
        }))
        .unwrap();
        let m = ArtifactModel::from_slice(&bytes).unwrap();
        let s = m.score(&vector(&m, vec![15.0, 1.0])).unwrap();
        // -1 + 2 * (15 - 10) / 5 + 0.5 * 1 = 1.5
        assert_eq!(s.value(), sigmoid(1.5));
    }

    #[test]
    fn extreme_inputs_saturate() {
        let bytes = serde_json::to_vec(&json!({
            "version": "lr-extreme",
            "schema": schema_json(),
            "estimator": {"type": "logistic", "intercept": 0.0, "coefficients": [10.0, -10.0]}
        }))
        .unwrap();
        let m = ArtifactModel::from_slice(&bytes).unwrap();
        // Both terms overflow, in opposite directions.
        let both = m.score(&vector(&m, vec![1e308, 1e308])).unwrap();
        assert_eq!(both.value(), 0.5);
        let one = m.score(&vector(&m, vec![1e308, 0.0])).unwrap();
        assert_eq!(one.value(), 1.0);
        let ordinary = m.score(&vector(&m, vec![0.1, 0.0])).unwrap();
        assert_eq!(ordinary.value(), sigmoid(1.0));
    }

    #[test]
    fn zero_coefficient_ignores_overflowing_feature() {
        let bytes = serde_json::to_vec(&json!({
            "version": "lr-zero",
            "schema": schema_json(),
            "estimator": {
                "type": "logistic",
                "intercept": 0.5,
                "coefficients": [0.0, 1.0],
                "mean": [-1e308, 0.0]
            }
        }))
        .unwrap();
        let m = ArtifactModel::from_slice(&bytes).unwrap();
        let s = m.score(&vector(&m, vec![1e308, 0.0])).unwrap();
        assert_eq!(s.value(), sigmoid(0.5));
    }

    #[test]
    fn scoring_is_deterministic() {
        let m = trees();
        let fv = vector(&m, vec![250.0, 1.0]);
        let first = m.score(&fv).unwrap();
        for _ in 0..10 {
            assert_eq!(m.score(&fv).unwrap(), first);
        }
    }

    #[test]
    fn wrong_arity_is_schema_mismatch() {
        let m = trees();
        let short = vector(&m, vec![250.0]);
        assert!(matches!(m.score(&short), Err(PatrolError::SchemaMismatch(_))));
        let long = vector(&m, vec![250.0, 1.0, 3.0]);
        assert!(matches!(m.score(&long), Err(PatrolError::SchemaMismatch(_))));
    }

    #[test]
    fn foreign_schema_is_schema_mismatch() {
        let m = trees();
        let other = FeatureSchema::new(
            "other",
            vec![
                FieldSpec {
                    name: "a".into(),
                    kind: FieldKind::Numeric,
                    default: None,
                },
                FieldSpec {
                    name: "b".into(),
                    kind: FieldKind::Numeric,
                    default: None,
                },
            ],
        );
        let mut fv = vector(&m, vec![1.0, 1.0]);
        fv.schema_fingerprint = other.fingerprint().to_string();
        assert!(matches!(m.score(&fv), Err(PatrolError::SchemaMismatch(_))));
    }

    #[test]
    fn malformed_artifacts_are_unavailable() {
        let cyclic = serde_json::to_vec(&json!({
            "version": "bad",
            "schema": schema_json(),
            "estimator": {"type": "tree_ensemble", "trees": [{"nodes": [
                {"split": 0, "threshold": 1.0, "yes": 0, "no": 1},
                {"leaf": 0.0}
            ]}]}
        }))
        .unwrap();
        assert!(matches!(
            ArtifactModel::from_slice(&cyclic),
            Err(PatrolError::ModelUnavailable(_))
        ));

        let short = serde_json::to_vec(&json!({
            "version": "bad",
            "schema": schema_json(),
            "estimator": {"type": "logistic", "intercept": 0.0, "coefficients": [1.0]}
        }))
        .unwrap();
        assert!(matches!(
            ArtifactModel::from_slice(&short),
            Err(PatrolError::ModelUnavailable(_))
        ));

        assert!(ArtifactModel::from_slice(b"not json").is_err());
    }
}
