//! Maps a risk score plus deterministic overrides to PASS or LOCK.

use super::overrides::{HardBlock, Overrides};
use crate::error::{PatrolError, Result};
use crate::model::RiskScore;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Calibrated cut point in [0, 1]. Scores at or above it LOCK.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct Threshold(f64);

impl Threshold {
    pub fn new(value: f64) -> Result<Self> {
        if value.is_finite() && (0.0..=1.0).contains(&value) {
            Ok(Self(value))
        } else {
            Err(PatrolError::Config(format!(
                "threshold must be between 0 and 1, got {}",
                value
            )))
        }
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Pass,
    Lock,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Pass => "PASS",
            Action::Lock => "LOCK",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the policy chose its action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum DecisionReason {
    /// A hard block fired; the score was not consulted.
    Override { blocks: Vec<HardBlock> },
    AtOrAboveThreshold,
    BelowThreshold,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub action: Action,
    pub reason: DecisionReason,
}

#[derive(Debug, Clone)]
pub struct DecisionPolicy {
    threshold: Threshold,
}

impl DecisionPolicy {
    pub fn new(threshold: Threshold) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> Threshold {
        self.threshold
    }

    /// Overrides first, then `score >= threshold`. Total over valid inputs.
    pub fn judge(&self, score: RiskScore, overrides: &Overrides) -> Verdict {
        if !overrides.is_empty() {
            return Verdict {
                action: Action::Lock,
                reason: DecisionReason::Override {
                    blocks: overrides.blocks().to_vec(),
                },
            };
        }
        // Equality locks.
        if score.value() >= self.threshold.value() {
            Verdict {
                action: Action::Lock,
                reason: DecisionReason::AtOrAboveThreshold,
            }
        } else {
            Verdict {
                action: Action::Pass,
                reason: DecisionReason::BelowThreshold,
            }
        }
    }

    pub fn decide(&self, score: RiskScore, overrides: &Overrides) -> Action {
        self.judge(score, overrides).action
    }
}
