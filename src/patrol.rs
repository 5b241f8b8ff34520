//! Orchestrator: identifier → features → score → action.
//!
//! A `Patrol` owns the loaded model, the resolver handle and the policy. It holds no
//! per-call state, so one instance behind an `Arc` serves concurrent callers. The
//! only state it ever records is the first configuration fault, after which every
//! call fails with that fault until a valid model is installed.

use crate::config::{FeatureSource, PatrolConfig};
use crate::error::{PatrolError, Result};
use crate::features::{FeatureResolver, FeatureSchema, FeatureTable, SqliteFeatureStore, TransactionId};
use crate::model::{load_model, ModelInfo, RiskModel};
use crate::risk::{
    Action, DecisionPolicy, DecisionReason, DenyList, OverrideSource, Overrides, Threshold,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::OnceLock;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Auditable outcome of one evaluation.
#[derive(Debug, Clone, Serialize)]
pub struct Decision {
    pub decision_id: Uuid,
    pub transaction_id: TransactionId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    pub action: Action,
    pub score: f64,
    pub threshold: f64,
    pub reason: DecisionReason,
    pub model_version: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub imputed: Vec<String>,
    pub decided_at: DateTime<Utc>,
}

pub struct Patrol {
    resolver: Box<dyn FeatureResolver>,
    model: Box<dyn RiskModel>,
    policy: DecisionPolicy,
    overrides: Option<Box<dyn OverrideSource>>,
    fault: OnceLock<PatrolError>,
}

fn ensure_compatible(resolver: &FeatureSchema, model: &dyn RiskModel) -> Result<()> {
    if resolver.fingerprint() != model.schema().fingerprint() {
        return Err(PatrolError::SchemaMismatch(format!(
            "resolver schema {} ({}) does not match model {} schema {} ({})",
            resolver.version,
            resolver.fingerprint(),
            model.info().version,
            model.schema().version,
            model.schema().fingerprint()
        )));
    }
    Ok(())
}

impl Patrol {
    /// Resolver and model must agree on the schema; a mismatch here is fatal at startup.
    pub fn new(
        resolver: Box<dyn FeatureResolver>,
        model: Box<dyn RiskModel>,
        policy: DecisionPolicy,
    ) -> Result<Self> {
        ensure_compatible(resolver.schema(), model.as_ref())?;
        Ok(Self {
            resolver,
            model,
            policy,
            overrides: None,
            fault: OnceLock::new(),
        })
    }

    pub fn with_overrides(mut self, source: Box<dyn OverrideSource>) -> Self {
        self.overrides = Some(source);
        self
    }

    /// Build the engine described by `config`: model, schema, resolver, policy, deny list.
    pub fn from_config(config: &PatrolConfig) -> Result<Self> {
        let threshold = Threshold::new(config.policy.threshold)?;
        let schema_file = config
            .features
            .schema_path
            .as_deref()
            .map(FeatureSchema::load)
            .transpose()?;
        let model = load_model(&config.model, schema_file)?;
        let schema = model.schema().clone();

        let resolver: Box<dyn FeatureResolver> = match &config.features.source {
            FeatureSource::Table { path } => Box::new(FeatureTable::load(
                path,
                schema,
                &config.features.id_field,
                config.features.account_field.clone(),
            )?),
            FeatureSource::Sqlite { path } => Box::new(
                SqliteFeatureStore::open_read_only(path, schema, config.runtime.workers)?
                    .with_account_field(config.features.account_field.clone()),
            ),
        };

        let mut patrol = Self::new(resolver, model, DecisionPolicy::new(threshold))?;
        if let Some(hard_block) = &config.policy.hard_block {
            patrol = patrol.with_overrides(Box::new(DenyList::from_config(hard_block)?));
        }
        info!(
            threshold = threshold.value(),
            model_version = %patrol.model.info().version,
            schema = %patrol.model.schema().version,
            "patrol ready"
        );
        Ok(patrol)
    }

    pub fn threshold(&self) -> Threshold {
        self.policy.threshold()
    }

    pub fn model_info(&self) -> &ModelInfo {
        self.model.info()
    }

    pub fn set_threshold(&mut self, threshold: Threshold) {
        info!(
            from = self.policy.threshold().value(),
            to = threshold.value(),
            "threshold updated"
        );
        self.policy = DecisionPolicy::new(threshold);
    }

    /// Install a new model and clear a latched fault. The model must match the resolver schema.
    pub fn reload_model(&mut self, model: Box<dyn RiskModel>) -> Result<()> {
        ensure_compatible(self.resolver.schema(), model.as_ref())?;
        info!(
            from = %self.model.info().version,
            to = %model.info().version,
            "risk model reloaded"
        );
        self.model = model;
        self.fault = OnceLock::new();
        Ok(())
    }

    /// Swap the feature source, e.g. a fresh export or a store with a new column layout.
    /// The new resolver must match the model schema; on success a latched fault is cleared.
    pub fn set_resolver(&mut self, resolver: Box<dyn FeatureResolver>) -> Result<()> {
        ensure_compatible(resolver.schema(), self.model.as_ref())?;
        info!(schema = %resolver.schema().version, "feature resolver replaced");
        self.resolver = resolver;
        self.fault = OnceLock::new();
        Ok(())
    }

    /// The latched configuration fault, if any.
    pub fn fault(&self) -> Option<&PatrolError> {
        self.fault.get()
    }

    pub fn evaluate(&self, transaction_id: &str) -> Result<Action> {
        self.evaluate_with(transaction_id, &Overrides::none())
    }

    pub fn evaluate_with(&self, transaction_id: &str, overrides: &Overrides) -> Result<Action> {
        self.assess(transaction_id, overrides).map(|d| d.action)
    }

    /// Full evaluation with caller-supplied overrides merged into the standing ones.
    pub fn assess(&self, transaction_id: &str, overrides: &Overrides) -> Result<Decision> {
        if let Some(fault) = self.fault.get() {
            return Err(fault.clone());
        }
        self.run(transaction_id, overrides).map_err(|e| self.record(transaction_id, e))
    }

    fn run(&self, transaction_id: &str, caller: &Overrides) -> Result<Decision> {
        let id = TransactionId::new(transaction_id)?;
        let features = self.resolver.resolve(&id)?;
        let score = self.model.score(&features)?;

        let mut overrides = caller.clone();
        if let Some(source) = &self.overrides {
            overrides.merge(source.lookup(&id, features.account_id.as_deref()));
        }
        let verdict = self.policy.judge(score, &overrides);

        let decision = Decision {
            decision_id: Uuid::new_v4(),
            transaction_id: id,
            account_id: features.account_id,
            action: verdict.action,
            score: score.value(),
            threshold: self.policy.threshold().value(),
            reason: verdict.reason,
            model_version: self.model.info().version.clone(),
            imputed: features.imputed,
            decided_at: Utc::now(),
        };
        info!(
            decision_id = %decision.decision_id,
            transaction_id = %decision.transaction_id,
            action = %decision.action,
            score = decision.score,
            threshold = decision.threshold,
            reason = ?decision.reason,
            model_version = %decision.model_version,
            "transaction decided"
        );
        Ok(decision)
    }

    fn record(&self, transaction_id: &str, e: PatrolError) -> PatrolError {
        if e.is_fatal() {
            error!(transaction_id, error = %e, "configuration fault; refusing further decisions");
            let _ = self.fault.set(e.clone());
        } else {
            warn!(transaction_id, error = %e, "no decision");
        }
        e
    }
}
