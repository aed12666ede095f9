//! Ensemble combination, confidence, decision, and persistence.

use crate::models::{
    anomaly_model, deviation_model, pattern_model, rule_model, velocity_model, FraudInputs,
    CRITICAL_FACTORS,
};
use crate::types::{
    EvaluationStore, FraudDecision, FraudEvaluation, ModelScores, RiskLevel, TransactionContext,
};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant};
use tokio::time::timeout;
use tracing::{debug, warn};
use uuid::Uuid;
use vigil_alerting::{AlertCategory, AlertPriority, AlertRequest, AlertService, AlertTarget};
use vigil_behavior::BehaviorEngine;
use vigil_core::audit::{AuditEntry, AuditSeverity, AuditSink};
use vigil_core::error::{EngineError, Result};
use vigil_core::stores::{IdentityStore, SessionStore, TransactionLedger};
use vigil_core::types::{Actor, RiskFactor};
use vigil_device::DeviceRegistry;
use vigil_trust::{TrustScoreEngine, TrustTier};

/// Version tag stamped on every evaluation. Bump when any heuristic or
/// weight changes, so stored evaluations stay reproducible.
pub const MODEL_VERSION: &str = "heuristics-v3";

/// Ensemble weights and thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FraudConfig {
    /// Weight of the anomaly-heuristic model.
    pub anomaly_weight: f64,
    /// Weight of the pattern-heuristic model.
    pub pattern_weight: f64,
    /// Weight of the expert-rules model.
    pub rules_weight: f64,
    /// Weight of the velocity model.
    pub velocity_weight: f64,
    /// Weight of the behavior-deviation model.
    pub deviation_weight: f64,
    /// Confidence share taken from cross-model agreement. Tuning constant,
    /// not an invariant.
    pub agreement_weight: f64,
    /// Confidence share taken from triggered-factor coverage.
    pub coverage_weight: f64,
    /// Score at or above which a companion alert is raised.
    pub alert_threshold: f64,
    /// Amount treated as high for the expert rules.
    pub high_amount_threshold: f64,
    /// IPs denied outright.
    pub blacklisted_ips: HashSet<String>,
    /// Recipients under watch.
    pub watchlisted_recipients: HashSet<String>,
    /// Upper bound for each dependency read, in milliseconds.
    pub dependency_timeout_ms: u64,
}

impl Default for FraudConfig {
    fn default() -> Self {
        Self {
            anomaly_weight: 0.25,
            pattern_weight: 0.30,
            rules_weight: 0.25,
            velocity_weight: 0.10,
            deviation_weight: 0.10,
            agreement_weight: 0.6,
            coverage_weight: 0.4,
            alert_threshold: 60.0,
            high_amount_threshold: 10_000.0,
            blacklisted_ips: HashSet::new(),
            watchlisted_recipients: HashSet::new(),
            dependency_timeout_ms: 500,
        }
    }
}

impl FraudConfig {
    /// Add a blacklisted IP.
    #[must_use]
    pub fn with_blacklisted_ip(mut self, ip: impl Into<String>) -> Self {
        self.blacklisted_ips.insert(ip.into());
        self
    }

    /// Add a watchlisted recipient.
    #[must_use]
    pub fn with_watchlisted_recipient(mut self, recipient: impl Into<String>) -> Self {
        self.watchlisted_recipients.insert(recipient.into());
        self
    }
}

/// Trust-tier multiplier applied to the combined score.
fn tier_multiplier(tier: TrustTier) -> f64 {
    match tier {
        TrustTier::Elite => 0.7,
        TrustTier::High => 0.85,
        TrustTier::Medium => 1.0,
        TrustTier::Low => 1.15,
        TrustTier::Critical => 1.3,
    }
}

/// Fraud evaluation ensemble.
pub struct FraudEnsemble {
    identity: Arc<dyn IdentityStore>,
    ledger: Arc<dyn TransactionLedger>,
    sessions: Arc<dyn SessionStore>,
    trust: Arc<TrustScoreEngine>,
    behavior: Arc<BehaviorEngine>,
    devices: Arc<DeviceRegistry>,
    alerts: Arc<AlertService>,
    evaluations: Arc<dyn EvaluationStore>,
    audit: Arc<dyn AuditSink>,
    config: FraudConfig,
}

impl FraudEnsemble {
    /// Create a new ensemble.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        identity: Arc<dyn IdentityStore>,
        ledger: Arc<dyn TransactionLedger>,
        sessions: Arc<dyn SessionStore>,
        trust: Arc<TrustScoreEngine>,
        behavior: Arc<BehaviorEngine>,
        devices: Arc<DeviceRegistry>,
        alerts: Arc<AlertService>,
        evaluations: Arc<dyn EvaluationStore>,
        audit: Arc<dyn AuditSink>,
        config: FraudConfig,
    ) -> Self {
        Self {
            identity,
            ledger,
            sessions,
            trust,
            behavior,
            devices,
            alerts,
            evaluations,
            audit,
            config,
        }
    }

    /// Evaluate one transaction.
    ///
    /// Deterministic given identical inputs and the same
    /// [`MODEL_VERSION`]; the evaluation is appended to the store and a
    /// companion alert is raised above the alert threshold.
    pub async fn evaluate_transaction(&self, ctx: &TransactionContext) -> Result<FraudEvaluation> {
        if ctx.user_id.is_empty() {
            return Err(EngineError::validation("user_id must not be empty"));
        }
        if ctx.amount <= 0.0 {
            return Err(EngineError::validation("amount must be positive"));
        }

        let started = Instant::now();
        let inputs = self.gather_inputs(ctx).await?;

        // Independent models; ordering must not affect the result.
        let (anomaly, pattern, rules, velocity, deviation) = tokio::join!(
            async { anomaly_model(&inputs) },
            async { pattern_model(&inputs, &self.config) },
            async { rule_model(&inputs, &self.config) },
            async { velocity_model(&inputs) },
            async { deviation_model(&inputs) },
        );

        let model_scores = ModelScores {
            anomaly: anomaly.score,
            pattern: pattern.score,
            rules: rules.score,
            velocity: velocity.score,
            deviation: deviation.score,
        };

        let weighted = model_scores.anomaly * self.config.anomaly_weight
            + model_scores.pattern * self.config.pattern_weight
            + model_scores.rules * self.config.rules_weight
            + model_scores.velocity * self.config.velocity_weight
            + model_scores.deviation * self.config.deviation_weight;

        let tier = inputs
            .trust_tier
            .unwrap_or(TrustTier::Medium);
        let fraud_score = (weighted * tier_multiplier(tier)).clamp(0.0, 100.0);

        let mut risk_factors: Vec<RiskFactor> = Vec::new();
        for model in [anomaly, pattern, rules, velocity, deviation] {
            risk_factors.extend(model.factors);
        }

        let confidence = self.confidence(&model_scores, &risk_factors);

        let mut decision = FraudDecision::from_score(fraud_score);
        let critical = risk_factors
            .iter()
            .find(|f| CRITICAL_FACTORS.contains(&f.name.as_str()));
        if let Some(factor) = critical {
            if decision < FraudDecision::Decline {
                debug!(factor = %factor.name, "critical factor forces decline");
                decision = FraudDecision::Decline;
            }
        }

        let evaluation = FraudEvaluation {
            id: Uuid::new_v4(),
            user_id: ctx.user_id.clone(),
            transaction_id: ctx.transaction_id.clone(),
            fraud_score,
            risk_level: RiskLevel::from(fraud_score),
            confidence,
            decision,
            risk_factors,
            model_scores,
            model_version: MODEL_VERSION.to_string(),
            processing_ms: started.elapsed().as_millis() as u64,
            evaluated_at: Utc::now(),
        };

        self.evaluations.insert(evaluation.clone()).await?;
        self.audit
            .record(
                AuditEntry::new(
                    Actor::system("fraud_ensemble"),
                    "evaluate_transaction",
                    format!("user/{}", ctx.user_id),
                )
                .with_severity(if decision.is_blocking() {
                    AuditSeverity::Critical
                } else {
                    AuditSeverity::Info
                })
                .with_description(format!(
                    "score {fraud_score:.0}, confidence {confidence:.0}, decision {decision}"
                )),
            )
            .await?;

        if fraud_score >= self.config.alert_threshold {
            let priority = if fraud_score >= 80.0 {
                AlertPriority::Critical
            } else {
                AlertPriority::High
            };
            self.alerts
                .create_alert(
                    AlertRequest::new(
                        AlertCategory::Fraud,
                        priority,
                        format!("Fraud score {fraud_score:.0} on {}", ctx.kind),
                        format!(
                            "transaction of {:.2} {} scored {fraud_score:.0} ({decision})",
                            ctx.amount, ctx.currency
                        ),
                        AlertTarget::User(ctx.user_id.clone()),
                        "fraud_ensemble",
                    )
                    .with_source_id(evaluation.id.to_string()),
                )
                .await?;
        }

        debug!(
            user_id = %ctx.user_id,
            score = fraud_score,
            decision = %decision,
            processing_ms = evaluation.processing_ms,
            "transaction evaluated"
        );
        Ok(evaluation)
    }

    /// Gather model inputs concurrently with bounded reads. A store that
    /// misses its deadline degrades to the last-known value (here: none);
    /// only a missing user fails the evaluation, and a total blackout
    /// with no fallback fails closed at the caller via `Hold`.
    async fn gather_inputs(&self, ctx: &TransactionContext) -> Result<GatheredInputs> {
        let budget = StdDuration::from_millis(self.config.dependency_timeout_ms);
        let since = ctx.timestamp - Duration::days(30);
        let day_ago = ctx.timestamp - Duration::hours(24);

        let (identity, trust, profile, device, recent, stats, failed_logins) = tokio::join!(
            timeout(budget, self.identity.identity(&ctx.user_id)),
            timeout(budget, self.trust.get_score(&ctx.user_id)),
            timeout(budget, self.behavior.get_or_build(&ctx.user_id)),
            async {
                match ctx.device_fingerprint {
                    Some(ref fp) => timeout(budget, self.devices.device(&ctx.user_id, fp)).await,
                    None => Ok(Err(EngineError::not_found("device", "none supplied"))),
                }
            },
            timeout(budget, self.ledger.transactions_since(&ctx.user_id, since)),
            timeout(budget, self.ledger.lifetime_stats(&ctx.user_id)),
            timeout(budget, self.sessions.failed_logins_since(&ctx.user_id, day_ago)),
        );

        let identity = match identity {
            Ok(Ok(Some(record))) => Some(record),
            Ok(Ok(None)) => {
                return Err(EngineError::not_found("user", &ctx.user_id));
            }
            Ok(Err(err)) => {
                warn!(user_id = %ctx.user_id, error = %err, "identity read failed");
                None
            }
            Err(_) => {
                warn!(user_id = %ctx.user_id, "identity read timed out");
                None
            }
        };

        let trust_tier = degraded(trust, "trust").map(|s| s.tier);
        let profile = degraded(profile, "behavior profile");
        let device = degraded(device, "device");
        let recent = degraded(recent, "recent transactions").unwrap_or_default();
        let stats = degraded(stats, "ledger stats").unwrap_or_default();
        let failed_logins = degraded(failed_logins, "failed logins").unwrap_or(0);

        // First-ever evaluation with nothing to score on: fail closed.
        if identity.is_none() && trust_tier.is_none() && profile.is_none() {
            return Err(EngineError::unavailable(
                "no identity, trust, or behavioral inputs available; failing closed",
            ));
        }

        Ok(GatheredInputs {
            inputs: FraudInputs {
                ctx: ctx.clone(),
                identity,
                profile,
                device,
                recent,
                stats,
                failed_logins,
            },
            trust_tier,
        })
    }

    /// Confidence from cross-model agreement and triggered-factor
    /// coverage. The split between the two is a tuning constant carried
    /// in config.
    fn confidence(&self, scores: &ModelScores, factors: &[RiskFactor]) -> f64 {
        let values = scores.as_array();
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        let variance =
            values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
        // Standard deviation of 50 across models means no agreement at all.
        let agreement = (100.0 - variance.sqrt() * 2.0).clamp(0.0, 100.0);

        let triggered = factors.iter().filter(|f| f.impact > 0.0).count() as f64;
        let coverage = (triggered * 20.0).clamp(0.0, 100.0);

        (agreement * self.config.agreement_weight + coverage * self.config.coverage_weight)
            .clamp(0.0, 100.0)
    }
}

struct GatheredInputs {
    inputs: FraudInputs,
    trust_tier: Option<TrustTier>,
}

impl std::ops::Deref for GatheredInputs {
    type Target = FraudInputs;

    fn deref(&self) -> &FraudInputs {
        &self.inputs
    }
}

fn degraded<T>(
    outcome: std::result::Result<Result<T>, tokio::time::error::Elapsed>,
    what: &str,
) -> Option<T> {
    match outcome {
        Ok(Ok(value)) => Some(value),
        Ok(Err(err)) => {
            if !matches!(err, EngineError::NotFound { .. }) {
                warn!(dependency = %what, error = %err, "dependency read failed, degrading");
            }
            None
        }
        Err(_) => {
            warn!(dependency = %what, "dependency read timed out, degrading");
            None
        }
    }
}
