//! Risk assessment: independent evaluators, commutative combination,
//! score-to-action ladder, and challenge verification.

use crate::types::{
    AssessmentStore, ChallengeKind, OperationContext, RequiredAction, RiskAssessment, RiskLevel,
};
use chrono::{Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::time::timeout;
use tracing::{debug, warn};
use uuid::Uuid;
use vigil_alerting::{AlertCategory, AlertService};
use vigil_core::audit::{AuditEntry, AuditSink};
use vigil_core::error::{EngineError, Result};
use vigil_core::stores::{SessionStore, TransactionLedger};
use vigil_core::types::{Actor, RiskFactor};
use vigil_device::{DeviceRegistry, DeviceTrustLevel};
use vigil_trust::{TrustScoreEngine, TrustTier};

/// Risk assessor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// IPs denied outright.
    pub blacklisted_ips: HashSet<String>,
    /// Country codes treated as high risk.
    pub high_risk_countries: HashSet<String>,
    /// Maximum plausible travel speed between sessions, km/h.
    pub max_travel_speed_kmh: f64,
    /// Start of the risky night window (inclusive hour, UTC).
    pub night_start_hour: u32,
    /// End of the risky night window (exclusive hour, UTC).
    pub night_end_hour: u32,
    /// Absolute amount above which the large-amount factor applies.
    pub large_amount_threshold: f64,
    /// Score floor for sensitive operations.
    pub sensitive_floor: f64,
    /// Upper bound for each dependency read, in milliseconds. On timeout
    /// the evaluator contributes nothing rather than failing the caller.
    pub dependency_timeout_ms: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            blacklisted_ips: HashSet::new(),
            high_risk_countries: HashSet::new(),
            max_travel_speed_kmh: 900.0,
            night_start_hour: 2,
            night_end_hour: 5,
            large_amount_threshold: 1_000_000.0,
            sensitive_floor: 50.0,
            dependency_timeout_ms: 500,
        }
    }
}

impl AuthConfig {
    /// Add a blacklisted IP.
    #[must_use]
    pub fn with_blacklisted_ip(mut self, ip: impl Into<String>) -> Self {
        self.blacklisted_ips.insert(ip.into());
        self
    }

    /// Add a high-risk country code.
    #[must_use]
    pub fn with_high_risk_country(mut self, country: impl Into<String>) -> Self {
        self.high_risk_countries.insert(country.into());
        self
    }
}

/// Risk-based authentication assessor.
pub struct RiskAssessor {
    devices: Arc<DeviceRegistry>,
    trust: Arc<TrustScoreEngine>,
    ledger: Arc<dyn TransactionLedger>,
    sessions: Arc<dyn SessionStore>,
    alerts: Arc<AlertService>,
    assessments: Arc<dyn AssessmentStore>,
    audit: Arc<dyn AuditSink>,
    config: AuthConfig,
}

impl RiskAssessor {
    /// Create a new assessor.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        devices: Arc<DeviceRegistry>,
        trust: Arc<TrustScoreEngine>,
        ledger: Arc<dyn TransactionLedger>,
        sessions: Arc<dyn SessionStore>,
        alerts: Arc<AlertService>,
        assessments: Arc<dyn AssessmentStore>,
        audit: Arc<dyn AuditSink>,
        config: AuthConfig,
    ) -> Self {
        Self {
            devices,
            trust,
            ledger,
            sessions,
            alerts,
            assessments,
            audit,
            config,
        }
    }

    /// Assess one operation attempt.
    ///
    /// The evaluators are independent and their factors combine by
    /// commutative sum, so concurrent execution order never changes the
    /// result. The assessment is persisted before it is returned.
    pub async fn assess_risk(&self, ctx: &OperationContext) -> Result<RiskAssessment> {
        if ctx.user_id.is_empty() || ctx.session_id.is_empty() {
            return Err(EngineError::validation(
                "user_id and session_id must not be empty",
            ));
        }

        let mut factors = vec![RiskFactor::new(
            "operation_base",
            ctx.operation.base_risk(),
            format!("base risk for {}", ctx.operation),
        )];

        if let Some(factor) = self.time_of_day_factor(ctx) {
            factors.push(factor);
        }

        // Trust adjustment runs first and by itself: an unreachable trust
        // engine with nothing cached fails the assessment closed.
        match self.trust_factors(ctx).await {
            Ok(mut trust_factors) => factors.append(&mut trust_factors),
            Err(err) if matches!(err, EngineError::NotFound { .. }) => return Err(err),
            Err(err) => {
                warn!(user_id = %ctx.user_id, error = %err, "trust unavailable; failing closed");
                factors.push(RiskFactor::new(
                    "trust_unavailable",
                    80.0,
                    "trust score unavailable with no cached snapshot",
                ));
            }
        }

        let budget = StdDuration::from_millis(self.config.dependency_timeout_ms);
        let (device, location, amount, recipient, history) = tokio::join!(
            self.bounded(budget, "device", self.device_factors(ctx)),
            self.bounded(budget, "location", self.location_factors(ctx)),
            self.bounded(budget, "amount", self.amount_factors(ctx)),
            self.bounded(budget, "recipient", self.recipient_factors(ctx)),
            self.bounded(budget, "history", self.history_factors(ctx)),
        );
        for mut evaluated in [device, location, amount, recipient, history] {
            factors.append(&mut evaluated);
        }

        let mut risk_score: f64 = factors.iter().map(|f| f.impact).sum();
        risk_score = risk_score.clamp(0.0, 100.0);
        if ctx.operation.is_sensitive() {
            risk_score = risk_score.max(self.config.sensitive_floor);
        }

        let required_action = RequiredAction::from_score(risk_score);
        let assessment = RiskAssessment {
            id: Uuid::new_v4(),
            user_id: ctx.user_id.clone(),
            session_id: ctx.session_id.clone(),
            operation: ctx.operation,
            risk_score,
            risk_level: RiskLevel::from(risk_score),
            required_action,
            risk_factors: factors,
            cooldown_minutes: required_action.cooldown_minutes(),
            challenge_completed: false,
            created_at: Utc::now(),
        };

        // Audit-first: the record exists before the caller sees the verdict.
        self.assessments.insert(assessment.clone()).await?;
        self.audit
            .record(
                AuditEntry::new(
                    Actor::user(&ctx.user_id),
                    "assess_risk",
                    format!("operation/{}", ctx.operation),
                )
                .with_description(format!(
                    "score {risk_score:.0}, action {required_action:?}"
                )),
            )
            .await?;

        debug!(
            user_id = %ctx.user_id,
            operation = %ctx.operation,
            score = risk_score,
            action = ?required_action,
            "risk assessed"
        );
        Ok(assessment)
    }

    /// Verify a step-up challenge response against the most recent
    /// assessment for the session and mark it completed. Does not
    /// re-derive risk.
    pub async fn verify_challenge(
        &self,
        user_id: &str,
        session_id: &str,
        challenge: ChallengeKind,
        response: &str,
    ) -> Result<RiskAssessment> {
        if response.trim().is_empty() {
            return Err(EngineError::validation("challenge response is empty"));
        }

        let assessment = self
            .assessments
            .latest_for_session(user_id, session_id)
            .await?
            .ok_or_else(|| EngineError::not_found("risk assessment", session_id))?;

        match assessment.required_action.expected_challenge() {
            Some(expected) if expected == challenge => {}
            Some(expected) => {
                return Err(EngineError::validation(format!(
                    "assessment expects a {expected:?} challenge, got {challenge:?}"
                )));
            }
            None => {
                return Err(EngineError::validation(format!(
                    "assessment with action {:?} takes no challenge",
                    assessment.required_action
                )));
            }
        }

        let completed = self.assessments.mark_completed(assessment.id).await?;
        self.audit
            .record(
                AuditEntry::new(
                    Actor::user(user_id),
                    "verify_challenge",
                    format!("assessment/{}", assessment.id),
                )
                .with_description(format!("{challenge:?} challenge completed")),
            )
            .await?;
        Ok(completed)
    }

    // ------------------------------------------------------------------
    // Evaluators
    // ------------------------------------------------------------------

    /// Run one evaluator with an upper-bound timeout; timeouts and errors
    /// degrade to no contribution.
    async fn bounded<F>(&self, budget: StdDuration, name: &str, fut: F) -> Vec<RiskFactor>
    where
        F: std::future::Future<Output = Result<Vec<RiskFactor>>>,
    {
        match timeout(budget, fut).await {
            Ok(Ok(factors)) => factors,
            Ok(Err(err)) => {
                warn!(evaluator = %name, error = %err, "evaluator failed, contributing zero");
                Vec::new()
            }
            Err(_) => {
                warn!(evaluator = %name, "evaluator timed out, contributing zero");
                Vec::new()
            }
        }
    }

    fn time_of_day_factor(&self, ctx: &OperationContext) -> Option<RiskFactor> {
        let hour = ctx.timestamp.hour();
        if (self.config.night_start_hour..self.config.night_end_hour).contains(&hour) {
            Some(RiskFactor::new(
                "night_activity",
                10.0,
                format!("operation at {hour:02}:00 UTC"),
            ))
        } else {
            None
        }
    }

    async fn trust_factors(&self, ctx: &OperationContext) -> Result<Vec<RiskFactor>> {
        let snapshot = self.trust.get_score(&ctx.user_id).await?;
        let (impact, detail) = match snapshot.tier {
            TrustTier::Elite => (-20.0, "elite trust tier"),
            TrustTier::High => (-10.0, "high trust tier"),
            TrustTier::Medium => (0.0, "medium trust tier"),
            TrustTier::Low => (15.0, "low trust tier"),
            TrustTier::Critical => (30.0, "critical trust tier"),
        };
        if impact == 0.0 {
            return Ok(Vec::new());
        }
        Ok(vec![RiskFactor::new("trust_tier", impact, detail)])
    }

    async fn device_factors(&self, ctx: &OperationContext) -> Result<Vec<RiskFactor>> {
        let Some(ref fingerprint) = ctx.device_fingerprint else {
            return Ok(vec![RiskFactor::new(
                "device_missing",
                25.0,
                "no device signals supplied",
            )]);
        };

        let record = match self.devices.device(&ctx.user_id, fingerprint).await {
            Ok(record) => record,
            Err(EngineError::NotFound { .. }) => {
                return Ok(vec![RiskFactor::new(
                    "device_unknown",
                    25.0,
                    "device never registered for this user",
                )]);
            }
            Err(err) => return Err(err),
        };

        let mut factors = Vec::new();
        if record.is_blocked {
            factors.push(RiskFactor::new("device_blocked", 100.0, "device is blocked"));
            return Ok(factors);
        }
        match record.trust_level {
            DeviceTrustLevel::New => {
                factors.push(RiskFactor::new("device_new", 20.0, "first sightings of device"));
            }
            DeviceTrustLevel::Untrusted => {
                factors.push(RiskFactor::new("device_untrusted", 40.0, "device untrusted"));
            }
            DeviceTrustLevel::Trusted => {
                factors.push(RiskFactor::new("device_trusted", -10.0, "trusted device"));
            }
            DeviceTrustLevel::Known => {}
        }
        if record.is_emulator || record.is_rooted {
            factors.push(RiskFactor::new(
                "device_integrity",
                30.0,
                "emulator or rooted device",
            ));
        }
        Ok(factors)
    }

    async fn location_factors(&self, ctx: &OperationContext) -> Result<Vec<RiskFactor>> {
        // A blacklisted IP short-circuits every other location check.
        if self.config.blacklisted_ips.contains(&ctx.ip) {
            return Ok(vec![RiskFactor::new(
                "ip_blacklisted",
                50.0,
                format!("IP {} is blacklisted", ctx.ip),
            )]);
        }

        let mut factors = Vec::new();
        if ctx.is_vpn_or_proxy {
            factors.push(RiskFactor::new("vpn_or_proxy", 20.0, "VPN or proxy IP"));
        }
        if let Some(ref country) = ctx.ip_country {
            if self.config.high_risk_countries.contains(country) {
                factors.push(RiskFactor::new(
                    "high_risk_country",
                    40.0,
                    format!("IP resolves to {country}"),
                ));
            }
        }

        if let Some(current) = ctx.geo {
            if let Some(last) = self.sessions.last_session(&ctx.user_id).await? {
                if let Some(previous) = last.geo {
                    let distance = current.distance_km(&previous);
                    let hours =
                        (ctx.timestamp - last.started_at).num_seconds() as f64 / 3600.0;
                    let impossible = if hours <= 0.0 {
                        distance > 50.0
                    } else {
                        distance / hours > self.config.max_travel_speed_kmh
                    };
                    if impossible {
                        factors.push(RiskFactor::new(
                            "impossible_travel",
                            35.0,
                            format!("{distance:.0} km since the last session"),
                        ));
                    }
                }
            }
        }

        Ok(factors)
    }

    async fn amount_factors(&self, ctx: &OperationContext) -> Result<Vec<RiskFactor>> {
        let Some(amount) = ctx.amount else {
            return Ok(Vec::new());
        };

        let mut factors = Vec::new();
        let stats = self.ledger.lifetime_stats(&ctx.user_id).await?;
        if stats.completed > 0 {
            let average = stats.total_volume / stats.completed as f64;
            if average > 0.0 {
                let multiple = amount / average;
                if multiple >= 5.0 {
                    factors.push(RiskFactor::new(
                        "amount_far_above_average",
                        30.0,
                        format!("{multiple:.1}x the user's average"),
                    ));
                } else if multiple >= 3.0 {
                    factors.push(RiskFactor::new(
                        "amount_above_average",
                        15.0,
                        format!("{multiple:.1}x the user's average"),
                    ));
                }
            }
        }
        if amount >= self.config.large_amount_threshold {
            factors.push(RiskFactor::new(
                "amount_large_absolute",
                20.0,
                format!("amount {amount:.2}"),
            ));
        }
        Ok(factors)
    }

    async fn recipient_factors(&self, ctx: &OperationContext) -> Result<Vec<RiskFactor>> {
        let Some(ref recipient) = ctx.recipient_id else {
            return Ok(Vec::new());
        };

        let since = Utc::now() - Duration::days(180);
        let history = self.ledger.transactions_since(&ctx.user_id, since).await?;
        let seen = history
            .iter()
            .filter(|tx| tx.recipient_id.as_deref() == Some(recipient.as_str()))
            .count();

        let factor = if seen >= 3 {
            RiskFactor::new(
                "recipient_frequent",
                -10.0,
                format!("{seen} prior transfers to this recipient"),
            )
        } else if seen == 0 {
            RiskFactor::new("recipient_first_time", 20.0, "first transfer to recipient")
        } else {
            return Ok(Vec::new());
        };
        Ok(vec![factor])
    }

    async fn history_factors(&self, ctx: &OperationContext) -> Result<Vec<RiskFactor>> {
        let mut factors = Vec::new();
        let now = Utc::now();

        let last_hour = self
            .ledger
            .transactions_since(&ctx.user_id, now - Duration::hours(1))
            .await?;
        if last_hour.len() >= 10 {
            factors.push(RiskFactor::new(
                "operation_burst",
                25.0,
                format!("{} operations in the last hour", last_hour.len()),
            ));
        } else if last_hour.len() >= 5 {
            factors.push(RiskFactor::new(
                "operation_elevated",
                10.0,
                format!("{} operations in the last hour", last_hour.len()),
            ));
        }

        let failed_logins = self
            .sessions
            .failed_logins_since(&ctx.user_id, now - Duration::hours(24))
            .await?;
        if failed_logins >= 3 {
            factors.push(RiskFactor::new(
                "recent_failed_logins",
                15.0,
                format!("{failed_logins} failed logins in 24h"),
            ));
        }

        if self
            .alerts
            .has_open_alert(AlertCategory::Fraud, &ctx.user_id)
            .await
        {
            factors.push(RiskFactor::new(
                "open_fraud_alert",
                30.0,
                "unresolved fraud alert on the account",
            ));
        }

        Ok(factors)
    }
}
