//! The five ensemble models.
//!
//! Each model is a deterministic function from gathered inputs to a
//! clamped [0, 100] score plus named factors. Inputs a model needs but
//! does not have simply keep it quiet; a missing profile never fails an
//! evaluation.

use crate::ensemble::FraudConfig;
use crate::types::{ModelScore, TransactionContext};
use chrono::{Duration, Timelike, Utc};
use vigil_behavior::{detect_anomalies, BehaviorProfile, LiveEvent};
use vigil_core::stores::{
    IdentityRecord, KycStatus, LedgerStats, LedgerTransaction, TransactionStatus,
};
use vigil_core::types::RiskFactor;
use vigil_device::{DeviceRecord, DeviceTrustLevel};

/// Factor names that force a decline regardless of the combined score.
pub const CRITICAL_FACTORS: [&str; 2] = ["ip_blacklisted", "recipient_watchlisted"];

/// Everything the models may look at, gathered once per evaluation.
#[derive(Debug, Clone)]
pub struct FraudInputs {
    /// Transaction under evaluation.
    pub ctx: TransactionContext,
    /// Identity facts, when the store answered.
    pub identity: Option<IdentityRecord>,
    /// Behavioral profile, when one exists.
    pub profile: Option<BehaviorProfile>,
    /// Device record for the initiating device, when registered.
    pub device: Option<DeviceRecord>,
    /// Transactions in the trailing 30 days, oldest first.
    pub recent: Vec<LedgerTransaction>,
    /// Lifetime ledger aggregates.
    pub stats: LedgerStats,
    /// Failed logins in the trailing 24 hours.
    pub failed_logins: u32,
}

impl FraudInputs {
    fn completed_recent(&self) -> impl DoubleEndedIterator<Item = &LedgerTransaction> {
        self.recent
            .iter()
            .filter(|tx| tx.status == TransactionStatus::Completed)
    }

    fn ops_last_hour(&self) -> u32 {
        let cutoff = self.ctx.timestamp - Duration::hours(1);
        self.recent.iter().filter(|tx| tx.timestamp >= cutoff).count() as u32 + 1
    }
}

/// Anomaly-heuristic model: the live event against the stored behavioral
/// profile. Scores the strongest anomaly, with a bump per extra anomaly.
#[must_use]
pub fn anomaly_model(inputs: &FraudInputs) -> ModelScore {
    let Some(ref profile) = inputs.profile else {
        return ModelScore::quiet();
    };

    let event = LiveEvent {
        timestamp: inputs.ctx.timestamp,
        amount: Some(inputs.ctx.amount),
        kind: Some(inputs.ctx.kind),
        ops_last_hour: inputs.ops_last_hour(),
    };
    let anomalies = detect_anomalies(profile, &event);
    if anomalies.is_empty() {
        return ModelScore::quiet();
    }

    let strongest = anomalies
        .iter()
        .map(|a| a.confidence)
        .fold(0.0_f64, f64::max);
    let extra = (anomalies.len() - 1) as f64 * 10.0;
    let factors = anomalies
        .into_iter()
        .map(|a| {
            let name = match a.kind {
                vigil_behavior::BehaviorAnomalyKind::HourDeviation => "behavior_hour_deviation",
                vigil_behavior::BehaviorAnomalyKind::AmountDeviation => "behavior_amount_deviation",
                vigil_behavior::BehaviorAnomalyKind::VelocitySpike => "behavior_velocity_spike",
            };
            RiskFactor::new(name, a.confidence, a.description)
        })
        .collect();

    ModelScore {
        score: (strongest + extra).clamp(0.0, 100.0),
        factors,
    }
}

/// Pattern-heuristic model: structuring, rapid fire, and amount
/// escalation over the recent window.
#[must_use]
pub fn pattern_model(inputs: &FraudInputs, config: &FraudConfig) -> ModelScore {
    let mut factors = Vec::new();
    let ctx = &inputs.ctx;

    // Structuring: repeated amounts just below the reporting threshold
    // inside 24 hours, the current transaction included.
    let threshold = config.high_amount_threshold;
    let cutoff = ctx.timestamp - Duration::hours(24);
    let just_below = |amount: f64| amount >= threshold * 0.8 && amount < threshold;
    let split_count = inputs
        .completed_recent()
        .filter(|tx| tx.timestamp >= cutoff && just_below(tx.amount))
        .count()
        + usize::from(just_below(ctx.amount));
    if split_count >= 3 {
        factors.push(RiskFactor::new(
            "structuring",
            50.0,
            format!("{split_count} transactions just below {threshold:.0}"),
        ));
    }

    // Rapid fire: several transactions within ten minutes.
    let burst_cutoff = ctx.timestamp - Duration::minutes(10);
    let burst = inputs
        .recent
        .iter()
        .filter(|tx| tx.timestamp >= burst_cutoff)
        .count()
        + 1;
    if burst >= 5 {
        factors.push(RiskFactor::new(
            "rapid_fire",
            40.0,
            format!("{burst} transactions in ten minutes"),
        ));
    }

    // Escalation: the last few amounts strictly climbing into this one.
    let mut last_amounts: Vec<f64> = inputs
        .completed_recent()
        .rev()
        .take(4)
        .map(|tx| tx.amount)
        .collect();
    last_amounts.reverse();
    last_amounts.push(ctx.amount);
    if last_amounts.len() >= 4 && last_amounts.windows(2).all(|w| w[1] > w[0]) {
        factors.push(RiskFactor::new(
            "amount_escalation",
            20.0,
            "amounts climbing across consecutive transactions",
        ));
    }

    ModelScore::from_factors(factors)
}

/// Expert-rules model: the explicit, auditable list of fixed-delta
/// checks.
#[must_use]
pub fn rule_model(inputs: &FraudInputs, config: &FraudConfig) -> ModelScore {
    let mut factors = Vec::new();
    let ctx = &inputs.ctx;
    let now = Utc::now();

    if config.blacklisted_ips.contains(&ctx.ip) {
        factors.push(RiskFactor::new(
            "ip_blacklisted",
            50.0,
            format!("IP {} is blacklisted", ctx.ip),
        ));
    }

    if let Some(ref recipient) = ctx.recipient_id {
        if config.watchlisted_recipients.contains(recipient) {
            factors.push(RiskFactor::new(
                "recipient_watchlisted",
                45.0,
                "recipient is on the watchlist",
            ));
        }
    }

    if let Some(ref identity) = inputs.identity {
        let age_days = identity.account_age_days(now);
        if age_days < 7 && ctx.amount >= config.high_amount_threshold {
            factors.push(RiskFactor::new(
                "young_account_high_amount",
                40.0,
                format!("{age_days}-day-old account moving {:.0}", ctx.amount),
            ));
        }
        if identity.kyc_status != KycStatus::Approved
            && ctx.amount >= config.high_amount_threshold
        {
            factors.push(RiskFactor::new(
                "unverified_high_amount",
                35.0,
                "high amount without approved KYC",
            ));
        }
        if age_days > 365 {
            factors.push(RiskFactor::new(
                "established_customer",
                -15.0,
                format!("account {age_days} days old"),
            ));
        }
    }

    if ctx.international
        && !inputs
            .completed_recent()
            .any(|tx| tx.international)
    {
        factors.push(RiskFactor::new(
            "first_international",
            25.0,
            "first international transfer on record",
        ));
    }

    if inputs.failed_logins >= 3 {
        factors.push(RiskFactor::new(
            "recent_failures",
            30.0,
            format!("{} failed logins in 24h", inputs.failed_logins),
        ));
    }

    if let Some(ref recipient) = ctx.recipient_id {
        let seen = inputs
            .completed_recent()
            .filter(|tx| tx.recipient_id.as_deref() == Some(recipient.as_str()))
            .count();
        if seen >= 3 {
            factors.push(RiskFactor::new(
                "recipient_frequent",
                -20.0,
                format!("{seen} prior transfers to recipient"),
            ));
        }
    }

    if inputs
        .device
        .as_ref()
        .is_some_and(|d| d.trust_level == DeviceTrustLevel::Trusted && !d.is_blocked)
    {
        factors.push(RiskFactor::new(
            "trusted_device",
            -15.0,
            "initiated from a trusted device",
        ));
    }

    ModelScore::from_factors(factors)
}

/// Velocity model: raw transaction rates over the trailing hour and day.
#[must_use]
pub fn velocity_model(inputs: &FraudInputs) -> ModelScore {
    let mut factors = Vec::new();
    let ctx = &inputs.ctx;

    let hour_count = inputs.ops_last_hour();
    if hour_count >= 10 {
        factors.push(RiskFactor::new(
            "hourly_velocity",
            60.0,
            format!("{hour_count} transactions in the last hour"),
        ));
    } else if hour_count >= 5 {
        factors.push(RiskFactor::new(
            "hourly_velocity",
            30.0,
            format!("{hour_count} transactions in the last hour"),
        ));
    }

    let day_cutoff = ctx.timestamp - Duration::hours(24);
    let day_count = inputs
        .recent
        .iter()
        .filter(|tx| tx.timestamp >= day_cutoff)
        .count()
        + 1;
    if day_count >= 30 {
        factors.push(RiskFactor::new(
            "daily_velocity",
            40.0,
            format!("{day_count} transactions in 24h"),
        ));
    }

    ModelScore::from_factors(factors)
}

/// Behavior-deviation model: the transaction against the user's lifetime
/// averages (coarser than the anomaly model, which needs a profile).
#[must_use]
pub fn deviation_model(inputs: &FraudInputs) -> ModelScore {
    let mut factors = Vec::new();
    let ctx = &inputs.ctx;

    if inputs.stats.completed >= 5 {
        let average = inputs.stats.total_volume / inputs.stats.completed as f64;
        if average > 0.0 {
            let multiple = ctx.amount / average;
            if multiple >= 10.0 {
                factors.push(RiskFactor::new(
                    "amount_deviation_extreme",
                    60.0,
                    format!("{multiple:.1}x the lifetime average"),
                ));
            } else if multiple >= 4.0 {
                factors.push(RiskFactor::new(
                    "amount_deviation",
                    30.0,
                    format!("{multiple:.1}x the lifetime average"),
                ));
            }
        }
    }

    // Night transaction without an established night habit.
    let hour = ctx.timestamp.hour();
    if (1..5).contains(&hour) {
        let habitual_night = inputs
            .profile
            .as_ref()
            .is_some_and(|p| p.temporal.preferred_hours.iter().any(|&h| (1..5).contains(&h)));
        if !habitual_night {
            factors.push(RiskFactor::new(
                "unusual_hour",
                20.0,
                format!("transaction at {hour:02}:00 UTC"),
            ));
        }
    }

    ModelScore::from_factors(factors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::stores::{IdentityLevel, TransactionKind};

    fn base_ctx() -> TransactionContext {
        let mut ctx = TransactionContext::new("u-1", 500.0, TransactionKind::TransferOut, "10.0.0.1");
        // Pin to a mid-day hour so time-based checks stay quiet.
        ctx.timestamp = Utc::now()
            .date_naive()
            .and_hms_opt(14, 0, 0)
            .unwrap()
            .and_utc();
        ctx
    }

    fn identity(age_days: i64) -> IdentityRecord {
        IdentityRecord {
            user_id: "u-1".into(),
            kyc_status: KycStatus::Approved,
            email_verified: true,
            phone_verified: true,
            created_at: Utc::now() - Duration::days(age_days),
            identity_level: IdentityLevel::Full,
            invested_balance: 0.0,
            active_defaults: 0,
            completed_financings: 0,
            referral_count: 0,
            watchlisted: false,
        }
    }

    fn inputs(ctx: TransactionContext) -> FraudInputs {
        FraudInputs {
            ctx,
            identity: Some(identity(400)),
            profile: None,
            device: None,
            recent: Vec::new(),
            stats: LedgerStats::default(),
            failed_logins: 0,
        }
    }

    fn recent_tx(minutes_ago: i64, amount: f64, base: &TransactionContext) -> LedgerTransaction {
        LedgerTransaction {
            id: format!("t-{minutes_ago}-{amount}"),
            user_id: "u-1".into(),
            amount,
            currency: "USD".into(),
            kind: TransactionKind::TransferOut,
            recipient_id: Some("r-1".into()),
            recipient_country: None,
            international: false,
            status: TransactionStatus::Completed,
            timestamp: base.timestamp - Duration::minutes(minutes_ago),
        }
    }

    #[test]
    fn test_quiet_inputs_score_zero() {
        let config = FraudConfig::default();
        let inputs = inputs(base_ctx());

        assert_eq!(anomaly_model(&inputs).score, 0.0);
        assert_eq!(pattern_model(&inputs, &config).score, 0.0);
        assert_eq!(velocity_model(&inputs).score, 0.0);
        assert_eq!(deviation_model(&inputs).score, 0.0);
        // The rules model sees only the established-customer offset.
        assert_eq!(rule_model(&inputs, &config).score, 0.0);
    }

    #[test]
    fn test_rule_model_blacklisted_ip() {
        let config = FraudConfig::default().with_blacklisted_ip("6.6.6.6");
        let mut ctx = base_ctx();
        ctx.ip = "6.6.6.6".into();

        let score = rule_model(&inputs(ctx), &config);
        assert!(score.factors.iter().any(|f| f.name == "ip_blacklisted"));
    }

    #[test]
    fn test_rule_model_young_account_high_amount() {
        let config = FraudConfig::default();
        let mut ctx = base_ctx();
        ctx.amount = 50_000.0;
        let mut inputs = inputs(ctx);
        inputs.identity = Some(identity(3));

        let score = rule_model(&inputs, &config);
        let names: Vec<&str> = score.factors.iter().map(|f| f.name.as_str()).collect();
        assert!(names.contains(&"young_account_high_amount"));
        assert!(!names.contains(&"established_customer"));
    }

    #[test]
    fn test_rule_model_first_international() {
        let config = FraudConfig::default();
        let ctx = base_ctx().with_recipient_country("DE");
        let score = rule_model(&inputs(ctx), &config);
        assert!(score.factors.iter().any(|f| f.name == "first_international"));
    }

    #[test]
    fn test_pattern_model_structuring() {
        let config = FraudConfig::default();
        let mut ctx = base_ctx();
        ctx.amount = 9_400.0;
        let recent = vec![
            recent_tx(60, 9_500.0, &ctx),
            recent_tx(120, 9_900.0, &ctx),
            recent_tx(180, 8_800.0, &ctx),
        ];
        let mut inputs = inputs(ctx);
        inputs.recent = recent;

        let score = pattern_model(&inputs, &config);
        assert!(score.factors.iter().any(|f| f.name == "structuring"));
    }

    #[test]
    fn test_velocity_model_bands() {
        let ctx = base_ctx();
        let mut many = inputs(ctx.clone());
        many.recent = (0..12).map(|i| recent_tx(i * 4, 100.0, &ctx)).collect();
        let score = velocity_model(&many);
        assert!(score
            .factors
            .iter()
            .any(|f| f.name == "hourly_velocity" && f.impact == 60.0));
    }

    #[test]
    fn test_deviation_model_amount_multiple() {
        let mut ctx = base_ctx();
        ctx.amount = 5_000.0;
        let mut inputs = inputs(ctx);
        inputs.stats = LedgerStats {
            completed: 50,
            failed: 0,
            total_volume: 20_000.0, // Average 400.
            first_at: None,
        };

        let score = deviation_model(&inputs);
        assert!(score
            .factors
            .iter()
            .any(|f| f.name == "amount_deviation_extreme"));
    }

    #[test]
    fn test_models_are_deterministic() {
        let config = FraudConfig::default().with_blacklisted_ip("6.6.6.6");
        let mut ctx = base_ctx();
        ctx.ip = "6.6.6.6".into();
        ctx.amount = 9_500.0;
        let mut built = inputs(ctx.clone());
        built.recent = vec![recent_tx(10, 9_300.0, &ctx), recent_tx(20, 9_600.0, &ctx)];

        let a = rule_model(&built, &config);
        let b = rule_model(&built, &config);
        assert_eq!(a.score, b.score);
        assert_eq!(a.factors, b.factors);
    }
}
