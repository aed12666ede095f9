//! Trust score computation.
//!
//! Point tables are additive/subtractive per component; each component
//! clamps to [0, 200] before weighting and the weighted composite clamps
//! to [0, 1000]. Missing related data contributes zero to its component;
//! a missing user record fails the whole computation with `NotFound`.

use crate::types::{
    ComponentScores, ScoreTrend, TrustScoreSnapshot, TrustSnapshotStore, TrustTier,
};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use vigil_core::error::{EngineError, Result};
use vigil_core::stores::{
    IdentityLevel, IdentityRecord, IdentityStore, KycStatus, SessionStore, TransactionLedger,
};

/// Component weights. Fixed by the scoring model; they sum to 1.
const WEIGHT_IDENTITY: f64 = 0.25;
const WEIGHT_FINANCIAL: f64 = 0.25;
const WEIGHT_BEHAVIORAL: f64 = 0.15;
const WEIGHT_TRANSACTIONAL: f64 = 0.25;
const WEIGHT_SOCIAL: f64 = 0.10;

/// Trust engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustConfig {
    /// Snapshot freshness window in hours; older snapshots recompute.
    pub freshness_hours: i64,
    /// Trend dead band in score points.
    pub trend_dead_band: f64,
    /// Session window for the behavioral component, in days.
    pub behavioral_window_days: i64,
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            freshness_hours: 24,
            trend_dead_band: 20.0,
            behavioral_window_days: 30,
        }
    }
}

impl TrustConfig {
    /// Set the freshness window.
    #[must_use]
    pub fn with_freshness_hours(mut self, hours: i64) -> Self {
        self.freshness_hours = hours;
        self
    }
}

/// Composite trust score engine.
pub struct TrustScoreEngine {
    identity: Arc<dyn IdentityStore>,
    ledger: Arc<dyn TransactionLedger>,
    sessions: Arc<dyn SessionStore>,
    snapshots: Arc<dyn TrustSnapshotStore>,
    config: TrustConfig,
}

impl TrustScoreEngine {
    /// Create a new engine.
    pub fn new(
        identity: Arc<dyn IdentityStore>,
        ledger: Arc<dyn TransactionLedger>,
        sessions: Arc<dyn SessionStore>,
        snapshots: Arc<dyn TrustSnapshotStore>,
        config: TrustConfig,
    ) -> Self {
        Self {
            identity,
            ledger,
            sessions,
            snapshots,
            config,
        }
    }

    /// Current score for a user: the cached snapshot when fresh, otherwise
    /// a recomputation.
    pub async fn get_score(&self, user_id: &str) -> Result<TrustScoreSnapshot> {
        if let Some(snapshot) = self.snapshots.latest(user_id).await? {
            let age = Utc::now() - snapshot.computed_at;
            if age < Duration::hours(self.config.freshness_hours) {
                debug!(user_id = %user_id, score = snapshot.global_score, "trust snapshot cache hit");
                return Ok(snapshot);
            }
        }
        self.recalculate(user_id).await
    }

    /// Recompute the score unconditionally and append a new snapshot.
    pub async fn recalculate(&self, user_id: &str) -> Result<TrustScoreSnapshot> {
        let identity = self
            .identity
            .identity(user_id)
            .await?
            .ok_or_else(|| EngineError::not_found("user", user_id))?;

        // Independent sub-scores; failures degrade to zero contribution.
        let (behavioral, transactional) = tokio::join!(
            self.behavioral_score(user_id),
            self.transactional_score(user_id),
        );

        let components = ComponentScores {
            identity: identity_score(&identity),
            financial: financial_score(&identity),
            behavioral: zero_on_error(behavioral, user_id, "behavioral"),
            transactional: zero_on_error(transactional, user_id, "transactional"),
            social: social_score(&identity),
        }
        .clamped();

        let weighted = components.identity * WEIGHT_IDENTITY
            + components.financial * WEIGHT_FINANCIAL
            + components.behavioral * WEIGHT_BEHAVIORAL
            + components.transactional * WEIGHT_TRANSACTIONAL
            + components.social * WEIGHT_SOCIAL;
        let global_score = (weighted * 5.0).clamp(0.0, 1000.0);

        let snapshot = TrustScoreSnapshot {
            user_id: user_id.to_string(),
            global_score,
            tier: TrustTier::from(global_score),
            components,
            computed_at: Utc::now(),
        };
        self.snapshots.insert(snapshot.clone()).await?;

        debug!(
            user_id = %user_id,
            score = global_score,
            tier = %snapshot.tier,
            "trust score recalculated"
        );
        Ok(snapshot)
    }

    /// Score movement between the two most recent snapshots.
    pub async fn score_trend(&self, user_id: &str) -> Result<ScoreTrend> {
        let latest = self
            .snapshots
            .latest(user_id)
            .await?
            .ok_or_else(|| EngineError::not_found("trust snapshot", user_id))?;
        let Some(previous) = self.snapshots.previous(user_id).await? else {
            return Ok(ScoreTrend::Stable);
        };
        Ok(ScoreTrend::from_delta(
            latest.global_score - previous.global_score,
            self.config.trend_dead_band,
        ))
    }

    /// Behavioral component from the recent session window.
    async fn behavioral_score(&self, user_id: &str) -> Result<f64> {
        let since = Utc::now() - Duration::days(self.config.behavioral_window_days);
        let sessions = self.sessions.sessions_since(user_id, since).await?;
        if sessions.is_empty() {
            return Ok(0.0);
        }

        let mut score = 60.0;
        if sessions.len() >= 10 {
            score += 40.0;
        }

        // Hour regularity: share of sessions falling in the user's five most
        // common hours.
        let mut hour_counts: HashMap<u32, usize> = HashMap::new();
        for session in &sessions {
            use chrono::Timelike;
            *hour_counts.entry(session.started_at.hour()).or_insert(0) += 1;
        }
        let mut counts: Vec<usize> = hour_counts.values().copied().collect();
        counts.sort_unstable_by(|a, b| b.cmp(a));
        let top5: usize = counts.iter().take(5).sum();
        if top5 as f64 / sessions.len() as f64 >= 0.7 {
            score += 60.0;
        }

        // Platform consistency: one platform dominating.
        let mut platform_counts: HashMap<_, usize> = HashMap::new();
        for session in &sessions {
            *platform_counts.entry(session.platform).or_insert(0) += 1;
        }
        let dominant = platform_counts.values().copied().max().unwrap_or(0);
        if dominant as f64 / sessions.len() as f64 >= 0.8 {
            score += 40.0;
        }

        Ok(score)
    }

    /// Transactional component from lifetime ledger aggregates.
    async fn transactional_score(&self, user_id: &str) -> Result<f64> {
        let stats = self.ledger.lifetime_stats(user_id).await?;
        if stats.completed == 0 && stats.failed == 0 {
            return Ok(0.0);
        }

        let mut score = 0.0;
        if stats.completed >= 100 {
            score += 80.0;
        } else if stats.completed >= 10 {
            score += 40.0;
        }
        if stats.failure_ratio() < 0.05 {
            score += 60.0;
        }

        if let Some(first) = stats.first_at {
            let months = ((Utc::now() - first).num_days() as f64 / 30.0).max(1.0);
            if stats.total_volume / months >= 10_000.0 {
                score += 40.0;
            }
        }

        Ok(score)
    }
}

/// Identity component from verification facts and account maturity.
fn identity_score(identity: &IdentityRecord) -> f64 {
    let mut score: f64 = 0.0;

    score += match identity.kyc_status {
        KycStatus::Approved => 80.0,
        KycStatus::Pending => 20.0,
        KycStatus::Rejected => -20.0,
        KycStatus::NotStarted => 0.0,
    };
    if identity.email_verified {
        score += 20.0;
    }
    if identity.phone_verified {
        score += 30.0;
    }

    let age = identity.account_age_days(Utc::now());
    if age > 365 {
        score += 40.0;
    } else if age > 180 {
        score += 25.0;
    } else if age > 30 {
        score += 10.0;
    }

    if identity.identity_level == IdentityLevel::Full {
        score += 30.0;
    }

    score
}

/// Financial component from invested balance and credit history.
fn financial_score(identity: &IdentityRecord) -> f64 {
    let mut score: f64 = 0.0;

    let invested = identity.invested_balance;
    if invested >= 10_000_000.0 {
        score += 140.0;
    } else if invested >= 1_000_000.0 {
        score += 100.0;
    } else if invested >= 100_000.0 {
        score += 60.0;
    } else if invested >= 1_000.0 {
        score += 20.0;
    }

    score -= 20.0 * f64::from(identity.active_defaults);
    score += (10.0 * f64::from(identity.completed_financings)).min(40.0);

    score
}

/// Social component from referrals and tenure.
fn social_score(identity: &IdentityRecord) -> f64 {
    let mut score: f64 = 0.0;

    if identity.referral_count >= 5 {
        score += 100.0;
    } else if identity.referral_count >= 1 {
        score += 40.0;
    }
    if identity.account_age_days(Utc::now()) > 365 {
        score += 40.0;
    }

    score
}

fn zero_on_error(result: Result<f64>, user_id: &str, component: &str) -> f64 {
    match result {
        Ok(score) => score,
        Err(err) => {
            warn!(
                user_id = %user_id,
                component = %component,
                error = %err,
                "trust sub-score failed, contributing zero"
            );
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::InMemorySnapshotStore;
    use vigil_core::memory::{InMemoryIdentityStore, InMemoryLedger, InMemorySessionStore};
    use vigil_core::stores::{
        LedgerTransaction, SessionRecord, TransactionKind, TransactionStatus,
    };
    use vigil_core::types::Platform;

    fn identity_record(user_id: &str) -> IdentityRecord {
        IdentityRecord {
            user_id: user_id.into(),
            kyc_status: KycStatus::Approved,
            email_verified: true,
            phone_verified: true,
            created_at: Utc::now() - Duration::days(400),
            identity_level: IdentityLevel::Full,
            invested_balance: 20_000_000.0,
            active_defaults: 0,
            completed_financings: 2,
            referral_count: 0,
            watchlisted: false,
        }
    }

    struct Fixture {
        identity: Arc<InMemoryIdentityStore>,
        ledger: Arc<InMemoryLedger>,
        sessions: Arc<InMemorySessionStore>,
        engine: TrustScoreEngine,
    }

    fn fixture() -> Fixture {
        let identity = Arc::new(InMemoryIdentityStore::new());
        let ledger = Arc::new(InMemoryLedger::new());
        let sessions = Arc::new(InMemorySessionStore::new());
        let engine = TrustScoreEngine::new(
            identity.clone(),
            ledger.clone(),
            sessions.clone(),
            Arc::new(InMemorySnapshotStore::new()),
            TrustConfig::default(),
        );
        Fixture {
            identity,
            ledger,
            sessions,
            engine,
        }
    }

    async fn seed_activity(fx: &Fixture, user_id: &str) {
        // Regular sessions, one per day, all on one platform at the same
        // hour, so both regularity factors apply.
        for day in 0..20i64 {
            fx.sessions
                .push(SessionRecord {
                    session_id: format!("s-{day}"),
                    user_id: user_id.into(),
                    started_at: Utc::now() - Duration::days(day),
                    duration_secs: 600,
                    ip: "10.0.0.1".into(),
                    geo: None,
                    platform: Platform::Ios,
                    device_fingerprint: None,
                })
                .await;
        }
        // Healthy transaction history.
        for i in 0..120 {
            fx.ledger
                .push(LedgerTransaction {
                    id: format!("t-{i}"),
                    user_id: user_id.into(),
                    amount: 5_000.0,
                    currency: "USD".into(),
                    kind: TransactionKind::TransferOut,
                    recipient_id: Some("r-1".into()),
                    recipient_country: None,
                    international: false,
                    status: TransactionStatus::Completed,
                    timestamp: Utc::now() - Duration::days(i64::from(i % 170)),
                })
                .await;
        }
    }

    #[tokio::test]
    async fn test_missing_user_is_not_found() {
        let fx = fixture();
        let err = fx.engine.recalculate("ghost").await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_components_and_global_stay_in_range() {
        let fx = fixture();
        let mut record = identity_record("u-1");
        record.active_defaults = 50; // Drives financial far negative pre-clamp.
        fx.identity.upsert(record).await;

        let snapshot = fx.engine.recalculate("u-1").await.unwrap();

        for component in [
            snapshot.components.identity,
            snapshot.components.financial,
            snapshot.components.behavioral,
            snapshot.components.transactional,
            snapshot.components.social,
        ] {
            assert!((0.0..=200.0).contains(&component), "component {component}");
        }
        assert!((0.0..=1000.0).contains(&snapshot.global_score));
    }

    #[tokio::test]
    async fn test_established_investor_reaches_high_band() {
        let fx = fixture();
        fx.identity.upsert(identity_record("u-1")).await;
        seed_activity(&fx, "u-1").await;

        let snapshot = fx.engine.recalculate("u-1").await.unwrap();

        assert!(
            snapshot.tier >= TrustTier::High,
            "tier {} score {}",
            snapshot.tier,
            snapshot.global_score
        );
        assert!(snapshot.benefits().instant_withdrawal);
    }

    #[tokio::test]
    async fn test_missing_history_contributes_zero_not_error() {
        let fx = fixture();
        fx.identity.upsert(identity_record("u-1")).await;
        // No sessions, no transactions.

        let snapshot = fx.engine.recalculate("u-1").await.unwrap();
        assert_eq!(snapshot.components.behavioral, 0.0);
        assert_eq!(snapshot.components.transactional, 0.0);
        assert!(snapshot.global_score > 0.0);
    }

    #[tokio::test]
    async fn test_get_score_uses_fresh_snapshot() {
        let fx = fixture();
        fx.identity.upsert(identity_record("u-1")).await;

        let first = fx.engine.get_score("u-1").await.unwrap();
        let second = fx.engine.get_score("u-1").await.unwrap();
        assert_eq!(first.computed_at, second.computed_at);

        let recalculated = fx.engine.recalculate("u-1").await.unwrap();
        assert!(recalculated.computed_at > first.computed_at);
    }

    #[tokio::test]
    async fn test_trend_dead_band() {
        let fx = fixture();
        fx.identity.upsert(identity_record("u-1")).await;

        fx.engine.recalculate("u-1").await.unwrap();
        fx.engine.recalculate("u-1").await.unwrap();

        // Identical inputs: delta ~0, well inside the dead band.
        assert_eq!(fx.engine.score_trend("u-1").await.unwrap(), ScoreTrend::Stable);
    }

    #[tokio::test]
    async fn test_defaults_drag_score_down() {
        let fx = fixture();
        fx.identity.upsert(identity_record("u-1")).await;
        let clean = fx.engine.recalculate("u-1").await.unwrap();

        let mut defaulted = identity_record("u-2");
        defaulted.active_defaults = 3;
        fx.identity.upsert(defaulted).await;
        let risky = fx.engine.recalculate("u-2").await.unwrap();

        assert!(risky.global_score < clean.global_score);
    }
}
