//! Behavioral profile construction.
//!
//! All aggregations are explicit typed functions over ordered record
//! sequences. The builder reads a 90-day session window and a 180-day
//! transaction window, derives the pattern sub-structures and risk
//! indicators, classifies the segment, and replaces the stored profile
//! wholesale with a bumped version.

use crate::types::{
    BehaviorProfile, DeviceUsagePattern, ProfileStore, RiskIndicators, TemporalPattern,
    TransactionPattern, UserSegment,
};
use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use vigil_core::error::Result;
use vigil_core::stores::{
    LedgerTransaction, SessionRecord, SessionStore, TransactionLedger, TransactionStatus,
};

/// Behavior profiling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehaviorConfig {
    /// Session window in days.
    pub session_window_days: i64,
    /// Transaction window in days.
    pub transaction_window_days: i64,
    /// Occurrences before a recipient counts as frequent.
    pub frequent_recipient_min: usize,
    /// Activity share above which a weekday counts as active.
    pub active_day_share: f64,
    /// Days without activity before a user is dormant.
    pub dormant_after_days: i64,
    /// Risk-indicator level that marks a user at risk.
    pub at_risk_indicator: f64,
    /// Average amount that marks a user high value.
    pub high_value_avg_amount: f64,
    /// Monthly count that marks a power user.
    pub power_user_monthly: f64,
    /// Monthly count below which a user is passive.
    pub passive_monthly: f64,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            session_window_days: 90,
            transaction_window_days: 180,
            frequent_recipient_min: 3,
            active_day_share: 0.1,
            dormant_after_days: 60,
            at_risk_indicator: 70.0,
            high_value_avg_amount: 10_000.0,
            power_user_monthly: 30.0,
            passive_monthly: 2.0,
        }
    }
}

/// Builds and stores behavioral profiles.
pub struct BehaviorEngine {
    sessions: Arc<dyn SessionStore>,
    ledger: Arc<dyn TransactionLedger>,
    profiles: Arc<dyn ProfileStore>,
    config: BehaviorConfig,
}

impl BehaviorEngine {
    /// Create a new engine.
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        ledger: Arc<dyn TransactionLedger>,
        profiles: Arc<dyn ProfileStore>,
        config: BehaviorConfig,
    ) -> Self {
        Self {
            sessions,
            ledger,
            profiles,
            config,
        }
    }

    /// Current stored profile, building one when none exists yet.
    pub async fn get_or_build(&self, user_id: &str) -> Result<BehaviorProfile> {
        if let Some(profile) = self.profiles.current(user_id).await? {
            return Ok(profile);
        }
        self.rebuild(user_id).await
    }

    /// Rebuild the profile from the history windows and replace the stored
    /// snapshot wholesale.
    pub async fn rebuild(&self, user_id: &str) -> Result<BehaviorProfile> {
        let now = Utc::now();
        let session_since = now - Duration::days(self.config.session_window_days);
        let tx_since = now - Duration::days(self.config.transaction_window_days);

        let (sessions, transactions) = tokio::join!(
            self.sessions.sessions_since(user_id, session_since),
            self.ledger.transactions_since(user_id, tx_since),
        );
        let sessions = sessions?;
        let transactions: Vec<LedgerTransaction> = transactions?
            .into_iter()
            .filter(|tx| tx.status == TransactionStatus::Completed)
            .collect();

        let previous_version = self
            .profiles
            .current(user_id)
            .await?
            .map_or(0, |p| p.version);

        let temporal = temporal_pattern(&sessions, self.config.active_day_share);
        let transactional = transaction_pattern(
            &transactions,
            self.config.transaction_window_days,
            self.config.frequent_recipient_min,
        );
        let device = device_usage_pattern(&sessions, now);
        let risk_indicators =
            risk_indicators(&sessions, &transactions, &transactional, &device, now);

        let data_points = (sessions.len() + transactions.len()) as u32;
        let segment = self.determine_segment(
            &sessions,
            &transactions,
            &transactional,
            &risk_indicators,
            data_points,
            now,
        );

        let profile = BehaviorProfile {
            user_id: user_id.to_string(),
            temporal,
            transactional,
            device,
            risk_indicators,
            segment,
            version: previous_version + 1,
            data_points,
            updated_at: now,
        };

        self.profiles.replace(profile.clone()).await?;
        debug!(
            user_id = %user_id,
            version = profile.version,
            segment = %profile.segment,
            data_points,
            "behavior profile rebuilt"
        );
        Ok(profile)
    }

    /// Ordered first-match segmentation.
    fn determine_segment(
        &self,
        sessions: &[SessionRecord],
        transactions: &[LedgerTransaction],
        transactional: &TransactionPattern,
        indicators: &RiskIndicators,
        data_points: u32,
        now: DateTime<Utc>,
    ) -> UserSegment {
        let first_activity = sessions
            .first()
            .map(|s| s.started_at)
            .into_iter()
            .chain(transactions.first().map(|t| t.timestamp))
            .min();
        let last_activity = sessions
            .last()
            .map(|s| s.started_at)
            .into_iter()
            .chain(transactions.last().map(|t| t.timestamp))
            .max();

        // 1. New user: little data or a short history.
        let short_history =
            first_activity.map_or(true, |first| (now - first).num_days() < 30);
        if data_points < 5 || short_history {
            return UserSegment::NewUser;
        }
        // 2. Dormant: nothing recent.
        if last_activity
            .map_or(true, |last| (now - last).num_days() >= self.config.dormant_after_days)
        {
            return UserSegment::Dormant;
        }
        // 3. At risk: any indicator elevated.
        if indicators.max() >= self.config.at_risk_indicator {
            return UserSegment::AtRisk;
        }
        // 4. High value.
        if transactional.avg_amount >= self.config.high_value_avg_amount {
            return UserSegment::HighValue;
        }
        // 5. Power user.
        if transactional.avg_monthly_count >= self.config.power_user_monthly {
            return UserSegment::PowerUser;
        }
        // 6. Passive.
        if transactional.avg_monthly_count < self.config.passive_monthly {
            return UserSegment::Passive;
        }
        // 7. Everyone else.
        UserSegment::Regular
    }
}

// ============================================================================
// Aggregation functions
// ============================================================================

/// Temporal habits: top-5 hours, active weekdays, average duration.
fn temporal_pattern(sessions: &[SessionRecord], active_day_share: f64) -> TemporalPattern {
    if sessions.is_empty() {
        return TemporalPattern::default();
    }

    let mut hour_counts: HashMap<u32, usize> = HashMap::new();
    let mut day_counts: HashMap<u32, usize> = HashMap::new();
    let mut total_minutes = 0.0;

    for session in sessions {
        *hour_counts.entry(session.started_at.hour()).or_insert(0) += 1;
        *day_counts
            .entry(session.started_at.weekday().num_days_from_monday())
            .or_insert(0) += 1;
        total_minutes += session.duration_secs as f64 / 60.0;
    }

    let mut hours: Vec<(u32, usize)> = hour_counts.into_iter().collect();
    hours.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    let preferred_hours: Vec<u32> = hours.into_iter().take(5).map(|(h, _)| h).collect();

    let total = sessions.len() as f64;
    let mut active_days: Vec<u32> = day_counts
        .into_iter()
        .filter(|&(_, count)| count as f64 / total > active_day_share)
        .map(|(day, _)| day)
        .collect();
    active_days.sort_unstable();

    TemporalPattern {
        preferred_hours,
        active_days,
        avg_session_minutes: total_minutes / total,
    }
}

/// Transaction habits over the window.
fn transaction_pattern(
    transactions: &[LedgerTransaction],
    window_days: i64,
    frequent_recipient_min: usize,
) -> TransactionPattern {
    if transactions.is_empty() {
        return TransactionPattern::default();
    }

    let months = (window_days as f64 / 30.0).max(1.0);
    let avg_monthly_count = transactions.len() as f64 / months;

    let mut kind_counts: HashMap<_, usize> = HashMap::new();
    let mut recipient_counts: HashMap<&str, usize> = HashMap::new();
    let mut total_amount = 0.0;

    for tx in transactions {
        *kind_counts.entry(tx.kind).or_insert(0) += 1;
        if let Some(ref recipient) = tx.recipient_id {
            *recipient_counts.entry(recipient.as_str()).or_insert(0) += 1;
        }
        total_amount += tx.amount;
    }

    let mut kinds: Vec<(_, usize)> = kind_counts.into_iter().collect();
    kinds.sort_by(|a, b| b.1.cmp(&a.1));
    let typical_kinds = kinds.into_iter().take(3).map(|(k, _)| k).collect();

    let mut frequent_recipients: Vec<String> = recipient_counts
        .into_iter()
        .filter(|&(_, count)| count >= frequent_recipient_min)
        .map(|(recipient, _)| recipient.to_string())
        .collect();
    frequent_recipients.sort_unstable();

    // Transactions arrive ordered; mean gap over consecutive pairs.
    let mean_gap_hours = if transactions.len() < 2 {
        0.0
    } else {
        let total_gap: i64 = transactions
            .windows(2)
            .map(|w| (w[1].timestamp - w[0].timestamp).num_seconds())
            .sum();
        total_gap as f64 / 3600.0 / (transactions.len() - 1) as f64
    };

    TransactionPattern {
        avg_monthly_count,
        typical_kinds,
        frequent_recipients,
        mean_gap_hours,
        avg_amount: total_amount / transactions.len() as f64,
    }
}

/// Device usage from session records.
fn device_usage_pattern(sessions: &[SessionRecord], now: DateTime<Utc>) -> DeviceUsagePattern {
    if sessions.is_empty() {
        return DeviceUsagePattern::default();
    }

    let mut platform_counts: HashMap<_, usize> = HashMap::new();
    let mut first_seen: HashMap<&str, DateTime<Utc>> = HashMap::new();
    let mut ips: HashMap<&str, usize> = HashMap::new();

    for session in sessions {
        *platform_counts.entry(session.platform).or_insert(0) += 1;
        if let Some(ref fp) = session.device_fingerprint {
            let entry = first_seen.entry(fp.as_str()).or_insert(session.started_at);
            if session.started_at < *entry {
                *entry = session.started_at;
            }
        }
        *ips.entry(session.ip.as_str()).or_insert(0) += 1;
    }

    let primary_platform = platform_counts
        .into_iter()
        .max_by_key(|&(_, count)| count)
        .map(|(platform, _)| platform);

    let oldest_device_days = first_seen
        .values()
        .map(|&first| (now - first).num_days())
        .max()
        .unwrap_or(0);

    // More distinct IPs per session means less location consistency.
    let ip_diversity = (ips.len().saturating_sub(1)) as f64 / sessions.len() as f64;
    let location_consistency = (1.0 - ip_diversity).clamp(0.0, 1.0);

    DeviceUsagePattern {
        primary_platform,
        device_count: first_seen.len() as u32,
        oldest_device_days,
        location_consistency,
    }
}

/// The four risk indicators, each a fixed formula clamped to [0, 100].
fn risk_indicators(
    sessions: &[SessionRecord],
    transactions: &[LedgerTransaction],
    transactional: &TransactionPattern,
    device: &DeviceUsagePattern,
    now: DateTime<Utc>,
) -> RiskIndicators {
    // Velocity: 200 monthly transactions saturates the indicator.
    let velocity = transactional.avg_monthly_count / 2.0;

    // Amount volatility: coefficient of variation, 2.0 saturates.
    let amount_volatility = if transactions.len() < 2 || transactional.avg_amount <= 0.0 {
        0.0
    } else {
        let mean = transactional.avg_amount;
        let variance = transactions
            .iter()
            .map(|tx| (tx.amount - mean).powi(2))
            .sum::<f64>()
            / transactions.len() as f64;
        variance.sqrt() / mean * 50.0
    };

    // New device: share of devices first seen inside the last 30 days.
    let mut first_seen: HashMap<&str, DateTime<Utc>> = HashMap::new();
    for session in sessions {
        if let Some(ref fp) = session.device_fingerprint {
            let entry = first_seen.entry(fp.as_str()).or_insert(session.started_at);
            if session.started_at < *entry {
                *entry = session.started_at;
            }
        }
    }
    let new_device = if first_seen.is_empty() {
        0.0
    } else {
        let recent = first_seen
            .values()
            .filter(|&&first| (now - first).num_days() < 30)
            .count();
        recent as f64 / first_seen.len() as f64 * 100.0
    };

    let geo_dispersion = (1.0 - device.location_consistency) * 100.0;

    RiskIndicators {
        velocity,
        amount_volatility,
        new_device,
        geo_dispersion,
    }
    .clamped()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::InMemoryProfileStore;
    use vigil_core::memory::{InMemoryLedger, InMemorySessionStore};
    use vigil_core::stores::TransactionKind;
    use vigil_core::types::Platform;

    fn session(user: &str, days_ago: i64, hour: u32, ip: &str, fp: &str) -> SessionRecord {
        let base = Utc::now() - Duration::days(days_ago);
        let started_at = base
            .date_naive()
            .and_hms_opt(hour, 15, 0)
            .unwrap()
            .and_utc();
        SessionRecord {
            session_id: format!("s-{days_ago}-{hour}"),
            user_id: user.into(),
            started_at,
            duration_secs: 900,
            ip: ip.into(),
            geo: None,
            platform: Platform::Ios,
            device_fingerprint: Some(fp.into()),
        }
    }

    fn transfer(user: &str, days_ago: i64, amount: f64, recipient: &str) -> LedgerTransaction {
        LedgerTransaction {
            id: format!("t-{days_ago}-{recipient}-{amount}"),
            user_id: user.into(),
            amount,
            currency: "USD".into(),
            kind: TransactionKind::TransferOut,
            recipient_id: Some(recipient.into()),
            recipient_country: None,
            international: false,
            status: TransactionStatus::Completed,
            timestamp: Utc::now() - Duration::days(days_ago),
        }
    }

    struct Fixture {
        sessions: Arc<InMemorySessionStore>,
        ledger: Arc<InMemoryLedger>,
        engine: BehaviorEngine,
    }

    fn fixture() -> Fixture {
        let sessions = Arc::new(InMemorySessionStore::new());
        let ledger = Arc::new(InMemoryLedger::new());
        let engine = BehaviorEngine::new(
            sessions.clone(),
            ledger.clone(),
            Arc::new(InMemoryProfileStore::new()),
            BehaviorConfig::default(),
        );
        Fixture {
            sessions,
            ledger,
            engine,
        }
    }

    async fn seed_regular(fx: &Fixture, user: &str) {
        for day in 0..60i64 {
            fx.sessions
                .push(session(user, day, 10, "10.0.0.1", "fp-main"))
                .await;
        }
        for day in 0..30i64 {
            fx.ledger
                .push(transfer(user, day * 5, 150.0, "r-frequent"))
                .await;
        }
    }

    #[tokio::test]
    async fn test_empty_history_builds_new_user_profile() {
        let fx = fixture();
        let profile = fx.engine.rebuild("u-1").await.unwrap();

        assert_eq!(profile.segment, UserSegment::NewUser);
        assert_eq!(profile.data_points, 0);
        assert_eq!(profile.version, 1);
    }

    #[tokio::test]
    async fn test_rebuild_bumps_version_and_replaces() {
        let fx = fixture();
        seed_regular(&fx, "u-1").await;

        let first = fx.engine.rebuild("u-1").await.unwrap();
        let second = fx.engine.rebuild("u-1").await.unwrap();

        assert_eq!(first.version, 1);
        assert_eq!(second.version, 2);
        let current = fx.engine.get_or_build("u-1").await.unwrap();
        assert_eq!(current.version, 2);
    }

    #[tokio::test]
    async fn test_temporal_pattern_extraction() {
        let fx = fixture();
        seed_regular(&fx, "u-1").await;

        let profile = fx.engine.rebuild("u-1").await.unwrap();
        assert!(profile.temporal.preferred_hours.contains(&10));
        assert!((profile.temporal.avg_session_minutes - 15.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_frequent_recipients_threshold() {
        let fx = fixture();
        seed_regular(&fx, "u-1").await;
        // Two sightings only: below the threshold of three.
        fx.ledger.push(transfer("u-1", 3, 100.0, "r-rare")).await;
        fx.ledger.push(transfer("u-1", 7, 100.0, "r-rare")).await;

        let profile = fx.engine.rebuild("u-1").await.unwrap();
        assert!(profile
            .transactional
            .frequent_recipients
            .contains(&"r-frequent".to_string()));
        assert!(!profile
            .transactional
            .frequent_recipients
            .contains(&"r-rare".to_string()));
    }

    #[tokio::test]
    async fn test_regular_segment() {
        let fx = fixture();
        seed_regular(&fx, "u-1").await;

        let profile = fx.engine.rebuild("u-1").await.unwrap();
        assert_eq!(profile.segment, UserSegment::Regular);
    }

    #[tokio::test]
    async fn test_high_value_segment() {
        let fx = fixture();
        for day in 0..60i64 {
            fx.sessions
                .push(session("u-1", day, 10, "10.0.0.1", "fp-main"))
                .await;
        }
        for day in 0..30i64 {
            fx.ledger
                .push(transfer("u-1", day * 5, 50_000.0, "r-1"))
                .await;
        }

        let profile = fx.engine.rebuild("u-1").await.unwrap();
        assert_eq!(profile.segment, UserSegment::HighValue);
    }

    #[tokio::test]
    async fn test_power_user_beats_passive_check() {
        let fx = fixture();
        for day in 0..60i64 {
            fx.sessions
                .push(session("u-1", day, 9, "10.0.0.1", "fp-main"))
                .await;
        }
        // ~400 transactions in 180 days: past the power threshold without
        // saturating the velocity indicator.
        for i in 0..400i64 {
            fx.ledger
                .push(transfer("u-1", i % 170, 50.0, &format!("r-{}", i % 7)))
                .await;
        }

        let profile = fx.engine.rebuild("u-1").await.unwrap();
        assert_eq!(profile.segment, UserSegment::PowerUser);
    }

    #[tokio::test]
    async fn test_location_consistency_reflects_ip_diversity() {
        let fx = fixture();
        for day in 0..40i64 {
            // A different IP every session.
            fx.sessions
                .push(session("u-1", day, 10, &format!("10.0.0.{day}"), "fp-main"))
                .await;
        }
        for day in 0..30i64 {
            fx.ledger.push(transfer("u-1", day * 5, 100.0, "r-1")).await;
        }

        let profile = fx.engine.rebuild("u-1").await.unwrap();
        assert!(profile.device.location_consistency < 0.2);
        assert!(profile.risk_indicators.geo_dispersion > 80.0);
    }
}
