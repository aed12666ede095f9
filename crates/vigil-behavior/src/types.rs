//! Behavioral profile types and data structures.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use vigil_core::error::Result;
use vigil_core::stores::TransactionKind;
use vigil_core::types::Platform;

// ============================================================================
// Profile sub-structures
// ============================================================================

/// Temporal habits extracted from the session window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemporalPattern {
    /// The user's five most common activity hours (0-23), most common first.
    pub preferred_hours: Vec<u32>,
    /// Weekdays carrying more than 10% of activity (0 = Monday).
    pub active_days: Vec<u32>,
    /// Average session duration in minutes.
    pub avg_session_minutes: f64,
}

/// Transaction habits extracted from the transaction window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionPattern {
    /// Average transactions per month.
    pub avg_monthly_count: f64,
    /// Up to three most common transaction kinds, most common first.
    pub typical_kinds: Vec<TransactionKind>,
    /// Recipients seen three or more times.
    pub frequent_recipients: Vec<String>,
    /// Mean gap between consecutive transactions, in hours.
    pub mean_gap_hours: f64,
    /// Average transaction amount.
    pub avg_amount: f64,
}

/// Device usage extracted from session records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceUsagePattern {
    /// Platform most sessions run on.
    pub primary_platform: Option<Platform>,
    /// Distinct device fingerprints seen in the window.
    pub device_count: u32,
    /// Age in days of the oldest device still in use.
    pub oldest_device_days: i64,
    /// IP-diversity-derived consistency in [0, 1]; 1 = always the same IP.
    pub location_consistency: f64,
}

/// The four risk indicators, each in [0, 100].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskIndicators {
    /// Transaction-rate pressure.
    pub velocity: f64,
    /// Amount dispersion (coefficient of variation based).
    pub amount_volatility: f64,
    /// Share of recently introduced devices.
    pub new_device: f64,
    /// Geographic/IP dispersion.
    pub geo_dispersion: f64,
}

impl RiskIndicators {
    /// Clamp every indicator to [0, 100].
    #[must_use]
    pub fn clamped(self) -> Self {
        Self {
            velocity: self.velocity.clamp(0.0, 100.0),
            amount_volatility: self.amount_volatility.clamp(0.0, 100.0),
            new_device: self.new_device.clamp(0.0, 100.0),
            geo_dispersion: self.geo_dispersion.clamp(0.0, 100.0),
        }
    }

    /// Highest single indicator.
    #[must_use]
    pub fn max(&self) -> f64 {
        self.velocity
            .max(self.amount_volatility)
            .max(self.new_device)
            .max(self.geo_dispersion)
    }
}

// ============================================================================
// Segments
// ============================================================================

/// User segment, assigned by an ordered first-match decision list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserSegment {
    /// Young account or too little data to profile.
    NewUser,
    /// No activity for an extended period.
    Dormant,
    /// Risk indicators elevated.
    AtRisk,
    /// Large average amounts.
    HighValue,
    /// Very frequent activity.
    PowerUser,
    /// Rare activity.
    Passive,
    /// Everyone else.
    Regular,
}

impl std::fmt::Display for UserSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NewUser => "new_user",
            Self::Dormant => "dormant",
            Self::AtRisk => "at_risk",
            Self::HighValue => "high_value",
            Self::PowerUser => "power_user",
            Self::Passive => "passive",
            Self::Regular => "regular",
        };
        write!(f, "{s}")
    }
}

// ============================================================================
// Profile
// ============================================================================

/// A versioned behavioral profile snapshot, replaced wholesale on rebuild.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehaviorProfile {
    /// User id.
    pub user_id: String,
    /// Temporal habits.
    pub temporal: TemporalPattern,
    /// Transaction habits.
    pub transactional: TransactionPattern,
    /// Device usage.
    pub device: DeviceUsagePattern,
    /// Risk indicators.
    pub risk_indicators: RiskIndicators,
    /// Segment assigned at build time.
    pub segment: UserSegment,
    /// Monotonically increasing snapshot version.
    pub version: u32,
    /// Number of records the profile was built from.
    pub data_points: u32,
    /// Build time.
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Live events and anomalies
// ============================================================================

/// A live event checked against the stored profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveEvent {
    /// Event time.
    pub timestamp: DateTime<Utc>,
    /// Monetary amount, when the event is a transaction.
    pub amount: Option<f64>,
    /// Transaction kind, when applicable.
    pub kind: Option<TransactionKind>,
    /// Operations observed for the user in the trailing hour, including
    /// this one.
    pub ops_last_hour: u32,
}

/// Kind of behavioral anomaly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BehaviorAnomalyKind {
    /// Event hour far outside the preferred range.
    HourDeviation,
    /// Amount far above the profile average.
    AmountDeviation,
    /// Operation rate far above the profile-implied rate.
    VelocitySpike,
}

/// A detected behavioral anomaly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehaviorAnomaly {
    /// Anomaly kind.
    pub kind: BehaviorAnomalyKind,
    /// Human-readable description.
    pub description: String,
    /// Detection confidence in [0, 100].
    pub confidence: f64,
}

// ============================================================================
// Profile store
// ============================================================================

/// Persistence for behavior profiles: one current snapshot per user.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Current profile for a user.
    async fn current(&self, user_id: &str) -> Result<Option<BehaviorProfile>>;

    /// Replace the user's profile wholesale.
    async fn replace(&self, profile: BehaviorProfile) -> Result<()>;
}

/// In-memory profile store.
#[derive(Debug, Default)]
pub struct InMemoryProfileStore {
    profiles: RwLock<HashMap<String, BehaviorProfile>>,
}

impl InMemoryProfileStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProfileStore for InMemoryProfileStore {
    async fn current(&self, user_id: &str) -> Result<Option<BehaviorProfile>> {
        Ok(self.profiles.read().await.get(user_id).cloned())
    }

    async fn replace(&self, profile: BehaviorProfile) -> Result<()> {
        self.profiles
            .write()
            .await
            .insert(profile.user_id.clone(), profile);
        Ok(())
    }
}
