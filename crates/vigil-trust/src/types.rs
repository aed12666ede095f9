//! Trust score types and data structures.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use vigil_core::error::Result;

// ============================================================================
// Tiers
// ============================================================================

/// Discrete trust tier derived from the global score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustTier {
    /// Score below 200.
    Critical,
    /// Score in [200, 400).
    Low,
    /// Score in [400, 600).
    Medium,
    /// Score in [600, 800).
    High,
    /// Score of 800 and above.
    Elite,
}

impl From<f64> for TrustTier {
    fn from(score: f64) -> Self {
        match score {
            s if s < 200.0 => TrustTier::Critical,
            s if s < 400.0 => TrustTier::Low,
            s if s < 600.0 => TrustTier::Medium,
            s if s < 800.0 => TrustTier::High,
            _ => TrustTier::Elite,
        }
    }
}

impl std::fmt::Display for TrustTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Critical => write!(f, "critical"),
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Elite => write!(f, "elite"),
        }
    }
}

impl TrustTier {
    /// Fixed benefits bundle for this tier.
    #[must_use]
    pub fn benefits(self) -> TierBenefits {
        match self {
            Self::Critical => TierBenefits {
                financing_limit_pct: 0.0,
                instant_withdrawal: false,
                reduced_validation: false,
                premium_support: false,
                higher_limits: false,
                beta_access: false,
            },
            Self::Low => TierBenefits {
                financing_limit_pct: 20.0,
                instant_withdrawal: false,
                reduced_validation: false,
                premium_support: false,
                higher_limits: false,
                beta_access: false,
            },
            Self::Medium => TierBenefits {
                financing_limit_pct: 50.0,
                instant_withdrawal: false,
                reduced_validation: false,
                premium_support: false,
                higher_limits: false,
                beta_access: false,
            },
            Self::High => TierBenefits {
                financing_limit_pct: 80.0,
                instant_withdrawal: true,
                reduced_validation: true,
                premium_support: false,
                higher_limits: true,
                beta_access: false,
            },
            Self::Elite => TierBenefits {
                financing_limit_pct: 100.0,
                instant_withdrawal: true,
                reduced_validation: true,
                premium_support: true,
                higher_limits: true,
                beta_access: true,
            },
        }
    }
}

/// Benefits granted by a trust tier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierBenefits {
    /// Financing limit as a percentage of invested balance.
    pub financing_limit_pct: f64,
    /// Withdrawals settle without a holding delay.
    pub instant_withdrawal: bool,
    /// Fewer step-up challenges for routine operations.
    pub reduced_validation: bool,
    /// Priority support queue.
    pub premium_support: bool,
    /// Higher transaction limits.
    pub higher_limits: bool,
    /// Early access to beta features.
    pub beta_access: bool,
}

// ============================================================================
// Components and snapshots
// ============================================================================

/// The five component scores, each in [0, 200].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentScores {
    /// Identity verification depth and account maturity.
    pub identity: f64,
    /// Invested balance, defaults, financing history.
    pub financial: f64,
    /// Session regularity and platform consistency.
    pub behavioral: f64,
    /// Transaction volume and reliability.
    pub transactional: f64,
    /// Referrals and tenure.
    pub social: f64,
}

impl ComponentScores {
    /// Clamp every component to [0, 200].
    #[must_use]
    pub fn clamped(self) -> Self {
        Self {
            identity: self.identity.clamp(0.0, 200.0),
            financial: self.financial.clamp(0.0, 200.0),
            behavioral: self.behavioral.clamp(0.0, 200.0),
            transactional: self.transactional.clamp(0.0, 200.0),
            social: self.social.clamp(0.0, 200.0),
        }
    }
}

/// An immutable trust score snapshot. Superseded, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustScoreSnapshot {
    /// User id.
    pub user_id: String,
    /// Global score in [0, 1000].
    pub global_score: f64,
    /// Tier derived from the global score.
    pub tier: TrustTier,
    /// Component scores.
    pub components: ComponentScores,
    /// Computation time; snapshots older than the freshness window are
    /// recomputed on read.
    pub computed_at: DateTime<Utc>,
}

impl TrustScoreSnapshot {
    /// Benefits for the snapshot's tier.
    #[must_use]
    pub fn benefits(&self) -> TierBenefits {
        self.tier.benefits()
    }
}

/// Score movement between consecutive snapshots, with a dead band so
/// ordinary jitter reads as stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreTrend {
    /// Above the dead band.
    Improving,
    /// Within the dead band.
    Stable,
    /// Below the dead band.
    Declining,
}

impl ScoreTrend {
    /// Classify a score delta against a dead band.
    #[must_use]
    pub fn from_delta(delta: f64, dead_band: f64) -> Self {
        if delta > dead_band {
            Self::Improving
        } else if delta < -dead_band {
            Self::Declining
        } else {
            Self::Stable
        }
    }
}

// ============================================================================
// Snapshot store
// ============================================================================

/// Persistence for trust snapshots. Inserts append; history is retained so
/// trend computations can look one snapshot back.
#[async_trait]
pub trait TrustSnapshotStore: Send + Sync {
    /// Most recent snapshot for a user.
    async fn latest(&self, user_id: &str) -> Result<Option<TrustScoreSnapshot>>;

    /// Snapshot immediately before the most recent one.
    async fn previous(&self, user_id: &str) -> Result<Option<TrustScoreSnapshot>>;

    /// Append a snapshot.
    async fn insert(&self, snapshot: TrustScoreSnapshot) -> Result<()>;
}

/// In-memory snapshot store.
#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    snapshots: RwLock<HashMap<String, Vec<TrustScoreSnapshot>>>,
}

impl InMemorySnapshotStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TrustSnapshotStore for InMemorySnapshotStore {
    async fn latest(&self, user_id: &str) -> Result<Option<TrustScoreSnapshot>> {
        Ok(self
            .snapshots
            .read()
            .await
            .get(user_id)
            .and_then(|v| v.last().cloned()))
    }

    async fn previous(&self, user_id: &str) -> Result<Option<TrustScoreSnapshot>> {
        Ok(self.snapshots.read().await.get(user_id).and_then(|v| {
            if v.len() >= 2 {
                v.get(v.len() - 2).cloned()
            } else {
                None
            }
        }))
    }

    async fn insert(&self, snapshot: TrustScoreSnapshot) -> Result<()> {
        self.snapshots
            .write()
            .await
            .entry(snapshot.user_id.clone())
            .or_default()
            .push(snapshot);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_bands() {
        assert_eq!(TrustTier::from(0.0), TrustTier::Critical);
        assert_eq!(TrustTier::from(199.9), TrustTier::Critical);
        assert_eq!(TrustTier::from(200.0), TrustTier::Low);
        assert_eq!(TrustTier::from(400.0), TrustTier::Medium);
        assert_eq!(TrustTier::from(600.0), TrustTier::High);
        assert_eq!(TrustTier::from(799.9), TrustTier::High);
        assert_eq!(TrustTier::from(800.0), TrustTier::Elite);
        assert_eq!(TrustTier::from(1000.0), TrustTier::Elite);
    }

    #[test]
    fn test_benefits_monotonic() {
        assert!(!TrustTier::Medium.benefits().instant_withdrawal);
        assert!(TrustTier::High.benefits().instant_withdrawal);
        assert!(TrustTier::Elite.benefits().beta_access);
        assert!(!TrustTier::High.benefits().beta_access);
    }

    #[test]
    fn test_trend_dead_band() {
        assert_eq!(ScoreTrend::from_delta(25.0, 20.0), ScoreTrend::Improving);
        assert_eq!(ScoreTrend::from_delta(20.0, 20.0), ScoreTrend::Stable);
        assert_eq!(ScoreTrend::from_delta(-20.0, 20.0), ScoreTrend::Stable);
        assert_eq!(ScoreTrend::from_delta(-21.0, 20.0), ScoreTrend::Declining);
    }

    #[test]
    fn test_component_clamping() {
        let scores = ComponentScores {
            identity: 250.0,
            financial: -10.0,
            behavioral: 100.0,
            transactional: 200.1,
            social: 0.0,
        }
        .clamped();
        assert_eq!(scores.identity, 200.0);
        assert_eq!(scores.financial, 0.0);
        assert_eq!(scores.transactional, 200.0);
    }

    #[tokio::test]
    async fn test_snapshot_store_ordering() {
        let store = InMemorySnapshotStore::new();
        for score in [100.0, 300.0, 500.0] {
            store
                .insert(TrustScoreSnapshot {
                    user_id: "u-1".into(),
                    global_score: score,
                    tier: TrustTier::from(score),
                    components: ComponentScores::default(),
                    computed_at: Utc::now(),
                })
                .await
                .unwrap();
        }

        assert_eq!(store.latest("u-1").await.unwrap().unwrap().global_score, 500.0);
        assert_eq!(store.previous("u-1").await.unwrap().unwrap().global_score, 300.0);
        assert!(store.latest("u-2").await.unwrap().is_none());
    }
}
