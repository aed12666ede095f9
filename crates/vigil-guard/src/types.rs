//! Kill-switch types and data structures.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tokio::sync::RwLock;
use uuid::Uuid;
use vigil_core::error::{EngineError, Result};

// ============================================================================
// Axes
// ============================================================================

/// Product axis. `All` is the wildcard that disables every product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Product {
    /// Every product at once.
    All,
    /// Card issuing and payments.
    Cards,
    /// Transfers between accounts.
    Transfers,
    /// Withdrawals to external accounts.
    Withdrawals,
    /// Deposits.
    Deposits,
    /// Bill and merchant payments.
    Payments,
    /// Financing products.
    Financing,
    /// Investment products.
    Investments,
    /// Rewards and cashback.
    Rewards,
}

impl std::str::FromStr for Product {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "all" => Ok(Self::All),
            "cards" => Ok(Self::Cards),
            "transfers" => Ok(Self::Transfers),
            "withdrawals" => Ok(Self::Withdrawals),
            "deposits" => Ok(Self::Deposits),
            "payments" => Ok(Self::Payments),
            "financing" => Ok(Self::Financing),
            "investments" => Ok(Self::Investments),
            "rewards" => Ok(Self::Rewards),
            other => Err(EngineError::validation(format!("unknown product: {other}"))),
        }
    }
}

impl std::fmt::Display for Product {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::All => "all",
            Self::Cards => "cards",
            Self::Transfers => "transfers",
            Self::Withdrawals => "withdrawals",
            Self::Deposits => "deposits",
            Self::Payments => "payments",
            Self::Financing => "financing",
            Self::Investments => "investments",
            Self::Rewards => "rewards",
        };
        write!(f, "{s}")
    }
}

/// User-segment axis. `All` is the wildcard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentName {
    /// Every segment at once.
    All,
    /// Young accounts.
    NewUser,
    /// Long-inactive accounts.
    Dormant,
    /// Elevated risk indicators.
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

impl std::str::FromStr for SegmentName {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "all" => Ok(Self::All),
            "new_user" => Ok(Self::NewUser),
            "dormant" => Ok(Self::Dormant),
            "at_risk" => Ok(Self::AtRisk),
            "high_value" => Ok(Self::HighValue),
            "power_user" => Ok(Self::PowerUser),
            "passive" => Ok(Self::Passive),
            "regular" => Ok(Self::Regular),
            other => Err(EngineError::validation(format!("unknown segment: {other}"))),
        }
    }
}

impl std::fmt::Display for SegmentName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::All => "all",
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

/// Transaction-type axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxType {
    /// Outgoing transfers.
    Transfer,
    /// Withdrawals.
    Withdrawal,
    /// Payments.
    Payment,
    /// Deposits.
    Deposit,
}

impl std::str::FromStr for TxType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "transfer" => Ok(Self::Transfer),
            "withdrawal" => Ok(Self::Withdrawal),
            "payment" => Ok(Self::Payment),
            "deposit" => Ok(Self::Deposit),
            other => Err(EngineError::validation(format!(
                "unknown transaction type: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for TxType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Transfer => "transfer",
            Self::Withdrawal => "withdrawal",
            Self::Payment => "payment",
            Self::Deposit => "deposit",
        };
        write!(f, "{s}")
    }
}

/// Scope of a kill switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KillScope {
    /// Everything.
    Global,
    /// Maintenance mode: everything, phrased as planned downtime.
    Maintenance,
    /// One product, or the product wildcard.
    Product,
    /// One region code.
    Region,
    /// One user segment, or the segment wildcard.
    UserSegment,
    /// One transaction type.
    TransactionType,
}

impl std::fmt::Display for KillScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Global => "global",
            Self::Maintenance => "maintenance",
            Self::Product => "product",
            Self::Region => "region",
            Self::UserSegment => "user_segment",
            Self::TransactionType => "transaction_type",
        };
        write!(f, "{s}")
    }
}

// ============================================================================
// State document
// ============================================================================

/// An active kill switch entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveKillSwitch {
    /// Entry id.
    pub id: Uuid,
    /// Scope.
    pub scope: KillScope,
    /// Axis target (product, region, segment, or transaction type name);
    /// `None` for global and maintenance.
    pub target: Option<String>,
    /// Why the switch was activated.
    pub reason: String,
    /// Actor that activated the switch.
    pub activated_by: String,
    /// Activation time.
    pub activated_at: DateTime<Utc>,
    /// Automatic deactivation time, when time-boxed.
    pub expires_at: Option<DateTime<Utc>>,
}

impl ActiveKillSwitch {
    /// True once the expiry passed.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Auto-trigger thresholds, part of the state document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoTriggerConfig {
    /// Master enable.
    pub enabled: bool,
    /// Trailing-hour fraud rate (fraud evaluations flagged / total) above
    /// which transfers are killed.
    pub max_fraud_rate: f64,
    /// Trailing-hour error rate above which transfers are killed.
    pub max_error_rate: f64,
    /// Volume above this multiple of the 7-day hourly average kills
    /// transfers.
    pub volume_multiple: f64,
    /// How long an auto-activated kill lasts, in minutes.
    pub kill_duration_mins: i64,
}

impl Default for AutoTriggerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_fraud_rate: 0.10,
            max_error_rate: 0.20,
            volume_multiple: 3.0,
            kill_duration_mins: 30,
        }
    }
}

/// The whole kill-switch configuration. Mutated only by atomic
/// whole-document replacement; the boolean axes are materialized from the
/// active switch list on every mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KillSwitchState {
    /// Deny everything.
    pub global_kill: bool,
    /// Planned downtime; also denies everything.
    pub maintenance_mode: bool,
    /// Disabled products (wildcard included).
    pub products: HashSet<Product>,
    /// Disabled region codes.
    pub regions: HashSet<String>,
    /// Disabled user segments (wildcard included).
    pub user_segments: HashSet<SegmentName>,
    /// Disabled transaction types.
    pub transaction_types: HashSet<TxType>,
    /// Auto-trigger configuration.
    pub auto_triggers: AutoTriggerConfig,
    /// Currently active switches.
    pub active: Vec<ActiveKillSwitch>,
}

impl Default for KillSwitchState {
    fn default() -> Self {
        Self {
            global_kill: false,
            maintenance_mode: false,
            products: HashSet::new(),
            regions: HashSet::new(),
            user_segments: HashSet::new(),
            transaction_types: HashSet::new(),
            auto_triggers: AutoTriggerConfig::default(),
            active: Vec::new(),
        }
    }
}

impl KillSwitchState {
    /// Rebuild the boolean axes from the active switch list. Called after
    /// every mutation so the flags always agree with the entries.
    pub fn materialize(&mut self) -> Result<()> {
        self.global_kill = false;
        self.maintenance_mode = false;
        self.products.clear();
        self.regions.clear();
        self.user_segments.clear();
        self.transaction_types.clear();

        for entry in &self.active {
            match entry.scope {
                KillScope::Global => self.global_kill = true,
                KillScope::Maintenance => self.maintenance_mode = true,
                KillScope::Product => {
                    let target = required_target(entry)?;
                    self.products.insert(target.parse()?);
                }
                KillScope::Region => {
                    self.regions.insert(required_target(entry)?.to_string());
                }
                KillScope::UserSegment => {
                    let target = required_target(entry)?;
                    self.user_segments.insert(target.parse()?);
                }
                KillScope::TransactionType => {
                    let target = required_target(entry)?;
                    self.transaction_types.insert(target.parse()?);
                }
            }
        }
        Ok(())
    }
}

fn required_target(entry: &ActiveKillSwitch) -> Result<&str> {
    entry
        .target
        .as_deref()
        .ok_or_else(|| EngineError::validation(format!("{} switch requires a target", entry.scope)))
}

// ============================================================================
// Versioned store
// ============================================================================

/// A value paired with its document version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Versioned<T> {
    /// Document version, bumped on every replace.
    pub version: u64,
    /// The value.
    pub value: T,
}

/// Persistence for the kill-switch document: load and compare-and-replace.
#[async_trait]
pub trait KillStateStore: Send + Sync {
    /// Load the current document.
    async fn load(&self) -> Result<Versioned<KillSwitchState>>;

    /// Replace the whole document iff the stored version still equals
    /// `expected_version`. Returns the new version; a mismatch returns
    /// [`EngineError::Conflict`].
    async fn replace(&self, expected_version: u64, state: KillSwitchState) -> Result<u64>;
}

/// In-memory kill-state store with compare-and-replace semantics.
#[derive(Debug, Default)]
pub struct InMemoryKillStateStore {
    state: RwLock<Versioned<KillSwitchState>>,
}

impl Default for Versioned<KillSwitchState> {
    fn default() -> Self {
        Self {
            version: 0,
            value: KillSwitchState::default(),
        }
    }
}

impl InMemoryKillStateStore {
    /// Create a store holding the default (everything enabled) state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KillStateStore for InMemoryKillStateStore {
    async fn load(&self) -> Result<Versioned<KillSwitchState>> {
        Ok(self.state.read().await.clone())
    }

    async fn replace(&self, expected_version: u64, state: KillSwitchState) -> Result<u64> {
        let mut current = self.state.write().await;
        if current.version != expected_version {
            return Err(EngineError::conflict(format!(
                "kill-switch state moved from version {expected_version} to {}",
                current.version
            )));
        }
        current.version += 1;
        current.value = state;
        Ok(current.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(scope: KillScope, target: Option<&str>) -> ActiveKillSwitch {
        ActiveKillSwitch {
            id: Uuid::new_v4(),
            scope,
            target: target.map(String::from),
            reason: "test".into(),
            activated_by: "system:test".into(),
            activated_at: Utc::now(),
            expires_at: None,
        }
    }

    #[test]
    fn test_materialize_rebuilds_flags() {
        let mut state = KillSwitchState::default();
        state.active.push(entry(KillScope::Product, Some("withdrawals")));
        state.active.push(entry(KillScope::Region, Some("BR")));
        state.materialize().unwrap();

        assert!(state.products.contains(&Product::Withdrawals));
        assert!(state.regions.contains("BR"));
        assert!(!state.global_kill);

        state.active.clear();
        state.materialize().unwrap();
        assert!(state.products.is_empty());
        assert!(state.regions.is_empty());
    }

    #[test]
    fn test_materialize_rejects_missing_target() {
        let mut state = KillSwitchState::default();
        state.active.push(entry(KillScope::Product, None));
        assert!(state.materialize().is_err());
    }

    #[test]
    fn test_expiry() {
        let mut e = entry(KillScope::Global, None);
        assert!(!e.is_expired(Utc::now()));
        e.expires_at = Some(Utc::now() - chrono::Duration::minutes(1));
        assert!(e.is_expired(Utc::now()));
    }

    #[tokio::test]
    async fn test_store_compare_and_replace() {
        let store = InMemoryKillStateStore::new();
        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.version, 0);

        let v1 = store.replace(0, KillSwitchState::default()).await.unwrap();
        assert_eq!(v1, 1);

        // Stale version loses.
        let err = store.replace(0, KillSwitchState::default()).await.unwrap_err();
        assert!(err.is_already_handled());
    }
}
