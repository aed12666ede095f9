//! Employee anomaly types and data structures.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;
use vigil_core::error::{EngineError, Result};
use vigil_core::stores::EmployeeActionKind;

// ============================================================================
// Baseline
// ============================================================================

/// Rolling 30-day behavioral baseline for one employee.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmployeeBaseline {
    /// Employee id.
    pub employee_id: String,
    /// Start of normal work hours (10th percentile of session starts).
    pub work_hour_start: u32,
    /// End of normal work hours (90th percentile of session starts).
    pub work_hour_end: u32,
    /// Weekdays carrying more than 10% of activity (0 = Monday).
    pub work_days: Vec<u32>,
    /// Average actions per active day.
    pub avg_daily_actions: f64,
    /// Average approvals per active day.
    pub avg_daily_approvals: f64,
    /// Average exports per active day.
    pub avg_daily_exports: f64,
    /// Average sensitive accesses per active day.
    pub avg_daily_sensitive: f64,
    /// IPs the employee has worked from.
    pub known_ips: HashSet<String>,
    /// Clients assigned to the employee. Currently never populated by any
    /// builder, which leaves the unassigned-client check inert.
    pub assigned_client_ids: HashSet<String>,
    /// Build time; rebuilt at most once per 24h.
    pub updated_at: DateTime<Utc>,
}

impl EmployeeBaseline {
    /// True when `hour` falls inside normal work hours.
    #[must_use]
    pub fn is_work_hour(&self, hour: u32) -> bool {
        (self.work_hour_start..=self.work_hour_end).contains(&hour)
    }

    /// True when `weekday` (0 = Monday) is a normal work day.
    #[must_use]
    pub fn is_work_day(&self, weekday: u32) -> bool {
        self.work_days.contains(&weekday)
    }
}

// ============================================================================
// Anomalies
// ============================================================================

/// The ten employee anomaly types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EmployeeAnomalyType {
    /// Activity outside normal work hours.
    OffHoursAccess,
    /// Activity on a non-work weekend day.
    WeekendAccess,
    /// Data accesses far above the hourly baseline.
    BulkDataAccess,
    /// Access to a client outside the assigned set.
    UnassignedClientAccess,
    /// Approvals far above the baseline rate.
    ApprovalBurst,
    /// An approval above the high-value threshold inside a burst.
    HighValueApproval,
    /// Exports above the daily baseline.
    ExportSpike,
    /// Raw action velocity over the hard limit.
    VelocitySpike,
    /// Several distinct IPs within an hour, current one unknown.
    MultiIpAccess,
    /// Repeated sensitive-record accesses in one day.
    RepeatedSensitiveAccess,
}

/// Severity grades, ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalySeverity {
    /// Informational.
    Low,
    /// Alert the supervisor.
    Medium,
    /// Flag for dual approval.
    High,
    /// Terminate the session.
    Critical,
}

/// Review status of an anomaly. Transitions happen only through explicit
/// reviewer action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnomalyStatus {
    /// Freshly detected.
    Detected,
    /// A reviewer picked it up.
    Investigating,
    /// Closed as noise.
    FalsePositive,
    /// Confirmed as a real incident.
    Confirmed,
    /// Fully handled.
    Resolved,
}

impl AnomalyStatus {
    /// Whether a reviewer may move an anomaly from `self` to `to`.
    #[must_use]
    pub fn can_transition_to(self, to: AnomalyStatus) -> bool {
        use AnomalyStatus::*;
        matches!(
            (self, to),
            (Detected, Investigating)
                | (Detected, FalsePositive)
                | (Detected, Confirmed)
                | (Investigating, FalsePositive)
                | (Investigating, Confirmed)
                | (Investigating, Resolved)
                | (FalsePositive, Resolved)
                | (Confirmed, Resolved)
        )
    }
}

/// A detected employee anomaly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmployeeAnomaly {
    /// Anomaly id.
    pub id: Uuid,
    /// Employee involved.
    pub employee_id: String,
    /// Anomaly type.
    pub anomaly_type: EmployeeAnomalyType,
    /// Severity grade.
    pub severity: AnomalySeverity,
    /// Human-readable description.
    pub description: String,
    /// The baseline value the check compared against.
    pub baseline: String,
    /// The observed value.
    pub actual: String,
    /// Deviation from baseline in percent, where meaningful.
    pub deviation_percent: f64,
    /// Review status.
    pub status: AnomalyStatus,
    /// Automatic and reviewer actions applied so far.
    pub actions_taken: Vec<String>,
    /// Detection time.
    pub detected_at: DateTime<Utc>,
}

// ============================================================================
// Action context
// ============================================================================

/// One back-office action under analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmployeeActionContext {
    /// Employee performing the action.
    pub employee_id: String,
    /// Action kind.
    pub kind: EmployeeActionKind,
    /// Resource touched.
    pub resource: String,
    /// Client the resource belongs to, when applicable.
    pub client_id: Option<String>,
    /// Source IP.
    pub ip: String,
    /// Monetary amount for approvals.
    pub amount: Option<f64>,
    /// Active back-office session, terminated on critical anomalies.
    pub session_id: Option<String>,
    /// Action time.
    pub timestamp: DateTime<Utc>,
}

impl EmployeeActionContext {
    /// Minimal context for an action.
    #[must_use]
    pub fn new(
        employee_id: impl Into<String>,
        kind: EmployeeActionKind,
        resource: impl Into<String>,
        ip: impl Into<String>,
    ) -> Self {
        Self {
            employee_id: employee_id.into(),
            kind,
            resource: resource.into(),
            client_id: None,
            ip: ip.into(),
            amount: None,
            session_id: None,
            timestamp: Utc::now(),
        }
    }

    /// Set the client.
    #[must_use]
    pub fn with_client(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Set the approval amount.
    #[must_use]
    pub fn with_amount(mut self, amount: f64) -> Self {
        self.amount = Some(amount);
        self
    }

    /// Set the session.
    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

// ============================================================================
// Stores
// ============================================================================

/// Persistence for employee baselines.
#[async_trait]
pub trait BaselineStore: Send + Sync {
    /// Current baseline for an employee.
    async fn current(&self, employee_id: &str) -> Result<Option<EmployeeBaseline>>;

    /// Replace the baseline wholesale.
    async fn replace(&self, baseline: EmployeeBaseline) -> Result<()>;
}

/// In-memory baseline store.
#[derive(Debug, Default)]
pub struct InMemoryBaselineStore {
    baselines: RwLock<HashMap<String, EmployeeBaseline>>,
}

impl InMemoryBaselineStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BaselineStore for InMemoryBaselineStore {
    async fn current(&self, employee_id: &str) -> Result<Option<EmployeeBaseline>> {
        Ok(self.baselines.read().await.get(employee_id).cloned())
    }

    async fn replace(&self, baseline: EmployeeBaseline) -> Result<()> {
        self.baselines
            .write()
            .await
            .insert(baseline.employee_id.clone(), baseline);
        Ok(())
    }
}

/// Persistence for detected anomalies.
#[async_trait]
pub trait AnomalyStore: Send + Sync {
    /// Append an anomaly.
    async fn insert(&self, anomaly: EmployeeAnomaly) -> Result<()>;

    /// Fetch one anomaly.
    async fn get(&self, id: Uuid) -> Result<EmployeeAnomaly>;

    /// Replace a stored anomaly (status transitions, action log).
    async fn update(&self, anomaly: EmployeeAnomaly) -> Result<()>;

    /// Anomalies for an employee, newest first.
    async fn for_employee(&self, employee_id: &str) -> Result<Vec<EmployeeAnomaly>>;
}

/// In-memory anomaly store.
#[derive(Debug, Default)]
pub struct InMemoryAnomalyStore {
    anomalies: RwLock<HashMap<Uuid, EmployeeAnomaly>>,
}

impl InMemoryAnomalyStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AnomalyStore for InMemoryAnomalyStore {
    async fn insert(&self, anomaly: EmployeeAnomaly) -> Result<()> {
        self.anomalies.write().await.insert(anomaly.id, anomaly);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<EmployeeAnomaly> {
        self.anomalies
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("employee anomaly", id.to_string()))
    }

    async fn update(&self, anomaly: EmployeeAnomaly) -> Result<()> {
        let mut anomalies = self.anomalies.write().await;
        if !anomalies.contains_key(&anomaly.id) {
            return Err(EngineError::not_found(
                "employee anomaly",
                anomaly.id.to_string(),
            ));
        }
        anomalies.insert(anomaly.id, anomaly);
        Ok(())
    }

    async fn for_employee(&self, employee_id: &str) -> Result<Vec<EmployeeAnomaly>> {
        let mut list: Vec<EmployeeAnomaly> = self
            .anomalies
            .read()
            .await
            .values()
            .filter(|a| a.employee_id == employee_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| b.detected_at.cmp(&a.detected_at));
        Ok(list)
    }
}
