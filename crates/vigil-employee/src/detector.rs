//! Employee anomaly detection and graded response.

use crate::baseline::BaselineBuilder;
use crate::types::{
    AnomalySeverity, AnomalyStatus, AnomalyStore, EmployeeActionContext, EmployeeAnomaly,
    EmployeeAnomalyType, EmployeeBaseline,
};
use chrono::{Datelike, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;
use vigil_alerting::{AlertCategory, AlertPriority, AlertRequest, AlertService, AlertTarget};
use vigil_core::audit::{AuditEntry, AuditSeverity, AuditSink};
use vigil_core::error::{EngineError, Result};
use vigil_core::stores::{
    EmployeeActionKind, EmployeeActionRecord, EmployeeDirectory, EmployeeRecord, EmployeeRole,
    SessionStore,
};
use vigil_core::types::Actor;

/// Detector thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmployeeConfig {
    /// Multiplier over the hourly baseline for bulk data access.
    pub bulk_access_multiplier: f64,
    /// Assumed working hours per day when deriving hourly baselines.
    pub working_hours_per_day: f64,
    /// Multiplier over the approval baseline for a burst.
    pub approval_burst_multiplier: f64,
    /// Minimum hourly approvals before a burst can fire.
    pub approval_burst_min: usize,
    /// Approval amount graded critical inside a burst.
    pub high_value_approval: f64,
    /// Minimum daily exports before a spike can fire.
    pub export_spike_min: usize,
    /// Multiplier over the export baseline for a spike.
    pub export_spike_multiplier: f64,
    /// Hard action limit per five minutes.
    pub velocity_limit: usize,
    /// Distinct IPs within an hour before multi-IP access fires.
    pub multi_ip_min: usize,
    /// Daily sensitive accesses before repeated access fires.
    pub sensitive_daily_min: usize,
}

impl Default for EmployeeConfig {
    fn default() -> Self {
        Self {
            bulk_access_multiplier: 3.0,
            working_hours_per_day: 8.0,
            approval_burst_multiplier: 2.0,
            approval_burst_min: 5,
            high_value_approval: 100_000.0,
            export_spike_min: 3,
            export_spike_multiplier: 3.0,
            velocity_limit: 50,
            multi_ip_min: 3,
            sensitive_daily_min: 5,
        }
    }
}

/// Employee anomaly detector with severity-graded automatic response.
pub struct EmployeeAnomalyDetector {
    directory: Arc<dyn EmployeeDirectory>,
    sessions: Arc<dyn SessionStore>,
    baselines: Arc<BaselineBuilder>,
    anomalies: Arc<dyn AnomalyStore>,
    alerts: Arc<AlertService>,
    audit: Arc<dyn AuditSink>,
    config: EmployeeConfig,
    dual_approval_flags: RwLock<HashSet<String>>,
}

impl EmployeeAnomalyDetector {
    /// Create a new detector.
    pub fn new(
        directory: Arc<dyn EmployeeDirectory>,
        sessions: Arc<dyn SessionStore>,
        baselines: Arc<BaselineBuilder>,
        anomalies: Arc<dyn AnomalyStore>,
        alerts: Arc<AlertService>,
        audit: Arc<dyn AuditSink>,
        config: EmployeeConfig,
    ) -> Self {
        Self {
            directory,
            sessions,
            baselines,
            anomalies,
            alerts,
            audit,
            config,
            dual_approval_flags: RwLock::new(HashSet::new()),
        }
    }

    /// True when a prior high-severity anomaly flagged the employee for
    /// mandatory dual approval on sensitive operations.
    pub async fn requires_dual_approval(&self, employee_id: &str) -> bool {
        self.dual_approval_flags.read().await.contains(employee_id)
    }

    /// Clear an employee's dual-approval flag after review.
    pub async fn clear_dual_approval(&self, employee_id: &str, actor: &Actor) -> Result<()> {
        self.dual_approval_flags.write().await.remove(employee_id);
        self.audit
            .record(
                AuditEntry::new(
                    actor.clone(),
                    "clear_dual_approval",
                    format!("employee/{employee_id}"),
                )
                .with_description("dual-approval requirement lifted"),
            )
            .await
    }

    /// Analyze one back-office action. Runs the eight independent checks,
    /// persists every detected anomaly, and applies the severity-graded
    /// automatic response.
    pub async fn analyze_action(
        &self,
        ctx: &EmployeeActionContext,
    ) -> Result<Vec<EmployeeAnomaly>> {
        let employee = self
            .directory
            .employee(&ctx.employee_id)
            .await?
            .ok_or_else(|| EngineError::not_found("employee", &ctx.employee_id))?;
        let baseline = self.baselines.get_or_build(&ctx.employee_id).await?;

        let day_ago = ctx.timestamp - Duration::hours(24);
        let recent = self
            .directory
            .actions_since(&ctx.employee_id, day_ago)
            .await?;

        let mut anomalies = Vec::new();
        let checks = [
            self.check_schedule(ctx, &baseline),
            self.check_bulk_access(ctx, &baseline, &recent),
            self.check_unassigned_client(ctx, &baseline, &employee),
            self.check_approval_burst(ctx, &baseline, &recent),
            self.check_export_spike(ctx, &baseline, &recent),
            self.check_velocity(ctx, &recent),
            self.check_multi_ip(ctx, &baseline, &recent),
            self.check_repeated_sensitive(ctx, &recent),
        ];
        for check in checks {
            if let Some(anomaly) = check {
                anomalies.push(anomaly);
            }
        }

        for anomaly in &mut anomalies {
            self.respond(anomaly, &employee, ctx).await?;
            self.anomalies.insert(anomaly.clone()).await?;
        }

        Ok(anomalies)
    }

    /// Move an anomaly through its review state machine. Only explicit
    /// reviewer actions transition status.
    pub async fn review_anomaly(
        &self,
        anomaly_id: Uuid,
        to: AnomalyStatus,
        actor: &Actor,
    ) -> Result<EmployeeAnomaly> {
        let mut anomaly = self.anomalies.get(anomaly_id).await?;
        if !anomaly.status.can_transition_to(to) {
            return Err(EngineError::validation(format!(
                "cannot move anomaly from {:?} to {to:?}",
                anomaly.status
            )));
        }
        anomaly.status = to;
        anomaly
            .actions_taken
            .push(format!("{actor} set status {to:?}"));
        self.anomalies.update(anomaly.clone()).await?;

        self.audit
            .record(
                AuditEntry::new(actor.clone(), "review_anomaly", format!("anomaly/{anomaly_id}"))
                    .with_description(format!("status set to {to:?}")),
            )
            .await?;
        Ok(anomaly)
    }

    // ------------------------------------------------------------------
    // Checks; each emits at most one anomaly.
    // ------------------------------------------------------------------

    /// Off-hours or weekend access. The hour check wins when both apply.
    fn check_schedule(
        &self,
        ctx: &EmployeeActionContext,
        baseline: &EmployeeBaseline,
    ) -> Option<EmployeeAnomaly> {
        let hour = ctx.timestamp.hour();
        let weekday = ctx.timestamp.weekday().num_days_from_monday();

        if !baseline.is_work_hour(hour) {
            return Some(new_anomaly(
                ctx,
                EmployeeAnomalyType::OffHoursAccess,
                AnomalySeverity::Medium,
                format!("activity at {hour:02}:00 outside normal hours"),
                format!(
                    "{:02}:00-{:02}:00",
                    baseline.work_hour_start, baseline.work_hour_end
                ),
                format!("{hour:02}:00"),
                0.0,
            ));
        }
        if weekday >= 5 && !baseline.is_work_day(weekday) {
            return Some(new_anomaly(
                ctx,
                EmployeeAnomalyType::WeekendAccess,
                AnomalySeverity::Medium,
                "weekend activity without a weekend work pattern".to_string(),
                format!("work days {:?}", baseline.work_days),
                format!("weekday {weekday}"),
                0.0,
            ));
        }
        None
    }

    /// Data accesses in the trailing hour above the hourly baseline.
    fn check_bulk_access(
        &self,
        ctx: &EmployeeActionContext,
        baseline: &EmployeeBaseline,
        recent: &[EmployeeActionRecord],
    ) -> Option<EmployeeAnomaly> {
        if ctx.kind != EmployeeActionKind::DataAccess {
            return None;
        }
        let hour_ago = ctx.timestamp - Duration::hours(1);
        let count = recent
            .iter()
            .filter(|a| a.kind == EmployeeActionKind::DataAccess && a.timestamp >= hour_ago)
            .count()
            + 1;

        let hourly_baseline =
            (baseline.avg_daily_actions / self.config.working_hours_per_day).max(1.0);
        let limit = hourly_baseline * self.config.bulk_access_multiplier;
        if count as f64 > limit {
            let deviation = (count as f64 / hourly_baseline - 1.0) * 100.0;
            return Some(new_anomaly(
                ctx,
                EmployeeAnomalyType::BulkDataAccess,
                AnomalySeverity::High,
                format!("{count} data accesses in one hour"),
                format!("{hourly_baseline:.1}/h"),
                format!("{count}/h"),
                deviation,
            ));
        }
        None
    }

    /// Access to a client outside the assigned set, for roles that have
    /// one. Inert while assignment data stays unpopulated.
    fn check_unassigned_client(
        &self,
        ctx: &EmployeeActionContext,
        baseline: &EmployeeBaseline,
        employee: &EmployeeRecord,
    ) -> Option<EmployeeAnomaly> {
        let client_id = ctx.client_id.as_ref()?;
        if baseline.assigned_client_ids.is_empty() {
            return None;
        }
        if matches!(employee.role, EmployeeRole::Support | EmployeeRole::Admin | EmployeeRole::SuperAdmin) {
            return None;
        }
        if baseline.assigned_client_ids.contains(client_id) {
            return None;
        }
        Some(new_anomaly(
            ctx,
            EmployeeAnomalyType::UnassignedClientAccess,
            AnomalySeverity::Medium,
            format!("access to unassigned client {client_id}"),
            format!("{} assigned clients", baseline.assigned_client_ids.len()),
            format!("client {client_id}"),
            0.0,
        ))
    }

    /// Approvals in the trailing hour above the baseline rate; critical
    /// when a high-value approval rides the burst.
    fn check_approval_burst(
        &self,
        ctx: &EmployeeActionContext,
        baseline: &EmployeeBaseline,
        recent: &[EmployeeActionRecord],
    ) -> Option<EmployeeAnomaly> {
        if ctx.kind != EmployeeActionKind::Approval {
            return None;
        }
        let hour_ago = ctx.timestamp - Duration::hours(1);
        let burst: Vec<&EmployeeActionRecord> = recent
            .iter()
            .filter(|a| a.kind == EmployeeActionKind::Approval && a.timestamp >= hour_ago)
            .collect();
        let count = burst.len() + 1;

        let limit = (baseline.avg_daily_approvals * self.config.approval_burst_multiplier)
            .max(self.config.approval_burst_min as f64 - 1.0);
        if count < self.config.approval_burst_min || (count as f64) <= limit {
            return None;
        }

        let high_value = ctx.amount.unwrap_or(0.0) >= self.config.high_value_approval
            || burst
                .iter()
                .any(|a| a.amount.unwrap_or(0.0) >= self.config.high_value_approval);
        let (anomaly_type, severity) = if high_value {
            (EmployeeAnomalyType::HighValueApproval, AnomalySeverity::Critical)
        } else {
            (EmployeeAnomalyType::ApprovalBurst, AnomalySeverity::High)
        };

        let deviation = if baseline.avg_daily_approvals > 0.0 {
            (count as f64 / baseline.avg_daily_approvals - 1.0) * 100.0
        } else {
            100.0 * count as f64
        };
        Some(new_anomaly(
            ctx,
            anomaly_type,
            severity,
            format!("{count} approvals in one hour"),
            format!("{:.1}/day", baseline.avg_daily_approvals),
            format!("{count}/h"),
            deviation,
        ))
    }

    /// Exports today above the daily baseline.
    fn check_export_spike(
        &self,
        ctx: &EmployeeActionContext,
        baseline: &EmployeeBaseline,
        recent: &[EmployeeActionRecord],
    ) -> Option<EmployeeAnomaly> {
        if ctx.kind != EmployeeActionKind::Export {
            return None;
        }
        let today = ctx.timestamp.date_naive();
        let count = recent
            .iter()
            .filter(|a| {
                a.kind == EmployeeActionKind::Export && a.timestamp.date_naive() == today
            })
            .count()
            + 1;

        let limit = (baseline.avg_daily_exports * self.config.export_spike_multiplier)
            .max(self.config.export_spike_min as f64);
        if (count as f64) < limit {
            return None;
        }
        let deviation = if baseline.avg_daily_exports > 0.0 {
            (count as f64 / baseline.avg_daily_exports - 1.0) * 100.0
        } else {
            100.0 * count as f64
        };
        Some(new_anomaly(
            ctx,
            EmployeeAnomalyType::ExportSpike,
            AnomalySeverity::High,
            format!("{count} exports today"),
            format!("{:.1}/day", baseline.avg_daily_exports),
            format!("{count}/day"),
            deviation,
        ))
    }

    /// Raw action velocity over the hard five-minute limit.
    fn check_velocity(
        &self,
        ctx: &EmployeeActionContext,
        recent: &[EmployeeActionRecord],
    ) -> Option<EmployeeAnomaly> {
        let five_min_ago = ctx.timestamp - Duration::minutes(5);
        let count = recent
            .iter()
            .filter(|a| a.timestamp >= five_min_ago)
            .count()
            + 1;
        if count <= self.config.velocity_limit {
            return None;
        }
        Some(new_anomaly(
            ctx,
            EmployeeAnomalyType::VelocitySpike,
            AnomalySeverity::High,
            format!("{count} actions in five minutes"),
            format!("limit {}", self.config.velocity_limit),
            format!("{count}/5min"),
            (count as f64 / self.config.velocity_limit as f64 - 1.0) * 100.0,
        ))
    }

    /// Several distinct IPs inside an hour with an unknown current IP.
    fn check_multi_ip(
        &self,
        ctx: &EmployeeActionContext,
        baseline: &EmployeeBaseline,
        recent: &[EmployeeActionRecord],
    ) -> Option<EmployeeAnomaly> {
        if baseline.known_ips.contains(&ctx.ip) {
            return None;
        }
        let hour_ago = ctx.timestamp - Duration::hours(1);
        let mut ips: HashSet<&str> = recent
            .iter()
            .filter(|a| a.timestamp >= hour_ago)
            .map(|a| a.ip.as_str())
            .collect();
        ips.insert(ctx.ip.as_str());
        if ips.len() < self.config.multi_ip_min {
            return None;
        }
        Some(new_anomaly(
            ctx,
            EmployeeAnomalyType::MultiIpAccess,
            AnomalySeverity::High,
            format!("{} distinct IPs within an hour", ips.len()),
            format!("{} known IPs", baseline.known_ips.len()),
            format!("current {}", ctx.ip),
            0.0,
        ))
    }

    /// Repeated sensitive-record access in one day.
    fn check_repeated_sensitive(
        &self,
        ctx: &EmployeeActionContext,
        recent: &[EmployeeActionRecord],
    ) -> Option<EmployeeAnomaly> {
        if ctx.kind != EmployeeActionKind::SensitiveAccess {
            return None;
        }
        let today = ctx.timestamp.date_naive();
        let count = recent
            .iter()
            .filter(|a| {
                a.kind == EmployeeActionKind::SensitiveAccess
                    && a.timestamp.date_naive() == today
            })
            .count()
            + 1;
        if count < self.config.sensitive_daily_min {
            return None;
        }
        Some(new_anomaly(
            ctx,
            EmployeeAnomalyType::RepeatedSensitiveAccess,
            AnomalySeverity::Medium,
            format!("{count} sensitive accesses today"),
            format!("limit {}/day", self.config.sensitive_daily_min),
            format!("{count}/day"),
            0.0,
        ))
    }

    // ------------------------------------------------------------------
    // Response
    // ------------------------------------------------------------------

    /// Severity-graded automatic response, recorded on the anomaly.
    async fn respond(
        &self,
        anomaly: &mut EmployeeAnomaly,
        employee: &EmployeeRecord,
        ctx: &EmployeeActionContext,
    ) -> Result<()> {
        let system = Actor::system("employee_detector");

        match anomaly.severity {
            AnomalySeverity::Critical => {
                if let Some(ref session_id) = ctx.session_id {
                    match self.sessions.terminate_session(session_id).await {
                        Ok(()) => {
                            anomaly
                                .actions_taken
                                .push(format!("terminated session {session_id}"));
                            warn!(
                                employee_id = %ctx.employee_id,
                                session_id = %session_id,
                                "critical anomaly: session terminated"
                            );
                        }
                        Err(err) => {
                            warn!(
                                employee_id = %ctx.employee_id,
                                error = %err,
                                "failed to terminate session"
                            );
                        }
                    }
                }
                if let Some(ref supervisor) = employee.supervisor_id {
                    self.alert_target(
                        anomaly,
                        AlertTarget::Employee(supervisor.clone()),
                        AlertPriority::Critical,
                    )
                    .await?;
                    anomaly
                        .actions_taken
                        .push(format!("notified supervisor {supervisor}"));
                }
                self.alert_target(anomaly, AlertTarget::AllAdmins, AlertPriority::Critical)
                    .await?;
                anomaly.actions_taken.push("notified admins".to_string());
            }
            AnomalySeverity::High => {
                self.dual_approval_flags
                    .write()
                    .await
                    .insert(ctx.employee_id.clone());
                anomaly
                    .actions_taken
                    .push("flagged for mandatory dual approval".to_string());
                info!(
                    employee_id = %ctx.employee_id,
                    anomaly = ?anomaly.anomaly_type,
                    "employee flagged for dual approval"
                );
                self.alert_supervisor_or_admins(anomaly, employee, AlertPriority::High)
                    .await?;
            }
            AnomalySeverity::Medium | AnomalySeverity::Low => {
                self.alert_supervisor_or_admins(anomaly, employee, AlertPriority::Medium)
                    .await?;
                anomaly.actions_taken.push("alert raised".to_string());
            }
        }

        self.audit
            .record(
                AuditEntry::new(
                    system,
                    "employee_anomaly_detected",
                    format!("employee/{}", ctx.employee_id),
                )
                .with_severity(match anomaly.severity {
                    AnomalySeverity::Critical => AuditSeverity::Critical,
                    AnomalySeverity::High => AuditSeverity::Warning,
                    _ => AuditSeverity::Info,
                })
                .with_description(anomaly.description.clone()),
            )
            .await
    }

    async fn alert_supervisor_or_admins(
        &self,
        anomaly: &EmployeeAnomaly,
        employee: &EmployeeRecord,
        priority: AlertPriority,
    ) -> Result<()> {
        let target = employee
            .supervisor_id
            .as_ref()
            .map(|s| AlertTarget::Employee(s.clone()))
            .unwrap_or(AlertTarget::AllAdmins);
        self.alert_target(anomaly, target, priority).await
    }

    async fn alert_target(
        &self,
        anomaly: &EmployeeAnomaly,
        target: AlertTarget,
        priority: AlertPriority,
    ) -> Result<()> {
        self.alerts
            .create_alert(
                AlertRequest::new(
                    AlertCategory::Employee,
                    priority,
                    format!("Employee anomaly: {:?}", anomaly.anomaly_type),
                    format!("{} ({})", anomaly.description, anomaly.employee_id),
                    target,
                    "employee_detector",
                )
                .with_source_id(anomaly.id.to_string()),
            )
            .await?;
        Ok(())
    }
}

fn new_anomaly(
    ctx: &EmployeeActionContext,
    anomaly_type: EmployeeAnomalyType,
    severity: AnomalySeverity,
    description: String,
    baseline: String,
    actual: String,
    deviation_percent: f64,
) -> EmployeeAnomaly {
    EmployeeAnomaly {
        id: Uuid::new_v4(),
        employee_id: ctx.employee_id.clone(),
        anomaly_type,
        severity,
        description,
        baseline,
        actual,
        deviation_percent,
        status: AnomalyStatus::Detected,
        actions_taken: Vec::new(),
        detected_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{InMemoryAnomalyStore, InMemoryBaselineStore};
    use chrono::{DateTime, Weekday};
    use vigil_alerting::AlertingConfig;
    use vigil_core::audit::MemoryAuditSink;
    use vigil_core::memory::{
        InMemoryEmployeeDirectory, InMemorySessionStore, RecordingSender,
    };
    use vigil_core::stores::SessionRecord;
    use vigil_core::types::Platform;

    struct Fixture {
        detector: EmployeeAnomalyDetector,
        directory: Arc<InMemoryEmployeeDirectory>,
        sessions: Arc<InMemorySessionStore>,
        alerts: Arc<AlertService>,
        anomalies: Arc<InMemoryAnomalyStore>,
    }

    async fn fixture() -> Fixture {
        let directory = Arc::new(InMemoryEmployeeDirectory::new());
        let sessions = Arc::new(InMemorySessionStore::new());
        let anomalies = Arc::new(InMemoryAnomalyStore::new());
        let audit = Arc::new(MemoryAuditSink::new());
        let alerts = Arc::new(AlertService::new(
            Arc::new(RecordingSender::new()),
            audit.clone(),
            AlertingConfig::default(),
        ));
        let baselines = Arc::new(BaselineBuilder::new(
            directory.clone(),
            Arc::new(InMemoryBaselineStore::new()),
        ));
        let detector = EmployeeAnomalyDetector::new(
            directory.clone(),
            sessions.clone(),
            baselines,
            anomalies.clone(),
            alerts.clone(),
            audit,
            EmployeeConfig::default(),
        );

        directory
            .upsert(EmployeeRecord {
                employee_id: "e-1".into(),
                role: EmployeeRole::Analyst,
                active: true,
                supervisor_id: Some("sup-1".into()),
            })
            .await;

        Fixture {
            detector,
            directory,
            sessions,
            alerts,
            anomalies,
        }
    }

    /// Most recent Sunday at `hour`, far enough in the past to be a
    /// different day from "now" but inside every window.
    fn last_sunday_at(hour: u32) -> DateTime<Utc> {
        let mut date = Utc::now().date_naive();
        while date.weekday() != Weekday::Sun {
            date = date - chrono::Days::new(1);
        }
        date.and_hms_opt(hour, 0, 0).unwrap().and_utc()
    }

    /// Weekday 9-18 office pattern for four weeks.
    async fn seed_office_baseline(fx: &Fixture, employee: &str) {
        let now = Utc::now();
        for day in 0..28i64 {
            let date = now - Duration::days(day);
            if date.weekday().num_days_from_monday() >= 5 {
                continue;
            }
            for hour in [9u32, 18] {
                fx.directory
                    .push_action(EmployeeActionRecord {
                        employee_id: employee.into(),
                        kind: EmployeeActionKind::Login,
                        resource: "backoffice".into(),
                        client_id: None,
                        ip: "10.1.0.5".into(),
                        amount: None,
                        timestamp: date.date_naive().and_hms_opt(hour, 0, 0).unwrap().and_utc(),
                    })
                    .await;
            }
        }
    }

    fn action_at(at: DateTime<Utc>, kind: EmployeeActionKind) -> EmployeeActionContext {
        let mut ctx = EmployeeActionContext::new("e-1", kind, "client/42", "10.1.0.5");
        ctx.timestamp = at;
        ctx
    }

    #[tokio::test]
    async fn test_sunday_three_am_emits_exactly_one_off_hours_anomaly() {
        let fx = fixture().await;
        seed_office_baseline(&fx, "e-1").await;

        let ctx = action_at(last_sunday_at(3), EmployeeActionKind::DataAccess);
        let anomalies = fx.detector.analyze_action(&ctx).await.unwrap();

        assert_eq!(anomalies.len(), 1, "{anomalies:?}");
        assert_eq!(anomalies[0].anomaly_type, EmployeeAnomalyType::OffHoursAccess);
        assert_eq!(anomalies[0].severity, AnomalySeverity::Medium);
    }

    #[tokio::test]
    async fn test_weekend_daytime_emits_weekend_access() {
        let fx = fixture().await;
        seed_office_baseline(&fx, "e-1").await;

        let ctx = action_at(last_sunday_at(11), EmployeeActionKind::DataAccess);
        let anomalies = fx.detector.analyze_action(&ctx).await.unwrap();

        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].anomaly_type, EmployeeAnomalyType::WeekendAccess);
    }

    #[tokio::test]
    async fn test_unknown_employee_is_not_found() {
        let fx = fixture().await;
        let ctx = EmployeeActionContext::new(
            "ghost",
            EmployeeActionKind::DataAccess,
            "client/42",
            "10.0.0.1",
        );
        let err = fx.detector.analyze_action(&ctx).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_high_value_approval_burst_terminates_session() {
        let fx = fixture().await;
        seed_office_baseline(&fx, "e-1").await;

        // An active back-office session to terminate.
        fx.sessions
            .push(SessionRecord {
                session_id: "bo-session".into(),
                user_id: "e-1".into(),
                started_at: Utc::now(),
                duration_secs: 0,
                ip: "10.1.0.5".into(),
                geo: None,
                platform: Platform::Web,
                device_fingerprint: None,
            })
            .await;

        // Burst of approvals this hour, weekday mid-morning.
        let mut base = Utc::now().date_naive();
        while base.weekday().num_days_from_monday() >= 5 {
            base = base - chrono::Days::new(1);
        }
        let at = base.and_hms_opt(11, 0, 0).unwrap().and_utc();
        for i in 0..6i64 {
            fx.directory
                .push_action(EmployeeActionRecord {
                    employee_id: "e-1".into(),
                    kind: EmployeeActionKind::Approval,
                    resource: format!("transfer/{i}"),
                    client_id: None,
                    ip: "10.1.0.5".into(),
                    amount: Some(5_000.0),
                    timestamp: at - Duration::minutes(i * 5),
                })
                .await;
        }

        let ctx = action_at(at, EmployeeActionKind::Approval)
            .with_amount(500_000.0)
            .with_session("bo-session");
        let anomalies = fx.detector.analyze_action(&ctx).await.unwrap();

        let critical = anomalies
            .iter()
            .find(|a| a.anomaly_type == EmployeeAnomalyType::HighValueApproval)
            .expect("high-value approval anomaly");
        assert_eq!(critical.severity, AnomalySeverity::Critical);
        assert!(fx.sessions.was_terminated("bo-session").await);
        assert!(critical
            .actions_taken
            .iter()
            .any(|a| a.contains("terminated session")));

        // Supervisor and admins both notified.
        let supervisor_alerts = fx
            .alerts
            .alerts_for_target(&AlertTarget::Employee("sup-1".into()))
            .await;
        let admin_alerts = fx.alerts.alerts_for_target(&AlertTarget::AllAdmins).await;
        assert!(!supervisor_alerts.is_empty());
        assert!(!admin_alerts.is_empty());
    }

    #[tokio::test]
    async fn test_bulk_access_flags_dual_approval() {
        let fx = fixture().await;
        seed_office_baseline(&fx, "e-1").await;

        let mut base = Utc::now().date_naive();
        while base.weekday().num_days_from_monday() >= 5 {
            base = base - chrono::Days::new(1);
        }
        let at = base.and_hms_opt(14, 0, 0).unwrap().and_utc();
        for i in 0..30i64 {
            fx.directory
                .push_action(EmployeeActionRecord {
                    employee_id: "e-1".into(),
                    kind: EmployeeActionKind::DataAccess,
                    resource: format!("client/{i}"),
                    client_id: Some(format!("{i}")),
                    ip: "10.1.0.5".into(),
                    amount: None,
                    timestamp: at - Duration::minutes(i),
                })
                .await;
        }

        assert!(!fx.detector.requires_dual_approval("e-1").await);
        let ctx = action_at(at, EmployeeActionKind::DataAccess);
        let anomalies = fx.detector.analyze_action(&ctx).await.unwrap();

        assert!(anomalies
            .iter()
            .any(|a| a.anomaly_type == EmployeeAnomalyType::BulkDataAccess));
        assert!(fx.detector.requires_dual_approval("e-1").await);

        fx.detector
            .clear_dual_approval("e-1", &Actor::employee("sup-1"))
            .await
            .unwrap();
        assert!(!fx.detector.requires_dual_approval("e-1").await);
    }

    #[tokio::test]
    async fn test_velocity_spike() {
        let fx = fixture().await;
        seed_office_baseline(&fx, "e-1").await;

        let mut base = Utc::now().date_naive();
        while base.weekday().num_days_from_monday() >= 5 {
            base = base - chrono::Days::new(1);
        }
        let at = base.and_hms_opt(15, 0, 0).unwrap().and_utc();
        for i in 0..60i64 {
            fx.directory
                .push_action(EmployeeActionRecord {
                    employee_id: "e-1".into(),
                    kind: EmployeeActionKind::Other,
                    resource: format!("row/{i}"),
                    client_id: None,
                    ip: "10.1.0.5".into(),
                    amount: None,
                    timestamp: at - Duration::seconds(i * 4),
                })
                .await;
        }

        let ctx = action_at(at, EmployeeActionKind::Other);
        let anomalies = fx.detector.analyze_action(&ctx).await.unwrap();
        assert!(anomalies
            .iter()
            .any(|a| a.anomaly_type == EmployeeAnomalyType::VelocitySpike));
    }

    #[tokio::test]
    async fn test_multi_ip_access_with_unknown_ip() {
        let fx = fixture().await;
        seed_office_baseline(&fx, "e-1").await;

        let mut base = Utc::now().date_naive();
        while base.weekday().num_days_from_monday() >= 5 {
            base = base - chrono::Days::new(1);
        }
        let at = base.and_hms_opt(10, 0, 0).unwrap().and_utc();
        for (i, ip) in ["172.16.0.1", "172.16.0.2"].iter().enumerate() {
            fx.directory
                .push_action(EmployeeActionRecord {
                    employee_id: "e-1".into(),
                    kind: EmployeeActionKind::DataAccess,
                    resource: "client/1".into(),
                    client_id: None,
                    ip: (*ip).into(),
                    amount: None,
                    timestamp: at - Duration::minutes(i as i64 * 10 + 5),
                })
                .await;
        }

        let mut ctx = action_at(at, EmployeeActionKind::Other);
        ctx.ip = "203.0.113.9".into();
        let anomalies = fx.detector.analyze_action(&ctx).await.unwrap();
        assert!(anomalies
            .iter()
            .any(|a| a.anomaly_type == EmployeeAnomalyType::MultiIpAccess));
    }

    #[tokio::test]
    async fn test_review_state_machine() {
        let fx = fixture().await;
        seed_office_baseline(&fx, "e-1").await;

        let ctx = action_at(last_sunday_at(3), EmployeeActionKind::DataAccess);
        let anomalies = fx.detector.analyze_action(&ctx).await.unwrap();
        let id = anomalies[0].id;
        let reviewer = Actor::employee("sup-1");

        let investigating = fx
            .detector
            .review_anomaly(id, AnomalyStatus::Investigating, &reviewer)
            .await
            .unwrap();
        assert_eq!(investigating.status, AnomalyStatus::Investigating);

        // Detected -> Resolved is not a legal shortcut from here.
        let err = fx
            .detector
            .review_anomaly(id, AnomalyStatus::Investigating, &reviewer)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        let confirmed = fx
            .detector
            .review_anomaly(id, AnomalyStatus::Confirmed, &reviewer)
            .await
            .unwrap();
        assert_eq!(confirmed.status, AnomalyStatus::Confirmed);

        let resolved = fx
            .detector
            .review_anomaly(id, AnomalyStatus::Resolved, &reviewer)
            .await
            .unwrap();
        assert_eq!(resolved.status, AnomalyStatus::Resolved);
        assert_eq!(resolved.actions_taken.len(), 4);
    }

    #[tokio::test]
    async fn test_anomalies_are_persisted() {
        let fx = fixture().await;
        seed_office_baseline(&fx, "e-1").await;

        let ctx = action_at(last_sunday_at(3), EmployeeActionKind::DataAccess);
        fx.detector.analyze_action(&ctx).await.unwrap();

        let stored = fx.anomalies.for_employee("e-1").await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].status, AnomalyStatus::Detected);
    }
}
