//! The unified decision engine.
//!
//! Wires every component over a shared set of stores and exposes the
//! engine's operation set. The kill switch is consulted before scoring
//! paths; every mutation takes an actor for audit attribution.

use crate::config::EngineConfig;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;
use vigil_alerting::{
    Alert, AlertCategory, AlertPriority, AlertRequest, AlertService, AlertTarget,
};
use vigil_auth::types::InMemoryAssessmentStore;
use vigil_auth::{ChallengeKind, OperationContext, RiskAssessment, RiskAssessor};
use vigil_behavior::types::InMemoryProfileStore;
use vigil_behavior::{detect_anomalies, BehaviorAnomaly, BehaviorEngine, BehaviorProfile, LiveEvent};
use vigil_core::audit::{AuditSink, TracingAuditSink};
use vigil_core::error::{EngineError, Result};
use vigil_core::memory::{
    InMemoryEmployeeDirectory, InMemoryIdentityStore, InMemoryLedger, InMemorySessionStore,
    RecordingSender, StaticSegmentResolver,
};
use vigil_core::stores::{
    EmployeeDirectory, IdentityStore, NotificationChannel, NotificationSender, SessionStore,
    TransactionKind, TransactionLedger, UserSegmentResolver,
};
use vigil_core::types::{Actor, PolicyDecision};
use vigil_device::{DeviceRecord, DeviceRegistry, DeviceSignals};
use vigil_employee::types::{AnomalyStore, InMemoryAnomalyStore, InMemoryBaselineStore};
use vigil_employee::{
    AnomalyStatus, BaselineBuilder, EmployeeActionContext, EmployeeAnomaly,
    EmployeeAnomalyDetector,
};
use vigil_fraud::types::InMemoryEvaluationStore;
use vigil_fraud::{FraudEnsemble, FraudEvaluation, TransactionContext};
use vigil_guard::types::InMemoryKillStateStore;
use vigil_guard::{
    ActiveKillSwitch, KillScope, KillSwitchService, Product, TrafficStatsProvider, TxType,
};
use vigil_trust::types::InMemorySnapshotStore;
use vigil_trust::{ScoreTrend, TrustScoreEngine, TrustScoreSnapshot};

/// Builder for [`DecisionEngine`]. Stores not supplied fall back to the
/// in-memory implementations, which is what tests and single-process
/// deployments use.
pub struct DecisionEngineBuilder {
    config: EngineConfig,
    identity: Option<Arc<dyn IdentityStore>>,
    ledger: Option<Arc<dyn TransactionLedger>>,
    sessions: Option<Arc<dyn SessionStore>>,
    directory: Option<Arc<dyn EmployeeDirectory>>,
    segments: Option<Arc<dyn UserSegmentResolver>>,
    sender: Option<Arc<dyn NotificationSender>>,
    audit: Option<Arc<dyn AuditSink>>,
}

impl DecisionEngineBuilder {
    /// Start from a configuration.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            identity: None,
            ledger: None,
            sessions: None,
            directory: None,
            segments: None,
            sender: None,
            audit: None,
        }
    }

    /// Set the identity store.
    #[must_use]
    pub fn identity(mut self, store: Arc<dyn IdentityStore>) -> Self {
        self.identity = Some(store);
        self
    }

    /// Set the transaction ledger.
    #[must_use]
    pub fn ledger(mut self, store: Arc<dyn TransactionLedger>) -> Self {
        self.ledger = Some(store);
        self
    }

    /// Set the session store.
    #[must_use]
    pub fn sessions(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.sessions = Some(store);
        self
    }

    /// Set the employee directory.
    #[must_use]
    pub fn directory(mut self, store: Arc<dyn EmployeeDirectory>) -> Self {
        self.directory = Some(store);
        self
    }

    /// Set the user segment resolver.
    #[must_use]
    pub fn segments(mut self, resolver: Arc<dyn UserSegmentResolver>) -> Self {
        self.segments = Some(resolver);
        self
    }

    /// Set the notification sender.
    #[must_use]
    pub fn sender(mut self, sender: Arc<dyn NotificationSender>) -> Self {
        self.sender = Some(sender);
        self
    }

    /// Set the audit sink.
    #[must_use]
    pub fn audit(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    /// Wire the engine.
    #[must_use]
    pub fn build(self) -> DecisionEngine {
        let config = self.config;
        let identity = self
            .identity
            .unwrap_or_else(|| Arc::new(InMemoryIdentityStore::new()));
        let ledger = self
            .ledger
            .unwrap_or_else(|| Arc::new(InMemoryLedger::new()));
        let sessions = self
            .sessions
            .unwrap_or_else(|| Arc::new(InMemorySessionStore::new()));
        let directory = self
            .directory
            .unwrap_or_else(|| Arc::new(InMemoryEmployeeDirectory::new()));
        let segments = self
            .segments
            .unwrap_or_else(|| Arc::new(StaticSegmentResolver::new()));
        let sender = self
            .sender
            .unwrap_or_else(|| Arc::new(RecordingSender::new()));
        let audit: Arc<dyn AuditSink> = self.audit.unwrap_or_else(|| Arc::new(TracingAuditSink));

        let alerts = Arc::new(AlertService::new(
            sender.clone(),
            audit.clone(),
            config.alerting.clone(),
        ));
        let devices = Arc::new(DeviceRegistry::new(
            sender.clone(),
            audit.clone(),
            config.device.clone(),
        ));
        let trust = Arc::new(TrustScoreEngine::new(
            identity.clone(),
            ledger.clone(),
            sessions.clone(),
            Arc::new(InMemorySnapshotStore::new()),
            config.trust.clone(),
        ));
        let behavior = Arc::new(BehaviorEngine::new(
            sessions.clone(),
            ledger.clone(),
            Arc::new(InMemoryProfileStore::new()),
            config.behavior.clone(),
        ));
        let guard = Arc::new(KillSwitchService::new(
            Arc::new(InMemoryKillStateStore::new()),
            segments,
            alerts.clone(),
            audit.clone(),
            config.guard.clone(),
        ));
        let assessor = Arc::new(RiskAssessor::new(
            devices.clone(),
            trust.clone(),
            ledger.clone(),
            sessions.clone(),
            alerts.clone(),
            Arc::new(InMemoryAssessmentStore::new()),
            audit.clone(),
            config.auth.clone(),
        ));
        let ensemble = Arc::new(FraudEnsemble::new(
            identity.clone(),
            ledger.clone(),
            sessions.clone(),
            trust.clone(),
            behavior.clone(),
            devices.clone(),
            alerts.clone(),
            Arc::new(InMemoryEvaluationStore::new()),
            audit.clone(),
            config.fraud.clone(),
        ));
        let anomalies: Arc<dyn AnomalyStore> = Arc::new(InMemoryAnomalyStore::new());
        let employee = Arc::new(EmployeeAnomalyDetector::new(
            directory.clone(),
            sessions.clone(),
            Arc::new(BaselineBuilder::new(
                directory,
                Arc::new(InMemoryBaselineStore::new()),
            )),
            anomalies,
            alerts.clone(),
            audit.clone(),
            config.employee.clone(),
        ));

        DecisionEngine {
            trust,
            devices,
            behavior,
            assessor,
            ensemble,
            employee,
            guard,
            alerts,
        }
    }
}

/// The assembled decision engine.
pub struct DecisionEngine {
    trust: Arc<TrustScoreEngine>,
    devices: Arc<DeviceRegistry>,
    behavior: Arc<BehaviorEngine>,
    assessor: Arc<RiskAssessor>,
    ensemble: Arc<FraudEnsemble>,
    employee: Arc<EmployeeAnomalyDetector>,
    guard: Arc<KillSwitchService>,
    alerts: Arc<AlertService>,
}

impl DecisionEngine {
    /// Builder with default configuration.
    #[must_use]
    pub fn builder() -> DecisionEngineBuilder {
        DecisionEngineBuilder::new(EngineConfig::default())
    }

    /// Builder with a specific configuration.
    #[must_use]
    pub fn builder_with(config: EngineConfig) -> DecisionEngineBuilder {
        DecisionEngineBuilder::new(config)
    }

    // ------------------------------------------------------------------
    // Trust
    // ------------------------------------------------------------------

    /// Current trust score: cached snapshot when fresh, recomputed
    /// otherwise.
    pub async fn get_trust_score(&self, user_id: &str) -> Result<TrustScoreSnapshot> {
        self.trust.get_score(user_id).await
    }

    /// Force a trust score recomputation.
    pub async fn recalculate_trust_score(&self, user_id: &str) -> Result<TrustScoreSnapshot> {
        self.trust.recalculate(user_id).await
    }

    /// Score trend across the last two snapshots.
    pub async fn trust_trend(&self, user_id: &str) -> Result<ScoreTrend> {
        self.trust.score_trend(user_id).await
    }

    // ------------------------------------------------------------------
    // Devices
    // ------------------------------------------------------------------

    /// Register a device sighting.
    pub async fn register_device(
        &self,
        user_id: &str,
        signals: &DeviceSignals,
        ip: &str,
    ) -> Result<DeviceRecord> {
        self.devices.register_device(user_id, signals, ip).await
    }

    /// Allow/deny verdict for a (user, device) pair.
    pub async fn is_device_allowed(
        &self,
        user_id: &str,
        fingerprint: &str,
    ) -> Result<PolicyDecision> {
        self.devices.is_device_allowed(user_id, fingerprint).await
    }

    /// Record a sensitive-operation outcome against a device.
    pub async fn record_device_operation(
        &self,
        user_id: &str,
        fingerprint: &str,
        success: bool,
    ) -> Result<DeviceRecord> {
        self.devices
            .record_operation(user_id, fingerprint, success)
            .await
    }

    /// Explicitly trust a device.
    pub async fn trust_device(
        &self,
        user_id: &str,
        fingerprint: &str,
        actor: &Actor,
    ) -> Result<DeviceRecord> {
        self.devices.trust_device(user_id, fingerprint, actor).await
    }

    /// Block a device.
    pub async fn block_device(
        &self,
        user_id: &str,
        fingerprint: &str,
        actor: &Actor,
    ) -> Result<DeviceRecord> {
        self.devices.block_device(user_id, fingerprint, actor).await
    }

    // ------------------------------------------------------------------
    // Risk-based auth
    // ------------------------------------------------------------------

    /// Assess one operation attempt. The kill switch is consulted first
    /// for operations that map onto a gated product; a kill denial
    /// surfaces as [`EngineError::PolicyDenied`] before any scoring runs.
    pub async fn assess_risk(&self, ctx: &OperationContext) -> Result<RiskAssessment> {
        if let Some((product, tx_type)) = operation_gate(ctx.operation) {
            let decision = self
                .guard
                .check_operation_allowed(&ctx.user_id, product, None, tx_type)
                .await?;
            deny_if_blocked(decision)?;
        }
        self.assessor.assess_risk(ctx).await
    }

    /// Verify a step-up challenge for the session's latest assessment.
    pub async fn verify_challenge(
        &self,
        user_id: &str,
        session_id: &str,
        challenge: ChallengeKind,
        response: &str,
    ) -> Result<RiskAssessment> {
        self.assessor
            .verify_challenge(user_id, session_id, challenge, response)
            .await
    }

    // ------------------------------------------------------------------
    // Fraud
    // ------------------------------------------------------------------

    /// Evaluate a transaction through the fraud ensemble. The kill switch
    /// is consulted first.
    pub async fn evaluate_transaction(
        &self,
        ctx: &TransactionContext,
    ) -> Result<FraudEvaluation> {
        let (product, tx_type) = transaction_gate(ctx.kind);
        let decision = self
            .guard
            .check_operation_allowed(
                &ctx.user_id,
                product,
                ctx.recipient_country.as_deref(),
                Some(tx_type),
            )
            .await?;
        deny_if_blocked(decision)?;

        self.ensemble.evaluate_transaction(ctx).await
    }

    // ------------------------------------------------------------------
    // Behavior
    // ------------------------------------------------------------------

    /// Current behavioral profile, built on first access.
    pub async fn get_or_build_profile(&self, user_id: &str) -> Result<BehaviorProfile> {
        self.behavior.get_or_build(user_id).await
    }

    /// Rebuild the behavioral profile from the history windows.
    pub async fn rebuild_profile(&self, user_id: &str) -> Result<BehaviorProfile> {
        self.behavior.rebuild(user_id).await
    }

    /// Compare a live event against the stored profile.
    pub async fn detect_anomalies(
        &self,
        user_id: &str,
        event: &LiveEvent,
    ) -> Result<Vec<BehaviorAnomaly>> {
        let profile = self.behavior.get_or_build(user_id).await?;
        Ok(detect_anomalies(&profile, event))
    }

    // ------------------------------------------------------------------
    // Employees
    // ------------------------------------------------------------------

    /// Analyze a back-office action for insider anomalies.
    pub async fn analyze_employee_action(
        &self,
        ctx: &EmployeeActionContext,
    ) -> Result<Vec<EmployeeAnomaly>> {
        self.employee.analyze_action(ctx).await
    }

    /// Move an employee anomaly through its review state machine.
    pub async fn review_employee_anomaly(
        &self,
        anomaly_id: Uuid,
        to: AnomalyStatus,
        actor: &Actor,
    ) -> Result<EmployeeAnomaly> {
        self.employee.review_anomaly(anomaly_id, to, actor).await
    }

    /// True when the employee needs dual approval for sensitive
    /// operations.
    pub async fn employee_requires_dual_approval(&self, employee_id: &str) -> bool {
        self.employee.requires_dual_approval(employee_id).await
    }

    // ------------------------------------------------------------------
    // Kill switch
    // ------------------------------------------------------------------

    /// Check whether an operation may proceed on the five kill axes.
    pub async fn check_operation_allowed(
        &self,
        user_id: &str,
        product: Product,
        region: Option<&str>,
        tx_type: Option<TxType>,
    ) -> Result<PolicyDecision> {
        self.guard
            .check_operation_allowed(user_id, product, region, tx_type)
            .await
    }

    /// Activate a kill switch.
    pub async fn activate_kill_switch(
        &self,
        scope: KillScope,
        target: Option<&str>,
        reason: &str,
        actor: &Actor,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<ActiveKillSwitch> {
        self.guard
            .activate(scope, target, reason, actor, expires_at)
            .await
    }

    /// Deactivate a kill switch.
    pub async fn deactivate_kill_switch(
        &self,
        scope: KillScope,
        target: Option<&str>,
        reason: &str,
        actor: &Actor,
    ) -> Result<()> {
        self.guard.deactivate(scope, target, reason, actor).await
    }

    /// Run the auto-trigger sweep against current traffic.
    pub async fn run_auto_trigger_sweep(
        &self,
        stats: &dyn TrafficStatsProvider,
    ) -> Result<Vec<ActiveKillSwitch>> {
        self.guard.run_auto_trigger_sweep(stats).await
    }

    /// Deactivate expired kill switches.
    pub async fn run_kill_switch_cleanup(&self) -> Result<usize> {
        self.guard.run_cleanup_sweep().await
    }

    // ------------------------------------------------------------------
    // Alerts
    // ------------------------------------------------------------------

    /// Create an alert (deduplicated within the configured window).
    pub async fn create_alert(
        &self,
        category: AlertCategory,
        priority: AlertPriority,
        title: &str,
        message: &str,
        target: AlertTarget,
        source: &str,
        channels: Option<Vec<NotificationChannel>>,
    ) -> Result<Alert> {
        let mut request =
            AlertRequest::new(category, priority, title, message, target, source);
        request.channels = channels;
        self.alerts.create_alert(request).await
    }

    /// Mark an alert read.
    pub async fn mark_alert_read(&self, alert_id: Uuid, actor: &Actor) -> Result<Alert> {
        self.alerts.mark_read(alert_id, actor).await
    }

    /// Mark an alert actioned.
    pub async fn mark_alert_actioned(&self, alert_id: Uuid, actor: &Actor) -> Result<Alert> {
        self.alerts.mark_actioned(alert_id, actor).await
    }

    /// Run the alert escalation sweep.
    pub async fn run_escalation_sweep(&self) -> Result<Vec<Alert>> {
        self.alerts.run_escalation_sweep().await
    }

    /// Alerts addressed to a target, newest first.
    pub async fn alerts_for_target(&self, target: &AlertTarget) -> Vec<Alert> {
        self.alerts.alerts_for_target(target).await
    }
}

/// Product/transaction-type gate for scored operations, when one applies.
fn operation_gate(operation: vigil_auth::OperationKind) -> Option<(Product, Option<TxType>)> {
    use vigil_auth::OperationKind::*;
    match operation {
        Transfer => Some((Product::Transfers, Some(TxType::Transfer))),
        Withdrawal => Some((Product::Withdrawals, Some(TxType::Withdrawal))),
        Payment => Some((Product::Payments, Some(TxType::Payment))),
        Financing => Some((Product::Financing, None)),
        _ => None,
    }
}

/// Product/transaction-type gate for ledger transactions.
fn transaction_gate(kind: TransactionKind) -> (Product, TxType) {
    match kind {
        TransactionKind::TransferOut | TransactionKind::TransferIn => {
            (Product::Transfers, TxType::Transfer)
        }
        TransactionKind::Withdrawal => (Product::Withdrawals, TxType::Withdrawal),
        TransactionKind::Deposit => (Product::Deposits, TxType::Deposit),
        TransactionKind::Payment => (Product::Payments, TxType::Payment),
        TransactionKind::Financing => (Product::Financing, TxType::Payment),
    }
}

fn deny_if_blocked(decision: PolicyDecision) -> Result<()> {
    if decision.allowed {
        return Ok(());
    }
    Err(EngineError::PolicyDenied {
        code: decision
            .reason_code
            .unwrap_or(vigil_core::types::DenialCode::GlobalKill),
        message: decision
            .message
            .unwrap_or_else(|| "operation denied".to_string()),
    })
}
