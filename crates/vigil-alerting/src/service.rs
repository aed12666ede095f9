//! Alert creation, deduplication, and channel fan-out.

use crate::escalation::EscalationConfig;
use crate::types::{Alert, AlertCategory, AlertPriority, AlertStatus, AlertTarget};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;
use vigil_core::audit::{AuditEntry, AuditSeverity, AuditSink};
use vigil_core::error::{EngineError, Result};
use vigil_core::stores::{NotificationChannel, NotificationMessage, NotificationSender};
use vigil_core::types::Actor;

/// Alerting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertingConfig {
    /// Window inside which identical alerts are collapsed.
    pub dedup_window_secs: u64,
    /// Escalation timers.
    pub escalation: EscalationConfig,
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            dedup_window_secs: 300,
            escalation: EscalationConfig::default(),
        }
    }
}

impl AlertingConfig {
    /// Production preset: 5 min dedup window, standard escalation timers.
    #[must_use]
    pub fn production() -> Self {
        Self::default()
    }

    /// Set the dedup window.
    #[must_use]
    pub fn with_dedup_window_secs(mut self, secs: u64) -> Self {
        self.dedup_window_secs = secs;
        self
    }

    /// Set the escalation config.
    #[must_use]
    pub fn with_escalation(mut self, escalation: EscalationConfig) -> Self {
        self.escalation = escalation;
        self
    }
}

/// Parameters for creating one alert.
#[derive(Debug, Clone)]
pub struct AlertRequest {
    /// Category.
    pub category: AlertCategory,
    /// Priority.
    pub priority: AlertPriority,
    /// Short title.
    pub title: String,
    /// Message body.
    pub message: String,
    /// Addressee.
    pub target: AlertTarget,
    /// Raising component (snake_case).
    pub source: String,
    /// Originating record id, when there is one.
    pub source_id: Option<String>,
    /// Channel override; `None` uses the priority defaults.
    pub channels: Option<Vec<NotificationChannel>>,
}

impl AlertRequest {
    /// Create a request with priority-default channels.
    #[must_use]
    pub fn new(
        category: AlertCategory,
        priority: AlertPriority,
        title: impl Into<String>,
        message: impl Into<String>,
        target: AlertTarget,
        source: impl Into<String>,
    ) -> Self {
        Self {
            category,
            priority,
            title: title.into(),
            message: message.into(),
            target,
            source: source.into(),
            source_id: None,
            channels: None,
        }
    }

    /// Attach the originating record id.
    #[must_use]
    pub fn with_source_id(mut self, id: impl Into<String>) -> Self {
        self.source_id = Some(id.into());
        self
    }

    /// Override the channel set.
    #[must_use]
    pub fn with_channels(mut self, channels: Vec<NotificationChannel>) -> Self {
        self.channels = Some(channels);
        self
    }
}

/// Single entry point for raising and tracking alerts.
pub struct AlertService {
    alerts: RwLock<HashMap<Uuid, Alert>>,
    sender: Arc<dyn NotificationSender>,
    audit: Arc<dyn AuditSink>,
    config: AlertingConfig,
}

impl AlertService {
    /// Create a new service.
    pub fn new(
        sender: Arc<dyn NotificationSender>,
        audit: Arc<dyn AuditSink>,
        config: AlertingConfig,
    ) -> Self {
        Self {
            alerts: RwLock::new(HashMap::new()),
            sender,
            audit,
            config,
        }
    }

    /// Escalation configuration in effect.
    #[must_use]
    pub fn escalation_config(&self) -> &EscalationConfig {
        &self.config.escalation
    }

    /// Create an alert, deduplicating within the configured window.
    ///
    /// A duplicate (same category, source, source id, and target inside the
    /// window) returns the existing alert unchanged; callers treat that as
    /// already handled.
    pub async fn create_alert(&self, request: AlertRequest) -> Result<Alert> {
        if request.title.trim().is_empty() {
            return Err(EngineError::validation("alert title must not be empty"));
        }

        let now = Utc::now();
        let window = Duration::seconds(self.config.dedup_window_secs as i64);

        {
            let alerts = self.alerts.read().await;
            let duplicate = alerts.values().find(|a| {
                a.category == request.category
                    && a.source == request.source
                    && a.source_id == request.source_id
                    && a.target == request.target
                    && now - a.created_at <= window
            });
            if let Some(existing) = duplicate {
                debug!(
                    alert_id = %existing.id,
                    source = %request.source,
                    "duplicate alert collapsed"
                );
                return Ok(existing.clone());
            }
        }

        let channels = request
            .channels
            .clone()
            .unwrap_or_else(|| request.priority.default_channels());

        let mut alert = Alert {
            id: Uuid::new_v4(),
            category: request.category,
            priority: request.priority,
            title: request.title,
            message: request.message,
            target: request.target,
            source: request.source,
            source_id: request.source_id,
            channels,
            status: AlertStatus::Pending,
            escalation_level: 0,
            escalated_from: None,
            escalated_to: None,
            created_at: now,
            sent_at: None,
            handled_by: None,
        };

        self.fan_out(&alert).await;
        alert.status = AlertStatus::Sent;
        alert.sent_at = Some(Utc::now());

        self.alerts.write().await.insert(alert.id, alert.clone());
        Ok(alert)
    }

    /// Insert an escalation alert built by the escalation sweep.
    pub(crate) async fn deliver_escalation(&self, mut alert: Alert) -> Result<Alert> {
        self.fan_out(&alert).await;
        alert.status = AlertStatus::Sent;
        alert.sent_at = Some(Utc::now());
        self.alerts.write().await.insert(alert.id, alert.clone());
        Ok(alert)
    }

    /// Dispatch an alert on each of its channels. One channel failing never
    /// blocks the others; failures are logged and skipped.
    async fn fan_out(&self, alert: &Alert) {
        let message = NotificationMessage {
            target: alert.target.key(),
            title: alert.title.clone(),
            body: alert.message.clone(),
        };

        for &channel in &alert.channels {
            if let Err(err) = self.sender.send(channel, &message).await {
                warn!(
                    alert_id = %alert.id,
                    channel = %channel,
                    error = %err,
                    "alert channel dispatch failed"
                );
            }
        }
    }

    /// Mark an alert read by `actor`.
    pub async fn mark_read(&self, alert_id: Uuid, actor: &Actor) -> Result<Alert> {
        self.advance_status(alert_id, AlertStatus::Read, actor, "mark_alert_read")
            .await
    }

    /// Mark an alert actioned by `actor`.
    pub async fn mark_actioned(&self, alert_id: Uuid, actor: &Actor) -> Result<Alert> {
        self.advance_status(alert_id, AlertStatus::Actioned, actor, "mark_alert_actioned")
            .await
    }

    async fn advance_status(
        &self,
        alert_id: Uuid,
        to: AlertStatus,
        actor: &Actor,
        action: &str,
    ) -> Result<Alert> {
        let updated = {
            let mut alerts = self.alerts.write().await;
            let alert = alerts
                .get_mut(&alert_id)
                .ok_or_else(|| EngineError::not_found("alert", alert_id.to_string()))?;

            if alert.status.rank() >= to.rank() {
                return Err(EngineError::conflict(format!(
                    "alert {alert_id} already {:?}",
                    alert.status
                )));
            }
            alert.status = to;
            alert.handled_by = Some(actor.to_string());
            alert.clone()
        };

        self.audit
            .record(
                AuditEntry::new(actor.clone(), action, format!("alert/{alert_id}"))
                    .with_severity(AuditSeverity::Info),
            )
            .await?;
        Ok(updated)
    }

    /// Fetch one alert.
    pub async fn alert(&self, alert_id: Uuid) -> Result<Alert> {
        self.alerts
            .read()
            .await
            .get(&alert_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("alert", alert_id.to_string()))
    }

    /// All alerts addressed to a target, newest first.
    pub async fn alerts_for_target(&self, target: &AlertTarget) -> Vec<Alert> {
        let mut alerts: Vec<Alert> = self
            .alerts
            .read()
            .await
            .values()
            .filter(|a| &a.target == target)
            .cloned()
            .collect();
        alerts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        alerts
    }

    /// True when an unresolved alert of `category` targets the user.
    pub async fn has_open_alert(&self, category: AlertCategory, user_id: &str) -> bool {
        let target = AlertTarget::User(user_id.to_string());
        self.alerts
            .read()
            .await
            .values()
            .any(|a| a.category == category && a.target == target && a.status != AlertStatus::Actioned)
    }

    /// Snapshot of every stored alert. Used by sweeps and tests.
    pub async fn all_alerts(&self) -> Vec<Alert> {
        self.alerts.read().await.values().cloned().collect()
    }

    pub(crate) async fn link_escalation(&self, from: Uuid, to: Uuid) {
        if let Some(alert) = self.alerts.write().await.get_mut(&from) {
            alert.escalated_to = Some(to);
        }
    }
}
