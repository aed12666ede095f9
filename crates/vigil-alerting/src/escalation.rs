//! Escalation sweep for unread alerts.
//!
//! Runs periodically; for every unread chain tip whose timer elapsed it
//! creates a new linked alert with a widened target. Originals are never
//! mutated beyond their `escalated_to` link, and a chain escalates at most
//! [`MAX_ESCALATION_LEVEL`](crate::types::MAX_ESCALATION_LEVEL) times.

use crate::service::AlertService;
use crate::types::{Alert, AlertStatus, AlertTarget, MAX_ESCALATION_LEVEL};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;
use vigil_core::error::Result;

/// Escalation timers per priority, in minutes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationConfig {
    /// Timer for low-priority alerts.
    pub low_mins: i64,
    /// Timer for medium-priority alerts.
    pub medium_mins: i64,
    /// Timer for high-priority alerts.
    pub high_mins: i64,
    /// Timer for critical alerts.
    pub critical_mins: i64,
    /// Timer for emergency alerts.
    pub emergency_mins: i64,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            low_mins: 24 * 60,
            medium_mins: 4 * 60,
            high_mins: 60,
            critical_mins: 15,
            emergency_mins: 5,
        }
    }
}

impl EscalationConfig {
    /// Timer for a priority.
    #[must_use]
    pub fn delay(&self, priority: crate::types::AlertPriority) -> Duration {
        use crate::types::AlertPriority::*;
        let mins = match priority {
            Low => self.low_mins,
            Medium => self.medium_mins,
            High => self.high_mins,
            Critical => self.critical_mins,
            Emergency => self.emergency_mins,
        };
        Duration::minutes(mins)
    }
}

/// Target for the next escalation level: admins first, then super admins,
/// then every administrator at once.
fn widened_target(level: u8) -> AlertTarget {
    match level {
        1 => AlertTarget::Role("admin".to_string()),
        2 => AlertTarget::Role("super_admin".to_string()),
        _ => AlertTarget::AllAdmins,
    }
}

impl AlertService {
    /// Run one escalation sweep. Idempotent: re-running immediately finds
    /// nothing due and is a no-op. Returns the escalation alerts created.
    pub async fn run_escalation_sweep(&self) -> Result<Vec<Alert>> {
        let now = Utc::now();
        let config = self.escalation_config().clone();

        let due: Vec<Alert> = self
            .all_alerts()
            .await
            .into_iter()
            .filter(|a| {
                a.is_unread()
                    && a.escalated_to.is_none()
                    && a.escalation_level < MAX_ESCALATION_LEVEL
                    && now - a.created_at >= config.delay(a.priority)
            })
            .collect();

        let mut created = Vec::new();
        for tip in due {
            let next_level = tip.escalation_level + 1;
            let escalation = Alert {
                id: Uuid::new_v4(),
                category: tip.category,
                priority: tip.priority,
                title: format!("[escalated] {}", tip.title),
                message: tip.message.clone(),
                target: widened_target(next_level),
                source: tip.source.clone(),
                source_id: tip.source_id.clone(),
                channels: tip.priority.default_channels(),
                status: AlertStatus::Pending,
                escalation_level: next_level,
                escalated_from: Some(tip.id),
                escalated_to: None,
                created_at: now,
                sent_at: None,
                handled_by: None,
            };

            let delivered = self.deliver_escalation(escalation).await?;
            self.link_escalation(tip.id, delivered.id).await;

            info!(
                original = %tip.id,
                escalation = %delivered.id,
                level = next_level,
                target = %delivered.target,
                "alert escalated"
            );
            created.push(delivered);
        }

        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{AlertRequest, AlertingConfig};
    use crate::types::{AlertCategory, AlertPriority};
    use std::sync::Arc;
    use vigil_core::audit::MemoryAuditSink;
    use vigil_core::memory::RecordingSender;
    use vigil_core::types::Actor;

    /// Config whose timers already elapsed at creation time, so a sweep
    /// immediately finds alerts due.
    fn instant_escalation() -> AlertingConfig {
        AlertingConfig::default().with_escalation(EscalationConfig {
            low_mins: 0,
            medium_mins: 0,
            high_mins: 0,
            critical_mins: 0,
            emergency_mins: 0,
        })
    }

    fn service(config: AlertingConfig) -> AlertService {
        AlertService::new(
            Arc::new(RecordingSender::new()),
            Arc::new(MemoryAuditSink::new()),
            config,
        )
    }

    fn request() -> AlertRequest {
        AlertRequest::new(
            AlertCategory::Employee,
            AlertPriority::Critical,
            "approval burst",
            "employee e-1 approvals spiked",
            AlertTarget::Employee("sup-1".into()),
            "employee_detector",
        )
    }

    #[tokio::test]
    async fn test_sweep_escalates_unread_chain_tip() {
        let service = service(instant_escalation());
        let original = service.create_alert(request()).await.unwrap();

        let created = service.run_escalation_sweep().await.unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].escalation_level, 1);
        assert_eq!(created[0].escalated_from, Some(original.id));
        assert_eq!(created[0].target, AlertTarget::Role("admin".into()));

        // Original now carries the link and is skipped next sweep.
        let refreshed = service.alert(original.id).await.unwrap();
        assert_eq!(refreshed.escalated_to, Some(created[0].id));
    }

    #[tokio::test]
    async fn test_chain_never_exceeds_three_levels() {
        let service = service(instant_escalation());
        service.create_alert(request()).await.unwrap();

        for _ in 0..6 {
            service.run_escalation_sweep().await.unwrap();
        }

        let max_level = service
            .all_alerts()
            .await
            .iter()
            .map(|a| a.escalation_level)
            .max()
            .unwrap();
        assert_eq!(max_level, MAX_ESCALATION_LEVEL);
        // Original + exactly three escalations.
        assert_eq!(service.all_alerts().await.len(), 4);
    }

    #[tokio::test]
    async fn test_read_alert_is_not_escalated() {
        let service = service(instant_escalation());
        let alert = service.create_alert(request()).await.unwrap();
        service
            .mark_read(alert.id, &Actor::employee("sup-1"))
            .await
            .unwrap();

        let created = service.run_escalation_sweep().await.unwrap();
        assert!(created.is_empty());
    }

    #[tokio::test]
    async fn test_sweep_with_default_timers_is_noop() {
        let service = service(AlertingConfig::default());
        service.create_alert(request()).await.unwrap();

        let created = service.run_escalation_sweep().await.unwrap();
        assert!(created.is_empty());
    }

    #[test]
    fn test_widened_targets() {
        assert_eq!(widened_target(1), AlertTarget::Role("admin".into()));
        assert_eq!(widened_target(2), AlertTarget::Role("super_admin".into()));
        assert_eq!(widened_target(3), AlertTarget::AllAdmins);
    }
}
