//! Automatic kill-switch triggers and expiry cleanup.
//!
//! Both sweeps run on a schedule independent of manual control, are
//! idempotent, and are safe to run concurrently with live traffic: a
//! sweep that finds nothing due is a no-op.

use crate::switch::KillSwitchService;
use crate::types::{ActiveKillSwitch, KillScope, TxType};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use vigil_alerting::{AlertCategory, AlertPriority, AlertRequest, AlertTarget};
use vigil_core::error::Result;
use vigil_core::types::Actor;

/// Trailing-hour traffic aggregates consumed by the auto-trigger sweep.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TrafficStats {
    /// Transactions processed in the trailing hour.
    pub transaction_count: u64,
    /// Transactions flagged by fraud evaluation in the trailing hour.
    pub fraud_count: u64,
    /// Failed operations in the trailing hour.
    pub error_count: u64,
}

impl TrafficStats {
    /// Fraud rate in [0, 1]; zero with no traffic.
    #[must_use]
    pub fn fraud_rate(&self) -> f64 {
        if self.transaction_count == 0 {
            0.0
        } else {
            self.fraud_count as f64 / self.transaction_count as f64
        }
    }

    /// Error rate in [0, 1]; zero with no traffic.
    #[must_use]
    pub fn error_rate(&self) -> f64 {
        if self.transaction_count == 0 {
            0.0
        } else {
            self.error_count as f64 / self.transaction_count as f64
        }
    }
}

/// Source of traffic aggregates for auto-trigger evaluation.
#[async_trait]
pub trait TrafficStatsProvider: Send + Sync {
    /// Aggregates for the trailing hour.
    async fn trailing_hour(&self) -> Result<TrafficStats>;

    /// Average hourly transaction count over the trailing seven days.
    async fn weekly_hourly_average(&self) -> Result<f64>;
}

impl KillSwitchService {
    /// Evaluate auto-triggers against current traffic. When a threshold is
    /// breached, activates a time-boxed outgoing-transfer kill (one per
    /// reason; re-running while it is active is a no-op) and alerts
    /// admins. Returns the switches activated by this run.
    pub async fn run_auto_trigger_sweep(
        &self,
        stats: &dyn TrafficStatsProvider,
    ) -> Result<Vec<ActiveKillSwitch>> {
        let state = self.state().await?;
        let config = state.auto_triggers.clone();
        if !config.enabled {
            return Ok(Vec::new());
        }

        let hour = stats.trailing_hour().await?;
        let weekly_avg = stats.weekly_hourly_average().await?;

        let mut reasons = Vec::new();
        if hour.fraud_rate() > config.max_fraud_rate {
            reasons.push(format!(
                "fraud rate {:.1}% above {:.1}% threshold",
                hour.fraud_rate() * 100.0,
                config.max_fraud_rate * 100.0
            ));
        }
        if hour.error_rate() > config.max_error_rate {
            reasons.push(format!(
                "error rate {:.1}% above {:.1}% threshold",
                hour.error_rate() * 100.0,
                config.max_error_rate * 100.0
            ));
        }
        if weekly_avg > 0.0
            && hour.transaction_count as f64 > weekly_avg * config.volume_multiple
        {
            reasons.push(format!(
                "volume {} above {:.1}x the weekly hourly average {weekly_avg:.1}",
                hour.transaction_count, config.volume_multiple
            ));
        }

        let actor = Actor::system("auto_trigger");
        let mut activated = Vec::new();
        for reason in reasons {
            // Deduplicate per reason: an active auto switch with the same
            // reason means this trigger already fired.
            let already_active = state
                .active
                .iter()
                .any(|e| e.scope == KillScope::TransactionType && e.reason == reason);
            if already_active {
                continue;
            }

            warn!(reason = %reason, "auto-trigger fired; killing outgoing transfers");
            let expires_at = Some(Utc::now() + Duration::minutes(config.kill_duration_mins));
            let entry = self
                .activate(
                    KillScope::TransactionType,
                    Some(&TxType::Transfer.to_string()),
                    &reason,
                    &actor,
                    expires_at,
                )
                .await?;
            activated.push(entry);
        }

        Ok(activated)
    }

    /// Deactivate every switch whose expiry has passed. Returns the number
    /// of switches removed.
    pub async fn run_cleanup_sweep(&self) -> Result<usize> {
        let now = Utc::now();
        let mut expired: Vec<ActiveKillSwitch> = Vec::new();

        let unchanged = self
            .mutate(|state| {
                expired = state
                    .active
                    .iter()
                    .filter(|e| e.is_expired(now))
                    .cloned()
                    .collect();
                if expired.is_empty() {
                    return Ok(Some(()));
                }
                state.active.retain(|e| !e.is_expired(now));
                Ok(None)
            })
            .await?;

        if unchanged.is_some() {
            return Ok(0);
        }

        for entry in &expired {
            info!(
                scope = %entry.scope,
                target = entry.target.as_deref().unwrap_or("-"),
                "expired kill switch deactivated"
            );
            self.alerts()
                .create_alert(
                    AlertRequest::new(
                        AlertCategory::KillSwitch,
                        AlertPriority::High,
                        format!("Kill switch expired: {}", entry.scope),
                        format!(
                            "switch on {} (target {}) reached its expiry and was deactivated",
                            entry.scope,
                            entry.target.as_deref().unwrap_or("-")
                        ),
                        AlertTarget::AllAdmins,
                        "kill_switch",
                    )
                    .with_source_id(entry.id.to_string()),
                )
                .await?;
        }

        Ok(expired.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::switch::GuardConfig;
    use crate::types::{InMemoryKillStateStore, Product};
    use std::sync::Arc;
    use vigil_alerting::{AlertService, AlertingConfig};
    use vigil_core::audit::MemoryAuditSink;
    use vigil_core::memory::{RecordingSender, StaticSegmentResolver};

    struct StaticStats {
        hour: TrafficStats,
        weekly_avg: f64,
    }

    #[async_trait]
    impl TrafficStatsProvider for StaticStats {
        async fn trailing_hour(&self) -> Result<TrafficStats> {
            Ok(self.hour)
        }

        async fn weekly_hourly_average(&self) -> Result<f64> {
            Ok(self.weekly_avg)
        }
    }

    fn service() -> KillSwitchService {
        KillSwitchService::new(
            Arc::new(InMemoryKillStateStore::new()),
            Arc::new(StaticSegmentResolver::new()),
            Arc::new(AlertService::new(
                Arc::new(RecordingSender::new()),
                Arc::new(MemoryAuditSink::new()),
                AlertingConfig::default(),
            )),
            Arc::new(MemoryAuditSink::new()),
            GuardConfig::default().with_cache_ttl_secs(0),
        )
    }

    fn calm_traffic() -> StaticStats {
        StaticStats {
            hour: TrafficStats {
                transaction_count: 100,
                fraud_count: 1,
                error_count: 2,
            },
            weekly_avg: 90.0,
        }
    }

    fn fraud_wave() -> StaticStats {
        StaticStats {
            hour: TrafficStats {
                transaction_count: 100,
                fraud_count: 30,
                error_count: 0,
            },
            weekly_avg: 90.0,
        }
    }

    #[tokio::test]
    async fn test_calm_traffic_triggers_nothing() {
        let service = service();
        let activated = service.run_auto_trigger_sweep(&calm_traffic()).await.unwrap();
        assert!(activated.is_empty());
    }

    #[tokio::test]
    async fn test_fraud_rate_kills_transfers_for_thirty_minutes() {
        let service = service();
        let activated = service.run_auto_trigger_sweep(&fraud_wave()).await.unwrap();

        assert_eq!(activated.len(), 1);
        assert_eq!(activated[0].scope, KillScope::TransactionType);
        assert!(activated[0].expires_at.is_some());

        let decision = service
            .check_operation_allowed("u-1", Product::Transfers, None, Some(TxType::Transfer))
            .await
            .unwrap();
        assert!(!decision.allowed);
    }

    #[tokio::test]
    async fn test_trigger_deduplicates_per_reason() {
        let service = service();
        let first = service.run_auto_trigger_sweep(&fraud_wave()).await.unwrap();
        let second = service.run_auto_trigger_sweep(&fraud_wave()).await.unwrap();

        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
        assert_eq!(service.state().await.unwrap().active.len(), 1);
    }

    #[tokio::test]
    async fn test_volume_spike_trigger() {
        let service = service();
        let stats = StaticStats {
            hour: TrafficStats {
                transaction_count: 1000,
                fraud_count: 0,
                error_count: 0,
            },
            weekly_avg: 100.0,
        };
        let activated = service.run_auto_trigger_sweep(&stats).await.unwrap();
        assert_eq!(activated.len(), 1);
        assert!(activated[0].reason.contains("volume"));
    }

    #[tokio::test]
    async fn test_disabled_triggers_do_nothing() {
        let service = service();
        service
            .mutate(|state| {
                state.auto_triggers.enabled = false;
                Ok(None::<()>)
            })
            .await
            .unwrap();

        let activated = service.run_auto_trigger_sweep(&fraud_wave()).await.unwrap();
        assert!(activated.is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_removes_expired_switches() {
        let service = service();
        let actor = Actor::employee("ops-1");
        service
            .activate(
                KillScope::Product,
                Some("cards"),
                "short ban",
                &actor,
                Some(Utc::now() - Duration::minutes(1)),
            )
            .await
            .unwrap();
        service
            .activate(KillScope::Region, Some("BR"), "open ended", &actor, None)
            .await
            .unwrap();

        let removed = service.run_cleanup_sweep().await.unwrap();
        assert_eq!(removed, 1);

        let state = service.state().await.unwrap();
        assert_eq!(state.active.len(), 1);
        assert!(state.products.is_empty());
        assert!(state.regions.contains("BR"));

        // Idempotent: nothing left to clean.
        assert_eq!(service.run_cleanup_sweep().await.unwrap(), 0);
    }
}
