//! Kill-switch service: axis checks, manual activation, cached reads.

use crate::types::{
    ActiveKillSwitch, KillScope, KillStateStore, KillSwitchState, Product, SegmentName, TxType,
    Versioned,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;
use vigil_alerting::{AlertCategory, AlertPriority, AlertRequest, AlertService, AlertTarget};
use vigil_core::audit::{AuditEntry, AuditSeverity, AuditSink};
use vigil_core::error::{EngineError, Result};
use vigil_core::stores::UserSegmentResolver;
use vigil_core::types::{Actor, DenialCode, PolicyDecision};

/// Attempts at compare-and-replace before giving up on a contended write.
const CAS_ATTEMPTS: u32 = 5;

/// Kill-switch service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Read-cache TTL in seconds. Bounded staleness for checks; writes are
    /// authoritative and invalidate the cache.
    pub cache_ttl_secs: u64,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self { cache_ttl_secs: 10 }
    }
}

impl GuardConfig {
    /// Set the cache TTL.
    #[must_use]
    pub fn with_cache_ttl_secs(mut self, secs: u64) -> Self {
        self.cache_ttl_secs = secs;
        self
    }
}

/// Global kill-switch service.
pub struct KillSwitchService {
    store: Arc<dyn KillStateStore>,
    segments: Arc<dyn UserSegmentResolver>,
    alerts: Arc<AlertService>,
    audit: Arc<dyn AuditSink>,
    config: GuardConfig,
    cache: RwLock<Option<(Instant, Versioned<KillSwitchState>)>>,
}

impl KillSwitchService {
    /// Create a new service.
    pub fn new(
        store: Arc<dyn KillStateStore>,
        segments: Arc<dyn UserSegmentResolver>,
        alerts: Arc<AlertService>,
        audit: Arc<dyn AuditSink>,
        config: GuardConfig,
    ) -> Self {
        Self {
            store,
            segments,
            alerts,
            audit,
            config,
            cache: RwLock::new(None),
        }
    }

    /// Decide whether an operation may proceed, checking the axes in
    /// order: global, maintenance, product (with wildcard), region,
    /// transaction type, and finally user segment, which needs a user
    /// lookup and is therefore checked last.
    pub async fn check_operation_allowed(
        &self,
        user_id: &str,
        product: Product,
        region: Option<&str>,
        tx_type: Option<TxType>,
    ) -> Result<PolicyDecision> {
        let state = self.cached_state().await?.value;

        if state.global_kill {
            return Ok(PolicyDecision::deny(
                DenialCode::GlobalKill,
                "platform-wide kill switch is active",
            ));
        }
        if state.maintenance_mode {
            return Ok(PolicyDecision::deny(
                DenialCode::Maintenance,
                "platform is under maintenance",
            ));
        }
        if state.products.contains(&Product::All) || state.products.contains(&product) {
            return Ok(PolicyDecision::deny(
                DenialCode::ProductDisabled,
                format!("product {product} is disabled"),
            ));
        }
        if let Some(region) = region {
            if state.regions.contains(region) {
                return Ok(PolicyDecision::deny(
                    DenialCode::RegionDisabled,
                    format!("region {region} is disabled"),
                ));
            }
        }
        if let Some(tx_type) = tx_type {
            if state.transaction_types.contains(&tx_type) {
                return Ok(PolicyDecision::deny(
                    DenialCode::TransactionTypeDisabled,
                    format!("{tx_type} transactions are disabled"),
                ));
            }
        }
        if !state.user_segments.is_empty() {
            if state.user_segments.contains(&SegmentName::All) {
                return Ok(PolicyDecision::deny(
                    DenialCode::SegmentDisabled,
                    "all user segments are disabled",
                ));
            }
            if let Some(segment) = self.segments.segment_of(user_id).await? {
                if let Ok(name) = segment.parse::<SegmentName>() {
                    if state.user_segments.contains(&name) {
                        return Ok(PolicyDecision::deny(
                            DenialCode::SegmentDisabled,
                            format!("segment {name} is disabled"),
                        ));
                    }
                }
            }
        }

        Ok(PolicyDecision::allow())
    }

    /// Activate a kill switch. Idempotent: an already-active switch with
    /// the same scope and target is returned unchanged.
    pub async fn activate(
        &self,
        scope: KillScope,
        target: Option<&str>,
        reason: &str,
        actor: &Actor,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<ActiveKillSwitch> {
        validate_target(scope, target)?;

        let entry = self
            .mutate(|state| {
                if let Some(existing) = state
                    .active
                    .iter()
                    .find(|e| e.scope == scope && e.target.as_deref() == target)
                {
                    return Ok(Some(existing.clone()));
                }
                let entry = ActiveKillSwitch {
                    id: Uuid::new_v4(),
                    scope,
                    target: target.map(String::from),
                    reason: reason.to_string(),
                    activated_by: actor.to_string(),
                    activated_at: Utc::now(),
                    expires_at,
                };
                state.active.push(entry.clone());
                Ok(None)
            })
            .await?;

        // `mutate` returns Some(existing) when nothing changed.
        if let Some(existing) = entry {
            return Ok(existing);
        }

        let state = self.store.load().await?.value;
        let created = state
            .active
            .iter()
            .find(|e| e.scope == scope && e.target.as_deref() == target)
            .cloned()
            .ok_or_else(|| EngineError::internal("activated switch missing from state"))?;

        warn!(
            scope = %scope,
            target = target.unwrap_or("-"),
            reason = %reason,
            actor = %actor,
            "kill switch activated"
        );
        self.audit
            .record(
                AuditEntry::new(actor.clone(), "activate_kill_switch", format!("kill_switch/{scope}"))
                    .with_severity(AuditSeverity::Critical)
                    .with_description(format!(
                        "scope {scope}, target {}, reason: {reason}",
                        target.unwrap_or("-")
                    )),
            )
            .await?;
        self.alerts
            .create_alert(
                AlertRequest::new(
                    AlertCategory::KillSwitch,
                    AlertPriority::Critical,
                    format!("Kill switch activated: {scope}"),
                    format!(
                        "{actor} activated {scope} (target {}): {reason}",
                        target.unwrap_or("-")
                    ),
                    AlertTarget::AllAdmins,
                    "kill_switch",
                )
                .with_source_id(created.id.to_string()),
            )
            .await?;

        Ok(created)
    }

    /// Deactivate a kill switch. Idempotent: deactivating a switch that is
    /// not active is a no-op.
    pub async fn deactivate(
        &self,
        scope: KillScope,
        target: Option<&str>,
        reason: &str,
        actor: &Actor,
    ) -> Result<()> {
        validate_target(scope, target)?;

        let unchanged = self
            .mutate(|state| {
                let before = state.active.len();
                state
                    .active
                    .retain(|e| !(e.scope == scope && e.target.as_deref() == target));
                Ok(if state.active.len() == before {
                    Some(())
                } else {
                    None
                })
            })
            .await?;

        if unchanged.is_some() {
            return Ok(());
        }

        info!(scope = %scope, target = target.unwrap_or("-"), actor = %actor, "kill switch deactivated");
        self.audit
            .record(
                AuditEntry::new(
                    actor.clone(),
                    "deactivate_kill_switch",
                    format!("kill_switch/{scope}"),
                )
                .with_description(format!(
                    "scope {scope}, target {}, reason: {reason}",
                    target.unwrap_or("-")
                )),
            )
            .await?;
        Ok(())
    }

    /// Current state, bypassing the cache.
    pub async fn state(&self) -> Result<KillSwitchState> {
        Ok(self.store.load().await?.value)
    }

    /// Apply a mutation through compare-and-replace, retrying on version
    /// conflicts. The closure may return `Some(value)` to signal that the
    /// document is already in the desired shape; the replace is skipped
    /// and the value is handed back.
    pub(crate) async fn mutate<F, R>(&self, mut apply: F) -> Result<Option<R>>
    where
        F: FnMut(&mut KillSwitchState) -> Result<Option<R>>,
    {
        for _ in 0..CAS_ATTEMPTS {
            let Versioned { version, value } = self.store.load().await?;
            let mut next = value;
            let unchanged = apply(&mut next)?;
            if let Some(entry) = unchanged {
                return Ok(Some(entry));
            }
            next.materialize()?;

            match self.store.replace(version, next).await {
                Ok(_) => {
                    self.invalidate_cache().await;
                    return Ok(None);
                }
                Err(err) if err.is_already_handled() => continue,
                Err(err) => return Err(err),
            }
        }
        Err(EngineError::conflict(
            "kill-switch state kept moving; giving up after retries",
        ))
    }

    async fn cached_state(&self) -> Result<Versioned<KillSwitchState>> {
        let ttl = Duration::from_secs(self.config.cache_ttl_secs);
        {
            let cache = self.cache.read().await;
            if let Some((at, state)) = cache.as_ref() {
                if at.elapsed() < ttl {
                    return Ok(state.clone());
                }
            }
        }
        let fresh = self.store.load().await?;
        *self.cache.write().await = Some((Instant::now(), fresh.clone()));
        Ok(fresh)
    }

    pub(crate) async fn invalidate_cache(&self) {
        *self.cache.write().await = None;
    }

    pub(crate) fn alerts(&self) -> &AlertService {
        &self.alerts
    }
}

fn validate_target(scope: KillScope, target: Option<&str>) -> Result<()> {
    match scope {
        KillScope::Global | KillScope::Maintenance => {
            if target.is_some() {
                return Err(EngineError::validation(format!(
                    "{scope} switch takes no target"
                )));
            }
        }
        KillScope::Product => {
            target
                .ok_or_else(|| EngineError::validation("product switch requires a target"))?
                .parse::<Product>()?;
        }
        KillScope::UserSegment => {
            target
                .ok_or_else(|| EngineError::validation("segment switch requires a target"))?
                .parse::<SegmentName>()?;
        }
        KillScope::TransactionType => {
            target
                .ok_or_else(|| EngineError::validation("transaction-type switch requires a target"))?
                .parse::<TxType>()?;
        }
        KillScope::Region => {
            let region =
                target.ok_or_else(|| EngineError::validation("region switch requires a target"))?;
            if region.is_empty() {
                return Err(EngineError::validation("region must not be empty"));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::InMemoryKillStateStore;
    use vigil_alerting::AlertingConfig;
    use vigil_core::audit::MemoryAuditSink;
    use vigil_core::memory::{RecordingSender, StaticSegmentResolver};

    async fn service() -> (KillSwitchService, Arc<StaticSegmentResolver>) {
        let segments = Arc::new(StaticSegmentResolver::new());
        let alerts = Arc::new(AlertService::new(
            Arc::new(RecordingSender::new()),
            Arc::new(MemoryAuditSink::new()),
            AlertingConfig::default(),
        ));
        let service = KillSwitchService::new(
            Arc::new(InMemoryKillStateStore::new()),
            segments.clone(),
            alerts,
            Arc::new(MemoryAuditSink::new()),
            // TTL 0 so tests always observe writes immediately.
            GuardConfig::default().with_cache_ttl_secs(0),
        );
        (service, segments)
    }

    fn operator() -> Actor {
        Actor::employee("ops-1")
    }

    #[tokio::test]
    async fn test_everything_allowed_by_default() {
        let (service, _) = service().await;
        let decision = service
            .check_operation_allowed("u-1", Product::Transfers, Some("BR"), Some(TxType::Transfer))
            .await
            .unwrap();
        assert!(decision.allowed);
    }

    #[tokio::test]
    async fn test_global_kill_denies_everything_and_restores() {
        let (service, _) = service().await;
        service
            .activate(KillScope::Global, None, "incident", &operator(), None)
            .await
            .unwrap();

        for product in [Product::Cards, Product::Transfers, Product::Rewards] {
            let decision = service
                .check_operation_allowed("u-1", product, None, None)
                .await
                .unwrap();
            assert!(!decision.allowed);
            assert_eq!(decision.reason_code, Some(DenialCode::GlobalKill));
        }

        service
            .deactivate(KillScope::Global, None, "resolved", &operator())
            .await
            .unwrap();
        let decision = service
            .check_operation_allowed("u-1", Product::Cards, None, None)
            .await
            .unwrap();
        assert!(decision.allowed);
    }

    #[tokio::test]
    async fn test_product_wildcard() {
        let (service, _) = service().await;
        service
            .activate(KillScope::Product, Some("all"), "rollout gone bad", &operator(), None)
            .await
            .unwrap();

        let decision = service
            .check_operation_allowed("u-1", Product::Deposits, None, None)
            .await
            .unwrap();
        assert_eq!(decision.reason_code, Some(DenialCode::ProductDisabled));
    }

    #[tokio::test]
    async fn test_axis_order_global_wins_over_product() {
        let (service, _) = service().await;
        service
            .activate(KillScope::Product, Some("cards"), "cards issue", &operator(), None)
            .await
            .unwrap();
        service
            .activate(KillScope::Global, None, "incident", &operator(), None)
            .await
            .unwrap();

        let decision = service
            .check_operation_allowed("u-1", Product::Cards, None, None)
            .await
            .unwrap();
        assert_eq!(decision.reason_code, Some(DenialCode::GlobalKill));
    }

    #[tokio::test]
    async fn test_region_and_tx_type_axes() {
        let (service, _) = service().await;
        service
            .activate(KillScope::Region, Some("AR"), "regulator request", &operator(), None)
            .await
            .unwrap();
        service
            .activate(
                KillScope::TransactionType,
                Some("withdrawal"),
                "bank partner outage",
                &operator(),
                None,
            )
            .await
            .unwrap();

        let by_region = service
            .check_operation_allowed("u-1", Product::Transfers, Some("AR"), None)
            .await
            .unwrap();
        assert_eq!(by_region.reason_code, Some(DenialCode::RegionDisabled));

        let by_tx = service
            .check_operation_allowed("u-1", Product::Transfers, Some("BR"), Some(TxType::Withdrawal))
            .await
            .unwrap();
        assert_eq!(by_tx.reason_code, Some(DenialCode::TransactionTypeDisabled));

        let unrelated = service
            .check_operation_allowed("u-1", Product::Transfers, Some("BR"), Some(TxType::Deposit))
            .await
            .unwrap();
        assert!(unrelated.allowed);
    }

    #[tokio::test]
    async fn test_segment_axis_needs_user_lookup() {
        let (service, segments) = service().await;
        segments.assign("u-risky", "at_risk").await;
        service
            .activate(KillScope::UserSegment, Some("at_risk"), "fraud wave", &operator(), None)
            .await
            .unwrap();

        let risky = service
            .check_operation_allowed("u-risky", Product::Transfers, None, None)
            .await
            .unwrap();
        assert_eq!(risky.reason_code, Some(DenialCode::SegmentDisabled));

        let unknown = service
            .check_operation_allowed("u-other", Product::Transfers, None, None)
            .await
            .unwrap();
        assert!(unknown.allowed);
    }

    #[tokio::test]
    async fn test_activation_is_idempotent() {
        let (service, _) = service().await;
        let first = service
            .activate(KillScope::Product, Some("cards"), "issue", &operator(), None)
            .await
            .unwrap();
        let second = service
            .activate(KillScope::Product, Some("cards"), "issue again", &operator(), None)
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(service.state().await.unwrap().active.len(), 1);
    }

    #[tokio::test]
    async fn test_deactivate_missing_is_noop() {
        let (service, _) = service().await;
        service
            .deactivate(KillScope::Product, Some("cards"), "cleanup", &operator())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unknown_product_target_is_validation_error() {
        let (service, _) = service().await;
        let err = service
            .activate(KillScope::Product, Some("timetravel"), "?", &operator(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_activation_alerts_admins() {
        let (service, _) = service().await;
        service
            .activate(KillScope::Global, None, "incident", &operator(), None)
            .await
            .unwrap();

        let admin_alerts = service
            .alerts()
            .alerts_for_target(&AlertTarget::AllAdmins)
            .await;
        assert_eq!(admin_alerts.len(), 1);
        assert_eq!(admin_alerts[0].category, AlertCategory::KillSwitch);
    }
}
