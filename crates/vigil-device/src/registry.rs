//! Device trust registry.

use crate::fingerprint::fingerprint;
use crate::types::{DeviceRecord, DeviceSignals, DeviceTrustLevel};
use chrono::Utc;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;
use vigil_core::audit::{AuditEntry, AuditSeverity, AuditSink};
use vigil_core::error::{EngineError, Result};
use vigil_core::stores::{NotificationChannel, NotificationMessage, NotificationSender};
use vigil_core::types::{Actor, DenialCode, Platform, PolicyDecision, RiskFactor};

/// Device trust thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Age granting the strongest age factor, in days.
    pub mature_age_days: i64,
    /// Age granting the weaker age factor, in days.
    pub established_age_days: i64,
    /// Login count granting the familiarity factor.
    pub familiar_login_count: u32,
    /// Success ratio at or above which the reliability factor applies.
    pub good_success_ratio: f64,
    /// Success ratio below which the unreliability factor applies.
    pub poor_success_ratio: f64,
    /// Cumulative failures that downgrade a trusted device.
    pub downgrade_failure_count: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            mature_age_days: 90,
            established_age_days: 30,
            familiar_login_count: 20,
            good_success_ratio: 0.95,
            poor_success_ratio: 0.7,
            downgrade_failure_count: 5,
        }
    }
}

/// Registry of devices keyed by (user id, fingerprint).
///
/// Counter and trust-level updates happen under a single write lock per
/// call, so concurrent logins from one device never lose updates.
pub struct DeviceRegistry {
    devices: RwLock<HashMap<(String, String), DeviceRecord>>,
    sender: Arc<dyn NotificationSender>,
    audit: Arc<dyn AuditSink>,
    config: DeviceConfig,
}

impl DeviceRegistry {
    /// Create an empty registry.
    pub fn new(
        sender: Arc<dyn NotificationSender>,
        audit: Arc<dyn AuditSink>,
        config: DeviceConfig,
    ) -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
            sender,
            audit,
            config,
        }
    }

    /// Register a device sighting, upserting by (user id, fingerprint).
    ///
    /// Existing records bump their counters and refresh detection flags; a
    /// new record starts at [`DeviceTrustLevel::New`] and triggers a
    /// new-device notification to the user.
    pub async fn register_device(
        &self,
        user_id: &str,
        signals: &DeviceSignals,
        ip: &str,
    ) -> Result<DeviceRecord> {
        if user_id.is_empty() {
            return Err(EngineError::validation("user_id must not be empty"));
        }
        let platform = signals
            .platform
            .ok_or_else(|| EngineError::validation("device signals missing platform"))?;

        let fp = fingerprint(signals);
        let now = Utc::now();
        let key = (user_id.to_string(), fp.clone());

        let (record, is_new) = {
            let mut devices = self.devices.write().await;
            match devices.get_mut(&key) {
                Some(existing) => {
                    existing.login_count += 1;
                    existing.last_seen_at = now;
                    existing.is_emulator = signals.is_emulator;
                    existing.is_rooted = signals.is_rooted;
                    (existing.clone(), false)
                }
                None => {
                    let record = DeviceRecord {
                        id: Uuid::new_v4(),
                        user_id: user_id.to_string(),
                        fingerprint: fp.clone(),
                        trust_level: DeviceTrustLevel::New,
                        platform,
                        first_seen_at: now,
                        last_seen_at: now,
                        login_count: 1,
                        successful_ops: 0,
                        failed_ops: 0,
                        is_blocked: false,
                        is_emulator: signals.is_emulator,
                        is_rooted: signals.is_rooted,
                    };
                    devices.insert(key, record.clone());
                    (record, true)
                }
            }
        };

        if is_new {
            info!(user_id = %user_id, fingerprint = %fp, platform = %platform, "new device registered");
            let message = NotificationMessage {
                target: user_id.to_string(),
                title: "New device sign-in".to_string(),
                body: format!("A new {platform} device signed in from {ip}."),
            };
            if let Err(err) = self.sender.send(NotificationChannel::Push, &message).await {
                warn!(user_id = %user_id, error = %err, "new-device notification failed");
            }
        }

        Ok(record)
    }

    /// Record the outcome of a sensitive operation performed from a device.
    ///
    /// Reaching the configured cumulative failure count downgrades a
    /// trusted device to known. The registry never upgrades automatically.
    pub async fn record_operation(
        &self,
        user_id: &str,
        fingerprint: &str,
        success: bool,
    ) -> Result<DeviceRecord> {
        let key = (user_id.to_string(), fingerprint.to_string());
        let mut devices = self.devices.write().await;
        let record = devices
            .get_mut(&key)
            .ok_or_else(|| EngineError::not_found("device", fingerprint))?;

        if success {
            record.successful_ops += 1;
        } else {
            record.failed_ops += 1;
            if record.failed_ops >= self.config.downgrade_failure_count
                && record.trust_level == DeviceTrustLevel::Trusted
            {
                record.trust_level = DeviceTrustLevel::Known;
                warn!(
                    user_id = %user_id,
                    fingerprint = %fingerprint,
                    failed_ops = record.failed_ops,
                    "trusted device downgraded after repeated failures"
                );
            }
        }
        Ok(record.clone())
    }

    /// Explicitly mark a device trusted.
    pub async fn trust_device(
        &self,
        user_id: &str,
        fingerprint: &str,
        actor: &Actor,
    ) -> Result<DeviceRecord> {
        let record = self
            .set_trust(user_id, fingerprint, DeviceTrustLevel::Trusted, false)
            .await?;
        self.audit
            .record(
                AuditEntry::new(actor.clone(), "trust_device", format!("device/{fingerprint}"))
                    .with_description(format!("device explicitly trusted for {user_id}")),
            )
            .await?;
        Ok(record)
    }

    /// Block a device. Blocked devices are denied regardless of any other
    /// factor until unblocked by an operator action outside this engine.
    pub async fn block_device(
        &self,
        user_id: &str,
        fingerprint: &str,
        actor: &Actor,
    ) -> Result<DeviceRecord> {
        let record = self
            .set_trust(user_id, fingerprint, DeviceTrustLevel::Untrusted, true)
            .await?;
        self.audit
            .record(
                AuditEntry::new(actor.clone(), "block_device", format!("device/{fingerprint}"))
                    .with_severity(AuditSeverity::Critical)
                    .with_description(format!("device blocked for {user_id}")),
            )
            .await?;
        Ok(record)
    }

    async fn set_trust(
        &self,
        user_id: &str,
        fingerprint: &str,
        level: DeviceTrustLevel,
        blocked: bool,
    ) -> Result<DeviceRecord> {
        let key = (user_id.to_string(), fingerprint.to_string());
        let mut devices = self.devices.write().await;
        let record = devices
            .get_mut(&key)
            .ok_or_else(|| EngineError::not_found("device", fingerprint))?;
        record.trust_level = level;
        record.is_blocked = blocked;
        Ok(record.clone())
    }

    /// Fetch a device record.
    pub async fn device(&self, user_id: &str, fingerprint: &str) -> Result<DeviceRecord> {
        self.devices
            .read()
            .await
            .get(&(user_id.to_string(), fingerprint.to_string()))
            .cloned()
            .ok_or_else(|| EngineError::not_found("device", fingerprint))
    }

    /// All devices registered for a user.
    pub async fn devices_for_user(&self, user_id: &str) -> Vec<DeviceRecord> {
        self.devices
            .read()
            .await
            .values()
            .filter(|d| d.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Trust factors for a device, computed on read with signed impacts.
    /// The registry never pre-aggregates these; callers weigh them.
    #[must_use]
    pub fn trust_factors(&self, record: &DeviceRecord) -> Vec<RiskFactor> {
        let now = Utc::now();
        let mut factors = Vec::new();

        let age = record.age_days(now);
        if age >= self.config.mature_age_days {
            factors.push(RiskFactor::new(
                "device_age_mature",
                30.0,
                format!("device seen for {age} days"),
            ));
        } else if age >= self.config.established_age_days {
            factors.push(RiskFactor::new(
                "device_age_established",
                15.0,
                format!("device seen for {age} days"),
            ));
        }

        if record.login_count >= self.config.familiar_login_count {
            factors.push(RiskFactor::new(
                "device_familiar",
                20.0,
                format!("{} logins from this device", record.login_count),
            ));
        }

        let ratio = record.success_ratio();
        if record.successful_ops + record.failed_ops > 0 {
            if ratio >= self.config.good_success_ratio {
                factors.push(RiskFactor::new(
                    "device_reliable",
                    25.0,
                    format!("success ratio {ratio:.2}"),
                ));
            } else if ratio < self.config.poor_success_ratio {
                factors.push(RiskFactor::new(
                    "device_unreliable",
                    -30.0,
                    format!("success ratio {ratio:.2}"),
                ));
            }
        }

        if record.is_emulator {
            factors.push(RiskFactor::new("device_emulator", -40.0, "emulator detected"));
        }
        if record.is_rooted {
            factors.push(RiskFactor::new("device_rooted", -35.0, "rooted device"));
        }
        if record.trust_level == DeviceTrustLevel::Trusted {
            factors.push(RiskFactor::new(
                "device_trusted",
                50.0,
                "explicitly trusted",
            ));
        }
        if record.is_blocked {
            factors.push(RiskFactor::new("device_blocked", -100.0, "device blocked"));
        }

        factors
    }

    /// Decide whether operations from a device are allowed.
    ///
    /// Blocked devices are always denied. Emulators and rooted devices are
    /// denied unless the device was explicitly trusted.
    pub async fn is_device_allowed(
        &self,
        user_id: &str,
        fingerprint: &str,
    ) -> Result<PolicyDecision> {
        let record = self.device(user_id, fingerprint).await?;

        if record.is_blocked {
            return Ok(PolicyDecision::deny(
                DenialCode::DeviceBlocked,
                "device is blocked",
            ));
        }
        if (record.is_emulator || record.is_rooted)
            && record.trust_level != DeviceTrustLevel::Trusted
        {
            let what = if record.is_emulator { "emulator" } else { "rooted device" };
            return Ok(PolicyDecision::deny(
                DenialCode::DeviceBlocked,
                format!("{what} not explicitly trusted"),
            ));
        }

        Ok(PolicyDecision::allow())
    }

    /// Platform a user signs in from most, when any device is registered.
    pub async fn primary_platform(&self, user_id: &str) -> Option<Platform> {
        let devices = self.devices_for_user(user_id).await;
        let mut counts: HashMap<Platform, u32> = HashMap::new();
        for device in &devices {
            *counts.entry(device.platform).or_insert(0) += device.login_count;
        }
        counts.into_iter().max_by_key(|&(_, c)| c).map(|(p, _)| p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::audit::MemoryAuditSink;
    use vigil_core::memory::RecordingSender;

    fn registry() -> (DeviceRegistry, Arc<RecordingSender>) {
        let sender = Arc::new(RecordingSender::new());
        let registry = DeviceRegistry::new(
            sender.clone(),
            Arc::new(MemoryAuditSink::new()),
            DeviceConfig::default(),
        );
        (registry, sender)
    }

    fn ios_signals() -> DeviceSignals {
        DeviceSignals {
            platform: Some(Platform::Ios),
            model: Some("iPhone15,2".into()),
            os_version: Some("17.4".into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_register_new_device_notifies() {
        let (registry, sender) = registry();

        let record = registry
            .register_device("u-1", &ios_signals(), "10.0.0.1")
            .await
            .unwrap();

        assert_eq!(record.trust_level, DeviceTrustLevel::New);
        assert_eq!(record.login_count, 1);
        assert_eq!(sender.sent_on(NotificationChannel::Push).len(), 1);
    }

    #[tokio::test]
    async fn test_register_existing_bumps_counters_silently() {
        let (registry, sender) = registry();

        registry.register_device("u-1", &ios_signals(), "10.0.0.1").await.unwrap();
        let again = registry
            .register_device("u-1", &ios_signals(), "10.0.0.2")
            .await
            .unwrap();

        assert_eq!(again.login_count, 2);
        // Only the first sighting notifies.
        assert_eq!(sender.sent_on(NotificationChannel::Push).len(), 1);
    }

    #[tokio::test]
    async fn test_same_signals_different_user_is_a_new_record() {
        let (registry, _) = registry();

        let a = registry.register_device("u-1", &ios_signals(), "ip").await.unwrap();
        let b = registry.register_device("u-2", &ios_signals(), "ip").await.unwrap();

        assert_eq!(a.fingerprint, b.fingerprint);
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn test_trusted_device_downgrades_on_fifth_failure() {
        let (registry, _) = registry();
        let record = registry.register_device("u-1", &ios_signals(), "ip").await.unwrap();
        registry
            .trust_device("u-1", &record.fingerprint, &Actor::user("u-1"))
            .await
            .unwrap();

        for i in 1..=4u32 {
            let r = registry
                .record_operation("u-1", &record.fingerprint, false)
                .await
                .unwrap();
            assert_eq!(r.trust_level, DeviceTrustLevel::Trusted, "failure {i}");
        }

        let fifth = registry
            .record_operation("u-1", &record.fingerprint, false)
            .await
            .unwrap();
        assert_eq!(fifth.trust_level, DeviceTrustLevel::Known);

        // Successes never restore trust on their own.
        for _ in 0..20 {
            registry
                .record_operation("u-1", &record.fingerprint, true)
                .await
                .unwrap();
        }
        let after = registry.device("u-1", &record.fingerprint).await.unwrap();
        assert_eq!(after.trust_level, DeviceTrustLevel::Known);
    }

    #[tokio::test]
    async fn test_blocked_device_is_always_denied() {
        let (registry, _) = registry();
        let record = registry.register_device("u-1", &ios_signals(), "ip").await.unwrap();
        registry
            .trust_device("u-1", &record.fingerprint, &Actor::user("u-1"))
            .await
            .unwrap();
        registry
            .block_device("u-1", &record.fingerprint, &Actor::employee("e-1"))
            .await
            .unwrap();

        let decision = registry
            .is_device_allowed("u-1", &record.fingerprint)
            .await
            .unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.reason_code, Some(DenialCode::DeviceBlocked));
    }

    #[tokio::test]
    async fn test_emulator_denied_unless_trusted() {
        let (registry, _) = registry();
        let mut signals = ios_signals();
        signals.is_emulator = true;

        let record = registry.register_device("u-1", &signals, "ip").await.unwrap();
        let decision = registry
            .is_device_allowed("u-1", &record.fingerprint)
            .await
            .unwrap();
        assert!(!decision.allowed);

        registry
            .trust_device("u-1", &record.fingerprint, &Actor::employee("e-1"))
            .await
            .unwrap();
        let decision = registry
            .is_device_allowed("u-1", &record.fingerprint)
            .await
            .unwrap();
        assert!(decision.allowed);
    }

    #[tokio::test]
    async fn test_trust_factors_signed_impacts() {
        let (registry, _) = registry();
        let record = registry.register_device("u-1", &ios_signals(), "ip").await.unwrap();

        for _ in 0..3 {
            registry
                .record_operation("u-1", &record.fingerprint, false)
                .await
                .unwrap();
        }
        let record = registry.device("u-1", &record.fingerprint).await.unwrap();
        let factors = registry.trust_factors(&record);

        let unreliable = factors.iter().find(|f| f.name == "device_unreliable");
        assert!(unreliable.is_some());
        assert!(unreliable.unwrap().impact < 0.0);
    }

    #[tokio::test]
    async fn test_unknown_device_is_not_found() {
        let (registry, _) = registry();
        let err = registry.is_device_allowed("u-1", "missing").await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_concurrent_logins_do_not_lose_counts() {
        let (registry, _) = registry();
        let registry = Arc::new(registry);
        registry.register_device("u-1", &ios_signals(), "ip").await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let r = registry.clone();
            handles.push(tokio::spawn(async move {
                r.register_device("u-1", &ios_signals(), "ip").await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let fp = fingerprint(&ios_signals());
        let record = registry.device("u-1", &fp).await.unwrap();
        assert_eq!(record.login_count, 17);
    }
}
