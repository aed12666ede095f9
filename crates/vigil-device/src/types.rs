//! Device types and data structures.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use vigil_core::types::Platform;

// ============================================================================
// Signals
// ============================================================================

/// Raw device signals reported by a client at login.
///
/// Only `platform` is mandatory; every other signal may be absent and is
/// then simply left out of the fingerprint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceSignals {
    /// Client platform.
    pub platform: Option<Platform>,
    /// Hardware model.
    pub model: Option<String>,
    /// Operating system version.
    pub os_version: Option<String>,
    /// Screen resolution string.
    pub screen: Option<String>,
    /// Locale identifier.
    pub locale: Option<String>,
    /// IANA timezone.
    pub timezone: Option<String>,
    /// Browser or client user agent.
    pub user_agent: Option<String>,
    /// Client-side emulator detection verdict.
    pub is_emulator: bool,
    /// Client-side root/jailbreak detection verdict.
    pub is_rooted: bool,
}

impl DeviceSignals {
    /// Signals for a platform with nothing else known.
    #[must_use]
    pub fn for_platform(platform: Platform) -> Self {
        Self {
            platform: Some(platform),
            ..Default::default()
        }
    }
}

// ============================================================================
// Trust level and record
// ============================================================================

/// Trust level of a registered device.
///
/// Changes only through explicit trust/block actions or automatic
/// degradation after repeated failures; the registry never auto-upgrades.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceTrustLevel {
    /// First sighting, no history yet.
    New,
    /// Seen before, unremarkable history.
    Known,
    /// Explicitly trusted by the user or an operator.
    Trusted,
    /// Explicitly distrusted or blocked.
    Untrusted,
}

impl std::fmt::Display for DeviceTrustLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::New => write!(f, "new"),
            Self::Known => write!(f, "known"),
            Self::Trusted => write!(f, "trusted"),
            Self::Untrusted => write!(f, "untrusted"),
        }
    }
}

/// A registered device, unique per (user id, fingerprint).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Record id.
    pub id: Uuid,
    /// Owning user.
    pub user_id: String,
    /// Stable fingerprint hash.
    pub fingerprint: String,
    /// Current trust level.
    pub trust_level: DeviceTrustLevel,
    /// Platform reported at registration.
    pub platform: Platform,
    /// First sighting.
    pub first_seen_at: DateTime<Utc>,
    /// Most recent sighting.
    pub last_seen_at: DateTime<Utc>,
    /// Number of logins from this device.
    pub login_count: u32,
    /// Successful sensitive operations from this device.
    pub successful_ops: u32,
    /// Failed sensitive operations from this device.
    pub failed_ops: u32,
    /// True once an operator blocked the device.
    pub is_blocked: bool,
    /// Emulator verdict from the latest signals.
    pub is_emulator: bool,
    /// Root/jailbreak verdict from the latest signals.
    pub is_rooted: bool,
}

impl DeviceRecord {
    /// Device age in whole days at `now`.
    #[must_use]
    pub fn age_days(&self, now: DateTime<Utc>) -> i64 {
        (now - self.first_seen_at).num_days()
    }

    /// Ratio of successful operations, in [0, 1]. 1.0 with no history.
    #[must_use]
    pub fn success_ratio(&self) -> f64 {
        let total = self.successful_ops + self.failed_ops;
        if total == 0 {
            1.0
        } else {
            f64::from(self.successful_ops) / f64::from(total)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_ratio_without_history() {
        let record = DeviceRecord {
            id: Uuid::new_v4(),
            user_id: "u-1".into(),
            fingerprint: "fp".into(),
            trust_level: DeviceTrustLevel::New,
            platform: Platform::Ios,
            first_seen_at: Utc::now(),
            last_seen_at: Utc::now(),
            login_count: 1,
            successful_ops: 0,
            failed_ops: 0,
            is_blocked: false,
            is_emulator: false,
            is_rooted: false,
        };
        assert!((record.success_ratio() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_success_ratio() {
        let record = DeviceRecord {
            id: Uuid::new_v4(),
            user_id: "u-1".into(),
            fingerprint: "fp".into(),
            trust_level: DeviceTrustLevel::Known,
            platform: Platform::Android,
            first_seen_at: Utc::now(),
            last_seen_at: Utc::now(),
            login_count: 10,
            successful_ops: 19,
            failed_ops: 1,
            is_blocked: false,
            is_emulator: false,
            is_rooted: false,
        };
        assert!((record.success_ratio() - 0.95).abs() < 1e-9);
    }
}
