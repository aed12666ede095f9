//! Stable device fingerprinting.
//!
//! The fingerprint is a SHA-256 digest over a fixed, ordered set of device
//! signals. Absent signals are omitted entirely rather than substituted,
//! so a client that later starts reporting a signal produces a different
//! fingerprint — by then it is effectively a different device surface.

use crate::types::DeviceSignals;
use sha2::{Digest, Sha256};

/// Compute the stable fingerprint for a set of signals.
///
/// Each present signal contributes `name=value` followed by a separator
/// byte, in a fixed order, so equal signal sets always hash identically.
#[must_use]
pub fn fingerprint(signals: &DeviceSignals) -> String {
    let mut hasher = Sha256::new();

    let mut update = |name: &str, value: &str| {
        hasher.update(name.as_bytes());
        hasher.update(b"=");
        hasher.update(value.as_bytes());
        hasher.update([0u8]);
    };

    if let Some(platform) = signals.platform {
        update("platform", &platform.to_string());
    }
    if let Some(ref model) = signals.model {
        update("model", model);
    }
    if let Some(ref os_version) = signals.os_version {
        update("os_version", os_version);
    }
    if let Some(ref screen) = signals.screen {
        update("screen", screen);
    }
    if let Some(ref locale) = signals.locale {
        update("locale", locale);
    }
    if let Some(ref timezone) = signals.timezone {
        update("timezone", timezone);
    }
    if let Some(ref user_agent) = signals.user_agent {
        update("user_agent", user_agent);
    }

    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::types::Platform;

    fn full_signals() -> DeviceSignals {
        DeviceSignals {
            platform: Some(Platform::Ios),
            model: Some("iPhone15,2".into()),
            os_version: Some("17.4".into()),
            screen: Some("2556x1179".into()),
            locale: Some("pt-BR".into()),
            timezone: Some("America/Sao_Paulo".into()),
            user_agent: None,
            is_emulator: false,
            is_rooted: false,
        }
    }

    #[test]
    fn test_fingerprint_is_stable() {
        assert_eq!(fingerprint(&full_signals()), fingerprint(&full_signals()));
    }

    #[test]
    fn test_fingerprint_is_hex_sha256() {
        let fp = fingerprint(&full_signals());
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_signal_change_changes_fingerprint() {
        let mut other = full_signals();
        other.os_version = Some("17.5".into());
        assert_ne!(fingerprint(&full_signals()), fingerprint(&other));
    }

    #[test]
    fn test_absent_signal_is_omitted_not_defaulted() {
        let mut missing = full_signals();
        missing.model = None;
        let mut empty = full_signals();
        empty.model = Some(String::new());
        // "no model" and "empty model" are distinct devices.
        assert_ne!(fingerprint(&missing), fingerprint(&empty));
    }

    #[test]
    fn test_detection_flags_do_not_affect_fingerprint() {
        let mut flagged = full_signals();
        flagged.is_emulator = true;
        flagged.is_rooted = true;
        assert_eq!(fingerprint(&full_signals()), fingerprint(&flagged));
    }
}
