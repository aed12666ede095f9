//! Unified engine configuration.
//!
//! Aggregates every component's config into one document loadable from a
//! TOML file or the environment. Component defaults are production-ready;
//! presets only adjust logging and cache behavior.

use serde::{Deserialize, Serialize};
use std::path::Path;
use vigil_alerting::AlertingConfig;
use vigil_auth::AuthConfig;
use vigil_behavior::BehaviorConfig;
use vigil_core::error::{EngineError, Result};
use vigil_core::logging::LogConfig;
use vigil_device::DeviceConfig;
use vigil_employee::EmployeeConfig;
use vigil_fraud::FraudConfig;
use vigil_guard::GuardConfig;
use vigil_trust::TrustConfig;

/// Unified configuration for the whole decision engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Environment name (development, staging, production).
    pub environment: String,
    /// Logging configuration.
    pub logging: LogConfig,
    /// Trust engine configuration.
    pub trust: TrustConfig,
    /// Device registry configuration.
    pub device: DeviceConfig,
    /// Behavior profiling configuration.
    pub behavior: BehaviorConfig,
    /// Risk assessor configuration.
    pub auth: AuthConfig,
    /// Fraud ensemble configuration.
    pub fraud: FraudConfig,
    /// Employee detector configuration.
    pub employee: EmployeeConfig,
    /// Kill switch configuration.
    pub guard: GuardConfig,
    /// Alerting configuration.
    pub alerting: AlertingConfig,
}

impl EngineConfig {
    /// Development preset: verbose logging, no read caches.
    #[must_use]
    pub fn development() -> Self {
        Self {
            environment: "development".to_string(),
            logging: LogConfig::development(),
            guard: GuardConfig::default().with_cache_ttl_secs(0),
            ..Default::default()
        }
    }

    /// Production preset: structured logging, standard caches.
    #[must_use]
    pub fn production() -> Self {
        Self {
            environment: "production".to_string(),
            logging: LogConfig::production(),
            ..Default::default()
        }
    }

    /// Load from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        toml::from_str(&content)
            .map_err(|e| EngineError::Config(format!("failed to parse config: {e}")))
    }

    /// Load a preset from `VIGIL_ENV`, falling back to development.
    pub fn from_env() -> Result<Self> {
        let config = match std::env::var("VIGIL_ENV").as_deref() {
            Ok("production") | Ok("prod") => Self::production(),
            _ => Self::development(),
        };
        Ok(config)
    }

    /// Save to a TOML file.
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| EngineError::Config(format!("failed to serialize config: {e}")))?;
        std::fs::write(path.as_ref(), content)?;
        Ok(())
    }

    /// Validate cross-field consistency.
    pub fn validate(&self) -> Result<()> {
        let weight_sum = self.fraud.anomaly_weight
            + self.fraud.pattern_weight
            + self.fraud.rules_weight
            + self.fraud.velocity_weight
            + self.fraud.deviation_weight;
        if (weight_sum - 1.0).abs() > 1e-6 {
            return Err(EngineError::Config(format!(
                "fraud model weights sum to {weight_sum}, expected 1.0"
            )));
        }

        let confidence_sum = self.fraud.agreement_weight + self.fraud.coverage_weight;
        if (confidence_sum - 1.0).abs() > 1e-6 {
            return Err(EngineError::Config(format!(
                "confidence weights sum to {confidence_sum}, expected 1.0"
            )));
        }

        if self.guard.cache_ttl_secs > 10 {
            return Err(EngineError::Config(
                "kill-switch cache TTL above the 10s staleness bound".to_string(),
            ));
        }

        Ok(())
    }
}
