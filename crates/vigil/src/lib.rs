//! # Vigil
//!
//! Risk and trust decision engine for sensitive user and employee
//! operations. For every attempt it synthesizes identity, device,
//! transaction-history, and behavioral signals into one canonical
//! decision — allow, step-up, hold, or block — enforced uniformly by
//! callers.
//!
//! ## Components
//!
//! - **Trust scoring** (`vigil-trust`): five weighted component scores,
//!   a 0-1000 composite, tiers and tier benefits
//! - **Device trust** (`vigil-device`): fingerprinting, per-device
//!   history, allow/deny
//! - **Risk-based auth** (`vigil-auth`): per-attempt scoring and step-up
//!   challenges
//! - **Fraud ensemble** (`vigil-fraud`): five deterministic model scores
//!   combined under fixed weights
//! - **Behavior profiling** (`vigil-behavior`): baselines, segments, and
//!   live-event anomaly checks
//! - **Employee anomalies** (`vigil-employee`): insider baselines, eight
//!   checks, graded response
//! - **Kill switch** (`vigil-guard`): five-axis circuit breaker with
//!   auto-triggers
//! - **Alerting** (`vigil-alerting`): deduplicated, escalating,
//!   multi-channel alerts
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use vigil::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let engine = DecisionEngine::builder().build();
//!
//!     let ctx = OperationContext::new("user-1", "session-1", OperationKind::Transfer, "10.0.0.1")
//!         .with_amount(2_500.0);
//!     let assessment = engine.assess_risk(&ctx).await?;
//!     println!("{:?}", assessment.required_action);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod engine;

// Re-export the component crates under stable names.
pub use vigil_alerting as alerting;
pub use vigil_auth as auth;
pub use vigil_behavior as behavior;
pub use vigil_core as core;
pub use vigil_device as device;
pub use vigil_employee as employee;
pub use vigil_fraud as fraud;
pub use vigil_guard as guard;
pub use vigil_trust as trust;

pub use config::EngineConfig;
pub use engine::{DecisionEngine, DecisionEngineBuilder};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::EngineConfig;
    pub use crate::engine::{DecisionEngine, DecisionEngineBuilder};
    pub use vigil_alerting::{Alert, AlertCategory, AlertPriority, AlertTarget};
    pub use vigil_auth::{ChallengeKind, OperationContext, OperationKind, RequiredAction};
    pub use vigil_behavior::{BehaviorProfile, LiveEvent, UserSegment};
    pub use vigil_core::error::{EngineError, Result};
    pub use vigil_core::types::{Actor, DenialCode, GeoPoint, Platform, PolicyDecision};
    pub use vigil_device::{DeviceSignals, DeviceTrustLevel};
    pub use vigil_employee::{AnomalyStatus, EmployeeActionContext};
    pub use vigil_fraud::{FraudDecision, TransactionContext};
    pub use vigil_guard::{KillScope, Product, TxType};
    pub use vigil_trust::{TrustScoreSnapshot, TrustTier};
}

/// Version information.
pub mod version {
    /// Crate version.
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_prelude_imports() {
        use crate::prelude::*;

        let _tier = TrustTier::Elite;
        let _decision = FraudDecision::Approve;
        let _action = RequiredAction::Allow;
    }

    #[test]
    fn test_version() {
        assert!(!crate::version::VERSION.is_empty());
    }
}
