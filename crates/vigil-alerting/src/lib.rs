//! # Vigil Alerting
//!
//! Real-time alerting and escalation. Single entry point used by every
//! other engine component to notify a user, employee, role, team, or all
//! admins.
//!
//! - Deduplication on (category, source, source id, target) within a
//!   configurable window
//! - Channel sets defaulted from priority, overridable per call
//! - Independently fault-tolerant per-channel fan-out
//! - Periodic escalation sweep that widens the target of unread alerts,
//!   at most three times per chain

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod escalation;
pub mod service;
pub mod types;

pub use escalation::EscalationConfig;
pub use service::{AlertRequest, AlertService, AlertingConfig};
pub use types::{Alert, AlertCategory, AlertPriority, AlertStatus, AlertTarget};
