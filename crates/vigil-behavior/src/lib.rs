//! # Vigil Behavior
//!
//! Behavioral profile builder and anomaly detector.
//!
//! Builds a per-user behavioral baseline from a 90-day session window and
//! a 180-day transaction window: temporal habits, transaction patterns,
//! device usage, and four risk indicators. Profiles are versioned
//! snapshots replaced wholesale on rebuild. Live events are compared
//! against the stored profile by independent checks that never suppress
//! one another.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod anomaly;
pub mod builder;
pub mod types;

pub use anomaly::detect_anomalies;
pub use builder::{BehaviorConfig, BehaviorEngine};
pub use types::{
    BehaviorAnomaly, BehaviorAnomalyKind, BehaviorProfile, LiveEvent, ProfileStore, RiskIndicators,
    UserSegment,
};
