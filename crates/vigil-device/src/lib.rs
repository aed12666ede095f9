//! # Vigil Device
//!
//! Device trust registry. Identifies devices by a stable fingerprint over
//! client-reported signals, tracks per-device operation history, and
//! answers the allow/deny question for a (user, device) pair.
//!
//! - Fingerprint: SHA-256 over a fixed ordered signal set, absent signals
//!   omitted
//! - Upsert keyed by (user id, fingerprint); new devices trigger a
//!   notification
//! - Trust factors computed on read, never pre-aggregated
//! - Five cumulative failures downgrade a trusted device; upgrades are
//!   always explicit

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod fingerprint;
pub mod registry;
pub mod types;

pub use fingerprint::fingerprint;
pub use registry::{DeviceConfig, DeviceRegistry};
pub use types::{DeviceRecord, DeviceSignals, DeviceTrustLevel};
