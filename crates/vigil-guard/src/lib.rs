//! # Vigil Guard
//!
//! Global kill switch. Gates every operation on five axes (global,
//! product, region, user segment, transaction type) plus maintenance
//! mode, with manual activation and automatic circuit-breaker triggers.
//!
//! - State is a versioned value object replaced atomically as a whole;
//!   no caller ever observes a half-updated configuration
//! - Reads go through a short-TTL in-process cache; writes are
//!   authoritative and invalidate it
//! - Auto-triggers watch trailing-hour fraud rate, error rate, and volume
//!   and activate a time-boxed outgoing-transfer kill
//! - A cleanup sweep deactivates past-expiry switches

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod switch;
pub mod triggers;
pub mod types;

pub use switch::{GuardConfig, KillSwitchService};
pub use triggers::{TrafficStats, TrafficStatsProvider};
pub use types::{
    ActiveKillSwitch, AutoTriggerConfig, KillScope, KillStateStore, KillSwitchState, Product,
    SegmentName, TxType, Versioned,
};
