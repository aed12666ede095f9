//! # Vigil Core
//!
//! Core abstractions shared by every Vigil decision-engine crate.
//!
//! This crate provides:
//! - The engine error taxonomy and `Result` alias
//! - Shared domain types (actors, risk factors, denial codes)
//! - Store trait definitions for the identity, ledger, session, and
//!   employee collaborators the engine reads from
//! - The write-only audit sink and notification sender interfaces
//! - In-memory store implementations used by tests and local wiring
//! - Structured logging configuration

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod audit;
pub mod error;
pub mod logging;
pub mod memory;
pub mod stores;
pub mod types;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::audit::{AuditEntry, AuditSeverity, AuditSink};
    pub use crate::error::{EngineError, Result};
    pub use crate::stores::{
        EmployeeDirectory, IdentityStore, NotificationSender, SessionStore, TransactionLedger,
        UserSegmentResolver,
    };
    pub use crate::types::{
        Actor, ActorKind, DenialCode, GeoPoint, Platform, PolicyDecision, RiskFactor,
    };
}
