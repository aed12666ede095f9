//! # Vigil Auth
//!
//! Risk-based authentication. Accumulates a 0-100 risk score for each
//! sensitive operation attempt from independent evaluators (operation
//! base risk, device, location, time of day, amount, recipient, recent
//! history, trust tier), maps the score to a required action on a fixed
//! ladder, and verifies step-up challenges against the persisted
//! assessment.
//!
//! Every assessment is persisted before it is returned, so the audit
//! trail exists even when the caller crashes mid-flow.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod assessor;
pub mod types;

pub use assessor::{AuthConfig, RiskAssessor};
pub use types::{
    AssessmentStore, ChallengeKind, OperationContext, OperationKind, RequiredAction,
    RiskAssessment, RiskLevel,
};
