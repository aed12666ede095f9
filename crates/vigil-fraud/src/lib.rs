//! # Vigil Fraud
//!
//! Fraud evaluation ensemble. Five deterministic, independently-computed
//! model scores (anomaly heuristic, pattern heuristic, expert rules,
//! velocity, behavior deviation) combine under fixed weights, get scaled
//! by the user's trust tier, and map onto a decision ladder.
//!
//! The "models" are auditable hand-written heuristics, not trained
//! classifiers: given identical inputs and the same model-version tag the
//! evaluation is bit-for-bit reproducible.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod ensemble;
pub mod models;
pub mod types;

pub use ensemble::{FraudConfig, FraudEnsemble, MODEL_VERSION};
pub use types::{
    EvaluationStore, FraudDecision, FraudEvaluation, ModelScores, RiskLevel, TransactionContext,
};
