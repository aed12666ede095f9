//! # Vigil Trust
//!
//! Composite trust scoring. Synthesizes identity, financial, behavioral,
//! transactional, and social facts into a 0-1000 score, a discrete tier,
//! and a benefits bundle.
//!
//! - Five component scores, each clamped to [0, 200] before weighting
//! - Tier and benefits are pure functions of the score
//! - Snapshots are immutable and superseded, never mutated
//! - Cached reads with a 24h freshness window; recalculation on demand

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod engine;
pub mod types;

pub use engine::{TrustConfig, TrustScoreEngine};
pub use types::{
    ComponentScores, ScoreTrend, TierBenefits, TrustScoreSnapshot, TrustSnapshotStore, TrustTier,
};
