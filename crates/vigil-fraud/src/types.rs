//! Fraud evaluation types and data structures.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;
use vigil_core::error::Result;
use vigil_core::stores::TransactionKind;
use vigil_core::types::RiskFactor;

// ============================================================================
// Transaction context
// ============================================================================

/// Context for one transaction under evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionContext {
    /// User initiating the transaction.
    pub user_id: String,
    /// Ledger transaction id, when one already exists.
    pub transaction_id: Option<String>,
    /// Amount.
    pub amount: f64,
    /// ISO currency code.
    pub currency: String,
    /// Transaction kind.
    pub kind: TransactionKind,
    /// Recipient id, when applicable.
    pub recipient_id: Option<String>,
    /// Recipient country code, when applicable.
    pub recipient_country: Option<String>,
    /// True for cross-border transactions.
    pub international: bool,
    /// Source IP address.
    pub ip: String,
    /// Fingerprint of the initiating device, when known.
    pub device_fingerprint: Option<String>,
    /// Initiation time.
    pub timestamp: DateTime<Utc>,
}

impl TransactionContext {
    /// Minimal context for a transfer.
    #[must_use]
    pub fn new(
        user_id: impl Into<String>,
        amount: f64,
        kind: TransactionKind,
        ip: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            transaction_id: None,
            amount,
            currency: "USD".to_string(),
            kind,
            recipient_id: None,
            recipient_country: None,
            international: false,
            ip: ip.into(),
            device_fingerprint: None,
            timestamp: Utc::now(),
        }
    }

    /// Set the recipient.
    #[must_use]
    pub fn with_recipient(mut self, recipient: impl Into<String>) -> Self {
        self.recipient_id = Some(recipient.into());
        self
    }

    /// Mark the transaction international with a recipient country.
    #[must_use]
    pub fn with_recipient_country(mut self, country: impl Into<String>) -> Self {
        self.recipient_country = Some(country.into());
        self.international = true;
        self
    }

    /// Set the device fingerprint.
    #[must_use]
    pub fn with_device(mut self, fingerprint: impl Into<String>) -> Self {
        self.device_fingerprint = Some(fingerprint.into());
        self
    }

    /// Set the ledger transaction id.
    #[must_use]
    pub fn with_transaction_id(mut self, id: impl Into<String>) -> Self {
        self.transaction_id = Some(id.into());
        self
    }
}

// ============================================================================
// Decisions and levels
// ============================================================================

/// Risk level classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    /// Normal processing.
    Low,
    /// Flag for review.
    Medium,
    /// Hold for investigation.
    High,
    /// Block immediately.
    Critical,
}

impl From<f64> for RiskLevel {
    fn from(score: f64) -> Self {
        match score {
            s if s < 25.0 => RiskLevel::Low,
            s if s < 50.0 => RiskLevel::Medium,
            s if s < 75.0 => RiskLevel::High,
            _ => RiskLevel::Critical,
        }
    }
}

/// Final fraud decision. Ordered by severity: a critical factor can only
/// ever move the decision up the ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FraudDecision {
    /// Proceed.
    Approve,
    /// Proceed after a two-factor challenge.
    ApproveWith2fa,
    /// Queue for analyst review.
    Review,
    /// Hold the funds pending investigation.
    Hold,
    /// Decline the transaction.
    Decline,
    /// Decline and block the user.
    BlockUser,
}

impl FraudDecision {
    /// Fixed score ladder.
    #[must_use]
    pub fn from_score(score: f64) -> Self {
        match score {
            s if s < 20.0 => Self::Approve,
            s if s < 40.0 => Self::ApproveWith2fa,
            s if s < 60.0 => Self::Review,
            s if s < 80.0 => Self::Hold,
            s if s < 90.0 => Self::Decline,
            _ => Self::BlockUser,
        }
    }

    /// True when the transaction does not proceed.
    #[must_use]
    pub fn is_blocking(self) -> bool {
        matches!(self, Self::Hold | Self::Decline | Self::BlockUser)
    }
}

impl std::fmt::Display for FraudDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Approve => "approve",
            Self::ApproveWith2fa => "approve_with_2fa",
            Self::Review => "review",
            Self::Hold => "hold",
            Self::Decline => "decline",
            Self::BlockUser => "block_user",
        };
        write!(f, "{s}")
    }
}

// ============================================================================
// Model scores and evaluation record
// ============================================================================

/// Output of one model: a clamped score and the factors behind it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelScore {
    /// Score in [0, 100].
    pub score: f64,
    /// Factors that contributed.
    pub factors: Vec<RiskFactor>,
}

impl ModelScore {
    /// A silent model: no signal, no factors.
    #[must_use]
    pub fn quiet() -> Self {
        Self {
            score: 0.0,
            factors: Vec::new(),
        }
    }

    /// Build from accumulated factors: score is the clamped factor sum.
    #[must_use]
    pub fn from_factors(factors: Vec<RiskFactor>) -> Self {
        let score = factors
            .iter()
            .map(|f| f.impact)
            .sum::<f64>()
            .clamp(0.0, 100.0);
        Self { score, factors }
    }
}

/// The five model scores carried on every evaluation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelScores {
    /// Anomaly-heuristic model.
    pub anomaly: f64,
    /// Pattern-heuristic model.
    pub pattern: f64,
    /// Expert-rules model.
    pub rules: f64,
    /// Velocity model.
    pub velocity: f64,
    /// Behavior-deviation model.
    pub deviation: f64,
}

impl ModelScores {
    /// Scores as a slice in fixed order.
    #[must_use]
    pub fn as_array(&self) -> [f64; 5] {
        [
            self.anomaly,
            self.pattern,
            self.rules,
            self.velocity,
            self.deviation,
        ]
    }
}

/// An append-only fraud evaluation record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FraudEvaluation {
    /// Evaluation id.
    pub id: Uuid,
    /// User evaluated.
    pub user_id: String,
    /// Ledger transaction id, when one exists.
    pub transaction_id: Option<String>,
    /// Combined score in [0, 100].
    pub fraud_score: f64,
    /// Level derived from the score.
    pub risk_level: RiskLevel,
    /// Cross-model confidence in [0, 100].
    pub confidence: f64,
    /// Final decision.
    pub decision: FraudDecision,
    /// All factors across models.
    pub risk_factors: Vec<RiskFactor>,
    /// Per-model scores.
    pub model_scores: ModelScores,
    /// Version tag of the heuristics that produced this evaluation.
    pub model_version: String,
    /// Wall-clock processing time in milliseconds.
    pub processing_ms: u64,
    /// Evaluation time.
    pub evaluated_at: DateTime<Utc>,
}

// ============================================================================
// Evaluation store
// ============================================================================

/// Append-only persistence for fraud evaluations.
#[async_trait]
pub trait EvaluationStore: Send + Sync {
    /// Append an evaluation.
    async fn insert(&self, evaluation: FraudEvaluation) -> Result<()>;

    /// Evaluations for a user, newest first.
    async fn for_user(&self, user_id: &str) -> Result<Vec<FraudEvaluation>>;
}

/// In-memory evaluation store.
#[derive(Debug, Default)]
pub struct InMemoryEvaluationStore {
    evaluations: RwLock<Vec<FraudEvaluation>>,
}

impl InMemoryEvaluationStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EvaluationStore for InMemoryEvaluationStore {
    async fn insert(&self, evaluation: FraudEvaluation) -> Result<()> {
        self.evaluations.write().await.push(evaluation);
        Ok(())
    }

    async fn for_user(&self, user_id: &str) -> Result<Vec<FraudEvaluation>> {
        let mut evaluations: Vec<FraudEvaluation> = self
            .evaluations
            .read()
            .await
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect();
        evaluations.sort_by(|a, b| b.evaluated_at.cmp(&a.evaluated_at));
        Ok(evaluations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_ladder() {
        assert_eq!(FraudDecision::from_score(0.0), FraudDecision::Approve);
        assert_eq!(FraudDecision::from_score(19.9), FraudDecision::Approve);
        assert_eq!(FraudDecision::from_score(20.0), FraudDecision::ApproveWith2fa);
        assert_eq!(FraudDecision::from_score(40.0), FraudDecision::Review);
        assert_eq!(FraudDecision::from_score(60.0), FraudDecision::Hold);
        assert_eq!(FraudDecision::from_score(80.0), FraudDecision::Decline);
        assert_eq!(FraudDecision::from_score(90.0), FraudDecision::BlockUser);
        assert_eq!(FraudDecision::from_score(100.0), FraudDecision::BlockUser);
    }

    #[test]
    fn test_model_score_from_factors_clamps() {
        let score = ModelScore::from_factors(vec![
            RiskFactor::new("a", 80.0, ""),
            RiskFactor::new("b", 70.0, ""),
        ]);
        assert_eq!(score.score, 100.0);

        let negative = ModelScore::from_factors(vec![RiskFactor::new("c", -40.0, "")]);
        assert_eq!(negative.score, 0.0);
    }

    #[tokio::test]
    async fn test_store_is_append_only_newest_first() {
        let store = InMemoryEvaluationStore::new();
        for (i, score) in [10.0, 70.0].iter().enumerate() {
            store
                .insert(FraudEvaluation {
                    id: Uuid::new_v4(),
                    user_id: "u-1".into(),
                    transaction_id: Some(format!("t-{i}")),
                    fraud_score: *score,
                    risk_level: RiskLevel::from(*score),
                    confidence: 50.0,
                    decision: FraudDecision::from_score(*score),
                    risk_factors: vec![],
                    model_scores: ModelScores::default(),
                    model_version: "test".into(),
                    processing_ms: 1,
                    evaluated_at: Utc::now() + chrono::Duration::milliseconds(i as i64),
                })
                .await
                .unwrap();
        }

        let evaluations = store.for_user("u-1").await.unwrap();
        assert_eq!(evaluations.len(), 2);
        assert_eq!(evaluations[0].transaction_id.as_deref(), Some("t-1"));
    }
}
