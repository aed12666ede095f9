//! Risk assessment types and data structures.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;
use vigil_core::error::{EngineError, Result};
use vigil_core::types::{GeoPoint, RiskFactor};

// ============================================================================
// Operations
// ============================================================================

/// Operation kinds the assessor knows a base risk for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Sign-in.
    Login,
    /// Read-only data access.
    View,
    /// Outgoing transfer.
    Transfer,
    /// Withdrawal to an external account.
    Withdrawal,
    /// Financing request.
    Financing,
    /// Bill or merchant payment.
    Payment,
    /// Password change.
    PasswordChange,
    /// Email change.
    EmailChange,
    /// Phone change.
    PhoneChange,
    /// Account closure.
    AccountClosure,
    /// Transaction limit change.
    LimitChange,
    /// Marking a device trusted.
    DeviceTrust,
}

impl OperationKind {
    /// Fixed base risk contribution, 0-90.
    #[must_use]
    pub fn base_risk(self) -> f64 {
        match self {
            Self::View => 0.0,
            Self::Login => 5.0,
            Self::Payment => 30.0,
            Self::Financing => 35.0,
            Self::Transfer => 40.0,
            Self::Withdrawal => 45.0,
            Self::EmailChange | Self::PhoneChange => 45.0,
            Self::PasswordChange => 50.0,
            Self::DeviceTrust => 50.0,
            Self::LimitChange => 55.0,
            Self::AccountClosure => 60.0,
        }
    }

    /// Sensitive operations carry a risk floor regardless of the other
    /// factors: credential changes and account closure.
    #[must_use]
    pub fn is_sensitive(self) -> bool {
        matches!(
            self,
            Self::PasswordChange | Self::EmailChange | Self::PhoneChange | Self::AccountClosure
        )
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Login => "login",
            Self::View => "view",
            Self::Transfer => "transfer",
            Self::Withdrawal => "withdrawal",
            Self::Financing => "financing",
            Self::Payment => "payment",
            Self::PasswordChange => "change_password",
            Self::EmailChange => "change_email",
            Self::PhoneChange => "change_phone",
            Self::AccountClosure => "close_account",
            Self::LimitChange => "change_limits",
            Self::DeviceTrust => "trust_device",
        };
        write!(f, "{s}")
    }
}

/// Context for one operation attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationContext {
    /// User attempting the operation.
    pub user_id: String,
    /// Session the attempt happens in.
    pub session_id: String,
    /// Operation kind.
    pub operation: OperationKind,
    /// Monetary amount, when applicable.
    pub amount: Option<f64>,
    /// Recipient, when applicable.
    pub recipient_id: Option<String>,
    /// Source IP address.
    pub ip: String,
    /// Country the IP resolves to, when known.
    pub ip_country: Option<String>,
    /// True when the IP belongs to a known VPN or proxy range.
    pub is_vpn_or_proxy: bool,
    /// Geolocation of the attempt, when known.
    pub geo: Option<GeoPoint>,
    /// Fingerprint of the device used, when signals were supplied.
    pub device_fingerprint: Option<String>,
    /// Attempt time.
    pub timestamp: DateTime<Utc>,
}

impl OperationContext {
    /// Minimal context for an operation attempt.
    #[must_use]
    pub fn new(
        user_id: impl Into<String>,
        session_id: impl Into<String>,
        operation: OperationKind,
        ip: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            session_id: session_id.into(),
            operation,
            amount: None,
            recipient_id: None,
            ip: ip.into(),
            ip_country: None,
            is_vpn_or_proxy: false,
            geo: None,
            device_fingerprint: None,
            timestamp: Utc::now(),
        }
    }

    /// Set the amount.
    #[must_use]
    pub fn with_amount(mut self, amount: f64) -> Self {
        self.amount = Some(amount);
        self
    }

    /// Set the recipient.
    #[must_use]
    pub fn with_recipient(mut self, recipient: impl Into<String>) -> Self {
        self.recipient_id = Some(recipient.into());
        self
    }

    /// Set the device fingerprint.
    #[must_use]
    pub fn with_device(mut self, fingerprint: impl Into<String>) -> Self {
        self.device_fingerprint = Some(fingerprint.into());
        self
    }

    /// Set the geolocation.
    #[must_use]
    pub fn with_geo(mut self, geo: GeoPoint) -> Self {
        self.geo = Some(geo);
        self
    }
}

// ============================================================================
// Actions and levels
// ============================================================================

/// Risk level classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    /// Normal processing.
    Low,
    /// Watch.
    Medium,
    /// Challenge.
    High,
    /// Block or review.
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

/// Action the caller must enforce before the operation proceeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequiredAction {
    /// Proceed.
    Allow,
    /// Confirm with device biometrics.
    Biometry,
    /// Confirm with a one-time password.
    Otp,
    /// Full step-up (two-factor) challenge.
    StepUp,
    /// Queue for manual review.
    ManualReview,
    /// Deny outright.
    Block,
}

impl RequiredAction {
    /// Fixed score ladder.
    #[must_use]
    pub fn from_score(score: f64) -> Self {
        match score {
            s if s <= 15.0 => Self::Allow,
            s if s <= 30.0 => Self::Biometry,
            s if s <= 50.0 => Self::Otp,
            s if s <= 75.0 => Self::StepUp,
            s if s >= 90.0 => Self::Block,
            _ => Self::ManualReview,
        }
    }

    /// Cooldown before the operation may be retried, by action band.
    #[must_use]
    pub fn cooldown_minutes(self) -> Option<u32> {
        match self {
            Self::Allow | Self::Biometry => None,
            Self::Otp => Some(5),
            Self::StepUp => Some(15),
            Self::ManualReview => Some(30),
            Self::Block => Some(60),
        }
    }

    /// The challenge kind that satisfies this action, when there is one.
    #[must_use]
    pub fn expected_challenge(self) -> Option<ChallengeKind> {
        match self {
            Self::Biometry => Some(ChallengeKind::Biometry),
            Self::Otp => Some(ChallengeKind::Otp),
            Self::StepUp => Some(ChallengeKind::TwoFactor),
            _ => None,
        }
    }
}

/// Kind of step-up challenge a client can answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeKind {
    /// Device biometrics.
    Biometry,
    /// One-time password.
    Otp,
    /// Full two-factor flow.
    TwoFactor,
}

// ============================================================================
// Assessment record
// ============================================================================

/// One persisted risk assessment. Created per attempt; mutated exactly
/// once, when the challenge completes; otherwise an audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// Assessment id.
    pub id: Uuid,
    /// User.
    pub user_id: String,
    /// Session.
    pub session_id: String,
    /// Operation assessed.
    pub operation: OperationKind,
    /// Final score in [0, 100].
    pub risk_score: f64,
    /// Level derived from the score.
    pub risk_level: RiskLevel,
    /// Action derived from the score.
    pub required_action: RequiredAction,
    /// Factors that contributed, with signed weights.
    pub risk_factors: Vec<RiskFactor>,
    /// Retry cooldown, by action band.
    pub cooldown_minutes: Option<u32>,
    /// True once the step-up challenge for this assessment succeeded.
    pub challenge_completed: bool,
    /// Assessment time.
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Assessment store
// ============================================================================

/// Persistence for risk assessments. Inserts happen before the assessment
/// is returned to the caller.
#[async_trait]
pub trait AssessmentStore: Send + Sync {
    /// Append an assessment.
    async fn insert(&self, assessment: RiskAssessment) -> Result<()>;

    /// Most recent assessment for a (user, session) pair.
    async fn latest_for_session(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<Option<RiskAssessment>>;

    /// Mark an assessment's challenge completed. Errors with `Conflict`
    /// when it already was.
    async fn mark_completed(&self, id: Uuid) -> Result<RiskAssessment>;
}

/// In-memory assessment store.
#[derive(Debug, Default)]
pub struct InMemoryAssessmentStore {
    assessments: RwLock<HashMap<Uuid, RiskAssessment>>,
}

impl InMemoryAssessmentStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored assessments.
    pub async fn len(&self) -> usize {
        self.assessments.read().await.len()
    }

    /// True when nothing is stored.
    pub async fn is_empty(&self) -> bool {
        self.assessments.read().await.is_empty()
    }
}

#[async_trait]
impl AssessmentStore for InMemoryAssessmentStore {
    async fn insert(&self, assessment: RiskAssessment) -> Result<()> {
        self.assessments
            .write()
            .await
            .insert(assessment.id, assessment);
        Ok(())
    }

    async fn latest_for_session(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<Option<RiskAssessment>> {
        Ok(self
            .assessments
            .read()
            .await
            .values()
            .filter(|a| a.user_id == user_id && a.session_id == session_id)
            .max_by_key(|a| a.created_at)
            .cloned())
    }

    async fn mark_completed(&self, id: Uuid) -> Result<RiskAssessment> {
        let mut assessments = self.assessments.write().await;
        let assessment = assessments
            .get_mut(&id)
            .ok_or_else(|| EngineError::not_found("risk assessment", id.to_string()))?;
        if assessment.challenge_completed {
            return Err(EngineError::conflict(format!(
                "assessment {id} already completed"
            )));
        }
        assessment.challenge_completed = true;
        Ok(assessment.clone())
    }
}
