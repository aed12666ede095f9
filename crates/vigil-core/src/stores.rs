//! Store interfaces for the external collaborators the engine reads from.
//!
//! The engine never owns domain persistence: identity, ledger, session, and
//! employee data arrive through these traits, and notification delivery is
//! fire-and-forget. Implementations are expected to answer quickly;
//! evaluation paths wrap every call in an upper-bound timeout and degrade
//! to the last known snapshot when a store misses it.

use crate::error::Result;
use crate::types::{GeoPoint, Platform};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Identity
// ============================================================================

/// KYC verification status of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KycStatus {
    /// Verification never started.
    NotStarted,
    /// Documents submitted, decision pending.
    Pending,
    /// Verified.
    Approved,
    /// Rejected.
    Rejected,
}

/// Identity verification depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityLevel {
    /// Email and phone only.
    Basic,
    /// Full document verification.
    Full,
}

/// Identity facts about a user, as served by the identity store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityRecord {
    /// User id.
    pub user_id: String,
    /// KYC status.
    pub kyc_status: KycStatus,
    /// Email verified flag.
    pub email_verified: bool,
    /// Phone verified flag.
    pub phone_verified: bool,
    /// Account creation time.
    pub created_at: DateTime<Utc>,
    /// Verification depth.
    pub identity_level: IdentityLevel,
    /// Total invested balance across products.
    pub invested_balance: f64,
    /// Number of currently active payment defaults.
    pub active_defaults: u32,
    /// Number of financings repaid in full.
    pub completed_financings: u32,
    /// Number of referred users who completed onboarding.
    pub referral_count: u32,
    /// True when the user appears on an internal watchlist.
    pub watchlisted: bool,
}

impl IdentityRecord {
    /// Account age in whole days at `now`.
    #[must_use]
    pub fn account_age_days(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_days()
    }
}

/// Read access to identity facts.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Fetch the identity record for a user, if it exists.
    async fn identity(&self, user_id: &str) -> Result<Option<IdentityRecord>>;
}

// ============================================================================
// Transaction ledger
// ============================================================================

/// Kind of ledger transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// Outgoing transfer to another user or bank.
    TransferOut,
    /// Incoming transfer.
    TransferIn,
    /// Withdrawal to an external account.
    Withdrawal,
    /// Deposit from an external account.
    Deposit,
    /// Merchant or bill payment.
    Payment,
    /// Financing disbursement or installment.
    Financing,
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::TransferOut => "transfer_out",
            Self::TransferIn => "transfer_in",
            Self::Withdrawal => "withdrawal",
            Self::Deposit => "deposit",
            Self::Payment => "payment",
            Self::Financing => "financing",
        };
        write!(f, "{s}")
    }
}

/// Final status of a ledger transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// Completed successfully.
    Completed,
    /// Failed or rejected.
    Failed,
    /// Still in flight.
    Pending,
}

/// A historical transaction as served by the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerTransaction {
    /// Transaction id.
    pub id: String,
    /// Owning user id.
    pub user_id: String,
    /// Amount in account currency.
    pub amount: f64,
    /// ISO currency code, carried for audit only.
    pub currency: String,
    /// Transaction kind.
    pub kind: TransactionKind,
    /// Recipient user/account id, when applicable.
    pub recipient_id: Option<String>,
    /// Recipient country code, when applicable.
    pub recipient_country: Option<String>,
    /// True for cross-border transactions.
    pub international: bool,
    /// Final status.
    pub status: TransactionStatus,
    /// Execution time.
    pub timestamp: DateTime<Utc>,
}

/// Lifetime aggregates the ledger can answer cheaply.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerStats {
    /// Completed transaction count.
    pub completed: u64,
    /// Failed transaction count.
    pub failed: u64,
    /// Total completed volume.
    pub total_volume: f64,
    /// First transaction time, if any.
    pub first_at: Option<DateTime<Utc>>,
}

impl LedgerStats {
    /// Ratio of failed transactions over all finished ones, in [0, 1].
    #[must_use]
    pub fn failure_ratio(&self) -> f64 {
        let finished = self.completed + self.failed;
        if finished == 0 {
            0.0
        } else {
            self.failed as f64 / finished as f64
        }
    }
}

/// Read access to transaction history.
#[async_trait]
pub trait TransactionLedger: Send + Sync {
    /// Transactions for a user since `since`, newest last.
    async fn transactions_since(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<LedgerTransaction>>;

    /// Lifetime aggregates for a user.
    async fn lifetime_stats(&self, user_id: &str) -> Result<LedgerStats>;
}

// ============================================================================
// Sessions
// ============================================================================

/// A login session as served by the session store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Session id.
    pub session_id: String,
    /// User id.
    pub user_id: String,
    /// Session start time.
    pub started_at: DateTime<Utc>,
    /// Session duration in seconds (0 while active).
    pub duration_secs: u64,
    /// Source IP address.
    pub ip: String,
    /// Resolved geolocation, when known.
    pub geo: Option<GeoPoint>,
    /// Client platform.
    pub platform: Platform,
    /// Device fingerprint, when the client supplied signals.
    pub device_fingerprint: Option<String>,
}

/// Read/terminate access to login sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Sessions for a user since `since`, oldest first.
    async fn sessions_since(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<SessionRecord>>;

    /// Number of failed login attempts for a user since `since`.
    async fn failed_logins_since(&self, user_id: &str, since: DateTime<Utc>) -> Result<u32>;

    /// The most recent session for a user, if any.
    async fn last_session(&self, user_id: &str) -> Result<Option<SessionRecord>>;

    /// Forcefully terminate an active session.
    async fn terminate_session(&self, session_id: &str) -> Result<()>;
}

// ============================================================================
// Employee directory
// ============================================================================

/// Employee role, used for role-gated anomaly checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmployeeRole {
    /// Customer support agent.
    Support,
    /// Risk/fraud analyst.
    Analyst,
    /// Team supervisor.
    Supervisor,
    /// Platform administrator.
    Admin,
    /// Super administrator.
    SuperAdmin,
}

/// An employee as served by the directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmployeeRecord {
    /// Employee id.
    pub employee_id: String,
    /// Role.
    pub role: EmployeeRole,
    /// False once offboarded.
    pub active: bool,
    /// Supervisor employee id, when assigned.
    pub supervisor_id: Option<String>,
}

/// Kind of employee action, used for baselines and anomaly checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmployeeActionKind {
    /// Read access to client or transaction data.
    DataAccess,
    /// Approval of a pending operation.
    Approval,
    /// Data export (report, CSV, ...).
    Export,
    /// Access to sensitive records (documents, credentials, limits).
    SensitiveAccess,
    /// Back-office login.
    Login,
    /// Anything else.
    Other,
}

/// A historical employee action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmployeeActionRecord {
    /// Employee id.
    pub employee_id: String,
    /// Action kind.
    pub kind: EmployeeActionKind,
    /// Resource the action touched.
    pub resource: String,
    /// Client the resource belongs to, when applicable.
    pub client_id: Option<String>,
    /// Source IP address.
    pub ip: String,
    /// Monetary amount for approvals, when applicable.
    pub amount: Option<f64>,
    /// Action time.
    pub timestamp: DateTime<Utc>,
}

/// Read access to the employee directory and action history.
#[async_trait]
pub trait EmployeeDirectory: Send + Sync {
    /// Fetch an employee record, if it exists.
    async fn employee(&self, employee_id: &str) -> Result<Option<EmployeeRecord>>;

    /// Actions by an employee since `since`, oldest first.
    async fn actions_since(
        &self,
        employee_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<EmployeeActionRecord>>;
}

// ============================================================================
// Notifications
// ============================================================================

/// Delivery channel for notifications and alerts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationChannel {
    /// In-app inbox.
    InApp,
    /// Mobile push.
    Push,
    /// Email.
    Email,
    /// SMS.
    Sms,
    /// Telegram bot.
    Telegram,
    /// Outbound webhook.
    Webhook,
}

impl std::fmt::Display for NotificationChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::InApp => "in_app",
            Self::Push => "push",
            Self::Email => "email",
            Self::Sms => "sms",
            Self::Telegram => "telegram",
            Self::Webhook => "webhook",
        };
        write!(f, "{s}")
    }
}

/// A message handed to a notification sender.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationMessage {
    /// Delivery target (user id, employee id, role name, or endpoint).
    pub target: String,
    /// Short title.
    pub title: String,
    /// Message body.
    pub body: String,
}

/// Fire-and-forget notification delivery.
///
/// Senders only promise to hand the message to the transport; delivery
/// confirmation is out of scope. Channel failures are isolated by the
/// alerting service, not by implementations.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    /// Dispatch a message on a channel.
    async fn send(&self, channel: NotificationChannel, message: &NotificationMessage)
        -> Result<()>;
}

// ============================================================================
// User segments
// ============================================================================

/// Resolves the segment a user belongs to, for the kill switch's
/// user-segment axis. Checked last because it needs a user lookup.
#[async_trait]
pub trait UserSegmentResolver: Send + Sync {
    /// Segment name for a user, if the user is known.
    async fn segment_of(&self, user_id: &str) -> Result<Option<String>>;
}
