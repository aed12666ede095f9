//! Alert types and data structures.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use vigil_core::stores::NotificationChannel;

// ============================================================================
// Categories and priorities
// ============================================================================

/// Alert category, part of the deduplication key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertCategory {
    /// Account-security events (new device, step-up failures).
    Security,
    /// Fraud evaluations and blocks.
    Fraud,
    /// Risk-assessment outcomes.
    Risk,
    /// Device registry events.
    Device,
    /// Kill-switch activations and auto-triggers.
    KillSwitch,
    /// Employee anomaly detections.
    Employee,
    /// Engine-internal notices.
    System,
}

/// Alert priority. Defines the default channel set and escalation timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertPriority {
    /// Informational.
    Low,
    /// Needs attention soon.
    Medium,
    /// Needs attention now.
    High,
    /// Security-critical.
    Critical,
    /// Wake someone up.
    Emergency,
}

impl AlertPriority {
    /// Default delivery channels for this priority.
    #[must_use]
    pub fn default_channels(self) -> Vec<NotificationChannel> {
        use NotificationChannel::*;
        match self {
            Self::Low => vec![InApp],
            Self::Medium => vec![InApp, Push],
            Self::High => vec![InApp, Push, Email],
            Self::Critical => vec![InApp, Push, Email, Sms, Telegram],
            Self::Emergency => vec![InApp, Push, Email, Sms, Telegram, Webhook],
        }
    }
}

impl std::fmt::Display for AlertPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
            Self::Emergency => write!(f, "emergency"),
        }
    }
}

// ============================================================================
// Targets and status
// ============================================================================

/// Who an alert is addressed to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum AlertTarget {
    /// A single user.
    User(String),
    /// A single employee.
    Employee(String),
    /// Every employee holding a role.
    Role(String),
    /// A named team.
    Team(String),
    /// Every administrator.
    AllAdmins,
}

impl AlertTarget {
    /// Stable key used for deduplication and delivery addressing.
    #[must_use]
    pub fn key(&self) -> String {
        match self {
            Self::User(id) => format!("user:{id}"),
            Self::Employee(id) => format!("employee:{id}"),
            Self::Role(role) => format!("role:{role}"),
            Self::Team(team) => format!("team:{team}"),
            Self::AllAdmins => "all_admins".to_string(),
        }
    }
}

impl std::fmt::Display for AlertTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// Lifecycle status of an alert. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    /// Created, channel fan-out not finished.
    Pending,
    /// Handed to the channel transports.
    Sent,
    /// Read by the target.
    Read,
    /// Acted upon by the target.
    Actioned,
}

impl AlertStatus {
    /// Ordering rank; transitions must strictly increase it.
    #[must_use]
    pub fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Sent => 1,
            Self::Read => 2,
            Self::Actioned => 3,
        }
    }
}

// ============================================================================
// Alert record
// ============================================================================

/// Maximum number of escalations in a single alert chain.
pub const MAX_ESCALATION_LEVEL: u8 = 3;

/// A delivered (or pending) alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    /// Alert id.
    pub id: Uuid,
    /// Category.
    pub category: AlertCategory,
    /// Priority.
    pub priority: AlertPriority,
    /// Short title.
    pub title: String,
    /// Message body.
    pub message: String,
    /// Addressee.
    pub target: AlertTarget,
    /// Component that raised the alert (snake_case).
    pub source: String,
    /// Identifier of the originating record, when there is one.
    pub source_id: Option<String>,
    /// Channels the alert was dispatched on.
    pub channels: Vec<NotificationChannel>,
    /// Lifecycle status.
    pub status: AlertStatus,
    /// 0 for original alerts, 1..=3 for escalations.
    pub escalation_level: u8,
    /// Id of the alert this one escalates, for escalations.
    pub escalated_from: Option<Uuid>,
    /// Id of the escalation created from this alert, once escalated.
    pub escalated_to: Option<Uuid>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// When the fan-out completed.
    pub sent_at: Option<DateTime<Utc>>,
    /// Who read/actioned the alert, when someone did.
    pub handled_by: Option<String>,
}

impl Alert {
    /// True while nobody has read or actioned the alert.
    #[must_use]
    pub fn is_unread(&self) -> bool {
        matches!(self.status, AlertStatus::Pending | AlertStatus::Sent)
    }

    /// Deduplication key: category, source, source id, target.
    #[must_use]
    pub fn dedup_key(&self) -> (AlertCategory, String, Option<String>, String) {
        (
            self.category,
            self.source.clone(),
            self.source_id.clone(),
            self.target.key(),
        )
    }
}
