//! Write-only audit sink for security-relevant engine events.
//!
//! Every mutating operation records who did what to which resource. The
//! default sink emits structured entries to the `audit` tracing target;
//! the in-memory sink backs tests.

use crate::error::Result;
use crate::types::Actor;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Severity of an audited event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditSeverity {
    /// Routine operation.
    Info,
    /// Unusual but handled.
    Warning,
    /// Security-relevant denial or response action.
    Critical,
}

/// A single audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Event time.
    pub timestamp: DateTime<Utc>,
    /// Who performed the action.
    pub actor: Actor,
    /// Action verb (snake_case).
    pub action: String,
    /// Resource the action touched.
    pub resource: String,
    /// Human-readable description.
    pub description: String,
    /// Severity.
    pub severity: AuditSeverity,
    /// Open metadata for downstream tooling.
    pub metadata: serde_json::Value,
}

impl AuditEntry {
    /// Create a new entry stamped with the current time.
    #[must_use]
    pub fn new(actor: Actor, action: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            actor,
            action: action.into(),
            resource: resource.into(),
            description: String::new(),
            severity: AuditSeverity::Info,
            metadata: serde_json::Value::Null,
        }
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the severity.
    #[must_use]
    pub fn with_severity(mut self, severity: AuditSeverity) -> Self {
        self.severity = severity;
        self
    }

    /// Attach metadata; values that fail to serialize are dropped.
    #[must_use]
    pub fn with_metadata(mut self, metadata: impl Serialize) -> Self {
        if let Ok(value) = serde_json::to_value(metadata) {
            self.metadata = value;
        }
        self
    }
}

/// Write-only audit log.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Persist one entry. Implementations must not fail the calling
    /// operation for transient sink trouble; buffering is their concern.
    async fn record(&self, entry: AuditEntry) -> Result<()>;
}

/// Audit sink that emits entries to the `audit` tracing target.
#[derive(Debug, Clone, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, entry: AuditEntry) -> Result<()> {
        tracing::info!(
            target: "audit",
            actor = %entry.actor,
            action = %entry.action,
            resource = %entry.resource,
            severity = ?entry.severity,
            description = %entry.description,
            "AUDIT"
        );
        Ok(())
    }
}

/// In-memory audit sink for tests.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditSink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all recorded entries.
    #[must_use]
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().expect("audit sink poisoned").clone()
    }

    /// Entries whose action matches `action`.
    #[must_use]
    pub fn entries_for_action(&self, action: &str) -> Vec<AuditEntry> {
        self.entries()
            .into_iter()
            .filter(|e| e.action == action)
            .collect()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, entry: AuditEntry) -> Result<()> {
        self.entries.lock().expect("audit sink poisoned").push(entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_sink_records() {
        let sink = MemoryAuditSink::new();
        let entry = AuditEntry::new(Actor::employee("e-1"), "block_device", "device/abc")
            .with_severity(AuditSeverity::Critical)
            .with_description("manual block");

        sink.record(entry).await.unwrap();

        let entries = sink.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, "block_device");
        assert_eq!(entries[0].severity, AuditSeverity::Critical);
    }

    #[tokio::test]
    async fn test_entries_for_action_filters() {
        let sink = MemoryAuditSink::new();
        sink.record(AuditEntry::new(Actor::system("sweep"), "escalate", "alert/1"))
            .await
            .unwrap();
        sink.record(AuditEntry::new(Actor::system("sweep"), "expire", "switch/2"))
            .await
            .unwrap();

        assert_eq!(sink.entries_for_action("escalate").len(), 1);
        assert_eq!(sink.entries_for_action("missing").len(), 0);
    }

    #[test]
    fn test_metadata_attachment() {
        let entry = AuditEntry::new(Actor::user("u-1"), "trust_device", "device/xyz")
            .with_metadata(serde_json::json!({ "fingerprint": "xyz" }));
        assert_eq!(entry.metadata["fingerprint"], "xyz");
    }
}
