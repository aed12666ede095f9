//! In-memory store implementations.
//!
//! Used by unit and integration tests across the workspace, and usable as
//! local wiring when a deployment keeps everything in process. Not meant
//! for durable production storage.

use crate::error::{EngineError, Result};
use crate::stores::{
    EmployeeActionRecord, EmployeeDirectory, EmployeeRecord, IdentityRecord, IdentityStore,
    LedgerStats, LedgerTransaction, NotificationChannel, NotificationMessage, NotificationSender,
    SessionRecord, SessionStore, TransactionLedger, TransactionStatus, UserSegmentResolver,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use tokio::sync::RwLock;

// ============================================================================
// Identity
// ============================================================================

/// In-memory identity store.
#[derive(Debug, Default)]
pub struct InMemoryIdentityStore {
    records: RwLock<HashMap<String, IdentityRecord>>,
}

impl InMemoryIdentityStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a record.
    pub async fn upsert(&self, record: IdentityRecord) {
        self.records
            .write()
            .await
            .insert(record.user_id.clone(), record);
    }
}

#[async_trait]
impl IdentityStore for InMemoryIdentityStore {
    async fn identity(&self, user_id: &str) -> Result<Option<IdentityRecord>> {
        Ok(self.records.read().await.get(user_id).cloned())
    }
}

// ============================================================================
// Ledger
// ============================================================================

/// In-memory transaction ledger.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    transactions: RwLock<Vec<LedgerTransaction>>,
}

impl InMemoryLedger {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a transaction.
    pub async fn push(&self, tx: LedgerTransaction) {
        self.transactions.write().await.push(tx);
    }
}

#[async_trait]
impl TransactionLedger for InMemoryLedger {
    async fn transactions_since(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<LedgerTransaction>> {
        let mut txs: Vec<LedgerTransaction> = self
            .transactions
            .read()
            .await
            .iter()
            .filter(|tx| tx.user_id == user_id && tx.timestamp >= since)
            .cloned()
            .collect();
        txs.sort_by_key(|tx| tx.timestamp);
        Ok(txs)
    }

    async fn lifetime_stats(&self, user_id: &str) -> Result<LedgerStats> {
        let mut stats = LedgerStats::default();
        for tx in self
            .transactions
            .read()
            .await
            .iter()
            .filter(|tx| tx.user_id == user_id)
        {
            match tx.status {
                TransactionStatus::Completed => {
                    stats.completed += 1;
                    stats.total_volume += tx.amount;
                }
                TransactionStatus::Failed => stats.failed += 1,
                TransactionStatus::Pending => {}
            }
            stats.first_at = match stats.first_at {
                Some(first) if first <= tx.timestamp => Some(first),
                _ => Some(tx.timestamp),
            };
        }
        Ok(stats)
    }
}

// ============================================================================
// Sessions
// ============================================================================

/// In-memory session store.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<Vec<SessionRecord>>,
    failed_logins: RwLock<Vec<(String, DateTime<Utc>)>>,
    terminated: RwLock<HashSet<String>>,
}

impl InMemorySessionStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a session.
    pub async fn push(&self, session: SessionRecord) {
        self.sessions.write().await.push(session);
    }

    /// Record a failed login attempt.
    pub async fn push_failed_login(&self, user_id: impl Into<String>, at: DateTime<Utc>) {
        self.failed_logins.write().await.push((user_id.into(), at));
    }

    /// True when `terminate_session` was called for this session.
    pub async fn was_terminated(&self, session_id: &str) -> bool {
        self.terminated.read().await.contains(session_id)
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn sessions_since(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<SessionRecord>> {
        let mut sessions: Vec<SessionRecord> = self
            .sessions
            .read()
            .await
            .iter()
            .filter(|s| s.user_id == user_id && s.started_at >= since)
            .cloned()
            .collect();
        sessions.sort_by_key(|s| s.started_at);
        Ok(sessions)
    }

    async fn failed_logins_since(&self, user_id: &str, since: DateTime<Utc>) -> Result<u32> {
        Ok(self
            .failed_logins
            .read()
            .await
            .iter()
            .filter(|(id, at)| id == user_id && *at >= since)
            .count() as u32)
    }

    async fn last_session(&self, user_id: &str) -> Result<Option<SessionRecord>> {
        Ok(self
            .sessions
            .read()
            .await
            .iter()
            .filter(|s| s.user_id == user_id)
            .max_by_key(|s| s.started_at)
            .cloned())
    }

    async fn terminate_session(&self, session_id: &str) -> Result<()> {
        let known = self
            .sessions
            .read()
            .await
            .iter()
            .any(|s| s.session_id == session_id);
        if !known {
            return Err(EngineError::not_found("session", session_id));
        }
        self.terminated.write().await.insert(session_id.to_string());
        Ok(())
    }
}

// ============================================================================
// Employee directory
// ============================================================================

/// In-memory employee directory.
#[derive(Debug, Default)]
pub struct InMemoryEmployeeDirectory {
    employees: RwLock<HashMap<String, EmployeeRecord>>,
    actions: RwLock<Vec<EmployeeActionRecord>>,
}

impl InMemoryEmployeeDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an employee record.
    pub async fn upsert(&self, record: EmployeeRecord) {
        self.employees
            .write()
            .await
            .insert(record.employee_id.clone(), record);
    }

    /// Append an action record.
    pub async fn push_action(&self, action: EmployeeActionRecord) {
        self.actions.write().await.push(action);
    }
}

#[async_trait]
impl EmployeeDirectory for InMemoryEmployeeDirectory {
    async fn employee(&self, employee_id: &str) -> Result<Option<EmployeeRecord>> {
        Ok(self.employees.read().await.get(employee_id).cloned())
    }

    async fn actions_since(
        &self,
        employee_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<EmployeeActionRecord>> {
        let mut actions: Vec<EmployeeActionRecord> = self
            .actions
            .read()
            .await
            .iter()
            .filter(|a| a.employee_id == employee_id && a.timestamp >= since)
            .cloned()
            .collect();
        actions.sort_by_key(|a| a.timestamp);
        Ok(actions)
    }
}

// ============================================================================
// Notifications
// ============================================================================

/// Notification sender that records every dispatch and can be told to fail
/// specific channels, for fan-out fault-tolerance tests.
#[derive(Debug, Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<(NotificationChannel, NotificationMessage)>>,
    failing: Mutex<HashSet<NotificationChannel>>,
}

impl RecordingSender {
    /// Create a sender that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make dispatches on `channel` fail.
    pub fn fail_channel(&self, channel: NotificationChannel) {
        self.failing
            .lock()
            .expect("sender poisoned")
            .insert(channel);
    }

    /// Snapshot of recorded dispatches.
    #[must_use]
    pub fn sent(&self) -> Vec<(NotificationChannel, NotificationMessage)> {
        self.sent.lock().expect("sender poisoned").clone()
    }

    /// Recorded dispatches on a single channel.
    #[must_use]
    pub fn sent_on(&self, channel: NotificationChannel) -> Vec<NotificationMessage> {
        self.sent()
            .into_iter()
            .filter(|(c, _)| *c == channel)
            .map(|(_, m)| m)
            .collect()
    }
}

#[async_trait]
impl NotificationSender for RecordingSender {
    async fn send(
        &self,
        channel: NotificationChannel,
        message: &NotificationMessage,
    ) -> Result<()> {
        if self.failing.lock().expect("sender poisoned").contains(&channel) {
            return Err(EngineError::unavailable(format!(
                "{channel} transport down"
            )));
        }
        self.sent
            .lock()
            .expect("sender poisoned")
            .push((channel, message.clone()));
        Ok(())
    }
}

// ============================================================================
// Segments
// ============================================================================

/// Segment resolver backed by a static map.
#[derive(Debug, Default)]
pub struct StaticSegmentResolver {
    segments: RwLock<HashMap<String, String>>,
}

impl StaticSegmentResolver {
    /// Create an empty resolver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign a user to a segment.
    pub async fn assign(&self, user_id: impl Into<String>, segment: impl Into<String>) {
        self.segments
            .write()
            .await
            .insert(user_id.into(), segment.into());
    }
}

#[async_trait]
impl UserSegmentResolver for StaticSegmentResolver {
    async fn segment_of(&self, user_id: &str) -> Result<Option<String>> {
        Ok(self.segments.read().await.get(user_id).cloned())
    }
}
