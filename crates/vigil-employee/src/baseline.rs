//! Employee baseline construction.
//!
//! Work hours come from the 10th/90th percentile of session-start hours,
//! work days from a >10% activity share, and the four average-daily
//! metrics from the count of active days in the window. Baselines rebuild
//! at most once per 24 hours; reads inside that window return the stored
//! snapshot.

use crate::types::{BaselineStore, EmployeeBaseline};
use chrono::{Datelike, Duration, Timelike, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;
use vigil_core::error::Result;
use vigil_core::stores::{EmployeeActionKind, EmployeeActionRecord, EmployeeDirectory};

/// Builds and caches per-employee baselines.
pub struct BaselineBuilder {
    directory: Arc<dyn EmployeeDirectory>,
    store: Arc<dyn BaselineStore>,
    window_days: i64,
    rebuild_after_hours: i64,
    work_day_share: f64,
}

impl BaselineBuilder {
    /// Create a builder with the standard 30-day window and 24h rebuild
    /// interval.
    pub fn new(directory: Arc<dyn EmployeeDirectory>, store: Arc<dyn BaselineStore>) -> Self {
        Self {
            directory,
            store,
            window_days: 30,
            rebuild_after_hours: 24,
            work_day_share: 0.1,
        }
    }

    /// Current baseline, rebuilding when the stored one is older than the
    /// rebuild interval.
    pub async fn get_or_build(&self, employee_id: &str) -> Result<EmployeeBaseline> {
        if let Some(baseline) = self.store.current(employee_id).await? {
            let age = Utc::now() - baseline.updated_at;
            if age < Duration::hours(self.rebuild_after_hours) {
                return Ok(baseline);
            }
        }
        self.rebuild(employee_id).await
    }

    /// Rebuild from the action window and replace the stored baseline.
    pub async fn rebuild(&self, employee_id: &str) -> Result<EmployeeBaseline> {
        let since = Utc::now() - Duration::days(self.window_days);
        let actions = self.directory.actions_since(employee_id, since).await?;

        let baseline = build_baseline(employee_id, &actions, self.work_day_share);
        self.store.replace(baseline.clone()).await?;
        debug!(
            employee_id = %employee_id,
            actions = actions.len(),
            hours = ?(baseline.work_hour_start, baseline.work_hour_end),
            "employee baseline rebuilt"
        );
        Ok(baseline)
    }
}

/// Pure baseline aggregation over one action window.
fn build_baseline(
    employee_id: &str,
    actions: &[EmployeeActionRecord],
    work_day_share: f64,
) -> EmployeeBaseline {
    // Session starts: login actions when present, every action otherwise.
    let mut start_hours: Vec<u32> = actions
        .iter()
        .filter(|a| a.kind == EmployeeActionKind::Login)
        .map(|a| a.timestamp.hour())
        .collect();
    if start_hours.is_empty() {
        start_hours = actions.iter().map(|a| a.timestamp.hour()).collect();
    }
    start_hours.sort_unstable();

    let (work_hour_start, work_hour_end) = if start_hours.is_empty() {
        // No data: assume ordinary office hours until real activity shows.
        (9, 18)
    } else {
        (percentile(&start_hours, 0.1), percentile(&start_hours, 0.9))
    };

    let mut day_counts: HashMap<u32, usize> = HashMap::new();
    let mut active_days: HashSet<chrono::NaiveDate> = HashSet::new();
    let mut approvals = 0usize;
    let mut exports = 0usize;
    let mut sensitive = 0usize;
    let mut known_ips = HashSet::new();

    for action in actions {
        *day_counts
            .entry(action.timestamp.weekday().num_days_from_monday())
            .or_insert(0) += 1;
        active_days.insert(action.timestamp.date_naive());
        known_ips.insert(action.ip.clone());
        match action.kind {
            EmployeeActionKind::Approval => approvals += 1,
            EmployeeActionKind::Export => exports += 1,
            EmployeeActionKind::SensitiveAccess => sensitive += 1,
            _ => {}
        }
    }

    let total = actions.len() as f64;
    let mut work_days: Vec<u32> = day_counts
        .into_iter()
        .filter(|&(_, count)| total > 0.0 && count as f64 / total > work_day_share)
        .map(|(day, _)| day)
        .collect();
    work_days.sort_unstable();

    let days = active_days.len().max(1) as f64;

    EmployeeBaseline {
        employee_id: employee_id.to_string(),
        work_hour_start,
        work_hour_end,
        work_days,
        avg_daily_actions: total / days,
        avg_daily_approvals: approvals as f64 / days,
        avg_daily_exports: exports as f64 / days,
        avg_daily_sensitive: sensitive as f64 / days,
        known_ips,
        // Never populated: client assignment data does not exist yet, so
        // the unassigned-client check stays inert.
        assigned_client_ids: HashSet::new(),
        updated_at: Utc::now(),
    }
}

/// Nearest-rank percentile over a sorted slice.
fn percentile(sorted: &[u32], p: f64) -> u32 {
    let index = ((sorted.len() - 1) as f64 * p).round() as usize;
    sorted[index]
}
