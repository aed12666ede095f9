//! # Vigil Employee
//!
//! Employee anomaly detection. Maintains a 30-day rolling per-employee
//! baseline (work hours, work days, daily activity averages, known IPs)
//! and runs eight independent checks against every back-office action,
//! each optionally emitting one anomaly.
//!
//! Responses are graded by severity: critical anomalies terminate the
//! active session and notify the supervisor and admins, high anomalies
//! flag the employee for mandatory dual approval, medium and low only
//! alert. Anomaly status moves through an explicit reviewer-driven state
//! machine.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod baseline;
pub mod detector;
pub mod types;

pub use baseline::BaselineBuilder;
pub use detector::{EmployeeAnomalyDetector, EmployeeConfig};
pub use types::{
    AnomalySeverity, AnomalyStatus, EmployeeActionContext, EmployeeAnomaly, EmployeeAnomalyType,
    EmployeeBaseline,
};
