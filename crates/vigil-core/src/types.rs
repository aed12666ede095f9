//! Shared domain types used across the decision-engine crates.

use serde::{Deserialize, Serialize};

// ============================================================================
// Actors
// ============================================================================

/// Identity performing a mutating operation, recorded for audit attribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// Actor identifier (user id, employee id, or subsystem name).
    pub id: String,
    /// Actor kind.
    pub kind: ActorKind,
}

/// Kind of actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorKind {
    /// An end user.
    User,
    /// An employee (back-office operator or reviewer).
    Employee,
    /// The engine itself or another internal subsystem.
    System,
}

impl Actor {
    /// Actor for an end user.
    #[must_use]
    pub fn user(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: ActorKind::User,
        }
    }

    /// Actor for an employee.
    #[must_use]
    pub fn employee(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: ActorKind::Employee,
        }
    }

    /// Actor for an automated subsystem.
    #[must_use]
    pub fn system(name: impl Into<String>) -> Self {
        Self {
            id: name.into(),
            kind: ActorKind::System,
        }
    }
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.kind {
            ActorKind::User => "user",
            ActorKind::Employee => "employee",
            ActorKind::System => "system",
        };
        write!(f, "{}:{}", kind, self.id)
    }
}

// ============================================================================
// Risk factors
// ============================================================================

/// A named, signed contribution to a risk or fraud score.
///
/// Factors are the audit trail of a scoring decision: every evaluator that
/// fires appends one, and the final record carries the full list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFactor {
    /// Stable factor name (snake_case).
    pub name: String,
    /// Signed score impact. Positive raises risk, negative lowers it.
    pub impact: f64,
    /// Human-readable detail for reviewers.
    pub detail: String,
}

impl RiskFactor {
    /// Create a new risk factor.
    #[must_use]
    pub fn new(name: impl Into<String>, impact: f64, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            impact,
            detail: detail.into(),
        }
    }
}

// ============================================================================
// Denial codes
// ============================================================================

/// Machine-readable reason codes attached to every policy denial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialCode {
    /// Global kill switch is active.
    GlobalKill,
    /// Platform is in maintenance mode.
    Maintenance,
    /// The product is disabled.
    ProductDisabled,
    /// The region is disabled.
    RegionDisabled,
    /// The transaction type is disabled.
    TransactionTypeDisabled,
    /// The user's segment is disabled.
    SegmentDisabled,
    /// The device is blocked or untrustworthy.
    DeviceBlocked,
    /// Fraud evaluation blocked the operation.
    FraudBlocked,
    /// Risk assessment blocked the operation.
    RiskBlocked,
}

impl std::fmt::Display for DenialCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::GlobalKill => "global_kill",
            Self::Maintenance => "maintenance",
            Self::ProductDisabled => "product_disabled",
            Self::RegionDisabled => "region_disabled",
            Self::TransactionTypeDisabled => "transaction_type_disabled",
            Self::SegmentDisabled => "segment_disabled",
            Self::DeviceBlocked => "device_blocked",
            Self::FraudBlocked => "fraud_blocked",
            Self::RiskBlocked => "risk_blocked",
        };
        write!(f, "{s}")
    }
}

/// Outcome of a policy gate (kill switch, device check). A denial is a
/// value carrying a machine reason code and message, not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDecision {
    /// True when the operation may proceed.
    pub allowed: bool,
    /// Denial code when not allowed.
    pub reason_code: Option<DenialCode>,
    /// Human-readable explanation when not allowed.
    pub message: Option<String>,
}

impl PolicyDecision {
    /// An allow decision.
    #[must_use]
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason_code: None,
            message: None,
        }
    }

    /// A deny decision.
    #[must_use]
    pub fn deny(code: DenialCode, message: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason_code: Some(code),
            message: Some(message.into()),
        }
    }
}

// ============================================================================
// Geography and platform
// ============================================================================

/// A point on the globe, used for impossible-travel checks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lon: f64,
}

impl GeoPoint {
    /// Create a new point.
    #[must_use]
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Great-circle distance to another point in kilometres (haversine).
    #[must_use]
    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        const EARTH_RADIUS_KM: f64 = 6371.0;

        let d_lat = (other.lat - self.lat).to_radians();
        let d_lon = (other.lon - self.lon).to_radians();
        let lat1 = self.lat.to_radians();
        let lat2 = other.lat.to_radians();

        let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().asin();
        EARTH_RADIUS_KM * c
    }
}

/// Client platform a session or device runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// iOS app.
    Ios,
    /// Android app.
    Android,
    /// Web browser.
    Web,
    /// Direct API access.
    Api,
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ios => write!(f, "ios"),
            Self::Android => write!(f, "android"),
            Self::Web => write!(f, "web"),
            Self::Api => write!(f, "api"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_actor_display() {
        assert_eq!(Actor::user("u-1").to_string(), "user:u-1");
        assert_eq!(Actor::employee("e-9").to_string(), "employee:e-9");
        assert_eq!(Actor::system("kill-switch").to_string(), "system:kill-switch");
    }

    #[test]
    fn test_haversine_known_distance() {
        // Lisbon to Madrid is roughly 500 km.
        let lisbon = GeoPoint::new(38.7223, -9.1393);
        let madrid = GeoPoint::new(40.4168, -3.7038);
        let d = lisbon.distance_km(&madrid);
        assert!((400.0..600.0).contains(&d), "distance was {d}");
    }

    #[test]
    fn test_haversine_zero_distance() {
        let p = GeoPoint::new(10.0, 20.0);
        assert!(p.distance_km(&p) < 1e-9);
    }

    #[test]
    fn test_denial_code_display() {
        assert_eq!(DenialCode::GlobalKill.to_string(), "global_kill");
        assert_eq!(DenialCode::ProductDisabled.to_string(), "product_disabled");
    }
}
