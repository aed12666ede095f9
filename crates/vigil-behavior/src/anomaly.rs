//! Live-event anomaly detection against a stored profile.
//!
//! Three independent checks: hour deviation, amount deviation, and
//! velocity. None suppresses another; a single event can trigger all
//! three.

use crate::types::{BehaviorAnomaly, BehaviorAnomalyKind, BehaviorProfile, LiveEvent};
use chrono::Timelike;

/// Confidence reported for hour deviations.
const HOUR_CONFIDENCE: f64 = 70.0;
/// Confidence reported for velocity spikes.
const VELOCITY_CONFIDENCE: f64 = 85.0;

/// Compare one live event against the stored profile.
///
/// Returns every triggered anomaly; an empty vector means the event looks
/// like the user's usual behavior. A profile without enough history for a
/// given check simply skips that check.
#[must_use]
pub fn detect_anomalies(profile: &BehaviorProfile, event: &LiveEvent) -> Vec<BehaviorAnomaly> {
    let mut anomalies = Vec::new();

    if let Some(anomaly) = check_hour(profile, event) {
        anomalies.push(anomaly);
    }
    if let Some(anomaly) = check_amount(profile, event) {
        anomalies.push(anomaly);
    }
    if let Some(anomaly) = check_velocity(profile, event) {
        anomalies.push(anomaly);
    }

    anomalies
}

/// Hour deviation: event hour more than two hours outside every preferred
/// hour (circular distance).
fn check_hour(profile: &BehaviorProfile, event: &LiveEvent) -> Option<BehaviorAnomaly> {
    let preferred = &profile.temporal.preferred_hours;
    if preferred.is_empty() {
        return None;
    }

    let hour = event.timestamp.hour();
    let min_distance = preferred
        .iter()
        .map(|&p| {
            let d = (i64::from(hour) - i64::from(p)).unsigned_abs() as u32;
            d.min(24 - d)
        })
        .min()
        .unwrap_or(0);

    if min_distance > 2 {
        Some(BehaviorAnomaly {
            kind: BehaviorAnomalyKind::HourDeviation,
            description: format!(
                "activity at {hour:02}:00, {min_distance}h from the usual hours"
            ),
            confidence: HOUR_CONFIDENCE,
        })
    } else {
        None
    }
}

/// Amount deviation: amount above 200% of the profile average. Confidence
/// grows with the deviation, from 50 up to 95.
fn check_amount(profile: &BehaviorProfile, event: &LiveEvent) -> Option<BehaviorAnomaly> {
    let amount = event.amount?;
    let avg = profile.transactional.avg_amount;
    if avg <= 0.0 {
        return None;
    }

    let ratio = amount / avg;
    if ratio > 2.0 {
        let confidence = (50.0 + (ratio - 2.0) * 10.0).clamp(50.0, 95.0);
        Some(BehaviorAnomaly {
            kind: BehaviorAnomalyKind::AmountDeviation,
            description: format!(
                "amount {amount:.2} is {:.0}% of the {avg:.2} average",
                ratio * 100.0
            ),
            confidence,
        })
    } else {
        None
    }
}

/// Velocity: operations in the trailing hour above ten times the
/// profile-implied hourly rate.
fn check_velocity(profile: &BehaviorProfile, event: &LiveEvent) -> Option<BehaviorAnomaly> {
    let monthly = profile.transactional.avg_monthly_count;
    if monthly <= 0.0 {
        return None;
    }

    let implied_hourly = monthly / (30.0 * 24.0);
    let threshold = (implied_hourly * 10.0).max(1.0);
    if f64::from(event.ops_last_hour) > threshold {
        Some(BehaviorAnomaly {
            kind: BehaviorAnomalyKind::VelocitySpike,
            description: format!(
                "{} operations in the last hour vs a usual rate of {implied_hourly:.2}/h",
                event.ops_last_hour
            ),
            confidence: VELOCITY_CONFIDENCE,
        })
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        DeviceUsagePattern, RiskIndicators, TemporalPattern, TransactionPattern, UserSegment,
    };
    use chrono::{TimeZone, Utc};

    fn profile() -> BehaviorProfile {
        BehaviorProfile {
            user_id: "u-1".into(),
            temporal: TemporalPattern {
                preferred_hours: vec![9, 10, 11, 14, 15],
                active_days: vec![0, 1, 2, 3, 4],
                avg_session_minutes: 12.0,
            },
            transactional: TransactionPattern {
                avg_monthly_count: 72.0, // Implied rate 0.1/h.
                typical_kinds: vec![],
                frequent_recipients: vec!["r-1".into()],
                mean_gap_hours: 10.0,
                avg_amount: 500.0,
            },
            device: DeviceUsagePattern::default(),
            risk_indicators: RiskIndicators::default(),
            segment: UserSegment::Regular,
            version: 3,
            data_points: 200,
            updated_at: Utc::now(),
        }
    }

    fn event_at(hour: u32, amount: Option<f64>, ops_last_hour: u32) -> LiveEvent {
        LiveEvent {
            timestamp: Utc.with_ymd_and_hms(2026, 8, 3, hour, 30, 0).unwrap(),
            amount,
            kind: None,
            ops_last_hour,
        }
    }

    #[test]
    fn test_usual_event_is_clean() {
        let anomalies = detect_anomalies(&profile(), &event_at(10, Some(400.0), 1));
        assert!(anomalies.is_empty());
    }

    #[test]
    fn test_hour_deviation_outside_range() {
        let anomalies = detect_anomalies(&profile(), &event_at(3, None, 0));
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].kind, BehaviorAnomalyKind::HourDeviation);
        assert_eq!(anomalies[0].confidence, 70.0);
    }

    #[test]
    fn test_hour_within_two_hours_is_tolerated() {
        // 13:00 is 1h from 14:00.
        let anomalies = detect_anomalies(&profile(), &event_at(13, None, 0));
        assert!(anomalies.is_empty());
    }

    #[test]
    fn test_amount_deviation_confidence_scales() {
        let mild = detect_anomalies(&profile(), &event_at(10, Some(1_100.0), 0));
        assert_eq!(mild.len(), 1);
        assert_eq!(mild[0].kind, BehaviorAnomalyKind::AmountDeviation);
        assert!(mild[0].confidence < 60.0);

        let wild = detect_anomalies(&profile(), &event_at(10, Some(50_000.0), 0));
        assert_eq!(wild[0].confidence, 95.0);
    }

    #[test]
    fn test_exactly_double_average_is_tolerated() {
        let anomalies = detect_anomalies(&profile(), &event_at(10, Some(1_000.0), 0));
        assert!(anomalies.is_empty());
    }

    #[test]
    fn test_velocity_spike() {
        // Implied 0.1/h, threshold max(1, 1.0) = 1; two ops trigger.
        let anomalies = detect_anomalies(&profile(), &event_at(10, None, 2));
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].kind, BehaviorAnomalyKind::VelocitySpike);
        assert_eq!(anomalies[0].confidence, 85.0);
    }

    #[test]
    fn test_checks_are_independent() {
        // Off-hours, huge amount, and rapid fire at once: all three report.
        let anomalies = detect_anomalies(&profile(), &event_at(3, Some(10_000.0), 5));
        assert_eq!(anomalies.len(), 3);
    }

    #[test]
    fn test_empty_profile_skips_checks() {
        let mut empty = profile();
        empty.temporal.preferred_hours.clear();
        empty.transactional.avg_amount = 0.0;
        empty.transactional.avg_monthly_count = 0.0;

        let anomalies = detect_anomalies(&empty, &event_at(3, Some(10_000.0), 50));
        assert!(anomalies.is_empty());
    }
}
