#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **bag-risk** – The deterministic, multi-factor risk-scoring function
//! (spec §4.2).
//!
//! This crate has no I/O dependencies: `score` is a total, pure function of
//! its input, matching the "no assumptions about I/O" posture the rest of
//! this workspace's bottom-layer crates share. A change to the algorithm
//! requires bumping [`ALGORITHM_VERSION`], which is persisted on every
//! [`bag_types::RiskAssessment`].

use bag_types::{BagStatus, BagTag, RiskAssessment, RiskLevel};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

/// Current version of the scoring algorithm below. Bump whenever the
/// algorithm's behavior changes, never when only this crate's internals are
/// refactored without changing outputs.
pub const ALGORITHM_VERSION: u32 = 1;

/// Inputs to the risk-scoring function.
#[derive(Debug, Clone, Copy)]
pub struct RiskInput<'a> {
    /// The bag's current status.
    pub status: BagStatus,
    /// The bag's current location, if known.
    pub current_location: Option<&'a str>,
    /// Minutes until the next connecting segment departs, if this bag is
    /// being evaluated in a connection context.
    pub connection_minutes: Option<u32>,
}

/// The result of scoring a [`RiskInput`], before it is wrapped into a
/// persisted [`RiskAssessment`].
#[derive(Debug, Clone, PartialEq)]
pub struct RiskScore {
    /// Score in `[0, 1]`.
    pub score: f64,
    /// Pure function of `score` (see [`level_for_score`]).
    pub level: RiskLevel,
    /// Clause labels that contributed to `score`.
    pub factors: BTreeSet<String>,
    /// `1.0` with connection context, `0.7` otherwise.
    pub confidence: f64,
}

/// Map a score to its [`RiskLevel`] band. Boundaries are half-open:
/// `0.3` is `Medium`, `0.6` is `High`, `0.8` is `Critical`.
pub fn level_for_score(score: f64) -> RiskLevel {
    if score < 0.3 {
        RiskLevel::Low
    } else if score < 0.6 {
        RiskLevel::Medium
    } else if score < 0.8 {
        RiskLevel::High
    } else {
        RiskLevel::Critical
    }
}

fn status_is_elevated(status: BagStatus) -> bool {
    matches!(
        status,
        BagStatus::Mishandled | BagStatus::Delayed | BagStatus::Offloaded
    )
}

/// Score a bag per the spec §4.2 algorithm.
pub fn score(input: RiskInput<'_>) -> RiskScore {
    let mut base = 0.0_f64;
    let mut factors = BTreeSet::new();

    if status_is_elevated(input.status) {
        base += 0.4;
        factors.insert("elevated_status".to_string());
    }

    let in_sortation = input
        .current_location
        .map(|loc| loc.to_lowercase().contains("sortation"))
        .unwrap_or(false);
    if !in_sortation && input.status != BagStatus::Loaded {
        base += 0.2;
        factors.insert("not_in_sortation_nor_loaded".to_string());
    }

    let confidence = if let Some(minutes) = input.connection_minutes {
        if minutes < 30 {
            base += 0.5;
            factors.insert("connection<30min".to_string());
        } else if minutes < 45 {
            base += 0.3;
            factors.insert("connection<45min".to_string());
        } else if minutes < 60 {
            base += 0.1;
            factors.insert("connection<60min".to_string());
        }
        1.0
    } else {
        0.7
    };

    let clamped = base.min(1.0);
    RiskScore {
        score: clamped,
        level: level_for_score(clamped),
        factors,
        confidence,
    }
}

/// Score `input` and wrap the result into a persistable [`RiskAssessment`]
/// for `bag_tag`, stamped with the current [`ALGORITHM_VERSION`].
pub fn assess(bag_tag: BagTag, input: RiskInput<'_>, assessed_at: DateTime<Utc>) -> RiskAssessment {
    let result = score(input);
    RiskAssessment {
        bag_tag,
        assessed_at,
        risk_score: result.score,
        risk_level: result.level,
        factors: result.factors,
        confidence: result.confidence,
        algorithm_version: ALGORITHM_VERSION,
    }
}

/// Combine a bag's own `risk_score` with a freshly computed connection risk,
/// per §4.5's `analyze_connection_risk`: `max(bag.risk_score, connection
/// risk)`. The §9 Open Question about precedence is resolved in favor of
/// the literal §4.5 text.
pub fn combine_with_connection_risk(bag_risk_score: f64, connection_score: f64) -> f64 {
    bag_risk_score.max(connection_score)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tight_connection_scenario() {
        // Scenario 3: in_transit bag at a non-sortation gate, 25 minutes to
        // connect.
        let input = RiskInput {
            status: BagStatus::InTransit,
            current_location: Some("PTY_GATE_A12"),
            connection_minutes: Some(25),
        };
        let result = score(input);
        assert!(result.score >= 0.7);
        assert_eq!(result.level, RiskLevel::High);
        assert!(result.factors.contains("connection<30min"));
        assert!(result.factors.contains("not_in_sortation_nor_loaded"));
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn happy_path_scenario_is_low_risk() {
        let input = RiskInput {
            status: BagStatus::CheckedIn,
            current_location: Some("PTY_CHECKIN_12"),
            connection_minutes: None,
        };
        let result = score(input);
        assert_eq!(result.level, RiskLevel::Low);
        assert_eq!(result.confidence, 0.7);
    }

    #[test]
    fn loaded_status_exempts_the_location_clause() {
        let input = RiskInput {
            status: BagStatus::Loaded,
            current_location: Some("RAMP_3"),
            connection_minutes: None,
        };
        let result = score(input);
        assert!(!result.factors.contains("not_in_sortation_nor_loaded"));
    }

    #[test]
    fn sortation_location_exempts_the_location_clause() {
        let input = RiskInput {
            status: BagStatus::InTransit,
            current_location: Some("PTY_SORTATION_B"),
            connection_minutes: None,
        };
        let result = score(input);
        assert!(!result.factors.contains("not_in_sortation_nor_loaded"));
    }

    #[test]
    fn risk_level_boundaries_are_half_open() {
        assert_eq!(level_for_score(0.29999), RiskLevel::Low);
        assert_eq!(level_for_score(0.3), RiskLevel::Medium);
        assert_eq!(level_for_score(0.59999), RiskLevel::Medium);
        assert_eq!(level_for_score(0.6), RiskLevel::High);
        assert_eq!(level_for_score(0.79999), RiskLevel::High);
        assert_eq!(level_for_score(0.8), RiskLevel::Critical);
    }

    #[test]
    fn connection_minute_boundaries_select_lower_risk_branch() {
        let base = RiskInput {
            status: BagStatus::CheckedIn,
            current_location: Some("SORTATION"),
            connection_minutes: Some(30),
        };
        let at_30 = score(base);
        assert!(at_30.factors.contains("connection<45min"));
        assert!(!at_30.factors.contains("connection<30min"));

        let at_45 = score(RiskInput {
            connection_minutes: Some(45),
            ..base
        });
        assert!(at_45.factors.contains("connection<60min"));
        assert!(!at_45.factors.contains("connection<45min"));

        let at_60 = score(RiskInput {
            connection_minutes: Some(60),
            ..base
        });
        assert!(at_60.factors.is_empty());
    }

    #[test]
    fn score_never_exceeds_one() {
        let input = RiskInput {
            status: BagStatus::Mishandled,
            current_location: Some("UNKNOWN"),
            connection_minutes: Some(10),
        };
        let result = score(input);
        assert!(result.score <= 1.0);
        assert_eq!(result.level, RiskLevel::Critical);
    }

    #[test]
    fn connection_risk_precedence_is_max() {
        assert_eq!(combine_with_connection_risk(0.9, 0.2), 0.9);
        assert_eq!(combine_with_connection_risk(0.1, 0.8), 0.8);
    }

    proptest::proptest! {
        #[test]
        fn score_is_always_in_unit_interval(
            status_idx in 0u8..9,
            has_location in proptest::bool::ANY,
            connection_minutes in proptest::option::of(0u32..120),
        ) {
            let status = match status_idx {
                0 => BagStatus::CheckedIn,
                1 => BagStatus::InTransit,
                2 => BagStatus::Loaded,
                3 => BagStatus::Arrived,
                4 => BagStatus::Claimed,
                5 => BagStatus::Delayed,
                6 => BagStatus::Mishandled,
                7 => BagStatus::Offloaded,
                _ => BagStatus::Archived,
            };
            let location = if has_location { Some("RAMP_1") } else { None };
            let input = RiskInput { status, current_location: location, connection_minutes };
            let result = score(input);
            prop_assert!(result.score >= 0.0 && result.score <= 1.0);
        }
    }
}
