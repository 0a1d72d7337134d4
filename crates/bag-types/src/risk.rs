//! The `RiskAssessment` entity (spec §3, scored by `bag-risk` per §4.2).

use crate::BagTag;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Risk bands produced as a pure function of `risk_score` (spec §4.2).
///
/// Boundaries are half-open: `0.3` is `Medium`, `0.6` is `High`, `0.8` is
/// `Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    /// `score < 0.3`
    Low,
    /// `0.3 <= score < 0.6`
    Medium,
    /// `0.6 <= score < 0.8`
    High,
    /// `score >= 0.8`
    Critical,
}

/// An append-only, immutable risk snapshot for a bag.
///
/// Identity is the pair `(bag_tag, assessed_at)`. The most recent assessment
/// for a bag defines that bag's current `risk_score` (enforced by callers
/// via [`crate::Bag::apply_risk_score`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// The bag this assessment concerns.
    pub bag_tag: BagTag,
    /// When this assessment was computed.
    pub assessed_at: DateTime<Utc>,
    /// Score in `[0, 1]`.
    pub risk_score: f64,
    /// `risk_level` is always a pure function of `risk_score`.
    pub risk_level: RiskLevel,
    /// The clause labels that contributed to the score.
    pub factors: BTreeSet<String>,
    /// `1.0` with connection context, `0.7` otherwise.
    pub confidence: f64,
    /// Version of the scoring algorithm that produced this assessment.
    pub algorithm_version: u32,
}
