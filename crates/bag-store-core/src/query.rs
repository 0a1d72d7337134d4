//! Graph query surface result shapes (spec §4.5 "Query surface").

use bag_types::{Bag, ScanEvent};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A bag's full reconstructed journey: current snapshot plus every scan,
/// ordered non-decreasing by timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Journey {
    /// The bag's current relational snapshot.
    pub bag: Bag,
    /// Scans for this bag, sorted non-decreasing by timestamp.
    pub scans: Vec<ScanEvent>,
}

/// One row of `identify_bottlenecks` output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bottleneck {
    /// The location where bags are accumulating.
    pub location: String,
    /// Number of bags observed at this location within the window.
    pub bag_count: u64,
    /// Median time bags spent at this location before their next scan.
    pub median_dwell_seconds: f64,
}

/// Filter parameters for listing bags (mirrors `GET /bags` query params,
/// spec §6).
#[derive(Debug, Clone, Default)]
pub struct BagFilter {
    /// Restrict to bags in this status, if set.
    pub status: Option<bag_types::BagStatus>,
    /// Minimum risk score (inclusive), if set.
    pub risk_min: Option<f64>,
    /// Maximum risk score (inclusive), if set.
    pub risk_max: Option<f64>,
    /// Restrict to bags currently at this location, if set.
    pub location: Option<String>,
    /// Maximum number of rows to return.
    pub limit: Option<u32>,
    /// Number of rows to skip.
    pub offset: Option<u32>,
}

/// The result of `analyze_connection_risk` (spec §4.5).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionRisk {
    /// `max(bag.risk_score, freshly computed connection risk)`.
    pub total_risk: f64,
    /// Level derived from `total_risk`.
    pub level: bag_types::RiskLevel,
    /// Union of factors from the bag's stored risk and the connection
    /// evaluation.
    pub factors: std::collections::BTreeSet<String>,
}

/// The result of `get_current_location`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentLocation {
    /// Most recently observed location.
    pub location: String,
    /// When that location was last observed.
    pub last_seen_at: DateTime<Utc>,
}
