//! The Property Irregularity Report entity (spec §3).

use crate::BagTag;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// PIR subtype per the GLOSSARY.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PirType {
    /// On-hand: bag is physically present but unmatched.
    Ohd,
    /// Forward: bag must be forwarded to the passenger.
    Fir,
    /// Advisory.
    Ahl,
    /// Generic property irregularity.
    Pir,
}

/// PIR lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PirStatus {
    /// Filed and awaiting recovery.
    Open,
    /// Bag recovered and reunited with passenger.
    Closed,
}

/// Raised when attempting to open a second PIR for a bag that already has
/// one open (spec §3: "exactly one open PIR per bag_tag at a time").
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("bag {0} already has an open PIR")]
pub struct PirError(pub &'static str);

/// A Property Irregularity Report filed against a mishandled bag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pir {
    /// PIR identity, typically allocated by the external `PIRService`.
    pub pir_number: String,
    /// The bag this report concerns.
    pub bag_tag: BagTag,
    /// Subtype.
    pub pir_type: PirType,
    /// Lifecycle status.
    pub status: PirStatus,
    /// When the report was filed.
    pub filed_at: DateTime<Utc>,
    /// Last known physical location of the bag.
    pub last_known_location: Option<String>,
    /// Free-text description supplied at filing time.
    pub description: String,
}
