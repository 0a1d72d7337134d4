//! The `ScanEvent` entity (spec §3).

use crate::BagTag;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a committed [`ScanEvent`].
pub type ScanEventId = Uuid;

/// The kind of physical/logical scan that produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanType {
    /// First scan of a bag's journey.
    CheckIn,
    /// Sortation system scan.
    Sortation,
    /// Loaded onto an aircraft.
    Load,
    /// Arrived at a station.
    Arrival,
    /// Transferred between flights.
    Transfer,
    /// Claimed by the passenger.
    Claim,
    /// Manually entered by an operator.
    Manual,
    /// A high-severity anomaly observation.
    Anomaly,
}

impl ScanType {
    /// The event-kind label used by [`crate::Bag::apply_transition`].
    pub fn transition_label(self) -> &'static str {
        match self {
            ScanType::CheckIn => "check_in",
            ScanType::Sortation => "sortation",
            ScanType::Load => "load",
            ScanType::Arrival => "arrival",
            ScanType::Transfer => "transfer",
            ScanType::Claim => "claim",
            ScanType::Manual => "manual",
            ScanType::Anomaly => "anomaly",
        }
    }
}

/// A single immutable scan observation against exactly one [`Bag`](crate::Bag).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanEvent {
    /// Immutable event identity; re-applying the same id must be a no-op.
    pub event_id: ScanEventId,
    /// The bag this scan belongs to.
    pub bag_tag: BagTag,
    /// What kind of scan this was.
    pub scan_type: ScanType,
    /// Where the scan occurred.
    pub location: String,
    /// UTC timestamp of the scan.
    pub timestamp: DateTime<Utc>,
    /// Opaque original payload bytes, retained for audit/replay.
    pub raw_payload: Vec<u8>,
}

impl ScanEvent {
    /// Construct a new scan event with a freshly generated identity.
    pub fn new(
        bag_tag: BagTag,
        scan_type: ScanType,
        location: String,
        timestamp: DateTime<Utc>,
        raw_payload: Vec<u8>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            bag_tag,
            scan_type,
            location,
            timestamp,
            raw_payload,
        }
    }
}
