//! The canonical event model (spec §3, §9 "Patterns requiring
//! re-architecture" — a tagged union replacing the source's runtime
//! dictionaries).

use crate::{BagTag, ScanType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Severity of an [`EventPayload::Anomaly`] observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalySeverity {
    /// Informational; does not trigger mishandling.
    Low,
    /// Notable; does not trigger mishandling on its own.
    Medium,
    /// Triggers a transition to `mishandled` (spec §4.6).
    High,
    /// Triggers a transition to `mishandled` (spec §4.6).
    Critical,
}

impl AnomalySeverity {
    /// Whether this severity meets the `severity >= high` condition in the
    /// §4.6 transition table.
    pub fn triggers_mishandling(self) -> bool {
        self >= AnomalySeverity::High
    }
}

/// The type-specific payload of a [`CanonicalEvent`].
///
/// Exhaustive tagged union per spec §9: the source's dynamically-typed
/// dictionaries are replaced with a compile-time-checked enum so that a new
/// variant is a construction/match error, not a silent runtime gap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum EventPayload {
    /// A routine scan observation (check-in, sortation, arrival, ...).
    Scan {
        /// Which kind of scan this was.
        scan_type: ScanType,
    },
    /// Loaded onto an aircraft.
    Load {
        /// Flight the bag was loaded onto, if known.
        flight_number: Option<String>,
    },
    /// Transferred between flights at a connection.
    Transfer {
        /// Originating flight, if known.
        from_flight: Option<String>,
        /// Connecting flight, if known.
        to_flight: Option<String>,
    },
    /// Claimed by the passenger.
    Claim {},
    /// A high-severity anomaly observation.
    Anomaly {
        /// How severe the anomaly is.
        severity: AnomalySeverity,
        /// Free-text description of what was observed.
        description: String,
    },
    /// A per-bag entry extracted from a BaggageXML manifest (spec §4.1).
    ManifestLoad {
        /// The flight the manifest describes.
        flight_number: String,
    },
}

impl EventPayload {
    /// The wire-level `event_type` discriminant label.
    pub fn type_label(&self) -> &'static str {
        match self {
            EventPayload::Scan { scan_type } => scan_type.transition_label(),
            EventPayload::Load { .. } => "load",
            EventPayload::Transfer { .. } => "transfer",
            EventPayload::Claim {} => "claim",
            EventPayload::Anomaly { .. } => "anomaly",
            EventPayload::ManifestLoad { .. } => "manifest_load",
        }
    }

    /// The §4.6 transition label this payload drives, if any.
    ///
    /// Anomaly transitions are evaluated separately via severity, and
    /// `ManifestLoad` does not drive a state transition on its own (it
    /// creates a bag but the subsequent scan stream drives its status).
    pub fn transition_label(&self) -> Option<&'static str> {
        match self {
            EventPayload::Scan { scan_type } => Some(scan_type.transition_label()),
            EventPayload::Load { .. } => Some("load"),
            EventPayload::Transfer { .. } => Some("transfer"),
            EventPayload::Claim {} => Some("claim"),
            EventPayload::Anomaly { .. } => Some("anomaly"),
            EventPayload::ManifestLoad { .. } => None,
        }
    }
}

/// Wire-level discriminant matching [`EventPayload::type_label`], kept as a
/// distinct enum so callers (e.g. the ingest endpoints' dedup fingerprint)
/// can key on it without destructuring the full payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Routine scan.
    Scan,
    /// Aircraft load.
    Load,
    /// Flight transfer.
    Transfer,
    /// Passenger claim.
    Claim,
    /// Anomaly observation.
    Anomaly,
    /// Manifest-derived load.
    ManifestLoad,
}

impl From<&EventPayload> for EventType {
    fn from(payload: &EventPayload) -> Self {
        match payload {
            EventPayload::Scan { .. } => EventType::Scan,
            EventPayload::Load { .. } => EventType::Load,
            EventPayload::Transfer { .. } => EventType::Transfer,
            EventPayload::Claim {} => EventType::Claim,
            EventPayload::Anomaly { .. } => EventType::Anomaly,
            EventPayload::ManifestLoad { .. } => EventType::ManifestLoad,
        }
    }
}

/// The single normalized event shape every parser in `bag-parsers` produces
/// (spec §3 "Canonical event fields").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalEvent {
    /// Event identity; parsers generate this deterministically where the
    /// source format carries a natural key, or freshly otherwise.
    pub event_id: Uuid,
    /// When the event occurred (UTC).
    pub timestamp: DateTime<Utc>,
    /// The bag this event concerns.
    pub bag_tag: BagTag,
    /// Where the event occurred.
    pub location: String,
    /// Type-specific payload.
    pub payload: EventPayload,
    /// The upstream system that produced this event.
    pub source_system: String,
    /// Optional RFID/BLE signal strength, 0-100.
    pub signal_strength: Option<u8>,
    /// Operator/device identifier that recorded the event, if known.
    pub handler: Option<String>,
    /// Enrichment annotations added by the processing pipeline.
    ///
    /// Producers must never populate this map; only `bag-processor`'s
    /// enrichment stage does (spec §3).
    pub enrichment: BTreeMap<String, String>,
    /// Shared identifier for multi-bag telegrams/manifests that expand into
    /// several canonical events (spec §4.1).
    pub correlation_id: Option<Uuid>,
}

impl CanonicalEvent {
    /// The wire-level `event_type` discriminant.
    pub fn event_type(&self) -> EventType {
        EventType::from(&self.payload)
    }
}
