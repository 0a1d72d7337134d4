//! JSON scan parser (spec §4.1 "JSON scan").
//!
//! Mirrors the `POST /events/scan` body shape from spec §6 directly:
//! deserializes to canonical fields, rejecting any `bag_id` that is not
//! exactly 10 digits.

use crate::{scan_type_from_str, ParseFailure, ParseResult, ParsedEvent};
use bag_types::{BagTag, CanonicalEvent, EventPayload};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
struct ScanWire {
    bag_id: String,
    location: String,
    scan_type: String,
    timestamp: Option<DateTime<Utc>>,
    #[allow(dead_code)]
    device_id: Option<String>,
    handler_id: Option<String>,
    signal_strength: Option<u8>,
}

/// Parse a single JSON scan record.
///
/// `source_system` is supplied by the caller (the ingest endpoint knows
/// which feed it is serving); `now` supplies the ingest timestamp used when
/// the wire payload omits one.
pub fn parse_json_scan(bytes: &[u8], source_system: &str, now: DateTime<Utc>) -> ParseResult {
    let wire: ScanWire = serde_json::from_slice(bytes)
        .map_err(|e| ParseFailure::malformed(format!("invalid JSON: {e}")))?;

    let bag_tag = BagTag::new(wire.bag_id.clone())
        .map_err(|_| ParseFailure::malformed(format!("bag_id {:?} is not 10 digits", wire.bag_id)))?;

    let scan_type = scan_type_from_str(&wire.scan_type)
        .ok_or_else(|| ParseFailure::malformed(format!("unknown scan_type {:?}", wire.scan_type)))?;

    if wire.location.trim().is_empty() {
        return Err(ParseFailure::missing("location"));
    }

    if let Some(strength) = wire.signal_strength {
        if strength > 100 {
            return Err(ParseFailure::malformed("signal_strength must be 0-100"));
        }
    }

    let event = CanonicalEvent {
        event_id: Uuid::new_v4(),
        timestamp: wire.timestamp.unwrap_or(now),
        bag_tag,
        location: wire.location,
        payload: EventPayload::Scan { scan_type },
        source_system: source_system.to_string(),
        signal_strength: wire.signal_strength,
        handler: wire.handler_id,
        enrichment: BTreeMap::new(),
        correlation_id: None,
    };

    Ok(vec![ParsedEvent {
        event,
        confidence: 1.0,
    }])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_happy_path_scan() {
        let body = br#"{"bag_id":"0000000001","location":"PTY_CHECKIN_12","scan_type":"check_in","timestamp":"2025-01-01T00:00:00Z"}"#;
        let result = parse_json_scan(body, "dcs", Utc::now()).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].event.bag_tag.as_str(), "0000000001");
        assert_eq!(result[0].confidence, 1.0);
    }

    #[test]
    fn rejects_wrong_length_bag_id() {
        let body = br#"{"bag_id":"12345","location":"X","scan_type":"check_in"}"#;
        let err = parse_json_scan(body, "dcs", Utc::now()).unwrap_err();
        assert!(matches!(err, ParseFailure::Malformed { .. }));
    }

    #[test]
    fn timestamp_defaults_to_ingest_time_when_absent() {
        let body = br#"{"bag_id":"0000000001","location":"X","scan_type":"check_in"}"#;
        let now = Utc::now();
        let result = parse_json_scan(body, "dcs", now).unwrap();
        assert_eq!(result[0].event.timestamp, now);
    }
}
