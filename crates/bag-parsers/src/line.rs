//! Whitespace-delimited scan line parser (spec §4.1).
//!
//! Format: `bag_tag location timestamp?`. Timestamp defaults to ingest time
//! when absent. This is the loosest of the four formats, so its confidence
//! is the lowest.

use crate::{ParseFailure, ParseResult, ParsedEvent};
use bag_types::{BagTag, CanonicalEvent, EventPayload, ScanType};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Parse a single whitespace-delimited scan line.
pub fn parse_line_scan(bytes: &[u8], source_system: &str, now: DateTime<Utc>) -> ParseResult {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| ParseFailure::malformed("input is not valid UTF-8"))?
        .trim();

    if text.is_empty() {
        return Err(ParseFailure::missing("bag_tag"));
    }

    let mut fields = text.split_whitespace();

    let bag_tag_raw = fields.next().ok_or_else(|| ParseFailure::missing("bag_tag"))?;
    let bag_tag = BagTag::new(bag_tag_raw)
        .map_err(|_| ParseFailure::malformed(format!("{bag_tag_raw:?} is not a 10-digit bag tag")))?;

    let location = fields
        .next()
        .ok_or_else(|| ParseFailure::missing("location"))?
        .to_string();

    let timestamp = match fields.next() {
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|_| ParseFailure::malformed(format!("{raw:?} is not RFC3339")))?,
        None => now,
    };

    if fields.next().is_some() {
        return Err(ParseFailure::malformed("too many fields on scan line"));
    }

    let event = CanonicalEvent {
        event_id: Uuid::new_v4(),
        timestamp,
        bag_tag,
        location,
        payload: EventPayload::Scan {
            scan_type: ScanType::Manual,
        },
        source_system: source_system.to_string(),
        signal_strength: None,
        handler: None,
        enrichment: BTreeMap::new(),
        correlation_id: None,
    };

    Ok(vec![ParsedEvent {
        event,
        confidence: 0.7,
    }])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bag_tag_and_location_only() {
        let now = Utc::now();
        let result = parse_line_scan(b"0000000001 PTY_RAMP", "sortation_rig", now).unwrap();
        assert_eq!(result[0].event.location, "PTY_RAMP");
        assert_eq!(result[0].event.timestamp, now);
    }

    #[test]
    fn parses_explicit_timestamp() {
        let result =
            parse_line_scan(b"0000000001 PTY_RAMP 2025-01-01T00:00:00Z", "rig", Utc::now()).unwrap();
        assert_eq!(
            result[0].event.timestamp,
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .unwrap()
                .with_timezone(&Utc)
        );
    }

    #[test]
    fn rejects_missing_location() {
        let err = parse_line_scan(b"0000000001", "rig", Utc::now()).unwrap_err();
        assert!(matches!(err, ParseFailure::MissingField { .. }));
    }
}
