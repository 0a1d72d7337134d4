//! BaggageXML manifest parser (spec §4.1).
//!
//! Expected shape:
//! ```xml
//! <BaggageManifest flight_number="CM456">
//!   <Bag tag="0000000001" location="PTY_RAMP"/>
//!   <Bag tag="0000000002" location="PTY_RAMP"/>
//! </BaggageManifest>
//! ```
//! Each `<Bag>` entry becomes one canonical event with
//! `event_type=manifest_load`, all sharing a correlation id for the
//! manifest.

use crate::{ParseFailure, ParseResult, ParsedEvent};
use bag_types::{BagTag, CanonicalEvent, EventPayload};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
struct BagEntry {
    #[serde(rename = "@tag")]
    tag: String,
    #[serde(rename = "@location")]
    location: String,
}

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(rename = "@flight_number")]
    flight_number: String,
    #[serde(rename = "Bag", default)]
    bags: Vec<BagEntry>,
}

/// Parse a BaggageXML manifest document.
pub fn parse_baggage_xml(xml_content: &str, declared_flight_number: &str, now: DateTime<Utc>) -> ParseResult {
    let manifest: Manifest = quick_xml::de::from_str(xml_content)
        .map_err(|e| ParseFailure::malformed(format!("invalid BaggageXML: {e}")))?;

    if manifest.flight_number != declared_flight_number {
        return Err(ParseFailure::malformed(
            "manifest flight_number does not match declared flight_number",
        ));
    }

    if manifest.bags.is_empty() {
        return Err(ParseFailure::missing("Bag"));
    }

    let correlation_id = Uuid::new_v4();

    manifest
        .bags
        .into_iter()
        .map(|entry| {
            let bag_tag = BagTag::new(entry.tag.clone()).map_err(|_| {
                ParseFailure::malformed(format!("{:?} is not a 10-digit bag tag", entry.tag))
            })?;
            Ok(ParsedEvent {
                event: CanonicalEvent {
                    event_id: Uuid::new_v4(),
                    timestamp: now,
                    bag_tag,
                    location: entry.location,
                    payload: EventPayload::ManifestLoad {
                        flight_number: manifest.flight_number.clone(),
                    },
                    source_system: "baggage_xml".to_string(),
                    signal_strength: None,
                    handler: None,
                    enrichment: BTreeMap::new(),
                    correlation_id: Some(correlation_id),
                },
                confidence: 1.0,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"<BaggageManifest flight_number="CM456">
        <Bag tag="0000000001" location="PTY_RAMP"/>
        <Bag tag="0000000002" location="PTY_RAMP"/>
    </BaggageManifest>"#;

    #[test]
    fn parses_manifest_with_multiple_bags() {
        let now = Utc::now();
        let events = parse_baggage_xml(MANIFEST, "CM456", now).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0].event.correlation_id,
            events[1].event.correlation_id
        );
        assert!(matches!(
            events[0].event.payload,
            EventPayload::ManifestLoad { .. }
        ));
        assert_eq!(events[0].event.timestamp, now);
    }

    #[test]
    fn rejects_flight_number_mismatch() {
        let err = parse_baggage_xml(MANIFEST, "CM999", Utc::now()).unwrap_err();
        assert!(matches!(err, ParseFailure::Malformed { .. }));
    }

    #[test]
    fn rejects_empty_manifest() {
        let empty = r#"<BaggageManifest flight_number="CM456"></BaggageManifest>"#;
        let err = parse_baggage_xml(empty, "CM456", Utc::now()).unwrap_err();
        assert!(matches!(err, ParseFailure::MissingField { .. }));
    }
}
