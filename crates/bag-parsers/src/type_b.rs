//! SITA Type B telegram parser (spec §4.1): BTM/BSM/BPM variants.
//!
//! Telegram shape: header lines (`FM`, `TO`), a route line
//! (`FLIGHT/DDMMM ORIG DEST`), and one or more passenger lines
//! (`.NAME BAGTAG PIECES/WEIGHT DEST`). A multi-bag telegram yields one
//! canonical event per passenger line, all sharing a correlation id.

use crate::{ParseFailure, ParseResult, ParsedEvent};
use bag_types::{BagTag, CanonicalEvent, EventPayload, ScanType};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Which SITA Type B message variant is being parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeBMessageType {
    /// Baggage Transfer Message.
    Btm,
    /// Baggage Source Message.
    Bsm,
    /// Baggage Processing Message.
    Bpm,
}

impl TypeBMessageType {
    fn scan_type(self) -> ScanType {
        match self {
            TypeBMessageType::Btm => ScanType::Transfer,
            TypeBMessageType::Bsm => ScanType::Sortation,
            TypeBMessageType::Bpm => ScanType::Load,
        }
    }
}

struct Route {
    #[allow(dead_code)]
    flight: String,
    #[allow(dead_code)]
    origin: String,
    destination: String,
}

fn parse_route_line(line: &str) -> Result<Route, ParseFailure> {
    // "CM456/15JAN PTY MIA"
    let mut parts = line.split_whitespace();
    let flight_date = parts
        .next()
        .ok_or_else(|| ParseFailure::malformed("route line missing flight/date"))?;
    let flight = flight_date
        .split('/')
        .next()
        .ok_or_else(|| ParseFailure::malformed("route line malformed flight field"))?
        .to_string();
    let origin = parts
        .next()
        .ok_or_else(|| ParseFailure::missing("route origin"))?
        .to_string();
    let destination = parts
        .next()
        .ok_or_else(|| ParseFailure::missing("route destination"))?
        .to_string();
    Ok(Route {
        flight,
        origin,
        destination,
    })
}

struct PassengerLine {
    bag_tag: BagTag,
}

fn parse_passenger_line(line: &str) -> Result<PassengerLine, ParseFailure> {
    // ".SMITH/JOHN 0000000001 2/23K MIA"
    let rest = line
        .strip_prefix('.')
        .ok_or_else(|| ParseFailure::malformed("passenger line must start with '.'"))?;
    let mut parts = rest.split_whitespace();
    let _name = parts
        .next()
        .ok_or_else(|| ParseFailure::missing("passenger name"))?;
    let bag_tag_raw = parts
        .next()
        .ok_or_else(|| ParseFailure::missing("bag tag"))?;
    let bag_tag = BagTag::new(bag_tag_raw)
        .map_err(|_| ParseFailure::malformed(format!("{bag_tag_raw:?} is not a 10-digit bag tag")))?;
    Ok(PassengerLine { bag_tag })
}

/// Parse a full SITA Type B telegram, possibly describing several bags.
pub fn parse_type_b_telegram(
    bytes: &[u8],
    message_type: TypeBMessageType,
    from_station: &str,
    to_station: &str,
    now: DateTime<Utc>,
) -> ParseResult {
    let text =
        std::str::from_utf8(bytes).map_err(|_| ParseFailure::malformed("telegram is not valid UTF-8"))?;

    let mut saw_fm = false;
    let mut saw_to = false;
    let mut route: Option<Route> = None;
    let mut passengers = Vec::new();

    for raw_line in text.lines() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(station) = line.strip_prefix("FM") {
            if station.trim() != from_station {
                return Err(ParseFailure::malformed("FM station does not match declared from_station"));
            }
            saw_fm = true;
        } else if let Some(station) = line.strip_prefix("TO") {
            if station.trim() != to_station {
                return Err(ParseFailure::malformed("TO station does not match declared to_station"));
            }
            saw_to = true;
        } else if line.starts_with('.') {
            passengers.push(parse_passenger_line(line)?);
        } else if route.is_none() && line.contains('/') {
            route = Some(parse_route_line(line)?);
        }
    }

    if !saw_fm {
        return Err(ParseFailure::missing("FM header"));
    }
    if !saw_to {
        return Err(ParseFailure::missing("TO header"));
    }
    let route = route.ok_or_else(|| ParseFailure::missing("route line"))?;
    if passengers.is_empty() {
        return Err(ParseFailure::missing("passenger line"));
    }

    let correlation_id = Uuid::new_v4();
    let scan_type = message_type.scan_type();

    let events = passengers
        .into_iter()
        .map(|p| ParsedEvent {
            event: CanonicalEvent {
                event_id: Uuid::new_v4(),
                timestamp: now,
                bag_tag: p.bag_tag,
                location: route.destination.clone(),
                payload: EventPayload::Scan { scan_type },
                source_system: format!("sita_type_b:{}", flight_label(message_type)),
                signal_strength: None,
                handler: None,
                enrichment: BTreeMap::new(),
                correlation_id: Some(correlation_id),
            },
            confidence: 0.9,
        })
        .collect();

    Ok(events)
}

fn flight_label(mt: TypeBMessageType) -> &'static str {
    match mt {
        TypeBMessageType::Btm => "btm",
        TypeBMessageType::Bsm => "bsm",
        TypeBMessageType::Bpm => "bpm",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TELEGRAM: &str = "FM PTY\nTO MIA\nCM456/15JAN PTY MIA\n.SMITH/JOHN 0000000001 2/23K MIA\n.DOE/JANE 0000000002 1/18K MIA\n";

    #[test]
    fn parses_multi_bag_telegram_with_shared_correlation() {
        let now = Utc::now();
        let events = parse_type_b_telegram(TELEGRAM.as_bytes(), TypeBMessageType::Bsm, "PTY", "MIA", now)
            .unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0].event.correlation_id,
            events[1].event.correlation_id
        );
        assert_eq!(events[0].event.bag_tag.as_str(), "0000000001");
        assert_eq!(events[1].event.bag_tag.as_str(), "0000000002");
        assert_eq!(events[0].event.timestamp, now);
    }

    #[test]
    fn rejects_missing_header() {
        let bad = "TO MIA\nCM456/15JAN PTY MIA\n.SMITH/JOHN 0000000001 2/23K MIA\n";
        let err =
            parse_type_b_telegram(bad.as_bytes(), TypeBMessageType::Btm, "PTY", "MIA", Utc::now()).unwrap_err();
        assert!(matches!(err, ParseFailure::MissingField { .. }));
    }

    #[test]
    fn rejects_bad_bag_tag_in_passenger_line() {
        let bad = "FM PTY\nTO MIA\nCM456/15JAN PTY MIA\n.SMITH/JOHN BADTAG 2/23K MIA\n";
        let err =
            parse_type_b_telegram(bad.as_bytes(), TypeBMessageType::Bpm, "PTY", "MIA", Utc::now()).unwrap_err();
        assert!(matches!(err, ParseFailure::Malformed { .. }));
    }
}
