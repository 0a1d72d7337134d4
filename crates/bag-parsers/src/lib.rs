#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **bag-parsers** – Source-format adapters normalizing heterogeneous
//! baggage handling feeds into [`bag_types::CanonicalEvent`] (spec §4.1).
//!
//! Every parser in this crate is a pure function: no I/O, no shared state,
//! and round-trip safe on its own output. A parser either produces one or
//! more canonical events with a confidence in `[0, 1]`, or a structured
//! [`ParseFailure`] — never a panic, never a raised exception, so the
//! ingest layer can convert failures into precise 4xx reasons.

mod error;
mod json;
mod line;
mod type_b;
mod xml;

pub use error::ParseFailure;
pub use json::parse_json_scan;
pub use line::parse_line_scan;
pub use type_b::{parse_type_b_telegram, TypeBMessageType};
pub use xml::parse_baggage_xml;

use bag_types::CanonicalEvent;

/// One canonical event produced by a parser, together with the confidence
/// the parser has in the result (`1.0` for a fully-specified JSON record,
/// lower for looser formats).
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedEvent {
    /// The normalized event.
    pub event: CanonicalEvent,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
}

/// The common result shape every parser returns. A telegram or manifest may
/// expand into several canonical events (spec §4.1), so parsers always
/// return a vector rather than a single event.
pub type ParseResult = Result<Vec<ParsedEvent>, ParseFailure>;

/// Parse `scan_type` field values shared by the JSON and line parsers.
pub(crate) fn scan_type_from_str(s: &str) -> Option<bag_types::ScanType> {
    use bag_types::ScanType::*;
    Some(match s {
        "check_in" => CheckIn,
        "sortation" => Sortation,
        "load" => Load,
        "arrival" => Arrival,
        "transfer" => Transfer,
        "claim" => Claim,
        "manual" => Manual,
        "anomaly" => Anomaly,
        _ => return None,
    })
}
