//! The `Bag` entity and its identity/lifecycle rules (spec §3, §4.6).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum number of airport codes a bag's routing sequence may carry.
///
/// Guards against unbounded growth from malformed manifests; a real
/// itinerary never has more than a handful of legs.
pub const MAX_ROUTING_LEN: usize = 32;

/// A validated 10-decimal-digit IATA baggage tag.
///
/// `bag_tag` is immutable once a [`Bag`] is created (spec §3). The newtype
/// exists so that every boundary in the system — parsers, ingest, storage —
/// enforces the digit rule once, at construction, rather than re-checking a
/// bare `String` repeatedly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BagTag(String);

/// Errors produced when constructing a [`BagTag`] from untrusted input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BagTagError {
    /// The tag was not exactly 10 characters long.
    #[error("bag tag must be exactly 10 characters, got {0}")]
    WrongLength(usize),
    /// The tag contained a character that is not an ASCII decimal digit.
    #[error("bag tag must contain only decimal digits, got {0:?}")]
    NonDigit(String),
}

impl BagTag {
    /// Construct a `BagTag`, validating the 10-decimal-digit invariant.
    ///
    /// Per §9's Open Question, an airline-code-prefixed variant (e.g.
    /// `CM0000001234`) is rejected here rather than normalized; callers that
    /// need to parse such strings must strip the prefix explicitly before
    /// calling this constructor.
    pub fn new(raw: impl Into<String>) -> Result<Self, BagTagError> {
        let raw = raw.into();
        if raw.len() != 10 {
            return Err(BagTagError::WrongLength(raw.len()));
        }
        if !raw.bytes().all(|b| b.is_ascii_digit()) {
            return Err(BagTagError::NonDigit(raw));
        }
        Ok(Self(raw))
    }

    /// Borrow the tag as a plain string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BagTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for BagTag {
    type Error = BagTagError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<BagTag> for String {
    fn from(value: BagTag) -> Self {
        value.0
    }
}

/// A bag's position in the §4.6 state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BagStatus {
    /// First scan recorded at check-in.
    CheckedIn,
    /// Sorted and moving through the system.
    InTransit,
    /// Loaded onto an aircraft.
    Loaded,
    /// Arrived at destination.
    Arrived,
    /// Claimed by the passenger.
    Claimed,
    /// No scan observed for longer than the configured gap, with elevated risk.
    Delayed,
    /// A high-severity anomaly was recorded against the bag.
    Mishandled,
    /// Removed from an aircraft before departure.
    Offloaded,
    /// Soft-deleted terminal state; the bag is never hard-deleted.
    Archived,
}

impl fmt::Display for BagStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BagStatus::CheckedIn => "checked_in",
            BagStatus::InTransit => "in_transit",
            BagStatus::Loaded => "loaded",
            BagStatus::Arrived => "arrived",
            BagStatus::Claimed => "claimed",
            BagStatus::Delayed => "delayed",
            BagStatus::Mishandled => "mishandled",
            BagStatus::Offloaded => "offloaded",
            BagStatus::Archived => "archived",
        };
        f.write_str(s)
    }
}

/// Raised when a requested status transition is not in the §4.6 table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal transition from {from} via {via}")]
pub struct TransitionError {
    /// The bag's status before the rejected transition.
    pub from: BagStatus,
    /// A short label for the event/condition that was attempted.
    pub via: &'static str,
}

/// The authoritative record of a single piece of baggage.
///
/// `bag_tag` never changes after construction; `version` strictly increases
/// on every mutation so optimistic-concurrency callers can detect races.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bag {
    /// Immutable 10-digit identity.
    pub bag_tag: BagTag,
    /// Ordered sequence of airport codes on the bag's itinerary.
    pub routing: Vec<String>,
    /// Current position in the §4.6 state machine.
    pub status: BagStatus,
    /// Most recently observed scan location, if any.
    pub current_location: Option<String>,
    /// Latest `RiskAssessment.risk_score` for this bag, in `[0, 1]`.
    pub risk_score: f64,
    /// Opaque reference to the owning passenger record.
    pub passenger_ref: Option<String>,
    /// Booking reference (Passenger Name Record).
    pub pnr: Option<String>,
    /// Timestamp of the event that created this bag.
    pub created_at: DateTime<Utc>,
    /// Timestamp of the most recent mutation; monotone non-decreasing.
    pub updated_at: DateTime<Utc>,
    /// Strictly increasing per mutation; starts at 1.
    pub version: u64,
}

impl Bag {
    /// Construct a brand-new bag from its first observed scan.
    pub fn new(bag_tag: BagTag, location: Option<String>, at: DateTime<Utc>) -> Self {
        Self {
            bag_tag,
            routing: Vec::new(),
            status: BagStatus::CheckedIn,
            current_location: location,
            risk_score: 0.0,
            passenger_ref: None,
            pnr: None,
            created_at: at,
            updated_at: at,
            version: 1,
        }
    }

    /// Return the destination status for `event_kind`, or `None` if the
    /// requested event does not correspond to a plain forward transition
    /// (anomaly/delay handling is evaluated separately via
    /// [`Bag::apply_anomaly`]/[`Bag::apply_delay_timer`]).
    fn next_status(&self, event_kind: &str) -> Option<BagStatus> {
        use BagStatus::*;
        match (self.status, event_kind) {
            (CheckedIn, "sortation") => Some(InTransit),
            (InTransit, "load") => Some(Loaded),
            (Loaded, "arrival") => Some(Arrived),
            (Arrived, "claim") => Some(Claimed),
            (InTransit, "offload") | (Loaded, "offload") => Some(Offloaded),
            _ => None,
        }
    }

    /// Apply a forward-path scan event, enforcing the §4.6 transition table.
    ///
    /// `check_in` is only legal as the implicit creation transition and is
    /// rejected here since [`Bag::new`] already starts a bag in `CheckedIn`.
    pub fn apply_transition(
        &mut self,
        event_kind: &str,
        location: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        let to = self.next_status(event_kind).ok_or(TransitionError {
            from: self.status,
            via: leak_kind(event_kind),
        })?;
        self.status = to;
        if let Some(loc) = location {
            self.current_location = Some(loc);
        }
        self.touch(at);
        Ok(())
    }

    /// Apply a high-severity anomaly: legal from any non-terminal status.
    pub fn apply_anomaly(&mut self, at: DateTime<Utc>) -> Result<(), TransitionError> {
        if matches!(self.status, BagStatus::Archived) {
            return Err(TransitionError {
                from: self.status,
                via: "anomaly",
            });
        }
        self.status = BagStatus::Mishandled;
        self.touch(at);
        Ok(())
    }

    /// Apply the delay timer: no scan for over the configured gap while risk
    /// is high or critical. Legal from any status (including terminal ones
    /// is meaningless in practice but the transition table names "any").
    pub fn apply_delay_timer(&mut self, at: DateTime<Utc>) {
        self.status = BagStatus::Delayed;
        self.touch(at);
    }

    /// Soft-archive the bag. Never removes the row.
    pub fn archive(&mut self, at: DateTime<Utc>) {
        self.status = BagStatus::Archived;
        self.touch(at);
    }

    /// Record a freshly computed risk score, honoring the invariant that
    /// `Bag.risk_score` always equals the latest `RiskAssessment.risk_score`.
    pub fn apply_risk_score(&mut self, score: f64, at: DateTime<Utc>) {
        self.risk_score = score;
        self.touch(at);
    }

    /// Bump `version` and advance `updated_at` (monotonically) to `at`.
    pub fn touch(&mut self, at: DateTime<Utc>) {
        // updated_at is monotone: an out-of-order event must not regress it.
        if at > self.updated_at {
            self.updated_at = at;
        }
        self.version += 1;
    }
}

fn leak_kind(kind: &str) -> &'static str {
    match kind {
        "check_in" => "check_in",
        "sortation" => "sortation",
        "load" => "load",
        "arrival" => "arrival",
        "claim" => "claim",
        "transfer" => "transfer",
        "offload" => "offload",
        "anomaly" => "anomaly",
        "manual" => "manual",
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bag_tag_accepts_ten_digits() {
        assert!(BagTag::new("0000000001").is_ok());
    }

    #[test]
    fn bag_tag_rejects_wrong_length() {
        assert_eq!(BagTag::new("123456789"), Err(BagTagError::WrongLength(9)));
        assert_eq!(
            BagTag::new("12345678901"),
            Err(BagTagError::WrongLength(11))
        );
    }

    #[test]
    fn bag_tag_rejects_airline_prefixed_variant() {
        assert!(matches!(
            BagTag::new("CM00012345"),
            Err(BagTagError::NonDigit(_))
        ));
    }

    #[test]
    fn legal_forward_path_transitions() {
        let tag = BagTag::new("0000000001").unwrap();
        let t0 = Utc::now();
        let mut bag = Bag::new(tag, Some("PTY_CHECKIN_12".into()), t0);
        assert_eq!(bag.status, BagStatus::CheckedIn);
        assert_eq!(bag.version, 1);

        bag.apply_transition("sortation", None, t0).unwrap();
        assert_eq!(bag.status, BagStatus::InTransit);
        bag.apply_transition("load", None, t0).unwrap();
        assert_eq!(bag.status, BagStatus::Loaded);
        bag.apply_transition("arrival", None, t0).unwrap();
        assert_eq!(bag.status, BagStatus::Arrived);
        bag.apply_transition("claim", None, t0).unwrap();
        assert_eq!(bag.status, BagStatus::Claimed);
        assert_eq!(bag.version, 5);
    }

    #[test]
    fn illegal_transition_is_rejected() {
        let tag = BagTag::new("0000000001").unwrap();
        let t0 = Utc::now();
        let mut bag = Bag::new(tag, None, t0);
        bag.status = BagStatus::Claimed;
        let err = bag.apply_transition("load", None, t0).unwrap_err();
        assert_eq!(err.from, BagStatus::Claimed);
    }

    #[test]
    fn updated_at_does_not_regress_on_out_of_order_event() {
        let tag = BagTag::new("0000000001").unwrap();
        let t0 = Utc::now();
        let mut bag = Bag::new(tag, None, t0);
        let later = t0 + chrono::Duration::seconds(60);
        bag.apply_transition("sortation", None, later).unwrap();
        assert_eq!(bag.updated_at, later);

        // Out-of-order arrival with an earlier timestamp than the max
        // already committed: updated_at must not regress, but the event is
        // still recorded (version increases).
        let earlier = t0 - chrono::Duration::seconds(60);
        bag.apply_delay_timer(earlier);
        assert_eq!(bag.updated_at, later);
    }
}
