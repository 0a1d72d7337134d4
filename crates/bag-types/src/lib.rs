#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **bag-types** – Shared primitive data structures for the baggage event
//! processing core.
//!
//! The crate is dependency-light and sits at the very bottom of the crate
//! graph so that *every* other crate can depend on it without causing
//! cycles. It intentionally makes no assumptions about I/O, storage, or
//! transport — those concerns live in `bag-parsers`, `bag-store-core` and
//! their implementations.

mod bag;
mod canonical_event;
mod courier;
mod exception;
mod notification;
mod pir;
mod risk;
mod scan_event;

pub use bag::{Bag, BagStatus, BagTag, BagTagError, TransitionError};
pub use canonical_event::{CanonicalEvent, EventPayload, EventType};
pub use courier::{CourierDispatch, CourierDispatchId, CourierDispatchStatus};
pub use exception::{
    CaseId, CasePriority, CaseStatus, ExceptionCase, ExceptionCaseError, TimelineEntry,
};
pub use notification::{Notification, NotificationChannel, NotificationId, NotificationStatus};
pub use pir::{Pir, PirError, PirStatus, PirType};
pub use risk::{RiskAssessment, RiskLevel};
pub use scan_event::{ScanEvent, ScanEventId, ScanType};
