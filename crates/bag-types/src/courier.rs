//! The `CourierDispatch` entity (spec §3, §4.6).

use crate::BagTag;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a [`CourierDispatch`].
pub type CourierDispatchId = Uuid;

/// Dispatch lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CourierDispatchStatus {
    /// Requested, below the auto-dispatch threshold; will be auto-approved.
    Requested,
    /// Above the approval threshold; suspended until a decision event.
    PendingApproval,
    /// Approved (auto or by an `ApprovalGranted` event) and booked.
    Booked,
    /// Courier delivered the bag.
    Delivered,
    /// Dispatch was denied or otherwise called off.
    Cancelled,
}

/// A courier dispatch requested to deliver a mishandled bag to the
/// passenger.
///
/// When `requires_approval` is set, `status` may not advance past
/// `PendingApproval` without a recorded approval (enforced by
/// `bag-orchestrator`, which owns the transition logic).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourierDispatch {
    /// Dispatch identity.
    pub dispatch_id: CourierDispatchId,
    /// The bag being delivered.
    pub bag_tag: BagTag,
    /// Delivery address.
    pub destination_address: String,
    /// Estimated cost of the dispatch.
    pub cost_estimate: f64,
    /// Lifecycle status.
    pub status: CourierDispatchStatus,
    /// Whether a human approval gate applies.
    pub requires_approval: bool,
    /// Identity of the approver, once approved.
    pub approved_by: Option<String>,
}

impl CourierDispatch {
    /// Construct a new dispatch request.
    pub fn new(
        bag_tag: BagTag,
        destination_address: impl Into<String>,
        cost_estimate: f64,
        requires_approval: bool,
    ) -> Self {
        Self {
            dispatch_id: Uuid::new_v4(),
            bag_tag,
            destination_address: destination_address.into(),
            cost_estimate,
            status: if requires_approval {
                CourierDispatchStatus::PendingApproval
            } else {
                CourierDispatchStatus::Booked
            },
            requires_approval,
            approved_by: None,
        }
    }
}
