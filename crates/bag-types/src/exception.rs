//! The `ExceptionCase` entity (spec §3, §4.6).

use crate::BagTag;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for an [`ExceptionCase`].
pub type CaseId = Uuid;

/// Case urgency, highest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CasePriority {
    /// Highest urgency.
    P0,
    /// High urgency.
    P1,
    /// Standard urgency.
    P2,
    /// Low urgency.
    P3,
}

/// Case lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    /// Newly opened, unassigned or assigned but not started.
    Open,
    /// An operator is actively working the case.
    InProgress,
    /// Worked to completion.
    Resolved,
    /// Closed without full resolution (e.g. superseded).
    Closed,
}

/// A single audit-trail entry in a case's `timeline`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    /// When the entry was recorded.
    pub at: DateTime<Utc>,
    /// Free-text/structured description of what happened.
    pub note: String,
}

/// Raised when an `ExceptionCase` status transition is not legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal exception case transition from {from:?}")]
pub struct ExceptionCaseError {
    /// The case's status before the rejected transition.
    pub from: CaseStatus,
}

/// A case opened when risk crosses a threshold or an anomaly is observed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceptionCase {
    /// Case identity.
    pub case_id: CaseId,
    /// The bag this case concerns.
    pub bag_tag: BagTag,
    /// Free-form classification (e.g. `"high_risk"`, `"anomaly"`).
    pub case_type: String,
    /// Urgency.
    pub priority: CasePriority,
    /// Lifecycle status.
    pub status: CaseStatus,
    /// Operator currently responsible, if assigned.
    pub assignee: Option<String>,
    /// Deadline by which the case must be resolved; always `>= created_at`.
    pub sla_deadline: DateTime<Utc>,
    /// Ordered audit entries.
    pub timeline: Vec<TimelineEntry>,
    /// When the case was opened.
    pub created_at: DateTime<Utc>,
}

impl ExceptionCase {
    /// Open a new case.
    pub fn open(
        bag_tag: BagTag,
        case_type: impl Into<String>,
        priority: CasePriority,
        sla_deadline: DateTime<Utc>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            case_id: Uuid::new_v4(),
            bag_tag,
            case_type: case_type.into(),
            priority,
            status: CaseStatus::Open,
            assignee: None,
            sla_deadline,
            timeline: vec![TimelineEntry {
                at: created_at,
                note: "case opened".to_string(),
            }],
            created_at,
        }
    }

    /// Advance the case status, enforcing
    /// `open -> in_progress -> (resolved | closed)` with reopen forbidden.
    pub fn transition(&mut self, to: CaseStatus, at: DateTime<Utc>) -> Result<(), ExceptionCaseError> {
        let legal = matches!(
            (self.status, to),
            (CaseStatus::Open, CaseStatus::InProgress)
                | (CaseStatus::Open, CaseStatus::Resolved)
                | (CaseStatus::Open, CaseStatus::Closed)
                | (CaseStatus::InProgress, CaseStatus::Resolved)
                | (CaseStatus::InProgress, CaseStatus::Closed)
        );
        if !legal {
            return Err(ExceptionCaseError { from: self.status });
        }
        self.status = to;
        self.timeline.push(TimelineEntry {
            at,
            note: format!("status -> {to:?}"),
        });
        Ok(())
    }

    /// Recompute the case's priority. Legal from any status; priority is a
    /// derived value that tracks the bag's current risk, not a state machine.
    pub fn reprioritize(&mut self, priority: CasePriority, at: DateTime<Utc>) {
        self.timeline.push(TimelineEntry {
            at,
            note: format!("priority {:?} -> {priority:?}", self.priority),
        });
        self.priority = priority;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reopen_is_forbidden() {
        let tag = crate::BagTag::new("0000000001").unwrap();
        let t0 = Utc::now();
        let mut case = ExceptionCase::open(tag, "high_risk", CasePriority::P1, t0, t0);
        case.transition(CaseStatus::Resolved, t0).unwrap();
        assert!(case.transition(CaseStatus::Open, t0).is_err());
        assert!(case.transition(CaseStatus::InProgress, t0).is_err());
    }
}
