//! Reconciliation debt (spec §4.5 step 5, §9 GLOSSARY).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Recorded marker that the graph projection for some relational write has
/// permanently failed after exhausting retries, and must be repaired by
/// the background reconciler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationDebt {
    /// Identity of this debt record.
    pub debt_id: Uuid,
    /// The event (or operation) whose projection is outstanding.
    pub event_id: Uuid,
    /// Which store failed to receive the projection (always `"graph"` at
    /// present; kept as a string so a future second projection target does
    /// not require a schema change).
    pub target_store: String,
    /// Why the projection failed, for operator diagnosis.
    pub reason: String,
    /// When the first failure was observed.
    pub first_failed_at: DateTime<Utc>,
}

impl ReconciliationDebt {
    /// Record a new debt entry for `event_id` against `target_store`.
    pub fn new(event_id: Uuid, target_store: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            debt_id: Uuid::new_v4(),
            event_id,
            target_store: target_store.into(),
            reason: reason.into(),
            first_failed_at: Utc::now(),
        }
    }
}
