//! The `RelationalStore` capability contract (spec §6), the authoritative
//! store per spec §4.5.

use async_trait::async_trait;
use bag_types::{
    Bag, BagTag, CaseId, CaseStatus, CourierDispatch, CourierDispatchId, ExceptionCase,
    Notification, Pir, RiskAssessment, ScanEvent,
};
use uuid::Uuid;

use crate::{BagFilter, ReconciliationDebt, StorageError};

/// Transactional, authoritative storage for all spec §3 entities.
///
/// Every mutating method is idempotent on its primary key (spec §4.5): a
/// duplicate `insert_scan_event` returns `Ok(false)` rather than an error,
/// matching the `ON CONFLICT(event_id) DO NOTHING` semantics the write
/// algorithm in §4.5 specifies.
#[async_trait]
pub trait RelationalStore: Send + Sync {
    /// Insert or update a bag record.
    async fn upsert_bag(&self, bag: &Bag) -> Result<(), StorageError>;

    /// Fetch a bag by its tag.
    async fn get_bag(&self, tag: &BagTag) -> Result<Option<Bag>, StorageError>;

    /// List bags matching `filter` (mirrors `GET /bags`, spec §6).
    async fn list_bags(&self, filter: &BagFilter) -> Result<Vec<Bag>, StorageError>;

    /// Insert a scan event. Returns `Ok(false)` if `event_id` already
    /// exists (duplicate, `already_applied`), `Ok(true)` if newly inserted.
    async fn insert_scan_event(&self, event: &ScanEvent) -> Result<bool, StorageError>;

    /// Whether `event_id` has already been recorded, without inserting it.
    /// Lets callers check for a duplicate before committing any state that
    /// depends on the event being new (spec §4.5's dedup-then-mutate order).
    async fn scan_event_exists(&self, event_id: Uuid) -> Result<bool, StorageError>;

    /// All scans recorded against `tag`, ordered non-decreasing by
    /// timestamp.
    async fn scans_for_bag(&self, tag: &BagTag) -> Result<Vec<ScanEvent>, StorageError>;

    /// Insert a risk assessment. Assessments are append-only.
    async fn insert_risk_assessment(&self, assessment: &RiskAssessment) -> Result<(), StorageError>;

    /// The most recent risk assessment for `tag`, if any.
    async fn latest_risk_assessment(
        &self,
        tag: &BagTag,
    ) -> Result<Option<RiskAssessment>, StorageError>;

    /// Open a new exception case.
    async fn open_case(&self, case: &ExceptionCase) -> Result<(), StorageError>;

    /// Fetch a case by id.
    async fn get_case(&self, case_id: CaseId) -> Result<Option<ExceptionCase>, StorageError>;

    /// The open case for `tag`, if one exists (spec §3: at most one open
    /// case is expected by the workflow, though the schema does not forbid
    /// historical closed cases from coexisting).
    async fn open_case_for_bag(&self, tag: &BagTag) -> Result<Option<ExceptionCase>, StorageError>;

    /// Apply a status transition to a case. Returns
    /// [`StorageError::InvalidTransition`] if the transition is illegal.
    async fn update_case_status(
        &self,
        case_id: CaseId,
        to: CaseStatus,
    ) -> Result<(), StorageError>;

    /// Recompute an already-open case's priority in place. Returns
    /// [`StorageError::NotFound`] if `case_id` does not exist.
    async fn update_case_priority(
        &self,
        case_id: CaseId,
        priority: bag_types::CasePriority,
    ) -> Result<(), StorageError>;

    /// Insert or update a PIR. Enforces "exactly one open PIR per
    /// bag_tag at a time".
    async fn upsert_pir(&self, pir: &Pir) -> Result<(), StorageError>;

    /// The open PIR for `tag`, if any.
    async fn open_pir_for_bag(&self, tag: &BagTag) -> Result<Option<Pir>, StorageError>;

    /// Insert or update a courier dispatch.
    async fn upsert_courier_dispatch(&self, dispatch: &CourierDispatch) -> Result<(), StorageError>;

    /// Fetch a courier dispatch by id.
    async fn get_courier_dispatch(
        &self,
        dispatch_id: CourierDispatchId,
    ) -> Result<Option<CourierDispatch>, StorageError>;

    /// Insert a notification (queued state).
    async fn insert_notification(&self, notification: &Notification) -> Result<(), StorageError>;

    /// Whether a notification for `(bag_tag, template_id, channel)` was
    /// already queued/sent within the last 10 minutes (spec §3 dedup rule).
    async fn recent_notification_exists(
        &self,
        tag: &BagTag,
        template_id: &str,
        channel: bag_types::NotificationChannel,
    ) -> Result<bool, StorageError>;

    /// Record a reconciliation debt (spec §4.5 step 5).
    async fn record_debt(&self, debt: &ReconciliationDebt) -> Result<(), StorageError>;

    /// All outstanding (unresolved) reconciliation debts.
    async fn outstanding_debts(&self) -> Result<Vec<ReconciliationDebt>, StorageError>;

    /// Mark a debt as resolved.
    async fn resolve_debt(&self, debt_id: Uuid) -> Result<(), StorageError>;
}
