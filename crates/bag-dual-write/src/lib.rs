#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **bag-dual-write** – The Dual-Write Coordinator (spec §4.5).
//!
//! Keeps the relational store authoritative and the graph store an
//! eventually-consistent projection with bounded lag: every mutation is
//! logged to the [`WriteAheadLog`] before the relational commit, projected
//! to the graph store with bounded retry, and — on persistent graph
//! failure — recorded as a [`ReconciliationDebt`] for the background
//! reconciler to replay.
//!
//! Grounded on `toka-store-core`'s WAL protocol for the write-ahead step and
//! `toka-runtime`'s `Arc<dyn Trait>` component wiring + `tokio::spawn`
//! background-task pattern for the reconciler.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use bag_store_core::{
    BagFilter, Bottleneck, ConnectionRisk, CurrentLocation, GraphStore, Journey,
    ReconciliationDebt, RelationalStore, StorageError, WalEntry, WalEntryState, WalOperation,
    WriteAheadLog,
};
use bag_types::{Bag, BagTag, CaseId, CaseStatus, ExceptionCase, RiskAssessment, ScanEvent, ScanType};

/// Default bounded retry schedule for graph projection (spec §4.5).
pub const DEFAULT_BACKOFF_MS: [u64; 3] = [1000, 2000, 4000];

/// Default interval between reconciler sweeps.
pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(30);

/// Outcome of a `record_event` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// The event was newly applied.
    Applied,
    /// The event's `event_id` was already recorded; this call was a no-op.
    AlreadyApplied,
}

/// Result of a single reconciliation sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Entries that projected successfully this sweep.
    pub resolved: u64,
    /// Entries that failed again and remain outstanding.
    pub still_failing: u64,
}

/// Maintains the relational store as authoritative and the graph store as
/// an eventually-consistent projection (spec §4.5).
pub struct DualWriteCoordinator {
    relational: Arc<dyn RelationalStore>,
    graph: Arc<dyn GraphStore>,
    wal: Arc<dyn WriteAheadLog>,
    bag_locks: DashMap<BagTag, Arc<AsyncMutex<()>>>,
    backoff_ms: Vec<u64>,
    reconciler: AsyncMutex<Option<JoinHandle<()>>>,
}

impl DualWriteCoordinator {
    /// Construct a coordinator over the given store implementations, using
    /// the spec-default 1s/2s/4s backoff schedule.
    pub fn new(
        relational: Arc<dyn RelationalStore>,
        graph: Arc<dyn GraphStore>,
        wal: Arc<dyn WriteAheadLog>,
    ) -> Self {
        Self::with_backoff(relational, graph, wal, DEFAULT_BACKOFF_MS.to_vec())
    }

    /// Construct a coordinator with a custom backoff schedule (used by tests
    /// to avoid real sleeps).
    pub fn with_backoff(
        relational: Arc<dyn RelationalStore>,
        graph: Arc<dyn GraphStore>,
        wal: Arc<dyn WriteAheadLog>,
        backoff_ms: Vec<u64>,
    ) -> Self {
        Self {
            relational,
            graph,
            wal,
            bag_locks: DashMap::new(),
            backoff_ms,
            reconciler: AsyncMutex::new(None),
        }
    }

    async fn lock_for(&self, tag: &BagTag) -> Arc<AsyncMutex<()>> {
        self.bag_locks
            .entry(tag.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// `upsert_bag(bag)` (spec §4.5 operation table).
    pub async fn upsert_bag(&self, bag: Bag) -> Result<(), StorageError> {
        let lock = self.lock_for(&bag.bag_tag).await;
        let _guard = lock.lock().await;

        let tx = self.wal.begin_transaction().await?;
        let seq = self
            .wal
            .write_entry(tx, WalOperation::UpsertBag { bag: Box::new(bag.clone()) })
            .await?;

        self.relational.upsert_bag(&bag).await?;
        self.project(tx, seq, "graph", bag.bag_tag.to_string(), || {
            let graph = self.graph.clone();
            let bag = bag.clone();
            async move { graph.merge_bag(&bag).await }
        })
        .await
    }

    /// `record_event(event)` (spec §4.5 write algorithm).
    ///
    /// Returns [`RecordOutcome::AlreadyApplied`] without mutating the bag
    /// when `event.event_id` has already been recorded.
    pub async fn record_event(&self, event: ScanEvent) -> Result<RecordOutcome, StorageError> {
        let lock = self.lock_for(&event.bag_tag).await;
        let _guard = lock.lock().await;

        let tx = self.wal.begin_transaction().await?;
        let seq = self
            .wal
            .write_entry(
                tx,
                WalOperation::RecordEvent {
                    event: Box::new(event.clone()),
                },
            )
            .await?;

        // Dedup check only: the scan row itself is not inserted until the
        // transition below is known to be legal, so a rejected transition
        // leaves no trace in the relational store (spec §4.5, §8 "illegal
        // transition... relational state unchanged").
        if self.relational.scan_event_exists(event.event_id).await? {
            self.wal.mark_state(tx, seq, WalEntryState::FullyProjected).await?;
            return Ok(RecordOutcome::AlreadyApplied);
        }

        let mut bag = match self.relational.get_bag(&event.bag_tag).await? {
            Some(bag) => bag,
            None => Bag::new(event.bag_tag.clone(), Some(event.location.clone()), event.timestamp),
        };

        // An event older than the bag's most recent commit must not regress
        // status/current_location (spec §4.4 concurrency note).
        if event.timestamp >= bag.updated_at {
            // `check_in`/`transfer`/`manual` have no entry in `next_status`'s
            // table (`check_in` is the implicit creation transition `Bag::new`
            // already applies; `transfer`/`manual` are location-only scans,
            // spec §3's entity table), so only location/timestamp advance.
            let transition = if matches!(
                event.scan_type,
                ScanType::CheckIn | ScanType::Transfer | ScanType::Manual
            ) {
                bag.current_location = Some(event.location.clone());
                bag.touch(event.timestamp);
                Ok(())
            } else if matches!(event.scan_type, ScanType::Anomaly) {
                bag.apply_anomaly(event.timestamp)
            } else {
                bag.apply_transition(
                    event.scan_type.transition_label(),
                    Some(event.location.clone()),
                    event.timestamp,
                )
            };
            if let Err(err) = transition {
                warn!(bag_tag = %event.bag_tag, %err, "rejecting illegal transition");
                return Err(StorageError::InvalidTransition(event.event_id));
            }
        } else {
            debug!(bag_tag = %event.bag_tag, "out-of-order event recorded without state regression");
        }

        // Transition accepted: commit the scan row and the recomputed bag
        // together. A racing writer may have inserted the same event_id
        // between the existence check above and here; treat that the same
        // as any other duplicate rather than double-applying the bag update.
        if !self.relational.insert_scan_event(&event).await? {
            self.wal.mark_state(tx, seq, WalEntryState::FullyProjected).await?;
            return Ok(RecordOutcome::AlreadyApplied);
        }
        self.relational.upsert_bag(&bag).await?;

        self.project(tx, seq, "graph", event.bag_tag.to_string(), || {
            let graph = self.graph.clone();
            let event = event.clone();
            let bag = bag.clone();
            async move {
                graph.merge_scan_event(&event).await?;
                graph.merge_bag(&bag).await
            }
        })
        .await?;

        Ok(RecordOutcome::Applied)
    }

    /// `record_risk(assessment)` (spec §4.5). Also updates `Bag.risk_score`
    /// to the latest assessment, per §3's invariant.
    pub async fn record_risk(&self, assessment: RiskAssessment) -> Result<(), StorageError> {
        let lock = self.lock_for(&assessment.bag_tag).await;
        let _guard = lock.lock().await;

        let tx = self.wal.begin_transaction().await?;
        let seq = self
            .wal
            .write_entry(
                tx,
                WalOperation::RecordRisk {
                    assessment: Box::new(assessment.clone()),
                },
            )
            .await?;

        self.relational.insert_risk_assessment(&assessment).await?;

        let mut bag = self
            .relational
            .get_bag(&assessment.bag_tag)
            .await?
            .ok_or_else(|| StorageError::UnknownBag(assessment.bag_tag.clone()))?;
        bag.apply_risk_score(assessment.risk_score, assessment.assessed_at);
        self.relational.upsert_bag(&bag).await?;

        self.project(tx, seq, "graph", assessment.bag_tag.to_string(), || {
            let graph = self.graph.clone();
            let assessment = assessment.clone();
            let bag = bag.clone();
            async move {
                graph.merge_risk(&assessment).await?;
                graph.merge_bag(&bag).await
            }
        })
        .await
    }

    /// `open_case(case)` (spec §4.5).
    pub async fn open_case(&self, case: ExceptionCase) -> Result<(), StorageError> {
        let lock = self.lock_for(&case.bag_tag).await;
        let _guard = lock.lock().await;

        let tx = self.wal.begin_transaction().await?;
        let seq = self
            .wal
            .write_entry(tx, WalOperation::OpenCase { case: Box::new(case.clone()) })
            .await?;

        self.relational.open_case(&case).await?;
        self.project(tx, seq, "graph", case.bag_tag.to_string(), || {
            let graph = self.graph.clone();
            let case = case.clone();
            async move { graph.merge_case(&case).await }
        })
        .await
    }

    /// `update_case(case_id, patch)` (spec §4.5). Fails with
    /// [`StorageError::InvalidTransition`] if `to` is not a legal transition.
    pub async fn update_case(&self, case_id: CaseId, to: CaseStatus) -> Result<(), StorageError> {
        let existing = self
            .relational
            .get_case(case_id)
            .await?
            .ok_or(StorageError::NotFound(case_id.to_string()))?;

        let lock = self.lock_for(&existing.bag_tag).await;
        let _guard = lock.lock().await;

        let tx = self.wal.begin_transaction().await?;
        let seq = self
            .wal
            .write_entry(
                tx,
                WalOperation::UpdateCase {
                    case_id,
                    to_status: to,
                },
            )
            .await?;

        self.relational.update_case_status(case_id, to).await?;
        let case = self
            .relational
            .get_case(case_id)
            .await?
            .ok_or(StorageError::NotFound(case_id.to_string()))?;

        self.project(tx, seq, "graph", case.bag_tag.to_string(), || {
            let graph = self.graph.clone();
            let case = case.clone();
            async move { graph.merge_case(&case).await }
        })
        .await
    }

    /// `update_case_priority(case_id, priority)` (spec §4.6 step 2's
    /// "update" half — recomputes an already-open case's priority without
    /// changing its lifecycle status).
    pub async fn update_case_priority(
        &self,
        case_id: CaseId,
        priority: bag_types::CasePriority,
    ) -> Result<(), StorageError> {
        let existing = self
            .relational
            .get_case(case_id)
            .await?
            .ok_or(StorageError::NotFound(case_id.to_string()))?;

        let lock = self.lock_for(&existing.bag_tag).await;
        let _guard = lock.lock().await;

        let tx = self.wal.begin_transaction().await?;
        let seq = self
            .wal
            .write_entry(tx, WalOperation::UpdateCasePriority { case_id, priority })
            .await?;

        self.relational.update_case_priority(case_id, priority).await?;
        let case = self
            .relational
            .get_case(case_id)
            .await?
            .ok_or(StorageError::NotFound(case_id.to_string()))?;

        self.project(tx, seq, "graph", case.bag_tag.to_string(), || {
            let graph = self.graph.clone();
            let case = case.clone();
            async move { graph.merge_case(&case).await }
        })
        .await
    }

    /// `get_journey(bag_tag)` (spec §4.5 query surface).
    pub async fn get_journey(&self, tag: &BagTag) -> Result<Option<Journey>, StorageError> {
        self.graph.get_journey(tag).await
    }

    /// `get_current_location(bag_tag)` (spec §4.5 query surface).
    pub async fn get_current_location(
        &self,
        tag: &BagTag,
    ) -> Result<Option<CurrentLocation>, StorageError> {
        self.graph.get_current_location(tag).await
    }

    /// `get_flight_bags(flight_identifier)` (spec §4.5 query surface).
    pub async fn get_flight_bags(&self, flight_identifier: &str) -> Result<Vec<Bag>, StorageError> {
        self.graph.get_flight_bags(flight_identifier).await
    }

    /// `analyze_connection_risk(bag_tag, connecting_flight, connection_minutes)`
    /// (spec §4.5 query surface): `max(bag.risk_score, §4.2(bag, connection_minutes))`.
    pub async fn analyze_connection_risk(
        &self,
        tag: &BagTag,
        connection_minutes: u32,
    ) -> Result<ConnectionRisk, StorageError> {
        let bag = self
            .relational
            .get_bag(tag)
            .await?
            .ok_or_else(|| StorageError::UnknownBag(tag.clone()))?;
        let stored_factors = self
            .relational
            .latest_risk_assessment(tag)
            .await?
            .map(|a| a.factors)
            .unwrap_or_default();

        let connection = bag_risk::score(bag_risk::RiskInput {
            status: bag.status,
            current_location: bag.current_location.as_deref(),
            connection_minutes: Some(connection_minutes),
        });
        let total_risk = bag_risk::combine_with_connection_risk(bag.risk_score, connection.score);
        let mut factors = stored_factors;
        factors.extend(connection.factors);

        Ok(ConnectionRisk {
            total_risk,
            level: bag_risk::level_for_score(total_risk),
            factors,
        })
    }

    /// `identify_bottlenecks(window_hours, min_bags)` (spec §4.5 query surface).
    pub async fn identify_bottlenecks(
        &self,
        window_hours: u32,
        min_bags: u32,
    ) -> Result<Vec<Bottleneck>, StorageError> {
        self.graph.identify_bottlenecks(window_hours, min_bags).await
    }

    /// List bags matching `filter` (`GET /bags`, spec §6) from the
    /// authoritative relational store.
    pub async fn list_bags(&self, filter: &BagFilter) -> Result<Vec<Bag>, StorageError> {
        self.relational.list_bags(filter).await
    }

    /// Outstanding reconciliation debts, for introspection
    /// (`/events/stream/info`, spec §6).
    pub async fn outstanding_debts(&self) -> Result<Vec<ReconciliationDebt>, StorageError> {
        self.relational.outstanding_debts().await
    }

    /// Attempt `op` against the graph store with bounded exponential
    /// backoff; on persistent failure, record a [`ReconciliationDebt`] and
    /// mark the WAL entry accordingly rather than propagating the error.
    async fn project<F, Fut>(
        &self,
        transaction_id: bag_store_core::TransactionId,
        sequence: bag_store_core::SequenceNumber,
        target_store: &str,
        subject: String,
        op: F,
    ) -> Result<(), StorageError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<(), StorageError>>,
    {
        match self.with_backoff(op).await {
            Ok(()) => {
                self.wal
                    .mark_state(transaction_id, sequence, WalEntryState::FullyProjected)
                    .await
            }
            Err(e) => {
                error!(subject, %e, "graph projection failed permanently, recording debt");
                let debt = ReconciliationDebt::new(transaction_id, target_store, e.to_string());
                self.relational.record_debt(&debt).await?;
                self.wal
                    .mark_state(transaction_id, sequence, WalEntryState::DebtRecorded)
                    .await
            }
        }
    }

    async fn with_backoff<F, Fut>(&self, op: F) -> Result<(), StorageError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<(), StorageError>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && attempt < self.backoff_ms.len() => {
                    debug!(attempt, "transient graph failure, backing off");
                    tokio::time::sleep(Duration::from_millis(self.backoff_ms[attempt])).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Run one reconciliation sweep: replay every WAL entry not yet fully
    /// projected (spec §4.5 step 5's background reconciler).
    pub async fn reconcile_once(&self) -> Result<ReconcileReport, StorageError> {
        let entries = self.wal.pending_projection().await?;
        let debts = self.relational.outstanding_debts().await?;
        let mut report = ReconcileReport::default();

        for entry in entries {
            match self.replay_entry(&entry).await {
                Ok(()) => {
                    self.wal
                        .mark_state(entry.transaction_id, entry.sequence, WalEntryState::FullyProjected)
                        .await?;
                    if let Some(debt) = debts.iter().find(|d| d.event_id == entry.transaction_id) {
                        self.relational.resolve_debt(debt.debt_id).await?;
                    }
                    report.resolved += 1;
                }
                Err(e) => {
                    debug!(sequence = entry.sequence, %e, "reconciliation attempt still failing");
                    report.still_failing += 1;
                }
            }
        }
        Ok(report)
    }

    async fn replay_entry(&self, entry: &WalEntry) -> Result<(), StorageError> {
        match &entry.operation {
            WalOperation::UpsertBag { bag } => self.graph.merge_bag(bag).await,
            WalOperation::RecordEvent { event } => {
                self.graph.merge_scan_event(event).await?;
                if let Some(bag) = self.relational.get_bag(&event.bag_tag).await? {
                    self.graph.merge_bag(&bag).await?;
                }
                Ok(())
            }
            WalOperation::RecordRisk { assessment } => {
                self.graph.merge_risk(assessment).await?;
                if let Some(bag) = self.relational.get_bag(&assessment.bag_tag).await? {
                    self.graph.merge_bag(&bag).await?;
                }
                Ok(())
            }
            WalOperation::OpenCase { case } => self.graph.merge_case(case).await,
            WalOperation::UpdateCase { case_id, .. } => {
                if let Some(case) = self.relational.get_case(*case_id).await? {
                    self.graph.merge_case(&case).await
                } else {
                    Ok(())
                }
            }
            WalOperation::UpdateCasePriority { case_id, .. } => {
                if let Some(case) = self.relational.get_case(*case_id).await? {
                    self.graph.merge_case(&case).await
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Spawn the background reconciler, sweeping every `interval`.
    pub async fn spawn_reconciler(self: &Arc<Self>, interval: Duration) {
        let coordinator = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                match coordinator.reconcile_once().await {
                    Ok(report) if report.resolved > 0 || report.still_failing > 0 => {
                        debug!(
                            resolved = report.resolved,
                            still_failing = report.still_failing,
                            "reconciliation sweep complete"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => error!(%e, "reconciliation sweep failed"),
                }
            }
        });
        *self.reconciler.lock().await = Some(handle);
    }

    /// Stop the background reconciler, if running.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.reconciler.lock().await.take() {
            handle.abort();
        }
    }
}
