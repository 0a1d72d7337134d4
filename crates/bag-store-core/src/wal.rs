//! Write-ahead protocol shared by dual-write coordinator implementations.
//!
//! Grounded on `toka-store-core`'s `WriteAheadLog`/`WalOperation`/
//! `causal_hash` machinery, generalized from generic event payloads to the
//! specific mutations the Dual-Write Coordinator performs (spec §4.5).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use bag_types::{Bag, ExceptionCase, RiskAssessment, ScanEvent};

use crate::StorageError;

/// Unique identifier for a dual-write transaction.
pub type TransactionId = Uuid;

/// Sequence number for WAL entries to ensure ordering.
pub type SequenceNumber = u64;

/// Blake3 digest used to content-address a WAL entry's payload.
pub type CausalDigest = [u8; 32];

/// Compute a deterministic digest over serialized payload bytes.
///
/// Used both for WAL entry addressing and as the basis of the ingest bus's
/// deduplication fingerprint (spec §4.3).
pub fn content_digest(payload_bytes: &[u8]) -> CausalDigest {
    blake3::hash(payload_bytes).into()
}

/// One of the Dual-Write Coordinator's exposed mutating operations (spec
/// §4.5's operation table), logged before being applied so a crash between
/// the relational commit and the graph projection is recoverable.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum WalOperation {
    /// `upsert_bag`.
    UpsertBag {
        /// The bag to insert or update.
        bag: Box<Bag>,
    },
    /// `record_event`.
    RecordEvent {
        /// The scan event to record.
        event: Box<ScanEvent>,
    },
    /// `record_risk`.
    RecordRisk {
        /// The risk assessment to record.
        assessment: Box<RiskAssessment>,
    },
    /// `open_case`.
    OpenCase {
        /// The exception case to open.
        case: Box<ExceptionCase>,
    },
    /// `update_case`.
    UpdateCase {
        /// Identity of the case being updated.
        case_id: Uuid,
        /// New status to apply.
        to_status: bag_types::CaseStatus,
    },
    /// `update_case_priority`.
    UpdateCasePriority {
        /// Identity of the case being updated.
        case_id: Uuid,
        /// New priority to apply.
        priority: bag_types::CasePriority,
    },
}

/// Lifecycle state of a [`WalEntry`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalEntryState {
    /// Relational write committed; graph projection not yet confirmed.
    RelationalCommitted,
    /// Both relational and graph writes are confirmed.
    FullyProjected,
    /// Graph projection failed after exhausting retries; a
    /// `ReconciliationDebt` has been recorded.
    DebtRecorded,
}

/// A single entry in the dual-write log.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WalEntry {
    /// Identity of this entry.
    pub id: Uuid,
    /// Transaction this entry belongs to.
    pub transaction_id: TransactionId,
    /// Sequence number for ordering.
    pub sequence: SequenceNumber,
    /// When this entry was written.
    pub timestamp: DateTime<Utc>,
    /// The operation being logged.
    pub operation: WalOperation,
    /// Current lifecycle state.
    pub state: WalEntryState,
}

/// Durable write-ahead log backing the Dual-Write Coordinator.
///
/// An implementation need not be a literal on-disk log; `bag-store-memory`
/// backs it with an in-memory `Vec` guarded by a lock, sufficient for tests
/// and the in-process reconciliation loop. Production deployments are
/// expected to back it with the relational store's own transaction log.
#[async_trait]
pub trait WriteAheadLog: Send + Sync {
    /// Begin a new transaction.
    async fn begin_transaction(&self) -> Result<TransactionId, StorageError>;

    /// Append an operation to the given transaction's log.
    async fn write_entry(
        &self,
        transaction_id: TransactionId,
        operation: WalOperation,
    ) -> Result<SequenceNumber, StorageError>;

    /// Mark a previously written entry's projection outcome.
    async fn mark_state(
        &self,
        transaction_id: TransactionId,
        sequence: SequenceNumber,
        state: WalEntryState,
    ) -> Result<(), StorageError>;

    /// Return entries not yet confirmed fully projected
    /// (`RelationalCommitted` or `DebtRecorded`), oldest first — the
    /// reconciler's work queue. `DebtRecorded` entries are included so a
    /// background reconciler can retry the original operation using the
    /// payload still held in the entry, rather than only the event_id/reason
    /// summary kept in [`crate::ReconciliationDebt`].
    async fn pending_projection(&self) -> Result<Vec<WalEntry>, StorageError>;
}
