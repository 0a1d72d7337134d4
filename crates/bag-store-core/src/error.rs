//! Storage error taxonomy (spec §7).

use bag_types::BagTag;
use uuid::Uuid;

/// Errors produced by [`crate::RelationalStore`] and [`crate::GraphStore`]
/// implementations.
///
/// Variants are classified per spec §7: `Transient` variants are retried
/// with backoff by `bag-dual-write`; `InvalidTransition` and
/// `DuplicateKey` are permanent and surfaced to the caller directly.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The underlying store is unreachable or timed out. Transient.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// A connection pool has no capacity left. Transient.
    #[error("connection pool exhausted")]
    PoolExhausted,
    /// The requested entity does not exist.
    #[error("entity not found: {0}")]
    NotFound(String),
    /// A requested `ExceptionCase`/`CourierDispatch` status transition is
    /// not legal. Permanent.
    #[error("invalid transition for case/dispatch {0}")]
    InvalidTransition(Uuid),
    /// A unique-constraint violation other than the idempotent
    /// `event_id`/`dispatch_id` dedup paths, which are handled as
    /// `Ok(false)` / `already_applied` rather than errors.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),
    /// A referenced bag does not exist where existence is required.
    #[error("unknown bag tag: {0}")]
    UnknownBag(BagTag),
    /// The backend rejected the operation for a reason not covered above.
    #[error("backend error: {0}")]
    Backend(String),
}

impl StorageError {
    /// Whether this error should be retried with backoff (spec §7
    /// "Transient").
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StorageError::Unavailable(_) | StorageError::PoolExhausted
        )
    }
}
