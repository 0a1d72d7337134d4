#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **bag-ingest-bus** – The Ingest Bus (spec §4.3): a durable, bounded,
//! append-only log with single-group competing-consumer dispatch, explicit
//! ack, stale-claim reassignment, a dead-letter queue, and offset replay.
//!
//! Grounded on `toka-bus-core`'s `tokio::sync::broadcast`-based event bus,
//! generalized from fan-out pub/sub to an acked work queue: every consumer
//! pulls from one shared pending set rather than its own broadcast
//! subscription, since spec §4.3's `ack`/`move_to_dlq` contracts take only
//! an `ingest_id` with no group qualifier.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use bag_store_core::content_digest;
use bag_types::CanonicalEvent;

/// Identifies one appended message.
pub type IngestId = Uuid;

/// Deduplication window (spec §4.3).
pub const DEDUP_TTL: ChronoDuration = ChronoDuration::minutes(5);

/// Approximate log size at which the oldest entries are trimmed (spec §4.3
/// "Sizing").
pub const TRIM_THRESHOLD: usize = 100_000;

/// Errors raised by bus operations that reference an `ingest_id`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum IngestError {
    /// No pending delivery exists for this id (already acked, never
    /// delivered, or moved to the DLQ).
    #[error("no pending delivery for ingest_id {0}")]
    NotPending(Uuid),
}

/// The outcome of a single `publish` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Newly appended at this id.
    Appended(IngestId),
    /// A fingerprint-identical event was published within the dedup window;
    /// nothing was appended.
    Duplicate,
}

/// One delivered message, handed to a worker by `consume` or `replay`.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Identity of this delivery.
    pub ingest_id: IngestId,
    /// The canonical event.
    pub event: CanonicalEvent,
    /// When the event was appended to the log.
    pub ingested_at: DateTime<Utc>,
    /// How many times this message has been reclaimed via `claim_stale`.
    pub redelivery_count: u32,
}

/// A record in the dead-letter queue.
#[derive(Debug, Clone)]
pub struct DlqEntry {
    /// Identity of the original delivery.
    pub ingest_id: IngestId,
    /// The canonical event that failed processing.
    pub event: CanonicalEvent,
    /// Why it was moved here.
    pub reason: String,
    /// When it was moved.
    pub moved_at: DateTime<Utc>,
}

struct LogRecord {
    offset: u64,
    ingest_id: IngestId,
    event: CanonicalEvent,
    ingested_at: DateTime<Utc>,
}

struct Pending {
    event: CanonicalEvent,
    ingested_at: DateTime<Utc>,
    owner: String,
    claimed_at: DateTime<Utc>,
    redelivery_count: u32,
    /// `true` while a consumer holds this delivery; `false` once
    /// `claim_stale` has released it back for redelivery.
    owned: bool,
}

/// Durable append-only log with consumer-group dispatch (spec §4.3).
pub struct IngestBus {
    log: RwLock<VecDeque<LogRecord>>,
    next_offset: AtomicU64,
    cursor: AtomicU64,
    dedup: DashMap<[u8; 32], DateTime<Utc>>,
    pending: DashMap<IngestId, Pending>,
    dlq: RwLock<Vec<DlqEntry>>,
}

impl Default for IngestBus {
    fn default() -> Self {
        Self::new()
    }
}

impl IngestBus {
    /// Construct an empty bus.
    pub fn new() -> Self {
        Self {
            log: RwLock::new(VecDeque::new()),
            next_offset: AtomicU64::new(0),
            cursor: AtomicU64::new(0),
            dedup: DashMap::new(),
            pending: DashMap::new(),
            dlq: RwLock::new(Vec::new()),
        }
    }

    fn fingerprint(event: &CanonicalEvent) -> [u8; 32] {
        let key = format!(
            "{}|{}|{}|{:?}",
            event.bag_tag,
            event.location,
            event.timestamp.timestamp_millis(),
            event.event_type()
        );
        content_digest(key.as_bytes())
    }

    /// `publish(event) -> ingest_id | duplicate` (spec §4.3).
    pub async fn publish(&self, event: CanonicalEvent) -> PublishOutcome {
        let fp = Self::fingerprint(&event);
        let now = Utc::now();

        if let Some(seen_at) = self.dedup.get(&fp).map(|e| *e) {
            if now - seen_at < DEDUP_TTL {
                debug!(bag_tag = %event.bag_tag, "duplicate event suppressed by dedup window");
                return PublishOutcome::Duplicate;
            }
        }
        self.dedup.insert(fp, now);

        let ingest_id = Uuid::new_v4();
        let offset = self.next_offset.fetch_add(1, Ordering::SeqCst);
        {
            let mut log = self.log.write().await;
            log.push_back(LogRecord {
                offset,
                ingest_id,
                event,
                ingested_at: now,
            });
            while log.len() > TRIM_THRESHOLD {
                log.pop_front();
            }
        }
        PublishOutcome::Appended(ingest_id)
    }

    /// `publish_batch(events) -> per-event result` (spec §4.3).
    pub async fn publish_batch(&self, events: Vec<CanonicalEvent>) -> Vec<PublishOutcome> {
        let mut out = Vec::with_capacity(events.len());
        for event in events {
            out.push(self.publish(event).await);
        }
        out
    }

    /// `consume(consumer_name, max_count, block_timeout) -> envelopes` (spec
    /// §4.3): delivers previously-released stale deliveries first, then
    /// never-yet-delivered log entries in offset order, blocking up to
    /// `block_timeout` for at least one message.
    pub async fn consume(
        &self,
        consumer_name: &str,
        max_count: usize,
        block_timeout: StdDuration,
    ) -> Vec<Envelope> {
        let deadline = tokio::time::Instant::now() + block_timeout;
        loop {
            let out = self.try_consume(consumer_name, max_count).await;
            if !out.is_empty() || tokio::time::Instant::now() >= deadline {
                return out;
            }
            tokio::time::sleep(StdDuration::from_millis(20)).await;
        }
    }

    async fn try_consume(&self, consumer_name: &str, max_count: usize) -> Vec<Envelope> {
        let now = Utc::now();
        let mut out = Vec::new();

        for mut entry in self.pending.iter_mut() {
            if out.len() >= max_count {
                break;
            }
            if !entry.owned {
                entry.owner = consumer_name.to_string();
                entry.owned = true;
                entry.claimed_at = now;
                out.push(Envelope {
                    ingest_id: *entry.key(),
                    event: entry.event.clone(),
                    ingested_at: entry.ingested_at,
                    redelivery_count: entry.redelivery_count,
                });
            }
        }

        if out.len() < max_count {
            let log = self.log.read().await;
            let mut cursor = self.cursor.load(Ordering::SeqCst);
            for record in log.iter().filter(|r| r.offset >= cursor) {
                if out.len() >= max_count {
                    break;
                }
                self.pending.insert(
                    record.ingest_id,
                    Pending {
                        event: record.event.clone(),
                        ingested_at: record.ingested_at,
                        owner: consumer_name.to_string(),
                        claimed_at: now,
                        redelivery_count: 0,
                        owned: true,
                    },
                );
                out.push(Envelope {
                    ingest_id: record.ingest_id,
                    event: record.event.clone(),
                    ingested_at: record.ingested_at,
                    redelivery_count: 0,
                });
                cursor = record.offset + 1;
            }
            self.cursor.store(cursor, Ordering::SeqCst);
        }

        out
    }

    /// `ack(ingest_id)` (spec §4.3): removes the delivery from the pending
    /// set.
    pub fn ack(&self, ingest_id: IngestId) -> Result<(), IngestError> {
        self.pending
            .remove(&ingest_id)
            .map(|_| ())
            .ok_or(IngestError::NotPending(ingest_id))
    }

    /// `claim_stale(consumer_name, min_idle_ms) -> count` (spec §4.3):
    /// releases deliveries idle longer than `min_idle_ms`, making them
    /// eligible for the next `consume` call.
    pub fn claim_stale(&self, consumer_name: &str, min_idle_ms: u64) -> usize {
        let now = Utc::now();
        let mut reclaimed = 0usize;
        for mut entry in self.pending.iter_mut() {
            if !entry.owned {
                continue;
            }
            let idle_ms = (now - entry.claimed_at).num_milliseconds().max(0) as u64;
            if idle_ms >= min_idle_ms {
                warn!(
                    ingest_id = %entry.key(),
                    previous_owner = %entry.owner,
                    idle_ms,
                    "releasing stale delivery for redelivery"
                );
                entry.owned = false;
                entry.redelivery_count += 1;
                reclaimed += 1;
            }
        }
        let _ = consumer_name;
        reclaimed
    }

    /// `move_to_dlq(ingest_id, reason)` (spec §4.3).
    pub async fn move_to_dlq(&self, ingest_id: IngestId, reason: String) -> Result<(), IngestError> {
        let (_, entry) = self
            .pending
            .remove(&ingest_id)
            .ok_or(IngestError::NotPending(ingest_id))?;
        self.dlq.write().await.push(DlqEntry {
            ingest_id,
            event: entry.event,
            reason,
            moved_at: Utc::now(),
        });
        Ok(())
    }

    /// `replay(start, end, max) -> envelopes` (spec §4.3): read-only, no ack
    /// side effect. `end` is exclusive.
    pub async fn replay(&self, start: u64, end: u64, max: usize) -> Vec<Envelope> {
        let log = self.log.read().await;
        log.iter()
            .filter(|r| r.offset >= start && r.offset < end)
            .take(max)
            .map(|r| Envelope {
                ingest_id: r.ingest_id,
                event: r.event.clone(),
                ingested_at: r.ingested_at,
                redelivery_count: 0,
            })
            .collect()
    }

    /// Snapshot of the dead-letter queue, for operator inspection.
    pub async fn dlq_snapshot(&self) -> Vec<DlqEntry> {
        self.dlq.read().await.clone()
    }

    /// Number of messages currently awaiting ack.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
