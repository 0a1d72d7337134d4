#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **bag-store-memory** – In-memory relational/graph/WAL driver.
//!
//! Grounded on `toka-store-memory`'s `RwLock<HashMap>` + broadcast-channel
//! pattern. Used for tests, development, and as the reference
//! implementation for what `bag-store-postgres`/`bag-store-graph` must
//! behave like.
//!
//! A single [`MemoryStore`] backs *both* the relational and graph traits:
//! since nothing here is actually eventually-consistent, this collapses
//! the dual-write distinction for convenience while still exercising the
//! full call surface.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use bag_store_core::{
    BagFilter, Bottleneck, CurrentLocation, GraphStore, Journey, ReconciliationDebt,
    RelationalStore, SequenceNumber, StorageError, TransactionId, WalEntry, WalEntryState,
    WalOperation, WriteAheadLog,
};
use bag_types::{
    Bag, BagTag, CaseId, CaseStatus, CourierDispatch, CourierDispatchId, ExceptionCase,
    Notification, NotificationChannel, Pir, RiskAssessment, ScanEvent,
};

const NOTIFICATION_DEDUP_WINDOW: Duration = Duration::minutes(10);

/// Default buffer size for the live event broadcast channel.
const DEFAULT_BUFFER: usize = 1024;

#[derive(Default)]
struct Inner {
    bags: HashMap<BagTag, Bag>,
    scans: HashMap<Uuid, ScanEvent>,
    scans_by_bag: HashMap<BagTag, Vec<Uuid>>,
    risk_assessments: HashMap<BagTag, Vec<RiskAssessment>>,
    cases: HashMap<CaseId, ExceptionCase>,
    pirs: HashMap<String, Pir>,
    courier_dispatches: HashMap<CourierDispatchId, CourierDispatch>,
    notification_times: HashMap<(BagTag, String, NotificationChannel), DateTime<Utc>>,
    debts: HashMap<Uuid, ReconciliationDebt>,
    bags_by_flight: HashMap<String, Vec<BagTag>>,
    wal: Vec<WalEntry>,
    next_seq: SequenceNumber,
}

/// An in-memory store implementing [`RelationalStore`], [`GraphStore`], and
/// [`WriteAheadLog`].
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
    broadcast_tx: broadcast::Sender<ScanEvent>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Construct an empty store.
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(DEFAULT_BUFFER);
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
            broadcast_tx,
        }
    }

    /// Subscribe to the live scan-event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.broadcast_tx.subscribe()
    }

    /// Clear all stored state. Useful between test cases.
    pub async fn clear(&self) {
        *self.inner.write().await = Inner::default();
    }
}

#[async_trait]
impl RelationalStore for MemoryStore {
    async fn upsert_bag(&self, bag: &Bag) -> Result<(), StorageError> {
        self.inner.write().await.bags.insert(bag.bag_tag.clone(), bag.clone());
        Ok(())
    }

    async fn get_bag(&self, tag: &BagTag) -> Result<Option<Bag>, StorageError> {
        Ok(self.inner.read().await.bags.get(tag).cloned())
    }

    async fn list_bags(&self, filter: &BagFilter) -> Result<Vec<Bag>, StorageError> {
        let inner = self.inner.read().await;
        let mut bags: Vec<Bag> = inner
            .bags
            .values()
            .filter(|b| filter.status.map(|s| s == b.status).unwrap_or(true))
            .filter(|b| filter.risk_min.map(|m| b.risk_score >= m).unwrap_or(true))
            .filter(|b| filter.risk_max.map(|m| b.risk_score <= m).unwrap_or(true))
            .filter(|b| {
                filter
                    .location
                    .as_ref()
                    .map(|loc| b.current_location.as_deref() == Some(loc.as_str()))
                    .unwrap_or(true)
            })
            .cloned()
            .collect();
        bags.sort_by(|a, b| a.bag_tag.cmp(&b.bag_tag));
        let offset = filter.offset.unwrap_or(0) as usize;
        let bags = bags.into_iter().skip(offset);
        Ok(match filter.limit {
            Some(limit) => bags.take(limit as usize).collect(),
            None => bags.collect(),
        })
    }

    async fn insert_scan_event(&self, event: &ScanEvent) -> Result<bool, StorageError> {
        let mut inner = self.inner.write().await;
        if inner.scans.contains_key(&event.event_id) {
            return Ok(false);
        }
        inner.scans.insert(event.event_id, event.clone());
        inner
            .scans_by_bag
            .entry(event.bag_tag.clone())
            .or_default()
            .push(event.event_id);
        let _ = self.broadcast_tx.send(event.clone());
        Ok(true)
    }

    async fn scan_event_exists(&self, event_id: Uuid) -> Result<bool, StorageError> {
        let inner = self.inner.read().await;
        Ok(inner.scans.contains_key(&event_id))
    }

    async fn scans_for_bag(&self, tag: &BagTag) -> Result<Vec<ScanEvent>, StorageError> {
        let inner = self.inner.read().await;
        let mut scans: Vec<ScanEvent> = inner
            .scans_by_bag
            .get(tag)
            .into_iter()
            .flatten()
            .filter_map(|id| inner.scans.get(id).cloned())
            .collect();
        scans.sort_by_key(|s| s.timestamp);
        Ok(scans)
    }

    async fn insert_risk_assessment(&self, assessment: &RiskAssessment) -> Result<(), StorageError> {
        self.inner
            .write()
            .await
            .risk_assessments
            .entry(assessment.bag_tag.clone())
            .or_default()
            .push(assessment.clone());
        Ok(())
    }

    async fn latest_risk_assessment(
        &self,
        tag: &BagTag,
    ) -> Result<Option<RiskAssessment>, StorageError> {
        Ok(self
            .inner
            .read()
            .await
            .risk_assessments
            .get(tag)
            .and_then(|list| list.iter().max_by_key(|a| a.assessed_at).cloned()))
    }

    async fn open_case(&self, case: &ExceptionCase) -> Result<(), StorageError> {
        self.inner.write().await.cases.insert(case.case_id, case.clone());
        Ok(())
    }

    async fn get_case(&self, case_id: CaseId) -> Result<Option<ExceptionCase>, StorageError> {
        Ok(self.inner.read().await.cases.get(&case_id).cloned())
    }

    async fn open_case_for_bag(&self, tag: &BagTag) -> Result<Option<ExceptionCase>, StorageError> {
        Ok(self
            .inner
            .read()
            .await
            .cases
            .values()
            .find(|c| &c.bag_tag == tag && matches!(c.status, CaseStatus::Open | CaseStatus::InProgress))
            .cloned())
    }

    async fn update_case_status(&self, case_id: CaseId, to: CaseStatus) -> Result<(), StorageError> {
        let mut inner = self.inner.write().await;
        let case = inner
            .cases
            .get_mut(&case_id)
            .ok_or_else(|| StorageError::NotFound(case_id.to_string()))?;
        case.transition(to, Utc::now())
            .map_err(|_| StorageError::InvalidTransition(case_id))
    }

    async fn update_case_priority(
        &self,
        case_id: CaseId,
        priority: bag_types::CasePriority,
    ) -> Result<(), StorageError> {
        let mut inner = self.inner.write().await;
        let case = inner
            .cases
            .get_mut(&case_id)
            .ok_or_else(|| StorageError::NotFound(case_id.to_string()))?;
        case.reprioritize(priority, Utc::now());
        Ok(())
    }

    async fn upsert_pir(&self, pir: &Pir) -> Result<(), StorageError> {
        let mut inner = self.inner.write().await;
        if matches!(pir.status, bag_types::PirStatus::Open) {
            let conflict = inner.pirs.values().any(|existing| {
                existing.bag_tag == pir.bag_tag
                    && existing.pir_number != pir.pir_number
                    && matches!(existing.status, bag_types::PirStatus::Open)
            });
            if conflict {
                return Err(StorageError::DuplicateKey(format!(
                    "bag {} already has an open PIR",
                    pir.bag_tag
                )));
            }
        }
        inner.pirs.insert(pir.pir_number.clone(), pir.clone());
        Ok(())
    }

    async fn open_pir_for_bag(&self, tag: &BagTag) -> Result<Option<Pir>, StorageError> {
        Ok(self
            .inner
            .read()
            .await
            .pirs
            .values()
            .find(|p| &p.bag_tag == tag && matches!(p.status, bag_types::PirStatus::Open))
            .cloned())
    }

    async fn upsert_courier_dispatch(&self, dispatch: &CourierDispatch) -> Result<(), StorageError> {
        self.inner
            .write()
            .await
            .courier_dispatches
            .insert(dispatch.dispatch_id, dispatch.clone());
        Ok(())
    }

    async fn get_courier_dispatch(
        &self,
        dispatch_id: CourierDispatchId,
    ) -> Result<Option<CourierDispatch>, StorageError> {
        Ok(self
            .inner
            .read()
            .await
            .courier_dispatches
            .get(&dispatch_id)
            .cloned())
    }

    async fn insert_notification(&self, notification: &Notification) -> Result<(), StorageError> {
        self.inner.write().await.notification_times.insert(
            (
                notification.bag_tag.clone(),
                notification.template_id.clone(),
                notification.channel,
            ),
            Utc::now(),
        );
        Ok(())
    }

    async fn recent_notification_exists(
        &self,
        tag: &BagTag,
        template_id: &str,
        channel: NotificationChannel,
    ) -> Result<bool, StorageError> {
        let inner = self.inner.read().await;
        let key = (tag.clone(), template_id.to_string(), channel);
        Ok(match inner.notification_times.get(&key) {
            Some(at) => Utc::now() - *at < NOTIFICATION_DEDUP_WINDOW,
            None => false,
        })
    }

    async fn record_debt(&self, debt: &ReconciliationDebt) -> Result<(), StorageError> {
        self.inner.write().await.debts.insert(debt.debt_id, debt.clone());
        Ok(())
    }

    async fn outstanding_debts(&self) -> Result<Vec<ReconciliationDebt>, StorageError> {
        Ok(self.inner.read().await.debts.values().cloned().collect())
    }

    async fn resolve_debt(&self, debt_id: Uuid) -> Result<(), StorageError> {
        self.inner.write().await.debts.remove(&debt_id);
        Ok(())
    }
}

#[async_trait]
impl GraphStore for MemoryStore {
    async fn merge_bag(&self, _bag: &Bag) -> Result<(), StorageError> {
        Ok(())
    }

    async fn merge_scan_event(&self, _event: &ScanEvent) -> Result<(), StorageError> {
        Ok(())
    }

    async fn merge_risk(&self, _assessment: &RiskAssessment) -> Result<(), StorageError> {
        Ok(())
    }

    async fn merge_case(&self, _case: &ExceptionCase) -> Result<(), StorageError> {
        Ok(())
    }

    async fn merge_flight_membership(
        &self,
        tag: &BagTag,
        flight_identifier: &str,
    ) -> Result<(), StorageError> {
        let mut inner = self.inner.write().await;
        let members = inner
            .bags_by_flight
            .entry(flight_identifier.to_string())
            .or_default();
        if !members.contains(tag) {
            members.push(tag.clone());
        }
        Ok(())
    }

    async fn get_journey(&self, tag: &BagTag) -> Result<Option<Journey>, StorageError> {
        let bag = match self.get_bag(tag).await? {
            Some(b) => b,
            None => return Ok(None),
        };
        let scans = self.scans_for_bag(tag).await?;
        Ok(Some(Journey { bag, scans }))
    }

    async fn get_current_location(
        &self,
        tag: &BagTag,
    ) -> Result<Option<CurrentLocation>, StorageError> {
        let bag = match self.get_bag(tag).await? {
            Some(b) => b,
            None => return Ok(None),
        };
        let scans = self.scans_for_bag(tag).await?;
        let last_seen_at = scans.last().map(|s| s.timestamp).unwrap_or(bag.updated_at);
        Ok(bag.current_location.map(|location| CurrentLocation {
            location,
            last_seen_at,
        }))
    }

    async fn get_flight_bags(&self, flight_identifier: &str) -> Result<Vec<Bag>, StorageError> {
        let inner = self.inner.read().await;
        let tags = inner.bags_by_flight.get(flight_identifier).cloned().unwrap_or_default();
        Ok(tags.into_iter().filter_map(|t| inner.bags.get(&t).cloned()).collect())
    }

    async fn identify_bottlenecks(
        &self,
        window_hours: u32,
        min_bags: u32,
    ) -> Result<Vec<Bottleneck>, StorageError> {
        let inner = self.inner.read().await;
        let cutoff = Utc::now() - Duration::hours(window_hours as i64);
        let mut by_location: HashMap<String, Vec<DateTime<Utc>>> = HashMap::new();
        for scan in inner.scans.values() {
            if scan.timestamp >= cutoff {
                by_location.entry(scan.location.clone()).or_default().push(scan.timestamp);
            }
        }
        let mut result: Vec<Bottleneck> = by_location
            .into_iter()
            .filter(|(_, ts)| ts.len() as u32 >= min_bags)
            .map(|(location, mut ts)| {
                ts.sort();
                let dwell = if ts.len() >= 2 {
                    let diffs: Vec<i64> = ts.windows(2).map(|w| (w[1] - w[0]).num_seconds()).collect();
                    median(&diffs)
                } else {
                    0.0
                };
                Bottleneck {
                    location,
                    bag_count: ts.len() as u64,
                    median_dwell_seconds: dwell,
                }
            })
            .collect();
        result.sort_by(|a, b| b.bag_count.cmp(&a.bag_count));
        Ok(result)
    }
}

fn median(values: &[i64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort();
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) as f64 / 2.0
    } else {
        sorted[mid] as f64
    }
}

#[async_trait]
impl WriteAheadLog for MemoryStore {
    async fn begin_transaction(&self) -> Result<TransactionId, StorageError> {
        Ok(Uuid::new_v4())
    }

    async fn write_entry(
        &self,
        transaction_id: TransactionId,
        operation: WalOperation,
    ) -> Result<SequenceNumber, StorageError> {
        let mut inner = self.inner.write().await;
        let sequence = inner.next_seq;
        inner.next_seq += 1;
        inner.wal.push(WalEntry {
            id: Uuid::new_v4(),
            transaction_id,
            sequence,
            timestamp: Utc::now(),
            operation,
            state: WalEntryState::RelationalCommitted,
        });
        Ok(sequence)
    }

    async fn mark_state(
        &self,
        transaction_id: TransactionId,
        sequence: SequenceNumber,
        state: WalEntryState,
    ) -> Result<(), StorageError> {
        let mut inner = self.inner.write().await;
        let entry = inner
            .wal
            .iter_mut()
            .find(|e| e.transaction_id == transaction_id && e.sequence == sequence)
            .ok_or_else(|| StorageError::NotFound(format!("wal entry {transaction_id}/{sequence}")))?;
        entry.state = state;
        Ok(())
    }

    async fn pending_projection(&self) -> Result<Vec<WalEntry>, StorageError> {
        Ok(self
            .inner
            .read()
            .await
            .wal
            .iter()
            .filter(|e| {
                matches!(
                    e.state,
                    WalEntryState::RelationalCommitted | WalEntryState::DebtRecorded
                )
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bag_types::BagStatus;

    fn tag(s: &str) -> BagTag {
        BagTag::new(s).unwrap()
    }

    #[tokio::test]
    async fn scan_insertion_is_idempotent_on_event_id() {
        let store = MemoryStore::new();
        let bag_tag = tag("0000000001");
        let now = Utc::now();
        let event = ScanEvent::new(
            bag_tag.clone(),
            bag_types::ScanType::CheckIn,
            "PTY_CHECKIN_12".into(),
            now,
            vec![],
        );
        assert!(store.insert_scan_event(&event).await.unwrap());
        assert!(!store.insert_scan_event(&event).await.unwrap());
        assert_eq!(store.scans_for_bag(&bag_tag).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn journey_reflects_inserted_scans_in_order() {
        let store = MemoryStore::new();
        let bag_tag = tag("0000000001");
        let now = Utc::now();
        let mut bag = Bag::new(bag_tag.clone(), None, now);
        bag.status = BagStatus::CheckedIn;
        store.upsert_bag(&bag).await.unwrap();

        let e1 = ScanEvent::new(
            bag_tag.clone(),
            bag_types::ScanType::CheckIn,
            "A".into(),
            now,
            vec![],
        );
        let e2 = ScanEvent::new(
            bag_tag.clone(),
            bag_types::ScanType::Sortation,
            "B".into(),
            now + Duration::seconds(30),
            vec![],
        );
        store.insert_scan_event(&e2).await.unwrap();
        store.insert_scan_event(&e1).await.unwrap();

        let journey = store.get_journey(&bag_tag).await.unwrap().unwrap();
        assert_eq!(journey.scans.len(), 2);
        assert!(journey.scans[0].timestamp <= journey.scans[1].timestamp);
    }

    #[tokio::test]
    async fn second_open_pir_for_same_bag_is_rejected() {
        let store = MemoryStore::new();
        let bag_tag = tag("0000000001");
        let pir1 = Pir {
            pir_number: "PIR1".into(),
            bag_tag: bag_tag.clone(),
            pir_type: bag_types::PirType::Ohd,
            status: bag_types::PirStatus::Open,
            filed_at: Utc::now(),
            last_known_location: None,
            description: "lost".into(),
        };
        let mut pir2 = pir1.clone();
        pir2.pir_number = "PIR2".into();

        store.upsert_pir(&pir1).await.unwrap();
        assert!(store.upsert_pir(&pir2).await.is_err());
    }
}
