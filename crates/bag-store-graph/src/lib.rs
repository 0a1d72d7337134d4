#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **bag-store-graph** – Embedded [`GraphStore`] driver, plus the narrow
//! contract a networked graph database (Neo4j, etc.) must satisfy.
//!
//! Grounded on `toka-store-sled`'s tree-per-kind layout: one sled
//! [`sled::Tree`] per node kind, keyed by the entity's natural id, with a
//! secondary `flight_membership` tree holding the `ON_FLIGHT` edge index.
//! Used when no networked graph database is configured (spec §9 — the
//! graph store is an optional acceleration layer, not a hard dependency).

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sled::{Db, Tree};
use tokio::sync::broadcast;

use bag_store_core::{Bottleneck, CurrentLocation, GraphStore, Journey, StorageError};
use bag_types::{Bag, BagTag, ExceptionCase, RiskAssessment, ScanEvent};

/// Default broadcast channel size for the live scan-event stream.
const DEFAULT_BROADCAST_SIZE: usize = 1024;

/// An embedded, sled-backed [`GraphStore`] implementation.
pub struct SledGraphStore {
    _db: Db,
    bags: Tree,
    scans: Tree,
    scans_by_bag: Tree,
    risk: Tree,
    cases_by_bag: Tree,
    flight_membership: Tree,
    broadcast_tx: broadcast::Sender<ScanEvent>,
}

impl SledGraphStore {
    /// Open or create a sled database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::Config::default()
            .path(path)
            .open()
            .map_err(sled_err)?;
        Self::from_db(db)
    }

    /// Open a temporary, process-local sled database, useful for tests.
    pub fn temporary() -> Result<Self, StorageError> {
        let db = sled::Config::new().temporary(true).open().map_err(sled_err)?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> Result<Self, StorageError> {
        let bags = db.open_tree("bags").map_err(sled_err)?;
        let scans = db.open_tree("scans").map_err(sled_err)?;
        let scans_by_bag = db.open_tree("scans_by_bag").map_err(sled_err)?;
        let risk = db.open_tree("risk").map_err(sled_err)?;
        let cases_by_bag = db.open_tree("cases_by_bag").map_err(sled_err)?;
        let flight_membership = db.open_tree("flight_membership").map_err(sled_err)?;
        let (broadcast_tx, _) = broadcast::channel(DEFAULT_BROADCAST_SIZE);
        Ok(Self {
            _db: db,
            bags,
            scans,
            scans_by_bag,
            risk,
            cases_by_bag,
            flight_membership,
            broadcast_tx,
        })
    }

    /// Subscribe to the live scan-event stream merged into the graph.
    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.broadcast_tx.subscribe()
    }

    /// Flush all pending writes to disk.
    pub async fn flush(&self) -> Result<(), StorageError> {
        self.bags.flush_async().await.map_err(sled_err)?;
        self.scans.flush_async().await.map_err(sled_err)?;
        self.scans_by_bag.flush_async().await.map_err(sled_err)?;
        self.risk.flush_async().await.map_err(sled_err)?;
        self.cases_by_bag.flush_async().await.map_err(sled_err)?;
        self.flight_membership.flush_async().await.map_err(sled_err)?;
        Ok(())
    }
}

fn sled_err(e: sled::Error) -> StorageError {
    StorageError::Backend(e.to_string())
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    rmp_serde::to_vec_named(value).map_err(|e| StorageError::Backend(e.to_string()))
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
    rmp_serde::from_slice(bytes).map_err(|e| StorageError::Backend(e.to_string()))
}

#[async_trait]
impl GraphStore for SledGraphStore {
    async fn merge_bag(&self, bag: &Bag) -> Result<(), StorageError> {
        let bytes = encode(bag)?;
        self.bags.insert(bag.bag_tag.as_str(), bytes).map_err(sled_err)?;
        Ok(())
    }

    async fn merge_scan_event(&self, event: &ScanEvent) -> Result<(), StorageError> {
        let bytes = encode(event)?;
        self.scans
            .insert(event.event_id.as_bytes(), bytes)
            .map_err(sled_err)?;

        let key = event.bag_tag.as_str();
        let mut ids: Vec<uuid::Uuid> = match self.scans_by_bag.get(key).map_err(sled_err)? {
            Some(bytes) => decode(&bytes)?,
            None => Vec::new(),
        };
        if !ids.contains(&event.event_id) {
            ids.push(event.event_id);
        }
        let bytes = encode(&ids)?;
        self.scans_by_bag.insert(key, bytes).map_err(sled_err)?;

        let _ = self.broadcast_tx.send(event.clone());
        Ok(())
    }

    async fn merge_risk(&self, assessment: &RiskAssessment) -> Result<(), StorageError> {
        let bytes = encode(assessment)?;
        self.risk
            .insert(assessment.bag_tag.as_str(), bytes)
            .map_err(sled_err)?;
        Ok(())
    }

    async fn merge_case(&self, case: &ExceptionCase) -> Result<(), StorageError> {
        let bytes = encode(case)?;
        self.cases_by_bag
            .insert(case.bag_tag.as_str(), bytes)
            .map_err(sled_err)?;
        Ok(())
    }

    async fn merge_flight_membership(
        &self,
        tag: &BagTag,
        flight_identifier: &str,
    ) -> Result<(), StorageError> {
        let mut tags: Vec<BagTag> = match self
            .flight_membership
            .get(flight_identifier)
            .map_err(sled_err)?
        {
            Some(bytes) => decode(&bytes)?,
            None => Vec::new(),
        };
        if !tags.contains(tag) {
            tags.push(tag.clone());
        }
        let bytes = encode(&tags)?;
        self.flight_membership
            .insert(flight_identifier, bytes)
            .map_err(sled_err)?;
        Ok(())
    }

    async fn get_journey(&self, tag: &BagTag) -> Result<Option<Journey>, StorageError> {
        let bag: Bag = match self.bags.get(tag.as_str()).map_err(sled_err)? {
            Some(bytes) => decode(&bytes)?,
            None => return Ok(None),
        };
        let ids: Vec<uuid::Uuid> = match self.scans_by_bag.get(tag.as_str()).map_err(sled_err)? {
            Some(bytes) => decode(&bytes)?,
            None => Vec::new(),
        };
        let mut scans = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(bytes) = self.scans.get(id.as_bytes()).map_err(sled_err)? {
                scans.push(decode::<ScanEvent>(&bytes)?);
            }
        }
        scans.sort_by_key(|s| s.timestamp);
        Ok(Some(Journey { bag, scans }))
    }

    async fn get_current_location(
        &self,
        tag: &BagTag,
    ) -> Result<Option<CurrentLocation>, StorageError> {
        let journey = match self.get_journey(tag).await? {
            Some(j) => j,
            None => return Ok(None),
        };
        let last_seen_at = journey
            .scans
            .last()
            .map(|s| s.timestamp)
            .unwrap_or(journey.bag.updated_at);
        Ok(journey.bag.current_location.map(|location| CurrentLocation {
            location,
            last_seen_at,
        }))
    }

    async fn get_flight_bags(&self, flight_identifier: &str) -> Result<Vec<Bag>, StorageError> {
        let tags: Vec<BagTag> = match self
            .flight_membership
            .get(flight_identifier)
            .map_err(sled_err)?
        {
            Some(bytes) => decode(&bytes)?,
            None => return Ok(Vec::new()),
        };
        let mut bags = Vec::with_capacity(tags.len());
        for tag in tags {
            if let Some(bytes) = self.bags.get(tag.as_str()).map_err(sled_err)? {
                bags.push(decode::<Bag>(&bytes)?);
            }
        }
        Ok(bags)
    }

    async fn identify_bottlenecks(
        &self,
        window_hours: u32,
        min_bags: u32,
    ) -> Result<Vec<Bottleneck>, StorageError> {
        let cutoff = Utc::now() - Duration::hours(window_hours as i64);
        let mut by_location: std::collections::HashMap<String, Vec<DateTime<Utc>>> =
            std::collections::HashMap::new();

        for entry in self.scans.iter() {
            let (_, bytes) = entry.map_err(sled_err)?;
            let event: ScanEvent = decode(&bytes)?;
            if event.timestamp >= cutoff {
                by_location.entry(event.location).or_default().push(event.timestamp);
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

#[cfg(test)]
mod tests {
    use super::*;
    use bag_types::ScanType;

    fn tag(s: &str) -> BagTag {
        BagTag::new(s).unwrap()
    }

    #[tokio::test]
    async fn merge_and_journey_round_trip() {
        let store = SledGraphStore::temporary().unwrap();
        let t = tag("0000000001");
        let now = Utc::now();
        let bag = Bag::new(t.clone(), Some("PTY_CHECKIN_12".into()), now);
        store.merge_bag(&bag).await.unwrap();

        let event = ScanEvent::new(t.clone(), ScanType::CheckIn, "PTY_CHECKIN_12".into(), now, vec![]);
        store.merge_scan_event(&event).await.unwrap();

        let journey = store.get_journey(&t).await.unwrap().unwrap();
        assert_eq!(journey.scans.len(), 1);
        assert_eq!(journey.bag.bag_tag, t);
    }

    #[tokio::test]
    async fn flight_membership_accumulates_distinct_bags() {
        let store = SledGraphStore::temporary().unwrap();
        let t1 = tag("0000000001");
        let t2 = tag("0000000002");
        store.merge_flight_membership(&t1, "CM202").await.unwrap();
        store.merge_flight_membership(&t2, "CM202").await.unwrap();
        store.merge_flight_membership(&t1, "CM202").await.unwrap();

        let bag1 = Bag::new(t1.clone(), None, Utc::now());
        let bag2 = Bag::new(t2.clone(), None, Utc::now());
        store.merge_bag(&bag1).await.unwrap();
        store.merge_bag(&bag2).await.unwrap();

        let bags = store.get_flight_bags("CM202").await.unwrap();
        assert_eq!(bags.len(), 2);
    }

    #[tokio::test]
    async fn unknown_bag_journey_is_none() {
        let store = SledGraphStore::temporary().unwrap();
        assert!(store.get_journey(&tag("0000000009")).await.unwrap().is_none());
    }
}
