//! The `GraphStore` capability contract (spec §6), the eventually
//! consistent projection per spec §4.5.

use async_trait::async_trait;
use bag_types::{Bag, BagTag, ExceptionCase, RiskAssessment, ScanEvent};

use crate::{Bottleneck, CurrentLocation, Journey, StorageError};

/// Read-mostly graph projection of the relational store (spec §4.5).
///
/// Mutations flow only through the merge methods, always called by the
/// Dual-Write Coordinator after the corresponding relational commit;
/// traversal/query methods are read-only (spec §3 "Graph projection
/// invariants").
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Merge a `Baggage` node for `bag`.
    async fn merge_bag(&self, bag: &Bag) -> Result<(), StorageError>;

    /// Merge a `ScanEvent` node and its `SCANNED_AT` edge.
    async fn merge_scan_event(&self, event: &ScanEvent) -> Result<(), StorageError>;

    /// Merge a `Risk` node and its `HAS_RISK` edge.
    async fn merge_risk(&self, assessment: &RiskAssessment) -> Result<(), StorageError>;

    /// Merge an `Exception` node and its `HAS_EXCEPTION` edge.
    async fn merge_case(&self, case: &ExceptionCase) -> Result<(), StorageError>;

    /// Merge an `ON_FLIGHT` edge associating `tag` with `flight_identifier`,
    /// observed from a `load`/`transfer`/`manifest_load` event.
    async fn merge_flight_membership(
        &self,
        tag: &BagTag,
        flight_identifier: &str,
    ) -> Result<(), StorageError>;

    /// `get_journey(bag_tag)` — target p95 < 100ms.
    async fn get_journey(&self, tag: &BagTag) -> Result<Option<Journey>, StorageError>;

    /// `get_current_location(bag_tag)` — target p95 < 50ms.
    async fn get_current_location(
        &self,
        tag: &BagTag,
    ) -> Result<Option<CurrentLocation>, StorageError>;

    /// `get_flight_bags(flight_identifier)` — target p95 < 200ms.
    async fn get_flight_bags(&self, flight_identifier: &str) -> Result<Vec<Bag>, StorageError>;

    /// `identify_bottlenecks(window_hours, min_bags)` — target p95 < 500ms.
    async fn identify_bottlenecks(
        &self,
        window_hours: u32,
        min_bags: u32,
    ) -> Result<Vec<Bottleneck>, StorageError>;
}
