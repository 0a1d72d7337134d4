//! External capability contracts (spec §6): the trait boundary between the
//! platform core and systems it does not own — the PIR system of record, the
//! courier network, outbound notification channels, and an LLM/agent
//! reasoning backend.
//!
//! Each trait is paired with a dependency-free default implementation
//! (log-backed or in-memory) suitable for tests and for running the
//! platform without any of those systems wired up. Transport (HTTP, gRPC,
//! message queues) is deliberately out of scope here: adapters are contracts
//! plus local defaults, and a deployment wires a real implementation in.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

use async_trait::async_trait;
use bag_types::{
    BagTag, CourierDispatchId, CourierDispatchStatus, Notification, NotificationChannel, Pir,
    PirStatus, PirType,
};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// Failure returned by an adapter implementation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AdapterError {
    /// The downstream system could not be reached or timed out.
    #[error("adapter unavailable: {0}")]
    Unavailable(String),
    /// The downstream system reached us but rejected the request.
    #[error("adapter rejected request: {0}")]
    Rejected(String),
    /// The referenced record does not exist.
    #[error("not found: {0}")]
    NotFound(String),
}

impl AdapterError {
    /// Whether this error should be retried with backoff (spec §7
    /// "Transient"); `Rejected`/`NotFound` are permanent.
    pub fn is_transient(&self) -> bool {
        matches!(self, AdapterError::Unavailable(_))
    }
}

/// Request to file a new PIR with the system of record.
#[derive(Debug, Clone)]
pub struct PirFilingRequest {
    /// Bag the report concerns.
    pub bag_tag: BagTag,
    /// Subtype of the report.
    pub pir_type: PirType,
    /// Free-text description.
    pub description: String,
    /// Last known physical location, if any.
    pub last_known_location: Option<String>,
}

/// Partial update applied to an existing PIR.
#[derive(Debug, Clone, Default)]
pub struct PirPatch {
    /// New status, if changing.
    pub status: Option<PirStatus>,
    /// New last-known location, if changing.
    pub last_known_location: Option<String>,
}

/// Search criteria for locating PIRs in the system of record.
#[derive(Debug, Clone, Default)]
pub struct PirSearchCriteria {
    /// Restrict to a specific bag.
    pub bag_tag: Option<BagTag>,
    /// Restrict to a specific status.
    pub status: Option<PirStatus>,
}

/// The Property Irregularity Report system of record (spec §6).
///
/// `file` and `update` return once the downstream system has durably
/// accepted the request; callers should treat `AdapterError::Unavailable`
/// as retryable and anything else as terminal.
#[async_trait]
pub trait PirService: Send + Sync {
    /// File a new PIR, returning the system-of-record's `pir_number`.
    async fn file(&self, request: PirFilingRequest) -> Result<String, AdapterError>;

    /// Apply a partial update to an existing PIR.
    async fn update(&self, pir_number: &str, patch: PirPatch) -> Result<(), AdapterError>;

    /// Search for PIRs matching the given criteria.
    async fn search(&self, criteria: PirSearchCriteria) -> Result<Vec<Pir>, AdapterError>;
}

/// Request to book a courier for a mishandled-bag delivery.
#[derive(Debug, Clone)]
pub struct CourierBookingRequest {
    /// Bag to deliver.
    pub bag_tag: BagTag,
    /// Delivery address.
    pub destination_address: String,
    /// Estimated cost, used against the approval-threshold check upstream.
    pub cost_estimate: f64,
}

/// The external courier network (spec §6).
#[async_trait]
pub trait CourierService: Send + Sync {
    /// Book a courier dispatch, returning its id.
    async fn book(&self, request: CourierBookingRequest) -> Result<CourierDispatchId, AdapterError>;

    /// Query the current status of a previously booked dispatch.
    async fn status(&self, dispatch_id: CourierDispatchId) -> Result<CourierDispatchStatus, AdapterError>;
}

/// An outbound notification channel (spec §6): SMS, email, push.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Send a rendered message to a recipient over a channel, returning a
    /// delivery id on success.
    async fn send(
        &self,
        channel: NotificationChannel,
        recipient: &str,
        rendered_message: &str,
    ) -> Result<String, AdapterError>;
}

/// Outcome of a reasoning/agent evaluation (spec §4.6's Agent capability
/// interface). The spec leaves the internals of reasoning opaque; this is
/// the minimal shape callers need to act on a decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Proceed with the proposed action.
    Proceed,
    /// Skip the proposed action; no error, just a no-op.
    Skip,
    /// Decline the action, with a reason.
    Fail(String),
    /// Hold the action until some named event occurs.
    Defer(String),
}

/// Context handed to a [`ReasoningCapability`] for evaluation. Deliberately
/// a thin bag of strings: the spec does not prescribe what a reasoning
/// backend consumes, only that it returns a [`Decision`].
#[derive(Debug, Clone, Default)]
pub struct ReasoningContext {
    /// Free-form key/value context (e.g. bag_tag, proposed action, risk
    /// score) serialized by the caller.
    pub fields: Vec<(String, String)>,
}

impl ReasoningContext {
    /// Build a context from owned key/value pairs.
    pub fn new(fields: Vec<(String, String)>) -> Self {
        Self { fields }
    }
}

/// A pluggable reasoning/LLM backend (spec §6): `evaluate(context) ->
/// Decision`. Internals are opaque by design.
#[async_trait]
pub trait ReasoningCapability: Send + Sync {
    /// Evaluate the given context and return a decision.
    async fn evaluate(&self, context: ReasoningContext) -> Decision;
}

/// Monotonic id allocator shared by the default adapter implementations,
/// modeled on `decision-gate-broker`'s `ReceiptFactory`.
struct SequentialIds {
    prefix: &'static str,
    counter: AtomicU64,
}

impl SequentialIds {
    fn new(prefix: &'static str) -> Self {
        Self { prefix, counter: AtomicU64::new(1) }
    }

    fn next(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{}-{:06}", self.prefix, n)
    }
}

/// In-memory [`PirService`] default implementation. Suitable for tests and
/// for running the platform without a real PIR system of record wired up.
pub struct InMemoryPirService {
    ids: SequentialIds,
    records: DashMap<String, Pir>,
}

impl Default for InMemoryPirService {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryPirService {
    /// Construct an empty in-memory PIR store.
    pub fn new() -> Self {
        Self { ids: SequentialIds::new("PIR"), records: DashMap::new() }
    }
}

#[async_trait]
impl PirService for InMemoryPirService {
    async fn file(&self, request: PirFilingRequest) -> Result<String, AdapterError> {
        let pir_number = self.ids.next();
        let pir = Pir {
            pir_number: pir_number.clone(),
            bag_tag: request.bag_tag,
            pir_type: request.pir_type,
            status: PirStatus::Open,
            filed_at: chrono::Utc::now(),
            last_known_location: request.last_known_location,
            description: request.description,
        };
        info!(pir_number = %pir_number, bag_tag = %pir.bag_tag, "filed PIR");
        self.records.insert(pir_number.clone(), pir);
        Ok(pir_number)
    }

    async fn update(&self, pir_number: &str, patch: PirPatch) -> Result<(), AdapterError> {
        let mut entry = self
            .records
            .get_mut(pir_number)
            .ok_or_else(|| AdapterError::NotFound(pir_number.to_string()))?;
        if let Some(status) = patch.status {
            entry.status = status;
        }
        if let Some(location) = patch.last_known_location {
            entry.last_known_location = Some(location);
        }
        Ok(())
    }

    async fn search(&self, criteria: PirSearchCriteria) -> Result<Vec<Pir>, AdapterError> {
        Ok(self
            .records
            .iter()
            .filter(|entry| {
                criteria.bag_tag.as_ref().map(|tag| *tag == entry.bag_tag).unwrap_or(true)
                    && criteria.status.map(|status| status == entry.status).unwrap_or(true)
            })
            .map(|entry| entry.value().clone())
            .collect())
    }
}

/// In-memory [`CourierService`] default implementation. Bookings are
/// accepted immediately and settle at whatever status [`CourierDispatch`]
/// assigns them at construction time.
pub struct InMemoryCourierService {
    dispatches: DashMap<CourierDispatchId, CourierDispatchStatus>,
}

impl Default for InMemoryCourierService {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCourierService {
    /// Construct an empty in-memory courier dispatch store.
    pub fn new() -> Self {
        Self { dispatches: DashMap::new() }
    }
}

#[async_trait]
impl CourierService for InMemoryCourierService {
    async fn book(&self, request: CourierBookingRequest) -> Result<CourierDispatchId, AdapterError> {
        let dispatch = bag_types::CourierDispatch::new(
            request.bag_tag,
            request.destination_address,
            request.cost_estimate,
            false,
        );
        info!(dispatch_id = %dispatch.dispatch_id, "booked courier dispatch");
        self.dispatches.insert(dispatch.dispatch_id, dispatch.status);
        Ok(dispatch.dispatch_id)
    }

    async fn status(&self, dispatch_id: CourierDispatchId) -> Result<CourierDispatchStatus, AdapterError> {
        self.dispatches
            .get(&dispatch_id)
            .map(|entry| *entry.value())
            .ok_or_else(|| AdapterError::NotFound(dispatch_id.to_string()))
    }
}

/// [`NotificationSink`] that logs every send at `info` and always succeeds,
/// modeled on `decision-gate-broker`'s log sink: the default/dev
/// implementation used when no real channel is configured.
pub struct LogNotificationSink {
    ids: SequentialIds,
}

impl Default for LogNotificationSink {
    fn default() -> Self {
        Self::new()
    }
}

impl LogNotificationSink {
    /// Construct a log-backed sink.
    pub fn new() -> Self {
        Self { ids: SequentialIds::new("DLV") }
    }
}

#[async_trait]
impl NotificationSink for LogNotificationSink {
    async fn send(
        &self,
        channel: NotificationChannel,
        recipient: &str,
        rendered_message: &str,
    ) -> Result<String, AdapterError> {
        let delivery_id = self.ids.next();
        info!(
            delivery_id = %delivery_id,
            ?channel,
            recipient,
            rendered_message,
            "sent notification"
        );
        Ok(delivery_id)
    }
}

/// [`ReasoningCapability`] default that always proceeds. Stands in for a
/// real reasoning/LLM backend in tests and in deployments that haven't
/// wired one up; since the spec leaves reasoning opaque, "always proceed"
/// is the simplest policy that satisfies the contract.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysProceedReasoning;

#[async_trait]
impl ReasoningCapability for AlwaysProceedReasoning {
    async fn evaluate(&self, _context: ReasoningContext) -> Decision {
        Decision::Proceed
    }
}

/// Build a queued [`Notification`] ready for a [`NotificationSink`]. Kept
/// here (rather than in `bag-types`) since dedup-window bookkeeping is an
/// adapter-layer concern, not part of the entity itself.
pub fn queue_notification(
    bag_tag: BagTag,
    channel: NotificationChannel,
    recipient: impl Into<String>,
    template_id: impl Into<String>,
) -> Notification {
    Notification::new(bag_tag, channel, recipient, template_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bag_types::BagTag;

    fn tag() -> BagTag {
        BagTag::new("0012345678").unwrap()
    }

    #[tokio::test]
    async fn pir_file_then_search_round_trips() {
        let svc = InMemoryPirService::new();
        let pir_number = svc
            .file(PirFilingRequest {
                bag_tag: tag(),
                pir_type: PirType::Ohd,
                description: "unmatched bag at carousel 4".into(),
                last_known_location: Some("T1-C4".into()),
            })
            .await
            .unwrap();

        let found = svc
            .search(PirSearchCriteria { bag_tag: Some(tag()), status: None })
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].pir_number, pir_number);
        assert_eq!(found[0].status, PirStatus::Open);
    }

    #[tokio::test]
    async fn pir_update_changes_status() {
        let svc = InMemoryPirService::new();
        let pir_number = svc
            .file(PirFilingRequest {
                bag_tag: tag(),
                pir_type: PirType::Pir,
                description: "irregular".into(),
                last_known_location: None,
            })
            .await
            .unwrap();

        svc.update(&pir_number, PirPatch { status: Some(PirStatus::Closed), last_known_location: None })
            .await
            .unwrap();

        let found = svc
            .search(PirSearchCriteria { bag_tag: None, status: Some(PirStatus::Closed) })
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn pir_update_unknown_number_fails() {
        let svc = InMemoryPirService::new();
        let err = svc.update("PIR-999999", PirPatch::default()).await.unwrap_err();
        assert!(matches!(err, AdapterError::NotFound(_)));
    }

    #[tokio::test]
    async fn courier_book_then_status_round_trips() {
        let svc = InMemoryCourierService::new();
        let id = svc
            .book(CourierBookingRequest {
                bag_tag: tag(),
                destination_address: "221B Baker St".into(),
                cost_estimate: 40.0,
            })
            .await
            .unwrap();

        let status = svc.status(id).await.unwrap();
        assert_eq!(status, CourierDispatchStatus::Booked);
    }

    #[tokio::test]
    async fn notification_sink_returns_delivery_id() {
        let sink = LogNotificationSink::new();
        let id = sink.send(NotificationChannel::Sms, "+15551234567", "your bag is on its way").await.unwrap();
        assert!(id.starts_with("DLV-"));
    }

    #[tokio::test]
    async fn reasoning_default_always_proceeds() {
        let reasoning = AlwaysProceedReasoning;
        let decision = reasoning.evaluate(ReasoningContext::default()).await;
        assert_eq!(decision, Decision::Proceed);
    }
}
