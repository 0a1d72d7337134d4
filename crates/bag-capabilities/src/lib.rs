//! The agent capability interface (spec §4.6) and the concrete capabilities
//! implementing each step of the per-event workflow: risk-evaluate,
//! open-or-update-case, file-PIR, request-courier (plus its approval-gate
//! resumption), and notify.
//!
//! Every capability is `evaluate(context) -> Decision` followed by
//! `apply(decision, bag) -> effects`; effects are plain data describing an
//! intended state change, never a direct mutation. `bag-orchestrator` is the
//! only caller that turns effects into writes, funnelling them through the
//! Dual-Write Coordinator or a `NotificationSink`. A capability that talks to
//! an external system (PIR, courier, reasoning) does so itself during
//! `apply`, via an adapter it owns — the orchestrator never invokes those
//! services directly.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

use async_trait::async_trait;
pub use bag_adapters::Decision;
use bag_adapters::{
    AdapterError, CourierBookingRequest, CourierService, NotificationSink, PirFilingRequest,
    PirService,
};
use bag_store_core::{RelationalStore, StorageError};
use bag_types::{
    Bag, BagStatus, BagTag, CaseId, CasePriority, CourierDispatch, CourierDispatchId,
    CourierDispatchStatus, ExceptionCase, Notification, NotificationChannel, Pir, PirType,
    RiskAssessment, RiskLevel, ScanEvent,
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use tracing::{debug, info};

/// Failure returned from a capability's `apply` step.
#[derive(Debug, thiserror::Error)]
pub enum CapabilityError {
    /// The external adapter backing this capability failed.
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    /// `apply` was called with a `Decision` that capability does not act on
    /// (e.g. `apply(Decision::Skip, ...)` — callers should check `evaluate`'s
    /// result before calling `apply`).
    #[error("capability received a decision it does not act on: {0:?}")]
    UnexpectedDecision(Decision),
    /// A relational store lookup failed while a capability was checking its
    /// own state before acting (e.g. the notification dedup check).
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// The idempotency key a capability declares for a given invocation (spec
/// §4.6: `(bag_tag, step, event_id)`), used by the orchestrator's retry loop
/// to re-run the same key rather than double-apply a step.
pub fn idempotency_key(bag_tag: &BagTag, step: &str, event_id: uuid::Uuid) -> String {
    format!("{bag_tag}:{step}:{event_id}")
}

/// A state change produced by a capability's `apply`. Plain data: applying
/// an effect is the orchestrator's job.
#[derive(Debug, Clone)]
pub enum Effect {
    /// A new risk snapshot to persist.
    RiskAssessed(RiskAssessment),
    /// A new exception case to persist.
    CaseOpened(ExceptionCase),
    /// An already-open case's priority was recomputed.
    CaseUpdated {
        /// The case being updated.
        case_id: CaseId,
        /// Its newly computed priority.
        to: CasePriority,
    },
    /// A PIR was filed with the external system of record.
    PirFiled(Pir),
    /// A courier dispatch was booked.
    CourierDispatched(CourierDispatch),
    /// A dispatch above the auto-approval threshold needs a human decision.
    ApprovalRequested {
        /// The dispatch awaiting approval.
        dispatch_id: CourierDispatchId,
    },
    /// A courier dispatch's approval was resolved.
    CourierApprovalResolved {
        /// The dispatch being resolved.
        dispatch_id: CourierDispatchId,
        /// Its new status (`booked` or `cancelled`).
        to: CourierDispatchStatus,
        /// Identity of the approver.
        approved_by: String,
    },
    /// A notification is ready to hand to a `NotificationSink`.
    NotificationQueued(Notification, String),
}

/// Context a capability's `evaluate`/`apply` steps are given. Deliberately a
/// flat bag of the facts any step might need, rather than one struct per
/// capability — steps run in sequence over the same underlying event.
#[derive(Debug, Clone)]
pub struct StepContext {
    /// The bag as of just after the triggering event's transition was
    /// recorded.
    pub bag: Bag,
    /// The event that triggered this workflow run.
    pub event: ScanEvent,
    /// Minutes until the bag's next connecting segment, if known.
    pub connection_minutes: Option<u32>,
    /// The bag's currently open case, if any.
    pub open_case: Option<ExceptionCase>,
    /// Estimated compensation exposure if this bag is not recovered in time,
    /// used by the courier cost-benefit check.
    pub potential_compensation: Option<f64>,
    /// Passenger notification targets as `(channel, recipient)` pairs,
    /// sourced from passenger preferences (outside this crate's scope).
    pub notification_targets: Vec<(NotificationChannel, String)>,
}

/// One implementation of the spec §4.6 agent capability interface: a single
/// workflow step that can be asked for a decision and then, separately,
/// asked to act on it.
#[async_trait]
pub trait AgentCapability: Send + Sync {
    /// Stable step name used to build the idempotency key.
    fn step(&self) -> &'static str;

    /// Decide whether (and how) this step should run for the given context.
    async fn evaluate(&self, context: &StepContext) -> Decision;

    /// Act on a prior `evaluate` decision, returning the effects to persist.
    async fn apply(&self, decision: Decision, context: &StepContext) -> Result<Vec<Effect>, CapabilityError>;
}

/// Step 1: risk-evaluate. Unconditional — every event recomputes risk.
pub struct RiskScoreCapability;

#[async_trait]
impl AgentCapability for RiskScoreCapability {
    fn step(&self) -> &'static str {
        "risk-evaluate"
    }

    async fn evaluate(&self, _context: &StepContext) -> Decision {
        Decision::Proceed
    }

    async fn apply(&self, decision: Decision, context: &StepContext) -> Result<Vec<Effect>, CapabilityError> {
        if decision != Decision::Proceed {
            return Err(CapabilityError::UnexpectedDecision(decision));
        }
        let assessment = bag_risk::assess(
            context.bag.bag_tag.clone(),
            bag_risk::RiskInput {
                status: context.bag.status,
                current_location: context.bag.current_location.as_deref(),
                connection_minutes: context.connection_minutes,
            },
            context.event.timestamp,
        );
        Ok(vec![Effect::RiskAssessed(assessment)])
    }
}

/// Deadline given to a case before it escalates, by priority.
fn sla_window(priority: CasePriority) -> ChronoDuration {
    match priority {
        CasePriority::P0 => ChronoDuration::hours(2),
        CasePriority::P1 => ChronoDuration::hours(8),
        CasePriority::P2 => ChronoDuration::hours(24),
        CasePriority::P3 => ChronoDuration::hours(72),
    }
}

fn priority_for_level(level: RiskLevel, is_anomaly: bool) -> CasePriority {
    if is_anomaly {
        return CasePriority::P0;
    }
    match level {
        RiskLevel::Critical => CasePriority::P0,
        RiskLevel::High => CasePriority::P1,
        RiskLevel::Medium => CasePriority::P2,
        RiskLevel::Low => CasePriority::P3,
    }
}

/// Step 2: open-or-update-case. Runs when risk is high/critical or the
/// triggering event is an anomaly; one open case per bag.
pub struct ExceptionCaseCapability;

#[async_trait]
impl AgentCapability for ExceptionCaseCapability {
    fn step(&self) -> &'static str {
        "open-or-update-case"
    }

    async fn evaluate(&self, context: &StepContext) -> Decision {
        let is_anomaly = matches!(context.event.scan_type, bag_types::ScanType::Anomaly);
        let elevated = context.bag.risk_score >= 0.6;
        if elevated || is_anomaly {
            Decision::Proceed
        } else {
            Decision::Skip
        }
    }

    async fn apply(&self, decision: Decision, context: &StepContext) -> Result<Vec<Effect>, CapabilityError> {
        if decision != Decision::Proceed {
            return Err(CapabilityError::UnexpectedDecision(decision));
        }
        let is_anomaly = matches!(context.event.scan_type, bag_types::ScanType::Anomaly);
        let level = bag_risk::level_for_score(context.bag.risk_score);
        let priority = priority_for_level(level, is_anomaly);
        let at = context.event.timestamp;

        if let Some(existing) = &context.open_case {
            if existing.priority != priority {
                debug!(case_id = %existing.case_id, from = ?existing.priority, to = ?priority, "case priority recomputed");
                return Ok(vec![Effect::CaseUpdated { case_id: existing.case_id, to: priority }]);
            }
            return Ok(Vec::new());
        }

        let case_type = if is_anomaly { "anomaly" } else { "high_risk" };
        let case = ExceptionCase::open(context.bag.bag_tag.clone(), case_type, priority, at + sla_window(priority), at);
        info!(case_id = %case.case_id, bag_tag = %context.bag.bag_tag, ?priority, "opening exception case");
        Ok(vec![Effect::CaseOpened(case)])
    }
}

/// Step 3: file-PIR. Runs for P0/P1 cases on a now-mishandled bag.
pub struct WorldTracerCapability {
    pir_service: Arc<dyn PirService>,
}

impl WorldTracerCapability {
    /// Construct a capability backed by the given PIR system-of-record
    /// adapter.
    pub fn new(pir_service: Arc<dyn PirService>) -> Self {
        Self { pir_service }
    }
}

#[async_trait]
impl AgentCapability for WorldTracerCapability {
    fn step(&self) -> &'static str {
        "file-pir"
    }

    async fn evaluate(&self, context: &StepContext) -> Decision {
        let mishandled = context.bag.status == BagStatus::Mishandled;
        let urgent_case = context
            .open_case
            .as_ref()
            .map(|case| matches!(case.priority, CasePriority::P0 | CasePriority::P1))
            .unwrap_or(false);
        if mishandled && urgent_case {
            Decision::Proceed
        } else {
            Decision::Skip
        }
    }

    async fn apply(&self, decision: Decision, context: &StepContext) -> Result<Vec<Effect>, CapabilityError> {
        if decision != Decision::Proceed {
            return Err(CapabilityError::UnexpectedDecision(decision));
        }
        let request = PirFilingRequest {
            bag_tag: context.bag.bag_tag.clone(),
            pir_type: PirType::Ohd,
            description: format!("bag mishandled at {}", context.event.location),
            last_known_location: context.bag.current_location.clone(),
        };
        let pir_number = self.pir_service.file(request).await?;
        let pir = Pir {
            pir_number,
            bag_tag: context.bag.bag_tag.clone(),
            pir_type: PirType::Ohd,
            status: bag_types::PirStatus::Open,
            filed_at: context.event.timestamp,
            last_known_location: context.bag.current_location.clone(),
            description: format!("bag mishandled at {}", context.event.location),
        };
        info!(pir_number = %pir.pir_number, bag_tag = %context.bag.bag_tag, "filed PIR");
        Ok(vec![Effect::PirFiled(pir)])
    }
}

/// Step 4: request-courier. Dispatches when the cost-benefit case favors it
/// and no dispatch exists yet for the bag.
pub struct CourierCapability {
    courier_service: Arc<dyn CourierService>,
    auto_dispatch_threshold: f64,
}

impl CourierCapability {
    /// Construct a capability backed by the given courier network adapter,
    /// auto-approving dispatches at or below `auto_dispatch_threshold` cost.
    pub fn new(courier_service: Arc<dyn CourierService>, auto_dispatch_threshold: f64) -> Self {
        Self { courier_service, auto_dispatch_threshold }
    }

    fn favors_dispatch(&self, context: &StepContext, cost_estimate: f64) -> bool {
        context.potential_compensation.map(|value| value > cost_estimate).unwrap_or(false)
    }
}

/// Flat estimate used when no routing/courier pricing model is configured.
/// A real deployment supplies `potential_compensation` and a priced
/// `cost_estimate` via its own courier-pricing integration; this is the
/// fallback so the step still has a number to reason about.
const DEFAULT_COURIER_COST_ESTIMATE: f64 = 75.0;

#[async_trait]
impl AgentCapability for CourierCapability {
    fn step(&self) -> &'static str {
        "request-courier"
    }

    async fn evaluate(&self, context: &StepContext) -> Decision {
        if context.bag.status != BagStatus::Mishandled {
            return Decision::Skip;
        }
        if self.favors_dispatch(context, DEFAULT_COURIER_COST_ESTIMATE) {
            Decision::Proceed
        } else {
            Decision::Skip
        }
    }

    async fn apply(&self, decision: Decision, context: &StepContext) -> Result<Vec<Effect>, CapabilityError> {
        if decision != Decision::Proceed {
            return Err(CapabilityError::UnexpectedDecision(decision));
        }
        let cost_estimate = DEFAULT_COURIER_COST_ESTIMATE;
        let requires_approval = cost_estimate > self.auto_dispatch_threshold;
        let destination_address = context
            .bag
            .passenger_ref
            .clone()
            .unwrap_or_else(|| "unknown-destination".to_string());

        let dispatch_id = self
            .courier_service
            .book(CourierBookingRequest {
                bag_tag: context.bag.bag_tag.clone(),
                destination_address: destination_address.clone(),
                cost_estimate,
            })
            .await?;

        let status =
            if requires_approval { CourierDispatchStatus::PendingApproval } else { CourierDispatchStatus::Booked };
        let dispatch = CourierDispatch {
            dispatch_id,
            bag_tag: context.bag.bag_tag.clone(),
            destination_address,
            cost_estimate,
            status,
            requires_approval,
            approved_by: None,
        };

        let mut effects = vec![Effect::CourierDispatched(dispatch)];
        if requires_approval {
            info!(%dispatch_id, "courier dispatch requires approval");
            effects.push(Effect::ApprovalRequested { dispatch_id });
        }
        Ok(effects)
    }
}

/// Resolution of an outstanding `ApprovalRequest`, the trigger for
/// [`CourierDecisionCapability`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalOutcome {
    /// `ApprovalGranted` was observed.
    Granted,
    /// `ApprovalDenied` was observed.
    Denied,
}

/// Resumes a workflow suspended at the approval gate (spec §4.6): reacts to
/// a later `ApprovalGranted`/`ApprovalDenied` event, independent of the
/// `CourierCapability` step that created the pending dispatch.
pub struct CourierDecisionCapability {
    dispatch_id: CourierDispatchId,
    outcome: ApprovalOutcome,
    approved_by: String,
}

impl CourierDecisionCapability {
    /// Construct a capability resolving the named dispatch's approval gate.
    pub fn new(dispatch_id: CourierDispatchId, outcome: ApprovalOutcome, approved_by: impl Into<String>) -> Self {
        Self { dispatch_id, outcome, approved_by: approved_by.into() }
    }
}

#[async_trait]
impl AgentCapability for CourierDecisionCapability {
    fn step(&self) -> &'static str {
        "courier-approval"
    }

    async fn evaluate(&self, _context: &StepContext) -> Decision {
        Decision::Proceed
    }

    async fn apply(&self, decision: Decision, _context: &StepContext) -> Result<Vec<Effect>, CapabilityError> {
        if decision != Decision::Proceed {
            return Err(CapabilityError::UnexpectedDecision(decision));
        }
        let to = match self.outcome {
            ApprovalOutcome::Granted => CourierDispatchStatus::Booked,
            ApprovalOutcome::Denied => CourierDispatchStatus::Cancelled,
        };
        Ok(vec![Effect::CourierApprovalResolved {
            dispatch_id: self.dispatch_id,
            to,
            approved_by: self.approved_by.clone(),
        }])
    }
}

/// Minimal template lookup for rendering a notification body (spec §4.6
/// step 5). Missing `template_id`s fall back to a generic status line so an
/// unconfigured template never blocks delivery.
fn render_template(templates: &std::collections::HashMap<String, String>, template_id: &str, bag: &Bag) -> String {
    match templates.get(template_id) {
        Some(template) => template.replace("{bag_tag}", &bag.bag_tag.to_string()).replace("{status}", &bag.status.to_string()),
        None => format!("bag {} status update: {}", bag.bag_tag, bag.status),
    }
}

/// Step 5: notify. Enqueues one notification per recipient/channel pair and
/// hands each to the configured `NotificationSink`, skipping any
/// (bag_tag, template_id, channel) combination already sent within the
/// dedup window (spec §4.6 step 5).
pub struct NotificationCapability {
    sink: Arc<dyn NotificationSink>,
    relational: Arc<dyn RelationalStore>,
    template_id: String,
    templates: std::collections::HashMap<String, String>,
}

impl NotificationCapability {
    /// Construct a capability backed by the given sink and relational store,
    /// rendering messages under `template_id`. `templates` is an optional
    /// lookup of template_id -> body template (`{bag_tag}`/`{status}`
    /// placeholders); an unmatched `template_id` falls back to a generic line.
    pub fn new(
        sink: Arc<dyn NotificationSink>,
        relational: Arc<dyn RelationalStore>,
        template_id: impl Into<String>,
        templates: std::collections::HashMap<String, String>,
    ) -> Self {
        Self { sink, relational, template_id: template_id.into(), templates }
    }
}

#[async_trait]
impl AgentCapability for NotificationCapability {
    fn step(&self) -> &'static str {
        "notify"
    }

    async fn evaluate(&self, context: &StepContext) -> Decision {
        if context.notification_targets.is_empty() {
            Decision::Skip
        } else {
            Decision::Proceed
        }
    }

    async fn apply(&self, decision: Decision, context: &StepContext) -> Result<Vec<Effect>, CapabilityError> {
        if decision != Decision::Proceed {
            return Err(CapabilityError::UnexpectedDecision(decision));
        }
        let rendered = render_template(&self.templates, &self.template_id, &context.bag);
        let mut effects = Vec::with_capacity(context.notification_targets.len());
        for (channel, recipient) in &context.notification_targets {
            if self.relational.recent_notification_exists(&context.bag.bag_tag, &self.template_id, *channel).await? {
                debug!(bag_tag = %context.bag.bag_tag, template_id = %self.template_id, ?channel, "skipping duplicate notification");
                continue;
            }
            let notification =
                Notification::new(context.bag.bag_tag.clone(), *channel, recipient.clone(), self.template_id.clone());
            let delivery_id = self.sink.send(*channel, recipient, &rendered).await?;
            effects.push(Effect::NotificationQueued(notification, delivery_id));
        }
        Ok(effects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bag_adapters::{AlwaysProceedReasoning, InMemoryCourierService, InMemoryPirService, LogNotificationSink, ReasoningCapability, ReasoningContext};
    use bag_store_memory::MemoryStore;
    use bag_types::{BagTag, ScanType};

    fn tag() -> BagTag {
        BagTag::new("0012345678").unwrap()
    }

    fn base_context(status: BagStatus, risk_score: f64) -> StepContext {
        let now: DateTime<Utc> = Utc::now();
        let mut bag = Bag::new(tag(), Some("PTY_GATE_A12".into()), now);
        bag.status = status;
        bag.risk_score = risk_score;
        let event = ScanEvent::new(tag(), ScanType::Sortation, "PTY_GATE_A12".into(), now, Vec::new());
        StepContext {
            bag,
            event,
            connection_minutes: Some(20),
            open_case: None,
            potential_compensation: None,
            notification_targets: Vec::new(),
        }
    }

    #[tokio::test]
    async fn risk_score_capability_always_proceeds() {
        let cap = RiskScoreCapability;
        let context = base_context(BagStatus::InTransit, 0.0);
        let decision = cap.evaluate(&context).await;
        assert_eq!(decision, Decision::Proceed);
        let effects = cap.apply(decision, &context).await.unwrap();
        assert_eq!(effects.len(), 1);
        assert!(matches!(effects[0], Effect::RiskAssessed(_)));
    }

    #[tokio::test]
    async fn exception_case_skips_when_risk_is_low() {
        let cap = ExceptionCaseCapability;
        let context = base_context(BagStatus::InTransit, 0.1);
        assert_eq!(cap.evaluate(&context).await, Decision::Skip);
    }

    #[tokio::test]
    async fn exception_case_opens_when_risk_is_high() {
        let cap = ExceptionCaseCapability;
        let context = base_context(BagStatus::InTransit, 0.7);
        let decision = cap.evaluate(&context).await;
        assert_eq!(decision, Decision::Proceed);
        let effects = cap.apply(decision, &context).await.unwrap();
        assert_eq!(effects.len(), 1);
        match &effects[0] {
            Effect::CaseOpened(case) => assert_eq!(case.priority, CasePriority::P1),
            other => panic!("unexpected effect: {other:?}"),
        }
    }

    #[tokio::test]
    async fn exception_case_is_a_noop_when_one_is_already_open() {
        let cap = ExceptionCaseCapability;
        let mut context = base_context(BagStatus::InTransit, 0.7);
        let case = ExceptionCase::open(tag(), "high_risk", CasePriority::P1, context.event.timestamp, context.event.timestamp);
        context.open_case = Some(case);
        let effects = cap.apply(Decision::Proceed, &context).await.unwrap();
        assert!(effects.is_empty());
    }

    #[tokio::test]
    async fn exception_case_updates_priority_when_risk_has_moved() {
        let cap = ExceptionCaseCapability;
        let mut context = base_context(BagStatus::InTransit, 0.9);
        let case = ExceptionCase::open(tag(), "high_risk", CasePriority::P1, context.event.timestamp, context.event.timestamp);
        let case_id = case.case_id;
        context.open_case = Some(case);
        let effects = cap.apply(Decision::Proceed, &context).await.unwrap();
        assert_eq!(effects.len(), 1);
        match &effects[0] {
            Effect::CaseUpdated { case_id: updated, to } => {
                assert_eq!(*updated, case_id);
                assert_eq!(*to, CasePriority::P0);
            }
            other => panic!("unexpected effect: {other:?}"),
        }
    }

    #[tokio::test]
    async fn world_tracer_skips_without_urgent_case() {
        let cap = WorldTracerCapability::new(Arc::new(InMemoryPirService::new()));
        let context = base_context(BagStatus::Mishandled, 0.9);
        assert_eq!(cap.evaluate(&context).await, Decision::Skip);
    }

    #[tokio::test]
    async fn world_tracer_files_pir_for_urgent_mishandled_bag() {
        let cap = WorldTracerCapability::new(Arc::new(InMemoryPirService::new()));
        let mut context = base_context(BagStatus::Mishandled, 0.9);
        context.open_case =
            Some(ExceptionCase::open(tag(), "anomaly", CasePriority::P0, context.event.timestamp, context.event.timestamp));
        let decision = cap.evaluate(&context).await;
        assert_eq!(decision, Decision::Proceed);
        let effects = cap.apply(decision, &context).await.unwrap();
        assert_eq!(effects.len(), 1);
        assert!(matches!(effects[0], Effect::PirFiled(_)));
    }

    #[tokio::test]
    async fn courier_dispatch_requests_approval_above_threshold() {
        let cap = CourierCapability::new(Arc::new(InMemoryCourierService::new()), 50.0);
        let mut context = base_context(BagStatus::Mishandled, 0.9);
        context.potential_compensation = Some(500.0);
        let decision = cap.evaluate(&context).await;
        assert_eq!(decision, Decision::Proceed);
        let effects = cap.apply(decision, &context).await.unwrap();
        assert_eq!(effects.len(), 2);
        assert!(effects.iter().any(|e| matches!(e, Effect::ApprovalRequested { .. })));
    }

    #[tokio::test]
    async fn courier_dispatch_auto_approves_below_threshold() {
        let cap = CourierCapability::new(Arc::new(InMemoryCourierService::new()), 1000.0);
        let mut context = base_context(BagStatus::Mishandled, 0.9);
        context.potential_compensation = Some(500.0);
        let effects = cap.apply(Decision::Proceed, &context).await.unwrap();
        assert_eq!(effects.len(), 1);
        match &effects[0] {
            Effect::CourierDispatched(dispatch) => assert_eq!(dispatch.status, CourierDispatchStatus::Booked),
            other => panic!("unexpected effect: {other:?}"),
        }
    }

    #[tokio::test]
    async fn courier_decision_resolves_approval() {
        let dispatch_id = uuid::Uuid::new_v4();
        let cap = CourierDecisionCapability::new(dispatch_id, ApprovalOutcome::Granted, "ops-lead");
        let context = base_context(BagStatus::Mishandled, 0.9);
        let effects = cap.apply(Decision::Proceed, &context).await.unwrap();
        match &effects[0] {
            Effect::CourierApprovalResolved { to, .. } => assert_eq!(*to, CourierDispatchStatus::Booked),
            other => panic!("unexpected effect: {other:?}"),
        }
    }

    #[tokio::test]
    async fn notify_skips_with_no_targets() {
        let cap = NotificationCapability::new(
            Arc::new(LogNotificationSink::new()),
            Arc::new(MemoryStore::new()),
            "mishandled_update",
            std::collections::HashMap::new(),
        );
        let context = base_context(BagStatus::Mishandled, 0.9);
        assert_eq!(cap.evaluate(&context).await, Decision::Skip);
    }

    #[tokio::test]
    async fn notify_sends_one_per_target() {
        let cap = NotificationCapability::new(
            Arc::new(LogNotificationSink::new()),
            Arc::new(MemoryStore::new()),
            "mishandled_update",
            std::collections::HashMap::new(),
        );
        let mut context = base_context(BagStatus::Mishandled, 0.9);
        context.notification_targets =
            vec![(NotificationChannel::Sms, "+15551234567".into()), (NotificationChannel::Email, "a@example.com".into())];
        let decision = cap.evaluate(&context).await;
        assert_eq!(decision, Decision::Proceed);
        let effects = cap.apply(decision, &context).await.unwrap();
        assert_eq!(effects.len(), 2);
    }

    #[tokio::test]
    async fn notify_skips_a_duplicate_within_the_dedup_window() {
        let store = Arc::new(MemoryStore::new());
        let cap = NotificationCapability::new(
            Arc::new(LogNotificationSink::new()),
            store.clone(),
            "mishandled_update",
            std::collections::HashMap::new(),
        );
        let mut context = base_context(BagStatus::Mishandled, 0.9);
        context.notification_targets = vec![(NotificationChannel::Sms, "+15551234567".into())];

        let first = cap.apply(Decision::Proceed, &context).await.unwrap();
        assert_eq!(first.len(), 1);
        if let Effect::NotificationQueued(notification, _) = &first[0] {
            store.insert_notification(notification).await.unwrap();
        } else {
            panic!("expected a NotificationQueued effect");
        }

        let second = cap.apply(Decision::Proceed, &context).await.unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn reasoning_capability_is_reachable_via_the_adapter_trait() {
        let reasoning = AlwaysProceedReasoning;
        let decision = reasoning.evaluate(ReasoningContext::default()).await;
        assert_eq!(decision, Decision::Proceed);
    }
}
