//! Runs the spec §4.6 per-event workflow: five ordered capability steps,
//! retried individually on transient failure, with effects funnelled back
//! through the Dual-Write Coordinator (for bag/risk/case state) and the
//! relational store directly (for PIR/courier/notification records — see
//! the module-level note on that split below). The orchestrator never holds
//! an adapter itself; each capability owns the one external system it
//! needs, so "the orchestrator does not invoke external services directly"
//! holds even though a capability's `apply` does the actual call.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

use bag_capabilities::{
    idempotency_key, AgentCapability, CourierCapability, Decision, Effect, ExceptionCaseCapability,
    NotificationCapability, RiskScoreCapability, StepContext, WorldTracerCapability,
};
use bag_dual_write::DualWriteCoordinator;
use bag_store_core::{RelationalStore, StorageError};
use bag_types::NotificationStatus;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Default retry backoff for a capability step (spec §4.6: 1s/2s/4s, up to
/// 3 attempts).
pub const DEFAULT_STEP_BACKOFF_MS: [u64; 3] = [1_000, 2_000, 4_000];

/// Failure out of the orchestrator's control flow itself (as opposed to a
/// capability's own business decision, which is expressed as a
/// [`Decision`] and never propagates as an `Err`).
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// A Dual-Write Coordinator write failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// A capability was misused (called `apply` with a decision it
    /// doesn't act on) — a programming error, not a runtime condition.
    #[error(transparent)]
    Capability(#[from] bag_capabilities::CapabilityError),
}

/// Outcome of one workflow step.
#[derive(Debug, Clone)]
pub enum StepOutcome {
    /// `evaluate` returned `Skip`.
    Skipped,
    /// `evaluate` returned `Fail(reason)`.
    Failed(String),
    /// `evaluate` returned `Defer(reason)`, or retries were exhausted and
    /// the step is recorded as pending (spec §4.6: "persistent failure
    /// defers the step").
    Deferred(String),
    /// The step proceeded and its effects were committed.
    Applied(Vec<Effect>),
}

/// Record of a single step's outcome, named for the idempotency key it ran
/// under.
#[derive(Debug, Clone)]
pub struct StepReport {
    /// The step name (e.g. `"risk-evaluate"`).
    pub step: &'static str,
    /// What happened.
    pub outcome: StepOutcome,
}

/// The outcome of running the full five-step workflow for one event.
#[derive(Debug, Clone, Default)]
pub struct WorkflowReport {
    /// One entry per step, in execution order.
    pub steps: Vec<StepReport>,
}

/// Runs the bag lifecycle workflow. Holds the stateless step-1/step-2
/// capabilities directly; step-3/4/5 capabilities (which own external
/// adapters) are supplied by the caller at construction time.
pub struct Orchestrator {
    dual_write: Arc<DualWriteCoordinator>,
    relational: Arc<dyn RelationalStore>,
    risk: RiskScoreCapability,
    case: ExceptionCaseCapability,
    pir: WorldTracerCapability,
    courier: CourierCapability,
    notify: NotificationCapability,
    backoff_ms: Vec<u64>,
}

impl Orchestrator {
    /// Construct an orchestrator over the given dual-write coordinator and
    /// relational store (for PIR/courier/notification persistence), with
    /// adapter-owning capabilities for steps 3-5.
    pub fn new(
        dual_write: Arc<DualWriteCoordinator>,
        relational: Arc<dyn RelationalStore>,
        pir: WorldTracerCapability,
        courier: CourierCapability,
        notify: NotificationCapability,
    ) -> Self {
        Self::with_backoff(dual_write, relational, pir, courier, notify, DEFAULT_STEP_BACKOFF_MS.to_vec())
    }

    /// As [`Self::new`], with an overridable retry backoff (tests use a
    /// near-zero schedule).
    pub fn with_backoff(
        dual_write: Arc<DualWriteCoordinator>,
        relational: Arc<dyn RelationalStore>,
        pir: WorldTracerCapability,
        courier: CourierCapability,
        notify: NotificationCapability,
        backoff_ms: Vec<u64>,
    ) -> Self {
        Self { dual_write, relational, risk: RiskScoreCapability, case: ExceptionCaseCapability, pir, courier, notify, backoff_ms }
    }

    /// Run all five workflow steps for one triggering event, in order,
    /// threading each step's committed effects into the context the next
    /// step sees (spec §4.6: "workflow progress [is] a pure function of bag
    /// state + outstanding requests, recomputed on each event").
    pub async fn run_workflow(&self, mut context: StepContext, event_id: Uuid) -> Result<WorkflowReport, OrchestratorError> {
        let mut report = WorkflowReport::default();

        let risk_step = self.run_step(&self.risk, &context, event_id).await?;
        if let StepOutcome::Applied(effects) = &risk_step.outcome {
            for effect in effects {
                if let Effect::RiskAssessed(assessment) = effect {
                    context.bag.risk_score = assessment.risk_score;
                }
            }
        }
        report.steps.push(risk_step);

        let case_step = self.run_step(&self.case, &context, event_id).await?;
        if let StepOutcome::Applied(effects) = &case_step.outcome {
            for effect in effects {
                if let Effect::CaseOpened(case) = effect {
                    context.open_case = Some(case.clone());
                }
            }
        }
        report.steps.push(case_step);

        report.steps.push(self.run_step(&self.pir, &context, event_id).await?);
        report.steps.push(self.run_step(&self.courier, &context, event_id).await?);
        report.steps.push(self.run_step(&self.notify, &context, event_id).await?);

        Ok(report)
    }

    /// Resolve a suspended approval gate directly (spec §4.6: a later
    /// `ApprovalGranted`/`ApprovalDenied` event resumes the workflow without
    /// re-running the other four steps).
    pub async fn resolve_courier_approval(
        &self,
        decision_capability: &bag_capabilities::CourierDecisionCapability,
        context: &StepContext,
    ) -> Result<StepReport, OrchestratorError> {
        self.run_step(decision_capability, context, Uuid::new_v4()).await
    }

    async fn run_step(&self, capability: &dyn AgentCapability, context: &StepContext, event_id: Uuid) -> Result<StepReport, OrchestratorError> {
        let step = capability.step();
        let decision = capability.evaluate(context).await;
        let key = idempotency_key(&context.bag.bag_tag, step, event_id);

        match decision {
            Decision::Skip => Ok(StepReport { step, outcome: StepOutcome::Skipped }),
            Decision::Fail(reason) => {
                warn!(step, %reason, "capability declined to proceed");
                Ok(StepReport { step, outcome: StepOutcome::Failed(reason) })
            }
            Decision::Defer(reason) => {
                info!(step, %reason, "capability deferred to a later event");
                Ok(StepReport { step, outcome: StepOutcome::Deferred(reason) })
            }
            Decision::Proceed => match self.apply_with_retry(capability, context, &key).await {
                Ok(effects) => {
                    self.commit_effects(&effects).await?;
                    Ok(StepReport { step, outcome: StepOutcome::Applied(effects) })
                }
                Err(bag_capabilities::CapabilityError::Adapter(e)) => {
                    warn!(step, key = %key, error = %e, "retries exhausted, deferring step");
                    Ok(StepReport { step, outcome: StepOutcome::Deferred(e.to_string()) })
                }
                Err(other) => Err(other.into()),
            },
        }
    }

    async fn apply_with_retry(
        &self,
        capability: &dyn AgentCapability,
        context: &StepContext,
        key: &str,
    ) -> Result<Vec<Effect>, bag_capabilities::CapabilityError> {
        let mut attempt = 0usize;
        loop {
            match capability.apply(Decision::Proceed, context).await {
                Ok(effects) => return Ok(effects),
                Err(bag_capabilities::CapabilityError::Adapter(e)) if e.is_transient() && attempt < self.backoff_ms.len() => {
                    warn!(key, attempt, error = %e, "transient adapter failure, retrying");
                    tokio::time::sleep(Duration::from_millis(self.backoff_ms[attempt])).await;
                    attempt += 1;
                }
                Err(bag_capabilities::CapabilityError::Storage(e)) if e.is_transient() && attempt < self.backoff_ms.len() => {
                    warn!(key, attempt, error = %e, "transient storage failure, retrying");
                    tokio::time::sleep(Duration::from_millis(self.backoff_ms[attempt])).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn commit_effects(&self, effects: &[Effect]) -> Result<(), OrchestratorError> {
        for effect in effects {
            match effect {
                Effect::RiskAssessed(assessment) => {
                    self.dual_write.record_risk(assessment.clone()).await?;
                }
                Effect::CaseOpened(case) => {
                    self.dual_write.open_case(case.clone()).await?;
                }
                Effect::CaseUpdated { case_id, to } => {
                    self.dual_write.update_case_priority(*case_id, *to).await?;
                }
                Effect::PirFiled(pir) => {
                    self.relational.upsert_pir(pir).await?;
                }
                Effect::CourierDispatched(dispatch) => {
                    self.relational.upsert_courier_dispatch(dispatch).await?;
                }
                Effect::ApprovalRequested { dispatch_id } => {
                    info!(%dispatch_id, "dispatch awaiting approval");
                }
                Effect::CourierApprovalResolved { dispatch_id, to, approved_by } => {
                    if let Some(mut dispatch) = self.relational.get_courier_dispatch(*dispatch_id).await? {
                        dispatch.status = *to;
                        dispatch.approved_by = Some(approved_by.clone());
                        self.relational.upsert_courier_dispatch(&dispatch).await?;
                    }
                }
                Effect::NotificationQueued(notification, delivery_id) => {
                    let mut notification = notification.clone();
                    notification.status = NotificationStatus::Sent;
                    info!(%delivery_id, notification_id = %notification.notification_id, "notification delivered");
                    self.relational.insert_notification(&notification).await?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bag_adapters::{InMemoryCourierService, InMemoryPirService, LogNotificationSink};
    use bag_capabilities::StepContext;
    use bag_store_memory::MemoryStore;
    use bag_types::{Bag, BagStatus, BagTag, NotificationChannel, ScanEvent, ScanType};
    use chrono::Utc;

    fn tag() -> BagTag {
        BagTag::new("0012345678").unwrap()
    }

    fn orchestrator() -> Arc<Orchestrator> {
        let store = Arc::new(MemoryStore::new());
        let dual_write =
            Arc::new(DualWriteCoordinator::with_backoff(store.clone(), store.clone(), store.clone(), vec![1, 1, 1]));
        let pir = WorldTracerCapability::new(Arc::new(InMemoryPirService::new()));
        let courier = CourierCapability::new(Arc::new(InMemoryCourierService::new()), 1000.0);
        let notify = NotificationCapability::new(
            Arc::new(LogNotificationSink::new()),
            store.clone(),
            "status_update",
            std::collections::HashMap::new(),
        );
        Arc::new(Orchestrator::with_backoff(dual_write, store, pir, courier, notify, vec![1, 1, 1]))
    }

    async fn seed_bag(orch: &Orchestrator, status: BagStatus, risk_score: f64) -> Bag {
        let now = Utc::now();
        let mut bag = Bag::new(tag(), Some("PTY_GATE_A12".into()), now);
        bag.status = status;
        bag.risk_score = risk_score;
        orch.dual_write.upsert_bag(bag.clone()).await.unwrap();
        bag
    }

    #[tokio::test]
    async fn low_risk_event_only_runs_risk_evaluate() {
        let orch = orchestrator();
        let bag = seed_bag(&orch, BagStatus::InTransit, 0.0).await;
        let now = Utc::now();
        let event = ScanEvent::new(tag(), ScanType::Sortation, "PTY_GATE_A12".into(), now, vec![]);
        let context = StepContext {
            bag,
            event: event.clone(),
            connection_minutes: None,
            open_case: None,
            potential_compensation: None,
            notification_targets: Vec::new(),
        };

        let report = orch.run_workflow(context, event.event_id).await.unwrap();
        assert!(matches!(report.steps[0].outcome, StepOutcome::Applied(_)));
        assert!(matches!(report.steps[1].outcome, StepOutcome::Skipped));
        assert!(matches!(report.steps[2].outcome, StepOutcome::Skipped));
    }

    #[tokio::test]
    async fn high_risk_mishandled_bag_opens_case_and_files_pir() {
        let orch = orchestrator();
        let mut bag = seed_bag(&orch, BagStatus::Mishandled, 0.0).await;
        bag.risk_score = 0.95;
        let now = Utc::now();
        let event = ScanEvent::new(tag(), ScanType::Anomaly, "PTY_GATE_A12".into(), now, vec![]);
        let context = StepContext {
            bag,
            event: event.clone(),
            connection_minutes: None,
            open_case: None,
            potential_compensation: Some(10.0),
            notification_targets: vec![(NotificationChannel::Sms, "+15551234567".into())],
        };

        let report = orch.run_workflow(context, event.event_id).await.unwrap();
        assert!(matches!(report.steps[0].outcome, StepOutcome::Applied(_)));
        assert!(matches!(report.steps[1].outcome, StepOutcome::Applied(_)));
        assert!(matches!(report.steps[2].outcome, StepOutcome::Applied(_)));
        assert!(matches!(report.steps[4].outcome, StepOutcome::Applied(_)));

        let case = orch.relational.open_case_for_bag(&tag()).await.unwrap();
        assert!(case.is_some());
    }
}
