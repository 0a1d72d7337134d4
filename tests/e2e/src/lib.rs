//! End-to-end scenario tests driving the full stack (ingest bus, dual-write
//! coordinator, orchestrator, processor) the way an operator or adapter
//! integration would, rather than unit-testing one crate at a time.

#![allow(dead_code)]

#[cfg(test)]
mod scenarios {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;
    use uuid::Uuid;

    use bag_adapters::{InMemoryCourierService, InMemoryPirService, LogNotificationSink};
    use bag_capabilities::{
        ApprovalOutcome, CourierCapability, CourierDecisionCapability, NotificationCapability,
        StepContext, WorldTracerCapability,
    };
    use bag_dual_write::{DualWriteCoordinator, RecordOutcome};
    use bag_ingest_bus::{IngestBus, PublishOutcome};
    use bag_orchestrator::{Orchestrator, StepOutcome};
    use bag_processor::{Processor, ProcessorConfig};
    use bag_store_core::{GraphStore, RelationalStore, StorageError};
    use bag_store_memory::MemoryStore;
    use bag_types::{
        Bag as BagRecord, BagStatus, BagTag, CanonicalEvent, CourierDispatchStatus, EventPayload,
        ScanEvent, ScanType,
    };

    fn tag(raw: &str) -> BagTag {
        BagTag::new(raw).unwrap()
    }

    fn scan_event(bag_tag: BagTag, scan_type: ScanType, location: &str) -> CanonicalEvent {
        CanonicalEvent {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            bag_tag,
            location: location.to_string(),
            payload: EventPayload::Scan { scan_type },
            source_system: "scenario-test".into(),
            signal_strength: None,
            handler: None,
            enrichment: Default::default(),
            correlation_id: None,
        }
    }

    /// A [`GraphStore`] that can be toggled offline, returning
    /// [`StorageError::Unavailable`] from every call while down. Wraps a
    /// [`MemoryStore`] for scenario 5 (graph store outage + reconciliation).
    struct FlakyGraphStore {
        inner: MemoryStore,
        up: AtomicBool,
    }

    impl FlakyGraphStore {
        fn new() -> Self {
            Self { inner: MemoryStore::new(), up: AtomicBool::new(true) }
        }

        fn set_up(&self, up: bool) {
            self.up.store(up, Ordering::SeqCst);
        }

        fn check(&self) -> Result<(), StorageError> {
            if self.up.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(StorageError::Unavailable("graph store offline".into()))
            }
        }
    }

    #[async_trait]
    impl GraphStore for FlakyGraphStore {
        async fn merge_bag(&self, bag: &BagRecord) -> Result<(), StorageError> {
            self.check()?;
            self.inner.merge_bag(bag).await
        }

        async fn merge_scan_event(&self, event: &ScanEvent) -> Result<(), StorageError> {
            self.check()?;
            self.inner.merge_scan_event(event).await
        }

        async fn merge_risk(&self, assessment: &bag_types::RiskAssessment) -> Result<(), StorageError> {
            self.check()?;
            self.inner.merge_risk(assessment).await
        }

        async fn merge_case(&self, case: &bag_types::ExceptionCase) -> Result<(), StorageError> {
            self.check()?;
            self.inner.merge_case(case).await
        }

        async fn merge_flight_membership(
            &self,
            tag: &BagTag,
            flight_identifier: &str,
        ) -> Result<(), StorageError> {
            self.check()?;
            self.inner.merge_flight_membership(tag, flight_identifier).await
        }

        async fn get_journey(&self, tag: &BagTag) -> Result<Option<bag_store_core::Journey>, StorageError> {
            self.check()?;
            self.inner.get_journey(tag).await
        }

        async fn get_current_location(
            &self,
            tag: &BagTag,
        ) -> Result<Option<bag_store_core::CurrentLocation>, StorageError> {
            self.check()?;
            self.inner.get_current_location(tag).await
        }

        async fn get_flight_bags(&self, flight_identifier: &str) -> Result<Vec<BagRecord>, StorageError> {
            self.check()?;
            self.inner.get_flight_bags(flight_identifier).await
        }

        async fn identify_bottlenecks(
            &self,
            window_hours: u32,
            min_bags: u32,
        ) -> Result<Vec<bag_store_core::Bottleneck>, StorageError> {
            self.check()?;
            self.inner.identify_bottlenecks(window_hours, min_bags).await
        }
    }

    /// Scenario 1 — happy path: one check-in scan produces a single-scan
    /// journey, a `CheckedIn` bag, and a `low` risk level.
    #[tokio::test]
    async fn happy_path() {
        let store = Arc::new(MemoryStore::new());
        let coord =
            Arc::new(DualWriteCoordinator::with_backoff(store.clone(), store.clone(), store, vec![0, 0, 0]));

        let tag = tag("0000000001");
        let event = ScanEvent::new(tag.clone(), ScanType::CheckIn, "PTY_CHECKIN_12".into(), Utc::now(), vec![]);
        let outcome = coord.record_event(event).await.unwrap();
        assert_eq!(outcome, RecordOutcome::Applied);

        let journey = coord.get_journey(&tag).await.unwrap().unwrap();
        assert_eq!(journey.scans.len(), 1);

        let bags = coord.list_bags(&Default::default()).await.unwrap();
        assert_eq!(bags.len(), 1);
        assert_eq!(bags[0].status, BagStatus::CheckedIn);
        assert_eq!(bag_risk::level_for_score(bags[0].risk_score), bag_types::RiskLevel::Low);
    }

    /// Scenario 2 — dedup: the same event published twice within the dedup
    /// window is appended once; the second publish reports `Duplicate` and
    /// the journey still shows exactly one scan.
    #[tokio::test]
    async fn dedup_within_window() {
        let bus = IngestBus::new();
        let store = Arc::new(MemoryStore::new());
        let coord =
            Arc::new(DualWriteCoordinator::with_backoff(store.clone(), store.clone(), store, vec![0, 0, 0]));

        let tag = tag("0000000002");
        let event = scan_event(tag.clone(), ScanType::CheckIn, "PTY_CHECKIN_12");

        assert!(matches!(bus.publish(event.clone()).await, PublishOutcome::Appended(_)));
        assert_eq!(bus.publish(event.clone()).await, PublishOutcome::Duplicate);

        let scan = ScanEvent::new(tag.clone(), ScanType::CheckIn, event.location.clone(), event.timestamp, vec![]);
        coord.record_event(scan).await.unwrap();
        let journey = coord.get_journey(&tag).await.unwrap().unwrap();
        assert_eq!(journey.scans.len(), 1);
    }

    /// Scenario 3 — tight connection: a bag at a non-sortation gate with 25
    /// minutes to connect scores `high` with both expected factors present.
    #[tokio::test]
    async fn tight_connection_risk() {
        let store = Arc::new(MemoryStore::new());
        let coord =
            Arc::new(DualWriteCoordinator::with_backoff(store.clone(), store.clone(), store, vec![0, 0, 0]));

        let tag = tag("0000000003");
        let checkin = ScanEvent::new(tag.clone(), ScanType::CheckIn, "PTY_CHECKIN_12".into(), Utc::now(), vec![]);
        coord.record_event(checkin).await.unwrap();
        let sortation = ScanEvent::new(tag.clone(), ScanType::Sortation, "PTY_GATE_A12".into(), Utc::now(), vec![]);
        coord.record_event(sortation).await.unwrap();

        let risk = coord.analyze_connection_risk(&tag, 25).await.unwrap();
        assert!(risk.total_risk >= 0.7);
        assert_eq!(risk.level, bag_types::RiskLevel::High);
        assert!(risk.factors.contains("connection<30min"));
        assert!(risk.factors.contains("not_in_sortation_nor_loaded"));
    }

    /// Scenario 4 — illegal transition: once a bag is `claimed`, a `load`
    /// event is rejected, dead-lettered by the processor, and the bag's
    /// relational state is unchanged.
    #[tokio::test]
    async fn illegal_transition_is_dead_lettered() {
        let store = Arc::new(MemoryStore::new());
        let dual_write = Arc::new(DualWriteCoordinator::with_backoff(
            store.clone(),
            store.clone(),
            store.clone(),
            vec![0, 0, 0],
        ));
        let pir = WorldTracerCapability::new(Arc::new(InMemoryPirService::new()));
        let courier = CourierCapability::new(Arc::new(InMemoryCourierService::new()), 1000.0);
        let notify = NotificationCapability::new(
            Arc::new(LogNotificationSink::new()),
            store.clone(),
            "status_update",
            std::collections::HashMap::new(),
        );
        let orchestrator = Arc::new(Orchestrator::with_backoff(
            dual_write.clone(),
            store.clone(),
            pir,
            courier,
            notify,
            vec![0, 0, 0],
        ));

        let bus = Arc::new(IngestBus::new());
        let processor = Arc::new(Processor::new(
            bus.clone(),
            dual_write.clone(),
            store.clone(),
            orchestrator,
            ProcessorConfig { batch_size: 10, block_ms: 200, stale_claim_ms: 60_000, consumer_name: "scenario-4".into() },
        ));

        let tag = tag("0000000004");
        for (scan_type, location) in [
            (ScanType::CheckIn, "PTY_CHECKIN_12"),
            (ScanType::Sortation, "PTY_SORT"),
            (ScanType::Load, "PTY_RAMP"),
            (ScanType::Arrival, "JFK_RAMP"),
            (ScanType::Claim, "JFK_CLAIM"),
        ] {
            bus.publish(scan_event(tag.clone(), scan_type, location)).await;
        }
        processor.run_once().await;

        let bag = store.get_bag(&tag).await.unwrap().unwrap();
        assert_eq!(bag.status, BagStatus::Claimed);

        bus.publish(scan_event(tag.clone(), ScanType::Load, "JFK_RAMP")).await;
        processor.run_once().await;

        let dlq = bus.dlq_snapshot().await;
        assert_eq!(dlq.len(), 1);

        let bag_after = store.get_bag(&tag).await.unwrap().unwrap();
        assert_eq!(bag_after.status, BagStatus::Claimed);
    }

    /// Scenario 5 — graph store outage: a valid scan still commits to the
    /// relational store while the graph is down, records a reconciliation
    /// debt, and a sweep after the graph comes back resolves it.
    #[tokio::test]
    async fn graph_outage_is_reconciled() {
        let relational = Arc::new(MemoryStore::new());
        let wal = Arc::new(MemoryStore::new());
        let graph = Arc::new(FlakyGraphStore::new());
        let coord = Arc::new(DualWriteCoordinator::with_backoff(
            relational.clone(),
            graph.clone(),
            wal,
            vec![0, 0, 0],
        ));

        graph.set_up(false);

        let tag = tag("0000000005");
        let event = ScanEvent::new(tag.clone(), ScanType::CheckIn, "PTY_CHECKIN_12".into(), Utc::now(), vec![]);
        let outcome = coord.record_event(event).await.unwrap();
        assert_eq!(outcome, RecordOutcome::Applied);

        let debts = coord.outstanding_debts().await.unwrap();
        assert_eq!(debts.len(), 1);
        assert!(coord.get_journey(&tag).await.is_err());

        graph.set_up(true);
        let report = coord.reconcile_once().await.unwrap();
        assert_eq!(report.resolved, 1);
        assert_eq!(report.still_failing, 0);

        let journey = coord.get_journey(&tag).await.unwrap().unwrap();
        assert_eq!(journey.scans.len(), 1);
        assert!(coord.outstanding_debts().await.unwrap().is_empty());
    }

    /// Scenario 6 — approval gate: a dispatch priced above the auto-dispatch
    /// threshold starts `pending_approval` with no courier booked; granting
    /// approval books it, denying cancels it.
    #[tokio::test]
    async fn courier_approval_gate() {
        let store = Arc::new(MemoryStore::new());
        let dual_write = Arc::new(DualWriteCoordinator::with_backoff(
            store.clone(),
            store.clone(),
            store.clone(),
            vec![0, 0, 0],
        ));
        let pir = WorldTracerCapability::new(Arc::new(InMemoryPirService::new()));
        // Threshold below the $75 flat cost estimate forces the approval gate.
        let courier = CourierCapability::new(Arc::new(InMemoryCourierService::new()), 50.0);
        let notify = NotificationCapability::new(
            Arc::new(LogNotificationSink::new()),
            store.clone(),
            "status_update",
            std::collections::HashMap::new(),
        );
        let orchestrator = Orchestrator::with_backoff(
            dual_write.clone(),
            store.clone(),
            pir,
            courier,
            notify,
            vec![0, 0, 0],
        );

        let tag = tag("0000000006");
        let mut bag = BagRecord::new(tag.clone(), Some("JFK_RAMP".into()), Utc::now());
        bag.status = BagStatus::Mishandled;
        bag.risk_score = 0.95;
        dual_write.upsert_bag(bag.clone()).await.unwrap();

        let event = ScanEvent::new(tag.clone(), ScanType::Anomaly, "JFK_RAMP".into(), Utc::now(), vec![]);
        let context = StepContext {
            bag: bag.clone(),
            event: event.clone(),
            connection_minutes: None,
            open_case: None,
            potential_compensation: Some(150.0),
            notification_targets: Vec::new(),
        };

        let report = orchestrator.run_workflow(context.clone(), event.event_id).await.unwrap();
        let courier_step = &report.steps[3];
        let dispatch_id = match &courier_step.outcome {
            StepOutcome::Applied(effects) => effects
                .iter()
                .find_map(|e| match e {
                    bag_capabilities::Effect::CourierDispatched(d) => Some(d.dispatch_id),
                    _ => None,
                })
                .expect("courier step applied a dispatch"),
            other => panic!("expected courier step to apply, got {other:?}"),
        };

        let dispatch = store.get_courier_dispatch(dispatch_id).await.unwrap().unwrap();
        assert_eq!(dispatch.status, CourierDispatchStatus::PendingApproval);

        let grant = CourierDecisionCapability::new(dispatch_id, ApprovalOutcome::Granted, "ops-lead");
        orchestrator.resolve_courier_approval(&grant, &context).await.unwrap();
        let granted = store.get_courier_dispatch(dispatch_id).await.unwrap().unwrap();
        assert_eq!(granted.status, CourierDispatchStatus::Booked);
        assert_eq!(granted.approved_by.as_deref(), Some("ops-lead"));

        // A second dispatch, denied instead of granted.
        let event2 = ScanEvent::new(tag.clone(), ScanType::Anomaly, "JFK_RAMP".into(), Utc::now(), vec![]);
        let context2 = StepContext { event: event2.clone(), ..context };
        let report2 = orchestrator.run_workflow(context2.clone(), event2.event_id).await.unwrap();
        let dispatch_id2 = match &report2.steps[3].outcome {
            StepOutcome::Applied(effects) => effects
                .iter()
                .find_map(|e| match e {
                    bag_capabilities::Effect::CourierDispatched(d) => Some(d.dispatch_id),
                    _ => None,
                })
                .expect("second courier step applied a dispatch"),
            other => panic!("expected courier step to apply, got {other:?}"),
        };

        let deny = CourierDecisionCapability::new(dispatch_id2, ApprovalOutcome::Denied, "ops-lead");
        orchestrator.resolve_courier_approval(&deny, &context2).await.unwrap();
        let denied = store.get_courier_dispatch(dispatch_id2).await.unwrap().unwrap();
        assert_eq!(denied.status, CourierDispatchStatus::Cancelled);
    }
}
