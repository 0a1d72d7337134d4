#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **bag-core** – Application wiring: assembles config, the backing stores,
//! the ingest bus, the Dual-Write Coordinator, the agent orchestrator, and a
//! pool of Event Processor Workers into one long-lived [`Core`].
//!
//! Grounded on `toka-runtime`'s `Runtime`: a struct holding `Arc`-shared
//! components built once at startup from a config value, with
//! `spawn`/`shutdown` managing background task lifecycles.

use std::sync::Arc;

use anyhow::{Context, Result};
use secrecy::ExposeSecret;
use tokio::task::JoinHandle;
use tracing::info;

use bag_adapters::{CourierService, NotificationSink, PirService};
use bag_capabilities::{CourierCapability, NotificationCapability, WorldTracerCapability};
use bag_config::Config;
use bag_dual_write::DualWriteCoordinator;
use bag_ingest_bus::{IngestBus, PublishOutcome};
use bag_orchestrator::Orchestrator;
use bag_processor::{Processor, ProcessorConfig};
use bag_store_core::{GraphStore, RelationalStore, WriteAheadLog};
use bag_store_memory::MemoryStore;
use bag_types::CanonicalEvent;

/// Which relational backend to construct (spec §6 `RELATIONAL_URL`).
#[derive(Debug, Clone)]
pub enum RelationalBackend {
    /// Non-persistent, for local development and tests.
    Memory,
    /// `sqlx`-backed Postgres, behind the `postgres-storage` feature.
    #[cfg(feature = "postgres-storage")]
    Postgres,
}

/// Which graph backend to construct (spec §6 `GRAPH_URL`).
#[derive(Debug, Clone)]
pub enum GraphBackend {
    /// Non-persistent, for local development and tests.
    Memory,
    /// Embedded `sled`-backed graph projection, behind the `graph-storage`
    /// feature.
    #[cfg(feature = "graph-storage")]
    Sled {
        /// Filesystem path for the sled database.
        path: String,
    },
}

/// Introspection snapshot for the `GET /events/stream/info` query (spec
/// §6); exposed here since only `Core` holds every component it touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamInfo {
    /// Deliveries currently awaiting ack across all consumers.
    pub pending: usize,
    /// Entries currently parked in the dead-letter queue.
    pub dlq_depth: usize,
    /// Bag-level reconciliation debts awaiting the background reconciler.
    pub outstanding_debts: usize,
}

/// The wired-together application. Construct once at startup, `spawn` the
/// processor pool, and `shutdown` on exit.
pub struct Core {
    config: Config,
    bus: Arc<IngestBus>,
    relational: Arc<dyn RelationalStore>,
    dual_write: Arc<DualWriteCoordinator>,
    orchestrator: Arc<Orchestrator>,
    processors: Vec<Arc<Processor>>,
    processor_handles: Vec<JoinHandle<()>>,
}

impl Core {
    /// Build every component from `config`, selecting backends per
    /// `relational`/`graph`.
    ///
    /// The write-ahead log is always the in-process [`MemoryStore`]: no
    /// dedicated durable WAL driver exists yet (a full build would add one
    /// keyed off `EVENTLOG_URL`, the same endpoint the ingest bus's
    /// replay/trim settings are tuned against). This bounds WAL durability
    /// to the current process, which is acceptable for the reconciliation
    /// debt it exists to drive — the relational store remains authoritative
    /// regardless.
    pub async fn new(
        config: Config,
        relational_backend: RelationalBackend,
        graph_backend: GraphBackend,
        pir_service: Arc<dyn PirService>,
        courier_service: Arc<dyn CourierService>,
        notification_sink: Arc<dyn NotificationSink>,
    ) -> Result<Self> {
        let wal_store = Arc::new(MemoryStore::new());
        let wal: Arc<dyn WriteAheadLog> = wal_store;

        let relational: Arc<dyn RelationalStore> = match relational_backend {
            RelationalBackend::Memory => Arc::new(MemoryStore::new()),
            #[cfg(feature = "postgres-storage")]
            RelationalBackend::Postgres => {
                let store = bag_store_postgres::PostgresStore::connect(
                    config.stores.relational_url.expose_secret(),
                )
                .await
                .context("failed to connect relational store")?;
                Arc::new(store)
            }
        };

        let graph: Arc<dyn GraphStore> = match graph_backend {
            GraphBackend::Memory => Arc::new(MemoryStore::new()),
            #[cfg(feature = "graph-storage")]
            GraphBackend::Sled { path } => {
                let store = bag_store_graph::SledGraphStore::open(&path)
                    .context("failed to open graph store")?;
                Arc::new(store)
            }
        };

        info!(
            high_risk = config.risk.high,
            critical_risk = config.risk.critical,
            auto_dispatch = config.risk.auto_dispatch,
            "building application core"
        );

        let dual_write = Arc::new(DualWriteCoordinator::new(relational.clone(), graph, wal));

        let pir = WorldTracerCapability::new(pir_service);
        let courier = CourierCapability::new(courier_service, config.risk.auto_dispatch);
        let notify = NotificationCapability::new(
            notification_sink,
            relational.clone(),
            "bag-status-update".to_string(),
            std::collections::HashMap::new(),
        );
        let orchestrator = Arc::new(Orchestrator::new(dual_write.clone(), relational.clone(), pir, courier, notify));

        Ok(Self {
            config,
            bus: Arc::new(IngestBus::new()),
            relational,
            dual_write,
            orchestrator,
            processors: Vec::new(),
            processor_handles: Vec::new(),
        })
    }

    /// Build a `Core` with every backend in-memory — suitable for tests and
    /// for running the platform without any external dependency wired up.
    pub async fn in_memory(
        config: Config,
        pir_service: Arc<dyn PirService>,
        courier_service: Arc<dyn CourierService>,
        notification_sink: Arc<dyn NotificationSink>,
    ) -> Result<Self> {
        Self::new(
            config,
            RelationalBackend::Memory,
            GraphBackend::Memory,
            pir_service,
            courier_service,
            notification_sink,
        )
        .await
    }

    /// Publish a canonical event onto the ingest bus (spec §4.3 `publish`).
    pub async fn ingest(&self, event: CanonicalEvent) -> PublishOutcome {
        self.bus.publish(event).await
    }

    /// The configured worker tuning, for callers that want to report it.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Spawn `worker_count` Event Processor Workers, each with its own
    /// named consumer identity, sharing the bus/coordinator/orchestrator.
    pub fn spawn_processors(&mut self, worker_count: usize) {
        for i in 0..worker_count {
            let processor = Arc::new(Processor::new(
                self.bus.clone(),
                self.dual_write.clone(),
                self.relational.clone(),
                self.orchestrator.clone(),
                ProcessorConfig {
                    batch_size: self.config.worker.batch_size,
                    block_ms: self.config.worker.block_ms,
                    stale_claim_ms: self.config.worker.stale_claim_ms,
                    consumer_name: format!("bag-processor-{i}"),
                },
            ));
            let handle = {
                let processor = processor.clone();
                tokio::spawn(async move { processor.run().await })
            };
            self.processors.push(processor);
            self.processor_handles.push(handle);
        }
    }

    /// `GET /bag/{tag}` (spec §6): the authoritative relational record.
    pub async fn get_bag(&self, tag: &bag_types::BagTag) -> Result<Option<bag_types::Bag>, bag_store_core::StorageError> {
        self.relational.get_bag(tag).await
    }

    /// `GET /bags` (spec §6): relational bags matching `filter`.
    pub async fn list_bags(
        &self,
        filter: &bag_store_core::BagFilter,
    ) -> Result<Vec<bag_types::Bag>, bag_store_core::StorageError> {
        self.dual_write.list_bags(filter).await
    }

    /// `GET /graph/bags/{id}/journey` (spec §6).
    pub async fn get_journey(
        &self,
        tag: &bag_types::BagTag,
    ) -> Result<Option<bag_store_core::Journey>, bag_store_core::StorageError> {
        self.dual_write.get_journey(tag).await
    }

    /// `GET /graph/bags/{id}/current-location` (spec §6).
    pub async fn get_current_location(
        &self,
        tag: &bag_types::BagTag,
    ) -> Result<Option<bag_store_core::CurrentLocation>, bag_store_core::StorageError> {
        self.dual_write.get_current_location(tag).await
    }

    /// `POST /graph/bags/connection-risk` (spec §6).
    pub async fn analyze_connection_risk(
        &self,
        tag: &bag_types::BagTag,
        connection_minutes: u32,
    ) -> Result<bag_store_core::ConnectionRisk, bag_store_core::StorageError> {
        self.dual_write.analyze_connection_risk(tag, connection_minutes).await
    }

    /// `GET /graph/analytics/bottlenecks` (spec §6).
    pub async fn identify_bottlenecks(
        &self,
        window_hours: u32,
        min_bags: u32,
    ) -> Result<Vec<bag_store_core::Bottleneck>, bag_store_core::StorageError> {
        self.dual_write.identify_bottlenecks(window_hours, min_bags).await
    }

    /// Snapshot the ingest bus and reconciliation state for `GET
    /// /events/stream/info` (spec §6).
    pub async fn stream_info(&self) -> Result<StreamInfo, bag_store_core::StorageError> {
        Ok(StreamInfo {
            pending: self.bus.pending_count(),
            dlq_depth: self.bus.dlq_snapshot().await.len(),
            outstanding_debts: self.dual_write.outstanding_debts().await?.len(),
        })
    }

    /// Start the background reconciliation sweep (spec §4.5).
    pub async fn spawn_reconciler(&self, interval: std::time::Duration) {
        self.dual_write.spawn_reconciler(interval).await;
    }

    /// Run a single reconciliation sweep immediately, for operator-triggered
    /// reconciliation rather than waiting on the background interval.
    pub async fn reconcile_once(&self) -> Result<bag_dual_write::ReconcileReport, bag_store_core::StorageError> {
        self.dual_write.reconcile_once().await
    }

    /// Stop every processor after its current batch, then drain the
    /// dual-write coordinator's background reconciler (spec §5 "graceful
    /// shutdown").
    pub async fn shutdown(mut self) {
        info!("shutting down application core");
        for processor in &self.processors {
            processor.shutdown();
        }
        for handle in self.processor_handles.drain(..) {
            let _ = handle.await;
        }
        self.dual_write.shutdown().await;
        info!("application core shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bag_adapters::{InMemoryCourierService, InMemoryPirService, LogNotificationSink};
    use bag_types::{BagTag, EventPayload, ScanType};
    use chrono::Utc;
    use std::env;
    use std::sync::Mutex;
    use uuid::Uuid;

    static ENV_GUARD: Mutex<()> = Mutex::new(());

    fn test_config() -> Config {
        let _guard = ENV_GUARD.lock().unwrap();
        for var in bag_config::ENV_VARS {
            env::remove_var(var);
        }
        env::set_var("RELATIONAL_URL", "memory://local");
        env::set_var("GRAPH_URL", "memory://local");
        env::set_var("EVENTLOG_URL", "memory://local");
        let config = Config::from_env().unwrap();
        for var in bag_config::ENV_VARS {
            env::remove_var(var);
        }
        config
    }

    async fn core() -> Core {
        Core::in_memory(
            test_config(),
            Arc::new(InMemoryPirService::default()),
            Arc::new(InMemoryCourierService::default()),
            Arc::new(LogNotificationSink::default()),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn ingest_and_process_one_event() {
        let mut core = core().await;
        core.spawn_processors(1);

        let event = CanonicalEvent {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            bag_tag: BagTag::new("0012345678").unwrap(),
            location: "JFK".to_string(),
            payload: EventPayload::Scan { scan_type: ScanType::CheckIn },
            source_system: "test".into(),
            signal_strength: None,
            handler: None,
            enrichment: Default::default(),
            correlation_id: None,
        };
        assert!(matches!(core.ingest(event).await, PublishOutcome::Appended(_)));

        // Give the processor a tick to drain the bus.
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        let info = core.stream_info().await.unwrap();
        assert_eq!(info.pending, 0);
        assert_eq!(info.dlq_depth, 0);

        core.shutdown().await;
    }

    #[tokio::test]
    async fn duplicate_event_within_dedup_window_is_not_reappended() {
        let core = core().await;
        let event = CanonicalEvent {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            bag_tag: BagTag::new("0099998888").unwrap(),
            location: "JFK".to_string(),
            payload: EventPayload::Scan { scan_type: ScanType::CheckIn },
            source_system: "test".into(),
            signal_strength: None,
            handler: None,
            enrichment: Default::default(),
            correlation_id: None,
        };
        let mut duplicate = event.clone();
        duplicate.event_id = Uuid::new_v4();

        assert!(matches!(core.ingest(event).await, PublishOutcome::Appended(_)));
        assert_eq!(core.ingest(duplicate).await, PublishOutcome::Duplicate);

        core.shutdown().await;
    }
}
