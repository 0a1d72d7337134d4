#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **bag-store-postgres** – Postgres-backed [`RelationalStore`] driver: the
//! authoritative store per spec §4.5.
//!
//! Follows `toka-store-sqlite`'s shape: a connection pool, migrate-on-init,
//! and a broadcast channel of committed scan events for live consumers.
//! Each entity is stored as a JSONB blob alongside a handful of indexed hot
//! columns (status, bag_tag, timestamps) used for filtering — the same
//! header/payload split the teacher's sqlite driver uses, generalized to
//! several entity kinds instead of one generic event table.

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, QueryBuilder, Row};
use tokio::sync::broadcast;
use uuid::Uuid;

use bag_store_core::{
    BagFilter, Bottleneck, CurrentLocation, GraphStore, Journey, ReconciliationDebt,
    RelationalStore, StorageError,
};
use bag_types::{
    Bag, BagTag, CaseId, CaseStatus, CourierDispatch, CourierDispatchId, ExceptionCase,
    Notification, NotificationChannel, Pir, RiskAssessment, ScanEvent,
};

/// Default broadcast channel size for the live scan-event stream.
const DEFAULT_BROADCAST_SIZE: usize = 1024;

/// Postgres-backed authoritative store.
pub struct PostgresStore {
    pool: PgPool,
    broadcast_tx: broadcast::Sender<ScanEvent>,
}

impl PostgresStore {
    /// Connect to `database_url` and run migrations.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        Self::from_pool(pool).await
    }

    /// Wrap an existing pool, running migrations.
    pub async fn from_pool(pool: PgPool) -> Result<Self, StorageError> {
        let store = Self {
            pool,
            broadcast_tx: broadcast::channel(DEFAULT_BROADCAST_SIZE).0,
        };
        store.migrate().await?;
        Ok(store)
    }

    /// Subscribe to the live scan-event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.broadcast_tx.subscribe()
    }

    async fn migrate(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS bags (
                bag_tag TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                risk_score DOUBLE PRECISION NOT NULL,
                location TEXT,
                updated_at TIMESTAMPTZ NOT NULL,
                data JSONB NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS scan_events (
                event_id UUID PRIMARY KEY,
                bag_tag TEXT NOT NULL,
                scan_timestamp TIMESTAMPTZ NOT NULL,
                location TEXT NOT NULL,
                data JSONB NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_scan_events_bag_tag ON scan_events(bag_tag)")
            .execute(&self.pool)
            .await
            .map_err(backend_err)?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_scan_events_location_ts ON scan_events(location, scan_timestamp)",
        )
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS risk_assessments (
                bag_tag TEXT NOT NULL,
                assessed_at TIMESTAMPTZ NOT NULL,
                data JSONB NOT NULL,
                PRIMARY KEY (bag_tag, assessed_at)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS exception_cases (
                case_id UUID PRIMARY KEY,
                bag_tag TEXT NOT NULL,
                status TEXT NOT NULL,
                data JSONB NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pirs (
                pir_number TEXT PRIMARY KEY,
                bag_tag TEXT NOT NULL,
                status TEXT NOT NULL,
                data JSONB NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS courier_dispatches (
                dispatch_id UUID PRIMARY KEY,
                bag_tag TEXT NOT NULL,
                data JSONB NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS notifications (
                notification_id UUID PRIMARY KEY,
                bag_tag TEXT NOT NULL,
                template_id TEXT NOT NULL,
                channel TEXT NOT NULL,
                sent_at TIMESTAMPTZ NOT NULL,
                data JSONB NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS reconciliation_debts (
                debt_id UUID PRIMARY KEY,
                resolved BOOLEAN NOT NULL DEFAULT FALSE,
                data JSONB NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;

        Ok(())
    }
}

fn backend_err(e: sqlx::Error) -> StorageError {
    match &e {
        sqlx::Error::PoolTimedOut => StorageError::PoolExhausted,
        sqlx::Error::Io(_) => StorageError::Unavailable(e.to_string()),
        _ => StorageError::Backend(e.to_string()),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, StorageError> {
    serde_json::to_value(value).map_err(|e| StorageError::Backend(e.to_string()))
}

fn from_json<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> Result<T, StorageError> {
    serde_json::from_value(value).map_err(|e| StorageError::Backend(e.to_string()))
}

#[async_trait]
impl RelationalStore for PostgresStore {
    async fn upsert_bag(&self, bag: &Bag) -> Result<(), StorageError> {
        let data = to_json(bag)?;
        sqlx::query(
            r#"
            INSERT INTO bags (bag_tag, status, risk_score, location, updated_at, data)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (bag_tag) DO UPDATE SET
                status = EXCLUDED.status,
                risk_score = EXCLUDED.risk_score,
                location = EXCLUDED.location,
                updated_at = EXCLUDED.updated_at,
                data = EXCLUDED.data
            "#,
        )
        .bind(bag.bag_tag.as_str())
        .bind(bag.status.to_string())
        .bind(bag.risk_score)
        .bind(&bag.current_location)
        .bind(bag.updated_at)
        .bind(data)
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;
        Ok(())
    }

    async fn get_bag(&self, tag: &BagTag) -> Result<Option<Bag>, StorageError> {
        let row = sqlx::query("SELECT data FROM bags WHERE bag_tag = $1")
            .bind(tag.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend_err)?;
        row.map(|r| from_json(r.get::<serde_json::Value, _>("data")))
            .transpose()
    }

    async fn list_bags(&self, filter: &BagFilter) -> Result<Vec<Bag>, StorageError> {
        let mut builder = QueryBuilder::new("SELECT data FROM bags WHERE 1 = 1");
        if let Some(status) = filter.status {
            builder.push(" AND status = ").push_bind(status.to_string());
        }
        if let Some(min) = filter.risk_min {
            builder.push(" AND risk_score >= ").push_bind(min);
        }
        if let Some(max) = filter.risk_max {
            builder.push(" AND risk_score <= ").push_bind(max);
        }
        if let Some(location) = &filter.location {
            builder.push(" AND location = ").push_bind(location.clone());
        }
        builder.push(" ORDER BY bag_tag");
        if let Some(limit) = filter.limit {
            builder.push(" LIMIT ").push_bind(limit as i64);
        }
        if let Some(offset) = filter.offset {
            builder.push(" OFFSET ").push_bind(offset as i64);
        }

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(backend_err)?;
        rows.into_iter()
            .map(|r| from_json(r.get::<serde_json::Value, _>("data")))
            .collect()
    }

    async fn insert_scan_event(&self, event: &ScanEvent) -> Result<bool, StorageError> {
        let data = to_json(event)?;
        let result = sqlx::query(
            r#"
            INSERT INTO scan_events (event_id, bag_tag, scan_timestamp, location, data)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(event.event_id)
        .bind(event.bag_tag.as_str())
        .bind(event.timestamp)
        .bind(&event.location)
        .bind(data)
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;

        let inserted = result.rows_affected() > 0;
        if inserted {
            let _ = self.broadcast_tx.send(event.clone());
        }
        Ok(inserted)
    }

    async fn scan_event_exists(&self, event_id: Uuid) -> Result<bool, StorageError> {
        let row = sqlx::query("SELECT 1 FROM scan_events WHERE event_id = $1")
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend_err)?;
        Ok(row.is_some())
    }

    async fn scans_for_bag(&self, tag: &BagTag) -> Result<Vec<ScanEvent>, StorageError> {
        let rows = sqlx::query(
            "SELECT data FROM scan_events WHERE bag_tag = $1 ORDER BY scan_timestamp ASC",
        )
        .bind(tag.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(backend_err)?;
        rows.into_iter()
            .map(|r| from_json(r.get::<serde_json::Value, _>("data")))
            .collect()
    }

    async fn insert_risk_assessment(&self, assessment: &RiskAssessment) -> Result<(), StorageError> {
        let data = to_json(assessment)?;
        sqlx::query(
            r#"
            INSERT INTO risk_assessments (bag_tag, assessed_at, data)
            VALUES ($1, $2, $3)
            ON CONFLICT (bag_tag, assessed_at) DO NOTHING
            "#,
        )
        .bind(assessment.bag_tag.as_str())
        .bind(assessment.assessed_at)
        .bind(data)
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;
        Ok(())
    }

    async fn latest_risk_assessment(
        &self,
        tag: &BagTag,
    ) -> Result<Option<RiskAssessment>, StorageError> {
        let row = sqlx::query(
            "SELECT data FROM risk_assessments WHERE bag_tag = $1 ORDER BY assessed_at DESC LIMIT 1",
        )
        .bind(tag.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend_err)?;
        row.map(|r| from_json(r.get::<serde_json::Value, _>("data")))
            .transpose()
    }

    async fn open_case(&self, case: &ExceptionCase) -> Result<(), StorageError> {
        let data = to_json(case)?;
        sqlx::query(
            r#"
            INSERT INTO exception_cases (case_id, bag_tag, status, data)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (case_id) DO NOTHING
            "#,
        )
        .bind(case.case_id)
        .bind(case.bag_tag.as_str())
        .bind(case_status_label(case.status))
        .bind(data)
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;
        Ok(())
    }

    async fn get_case(&self, case_id: CaseId) -> Result<Option<ExceptionCase>, StorageError> {
        let row = sqlx::query("SELECT data FROM exception_cases WHERE case_id = $1")
            .bind(case_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend_err)?;
        row.map(|r| from_json(r.get::<serde_json::Value, _>("data")))
            .transpose()
    }

    async fn open_case_for_bag(&self, tag: &BagTag) -> Result<Option<ExceptionCase>, StorageError> {
        let row = sqlx::query(
            "SELECT data FROM exception_cases WHERE bag_tag = $1 AND status IN ('open', 'in_progress') LIMIT 1",
        )
        .bind(tag.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend_err)?;
        row.map(|r| from_json(r.get::<serde_json::Value, _>("data")))
            .transpose()
    }

    async fn update_case_status(&self, case_id: CaseId, to: CaseStatus) -> Result<(), StorageError> {
        let mut case: ExceptionCase = self
            .get_case(case_id)
            .await?
            .ok_or_else(|| StorageError::NotFound(case_id.to_string()))?;
        case.transition(to, chrono::Utc::now())
            .map_err(|_| StorageError::InvalidTransition(case_id))?;
        let data = to_json(&case)?;
        sqlx::query("UPDATE exception_cases SET status = $2, data = $3 WHERE case_id = $1")
            .bind(case_id)
            .bind(case_status_label(case.status))
            .bind(data)
            .execute(&self.pool)
            .await
            .map_err(backend_err)?;
        Ok(())
    }

    async fn update_case_priority(
        &self,
        case_id: CaseId,
        priority: bag_types::CasePriority,
    ) -> Result<(), StorageError> {
        let mut case: ExceptionCase = self
            .get_case(case_id)
            .await?
            .ok_or_else(|| StorageError::NotFound(case_id.to_string()))?;
        case.reprioritize(priority, chrono::Utc::now());
        let data = to_json(&case)?;
        sqlx::query("UPDATE exception_cases SET data = $2 WHERE case_id = $1")
            .bind(case_id)
            .bind(data)
            .execute(&self.pool)
            .await
            .map_err(backend_err)?;
        Ok(())
    }

    async fn upsert_pir(&self, pir: &Pir) -> Result<(), StorageError> {
        if matches!(pir.status, bag_types::PirStatus::Open) {
            let conflict = sqlx::query(
                "SELECT 1 FROM pirs WHERE bag_tag = $1 AND pir_number <> $2 AND status = 'open'",
            )
            .bind(pir.bag_tag.as_str())
            .bind(&pir.pir_number)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend_err)?;
            if conflict.is_some() {
                return Err(StorageError::DuplicateKey(format!(
                    "bag {} already has an open PIR",
                    pir.bag_tag
                )));
            }
        }
        let data = to_json(pir)?;
        sqlx::query(
            r#"
            INSERT INTO pirs (pir_number, bag_tag, status, data)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (pir_number) DO UPDATE SET
                status = EXCLUDED.status,
                data = EXCLUDED.data
            "#,
        )
        .bind(&pir.pir_number)
        .bind(pir.bag_tag.as_str())
        .bind(pir_status_label(pir.status))
        .bind(data)
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;
        Ok(())
    }

    async fn open_pir_for_bag(&self, tag: &BagTag) -> Result<Option<Pir>, StorageError> {
        let row = sqlx::query("SELECT data FROM pirs WHERE bag_tag = $1 AND status = 'open' LIMIT 1")
            .bind(tag.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend_err)?;
        row.map(|r| from_json(r.get::<serde_json::Value, _>("data")))
            .transpose()
    }

    async fn upsert_courier_dispatch(&self, dispatch: &CourierDispatch) -> Result<(), StorageError> {
        let data = to_json(dispatch)?;
        sqlx::query(
            r#"
            INSERT INTO courier_dispatches (dispatch_id, bag_tag, data)
            VALUES ($1, $2, $3)
            ON CONFLICT (dispatch_id) DO UPDATE SET data = EXCLUDED.data
            "#,
        )
        .bind(dispatch.dispatch_id)
        .bind(dispatch.bag_tag.as_str())
        .bind(data)
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;
        Ok(())
    }

    async fn get_courier_dispatch(
        &self,
        dispatch_id: CourierDispatchId,
    ) -> Result<Option<CourierDispatch>, StorageError> {
        let row = sqlx::query("SELECT data FROM courier_dispatches WHERE dispatch_id = $1")
            .bind(dispatch_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend_err)?;
        row.map(|r| from_json(r.get::<serde_json::Value, _>("data")))
            .transpose()
    }

    async fn insert_notification(&self, notification: &Notification) -> Result<(), StorageError> {
        let data = to_json(notification)?;
        sqlx::query(
            r#"
            INSERT INTO notifications (notification_id, bag_tag, template_id, channel, sent_at, data)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(notification.notification_id)
        .bind(notification.bag_tag.as_str())
        .bind(&notification.template_id)
        .bind(channel_label(notification.channel))
        .bind(chrono::Utc::now())
        .bind(data)
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;
        Ok(())
    }

    async fn recent_notification_exists(
        &self,
        tag: &BagTag,
        template_id: &str,
        channel: NotificationChannel,
    ) -> Result<bool, StorageError> {
        let row = sqlx::query(
            r#"
            SELECT 1 FROM notifications
            WHERE bag_tag = $1 AND template_id = $2 AND channel = $3
              AND sent_at > NOW() - INTERVAL '10 minutes'
            LIMIT 1
            "#,
        )
        .bind(tag.as_str())
        .bind(template_id)
        .bind(channel_label(channel))
        .fetch_optional(&self.pool)
        .await
        .map_err(backend_err)?;
        Ok(row.is_some())
    }

    async fn record_debt(&self, debt: &ReconciliationDebt) -> Result<(), StorageError> {
        let data = to_json(debt)?;
        sqlx::query(
            "INSERT INTO reconciliation_debts (debt_id, resolved, data) VALUES ($1, FALSE, $2) ON CONFLICT (debt_id) DO NOTHING",
        )
        .bind(debt.debt_id)
        .bind(data)
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;
        Ok(())
    }

    async fn outstanding_debts(&self) -> Result<Vec<ReconciliationDebt>, StorageError> {
        let rows = sqlx::query("SELECT data FROM reconciliation_debts WHERE resolved = FALSE")
            .fetch_all(&self.pool)
            .await
            .map_err(backend_err)?;
        rows.into_iter()
            .map(|r| from_json(r.get::<serde_json::Value, _>("data")))
            .collect()
    }

    async fn resolve_debt(&self, debt_id: Uuid) -> Result<(), StorageError> {
        sqlx::query("UPDATE reconciliation_debts SET resolved = TRUE WHERE debt_id = $1")
            .bind(debt_id)
            .execute(&self.pool)
            .await
            .map_err(backend_err)?;
        Ok(())
    }
}

fn channel_label(channel: NotificationChannel) -> &'static str {
    match channel {
        NotificationChannel::Sms => "sms",
        NotificationChannel::Email => "email",
        NotificationChannel::Push => "push",
    }
}

fn pir_status_label(status: bag_types::PirStatus) -> &'static str {
    match status {
        bag_types::PirStatus::Open => "open",
        bag_types::PirStatus::Closed => "closed",
    }
}

fn case_status_label(status: CaseStatus) -> &'static str {
    match status {
        CaseStatus::Open => "open",
        CaseStatus::InProgress => "in_progress",
        CaseStatus::Resolved => "resolved",
        CaseStatus::Closed => "closed",
    }
}

/// Graph-projection convenience: `PostgresStore` also satisfies `GraphStore`
/// via plain SQL joins over the same tables when no dedicated graph database
/// is configured (spec §9's "network partition between relational and graph
/// stores" fallback).
#[async_trait]
impl GraphStore for PostgresStore {
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
        _tag: &BagTag,
        _flight_identifier: &str,
    ) -> Result<(), StorageError> {
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

    async fn get_flight_bags(&self, _flight_identifier: &str) -> Result<Vec<Bag>, StorageError> {
        // Flight membership is not tracked relationally (spec §3's ScanEvent
        // carries no flight number); a real graph driver owns this query.
        Ok(Vec::new())
    }

    async fn identify_bottlenecks(
        &self,
        window_hours: u32,
        min_bags: u32,
    ) -> Result<Vec<Bottleneck>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT location, COUNT(*) AS bag_count
            FROM scan_events
            WHERE scan_timestamp > NOW() - ($1 || ' hours')::interval
            GROUP BY location
            HAVING COUNT(*) >= $2
            ORDER BY bag_count DESC
            "#,
        )
        .bind(window_hours.to_string())
        .bind(min_bags as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(backend_err)?;

        rows.into_iter()
            .map(|r| {
                Ok(Bottleneck {
                    location: r.get("location"),
                    bag_count: r.get::<i64, _>("bag_count") as u64,
                    // Median dwell time needs a window function over
                    // consecutive per-bag scans; left to the analytics
                    // query surface (spec §9), not this driver's concern.
                    median_dwell_seconds: 0.0,
                })
            })
            .collect::<Result<Vec<_>, StorageError>>()
    }
}

