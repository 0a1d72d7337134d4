//! Command implementations dispatched from [`crate::cli::Commands`].

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use bag_adapters::{InMemoryCourierService, InMemoryPirService, LogNotificationSink};
use bag_config::Config;
use bag_core::{Core, GraphBackend, RelationalBackend};
use bag_ingest_bus::PublishOutcome;
use bag_parsers::parse_json_scan;
use chrono::Utc;

/// Source system tag recorded on events ingested through this CLI.
const INGEST_SOURCE_SYSTEM: &str = "bag-cli";

/// Reconciliation sweep cadence for the `daemon` command.
const RECONCILE_INTERVAL: Duration = Duration::from_secs(30);

/// Build a [`Core`] from the process environment.
///
/// Always wires the in-memory PIR/courier/notification defaults: a real
/// deployment would inject adapters backed by the airline's actual
/// WorldTracer/courier-network/SMS-gateway integrations here instead.
async fn build_core(config: Config) -> Result<Core> {
    Core::new(
        config,
        RelationalBackend::Memory,
        GraphBackend::Memory,
        Arc::new(InMemoryPirService::default()),
        Arc::new(InMemoryCourierService::default()),
        Arc::new(LogNotificationSink::default()),
    )
    .await
    .context("failed to build application core")
}

/// Ingest newline-delimited JSON scan records from a file, run them through
/// one processor, and report the outcome.
pub async fn ingest(file: &Path) -> Result<()> {
    let config = Config::from_env().context("failed to load configuration")?;
    let mut core = build_core(config).await?;
    core.spawn_processors(1);

    let contents = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;

    let mut appended = 0u64;
    let mut duplicate = 0u64;
    let mut failed = 0u64;

    for (line_no, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match parse_json_scan(line.as_bytes(), INGEST_SOURCE_SYSTEM, Utc::now()) {
            Ok(parsed_events) => {
                for parsed in parsed_events {
                    match core.ingest(parsed.event).await {
                        PublishOutcome::Appended(id) => {
                            info!(ingest_id = %id, "accepted");
                            appended += 1;
                        }
                        PublishOutcome::Duplicate => duplicate += 1,
                    }
                }
            }
            Err(err) => {
                warn!(line = line_no + 1, %err, "failed to parse scan record");
                failed += 1;
            }
        }
    }

    // Give the spawned processor a moment to drain what was just published.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let stream_info = core.stream_info().await?;
    core.shutdown().await;

    println!("Ingest complete: {appended} accepted, {duplicate} duplicate, {failed} failed to parse");
    println!(
        "Stream state: {} pending, {} dead-lettered, {} outstanding debts",
        stream_info.pending, stream_info.dlq_depth, stream_info.outstanding_debts
    );
    Ok(())
}

/// Run the processor pool until interrupted with Ctrl-C.
pub async fn daemon(workers: usize) -> Result<()> {
    let config = Config::from_env().context("failed to load configuration")?;
    let mut core = build_core(config).await?;
    core.spawn_processors(workers);
    core.spawn_reconciler(RECONCILE_INTERVAL).await;

    info!(workers, "daemon running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await.context("failed to listen for shutdown signal")?;

    info!("shutdown signal received");
    core.shutdown().await;
    Ok(())
}

/// Print the `GET /events/stream/info` snapshot (spec §6).
pub async fn query_stream_info() -> Result<()> {
    let config = Config::from_env().context("failed to load configuration")?;
    let core = build_core(config).await?;
    let info = core.stream_info().await?;
    core.shutdown().await;

    println!("pending:            {}", info.pending);
    println!("dead-lettered:       {}", info.dlq_depth);
    println!("outstanding debts:   {}", info.outstanding_debts);
    Ok(())
}

/// Print a bag's authoritative relational record.
pub async fn query_bag(tag: &str) -> Result<()> {
    let config = Config::from_env().context("failed to load configuration")?;
    let core = build_core(config).await?;
    let bag_tag = bag_types::BagTag::new(tag).context("invalid bag tag")?;
    let bag = core.get_bag(&bag_tag).await?;
    core.shutdown().await;

    match bag {
        Some(bag) => println!("{bag:#?}"),
        None => println!("no bag found for tag {tag}"),
    }
    Ok(())
}

/// Print a bag's full scan journey from the graph projection.
pub async fn query_journey(tag: &str) -> Result<()> {
    let config = Config::from_env().context("failed to load configuration")?;
    let core = build_core(config).await?;
    let bag_tag = bag_types::BagTag::new(tag).context("invalid bag tag")?;
    let journey = core.get_journey(&bag_tag).await?;
    core.shutdown().await;

    match journey {
        Some(journey) => println!("{journey:#?}"),
        None => println!("no journey found for tag {tag}"),
    }
    Ok(())
}

/// Trigger one reconciliation sweep immediately.
pub async fn reconcile() -> Result<()> {
    let config = Config::from_env().context("failed to load configuration")?;
    let core = build_core(config).await?;
    let report = core.reconcile_once().await?;
    core.shutdown().await;

    println!("reconciliation sweep: {} resolved, {} still failing", report.resolved, report.still_failing);
    Ok(())
}
