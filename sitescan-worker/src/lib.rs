//! Sitescan worker process.
//!
//! Thin shell around the pipeline crates: loads configuration, wires the
//! components together and drives the worker loop. The analysis logic lives in
//! the `crates/` directory.

pub mod cli;
pub mod error;
pub mod state;

use anyhow::Context;
use cli::{Cli, Command};
use error::CommandError;
use serde::Serialize;
use sitescan_core::{AnalysisId, AppConfig};
use sitescan_db::AnalysisStore;
use sitescan_scanner::{BroadcastPublisher, Worker};
use state::AppState;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const PURGE_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Initialize tracing subscriber for logging
pub fn init_tracing() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sitescan=debug"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// Load configuration and execute `cli`.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    info!("Starting Sitescan worker v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load_with_env().context("Failed to load configuration")?;
    let state = AppState::initialize(config).await?;

    let outcome = execute(&state, cli.command.unwrap_or_default()).await;
    state.shutdown().await;
    outcome
}

/// Run one command against initialized state.
pub async fn execute(state: &AppState, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Run { urls, capabilities } => {
            submit_all(state, &urls, &capabilities).await?;
            serve(state).await
        }
        Command::Scan {
            url,
            capabilities,
            wait_secs,
        } => {
            let started = state
                .service
                .start_analysis(&url, &capabilities)
                .await
                .map_err(CommandError::from)?;
            info!(analysis_id = %started.id, "Waiting for analysis");
            let record = scan_to_completion(state, &started.id, Duration::from_secs(wait_secs))
                .await?;
            print_json(&record)
        }
        Command::Status { id } => {
            let id = parse_id(id)?;
            let status = state
                .service
                .get_status(&id)
                .await
                .map_err(CommandError::from)?;
            print_json(&serde_json::json!({ "id": id.as_str(), "status": status }))
        }
        Command::Result { id } => {
            let record = state
                .service
                .get_result(&parse_id(id)?)
                .await
                .map_err(CommandError::from)?;
            print_json(&record)
        }
        Command::Recent { limit } => {
            let recent = state
                .service
                .list_recent(limit)
                .await
                .map_err(CommandError::from)?;
            print_json(&recent)
        }
        Command::Purge => {
            let removed = state
                .store
                .purge_expired_recent(state.retention())
                .await
                .context("Failed to purge recent results")?;
            print_json(&serde_json::json!({ "removed": removed }))
        }
    }
}

/// Submit each URL, skipping the ones the service rejects. Returns how many
/// were queued.
pub async fn submit_all(
    state: &AppState,
    urls: &[String],
    capabilities: &[String],
) -> anyhow::Result<usize> {
    let mut queued = 0;
    for url in urls {
        match state.service.start_analysis(url, capabilities).await {
            Ok(started) => {
                print_json(&started)?;
                queued += 1;
            }
            Err(e) => {
                let err = CommandError::from(e);
                warn!(%url, code = %err.code, "Skipping URL: {}", err.message);
            }
        }
    }
    if queued < urls.len() {
        warn!(queued, rejected = urls.len() - queued, "Some URLs were not queued");
    }
    Ok(queued)
}

/// Poll the queue until Ctrl-C, purging expired summaries on the side.
async fn serve(state: &AppState) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    let purge = spawn_retention_purge(
        Arc::clone(&state.store),
        state.retention(),
        shutdown.clone(),
    );
    let events = state
        .events
        .as_ref()
        .map(|events| spawn_event_log(events, shutdown.clone()));

    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown requested"),
            Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
        }
        signal.cancel();
    });

    state.worker().run_until(shutdown.clone()).await;

    shutdown.cancel();
    let _ = purge.await;
    if let Some(events) = events {
        let _ = events.await;
    }
    Ok(())
}

/// Process jobs in the foreground until `id` reaches a terminal status.
pub async fn scan_to_completion(
    state: &AppState,
    id: &AnalysisId,
    wait: Duration,
) -> anyhow::Result<sitescan_db::AnalysisRecord> {
    let worker = state.worker();
    let poll = Duration::from_millis(state.config.worker.poll_interval_ms.clamp(10, 1000));

    let finished = tokio::time::timeout(wait, drive_until_terminal(state, &worker, id, poll)).await;

    match finished {
        Ok(result) => result?,
        Err(_) => anyhow::bail!("Analysis {id} did not finish within {}s", wait.as_secs()),
    }

    Ok(state
        .service
        .get_result(id)
        .await
        .map_err(CommandError::from)?)
}

async fn drive_until_terminal(
    state: &AppState,
    worker: &Worker,
    id: &AnalysisId,
    poll: Duration,
) -> anyhow::Result<()> {
    loop {
        let status = state
            .service
            .get_status(id)
            .await
            .map_err(CommandError::from)?;
        if status.is_terminal() {
            return Ok(());
        }
        if worker.tick().await? == 0 {
            tokio::time::sleep(poll).await;
        }
    }
}

/// Run `purge_expired_recent` every hour until `shutdown` fires.
pub fn spawn_retention_purge(
    store: Arc<dyn AnalysisStore>,
    retention: chrono::Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PURGE_INTERVAL);
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    match store.purge_expired_recent(retention).await {
                        Ok(removed) => debug!(removed, "Retention purge finished"),
                        Err(e) => warn!("Retention purge failed: {}", e),
                    }
                }
            }
        }
    })
}

fn spawn_event_log(events: &BroadcastPublisher, shutdown: CancellationToken) -> JoinHandle<()> {
    let mut rx = events.subscribe_all();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                event = rx.recv() => match event {
                    Ok(event) => info!(
                        analysis_id = %event.analysis_id,
                        room = %event.room,
                        event = event.event.as_str(),
                        "Notification"
                    ),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Event log lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    })
}

fn parse_id(id: String) -> Result<AnalysisId, CommandError> {
    AnalysisId::new(id).map_err(|e| CommandError::new("VALIDATION_ERROR", e.to_string()))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{out}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sitescan_core::CapabilitySet;
    use sitescan_db::{AnalysisRecord, Claim, Completion, EphemeralStore, RecentResultSummary};

    #[tokio::test(start_paused = true)]
    async fn test_retention_purge_runs_immediately_and_stops() {
        let store = Arc::new(EphemeralStore::new());
        let record = AnalysisRecord::pending("https://example.com", CapabilitySet::empty());
        store.create(&record).await.unwrap();
        assert!(matches!(store.claim(&record.id).await.unwrap(), Claim::Claimed(_)));
        store
            .finish(&record.id, &Completion::failed("boom"))
            .await
            .unwrap();
        let failed = store.get(&record.id).await.unwrap().unwrap();
        let mut summary = RecentResultSummary::for_record(&failed);
        summary.created_at = chrono::Utc::now() - chrono::Duration::days(40);
        store.insert_recent(&summary).await.unwrap();

        let shutdown = CancellationToken::new();
        let handle = spawn_retention_purge(
            store.clone(),
            chrono::Duration::days(30),
            shutdown.clone(),
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(store.list_recent(10).await.unwrap().is_empty());

        shutdown.cancel();
        handle.await.unwrap();
    }
}
