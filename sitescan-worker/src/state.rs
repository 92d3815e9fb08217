//! Component wiring for the worker process.

use anyhow::Context;
use sitescan_browser::{BrowserEngine, BrowserPool, PageProfile};
use sitescan_core::{AppConfig, QueueBackend};
use sitescan_db::{AnalysisStore, Database, EphemeralStore, SqliteJobQueue};
use sitescan_queue::{BackoffQueue, InMemoryQueue, JobQueue, RetryPolicy};
use sitescan_scanner::{
    build_client, AnalysisOrchestrator, AnalysisService, BroadcastPublisher, CapabilityRegistry,
    HostValidator, NoopPublisher, NotificationPublisher, ScanSettings, Worker, WorkerSettings,
};
use std::sync::Arc;
use std::time::Duration;

/// Everything the worker process shares between its tasks.
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<dyn AnalysisStore>,
    pub queue: Arc<dyn JobQueue>,
    /// `None` when notifications are disabled
    pub events: Option<Arc<BroadcastPublisher>>,
    pub service: AnalysisService,
    pub orchestrator: Arc<AnalysisOrchestrator>,

    browser: Arc<BrowserPool>,
    engine: Arc<BrowserEngine>,
    database: Option<Database>,
}

impl AppState {
    /// Open storage and build every component described by `config`.
    ///
    /// The browser itself is launched lazily on the first page request.
    pub async fn initialize(mut config: AppConfig) -> anyhow::Result<Self> {
        config.normalize();

        let database = if config.storage.skip_persistence {
            tracing::warn!("Persistence disabled, records live in memory only");
            None
        } else {
            Some(open_database(&config).await?)
        };

        let store: Arc<dyn AnalysisStore> = match &database {
            Some(db) => Arc::new(db.clone()),
            None => Arc::new(EphemeralStore::new()),
        };
        let queue = build_queue(&config, database.as_ref())?;

        let events = config
            .notifications
            .enabled
            .then(|| Arc::new(BroadcastPublisher::new(config.notifications.channel_capacity)));
        let publisher: Arc<dyn NotificationPublisher> = match &events {
            Some(events) => events.clone(),
            None => Arc::new(NoopPublisher),
        };

        let settings = ScanSettings::from_config(&config);
        let engine = Arc::new(BrowserEngine::new(config.browser.clone()));
        let profile =
            PageProfile::from_config(&config.browser).with_user_agent(&settings.user_agent);
        let browser = Arc::new(BrowserPool::new(
            engine.clone(),
            profile,
            config.browser.max_sessions,
        ));

        let http = build_client(&settings).context("Failed to build HTTP client")?;
        let orchestrator = Arc::new(AnalysisOrchestrator::new(
            Arc::clone(&store),
            Arc::clone(&browser),
            Arc::new(CapabilityRegistry::with_defaults()),
            publisher,
            http,
            settings,
        ));

        let service = AnalysisService::new(
            HostValidator::system(config.security.max_url_length),
            Arc::clone(&store),
            Arc::clone(&queue),
        );

        tracing::info!(
            queue = ?config.queue.backend,
            persistence = database.is_some(),
            notifications = events.is_some(),
            "Components initialized"
        );

        Ok(Self {
            config,
            store,
            queue,
            events,
            service,
            orchestrator,
            browser,
            engine,
            database,
        })
    }

    /// A polling worker over the shared queue.
    pub fn worker(&self) -> Worker {
        Worker::new(
            Arc::clone(&self.queue),
            Arc::clone(&self.orchestrator),
            WorkerSettings::from_config(&self.config.worker),
        )
    }

    /// Summaries older than this are purged.
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.config.storage.recent_retention_days))
    }

    /// Stop handing out browser sessions, close the browser and the pool.
    pub async fn shutdown(self) {
        self.browser.close();
        self.engine.shutdown().await;
        if let Some(db) = self.database {
            db.close().await;
        }
    }
}

async fn open_database(config: &AppConfig) -> anyhow::Result<Database> {
    let path = config
        .database_path()
        .context("Failed to determine database path")?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let db = Database::new(&path)
        .await
        .with_context(|| format!("Failed to open database at {}", path.display()))?;
    db.run_migrations()
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database: {}", path.display());
    Ok(db)
}

fn build_queue(
    config: &AppConfig,
    database: Option<&Database>,
) -> anyhow::Result<Arc<dyn JobQueue>> {
    let policy = RetryPolicy::new(
        config.queue.max_attempts,
        Duration::from_millis(config.queue.backoff_base_ms),
    );

    let queue: Arc<dyn JobQueue> = match config.queue.backend {
        QueueBackend::Memory => Arc::new(InMemoryQueue::new()),
        QueueBackend::Backoff => Arc::new(BackoffQueue::new(policy)),
        QueueBackend::Sqlite => {
            let db = database.context("SQLite queue requires persistence to be enabled")?;
            Arc::new(SqliteJobQueue::new(
                db.pool().clone(),
                policy,
                Duration::from_secs(config.queue.lease_secs),
            ))
        }
    };
    Ok(queue)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ephemeral_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.storage.skip_persistence = true;
        config
    }

    #[tokio::test]
    async fn test_skip_persistence_uses_backoff_queue() {
        let state = AppState::initialize(ephemeral_config()).await.unwrap();
        assert_eq!(state.config.queue.backend, QueueBackend::Backoff);
        assert!(state.database.is_none());
        assert!(state.queue.is_empty().await.unwrap());
        state.shutdown().await;
    }

    #[tokio::test]
    async fn test_sqlite_queue_needs_database() {
        let mut config = AppConfig::default();
        config.queue.backend = QueueBackend::Sqlite;
        assert!(build_queue(&config, None).is_err());

        config.queue.backend = QueueBackend::Memory;
        assert!(build_queue(&config, None).is_ok());
    }

    #[tokio::test]
    async fn test_notifications_toggle() {
        let mut config = ephemeral_config();
        config.notifications.enabled = false;
        let state = AppState::initialize(config).await.unwrap();
        assert!(state.events.is_none());
        state.shutdown().await;
    }

    #[tokio::test]
    async fn test_retention_window() {
        let mut config = ephemeral_config();
        config.storage.recent_retention_days = 7;
        let state = AppState::initialize(config).await.unwrap();
        assert_eq!(state.retention(), chrono::Duration::days(7));
        state.shutdown().await;
    }
}
