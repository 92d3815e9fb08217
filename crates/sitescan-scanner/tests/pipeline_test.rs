use async_trait::async_trait;
use serde_json::{json, Value};
use sitescan_browser::{
    BrowserError, BrowserPool, LoadedPage, PageHandle, PageProfile, PageProvider,
};
use sitescan_core::{AnalysisId, AnalysisStatus, Capability, CapabilitySet};
use sitescan_db::{
    AnalysisRecord, AnalysisStore, CapabilityOutcome, Claim, Database, EphemeralStore,
    SqliteJobQueue,
};
use sitescan_queue::{BackoffQueue, InMemoryQueue, Job, JobQueue, RetryPolicy};
use sitescan_scanner::{
    AnalysisOrchestrator, AnalysisService, BroadcastPublisher, CapabilityError,
    CapabilityRegistry, HostValidator, Input, NoopPublisher, OrchestrationError, ProcessOutcome,
    ScanCapability, ScanContext, ScanSettings, ServiceError, StaticResolver, Worker,
    WorkerSettings,
};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const PAGE: &str = r#"<html lang="en"><head><title>Example Domain</title>
<meta name="description" content="Illustrative example page"></head>
<body><h1>Example Domain</h1><p>Hello</p></body></html>"#;

#[derive(Default)]
struct BrowserStats {
    pages_opened: AtomicUsize,
    pages_closed: AtomicUsize,
    loads: AtomicUsize,
    fail_loads: AtomicBool,
}

struct FakePage(Arc<BrowserStats>);

#[async_trait]
impl PageHandle for FakePage {
    async fn load(&self, url: &str, _timeout: Duration) -> sitescan_browser::Result<LoadedPage> {
        self.0.loads.fetch_add(1, Ordering::SeqCst);
        if self.0.fail_loads.load(Ordering::SeqCst) {
            return Err(BrowserError::Navigation("net::ERR_CONNECTION_REFUSED".to_string()));
        }
        Ok(LoadedPage {
            final_url: url.to_string(),
            html: PAGE.to_string(),
            title: Some("Example Domain".to_string()),
        })
    }

    async fn evaluate(&self, _script: &str) -> sitescan_browser::Result<Value> {
        Ok(Value::Null)
    }

    async fn screenshot_jpeg(&self, _quality: u8) -> sitescan_browser::Result<Vec<u8>> {
        Ok(vec![0xff, 0xd8, 0xff])
    }

    async fn close(&self) -> sitescan_browser::Result<()> {
        self.0.pages_closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct FakeBrowser(Arc<BrowserStats>);

#[async_trait]
impl PageProvider for FakeBrowser {
    async fn new_page(
        &self,
        _profile: &PageProfile,
    ) -> sitescan_browser::Result<Box<dyn PageHandle>> {
        self.0.pages_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakePage(Arc::clone(&self.0))))
    }
}

#[derive(Clone, Copy)]
enum Behaviour {
    Ok,
    Error,
    Panic,
    Hang,
}

struct StubCapability {
    capability: Capability,
    behaviour: Behaviour,
    runs: Arc<AtomicUsize>,
}

impl StubCapability {
    fn new(capability: Capability, behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            capability,
            behaviour,
            runs: Arc::new(AtomicUsize::new(0)),
        })
    }
}

#[async_trait]
impl ScanCapability for StubCapability {
    fn capability(&self) -> Capability {
        self.capability
    }

    fn inputs(&self) -> &'static [Input] {
        &[Input::Html]
    }

    async fn run(&self, ctx: &ScanContext<'_>) -> Result<Value, CapabilityError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        match self.behaviour {
            Behaviour::Ok => Ok(json!({
                "capability": self.capability.as_str(),
                "sawHtml": ctx.html().is_ok(),
            })),
            Behaviour::Error => Err(CapabilityError::Failed("selector engine crashed".to_string())),
            Behaviour::Panic => panic!("capability blew up"),
            Behaviour::Hang => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(Value::Null)
            }
        }
    }
}

struct Harness {
    store: Arc<dyn AnalysisStore>,
    stats: Arc<BrowserStats>,
    publisher: Arc<BroadcastPublisher>,
    orchestrator: Arc<AnalysisOrchestrator>,
}

fn settings() -> ScanSettings {
    ScanSettings {
        capability_timeout: Duration::from_millis(100),
        ..ScanSettings::default()
    }
}

fn harness_with(store: Arc<dyn AnalysisStore>, registry: CapabilityRegistry) -> Harness {
    let stats = Arc::new(BrowserStats::default());
    let browser = Arc::new(BrowserPool::new(
        Arc::new(FakeBrowser(Arc::clone(&stats))),
        PageProfile::randomized(),
        2,
    ));
    let publisher = Arc::new(BroadcastPublisher::new(16));
    let orchestrator = Arc::new(AnalysisOrchestrator::new(
        Arc::clone(&store),
        browser,
        Arc::new(registry),
        publisher.clone(),
        reqwest::Client::new(),
        settings(),
    ));
    Harness {
        store,
        stats,
        publisher,
        orchestrator,
    }
}

fn all_ok() -> CapabilityRegistry {
    let mut registry = CapabilityRegistry::new();
    for capability in Capability::ALL {
        registry.register(StubCapability::new(capability, Behaviour::Ok));
    }
    registry
}

async fn pending(store: &Arc<dyn AnalysisStore>, tags: &[&str]) -> Job {
    let requested = CapabilitySet::parse(tags).unwrap();
    let record = AnalysisRecord::pending("https://example.com/", requested.clone());
    store.create(&record).await.unwrap();
    let mut job = Job::new(record.id.clone(), record.url.clone(), requested);
    job.attempt_count = 1;
    job
}

#[tokio::test]
async fn test_requested_subset_only() {
    let h = harness_with(Arc::new(EphemeralStore::new()), all_ok());
    let job = pending(&h.store, &["tech", "seo"]).await;

    let outcome = h.orchestrator.process(&job).await.unwrap();
    assert!(matches!(
        outcome,
        ProcessOutcome::Completed { capabilities: 2, errors: 0, .. }
    ));

    let record = h.store.get(&job.analysis_id).await.unwrap().unwrap();
    assert_eq!(record.status, AnalysisStatus::Completed);
    assert_eq!(
        record.results.keys().copied().collect::<Vec<_>>(),
        vec![Capability::Tech, Capability::Seo]
    );
    assert_eq!(
        record.results[&Capability::Tech].data().unwrap()["sawHtml"],
        json!(true)
    );

    let page = record.page.expect("page metadata");
    assert_eq!(page.title.as_deref(), Some("Example Domain"));
    assert_eq!(page.description.as_deref(), Some("Illustrative example page"));
    assert!(page.screenshot.is_some());

    // Both capabilities shared one page.
    assert_eq!(h.stats.pages_opened.load(Ordering::SeqCst), 1);
    assert_eq!(h.stats.loads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_empty_request_runs_every_capability() {
    let h = harness_with(Arc::new(EphemeralStore::new()), all_ok());
    let job = pending(&h.store, &[]).await;

    h.orchestrator.process(&job).await.unwrap();
    let record = h.store.get(&job.analysis_id).await.unwrap().unwrap();
    assert_eq!(record.results.len(), Capability::ALL.len());
    assert!(record.results.values().all(|o| !o.is_error()));
}

#[tokio::test]
async fn test_self_contained_capabilities_skip_page_load() {
    let h = harness_with(Arc::new(EphemeralStore::new()), all_ok());
    let job = pending(&h.store, &["performance", "security"]).await;

    h.orchestrator.process(&job).await.unwrap();
    let record = h.store.get(&job.analysis_id).await.unwrap().unwrap();
    assert_eq!(record.status, AnalysisStatus::Completed);
    assert_eq!(record.results.len(), 2);
    assert!(record.page.is_none());
    assert_eq!(h.stats.loads.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_capability_failures_are_isolated() {
    let mut registry = all_ok();
    registry.register(StubCapability::new(Capability::Tech, Behaviour::Error));
    registry.register(StubCapability::new(Capability::Accessibility, Behaviour::Panic));
    registry.register(StubCapability::new(Capability::Security, Behaviour::Hang));
    let h = harness_with(Arc::new(EphemeralStore::new()), registry);
    let job = pending(&h.store, &[]).await;

    let outcome = h.orchestrator.process(&job).await.unwrap();
    assert!(matches!(outcome, ProcessOutcome::Completed { errors: 3, .. }));

    let record = h.store.get(&job.analysis_id).await.unwrap().unwrap();
    assert_eq!(record.status, AnalysisStatus::Completed);
    assert!(!record.results[&Capability::Seo].is_error());
    assert!(!record.results[&Capability::Performance].is_error());

    match &record.results[&Capability::Tech] {
        CapabilityOutcome::Error { message, timed_out } => {
            assert!(message.contains("selector engine crashed"));
            assert!(!timed_out);
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    match &record.results[&Capability::Accessibility] {
        CapabilityOutcome::Error { message, .. } => assert!(message.contains("capability blew up")),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert!(matches!(
        record.results[&Capability::Security],
        CapabilityOutcome::Error { timed_out: true, .. }
    ));
}

#[tokio::test]
async fn test_unregistered_capability_recorded_as_error() {
    let mut registry = CapabilityRegistry::new();
    registry.register(StubCapability::new(Capability::Seo, Behaviour::Ok));
    let h = harness_with(Arc::new(EphemeralStore::new()), registry);
    let job = pending(&h.store, &["seo", "tech"]).await;

    h.orchestrator.process(&job).await.unwrap();
    let record = h.store.get(&job.analysis_id).await.unwrap().unwrap();
    assert!(!record.results[&Capability::Seo].is_error());
    assert!(record.results[&Capability::Tech].is_error());
}

#[tokio::test]
async fn test_page_load_failure_fails_attempt() {
    let h = harness_with(Arc::new(EphemeralStore::new()), all_ok());
    h.stats.fail_loads.store(true, Ordering::SeqCst);
    let job = pending(&h.store, &["tech"]).await;

    let err = h.orchestrator.process(&job).await.unwrap_err();
    assert!(matches!(err, OrchestrationError::PageLoad(_)));
    assert!(err.is_retryable());

    // Still in progress until the queue gives up.
    let record = h.store.get(&job.analysis_id).await.unwrap().unwrap();
    assert_eq!(record.status, AnalysisStatus::InProgress);
}

#[tokio::test]
async fn test_redelivery_is_idempotent() {
    let h = harness_with(Arc::new(Database::in_memory().await.unwrap()), all_ok());
    let job = pending(&h.store, &["tech"]).await;

    h.orchestrator.process(&job).await.unwrap();
    let first = h.store.get(&job.analysis_id).await.unwrap().unwrap();

    let again = h.orchestrator.process(&job).await.unwrap();
    assert_eq!(
        again,
        ProcessOutcome::Skipped {
            analysis_id: job.analysis_id.clone(),
            status: AnalysisStatus::Completed,
        }
    );

    let second = h.store.get(&job.analysis_id).await.unwrap().unwrap();
    assert_eq!(first.results, second.results);
    assert_eq!(h.store.list_recent(10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_redelivery_after_crash_matches_uninterrupted_run() {
    let h = harness_with(Arc::new(Database::in_memory().await.unwrap()), all_ok());
    let interrupted = pending(&h.store, &["tech", "seo", "security"]).await;
    let twin = pending(&h.store, &["tech", "seo", "security"]).await;

    // First delivery claimed the record, then the worker died.
    assert!(matches!(
        h.store.claim(&interrupted.analysis_id).await.unwrap(),
        Claim::Claimed(_)
    ));
    let stale = h.store.get(&interrupted.analysis_id).await.unwrap().unwrap();
    assert_eq!(stale.status, AnalysisStatus::InProgress);
    assert!(stale.results.is_empty());

    let mut redelivered = interrupted.clone();
    redelivered.attempt_count = 2;
    let outcome = h.orchestrator.process(&redelivered).await.unwrap();
    assert!(matches!(
        outcome,
        ProcessOutcome::Completed { capabilities: 3, errors: 0, .. }
    ));
    h.orchestrator.process(&twin).await.unwrap();

    let recovered = h.store.get(&interrupted.analysis_id).await.unwrap().unwrap();
    let clean = h.store.get(&twin.analysis_id).await.unwrap().unwrap();
    assert_eq!(recovered.status, AnalysisStatus::Completed);
    assert_eq!(recovered.status, clean.status);
    assert_eq!(recovered.results, clean.results);
    assert_eq!(recovered.page, clean.page);
    assert!(recovered.error.is_none());

    let recent = h.store.list_recent(10).await.unwrap();
    assert_eq!(recent.len(), 2);
    let mine: Vec<_> = recent
        .iter()
        .filter(|s| s.analysis_id == interrupted.analysis_id)
        .collect();
    let theirs: Vec<_> = recent
        .iter()
        .filter(|s| s.analysis_id == twin.analysis_id)
        .collect();
    assert_eq!(mine.len(), 1);
    assert_eq!(theirs.len(), 1);
    assert_eq!(mine[0].status, theirs[0].status);
    assert_eq!(mine[0].title, theirs[0].title);
    assert_eq!(mine[0].technologies, theirs[0].technologies);
    assert_eq!(mine[0].seo_score, theirs[0].seo_score);
}

#[tokio::test]
async fn test_worker_fails_analysis_whose_final_attempt_crashed() {
    let db = Database::in_memory().await.unwrap();
    let h = harness_with(Arc::new(db.clone()), all_ok());
    let queue: Arc<dyn JobQueue> = Arc::new(SqliteJobQueue::new(
        db.pool().clone(),
        RetryPolicy::new(2, Duration::ZERO),
        Duration::ZERO,
    ));

    let record = AnalysisRecord::pending("https://example.com/", CapabilitySet::empty());
    h.store.create(&record).await.unwrap();
    queue
        .enqueue(Job::new(record.id.clone(), record.url.clone(), CapabilitySet::empty()))
        .await
        .unwrap();

    // Two deliveries, each lost before the worker reported back.
    for attempt in 1..=2 {
        let job = queue.dequeue().await.unwrap().expect("delivery");
        assert_eq!(job.attempt_count, attempt);
        h.store.claim(&job.analysis_id).await.unwrap();
    }
    assert!(queue.dequeue().await.unwrap().is_none());

    let worker = Worker::new(
        Arc::clone(&queue),
        Arc::clone(&h.orchestrator),
        WorkerSettings::default(),
    );
    assert_eq!(worker.tick().await.unwrap(), 0);
    assert_eq!(h.stats.loads.load(Ordering::SeqCst), 0);

    let failed = h.store.get(&record.id).await.unwrap().unwrap();
    assert_eq!(failed.status, AnalysisStatus::Failed);
    assert!(failed.error.unwrap().contains("2 interrupted attempts"));
    assert_eq!(h.store.list_recent(10).await.unwrap().len(), 1);

    assert_eq!(worker.tick().await.unwrap(), 0);
    assert!(queue.reap_exhausted().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_missing_record_is_not_retryable() {
    let h = harness_with(Arc::new(EphemeralStore::new()), all_ok());
    let job = Job::new(AnalysisId::generate(), "https://example.com", CapabilitySet::empty());

    let err = h.orchestrator.process(&job).await.unwrap_err();
    assert!(matches!(err, OrchestrationError::RecordMissing(_)));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_completion_is_announced_to_room() {
    let h = harness_with(Arc::new(EphemeralStore::new()), all_ok());
    let job = pending(&h.store, &["seo"]).await;
    let mut subscription = h.publisher.subscribe(&job.analysis_id);

    h.orchestrator.process(&job).await.unwrap();

    let event = tokio::time::timeout(Duration::from_secs(1), subscription.recv())
        .await
        .unwrap()
        .expect("completion event");
    assert_eq!(event.event.as_str(), "analysisCompleted");
    assert_eq!(event.room, job.analysis_id.room_key());
    assert_eq!(event.payload["status"], json!("completed"));
    assert!(event.payload["result"]["results"]["seo"].is_object());

    let recent = h.store.list_recent(10).await.unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].title.as_deref(), Some("Example Domain"));
}

#[tokio::test]
async fn test_fail_only_once() {
    let h = harness_with(Arc::new(EphemeralStore::new()), all_ok());
    let job = pending(&h.store, &["tech"]).await;
    let mut subscription = h.publisher.subscribe(&job.analysis_id);

    assert!(h.orchestrator.fail(&job.analysis_id, "gave up").await.unwrap());
    assert!(!h.orchestrator.fail(&job.analysis_id, "gave up").await.unwrap());

    let record = h.store.get(&job.analysis_id).await.unwrap().unwrap();
    assert_eq!(record.status, AnalysisStatus::Failed);
    assert_eq!(record.error.as_deref(), Some("gave up"));

    let event = subscription.recv().await.expect("failure event");
    assert_eq!(event.event.as_str(), "analysisFailed");
    assert_eq!(event.payload["error"], json!("gave up"));
    assert_eq!(h.store.list_recent(10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_worker_retries_then_fails() {
    let h = harness_with(Arc::new(EphemeralStore::new()), all_ok());
    h.stats.fail_loads.store(true, Ordering::SeqCst);
    let queue: Arc<dyn JobQueue> = Arc::new(BackoffQueue::new(RetryPolicy::new(3, Duration::ZERO)));

    let record = AnalysisRecord::pending("https://example.com/", CapabilitySet::empty());
    h.store.create(&record).await.unwrap();
    queue
        .enqueue(Job::new(record.id.clone(), record.url.clone(), CapabilitySet::empty()))
        .await
        .unwrap();

    let worker = Worker::new(
        Arc::clone(&queue),
        Arc::clone(&h.orchestrator),
        WorkerSettings {
            poll_interval: Duration::from_millis(10),
            batch_size: 1,
            parallel: false,
        },
    );

    let mut deliveries = 0;
    while worker.tick().await.unwrap() > 0 {
        deliveries += 1;
        assert!(deliveries <= 3, "job delivered more than three times");
    }
    assert_eq!(deliveries, 3);
    assert_eq!(h.stats.loads.load(Ordering::SeqCst), 3);
    assert!(queue.is_empty().await.unwrap());

    let failed = h.store.get(&record.id).await.unwrap().unwrap();
    assert_eq!(failed.status, AnalysisStatus::Failed);
    assert!(failed.error.unwrap().contains("page failed to load"));
    let recent = h.store.list_recent(10).await.unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].status, AnalysisStatus::Failed);
}

#[tokio::test]
async fn test_service_to_worker_round_trip() {
    let h = harness_with(Arc::new(EphemeralStore::new()), all_ok());
    let queue: Arc<dyn JobQueue> = Arc::new(InMemoryQueue::new());
    let public: IpAddr = "93.184.216.34".parse().unwrap();
    let internal: IpAddr = "10.0.0.5".parse().unwrap();
    let resolver = StaticResolver::new()
        .with_host("example.com", &[public])
        .with_host("internal.test", &[internal]);
    let service = AnalysisService::new(
        HostValidator::new(Arc::new(resolver), 2048),
        Arc::clone(&h.store),
        Arc::clone(&queue),
    );

    let rejected = service
        .start_analysis::<&str>("http://internal.test/", &[])
        .await;
    assert!(matches!(rejected, Err(ServiceError::HostNotAllowed(_))));
    assert!(queue.is_empty().await.unwrap());

    let started = service
        .start_analysis("https://example.com/", &["tech", "seo"])
        .await
        .unwrap();
    assert_eq!(started.status, AnalysisStatus::Pending);

    let worker = Worker::new(
        Arc::clone(&queue),
        Arc::clone(&h.orchestrator),
        WorkerSettings::default(),
    );
    assert_eq!(worker.tick().await.unwrap(), 1);

    assert_eq!(
        service.get_status(&started.id).await.unwrap(),
        AnalysisStatus::Completed
    );
    let result = service.get_result(&started.id).await.unwrap();
    assert_eq!(result.results.len(), 2);

    let recent = service.list_recent(None).await.unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].analysis_id, started.id);
}

#[tokio::test]
async fn test_worker_stops_on_cancel() {
    let h = harness_with(Arc::new(EphemeralStore::new()), all_ok());
    let queue: Arc<dyn JobQueue> = Arc::new(InMemoryQueue::new());
    let worker = Worker::new(queue, Arc::clone(&h.orchestrator), WorkerSettings::default());

    let shutdown = tokio_util::sync::CancellationToken::new();
    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(1), worker.run_until(shutdown))
        .await
        .expect("worker exits after cancellation");
}

#[tokio::test]
async fn test_noop_publisher_still_records_summary() {
    let store: Arc<dyn AnalysisStore> = Arc::new(EphemeralStore::new());
    let stats = Arc::new(BrowserStats::default());
    let orchestrator = AnalysisOrchestrator::new(
        Arc::clone(&store),
        Arc::new(BrowserPool::new(
            Arc::new(FakeBrowser(Arc::clone(&stats))),
            PageProfile::randomized(),
            1,
        )),
        Arc::new(all_ok()),
        Arc::new(NoopPublisher),
        reqwest::Client::new(),
        settings(),
    );
    let job = pending(&store, &["tech"]).await;
    orchestrator.process(&job).await.unwrap();
    assert_eq!(store.list_recent(5).await.unwrap().len(), 1);
    assert_eq!(stats.pages_closed.load(Ordering::SeqCst), 1);
}
