//! End-to-end job flows through the orchestrator with in-process collaborators.

use async_trait::async_trait;
use media_orchestrator::auth::TokenRefresher;
use media_orchestrator::clients::{
    CatalogClient, DownloadClient, DownloadHandle, DownloadState, LookupQuery, MetadataClient,
    MetadataRecord, Release, SearchResult,
};
use media_orchestrator::jobs::{InMemoryEventSink, JobEventKind};
use media_orchestrator::library::{AvailableVersion, InMemoryLibraryStore, LibraryFile, LibrarySnapshot};
use media_orchestrator::resilience::{CircuitState, CATALOG_SERVICE, DOWNLOAD_SERVICE, METADATA_SERVICE};
use media_orchestrator::scoring::{AudioFormat, Candidate, Evidence};
use media_orchestrator::{
    CandidateKind, Error, Job, JobId, JobKind, JobStatus, NewJob, Orchestrator, OrchestratorBuilder,
    OrchestratorConfig, Result, Token,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

enum Reject {
    Nothing,
    Token(&'static str),
    Everything,
}

struct FakeCatalog {
    releases: Vec<Release>,
    reject: Reject,
    refreshes: AtomicUsize,
}

impl FakeCatalog {
    fn new(ids: &[&str]) -> Self {
        let releases = ids
            .iter()
            .enumerate()
            .map(|(i, id)| Release {
                id: id.to_string(),
                title: format!("Album {}", id),
                artist: "Autechre".into(),
                release_type: "album".into(),
                release_date: Some(format!("200{}-01-01", i)),
                total_tracks: Some(10),
            })
            .collect();
        Self {
            releases,
            reject: Reject::Nothing,
            refreshes: AtomicUsize::new(0),
        }
    }

    fn rejecting(mut self, reject: Reject) -> Self {
        self.reject = reject;
        self
    }
}

#[async_trait]
impl TokenRefresher for FakeCatalog {
    async fn refresh_token(&self, refresh_token: &str) -> Result<Token> {
        assert_eq!(refresh_token, "refresh-1");
        let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Token::new(format!("access-{}", n), "", Duration::from_secs(3600)))
    }
}

#[async_trait]
impl CatalogClient for FakeCatalog {
    async fn get_releases(&self, access_token: &str, _subject_id: &str) -> Result<Vec<Release>> {
        let rejected = match self.reject {
            Reject::Nothing => false,
            Reject::Token(token) => token == access_token,
            Reject::Everything => true,
        };
        if rejected {
            return Err(Error::auth_expired("me", "token revoked"));
        }
        Ok(self.releases.clone())
    }
}

#[derive(Clone, Copy, PartialEq)]
enum DownloadMode {
    Succeed,
    FailSearch,
    NeverFinish,
}

struct FakeDownloads {
    mode: DownloadMode,
    searches: AtomicUsize,
    started: Mutex<Vec<String>>,
}

impl FakeDownloads {
    fn new(mode: DownloadMode) -> Self {
        Self {
            mode,
            searches: AtomicUsize::new(0),
            started: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl DownloadClient for FakeDownloads {
    async fn search(&self, query: &str) -> Result<Vec<SearchResult>> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        if self.mode == DownloadMode::FailSearch {
            return Err(Error::transient(DOWNLOAD_SERVICE, "daemon unreachable"));
        }
        Ok(vec![
            SearchResult {
                username: "peer-mp3".into(),
                filename: format!("{}.mp3", query),
                size: 5_000,
                bitrate_kbps: Some(320),
                format: AudioFormat::Mp3,
            },
            SearchResult {
                username: "peer-flac".into(),
                filename: format!("{}.flac", query),
                size: 30_000,
                bitrate_kbps: None,
                format: AudioFormat::Flac,
            },
        ])
    }

    async fn start_download(&self, result: &SearchResult) -> Result<DownloadHandle> {
        self.started.lock().unwrap().push(result.filename.clone());
        Ok(DownloadHandle {
            username: result.username.clone(),
            filename: result.filename.clone(),
        })
    }

    async fn status(&self, _handle: &DownloadHandle) -> Result<DownloadState> {
        Ok(match self.mode {
            DownloadMode::NeverFinish => DownloadState::InProgress { percent: 10.0 },
            _ => DownloadState::Completed,
        })
    }
}

struct FakeMetadata;

#[async_trait]
impl MetadataClient for FakeMetadata {
    async fn lookup(&self, query: &LookupQuery) -> Result<Option<MetadataRecord>> {
        Ok(match query {
            LookupQuery::Isrc(isrc) => Some(MetadataRecord {
                recording_id: "rec-1".into(),
                title: "Gantz Graf".into(),
                artist: "Autechre".into(),
                release_title: None,
                isrc: Some(isrc.clone()),
                length_ms: Some(237_000),
                score: None,
            }),
            LookupQuery::Query(_) => None,
        })
    }
}

fn test_config() -> OrchestratorConfig {
    let mut config = OrchestratorConfig::default();
    config.workers = 2;
    config.queue.base_delay_ms = 10;
    config.queue.max_delay_ms = 100;
    config.download.poll_interval_ms = 10;
    config.download.max_polls = 20;
    config
}

fn seeded_token() -> Token {
    Token::new("access-0", "refresh-1", Duration::from_secs(3600))
}

async fn wait_terminal(orch: &Orchestrator, id: JobId) -> Job {
    for _ in 0..10_000 {
        if let Some(job) = orch.get_job(id).filter(|j| j.status.is_terminal()) {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("job {} never finished", id);
}

async fn wait_until<F: Fn() -> bool>(check: F) {
    for _ in 0..10_000 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition never became true");
}

#[tokio::test(start_paused = true)]
async fn test_sync_check_enqueues_downloads_for_missing_albums() {
    let catalog = Arc::new(FakeCatalog::new(&["r1", "r2", "r3"]));
    let downloads = Arc::new(FakeDownloads::new(DownloadMode::Succeed));
    let store = Arc::new(InMemoryLibraryStore::new());
    store.add_owned_release("artist-1", "r2");

    let orch = OrchestratorBuilder::new()
        .with_config(test_config())
        .with_catalog(catalog.clone())
        .with_download_client(downloads.clone())
        .with_store(store.clone())
        .with_token(seeded_token())
        .build()
        .unwrap();

    let id = orch
        .enqueue(NewJob::new(JobKind::SyncCheck).with_payload(json!({ "subject_id": "artist-1" })))
        .unwrap();
    let job = wait_terminal(&orch, id).await;
    assert_eq!(job.status, JobStatus::Succeeded);
    let result = job.result.unwrap();
    assert_eq!(result["missing"], 2);

    let enqueued: Vec<JobId> = serde_json::from_value(result["enqueued"].clone()).unwrap();
    for download in &enqueued {
        let done = wait_terminal(&orch, *download).await;
        assert_eq!(done.status, JobStatus::Succeeded);
        assert_eq!(done.result.unwrap()["format"], "flac");
    }

    let recorded = store.recorded_candidates();
    assert_eq!(recorded.len(), 2);
    assert!(recorded.iter().all(|c| c.kind == CandidateKind::MissingAlbum));
    assert_eq!(downloads.started.lock().unwrap().len(), 2);
    assert_eq!(catalog.refreshes.load(Ordering::SeqCst), 0);

    wait_until(|| store.recorded_jobs().len() == 3).await;
    orch.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_always_failing_job_ends_failed_after_max_attempts() {
    let events = Arc::new(InMemoryEventSink::new());
    let orch = OrchestratorBuilder::new()
        .with_config(test_config())
        .with_catalog(Arc::new(FakeCatalog::new(&[])))
        .with_download_client(Arc::new(FakeDownloads::new(DownloadMode::FailSearch)))
        .with_event_sink(events.clone())
        .build()
        .unwrap();

    let id = orch
        .enqueue(
            NewJob::new(JobKind::Download)
                .with_max_attempts(3)
                .with_payload(json!({ "query": "Autechre Confield" })),
        )
        .unwrap();
    let job = wait_terminal(&orch, id).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempt, 3);
    assert!(job.last_error.unwrap().contains("daemon unreachable"));

    let kinds = events.kinds_for(id);
    assert_eq!(
        kinds,
        vec![
            JobEventKind::Enqueued,
            JobEventKind::Started,
            JobEventKind::Retrying { delay_ms: 10 },
            JobEventKind::Started,
            JobEventKind::Retrying { delay_ms: 20 },
            JobEventKind::Started,
            JobEventKind::Failed,
        ]
    );

    let stats = orch.get_breaker_stats(DOWNLOAD_SERVICE).unwrap();
    assert_eq!(stats.state, CircuitState::Closed);
    assert_eq!(stats.consecutive_failures, 3);
    orch.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_open_breaker_stops_network_calls() {
    let mut config = test_config();
    config.workers = 1;
    config
        .services
        .get_mut(DOWNLOAD_SERVICE)
        .unwrap()
        .failure_threshold = Some(2);
    let downloads = Arc::new(FakeDownloads::new(DownloadMode::FailSearch));
    let orch = OrchestratorBuilder::new()
        .with_config(config)
        .with_catalog(Arc::new(FakeCatalog::new(&[])))
        .with_download_client(downloads.clone())
        .build()
        .unwrap();

    let id = orch
        .enqueue(
            NewJob::new(JobKind::Download)
                .with_max_attempts(3)
                .with_payload(json!({ "query": "anything" })),
        )
        .unwrap();
    let job = wait_terminal(&orch, id).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.last_error.unwrap().starts_with("Circuit open for download-service"));
    assert_eq!(downloads.searches.load(Ordering::SeqCst), 2);

    let stats = orch.get_breaker_stats(DOWNLOAD_SERVICE).unwrap();
    assert_eq!(stats.state, CircuitState::Open);
    assert_eq!(stats.total_rejections, 1);
    assert_eq!(
        orch.get_breaker_stats(CATALOG_SERVICE).unwrap().state,
        CircuitState::Closed
    );
    orch.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_auth_expired_forces_one_refresh_then_succeeds() {
    let catalog = Arc::new(FakeCatalog::new(&["r1"]).rejecting(Reject::Token("access-0")));
    let orch = OrchestratorBuilder::new()
        .with_config(test_config())
        .with_catalog(catalog.clone())
        .with_token(seeded_token())
        .build()
        .unwrap();

    let id = orch
        .enqueue(NewJob::new(JobKind::SyncCheck).with_payload(json!({ "subject_id": "artist-1" })))
        .unwrap();
    let job = wait_terminal(&orch, id).await;

    assert_eq!(job.status, JobStatus::Succeeded);
    assert_eq!(job.attempt, 2);
    assert!(job.auth_retry_used);
    assert_eq!(catalog.refreshes.load(Ordering::SeqCst), 1);
    assert_eq!(
        orch.token_manager().current().unwrap().access_token,
        "access-1"
    );
    orch.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_second_auth_expiry_is_terminal() {
    let catalog = Arc::new(FakeCatalog::new(&["r1"]).rejecting(Reject::Everything));
    let orch = OrchestratorBuilder::new()
        .with_config(test_config())
        .with_catalog(catalog.clone())
        .with_token(seeded_token())
        .build()
        .unwrap();

    let id = orch
        .enqueue(
            NewJob::new(JobKind::SyncCheck)
                .with_max_attempts(5)
                .with_payload(json!({ "subject_id": "artist-1" })),
        )
        .unwrap();
    let job = wait_terminal(&orch, id).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempt, 2);
    assert!(job.auth_retry_used);
    assert!(job.last_error.unwrap().contains("Authentication expired"));
    assert_eq!(catalog.refreshes.load(Ordering::SeqCst), 1);
    orch.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_cancel_running_download_stops_at_next_poll() {
    let orch = OrchestratorBuilder::new()
        .with_config(test_config())
        .with_catalog(Arc::new(FakeCatalog::new(&[])))
        .with_download_client(Arc::new(FakeDownloads::new(DownloadMode::NeverFinish)))
        .build()
        .unwrap();

    let id = orch
        .enqueue(NewJob::new(JobKind::Download).with_payload(json!({ "query": "long one" })))
        .unwrap();
    wait_until(|| orch.get_job(id).map_or(false, |j| j.status == JobStatus::Running)).await;

    assert!(orch.cancel(id));
    let job = wait_terminal(&orch, id).await;
    assert_eq!(job.status, JobStatus::Cancelled);
    assert_eq!(job.attempt, 1);
    assert!(!orch.cancel(id));
    orch.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_enrich_goes_through_rate_limited_service() {
    let orch = OrchestratorBuilder::new()
        .with_config(test_config())
        .with_catalog(Arc::new(FakeCatalog::new(&[])))
        .with_metadata_client(Arc::new(FakeMetadata))
        .build()
        .unwrap();

    let first = orch
        .enqueue(
            NewJob::new(JobKind::Enrich)
                .with_payload(json!({ "track_id": "t1", "isrc": "GBBKS0200083" })),
        )
        .unwrap();
    let second = orch
        .enqueue(
            NewJob::new(JobKind::Enrich).with_payload(json!({ "track_id": "t2", "query": "nothing" })),
        )
        .unwrap();

    let a = wait_terminal(&orch, first).await;
    let b = wait_terminal(&orch, second).await;
    assert_eq!(a.result.unwrap()["record"]["isrc"], "GBBKS0200083");
    assert_eq!(b.result.unwrap()["found"], false);

    let snapshot = orch.get_limiter_snapshot(METADATA_SERVICE).unwrap();
    assert_eq!(snapshot.total_acquired, 2);
    assert_eq!(snapshot.min_interval, Duration::from_secs(1));
    orch.shutdown().await;
}

#[tokio::test]
async fn test_enqueue_rejects_invalid_jobs() {
    let orch = OrchestratorBuilder::new()
        .with_config(test_config())
        .with_catalog(Arc::new(FakeCatalog::new(&[])))
        .build()
        .unwrap();

    // No metadata client, so no enrich handler.
    assert!(matches!(
        orch.enqueue(NewJob::new(JobKind::Enrich)),
        Err(Error::Validation { .. })
    ));
    assert!(matches!(
        orch.enqueue(NewJob::new(JobKind::SyncCheck).with_payload(json!({}))),
        Err(Error::Validation { .. })
    ));
    assert!(matches!(
        orch.enqueue(
            NewJob::new(JobKind::SyncCheck)
                .with_priority(1_000)
                .with_payload(json!({ "subject_id": "a" }))
        ),
        Err(Error::Validation { .. })
    ));
    assert!(orch.list_jobs(None).is_empty());
    orch.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_scoring_surface_and_candidate_enqueue() {
    let catalog = Arc::new(FakeCatalog::new(&["r1", "r2"]));
    let store = Arc::new(InMemoryLibraryStore::with_snapshot(LibrarySnapshot {
        files: vec![LibraryFile {
            track_id: "t1".into(),
            artist: "Autechre".into(),
            title: "Bike".into(),
            path: "/music/bike.mp3".into(),
            bitrate_kbps: 192,
            format: AudioFormat::Mp3,
            best_available: Some(AvailableVersion {
                bitrate_kbps: 1411,
                format: AudioFormat::Flac,
                source: "peer-flac".into(),
            }),
        }],
        ..Default::default()
    }));
    store.add_owned_release("artist-1", "r1");

    let orch = OrchestratorBuilder::new()
        .with_config(test_config())
        .with_catalog(catalog.clone())
        .with_download_client(Arc::new(FakeDownloads::new(DownloadMode::Succeed)))
        .with_store(store.clone())
        .with_token(seeded_token())
        .build()
        .unwrap();

    let missing = orch.score_missing_albums("artist-1").await.unwrap();
    assert_eq!(missing.len(), 1);
    assert_eq!(missing[0].subject_id, "r2");
    assert_eq!(missing[0].evidence_f64("completeness"), Some(0.5));

    let upgrades = orch.score_library_upgrades().await.unwrap();
    assert_eq!(upgrades.len(), 1);
    assert_eq!(upgrades[0].score, 1.0);

    let mut candidates = missing;
    candidates.extend(upgrades);
    let ids = orch.enqueue_candidates(candidates).await.unwrap();
    assert_eq!(ids.len(), 2);
    let upgrade_job = orch.get_job(ids[1]).unwrap();
    assert_eq!(upgrade_job.kind, JobKind::Download);
    assert_eq!(upgrade_job.priority, -10);
    assert_eq!(upgrade_job.payload["min_bitrate_kbps"], 192);

    for id in ids {
        assert_eq!(wait_terminal(&orch, id).await.status, JobStatus::Succeeded);
    }
    assert_eq!(store.recorded_candidates().len(), 2);
    assert_eq!(orch.queue_stats().succeeded, 2);
    orch.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_candidate_batch_with_invalid_entry_enqueues_nothing() {
    let store = Arc::new(InMemoryLibraryStore::new());
    let orch = OrchestratorBuilder::new()
        .with_config(test_config())
        .with_catalog(Arc::new(FakeCatalog::new(&[])))
        .with_download_client(Arc::new(FakeDownloads::new(DownloadMode::Succeed)))
        .with_store(store.clone())
        .build()
        .unwrap();

    let err = orch
        .enqueue_candidates(vec![
            Candidate::missing_album("album-1", Evidence::new()),
            Candidate::missing_album("", Evidence::new()),
        ])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation { .. }));
    assert!(orch.list_jobs(None).is_empty());
    assert!(store.recorded_candidates().is_empty());

    let ids = orch
        .enqueue_candidates(vec![Candidate::missing_album("album-1", Evidence::new())])
        .await
        .unwrap();
    assert_eq!(wait_terminal(&orch, ids[0]).await.status, JobStatus::Succeeded);
    assert_eq!(orch.prune_finished_jobs(Duration::ZERO), 1);
    assert!(orch.get_job(ids[0]).is_none());
    orch.shutdown().await;
}

#[test]
fn test_builder_rejects_candidate_priority_outside_queue_range() {
    let mut config = test_config();
    config.scoring.upgrade_priority = -500;
    let err = OrchestratorBuilder::new()
        .with_config(config)
        .with_catalog(Arc::new(FakeCatalog::new(&[])))
        .build()
        .unwrap_err();
    assert!(matches!(err, Error::Configuration { .. }));
}

#[tokio::test]
async fn test_shutdown_is_idempotent_and_rejects_new_jobs() {
    let orch = OrchestratorBuilder::new()
        .with_config(test_config())
        .with_catalog(Arc::new(FakeCatalog::new(&[])))
        .build()
        .unwrap();
    orch.shutdown().await;
    orch.shutdown().await;
    assert!(orch
        .enqueue(NewJob::new(JobKind::SyncCheck).with_payload(json!({ "subject_id": "a" })))
        .is_err());
}

#[test]
fn test_builder_requires_catalog() {
    let err = OrchestratorBuilder::new().build().unwrap_err();
    assert!(matches!(err, Error::Configuration { .. }));
}
