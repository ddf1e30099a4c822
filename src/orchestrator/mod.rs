//! # Orchestrator
//!
//! The public surface of the core: job submission and inspection, scoring,
//! and breaker/limiter introspection, all behind one handle.
//!
//! ```rust,no_run
//! use media_orchestrator::clients::SpotifyCatalogClient;
//! use media_orchestrator::config::OrchestratorConfig;
//! use media_orchestrator::jobs::{JobKind, NewJob};
//! use media_orchestrator::orchestrator::OrchestratorBuilder;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> media_orchestrator::Result<()> {
//!     let config = OrchestratorConfig::default();
//!     let catalog = SpotifyCatalogClient::new(&config.http, "me", "client-id", "client-secret")?;
//!     let orchestrator = OrchestratorBuilder::new()
//!         .with_config(config)
//!         .with_catalog(Arc::new(catalog))
//!         .build()?;
//!
//!     let id = orchestrator.enqueue(
//!         NewJob::new(JobKind::SyncCheck)
//!             .with_payload(serde_json::json!({ "subject_id": "4aawyAB9vmqN3uQ7FjRGTy" })),
//!     )?;
//!     println!("{:?}", orchestrator.get_job(id));
//!     orchestrator.shutdown().await;
//!     Ok(())
//! }
//! ```

mod builder;

pub use builder::OrchestratorBuilder;

use crate::auth::TokenManager;
use crate::config::OrchestratorConfig;
use crate::jobs::handlers::CatalogScan;
use crate::jobs::{Job, JobId, JobQueue, JobStatus, NewJob, QueueStats, WorkerPool};
use crate::library::{LibrarySnapshot, LibraryStore};
use crate::resilience::{CircuitBreakerStats, RateLimiterSnapshot, ServiceRegistry};
use crate::scoring::{score_quality_upgrades, Candidate, CandidateKind};
use crate::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::info;

/// Handle over the running resilience and orchestration core.
pub struct Orchestrator {
    config: OrchestratorConfig,
    registry: Arc<ServiceRegistry>,
    queue: JobQueue,
    pool: Mutex<Option<WorkerPool>>,
    tokens: Arc<TokenManager>,
    scan: CatalogScan,
    store: Arc<dyn LibraryStore>,
}

impl Orchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    fn new(
        config: OrchestratorConfig,
        registry: Arc<ServiceRegistry>,
        queue: JobQueue,
        pool: WorkerPool,
        tokens: Arc<TokenManager>,
        scan: CatalogScan,
        store: Arc<dyn LibraryStore>,
    ) -> Self {
        Self {
            config,
            registry,
            queue,
            pool: Mutex::new(Some(pool)),
            tokens,
            scan,
            store,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    pub fn token_manager(&self) -> &Arc<TokenManager> {
        &self.tokens
    }

    pub fn enqueue(&self, job: NewJob) -> Result<JobId> {
        self.queue.enqueue(job)
    }

    pub fn cancel(&self, id: JobId) -> bool {
        self.queue.cancel(id)
    }

    pub fn get_job(&self, id: JobId) -> Option<Job> {
        self.queue.get_job(id)
    }

    pub fn list_jobs(&self, status: Option<JobStatus>) -> Vec<Job> {
        self.queue.list_jobs(status)
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    /// Missing albums for a catalog subject, fetched through the protected
    /// catalog client with a valid token.
    pub async fn score_missing_albums(&self, subject_id: &str) -> Result<Vec<Candidate>> {
        self.scan.missing_albums(subject_id).await
    }

    pub fn score_quality_upgrades(&self, snapshot: &LibrarySnapshot) -> Vec<Candidate> {
        score_quality_upgrades(snapshot, self.config.scoring.min_improvement_score)
    }

    /// Score upgrades against the store's current snapshot.
    pub async fn score_library_upgrades(&self) -> Result<Vec<Candidate>> {
        let snapshot = self.store.snapshot().await?;
        Ok(self.score_quality_upgrades(&snapshot))
    }

    /// Record candidates with the store, then enqueue one download per
    /// candidate. Every job is validated first; when any is rejected nothing
    /// is recorded or enqueued.
    pub async fn enqueue_candidates(&self, candidates: Vec<Candidate>) -> Result<Vec<JobId>> {
        let max_attempts = self.config.queue.default_max_attempts;
        let jobs = candidates
            .iter()
            .cloned()
            .map(|candidate| {
                let priority = match candidate.kind {
                    CandidateKind::MissingAlbum => self.config.scoring.download_priority,
                    CandidateKind::QualityUpgrade => self.config.scoring.upgrade_priority,
                };
                candidate.into_job(priority, max_attempts)
            })
            .collect::<Result<Vec<_>>>()?;
        for job in &jobs {
            self.queue.validate(job)?;
        }

        self.store.record_candidates(&candidates).await?;
        let ids = self.queue.enqueue_all(jobs)?;
        info!(count = ids.len(), "candidates enqueued");
        Ok(ids)
    }

    /// Forget finished jobs older than `older_than`. Returns how many were removed.
    pub fn prune_finished_jobs(&self, older_than: Duration) -> usize {
        self.queue.prune_finished(older_than)
    }

    pub fn get_breaker_stats(&self, service: &str) -> Option<CircuitBreakerStats> {
        self.registry.breaker_stats(service)
    }

    pub fn all_breaker_stats(&self) -> Vec<CircuitBreakerStats> {
        self.registry.all_stats()
    }

    pub fn get_limiter_snapshot(&self, service: &str) -> Option<RateLimiterSnapshot> {
        self.registry.limiter_snapshot(service)
    }

    /// Stop accepting jobs, let running handlers finish, and join the workers.
    /// Idempotent.
    pub async fn shutdown(&self) {
        let pool = self.pool.lock().await.take();
        match pool {
            Some(pool) => pool.shutdown().await,
            None => self.queue.close(),
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("account", &self.tokens.account())
            .field("services", &self.registry.names())
            .field("queue", &self.queue)
            .finish()
    }
}
