//! In-memory priority queue with delayed retries and cooperative cancellation.

use super::events::{JobEvent, JobEventKind, JobEventSink, NoopEventSink};
use super::handler::HandlerRegistry;
use super::job::{Job, JobId, JobStatus, NewJob};
use super::policy::{Decision, RetryPolicy};
use crate::config::QueueSettings;
use crate::{Error, ErrorContext, Result};
use serde::Serialize;
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Job counts per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Pending jobs still waiting out a retry backoff.
    pub scheduled_retries: usize,
}

/// A job handed to a worker, marked Running.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub job: Job,
    pub cancel: CancellationToken,
}

/// Outcome of [`JobQueue::complete`].
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub job: Job,
    /// The run failed with `AuthExpired` and the job will retry after a
    /// token refresh.
    pub invalidate_token: bool,
}

struct Entry {
    job: Job,
    cancel: CancellationToken,
    order: u64,
}

/// Max-heap key: higher priority first, then lower sequence number.
/// Sequence numbers are unique, so equality follows the ordering.
#[derive(Debug)]
struct ReadyKey {
    priority: i32,
    seq: u64,
    id: JobId,
}

impl Ord for ReadyKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialEq for ReadyKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ReadyKey {}

impl PartialOrd for ReadyKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct DelayedKey {
    due: Instant,
    seq: u64,
    id: JobId,
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<JobId, Entry>,
    ready: BinaryHeap<ReadyKey>,
    delayed: BinaryHeap<Reverse<DelayedKey>>,
    /// Terminal jobs in the order they finished.
    finished: VecDeque<JobId>,
    seq: u64,
    closed: bool,
}

impl Inner {
    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    /// Move retries whose backoff elapsed into the ready heap. They get a
    /// fresh sequence number, so they compete as if newly created.
    fn promote_due(&mut self, now: Instant) {
        while self
            .delayed
            .peek()
            .map_or(false, |Reverse(key)| key.due <= now)
        {
            if let Some(Reverse(key)) = self.delayed.pop() {
                let priority = match self.jobs.get(&key.id) {
                    Some(entry) if entry.job.status == JobStatus::Pending => entry.job.priority,
                    _ => continue,
                };
                let seq = self.next_seq();
                self.ready.push(ReadyKey {
                    priority,
                    seq,
                    id: key.id,
                });
            }
        }
    }

    fn claim(&mut self, now: Instant) -> Option<ClaimedJob> {
        self.promote_due(now);
        while let Some(key) = self.ready.pop() {
            let Some(entry) = self.jobs.get_mut(&key.id) else {
                continue;
            };
            if entry.job.status != JobStatus::Pending {
                continue;
            }
            entry.job.status = JobStatus::Running;
            entry.job.attempt += 1;
            entry.job.updated_at = SystemTime::now();
            return Some(ClaimedJob {
                job: entry.job.clone(),
                cancel: entry.cancel.clone(),
            });
        }
        None
    }

    /// Track a job that just reached a terminal status, evicting the oldest
    /// finished jobs beyond `cap`.
    fn retire(&mut self, id: JobId, cap: usize) {
        self.finished.push_back(id);
        while self.finished.len() > cap {
            if let Some(old) = self.finished.pop_front() {
                self.jobs.remove(&old);
            }
        }
    }

    fn next_due(&self) -> Option<Instant> {
        self.delayed.peek().map(|Reverse(key)| key.due)
    }
}

struct Shared {
    settings: QueueSettings,
    policy: RetryPolicy,
    handlers: Arc<HandlerRegistry>,
    events: Arc<dyn JobEventSink>,
    inner: Mutex<Inner>,
    notify: Notify,
}

/// Priority queue of jobs shared by the worker pool.
///
/// Jobs are served by `(priority desc, enqueue order asc)`. Failed runs are
/// classified by the [`RetryPolicy`] and either finish or come back after a
/// backoff. Cloning yields another handle to the same queue.
#[derive(Clone)]
pub struct JobQueue {
    shared: Arc<Shared>,
}

fn validation(msg: String, field: &str) -> Error {
    Error::validation_with_context(
        msg,
        ErrorContext::new()
            .with_field_path(field)
            .with_source("job_queue"),
    )
}

impl JobQueue {
    pub fn new(settings: QueueSettings, handlers: Arc<HandlerRegistry>) -> Self {
        Self::with_events(settings, handlers, Arc::new(NoopEventSink))
    }

    pub fn with_events(
        settings: QueueSettings,
        handlers: Arc<HandlerRegistry>,
        events: Arc<dyn JobEventSink>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                policy: RetryPolicy::from_settings(&settings),
                settings,
                handlers,
                events,
                inner: Mutex::new(Inner::default()),
                notify: Notify::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.shared
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, job: Job, kind: JobEventKind) {
        self.shared.events.emit(&JobEvent { job, kind });
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.shared.settings
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.shared.policy
    }

    pub fn handlers(&self) -> &Arc<HandlerRegistry> {
        &self.shared.handlers
    }

    fn check(&self, new: &NewJob) -> Result<u32> {
        let settings = &self.shared.settings;
        let handler = self.shared.handlers.get(new.kind).ok_or_else(|| {
            validation(
                format!("no handler registered for job kind '{}'", new.kind),
                "job.kind",
            )
        })?;
        if new.priority < settings.min_priority || new.priority > settings.max_priority {
            return Err(validation(
                format!(
                    "priority {} outside [{}, {}]",
                    new.priority, settings.min_priority, settings.max_priority
                ),
                "job.priority",
            ));
        }
        let max_attempts = new.max_attempts.unwrap_or(settings.default_max_attempts);
        if max_attempts == 0 || max_attempts > settings.max_attempts_limit {
            return Err(validation(
                format!(
                    "max_attempts {} outside [1, {}]",
                    max_attempts, settings.max_attempts_limit
                ),
                "job.max_attempts",
            ));
        }
        handler.validate(&new.payload)?;
        Ok(max_attempts)
    }

    /// Run the enqueue checks without inserting anything.
    pub fn validate(&self, new: &NewJob) -> Result<()> {
        self.check(new).map(|_| ())
    }

    /// Validate and insert a job as Pending. Invalid input never enters the queue.
    pub fn enqueue(&self, new: NewJob) -> Result<JobId> {
        self.enqueue_all(vec![new])?
            .into_iter()
            .next()
            .ok_or_else(|| Error::runtime("job was not enqueued"))
    }

    /// Validate every job, then insert them all. Either every job enters the
    /// queue or none does. Ids are returned in input order.
    pub fn enqueue_all(&self, jobs: Vec<NewJob>) -> Result<Vec<JobId>> {
        let now = SystemTime::now();
        let jobs = jobs
            .into_iter()
            .map(|new| {
                let max_attempts = self.check(&new)?;
                Ok(Job {
                    id: JobId::new(),
                    kind: new.kind,
                    priority: new.priority,
                    status: JobStatus::Pending,
                    attempt: 0,
                    max_attempts,
                    created_at: now,
                    updated_at: now,
                    last_error: None,
                    payload: new.payload,
                    result: None,
                    cancel_requested: false,
                    auth_retry_used: false,
                })
            })
            .collect::<Result<Vec<Job>>>()?;

        {
            let mut inner = self.lock();
            if inner.closed {
                return Err(Error::runtime("job queue is closed"));
            }
            for job in &jobs {
                let seq = inner.next_seq();
                inner.ready.push(ReadyKey {
                    priority: job.priority,
                    seq,
                    id: job.id,
                });
                inner.jobs.insert(
                    job.id,
                    Entry {
                        job: job.clone(),
                        cancel: CancellationToken::new(),
                        order: seq,
                    },
                );
            }
        }

        let ids = jobs.iter().map(|job| job.id).collect();
        for job in jobs {
            info!(
                job_id = %job.id,
                kind = %job.kind,
                priority = job.priority,
                max_attempts = job.max_attempts,
                "job enqueued"
            );
            self.emit(job, JobEventKind::Enqueued);
        }
        self.shared.notify.notify_waiters();
        Ok(ids)
    }

    /// Claim the next runnable job, waiting for one to arrive or for a retry
    /// backoff to elapse. Returns `None` once the queue is closed.
    pub async fn next(&self) -> Option<ClaimedJob> {
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let wait_until = {
                let mut inner = self.lock();
                if inner.closed {
                    return None;
                }
                if let Some(claimed) = inner.claim(Instant::now()) {
                    drop(inner);
                    debug!(
                        job_id = %claimed.job.id,
                        kind = %claimed.job.kind,
                        attempt = claimed.job.attempt,
                        "job claimed"
                    );
                    self.emit(claimed.job.clone(), JobEventKind::Started);
                    return Some(claimed);
                }
                inner.next_due()
            };

            match wait_until {
                Some(due) => {
                    tokio::select! {
                        _ = notified.as_mut() => {}
                        _ = tokio::time::sleep_until(due) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Record the outcome of a run of a Running job.
    pub fn complete(&self, id: JobId, outcome: Result<serde_json::Value>) -> Result<Completion> {
        let (job, event, retry_delay, invalidate_token) = {
            let mut inner = self.lock();
            let entry = inner
                .jobs
                .get_mut(&id)
                .ok_or_else(|| validation(format!("unknown job {}", id), "job.id"))?;
            if entry.job.status != JobStatus::Running {
                return Err(Error::runtime(format!(
                    "job {} is {}, not running",
                    id, entry.job.status
                )));
            }
            entry.job.updated_at = SystemTime::now();

            let mut retry_delay = None;
            let mut invalidate_token = false;
            let event = match outcome {
                Ok(value) => {
                    entry.job.status = JobStatus::Succeeded;
                    entry.job.result = Some(value);
                    JobEventKind::Succeeded
                }
                Err(err) => {
                    entry.job.last_error = Some(err.to_string());
                    match self.shared.policy.decide(&entry.job, &err) {
                        Decision::Cancel => {
                            entry.job.status = JobStatus::Cancelled;
                            JobEventKind::Cancelled
                        }
                        Decision::Fail => {
                            entry.job.status = JobStatus::Failed;
                            JobEventKind::Failed
                        }
                        Decision::Retry {
                            delay,
                            invalidate_token: invalidate,
                        } => {
                            entry.job.status = JobStatus::Pending;
                            if invalidate {
                                entry.job.auth_retry_used = true;
                            }
                            invalidate_token = invalidate;
                            retry_delay = Some(delay);
                            JobEventKind::Retrying {
                                delay_ms: delay.as_millis() as u64,
                            }
                        }
                    }
                }
            };
            let job = entry.job.clone();

            match retry_delay {
                Some(delay) => {
                    let seq = inner.next_seq();
                    inner.delayed.push(Reverse(DelayedKey {
                        due: Instant::now() + delay,
                        seq,
                        id,
                    }));
                }
                None => inner.retire(id, self.shared.settings.max_finished_jobs),
            }
            (job, event, retry_delay, invalidate_token)
        };

        match (&event, retry_delay) {
            (JobEventKind::Retrying { .. }, Some(delay)) => info!(
                job_id = %id,
                kind = %job.kind,
                attempt = job.attempt,
                max_attempts = job.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = job.last_error.as_deref().unwrap_or(""),
                "job will retry"
            ),
            (JobEventKind::Failed, _) => warn!(
                job_id = %id,
                kind = %job.kind,
                attempt = job.attempt,
                error = job.last_error.as_deref().unwrap_or(""),
                "job failed"
            ),
            _ => info!(job_id = %id, kind = %job.kind, status = %job.status, "job finished"),
        }

        self.emit(job.clone(), event);
        if retry_delay.is_some() {
            self.shared.notify.notify_waiters();
        }
        Ok(Completion {
            job,
            invalidate_token,
        })
    }

    /// Cancel a job. Pending jobs leave the queue at once; running jobs get
    /// their cancellation token triggered and stop at the handler's next safe
    /// point. Returns `false` for unknown or already finished jobs.
    pub fn cancel(&self, id: JobId) -> bool {
        let cancelled = {
            let mut inner = self.lock();
            let Some(entry) = inner.jobs.get_mut(&id) else {
                return false;
            };
            match entry.job.status {
                JobStatus::Pending => {
                    entry.job.status = JobStatus::Cancelled;
                    entry.job.cancel_requested = true;
                    entry.job.updated_at = SystemTime::now();
                    entry.cancel.cancel();
                    let job = entry.job.clone();
                    inner.ready.retain(|key| key.id != id);
                    inner.delayed.retain(|Reverse(key)| key.id != id);
                    inner.retire(id, self.shared.settings.max_finished_jobs);
                    job
                }
                JobStatus::Running => {
                    entry.job.cancel_requested = true;
                    entry.job.updated_at = SystemTime::now();
                    entry.cancel.cancel();
                    info!(job_id = %id, "cancellation requested for running job");
                    return true;
                }
                _ => return false,
            }
        };
        info!(job_id = %id, kind = %cancelled.kind, "pending job cancelled");
        self.emit(cancelled, JobEventKind::Cancelled);
        true
    }

    pub fn get_job(&self, id: JobId) -> Option<Job> {
        self.lock().jobs.get(&id).map(|e| e.job.clone())
    }

    /// Jobs in enqueue order, optionally filtered by status.
    pub fn list_jobs(&self, status: Option<JobStatus>) -> Vec<Job> {
        let inner = self.lock();
        let mut entries: Vec<&Entry> = inner
            .jobs
            .values()
            .filter(|e| status.map_or(true, |s| e.job.status == s))
            .collect();
        entries.sort_by_key(|e| e.order);
        entries.into_iter().map(|e| e.job.clone()).collect()
    }

    pub fn stats(&self) -> QueueStats {
        let inner = self.lock();
        let mut stats = QueueStats {
            scheduled_retries: inner
                .delayed
                .iter()
                .filter(|Reverse(key)| {
                    inner
                        .jobs
                        .get(&key.id)
                        .map_or(false, |e| e.job.status == JobStatus::Pending)
                })
                .count(),
            ..QueueStats::default()
        };
        for entry in inner.jobs.values() {
            match entry.job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Running => stats.running += 1,
                JobStatus::Succeeded => stats.succeeded += 1,
                JobStatus::Failed => stats.failed += 1,
                JobStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }

    /// Forget terminal jobs that finished at least `older_than` ago. Returns
    /// how many were removed. Pending and running jobs are never touched.
    pub fn prune_finished(&self, older_than: Duration) -> usize {
        let Some(cutoff) = SystemTime::now().checked_sub(older_than) else {
            return 0;
        };
        let mut inner = self.lock();
        let mut removed = 0;
        while let Some(&id) = inner.finished.front() {
            let expired = inner
                .jobs
                .get(&id)
                .map_or(true, |entry| entry.job.updated_at <= cutoff);
            if !expired {
                break;
            }
            inner.finished.pop_front();
            if inner.jobs.remove(&id).is_some() {
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(removed, "pruned finished jobs");
        }
        removed
    }

    /// Stop handing out jobs and wake idle workers. Queued jobs stay Pending.
    pub fn close(&self) {
        self.lock().closed = true;
        self.shared.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue")
            .field("stats", &self.stats())
            .field("handlers", &self.shared.handlers)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{JobContext, JobHandler, JobKind};
    use async_trait::async_trait;
    use std::time::Duration;

    struct Noop(JobKind);

    #[async_trait]
    impl JobHandler for Noop {
        fn kind(&self) -> JobKind {
            self.0
        }

        fn validate(&self, payload: &serde_json::Value) -> Result<()> {
            if payload.get("bad").is_some() {
                Err(Error::validation("bad payload"))
            } else {
                Ok(())
            }
        }

        async fn handle(&self, _ctx: &JobContext) -> Result<serde_json::Value> {
            Ok(serde_json::Value::Null)
        }
    }

    fn queue() -> JobQueue {
        let settings = QueueSettings {
            base_delay_ms: 100,
            max_delay_ms: 1_000,
            ..QueueSettings::default()
        };
        let handlers = HandlerRegistry::new()
            .with_handler(Arc::new(Noop(JobKind::Download)))
            .with_handler(Arc::new(Noop(JobKind::Enrich)));
        JobQueue::new(settings, Arc::new(handlers))
    }

    #[tokio::test]
    async fn test_priority_then_fifo_order() {
        let q = queue();
        let low = q.enqueue(NewJob::new(JobKind::Download).with_priority(-5)).unwrap();
        let first = q.enqueue(NewJob::new(JobKind::Download)).unwrap();
        let high = q.enqueue(NewJob::new(JobKind::Enrich).with_priority(10)).unwrap();
        let second = q.enqueue(NewJob::new(JobKind::Download)).unwrap();

        let mut order = Vec::new();
        for _ in 0..4 {
            let claimed = q.next().await.unwrap();
            assert_eq!(claimed.job.status, JobStatus::Running);
            assert_eq!(claimed.job.attempt, 1);
            order.push(claimed.job.id);
        }
        assert_eq!(order, vec![high, first, second, low]);
    }

    #[test]
    fn test_invalid_jobs_are_rejected_synchronously() {
        let q = queue();
        let err = q
            .enqueue(NewJob::new(JobKind::Download).with_priority(101))
            .unwrap_err();
        assert_eq!(
            err.context().and_then(|c| c.field_path.as_deref()),
            Some("job.priority")
        );
        assert!(matches!(
            q.enqueue(NewJob::new(JobKind::Download).with_max_attempts(0)),
            Err(Error::Validation { .. })
        ));
        assert!(matches!(
            q.enqueue(NewJob::new(JobKind::Download).with_max_attempts(11)),
            Err(Error::Validation { .. })
        ));
        assert!(matches!(
            q.enqueue(NewJob::new(JobKind::SyncCheck)),
            Err(Error::Validation { .. })
        ));
        assert!(matches!(
            q.enqueue(NewJob::new(JobKind::Enrich).with_payload(serde_json::json!({"bad": 1}))),
            Err(Error::Validation { .. })
        ));
        assert!(q.list_jobs(None).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_job_exhausts_attempts() {
        let q = queue();
        let id = q
            .enqueue(NewJob::new(JobKind::Download).with_max_attempts(3))
            .unwrap();

        let mut statuses = vec![q.get_job(id).unwrap().status];
        for attempt in 1..=3 {
            let claimed = q.next().await.unwrap();
            assert_eq!(claimed.job.attempt, attempt);
            statuses.push(claimed.job.status);
            let done = q
                .complete(id, Err(Error::transient("download-service", "boom")))
                .unwrap();
            statuses.push(done.job.status);
        }

        use JobStatus::*;
        assert_eq!(
            statuses,
            vec![Pending, Running, Pending, Running, Pending, Running, Failed]
        );
        let job = q.get_job(id).unwrap();
        assert_eq!(job.attempt, 3);
        assert_eq!(
            job.last_error.as_deref(),
            Some("Transient service error (download-service): boom")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_waits_for_backoff_and_requeues_behind_newer_jobs() {
        let q = queue();
        let retried = q.enqueue(NewJob::new(JobKind::Download)).unwrap();
        q.next().await.unwrap();
        q.complete(retried, Err(Error::runtime("flaky"))).unwrap();
        assert_eq!(q.stats().scheduled_retries, 1);

        let newer = q.enqueue(NewJob::new(JobKind::Download)).unwrap();
        assert_eq!(q.next().await.unwrap().job.id, newer);

        let start = Instant::now();
        let claimed = q.next().await.unwrap();
        assert_eq!(claimed.job.id, retried);
        assert_eq!(claimed.job.attempt, 2);
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_cancel_pending_and_running() {
        let q = queue();
        let running = q.enqueue(NewJob::new(JobKind::Download)).unwrap();
        let pending = q.enqueue(NewJob::new(JobKind::Download)).unwrap();
        let claimed = q.next().await.unwrap();
        assert_eq!(claimed.job.id, running);

        assert!(q.cancel(pending));
        assert_eq!(q.get_job(pending).unwrap().status, JobStatus::Cancelled);
        assert!(!q.cancel(pending));

        assert!(q.cancel(running));
        assert!(claimed.cancel.is_cancelled());
        let done = q.complete(running, Err(Error::Cancelled)).unwrap();
        assert_eq!(done.job.status, JobStatus::Cancelled);
        assert!(!q.cancel(JobId::new()));

        let stats = q.stats();
        assert_eq!(stats.cancelled, 2);
        assert_eq!(stats.pending, 0);
    }

    #[tokio::test]
    async fn test_success_after_cancel_request_is_kept() {
        let q = queue();
        let id = q.enqueue(NewJob::new(JobKind::Enrich)).unwrap();
        q.next().await.unwrap();
        q.cancel(id);
        let done = q.complete(id, Ok(serde_json::json!({"ok": true}))).unwrap();
        assert_eq!(done.job.status, JobStatus::Succeeded);
        assert_eq!(done.job.result, Some(serde_json::json!({"ok": true})));
    }

    #[tokio::test]
    async fn test_close_wakes_idle_waiters() {
        let q = queue();
        let waiter = {
            let q = q.clone();
            tokio::spawn(async move { q.next().await.is_none() })
        };
        tokio::task::yield_now().await;
        q.close();
        assert!(waiter.await.unwrap());
        assert!(q.enqueue(NewJob::new(JobKind::Download)).is_err());
    }

    #[test]
    fn test_complete_requires_running_job() {
        let q = queue();
        let id = q.enqueue(NewJob::new(JobKind::Download)).unwrap();
        assert!(matches!(
            q.complete(id, Ok(serde_json::Value::Null)),
            Err(Error::Runtime { .. })
        ));
        assert!(q.complete(JobId::new(), Ok(serde_json::Value::Null)).is_err());
    }

    #[test]
    fn test_enqueue_all_is_all_or_nothing() {
        let q = queue();
        let err = q
            .enqueue_all(vec![
                NewJob::new(JobKind::Download),
                NewJob::new(JobKind::Download).with_payload(serde_json::json!({ "bad": true })),
            ])
            .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
        assert!(q.list_jobs(None).is_empty());

        let ids = q
            .enqueue_all(vec![
                NewJob::new(JobKind::Download),
                NewJob::new(JobKind::Enrich).with_priority(5),
            ])
            .unwrap();
        let listed: Vec<JobId> = q.list_jobs(None).into_iter().map(|j| j.id).collect();
        assert_eq!(listed, ids);
    }

    #[tokio::test]
    async fn test_finished_jobs_beyond_cap_are_evicted() {
        let settings = QueueSettings {
            max_finished_jobs: 2,
            ..QueueSettings::default()
        };
        let handlers = HandlerRegistry::new().with_handler(Arc::new(Noop(JobKind::Download)));
        let q = JobQueue::new(settings, Arc::new(handlers));

        let ids = q
            .enqueue_all((0..3).map(|_| NewJob::new(JobKind::Download)).collect())
            .unwrap();
        let waiting = q.enqueue(NewJob::new(JobKind::Download)).unwrap();
        for id in &ids {
            assert_eq!(q.next().await.unwrap().job.id, *id);
            q.complete(*id, Ok(serde_json::Value::Null)).unwrap();
        }

        assert!(q.get_job(ids[0]).is_none());
        assert!(q.get_job(ids[1]).is_some());
        assert!(q.get_job(ids[2]).is_some());
        assert_eq!(q.get_job(waiting).unwrap().status, JobStatus::Pending);
        assert_eq!(q.stats().succeeded, 2);
    }

    #[tokio::test]
    async fn test_prune_finished_keeps_live_jobs() {
        let q = queue();
        let done = q.enqueue(NewJob::new(JobKind::Download)).unwrap();
        let cancelled = q.enqueue(NewJob::new(JobKind::Download)).unwrap();
        let running = q.enqueue(NewJob::new(JobKind::Download)).unwrap();
        let pending = q.enqueue(NewJob::new(JobKind::Download)).unwrap();

        q.next().await.unwrap();
        q.complete(done, Ok(serde_json::Value::Null)).unwrap();
        q.cancel(cancelled);
        assert_eq!(q.next().await.unwrap().job.id, running);

        assert_eq!(q.prune_finished(Duration::from_secs(3600)), 0);
        assert_eq!(q.prune_finished(Duration::ZERO), 2);
        assert!(q.get_job(done).is_none());
        assert!(q.get_job(cancelled).is_none());
        assert_eq!(q.get_job(running).unwrap().status, JobStatus::Running);
        assert_eq!(q.get_job(pending).unwrap().status, JobStatus::Pending);
        assert_eq!(q.prune_finished(Duration::ZERO), 0);
    }

    #[test]
    fn test_ready_key_equality_matches_ordering() {
        let id = JobId::new();
        let a = ReadyKey { priority: 1, seq: 7, id };
        let b = ReadyKey { priority: 1, seq: 7, id: JobId::new() };
        let c = ReadyKey { priority: 1, seq: 8, id };
        assert_eq!(a.cmp(&b), Ordering::Equal);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a > c);
    }
}
