//! Handler seam and the per-run context handed to it.

use super::job::{Job, JobId, JobKind, NewJob};
use super::queue::JobQueue;
use crate::{Error, ErrorContext, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Runs jobs of one [`JobKind`].
#[async_trait]
pub trait JobHandler: Send + Sync {
    fn kind(&self) -> JobKind;

    /// Reject a malformed payload before the job enters the queue.
    fn validate(&self, _payload: &serde_json::Value) -> Result<()> {
        Ok(())
    }

    /// Run one attempt. The returned value is stored as the job's result.
    async fn handle(&self, ctx: &JobContext) -> Result<serde_json::Value>;
}

/// Everything a handler may touch while running one attempt.
#[derive(Clone)]
pub struct JobContext {
    job: Job,
    cancel: CancellationToken,
    queue: JobQueue,
}

impl JobContext {
    pub(crate) fn new(job: Job, cancel: CancellationToken, queue: JobQueue) -> Self {
        Self { job, cancel, queue }
    }

    /// Snapshot of the job as it was when this attempt was claimed.
    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn id(&self) -> JobId {
        self.job.id
    }

    pub fn attempt(&self) -> u32 {
        self.job.attempt
    }

    /// Decode the payload, reporting a decode failure as a validation error.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T> {
        decode_payload(self.job.kind, &self.job.payload)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Safe point: `Err(Cancelled)` once cancellation was requested.
    pub fn checkpoint(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleep that ends early with `Err(Cancelled)` on a cancel request.
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Enqueue a follow-up job on the same queue.
    pub fn enqueue(&self, job: NewJob) -> Result<JobId> {
        self.queue.enqueue(job)
    }

    /// Enqueue follow-up jobs; none are inserted if any is invalid.
    pub fn enqueue_all(&self, jobs: Vec<NewJob>) -> Result<Vec<JobId>> {
        self.queue.enqueue_all(jobs)
    }

    /// Check a follow-up job against the queue's rules without enqueuing it.
    pub fn validate_job(&self, job: &NewJob) -> Result<()> {
        self.queue.validate(job)
    }
}

pub(crate) fn decode_payload<T: DeserializeOwned>(kind: JobKind, payload: &serde_json::Value) -> Result<T> {
    T::deserialize(payload).map_err(|e| {
        Error::validation_with_context(
            format!("invalid {} payload: {}", kind, e),
            ErrorContext::new().with_field_path("job.payload"),
        )
    })
}

/// Explicit kind-to-handler table built at startup.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<JobKind, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its own kind, replacing any earlier one.
    pub fn register(&mut self, handler: Arc<dyn JobHandler>) -> &mut Self {
        self.handlers.insert(handler.kind(), handler);
        self
    }

    pub fn with_handler(mut self, handler: Arc<dyn JobHandler>) -> Self {
        self.register(handler);
        self
    }

    pub fn get(&self, kind: JobKind) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(&kind).cloned()
    }

    pub fn contains(&self, kind: JobKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    pub fn kinds(&self) -> Vec<JobKind> {
        let mut kinds: Vec<_> = self.handlers.keys().copied().collect();
        kinds.sort();
        kinds
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
