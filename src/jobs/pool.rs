//! Fixed-size worker pool draining a [`JobQueue`].

use super::handler::JobContext;
use super::policy::Decision;
use super::queue::{ClaimedJob, JobQueue};
use crate::auth::TokenManager;
use crate::{Error, Result};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// N workers, each running one job at a time.
pub struct WorkerPool {
    queue: JobQueue,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `size` workers on the current runtime.
    ///
    /// When a run fails with `AuthExpired` and the job is granted its retry,
    /// the token the run started with is invalidated before the retry is
    /// scheduled, so the next run refreshes. A token another worker refreshed
    /// meanwhile is kept.
    pub fn start(size: usize, queue: JobQueue, tokens: Option<Arc<TokenManager>>) -> Self {
        let size = size.max(1);
        let workers = (0..size)
            .map(|worker_id| {
                let queue = queue.clone();
                let tokens = tokens.clone();
                tokio::spawn(worker_loop(worker_id, queue, tokens))
            })
            .collect();
        info!(workers = size, "worker pool started");
        Self { queue, workers }
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    /// Close the queue, let running handlers finish, and join every worker.
    pub async fn shutdown(self) {
        self.queue.close();
        for worker in self.workers {
            if let Err(e) = worker.await {
                error!(error = %e, "worker task ended abnormally");
            }
        }
        info!("worker pool stopped");
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("size", &self.workers.len())
            .field("queue", &self.queue)
            .finish()
    }
}

async fn worker_loop(worker_id: usize, queue: JobQueue, tokens: Option<Arc<TokenManager>>) {
    debug!(worker_id, "worker started");
    while let Some(claimed) = queue.next().await {
        let job = claimed.job.clone();
        let used_token = tokens
            .as_ref()
            .and_then(|t| t.current())
            .map(|t| t.access_token);
        let outcome = run(&queue, claimed).await;

        if let (Some(tokens), Err(err)) = (&tokens, &outcome) {
            if let Decision::Retry {
                invalidate_token: true,
                ..
            } = queue.policy().decide(&job, err)
            {
                match used_token.as_deref() {
                    Some(access_token) => {
                        tokens.invalidate_if(access_token);
                    }
                    None => tokens.invalidate(),
                }
            }
        }

        if let Err(e) = queue.complete(job.id, outcome) {
            warn!(worker_id, job_id = %job.id, error = %e, "could not record job outcome");
        }
    }
    debug!(worker_id, "worker stopped");
}

/// Run one attempt in its own task so a panicking handler fails the job
/// instead of taking the worker down.
async fn run(queue: &JobQueue, claimed: ClaimedJob) -> Result<serde_json::Value> {
    let kind = claimed.job.kind;
    let id = claimed.job.id;
    let Some(handler) = queue.handlers().get(kind) else {
        return Err(Error::validation(format!(
            "no handler registered for job kind '{}'",
            kind
        )));
    };
    let ctx = JobContext::new(claimed.job, claimed.cancel, queue.clone());
    ctx.checkpoint()?;

    let task = tokio::spawn(async move { handler.handle(&ctx).await });
    match task.await {
        Ok(outcome) => outcome,
        Err(e) if e.is_panic() => {
            error!(job_id = %id, kind = %kind, "job handler panicked");
            Err(Error::runtime(format!("handler for '{}' panicked", kind)))
        }
        Err(e) => Err(Error::runtime(format!("handler task failed: {}", e))),
    }
}
