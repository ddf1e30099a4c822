//! Job lifecycle events and where they go.

use super::job::Job;
use crate::library::LibraryStore;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEventKind {
    Enqueued,
    Started,
    Retrying { delay_ms: u64 },
    Succeeded,
    Failed,
    Cancelled,
}

impl JobEventKind {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobEventKind::Succeeded | JobEventKind::Failed | JobEventKind::Cancelled
        )
    }
}

/// A job snapshot taken at the moment of a lifecycle transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobEvent {
    pub job: Job,
    pub kind: JobEventKind,
}

/// Receives job lifecycle events. Called outside the queue lock; must not block.
pub trait JobEventSink: Send + Sync {
    fn emit(&self, event: &JobEvent);
}

/// Drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventSink;

impl JobEventSink for NoopEventSink {
    fn emit(&self, _event: &JobEvent) {}
}

/// Keeps events in memory, mostly for tests and introspection.
#[derive(Debug, Default)]
pub struct InMemoryEventSink {
    events: Mutex<Vec<JobEvent>>,
}

impl InMemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<JobEvent> {
        self.events
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn kinds_for(&self, id: super::JobId) -> Vec<JobEventKind> {
        self.events()
            .into_iter()
            .filter(|e| e.job.id == id)
            .map(|e| e.kind)
            .collect()
    }
}

impl JobEventSink for InMemoryEventSink {
    fn emit(&self, event: &JobEvent) {
        self.events
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(event.clone());
    }
}

/// Fans events out to several sinks in order.
#[derive(Default)]
pub struct CompositeEventSink {
    sinks: Vec<Arc<dyn JobEventSink>>,
}

impl CompositeEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn JobEventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl JobEventSink for CompositeEventSink {
    fn emit(&self, event: &JobEvent) {
        for sink in &self.sinks {
            sink.emit(event);
        }
    }
}

/// Forwards terminal jobs to [`LibraryStore::record_job`] from a background task.
///
/// Must be created inside a tokio runtime. The task ends once the sink is dropped.
pub struct StoreAuditSink {
    tx: mpsc::UnboundedSender<Job>,
}

impl StoreAuditSink {
    pub fn spawn(store: Arc<dyn LibraryStore>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                if let Err(e) = store.record_job(&job).await {
                    warn!(job_id = %job.id, error = %e, "failed to record finished job");
                }
            }
        });
        Self { tx }
    }
}

impl JobEventSink for StoreAuditSink {
    fn emit(&self, event: &JobEvent) {
        if event.kind.is_terminal() && self.tx.send(event.job.clone()).is_err() {
            warn!(job_id = %event.job.id, "job audit task is gone");
        }
    }
}
