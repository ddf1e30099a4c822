//! # Job Queue and Worker Pool
//!
//! Background work (downloads, metadata refresh, sync checks) flows through a
//! single [`JobQueue`] drained by a fixed-size [`WorkerPool`].
//!
//! ```text
//! enqueue ─▶ Pending ─▶ Running ─┬─▶ Succeeded
//!               ▲                ├─▶ Failed      (attempts exhausted, validation)
//!               └── backoff ◀────┤
//!                                └─▶ Cancelled
//! ```
//!
//! Retry decisions belong to [`RetryPolicy`]; handlers never retry on their
//! own. Lifecycle transitions are published to a [`JobEventSink`].

mod events;
mod handler;
pub mod handlers;
mod job;
mod policy;
mod pool;
mod queue;

pub use events::{
    CompositeEventSink, InMemoryEventSink, JobEvent, JobEventKind, JobEventSink, NoopEventSink,
    StoreAuditSink,
};
pub use handler::{HandlerRegistry, JobContext, JobHandler};
pub use job::{Job, JobId, JobKind, JobStatus, NewJob};
pub use policy::{Decision, RetryPolicy};
pub use pool::WorkerPool;
pub use queue::{ClaimedJob, Completion, JobQueue, QueueStats};
