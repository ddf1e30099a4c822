use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(JobId)
    }
}

/// Closed set of work the pool knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Download,
    Enrich,
    SyncCheck,
}

impl JobKind {
    pub const ALL: [JobKind; 3] = [JobKind::Download, JobKind::Enrich, JobKind::SyncCheck];

    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::Download => "download",
            JobKind::Enrich => "enrich",
            JobKind::SyncCheck => "sync_check",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// A unit of background work and its lifecycle state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    /// Higher runs first.
    pub priority: i32,
    pub status: JobStatus,
    /// Runs started so far.
    pub attempt: u32,
    pub max_attempts: u32,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
    pub last_error: Option<String>,
    pub payload: serde_json::Value,
    pub result: Option<serde_json::Value>,
    pub cancel_requested: bool,
    /// Set once the job has been retried after a forced token refresh.
    pub auth_retry_used: bool,
}

impl Job {
    pub fn attempts_remaining(&self) -> bool {
        self.attempt < self.max_attempts
    }
}

/// Caller-side description of a job to enqueue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewJob {
    pub kind: JobKind,
    #[serde(default)]
    pub priority: i32,
    /// Queue default when `None`.
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl NewJob {
    pub fn new(kind: JobKind) -> Self {
        Self {
            kind,
            priority: 0,
            max_attempts: None,
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}
