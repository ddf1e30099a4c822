//! Library state as seen by the scoring engine, and the persistence seam.
//!
//! The orchestrator never owns library storage. A [`LibraryStore`] supplies
//! snapshots and accepts candidates and finished jobs for audit.

use crate::jobs::Job;
use crate::scoring::{AudioFormat, Candidate};
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

/// Best version of a track known to be obtainable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailableVersion {
    pub bitrate_kbps: u32,
    pub format: AudioFormat,
    /// Where the version was seen, e.g. a peer user name.
    #[serde(default)]
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibraryFile {
    pub track_id: String,
    #[serde(default)]
    pub artist: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub path: String,
    /// 0 when unknown.
    #[serde(default)]
    pub bitrate_kbps: u32,
    pub format: AudioFormat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_available: Option<AvailableVersion>,
}

/// Point-in-time view of the local library.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LibrarySnapshot {
    /// Catalog subject (artist) id to the external release ids held locally.
    pub owned_releases: BTreeMap<String, BTreeSet<String>>,
    pub files: Vec<LibraryFile>,
}

impl LibrarySnapshot {
    pub fn owned_for(&self, subject_id: &str) -> BTreeSet<String> {
        self.owned_releases.get(subject_id).cloned().unwrap_or_default()
    }
}

/// Persistence collaborator.
#[async_trait]
pub trait LibraryStore: Send + Sync {
    /// External release ids owned locally for a catalog subject.
    async fn owned_release_ids(&self, subject_id: &str) -> Result<BTreeSet<String>>;

    async fn snapshot(&self) -> Result<LibrarySnapshot>;

    /// Store candidates for later review. Called before they become jobs.
    async fn record_candidates(&self, candidates: &[Candidate]) -> Result<()>;

    /// Audit a job that reached a terminal state.
    async fn record_job(&self, job: &Job) -> Result<()>;
}

/// [`LibraryStore`] kept in memory; used by tests and embedders without a database.
#[derive(Debug, Default)]
pub struct InMemoryLibraryStore {
    snapshot: Mutex<LibrarySnapshot>,
    candidates: Mutex<Vec<Candidate>>,
    jobs: Mutex<Vec<Job>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl InMemoryLibraryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: LibrarySnapshot) -> Self {
        Self {
            snapshot: Mutex::new(snapshot),
            ..Self::default()
        }
    }

    pub fn set_snapshot(&self, snapshot: LibrarySnapshot) {
        *lock(&self.snapshot) = snapshot;
    }

    pub fn add_owned_release(&self, subject_id: &str, release_id: &str) {
        lock(&self.snapshot)
            .owned_releases
            .entry(subject_id.to_string())
            .or_default()
            .insert(release_id.to_string());
    }

    pub fn recorded_candidates(&self) -> Vec<Candidate> {
        lock(&self.candidates).clone()
    }

    pub fn recorded_jobs(&self) -> Vec<Job> {
        lock(&self.jobs).clone()
    }
}

#[async_trait]
impl LibraryStore for InMemoryLibraryStore {
    async fn owned_release_ids(&self, subject_id: &str) -> Result<BTreeSet<String>> {
        Ok(lock(&self.snapshot).owned_for(subject_id))
    }

    async fn snapshot(&self) -> Result<LibrarySnapshot> {
        Ok(lock(&self.snapshot).clone())
    }

    async fn record_candidates(&self, candidates: &[Candidate]) -> Result<()> {
        lock(&self.candidates).extend_from_slice(candidates);
        Ok(())
    }

    async fn record_job(&self, job: &Job) -> Result<()> {
        lock(&self.jobs).push(job.clone());
        Ok(())
    }
}
