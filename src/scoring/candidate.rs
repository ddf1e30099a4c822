use crate::jobs::handlers::DownloadRequest;
use crate::jobs::{JobKind, NewJob};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Ordered evidence map, so serialized candidates are byte-for-byte stable.
pub type Evidence = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateKind {
    MissingAlbum,
    QualityUpgrade,
}

/// A scored, not yet actioned automation suggestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub kind: CandidateKind,
    /// Album (missing) or track (upgrade) reference.
    pub subject_id: String,
    /// Always within `[0, 1]`.
    pub score: f64,
    pub evidence: Evidence,
}

impl Candidate {
    pub fn missing_album(subject_id: impl Into<String>, evidence: Evidence) -> Self {
        Self {
            kind: CandidateKind::MissingAlbum,
            subject_id: subject_id.into(),
            score: 1.0,
            evidence,
        }
    }

    pub fn quality_upgrade(subject_id: impl Into<String>, score: f64, evidence: Evidence) -> Self {
        Self {
            kind: CandidateKind::QualityUpgrade,
            subject_id: subject_id.into(),
            score: score.clamp(0.0, 1.0),
            evidence,
        }
    }

    pub fn evidence_str(&self, key: &str) -> Option<&str> {
        self.evidence.get(key).and_then(|v| v.as_str())
    }

    pub fn evidence_f64(&self, key: &str) -> Option<f64> {
        self.evidence.get(key).and_then(|v| v.as_f64())
    }

    /// Turn an accepted candidate into a download job.
    pub fn into_job(self, priority: i32, max_attempts: u32) -> Result<NewJob> {
        let request = DownloadRequest::from_candidate(&self);
        Ok(NewJob::new(JobKind::Download)
            .with_priority(priority)
            .with_max_attempts(max_attempts)
            .with_payload(serde_json::to_value(request)?))
    }
}
