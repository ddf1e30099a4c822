use crate::clients::{DownloadClient, DownloadState, SearchResult};
use crate::jobs::handler::decode_payload;
use crate::jobs::{JobContext, JobHandler, JobKind};
use crate::resilience::ProtectedService;
use crate::scoring::{AudioFormat, Candidate, CandidateKind};
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::cmp::Reverse;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Payload of a [`JobKind::Download`] job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub query: String,
    /// Album or track the download is for.
    #[serde(default)]
    pub subject_id: Option<String>,
    #[serde(default)]
    pub reason: Option<CandidateKind>,
    /// Lossy results below this bitrate are ignored.
    #[serde(default)]
    pub min_bitrate_kbps: Option<u32>,
    #[serde(default)]
    pub prefer_lossless: bool,
}

impl DownloadRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            subject_id: None,
            reason: None,
            min_bitrate_kbps: None,
            prefer_lossless: false,
        }
    }

    pub fn from_candidate(candidate: &Candidate) -> Self {
        let query = candidate
            .evidence_str("search_query")
            .filter(|q| !q.trim().is_empty())
            .unwrap_or(&candidate.subject_id)
            .to_string();
        let (min_bitrate_kbps, prefer_lossless) = match candidate.kind {
            CandidateKind::MissingAlbum => (None, true),
            CandidateKind::QualityUpgrade => (
                candidate
                    .evidence
                    .get("current_bitrate_kbps")
                    .and_then(|v| v.as_u64())
                    .map(|v| v.min(u32::MAX as u64) as u32),
                candidate
                    .evidence_str("target_format")
                    .and_then(|f| f.parse::<AudioFormat>().ok())
                    .map_or(false, AudioFormat::is_lossless),
            ),
        };
        Self {
            query,
            subject_id: Some(candidate.subject_id.clone()),
            reason: Some(candidate.kind),
            min_bitrate_kbps,
            prefer_lossless,
        }
    }

    fn accepts(&self, result: &SearchResult) -> bool {
        if result.format.is_lossless() {
            return true;
        }
        match (self.min_bitrate_kbps, result.bitrate_kbps) {
            (None, _) => true,
            (Some(min), Some(kbps)) => kbps >= min,
            (Some(_), None) => false,
        }
    }

    /// Best acceptable result: lossless when preferred, then format tier,
    /// then bitrate, then size. Names break remaining ties.
    pub fn pick_best<'a>(&self, results: &'a [SearchResult]) -> Option<&'a SearchResult> {
        results.iter().filter(|r| self.accepts(r)).min_by_key(|r| {
            let lossless = r.format.is_lossless();
            let tier = r.format.lossy_tier().unwrap_or(u8::MAX);
            (
                Reverse(self.prefer_lossless && lossless),
                Reverse(tier),
                Reverse(r.bitrate_kbps.unwrap_or(0)),
                Reverse(r.size),
                r.username.clone(),
                r.filename.clone(),
            )
        })
    }
}

/// Search, pick, start, then poll the transfer until it settles.
///
/// Every daemon call goes through the download service's breaker and checks
/// for cancellation first.
pub struct DownloadHandler {
    client: Arc<dyn DownloadClient>,
    service: Arc<ProtectedService>,
    poll_interval: Duration,
    max_polls: u32,
}

impl DownloadHandler {
    pub fn new(client: Arc<dyn DownloadClient>, service: Arc<ProtectedService>) -> Self {
        Self {
            client,
            service,
            poll_interval: Duration::from_secs(2),
            max_polls: 900,
        }
    }

    pub fn with_polling(mut self, interval: Duration, max_polls: u32) -> Self {
        self.poll_interval = interval;
        self.max_polls = max_polls.max(1);
        self
    }
}

#[async_trait]
impl JobHandler for DownloadHandler {
    fn kind(&self) -> JobKind {
        JobKind::Download
    }

    fn validate(&self, payload: &serde_json::Value) -> Result<()> {
        let request: DownloadRequest = decode_payload(JobKind::Download, payload)?;
        if request.query.trim().is_empty() {
            return Err(Error::validation("download query is empty"));
        }
        Ok(())
    }

    async fn handle(&self, ctx: &JobContext) -> Result<serde_json::Value> {
        let request: DownloadRequest = ctx.payload()?;

        ctx.checkpoint()?;
        let results = self
            .service
            .execute(|| self.client.search(&request.query))
            .await?;
        let chosen = request.pick_best(&results).cloned().ok_or_else(|| {
            Error::runtime(format!(
                "no acceptable results among {} for '{}'",
                results.len(),
                request.query
            ))
        })?;
        info!(
            job_id = %ctx.id(),
            username = %chosen.username,
            filename = %chosen.filename,
            format = %chosen.format,
            bitrate_kbps = chosen.bitrate_kbps.unwrap_or(0),
            "download source selected"
        );

        ctx.checkpoint()?;
        let handle = self
            .service
            .execute(|| self.client.start_download(&chosen))
            .await?;

        for poll in 1..=self.max_polls {
            ctx.sleep(self.poll_interval).await?;
            ctx.checkpoint()?;
            let state = match self.service.execute(|| self.client.status(&handle)).await {
                Ok(state) => state,
                // The transfer keeps running on the daemon; a failed status
                // check only costs this poll.
                Err(e) if e.is_retryable() => {
                    warn!(job_id = %ctx.id(), poll, error = %e, "download status check failed");
                    continue;
                }
                Err(e) => return Err(e),
            };
            match state {
                DownloadState::Completed => {
                    info!(job_id = %ctx.id(), filename = %handle.filename, "download completed");
                    return Ok(json!({
                        "username": handle.username,
                        "filename": handle.filename,
                        "format": chosen.format,
                        "bitrate_kbps": chosen.bitrate_kbps,
                        "size": chosen.size,
                        "subject_id": request.subject_id,
                    }));
                }
                DownloadState::Failed { reason } => {
                    return Err(Error::runtime(format!(
                        "transfer of '{}' failed: {}",
                        handle.filename, reason
                    )));
                }
                state => debug!(job_id = %ctx.id(), poll, ?state, "download in progress"),
            }
        }
        Err(Error::runtime(format!(
            "transfer of '{}' did not finish after {} polls",
            handle.filename, self.max_polls
        )))
    }
}
