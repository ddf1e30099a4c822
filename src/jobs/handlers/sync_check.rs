use crate::auth::TokenManager;
use crate::clients::CatalogClient;
use crate::jobs::handler::decode_payload;
use crate::jobs::{JobContext, JobHandler, JobKind};
use crate::library::LibraryStore;
use crate::resilience::ProtectedService;
use crate::scoring::{score_missing_albums, Candidate};
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

/// Payload of a [`JobKind::SyncCheck`] job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncCheckRequest {
    /// Catalog subject (artist) id.
    pub subject_id: String,
}

/// Everything needed to compare a catalog discography with the library.
#[derive(Clone)]
pub struct CatalogScan {
    pub catalog: Arc<dyn CatalogClient>,
    pub service: Arc<ProtectedService>,
    pub tokens: Arc<TokenManager>,
    pub store: Arc<dyn LibraryStore>,
}

impl CatalogScan {
    /// Token first, then the protected catalog call, then local ownership.
    pub async fn missing_albums(&self, subject_id: &str) -> Result<Vec<Candidate>> {
        if subject_id.trim().is_empty() {
            return Err(Error::validation("subject id is empty"));
        }
        let token = self.tokens.get_valid_token().await?;
        let releases = self
            .service
            .execute(|| self.catalog.get_releases(&token.access_token, subject_id))
            .await?;
        let owned = self.store.owned_release_ids(subject_id).await?;
        let candidates = score_missing_albums(subject_id, &releases, &owned);
        info!(
            subject_id,
            releases = releases.len(),
            owned = owned.len(),
            missing = candidates.len(),
            "catalog scan finished"
        );
        Ok(candidates)
    }
}

/// Detect missing albums for one subject and enqueue a download for each.
pub struct SyncCheckHandler {
    scan: CatalogScan,
    priority: i32,
    max_attempts: u32,
}

impl SyncCheckHandler {
    pub fn new(scan: CatalogScan, priority: i32, max_attempts: u32) -> Self {
        Self {
            scan,
            priority,
            max_attempts,
        }
    }
}

#[async_trait]
impl JobHandler for SyncCheckHandler {
    fn kind(&self) -> JobKind {
        JobKind::SyncCheck
    }

    fn validate(&self, payload: &serde_json::Value) -> Result<()> {
        let request: SyncCheckRequest = decode_payload(JobKind::SyncCheck, payload)?;
        if request.subject_id.trim().is_empty() {
            return Err(Error::validation("subject id is empty"));
        }
        Ok(())
    }

    async fn handle(&self, ctx: &JobContext) -> Result<serde_json::Value> {
        let request: SyncCheckRequest = ctx.payload()?;

        ctx.checkpoint()?;
        let candidates = self.scan.missing_albums(&request.subject_id).await?;
        let jobs = candidates
            .iter()
            .cloned()
            .map(|c| c.into_job(self.priority, self.max_attempts))
            .collect::<Result<Vec<_>>>()?;
        for job in &jobs {
            ctx.validate_job(job)?;
        }

        ctx.checkpoint()?;
        self.scan.store.record_candidates(&candidates).await?;
        let enqueued = ctx.enqueue_all(jobs)?;
        Ok(json!({
            "subject_id": request.subject_id,
            "missing": enqueued.len(),
            "enqueued": enqueued,
        }))
    }
}
