use crate::clients::{LookupQuery, MetadataClient};
use crate::jobs::handler::decode_payload;
use crate::jobs::{JobContext, JobHandler, JobKind};
use crate::resilience::ProtectedService;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

/// Payload of a [`JobKind::Enrich`] job. ISRC wins over free text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichRequest {
    pub track_id: String,
    #[serde(default)]
    pub isrc: Option<String>,
    #[serde(default)]
    pub query: Option<String>,
}

impl EnrichRequest {
    pub fn lookup(&self) -> Result<LookupQuery> {
        let non_empty = |s: &Option<String>| s.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);
        if let Some(isrc) = non_empty(&self.isrc) {
            Ok(LookupQuery::Isrc(isrc))
        } else if let Some(query) = non_empty(&self.query) {
            Ok(LookupQuery::Query(query))
        } else {
            Err(Error::validation(format!(
                "enrich request for '{}' needs an isrc or a query",
                self.track_id
            )))
        }
    }
}

/// Metadata refresh through the rate-limited metadata service.
pub struct EnrichHandler {
    client: Arc<dyn MetadataClient>,
    service: Arc<ProtectedService>,
}

impl EnrichHandler {
    pub fn new(client: Arc<dyn MetadataClient>, service: Arc<ProtectedService>) -> Self {
        Self { client, service }
    }
}

#[async_trait]
impl JobHandler for EnrichHandler {
    fn kind(&self) -> JobKind {
        JobKind::Enrich
    }

    fn validate(&self, payload: &serde_json::Value) -> Result<()> {
        decode_payload::<EnrichRequest>(JobKind::Enrich, payload)?.lookup()?;
        Ok(())
    }

    async fn handle(&self, ctx: &JobContext) -> Result<serde_json::Value> {
        let request: EnrichRequest = ctx.payload()?;
        let query = request.lookup()?;

        ctx.checkpoint()?;
        let record = self
            .service
            .execute(|| self.client.lookup(&query))
            .await?;
        info!(
            job_id = %ctx.id(),
            track_id = %request.track_id,
            found = record.is_some(),
            "metadata lookup finished"
        );
        Ok(json!({
            "track_id": request.track_id,
            "found": record.is_some(),
            "record": record,
        }))
    }
}
