//! Metadata-lookup collaborator (MusicBrainz web service).

use super::http::{build_client, check_status, decode_json, endpoint, parse_base, transport_error};
use crate::config::HttpSettings;
use crate::resilience::registry::METADATA_SERVICE;
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "by", content = "value", rename_all = "snake_case")]
pub enum LookupQuery {
    Isrc(String),
    /// Free-text recording search, e.g. `"artist title"`.
    Query(String),
}

impl LookupQuery {
    pub fn is_empty(&self) -> bool {
        match self {
            LookupQuery::Isrc(s) | LookupQuery::Query(s) => s.trim().is_empty(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub recording_id: String,
    pub title: String,
    #[serde(default)]
    pub artist: String,
    #[serde(default)]
    pub release_title: Option<String>,
    #[serde(default)]
    pub isrc: Option<String>,
    #[serde(default)]
    pub length_ms: Option<u64>,
    /// Search relevance (0..=100); absent for ISRC lookups.
    #[serde(default)]
    pub score: Option<u32>,
}

#[async_trait]
pub trait MetadataClient: Send + Sync {
    /// Best matching recording, `None` when nothing matches.
    async fn lookup(&self, query: &LookupQuery) -> Result<Option<MetadataRecord>>;
}

pub struct MusicBrainzClient {
    http: reqwest::Client,
    base: Url,
}

#[derive(Deserialize)]
struct RecordingList {
    #[serde(default)]
    recordings: Vec<Recording>,
}

#[derive(Deserialize)]
struct Recording {
    id: String,
    title: String,
    length: Option<u64>,
    score: Option<u32>,
    #[serde(default, rename = "artist-credit")]
    artist_credit: Vec<ArtistCredit>,
    #[serde(default)]
    releases: Vec<ReleaseRef>,
    #[serde(default)]
    isrcs: Vec<String>,
}

#[derive(Deserialize)]
struct ArtistCredit {
    name: String,
    #[serde(default)]
    joinphrase: String,
}

#[derive(Deserialize)]
struct ReleaseRef {
    title: String,
}

impl Recording {
    fn into_record(self, isrc: Option<&str>) -> MetadataRecord {
        let artist = self
            .artist_credit
            .iter()
            .map(|c| format!("{}{}", c.name, c.joinphrase))
            .collect::<String>();
        MetadataRecord {
            recording_id: self.id,
            title: self.title,
            artist,
            release_title: self.releases.into_iter().next().map(|r| r.title),
            isrc: isrc
                .map(str::to_string)
                .or_else(|| self.isrcs.into_iter().next()),
            length_ms: self.length,
            score: self.score,
        }
    }
}

impl MusicBrainzClient {
    pub fn new(settings: &HttpSettings) -> Result<Self> {
        Ok(Self {
            http: build_client(settings)?,
            base: parse_base(&settings.metadata_base_url, "http.metadata_base_url")?,
        })
    }

    async fn get(&self, url: Url) -> Result<Option<RecordingList>> {
        let resp = self
            .http
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| transport_error(METADATA_SERVICE, e))?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = check_status(METADATA_SERVICE, METADATA_SERVICE, resp).await?;
        decode_json(METADATA_SERVICE, resp).await.map(Some)
    }
}

#[async_trait]
impl MetadataClient for MusicBrainzClient {
    async fn lookup(&self, query: &LookupQuery) -> Result<Option<MetadataRecord>> {
        if query.is_empty() {
            return Err(Error::validation("metadata lookup query is empty"));
        }
        match query {
            LookupQuery::Isrc(isrc) => {
                let mut url = endpoint(&self.base, &["ws", "2", "isrc", isrc.trim()])?;
                url.query_pairs_mut()
                    .append_pair("inc", "artist-credits+releases")
                    .append_pair("fmt", "json");
                Ok(self.get(url).await?.and_then(|list| {
                    list.recordings
                        .into_iter()
                        .next()
                        .map(|r| r.into_record(Some(isrc.trim())))
                }))
            }
            LookupQuery::Query(text) => {
                let mut url = endpoint(&self.base, &["ws", "2", "recording"])?;
                url.query_pairs_mut()
                    .append_pair("query", text.trim())
                    .append_pair("limit", "1")
                    .append_pair("fmt", "json");
                Ok(self
                    .get(url)
                    .await?
                    .and_then(|list| list.recordings.into_iter().next().map(|r| r.into_record(None))))
            }
        }
    }
}
