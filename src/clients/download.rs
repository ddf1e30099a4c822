//! Download-daemon collaborator (slskd REST API).

use super::http::{build_client, check_status, decode_json, endpoint, parse_base, transport_error};
use crate::config::HttpSettings;
use crate::resilience::registry::DOWNLOAD_SERVICE;
use crate::scoring::AudioFormat;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// A file offered by a peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub username: String,
    pub filename: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub bitrate_kbps: Option<u32>,
    pub format: AudioFormat,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DownloadHandle {
    pub username: String,
    pub filename: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DownloadState {
    Queued,
    InProgress { percent: f64 },
    Completed,
    Failed { reason: String },
}

impl DownloadState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DownloadState::Completed | DownloadState::Failed { .. })
    }

    /// Interpret an slskd transfer state such as `"Completed, Succeeded"`.
    pub fn from_transfer_state(state: &str, percent: f64) -> Self {
        let lower = state.to_ascii_lowercase();
        if lower.contains("succeeded") {
            DownloadState::Completed
        } else if lower.starts_with("completed") {
            DownloadState::Failed {
                reason: state.to_string(),
            }
        } else if lower.contains("inprogress") || lower.contains("initializing") {
            DownloadState::InProgress { percent }
        } else {
            DownloadState::Queued
        }
    }
}

#[async_trait]
pub trait DownloadClient: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<SearchResult>>;
    async fn start_download(&self, result: &SearchResult) -> Result<DownloadHandle>;
    async fn status(&self, handle: &DownloadHandle) -> Result<DownloadState>;
}

const SEARCH_POLL_INTERVAL: Duration = Duration::from_millis(500);
const SEARCH_MAX_POLLS: u32 = 30;

pub struct SlskdClient {
    http: reqwest::Client,
    base: Url,
    api_key: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchState {
    #[serde(default)]
    is_complete: bool,
}

#[derive(Deserialize)]
struct PeerResponse {
    username: String,
    #[serde(default)]
    files: Vec<PeerFile>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PeerFile {
    filename: String,
    #[serde(default)]
    size: u64,
    bit_rate: Option<u32>,
    #[serde(default)]
    extension: Option<String>,
}

#[derive(Deserialize)]
struct UserTransfers {
    #[serde(default)]
    directories: Vec<TransferDirectory>,
}

#[derive(Deserialize)]
struct TransferDirectory {
    #[serde(default)]
    files: Vec<Transfer>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Transfer {
    filename: String,
    state: String,
    #[serde(default)]
    percent_complete: f64,
}

impl SlskdClient {
    pub fn new(settings: &HttpSettings, api_key: Option<String>) -> Result<Self> {
        Ok(Self {
            http: build_client(settings)?,
            base: parse_base(&settings.download_base_url, "http.download_base_url")?,
            api_key,
        })
    }

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        let req = self.http.request(method, url);
        match &self.api_key {
            Some(key) => req.header("X-API-Key", key),
            None => req,
        }
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let resp = req
            .send()
            .await
            .map_err(|e| transport_error(DOWNLOAD_SERVICE, e))?;
        check_status(DOWNLOAD_SERVICE, DOWNLOAD_SERVICE, resp).await
    }
}

#[async_trait]
impl DownloadClient for SlskdClient {
    async fn search(&self, query: &str) -> Result<Vec<SearchResult>> {
        if query.trim().is_empty() {
            return Err(Error::validation("search query is empty"));
        }
        let id = uuid::Uuid::new_v4().to_string();
        let url = endpoint(&self.base, &["api", "v0", "searches"])?;
        self.send(
            self.request(reqwest::Method::POST, url)
                .json(&json!({ "id": id, "searchText": query.trim() })),
        )
        .await?;

        let state_url = endpoint(&self.base, &["api", "v0", "searches", &id])?;
        for poll in 0..SEARCH_MAX_POLLS {
            let resp = self.send(self.request(reqwest::Method::GET, state_url.clone())).await?;
            let state: SearchState = decode_json(DOWNLOAD_SERVICE, resp).await?;
            if state.is_complete {
                break;
            }
            debug!(service = DOWNLOAD_SERVICE, search_id = %id, poll, "search still running");
            tokio::time::sleep(SEARCH_POLL_INTERVAL).await;
        }

        let url = endpoint(&self.base, &["api", "v0", "searches", &id, "responses"])?;
        let resp = self.send(self.request(reqwest::Method::GET, url)).await?;
        let peers: Vec<PeerResponse> = decode_json(DOWNLOAD_SERVICE, resp).await?;

        Ok(peers
            .into_iter()
            .flat_map(|peer| {
                let username = peer.username;
                peer.files.into_iter().map(move |f| {
                    let format = match f.extension.as_deref() {
                        Some(ext) if !ext.is_empty() => ext.parse().unwrap_or(AudioFormat::Unknown),
                        _ => AudioFormat::from_path(&f.filename),
                    };
                    SearchResult {
                        username: username.clone(),
                        filename: f.filename,
                        size: f.size,
                        bitrate_kbps: f.bit_rate,
                        format,
                    }
                })
            })
            .collect())
    }

    async fn start_download(&self, result: &SearchResult) -> Result<DownloadHandle> {
        let url = endpoint(&self.base, &["api", "v0", "transfers", "downloads", &result.username])?;
        self.send(
            self.request(reqwest::Method::POST, url)
                .json(&json!([{ "filename": result.filename, "size": result.size }])),
        )
        .await?;
        Ok(DownloadHandle {
            username: result.username.clone(),
            filename: result.filename.clone(),
        })
    }

    async fn status(&self, handle: &DownloadHandle) -> Result<DownloadState> {
        let url = endpoint(&self.base, &["api", "v0", "transfers", "downloads", &handle.username])?;
        let resp = self.send(self.request(reqwest::Method::GET, url)).await?;
        let transfers: UserTransfers = decode_json(DOWNLOAD_SERVICE, resp).await?;
        transfers
            .directories
            .into_iter()
            .flat_map(|d| d.files)
            .find(|t| t.filename == handle.filename)
            .map(|t| DownloadState::from_transfer_state(&t.state, t.percent_complete))
            .ok_or_else(|| Error::Remote {
                service: DOWNLOAD_SERVICE.to_string(),
                status: 404,
                message: format!("no transfer for '{}' from {}", handle.filename, handle.username),
            })
    }
}
