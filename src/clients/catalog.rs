//! Streaming-catalog collaborator.

use super::http::{build_client, check_status, decode_json, endpoint, parse_base, transport_error};
use crate::auth::{Token, TokenRefresher};
use crate::config::HttpSettings;
use crate::resilience::registry::CATALOG_SERVICE;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// One release in a catalog subject's discography.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    /// External catalog id; ownership is matched on this.
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub artist: String,
    /// `album`, `single`, `compilation`, ...
    #[serde(default)]
    pub release_type: String,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub total_tracks: Option<u32>,
}

/// Catalog access. Refreshing the account token is part of the same service,
/// so every catalog client is also a [`TokenRefresher`].
#[async_trait]
pub trait CatalogClient: TokenRefresher {
    /// Full release list for a subject (artist), all pages.
    async fn get_releases(&self, access_token: &str, subject_id: &str) -> Result<Vec<Release>>;
}

const PAGE_LIMIT: u32 = 50;
const MAX_PAGES: usize = 40;

/// Spotify Web API flavoured catalog client.
pub struct SpotifyCatalogClient {
    http: reqwest::Client,
    api_base: Url,
    accounts_base: Url,
    client_id: String,
    client_secret: String,
    account: String,
}

#[derive(Deserialize)]
struct AlbumPage {
    #[serde(default)]
    items: Vec<AlbumItem>,
    next: Option<String>,
}

#[derive(Deserialize)]
struct AlbumItem {
    id: String,
    name: String,
    #[serde(default)]
    album_type: String,
    release_date: Option<String>,
    total_tracks: Option<u32>,
    #[serde(default)]
    artists: Vec<ArtistRef>,
}

#[derive(Deserialize)]
struct ArtistRef {
    name: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

impl SpotifyCatalogClient {
    pub fn new(
        settings: &HttpSettings,
        account: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            http: build_client(settings)?,
            api_base: parse_base(&settings.catalog_api_base, "http.catalog_api_base")?,
            accounts_base: parse_base(&settings.catalog_accounts_base, "http.catalog_accounts_base")?,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            account: account.into(),
        })
    }

    async fn fetch_page(&self, access_token: &str, url: Url) -> Result<AlbumPage> {
        let resp = self
            .http
            .get(url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| transport_error(CATALOG_SERVICE, e))?;
        let resp = check_status(CATALOG_SERVICE, &self.account, resp).await?;
        decode_json(CATALOG_SERVICE, resp).await
    }
}

impl From<AlbumItem> for Release {
    fn from(item: AlbumItem) -> Self {
        let artist = item
            .artists
            .into_iter()
            .map(|a| a.name)
            .collect::<Vec<_>>()
            .join(", ");
        Release {
            id: item.id,
            title: item.name,
            artist,
            release_type: item.album_type,
            release_date: item.release_date,
            total_tracks: item.total_tracks,
        }
    }
}

#[async_trait]
impl TokenRefresher for SpotifyCatalogClient {
    async fn refresh_token(&self, refresh_token: &str) -> Result<Token> {
        let url = endpoint(&self.accounts_base, &["api", "token"])?;
        let resp = self
            .http
            .post(url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "refresh_token"), ("refresh_token", refresh_token)])
            .send()
            .await
            .map_err(|e| transport_error(CATALOG_SERVICE, e))?;
        let resp = check_status(CATALOG_SERVICE, &self.account, resp).await?;
        let body: TokenResponse = decode_json(CATALOG_SERVICE, resp).await?;

        let token = Token::new(
            body.access_token,
            body.refresh_token.unwrap_or_default(),
            Duration::from_secs(body.expires_in),
        );
        Ok(match body.scope {
            Some(scope) => token.with_scope_string(&scope),
            None => token,
        })
    }
}

#[async_trait]
impl CatalogClient for SpotifyCatalogClient {
    async fn get_releases(&self, access_token: &str, subject_id: &str) -> Result<Vec<Release>> {
        let mut url = endpoint(&self.api_base, &["v1", "artists", subject_id, "albums"])?;
        url.query_pairs_mut()
            .append_pair("include_groups", "album,single,compilation")
            .append_pair("limit", &PAGE_LIMIT.to_string());

        let mut releases = Vec::new();
        for page_no in 0..MAX_PAGES {
            let page = self.fetch_page(access_token, url.clone()).await?;
            debug!(
                service = CATALOG_SERVICE,
                subject_id,
                page = page_no,
                items = page.items.len(),
                "fetched release page"
            );
            releases.extend(page.items.into_iter().map(Release::from));
            match page.next.as_deref().map(Url::parse) {
                Some(Ok(next)) => url = next,
                _ => break,
            }
        }
        Ok(releases)
    }
}
