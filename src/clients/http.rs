//! Shared reqwest plumbing for the HTTP collaborators.

use crate::config::HttpSettings;
use crate::{Error, ErrorContext, Result};
use reqwest::header::RETRY_AFTER;
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use url::Url;

const MAX_ERROR_BODY: usize = 512;

pub(crate) fn build_client(settings: &HttpSettings) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(settings.timeout_secs))
        .user_agent(settings.user_agent.clone())
        .pool_idle_timeout(Some(Duration::from_secs(90)))
        .build()
        .map_err(|e| {
            Error::configuration_with_context(
                format!("failed to build HTTP client: {}", e),
                ErrorContext::new().with_source("http"),
            )
        })
}

pub(crate) fn parse_base(base: &str, field: &str) -> Result<Url> {
    let url = Url::parse(base).map_err(|e| {
        Error::configuration_with_context(
            format!("invalid base URL '{}': {}", base, e),
            ErrorContext::new().with_field_path(field),
        )
    })?;
    if url.cannot_be_a_base() {
        return Err(Error::configuration_with_context(
            format!("'{}' cannot be used as a base URL", base),
            ErrorContext::new().with_field_path(field),
        ));
    }
    Ok(url)
}

/// Append percent-encoded path segments to `base`.
pub(crate) fn endpoint(base: &Url, segments: &[&str]) -> Result<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| Error::runtime(format!("'{}' cannot be used as a base URL", base)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// A request that never produced a response counts against the service.
pub(crate) fn transport_error(service: &str, err: reqwest::Error) -> Error {
    Error::transient(service, err.to_string())
}

fn retry_after(resp: &Response) -> Option<Duration> {
    resp.headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Map a non-success status into the error taxonomy.
///
/// 401 means the bearer token is no longer accepted; 429 and 5xx are
/// transient and carry `Retry-After` when present; remaining 4xx are remote
/// rejections that say nothing about service health.
pub(crate) async fn check_status(service: &str, account: &str, resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let hint = retry_after(&resp);
    let mut body = resp.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }

    Err(match status {
        StatusCode::UNAUTHORIZED => Error::auth_expired(account, body),
        StatusCode::TOO_MANY_REQUESTS => Error::Transient {
            service: service.to_string(),
            message: format!("HTTP 429: {}", body),
            retry_after: hint,
        },
        s if s.is_server_error() => Error::Transient {
            service: service.to_string(),
            message: format!("HTTP {}: {}", s.as_u16(), body),
            retry_after: hint,
        },
        s => Error::Remote {
            service: service.to_string(),
            status: s.as_u16(),
            message: body,
        },
    })
}

pub(crate) async fn decode_json<T: DeserializeOwned>(service: &str, resp: Response) -> Result<T> {
    let url = resp.url().to_string();
    let bytes = resp
        .bytes()
        .await
        .map_err(|e| transport_error(service, e))?;
    serde_json::from_slice(&bytes).map_err(|e| {
        Error::runtime_with_context(
            format!("unexpected response body: {}", e),
            ErrorContext::new().with_source(service).with_details(url),
        )
    })
}
