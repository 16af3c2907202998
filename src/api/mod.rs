use crate::error::RemoteError;
use anyhow::{Context, Result};
use reqwest::{Client, RequestBuilder, Response};
use std::time::Duration;

pub mod heygen;
pub mod reddit;
pub mod youtube;

const USER_AGENT: &str = concat!("ai-trend-shorts/", env!("CARGO_PKG_VERSION"));

pub fn build_client() -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(120))
        .connect_timeout(Duration::from_secs(30))
        .build()
        .context("Failed to build HTTP client")
}

/// Sends the request and turns any non-2xx answer into a classified error.
pub(crate) async fn send(action: &str, request: RequestBuilder) -> Result<Response, RemoteError> {
    let resp = request
        .send()
        .await
        .map_err(|e| RemoteError::from_reqwest(action, &e))?;

    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let headers = resp.headers().clone();
    let body = resp.text().await.unwrap_or_default();
    Err(RemoteError::from_status(action, status, &headers, &body))
}

pub(crate) async fn send_json(
    action: &str,
    request: RequestBuilder,
) -> Result<serde_json::Value, RemoteError> {
    let resp = send(action, request).await?;
    let raw = resp
        .text()
        .await
        .map_err(|e| RemoteError::from_reqwest(action, &e))?;
    serde_json::from_str(&raw).map_err(|e| {
        let snippet: String = raw.chars().take(200).collect();
        RemoteError::rejected(action, format!("malformed response ({e}): {snippet}"))
    })
}

/// First string found under any of `paths` (each a list of object keys).
pub(crate) fn first_str<'a>(value: &'a serde_json::Value, paths: &[&[&str]]) -> Option<&'a str> {
    paths.iter().find_map(|path| {
        path.iter()
            .try_fold(value, |v, key| v.get(key))
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
    })
}
