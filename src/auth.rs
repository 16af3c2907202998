//! Loads the stored OAuth session used for uploads, refreshing it when it
//! is about to expire. The interactive consent flow is not handled here.

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;
use tracing::info;

pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const REFRESH_BUFFER_SECS: i64 = 60;

/// Google "authorized user" token file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredToken {
    #[serde(alias = "access_token")]
    pub token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_uri: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub expiry: Option<DateTime<Utc>>,
    /// Scopes and anything else in the file, written back untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl StoredToken {
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        if self.token.is_empty() {
            return true;
        }
        match self.expiry {
            Some(expiry) => expiry - Duration::seconds(REFRESH_BUFFER_SECS) <= now,
            None => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSession {
    pub access_token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
}

pub async fn load_token<P: AsRef<Path>>(path: P) -> Result<StoredToken> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read OAuth token file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse OAuth token file: {}", path.display()))
}

pub async fn save_token<P: AsRef<Path>>(path: P, token: &StoredToken) -> Result<()> {
    let path = path.as_ref();
    let json = serde_json::to_string_pretty(token).context("Failed to encode OAuth token")?;
    fs::write(path, json)
        .await
        .with_context(|| format!("Failed to write OAuth token file: {}", path.display()))
}

async fn refresh_token(client: &Client, stored: &StoredToken) -> Result<StoredToken> {
    let (Some(refresh), Some(client_id), Some(client_secret)) = (
        stored.refresh_token.as_deref(),
        stored.client_id.as_deref(),
        stored.client_secret.as_deref(),
    ) else {
        bail!("OAuth token expired and cannot be refreshed (refresh_token, client_id and client_secret are required); authorize again");
    };
    let token_uri = stored.token_uri.as_deref().unwrap_or(DEFAULT_TOKEN_URI);

    info!("Refreshing OAuth access token");
    let resp = client
        .post(token_uri)
        .form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh),
            ("client_id", client_id),
            ("client_secret", client_secret),
        ])
        .send()
        .await
        .context("OAuth token refresh request failed")?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        bail!("OAuth token refresh failed: {} - {}", status.as_u16(), body);
    }
    let data: TokenResponse = resp
        .json()
        .await
        .context("OAuth token refresh returned an unexpected body")?;

    Ok(StoredToken {
        token: data.access_token,
        refresh_token: data.refresh_token.or_else(|| stored.refresh_token.clone()),
        expiry: data
            .expires_in
            .map(|secs| Utc::now() + Duration::seconds(secs)),
        ..stored.clone()
    })
}

/// Reads the token file and returns a usable session, refreshing and
/// persisting the token first when it has expired.
pub async fn acquire_session<P: AsRef<Path>>(client: &Client, path: P) -> Result<UploadSession> {
    let path = path.as_ref();
    let mut token = load_token(path).await?;

    if token.needs_refresh(Utc::now()) {
        token = refresh_token(client, &token).await?;
        save_token(path, &token).await?;
    }

    Ok(UploadSession {
        access_token: token.token,
        expires_at: token.expiry,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn write_token(dir: &tempfile::TempDir, value: serde_json::Value) -> std::path::PathBuf {
        let file = dir.path().join("youtube-oauth2.json");
        tokio::fs::write(&file, value.to_string()).await.unwrap();
        file
    }

    #[test]
    fn refresh_needed_inside_buffer() {
        let now = Utc::now();
        let mut token: StoredToken = serde_json::from_value(json!({"token": "t"})).unwrap();
        assert!(!token.needs_refresh(now));

        token.expiry = Some(now + Duration::seconds(30));
        assert!(token.needs_refresh(now));

        token.expiry = Some(now + Duration::hours(1));
        assert!(!token.needs_refresh(now));
    }

    #[tokio::test]
    async fn valid_token_is_used_as_is() {
        let dir = tempfile::tempdir().unwrap();
        let expiry = (Utc::now() + Duration::hours(1)).to_rfc3339();
        let file = write_token(&dir, json!({"token": "ya29.valid", "expiry": expiry})).await;

        let session = acquire_session(&Client::new(), &file).await.unwrap();
        assert_eq!(session.access_token, "ya29.valid");
    }

    #[tokio::test]
    async fn expired_token_is_refreshed_and_saved() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=rt-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "ya29.new",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let file = write_token(
            &dir,
            json!({
                "token": "ya29.old",
                "refresh_token": "rt-1",
                "token_uri": format!("{}/token", server.uri()),
                "client_id": "cid",
                "client_secret": "csec",
                "scopes": ["https://www.googleapis.com/auth/youtube.upload"],
                "expiry": "2020-01-01T00:00:00Z"
            }),
        )
        .await;

        let session = acquire_session(&Client::new(), &file).await.unwrap();
        assert_eq!(session.access_token, "ya29.new");
        assert!(session.expires_at.unwrap() > Utc::now());

        let saved = load_token(&file).await.unwrap();
        assert_eq!(saved.token, "ya29.new");
        assert_eq!(saved.refresh_token.as_deref(), Some("rt-1"));
        assert!(saved.extra.contains_key("scopes"));
    }

    #[tokio::test]
    async fn refresh_failure_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid_grant"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let file = write_token(
            &dir,
            json!({
                "access_token": "old",
                "refresh_token": "rt",
                "token_uri": format!("{}/token", server.uri()),
                "client_id": "cid",
                "client_secret": "csec",
                "expiry": "2020-01-01T00:00:00Z"
            }),
        )
        .await;

        let err = acquire_session(&Client::new(), &file).await.unwrap_err();
        assert!(format!("{err:#}").contains("invalid_grant"));
    }

    #[tokio::test]
    async fn expired_token_without_refresh_credentials_fails() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_token(&dir, json!({"token": "old", "expiry": "2020-01-01T00:00:00Z"})).await;
        let err = acquire_session(&Client::new(), &file).await.unwrap_err();
        assert!(err.to_string().contains("cannot be refreshed"));
    }

    #[tokio::test]
    async fn missing_token_file_names_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let err = acquire_session(&Client::new(), dir.path().join("absent.json"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("absent.json"));
    }
}
