//! YouTube Data API v3: trending videos, channel lookup and resumable upload.

use super::{first_str, send, send_json};
use crate::error::RemoteError;
use crate::metadata::VideoMetadata;
use crate::services::{UploadTarget, VideoId, watch_url};
use crate::trends::{TrendItem, TrendSource};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{CONTENT_TYPE, LOCATION};
use reqwest::{Client, RequestBuilder};
use serde_json::{Value, json};
use tracing::info;

pub const DEFAULT_API_BASE: &str = "https://www.googleapis.com/youtube/v3";
pub const DEFAULT_UPLOAD_BASE: &str = "https://www.googleapis.com/upload/youtube/v3";
const TRENDING_MAX_RESULTS: u32 = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub id: String,
    pub title: String,
    pub subscriber_count: u64,
    pub video_count: u64,
}

pub struct YouTubeClient {
    client: Client,
    api_base: String,
    upload_base: String,
    access_token: Option<String>,
    api_key: Option<String>,
}

impl YouTubeClient {
    pub fn new(client: Client, api_base: impl Into<String>, upload_base: impl Into<String>) -> Self {
        Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            upload_base: upload_base.into().trim_end_matches('/').to_string(),
            access_token: None,
            api_key: None,
        }
    }

    pub fn with_access_token(mut self, token: Option<String>) -> Self {
        self.access_token = token.filter(|t| !t.is_empty());
        self
    }

    pub fn with_api_key(mut self, key: Option<String>) -> Self {
        self.api_key = key.filter(|k| !k.is_empty());
        self
    }

    pub fn has_session(&self) -> bool {
        self.access_token.is_some()
    }

    fn authorize(&self, action: &str, request: RequestBuilder) -> Result<RequestBuilder, RemoteError> {
        match (&self.access_token, &self.api_key) {
            (Some(token), _) => Ok(request.bearer_auth(token)),
            (None, Some(key)) => Ok(request.query(&[("key", key.as_str())])),
            (None, None) => Err(RemoteError::rejected(
                action,
                "no OAuth session or API key configured",
            )),
        }
    }

    fn bearer(&self, action: &str, request: RequestBuilder) -> Result<RequestBuilder, RemoteError> {
        match &self.access_token {
            Some(token) => Ok(request.bearer_auth(token)),
            None => Err(RemoteError::rejected(action, "requires an OAuth session")),
        }
    }

    /// The channel owned by the authenticated account.
    pub async fn channel_info(&self) -> Result<ChannelInfo, RemoteError> {
        let action = "youtube channel lookup";
        let request = self
            .client
            .get(format!("{}/channels", self.api_base))
            .query(&[("part", "snippet,statistics"), ("mine", "true")]);
        let body = send_json(action, self.bearer(action, request)?).await?;

        let channel = body
            .get("items")
            .and_then(|items| items.get(0))
            .ok_or_else(|| RemoteError::rejected(action, "no channel found for this account"))?;

        Ok(ChannelInfo {
            id: first_str(channel, &[&["id"]]).unwrap_or_default().to_string(),
            title: first_str(channel, &[&["snippet", "title"]])
                .unwrap_or_default()
                .to_string(),
            subscriber_count: count(channel, "subscriberCount"),
            video_count: count(channel, "videoCount"),
        })
    }
}

/// Statistics come back as decimal strings.
fn count(item: &Value, field: &str) -> u64 {
    item.get("statistics")
        .and_then(|s| s.get(field))
        .and_then(|v| v.as_str().and_then(|s| s.parse().ok()).or_else(|| v.as_u64()))
        .unwrap_or(0)
}

fn parse_trending(body: &Value) -> Vec<TrendItem> {
    let Some(items) = body.get("items").and_then(Value::as_array) else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| {
            let id = first_str(item, &[&["id"], &["id", "videoId"]])?;
            let title = first_str(item, &[&["snippet", "title"]])?;
            let snippet = item.get("snippet");
            Some(TrendItem {
                id: id.to_string(),
                title: title.to_string(),
                description: first_str(item, &[&["snippet", "description"]])
                    .unwrap_or_default()
                    .to_string(),
                source: "youtube".to_string(),
                score: count(item, "viewCount"),
                published_at: first_str(item, &[&["snippet", "publishedAt"]])
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                    .map(|d| d.with_timezone(&Utc)),
                keywords: snippet
                    .and_then(|s| s.get("tags"))
                    .and_then(Value::as_array)
                    .map(|tags| {
                        tags.iter()
                            .filter_map(Value::as_str)
                            .take(10)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default(),
                url: Some(watch_url(id)),
            })
        })
        .collect()
}

#[async_trait]
impl TrendSource for YouTubeClient {
    fn name(&self) -> &str {
        "youtube"
    }

    async fn fetch_trending(&self, region: &str) -> Result<Vec<TrendItem>, RemoteError> {
        let action = "youtube trending";
        let max_results = TRENDING_MAX_RESULTS.to_string();
        let request = self.client.get(format!("{}/videos", self.api_base)).query(&[
            ("part", "snippet,statistics"),
            ("chart", "mostPopular"),
            ("regionCode", region),
            ("maxResults", max_results.as_str()),
        ]);
        let body = send_json(action, self.authorize(action, request)?).await?;
        let items = parse_trending(&body);
        info!(region, count = items.len(), "fetched trending videos");
        Ok(items)
    }
}

#[async_trait]
impl UploadTarget for YouTubeClient {
    async fn upload(&self, video: &[u8], metadata: &VideoMetadata) -> Result<VideoId, RemoteError> {
        let action = "youtube upload";
        let resource = json!({
            "snippet": {
                "title": metadata.title,
                "description": metadata.description,
                "tags": metadata.tags,
                "categoryId": metadata.category_id,
            },
            "status": {
                "privacyStatus": metadata.privacy.as_str(),
                "selfDeclaredMadeForKids": false,
            },
        });

        let start = self
            .client
            .post(format!("{}/videos", self.upload_base))
            .query(&[("uploadType", "resumable"), ("part", "snippet,status")])
            .header("X-Upload-Content-Type", "video/*")
            .header("X-Upload-Content-Length", video.len().to_string())
            .json(&resource);
        let resp = send(action, self.bearer(action, start)?).await?;
        let session_url = resp
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| RemoteError::rejected(action, "upload session has no Location header"))?;

        info!(bytes = video.len(), title = %metadata.title, "uploading video");
        let put = self
            .client
            .put(&session_url)
            .header(CONTENT_TYPE, "video/*")
            .body(video.to_vec());
        let body = send_json(action, self.bearer(action, put)?).await?;

        let id = first_str(&body, &[&["id"]])
            .ok_or_else(|| RemoteError::rejected(action, "upload finished without a video id"))?;
        Ok(id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::Privacy;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn youtube(server: &MockServer) -> YouTubeClient {
        YouTubeClient::new(
            Client::new(),
            format!("{}/youtube/v3", server.uri()),
            format!("{}/upload/youtube/v3", server.uri()),
        )
    }

    fn metadata() -> VideoMetadata {
        VideoMetadata {
            title: "I found a door in my basement.".into(),
            description: "story\n\n#shorts".into(),
            tags: vec!["basement".into(), "shorts".into()],
            hashtags: vec!["shorts".into()],
            category_id: "22".into(),
            privacy: Privacy::Unlisted,
        }
    }

    #[tokio::test]
    async fn trending_uses_api_key_and_parses_items() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/youtube/v3/videos"))
            .and(query_param("chart", "mostPopular"))
            .and(query_param("regionCode", "GB"))
            .and(query_param("key", "yt-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [{
                    "id": "abc123",
                    "snippet": {
                        "title": "Big news",
                        "description": "details",
                        "publishedAt": "2026-10-01T12:00:00Z",
                        "tags": ["news", "today"]
                    },
                    "statistics": {"viewCount": "12345"}
                }, {
                    "id": "untitled"
                }]
            })))
            .mount(&server)
            .await;

        let client = youtube(&server).with_api_key(Some("yt-key".into()));
        let items = client.fetch_trending("GB").await.unwrap();

        assert_eq!(items.len(), 1);
        let item = &items[0];
        assert_eq!(item.title, "Big news");
        assert_eq!(item.score, 12345);
        assert_eq!(item.keywords, vec!["news", "today"]);
        assert_eq!(item.url.as_deref(), Some("https://www.youtube.com/watch?v=abc123"));
        assert!(item.published_at.is_some());
    }

    #[tokio::test]
    async fn trending_without_credentials_is_rejected() {
        let server = MockServer::start().await;
        let err = youtube(&server).fetch_trending("US").await.unwrap_err();
        assert!(matches!(err, RemoteError::Rejected { .. }));
    }

    #[tokio::test]
    async fn resumable_upload_returns_video_id() {
        let server = MockServer::start().await;
        let session = format!("{}/upload-session/s1", server.uri());

        Mock::given(method("POST"))
            .and(path("/upload/youtube/v3/videos"))
            .and(query_param("uploadType", "resumable"))
            .and(header("authorization", "Bearer tok"))
            .and(body_partial_json(json!({
                "snippet": {"title": "I found a door in my basement.", "categoryId": "22"},
                "status": {"privacyStatus": "unlisted"}
            })))
            .respond_with(ResponseTemplate::new(200).insert_header("Location", session.as_str()))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/upload-session/s1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "vid-777"})))
            .expect(1)
            .mount(&server)
            .await;

        let client = youtube(&server).with_access_token(Some("tok".into()));
        let id = client.upload(b"fake mp4", &metadata()).await.unwrap();
        assert_eq!(id, "vid-777");
    }

    #[tokio::test]
    async fn quota_error_is_rejected_with_reason() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/upload/youtube/v3/videos"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "error": {
                    "code": 403,
                    "message": "quota exceeded",
                    "errors": [{"reason": "quotaExceeded"}]
                }
            })))
            .mount(&server)
            .await;

        let client = youtube(&server).with_access_token(Some("tok".into()));
        let err = client.upload(b"x", &metadata()).await.unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("quotaExceeded"));
    }

    #[tokio::test]
    async fn upload_needs_a_session() {
        let server = MockServer::start().await;
        let client = youtube(&server).with_api_key(Some("key-only".into()));
        assert!(!client.has_session());
        let err = client.upload(b"x", &metadata()).await.unwrap_err();
        assert!(matches!(err, RemoteError::Rejected { .. }));
    }

    #[tokio::test]
    async fn channel_info_reads_first_item() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/youtube/v3/channels"))
            .and(query_param("mine", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [{
                    "id": "UC1",
                    "snippet": {"title": "RedditReviews"},
                    "statistics": {"subscriberCount": "42", "videoCount": "7"}
                }]
            })))
            .mount(&server)
            .await;

        let client = youtube(&server).with_access_token(Some("tok".into()));
        let channel = client.channel_info().await.unwrap();
        assert_eq!(channel.title, "RedditReviews");
        assert_eq!(channel.subscriber_count, 42);
        assert_eq!(channel.video_count, 7);
    }
}
