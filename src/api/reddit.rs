use super::send_json;
use crate::error::RemoteError;
use crate::trends::{TrendItem, TrendSource, extract_keywords};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, info, warn};

pub const DEFAULT_BASE: &str = "https://www.reddit.com";

pub const DEFAULT_SUBREDDITS: &[&str] = &[
    "tifu",
    "AmItheAsshole",
    "confession",
    "TrueOffMyChest",
    "relationship_advice",
    "pettyrevenge",
    "MaliciousCompliance",
];

const MIN_STORY_CHARS: usize = 100;
const MAX_STORY_CHARS: usize = 5000;
const LISTING_LIMIT: u32 = 40;

/// Text posts ("stories") from public subreddit listings. Region is ignored.
pub struct RedditSource {
    client: Client,
    base_url: String,
    subreddits: Vec<String>,
    sort: String,
}

impl RedditSource {
    pub fn new(client: Client, base_url: impl Into<String>, subreddits: Vec<String>) -> Self {
        let subreddits = if subreddits.is_empty() {
            DEFAULT_SUBREDDITS.iter().map(|s| s.to_string()).collect()
        } else {
            subreddits
        };
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            subreddits,
            sort: "hot".to_string(),
        }
    }

    async fn fetch_subreddit(&self, subreddit: &str) -> Result<Vec<TrendItem>, RemoteError> {
        let action = format!("reddit r/{subreddit}");
        let body = send_json(
            &action,
            self.client
                .get(format!("{}/r/{}/{}.json", self.base_url, subreddit, self.sort))
                .query(&[("limit", LISTING_LIMIT)]),
        )
        .await?;
        Ok(parse_listing(&body, subreddit))
    }
}

fn parse_listing(body: &Value, subreddit: &str) -> Vec<TrendItem> {
    let Some(children) = body.pointer("/data/children").and_then(Value::as_array) else {
        return Vec::new();
    };

    children
        .iter()
        .filter_map(|child| child.get("data"))
        .filter_map(|post| story_from_post(post, subreddit))
        .collect()
}

fn str_field<'a>(post: &'a Value, key: &str) -> &'a str {
    post.get(key).and_then(Value::as_str).unwrap_or("")
}

fn story_from_post(post: &Value, subreddit: &str) -> Option<TrendItem> {
    if !post.get("is_self").and_then(Value::as_bool).unwrap_or(false) {
        return None;
    }
    let text = str_field(post, "selftext").trim();
    if matches!(text, "[removed]" | "[deleted]") {
        return None;
    }
    let len = text.chars().count();
    if !(MIN_STORY_CHARS..=MAX_STORY_CHARS).contains(&len) {
        return None;
    }
    let title = str_field(post, "title").trim();
    if title.is_empty() {
        return None;
    }

    let head: String = text.chars().take(500).collect();
    let permalink = str_field(post, "permalink");
    Some(TrendItem {
        id: str_field(post, "id").to_string(),
        title: title.to_string(),
        description: text.to_string(),
        source: format!("reddit/r/{}", post.get("subreddit").and_then(Value::as_str).unwrap_or(subreddit)),
        score: post.get("score").and_then(Value::as_i64).unwrap_or(0).max(0) as u64,
        published_at: post
            .get("created_utc")
            .and_then(Value::as_f64)
            .and_then(|ts| DateTime::<Utc>::from_timestamp(ts as i64, 0)),
        keywords: extract_keywords(&[title, head.as_str()], 10),
        url: (!permalink.is_empty()).then(|| format!("https://www.reddit.com{permalink}")),
    })
}

#[async_trait]
impl TrendSource for RedditSource {
    fn name(&self) -> &str {
        "reddit"
    }

    /// Tries subreddits in random order and returns the stories of the first
    /// one that has any. An error is returned only when no listing could be
    /// read at all.
    async fn fetch_trending(&self, _region: &str) -> Result<Vec<TrendItem>, RemoteError> {
        let mut order: Vec<&str> = self.subreddits.iter().map(String::as_str).collect();
        order.shuffle(&mut rand::thread_rng());

        let mut last_err = None;
        let mut any_listing = false;
        for subreddit in order {
            match self.fetch_subreddit(subreddit).await {
                Ok(stories) if !stories.is_empty() => {
                    info!(subreddit, count = stories.len(), "fetched reddit stories");
                    return Ok(stories);
                }
                Ok(_) => {
                    any_listing = true;
                    debug!(subreddit, "no usable stories");
                }
                // private (403) and banned (404) subreddits are skipped too
                Err(e) => {
                    warn!(subreddit, "listing failed, trying the next subreddit: {e}");
                    last_err = Some(e);
                }
            }
        }

        match last_err {
            Some(e) if !any_listing => Err(e),
            _ => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn post(title: &str, text: &str, score: i64, is_self: bool) -> Value {
        json!({"data": {
            "id": format!("id-{score}"),
            "title": title,
            "selftext": text,
            "is_self": is_self,
            "score": score,
            "subreddit": "tifu",
            "permalink": format!("/r/tifu/comments/{score}/"),
            "created_utc": 1_760_000_000.0
        }})
    }

    #[test]
    fn only_real_text_stories_are_kept() {
        let story = "I locked myself out of the house wearing only a towel. ".repeat(3);
        let body = json!({"data": {"children": [
            post("good story", &story, 500, true),
            post("link post", &story, 900, false),
            post("too short", "short text", 100, true),
            post("removed", "[removed]", 100, true),
            post("too long", &"x".repeat(6000), 100, true),
        ]}});

        let items = parse_listing(&body, "tifu");
        assert_eq!(items.len(), 1);
        let item = &items[0];
        assert_eq!(item.title, "good story");
        assert_eq!(item.score, 500);
        assert_eq!(item.source, "reddit/r/tifu");
        assert_eq!(item.url.as_deref(), Some("https://www.reddit.com/r/tifu/comments/500/"));
        assert!(item.keywords.contains(&"locked".to_string()));
        assert!(item.published_at.is_some());
    }

    #[tokio::test]
    async fn fetches_listing_from_configured_subreddit() {
        let server = MockServer::start().await;
        let story = "This is a long enough story about my neighbor and a fence. ".repeat(3);
        Mock::given(method("GET"))
            .and(path("/r/pettyrevenge/hot.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"children": [post("fence war", &story, 42, true)]}
            })))
            .mount(&server)
            .await;

        let source = RedditSource::new(Client::new(), server.uri(), vec!["pettyrevenge".into()]);
        let items = source.fetch_trending("US").await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "fence war");
    }

    #[tokio::test]
    async fn all_listings_failing_returns_last_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let source = RedditSource::new(Client::new(), server.uri(), vec!["a".into(), "b".into()]);
        let err = source.fetch_trending("US").await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn private_subreddit_is_skipped() {
        let server = MockServer::start().await;
        let story = "My roommate labelled every single item in the fridge with a date. ".repeat(3);
        Mock::given(method("GET"))
            .and(path("/r/private_sub/hot.json"))
            .respond_with(ResponseTemplate::new(403).set_body_string("private"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/r/good/hot.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"children": [post("fridge labels", &story, 7, true)]}
            })))
            .mount(&server)
            .await;

        let source = RedditSource::new(
            Client::new(),
            server.uri(),
            vec!["private_sub".into(), "good".into()],
        );
        // order is shuffled, so repeat to hit both orders
        for _ in 0..10 {
            let items = source.fetch_trending("US").await.unwrap();
            assert_eq!(items.len(), 1);
            assert_eq!(items[0].title, "fridge labels");
        }
    }

    #[tokio::test]
    async fn every_subreddit_rejected_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let source = RedditSource::new(Client::new(), server.uri(), vec!["gone".into()]);
        let err = source.fetch_trending("US").await.unwrap_err();
        assert!(!err.is_retryable());
    }

    #[test]
    fn empty_subreddit_list_uses_defaults() {
        let source = RedditSource::new(Client::new(), DEFAULT_BASE, Vec::new());
        assert_eq!(source.subreddits.len(), DEFAULT_SUBREDDITS.len());
    }
}
