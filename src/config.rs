use crate::api::{heygen, reddit, youtube};
use crate::backoff::BackoffSchedule;
use crate::ffmpeg::PostProcessSettings;
use crate::poller::PollSettings;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendSourceKind {
    #[default]
    Youtube,
    Reddit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    pub youtube_api: String,
    pub youtube_upload: String,
    pub heygen_api: String,
    pub reddit: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            youtube_api: youtube::DEFAULT_API_BASE.to_string(),
            youtube_upload: youtube::DEFAULT_UPLOAD_BASE.to_string(),
            heygen_api: heygen::DEFAULT_API_BASE.to_string(),
            reddit: reddit::DEFAULT_BASE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub heygen_api_key: String,
    /// Lets trend lookups work without an OAuth session.
    pub youtube_api_key: Option<String>,
    pub oauth_token_file: PathBuf,
    /// Uploads are refused unless the authenticated channel has this title.
    pub required_channel: Option<String>,
    pub used_topics_file: PathBuf,
    pub trend_source: TrendSourceKind,
    pub subreddits: Vec<String>,
    pub hashtags: Vec<String>,
    pub retry: BackoffSchedule,
    pub polling: PollSettings,
    pub generation: heygen::GenerationSettings,
    pub post_process: PostProcessSettings,
    pub endpoints: Endpoints,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            heygen_api_key: String::new(),
            youtube_api_key: None,
            oauth_token_file: PathBuf::from("youtube-oauth2.json"),
            required_channel: None,
            used_topics_file: PathBuf::from("used_topics.json"),
            trend_source: TrendSourceKind::default(),
            subreddits: Vec::new(),
            hashtags: Vec::new(),
            retry: BackoffSchedule::default(),
            polling: PollSettings::default(),
            generation: heygen::GenerationSettings::default(),
            post_process: PostProcessSettings::default(),
            endpoints: Endpoints::default(),
        }
    }
}

impl Config {
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read config: {}", path.as_ref().display()))?;
        let config: Config = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.as_ref().display()))?;
        Ok(config)
    }

    /// Like [`Config::load`], but a missing file yields the defaults so a run
    /// can be configured from the environment alone.
    pub async fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if fs::metadata(&path).await.is_err() {
            tracing::warn!(
                "config not found at {}, using defaults",
                path.as_ref().display()
            );
            return Ok(Self::default());
        }
        Self::load(path).await
    }

    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("HEYGEN_API_KEY").filter(|k| !k.is_empty()) {
            self.heygen_api_key = key;
        }
        if let Some(key) = lookup("YOUTUBE_API_KEY").filter(|k| !k.is_empty()) {
            self.youtube_api_key = Some(key);
        }
    }

    /// `needs_generation` is false for dry runs and when a local video file
    /// replaces generation.
    pub fn validate(&self, needs_generation: bool) -> Result<()> {
        if needs_generation && self.heygen_api_key.trim().is_empty() {
            anyhow::bail!("config.json: heygen_api_key missing (or set HEYGEN_API_KEY)");
        }
        if self.polling.timeout_secs == 0 {
            anyhow::bail!("config.json: polling.timeout_secs must be positive");
        }
        if self.polling.interval_ms == 0 {
            anyhow::bail!("config.json: polling.interval_ms must be positive");
        }
        if self.generation.width == 0 || self.generation.height == 0 {
            anyhow::bail!("config.json: generation dimensions must be positive");
        }
        if self.generation.max_script_words == 0 {
            anyhow::bail!("config.json: generation.max_script_words must be positive");
        }
        if self.post_process.enabled {
            if self.post_process.max_duration_secs <= 0.0 {
                anyhow::bail!("config.json: post_process.max_duration_secs must be positive");
            }
            if self.post_process.caption_max_words == 0 {
                anyhow::bail!("config.json: post_process.caption_max_words must be positive");
            }
        }
        Ok(())
    }
}
