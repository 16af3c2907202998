use super::{first_str, send, send_json};
use crate::error::RemoteError;
use crate::poller::{JobHandle, JobStatus, PollReport};
use crate::services::VideoGenerationService;
use async_trait::async_trait;
use rand::seq::SliceRandom;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

pub const DEFAULT_API_BASE: &str = "https://api.heygen.com";

/// How the narration video is rendered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    /// Picked at random among English voices when unset.
    pub voice_id: Option<String>,
    pub width: u32,
    pub height: u32,
    /// Background colour, used when no background video is set.
    pub background: String,
    /// Uploaded HeyGen asset looped behind the narration.
    pub background_video_asset_id: Option<String>,
    pub speed: f32,
    pub max_script_words: usize,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            voice_id: None,
            width: 720,
            height: 1280,
            background: "#1a1a1a".to_string(),
            background_video_asset_id: None,
            speed: 1.0,
            max_script_words: 175,
        }
    }
}

pub struct HeyGenClient {
    client: Client,
    base_url: String,
    api_key: String,
    settings: GenerationSettings,
    voice: OnceCell<String>,
}

impl HeyGenClient {
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        settings: GenerationSettings,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            settings,
            voice: OnceCell::new(),
        }
    }

    async fn voice_id(&self) -> Result<String, RemoteError> {
        if let Some(id) = self.settings.voice_id.as_deref().filter(|id| !id.is_empty()) {
            return Ok(id.to_string());
        }
        self.voice
            .get_or_try_init(|| self.pick_voice())
            .await
            .cloned()
    }

    async fn pick_voice(&self) -> Result<String, RemoteError> {
        let action = "heygen list voices";
        let body = send_json(
            action,
            self.client
                .get(format!("{}/v2/voices", self.base_url))
                .header("X-Api-Key", &self.api_key),
        )
        .await?;

        let voices: Vec<&Value> = body
            .pointer("/data/voices")
            .or_else(|| body.get("voices"))
            .and_then(Value::as_array)
            .map(|list| list.iter().collect())
            .unwrap_or_default();
        let english: Vec<&Value> = voices.iter().copied().filter(|v| is_english(v)).collect();
        if english.is_empty() && !voices.is_empty() {
            warn!("no English voices found, picking from all {} voices", voices.len());
        }
        let pool = if english.is_empty() { &voices } else { &english };

        let voice = pool
            .choose(&mut rand::thread_rng())
            .ok_or_else(|| RemoteError::rejected(action, "no voices available"))?;
        let id = first_str(voice, &[&["voice_id"], &["id"]])
            .ok_or_else(|| RemoteError::rejected(action, "voice entry without an id"))?;
        let name = voice.get("name").and_then(Value::as_str).unwrap_or("unknown");
        info!(voice_id = id, name, "using HeyGen voice");
        Ok(id.to_string())
    }

    fn background(&self) -> Value {
        match self.settings.background_video_asset_id.as_deref().filter(|id| !id.is_empty()) {
            Some(asset) => json!({
                "type": "video",
                "video_asset_id": asset,
                "play_style": "loop",
            }),
            None => json!({
                "type": "color",
                "value": self.settings.background,
            }),
        }
    }

    fn generate_payload(&self, script: &str, voice_id: &str) -> Value {
        json!({
            "video_inputs": [{
                "voice": {
                    "type": "text",
                    "input_text": script,
                    "voice_id": voice_id,
                    "speed": self.settings.speed,
                },
                "background": self.background(),
            }],
            "dimension": {
                "width": self.settings.width,
                "height": self.settings.height,
            },
        })
    }
}

fn is_english(voice: &Value) -> bool {
    let language = voice
        .get("language")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_lowercase();
    language.contains("english") || language == "en" || language.starts_with("en-") || language.starts_with("en_")
}

/// Maps a `video_status.get` body onto a poll observation.
fn parse_status(body: &Value) -> PollReport {
    let data = body.get("data").filter(|d| d.is_object()).unwrap_or(body);
    let status = data
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_lowercase();
    let progress = data.get("progress").and_then(Value::as_f64).map(|p| p as f32);

    match status.as_str() {
        "completed" => PollReport {
            status: JobStatus::Succeeded,
            progress: Some(1.0),
            artifact_url: first_str(data, &[&["video_url"], &["url"], &["download_url"]])
                .map(str::to_string),
            error: None,
        },
        "failed" | "error" => PollReport::failed(failure_reason(data.get("error"))),
        "pending" | "waiting" => PollReport {
            progress,
            ..PollReport::pending()
        },
        other => {
            if other != "processing" {
                debug!(status = other, "unrecognised HeyGen status, treating as running");
            }
            PollReport {
                progress,
                ..PollReport::running()
            }
        }
    }
}

fn failure_reason(error: Option<&Value>) -> String {
    match error {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(obj @ Value::Object(_)) => {
            let code = first_str(obj, &[&["code"]]);
            let message = first_str(obj, &[&["message"], &["detail"]]);
            match (code, message) {
                (Some(code), Some(message)) => format!("{code}: {message}"),
                (Some(one), None) | (None, Some(one)) => one.to_string(),
                (None, None) => obj.to_string(),
            }
        }
        _ => "generation failed without a reason".to_string(),
    }
}

#[async_trait]
impl VideoGenerationService for HeyGenClient {
    async fn submit_generation(&self, script: &str) -> Result<JobHandle, RemoteError> {
        let action = "heygen generate";
        let voice_id = self.voice_id().await?;
        let words = script.split_whitespace().count();
        info!(words, voice_id = %voice_id, "submitting video generation");

        let body = send_json(
            action,
            self.client
                .post(format!("{}/v2/video/generate", self.base_url))
                .header("X-Api-Key", &self.api_key)
                .json(&self.generate_payload(script, &voice_id)),
        )
        .await?;

        let id = first_str(
            &body,
            &[&["data", "video_id"], &["video_id"], &["data", "id"], &["id"]],
        )
        .ok_or_else(|| RemoteError::rejected(action, format!("response had no video id: {body}")))?;
        Ok(JobHandle::new(id))
    }

    async fn poll_generation(&self, handle: &JobHandle) -> Result<PollReport, RemoteError> {
        let body = send_json(
            "heygen status",
            self.client
                .get(format!("{}/v1/video_status.get", self.base_url))
                .header("X-Api-Key", &self.api_key)
                .query(&[("video_id", handle.id.as_str())]),
        )
        .await?;
        Ok(parse_status(&body))
    }

    async fn fetch_artifact(&self, url: &str) -> Result<Vec<u8>, RemoteError> {
        let action = "heygen download";
        let resp = send(action, self.client.get(url)).await?;
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| RemoteError::from_reqwest(action, &e))?;
        Ok(bytes.to_vec())
    }
}
