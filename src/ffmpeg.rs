//! Local post-processing through the `ffmpeg`/`ffprobe` binaries.

use crate::services::{RenderJob, VideoEditor};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::process::Command;

/// YouTube treats uploads up to this length as Shorts.
pub const SHORTS_MAX_SECS: f64 = 59.0;

const CAPTION_STYLE: &str = "Alignment=2,MarginV=60,Outline=2,Shadow=0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostProcessSettings {
    pub enabled: bool,
    /// Burn captions cut from the narration script into the picture.
    pub captions: bool,
    pub max_duration_secs: f64,
    pub caption_max_words: usize,
    pub caption_font_size: u32,
    pub ffmpeg_bin: String,
    pub ffprobe_bin: String,
}

impl Default for PostProcessSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            captions: true,
            max_duration_secs: SHORTS_MAX_SECS,
            caption_max_words: 5,
            caption_font_size: 16,
            ffmpeg_bin: "ffmpeg".into(),
            ffprobe_bin: "ffprobe".into(),
        }
    }
}

async fn run_cmd(program: &str, args: &[String]) -> Result<()> {
    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .with_context(|| format!("{program} could not be started"))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow::anyhow!(
            "{program} failed ({}): {}",
            output.status,
            stderr.trim()
        ));
    }
    Ok(())
}

/// Escapes a value placed inside a filter option (`key=value`).
fn escape_option(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '\'' | ':') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Escapes a whole filter description for the filtergraph parser.
fn escape_graph(filter: &str) -> String {
    let mut out = String::with_capacity(filter.len());
    for c in filter.chars() {
        if matches!(c, '\\' | '\'' | '[' | ']' | ',' | ';') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn subtitles_filter(srt: &Path, font_size: u32) -> String {
    let style = format!("FontSize={font_size},{CAPTION_STYLE}");
    escape_graph(&format!(
        "subtitles=filename={}:force_style={}",
        escape_option(&srt.to_string_lossy()),
        escape_option(&style)
    ))
}

/// Arguments for one ffmpeg invocation that trims and/or captions `job`.
pub fn render_args(job: &RenderJob, font_size: u32) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-y".into(),
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-i".into(),
        job.input.to_string_lossy().into_owned(),
    ];
    if let Some(max) = job.max_duration {
        args.push("-t".into());
        args.push(format!("{max:.3}"));
    }
    if let Some(srt) = &job.subtitles {
        args.push("-vf".into());
        args.push(subtitles_filter(srt, font_size));
    }
    args.extend(
        [
            "-c:v", "libx264", "-preset", "fast", "-crf", "20", "-c:a", "aac", "-b:a", "192k",
            "-movflags", "+faststart",
        ]
        .map(String::from),
    );
    args.push(job.output.to_string_lossy().into_owned());
    args
}

pub async fn ffprobe_duration_seconds(ffprobe: &str, path: &Path) -> Result<f64> {
    let output = Command::new(ffprobe)
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(path)
        .output()
        .await
        .context("ffprobe duration failed")?;

    if !output.status.success() {
        return Err(anyhow::anyhow!("ffprobe failed for {}", path.display()));
    }

    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let duration = text.parse::<f64>().unwrap_or(-1.0);
    if duration <= 0.1 {
        return Err(anyhow::anyhow!("Invalid duration: {text:?}"));
    }
    Ok(duration)
}

/// [`VideoEditor`] backed by the local ffmpeg install.
#[derive(Debug, Clone)]
pub struct Ffmpeg {
    settings: PostProcessSettings,
}

impl Ffmpeg {
    pub fn new(settings: PostProcessSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl VideoEditor for Ffmpeg {
    async fn duration(&self, path: &Path) -> Result<f64> {
        ffprobe_duration_seconds(&self.settings.ffprobe_bin, path).await
    }

    async fn render(&self, job: &RenderJob) -> Result<()> {
        let args = render_args(job, self.settings.caption_font_size);
        tracing::debug!(?args, "running ffmpeg");
        run_cmd(&self.settings.ffmpeg_bin, &args).await
    }
}
