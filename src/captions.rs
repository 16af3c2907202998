//! Caption cues built from the narration script, written as SRT.
//!
//! Cue timing is spread over the video length in proportion to each cue's
//! word count, which tracks a steady text-to-speech voice closely enough for
//! short narration.

use anyhow::{Context, Result};
use std::path::Path;
use tokio::fs;

#[derive(Debug, Clone, PartialEq)]
pub struct Caption {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// Splits `script` into cues of at most `max_words` words timed over
/// `duration` seconds.
pub fn timed_captions(script: &str, duration: f64, max_words: usize) -> Vec<Caption> {
    let words: Vec<&str> = script.split_whitespace().collect();
    if words.is_empty() || duration <= 0.0 {
        return Vec::new();
    }

    let per_word = duration / words.len() as f64;
    let mut captions = Vec::new();
    let mut spoken = 0usize;
    for chunk in words.chunks(max_words.max(1)) {
        let start = spoken as f64 * per_word;
        spoken += chunk.len();
        // last cue ends exactly at `duration`
        let end = if spoken == words.len() {
            duration
        } else {
            spoken as f64 * per_word
        };
        captions.push(Caption {
            start,
            end,
            text: chunk.join(" "),
        });
    }
    captions
}

fn format_timestamp(seconds: f64) -> String {
    let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;
    let (hh, rest) = (total_ms / 3_600_000, total_ms % 3_600_000);
    let (mm, rest) = (rest / 60_000, rest % 60_000);
    let (ss, ms) = (rest / 1000, rest % 1000);
    format!("{hh:02}:{mm:02}:{ss:02},{ms:03}")
}

pub fn to_srt(captions: &[Caption]) -> String {
    let mut out = String::new();
    for (i, cue) in captions.iter().enumerate() {
        out.push_str(&format!(
            "{}\n{} --> {}\n{}\n\n",
            i + 1,
            format_timestamp(cue.start),
            format_timestamp(cue.end),
            cue.text
        ));
    }
    out
}

pub async fn write_srt(path: &Path, captions: &[Caption]) -> Result<()> {
    fs::write(path, to_srt(captions))
        .await
        .with_context(|| format!("write srt: {}", path.display()))
}
