//! Script text and upload metadata for a selected trend.

use crate::trends::TrendItem;
use chrono::Datelike;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const MAX_TITLE_CHARS: usize = 100;
pub const MAX_DESCRIPTION_CHARS: usize = 5000;
pub const MAX_TAGS: usize = 15;
pub const MAX_TAG_CHARS: usize = 500;
const HOOK_MAX_WORDS: usize = 15;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Privacy {
    #[default]
    Public,
    Private,
    Unlisted,
}

impl Privacy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
            Self::Unlisted => "unlisted",
        }
    }
}

impl fmt::Display for Privacy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    /// Without the leading `#`.
    pub hashtags: Vec<String>,
    pub category_id: String,
    pub privacy: Privacy,
}

/// Narration text for the video: the trend's story text (or its title when
/// there is none) cut to `max_words`, preferably at a sentence end.
pub fn build_script(trend: &TrendItem, max_words: usize) -> String {
    let source = if trend.description.trim().is_empty() {
        trend.title.as_str()
    } else {
        trend.description.as_str()
    };

    let words: Vec<&str> = source.split_whitespace().collect();
    if words.len() <= max_words {
        return words.join(" ");
    }

    let cut = words[..max_words].join(" ");
    match cut.rfind(['.', '!', '?']) {
        Some(end) if end > 0 => cut[..=end].to_string(),
        _ => cut,
    }
}

pub fn optimize(
    trend: &TrendItem,
    script: &str,
    privacy: Privacy,
    category_id: &str,
    hashtags: &[String],
) -> VideoMetadata {
    let title = make_title(trend, script);
    let hashtags = normalize_hashtags(hashtags);
    let description = make_description(&title, trend, &hashtags);
    let tags = make_tags(trend, chrono::Utc::now().year());

    VideoMetadata {
        title,
        description,
        tags,
        hashtags,
        category_id: category_id.to_string(),
        privacy,
    }
}

fn first_sentence(text: &str) -> &str {
    let text = text.trim();
    match text.find('.') {
        Some(end) => text[..end].trim(),
        None => text.lines().next().unwrap_or("").trim(),
    }
}

/// A first-person opener ("I ...") of at most 15 words.
fn hook(text: &str) -> Option<String> {
    let sentence = first_sentence(text);
    if !sentence.starts_with("I ") || sentence.split_whitespace().count() > HOOK_MAX_WORDS {
        return None;
    }
    let mut title = sentence.to_string();
    if !title.ends_with(['.', '!', '?']) {
        title.push('.');
    }
    if title.chars().count() > MAX_TITLE_CHARS {
        let short: Vec<&str> = title.split_whitespace().take(12).collect();
        title = format!("{}...", short.join(" "));
    }
    Some(title)
}

fn make_title(trend: &TrendItem, script: &str) -> String {
    let title = hook(script)
        .or_else(|| hook(&trend.title))
        .unwrap_or_else(|| trend.title.trim().to_string());
    let title = if title.is_empty() {
        "Trending Topic".to_string()
    } else {
        title
    };
    truncate_chars(&title, MAX_TITLE_CHARS)
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let kept: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", kept.trim_end())
}

fn normalize_hashtags(hashtags: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for tag in hashtags {
        let tag = tag.trim().trim_start_matches('#').to_lowercase();
        if !tag.is_empty() && !out.contains(&tag) {
            out.push(tag);
        }
    }
    if !out.iter().any(|t| t == "shorts") {
        out.push("shorts".to_string());
    }
    out
}

fn make_description(title: &str, trend: &TrendItem, hashtags: &[String]) -> String {
    let mut body = String::new();
    body.push_str(title);
    body.push_str("\n\n");

    let story = trend.description.trim();
    if !story.is_empty() {
        body.push_str(&truncate_chars(story, 1000));
        body.push_str("\n\n");
    }
    if !trend.keywords.is_empty() {
        let related: Vec<&str> = trend.keywords.iter().take(10).map(String::as_str).collect();
        body.push_str("Related topics: ");
        body.push_str(&related.join(", "));
        body.push_str("\n\n");
    }
    if let Some(url) = trend.url.as_deref() {
        body.push_str("Source: ");
        body.push_str(url);
        body.push_str("\n\n");
    }
    body.push_str("Comment below with your take, and subscribe for a new story every day.");

    let tail: String = hashtags
        .iter()
        .map(|h| format!("#{h}"))
        .collect::<Vec<_>>()
        .join(" ");
    let room = MAX_DESCRIPTION_CHARS.saturating_sub(tail.chars().count() + 2);
    format!("{}\n\n{}", truncate_chars(body.trim_end(), room), tail)
}

fn make_tags(trend: &TrendItem, year: i32) -> Vec<String> {
    let year = year.to_string();
    let candidates = trend
        .title
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .chain(trend.keywords.iter().take(10).map(|k| k.trim().to_lowercase()))
        .chain(["trending", "viral", "shorts", year.as_str()].map(str::to_string));

    let mut tags: Vec<String> = Vec::new();
    let mut total = 0;
    for tag in candidates {
        if tag.chars().count() <= 2 || tags.contains(&tag) {
            continue;
        }
        let cost = tag.chars().count() + 1;
        if tags.len() >= MAX_TAGS || total + cost > MAX_TAG_CHARS {
            break;
        }
        total += cost;
        tags.push(tag);
    }
    tags
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trend(title: &str, description: &str) -> TrendItem {
        TrendItem {
            description: description.to_string(),
            keywords: vec!["neighbor".into(), "fence".into()],
            ..TrendItem::new(title, "reddit")
        }
    }

    #[test]
    fn script_is_cut_at_sentence_end() {
        let t = trend("t", "One two three. Four five six seven. Eight nine ten eleven twelve");
        assert_eq!(build_script(&t, 9), "One two three. Four five six seven.");
        assert_eq!(build_script(&t, 100), t.description);
    }

    #[test]
    fn script_without_sentence_end_is_cut_at_word_budget() {
        let t = trend("t", "alpha beta gamma delta epsilon");
        assert_eq!(build_script(&t, 3), "alpha beta gamma");
    }

    #[test]
    fn script_falls_back_to_title() {
        let t = trend("A short title", "   ");
        assert_eq!(build_script(&t, 175), "A short title");
    }

    #[test]
    fn first_person_hook_becomes_title() {
        let t = trend("AITA for building a fence", "");
        let meta = optimize(
            &t,
            "I built a fence and my neighbor lost it. Then things got worse.",
            Privacy::Public,
            "22",
            &[],
        );
        assert_eq!(meta.title, "I built a fence and my neighbor lost it.");
    }

    #[test]
    fn long_trend_title_is_capped() {
        let t = trend(&"x".repeat(250), "");
        let meta = optimize(&t, "no hook here", Privacy::Private, "24", &[]);
        assert_eq!(meta.title.chars().count(), MAX_TITLE_CHARS);
        assert!(meta.title.ends_with("..."));
        assert_eq!(meta.privacy, Privacy::Private);
        assert_eq!(meta.category_id, "24");
    }

    #[test]
    fn description_ends_with_hashtags_and_always_has_shorts() {
        let t = trend("topic A", "story");
        let meta = optimize(&t, "", Privacy::Public, "22", &["#Reddit".into(), "reddit".into()]);
        assert!(meta.description.ends_with("#reddit #shorts"), "{}", meta.description);
        assert_eq!(meta.hashtags, vec!["reddit", "shorts"]);
    }

    #[test]
    fn description_respects_limit() {
        let t = trend("topic", &"word ".repeat(3000));
        let meta = optimize(&t, "", Privacy::Public, "22", &[]);
        assert!(meta.description.chars().count() <= MAX_DESCRIPTION_CHARS);
        assert!(meta.description.ends_with("#shorts"));
    }

    #[test]
    fn tags_are_deduplicated_and_bounded() {
        let mut t = trend("The Neighbor built a FENCE fence", "");
        t.keywords = (0..40).map(|i| format!("keyword{i}")).collect();
        let tags = make_tags(&t, 2026);

        assert!(tags.len() <= MAX_TAGS);
        assert!(tags.iter().map(|t| t.len() + 1).sum::<usize>() <= MAX_TAG_CHARS);
        assert_eq!(tags.iter().filter(|t| t.as_str() == "fence").count(), 1);
        assert!(tags.iter().all(|t| t.chars().count() > 2));
        assert_eq!(&tags[..4], ["the", "neighbor", "built", "fence"]);
    }

    #[test]
    fn tags_include_year_when_room() {
        let t = trend("topic", "");
        let tags = make_tags(&t, 2026);
        assert!(tags.contains(&"2026".to_string()));
        assert!(tags.contains(&"shorts".to_string()));
    }

    #[test]
    fn privacy_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Privacy::Unlisted).unwrap(), "\"unlisted\"");
        assert_eq!(Privacy::default().to_string(), "public");
    }
}
