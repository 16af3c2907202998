use crate::error::RemoteError;
use crate::history::UsedTopics;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, warn};

/// A candidate topic from a trend source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendItem {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub source: String,
    #[serde(default)]
    pub score: u64,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub url: Option<String>,
}

impl TrendItem {
    pub fn new(title: impl Into<String>, source: impl Into<String>) -> Self {
        let title = title.into();
        Self {
            id: title.clone(),
            title,
            description: String::new(),
            source: source.into(),
            score: 0,
            published_at: None,
            keywords: Vec::new(),
            url: None,
        }
    }
}

#[async_trait]
pub trait TrendSource: Send + Sync {
    fn name(&self) -> &str;

    /// Items currently trending in `region` (ISO 3166 alpha-2). Sources that
    /// have no notion of region ignore it.
    async fn fetch_trending(&self, region: &str) -> Result<Vec<TrendItem>, RemoteError>;
}

const STOP_WORDS: &[&str] = &[
    "the", "and", "but", "for", "with", "this", "that", "video", "watch", "youtube", "from",
    "have", "been", "were", "they", "what", "when", "where", "which", "would", "could", "should",
    "about", "after", "before", "during", "until", "while", "your", "just", "into", "their",
    "there", "them", "then", "than", "will", "some",
];

fn word_regex() -> Result<&'static Regex> {
    static WORD_RE: OnceCell<Regex> = OnceCell::new();
    WORD_RE.get_or_try_init(|| {
        Regex::new(r"[\p{L}\p{N}']+").context("failed to compile keyword regex")
    })
}

/// Most frequent words longer than three characters, stop words removed.
/// Ties keep first-seen order.
pub fn extract_keywords(texts: &[&str], limit: usize) -> Vec<String> {
    let re = match word_regex() {
        Ok(re) => re,
        Err(e) => {
            warn!("{e:#}");
            return Vec::new();
        }
    };

    let mut order: Vec<String> = Vec::new();
    let mut counts: HashMap<String, usize> = HashMap::new();
    for text in texts {
        let lower = text.to_lowercase();
        for m in re.find_iter(&lower) {
            let word = m.as_str().trim_matches('\'');
            if word.chars().count() <= 3 || STOP_WORDS.contains(&word) {
                continue;
            }
            let count = counts.entry(word.to_string()).or_insert(0);
            if *count == 0 {
                order.push(word.to_string());
            }
            *count += 1;
        }
    }

    let mut ranked: Vec<(usize, String)> = order
        .into_iter()
        .map(|w| (counts.get(&w).copied().unwrap_or(0), w))
        .collect();
    // stable sort keeps first-seen order among equal counts
    ranked.sort_by(|a, b| b.0.cmp(&a.0));
    ranked.into_iter().take(limit).map(|(_, w)| w).collect()
}

/// Picks the highest-scoring item that has not been used before. When every
/// item was already used, the top item is reused with a warning.
pub fn select_trend(items: &[TrendItem], used: &UsedTopics) -> Option<TrendItem> {
    let mut ranked: Vec<&TrendItem> = items.iter().filter(|i| !i.title.trim().is_empty()).collect();
    ranked.sort_by(|a, b| b.score.cmp(&a.score));

    if let Some(fresh) = ranked.iter().find(|item| !used.contains(&item.title)) {
        info!(title = %fresh.title, score = fresh.score, source = %fresh.source, "selected trend");
        return Some((*fresh).clone());
    }

    let top = ranked.first()?;
    warn!(title = %top.title, "all trends were used before, reusing the top one");
    Some((*top).clone())
}
