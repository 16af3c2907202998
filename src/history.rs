use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use tokio::fs;
use tracing::warn;

/// Topics that already became a video, stored as
/// `{"used_topics": ["..."]}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsedTopics {
    #[serde(default)]
    used_topics: BTreeSet<String>,
}

fn normalize(title: &str) -> String {
    title.trim().to_lowercase()
}

impl UsedTopics {
    /// A missing or unreadable file is treated as an empty history.
    pub async fn load<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        let content = match fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(e) => {
                warn!("could not read {}: {e}; starting with empty topic history", path.display());
                return Self::default();
            }
        };

        match serde_json::from_str::<UsedTopics>(&content) {
            Ok(parsed) => parsed
                .used_topics
                .iter()
                .map(|t| normalize(t))
                .filter(|t| !t.is_empty())
                .fold(Self::default(), |mut acc, t| {
                    acc.used_topics.insert(t);
                    acc
                }),
            Err(e) => {
                warn!("{} is not valid topic history ({e}); starting empty", path.display());
                Self::default()
            }
        }
    }

    pub async fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create dir {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self).context("Failed to encode topic history")?;
        fs::write(path, json)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn contains(&self, title: &str) -> bool {
        self.used_topics.contains(&normalize(title))
    }

    /// Returns false when the topic was already recorded.
    pub fn insert(&mut self, title: &str) -> bool {
        let key = normalize(title);
        if key.is_empty() {
            return false;
        }
        self.used_topics.insert(key)
    }

    pub fn len(&self) -> usize {
        self.used_topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.used_topics.is_empty()
    }
}
