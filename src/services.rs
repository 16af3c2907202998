use crate::error::RemoteError;
use crate::metadata::VideoMetadata;
use crate::poller::{JobHandle, PollReport};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Id the hosting platform assigned to an uploaded video.
pub type VideoId = String;

/// Remote service that renders a video from narration text asynchronously.
#[async_trait]
pub trait VideoGenerationService: Send + Sync {
    async fn submit_generation(&self, script: &str) -> Result<JobHandle, RemoteError>;

    async fn poll_generation(&self, handle: &JobHandle) -> Result<PollReport, RemoteError>;

    async fn fetch_artifact(&self, url: &str) -> Result<Vec<u8>, RemoteError>;
}

#[async_trait]
pub trait UploadTarget: Send + Sync {
    async fn upload(&self, video: &[u8], metadata: &VideoMetadata) -> Result<VideoId, RemoteError>;
}

/// One local edit of a finished video.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderJob {
    pub input: PathBuf,
    pub output: PathBuf,
    /// Cut the output at this many seconds.
    pub max_duration: Option<f64>,
    /// SRT file burned into the picture.
    pub subtitles: Option<PathBuf>,
}

/// Local media tooling used after generation.
#[async_trait]
pub trait VideoEditor: Send + Sync {
    async fn duration(&self, path: &Path) -> anyhow::Result<f64>;

    async fn render(&self, job: &RenderJob) -> anyhow::Result<()>;
}

pub fn watch_url(id: &str) -> String {
    format!("https://www.youtube.com/watch?v={id}")
}
