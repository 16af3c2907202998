//! The concrete steps of a run: trend → script → metadata → video →
//! finalize → upload.

use crate::captions;
use crate::error::StageError;
use crate::ffmpeg::PostProcessSettings;
use crate::history::UsedTopics;
use crate::metadata::{self, Privacy};
use crate::pipeline::{Artifact, Artifacts, Stage, StageRole};
use crate::poller::AsyncJobPoller;
use crate::retry::RetryingInvoker;
use crate::services::{RenderJob, UploadTarget, VideoEditor, VideoGenerationService};
use crate::trends::{self, TrendSource};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tracing::info;

pub const FETCH_TREND: &str = "fetch_trend";
pub const WRITE_SCRIPT: &str = "write_script";
pub const BUILD_METADATA: &str = "build_metadata";
pub const GENERATE_VIDEO: &str = "generate_video";
pub const LOCAL_VIDEO: &str = "local_video";
pub const FINALIZE_VIDEO: &str = "finalize_video";
pub const UPLOAD_VIDEO: &str = "upload_video";

pub struct FetchTrendStage {
    source: Arc<dyn TrendSource>,
    invoker: RetryingInvoker,
    region: String,
    used: UsedTopics,
}

impl FetchTrendStage {
    pub fn new(
        source: Arc<dyn TrendSource>,
        invoker: RetryingInvoker,
        region: impl Into<String>,
        used: UsedTopics,
    ) -> Self {
        Self {
            source,
            invoker,
            region: region.into(),
            used,
        }
    }
}

#[async_trait]
impl Stage for FetchTrendStage {
    fn name(&self) -> &str {
        FETCH_TREND
    }

    async fn execute(&self, _prior: &Artifacts) -> Result<Artifact, StageError> {
        let action = format!("fetch trends from {}", self.source.name());
        let items = self
            .invoker
            .invoke_default(&action, |_| self.source.fetch_trending(&self.region))
            .await?;

        let mut trend = trends::select_trend(&items, &self.used).ok_or_else(|| {
            StageError::Invalid(format!(
                "{} returned no usable trends for region {}",
                self.source.name(),
                self.region
            ))
        })?;
        if trend.keywords.is_empty() {
            trend.keywords = trends::extract_keywords(&[trend.title.as_str(), trend.description.as_str()], 5);
        }
        Ok(Artifact::Trend(trend))
    }
}

pub struct WriteScriptStage {
    max_words: usize,
}

impl WriteScriptStage {
    pub fn new(max_words: usize) -> Self {
        Self { max_words }
    }
}

#[async_trait]
impl Stage for WriteScriptStage {
    fn name(&self) -> &str {
        WRITE_SCRIPT
    }

    async fn execute(&self, prior: &Artifacts) -> Result<Artifact, StageError> {
        let trend = prior.trend().ok_or(StageError::MissingArtifact("trend"))?;
        let script = metadata::build_script(trend, self.max_words);
        if script.is_empty() {
            return Err(StageError::Invalid(format!(
                "trend `{}` has no text to narrate",
                trend.id
            )));
        }
        info!(words = script.split_whitespace().count(), "script ready");
        Ok(Artifact::Script(script))
    }
}

pub struct BuildMetadataStage {
    privacy: Privacy,
    category_id: String,
    hashtags: Vec<String>,
}

impl BuildMetadataStage {
    pub fn new(privacy: Privacy, category_id: impl Into<String>, hashtags: Vec<String>) -> Self {
        Self {
            privacy,
            category_id: category_id.into(),
            hashtags,
        }
    }
}

#[async_trait]
impl Stage for BuildMetadataStage {
    fn name(&self) -> &str {
        BUILD_METADATA
    }

    async fn execute(&self, prior: &Artifacts) -> Result<Artifact, StageError> {
        let trend = prior.trend().ok_or(StageError::MissingArtifact("trend"))?;
        let script = prior.script().ok_or(StageError::MissingArtifact("script"))?;
        let meta = metadata::optimize(trend, script, self.privacy, &self.category_id, &self.hashtags);
        info!(title = %meta.title, tags = meta.tags.len(), "metadata ready");
        Ok(Artifact::Metadata(meta))
    }
}

/// Renders the script remotely, waits for the job and stores the result in
/// the output directory.
pub struct GenerateVideoStage {
    service: Arc<dyn VideoGenerationService>,
    poller: AsyncJobPoller,
    invoker: RetryingInvoker,
    output_dir: PathBuf,
}

impl GenerateVideoStage {
    pub fn new(
        service: Arc<dyn VideoGenerationService>,
        poller: AsyncJobPoller,
        invoker: RetryingInvoker,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            service,
            poller,
            invoker,
            output_dir: output_dir.into(),
        }
    }
}

#[async_trait]
impl Stage for GenerateVideoStage {
    fn name(&self) -> &str {
        GENERATE_VIDEO
    }

    fn role(&self) -> StageRole {
        StageRole::Terminal
    }

    async fn execute(&self, prior: &Artifacts) -> Result<Artifact, StageError> {
        let script = prior.script().ok_or(StageError::MissingArtifact("script"))?;
        let service = &self.service;

        let job = self
            .poller
            .run(
                "generate video",
                |_| service.submit_generation(script),
                move |handle| async move { service.poll_generation(&handle).await },
            )
            .await?;
        info!(job_id = %job.job_id, polls = job.polls, elapsed_s = job.elapsed.as_secs(), "video rendered");

        let bytes = self
            .invoker
            .invoke_default("download video", |_| service.fetch_artifact(&job.url))
            .await?;

        fs::create_dir_all(&self.output_dir).await.map_err(|e| {
            StageError::io(format!("creating {}", self.output_dir.display()), e)
        })?;
        let name = format!("short_{}.mp4", chrono::Utc::now().format("%Y%m%d_%H%M%S"));
        let path = self.output_dir.join(name);
        fs::write(&path, &bytes)
            .await
            .map_err(|e| StageError::io(format!("writing {}", path.display()), e))?;
        info!(path = %path.display(), bytes = bytes.len(), "video saved");
        Ok(Artifact::Video(path))
    }
}

/// Uses an existing file instead of generating one.
pub struct LocalVideoStage {
    path: PathBuf,
}

impl LocalVideoStage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Stage for LocalVideoStage {
    fn name(&self) -> &str {
        LOCAL_VIDEO
    }

    async fn execute(&self, _prior: &Artifacts) -> Result<Artifact, StageError> {
        let meta = fs::metadata(&self.path)
            .await
            .map_err(|e| StageError::io(format!("video file {}", self.path.display()), e))?;
        if !meta.is_file() {
            return Err(StageError::Invalid(format!(
                "{} is not a file",
                self.path.display()
            )));
        }
        Ok(Artifact::Video(self.path.clone()))
    }
}

/// Cuts the video to the Shorts limit and burns in captions timed from the
/// script. Writes `<stem>_final.mp4` beside the input, or passes the input
/// through when there is nothing to change.
pub struct FinalizeVideoStage {
    editor: Arc<dyn VideoEditor>,
    settings: PostProcessSettings,
}

impl FinalizeVideoStage {
    pub fn new(editor: Arc<dyn VideoEditor>, settings: PostProcessSettings) -> Self {
        Self { editor, settings }
    }
}

fn media_error(e: anyhow::Error) -> StageError {
    StageError::Media(format!("{e:#}"))
}

#[async_trait]
impl Stage for FinalizeVideoStage {
    fn name(&self) -> &str {
        FINALIZE_VIDEO
    }

    fn role(&self) -> StageRole {
        StageRole::Terminal
    }

    async fn execute(&self, prior: &Artifacts) -> Result<Artifact, StageError> {
        let input = prior.video().ok_or(StageError::MissingArtifact("video"))?;
        let duration = self.editor.duration(input).await.map_err(media_error)?;
        let limit = self.settings.max_duration_secs;
        let too_long = duration > limit;
        let length = duration.min(limit);

        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "short".into());

        let mut subtitles = None;
        if self.settings.captions {
            let cues = prior
                .script()
                .map(|script| captions::timed_captions(script, length, self.settings.caption_max_words))
                .unwrap_or_default();
            if !cues.is_empty() {
                let srt = input.with_file_name(format!("{stem}.srt"));
                captions::write_srt(&srt, &cues).await.map_err(media_error)?;
                info!(cues = cues.len(), path = %srt.display(), "captions written");
                subtitles = Some(srt);
            }
        }

        if !too_long && subtitles.is_none() {
            info!(duration_s = duration, "video needs no post-processing");
            return Ok(Artifact::Video(input.to_path_buf()));
        }
        if too_long {
            info!(duration_s = duration, limit_s = limit, "trimming video");
        }

        let job = RenderJob {
            input: input.to_path_buf(),
            output: input.with_file_name(format!("{stem}_final.mp4")),
            max_duration: too_long.then_some(limit),
            subtitles,
        };
        self.editor.render(&job).await.map_err(media_error)?;
        info!(path = %job.output.display(), "video finalized");
        Ok(Artifact::Video(job.output))
    }
}

pub struct UploadStage {
    target: Arc<dyn UploadTarget>,
    invoker: RetryingInvoker,
}

impl UploadStage {
    pub fn new(target: Arc<dyn UploadTarget>, invoker: RetryingInvoker) -> Self {
        Self { target, invoker }
    }
}

#[async_trait]
impl Stage for UploadStage {
    fn name(&self) -> &str {
        UPLOAD_VIDEO
    }

    fn role(&self) -> StageRole {
        StageRole::Terminal
    }

    async fn execute(&self, prior: &Artifacts) -> Result<Artifact, StageError> {
        let meta = prior.metadata().ok_or(StageError::MissingArtifact("metadata"))?;
        let path = prior.video().ok_or(StageError::MissingArtifact("video"))?;
        let bytes = fs::read(path)
            .await
            .map_err(|e| StageError::io(format!("reading {}", path.display()), e))?;

        let id = self
            .invoker
            .invoke_default("upload video", |_| self.target.upload(&bytes, meta))
            .await?;
        info!(video_id = %id, "upload complete");
        Ok(Artifact::Published(id))
    }
}

/// Collaborators shared by the standard stage list.
pub struct StageDeps {
    pub trends: Arc<dyn TrendSource>,
    pub generator: Arc<dyn VideoGenerationService>,
    pub uploader: Arc<dyn UploadTarget>,
    pub invoker: RetryingInvoker,
    pub poller: AsyncJobPoller,
    pub used_topics: UsedTopics,
    /// `None` leaves the video exactly as generated.
    pub editor: Option<Arc<dyn VideoEditor>>,
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub region: String,
    pub privacy: Privacy,
    pub category_id: String,
    pub hashtags: Vec<String>,
    pub max_script_words: usize,
    pub output_dir: PathBuf,
    pub video_file: Option<PathBuf>,
    pub post_process: PostProcessSettings,
}

pub fn standard_stages(deps: StageDeps, opts: &RunOptions) -> Vec<Box<dyn Stage>> {
    let video: Box<dyn Stage> = match &opts.video_file {
        Some(path) => Box::new(LocalVideoStage::new(path)),
        None => Box::new(GenerateVideoStage::new(
            deps.generator,
            deps.poller,
            deps.invoker.clone(),
            &opts.output_dir,
        )),
    };

    let mut stages: Vec<Box<dyn Stage>> = vec![
        Box::new(FetchTrendStage::new(
            deps.trends,
            deps.invoker.clone(),
            &opts.region,
            deps.used_topics,
        )),
        Box::new(WriteScriptStage::new(opts.max_script_words)),
        Box::new(BuildMetadataStage::new(
            opts.privacy,
            &opts.category_id,
            opts.hashtags.clone(),
        )),
        video,
    ];
    if let Some(editor) = deps.editor.filter(|_| opts.post_process.enabled) {
        stages.push(Box::new(FinalizeVideoStage::new(
            editor,
            opts.post_process.clone(),
        )));
    }
    stages.push(Box::new(UploadStage::new(deps.uploader, deps.invoker)));
    stages
}
