use crate::api::{self, heygen::HeyGenClient, reddit::RedditSource, youtube::YouTubeClient};
use crate::auth;
use crate::cli::Args;
use crate::config::{Config, TrendSourceKind};
use crate::ffmpeg::Ffmpeg;
use crate::history::UsedTopics;
use crate::init;
use crate::pipeline::{Pipeline, PipelineResult, StageStatus};
use crate::poller::AsyncJobPoller;
use crate::retry::{AttemptOutcome, RetryingInvoker};
use crate::services::{VideoEditor, watch_url};
use crate::stages::{self, RunOptions, StageDeps};
use crate::trends::TrendSource;
use crate::{logi, logok, logw};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

/// Loads configuration for `args` and performs one run. Returns the process
/// exit code.
pub async fn run(args: Args) -> Result<i32> {
    let mut config = Config::load_or_default(&args.config).await?;
    config.apply_env();
    execute(&args, &config).await
}

pub async fn execute(args: &Args, config: &Config) -> Result<i32> {
    let generating = !args.dry_run && args.video_file.is_none();
    config.validate(generating)?;
    if args.skip_video_generation {
        logi("Skipping video generation, using the provided video file");
    }

    init::ensure_directories(&args.output_dir, &config.used_topics_file).await?;
    let client = api::build_client()?;

    let session = match auth::acquire_session(&client, &config.oauth_token_file).await {
        Ok(session) => Some(session),
        Err(e) if args.dry_run => {
            logw(format!("No upload session ({e:#}), continuing dry run without it"));
            None
        }
        Err(e) => return Err(e.context("YouTube authentication failed")),
    };

    let youtube = Arc::new(
        YouTubeClient::new(
            client.clone(),
            &config.endpoints.youtube_api,
            &config.endpoints.youtube_upload,
        )
        .with_access_token(session.map(|s| s.access_token))
        .with_api_key(config.youtube_api_key.clone()),
    );

    if let Some(required) = config.required_channel.as_deref().filter(|c| !c.is_empty()) {
        if youtube.has_session() {
            let channel = youtube
                .channel_info()
                .await
                .context("Failed to look up the authenticated channel")?;
            if channel.title != required {
                logw(format!(
                    "Authenticated channel '{}' is not '{}', refusing to upload",
                    channel.title, required
                ));
                return Ok(1);
            }
            logok(format!(
                "Channel verified: {} ({} subscribers, {} videos)",
                channel.title, channel.subscriber_count, channel.video_count
            ));
        }
    }

    let trends: Arc<dyn TrendSource> = match config.trend_source {
        TrendSourceKind::Youtube => youtube.clone(),
        TrendSourceKind::Reddit => Arc::new(RedditSource::new(
            client.clone(),
            &config.endpoints.reddit,
            config.subreddits.clone(),
        )),
    };
    let generator = Arc::new(HeyGenClient::new(
        client.clone(),
        &config.endpoints.heygen_api,
        config.heygen_api_key.clone(),
        config.generation.clone(),
    ));

    let retries = Arc::new(AtomicU32::new(0));
    let counter = retries.clone();
    let invoker = RetryingInvoker::new(config.retry.clone()).with_observer(move |event| {
        if matches!(event.outcome, AttemptOutcome::Retrying { .. }) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    });
    let poller = AsyncJobPoller::new(invoker.clone(), &config.polling);

    let editor = video_editor(config, args.dry_run).await;

    let mut used = UsedTopics::load(&config.used_topics_file).await;
    let deps = StageDeps {
        trends,
        generator,
        uploader: youtube,
        invoker,
        poller,
        used_topics: used.clone(),
        editor,
    };
    let opts = RunOptions {
        region: args.region.clone(),
        privacy: args.privacy,
        category_id: args.category.clone(),
        hashtags: config.hashtags.clone(),
        max_script_words: config.generation.max_script_words,
        output_dir: args.output_dir.clone(),
        video_file: args.video_file.clone(),
        post_process: config.post_process.clone(),
    };

    let stages = stages::standard_stages(deps, &opts);
    let pipeline = if args.dry_run {
        Pipeline::dry_run(stages)
    } else {
        Pipeline::new(stages)
    };
    logi(format!("Stages: {}", pipeline.stage_names().join(" -> ")));

    let result = pipeline.run().await;
    report(&result, retries.load(Ordering::Relaxed));

    if result.is_success() && !result.dry_run {
        if let Some(trend) = result.artifacts.trend() {
            used.insert(&trend.title);
            if let Err(e) = used.save(&config.used_topics_file).await {
                logw(format!("Could not record used topic: {e:#}"));
            }
        }
    }

    Ok(result.exit_code())
}

/// A dry run only echoes post-processing, so ffmpeg need not be installed.
async fn video_editor(config: &Config, dry_run: bool) -> Option<Arc<dyn VideoEditor>> {
    let settings = &config.post_process;
    if !settings.enabled {
        return None;
    }
    if !dry_run && !init::check_ffmpeg(&settings.ffmpeg_bin).await {
        logw(format!(
            "{} not found, uploading the video without captions or trimming",
            settings.ffmpeg_bin
        ));
        return None;
    }
    Some(Arc::new(Ffmpeg::new(settings.clone())))
}

fn report(result: &PipelineResult, retries: u32) {
    for stage in &result.stages {
        match stage.status {
            StageStatus::Succeeded => logok(&stage.name),
            StageStatus::Echoed => logi(format!("{} (dry run, skipped)", stage.name)),
            StageStatus::Failed => logw(format!("{} failed", stage.name)),
            StageStatus::NotRun => logi(format!("{} not run", stage.name)),
        }
    }
    if retries > 0 {
        logi(format!("{retries} remote call(s) were retried"));
    }

    if let Some(trend) = result.artifacts.trend() {
        logi(format!("Topic: {} ({})", trend.title, trend.source));
    }
    if let Some(meta) = result.artifacts.metadata() {
        logi(format!("Title: {}", meta.title));
    }
    if let Some(id) = result.artifacts.published() {
        logok(format!("Published: {}", watch_url(id)));
    }

    match &result.failure {
        None => logok(result.to_string()),
        Some(_) => tracing::error!("{result}"),
    }
}
