//! Ordered stage runner.
//!
//! Each stage sees every artifact produced before it and adds exactly one
//! more. The first failure stops the run. A dry run swaps every terminal
//! stage for an [`EchoStage`] before the run starts, so the loop itself is the
//! same in both modes.

use crate::error::{ErrorKind, StageError};
use crate::metadata::VideoMetadata;
use crate::services::VideoId;
use crate::trends::TrendItem;
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{error, info};

#[derive(Debug, Clone, PartialEq)]
pub enum Artifact {
    Trend(TrendItem),
    Script(String),
    Metadata(VideoMetadata),
    Video(PathBuf),
    Published(VideoId),
    /// What a substituted terminal stage would have consumed.
    Echo { stage: String, inputs: Vec<String> },
}

impl Artifact {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Trend(_) => "trend",
            Self::Script(_) => "script",
            Self::Metadata(_) => "metadata",
            Self::Video(_) => "video",
            Self::Published(_) => "published",
            Self::Echo { .. } => "echo",
        }
    }
}

/// Artifacts keyed by the stage that produced them, in production order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Artifacts {
    entries: Vec<(String, Artifact)>,
}

impl Artifacts {
    pub fn push(&mut self, stage: impl Into<String>, artifact: Artifact) {
        self.entries.push((stage.into(), artifact));
    }

    pub fn get(&self, stage: &str) -> Option<&Artifact> {
        self.entries
            .iter()
            .rev()
            .find(|(name, _)| name == stage)
            .map(|(_, a)| a)
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Artifact)> {
        self.entries.iter().map(|(name, a)| (name.as_str(), a))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn trend(&self) -> Option<&TrendItem> {
        self.find_last(|a| match a {
            Artifact::Trend(t) => Some(t),
            _ => None,
        })
    }

    pub fn script(&self) -> Option<&str> {
        self.find_last(|a| match a {
            Artifact::Script(s) => Some(s.as_str()),
            _ => None,
        })
    }

    pub fn metadata(&self) -> Option<&VideoMetadata> {
        self.find_last(|a| match a {
            Artifact::Metadata(m) => Some(m),
            _ => None,
        })
    }

    pub fn video(&self) -> Option<&Path> {
        self.find_last(|a| match a {
            Artifact::Video(p) => Some(p.as_path()),
            _ => None,
        })
    }

    pub fn published(&self) -> Option<&str> {
        self.find_last(|a| match a {
            Artifact::Published(id) => Some(id.as_str()),
            _ => None,
        })
    }

    fn find_last<'a, T: ?Sized>(
        &'a self,
        pick: impl Fn(&'a Artifact) -> Option<&'a T>,
    ) -> Option<&'a T> {
        self.entries.iter().rev().find_map(|(_, a)| pick(a))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StageRole {
    #[default]
    Regular,
    /// Has effects outside the process (generation, upload).
    Terminal,
}

#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &str;

    fn role(&self) -> StageRole {
        StageRole::Regular
    }

    async fn execute(&self, prior: &Artifacts) -> Result<Artifact, StageError>;
}

/// Stand-in for a terminal stage during a dry run.
#[derive(Debug, Clone)]
pub struct EchoStage {
    name: String,
}

impl EchoStage {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Stage for EchoStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, prior: &Artifacts) -> Result<Artifact, StageError> {
        let inputs = prior
            .iter()
            .map(|(stage, a)| format!("{stage}:{}", a.label()))
            .collect();
        info!(stage = %self.name, "dry run: skipping side effects");
        Ok(Artifact::Echo {
            stage: self.name.clone(),
            inputs,
        })
    }
}

pub fn substitute_dry_run(stages: Vec<Box<dyn Stage>>) -> Vec<Box<dyn Stage>> {
    stages
        .into_iter()
        .map(|stage| match stage.role() {
            StageRole::Terminal => Box::new(EchoStage::new(stage.name())) as Box<dyn Stage>,
            StageRole::Regular => stage,
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStatus {
    Succeeded,
    Echoed,
    Failed,
    NotRun,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport {
    pub name: String,
    pub status: StageStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    Failed,
}

#[derive(Debug, Error)]
#[error("stage `{stage}` failed with {}: {error}", .error.kind())]
pub struct StageFailure {
    pub stage: String,
    #[source]
    pub error: StageError,
}

impl StageFailure {
    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }
}

#[derive(Debug)]
pub struct PipelineResult {
    pub status: RunStatus,
    pub dry_run: bool,
    pub stages: Vec<StageReport>,
    pub artifacts: Artifacts,
    pub failure: Option<StageFailure>,
    pub elapsed: Duration,
}

impl PipelineResult {
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_success() { 0 } else { 1 }
    }

    pub fn stage_status(&self, name: &str) -> Option<StageStatus> {
        self.stages.iter().find(|s| s.name == name).map(|s| s.status)
    }
}

impl fmt::Display for PipelineResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = if self.dry_run { " (dry run)" } else { "" };
        match &self.failure {
            None => write!(f, "run succeeded{mode} in {:.1}s", self.elapsed.as_secs_f64()),
            Some(failure) => write!(f, "run failed{mode}: {failure}"),
        }
    }
}

pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
    dry_run: bool,
}

impl Pipeline {
    pub fn new(stages: Vec<Box<dyn Stage>>) -> Self {
        Self {
            stages,
            dry_run: false,
        }
    }

    pub fn dry_run(stages: Vec<Box<dyn Stage>>) -> Self {
        Self {
            stages: substitute_dry_run(stages),
            dry_run: true,
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub async fn run(&self) -> PipelineResult {
        let started = Instant::now();
        let mut artifacts = Artifacts::default();
        let mut reports = Vec::with_capacity(self.stages.len());
        let mut failure = None;

        for stage in &self.stages {
            let name = stage.name().to_string();
            if failure.is_some() {
                reports.push(StageReport {
                    name,
                    status: StageStatus::NotRun,
                });
                continue;
            }

            info!(stage = %name, "stage started");
            match stage.execute(&artifacts).await {
                Ok(artifact) => {
                    let status = match artifact {
                        Artifact::Echo { .. } => StageStatus::Echoed,
                        _ => StageStatus::Succeeded,
                    };
                    info!(stage = %name, artifact = artifact.label(), "stage finished");
                    artifacts.push(name.clone(), artifact);
                    reports.push(StageReport { name, status });
                }
                Err(err) => {
                    error!(stage = %name, kind = %err.kind(), "stage failed: {err}");
                    reports.push(StageReport {
                        name: name.clone(),
                        status: StageStatus::Failed,
                    });
                    failure = Some(StageFailure {
                        stage: name,
                        error: err,
                    });
                }
            }
        }

        PipelineResult {
            status: if failure.is_none() {
                RunStatus::Success
            } else {
                RunStatus::Failed
            },
            dry_run: self.dry_run,
            stages: reports,
            artifacts,
            failure,
            elapsed: started.elapsed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteError;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Recording {
        name: &'static str,
        role: StageRole,
        fail: bool,
        calls: Arc<AtomicU32>,
    }

    impl Recording {
        fn boxed(name: &'static str, role: StageRole, fail: bool) -> (Box<dyn Stage>, Arc<AtomicU32>) {
            let calls = Arc::new(AtomicU32::new(0));
            let stage = Box::new(Recording {
                name,
                role,
                fail,
                calls: Arc::clone(&calls),
            });
            (stage, calls)
        }
    }

    #[async_trait]
    impl Stage for Recording {
        fn name(&self) -> &str {
            self.name
        }

        fn role(&self) -> StageRole {
            self.role
        }

        async fn execute(&self, prior: &Artifacts) -> Result<Artifact, StageError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(RemoteError::rejected(self.name, "quotaExceeded").into());
            }
            Ok(Artifact::Script(format!("{} saw {}", self.name, prior.len())))
        }
    }

    #[tokio::test]
    async fn stages_run_in_order_and_see_prior_artifacts() {
        let (a, _) = Recording::boxed("a", StageRole::Regular, false);
        let (b, _) = Recording::boxed("b", StageRole::Regular, false);
        let (c, _) = Recording::boxed("c", StageRole::Regular, false);

        let result = Pipeline::new(vec![a, b, c]).run().await;

        assert!(result.is_success());
        assert_eq!(result.exit_code(), 0);
        assert_eq!(result.artifacts.names(), vec!["a", "b", "c"]);
        assert_eq!(result.artifacts.get("c"), Some(&Artifact::Script("c saw 2".into())));
        assert!(result.stages.iter().all(|s| s.status == StageStatus::Succeeded));
    }

    #[tokio::test]
    async fn failure_in_second_of_four_halts_the_run() {
        let (s1, c1) = Recording::boxed("s1", StageRole::Regular, false);
        let (s2, c2) = Recording::boxed("s2", StageRole::Regular, true);
        let (s3, c3) = Recording::boxed("s3", StageRole::Regular, false);
        let (s4, c4) = Recording::boxed("s4", StageRole::Terminal, false);

        let result = Pipeline::new(vec![s1, s2, s3, s4]).run().await;

        assert!(!result.is_success());
        assert_eq!(result.exit_code(), 1);
        assert_eq!(c1.load(Ordering::SeqCst), 1);
        assert_eq!(c2.load(Ordering::SeqCst), 1);
        assert_eq!(c3.load(Ordering::SeqCst), 0);
        assert_eq!(c4.load(Ordering::SeqCst), 0);
        assert_eq!(result.artifacts.names(), vec!["s1"]);
        assert_eq!(result.stage_status("s2"), Some(StageStatus::Failed));
        assert_eq!(result.stage_status("s3"), Some(StageStatus::NotRun));
        assert_eq!(result.stage_status("s4"), Some(StageStatus::NotRun));

        let failure = result.failure.as_ref().unwrap();
        assert_eq!(failure.stage, "s2");
        assert_eq!(failure.kind(), ErrorKind::RejectedOperation);
    }

    #[tokio::test]
    async fn failure_message_names_stage_and_kind() {
        let (s, _) = Recording::boxed("upload_video", StageRole::Terminal, true);
        let result = Pipeline::new(vec![s]).run().await;

        let text = result.failure.as_ref().unwrap().to_string();
        assert!(text.starts_with("stage `upload_video` failed with RejectedOperationError:"), "{text}");
        assert!(text.contains("quotaExceeded"), "{text}");
        assert!(result.to_string().starts_with("run failed"));
    }

    #[tokio::test]
    async fn dry_run_replaces_terminal_stages() {
        let (fetch, fetch_calls) = Recording::boxed("fetch", StageRole::Regular, false);
        let (generate, generate_calls) = Recording::boxed("generate", StageRole::Terminal, true);
        let (upload, upload_calls) = Recording::boxed("upload", StageRole::Terminal, true);

        let pipeline = Pipeline::dry_run(vec![fetch, generate, upload]);
        assert!(pipeline.is_dry_run());
        assert_eq!(pipeline.stage_names(), vec!["fetch", "generate", "upload"]);

        let result = pipeline.run().await;

        assert!(result.is_success());
        assert!(result.dry_run);
        assert_eq!(fetch_calls.load(Ordering::SeqCst), 1);
        assert_eq!(generate_calls.load(Ordering::SeqCst), 0);
        assert_eq!(upload_calls.load(Ordering::SeqCst), 0);
        assert_eq!(result.stage_status("fetch"), Some(StageStatus::Succeeded));
        assert_eq!(result.stage_status("upload"), Some(StageStatus::Echoed));
        assert_eq!(
            result.artifacts.get("upload"),
            Some(&Artifact::Echo {
                stage: "upload".into(),
                inputs: vec!["fetch:script".into(), "generate:echo".into()],
            })
        );
    }

    #[test]
    fn typed_accessors_return_latest_of_each_kind() {
        let mut artifacts = Artifacts::default();
        artifacts.push("write", Artifact::Script("first".into()));
        artifacts.push("video", Artifact::Video(PathBuf::from("out/a.mp4")));
        artifacts.push("rewrite", Artifact::Script("second".into()));

        assert_eq!(artifacts.script(), Some("second"));
        assert_eq!(artifacts.video(), Some(Path::new("out/a.mp4")));
        assert!(artifacts.trend().is_none());
        assert!(artifacts.published().is_none());
    }

    #[tokio::test]
    async fn empty_pipeline_succeeds() {
        let result = Pipeline::new(Vec::new()).run().await;
        assert!(result.is_success());
        assert!(result.artifacts.is_empty());
    }
}
