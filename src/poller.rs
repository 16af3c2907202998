//! Submit-then-poll loop for remote jobs that finish asynchronously.
//!
//! The deadline starts once a job handle exists and is checked against the
//! tokio clock, so a poll request that never answers still ends in
//! [`RemoteError::JobTimedOut`].

use crate::backoff::BackoffSchedule;
use crate::error::RemoteError;
use crate::retry::RetryingInvoker;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    TimedOut,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::TimedOut)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub id: String,
    pub status: JobStatus,
}

impl JobHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: JobStatus::Pending,
        }
    }
}

/// One status observation of a remote job.
#[derive(Debug, Clone, PartialEq)]
pub struct PollReport {
    pub status: JobStatus,
    pub progress: Option<f32>,
    pub artifact_url: Option<String>,
    pub error: Option<String>,
}

impl PollReport {
    pub fn pending() -> Self {
        Self::with_status(JobStatus::Pending)
    }

    pub fn running() -> Self {
        Self::with_status(JobStatus::Running)
    }

    pub fn succeeded(url: impl Into<String>) -> Self {
        Self {
            artifact_url: Some(url.into()),
            progress: Some(1.0),
            ..Self::with_status(JobStatus::Succeeded)
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            error: Some(reason.into()),
            ..Self::with_status(JobStatus::Failed)
        }
    }

    fn with_status(status: JobStatus) -> Self {
        Self {
            status,
            progress: None,
            artifact_url: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobArtifact {
    pub job_id: String,
    pub url: String,
    pub elapsed: Duration,
    pub polls: u32,
}

pub const DEFAULT_POLL_TIMEOUT_SECS: u64 = 900;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 10_000;
pub const DEFAULT_MAX_POLL_INTERVAL_MS: u64 = 30_000;

/// Used as the deadline when the configured timeout does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollSettings {
    pub timeout_secs: u64,
    pub interval_ms: u64,
    pub max_interval_ms: u64,
    pub multiplier: f64,
    pub jitter: bool,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_POLL_TIMEOUT_SECS,
            interval_ms: DEFAULT_POLL_INTERVAL_MS,
            max_interval_ms: DEFAULT_MAX_POLL_INTERVAL_MS,
            multiplier: 1.5,
            jitter: true,
        }
    }
}

impl PollSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    fn spacing(&self) -> BackoffSchedule {
        BackoffSchedule::new(
            self.interval(),
            self.multiplier,
            Duration::from_millis(self.max_interval_ms),
            u32::MAX,
        )
        .with_jitter(self.jitter)
    }
}

#[derive(Debug, Clone)]
pub struct AsyncJobPoller {
    invoker: RetryingInvoker,
    timeout: Duration,
    interval: Duration,
    spacing: BackoffSchedule,
}

impl AsyncJobPoller {
    pub fn new(invoker: RetryingInvoker, settings: &PollSettings) -> Self {
        Self {
            invoker,
            timeout: settings.timeout(),
            interval: settings.interval(),
            spacing: settings.spacing(),
        }
    }

    /// Submits a job (with retries) and polls it until it reaches a terminal
    /// state or the deadline passes.
    pub async fn run<S, SFut, P, PFut>(
        &self,
        action: &str,
        submit: S,
        mut poll: P,
    ) -> Result<JobArtifact, RemoteError>
    where
        S: FnMut(u32) -> SFut,
        SFut: Future<Output = Result<JobHandle, RemoteError>>,
        P: FnMut(JobHandle) -> PFut,
        PFut: Future<Output = Result<PollReport, RemoteError>>,
    {
        let mut handle = self.invoker.invoke_default(action, submit).await?;
        info!(action, job_id = %handle.id, "job submitted");

        let started = Instant::now();
        let deadline = started
            .checked_add(self.timeout)
            .unwrap_or_else(|| started + FAR_FUTURE);
        let mut polls: u32 = 0;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(timed_out(&mut handle, started));
            }

            polls += 1;
            let report = match tokio::time::timeout(remaining, poll(handle.clone())).await {
                Err(_) => return Err(timed_out(&mut handle, started)),
                Ok(Err(err)) if err.is_retryable() => {
                    warn!(action, job_id = %handle.id, poll = polls, "status check failed, will poll again: {err}");
                    None
                }
                Ok(Err(err)) => return Err(err),
                Ok(Ok(report)) => Some(report),
            };

            if let Some(report) = report {
                debug!(
                    action,
                    job_id = %handle.id,
                    poll = polls,
                    status = %report.status,
                    progress = report.progress.unwrap_or_default(),
                    "job status"
                );
                if report.status != handle.status {
                    info!(action, job_id = %handle.id, "job {} -> {}", handle.status, report.status);
                    handle.status = report.status;
                }

                match report.status {
                    JobStatus::Succeeded => {
                        let Some(url) = report.artifact_url else {
                            return Err(RemoteError::JobFailed {
                                job_id: handle.id,
                                reason: "completed without an artifact".to_string(),
                            });
                        };
                        return Ok(JobArtifact {
                            job_id: handle.id,
                            url,
                            elapsed: started.elapsed(),
                            polls,
                        });
                    }
                    JobStatus::Failed => {
                        return Err(RemoteError::JobFailed {
                            job_id: handle.id,
                            reason: report
                                .error
                                .unwrap_or_else(|| "no reason given".to_string()),
                        });
                    }
                    JobStatus::TimedOut => return Err(timed_out(&mut handle, started)),
                    JobStatus::Pending | JobStatus::Running => {}
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            let wait = self
                .spacing
                .delay_for(polls)
                .max(self.interval)
                .min(remaining);
            tokio::time::sleep(wait).await;
        }
    }
}

fn timed_out(handle: &mut JobHandle, started: Instant) -> RemoteError {
    handle.status = JobStatus::TimedOut;
    RemoteError::JobTimedOut {
        job_id: handle.id.clone(),
        elapsed: started.elapsed(),
    }
}
