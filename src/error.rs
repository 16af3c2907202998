use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Failure of a call against one of the remote collaborators.
#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    /// Worth retrying: timeouts, connection failures, 408, 429, 5xx.
    #[error("{action}: transient failure{}: {message}", fmt_status(.status))]
    Transient {
        action: String,
        status: Option<u16>,
        message: String,
        retry_after: Option<Duration>,
    },

    /// The remote refused the request; retrying will not help.
    #[error("{action}: rejected{}: {message}", fmt_status(.status))]
    Rejected {
        action: String,
        status: Option<u16>,
        message: String,
    },

    #[error("{action}: gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        action: String,
        attempts: u32,
        #[source]
        last: Box<RemoteError>,
    },

    #[error("job {job_id} did not finish within {elapsed:?}")]
    JobTimedOut { job_id: String, elapsed: Duration },

    #[error("job {job_id} failed: {reason}")]
    JobFailed { job_id: String, reason: String },
}

fn fmt_status(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

impl RemoteError {
    pub fn transient(action: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transient {
            action: action.into(),
            status: None,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn rejected(action: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rejected {
            action: action.into(),
            status: None,
            message: message.into(),
        }
    }

    /// Classifies a non-success HTTP response.
    pub fn from_status(
        action: impl Into<String>,
        status: StatusCode,
        headers: &HeaderMap,
        body: &str,
    ) -> Self {
        let action = action.into();
        let message = api_error_message(body);
        let code = Some(status.as_u16());

        if status == StatusCode::TOO_MANY_REQUESTS
            || status == StatusCode::REQUEST_TIMEOUT
            || status.is_server_error()
        {
            Self::Transient {
                action,
                status: code,
                message,
                retry_after: parse_retry_after(headers),
            }
        } else {
            Self::Rejected {
                action,
                status: code,
                message,
            }
        }
    }

    /// Classifies a transport-level failure from reqwest.
    pub fn from_reqwest(action: impl Into<String>, err: &reqwest::Error) -> Self {
        let action = action.into();
        if let Some(status) = err.status() {
            return Self::from_status(action, status, &HeaderMap::new(), &err.to_string());
        }
        if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
            Self::transient(action, err.to_string())
        } else {
            Self::rejected(action, err.to_string())
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Transient { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transient { .. } => ErrorKind::TransientRemote,
            Self::Rejected { .. } => ErrorKind::RejectedOperation,
            Self::RetriesExhausted { .. } => ErrorKind::RetriesExhausted,
            Self::JobTimedOut { .. } => ErrorKind::JobTimedOut,
            Self::JobFailed { .. } => ErrorKind::JobFailed,
        }
    }
}

/// Pulls a readable message out of a JSON error body, falling back to a
/// truncated copy of the raw text.
fn api_error_message(body: &str) -> String {
    if let Ok(root) = serde_json::from_str::<serde_json::Value>(body) {
        let err = root.get("error").unwrap_or(&root);
        let message = err
            .get("message")
            .and_then(|v| v.as_str())
            .or_else(|| err.as_str());
        let reason = err
            .get("errors")
            .and_then(|v| v.get(0))
            .and_then(|v| v.get("reason"))
            .and_then(|v| v.as_str())
            .or_else(|| err.get("code").and_then(|v| v.as_str()));

        match (reason, message) {
            (Some(reason), Some(message)) => return format!("{reason}: {message}"),
            (None, Some(message)) => return message.to_string(),
            (Some(reason), None) => return reason.to_string(),
            (None, None) => {}
        }
    }

    let snippet: String = body.chars().take(300).collect();
    if snippet.is_empty() {
        "empty response body".to_string()
    } else {
        snippet
    }
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?;
    if let Ok(secs) = value.trim().parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let date = chrono::DateTime::parse_from_rfc2822(value.trim()).ok()?;
    let delta = date.signed_duration_since(chrono::Utc::now());
    Some(delta.to_std().unwrap_or(Duration::ZERO))
}

/// Error raised by a pipeline stage.
#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Invalid(String),

    #[error("no `{0}` artifact was produced by an earlier stage")]
    MissingArtifact(&'static str),

    /// ffmpeg/ffprobe failed or could not be started.
    #[error("{0}")]
    Media(String),
}

impl StageError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Remote(err) => err.kind(),
            Self::Io { .. } => ErrorKind::Io,
            Self::Invalid(_) => ErrorKind::InvalidInput,
            Self::MissingArtifact(_) => ErrorKind::MissingArtifact,
            Self::Media(_) => ErrorKind::Media,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    TransientRemote,
    RejectedOperation,
    RetriesExhausted,
    JobTimedOut,
    JobFailed,
    Io,
    InvalidInput,
    MissingArtifact,
    Media,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::TransientRemote => "TransientRemoteError",
            Self::RejectedOperation => "RejectedOperationError",
            Self::RetriesExhausted => "RetriesExhausted",
            Self::JobTimedOut => "JobTimedOut",
            Self::JobFailed => "JobFailed",
            Self::Io => "IoError",
            Self::InvalidInput => "InvalidInput",
            Self::MissingArtifact => "MissingArtifact",
            Self::Media => "MediaError",
        };
        f.write_str(name)
    }
}
