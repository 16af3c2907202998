pub mod api;
pub mod auth;
pub mod backoff;
pub mod captions;
pub mod cli;
pub mod config;
pub mod error;
pub mod ffmpeg;
pub mod history;
pub mod init;
pub mod metadata;
pub mod pipeline;
pub mod poller;
pub mod retry;
pub mod runner;
pub mod services;
pub mod stages;
pub mod trends;

pub(crate) fn logv(tag: &str, message: &str) {
    match tag {
        "WARN" => tracing::warn!("[{}] {}", tag, message),
        _ => tracing::info!("[{}] {}", tag, message),
    }
}

pub(crate) fn logi(message: impl AsRef<str>) {
    logv("INFO", message.as_ref());
}

pub(crate) fn logok(message: impl AsRef<str>) {
    logv("OK", message.as_ref());
}

pub(crate) fn logw(message: impl AsRef<str>) {
    logv("WARN", message.as_ref());
}
