use anyhow::{Context, Result};
use std::path::Path;
use tokio::fs;

/// Creates the video output directory and the parent directory of the
/// used-topics file when they are missing.
pub async fn ensure_directories(output_dir: &Path, used_topics_file: &Path) -> Result<()> {
    let mut required = vec![output_dir];
    if let Some(parent) = used_topics_file.parent().filter(|p| !p.as_os_str().is_empty()) {
        required.push(parent);
    }

    for dir in required {
        if !dir.exists() {
            fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
            crate::logi(format!("Created directory: {}", dir.display()));
        }
    }
    Ok(())
}

/// True when `ffmpeg -version` runs and exits cleanly.
pub async fn check_ffmpeg(ffmpeg: &str) -> bool {
    match tokio::process::Command::new(ffmpeg)
        .arg("-version")
        .output()
        .await
    {
        Ok(output) => output.status.success(),
        Err(_) => false,
    }
}
