use crate::metadata::Privacy;
use clap::Parser;
use std::path::PathBuf;

/// Turns a trending topic into a short vertical video and publishes it.
#[derive(Debug, Clone, Parser)]
#[command(name = "ai-trend-shorts", version, about)]
pub struct Args {
    /// Region code for trend lookup (ISO 3166 alpha-2)
    #[arg(long, default_value = "US")]
    pub region: String,

    #[arg(long, value_enum, default_value_t = Privacy::Public)]
    pub privacy: Privacy,

    /// YouTube category id
    #[arg(long, default_value = "22")]
    pub category: String,

    /// Skip remote generation and upload the file given by --video-file
    #[arg(long, requires = "video_file")]
    pub skip_video_generation: bool,

    #[arg(long)]
    pub video_file: Option<PathBuf>,

    #[arg(long, default_value = "generated_videos")]
    pub output_dir: PathBuf,

    /// Run every step without calling paid services or uploading
    #[arg(long)]
    pub dry_run: bool,

    #[arg(long, default_value = "config.json")]
    pub config: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let args = Args::try_parse_from(["ai-trend-shorts"]).unwrap();
        assert_eq!(args.region, "US");
        assert_eq!(args.privacy, Privacy::Public);
        assert_eq!(args.category, "22");
        assert!(!args.dry_run);
        assert!(!args.skip_video_generation);
        assert_eq!(args.video_file, None);
        assert_eq!(args.output_dir, PathBuf::from("generated_videos"));
        assert_eq!(args.config, PathBuf::from("config.json"));
    }

    #[test]
    fn parses_flags() {
        let args = Args::try_parse_from([
            "ai-trend-shorts",
            "--region",
            "GB",
            "--privacy",
            "unlisted",
            "--skip-video-generation",
            "--video-file",
            "clip.mp4",
            "--dry-run",
        ])
        .unwrap();
        assert_eq!(args.region, "GB");
        assert_eq!(args.privacy, Privacy::Unlisted);
        assert!(args.skip_video_generation);
        assert_eq!(args.video_file, Some(PathBuf::from("clip.mp4")));
        assert!(args.dry_run);
    }

    #[test]
    fn skipping_generation_requires_a_file() {
        assert!(Args::try_parse_from(["ai-trend-shorts", "--skip-video-generation"]).is_err());
    }

    #[test]
    fn unknown_privacy_is_rejected() {
        assert!(Args::try_parse_from(["ai-trend-shorts", "--privacy", "secret"]).is_err());
    }
}
