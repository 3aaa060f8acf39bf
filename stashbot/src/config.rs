//! Environment-driven application configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// File extensions eligible for streaming optimization.
pub const VIDEO_EXTENSIONS: [&str; 6] = ["mp4", "mov", "avi", "mkv", "flv", "webm"];

/// Runtime settings, sourced from the environment at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Bot API token.
    pub bot_token: String,
    /// The only account whose commands are honored.
    pub owner_id: i64,
    /// Destination chat for uploads; `/upload` refuses while unset.
    #[serde(default)]
    pub stash_chat: Option<i64>,
    /// Local storage directory for transfers.
    #[serde(default = "default_stash_dir")]
    pub stash_dir: PathBuf,
    /// Maximum concurrent downloads.
    #[serde(default = "default_max_downloads")]
    pub max_downloads: usize,
    /// Maximum concurrent uploads.
    #[serde(default = "default_max_uploads")]
    pub max_uploads: usize,
    /// Overall deadline for one inbound transfer, in seconds.
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
    /// Minimum interval between progress log lines, in seconds.
    #[serde(default = "default_progress_interval_secs")]
    pub progress_interval_secs: u64,
    /// ffmpeg/ffprobe adapter settings.
    #[serde(default)]
    pub ffmpeg: ffbridge::FfmpegConfig,
}

fn default_stash_dir() -> PathBuf {
    PathBuf::from("videos")
}

fn default_max_downloads() -> usize {
    3
}

fn default_max_uploads() -> usize {
    2
}

fn default_download_timeout_secs() -> u64 {
    3600
}

fn default_progress_interval_secs() -> u64 {
    15
}

impl Config {
    /// Load configuration from the environment.
    pub fn from_env() -> Result<Self> {
        let owner_raw = require_var("STASHBOT_OWNER_ID")?;
        Ok(Self {
            bot_token: require_var("STASHBOT_BOT_TOKEN")?,
            owner_id: parse_var("STASHBOT_OWNER_ID", owner_raw)?,
            stash_chat: optional_var("STASHBOT_STASH_CHAT")
                .map(|raw| parse_var("STASHBOT_STASH_CHAT", raw))
                .transpose()?,
            stash_dir: optional_var("STASHBOT_STASH_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(default_stash_dir),
            max_downloads: parse_var_or("STASHBOT_MAX_DOWNLOADS", default_max_downloads())?,
            max_uploads: parse_var_or("STASHBOT_MAX_UPLOADS", default_max_uploads())?,
            download_timeout_secs: parse_var_or(
                "STASHBOT_DOWNLOAD_TIMEOUT_SECS",
                default_download_timeout_secs(),
            )?,
            progress_interval_secs: parse_var_or(
                "STASHBOT_PROGRESS_INTERVAL_SECS",
                default_progress_interval_secs(),
            )?,
            ffmpeg: ffbridge::FfmpegConfig::default(),
        })
    }

    /// Path of a named file inside the stash directory.
    pub fn stash_path(&self, filename: &str) -> PathBuf {
        self.stash_dir.join(filename)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs(self.progress_interval_secs)
    }
}

/// Whether a path's extension is in the optimization gate set.
pub fn has_video_extension(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| VIDEO_EXTENSIONS.contains(&ext.as_str()))
}

fn optional_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn require_var(key: &str) -> Result<String> {
    optional_var(key).ok_or_else(|| Error::config(format!("{} is not set", key)))
}

fn parse_var<T>(key: &str, raw: String) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| Error::config(format!("{}: {}", key, e)))
}

fn parse_var_or<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match optional_var(key) {
        Some(raw) => parse_var(key, raw),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_extension_gate() {
        assert!(has_video_extension(Path::new("movie.mp4")));
        assert!(has_video_extension(Path::new("movie.MKV")));
        assert!(has_video_extension(Path::new("/stash/clip.webm")));
        assert!(!has_video_extension(Path::new("notes.txt")));
        assert!(!has_video_extension(Path::new("archive.tar.gz")));
        assert!(!has_video_extension(Path::new("noext")));
    }

    #[test]
    fn test_stash_path_joins_directory() {
        let config: Config = serde_json::from_value(serde_json::json!({
            "bot_token": "123:ABC",
            "owner_id": 42,
        }))
        .unwrap();
        assert_eq!(config.stash_dir, PathBuf::from("videos"));
        assert_eq!(config.stash_path("a.mp4"), PathBuf::from("videos/a.mp4"));
    }

    #[test]
    fn test_defaults() {
        let config: Config = serde_json::from_value(serde_json::json!({
            "bot_token": "123:ABC",
            "owner_id": 42,
        }))
        .unwrap();
        assert_eq!(config.max_downloads, 3);
        assert_eq!(config.max_uploads, 2);
        assert_eq!(config.download_timeout_secs, 3600);
        assert_eq!(config.progress_interval_secs, 15);
        assert!(config.stash_chat.is_none());
    }

    #[test]
    fn test_parse_var_rejects_garbage() {
        let parsed: Result<i64> = parse_var("STASHBOT_OWNER_ID", "not-a-number".to_string());
        assert!(parsed.is_err());
    }
}
