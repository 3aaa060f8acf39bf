//! Async adapter for the external `ffmpeg`/`ffprobe` tools.
//!
//! Every operation is a single subprocess invocation bounded by a
//! deadline. Failures are classified so callers can tell a missing
//! binary from a timeout from a tool error, and partial output files
//! are removed before an error is returned.

mod error;
mod optimize;
mod probe;
mod runner;
mod thumbnail;

pub use error::{Error, Result};
pub use optimize::optimized_path;
pub use probe::StreamInfo;
pub use thumbnail::thumbnail_path;

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings for the tool adapter.
///
/// The binary paths default to the `FFMPEG_PATH`/`FFPROBE_PATH`
/// environment variables, falling back to the bare tool names resolved
/// through `PATH`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FfmpegConfig {
    /// Path to the ffmpeg binary.
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,
    /// Path to the ffprobe binary.
    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: String,
    /// Deadline for probe and thumbnail operations, in seconds.
    #[serde(default = "default_op_timeout_secs")]
    pub op_timeout_secs: u64,
    /// Deadline for the faststart remux, in seconds.
    #[serde(default = "default_optimize_timeout_secs")]
    pub optimize_timeout_secs: u64,
    /// Timestamp the thumbnail frame is taken from.
    #[serde(default = "default_thumbnail_offset")]
    pub thumbnail_offset: String,
    /// JPEG quality for the thumbnail, 2-31 where lower is better.
    #[serde(default = "default_thumbnail_quality")]
    pub thumbnail_quality: u32,
}

fn default_ffmpeg_path() -> String {
    std::env::var("FFMPEG_PATH").unwrap_or_else(|_| "ffmpeg".to_string())
}

fn default_ffprobe_path() -> String {
    std::env::var("FFPROBE_PATH").unwrap_or_else(|_| "ffprobe".to_string())
}

fn default_op_timeout_secs() -> u64 {
    120
}

fn default_optimize_timeout_secs() -> u64 {
    180
}

fn default_thumbnail_offset() -> String {
    "00:00:05".to_string()
}

fn default_thumbnail_quality() -> u32 {
    3
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            ffprobe_path: default_ffprobe_path(),
            op_timeout_secs: default_op_timeout_secs(),
            optimize_timeout_secs: default_optimize_timeout_secs(),
            thumbnail_offset: default_thumbnail_offset(),
            thumbnail_quality: default_thumbnail_quality(),
        }
    }
}

/// Handle through which all tool operations run.
#[derive(Debug, Clone)]
pub struct Ffmpeg {
    config: FfmpegConfig,
}

impl Ffmpeg {
    /// Create an adapter with environment-derived defaults.
    pub fn new() -> Self {
        Self::with_config(FfmpegConfig::default())
    }

    /// Create an adapter with explicit settings.
    pub fn with_config(config: FfmpegConfig) -> Self {
        Self { config }
    }

    /// The active settings.
    pub fn config(&self) -> &FfmpegConfig {
        &self.config
    }

    fn op_timeout(&self) -> Duration {
        Duration::from_secs(self.config.op_timeout_secs)
    }

    fn optimize_timeout(&self) -> Duration {
        Duration::from_secs(self.config.optimize_timeout_secs)
    }
}

impl Default for Ffmpeg {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = FfmpegConfig::default();
        assert_eq!(config.op_timeout_secs, 120);
        assert_eq!(config.optimize_timeout_secs, 180);
        assert_eq!(config.thumbnail_offset, "00:00:05");
        assert_eq!(config.thumbnail_quality, 3);
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: FfmpegConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.op_timeout_secs, 120);
        assert_eq!(config.thumbnail_offset, "00:00:05");
    }

    #[test]
    fn timeouts_derive_from_config() {
        let adapter = Ffmpeg::with_config(FfmpegConfig {
            op_timeout_secs: 5,
            optimize_timeout_secs: 9,
            ..FfmpegConfig::default()
        });
        assert_eq!(adapter.op_timeout(), Duration::from_secs(5));
        assert_eq!(adapter.optimize_timeout(), Duration::from_secs(9));
    }
}
