//! ffprobe-backed container detection and stream metadata.

use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use crate::runner::run_tool;
use crate::{Error, Ffmpeg, Result};

/// Container format names accepted as video input for the streaming pipeline.
const VIDEO_FORMATS: [&str; 6] = ["mp4", "mov", "avi", "matroska", "webm", "flv"];

/// Width, height and rounded duration of the first video stream.
///
/// Zero values count as absent: ffprobe reports streams it cannot measure
/// with missing or zero fields, and a zero dimension is never a usable
/// video attribute.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamInfo {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub duration_secs: Option<u32>,
}

impl StreamInfo {
    /// All three attributes, or None when any is absent.
    pub fn complete(&self) -> Option<(u32, u32, u32)> {
        Some((self.width?, self.height?, self.duration_secs?))
    }
}

#[derive(Debug, Deserialize)]
struct FormatProbe {
    #[serde(default)]
    format: Option<FormatSection>,
}

#[derive(Debug, Deserialize)]
struct FormatSection {
    #[serde(default)]
    format_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamsProbe {
    #[serde(default)]
    streams: Vec<StreamSection>,
}

#[derive(Debug, Deserialize)]
struct StreamSection {
    #[serde(default)]
    codec_type: Option<String>,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
    #[serde(default)]
    duration: Option<String>,
}

pub(crate) fn build_show_format_args(path: &Path) -> Vec<String> {
    vec![
        "-v".into(),
        "quiet".into(),
        "-print_format".into(),
        "json".into(),
        "-show_format".into(),
        path.to_string_lossy().into_owned(),
    ]
}

pub(crate) fn build_show_streams_args(path: &Path) -> Vec<String> {
    vec![
        "-v".into(),
        "quiet".into(),
        "-print_format".into(),
        "json".into(),
        "-show_streams".into(),
        path.to_string_lossy().into_owned(),
    ]
}

fn format_is_video(format_name: &str) -> bool {
    let format_name = format_name.to_lowercase();
    VIDEO_FORMATS.iter().any(|fmt| format_name.contains(fmt))
}

/// Round a decimal seconds string half-up to whole seconds; zero is absent.
fn parse_duration_secs(raw: &str) -> Option<u32> {
    let secs = raw.trim().parse::<f64>().ok()?;
    if !secs.is_finite() {
        return None;
    }
    let rounded = (secs + 0.5) as u32;
    (rounded > 0).then_some(rounded)
}

fn parse_probe<T: serde::de::DeserializeOwned>(op: &str, stdout: &[u8]) -> Result<T> {
    serde_json::from_slice(stdout).map_err(|e| Error::Parse {
        op: op.to_string(),
        detail: e.to_string(),
    })
}

/// File name for log and operation labels.
pub(crate) fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

impl Ffmpeg {
    /// Whether the file parses as one of the supported video containers.
    pub async fn is_video_container(&self, path: &Path) -> Result<bool> {
        let op = format!("Check format of {}", display_name(path));
        let stdout = run_tool(
            &self.config.ffprobe_path,
            &build_show_format_args(path),
            &op,
            self.op_timeout(),
        )
        .await?;

        let probe: FormatProbe = parse_probe(&op, &stdout)?;
        let format_name = probe
            .format
            .and_then(|f| f.format_name)
            .unwrap_or_default();
        Ok(format_is_video(&format_name))
    }

    /// Width, height and duration of the first video stream.
    ///
    /// A file without a video stream yields an empty StreamInfo rather than
    /// an error; only tool and parse failures surface as errors.
    pub async fn probe_metadata(&self, path: &Path) -> Result<StreamInfo> {
        let op = format!("Extract metadata from {}", display_name(path));
        let stdout = run_tool(
            &self.config.ffprobe_path,
            &build_show_streams_args(path),
            &op,
            self.op_timeout(),
        )
        .await?;

        let probe: StreamsProbe = parse_probe(&op, &stdout)?;
        let Some(stream) = probe
            .streams
            .into_iter()
            .find(|s| s.codec_type.as_deref() == Some("video"))
        else {
            debug!("no video stream found in {}", display_name(path));
            return Ok(StreamInfo::default());
        };

        let info = StreamInfo {
            width: stream.width.filter(|w| *w > 0),
            height: stream.height.filter(|h| *h > 0),
            duration_secs: stream.duration.as_deref().and_then(parse_duration_secs),
        };
        debug!(
            "metadata for {}: {:?}x{:?}, {:?}s",
            display_name(path),
            info.width,
            info.height,
            info.duration_secs
        );
        Ok(info)
    }
}
