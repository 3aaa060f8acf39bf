//! Single-frame thumbnail extraction.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::optimize::discard_partial;
use crate::probe::display_name;
use crate::runner::run_tool;
use crate::{Error, Ffmpeg, Result};

/// Sibling path for a video's thumbnail: `video.mp4` becomes `video.jpg`.
pub fn thumbnail_path(input: &Path) -> PathBuf {
    input.with_extension("jpg")
}

fn build_thumbnail_args(input: &Path, output: &Path, offset: &str, quality: u32) -> Vec<String> {
    vec![
        "-y".to_string(),
        "-i".to_string(),
        input.to_string_lossy().into_owned(),
        "-ss".to_string(),
        offset.to_string(),
        "-vframes".to_string(),
        "1".to_string(),
        "-q:v".to_string(),
        quality.to_string(),
        output.to_string_lossy().into_owned(),
    ]
}

impl Ffmpeg {
    /// Grab one frame of `input` as a JPEG next to it.
    ///
    /// Partial output is removed before an error is returned.
    pub async fn extract_thumbnail(&self, input: &Path) -> Result<PathBuf> {
        let output = thumbnail_path(input);
        let op = format!("Generate thumbnail for {}", display_name(input));
        let args = build_thumbnail_args(
            input,
            &output,
            &self.config.thumbnail_offset,
            self.config.thumbnail_quality,
        );

        if let Err(e) = run_tool(&self.config.ffmpeg_path, &args, &op, self.op_timeout()).await {
            discard_partial(&output).await;
            return Err(e);
        }

        match tokio::fs::metadata(&output).await {
            Ok(meta) => {
                debug!("thumbnail {}: {} bytes", display_name(&output), meta.len());
                Ok(output)
            }
            Err(_) => Err(Error::Process {
                op,
                stderr: "output file not created".to_string(),
            }),
        }
    }
}
