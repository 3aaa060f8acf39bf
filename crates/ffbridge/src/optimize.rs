//! Faststart remux for streaming playback.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::probe::display_name;
use crate::runner::run_tool;
use crate::{Error, Ffmpeg, Result};

/// Suffix appended to the file stem of the optimized copy.
const OPTIMIZED_SUFFIX: &str = "_stream";

/// Sibling path for the optimized copy: `video.mp4` -> `video_stream.mp4`.
pub fn optimized_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    match input.extension() {
        Some(ext) => input.with_file_name(format!(
            "{stem}{OPTIMIZED_SUFFIX}.{}",
            ext.to_string_lossy()
        )),
        None => input.with_file_name(format!("{stem}{OPTIMIZED_SUFFIX}")),
    }
}

pub(crate) fn build_optimize_args(input: &Path, output: &Path) -> Vec<String> {
    vec![
        "-y".into(),
        "-i".into(),
        input.to_string_lossy().into_owned(),
        "-c".into(),
        "copy".into(),
        "-movflags".into(),
        "+faststart".into(),
        "-f".into(),
        "mp4".into(),
        output.to_string_lossy().into_owned(),
    ]
}

/// Best-effort removal of partial tool output.
pub(crate) async fn discard_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("removed partial output {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("failed to remove partial output {}: {}", path.display(), e),
    }
}

impl Ffmpeg {
    /// Remux into an mp4 container with the moov atom up front.
    ///
    /// Returns the path of the optimized sibling copy. Partial output is
    /// removed before any error is returned, so callers that fall back to
    /// the original never inherit a broken file.
    pub async fn optimize_for_streaming(&self, input: &Path) -> Result<PathBuf> {
        let output = optimized_path(input);
        let op = format!("Optimize {} for streaming", display_name(input));
        let args = build_optimize_args(input, &output);

        if let Err(e) = run_tool(
            &self.config.ffmpeg_path,
            &args,
            &op,
            self.optimize_timeout(),
        )
        .await
        {
            discard_partial(&output).await;
            return Err(e);
        }

        match tokio::fs::metadata(&output).await {
            Ok(meta) => {
                let original = tokio::fs::metadata(input).await.map(|m| m.len()).unwrap_or(0);
                debug!(
                    "optimized {}: {} -> {} bytes",
                    display_name(&output),
                    original,
                    meta.len()
                );
                Ok(output)
            }
            Err(_) => Err(Error::Process {
                op,
                stderr: "output file not created".to_string(),
            }),
        }
    }
}
