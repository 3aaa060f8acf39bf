//! Transfer pipelines and the seams they drive.
//!
//! The two workers ([`download::run_download`] and
//! [`upload::run_upload`]) own the task lifecycle between registration
//! and deregistration. They talk to the outside world only through the
//! [`MediaGateway`] and [`VideoToolkit`] traits, so the pipelines can
//! be exercised end to end without a network or the ffmpeg binaries.

pub mod download;
pub mod progress;
pub mod upload;

#[cfg(test)]
pub(crate) mod testkit;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::Result;
use crate::config::Config;
use crate::pipeline::progress::ProgressMeter;
use crate::tasks::TaskRegistry;

/// Maximum characters of an error shown in a failure report.
pub const ERROR_DISPLAY_LIMIT: usize = 200;

/// A media object on the messaging network, as referenced by a command.
#[derive(Debug, Clone)]
pub struct RemoteMedia {
    pub file_id: String,
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
    /// Declared size in bytes; zero when the network did not report one.
    pub size: u64,
}

/// Attributes attached to an outbound video transfer.
#[derive(Debug, Clone)]
pub struct VideoUpload {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub duration_secs: u32,
    pub caption: Option<String>,
    pub thumbnail: Option<PathBuf>,
}

/// Byte-stream mover between the messaging network and local storage.
#[async_trait]
pub trait MediaGateway: Send + Sync {
    /// Stream a remote media object into `dest`, returning bytes written.
    async fn fetch_media(
        &self,
        media: &RemoteMedia,
        dest: &Path,
        meter: ProgressMeter,
    ) -> Result<u64>;

    /// Send a local video with streaming playback attributes to `chat`.
    async fn send_video(&self, chat: i64, upload: &VideoUpload, meter: ProgressMeter)
    -> Result<()>;

    /// Post a new status message, returning its message id.
    async fn post_status(&self, chat: i64, reply_to: Option<i64>, text: &str) -> Result<i64>;

    /// Replace the text of a previously posted status message.
    async fn edit_status(&self, chat: i64, message_id: i64, text: &str) -> Result<()>;
}

/// Probe and transform operations the outbound pipeline drives.
#[async_trait]
pub trait VideoToolkit: Send + Sync {
    async fn is_video_container(&self, path: &Path) -> ffbridge::Result<bool>;
    async fn probe_metadata(&self, path: &Path) -> ffbridge::Result<ffbridge::StreamInfo>;
    async fn optimize_for_streaming(&self, path: &Path) -> ffbridge::Result<PathBuf>;
    async fn extract_thumbnail(&self, path: &Path) -> ffbridge::Result<PathBuf>;
}

#[async_trait]
impl VideoToolkit for ffbridge::Ffmpeg {
    async fn is_video_container(&self, path: &Path) -> ffbridge::Result<bool> {
        ffbridge::Ffmpeg::is_video_container(self, path).await
    }

    async fn probe_metadata(&self, path: &Path) -> ffbridge::Result<ffbridge::StreamInfo> {
        ffbridge::Ffmpeg::probe_metadata(self, path).await
    }

    async fn optimize_for_streaming(&self, path: &Path) -> ffbridge::Result<PathBuf> {
        ffbridge::Ffmpeg::optimize_for_streaming(self, path).await
    }

    async fn extract_thumbnail(&self, path: &Path) -> ffbridge::Result<PathBuf> {
        ffbridge::Ffmpeg::extract_thumbnail(self, path).await
    }
}

/// Shared collaborators handed to every worker.
#[derive(Clone)]
pub struct PipelineContext {
    pub registry: Arc<TaskRegistry>,
    pub gateway: Arc<dyn MediaGateway>,
    pub toolkit: Arc<dyn VideoToolkit>,
    pub config: Arc<Config>,
}

/// The status message a worker edits with its terminal report.
#[derive(Debug, Clone, Copy)]
pub struct StatusTarget {
    pub chat: i64,
    pub message_id: i64,
}

/// Deliver a terminal report; delivery failure is logged, never escalated.
pub(crate) async fn report(ctx: &PipelineContext, status: StatusTarget, text: &str) {
    if let Err(e) = ctx
        .gateway
        .edit_status(status.chat, status.message_id, text)
        .await
    {
        warn!("Status report failed: {}", e);
    }
}

/// Bounded error rendering for failure reports.
pub(crate) fn truncate_error(err: &dyn fmt::Display) -> String {
    let full = err.to_string();
    if full.chars().count() <= ERROR_DISPLAY_LIMIT {
        return full;
    }
    full.chars().take(ERROR_DISPLAY_LIMIT).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_error_short_message_unchanged() {
        let err = crate::Error::not_found("movie.mp4");
        assert_eq!(truncate_error(&err), "File not found: movie.mp4");
    }

    #[test]
    fn test_truncate_error_caps_at_limit() {
        let long = "x".repeat(500);
        let err = crate::Error::validation(long);
        let shown = truncate_error(&err);
        assert_eq!(shown.chars().count(), ERROR_DISPLAY_LIMIT);
    }

    #[test]
    fn test_truncate_error_respects_char_boundaries() {
        let long = "é".repeat(300);
        let err = crate::Error::Other(long);
        let shown = truncate_error(&err);
        assert_eq!(shown.chars().count(), ERROR_DISPLAY_LIMIT);
        assert!(shown.chars().all(|c| c == 'é'));
    }
}
