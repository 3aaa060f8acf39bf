//! Error types for ffmpeg/ffprobe operations.

use thiserror::Error;

/// Result alias for adapter operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Classified failures from ffmpeg/ffprobe subprocess operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("{tool} not found. Please install FFmpeg!")]
    ToolNotFound { tool: String },

    #[error("{op} timeout (>{limit_secs}s)")]
    Timeout { op: String, limit_secs: u64 },

    #[error("{op} failed: {stderr}")]
    Process { op: String, stderr: String },

    #[error("{op}: unparseable probe output: {detail}")]
    Parse { op: String, detail: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the failure was the operation deadline expiring.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }
}
