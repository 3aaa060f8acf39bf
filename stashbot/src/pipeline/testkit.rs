//! Hand-rolled collaborator doubles for pipeline tests.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::task::JoinHandle;

use crate::Result;
use crate::config::Config;
use crate::pipeline::download::{DownloadRequest, run_download};
use crate::pipeline::progress::ProgressMeter;
use crate::pipeline::upload::{UploadRequest, run_upload};
use crate::pipeline::{
    MediaGateway, PipelineContext, RemoteMedia, StatusTarget, VideoToolkit, VideoUpload,
};
use crate::tasks::{TaskKind, TaskRegistry};
use ffbridge::StreamInfo;

/// Scripted behavior for [`MockGateway::fetch_media`].
#[derive(Clone)]
pub enum FetchScript {
    /// Write `size` bytes to the destination and succeed.
    Succeed { size: u64 },
    /// Create a partial file, then fail with the given message.
    FailAfterPartial { error: String },
    /// Create a partial file, then never complete.
    Stall,
}

#[derive(Default)]
struct GatewayState {
    in_flight: usize,
    max_in_flight: usize,
    posted: i64,
    edits: Vec<(i64, i64, String)>,
    sent: Vec<VideoUpload>,
}

/// Gateway double that records reports and uploads, and tracks how many
/// transfers overlap.
pub struct MockGateway {
    fetch: FetchScript,
    delay: Mutex<Duration>,
    state: Mutex<GatewayState>,
}

/// Decrements the overlap counter even when a transfer future is
/// dropped mid-flight by a deadline.
struct FlightGuard<'a>(&'a MockGateway);

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.state.lock().in_flight -= 1;
    }
}

impl MockGateway {
    fn new(fetch: FetchScript) -> Self {
        Self {
            fetch,
            delay: Mutex::new(Duration::ZERO),
            state: Mutex::new(GatewayState::default()),
        }
    }

    fn enter(&self) -> FlightGuard<'_> {
        let mut state = self.state.lock();
        state.in_flight += 1;
        state.max_in_flight = state.max_in_flight.max(state.in_flight);
        FlightGuard(self)
    }

    fn transfer_delay(&self) -> Duration {
        *self.delay.lock()
    }

    /// Highest number of transfers observed in flight at once.
    pub fn max_in_flight(&self) -> usize {
        self.state.lock().max_in_flight
    }

    /// Text of the most recent status edit.
    pub fn last_edit(&self) -> Option<String> {
        self.state
            .lock()
            .edits
            .last()
            .map(|(_, _, text)| text.clone())
    }

    /// All status edits, in order.
    pub fn edits(&self) -> Vec<String> {
        self.state
            .lock()
            .edits
            .iter()
            .map(|(_, _, text)| text.clone())
            .collect()
    }

    /// All videos handed to `send_video`, in order.
    pub fn sent(&self) -> Vec<VideoUpload> {
        self.state.lock().sent.clone()
    }
}

#[async_trait]
impl MediaGateway for MockGateway {
    async fn fetch_media(
        &self,
        _media: &RemoteMedia,
        dest: &Path,
        meter: ProgressMeter,
    ) -> Result<u64> {
        let _guard = self.enter();
        match &self.fetch {
            FetchScript::Succeed { size } => {
                tokio::time::sleep(self.transfer_delay()).await;
                std::fs::write(dest, vec![0u8; *size as usize])?;
                meter.update(*size, *size);
                Ok(*size)
            }
            FetchScript::FailAfterPartial { error } => {
                std::fs::write(dest, b"partial")?;
                Err(crate::Error::Other(error.clone()))
            }
            FetchScript::Stall => {
                std::fs::write(dest, b"partial")?;
                std::future::pending().await
            }
        }
    }

    async fn send_video(
        &self,
        _chat: i64,
        upload: &VideoUpload,
        meter: ProgressMeter,
    ) -> Result<()> {
        let _guard = self.enter();
        tokio::time::sleep(self.transfer_delay()).await;
        let size = std::fs::metadata(&upload.path).map(|m| m.len()).unwrap_or(0);
        meter.update(size, size);
        self.state.lock().sent.push(upload.clone());
        Ok(())
    }

    async fn post_status(&self, _chat: i64, _reply_to: Option<i64>, _text: &str) -> Result<i64> {
        let mut state = self.state.lock();
        state.posted += 1;
        Ok(state.posted)
    }

    async fn edit_status(&self, chat: i64, message_id: i64, text: &str) -> Result<()> {
        self.state
            .lock()
            .edits
            .push((chat, message_id, text.to_string()));
        Ok(())
    }
}

/// Toolkit double with scripted outcomes; records operations in order.
pub struct MockTools {
    is_video: AtomicBool,
    optimize_fails: AtomicBool,
    thumbnail_fails: AtomicBool,
    metadata: Mutex<StreamInfo>,
    calls: Mutex<Vec<&'static str>>,
}

impl Default for MockTools {
    fn default() -> Self {
        Self {
            is_video: AtomicBool::new(true),
            optimize_fails: AtomicBool::new(false),
            thumbnail_fails: AtomicBool::new(false),
            metadata: Mutex::new(StreamInfo {
                width: Some(1920),
                height: Some(1080),
                duration_secs: Some(120),
            }),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl MockTools {
    /// Operations invoked so far, in call order.
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().clone()
    }

    fn record(&self, op: &'static str) {
        self.calls.lock().push(op);
    }
}

#[async_trait]
impl VideoToolkit for MockTools {
    async fn is_video_container(&self, _path: &Path) -> ffbridge::Result<bool> {
        self.record("is_video_container");
        Ok(self.is_video.load(Ordering::SeqCst))
    }

    async fn probe_metadata(&self, _path: &Path) -> ffbridge::Result<StreamInfo> {
        self.record("probe_metadata");
        Ok(self.metadata.lock().clone())
    }

    async fn optimize_for_streaming(&self, path: &Path) -> ffbridge::Result<PathBuf> {
        self.record("optimize_for_streaming");
        if self.optimize_fails.load(Ordering::SeqCst) {
            return Err(ffbridge::Error::Process {
                op: format!("Optimize {} for streaming", path.display()),
                stderr: "moov atom not found".to_string(),
            });
        }
        let out = ffbridge::optimized_path(path);
        std::fs::write(&out, b"optimized")?;
        Ok(out)
    }

    async fn extract_thumbnail(&self, path: &Path) -> ffbridge::Result<PathBuf> {
        self.record("extract_thumbnail");
        if self.thumbnail_fails.load(Ordering::SeqCst) {
            return Err(ffbridge::Error::Process {
                op: format!("Generate thumbnail for {}", path.display()),
                stderr: "could not seek to frame".to_string(),
            });
        }
        let out = ffbridge::thumbnail_path(path);
        std::fs::write(&out, b"jpeg")?;
        Ok(out)
    }
}

/// One assembled pipeline under test: temp stash, doubles, registry.
pub struct TestHarness {
    pub ctx: PipelineContext,
    pub gateway: Arc<MockGateway>,
    pub tools: Arc<MockTools>,
    _stash: TempDir,
}

impl TestHarness {
    pub fn new(fetch: FetchScript) -> Self {
        let stash = TempDir::new().expect("temp stash");
        let gateway = Arc::new(MockGateway::new(fetch));
        let tools = Arc::new(MockTools::default());
        let config = Config {
            bot_token: "123:TEST".to_string(),
            owner_id: 1,
            stash_chat: Some(-1001),
            stash_dir: stash.path().to_path_buf(),
            max_downloads: 3,
            max_uploads: 2,
            download_timeout_secs: 3600,
            progress_interval_secs: 15,
            ffmpeg: ffbridge::FfmpegConfig::default(),
        };
        let ctx = PipelineContext {
            registry: Arc::new(TaskRegistry::new(config.max_downloads, config.max_uploads)),
            gateway: gateway.clone(),
            toolkit: tools.clone(),
            config: Arc::new(config),
        };
        Self {
            ctx,
            gateway,
            tools,
            _stash: stash,
        }
    }

    /// Harness preset for outbound tests; inbound transfers never run.
    pub fn default_upload() -> Self {
        Self::new(FetchScript::Succeed { size: 0 })
    }

    pub fn with_download_timeout(mut self, secs: u64) -> Self {
        let mut config = (*self.ctx.config).clone();
        config.download_timeout_secs = secs;
        self.ctx.config = Arc::new(config);
        self
    }

    pub fn with_transfer_delay(self, delay: Duration) -> Self {
        *self.gateway.delay.lock() = delay;
        self
    }

    pub fn with_non_video_container(self) -> Self {
        self.tools.is_video.store(false, Ordering::SeqCst);
        self
    }

    pub fn with_failing_optimize(self) -> Self {
        self.tools.optimize_fails.store(true, Ordering::SeqCst);
        self
    }

    pub fn with_failing_thumbnail(self) -> Self {
        self.tools.thumbnail_fails.store(true, Ordering::SeqCst);
        self
    }

    pub fn with_metadata(self, metadata: StreamInfo) -> Self {
        *self.tools.metadata.lock() = metadata;
        self
    }

    /// Queue one inbound worker through the registry, as the command
    /// surface does.
    pub fn spawn_download(&self, filename: &str) -> JoinHandle<()> {
        let task_id = self.ctx.registry.reserve_id();
        let request = DownloadRequest {
            task_id,
            media: RemoteMedia {
                file_id: format!("file-{}", task_id),
                file_name: Some(filename.to_string()),
                mime_type: Some("video/mp4".to_string()),
                size: 2048,
            },
            filename: filename.to_string(),
            status: StatusTarget {
                chat: 777,
                message_id: task_id as i64,
            },
        };
        self.ctx.registry.register(
            task_id,
            TaskKind::Download,
            filename,
            run_download(self.ctx.clone(), request),
        )
    }

    /// Queue one outbound worker through the registry.
    pub fn spawn_upload(&self, filename: &str, caption: Option<&str>) -> JoinHandle<()> {
        let task_id = self.ctx.registry.reserve_id();
        let request = UploadRequest {
            task_id,
            filename: filename.to_string(),
            caption: caption.map(str::to_string),
            dest_chat: self.ctx.config.stash_chat.unwrap_or(-1001),
            status: StatusTarget {
                chat: 777,
                message_id: task_id as i64,
            },
        };
        self.ctx.registry.register(
            task_id,
            TaskKind::Upload,
            filename,
            run_upload(self.ctx.clone(), request),
        )
    }

    pub fn stash_path(&self, filename: &str) -> PathBuf {
        self.ctx.config.stash_path(filename)
    }

    pub async fn write_stash_file(&self, filename: &str, contents: &[u8]) {
        tokio::fs::write(self.stash_path(filename), contents)
            .await
            .expect("write stash file");
    }
}
