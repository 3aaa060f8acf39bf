//! Inbound pipeline: a remote media object into the stash.

use tracing::{error, info};

use crate::pipeline::progress::ProgressMeter;
use crate::pipeline::{PipelineContext, RemoteMedia, StatusTarget, report, truncate_error};
use crate::tasks::TaskKind;
use crate::utils::bytesize::humanbytes;
use crate::utils::fs;

/// Everything one inbound worker needs to run.
pub struct DownloadRequest {
    pub task_id: u64,
    pub media: RemoteMedia,
    pub filename: String,
    pub status: StatusTarget,
}

/// Drive one inbound transfer to its terminal state.
///
/// The admission permit is held for the entire body. The transfer races
/// an overall deadline; expiry or failure removes the partial artifact.
/// The task record is always removed, whatever the outcome.
pub async fn run_download(ctx: PipelineContext, request: DownloadRequest) {
    let task_id = request.task_id;
    let save_path = ctx.config.stash_path(&request.filename);

    let permit = match ctx.registry.permit_for(TaskKind::Download).await {
        Ok(permit) => permit,
        Err(e) => {
            error!("Task {:3} | DOWNLOAD | Admission failed: {}", task_id, e);
            let text = format!(
                "❌ **Download Failed** [`{}`]\nError: `{}`",
                task_id,
                truncate_error(&e)
            );
            report(&ctx, request.status, &text).await;
            ctx.registry.deregister(task_id);
            return;
        }
    };

    info!(
        "Task {:3} | DOWNLOAD | File: {} | Size: {}",
        task_id,
        request.filename,
        humanbytes(request.media.size)
    );

    let meter = ProgressMeter::new(
        "Downloading",
        request.filename.clone(),
        ctx.config.progress_interval(),
    );
    let transfer = ctx.gateway.fetch_media(&request.media, &save_path, meter);

    match tokio::time::timeout(ctx.config.download_timeout(), transfer).await {
        Ok(Ok(written)) => {
            info!("Task {:3} | DOWNLOAD | Success: {}", task_id, request.filename);
            let text = format!(
                "✅ **Download Complete** [`{}`]\n📄 File: `{}`\n💾 Size: `{}`\n\nUpload: `/upload {} [caption]`",
                task_id,
                request.filename,
                humanbytes(written),
                request.filename
            );
            report(&ctx, request.status, &text).await;
        }
        Ok(Err(e)) => {
            error!(
                "Task {:3} | DOWNLOAD | Error: {}: {}",
                task_id, request.filename, e
            );
            fs::remove_quiet(&save_path).await;
            let text = format!(
                "❌ **Download Failed** [`{}`]\nError: `{}`",
                task_id,
                truncate_error(&e)
            );
            report(&ctx, request.status, &text).await;
        }
        Err(_) => {
            // The dropped transfer future cancels the in-flight request.
            error!(
                "Task {:3} | DOWNLOAD | Timeout after {}s: {}",
                task_id,
                ctx.config.download_timeout_secs,
                request.filename
            );
            fs::remove_quiet(&save_path).await;
            let text = format!("❌ **Timeout** [`{}`]: `{}`", task_id, request.filename);
            report(&ctx, request.status, &text).await;
        }
    }

    drop(permit);
    ctx.registry.deregister(task_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testkit::{FetchScript, TestHarness};
    use std::time::Duration;

    #[tokio::test]
    async fn success_keeps_artifact_and_reports_size() {
        let harness = TestHarness::new(FetchScript::Succeed { size: 2048 });
        let handle = harness.spawn_download("movie.mp4");
        handle.await.unwrap();

        let saved = harness.stash_path("movie.mp4");
        assert!(saved.exists());
        assert_eq!(tokio::fs::metadata(&saved).await.unwrap().len(), 2048);

        let last = harness.gateway.last_edit().unwrap();
        assert!(last.contains("Download Complete"));
        assert!(last.contains("2.00 KB"));
        assert!(last.contains("/upload movie.mp4"));
        assert_eq!(harness.ctx.registry.active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_removes_partial_and_reports() {
        let harness = TestHarness::new(FetchScript::Stall).with_download_timeout(1);
        let handle = harness.spawn_download("stuck.mp4");
        handle.await.unwrap();

        assert!(!harness.stash_path("stuck.mp4").exists());
        let last = harness.gateway.last_edit().unwrap();
        assert!(last.contains("Timeout"));
        assert!(last.contains("stuck.mp4"));
        assert_eq!(harness.ctx.registry.active_count(), 0);
    }

    #[tokio::test]
    async fn failure_removes_partial_and_truncates_error() {
        let harness = TestHarness::new(FetchScript::FailAfterPartial {
            error: "x".repeat(500),
        });
        let handle = harness.spawn_download("broken.mp4");
        handle.await.unwrap();

        assert!(!harness.stash_path("broken.mp4").exists());
        let last = harness.gateway.last_edit().unwrap();
        assert!(last.contains("Download Failed"));
        // 200 chars of error plus the surrounding report text.
        assert!(last.chars().filter(|c| *c == 'x').count() <= 200);
        assert_eq!(harness.ctx.registry.active_count(), 0);
    }

    #[tokio::test]
    async fn pool_capacity_bounds_concurrent_transfers() {
        let harness = TestHarness::new(FetchScript::Succeed { size: 64 })
            .with_transfer_delay(Duration::from_millis(20));

        let mut handles = Vec::new();
        for i in 0..6 {
            handles.push(harness.spawn_download(&format!("clip{}.mp4", i)));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(harness.gateway.max_in_flight() <= 3);
        assert_eq!(harness.ctx.registry.active_count(), 0);
        assert_eq!(harness.ctx.registry.capacity(TaskKind::Download), 3);
    }
}
