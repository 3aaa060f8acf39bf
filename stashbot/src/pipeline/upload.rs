//! Outbound pipeline: a stash file to the destination chat, optimized
//! for streaming playback.

use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use crate::config::has_video_extension;
use crate::pipeline::progress::ProgressMeter;
use crate::pipeline::{
    PipelineContext, StatusTarget, VideoUpload, report, truncate_error,
};
use crate::tasks::TaskKind;
use crate::utils::fs;
use crate::{Error, Result};

/// Everything one outbound worker needs to run.
pub struct UploadRequest {
    pub task_id: u64,
    pub filename: String,
    pub caption: Option<String>,
    pub dest_chat: i64,
    pub status: StatusTarget,
}

/// Attributes of the transfer that reached the destination.
struct Delivered {
    width: u32,
    height: u32,
    duration_secs: u32,
    optimized: bool,
}

/// Working files the pipeline may create alongside the source.
#[derive(Default)]
struct Scratch {
    optimized: Option<PathBuf>,
    thumbnail: Option<PathBuf>,
}

/// Drive one outbound transfer to its terminal state.
///
/// The admission permit is held for the entire body. Whatever the
/// outcome, the terminal phase removes the thumbnail, the optimized
/// copy and the source artifact, then deregisters the task.
pub async fn run_upload(ctx: PipelineContext, request: UploadRequest) {
    let task_id = request.task_id;
    let source = ctx.config.stash_path(&request.filename);

    let permit = match ctx.registry.permit_for(TaskKind::Upload).await {
        Ok(permit) => permit,
        Err(e) => {
            error!("Task {:3} | UPLOAD   | Admission failed: {}", task_id, e);
            let text = format!(
                "❌ **Upload Failed** [`{}`]\nError: `{}`",
                task_id,
                truncate_error(&e)
            );
            report(&ctx, request.status, &text).await;
            ctx.registry.deregister(task_id);
            return;
        }
    };

    info!(
        "Task {:3} | UPLOAD   | File: {} | Caption: {}",
        task_id,
        request.filename,
        request.caption.as_deref().unwrap_or("None")
    );

    let mut scratch = Scratch::default();
    match run_stages(&ctx, &request, &source, &mut scratch).await {
        Ok(delivered) => {
            info!("Task {:3} | UPLOAD   | Success: {}", task_id, request.filename);
            let text = format!(
                "✅ **Upload Complete** [`{}`]\n📄 File: `{}`\n📺 Resolution: `{}x{}`\n⏱ Duration: `{}s`\n🎬 Streaming: `Enabled`\n🔧 Optimized: `{}`",
                task_id,
                request.filename,
                delivered.width,
                delivered.height,
                delivered.duration_secs,
                if delivered.optimized { "Yes" } else { "No" }
            );
            report(&ctx, request.status, &text).await;
        }
        Err(e) => {
            error!(
                "Task {:3} | UPLOAD   | Error: {}: {}",
                task_id, request.filename, e
            );
            let text = format!(
                "❌ **Upload Failed** [`{}`]\nError: `{}`",
                task_id,
                truncate_error(&e)
            );
            report(&ctx, request.status, &text).await;
        }
    }

    // Win or lose, none of the working files outlive the task.
    let mut doomed = Vec::new();
    if let Some(thumbnail) = scratch.thumbnail {
        doomed.push(thumbnail);
    }
    if let Some(optimized) = scratch.optimized {
        if optimized != source {
            doomed.push(optimized);
        }
    }
    doomed.push(source);
    fs::remove_many(&doomed).await;

    drop(permit);
    ctx.registry.deregister(task_id);
}

async fn run_stages(
    ctx: &PipelineContext,
    request: &UploadRequest,
    source: &Path,
    scratch: &mut Scratch,
) -> Result<Delivered> {
    let task_id = request.task_id;

    if !tokio::fs::try_exists(source).await.unwrap_or(false) {
        return Err(Error::not_found(request.filename.clone()));
    }

    // Optimization is opportunistic: a non-video extension, a failed
    // container probe or a failed remux all fall back to the source.
    let mut upload_path = source.to_path_buf();
    let mut optimized = false;

    if has_video_extension(source) {
        match ctx.toolkit.is_video_container(source).await {
            Ok(true) => {
                info!("Task {:3} | UPLOAD   | Optimizing for streaming: {}", task_id, request.filename);
                match ctx.toolkit.optimize_for_streaming(source).await {
                    Ok(copy) => {
                        info!("Task {:3} | UPLOAD   | Using optimized file", task_id);
                        upload_path = copy.clone();
                        scratch.optimized = Some(copy);
                        optimized = true;
                    }
                    Err(e) => {
                        warn!(
                            "Task {:3} | UPLOAD   | Optimization failed, using original: {}",
                            task_id, e
                        );
                    }
                }
            }
            Ok(false) => {
                debug!(
                    "Task {:3} | UPLOAD   | Not a video container, skipping optimization",
                    task_id
                );
            }
            Err(e) => {
                warn!(
                    "Task {:3} | UPLOAD   | Container check failed, skipping optimization: {}",
                    task_id, e
                );
            }
        }
    }

    // Metadata is mandatory: the destination needs real dimensions and
    // duration for streaming playback.
    let probed = ctx.toolkit.probe_metadata(&upload_path).await?;
    let Some((width, height, duration_secs)) = probed.complete() else {
        return Err(Error::validation("Failed to extract video metadata"));
    };

    match ctx.toolkit.extract_thumbnail(&upload_path).await {
        Ok(thumbnail) => scratch.thumbnail = Some(thumbnail),
        Err(e) => warn!(
            "Task {:3} | UPLOAD   | Thumbnail generation failed: {}",
            task_id, e
        ),
    }

    info!("Task {:3} | UPLOAD   | Uploading: {}", task_id, request.filename);
    let meter = ProgressMeter::new(
        "Uploading",
        request.filename.clone(),
        ctx.config.progress_interval(),
    );
    let upload = VideoUpload {
        path: upload_path,
        width,
        height,
        duration_secs,
        caption: request.caption.clone(),
        thumbnail: scratch.thumbnail.clone(),
    };
    ctx.gateway.send_video(request.dest_chat, &upload, meter).await?;

    Ok(Delivered {
        width,
        height,
        duration_secs,
        optimized,
    })
}
