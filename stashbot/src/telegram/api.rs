//! Bot API client.
//!
//! Method calls post JSON and decode the `ok`/`result` envelope.
//! Message methods retry on 429 using the server's backoff hint; file
//! transfers stream in both directions so a multi-gigabyte video never
//! sits in memory.

use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::multipart;
use serde::de::DeserializeOwned;
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use crate::pipeline::progress::ProgressMeter;
use crate::pipeline::{MediaGateway, RemoteMedia, VideoUpload};
use crate::telegram::types::{ApiResponse, BotIdentity, Message, RemoteFile, Update};
use crate::utils::fs;
use crate::{Error, Result};

/// Maximum retries when the API answers 429.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Seconds the server holds a getUpdates long poll open.
const LONG_POLL_TIMEOUT_SECS: u64 = 50;

fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            // Safe to ignore: can happen if another crate installed it first.
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Decode a method envelope into its result.
fn accept<T>(method: &str, envelope: ApiResponse<T>) -> Result<T> {
    if envelope.ok {
        envelope
            .result
            .ok_or_else(|| Error::api(format!("{}: empty result", method)))
    } else {
        Err(Error::api(format!(
            "{} failed: {}",
            method,
            envelope
                .description
                .unwrap_or_else(|| "unknown error".to_string())
        )))
    }
}

/// HTTPS client for one bot account.
pub struct BotClient {
    http: reqwest::Client,
    base_url: String,
    file_base_url: String,
}

impl BotClient {
    pub fn new(token: &str) -> Self {
        install_rustls_provider();
        Self {
            http: reqwest::Client::new(),
            base_url: format!("https://api.telegram.org/bot{}", token),
            file_base_url: format!("https://api.telegram.org/file/bot{}", token),
        }
    }

    /// Call a JSON method and decode its envelope.
    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        payload: &serde_json::Value,
    ) -> Result<T> {
        let url = format!("{}/{}", self.base_url, method);
        let response = self.http.post(&url).json(payload).send().await?;
        let envelope: ApiResponse<T> = response.json().await?;
        accept(method, envelope)
    }

    /// Call a message method with rate limit handling.
    async fn call_with_retry<T: DeserializeOwned>(
        &self,
        method: &str,
        payload: &serde_json::Value,
    ) -> Result<T> {
        let url = format!("{}/{}", self.base_url, method);
        let mut attempts = 0;

        loop {
            attempts += 1;

            let response = self.http.post(&url).json(payload).send().await?;

            if response.status().as_u16() == 429 {
                let retry_after = response
                    .json::<ApiResponse<serde_json::Value>>()
                    .await
                    .ok()
                    .and_then(|envelope| envelope.parameters)
                    .and_then(|parameters| parameters.retry_after)
                    .map(Duration::from_secs);

                if attempts >= MAX_RATE_LIMIT_RETRIES {
                    warn!(
                        "Rate limit: max retries ({}) exceeded for {}, last retry_after was {:?}",
                        MAX_RATE_LIMIT_RETRIES, method, retry_after
                    );
                    return Err(Error::api(format!(
                        "{} rate limit exceeded after {} retries",
                        method, MAX_RATE_LIMIT_RETRIES
                    )));
                }

                let wait = retry_after.unwrap_or(Duration::from_secs(1));
                debug!(
                    "Rate limited (429), waiting {:?} before retry (attempt {}/{})",
                    wait, attempts, MAX_RATE_LIMIT_RETRIES
                );
                tokio::time::sleep(wait).await;
                continue;
            }

            let envelope: ApiResponse<T> = response.json().await?;
            return accept(method, envelope);
        }
    }

    /// Identify the bot account.
    pub async fn get_me(&self) -> Result<BotIdentity> {
        self.call("getMe", &json!({})).await
    }

    /// Long-poll for message updates after `offset`.
    pub async fn get_updates(&self, offset: i64) -> Result<Vec<Update>> {
        self.call(
            "getUpdates",
            &json!({
                "offset": offset,
                "timeout": LONG_POLL_TIMEOUT_SECS,
                "allowed_updates": ["message"],
            }),
        )
        .await
    }

    async fn get_file(&self, file_id: &str) -> Result<RemoteFile> {
        self.call("getFile", &json!({ "file_id": file_id })).await
    }
}

#[async_trait]
impl MediaGateway for BotClient {
    async fn fetch_media(
        &self,
        media: &RemoteMedia,
        dest: &Path,
        meter: ProgressMeter,
    ) -> Result<u64> {
        let file = self.get_file(&media.file_id).await?;
        let remote_path = file
            .file_path
            .ok_or_else(|| Error::api("getFile returned no file_path"))?;
        let url = format!("{}/{}", self.file_base_url, remote_path);

        let response = self.http.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(Error::api(format!(
                "file download failed: HTTP {}",
                response.status()
            )));
        }
        let total = response
            .content_length()
            .or(file.file_size)
            .unwrap_or(media.size);

        if let Some(parent) = dest.parent() {
            fs::ensure_dir_all_with_op("creating stash directory", parent).await?;
        }
        let mut out = tokio::fs::File::create(dest)
            .await
            .map_err(|e| fs::io_error("creating", dest, e))?;

        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk: Bytes = chunk?;
            out.write_all(&chunk)
                .await
                .map_err(|e| fs::io_error("writing", dest, e))?;
            written += chunk.len() as u64;
            meter.update(written, total);
        }
        out.flush()
            .await
            .map_err(|e| fs::io_error("flushing", dest, e))?;

        // With an unknown total the loop never saw current == total.
        if total == 0 {
            meter.update(written, written);
        }
        Ok(written)
    }

    async fn send_video(
        &self,
        chat: i64,
        upload: &VideoUpload,
        meter: ProgressMeter,
    ) -> Result<()> {
        let file = tokio::fs::File::open(&upload.path)
            .await
            .map_err(|e| fs::io_error("opening", &upload.path, e))?;
        let total = file
            .metadata()
            .await
            .map_err(|e| fs::io_error("sizing", &upload.path, e))?
            .len();

        let mut sent: u64 = 0;
        let counted = ReaderStream::new(file).map(move |chunk: std::io::Result<Bytes>| {
            if let Ok(bytes) = &chunk {
                sent += bytes.len() as u64;
                meter.update(sent, total);
            }
            chunk
        });

        let file_name = upload
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "video.mp4".to_string());
        let video_part =
            multipart::Part::stream_with_length(reqwest::Body::wrap_stream(counted), total)
                .file_name(file_name);

        let mut form = multipart::Form::new()
            .text("chat_id", chat.to_string())
            .text("width", upload.width.to_string())
            .text("height", upload.height.to_string())
            .text("duration", upload.duration_secs.to_string())
            .text("supports_streaming", "true")
            .part("video", video_part);

        if let Some(caption) = &upload.caption {
            form = form.text("caption", caption.clone());
        }
        if let Some(thumbnail) = &upload.thumbnail {
            let bytes = tokio::fs::read(thumbnail)
                .await
                .map_err(|e| fs::io_error("reading", thumbnail, e))?;
            let thumb_name = thumbnail
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "thumb.jpg".to_string());
            form = form.part("thumbnail", multipart::Part::bytes(bytes).file_name(thumb_name));
        }

        let url = format!("{}/sendVideo", self.base_url);
        let response = self.http.post(&url).multipart(form).send().await?;
        let envelope: ApiResponse<Message> = response.json().await?;
        accept("sendVideo", envelope)?;
        Ok(())
    }

    async fn post_status(&self, chat: i64, reply_to: Option<i64>, text: &str) -> Result<i64> {
        let mut payload = json!({
            "chat_id": chat,
            "text": text,
            "parse_mode": "Markdown",
        });
        if let Some(message_id) = reply_to {
            payload["reply_to_message_id"] = json!(message_id);
        }
        let message: Message = self.call_with_retry("sendMessage", &payload).await?;
        Ok(message.message_id)
    }

    async fn edit_status(&self, chat: i64, message_id: i64, text: &str) -> Result<()> {
        let payload = json!({
            "chat_id": chat,
            "message_id": message_id,
            "text": text,
            "parse_mode": "Markdown",
        });
        // editMessageText returns the message or plain `true`; neither
        // is needed.
        let _: serde_json::Value = self.call_with_retry("editMessageText", &payload).await?;
        Ok(())
    }
}
