//! Chat command surface.
//!
//! A long-polling dispatcher reads owner messages, parses slash
//! commands and hands transfer commands to the pipeline workers. The
//! queued reply a handler posts is the same message its worker later
//! edits with the terminal report.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::logging::LogControl;
use crate::pipeline::download::{DownloadRequest, run_download};
use crate::pipeline::upload::{UploadRequest, run_upload};
use crate::pipeline::{MediaGateway, PipelineContext, RemoteMedia, StatusTarget, truncate_error};
use crate::tasks::{TaskInfo, TaskKind};
use crate::telegram::BotClient;
use crate::telegram::types::Message;
use crate::utils::bytesize::humanbytes;

/// Delay before retrying after a failed update poll.
const POLL_RETRY_DELAY: Duration = Duration::from_secs(3);

const DOWNLOAD_USAGE: &str = "❌ **Usage:**\n`/download [filename]`\n\n`/download myvideo.mp4`";

const UPLOAD_USAGE: &str = "❌ **Usage:**\n\
    `/upload [filename] [caption]`\n\n\
    **Example:**\n\
    `/upload video.mp4`\n\
    `/upload video.mp4 My awesome video`";

/// Long-polling command dispatcher.
///
/// Only messages from the configured owner are honored; everything
/// else is dropped without a reply.
pub struct Dispatcher {
    client: Arc<BotClient>,
    ctx: PipelineContext,
    logs: Arc<LogControl>,
    bot_username: Option<String>,
}

impl Dispatcher {
    pub fn new(
        client: Arc<BotClient>,
        ctx: PipelineContext,
        logs: Arc<LogControl>,
        bot_username: Option<String>,
    ) -> Self {
        Self {
            client,
            ctx,
            logs,
            bot_username,
        }
    }

    /// Poll for updates forever, dispatching each owner command.
    pub async fn run(&self) {
        info!("Command dispatcher started");
        let mut offset: i64 = 0;
        loop {
            let updates = match self.client.get_updates(offset).await {
                Ok(updates) => updates,
                Err(e) => {
                    warn!("Update poll failed: {}", e);
                    tokio::time::sleep(POLL_RETRY_DELAY).await;
                    continue;
                }
            };
            for update in updates {
                offset = offset.max(update.update_id + 1);
                if let Some(message) = update.message {
                    self.handle_message(&message).await;
                }
            }
        }
    }

    async fn handle_message(&self, message: &Message) {
        let from_owner = message
            .from
            .as_ref()
            .is_some_and(|user| user.id == self.ctx.config.owner_id);
        if !from_owner {
            return;
        }
        let Some(text) = message.text.as_deref() else {
            return;
        };
        let Some(command) = parse_command(text, self.bot_username.as_deref()) else {
            return;
        };

        debug!("Command /{} from chat {}", command.name, message.chat.id);
        let outcome = match command.name {
            "download" => self.handle_download(message, command.args).await,
            "upload" => self.handle_upload(message, command.args).await,
            "status" => self.handle_status(message).await,
            "id" => self.handle_id(message).await,
            "logs" => self.handle_logs(message).await,
            "help" => self.handle_help(message).await,
            _ => Ok(()),
        };
        if let Err(e) = outcome {
            error!("Command /{} failed: {}", command.name, e);
            let report = format!("❌ Error: `{}`", truncate_error(&e));
            if let Err(e) = self.reply(message, &report).await {
                warn!("Error report failed: {}", e);
            }
        }
    }

    async fn handle_download(&self, message: &Message, args: &str) -> crate::Result<()> {
        let media = message
            .reply_to_message
            .as_deref()
            .and_then(|replied| replied.media());
        let Some(media) = media else {
            self.reply(message, "❌ Reply to a video/document file!")
                .await?;
            return Ok(());
        };
        if args.is_empty() {
            self.reply(message, DOWNLOAD_USAGE).await?;
            return Ok(());
        }

        let filename = derive_filename(args, &media);
        let dest = self.ctx.config.stash_path(&filename);
        if tokio::fs::try_exists(&dest).await.unwrap_or(false) {
            let text = format!(
                "⚠️ File `{}` already exists!\nDelete it first or use a different name.",
                filename
            );
            self.reply(message, &text).await?;
            return Ok(());
        }

        let task_id = self.ctx.registry.reserve_id();
        let queued = format!(
            "🚀 **Download Queued** [`{}`]\n📄 File: `{}`\n💾 Size: `{}`\n{}",
            task_id,
            filename,
            humanbytes(media.size),
            self.occupancy_line(TaskKind::Download),
        );
        let status_id = self.reply(message, &queued).await?;

        let request = DownloadRequest {
            task_id,
            media,
            filename: filename.clone(),
            status: StatusTarget {
                chat: message.chat.id,
                message_id: status_id,
            },
        };
        self.ctx.registry.register(
            task_id,
            TaskKind::Download,
            &filename,
            run_download(self.ctx.clone(), request),
        );
        Ok(())
    }

    async fn handle_upload(&self, message: &Message, args: &str) -> crate::Result<()> {
        let Some(dest_chat) = self.ctx.config.stash_chat else {
            self.reply(message, "❌ Please set `STASHBOT_STASH_CHAT` first!")
                .await?;
            return Ok(());
        };
        if args.is_empty() {
            self.reply(message, UPLOAD_USAGE).await?;
            return Ok(());
        }

        let (filename, caption) = match args.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, Some(rest.trim().to_string())),
            None => (args, None),
        };
        let source = self.ctx.config.stash_path(filename);
        if !tokio::fs::try_exists(&source).await.unwrap_or(false) {
            self.reply(message, &format!("❌ File not found: `{}`", filename))
                .await?;
            return Ok(());
        }

        let task_id = self.ctx.registry.reserve_id();
        let queued = format!(
            "🚀 **Upload Queued** [`{}`]\n📄 File: `{}`\n{}",
            task_id,
            filename,
            self.occupancy_line(TaskKind::Upload),
        );
        let status_id = self.reply(message, &queued).await?;

        let request = UploadRequest {
            task_id,
            filename: filename.to_string(),
            caption,
            dest_chat,
            status: StatusTarget {
                chat: message.chat.id,
                message_id: status_id,
            },
        };
        self.ctx.registry.register(
            task_id,
            TaskKind::Upload,
            filename,
            run_upload(self.ctx.clone(), request),
        );
        Ok(())
    }

    async fn handle_status(&self, message: &Message) -> crate::Result<()> {
        let tasks = self.ctx.registry.snapshot_all();
        if tasks.is_empty() {
            self.reply(message, "✅ No active tasks").await?;
            return Ok(());
        }

        let downloads: Vec<&TaskInfo> = tasks
            .iter()
            .filter(|task| task.kind == TaskKind::Download)
            .collect();
        let uploads: Vec<&TaskInfo> = tasks
            .iter()
            .filter(|task| task.kind == TaskKind::Upload)
            .collect();

        let mut text = format!("📊 **Active Tasks:** `{}`\n", tasks.len());
        text.push_str(&format!(
            "⚙️ **Limits:** Downloads: `{}` | Uploads: `{}`\n\n",
            self.ctx.registry.capacity(TaskKind::Download),
            self.ctx.registry.capacity(TaskKind::Upload)
        ));

        if !downloads.is_empty() {
            text.push_str(&format!("⏬ **Downloads ({}):**\n", downloads.len()));
            for task in &downloads {
                text.push_str(&format!("  • [`{}`] `{}`\n", task.id, task.filename));
            }
            text.push('\n');
        }
        if !uploads.is_empty() {
            text.push_str(&format!("📤 **Uploads ({}):**\n", uploads.len()));
            for task in &uploads {
                text.push_str(&format!("  • [`{}`] `{}`\n", task.id, task.filename));
            }
        }

        self.reply(message, &text).await?;
        Ok(())
    }

    async fn handle_id(&self, message: &Message) -> crate::Result<()> {
        let chat_id = message.chat.id;
        let kind = if chat_id > 0 { "User" } else { "Group/Channel" };
        let text = format!(
            "🆔 **Chat Information**\n\n**ID:** `{}`\n**Type:** `{}`",
            chat_id, kind
        );
        self.reply(message, &text).await?;
        Ok(())
    }

    async fn handle_logs(&self, message: &Message) -> crate::Result<()> {
        let enabled = self.logs.toggle_debug()?;
        let text = if enabled {
            "🔍 **Debug logging enabled**"
        } else {
            "🔍 **Debug logging disabled**"
        };
        self.reply(message, text).await?;
        Ok(())
    }

    async fn handle_help(&self, message: &Message) -> crate::Result<()> {
        let registry = &self.ctx.registry;
        let text = format!(
            "🤖 **Stash Bot Commands**\n\n\
             **📥 Download:**\n\
             `/download [filename]` - Download replied video/file\n\
             Example: `/download myvideo.mp4`\n\n\
             **📤 Upload:**\n\
             `/upload [filename] [caption]` - Upload video with streaming optimization\n\
             Example: `/upload video.mp4 My Video Title`\n\n\
             **📊 Status:**\n\
             `/status` - Check active download/upload tasks\n\n\
             **🆔 Utilities:**\n\
             `/id` - Get current chat ID\n\
             `/logs` - Toggle debug logging\n\
             `/help` - Show this help message\n\n\
             **⚙️ Concurrency Limits:**\n\
             • Max concurrent downloads: `{}`\n\
             • Max concurrent uploads: `{}`\n\n\
             **Features:**\n\
             ✅ Async operations with semaphore control\n\
             ✅ Streaming optimization (automatic)\n\
             ✅ Thumbnail generation\n\
             ✅ Progress tracking\n\
             ✅ Error recovery\n\
             ✅ Automatic cleanup",
            registry.capacity(TaskKind::Download),
            registry.capacity(TaskKind::Upload)
        );
        self.reply(message, &text).await?;
        Ok(())
    }

    async fn reply(&self, message: &Message, text: &str) -> crate::Result<i64> {
        self.ctx
            .gateway
            .post_status(message.chat.id, Some(message.message_id), text)
            .await
    }

    /// Pool occupancy line for queued reports.
    ///
    /// The task being queued is counted up front; its registration only
    /// lands after the report is posted.
    fn occupancy_line(&self, pending: TaskKind) -> String {
        let registry = &self.ctx.registry;
        let mut downloads = registry.active_by_kind(TaskKind::Download);
        let mut uploads = registry.active_by_kind(TaskKind::Upload);
        match pending {
            TaskKind::Download => downloads += 1,
            TaskKind::Upload => uploads += 1,
        }
        format!(
            "📊 Active: Downloads: `{}/{}` | Uploads: `{}/{}`",
            downloads,
            registry.capacity(TaskKind::Download),
            uploads,
            registry.capacity(TaskKind::Upload)
        )
    }
}

/// A parsed slash command with its argument remainder.
#[derive(Debug, PartialEq, Eq)]
struct Command<'a> {
    name: &'a str,
    args: &'a str,
}

/// Parse a slash command, honoring an optional `@botname` suffix.
///
/// Returns `None` for plain text and for commands addressed to a
/// different bot.
fn parse_command<'a>(text: &'a str, bot_username: Option<&str>) -> Option<Command<'a>> {
    let rest = text.trim().strip_prefix('/')?;
    let (head, args) = match rest.split_once(char::is_whitespace) {
        Some((head, tail)) => (head, tail.trim()),
        None => (rest, ""),
    };
    let (name, target) = match head.split_once('@') {
        Some((name, target)) => (name, Some(target)),
        None => (head, None),
    };
    if name.is_empty() {
        return None;
    }
    if let (Some(target), Some(username)) = (target, bot_username) {
        if !target.eq_ignore_ascii_case(username) {
            return None;
        }
    }
    Some(Command { name, args })
}

/// Extension for a stash filename: the media's own file extension,
/// else its MIME subtype, else `mp4`.
fn media_extension(media: &RemoteMedia) -> &str {
    if let Some(name) = media.file_name.as_deref() {
        if let Some((_, ext)) = name.rsplit_once('.') {
            return ext;
        }
    }
    if let Some(mime) = media.mime_type.as_deref() {
        if let Some((_, subtype)) = mime.rsplit_once('/') {
            return subtype;
        }
    }
    "mp4"
}

/// Complete a caller-chosen filename with the media's extension unless
/// it already ends with it.
fn derive_filename(base: &str, media: &RemoteMedia) -> String {
    let suffix = format!(".{}", media_extension(media));
    if base.ends_with(&suffix) {
        base.to_string()
    } else {
        format!("{}{}", base, suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn media(file_name: Option<&str>, mime_type: Option<&str>) -> RemoteMedia {
        RemoteMedia {
            file_id: "abc".to_string(),
            file_name: file_name.map(str::to_string),
            mime_type: mime_type.map(str::to_string),
            size: 1024,
        }
    }

    #[test]
    fn test_parse_plain_command() {
        let command = parse_command("/status", None).unwrap();
        assert_eq!(command.name, "status");
        assert_eq!(command.args, "");
    }

    #[test]
    fn test_parse_command_keeps_argument_remainder() {
        let command = parse_command("/upload  video.mp4  My caption ", None).unwrap();
        assert_eq!(command.name, "upload");
        assert_eq!(command.args, "video.mp4  My caption");
    }

    #[test]
    fn test_parse_command_bot_suffix() {
        let command = parse_command("/status@StashBot", Some("stashbot")).unwrap();
        assert_eq!(command.name, "status");
        assert!(parse_command("/status@otherbot", Some("stashbot")).is_none());
    }

    #[test]
    fn test_parse_rejects_plain_text() {
        assert!(parse_command("hello", None).is_none());
        assert!(parse_command("/", None).is_none());
        assert!(parse_command("   ", None).is_none());
    }

    #[test]
    fn test_derive_filename_from_media_name() {
        let media = media(Some("clip.mkv"), Some("video/mp4"));
        assert_eq!(derive_filename("show", &media), "show.mkv");
        assert_eq!(derive_filename("show.mkv", &media), "show.mkv");
    }

    #[test]
    fn test_derive_filename_from_mime_subtype() {
        let media = media(None, Some("video/webm"));
        assert_eq!(derive_filename("cam", &media), "cam.webm");
    }

    #[test]
    fn test_derive_filename_default_extension() {
        assert_eq!(derive_filename("cam", &media(None, None)), "cam.mp4");
        assert_eq!(derive_filename("cam", &media(Some("noext"), None)), "cam.mp4");
    }
}
