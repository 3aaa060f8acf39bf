//! Bot API wire types.
//!
//! Only the fields this application reads are modeled; everything else
//! in the payloads is ignored during deserialization.

use serde::Deserialize;

use crate::pipeline::RemoteMedia;

/// JSON envelope wrapping every Bot API method response.
#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct ApiResponse<T> {
    pub ok: bool,
    #[serde(default)]
    pub result: Option<T>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: Option<ResponseParameters>,
}

/// Extra failure details, notably the rate-limit backoff hint.
#[derive(Debug, Deserialize)]
pub struct ResponseParameters {
    #[serde(default)]
    pub retry_after: Option<u64>,
}

/// One long-poll result entry.
#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    #[serde(default)]
    pub from: Option<User>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub reply_to_message: Option<Box<Message>>,
    #[serde(default)]
    pub video: Option<Video>,
    #[serde(default)]
    pub document: Option<Document>,
    #[serde(default)]
    pub animation: Option<Animation>,
}

impl Message {
    /// The transferable media attached to this message, if any.
    ///
    /// Videos win over documents, documents over animations.
    pub fn media(&self) -> Option<RemoteMedia> {
        if let Some(video) = &self.video {
            return Some(RemoteMedia {
                file_id: video.file_id.clone(),
                file_name: video.file_name.clone(),
                mime_type: video.mime_type.clone(),
                size: video.file_size.unwrap_or(0),
            });
        }
        if let Some(document) = &self.document {
            return Some(RemoteMedia {
                file_id: document.file_id.clone(),
                file_name: document.file_name.clone(),
                mime_type: document.mime_type.clone(),
                size: document.file_size.unwrap_or(0),
            });
        }
        self.animation.as_ref().map(|animation| RemoteMedia {
            file_id: animation.file_id.clone(),
            file_name: animation.file_name.clone(),
            mime_type: animation.mime_type.clone(),
            size: animation.file_size.unwrap_or(0),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Video {
    pub file_id: String,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub file_size: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Document {
    pub file_id: String,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub file_size: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Animation {
    pub file_id: String,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub file_size: Option<u64>,
}

/// Result of `getFile`: the server-side path for the download endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteFile {
    pub file_id: String,
    #[serde(default)]
    pub file_size: Option<u64>,
    #[serde(default)]
    pub file_path: Option<String>,
}

/// Result of `getMe`.
#[derive(Debug, Clone, Deserialize)]
pub struct BotIdentity {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
}
