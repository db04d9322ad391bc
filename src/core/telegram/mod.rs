pub mod message;
pub mod resolver;
pub mod retry;
pub mod session;

#[cfg(test)]
pub mod mock;

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::core::error::Result;
use message::{ChatMessage, PollMeta};

#[derive(Debug, Clone)]
pub struct ChatInfo {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    /// The platform's protected-content bit; forces the download-upload
    /// strategy when set.
    pub restricted: bool,
}

#[derive(Debug, Clone)]
pub struct DialogInfo {
    pub chat_id: i64,
    pub title: String,
    pub kind: &'static str,
}

#[derive(Debug, Clone)]
pub struct TopicInfo {
    pub id: i64,
    pub title: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
    Photo,
    Video,
    Document,
    Audio,
    Voice,
    Sticker,
    Animation,
    VideoNote,
}

/// A local file handed to the kind-appropriate send primitive, with the
/// best-effort metadata the platform accepts.
#[derive(Debug, Clone)]
pub struct MediaUpload {
    pub path: PathBuf,
    pub kind: UploadKind,
    pub caption: Option<String>,
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
    pub duration_secs: Option<u32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub title: Option<String>,
    pub performer: Option<String>,
}

impl MediaUpload {
    pub fn new(path: PathBuf, kind: UploadKind) -> Self {
        Self {
            path,
            kind,
            caption: None,
            file_name: None,
            mime_type: None,
            duration_secs: None,
            width: None,
            height: None,
            title: None,
            performer: None,
        }
    }
}

/// Session-based platform client. Every call classifies its failures into
/// the `CloneError` taxonomy; retrying is the caller's concern (see
/// `retry::call`).
#[async_trait]
pub trait TelegramClient: Send + Sync {
    async fn get_chat(&self, chat_id: i64) -> Result<ChatInfo>;

    /// Id of the newest message in the chat, if any.
    async fn latest_message_id(&self, chat_id: i64) -> Result<Option<i64>>;

    /// Fetch one message by id. `None` for deleted or never-existing ids.
    async fn get_message(&self, chat_id: i64, message_id: i64) -> Result<Option<ChatMessage>>;

    /// `reply_to` carries a forum topic id when publishing into a topic.
    async fn send_text(&self, chat_id: i64, body: &str, reply_to: Option<i64>) -> Result<i64>;

    async fn send_media(&self, chat_id: i64, upload: &MediaUpload) -> Result<i64>;

    async fn send_poll(&self, chat_id: i64, poll: &PollMeta) -> Result<i64>;

    async fn send_location(&self, chat_id: i64, latitude: f64, longitude: f64) -> Result<i64>;

    async fn forward_message(
        &self,
        origin_chat_id: i64,
        message_id: i64,
        destination_chat_id: i64,
    ) -> Result<i64>;

    /// Download the primary payload of a message to `destination`, returning
    /// the byte count written.
    async fn download_media(
        &self,
        chat_id: i64,
        message_id: i64,
        destination: &Path,
    ) -> Result<u64>;

    /// Create a private broadcast channel, returning its canonical id.
    async fn create_channel(&self, title: &str, description: &str) -> Result<i64>;

    async fn set_chat_description(&self, chat_id: i64, description: &str) -> Result<()>;

    async fn resolve_username(&self, username: &str) -> Result<i64>;

    async fn pinned_message_ids(&self, chat_id: i64) -> Result<Vec<i64>>;

    async fn pin_message(&self, chat_id: i64, message_id: i64) -> Result<()>;

    async fn export_invite_link(&self, chat_id: i64) -> Result<String>;

    async fn leave_chat(&self, chat_id: i64) -> Result<()>;

    async fn list_dialogs(&self) -> Result<Vec<DialogInfo>>;

    async fn list_forum_topics(&self, chat_id: i64) -> Result<Vec<TopicInfo>>;
}
