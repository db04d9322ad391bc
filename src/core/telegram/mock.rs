//! Scriptable in-memory platform client for the engine test suites.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use super::message::{ChatMessage, MessageKind, PollMeta, VideoMeta};
use super::{ChatInfo, DialogInfo, MediaUpload, TelegramClient, TopicInfo};
use crate::core::error::{CloneError, Result};

/// What arrived in a destination chat, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivered {
    Text(String),
    Forward { origin: i64, message_id: i64 },
    Media { kind: &'static str, file_name: String, caption: Option<String> },
    Poll(String),
    Location,
}

#[derive(Default)]
struct MockState {
    chats: HashMap<i64, ChatInfo>,
    usernames: HashMap<String, i64>,
    history: HashMap<i64, HashMap<i64, ChatMessage>>,
    heads: HashMap<i64, i64>,
    pinned: HashMap<i64, Vec<i64>>,
    delivered: HashMap<i64, Vec<Delivered>>,
    pin_calls: Vec<(i64, i64)>,
    next_message_ids: HashMap<i64, i64>,
    next_channel_id: i64,
    left: HashSet<i64>,
    descriptions: HashMap<i64, String>,
    zero_byte: HashSet<(i64, i64)>,
    restricted_forwards: HashSet<i64>,
    decline_poll_resend: bool,
    calls: u64,
    flood_every: Option<(u64, u64)>,
    transient_failures_left: u32,
    broken_from_message_id: Option<i64>,
}

pub struct MockClient {
    state: Mutex<MockState>,
}

impl MockClient {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                next_channel_id: -1009000000001,
                ..MockState::default()
            }),
        }
    }

    pub fn add_chat(&self, id: i64, title: &str, restricted: bool) {
        let mut state = self.state.lock().unwrap();
        state.chats.insert(
            id,
            ChatInfo {
                id,
                title: title.to_string(),
                description: None,
                restricted,
            },
        );
        state.history.entry(id).or_default();
        state.next_message_ids.entry(id).or_insert(1);
    }

    pub fn register_username(&self, username: &str, chat_id: i64) {
        let mut state = self.state.lock().unwrap();
        state.usernames.insert(username.to_string(), chat_id);
    }

    fn push_message(&self, chat_id: i64, kind: MessageKind, caption: Option<String>) -> i64 {
        let mut state = self.state.lock().unwrap();
        let id = {
            let next = state.next_message_ids.entry(chat_id).or_insert(1);
            let id = *next;
            *next += 1;
            id
        };
        let message = ChatMessage {
            id,
            date: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
                + chrono::Duration::minutes(id),
            caption,
            kind,
        };
        state.history.entry(chat_id).or_default().insert(id, message);
        state.heads.insert(chat_id, id);
        id
    }

    pub fn add_text(&self, chat_id: i64, body: &str) -> i64 {
        self.push_message(
            chat_id,
            MessageKind::Text {
                body: body.to_string(),
            },
            None,
        )
    }

    pub fn add_video(&self, chat_id: i64, file_name: &str, caption: Option<&str>) -> i64 {
        self.push_message(
            chat_id,
            MessageKind::Video(VideoMeta {
                media: super::message::MediaMeta {
                    file_name: Some(file_name.to_string()),
                    mime_type: Some("video/mp4".to_string()),
                    size: 2048,
                },
                duration_secs: 60,
                width: 1280,
                height: 720,
            }),
            caption.map(str::to_string),
        )
    }

    pub fn add_poll(&self, chat_id: i64, question: &str) -> i64 {
        self.push_message(
            chat_id,
            MessageKind::Poll(PollMeta {
                question: question.to_string(),
                options: vec!["yes".to_string(), "no".to_string()],
                anonymous: true,
                multiple_choice: false,
            }),
            None,
        )
    }

    pub fn add_location(&self, chat_id: i64, latitude: f64, longitude: f64) -> i64 {
        self.push_message(chat_id, MessageKind::Location { latitude, longitude }, None)
    }

    pub fn add_service(&self, chat_id: i64) -> i64 {
        self.push_message(chat_id, MessageKind::Service, None)
    }

    pub fn add_unsupported(&self, chat_id: i64, description: &str) -> i64 {
        self.push_message(
            chat_id,
            MessageKind::Unsupported {
                description: description.to_string(),
            },
            None,
        )
    }

    pub fn pin(&self, chat_id: i64, message_id: i64) {
        let mut state = self.state.lock().unwrap();
        state.pinned.entry(chat_id).or_default().push(message_id);
    }

    /// Make every `nth` call fail with `RateLimited(seconds)`.
    pub fn flood_every(&self, nth: u64, seconds: u64) {
        let mut state = self.state.lock().unwrap();
        state.flood_every = Some((nth, seconds));
    }

    /// Fail the next `count` calls with a transient error.
    pub fn fail_transient(&self, count: u32) {
        let mut state = self.state.lock().unwrap();
        state.transient_failures_left = count;
    }

    /// Simulate a dead connection from `message_id` on: `get_message` for
    /// any id at or past it fails permanently until `repair` is called.
    pub fn break_from(&self, message_id: i64) {
        let mut state = self.state.lock().unwrap();
        state.broken_from_message_id = Some(message_id);
    }

    pub fn repair(&self) {
        let mut state = self.state.lock().unwrap();
        state.broken_from_message_id = None;
    }

    pub fn mark_forward_restricted(&self, chat_id: i64) {
        let mut state = self.state.lock().unwrap();
        state.restricted_forwards.insert(chat_id);
    }

    pub fn zero_byte_download(&self, chat_id: i64, message_id: i64) {
        let mut state = self.state.lock().unwrap();
        state.zero_byte.insert((chat_id, message_id));
    }

    /// Mirror the production adapter's refusal to reconstruct polls and
    /// locations on the re-upload path.
    pub fn decline_poll_resend(&self) {
        let mut state = self.state.lock().unwrap();
        state.decline_poll_resend = true;
    }

    pub fn delivered(&self, chat_id: i64) -> Vec<Delivered> {
        let state = self.state.lock().unwrap();
        state.delivered.get(&chat_id).cloned().unwrap_or_default()
    }

    pub fn pins_made(&self) -> Vec<(i64, i64)> {
        self.state.lock().unwrap().pin_calls.clone()
    }

    pub fn has_left(&self, chat_id: i64) -> bool {
        self.state.lock().unwrap().left.contains(&chat_id)
    }

    pub fn description_of(&self, chat_id: i64) -> Option<String> {
        self.state.lock().unwrap().descriptions.get(&chat_id).cloned()
    }

    fn record_delivery(state: &mut MockState, chat_id: i64, delivered: Delivered) -> i64 {
        state.delivered.entry(chat_id).or_default().push(delivered);
        let next = state.next_message_ids.entry(chat_id).or_insert(1);
        let id = *next;
        *next += 1;
        state.heads.insert(chat_id, id);
        id
    }

    /// Fault-injection gate crossed by every call.
    fn gate(state: &mut MockState) -> Result<()> {
        state.calls += 1;
        if let Some((nth, seconds)) = state.flood_every {
            if state.calls % nth == 0 {
                return Err(CloneError::RateLimited(seconds));
            }
        }
        if state.transient_failures_left > 0 {
            state.transient_failures_left -= 1;
            return Err(CloneError::Transient("simulated network fault".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl TelegramClient for MockClient {
    async fn get_chat(&self, chat_id: i64) -> Result<ChatInfo> {
        let mut state = self.state.lock().unwrap();
        Self::gate(&mut state)?;
        state
            .chats
            .get(&chat_id)
            .cloned()
            .ok_or_else(|| CloneError::Permanent(format!("no access to chat {chat_id}")))
    }

    async fn latest_message_id(&self, chat_id: i64) -> Result<Option<i64>> {
        let mut state = self.state.lock().unwrap();
        Self::gate(&mut state)?;
        Ok(state.heads.get(&chat_id).copied())
    }

    async fn get_message(&self, chat_id: i64, message_id: i64) -> Result<Option<ChatMessage>> {
        let mut state = self.state.lock().unwrap();
        Self::gate(&mut state)?;
        if let Some(broken_from) = state.broken_from_message_id {
            if message_id >= broken_from {
                return Err(CloneError::Permanent("connection lost".into()));
            }
        }
        Ok(state
            .history
            .get(&chat_id)
            .and_then(|messages| messages.get(&message_id))
            .cloned())
    }

    async fn send_text(&self, chat_id: i64, body: &str, _reply_to: Option<i64>) -> Result<i64> {
        let mut state = self.state.lock().unwrap();
        Self::gate(&mut state)?;
        Ok(Self::record_delivery(
            &mut state,
            chat_id,
            Delivered::Text(body.to_string()),
        ))
    }

    async fn send_media(&self, chat_id: i64, upload: &MediaUpload) -> Result<i64> {
        let mut state = self.state.lock().unwrap();
        Self::gate(&mut state)?;
        let kind = match upload.kind {
            super::UploadKind::Photo => "photo",
            super::UploadKind::Video => "video",
            super::UploadKind::Document => "document",
            super::UploadKind::Audio => "audio",
            super::UploadKind::Voice => "voice",
            super::UploadKind::Sticker => "sticker",
            super::UploadKind::Animation => "animation",
            super::UploadKind::VideoNote => "video_note",
        };
        let file_name = upload
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self::record_delivery(
            &mut state,
            chat_id,
            Delivered::Media {
                kind,
                file_name,
                caption: upload.caption.clone(),
            },
        ))
    }

    async fn send_poll(&self, chat_id: i64, poll: &PollMeta) -> Result<i64> {
        let mut state = self.state.lock().unwrap();
        Self::gate(&mut state)?;
        if state.decline_poll_resend {
            return Err(CloneError::Unsupported(format!("poll ({:?})", poll.question)));
        }
        Ok(Self::record_delivery(
            &mut state,
            chat_id,
            Delivered::Poll(poll.question.clone()),
        ))
    }

    async fn send_location(&self, chat_id: i64, _latitude: f64, _longitude: f64) -> Result<i64> {
        let mut state = self.state.lock().unwrap();
        Self::gate(&mut state)?;
        if state.decline_poll_resend {
            return Err(CloneError::Unsupported("location".into()));
        }
        Ok(Self::record_delivery(&mut state, chat_id, Delivered::Location))
    }

    async fn forward_message(
        &self,
        origin_chat_id: i64,
        message_id: i64,
        destination_chat_id: i64,
    ) -> Result<i64> {
        let mut state = self.state.lock().unwrap();
        Self::gate(&mut state)?;
        if state.restricted_forwards.contains(&origin_chat_id) {
            return Err(CloneError::Restricted);
        }
        Ok(Self::record_delivery(
            &mut state,
            destination_chat_id,
            Delivered::Forward {
                origin: origin_chat_id,
                message_id,
            },
        ))
    }

    async fn download_media(
        &self,
        chat_id: i64,
        message_id: i64,
        destination: &Path,
    ) -> Result<u64> {
        let payload: &[u8] = {
            let mut state = self.state.lock().unwrap();
            Self::gate(&mut state)?;
            if state.zero_byte.contains(&(chat_id, message_id)) {
                b""
            } else {
                b"mock media payload"
            }
        };
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(destination, payload).await?;
        Ok(payload.len() as u64)
    }

    async fn create_channel(&self, title: &str, description: &str) -> Result<i64> {
        let mut state = self.state.lock().unwrap();
        Self::gate(&mut state)?;
        let id = state.next_channel_id;
        state.next_channel_id -= 1;
        state.chats.insert(
            id,
            ChatInfo {
                id,
                title: title.to_string(),
                description: Some(description.to_string()),
                restricted: false,
            },
        );
        state.next_message_ids.insert(id, 1);
        Ok(id)
    }

    async fn set_chat_description(&self, chat_id: i64, description: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        Self::gate(&mut state)?;
        state.descriptions.insert(chat_id, description.to_string());
        Ok(())
    }

    async fn resolve_username(&self, username: &str) -> Result<i64> {
        let mut state = self.state.lock().unwrap();
        Self::gate(&mut state)?;
        state
            .usernames
            .get(username)
            .copied()
            .ok_or_else(|| CloneError::Permanent(format!("unknown username {username}")))
    }

    async fn pinned_message_ids(&self, chat_id: i64) -> Result<Vec<i64>> {
        let mut state = self.state.lock().unwrap();
        Self::gate(&mut state)?;
        // The platform reports pins newest-first.
        let mut ids = state.pinned.get(&chat_id).cloned().unwrap_or_default();
        ids.sort_unstable_by(|a, b| b.cmp(a));
        Ok(ids)
    }

    async fn pin_message(&self, chat_id: i64, message_id: i64) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        Self::gate(&mut state)?;
        state.pin_calls.push((chat_id, message_id));
        Ok(())
    }

    async fn export_invite_link(&self, chat_id: i64) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        Self::gate(&mut state)?;
        Ok(format!("https://t.me/+invite{}", chat_id.unsigned_abs()))
    }

    async fn leave_chat(&self, chat_id: i64) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        Self::gate(&mut state)?;
        state.left.insert(chat_id);
        Ok(())
    }

    async fn list_dialogs(&self) -> Result<Vec<DialogInfo>> {
        let mut state = self.state.lock().unwrap();
        Self::gate(&mut state)?;
        let mut dialogs: Vec<DialogInfo> = state
            .chats
            .values()
            .map(|chat| DialogInfo {
                chat_id: chat.id,
                title: chat.title.clone(),
                kind: "channel",
            })
            .collect();
        dialogs.sort_by_key(|dialog| dialog.chat_id);
        Ok(dialogs)
    }

    async fn list_forum_topics(&self, _chat_id: i64) -> Result<Vec<TopicInfo>> {
        let mut state = self.state.lock().unwrap();
        Self::gate(&mut state)?;
        Ok(Vec::new())
    }
}
