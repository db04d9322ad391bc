//! Production transport: a user-session MTProto client built on
//! grammers. Everything above this file talks to the `TelegramClient`
//! trait; this adapter owns connection, interactive sign-in, chat-handle
//! caching and error classification.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use grammers_client::grammers_tl_types as tl;
use grammers_client::types::{Attribute, Chat, Downloadable, Media, Message};
use grammers_client::{Client, Config as SessionConfig, InitParams, InputMessage, SignInError};
use grammers_session::Session;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::message::{AudioMeta, ChatMessage, MediaMeta, MessageKind, PollMeta, VideoMeta};
use super::{ChatInfo, DialogInfo, MediaUpload, TelegramClient, TopicInfo, UploadKind};
use crate::core::config::Config;
use crate::core::error::{CloneError, Result};

const CHANNEL_ID_OFFSET: i64 = 1_000_000_000_000;

pub struct SessionClient {
    client: Client,
    session_path: PathBuf,
    /// Canonical id to platform handle, filled from dialog sweeps.
    chats: Mutex<HashMap<i64, Chat>>,
}

impl SessionClient {
    /// Connect and, if needed, run the interactive sign-in flow.
    pub async fn connect(config: &Config) -> Result<Self> {
        let session_path = config.session_path();
        if let Some(parent) = session_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let session = Session::load_file_or_create(&session_path)?;

        let client = Client::connect(SessionConfig {
            session,
            api_id: config.telegram_api_id,
            api_hash: config.telegram_api_hash.clone(),
            params: InitParams::default(),
        })
        .await
        .map_err(|err| CloneError::Transient(format!("connect: {err}")))?;

        if !client
            .is_authorized()
            .await
            .map_err(classify_invocation)?
        {
            sign_in_interactive(&client).await?;
        }
        client
            .session()
            .save_to_file(&session_path)
            .map_err(CloneError::Io)?;

        let me = client.get_me().await.map_err(classify_invocation)?;
        info!(user = me.full_name(), "signed in");

        Ok(Self {
            client,
            session_path,
            chats: Mutex::new(HashMap::new()),
        })
    }

    fn persist_session(&self) {
        if let Err(err) = self.client.session().save_to_file(&self.session_path) {
            warn!(error = %err, "could not persist session state");
        }
    }

    /// Locate the platform handle for a canonical id, sweeping the dialog
    /// list on a cache miss. User-session clients can only address chats
    /// they have seen.
    async fn chat(&self, chat_id: i64) -> Result<Chat> {
        {
            let chats = self.chats.lock().await;
            if let Some(chat) = chats.get(&chat_id) {
                return Ok(chat.clone());
            }
        }
        self.refresh_dialogs().await?;
        let chats = self.chats.lock().await;
        chats.get(&chat_id).cloned().ok_or_else(|| {
            CloneError::Permanent(format!("no access to chat {chat_id}; not in your dialogs"))
        })
    }

    async fn refresh_dialogs(&self) -> Result<()> {
        let mut dialogs = self.client.iter_dialogs();
        let mut chats = self.chats.lock().await;
        while let Some(dialog) = dialogs.next().await.map_err(classify_invocation)? {
            let chat = dialog.chat().clone();
            chats.insert(canonical_id(&chat), chat);
        }
        debug!(known = chats.len(), "dialog sweep complete");
        self.persist_session();
        Ok(())
    }

    async fn input_channel(&self, chat_id: i64) -> Result<tl::enums::InputChannel> {
        let chat = self.chat(chat_id).await?;
        let packed = chat.pack();
        Ok(tl::enums::InputChannel::Channel(tl::types::InputChannel {
            channel_id: packed.id,
            access_hash: packed.access_hash.unwrap_or(0),
        }))
    }

    async fn input_peer(&self, chat_id: i64) -> Result<tl::enums::InputPeer> {
        let chat = self.chat(chat_id).await?;
        Ok(chat.pack().to_input_peer())
    }

    async fn message(&self, chat_id: i64, message_id: i64) -> Result<Option<Message>> {
        let chat = self.chat(chat_id).await?;
        let mut messages = self
            .client
            .get_messages_by_id(&chat, &[message_id as i32])
            .await
            .map_err(classify_invocation)?;
        Ok(messages.pop().flatten())
    }
}

async fn sign_in_interactive(client: &Client) -> Result<()> {
    let io_err = |err: inquire::InquireError| CloneError::Io(std::io::Error::other(err.to_string()));

    let phone = inquire::Text::new("Phone number (international format):")
        .prompt()
        .map_err(io_err)?;
    let token = client
        .request_login_code(phone.trim())
        .await
        .map_err(|err| CloneError::Permanent(format!("login code request: {err}")))?;
    let code = inquire::Text::new("Login code:").prompt().map_err(io_err)?;

    match client.sign_in(&token, code.trim()).await {
        Ok(_) => Ok(()),
        Err(SignInError::PasswordRequired(password_token)) => {
            let hint = password_token.hint().unwrap_or("none");
            let prompt = format!("Two-step password (hint: {hint}):");
            let password = inquire::Password::new(&prompt)
                .without_confirmation()
                .prompt()
                .map_err(io_err)?;
            client
                .check_password(password_token, password.trim())
                .await
                .map_err(|err| CloneError::Permanent(format!("password check: {err}")))?;
            Ok(())
        }
        Err(err) => Err(CloneError::Permanent(format!("sign in: {err}"))),
    }
}

/// Canonical ids follow the platform's client convention: users positive,
/// small groups negated, channels offset below -10^12.
fn canonical_id(chat: &Chat) -> i64 {
    match chat {
        Chat::User(user) => user.id(),
        Chat::Group(group) => -group.id(),
        Chat::Channel(channel) => -CHANNEL_ID_OFFSET - channel.id(),
    }
}

fn classify_invocation(err: grammers_client::InvocationError) -> CloneError {
    use grammers_client::InvocationError;
    match err {
        InvocationError::Rpc(rpc) => {
            if rpc.name.starts_with("FLOOD_WAIT") {
                return CloneError::RateLimited(u64::from(rpc.value.unwrap_or(1)));
            }
            if rpc.name == "CHAT_FORWARDS_RESTRICTED" {
                return CloneError::Restricted;
            }
            if rpc.code >= 500 {
                CloneError::Transient(format!("{} ({})", rpc.name, rpc.code))
            } else {
                CloneError::Permanent(format!("{} ({})", rpc.name, rpc.code))
            }
        }
        other => CloneError::Transient(other.to_string()),
    }
}

/// Map a platform message onto the processor's tagged variant. Kinds with
/// no representation at all (dice, venues, live locations, link previews)
/// surface as `Unsupported` and are skipped downstream.
fn convert_message(message: &Message) -> ChatMessage {
    let text = message.text().to_string();
    let (kind, caption) = match message.media() {
        None => {
            if text.is_empty() {
                (MessageKind::Service, None)
            } else {
                (MessageKind::Text { body: text }, None)
            }
        }
        Some(media) => {
            let caption = if text.is_empty() { None } else { Some(text) };
            (convert_media(&media), caption)
        }
    };
    ChatMessage {
        id: i64::from(message.id()),
        date: message.date(),
        caption,
        kind,
    }
}

fn convert_media(media: &Media) -> MessageKind {
    match media {
        Media::Photo(_) => MessageKind::Photo(MediaMeta {
            file_name: None,
            mime_type: Some("image/jpeg".to_string()),
            size: 0,
        }),
        Media::Sticker(_) => MessageKind::Sticker(MediaMeta {
            file_name: None,
            mime_type: Some("image/webp".to_string()),
            size: 0,
        }),
        Media::Document(document) => {
            let meta = MediaMeta {
                file_name: if document.name().is_empty() {
                    None
                } else {
                    Some(document.name().to_string())
                },
                mime_type: document.mime_type().map(|mime| mime.to_string()),
                size: document.size() as u64,
            };
            classify_document(meta)
        }
        // Polls and locations forward natively by id; classify them so the
        // forward path carries them instead of dropping them.
        Media::Poll(poll) => {
            let question = match poll.question() {
                tl::enums::TextWithEntities::Entities(text) => text.text.as_str(),
            };
            poll_kind(question)
        }
        Media::Geo(geo) => location_kind(geo.raw.lat, geo.raw.long),
        other => MessageKind::Unsupported {
            description: format!("{other:?}")
                .split('(')
                .next()
                .unwrap_or("media")
                .to_ascii_lowercase(),
        },
    }
}

/// Poll metadata visible through the transport. Only the question is
/// exposed here; answers would matter to the re-upload path alone, which
/// this adapter declines (see `send_poll`).
fn poll_kind(question: &str) -> MessageKind {
    MessageKind::Poll(PollMeta {
        question: question.to_string(),
        options: Vec::new(),
        anonymous: true,
        multiple_choice: false,
    })
}

fn location_kind(latitude: f64, longitude: f64) -> MessageKind {
    MessageKind::Location {
        latitude,
        longitude,
    }
}

/// The platform models videos, audio, voice notes and animations as
/// documents; recover the richer kind from the mime type and name.
fn classify_document(meta: MediaMeta) -> MessageKind {
    let mime = meta.mime_type.as_deref().unwrap_or("");
    let name = meta.file_name.as_deref().unwrap_or("");

    if mime == "image/gif" || name.to_ascii_lowercase().ends_with(".gif") {
        return MessageKind::Animation(VideoMeta {
            media: meta,
            ..VideoMeta::default()
        });
    }
    if mime.starts_with("video/") {
        return MessageKind::Video(VideoMeta {
            media: meta,
            ..VideoMeta::default()
        });
    }
    if mime == "audio/ogg" {
        return MessageKind::Voice(AudioMeta {
            media: meta,
            ..AudioMeta::default()
        });
    }
    if mime.starts_with("audio/") {
        return MessageKind::Audio(AudioMeta {
            media: meta,
            ..AudioMeta::default()
        });
    }
    MessageKind::Document(meta)
}

#[async_trait]
impl TelegramClient for SessionClient {
    async fn get_chat(&self, chat_id: i64) -> Result<ChatInfo> {
        let chat = self.chat(chat_id).await?;
        let title = chat.name().to_string();

        // Description and the protected-content bit only come with the
        // full-channel view; degrade gracefully for other chat kinds.
        let (description, restricted) = match self.input_channel(chat_id).await {
            Ok(channel) => {
                match self
                    .client
                    .invoke(&tl::functions::channels::GetFullChannel { channel })
                    .await
                {
                    Ok(tl::enums::messages::ChatFull::Full(full)) => {
                        let description = match &full.full_chat {
                            tl::enums::ChatFull::ChannelFull(channel_full) => {
                                Some(channel_full.about.clone()).filter(|about| !about.is_empty())
                            }
                            tl::enums::ChatFull::Full(chat_full) => {
                                Some(chat_full.about.clone()).filter(|about| !about.is_empty())
                            }
                        };
                        let restricted = full.chats.iter().any(|c| match c {
                            tl::enums::Chat::Channel(channel) => channel.noforwards,
                            _ => false,
                        });
                        (description, restricted)
                    }
                    Err(err) => {
                        debug!(chat_id, error = %classify_invocation(err), "full channel view unavailable");
                        (None, false)
                    }
                }
            }
            Err(_) => (None, false),
        };

        Ok(ChatInfo {
            id: chat_id,
            title,
            description,
            restricted,
        })
    }

    async fn latest_message_id(&self, chat_id: i64) -> Result<Option<i64>> {
        let chat = self.chat(chat_id).await?;
        let mut iter = self.client.iter_messages(&chat).limit(1);
        match iter.next().await.map_err(classify_invocation)? {
            Some(message) => Ok(Some(i64::from(message.id()))),
            None => Ok(None),
        }
    }

    async fn get_message(&self, chat_id: i64, message_id: i64) -> Result<Option<ChatMessage>> {
        Ok(self
            .message(chat_id, message_id)
            .await?
            .map(|message| convert_message(&message)))
    }

    async fn send_text(&self, chat_id: i64, body: &str, reply_to: Option<i64>) -> Result<i64> {
        let chat = self.chat(chat_id).await?;
        let mut input = InputMessage::text(body);
        if let Some(topic_id) = reply_to {
            input = input.reply_to(Some(topic_id as i32));
        }
        let sent = self
            .client
            .send_message(&chat, input)
            .await
            .map_err(classify_invocation)?;
        Ok(i64::from(sent.id()))
    }

    async fn send_media(&self, chat_id: i64, upload: &MediaUpload) -> Result<i64> {
        let chat = self.chat(chat_id).await?;
        let uploaded = self
            .client
            .upload_file(&upload.path)
            .await
            .map_err(|err| CloneError::Transient(format!("upload: {err}")))?;

        let caption = upload.caption.clone().unwrap_or_default();
        let duration =
            std::time::Duration::from_secs(u64::from(upload.duration_secs.unwrap_or(0)));
        let width = upload.width.unwrap_or(0) as i32;
        let height = upload.height.unwrap_or(0) as i32;

        // Attach the attributes the platform uses to render each kind;
        // without them a video arrives as a plain, non-streamable file.
        let mut input = InputMessage::text(caption);
        input = match upload.kind {
            UploadKind::Photo => input.photo(uploaded),
            UploadKind::Video | UploadKind::Animation => {
                input.document(uploaded).attribute(Attribute::Video {
                    round_message: false,
                    supports_streaming: true,
                    duration,
                    w: width,
                    h: height,
                })
            }
            UploadKind::VideoNote => input.document(uploaded).attribute(Attribute::Video {
                round_message: true,
                supports_streaming: false,
                duration,
                w: width,
                h: height,
            }),
            UploadKind::Audio => input.document(uploaded).attribute(Attribute::Audio {
                duration,
                title: upload.title.clone(),
                performer: upload.performer.clone(),
            }),
            UploadKind::Voice => input.document(uploaded).attribute(Attribute::Voice {
                duration,
                waveform: None,
            }),
            UploadKind::Sticker | UploadKind::Document => input.document(uploaded),
        };
        if let Some(mime) = &upload.mime_type {
            input = input.mime_type(mime);
        }

        let sent = self
            .client
            .send_message(&chat, input)
            .await
            .map_err(classify_invocation)?;
        Ok(i64::from(sent.id()))
    }

    async fn send_poll(&self, _chat_id: i64, poll: &PollMeta) -> Result<i64> {
        // Reached only on the re-upload path. The transport does not expose
        // enough of the poll to reconstruct it; the engine skips the message
        // and advances the checkpoint on this error.
        Err(CloneError::Unsupported(format!(
            "poll ({:?})",
            poll.question
        )))
    }

    async fn send_location(&self, _chat_id: i64, _latitude: f64, _longitude: f64) -> Result<i64> {
        // Same contract as `send_poll`: skipped, never fatal.
        Err(CloneError::Unsupported("location".into()))
    }

    async fn forward_message(
        &self,
        origin_chat_id: i64,
        message_id: i64,
        destination_chat_id: i64,
    ) -> Result<i64> {
        let origin = self.chat(origin_chat_id).await?;
        let destination = self.chat(destination_chat_id).await?;
        let forwarded = self
            .client
            .forward_messages(&destination, &[message_id as i32], &origin)
            .await
            .map_err(classify_invocation)?;
        forwarded
            .into_iter()
            .flatten()
            .next()
            .map(|message| i64::from(message.id()))
            .ok_or_else(|| CloneError::Permanent("forward produced no message".into()))
    }

    async fn download_media(
        &self,
        chat_id: i64,
        message_id: i64,
        destination: &Path,
    ) -> Result<u64> {
        let message = self.message(chat_id, message_id).await?.ok_or_else(|| {
            CloneError::Permanent(format!("message {message_id} vanished before download"))
        })?;
        let media = message
            .media()
            .ok_or_else(|| CloneError::Permanent(format!("message {message_id} has no media")))?;

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        self.client
            .download_media(&Downloadable::Media(media), destination)
            .await
            .map_err(|err| CloneError::Transient(format!("download: {err}")))?;
        Ok(tokio::fs::metadata(destination).await?.len())
    }

    async fn create_channel(&self, title: &str, description: &str) -> Result<i64> {
        let updates = self
            .client
            .invoke(&tl::functions::channels::CreateChannel {
                broadcast: true,
                megagroup: false,
                for_import: false,
                forum: false,
                title: title.to_string(),
                about: description.to_string(),
                geo_point: None,
                address: None,
                ttl_period: None,
            })
            .await
            .map_err(classify_invocation)?;

        let channel_id = channel_id_from_updates(&updates).ok_or_else(|| {
            CloneError::Permanent("channel creation returned no channel".into())
        })?;
        let canonical = -CHANNEL_ID_OFFSET - channel_id;

        // Pull the new channel into the handle cache before anyone writes
        // to it.
        self.refresh_dialogs().await?;
        Ok(canonical)
    }

    async fn set_chat_description(&self, chat_id: i64, description: &str) -> Result<()> {
        let peer = self.input_peer(chat_id).await?;
        self.client
            .invoke(&tl::functions::messages::EditChatAbout {
                peer,
                about: description.to_string(),
            })
            .await
            .map_err(classify_invocation)?;
        Ok(())
    }

    async fn resolve_username(&self, username: &str) -> Result<i64> {
        let chat = self
            .client
            .resolve_username(username)
            .await
            .map_err(classify_invocation)?
            .ok_or_else(|| CloneError::Permanent(format!("unknown username {username}")))?;
        let canonical = canonical_id(&chat);
        self.chats.lock().await.insert(canonical, chat);
        Ok(canonical)
    }

    async fn pinned_message_ids(&self, chat_id: i64) -> Result<Vec<i64>> {
        let chat = self.chat(chat_id).await?;
        let mut iter = self
            .client
            .search_messages(&chat)
            .filter(tl::enums::MessagesFilter::InputMessagesFilterPinned);
        let mut ids = Vec::new();
        while let Some(message) = iter.next().await.map_err(classify_invocation)? {
            ids.push(i64::from(message.id()));
        }
        Ok(ids)
    }

    async fn pin_message(&self, chat_id: i64, message_id: i64) -> Result<()> {
        let chat = self.chat(chat_id).await?;
        self.client
            .pin_message(&chat, message_id as i32)
            .await
            .map_err(classify_invocation)?;
        Ok(())
    }

    async fn export_invite_link(&self, chat_id: i64) -> Result<String> {
        let peer = self.input_peer(chat_id).await?;
        let exported = self
            .client
            .invoke(&tl::functions::messages::ExportChatInvite {
                legacy_revoke_permanent: false,
                request_needed: false,
                peer,
                expire_date: None,
                usage_limit: None,
                title: None,
                subscription_pricing: None,
            })
            .await
            .map_err(classify_invocation)?;
        match exported {
            tl::enums::ExportedChatInvite::ChatInviteExported(invite) => Ok(invite.link),
            _ => Err(CloneError::Permanent("unexpected invite kind".into())),
        }
    }

    async fn leave_chat(&self, chat_id: i64) -> Result<()> {
        let chat = self.chat(chat_id).await?;
        self.client
            .delete_dialog(&chat)
            .await
            .map_err(classify_invocation)?;
        self.chats.lock().await.remove(&chat_id);
        Ok(())
    }

    async fn list_dialogs(&self) -> Result<Vec<DialogInfo>> {
        self.refresh_dialogs().await?;
        let chats = self.chats.lock().await;
        let mut dialogs: Vec<DialogInfo> = chats
            .values()
            .map(|chat| DialogInfo {
                chat_id: canonical_id(chat),
                title: chat.name().to_string(),
                kind: match chat {
                    Chat::User(_) => "user",
                    Chat::Group(_) => "group",
                    Chat::Channel(_) => "channel",
                },
            })
            .collect();
        dialogs.sort_by(|a, b| a.title.cmp(&b.title));
        Ok(dialogs)
    }

    async fn list_forum_topics(&self, chat_id: i64) -> Result<Vec<TopicInfo>> {
        let channel = self.input_channel(chat_id).await?;
        let result = self
            .client
            .invoke(&tl::functions::channels::GetForumTopics {
                channel,
                q: None,
                offset_date: 0,
                offset_id: 0,
                offset_topic: 0,
                limit: 100,
            })
            .await
            .map_err(classify_invocation)?;

        let tl::enums::messages::ForumTopics::Topics(topics) = result;
        Ok(topics
            .topics
            .into_iter()
            .filter_map(|topic| match topic {
                tl::enums::ForumTopic::Topic(topic) => Some(TopicInfo {
                    id: i64::from(topic.id),
                    title: topic.title,
                }),
                _ => None,
            })
            .collect())
    }
}

fn channel_id_from_updates(updates: &tl::enums::Updates) -> Option<i64> {
    let chats = match updates {
        tl::enums::Updates::Combined(combined) => &combined.chats,
        tl::enums::Updates::Updates(updates) => &updates.chats,
        _ => return None,
    };
    chats.iter().find_map(|chat| match chat {
        tl::enums::Chat::Channel(channel) => Some(channel.id),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::{classify_document, location_kind, poll_kind};
    use crate::core::telegram::message::{MediaMeta, MessageKind};

    fn meta(file_name: Option<&str>, mime: &str) -> MediaMeta {
        MediaMeta {
            file_name: file_name.map(str::to_string),
            mime_type: Some(mime.to_string()),
            size: 1024,
        }
    }

    #[test]
    fn documents_recover_the_richer_kinds() {
        assert!(matches!(
            classify_document(meta(Some("clip.mp4"), "video/mp4")),
            MessageKind::Video(_)
        ));
        assert!(matches!(
            classify_document(meta(Some("loop.gif"), "image/gif")),
            MessageKind::Animation(_)
        ));
        assert!(matches!(
            classify_document(meta(None, "audio/ogg")),
            MessageKind::Voice(_)
        ));
        assert!(matches!(
            classify_document(meta(Some("song.mp3"), "audio/mpeg")),
            MessageKind::Audio(_)
        ));
        assert!(matches!(
            classify_document(meta(Some("notes.pdf"), "application/pdf")),
            MessageKind::Document(_)
        ));
    }

    #[test]
    fn polls_and_locations_classify_as_their_own_kinds() {
        // These kinds must survive conversion so the forward strategy can
        // carry them by id.
        match poll_kind("Favourite module?") {
            MessageKind::Poll(poll) => assert_eq!(poll.question, "Favourite module?"),
            other => panic!("expected a poll, got {other:?}"),
        }
        match location_kind(51.5, -0.12) {
            MessageKind::Location {
                latitude,
                longitude,
            } => {
                assert_eq!(latitude, 51.5);
                assert_eq!(longitude, -0.12);
            }
            other => panic!("expected a location, got {other:?}"),
        }
    }
}
