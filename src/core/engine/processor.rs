use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::core::cancel::CancelToken;
use crate::core::error::{CloneError, Result};
use crate::core::media;
use crate::core::store::CloningStrategy;
use crate::core::telegram::message::{ChatMessage, MessageKind};
use crate::core::telegram::retry::{self, RetryPolicy};
use crate::core::telegram::{MediaUpload, TelegramClient, UploadKind};

/// Documented platform limit for media captions.
pub const CAPTION_LIMIT: usize = 1024;

/// Per-message dispatch across media kinds and the two transport
/// strategies. Guarantees either delivery (returning the destination
/// message id), an explicit skip (`None`), or a well-typed failure.
pub struct MessageProcessor {
    client: Arc<dyn TelegramClient>,
    retry: RetryPolicy,
    cancel: CancelToken,
    extract_audio: bool,
    transcode_limit: Duration,
}

impl MessageProcessor {
    pub fn new(
        client: Arc<dyn TelegramClient>,
        cancel: CancelToken,
        extract_audio: bool,
        transcode_limit: Duration,
    ) -> Self {
        Self {
            client,
            retry: RetryPolicy::default(),
            cancel,
            extract_audio,
            transcode_limit,
        }
    }

    /// Deliver one message to the destination. `Ok(None)` means the message
    /// was skipped (service or unsupported content) and the checkpoint may
    /// still advance.
    pub async fn process(
        &self,
        strategy: CloningStrategy,
        message: &ChatMessage,
        origin_chat_id: i64,
        destination_chat_id: i64,
        scratch_dir: &Path,
    ) -> Result<Option<i64>> {
        match &message.kind {
            MessageKind::Service => {
                debug!(message_id = message.id, "skipping service message");
                return Ok(None);
            }
            MessageKind::Unsupported { description } => {
                // A caption on an unsupported kind is dropped along with it.
                warn!(
                    message_id = message.id,
                    kind = description.as_str(),
                    "unsupported message kind, skipping"
                );
                return Ok(None);
            }
            _ => {}
        }

        match strategy {
            CloningStrategy::Forward => {
                let sent = retry::call(&self.retry, &self.cancel, "forward_message", || {
                    self.client
                        .forward_message(origin_chat_id, message.id, destination_chat_id)
                })
                .await?;
                Ok(Some(sent))
            }
            CloningStrategy::DownloadUpload => {
                self.reupload(message, origin_chat_id, destination_chat_id, scratch_dir)
                    .await
            }
        }
    }

    async fn reupload(
        &self,
        message: &ChatMessage,
        origin_chat_id: i64,
        destination_chat_id: i64,
        scratch_dir: &Path,
    ) -> Result<Option<i64>> {
        match &message.kind {
            MessageKind::Text { body } => {
                let body = body.clone();
                let sent = retry::call(&self.retry, &self.cancel, "send_text", || {
                    self.client.send_text(destination_chat_id, &body, None)
                })
                .await?;
                Ok(Some(sent))
            }
            MessageKind::Poll(poll) => {
                let sent = retry::call(&self.retry, &self.cancel, "send_poll", || {
                    self.client.send_poll(destination_chat_id, poll)
                })
                .await?;
                Ok(Some(sent))
            }
            MessageKind::Location {
                latitude,
                longitude,
            } => {
                let (latitude, longitude) = (*latitude, *longitude);
                let sent = retry::call(&self.retry, &self.cancel, "send_location", || {
                    self.client
                        .send_location(destination_chat_id, latitude, longitude)
                })
                .await?;
                Ok(Some(sent))
            }
            kind if kind.has_payload() => {
                self.reupload_payload(message, origin_chat_id, destination_chat_id, scratch_dir)
                    .await
            }
            kind => {
                warn!(
                    message_id = message.id,
                    kind = kind.name(),
                    "no re-upload path for this kind, skipping"
                );
                Ok(None)
            }
        }
    }

    async fn reupload_payload(
        &self,
        message: &ChatMessage,
        origin_chat_id: i64,
        destination_chat_id: i64,
        scratch_dir: &Path,
    ) -> Result<Option<i64>> {
        let Some(payload) = self
            .download_payload(message, origin_chat_id, scratch_dir)
            .await?
        else {
            return Ok(None);
        };

        // Audio extraction is a side effect; its failure never blocks the
        // upload of the video itself.
        if message.kind.is_video() && self.extract_audio {
            match media::extract_audio(&payload, self.transcode_limit).await {
                Ok(audio) => debug!(audio = %audio.display(), "audio sibling written"),
                Err(err) => warn!(
                    message_id = message.id,
                    error = %err,
                    "audio extraction failed, keeping the video"
                ),
            }
        }

        let upload = build_upload(message, payload.clone());
        let sent = retry::call(&self.retry, &self.cancel, "send_media", || {
            self.client.send_media(destination_chat_id, &upload)
        })
        .await?;

        // The payload is scratch data once delivered; extracted audio stays.
        if let Err(err) = tokio::fs::remove_file(&payload).await {
            warn!(path = %payload.display(), error = %err, "could not clean scratch file");
        }

        Ok(Some(sent))
    }

    /// Fetch the payload into the scratch directory. A zero-byte result is
    /// treated as transient once; if the retry also comes back empty, the
    /// message is logged and skipped.
    async fn download_payload(
        &self,
        message: &ChatMessage,
        origin_chat_id: i64,
        scratch_dir: &Path,
    ) -> Result<Option<PathBuf>> {
        let target = scratch_dir.join(scratch_file_name(message));
        tokio::fs::create_dir_all(scratch_dir).await?;

        for attempt in 0..2 {
            let bytes = retry::call(&self.retry, &self.cancel, "download_media", || {
                self.client.download_media(origin_chat_id, message.id, &target)
            })
            .await?;
            if bytes > 0 {
                info!(
                    message_id = message.id,
                    bytes,
                    file = %target.display(),
                    "payload downloaded"
                );
                return Ok(Some(target));
            }
            if attempt == 0 {
                warn!(message_id = message.id, "zero-byte download, retrying once");
            }
        }

        let _ = tokio::fs::remove_file(&target).await;
        warn!(
            message_id = message.id,
            "payload still empty after retry, skipping message"
        );
        Ok(None)
    }
}

/// Scratch file name: `<msg_id>-<kind>.<ext>`.
pub fn scratch_file_name(message: &ChatMessage) -> String {
    format!(
        "{}-{}.{}",
        message.id,
        message.kind.name(),
        message.kind.extension_hint()
    )
}

/// Truncate a caption at the platform boundary, marking the cut.
pub fn truncate_caption(caption: &str) -> String {
    if caption.chars().count() <= CAPTION_LIMIT {
        return caption.to_string();
    }
    let mut truncated: String = caption.chars().take(CAPTION_LIMIT - 1).collect();
    truncated.push('…');
    truncated
}

fn build_upload(message: &ChatMessage, path: PathBuf) -> MediaUpload {
    let caption = message.caption.as_deref().map(truncate_caption);
    let mut upload = match &message.kind {
        MessageKind::Photo(_) => MediaUpload::new(path, UploadKind::Photo),
        MessageKind::Sticker(_) => MediaUpload::new(path, UploadKind::Sticker),
        MessageKind::Document(_) => MediaUpload::new(path, UploadKind::Document),
        MessageKind::Video(video) => {
            let mut upload = MediaUpload::new(path, UploadKind::Video);
            upload.duration_secs = Some(video.duration_secs);
            upload.width = Some(video.width);
            upload.height = Some(video.height);
            upload
        }
        MessageKind::Animation(video) => {
            let mut upload = MediaUpload::new(path, UploadKind::Animation);
            upload.duration_secs = Some(video.duration_secs);
            upload.width = Some(video.width);
            upload.height = Some(video.height);
            upload
        }
        MessageKind::VideoNote(video) => {
            let mut upload = MediaUpload::new(path, UploadKind::VideoNote);
            upload.duration_secs = Some(video.duration_secs);
            upload
        }
        MessageKind::Audio(audio) => {
            let mut upload = MediaUpload::new(path, UploadKind::Audio);
            upload.duration_secs = Some(audio.duration_secs);
            upload.title = audio.title.clone();
            upload.performer = audio.performer.clone();
            upload
        }
        MessageKind::Voice(voice) => {
            let mut upload = MediaUpload::new(path, UploadKind::Voice);
            upload.duration_secs = Some(voice.duration_secs);
            upload
        }
        // Reached only via has_payload, which excludes the rest.
        _ => unreachable!("build_upload called for a kind without payload"),
    };
    upload.caption = caption;
    upload.file_name = message.kind.file_name().map(str::to_string);
    upload.mime_type = match &message.kind {
        MessageKind::Video(v) | MessageKind::Animation(v) | MessageKind::VideoNote(v) => {
            v.media.mime_type.clone()
        }
        MessageKind::Audio(a) | MessageKind::Voice(a) => a.media.mime_type.clone(),
        MessageKind::Photo(m) | MessageKind::Sticker(m) | MessageKind::Document(m) => {
            m.mime_type.clone()
        }
        _ => None,
    };
    upload
}
