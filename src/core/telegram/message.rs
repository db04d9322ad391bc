use chrono::{DateTime, Utc};

/// Metadata shared by every downloadable payload.
#[derive(Debug, Clone, Default)]
pub struct MediaMeta {
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
    pub size: u64,
}

#[derive(Debug, Clone, Default)]
pub struct VideoMeta {
    pub media: MediaMeta,
    pub duration_secs: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Default)]
pub struct AudioMeta {
    pub media: MediaMeta,
    pub duration_secs: u32,
    pub title: Option<String>,
    pub performer: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PollMeta {
    pub question: String,
    pub options: Vec<String>,
    pub anonymous: bool,
    pub multiple_choice: bool,
}

/// Tagged variant over the platform's duck-typed message object. The
/// processor is a match over this enum.
#[derive(Debug, Clone)]
pub enum MessageKind {
    Text { body: String },
    Photo(MediaMeta),
    Video(VideoMeta),
    Document(MediaMeta),
    Audio(AudioMeta),
    Voice(AudioMeta),
    Sticker(MediaMeta),
    Animation(VideoMeta),
    VideoNote(VideoMeta),
    Poll(PollMeta),
    Location { latitude: f64, longitude: f64 },
    /// Join/leave/pin notices and other content-free platform events.
    Service,
    Unsupported { description: String },
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub id: i64,
    pub date: DateTime<Utc>,
    pub caption: Option<String>,
    pub kind: MessageKind,
}

impl MessageKind {
    pub fn name(&self) -> &'static str {
        match self {
            MessageKind::Text { .. } => "text",
            MessageKind::Photo(_) => "photo",
            MessageKind::Video(_) => "video",
            MessageKind::Document(_) => "document",
            MessageKind::Audio(_) => "audio",
            MessageKind::Voice(_) => "voice",
            MessageKind::Sticker(_) => "sticker",
            MessageKind::Animation(_) => "animation",
            MessageKind::VideoNote(_) => "video_note",
            MessageKind::Poll(_) => "poll",
            MessageKind::Location { .. } => "location",
            MessageKind::Service => "service",
            MessageKind::Unsupported { .. } => "unsupported",
        }
    }

    /// Whether this kind carries a payload the download-upload strategy must
    /// fetch to local disk.
    pub fn has_payload(&self) -> bool {
        matches!(
            self,
            MessageKind::Photo(_)
                | MessageKind::Video(_)
                | MessageKind::Document(_)
                | MessageKind::Audio(_)
                | MessageKind::Voice(_)
                | MessageKind::Sticker(_)
                | MessageKind::Animation(_)
                | MessageKind::VideoNote(_)
        )
    }

    pub fn is_video(&self) -> bool {
        matches!(self, MessageKind::Video(_))
    }

    fn media_meta(&self) -> Option<&MediaMeta> {
        match self {
            MessageKind::Photo(meta)
            | MessageKind::Document(meta)
            | MessageKind::Sticker(meta) => Some(meta),
            MessageKind::Video(video)
            | MessageKind::Animation(video)
            | MessageKind::VideoNote(video) => Some(&video.media),
            MessageKind::Audio(audio) | MessageKind::Voice(audio) => Some(&audio.media),
            _ => None,
        }
    }

    pub fn file_name(&self) -> Option<&str> {
        self.media_meta().and_then(|meta| meta.file_name.as_deref())
    }

    /// Extension for the scratch file: original name first, then the mime
    /// type, then a per-kind default.
    pub fn extension_hint(&self) -> &str {
        if let Some(name) = self.file_name() {
            if let Some((_, ext)) = name.rsplit_once('.') {
                if !ext.is_empty() && ext.len() <= 5 {
                    return ext;
                }
            }
        }
        if let Some(mime) = self.media_meta().and_then(|meta| meta.mime_type.as_deref()) {
            match mime {
                "image/jpeg" => return "jpg",
                "image/png" => return "png",
                "image/webp" => return "webp",
                "video/mp4" => return "mp4",
                "video/webm" => return "webm",
                "audio/mpeg" => return "mp3",
                "audio/ogg" => return "ogg",
                "audio/flac" => return "flac",
                _ => {}
            }
        }
        match self {
            MessageKind::Photo(_) => "jpg",
            MessageKind::Video(_) | MessageKind::Animation(_) | MessageKind::VideoNote(_) => "mp4",
            MessageKind::Audio(_) => "mp3",
            MessageKind::Voice(_) => "ogg",
            MessageKind::Sticker(_) => "webp",
            _ => "bin",
        }
    }
}
