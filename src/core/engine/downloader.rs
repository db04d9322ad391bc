use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use super::{sanitize_file_name, sanitize_title};
use crate::core::cancel::CancelToken;
use crate::core::config::Config;
use crate::core::error::{CloneError, Result};
use crate::core::media;
use crate::core::store::TaskStore;
use crate::core::telegram::TelegramClient;
use crate::core::telegram::message::{ChatMessage, MessageKind};
use crate::core::telegram::retry::{self, RetryPolicy};

#[derive(Debug, Clone, Default)]
pub struct DownloadOptions {
    pub limit: Option<u64>,
    pub output_dir: Option<PathBuf>,
    pub restart: bool,
    pub delete_video: bool,
    /// Rewind the starting checkpoint so ids at or after this value are
    /// fetched again. Never moves the checkpoint forward.
    pub start_message_id: Option<i64>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DownloadReport {
    pub downloaded: u64,
    pub failed: u64,
}

/// Video-only variant of the clone loop: fetch each video newer than the
/// checkpoint, extract its MP3 sibling, and advance the per-video
/// checkpoint.
pub struct DownloadEngine {
    client: Arc<dyn TelegramClient>,
    store: Arc<TaskStore>,
    config: Config,
    options: DownloadOptions,
    cancel: CancelToken,
    retry: RetryPolicy,
}

impl DownloadEngine {
    pub fn new(
        client: Arc<dyn TelegramClient>,
        store: Arc<TaskStore>,
        config: Config,
        options: DownloadOptions,
        cancel: CancelToken,
    ) -> Self {
        Self {
            client,
            store,
            config,
            options,
            cancel,
            retry: RetryPolicy::default(),
        }
    }

    pub async fn run(&self, origin_chat_id: i64) -> Result<DownloadReport> {
        let origin = retry::call(&self.retry, &self.cancel, "get_chat", || {
            self.client.get_chat(origin_chat_id)
        })
        .await?;

        if self.options.restart {
            info!(origin_chat_id, "restart requested, dropping download task");
            self.store.delete_download_task(origin_chat_id).await?;
        }
        self.store
            .create_download_task(origin_chat_id, &origin.title)
            .await?;
        let task = self
            .store
            .get_download_task(origin_chat_id)
            .await?
            .expect("download task exists after create");

        let mut checkpoint = task.last_downloaded_message_id;
        if let Some(start) = self.options.start_message_id {
            checkpoint = checkpoint.min(start - 1);
            info!(origin_chat_id, from = start, "checkpoint rewound by request");
        }
        let mut downloaded = task.downloaded_videos as u64;

        let head = retry::call(&self.retry, &self.cancel, "latest_message_id", || {
            self.client.latest_message_id(origin_chat_id)
        })
        .await?;
        let Some(head) = head else {
            info!(origin_chat_id, "origin has no messages");
            return Ok(DownloadReport::default());
        };

        let output_root = self
            .options
            .output_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("downloads"))
            .join(sanitize_title(&origin.title));

        info!(
            origin_chat_id,
            from = checkpoint + 1,
            to = head,
            output = %output_root.display(),
            "starting video download"
        );

        let mut report = DownloadReport::default();
        let mut seen_videos = 0u64;
        for message_id in (checkpoint + 1)..=head {
            if self.cancel.is_cancelled() {
                return Err(CloneError::Interrupted);
            }
            if let Some(limit) = self.options.limit {
                if report.downloaded >= limit {
                    info!(limit, "download limit reached");
                    break;
                }
            }

            let message = retry::call(&self.retry, &self.cancel, "get_message", || {
                self.client.get_message(origin_chat_id, message_id)
            })
            .await?;
            let Some(message) = message else { continue };
            if !message.kind.is_video() {
                continue;
            }
            seen_videos += 1;

            match self.fetch_video(origin_chat_id, &message, &output_root).await {
                Ok(()) => {
                    downloaded += 1;
                    report.downloaded += 1;
                    self.store
                        .advance_download_progress(origin_chat_id, message_id, downloaded as i64)
                        .await?;
                }
                Err(CloneError::Interrupted) => return Err(CloneError::Interrupted),
                Err(err) => {
                    warn!(message_id, error = %err, "video download failed, moving on");
                    report.failed += 1;
                }
            }

            let delay = self.config.inter_message_delay();
            if !delay.is_zero() {
                tokio::select! {
                    _ = self.cancel.cancelled() => return Err(CloneError::Interrupted),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        // Counters are reporting-only and allowed to lag; refresh them with
        // what this walk observed.
        let total = task.total_videos.max(seen_videos as i64).max(downloaded as i64);
        self.store.set_download_totals(origin_chat_id, total).await?;

        info!(
            origin_chat_id,
            downloaded = report.downloaded,
            failed = report.failed,
            "video download finished"
        );
        Ok(report)
    }

    async fn fetch_video(
        &self,
        origin_chat_id: i64,
        message: &ChatMessage,
        output_root: &PathBuf,
    ) -> Result<()> {
        let file_name = match &message.kind {
            MessageKind::Video(video) => video
                .media
                .file_name
                .clone()
                .unwrap_or_else(|| format!("video.{}", message.kind.extension_hint())),
            _ => unreachable!("fetch_video is only called for videos"),
        };
        let date_dir = message.date.format("%Y-%m-%d").to_string();
        let target_dir = output_root.join(date_dir);
        tokio::fs::create_dir_all(&target_dir).await?;
        let target = target_dir.join(format!("{}-{}", message.id, sanitize_file_name(&file_name)));

        let bytes = retry::call(&self.retry, &self.cancel, "download_media", || {
            self.client.download_media(origin_chat_id, message.id, &target)
        })
        .await?;
        info!(message_id = message.id, bytes, file = %target.display(), "video downloaded");

        match media::extract_audio(&target, self.config.time_limit).await {
            Ok(audio) => {
                info!(audio = %audio.display(), "audio extracted");
                if self.options.delete_video {
                    tokio::fs::remove_file(&target).await?;
                    info!(file = %target.display(), "source video removed");
                }
            }
            Err(err) => {
                // Extraction is best-effort; the video always survives.
                warn!(message_id = message.id, error = %err, "audio extraction failed");
            }
        }
        Ok(())
    }
}
