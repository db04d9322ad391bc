mod downloader;
mod processor;

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

pub use downloader::{DownloadEngine, DownloadOptions, DownloadReport};
pub use processor::MessageProcessor;

use crate::core::cancel::CancelToken;
use crate::core::config::Config;
use crate::core::error::{CloneError, Result};
use crate::core::links;
use crate::core::store::{CloningStrategy, SyncTask, TaskStore};
use crate::core::telegram::retry::{self, RetryPolicy};
use crate::core::telegram::{ChatInfo, TelegramClient, resolver};

#[derive(Debug, Clone, Default)]
pub struct CloneOptions {
    pub force_download: bool,
    pub extract_audio: bool,
    pub restart: bool,
    pub leave_origin: bool,
    pub destination_chat_id: Option<i64>,
    pub publish_chat_id: Option<i64>,
    pub topic_id: Option<i64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Idempotent, resumable clone loop for one origin chat at a time.
///
/// Walks the source strictly ascending from the stored checkpoint, delivers
/// each message through the processor, and advances the checkpoint only
/// after the destination write is acknowledged.
pub struct ClonerEngine {
    client: Arc<dyn TelegramClient>,
    store: Arc<TaskStore>,
    config: Config,
    options: CloneOptions,
    cancel: CancelToken,
    processor: MessageProcessor,
    retry: RetryPolicy,
    /// Source-to-destination id translation for this run, consumed by the
    /// pinned-message replication pass.
    id_map: HashMap<i64, i64>,
}

impl ClonerEngine {
    pub fn new(
        client: Arc<dyn TelegramClient>,
        store: Arc<TaskStore>,
        config: Config,
        options: CloneOptions,
        cancel: CancelToken,
    ) -> Self {
        let processor = MessageProcessor::new(
            client.clone(),
            cancel.clone(),
            options.extract_audio,
            config.time_limit,
        );
        Self {
            client,
            store,
            config,
            options,
            cancel,
            processor,
            retry: RetryPolicy::default(),
            id_map: HashMap::new(),
        }
    }

    /// Clone one chat to completion (or to the next interruption).
    pub async fn sync_chat(&mut self, origin_chat_id: i64) -> Result<()> {
        self.id_map.clear();

        if self.options.restart {
            info!(origin_chat_id, "restart requested, dropping existing task");
            self.store.delete_sync_task(origin_chat_id).await?;
        }

        let task = self.get_or_create_task(origin_chat_id).await?;
        let destination_chat_id = task
            .destination_chat_id
            .ok_or_else(|| CloneError::Permanent("task has no destination chat".into()))?;
        let mut strategy = task.cloning_strategy;
        let scratch_dir = self.scratch_dir_for(origin_chat_id, &task.origin_chat_title);

        let head = retry::call(&self.retry, &self.cancel, "latest_message_id", || {
            self.client.latest_message_id(origin_chat_id)
        })
        .await?;
        let Some(head) = head else {
            info!(origin_chat_id, "origin has no messages");
            self.post_clone_actions(&task, destination_chat_id).await?;
            return Ok(());
        };

        let start = task.last_synced_message_id + 1;
        if start > head {
            info!(origin_chat_id, head, "nothing new to sync");
            self.post_clone_actions(&task, destination_chat_id).await?;
            return Ok(());
        }
        info!(
            origin_chat_id,
            destination_chat_id,
            from = start,
            to = head,
            strategy = strategy.as_str(),
            "starting sync"
        );

        let mut processed = 0u64;
        for message_id in start..=head {
            if self.cancel.is_cancelled() {
                info!(origin_chat_id, message_id, "interrupted, checkpoint committed");
                return Err(CloneError::Interrupted);
            }

            let message = retry::call(&self.retry, &self.cancel, "get_message", || {
                self.client.get_message(origin_chat_id, message_id)
            })
            .await?;

            let Some(message) = message else {
                // Deleted or never-existing id; counts as synced.
                self.store
                    .advance_sync_progress(origin_chat_id, message_id)
                    .await?;
                continue;
            };

            let delivered = match self
                .processor
                .process(strategy, &message, origin_chat_id, destination_chat_id, &scratch_dir)
                .await
            {
                Ok(delivered) => delivered,
                // Restricted content downgrades the strategy exactly once,
                // then the same message is re-processed by re-upload.
                Err(CloneError::Restricted) if strategy == CloningStrategy::Forward => {
                    warn!(
                        origin_chat_id,
                        message_id, "source restricts forwarding, downgrading to download_upload"
                    );
                    self.store
                        .update_sync_strategy(origin_chat_id, CloningStrategy::DownloadUpload)
                        .await?;
                    strategy = CloningStrategy::DownloadUpload;
                    match self
                        .processor
                        .process(strategy, &message, origin_chat_id, destination_chat_id, &scratch_dir)
                        .await
                    {
                        Ok(delivered) => delivered,
                        Err(CloneError::Unsupported(kind)) => {
                            warn!(
                                origin_chat_id,
                                message_id,
                                kind = kind.as_str(),
                                "transport cannot re-send this kind, skipping"
                            );
                            None
                        }
                        Err(err) => return Err(err),
                    }
                }
                // The transport can refuse to re-send a kind it cannot
                // reconstruct; that skips the message, never the task.
                Err(CloneError::Unsupported(kind)) => {
                    warn!(
                        origin_chat_id,
                        message_id,
                        kind = kind.as_str(),
                        "transport cannot re-send this kind, skipping"
                    );
                    None
                }
                Err(err) => return Err(err),
            };

            if let Some(destination_message_id) = delivered {
                self.id_map.insert(message_id, destination_message_id);
                processed += 1;
                if processed % 10 == 0 {
                    info!(
                        origin_chat_id,
                        delivered = processed,
                        of = head - start + 1,
                        "sync progress"
                    );
                }
            }
            self.store
                .advance_sync_progress(origin_chat_id, message_id)
                .await?;

            if delivered.is_some() {
                self.sleep_between_messages().await?;
            }
        }

        info!(origin_chat_id, delivered = processed, "sync complete");
        self.post_clone_actions(&task, destination_chat_id).await?;
        Ok(())
    }

    /// Resolve every identifier in the batch file and clone each resolvable
    /// chat sequentially. Unresolvable or inaccessible entries are logged
    /// and skipped; they do not fail the batch.
    pub async fn sync_batch(&mut self, source_file: &Path) -> Result<BatchSummary> {
        let contents = tokio::fs::read_to_string(source_file).await?;
        let identifiers = batch_identifiers(&contents);
        if identifiers.is_empty() {
            return Err(CloneError::Unresolvable(format!(
                "no identifiers found in {}",
                source_file.display()
            )));
        }
        info!(count = identifiers.len(), "starting batch sync");

        let mut summary = BatchSummary::default();
        for identifier in identifiers {
            let resolved = match resolver::resolve(self.client.as_ref(), &identifier).await {
                Ok(resolved) => resolved,
                Err(CloneError::Interrupted) => return Err(CloneError::Interrupted),
                Err(err) => {
                    warn!(identifier, error = %err, "skipping unresolvable batch entry");
                    summary.skipped += 1;
                    continue;
                }
            };
            match self.sync_chat(resolved.chat_id).await {
                Ok(()) => summary.successful += 1,
                Err(CloneError::Interrupted) => return Err(CloneError::Interrupted),
                Err(err) => {
                    warn!(chat_id = resolved.chat_id, error = %err, "batch entry failed");
                    summary.failed += 1;
                }
            }
        }
        info!(
            successful = summary.successful,
            failed = summary.failed,
            skipped = summary.skipped,
            "batch sync finished"
        );
        Ok(summary)
    }

    async fn get_or_create_task(&self, origin_chat_id: i64) -> Result<SyncTask> {
        if let Some(existing) = self.store.get_sync_task(origin_chat_id).await? {
            info!(
                origin_chat_id,
                checkpoint = existing.last_synced_message_id,
                strategy = existing.cloning_strategy.as_str(),
                "resuming existing task"
            );
            return Ok(existing);
        }

        let origin = retry::call(&self.retry, &self.cancel, "get_chat", || {
            self.client.get_chat(origin_chat_id)
        })
        .await?;

        let destination_chat_id = match self.options.destination_chat_id {
            Some(destination) => {
                // Verify we can write before recording anything.
                retry::call(&self.retry, &self.cancel, "get_chat", || {
                    self.client.get_chat(destination)
                })
                .await?;
                destination
            }
            None => self.create_destination(&origin).await?,
        };

        let strategy = if origin.restricted || self.options.force_download {
            CloningStrategy::DownloadUpload
        } else {
            CloningStrategy::Forward
        };
        info!(
            origin_chat_id,
            destination_chat_id,
            strategy = strategy.as_str(),
            restricted = origin.restricted,
            "strategy selected"
        );

        let task = SyncTask {
            origin_chat_id,
            origin_chat_title: origin.title,
            destination_chat_id: Some(destination_chat_id),
            cloning_strategy: strategy,
            last_synced_message_id: 0,
        };
        self.store.upsert_sync_task(&task).await?;
        Ok(task)
    }

    async fn create_destination(&self, origin: &ChatInfo) -> Result<i64> {
        let title = format!("[CLONE] {}", origin.title);
        let description = origin.description.clone().unwrap_or_default();
        let destination = retry::call(&self.retry, &self.cancel, "create_channel", || {
            self.client.create_channel(&title, &description)
        })
        .await?;
        info!(destination, title, "destination channel created");
        Ok(destination)
    }

    /// Link file, optional link publication, pinned replication, optional
    /// leave. Failures here are logged, not fatal, except interruption.
    async fn post_clone_actions(&self, task: &SyncTask, destination_chat_id: i64) -> Result<()> {
        let link = match self.channel_link(destination_chat_id).await {
            Ok(link) => link,
            Err(CloneError::Interrupted) => return Err(CloneError::Interrupted),
            Err(err) => {
                warn!(error = %err, "invite link unavailable, using deep link");
                links::first_message_deep_link(destination_chat_id)
            }
        };

        if let Err(err) =
            links::append_channel_link(&self.config.links_file, &task.origin_chat_title, &link)
        {
            warn!(error = %err, "could not record channel link");
        }

        if let Some(publish_chat_id) = self.options.publish_chat_id {
            let text = format!("{}\n{}", task.origin_chat_title, link);
            let result = retry::call(&self.retry, &self.cancel, "send_text", || {
                self.client.send_text(publish_chat_id, &text, self.options.topic_id)
            })
            .await;
            match result {
                Ok(_) => info!(publish_chat_id, "clone link published"),
                Err(CloneError::Interrupted) => return Err(CloneError::Interrupted),
                Err(err) => warn!(error = %err, "could not publish clone link"),
            }
        }

        self.replicate_pins(task.origin_chat_id, destination_chat_id)
            .await?;

        if self.options.leave_origin {
            let result = retry::call(&self.retry, &self.cancel, "leave_chat", || {
                self.client.leave_chat(task.origin_chat_id)
            })
            .await;
            match result {
                Ok(()) => info!(origin_chat_id = task.origin_chat_id, "left origin chat"),
                Err(CloneError::Interrupted) => return Err(CloneError::Interrupted),
                Err(err) => warn!(error = %err, "could not leave origin chat"),
            }
        }
        Ok(())
    }

    async fn channel_link(&self, destination_chat_id: i64) -> Result<String> {
        if !self.config.register_invite_link {
            return Ok(links::first_message_deep_link(destination_chat_id));
        }
        retry::call(&self.retry, &self.cancel, "export_invite_link", || {
            self.client.export_invite_link(destination_chat_id)
        })
        .await
    }

    /// Pin the destination counterparts of the origin's pins, oldest first.
    /// Ids missing from the translation table are logged and skipped.
    async fn replicate_pins(&self, origin_chat_id: i64, destination_chat_id: i64) -> Result<()> {
        let mut pinned = match retry::call(&self.retry, &self.cancel, "pinned_message_ids", || {
            self.client.pinned_message_ids(origin_chat_id)
        })
        .await
        {
            Ok(pinned) => pinned,
            Err(CloneError::Interrupted) => return Err(CloneError::Interrupted),
            Err(err) => {
                warn!(error = %err, "could not fetch pinned messages");
                return Ok(());
            }
        };
        if pinned.is_empty() {
            return Ok(());
        }
        // The platform reports newest-first; replicate chronologically.
        pinned.sort_unstable();

        let mut replicated = 0usize;
        for origin_message_id in &pinned {
            let Some(&destination_message_id) = self.id_map.get(origin_message_id) else {
                warn!(
                    origin_message_id,
                    "pinned message has no destination counterpart in this run"
                );
                continue;
            };
            let result = retry::call(&self.retry, &self.cancel, "pin_message", || {
                self.client.pin_message(destination_chat_id, destination_message_id)
            })
            .await;
            match result {
                Ok(()) => replicated += 1,
                Err(CloneError::Interrupted) => return Err(CloneError::Interrupted),
                Err(err) => warn!(
                    origin_message_id,
                    error = %err,
                    "could not replicate pin"
                ),
            }
        }
        info!(replicated, of = pinned.len(), "pinned messages replicated");
        Ok(())
    }

    fn scratch_dir_for(&self, origin_chat_id: i64, title: &str) -> PathBuf {
        self.config
            .cloner_download_path
            .join(format!("{origin_chat_id} - {}", sanitize_title(title)))
    }

    async fn sleep_between_messages(&self) -> Result<()> {
        let delay = self.config.inter_message_delay();
        if delay.is_zero() {
            return Ok(());
        }
        tokio::select! {
            _ = self.cancel.cancelled() => Err(CloneError::Interrupted),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}

/// File-system-safe rendition of a chat title.
pub fn sanitize_title(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == ' ' || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        "untitled".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Like `sanitize_title`, but keeps dots so extensions survive.
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, ' ' | '_' | '-' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        "file".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Identifiers from a batch file: one per line, blank lines and `#`
/// comments ignored.
pub fn batch_identifiers(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}
