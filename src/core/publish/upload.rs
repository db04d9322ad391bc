//! Final stage: create or reuse the destination channel, upload per the
//! plan, pin the summary, and describe the channel.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::StageEnv;
use super::join;
use super::timestamp::{PlanEntry, PlanKind, SUMMARY_FILE, UPLOAD_PLAN_FILE, read_plan};
use crate::core::error::{CloneError, Result};
use crate::core::links;
use crate::core::media::format_duration;
use crate::core::store::{PublishTask, TaskStore};
use crate::core::telegram::retry::{self, RetryPolicy};
use crate::core::telegram::{MediaUpload, TelegramClient, UploadKind};

/// Platform limit for one text message.
const TEXT_LIMIT: usize = 4096;

pub(crate) async fn run(
    env: &StageEnv<'_>,
    client: &dyn TelegramClient,
    store: &Arc<TaskStore>,
    source_key: &str,
    task: &PublishTask,
) -> Result<()> {
    let retry = RetryPolicy::default();
    let plan = read_plan(&env.workspace.summary().join(UPLOAD_PLAN_FILE)).await?;

    let destination = resolve_destination(env, client, store, source_key, task, &retry).await?;
    let marker = task.last_uploaded_file.clone();

    let mut sent = 0usize;
    for entry in &plan {
        if env.cancel.is_cancelled() {
            return Err(CloneError::Interrupted);
        }
        if should_skip(marker.as_deref(), &entry.rel_path) {
            debug!(file = entry.rel_path, "already uploaded, skipping");
            continue;
        }

        let path = env.workspace.root().join(&entry.rel_path);
        let upload = build_upload(entry, path);
        retry::call(&retry, env.cancel, "send_media", || {
            client.send_media(destination, &upload)
        })
        .await?;
        store.set_last_uploaded_file(source_key, &entry.rel_path).await?;
        sent += 1;
        info!(file = entry.rel_path, "uploaded");

        let delay = env.config.inter_message_delay();
        if !delay.is_zero() {
            tokio::select! {
                _ = env.cancel.cancelled() => return Err(CloneError::Interrupted),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
    info!(sent, total = plan.len(), "upload pass finished");

    pin_summary(env, client, destination, &retry).await?;
    describe_channel(env, client, destination, &retry).await?;

    if env.config.autodel_video_temp {
        cleanup_intermediates(env).await?;
    }
    Ok(())
}

/// Items lexicographically at or before the marker are considered done.
pub(crate) fn should_skip(marker: Option<&str>, rel_path: &str) -> bool {
    match marker {
        Some(marker) => rel_path <= marker,
        None => false,
    }
}

async fn resolve_destination(
    env: &StageEnv<'_>,
    client: &dyn TelegramClient,
    store: &Arc<TaskStore>,
    source_key: &str,
    task: &PublishTask,
    retry: &RetryPolicy,
) -> Result<i64> {
    if let Some(existing) = task.destination_chat_id {
        retry::call(retry, env.cancel, "get_chat", || client.get_chat(existing)).await?;
        return Ok(existing);
    }

    let destination = if env.config.create_new_channel {
        let title = if env.config.channel_title_prefix.is_empty() {
            env.project.to_string()
        } else {
            format!("{} {}", env.config.channel_title_prefix, env.project)
        };
        let created = retry::call(retry, env.cancel, "create_channel", || {
            client.create_channel(&title, "")
        })
        .await?;
        info!(chat_id = created, title, "destination channel created");
        created
    } else {
        env.config.chat_id.ok_or_else(|| {
            CloneError::Unresolvable(
                "CREATE_NEW_CHANNEL is off and CHAT_ID is not configured".into(),
            )
        })?
    };

    store.set_publish_destination(source_key, destination).await?;
    Ok(destination)
}

fn build_upload(entry: &PlanEntry, path: std::path::PathBuf) -> MediaUpload {
    let kind = match entry.kind {
        PlanKind::Video => UploadKind::Video,
        PlanKind::Document => UploadKind::Document,
    };
    let mut upload = MediaUpload::new(path, kind);
    upload.caption = Some(entry.caption.clone());
    upload
}

async fn pin_summary(
    env: &StageEnv<'_>,
    client: &dyn TelegramClient,
    destination: i64,
    retry: &RetryPolicy,
) -> Result<()> {
    let summary_path = env.workspace.summary().join(SUMMARY_FILE);
    let summary = match tokio::fs::read_to_string(&summary_path).await {
        Ok(summary) if !summary.trim().is_empty() => summary,
        _ => {
            warn!("no summary to pin");
            return Ok(());
        }
    };

    let mut first_message_id = None;
    for chunk in split_text(&summary, TEXT_LIMIT) {
        let sent = retry::call(retry, env.cancel, "send_text", || {
            client.send_text(destination, &chunk, None)
        })
        .await?;
        first_message_id.get_or_insert(sent);
    }
    if let Some(message_id) = first_message_id {
        retry::call(retry, env.cancel, "pin_message", || {
            client.pin_message(destination, message_id)
        })
        .await?;
        info!(message_id, "summary pinned");
    }
    Ok(())
}

async fn describe_channel(
    env: &StageEnv<'_>,
    client: &dyn TelegramClient,
    destination: i64,
    retry: &RetryPolicy,
) -> Result<()> {
    let (total_bytes, total_secs) = staged_totals(env).await?;

    let mut description = format!(
        "{}: {:.2} GB\n{}: {}",
        env.config.channel_size_label,
        total_bytes as f64 / (1024.0 * 1024.0 * 1024.0),
        env.config.channel_duration_label,
        format_duration(total_secs),
    );

    let link = if env.config.register_invite_link {
        match retry::call(retry, env.cancel, "export_invite_link", || {
            client.export_invite_link(destination)
        })
        .await
        {
            Ok(link) => link,
            Err(CloneError::Interrupted) => return Err(CloneError::Interrupted),
            Err(err) => {
                warn!(error = %err, "invite link unavailable, using deep link");
                links::first_message_deep_link(destination)
            }
        }
    } else {
        links::first_message_deep_link(destination)
    };
    description.push_str(&format!("\n{}: {link}", env.config.channel_invite_label));

    let result = retry::call(retry, env.cancel, "set_chat_description", || {
        client.set_chat_description(destination, &description)
    })
    .await;
    match result {
        Ok(()) => info!("channel description updated"),
        Err(CloneError::Interrupted) => return Err(CloneError::Interrupted),
        Err(err) => warn!(error = %err, "could not update channel description"),
    }

    if let Err(err) = links::append_channel_link(&env.config.links_file, env.project, &link) {
        warn!(error = %err, "could not record channel link");
    }

    // Announce the finished publication in the configured overview chat.
    if let Some(moc_chat_id) = env.config.moc_chat_id {
        let notice = format!("{}\n{link}", env.project);
        let result = retry::call(retry, env.cancel, "send_text", || {
            client.send_text(moc_chat_id, &notice, None)
        })
        .await;
        match result {
            Ok(_) => info!(moc_chat_id, "publication announced"),
            Err(CloneError::Interrupted) => return Err(CloneError::Interrupted),
            Err(err) => warn!(error = %err, "could not announce the publication"),
        }
    }
    Ok(())
}

async fn staged_totals(env: &StageEnv<'_>) -> Result<(u64, f64)> {
    let mut total_bytes = 0u64;
    for dir in [env.workspace.joined(), env.workspace.zipped()] {
        if !dir.exists() {
            continue;
        }
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            let is_payload = matches!(
                path.extension().and_then(|ext| ext.to_str()),
                Some("mp4") | Some("zip")
            );
            if is_payload && !path.ends_with(join::JOIN_PLAN_FILE) {
                total_bytes += entry.metadata()?.len();
            }
        }
    }

    let total_secs = join::read_join_plan(env)
        .await
        .map(|outputs| {
            outputs
                .iter()
                .flat_map(|output| output.members.iter().map(|(_, duration)| duration))
                .sum()
        })
        .unwrap_or(0.0);
    Ok((total_bytes, total_secs))
}

async fn cleanup_intermediates(env: &StageEnv<'_>) -> Result<()> {
    let reencoded = env.workspace.reencoded();
    if !reencoded.exists() {
        return Ok(());
    }
    let mut removed = 0usize;
    for entry in std::fs::read_dir(&reencoded)? {
        let path = entry?.path();
        if path.extension().and_then(|ext| ext.to_str()) == Some("mp4") {
            tokio::fs::remove_file(&path).await?;
            removed += 1;
        }
    }
    info!(removed, "intermediate videos cleaned up");
    Ok(())
}

/// Split on line boundaries where possible, hard-splitting only oversized
/// single lines.
pub(crate) fn split_text(text: &str, limit: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    for line in text.lines() {
        if line.chars().count() > limit {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            let mut piece = String::new();
            for c in line.chars() {
                piece.push(c);
                if piece.chars().count() == limit {
                    chunks.push(std::mem::take(&mut piece));
                }
            }
            if !piece.is_empty() {
                current = piece;
                current.push('\n');
            }
            continue;
        }
        if current.chars().count() + line.chars().count() + 1 > limit {
            chunks.push(std::mem::take(&mut current));
        }
        current.push_str(line);
        current.push('\n');
    }
    if !current.trim().is_empty() {
        chunks.push(current);
    }
    chunks
}
