use std::path::Path;

use anyhow::{Context, Result, bail};
use tracing::info;

use super::{connect_app, flag_value, has_flag, print_success};
use crate::core::engine::{CloneOptions, ClonerEngine};
use crate::core::media;
use crate::core::telegram::resolver;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct SyncArgs {
    pub origin: Option<String>,
    pub dest: Option<String>,
    pub publish_to: Option<String>,
    pub topic: Option<i64>,
    pub batch: bool,
    pub source: Option<String>,
    pub restart: bool,
    pub force_download: bool,
    pub extract_audio: bool,
    pub leave_origin: bool,
}

pub(crate) fn parse_sync_args(args: &[String], start: usize) -> SyncArgs {
    SyncArgs {
        origin: flag_value(args, start, &["--origin", "-o"]),
        dest: flag_value(args, start, &["--dest", "-d"]),
        publish_to: flag_value(args, start, &["--publish-to", "-p"]),
        topic: flag_value(args, start, &["--topic", "-t"]).and_then(|raw| raw.parse().ok()),
        batch: has_flag(args, start, &["--batch", "-b"]),
        source: flag_value(args, start, &["--source", "-s"]),
        restart: has_flag(args, start, &["--restart", "-r"]),
        force_download: has_flag(args, start, &["--force-download", "-f"]),
        extract_audio: has_flag(args, start, &["--extract-audio"]),
        leave_origin: has_flag(args, start, &["--leave-origin", "-l"]),
    }
}

fn validate(parsed: &SyncArgs) -> Result<()> {
    if parsed.batch {
        if parsed.source.is_none() {
            bail!("--source is required with --batch");
        }
        if parsed.origin.is_some() {
            bail!("--origin cannot be combined with --batch");
        }
    } else if parsed.origin.is_none() {
        bail!("--origin is required (or use --batch with --source)");
    }
    if parsed.topic.is_some() && parsed.publish_to.is_none() {
        bail!("--topic only makes sense together with --publish-to");
    }
    Ok(())
}

pub(crate) async fn run(args: &[String]) -> Result<()> {
    let parsed = parse_sync_args(args, 2);
    validate(&parsed)?;

    if parsed.extract_audio {
        media::validate_ffmpeg().await?;
    }

    let app = connect_app().await?;

    let destination_chat_id = match &parsed.dest {
        Some(dest) => Some(resolver::resolve(app.client.as_ref(), dest).await?.chat_id),
        None => None,
    };
    let publish_chat_id = match &parsed.publish_to {
        Some(publish_to) => Some(
            resolver::resolve(app.client.as_ref(), publish_to)
                .await?
                .chat_id,
        ),
        None => None,
    };

    let options = CloneOptions {
        force_download: parsed.force_download,
        extract_audio: parsed.extract_audio,
        restart: parsed.restart,
        leave_origin: parsed.leave_origin,
        destination_chat_id,
        publish_chat_id,
        topic_id: parsed.topic,
    };
    let mut engine = ClonerEngine::new(
        app.client.clone(),
        app.store.clone(),
        app.config.clone(),
        options,
        app.cancel.clone(),
    );

    if parsed.batch {
        let source = parsed.source.as_deref().expect("validated above");
        let summary = engine.sync_batch(Path::new(source)).await?;
        print_success(&format!(
            "Batch finished: {} cloned, {} failed, {} skipped",
            summary.successful, summary.failed, summary.skipped
        ));
    } else {
        let origin = parsed.origin.as_deref().expect("validated above");
        let resolved = resolver::resolve(app.client.as_ref(), origin)
            .await
            .with_context(|| format!("resolving origin {origin:?}"))?;
        info!(origin, chat_id = resolved.chat_id, "origin resolved");
        engine.sync_chat(resolved.chat_id).await?;
        print_success("Sync completed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{SyncArgs, parse_sync_args, validate};

    fn args(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parse_reads_every_sync_flag() {
        let argv = args(&[
            "clonechat",
            "sync",
            "--origin",
            "@lectures",
            "--dest",
            "-1009",
            "--force-download",
            "--extract-audio",
            "--restart",
            "--leave-origin",
            "--publish-to",
            "-1008",
            "--topic",
            "42",
        ]);
        let parsed = parse_sync_args(&argv, 2);
        assert_eq!(
            parsed,
            SyncArgs {
                origin: Some("@lectures".into()),
                dest: Some("-1009".into()),
                publish_to: Some("-1008".into()),
                topic: Some(42),
                batch: false,
                source: None,
                restart: true,
                force_download: true,
                extract_audio: true,
                leave_origin: true,
            }
        );
    }

    #[test]
    fn batch_requires_source_and_rejects_origin() {
        let parsed = parse_sync_args(&args(&["clonechat", "sync", "--batch"]), 2);
        assert!(validate(&parsed).is_err());

        let parsed = parse_sync_args(
            &args(&["clonechat", "sync", "--batch", "--source", "chats.txt"]),
            2,
        );
        assert!(validate(&parsed).is_ok());

        let parsed = parse_sync_args(
            &args(&[
                "clonechat", "sync", "--batch", "--source", "chats.txt", "--origin", "x",
            ]),
            2,
        );
        assert!(validate(&parsed).is_err());
    }

    #[test]
    fn single_mode_requires_origin() {
        let parsed = parse_sync_args(&args(&["clonechat", "sync"]), 2);
        assert!(validate(&parsed).is_err());
    }
}
