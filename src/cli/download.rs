use std::path::PathBuf;

use anyhow::{Result, bail};

use super::{connect_app, flag_value, has_flag, print_success};
use crate::core::engine::{DownloadEngine, DownloadOptions};
use crate::core::media;
use crate::core::telegram::resolver;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct DownloadArgs {
    pub origin: Option<String>,
    pub limit: Option<u64>,
    pub output: Option<String>,
    pub restart: bool,
    pub delete_video: bool,
    pub message_id: Option<i64>,
}

pub(crate) fn parse_download_args(args: &[String], start: usize) -> DownloadArgs {
    DownloadArgs {
        origin: flag_value(args, start, &["--origin", "-o"]),
        limit: flag_value(args, start, &["--limit", "-l"]).and_then(|raw| raw.parse().ok()),
        output: flag_value(args, start, &["--output", "-d"]),
        restart: has_flag(args, start, &["--restart", "-r"]),
        delete_video: has_flag(args, start, &["--delete-video"]),
        message_id: flag_value(args, start, &["--message-id", "-m"])
            .and_then(|raw| raw.parse().ok()),
    }
}

pub(crate) async fn run(args: &[String]) -> Result<()> {
    let parsed = parse_download_args(args, 2);
    let Some(origin) = parsed.origin.clone() else {
        bail!("--origin is required");
    };

    // The whole point of this command is the MP3 sibling.
    media::validate_ffmpeg().await?;

    let app = connect_app().await?;
    let resolved = resolver::resolve(app.client.as_ref(), &origin).await?;

    let options = DownloadOptions {
        limit: parsed.limit,
        output_dir: parsed.output.map(PathBuf::from),
        restart: parsed.restart,
        delete_video: parsed.delete_video,
        start_message_id: parsed.message_id,
    };
    let engine = DownloadEngine::new(
        app.client.clone(),
        app.store.clone(),
        app.config.clone(),
        options,
        app.cancel.clone(),
    );
    let report = engine.run(resolved.chat_id).await?;
    print_success(&format!(
        "Download finished: {} videos, {} failures",
        report.downloaded, report.failed
    ));
    Ok(())
}
