use std::path::PathBuf;

use anyhow::{Result, bail};

use super::{connect_app, flag_value, has_flag, print_success};
use crate::core::media;
use crate::core::publish::{PipelineOutcome, PublishPipeline};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct PublishArgs {
    pub folder: Option<String>,
    pub restart: bool,
    pub assume_yes: bool,
}

pub(crate) fn parse_publish_args(args: &[String], start: usize) -> PublishArgs {
    PublishArgs {
        folder: flag_value(args, start, &["--folder", "-f"]),
        restart: has_flag(args, start, &["--restart", "-r"]),
        assume_yes: has_flag(args, start, &["--yes", "-y"]),
    }
}

pub(crate) async fn run(args: &[String]) -> Result<()> {
    let parsed = parse_publish_args(args, 2);
    let Some(folder) = parsed.folder.clone() else {
        bail!("--folder is required");
    };

    // Re-encode and join stages drive the transcoder; fail fast if it is
    // not installed.
    media::validate_ffmpeg().await?;

    let app = connect_app().await?;
    let pipeline = PublishPipeline::open(
        app.client.clone(),
        app.store.clone(),
        app.config.clone(),
        app.cancel.clone(),
        &PathBuf::from(folder),
        parsed.restart,
        parsed.assume_yes,
    )
    .await?;

    match pipeline.run().await? {
        PipelineOutcome::Completed => {
            print_success(&format!("Published: {}", pipeline.project_name()));
        }
        PipelineOutcome::Halted(step) => {
            print_success(&format!(
                "Stopped at the {} gate; run the command again to continue",
                step.as_str()
            ));
        }
    }
    Ok(())
}
