//! Normalise every video per the report plan into the `reencoded/` tree,
//! renamed into a stable, zero-padded upload order.

use std::path::Path;

use tracing::{debug, info};

use super::StageEnv;
use super::report::{self, REPORT_FILE, VideoAction};
use crate::core::error::{CloneError, Result};
use crate::core::media;

pub(crate) async fn run(env: &StageEnv<'_>) -> Result<()> {
    let report_path = env.workspace.report().join(REPORT_FILE);
    let records = report::read_report(&report_path).await?;
    if records.is_empty() {
        info!("no videos to normalise");
        return Ok(());
    }

    let out_dir = env.workspace.reencoded();
    for (offset, record) in records.iter().enumerate() {
        if env.cancel.is_cancelled() {
            return Err(CloneError::Interrupted);
        }
        let index = env.config.start_index as usize + offset;
        let output = out_dir.join(output_name(index, &record.rel_path));
        if output.exists() {
            // Left over from an interrupted run of this same stage; the
            // rename-into-place discipline makes it trustworthy.
            debug!(output = %output.display(), "already normalised, skipping");
            continue;
        }

        let input = env.source.join(&record.rel_path);
        match record.action {
            VideoAction::Reencode => {
                info!(input = %input.display(), "re-encoding");
                media::reencode(&input, &output, env.config.time_limit).await?;
            }
            VideoAction::Single | VideoAction::Join => {
                debug!(input = %input.display(), "codec already conformant, copying");
                copy_atomic(&input, &output).await?;
            }
        }
    }
    info!(videos = records.len(), "normalisation complete");
    Ok(())
}

/// `NNN-<sanitised stem>.mp4`, stable across resumes.
pub(crate) fn output_name(index: usize, rel_path: &str) -> String {
    let stem = Path::new(rel_path)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "video".to_string());
    let safe = crate::core::engine::sanitize_file_name(&stem);
    let mut trimmed = safe;
    trimmed.truncate(80);
    format!("{index:03}-{}.mp4", trimmed.trim_end())
}

async fn copy_atomic(input: &Path, output: &Path) -> Result<()> {
    let tmp = output.with_extension("mp4.tmp");
    tokio::fs::copy(input, &tmp).await?;
    tokio::fs::rename(&tmp, output).await?;
    Ok(())
}
