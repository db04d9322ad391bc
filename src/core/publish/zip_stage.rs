//! Archive every non-video file into size-bounded zip parts.

use std::fs::File;
use std::io::{Read, Write};
use std::path::PathBuf;

use tracing::info;
use zip::write::SimpleFileOptions;

use super::{FileEntry, StageEnv, collect_files};
use crate::core::error::{CloneError, Result};

pub(crate) async fn run(env: &StageEnv<'_>) -> Result<()> {
    let documents = collect_files(env.source, env.config, false).await?;
    if documents.is_empty() {
        info!("no documents to archive");
        return Ok(());
    }

    let parts = partition_into_parts(&documents, env.config.file_size_limit_bytes());
    info!(
        documents = documents.len(),
        parts = parts.len(),
        "archiving documents"
    );

    // Regenerating from scratch keeps the stage idempotent regardless of
    // what a previous interrupted run left behind.
    let out_dir = env.workspace.zipped();
    for entry in std::fs::read_dir(&out_dir)? {
        let entry = entry?;
        if entry.path().extension().and_then(|ext| ext.to_str()) == Some("zip") {
            std::fs::remove_file(entry.path())?;
        }
    }

    for (index, part) in parts.iter().enumerate() {
        if env.cancel.is_cancelled() {
            return Err(CloneError::Interrupted);
        }
        let final_path = out_dir.join(format!("{}-{:02}.zip", env.project, index + 1));
        let tmp_path = out_dir.join(format!("{}-{:02}.zip.tmp", env.project, index + 1));

        let members: Vec<FileEntry> = part.iter().map(|&i| documents[i].clone()).collect();
        let tmp = tmp_path.clone();
        tokio::task::spawn_blocking(move || write_zip_part(&tmp, &members))
            .await
            .map_err(|err| CloneError::Io(std::io::Error::other(format!("zip task: {err}"))))??;

        tokio::fs::rename(&tmp_path, &final_path).await?;
        info!(part = %final_path.display(), files = part.len(), "archive part written");
    }
    Ok(())
}

/// Greedy partition preserving lexicographic order. A file larger than the
/// limit still gets a part of its own.
pub(crate) fn partition_into_parts(entries: &[FileEntry], limit_bytes: u64) -> Vec<Vec<usize>> {
    let mut parts: Vec<Vec<usize>> = Vec::new();
    let mut current: Vec<usize> = Vec::new();
    let mut current_size = 0u64;

    for (index, entry) in entries.iter().enumerate() {
        if !current.is_empty() && current_size + entry.size > limit_bytes {
            parts.push(std::mem::take(&mut current));
            current_size = 0;
        }
        current.push(index);
        current_size += entry.size;
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

fn write_zip_part(path: &PathBuf, members: &[FileEntry]) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = zip::ZipWriter::new(file);
    let options = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .large_file(true);

    let mut buffer = vec![0u8; 64 * 1024];
    for member in members {
        // Forward slashes keep entries portable.
        let entry_name = member.rel.replace('\\', "/");
        writer
            .start_file(entry_name, options)
            .map_err(|err| CloneError::Io(std::io::Error::other(err.to_string())))?;
        let mut input = File::open(&member.abs)?;
        loop {
            let read = input.read(&mut buffer)?;
            if read == 0 {
                break;
            }
            writer.write_all(&buffer[..read])?;
        }
    }
    writer
        .finish()
        .map_err(|err| CloneError::Io(std::io::Error::other(err.to_string())))?;
    Ok(())
}
