//! CSV inventory of every video, with the recommended action per file.

use std::path::Path;

use tracing::info;

use super::{StageEnv, collect_files};
use crate::core::config::{Config, ReencodePlan};
use crate::core::error::{CloneError, Result};
use crate::core::media;

pub(crate) const REPORT_FILE: &str = "video_report.csv";
const HEADER: &str = "file,duration_secs,width,height,codec,bit_rate,size,action";

/// Normalised container/codec pair every joined output must share.
const TARGET_CODEC: &str = "h264";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum VideoAction {
    Single,
    Join,
    Reencode,
}

impl VideoAction {
    pub fn as_str(self) -> &'static str {
        match self {
            VideoAction::Single => "single",
            VideoAction::Join => "join",
            VideoAction::Reencode => "reencode",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "single" => Some(VideoAction::Single),
            "join" => Some(VideoAction::Join),
            "reencode" => Some(VideoAction::Reencode),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct VideoRecord {
    pub rel_path: String,
    pub duration_secs: f64,
    pub width: u32,
    pub height: u32,
    pub codec: String,
    pub bit_rate: u64,
    pub size: u64,
    pub action: VideoAction,
}

pub(crate) async fn run(env: &StageEnv<'_>) -> Result<()> {
    let videos = collect_files(env.source, env.config, true).await?;
    info!(videos = videos.len(), "probing videos for the report");

    let mut records = Vec::with_capacity(videos.len());
    for video in &videos {
        if env.cancel.is_cancelled() {
            return Err(CloneError::Interrupted);
        }
        let probe = media::probe(&video.abs).await?;
        let action = plan_action(&probe.codec, env.config);
        records.push(VideoRecord {
            rel_path: video.rel.clone(),
            duration_secs: probe.duration_secs,
            width: probe.width,
            height: probe.height,
            codec: probe.codec,
            bit_rate: probe.bit_rate,
            size: video.size,
            action,
        });
    }

    let path = env.workspace.report().join(REPORT_FILE);
    write_report(&path, &records).await?;
    info!(report = %path.display(), "video report written");
    Ok(())
}

/// The report's action column is authoritative for the later stages:
/// anything off the target codec is re-encoded; otherwise the configured
/// plan decides between per-file and grouped output.
pub(crate) fn plan_action(codec: &str, config: &Config) -> VideoAction {
    if codec != TARGET_CODEC {
        VideoAction::Reencode
    } else if config.reencode_plan == ReencodePlan::Group {
        VideoAction::Join
    } else {
        VideoAction::Single
    }
}

pub(crate) async fn write_report(path: &Path, records: &[VideoRecord]) -> Result<()> {
    let mut contents = String::from(HEADER);
    contents.push('\n');
    for record in records {
        contents.push_str(&format!(
            "{},{:.3},{},{},{},{},{},{}\n",
            csv_escape(&record.rel_path),
            record.duration_secs,
            record.width,
            record.height,
            csv_escape(&record.codec),
            record.bit_rate,
            record.size,
            record.action.as_str(),
        ));
    }

    let tmp = path.with_extension("csv.tmp");
    tokio::fs::write(&tmp, contents).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

pub(crate) async fn read_report(path: &Path) -> Result<Vec<VideoRecord>> {
    let contents = tokio::fs::read_to_string(path).await?;
    let mut records = Vec::new();
    for (number, line) in contents.lines().enumerate() {
        if number == 0 || line.trim().is_empty() {
            continue;
        }
        let fields = parse_csv_line(line);
        if fields.len() != 8 {
            return Err(CloneError::Io(std::io::Error::other(format!(
                "malformed report line {}: {line:?}",
                number + 1
            ))));
        }
        records.push(VideoRecord {
            rel_path: fields[0].clone(),
            duration_secs: fields[1].parse().unwrap_or(0.0),
            width: fields[2].parse().unwrap_or(0),
            height: fields[3].parse().unwrap_or(0),
            codec: fields[4].clone(),
            bit_rate: fields[5].parse().unwrap_or(0),
            size: fields[6].parse().unwrap_or(0),
            action: VideoAction::from_str(&fields[7]).unwrap_or(VideoAction::Single),
        });
    }
    Ok(records)
}

/// Quote a CSV field when it contains a delimiter, quote, or newline.
pub(crate) fn csv_escape(field: &str) -> String {
    if field.contains([',', '"', '\n']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Split one CSV line, honouring quoted fields with doubled quotes.
pub(crate) fn parse_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    current.push('"');
                } else {
                    in_quotes = false;
                }
            }
            '"' => in_quotes = true,
            ',' if !in_quotes => fields.push(std::mem::take(&mut current)),
            other => current.push(other),
        }
    }
    fields.push(current);
    fields
}
