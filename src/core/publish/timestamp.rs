//! Human summary plus the machine upload plan: order, hashtags and
//! per-segment offsets for every staged file.

use std::path::Path;

use tracing::info;

use super::StageEnv;
use super::join::{self, JoinedOutput};
use super::report::{csv_escape, parse_csv_line};
use crate::core::error::{CloneError, Result};
use crate::core::media::format_duration;

pub(crate) const SUMMARY_FILE: &str = "summary.txt";
pub(crate) const UPLOAD_PLAN_FILE: &str = "upload_plan.csv";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PlanKind {
    Video,
    Document,
}

impl PlanKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PlanKind::Video => "video",
            PlanKind::Document => "document",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "video" => Some(PlanKind::Video),
            "document" => Some(PlanKind::Document),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PlanEntry {
    pub order: u32,
    /// Path relative to the workspace root.
    pub rel_path: String,
    pub kind: PlanKind,
    pub caption: String,
}

pub(crate) async fn run(env: &StageEnv<'_>) -> Result<()> {
    let joined = join::read_join_plan(env).await?;

    let mut zip_parts = Vec::new();
    let zipped = env.workspace.zipped();
    if zipped.exists() {
        for entry in std::fs::read_dir(&zipped)? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some("zip") {
                zip_parts.push(
                    path.file_name()
                        .map(|name| name.to_string_lossy().into_owned())
                        .unwrap_or_default(),
                );
            }
        }
    }
    zip_parts.sort();

    let summary = render_summary(env, &joined).await?;
    let plan = build_plan(env, &joined, &zip_parts);

    let summary_path = env.workspace.summary().join(SUMMARY_FILE);
    let tmp = summary_path.with_extension("txt.tmp");
    tokio::fs::write(&tmp, summary).await?;
    tokio::fs::rename(&tmp, &summary_path).await?;

    write_plan(&env.workspace.summary().join(UPLOAD_PLAN_FILE), &plan).await?;
    info!(
        videos = joined.len(),
        documents = zip_parts.len(),
        "summary and upload plan written"
    );
    Ok(())
}

/// Hashtag for the nth staged video, e.g. `#F001`.
pub(crate) fn video_hashtag(env_hashtag_index: &str, index: usize) -> String {
    format!("#{env_hashtag_index}{index:03}")
}

async fn render_summary(env: &StageEnv<'_>, joined: &[JoinedOutput]) -> Result<String> {
    let mut out = String::new();
    if let Ok(header) = tokio::fs::read_to_string(&env.config.path_summary_top).await {
        out.push_str(header.trim_end());
        out.push_str("\n\n");
    }

    for (offset, output) in joined.iter().enumerate() {
        let index = env.config.start_index as usize + offset;
        out.push_str(&format!(
            "{} {}\n",
            video_hashtag(&env.config.hashtag_index, index),
            output.file_name
        ));
        // Segment offsets only matter when several clips were joined.
        if output.members.len() > 1 {
            let mut offset_secs = 0.0f64;
            for (member, duration) in &output.members {
                out.push_str(&format!("{} {member}\n", format_duration(offset_secs)));
                offset_secs += duration;
            }
        }
        out.push('\n');
    }

    if !joined.is_empty() {
        let total: f64 = joined
            .iter()
            .flat_map(|output| output.members.iter().map(|(_, duration)| duration))
            .sum();
        out.push_str(&format!("Total: {}\n", format_duration(total)));
    }

    if let Ok(footer) = tokio::fs::read_to_string(&env.config.path_summary_bot).await {
        out.push('\n');
        out.push_str(footer.trim_end());
        out.push('\n');
    }
    Ok(out)
}

fn build_plan(env: &StageEnv<'_>, joined: &[JoinedOutput], zip_parts: &[String]) -> Vec<PlanEntry> {
    let mut plan = Vec::new();
    let mut order = 0u32;

    for (offset, output) in joined.iter().enumerate() {
        order += 1;
        let index = env.config.start_index as usize + offset;
        let caption = if env.config.descriptions_auto_adapt {
            format!(
                "{} {}",
                video_hashtag(&env.config.hashtag_index, index),
                Path::new(&output.file_name)
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
                    .unwrap_or_default()
            )
        } else {
            video_hashtag(&env.config.hashtag_index, index)
        };
        plan.push(PlanEntry {
            order,
            rel_path: format!("joined/{}", output.file_name),
            kind: PlanKind::Video,
            caption,
        });
    }

    for (part_index, part) in zip_parts.iter().enumerate() {
        order += 1;
        plan.push(PlanEntry {
            order,
            rel_path: format!("zipped/{part}"),
            kind: PlanKind::Document,
            caption: format!(
                "#{} {} {:02}",
                env.config.document_hashtag,
                env.config.document_title,
                part_index + 1
            ),
        });
    }
    plan
}

pub(crate) async fn write_plan(path: &Path, plan: &[PlanEntry]) -> Result<()> {
    let mut contents = String::from("order,kind,path,caption\n");
    for entry in plan {
        contents.push_str(&format!(
            "{},{},{},{}\n",
            entry.order,
            entry.kind.as_str(),
            csv_escape(&entry.rel_path),
            csv_escape(&entry.caption),
        ));
    }
    let tmp = path.with_extension("csv.tmp");
    tokio::fs::write(&tmp, contents).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

pub(crate) async fn read_plan(path: &Path) -> Result<Vec<PlanEntry>> {
    let contents = tokio::fs::read_to_string(path).await?;
    let mut plan = Vec::new();
    for (number, line) in contents.lines().enumerate() {
        if number == 0 || line.trim().is_empty() {
            continue;
        }
        let fields = parse_csv_line(line);
        if fields.len() != 4 {
            return Err(CloneError::Io(std::io::Error::other(format!(
                "malformed upload plan line {}: {line:?}",
                number + 1
            ))));
        }
        plan.push(PlanEntry {
            order: fields[0].parse().unwrap_or(0),
            kind: PlanKind::from_str(&fields[1]).unwrap_or(PlanKind::Document),
            rel_path: fields[2].clone(),
            caption: fields[3].clone(),
        });
    }
    plan.sort_by_key(|entry| entry.order);
    Ok(plan)
}
