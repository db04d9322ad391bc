//! Concatenate normalised videos into groups bounded by the configured
//! duration and file-size limits.

use std::path::PathBuf;

use tracing::{debug, info};

use super::StageEnv;
use super::report::{csv_escape, parse_csv_line};
use crate::core::error::{CloneError, Result};
use crate::core::media;

/// Machine-readable record of which inputs landed in which output, written
/// for the timestamp stage.
pub(crate) const JOIN_PLAN_FILE: &str = "join_plan.csv";

#[derive(Debug, Clone)]
pub(crate) struct JoinedOutput {
    pub file_name: String,
    /// Member stems with their durations, in playback order.
    pub members: Vec<(String, f64)>,
}

pub(crate) async fn run(env: &StageEnv<'_>) -> Result<()> {
    let mut inputs = Vec::new();
    let reencoded = env.workspace.reencoded();
    if reencoded.exists() {
        for entry in std::fs::read_dir(&reencoded)? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some("mp4") {
                inputs.push(path);
            }
        }
    }
    inputs.sort();
    if inputs.is_empty() {
        info!("nothing to join");
        write_join_plan(env, &[]).await?;
        return Ok(());
    }

    let mut probed = Vec::with_capacity(inputs.len());
    for input in &inputs {
        if env.cancel.is_cancelled() {
            return Err(CloneError::Interrupted);
        }
        let probe = media::probe(input).await?;
        let size = tokio::fs::metadata(input).await?.len();
        probed.push((input.clone(), probe, size));
    }

    let limits = (
        env.config.duration_limit.as_secs_f64(),
        env.config.file_size_limit_bytes(),
    );
    let groups = plan_groups(
        &probed
            .iter()
            .map(|(_, probe, size)| (probe.duration_secs, *size))
            .collect::<Vec<_>>(),
        limits.0,
        limits.1,
    );
    info!(inputs = inputs.len(), outputs = groups.len(), "joining videos");

    let transition = if env.config.activate_transition && groups.iter().any(|g| g.len() > 1) {
        let (_, first_probe, _) = &probed[0];
        Some(
            media::make_transition(
                &env.workspace.joined(),
                first_probe.width.max(2),
                first_probe.height.max(2),
                env.config.time_limit,
            )
            .await?,
        )
    } else {
        None
    };

    let mut outputs = Vec::with_capacity(groups.len());
    for (group_index, group) in groups.iter().enumerate() {
        if env.cancel.is_cancelled() {
            return Err(CloneError::Interrupted);
        }
        let index = env.config.start_index as usize + group_index;
        let file_name = format!("{}-{index:03}.mp4", env.project);
        let output = env.workspace.joined().join(&file_name);

        let members: Vec<(String, f64)> = group
            .iter()
            .map(|&i| {
                let (path, probe, _) = &probed[i];
                (member_stem(path), probe.duration_secs)
            })
            .collect();
        outputs.push(JoinedOutput {
            file_name: file_name.clone(),
            members,
        });

        if output.exists() {
            debug!(output = %output.display(), "already joined, skipping");
            continue;
        }

        if group.len() == 1 {
            let (input, _, _) = &probed[group[0]];
            let tmp = output.with_extension("mp4.tmp");
            tokio::fs::copy(input, &tmp).await?;
            tokio::fs::rename(&tmp, &output).await?;
        } else {
            let mut parts: Vec<PathBuf> = Vec::new();
            for &i in group {
                if let Some(transition) = &transition {
                    if !parts.is_empty() {
                        parts.push(transition.clone());
                    }
                }
                parts.push(probed[i].0.clone());
            }
            media::concat(&parts, &output, env.config.time_limit).await?;
        }
        info!(output = %output.display(), members = group.len(), "joined output written");
    }

    write_join_plan(env, &outputs).await?;
    Ok(())
}

/// Greedy sequential grouping. Order is preserved; every group stays under
/// both limits unless a single item alone exceeds them.
pub(crate) fn plan_groups(
    items: &[(f64, u64)],
    max_duration_secs: f64,
    max_bytes: u64,
) -> Vec<Vec<usize>> {
    let mut groups: Vec<Vec<usize>> = Vec::new();
    let mut current: Vec<usize> = Vec::new();
    let (mut duration, mut bytes) = (0.0f64, 0u64);

    for (index, &(item_duration, item_bytes)) in items.iter().enumerate() {
        let over = duration + item_duration > max_duration_secs || bytes + item_bytes > max_bytes;
        if !current.is_empty() && over {
            groups.push(std::mem::take(&mut current));
            duration = 0.0;
            bytes = 0;
        }
        current.push(index);
        duration += item_duration;
        bytes += item_bytes;
    }
    if !current.is_empty() {
        groups.push(current);
    }
    groups
}

fn member_stem(path: &std::path::Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

async fn write_join_plan(env: &StageEnv<'_>, outputs: &[JoinedOutput]) -> Result<()> {
    let mut contents = String::from("output,member,duration_secs\n");
    for output in outputs {
        for (member, duration) in &output.members {
            contents.push_str(&format!(
                "{},{},{duration:.3}\n",
                csv_escape(&output.file_name),
                csv_escape(member),
            ));
        }
    }
    let path = env.workspace.joined().join(JOIN_PLAN_FILE);
    let tmp = path.with_extension("csv.tmp");
    tokio::fs::write(&tmp, contents).await?;
    tokio::fs::rename(&tmp, &path).await?;
    Ok(())
}

pub(crate) async fn read_join_plan(env: &StageEnv<'_>) -> Result<Vec<JoinedOutput>> {
    let path = env.workspace.joined().join(JOIN_PLAN_FILE);
    let contents = tokio::fs::read_to_string(&path).await?;

    let mut outputs: Vec<JoinedOutput> = Vec::new();
    for (number, line) in contents.lines().enumerate() {
        if number == 0 || line.trim().is_empty() {
            continue;
        }
        let fields = parse_csv_line(line);
        if fields.len() != 3 {
            return Err(CloneError::Io(std::io::Error::other(format!(
                "malformed join plan line {}: {line:?}",
                number + 1
            ))));
        }
        let duration: f64 = fields[2].parse().unwrap_or(0.0);
        if let Some(output) = outputs.last_mut() {
            if output.file_name == fields[0] {
                output.members.push((fields[1].clone(), duration));
                continue;
            }
        }
        outputs.push(JoinedOutput {
            file_name: fields[0].clone(),
            members: vec![(fields[1].clone(), duration)],
        });
    }
    Ok(outputs)
}
