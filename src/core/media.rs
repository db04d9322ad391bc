//! Wrapper around the external transcoder (ffmpeg/ffprobe).
//!
//! Every invocation runs under a wall-clock limit; an expired child is
//! killed and the failure is classified transient, so callers decide
//! whether to retry or degrade.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info};

use crate::core::error::{CloneError, Result};

#[derive(Debug, Clone)]
pub struct VideoProbe {
    pub duration_secs: f64,
    pub width: u32,
    pub height: u32,
    pub codec: String,
    pub bit_rate: u64,
}

/// Check that ffmpeg is callable. Surfaced before any workflow that needs
/// the transcoder, so a missing binary fails fast with exit code 2.
pub async fn validate_ffmpeg() -> Result<()> {
    let mut cmd = Command::new("ffmpeg");
    cmd.arg("-version");
    let output = run(cmd, "ffmpeg", Duration::from_secs(10)).await?;
    let version = String::from_utf8_lossy(&output.stdout);
    debug!(version = version.lines().next().unwrap_or(""), "ffmpeg available");
    Ok(())
}

/// Inspect a video file. Width/height/codec come from the first video
/// stream; duration and size from the container.
pub async fn probe(path: &Path) -> Result<VideoProbe> {
    let mut cmd = Command::new("ffprobe");
    cmd.args([
        "-v",
        "error",
        "-select_streams",
        "v:0",
        "-show_entries",
        "stream=codec_name,width,height,bit_rate",
        "-show_entries",
        "format=duration,bit_rate",
        "-of",
        "default=noprint_wrappers=1",
    ])
    .arg(path);

    let output = run(cmd, "ffprobe", Duration::from_secs(60)).await?;
    let stdout = String::from_utf8_lossy(&output.stdout);

    let mut probe = VideoProbe {
        duration_secs: 0.0,
        width: 0,
        height: 0,
        codec: String::new(),
        bit_rate: 0,
    };
    for line in stdout.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        match key {
            "codec_name" => probe.codec = value.trim().to_string(),
            "width" => probe.width = value.trim().parse().unwrap_or(0),
            "height" => probe.height = value.trim().parse().unwrap_or(0),
            "duration" => probe.duration_secs = value.trim().parse().unwrap_or(0.0),
            // Stream bit_rate wins over the container value when present.
            "bit_rate" => {
                if probe.bit_rate == 0 {
                    probe.bit_rate = value.trim().parse().unwrap_or(0);
                }
            }
            _ => {}
        }
    }
    if probe.codec.is_empty() && probe.duration_secs == 0.0 {
        return Err(CloneError::ExternalTool(format!(
            "ffprobe produced no usable data for {}",
            path.display()
        )));
    }
    Ok(probe)
}

/// Extract an MP3 sibling next to the video. Skips work when the MP3
/// already exists.
pub async fn extract_audio(video: &Path, time_limit: Duration) -> Result<PathBuf> {
    let audio = video.with_extension("mp3");
    if audio.exists() {
        return Ok(audio);
    }
    let tmp = tmp_sibling(&audio);

    let mut cmd = Command::new("ffmpeg");
    cmd.arg("-y")
        .arg("-i")
        .arg(video)
        .args(["-vn", "-acodec", "libmp3lame", "-q:a", "2", "-f", "mp3"])
        .arg(&tmp);
    run(cmd, "ffmpeg", time_limit).await?;

    tokio::fs::rename(&tmp, &audio).await?;
    info!(audio = %audio.display(), "audio extracted");
    Ok(audio)
}

/// Normalise a video to H.264/AAC in an MP4 container.
pub async fn reencode(input: &Path, output: &Path, time_limit: Duration) -> Result<()> {
    let tmp = tmp_sibling(output);

    let mut cmd = Command::new("ffmpeg");
    cmd.arg("-y")
        .arg("-i")
        .arg(input)
        .args([
            "-c:v",
            "libx264",
            "-preset",
            "medium",
            "-crf",
            "23",
            "-c:a",
            "aac",
            "-b:a",
            "128k",
            "-movflags",
            "+faststart",
            "-f",
            "mp4",
        ])
        .arg(&tmp);
    run(cmd, "ffmpeg", time_limit).await?;

    tokio::fs::rename(&tmp, output).await?;
    Ok(())
}

/// Concatenate already-normalised inputs with the stream-copy demuxer.
pub async fn concat(inputs: &[PathBuf], output: &Path, time_limit: Duration) -> Result<()> {
    let tmp = tmp_sibling(output);
    let list_path = output.with_extension("txt");

    let mut list = String::new();
    for input in inputs {
        // The concat demuxer wants single-quoted paths with quotes doubled.
        let escaped = input.display().to_string().replace('\'', "'\\''");
        list.push_str(&format!("file '{escaped}'\n"));
    }
    tokio::fs::write(&list_path, list).await?;

    let mut cmd = Command::new("ffmpeg");
    cmd.arg("-y")
        .args(["-f", "concat", "-safe", "0", "-i"])
        .arg(&list_path)
        .args(["-c", "copy", "-f", "mp4"])
        .arg(&tmp);
    let result = run(cmd, "ffmpeg", time_limit).await;
    let _ = tokio::fs::remove_file(&list_path).await;
    result?;

    tokio::fs::rename(&tmp, output).await?;
    Ok(())
}

/// Generate the short black clip inserted between joined segments when
/// transitions are active. Created once per workspace.
pub async fn make_transition(
    directory: &Path,
    width: u32,
    height: u32,
    time_limit: Duration,
) -> Result<PathBuf> {
    let clip = directory.join("transition.mp4");
    if clip.exists() {
        return Ok(clip);
    }
    let tmp = tmp_sibling(&clip);

    let mut cmd = Command::new("ffmpeg");
    cmd.arg("-y")
        .args(["-f", "lavfi", "-i"])
        .arg(format!("color=black:s={width}x{height}:d=1"))
        .args(["-f", "lavfi", "-i", "anullsrc=r=44100:cl=stereo"])
        .args([
            "-t", "1", "-c:v", "libx264", "-c:a", "aac", "-shortest", "-f", "mp4",
        ])
        .arg(&tmp);
    run(cmd, "ffmpeg", time_limit).await?;

    tokio::fs::rename(&tmp, &clip).await?;
    Ok(clip)
}

pub fn format_duration(total_secs: f64) -> String {
    let total = total_secs.round().max(0.0) as u64;
    format!(
        "{:02}:{:02}:{:02}",
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

async fn run(mut cmd: Command, tool: &str, time_limit: Duration) -> Result<std::process::Output> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd.spawn().map_err(|err| {
        if err.kind() == std::io::ErrorKind::NotFound {
            CloneError::ExternalTool(format!("{tool} not found in PATH"))
        } else {
            CloneError::Io(err)
        }
    })?;

    match tokio::time::timeout(time_limit, child.wait_with_output()).await {
        // The dropped future kills the child via kill_on_drop.
        Err(_) => Err(CloneError::Transient(format!(
            "{tool} exceeded the {}s wall-clock limit",
            time_limit.as_secs()
        ))),
        Ok(Err(err)) => Err(CloneError::Io(err)),
        Ok(Ok(output)) if output.status.success() => Ok(output),
        Ok(Ok(output)) => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: String = stderr
                .lines()
                .rev()
                .take(3)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect::<Vec<_>>()
                .join(" | ");
            Err(CloneError::ExternalTool(format!(
                "{tool} exited with {}: {tail}",
                output.status
            )))
        }
    }
}
