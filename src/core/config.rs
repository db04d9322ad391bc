use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};

/// Default list of file extensions treated as video by the publish pipeline.
const DEFAULT_VIDEO_EXTENSIONS: &str = "mp4,avi,webm,ts,vob,mov,mkv,wmv,3gp,flv,ogv,ogg,rrc,gifv,mng,qt,yuv,rm,asf,amv,m4p,m4v,mpg,mp2,mpeg,mpe,mpv,svi,3g2,mxf,roq,nsv,f4v,f4p,f4a,f4b";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReencodePlan {
    Single,
    Group,
}

impl ReencodePlan {
    pub fn as_str(self) -> &'static str {
        match self {
            ReencodePlan::Single => "single",
            ReencodePlan::Group => "group",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "single" => Some(ReencodePlan::Single),
            "group" => Some(ReencodePlan::Group),
            _ => None,
        }
    }
}

/// Immutable process configuration, loaded once from the environment (with
/// `.env` support) and threaded through every engine constructor.
#[derive(Debug, Clone)]
pub struct Config {
    pub telegram_api_id: i32,
    pub telegram_api_hash: String,
    pub cloner_delay_seconds: u64,
    pub cloner_download_path: PathBuf,
    pub data_dir: PathBuf,
    pub links_file: PathBuf,

    // Publish pipeline tuning.
    pub file_size_limit_mb: u64,
    pub video_extensions: Vec<String>,
    pub reencode_plan: ReencodePlan,
    pub duration_limit: Duration,
    pub activate_transition: bool,
    pub start_index: u32,
    pub hashtag_index: String,
    pub descriptions_auto_adapt: bool,
    pub path_summary_top: PathBuf,
    pub path_summary_bot: PathBuf,
    pub document_hashtag: String,
    pub document_title: String,
    pub register_invite_link: bool,
    pub max_path: usize,
    pub create_new_channel: bool,
    pub chat_id: Option<i64>,
    pub moc_chat_id: Option<i64>,
    pub autodel_video_temp: bool,
    pub time_limit: Duration,

    // Labels used in the destination channel description.
    pub channel_title_prefix: String,
    pub channel_size_label: String,
    pub channel_duration_label: String,
    pub channel_invite_label: String,
}

impl Config {
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("clonechat.db")
    }

    pub fn log_path(&self) -> PathBuf {
        self.data_dir.join("app.log")
    }

    pub fn session_path(&self) -> PathBuf {
        self.data_dir.join("clonechat.session")
    }

    pub fn workspace_root(&self) -> PathBuf {
        self.data_dir.join("project_workspace")
    }

    pub fn inter_message_delay(&self) -> Duration {
        Duration::from_secs(self.cloner_delay_seconds)
    }

    pub fn file_size_limit_bytes(&self) -> u64 {
        self.file_size_limit_mb * 1024 * 1024
    }

    pub fn is_video_path(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                let ext = ext.to_ascii_lowercase();
                self.video_extensions.iter().any(|known| known == &ext)
            })
            .unwrap_or(false)
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_flag(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(value) => matches!(value.trim(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{key} has an invalid value: {value:?}")),
        Err(_) => Ok(default),
    }
}

fn env_chat_id(key: &str) -> Result<Option<i64>> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => {
            let id = value
                .trim()
                .parse()
                .with_context(|| format!("{key} must be a numeric chat id"))?;
            Ok(Some(id))
        }
        _ => Ok(None),
    }
}

/// Parse a `HH:MM:SS.mmm` limit into a duration. Fractional seconds are
/// optional; hours are unbounded.
pub fn parse_duration_limit(value: &str) -> Result<Duration> {
    let mut parts = value.trim().splitn(3, ':');
    let (hours, minutes, seconds) = match (parts.next(), parts.next(), parts.next()) {
        (Some(h), Some(m), Some(s)) => (h, m, s),
        _ => bail!("duration limit must be HH:MM:SS.mmm, got {value:?}"),
    };
    let hours: u64 = hours.parse().context("invalid hours in duration limit")?;
    let minutes: u64 = minutes.parse().context("invalid minutes in duration limit")?;
    let seconds: f64 = seconds.parse().context("invalid seconds in duration limit")?;
    if minutes >= 60 || !(0.0..60.0).contains(&seconds) {
        bail!("duration limit out of range: {value:?}");
    }
    Ok(Duration::from_secs_f64(
        (hours * 3600 + minutes * 60) as f64 + seconds,
    ))
}

/// Load configuration from the environment. Reads `.env` from the working
/// directory first, then validates the required credentials.
pub fn load_config() -> Result<Config> {
    dotenvy::dotenv().ok();

    let telegram_api_id: i32 = std::env::var("TELEGRAM_API_ID")
        .context("TELEGRAM_API_ID is required; set it in your .env file")?
        .trim()
        .parse()
        .context("TELEGRAM_API_ID must be numeric")?;
    let telegram_api_hash = std::env::var("TELEGRAM_API_HASH")
        .context("TELEGRAM_API_HASH is required; set it in your .env file")?;
    if telegram_api_hash.trim().is_empty() {
        bail!("TELEGRAM_API_HASH must not be empty");
    }

    let mode = env_or("MODE", "zip");
    if mode != "zip" {
        bail!("MODE={mode:?} is not supported; only zip archives are implemented");
    }

    let reencode_plan = ReencodePlan::from_str(&env_or("REENCODE_PLAN", "single"))
        .context("REENCODE_PLAN must be 'single' or 'group'")?;

    let duration_limit = parse_duration_limit(&env_or("DURATION_LIMIT", "02:00:00.00"))?;

    let video_extensions = env_or("VIDEO_EXTENSIONS", DEFAULT_VIDEO_EXTENSIONS)
        .split(',')
        .map(|ext| ext.trim().to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
        .collect();

    let time_limit_minutes: u64 = env_parse("TIME_LIMIT", 99u64)?;

    Ok(Config {
        telegram_api_id,
        telegram_api_hash,
        cloner_delay_seconds: env_parse("CLONER_DELAY_SECONDS", 2u64)?,
        cloner_download_path: PathBuf::from(env_or("CLONER_DOWNLOAD_PATH", "data/downloads")),
        data_dir: PathBuf::from(env_or("CLONER_DATA_DIR", "data")),
        links_file: PathBuf::from(env_or("LINKS_FILE", "links_canais.txt")),
        file_size_limit_mb: env_parse("FILE_SIZE_LIMIT_MB", 1000u64)?,
        video_extensions,
        reencode_plan,
        duration_limit,
        activate_transition: env_flag("ACTIVATE_TRANSITION", false),
        start_index: env_parse("START_INDEX", 1u32)?,
        hashtag_index: env_or("HASHTAG_INDEX", "F"),
        descriptions_auto_adapt: env_flag("DESCRIPTIONS_AUTO_ADAPT", true),
        path_summary_top: PathBuf::from(env_or("PATH_SUMMARY_TOP", "summary_top.txt")),
        path_summary_bot: PathBuf::from(env_or("PATH_SUMMARY_BOT", "summary_bot.txt")),
        document_hashtag: env_or("DOCUMENT_HASHTAG", "Materials"),
        document_title: env_or("DOCUMENT_TITLE", "Materials"),
        register_invite_link: env_flag("REGISTER_INVITE_LINK", true),
        max_path: env_parse("MAX_PATH", 260usize)?,
        create_new_channel: env_flag("CREATE_NEW_CHANNEL", true),
        chat_id: env_chat_id("CHAT_ID")?,
        moc_chat_id: env_chat_id("MOC_CHAT_ID")?,
        autodel_video_temp: env_flag("AUTODEL_VIDEO_TEMP", true),
        time_limit: Duration::from_secs(time_limit_minutes * 60),
        channel_title_prefix: env_or("CHANNEL_TITLE_PREFIX", ""),
        channel_size_label: env_or("CHANNEL_SIZE_LABEL", "Size"),
        channel_duration_label: env_or("CHANNEL_DURATION_LABEL", "Duration"),
        channel_invite_label: env_or("CHANNEL_INVITE_LABEL", "Invite"),
    })
}
