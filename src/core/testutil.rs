//! Shared fixtures for the in-crate test suites.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::config::{Config, ReencodePlan};

pub(crate) fn test_config(base: &Path) -> Config {
    Config {
        telegram_api_id: 12345,
        telegram_api_hash: "feedface".to_string(),
        cloner_delay_seconds: 0,
        cloner_download_path: base.join("downloads"),
        data_dir: base.join("data"),
        links_file: base.join("links_canais.txt"),
        file_size_limit_mb: 1000,
        video_extensions: vec!["mp4".into(), "mkv".into(), "webm".into()],
        reencode_plan: ReencodePlan::Single,
        duration_limit: Duration::from_secs(7200),
        activate_transition: false,
        start_index: 1,
        hashtag_index: "F".to_string(),
        descriptions_auto_adapt: true,
        path_summary_top: base.join("summary_top.txt"),
        path_summary_bot: base.join("summary_bot.txt"),
        document_hashtag: "Materials".to_string(),
        document_title: "Materials".to_string(),
        register_invite_link: false,
        max_path: 260,
        create_new_channel: true,
        chat_id: None,
        moc_chat_id: None,
        autodel_video_temp: true,
        time_limit: Duration::from_secs(60),
        channel_title_prefix: String::new(),
        channel_size_label: "Size".to_string(),
        channel_duration_label: "Duration".to_string(),
        channel_invite_label: "Invite".to_string(),
    }
}

pub(crate) fn touch(path: &PathBuf, contents: &[u8]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create parent");
    }
    std::fs::write(path, contents).expect("write file");
}
