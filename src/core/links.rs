//! Append-only link file listing clone results for human consumption.
//! Two lines per record: the origin title, then the destination link.

use std::io::Write;
use std::path::Path;

use tracing::info;

use crate::core::error::Result;

/// Internal channel id as it appears in `t.me/c/...` links: the canonical
/// `-100`-prefixed form with the prefix stripped.
pub fn internal_channel_id(chat_id: i64) -> i64 {
    if chat_id <= -1_000_000_000_000 {
        -chat_id - 1_000_000_000_000
    } else {
        chat_id.abs()
    }
}

/// Deep link to the first message of a private channel.
pub fn first_message_deep_link(chat_id: i64) -> String {
    format!("https://t.me/c/{}/1", internal_channel_id(chat_id))
}

pub fn append_channel_link(path: &Path, title: &str, link: &str) -> Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    writeln!(file, "{title}")?;
    writeln!(file, "{link}")?;
    info!(title, link, "channel link recorded");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_id_strips_the_channel_prefix() {
        assert_eq!(internal_channel_id(-1002233445566), 2233445566);
        assert_eq!(internal_channel_id(-987654), 987654);
    }

    #[test]
    fn deep_link_points_at_the_first_message() {
        assert_eq!(
            first_message_deep_link(-1002233445566),
            "https://t.me/c/2233445566/1"
        );
    }

    #[test]
    fn records_append_exactly_two_lines() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("links.txt");

        append_channel_link(&path, "First", "https://t.me/c/1/1").expect("first record");
        append_channel_link(&path, "Second", "https://t.me/c/2/1").expect("second record");

        let contents = std::fs::read_to_string(&path).expect("read back");
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(
            lines,
            vec!["First", "https://t.me/c/1/1", "Second", "https://t.me/c/2/1"]
        );
    }
}
