use std::path::PathBuf;

use crate::core::publish::FileEntry;
use crate::core::publish::join::plan_groups;
use crate::core::publish::reencode::output_name;
use crate::core::publish::report::{VideoAction, csv_escape, parse_csv_line, plan_action};
use crate::core::publish::timestamp::video_hashtag;
use crate::core::publish::upload::{should_skip, split_text};
use crate::core::publish::zip_stage::partition_into_parts;
use crate::core::config::ReencodePlan;
use crate::core::testutil::test_config;

fn entry(rel: &str, size: u64) -> FileEntry {
    FileEntry {
        rel: rel.to_string(),
        abs: PathBuf::from("/src").join(rel),
        size,
    }
}

#[test]
fn zip_partitioning_respects_the_size_bound() {
    let entries = vec![
        entry("a.pdf", 400),
        entry("b.pdf", 500),
        entry("c.pdf", 300),
        entry("d.pdf", 900),
    ];
    let parts = partition_into_parts(&entries, 1000);
    assert_eq!(parts, vec![vec![0, 1], vec![2], vec![3]]);
}

#[test]
fn oversized_files_still_get_their_own_part() {
    let entries = vec![entry("huge.iso", 5000), entry("small.txt", 10)];
    let parts = partition_into_parts(&entries, 1000);
    assert_eq!(parts, vec![vec![0], vec![1]]);
}

#[test]
fn join_grouping_honours_both_limits() {
    // (duration seconds, bytes)
    let items = vec![
        (1000.0, 100),
        (1000.0, 100),
        (1500.0, 100),
        (100.0, 900),
        (100.0, 900),
    ];
    let groups = plan_groups(&items, 2500.0, 1000);
    assert_eq!(groups, vec![vec![0, 1], vec![2, 3], vec![4]]);
}

#[test]
fn every_item_lands_in_exactly_one_group() {
    let items: Vec<(f64, u64)> = (0..7).map(|i| (60.0 * i as f64, 10)).collect();
    let groups = plan_groups(&items, 180.0, 1_000_000);
    let mut seen: Vec<usize> = groups.into_iter().flatten().collect();
    seen.sort_unstable();
    assert_eq!(seen, (0..7).collect::<Vec<_>>());
}

#[test]
fn report_actions_follow_codec_and_plan() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = test_config(dir.path());

    assert_eq!(plan_action("hevc", &config), VideoAction::Reencode);
    assert_eq!(plan_action("h264", &config), VideoAction::Single);

    config.reencode_plan = ReencodePlan::Group;
    assert_eq!(plan_action("h264", &config), VideoAction::Join);
    assert_eq!(plan_action("vp9", &config), VideoAction::Reencode);
}

#[test]
fn csv_round_trips_awkward_fields() {
    let fields = [
        "plain",
        "with,comma",
        "with \"quotes\"",
        "both, \"of\" them",
    ];
    let line = fields.iter().map(|f| csv_escape(f)).collect::<Vec<_>>().join(",");
    let parsed = parse_csv_line(&line);
    assert_eq!(parsed, fields);
}

#[test]
fn normalised_names_are_ordered_and_safe() {
    assert_eq!(output_name(1, "lectures/01 intro.mkv"), "001-01 intro.mp4");
    assert_eq!(output_name(12, "a/b/Evil:Name?.mp4"), "012-Evil_Name_.mp4");
}

#[test]
fn hashtags_are_zero_padded() {
    assert_eq!(video_hashtag("F", 1), "#F001");
    assert_eq!(video_hashtag("LEC", 42), "#LEC042");
}

#[test]
fn upload_skip_is_lexicographic_up_to_the_marker() {
    assert!(!should_skip(None, "joined/a-001.mp4"));
    assert!(should_skip(Some("joined/a-002.mp4"), "joined/a-001.mp4"));
    assert!(should_skip(Some("joined/a-002.mp4"), "joined/a-002.mp4"));
    assert!(!should_skip(Some("joined/a-002.mp4"), "joined/a-003.mp4"));
    assert!(!should_skip(Some("joined/z.mp4"), "zipped/docs-01.zip"));
}

#[test]
fn long_texts_split_on_line_boundaries() {
    let text = format!("{}\n{}\n{}", "a".repeat(10), "b".repeat(10), "c".repeat(10));
    let chunks = split_text(&text, 25);
    assert_eq!(chunks.len(), 2);
    assert!(chunks.iter().all(|chunk| chunk.chars().count() <= 25));
    let rejoined: String = chunks.concat();
    assert_eq!(rejoined.trim_end(), text);
}

#[test]
fn oversized_lines_are_hard_split() {
    let text = "x".repeat(100);
    let chunks = split_text(&text, 30);
    assert!(chunks.iter().all(|chunk| chunk.chars().count() <= 30));
    let total: usize = chunks.iter().map(|c| c.trim_end().chars().count()).sum();
    assert_eq!(total, 100);
}
