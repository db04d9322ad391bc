use super::harness::{DEST, EngineFixture, ORIGIN};
use crate::core::engine::{CloneOptions, batch_identifiers, sanitize_title};
use crate::core::error::CloneError;
use crate::core::store::CloningStrategy;
use crate::core::telegram::TelegramClient;
use crate::core::telegram::mock::Delivered;

fn options_with_dest() -> CloneOptions {
    CloneOptions {
        destination_chat_id: Some(DEST),
        ..CloneOptions::default()
    }
}

#[tokio::test]
async fn fresh_clone_forwards_every_message_in_order() {
    let fixture = EngineFixture::new();
    fixture.client.add_chat(ORIGIN, "Lectures", false);
    fixture.client.add_chat(DEST, "Destination", false);
    for i in 1..=50 {
        fixture.client.add_text(ORIGIN, &format!("message {i}"));
    }

    let mut engine = fixture.engine(options_with_dest());
    engine.sync_chat(ORIGIN).await.expect("sync completes");

    let delivered = fixture.client.delivered(DEST);
    assert_eq!(delivered.len(), 50);
    for (index, entry) in delivered.iter().enumerate() {
        assert_eq!(
            *entry,
            Delivered::Forward {
                origin: ORIGIN,
                message_id: index as i64 + 1,
            }
        );
    }

    let task = fixture.store.get_sync_task(ORIGIN).await.unwrap().unwrap();
    assert_eq!(task.last_synced_message_id, 50);
    assert_eq!(task.cloning_strategy, CloningStrategy::Forward);
}

#[tokio::test]
async fn restricted_source_selects_download_upload_at_creation() {
    let fixture = EngineFixture::new();
    fixture.client.add_chat(ORIGIN, "Protected", true);
    fixture.client.add_chat(DEST, "Destination", false);
    for i in 1..=10 {
        fixture.client.add_video(ORIGIN, &format!("clip{i}.mp4"), None);
    }

    let mut engine = fixture.engine(options_with_dest());
    engine.sync_chat(ORIGIN).await.expect("sync completes");

    let task = fixture.store.get_sync_task(ORIGIN).await.unwrap().unwrap();
    assert_eq!(task.cloning_strategy, CloningStrategy::DownloadUpload);

    let delivered = fixture.client.delivered(DEST);
    assert_eq!(delivered.len(), 10);
    assert!(delivered.iter().all(|entry| matches!(
        entry,
        Delivered::Media { kind: "video", .. }
    )));
}

#[tokio::test]
async fn force_download_overrides_an_unrestricted_source() {
    let fixture = EngineFixture::new();
    fixture.client.add_chat(ORIGIN, "Open", false);
    fixture.client.add_chat(DEST, "Destination", false);
    fixture.client.add_text(ORIGIN, "hello");

    let mut engine = fixture.engine(CloneOptions {
        force_download: true,
        ..options_with_dest()
    });
    engine.sync_chat(ORIGIN).await.expect("sync completes");

    let task = fixture.store.get_sync_task(ORIGIN).await.unwrap().unwrap();
    assert_eq!(task.cloning_strategy, CloningStrategy::DownloadUpload);
    assert_eq!(
        fixture.client.delivered(DEST),
        vec![Delivered::Text("hello".to_string())]
    );
}

#[tokio::test]
async fn runtime_restriction_downgrades_once_and_stays_sticky() {
    let fixture = EngineFixture::new();
    fixture.client.add_chat(ORIGIN, "FlipsRestricted", false);
    fixture.client.add_chat(DEST, "Destination", false);
    fixture.client.add_text(ORIGIN, "first");
    fixture.client.add_text(ORIGIN, "second");
    // The restriction bit appears only after the task was created.
    fixture.client.mark_forward_restricted(ORIGIN);

    let mut engine = fixture.engine(options_with_dest());
    engine.sync_chat(ORIGIN).await.expect("sync completes");

    let task = fixture.store.get_sync_task(ORIGIN).await.unwrap().unwrap();
    assert_eq!(task.cloning_strategy, CloningStrategy::DownloadUpload);
    assert_eq!(task.last_synced_message_id, 2);

    // Both messages arrived exactly once, re-sent rather than forwarded.
    assert_eq!(
        fixture.client.delivered(DEST),
        vec![
            Delivered::Text("first".to_string()),
            Delivered::Text("second".to_string()),
        ]
    );
}

#[tokio::test]
async fn crash_mid_clone_resumes_without_duplicates_or_gaps() {
    let fixture = EngineFixture::new();
    fixture.client.add_chat(ORIGIN, "Crashy", false);
    fixture.client.add_chat(DEST, "Destination", false);
    for i in 1..=10 {
        fixture.client.add_text(ORIGIN, &format!("m{i}"));
    }
    // The connection dies while fetching message 8.
    fixture.client.break_from(8);

    let mut engine = fixture.engine(options_with_dest());
    let err = engine.sync_chat(ORIGIN).await.expect_err("run aborts");
    assert!(matches!(err, CloneError::Permanent(_)));

    let task = fixture.store.get_sync_task(ORIGIN).await.unwrap().unwrap();
    assert_eq!(task.last_synced_message_id, 7);

    fixture.client.repair();
    let mut engine = fixture.engine(options_with_dest());
    engine.sync_chat(ORIGIN).await.expect("resume completes");

    let delivered = fixture.client.delivered(DEST);
    let texts: Vec<String> = delivered
        .iter()
        .map(|entry| match entry {
            Delivered::Forward { message_id, .. } => format!("m{message_id}"),
            other => panic!("unexpected delivery {other:?}"),
        })
        .collect();
    let expected: Vec<String> = (1..=10).map(|i| format!("m{i}")).collect();
    assert_eq!(texts, expected, "each message delivered exactly once, in order");

    let task = fixture.store.get_sync_task(ORIGIN).await.unwrap().unwrap();
    assert_eq!(task.last_synced_message_id, 10);
}

#[tokio::test]
async fn rerunning_a_completed_clone_delivers_nothing() {
    let fixture = EngineFixture::new();
    fixture.client.add_chat(ORIGIN, "Done", false);
    fixture.client.add_chat(DEST, "Destination", false);
    for i in 1..=5 {
        fixture.client.add_text(ORIGIN, &format!("m{i}"));
    }

    let mut engine = fixture.engine(options_with_dest());
    engine.sync_chat(ORIGIN).await.expect("first run");
    let after_first = fixture.client.delivered(DEST).len();

    let mut engine = fixture.engine(options_with_dest());
    engine.sync_chat(ORIGIN).await.expect("second run");
    assert_eq!(fixture.client.delivered(DEST).len(), after_first);
}

#[tokio::test(start_paused = true)]
async fn flood_wait_storm_is_absorbed_by_the_adapter() {
    let fixture = EngineFixture::new();
    fixture.client.add_chat(ORIGIN, "Stormy", false);
    fixture.client.add_chat(DEST, "Destination", false);
    for i in 1..=9 {
        fixture.client.add_text(ORIGIN, &format!("m{i}"));
    }
    fixture.client.flood_every(3, 5);

    let started = tokio::time::Instant::now();
    let mut engine = fixture.engine(options_with_dest());
    engine.sync_chat(ORIGIN).await.expect("storm absorbed");

    // Every third call slept at least five seconds; none surfaced.
    assert!(started.elapsed() >= std::time::Duration::from_secs(5));
    assert_eq!(fixture.client.delivered(DEST).len(), 9);
    let task = fixture.store.get_sync_task(ORIGIN).await.unwrap().unwrap();
    assert_eq!(task.last_synced_message_id, 9);
}

#[tokio::test(start_paused = true)]
async fn transient_faults_are_retried_invisibly() {
    let fixture = EngineFixture::new();
    fixture.client.add_chat(ORIGIN, "Flaky", false);
    fixture.client.add_chat(DEST, "Destination", false);
    for i in 1..=3 {
        fixture.client.add_text(ORIGIN, &format!("m{i}"));
    }
    fixture.client.fail_transient(2);

    let mut engine = fixture.engine(options_with_dest());
    engine.sync_chat(ORIGIN).await.expect("faults absorbed");
    assert_eq!(fixture.client.delivered(DEST).len(), 3);
}

#[tokio::test]
async fn zero_byte_downloads_are_skipped_after_one_retry() {
    let fixture = EngineFixture::new();
    // Restricted source forces the download path from the start.
    fixture.client.add_chat(ORIGIN, "Empty", true);
    fixture.client.add_chat(DEST, "Destination", false);
    let video = fixture.client.add_video(ORIGIN, "broken.mp4", None);
    fixture.client.add_text(ORIGIN, "after");
    fixture.client.zero_byte_download(ORIGIN, video);

    let mut engine = fixture.engine(options_with_dest());
    engine.sync_chat(ORIGIN).await.expect("sync completes");

    // The empty payload is skipped; the next message still arrives and the
    // checkpoint covers both.
    assert_eq!(
        fixture.client.delivered(DEST),
        vec![Delivered::Text("after".to_string())]
    );
    let task = fixture.store.get_sync_task(ORIGIN).await.unwrap().unwrap();
    assert_eq!(task.last_synced_message_id, video + 1);
}

#[tokio::test]
async fn polls_and_locations_forward_natively() {
    let fixture = EngineFixture::new();
    fixture.client.add_chat(ORIGIN, "Interactive", false);
    fixture.client.add_chat(DEST, "Destination", false);
    fixture.client.add_text(ORIGIN, "intro");
    let poll = fixture.client.add_poll(ORIGIN, "Favourite module?");
    let location = fixture.client.add_location(ORIGIN, 51.5, -0.12);

    let mut engine = fixture.engine(options_with_dest());
    engine.sync_chat(ORIGIN).await.expect("sync completes");

    // On the forward path polls and locations ride along by id like any
    // other message.
    let delivered = fixture.client.delivered(DEST);
    assert_eq!(delivered.len(), 3);
    assert!(delivered.contains(&Delivered::Forward {
        origin: ORIGIN,
        message_id: poll,
    }));
    assert!(delivered.contains(&Delivered::Forward {
        origin: ORIGIN,
        message_id: location,
    }));
}

#[tokio::test]
async fn restricted_sources_resend_polls_and_locations() {
    let fixture = EngineFixture::new();
    fixture.client.add_chat(ORIGIN, "Interactive", true);
    fixture.client.add_chat(DEST, "Destination", false);
    fixture.client.add_poll(ORIGIN, "Still here?");
    fixture.client.add_location(ORIGIN, 48.85, 2.35);

    let mut engine = fixture.engine(options_with_dest());
    engine.sync_chat(ORIGIN).await.expect("sync completes");

    assert_eq!(
        fixture.client.delivered(DEST),
        vec![Delivered::Poll("Still here?".to_string()), Delivered::Location]
    );
}

#[tokio::test]
async fn transport_declining_a_resend_skips_the_message() {
    let fixture = EngineFixture::new();
    fixture.client.add_chat(ORIGIN, "Interactive", true);
    fixture.client.add_chat(DEST, "Destination", false);
    fixture.client.add_poll(ORIGIN, "Lost?");
    fixture.client.add_text(ORIGIN, "after");
    fixture.client.decline_poll_resend();

    let mut engine = fixture.engine(options_with_dest());
    engine.sync_chat(ORIGIN).await.expect("sync completes");

    // The declined poll is skipped like any unsupported kind; the task
    // keeps going and the checkpoint covers it.
    assert_eq!(
        fixture.client.delivered(DEST),
        vec![Delivered::Text("after".to_string())]
    );
    let task = fixture.store.get_sync_task(ORIGIN).await.unwrap().unwrap();
    assert_eq!(task.last_synced_message_id, 2);
}

#[tokio::test]
async fn unsupported_messages_are_skipped_but_checkpointed() {
    let fixture = EngineFixture::new();
    fixture.client.add_chat(ORIGIN, "Mixed", false);
    fixture.client.add_chat(DEST, "Destination", false);
    fixture.client.add_text(ORIGIN, "before");
    fixture.client.add_unsupported(ORIGIN, "venue");
    fixture.client.add_service(ORIGIN);
    fixture.client.add_text(ORIGIN, "after");

    let mut engine = fixture.engine(options_with_dest());
    engine.sync_chat(ORIGIN).await.expect("sync completes");

    assert_eq!(fixture.client.delivered(DEST).len(), 2);
    let task = fixture.store.get_sync_task(ORIGIN).await.unwrap().unwrap();
    assert_eq!(task.last_synced_message_id, 4);
}

#[tokio::test]
async fn missing_destination_creates_a_clone_channel() {
    let fixture = EngineFixture::new();
    fixture.client.add_chat(ORIGIN, "Course", false);
    fixture.client.add_text(ORIGIN, "welcome");

    let mut engine = fixture.engine(CloneOptions::default());
    engine.sync_chat(ORIGIN).await.expect("sync completes");

    let task = fixture.store.get_sync_task(ORIGIN).await.unwrap().unwrap();
    let destination = task.destination_chat_id.expect("destination recorded");
    let info = fixture.client.get_chat(destination).await.expect("chat");
    assert_eq!(info.title, "[CLONE] Course");
    assert_eq!(fixture.client.delivered(destination).len(), 1);
}

#[tokio::test]
async fn pinned_messages_replicate_oldest_first() {
    let fixture = EngineFixture::new();
    fixture.client.add_chat(ORIGIN, "Pinned", false);
    fixture.client.add_chat(DEST, "Destination", false);
    for i in 1..=5 {
        fixture.client.add_text(ORIGIN, &format!("m{i}"));
    }
    fixture.client.pin(ORIGIN, 4);
    fixture.client.pin(ORIGIN, 2);

    let mut engine = fixture.engine(options_with_dest());
    engine.sync_chat(ORIGIN).await.expect("sync completes");

    let pins = fixture.client.pins_made();
    assert_eq!(pins.len(), 2);
    assert_eq!(pins[0].0, DEST);
    // Chronological order regardless of how the platform reported them.
    assert!(pins[0].1 < pins[1].1);
}

#[tokio::test]
async fn completed_clone_appends_two_lines_to_the_link_file() {
    let fixture = EngineFixture::new();
    fixture.client.add_chat(ORIGIN, "Linked", false);
    fixture.client.add_chat(DEST, "Destination", false);
    fixture.client.add_text(ORIGIN, "m1");

    let mut engine = fixture.engine(options_with_dest());
    engine.sync_chat(ORIGIN).await.expect("first clone");
    let first = std::fs::read_to_string(&fixture.config.links_file).expect("link file");
    assert_eq!(first.lines().count(), 2);
    assert_eq!(first.lines().next(), Some("Linked"));

    // A second completed run appends exactly two more lines.
    let mut engine = fixture.engine(options_with_dest());
    engine.sync_chat(ORIGIN).await.expect("second clone");
    let second = std::fs::read_to_string(&fixture.config.links_file).expect("link file");
    assert_eq!(second.lines().count(), 4);
    assert!(second.starts_with(&first), "existing lines were never rewritten");
}

#[tokio::test]
async fn leave_origin_is_honoured_after_completion() {
    let fixture = EngineFixture::new();
    fixture.client.add_chat(ORIGIN, "Leaving", false);
    fixture.client.add_chat(DEST, "Destination", false);
    fixture.client.add_text(ORIGIN, "bye");

    let mut engine = fixture.engine(CloneOptions {
        leave_origin: true,
        ..options_with_dest()
    });
    engine.sync_chat(ORIGIN).await.expect("sync completes");
    assert!(fixture.client.has_left(ORIGIN));
}

#[tokio::test]
async fn batch_skips_bad_identifiers_and_completes_the_rest() {
    let fixture = EngineFixture::new();
    let other = ORIGIN - 1;
    fixture.client.add_chat(ORIGIN, "One", false);
    fixture.client.add_chat(other, "Two", false);
    fixture.client.add_chat(DEST, "Destination", false);
    fixture.client.add_text(ORIGIN, "a");
    fixture.client.add_text(other, "b");

    let dir = tempfile::tempdir().expect("tempdir");
    let batch = dir.path().join("chats.txt");
    std::fs::write(
        &batch,
        format!("{ORIGIN}\n# a comment\nnot a chat!!\n{other}\n"),
    )
    .expect("write batch");

    let mut engine = fixture.engine(options_with_dest());
    let summary = engine.sync_batch(&batch).await.expect("batch runs");
    assert_eq!(summary.successful, 2);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.failed, 0);
}

#[test]
fn batch_parser_ignores_blanks_and_comments() {
    let parsed = batch_identifiers("12345\n\n# skip me\n @handle \n");
    assert_eq!(parsed, vec!["12345".to_string(), "@handle".to_string()]);
}

#[test]
fn titles_are_sanitized_for_the_filesystem() {
    assert_eq!(sanitize_title("My/Chat: 2024?"), "My_Chat_ 2024_");
    assert_eq!(sanitize_title("***"), "untitled");
}
