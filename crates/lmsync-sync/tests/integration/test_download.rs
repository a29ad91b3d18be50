//! Remote pass tests: discovery, downloads, the ledger and interruption

use std::sync::Arc;
use std::time::Duration;

use chrono::TimeZone;
use chrono::Utc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use lmsync_core::config::ContentToggles;
use lmsync_core::domain::{EntityType, SyncPath};
use lmsync_core::ports::{IHistoryRepository, PageInfo};
use lmsync_history::CsvHistoryLedger;
use lmsync_sync::{FileStatus, RemoteSynchronizer, RetryPolicy, SyncError, SyncEvent};

use crate::common::*;

/// CS101 / Week1 / notes.pdf, the canonical single-file course
fn cs101() -> Arc<FakeLms> {
    let lms = FakeLms::new();
    lms.add_course(1, "CS101");
    lms.add_module(1, 10, "Week1");
    lms.add_file_item(
        1,
        10,
        100,
        FakeFile::new(123, "notes.pdf", jan_first_2023(), b"lecture notes"),
    );
    lms
}

// ============================================================================
// Scenario and idempotence
// ============================================================================

#[tokio::test]
async fn test_first_sync_downloads_and_records() {
    let dir = TempDir::new().unwrap();
    let lms = cs101();

    let mut sync = remote(&dir, &lms, settings(&dir, &["CS101"], modules_only())).await;
    let report = sync.sync().await.unwrap();

    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(report.outcomes[0].status, FileStatus::Synced);
    assert!(report.is_clean());

    let notes = dir.path().join("CS101/Week1/notes.pdf");
    assert_eq!(std::fs::read(&notes).unwrap(), b"lecture notes");
    assert_eq!(mtime(&notes), jan_first_2023());

    assert_eq!(
        ledger_lines(&dir),
        vec![
            "id,path,modified_at,type".to_string(),
            format!("123,{},2023-01-01T00:00:00Z,file", notes.display()),
        ]
    );
    assert_eq!(lms.count("fetch_file_bytes"), 1);
}

#[tokio::test]
async fn test_second_sync_downloads_nothing() {
    let dir = TempDir::new().unwrap();
    let lms = cs101();

    remote(&dir, &lms, settings(&dir, &["CS101"], modules_only()))
        .await
        .sync()
        .await
        .unwrap();
    let ledger_after_first = ledger_lines(&dir);

    // A new process: fresh synchronizer, ledger reloaded from disk
    let report = remote(&dir, &lms, settings(&dir, &["CS101"], modules_only()))
        .await
        .sync()
        .await
        .unwrap();

    assert_eq!(report.count(FileStatus::UpToDate), 1);
    assert_eq!(report.transferred(), 0);
    assert_eq!(lms.count("fetch_file_bytes"), 1);
    assert_eq!(ledger_lines(&dir), ledger_after_first);
}

#[tokio::test]
async fn test_remote_change_is_downloaded_and_record_replaced() {
    let dir = TempDir::new().unwrap();
    let lms = cs101();
    remote(&dir, &lms, settings(&dir, &["CS101"], modules_only()))
        .await
        .sync()
        .await
        .unwrap();

    let changed = Utc.with_ymd_and_hms(2023, 2, 1, 8, 30, 0).unwrap();
    lms.touch_file(123, changed, b"revised notes");

    let report = remote(&dir, &lms, settings(&dir, &["CS101"], modules_only()))
        .await
        .sync()
        .await
        .unwrap();

    assert_eq!(report.count(FileStatus::Synced), 1);
    let notes = dir.path().join("CS101/Week1/notes.pdf");
    assert_eq!(std::fs::read(&notes).unwrap(), b"revised notes");
    assert_eq!(mtime(&notes), changed);

    let lines = ledger_lines(&dir);
    assert_eq!(lines.len(), 2, "record replaced in place, not appended");
    assert_eq!(
        lines[1],
        format!("123,{},2023-02-01T08:30:00Z,file", notes.display())
    );
}

#[tokio::test]
async fn test_sub_second_local_difference_counts_as_current() {
    let dir = TempDir::new().unwrap();
    let lms = cs101();
    let notes = dir.path().join("CS101/Week1/notes.pdf");
    std::fs::create_dir_all(notes.parent().unwrap()).unwrap();
    std::fs::write(&notes, b"local copy").unwrap();
    set_mtime(&notes, jan_first_2023() + chrono::Duration::milliseconds(400));

    let report = remote(&dir, &lms, settings(&dir, &["CS101"], modules_only()))
        .await
        .sync()
        .await
        .unwrap();

    assert_eq!(report.count(FileStatus::UpToDate), 1);
    assert_eq!(std::fs::read(&notes).unwrap(), b"local copy");
    assert_eq!(lms.count("fetch_file_bytes"), 0);
}

// ============================================================================
// Filtering
// ============================================================================

#[tokio::test]
async fn test_unselected_course_is_never_expanded() {
    let dir = TempDir::new().unwrap();
    let lms = cs101();
    lms.add_course(2, "ART200");
    lms.add_module(2, 20, "Sketching");

    let mut sync = remote(&dir, &lms, settings(&dir, &["CS101"], modules_only())).await;
    sync.sync().await.unwrap();

    assert!(lms.calls().contains(&"list_modules:1".to_string()));
    assert!(!lms.calls().contains(&"list_modules:2".to_string()));
    assert!(!dir.path().join("ART200").exists());

    let shown: Vec<String> = sync.show().iter().map(ToString::to_string).collect();
    assert_eq!(
        shown,
        vec![
            "[Course] CS101".to_string(),
            "  [Module] Week1".to_string(),
            "    [File] notes.pdf".to_string(),
            "[Course] ART200".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_all_toggles_off_expands_nothing() {
    let dir = TempDir::new().unwrap();
    let lms = cs101();

    let off = ContentToggles {
        modules: false,
        files: false,
        assignments: false,
    };
    let report = remote(&dir, &lms, settings(&dir, &["CS101"], off))
        .await
        .sync()
        .await
        .unwrap();

    assert!(report.outcomes.is_empty());
    assert_eq!(lms.calls(), vec!["list_courses:".to_string()]);
}

#[tokio::test]
async fn test_assignments_toggle_alone_expands_but_lists_nothing() {
    let dir = TempDir::new().unwrap();
    let lms = cs101();

    let assignments_only = ContentToggles {
        modules: false,
        files: false,
        assignments: true,
    };
    let report = remote(&dir, &lms, settings(&dir, &["CS101"], assignments_only))
        .await
        .sync()
        .await
        .unwrap();

    assert!(report.outcomes.is_empty());
    assert_eq!(lms.count("list_modules"), 0);
    assert_eq!(lms.count("get_root_folder"), 0);
    assert!(dir.path().join("CS101").is_dir());
}

// ============================================================================
// Locked files
// ============================================================================

#[tokio::test]
async fn test_locked_file_is_skipped_every_pass() {
    let dir = TempDir::new().unwrap();
    let lms = FakeLms::new();
    lms.add_course(1, "CS101");
    lms.add_module(1, 10, "Week1");
    lms.add_file_item(
        1,
        10,
        100,
        FakeFile::new(123, "exam.pdf", jan_first_2023(), b"answers").locked(),
    );

    for _ in 0..2 {
        let report = remote(&dir, &lms, settings(&dir, &["CS101"], modules_only()))
            .await
            .sync()
            .await
            .unwrap();
        assert_eq!(report.count(FileStatus::Locked), 1);
    }

    assert_eq!(lms.count("fetch_file_bytes"), 0);
    assert!(!dir.path().join("CS101/Week1/exam.pdf").exists());
    assert!(ledger_lines(&dir).is_empty());
}

// ============================================================================
// Other Files, pages and linked files
// ============================================================================

#[tokio::test]
async fn test_other_files_mirrors_course_folders() {
    let dir = TempDir::new().unwrap();
    let lms = FakeLms::new();
    lms.add_course(1, "CS101");
    lms.set_root_folder(1, 500);
    lms.add_subfolder(500, 501, "Readings");
    lms.add_folder_file(500, FakeFile::new(7, "syllabus.pdf", jan_first_2023(), b"syllabus"));
    lms.add_folder_file(501, FakeFile::new(8, "paper.pdf", jan_first_2023(), b"paper"));

    let files_only = ContentToggles {
        modules: false,
        files: true,
        assignments: false,
    };
    let report = remote(&dir, &lms, settings(&dir, &["CS101"], files_only))
        .await
        .sync()
        .await
        .unwrap();

    assert_eq!(report.count(FileStatus::Synced), 2);
    assert_eq!(lms.count("list_modules"), 0);
    assert_eq!(
        std::fs::read(dir.path().join("CS101/Other Files/syllabus.pdf")).unwrap(),
        b"syllabus"
    );
    assert_eq!(
        std::fs::read(dir.path().join("CS101/Other Files/Readings/paper.pdf")).unwrap(),
        b"paper"
    );
}

#[tokio::test]
async fn test_page_body_and_linked_files() {
    let dir = TempDir::new().unwrap();
    let lms = FakeLms::new();
    lms.add_course(1, "CS101");
    lms.add_module(1, 10, "Week1");
    let updated = Utc.with_ymd_and_hms(2023, 3, 1, 9, 0, 0).unwrap();
    lms.add_page_item(
        1,
        10,
        101,
        "intro",
        PageInfo {
            title: "Intro".to_string(),
            body: Some(r#"<p>See <a href="/courses/1/files/55/download">slides</a></p>"#.to_string()),
            updated_at: Some(updated),
            locked_for_user: false,
        },
    );
    lms.add_loose_file(FakeFile::new(55, "slides.pdf", jan_first_2023(), b"slides"));

    let report = remote(&dir, &lms, settings(&dir, &["CS101"], modules_only()))
        .await
        .sync()
        .await
        .unwrap();

    let page_dir = dir.path().join("CS101/Week1/Intro");
    let html = page_dir.join("Intro.html");
    assert!(std::fs::read_to_string(&html).unwrap().contains("slides"));
    assert_eq!(mtime(&html), updated);
    assert_eq!(std::fs::read(page_dir.join("slides.pdf")).unwrap(), b"slides");

    let types: Vec<EntityType> = report.outcomes.iter().map(|o| o.entity_type).collect();
    assert_eq!(types, vec![EntityType::Page, EntityType::LinkedFile]);

    let lines = ledger_lines(&dir);
    assert!(lines.iter().any(|l| l.ends_with(",page") && l.contains("Intro.html")));
    assert!(lines
        .iter()
        .any(|l| l.starts_with("55,") && l.ends_with(",linked_file")));

    // Unchanged page is not rewritten on the next pass
    let again = remote(&dir, &lms, settings(&dir, &["CS101"], modules_only()))
        .await
        .sync()
        .await
        .unwrap();
    assert_eq!(again.count(FileStatus::UpToDate), 2);
}

#[tokio::test]
async fn test_non_file_items_are_ignored() {
    let dir = TempDir::new().unwrap();
    let lms = cs101();
    lms.add_other_item(1, 10, 102, "SubHeader");
    lms.add_other_item(1, 10, 103, "ExternalUrl");

    let mut sync = remote(&dir, &lms, settings(&dir, &["CS101"], modules_only())).await;
    let walk = sync.walk().await.unwrap();

    assert_eq!(walk.file_count, 1);
    assert!(walk.issues.is_empty());
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_failed_download_does_not_stop_siblings() {
    let dir = TempDir::new().unwrap();
    let lms = cs101();
    lms.add_file_item(
        1,
        10,
        104,
        FakeFile::new(124, "lab.pdf", jan_first_2023(), b"lab"),
    );
    lms.fail("fetch_file_bytes:https://canvas.test/files/123/download");

    let report = remote(&dir, &lms, settings(&dir, &["CS101"], modules_only()))
        .await
        .sync()
        .await
        .unwrap();

    assert_eq!(report.count(FileStatus::FailedDownload), 1);
    assert_eq!(report.count(FileStatus::Synced), 1);
    let failure = report.failures().next().unwrap();
    assert!(failure.message.as_deref().unwrap().contains("refused"));
    assert!(!dir.path().join("CS101/Week1/notes.pdf").exists());
    assert!(dir.path().join("CS101/Week1/lab.pdf").exists());
    assert_eq!(ledger_lines(&dir).len(), 2);
}

#[tokio::test]
async fn test_module_listing_failure_is_an_issue() {
    let dir = TempDir::new().unwrap();
    let lms = cs101();
    lms.add_course(2, "MATH1");
    lms.add_module(2, 20, "Limits");
    lms.add_file_item(2, 20, 200, FakeFile::new(321, "limits.pdf", jan_first_2023(), b"eps"));
    lms.fail("list_modules:1");

    let report = remote(&dir, &lms, settings(&dir, &["CS101", "MATH1"], modules_only()))
        .await
        .sync()
        .await
        .unwrap();

    assert_eq!(report.issues.len(), 1);
    assert!(report.issues[0].path.to_string().ends_with("CS101"));
    assert_eq!(report.count(FileStatus::Synced), 1);
    assert!(dir.path().join("MATH1/Limits/limits.pdf").exists());
}

#[tokio::test]
async fn test_course_listing_failure_fails_the_pass() {
    let dir = TempDir::new().unwrap();
    let lms = cs101();
    lms.fail("list_courses:");

    let result = remote(&dir, &lms, settings(&dir, &["CS101"], modules_only()))
        .await
        .sync()
        .await;

    assert!(matches!(result, Err(SyncError::Provider(_))));
}

// ============================================================================
// Walk and events
// ============================================================================

#[tokio::test]
async fn test_walk_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let lms = cs101();

    let mut sync = remote(&dir, &lms, settings(&dir, &["CS101"], modules_only())).await;
    let walk = sync.walk().await.unwrap();

    assert_eq!(walk.file_count, 1);
    assert_eq!(walk.lines.len(), 3);
    assert_eq!(walk.lines[2].depth, 2);
    assert!(!dir.path().join("CS101").exists());
    assert_eq!(lms.count("fetch_file_bytes"), 0);
    assert!(ledger_lines(&dir).is_empty());
}

#[tokio::test]
async fn test_events_follow_the_pass() {
    let dir = TempDir::new().unwrap();
    let lms = cs101();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

    let mut sync = remote(&dir, &lms, settings(&dir, &["CS101"], modules_only()))
        .await
        .with_events(tx);
    sync.sync().await.unwrap();
    drop(sync);

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    assert_eq!(events.len(), 3);
    assert!(matches!(&events[0], SyncEvent::Entered(line) if line.name == "CS101"));
    assert!(matches!(&events[1], SyncEvent::Entered(line) if line.name == "Week1"));
    assert!(matches!(&events[2], SyncEvent::Finished(o) if o.status == FileStatus::Synced));
}

// ============================================================================
// Interruption
// ============================================================================

#[tokio::test]
async fn test_cancelled_before_start() {
    let dir = TempDir::new().unwrap();
    let lms = cs101();
    let token = CancellationToken::new();
    token.cancel();

    let result = remote(&dir, &lms, settings(&dir, &["CS101"], modules_only()))
        .await
        .with_cancellation(token)
        .sync()
        .await;

    assert!(matches!(result, Err(SyncError::Interrupted)));
    assert!(!dir.path().join("CS101/Week1/notes.pdf").exists());
}

#[tokio::test]
async fn test_interrupted_download_leaves_existing_file_untouched() {
    let dir = TempDir::new().unwrap();
    let lms = cs101();
    lms.hang_downloads();

    let notes = dir.path().join("CS101/Week1/notes.pdf");
    std::fs::create_dir_all(notes.parent().unwrap()).unwrap();
    std::fs::write(&notes, b"old notes").unwrap();

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let result = remote(&dir, &lms, settings(&dir, &["CS101"], modules_only()))
        .await
        .with_cancellation(token)
        .sync()
        .await;

    assert!(matches!(result, Err(SyncError::Interrupted)));
    assert_eq!(std::fs::read(&notes).unwrap(), b"old notes");
    let leftovers: Vec<_> = std::fs::read_dir(notes.parent().unwrap())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(leftovers.len(), 1, "no temp file left behind: {leftovers:?}");
    assert!(ledger_lines(&dir).is_empty());
}

fn stalled_remote(
    dir: &TempDir,
    lms: &Arc<FakeLms>,
    filesystem: Arc<StalledWriteFs>,
    history: Arc<CsvHistoryLedger>,
) -> RemoteSynchronizer {
    RemoteSynchronizer::new(
        settings(dir, &["CS101"], modules_only()),
        lms.clone(),
        filesystem,
        history,
    )
    .with_retry(RetryPolicy::none())
}

#[tokio::test]
async fn test_cancel_during_write_leaves_nothing_behind() {
    let dir = TempDir::new().unwrap();
    let lms = cs101();
    let token = CancellationToken::new();
    let filesystem = StalledWriteFs::new(token.clone());

    let result = stalled_remote(&dir, &lms, filesystem.clone(), ledger(&dir).await)
        .with_cancellation(token)
        .sync()
        .await;

    assert!(matches!(result, Err(SyncError::Interrupted)));
    assert!(filesystem.write_started());
    assert!(!dir.path().join("CS101/Week1/notes.pdf").exists());
    assert!(ledger_lines(&dir).is_empty());
}

#[tokio::test]
async fn test_cancel_during_write_keeps_prior_file_and_ledger() {
    let dir = TempDir::new().unwrap();
    let lms = cs101();
    let notes = dir.path().join("CS101/Week1/notes.pdf");
    std::fs::create_dir_all(notes.parent().unwrap()).unwrap();
    std::fs::write(&notes, b"old notes").unwrap();
    let before = mtime(&notes);

    let token = CancellationToken::new();
    let filesystem = StalledWriteFs::new(token.clone());
    let history = ledger(&dir).await;
    let result = stalled_remote(&dir, &lms, filesystem.clone(), history.clone())
        .with_cancellation(token)
        .sync()
        .await;

    assert!(matches!(result, Err(SyncError::Interrupted)));
    assert!(filesystem.write_started());
    assert_eq!(std::fs::read(&notes).unwrap(), b"old notes");
    assert_eq!(mtime(&notes), before);
    assert!(ledger_lines(&dir).is_empty());
    let path = SyncPath::new(notes).unwrap();
    assert!(history.lookup_by_path(&path).await.is_none());
}
