#![cfg(unix)]

mod common;

use std::time::Duration;

use common::{
    ALBUM_URL, Harness, PLAYLIST_URL, StaticCatalog, TRACK_URL, has_log, process_alive, wait_until,
};
use futures::StreamExt;
use grovegrab::downloader::core::TERMINATION_GRACE;
use grovegrab::downloader::{DownloadError, FailureKind, ItemStatus, TaskStatus, new_task_id};
use pretty_assertions::assert_eq;

const SUCCESS_SCRIPT: &str = r#"
echo "Found 2 songs"
echo 'Searching YouTube Music for "Song A"'
echo 'Downloading: Song A 40%'
echo 'Downloaded "Song A"'
echo "Couldn't read cache at: .cache" 1>&2
echo 'Searching YouTube Music for "Song B"'
exit 0
"#;

#[tokio::test]
async fn test_offline_start_synthesizes_failed_task() {
    let harness = Harness::new("echo should-not-run", false, StaticCatalog::failing());
    let task = harness
        .manager
        .start("offline-1", TRACK_URL, None)
        .await
        .unwrap();

    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.failure, Some(FailureKind::Network));
    assert!(task.is_network_failure());
    assert!(task.items.is_empty());
    assert!(has_log(&task, "No internet connection detected"));
    assert!(!has_log(&task, "Executing"));
    assert_eq!(harness.manager.get_task("offline-1"), Some(task));
    assert!(!harness.music_dir().exists());
}

#[tokio::test]
async fn test_invalid_url_creates_no_task() {
    let harness = Harness::online(SUCCESS_SCRIPT);
    let result = harness
        .manager
        .start("bad-1", "https://example.com/track/abc", None)
        .await;

    assert!(matches!(result, Err(DownloadError::InvalidUrl(_))));
    assert!(harness.manager.get_all_tasks().is_empty());

    let result = harness.manager.start("../escape", TRACK_URL, None).await;
    assert!(matches!(result, Err(DownloadError::InvalidTaskId(_))));
}

#[tokio::test]
async fn test_successful_run_completes_remaining_items() {
    let harness = Harness::online(SUCCESS_SCRIPT);
    let task = harness.manager.start("ok-1", TRACK_URL, None).await.unwrap();

    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.items.len(), 2);
    assert!(task
        .items
        .iter()
        .all(|item| item.status == ItemStatus::Completed && item.progress == 100));
    assert_eq!(task.completed_items, 2);
    assert_eq!(task.failed_items, 0);
    assert_eq!(task.total_items, 2);
    assert_eq!(task.progress, 100);
    assert_eq!(task.download_path, harness.music_dir());
    assert!(harness.music_dir().is_dir());

    assert!(has_log(&task, "Starting download for: "));
    assert!(has_log(&task, "Downloading: Song A 40%"));
    assert!(has_log(&task, "Download completed successfully!"));
    assert!(!has_log(&task, "Couldn't read cache"));
    assert!(!harness.manager.is_running("ok-1"));
}

#[tokio::test]
async fn test_nonzero_exit_fails_task() {
    let harness = Harness::online(
        r#"echo 'Searching YouTube Music for "Song A"'
exit 3"#,
    );
    let task = harness.manager.start("fail-1", TRACK_URL, None).await.unwrap();

    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.failure, Some(FailureKind::Downloader));
    assert!(!task.is_network_failure());
    assert_eq!(task.items[0].status, ItemStatus::Searching);
    assert!(has_log(&task, "Download failed: Process exited with code 3"));
}

#[tokio::test]
async fn test_missing_downloader_fails_task() {
    let harness = Harness::online("exit 0");
    let mut config = harness.manager.config().clone();
    config.downloader = "/nonexistent/spotdl".to_string();
    config.downloader_args.clear();
    let manager = grovegrab::downloader::TaskManager::new(
        std::sync::Arc::clone(harness.manager.registry()),
        config,
        std::sync::Arc::new(common::StaticProbe(true)),
        std::sync::Arc::new(StaticCatalog::failing()),
    );

    if std::env::var_os("SPOTDL_PATH").is_some() {
        return;
    }
    let task = manager.start("missing-1", TRACK_URL, None).await.unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.failure, Some(FailureKind::Launch));
    assert!(has_log(&task, "Failed to launch `/nonexistent/spotdl`"));
}

#[tokio::test]
async fn test_repeated_dns_errors_fail_as_connectivity() {
    let harness = Harness::online(
        r#"i=0
while [ $i -lt 11 ]; do
  echo "HTTPSConnectionPool(host='api.spotify.com'): getaddrinfo failed"
  i=$((i+1))
done
echo "ConnectionResetError(104, 'Connection reset by peer')"
exit 0"#,
    );
    let task = harness.manager.start("dns-1", TRACK_URL, None).await.unwrap();

    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.is_network_failure());
    let warnings = task
        .logs
        .iter()
        .filter(|line| line.contains("WARNING: Network/DNS error detected. Retrying..."))
        .count();
    assert_eq!(warnings, 1);
    assert!(has_log(&task, "Connection issue detected"));
    assert!(has_log(&task, "DNS resolution failed (11 errors)"));
    assert!(!has_log(&task, "getaddrinfo failed"));
}

#[tokio::test]
async fn test_cancel_wins_over_exit_code() {
    let harness = Harness::online(
        r#"trap 'exit 137' TERM
echo 'Searching YouTube Music for "Song A"'
echo 'Downloading: Song B 10%'
while true; do sleep 0.1; done"#,
    );
    let manager = &harness.manager;
    let handle = manager.spawn_start("cancel-1", TRACK_URL, None);

    assert!(
        wait_until(manager, "cancel-1", Duration::from_secs(10), |task| task.items.len() == 2)
            .await
    );
    assert!(manager.is_running("cancel-1"));

    let again = manager.start("cancel-1", TRACK_URL, None).await;
    assert!(matches!(again, Err(DownloadError::AlreadyRunning(_))));

    assert!(manager.cancel("cancel-1"));
    let snapshot = manager.get_task("cancel-1").unwrap();
    assert_eq!(snapshot.status, TaskStatus::Cancelled);
    assert!(snapshot.current_item.is_empty());
    assert!(snapshot.cancel_requested);

    let task = tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(task.status, TaskStatus::Cancelled);
    assert_eq!(task.items[1].status, ItemStatus::Cancelled);
    assert!(has_log(&task, "Stop requested by user"));
    assert!(has_log(&task, "Download cancelled by user"));
    assert!(!manager.is_running("cancel-1"));

    // 已经结束的任务不能再取消
    assert!(!manager.cancel("cancel-1"));
    assert!(!manager.retry("cancel-1"));
}

#[tokio::test]
async fn test_cancel_and_retry_require_matching_status() {
    let harness = Harness::online(SUCCESS_SCRIPT);
    let task = harness.manager.start("done-1", TRACK_URL, None).await.unwrap();
    assert_eq!(task.status, TaskStatus::Completed);

    assert!(!harness.manager.cancel("done-1"));
    assert!(!harness.manager.retry("done-1"));
    assert!(!harness.manager.cancel("unknown"));
    assert!(!harness.manager.retry("unknown"));
    assert_eq!(harness.manager.get_task("done-1"), Some(task));
}

#[tokio::test]
async fn test_retry_relaunches_failed_task() {
    // 第一次失败，第二次成功
    let harness = Harness::online(
        r#"if [ -f "$3/.seen" ]; then
  echo 'Downloaded "Song A"'
  exit 0
fi
touch "$3/.seen"
echo 'Failed to download "Song A"'
exit 1"#,
    );
    let manager = &harness.manager;
    let first = manager.start("retry-1", TRACK_URL, None).await.unwrap();
    assert_eq!(first.status, TaskStatus::Failed);
    assert_eq!(first.failure, Some(FailureKind::Downloader));
    assert_eq!(first.failed_items, 1);
    assert_eq!(first.failed_item_log.len(), 1);

    let handle = manager.spawn_retry("retry-1").unwrap();
    let task = handle.await.unwrap().unwrap();

    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.failure, None);
    assert_eq!(task.failed_items, 0);
    assert!(task.failed_item_log.is_empty());
    assert_eq!(task.completed_items, 1);
    assert_eq!(task.items[0].status, ItemStatus::Completed);
    assert_eq!(task.created_at, first.created_at);
    assert_eq!(task.download_path, first.download_path);
    assert!(has_log(&task, "Download failed: Process exited with code 1"));
    assert!(has_log(&task, "Retrying download..."));
    assert!(has_log(&task, "Download completed successfully!"));
}

#[tokio::test]
async fn test_collection_gets_named_folder() {
    let harness = Harness::new("exit 0", true, StaticCatalog::named("Greatest Hits"));
    let task = harness.manager.start("album-1", ALBUM_URL, None).await.unwrap();

    let expected = harness.music_dir().join("Greatest Hits");
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.download_path, expected);
    assert!(expected.is_dir());
    assert!(has_log(&task, "Detecting album name..."));
    assert!(has_log(&task, "Creating folder: Greatest Hits"));
}

#[tokio::test]
async fn test_collection_lookup_failure_uses_fallback_name() {
    let harness = Harness::new(
        r#"if [ -f "$3/.seen" ]; then exit 0; fi
touch "$3/.seen"
exit 2"#,
        true,
        StaticCatalog::failing(),
    );
    let manager = &harness.manager;
    let first = manager.start("playlist-1", PLAYLIST_URL, None).await.unwrap();

    let expected = harness.music_dir().join("playlist_37i9dQZF");
    assert_eq!(first.status, TaskStatus::Failed);
    assert_eq!(first.download_path, expected);

    // 重试不会再嵌套一层目录
    let task = manager.spawn_retry("playlist-1").unwrap().await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.download_path, expected);
}

#[tokio::test]
async fn test_tracks_are_not_looked_up() {
    let harness = Harness::new("exit 0", true, StaticCatalog::named("Ignored"));
    let task = harness.manager.start("track-1", TRACK_URL, None).await.unwrap();
    assert_eq!(task.download_path, harness.music_dir());
    assert!(!has_log(&task, "Detecting"));
}

#[tokio::test]
async fn test_explicit_output_directory() {
    let harness = Harness::online("exit 0");
    let target = harness.dir.path().join("custom");
    let task = harness
        .manager
        .start("custom-1", TRACK_URL, Some(target.clone()))
        .await
        .unwrap();
    assert_eq!(task.download_path, target);
    assert!(target.is_dir());
}

#[tokio::test]
async fn test_delete_removes_task_and_file() {
    let harness = Harness::online(SUCCESS_SCRIPT);
    harness.manager.start("del-1", TRACK_URL, None).await.unwrap();
    let file = harness.dir.path().join("tasks").join("del-1.json");
    assert!(file.exists());

    assert!(harness.manager.delete("del-1"));
    assert!(harness.manager.get_task("del-1").is_none());
    assert!(harness.manager.get_task_logs("del-1").is_none());
    assert!(!file.exists());
    assert!(!harness.manager.delete("del-1"));
}

#[tokio::test]
async fn test_delete_stops_running_process() {
    let harness = Harness::online(
        r#"echo 'Searching YouTube Music for "Song A"'
while true; do sleep 0.1; done"#,
    );
    let manager = &harness.manager;
    let handle = manager.spawn_start("del-2", TRACK_URL, None);
    assert!(wait_until(manager, "del-2", Duration::from_secs(10), |task| !task.items.is_empty()).await);

    assert!(manager.delete("del-2"));
    let result = tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(DownloadError::TaskNotFound(_))));
    assert!(!manager.is_running("del-2"));
}

#[tokio::test]
async fn test_stderr_lines_keep_their_place_in_output() {
    // 没有标题的错误行算到当前曲目，所以 stderr 必须和 stdout 按产生顺序交错
    let harness = Harness::online(
        r#"echo 'Searching YouTube Music for "Song A"'
echo 'yt-dlp: HTTP Error 403: Forbidden' 1>&2
echo 'Searching YouTube Music for "Song B"'
echo 'Downloaded "Song B"'
exit 0"#,
    );
    let task = harness.manager.start("merge-1", TRACK_URL, None).await.unwrap();

    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.items.len(), 2);
    assert_eq!(task.items[0].title, "Song A");
    assert_eq!(task.items[0].status, ItemStatus::Failed);
    assert_eq!(task.items[1].status, ItemStatus::Completed);
    assert_eq!(task.failed_items, 1);

    let position = |needle: &str| task.logs.iter().position(|line| line.contains(needle)).unwrap();
    assert!(position("\"Song A\"") < position("HTTP Error 403"));
    assert!(position("HTTP Error 403") < position("\"Song B\""));
}

#[tokio::test]
async fn test_cancel_kills_process_that_ignores_sigterm() {
    let harness = Harness::online(
        r#"trap '' TERM
echo $$ > "$3/pid"
echo 'Searching YouTube Music for "Song A"'
while true; do sleep 0.1; done"#,
    );
    let manager = &harness.manager;
    let handle = manager.spawn_start("stubborn-1", TRACK_URL, None);
    assert!(
        wait_until(manager, "stubborn-1", Duration::from_secs(10), |task| !task.items.is_empty())
            .await
    );
    let pid: i32 = std::fs::read_to_string(harness.music_dir().join("pid"))
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    assert!(process_alive(pid));

    let started = std::time::Instant::now();
    assert!(manager.cancel("stubborn-1"));
    let task = tokio::time::timeout(TERMINATION_GRACE + Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(task.status, TaskStatus::Cancelled);
    assert!(elapsed >= TERMINATION_GRACE - Duration::from_millis(200));
    assert!(!process_alive(pid));
    assert!(!manager.is_running("stubborn-1"));
}

#[tokio::test]
async fn test_cancel_during_lookup_never_launches_downloader() {
    let harness = Harness::new(
        r#"touch "$3/../launched""#,
        true,
        StaticCatalog::named("Slow Mix").delayed(Duration::from_millis(500)),
    );
    let manager = &harness.manager;
    let handle = manager.spawn_start("early-1", PLAYLIST_URL, None);
    assert!(
        wait_until(manager, "early-1", Duration::from_secs(5), |task| {
            has_log(task, "Detecting playlist name...")
        })
        .await
    );

    assert!(manager.cancel("early-1"));
    let task = tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert_eq!(task.status, TaskStatus::Cancelled);
    assert_eq!(task.failure, None);
    assert!(has_log(&task, "Download cancelled by user"));
    assert!(!has_log(&task, "Executing"));
    assert!(!harness.music_dir().join("launched").exists());
    assert!(!harness.music_dir().join("Slow Mix").exists());
    assert!(!manager.is_running("early-1"));
}

#[tokio::test]
async fn test_delete_during_lookup_never_launches_downloader() {
    let harness = Harness::new(
        r#"touch "$3/../launched""#,
        true,
        StaticCatalog::named("Slow Mix").delayed(Duration::from_millis(500)),
    );
    let manager = &harness.manager;
    let handle = manager.spawn_start("gone-1", PLAYLIST_URL, None);
    assert!(
        wait_until(manager, "gone-1", Duration::from_secs(5), |task| {
            has_log(task, "Detecting playlist name...")
        })
        .await
    );

    assert!(manager.delete("gone-1"));
    let result = tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .unwrap()
        .unwrap();

    assert!(matches!(result, Err(DownloadError::TaskNotFound(_))));
    assert!(manager.get_task("gone-1").is_none());
    assert!(!harness.music_dir().join("launched").exists());
    assert!(!harness.music_dir().join("Slow Mix").exists());
    assert!(!harness.dir.path().join("tasks").join("gone-1.json").exists());
    assert!(!manager.is_running("gone-1"));
}

#[tokio::test]
async fn test_batch_runs_every_url() {
    let harness = Harness::online(SUCCESS_SCRIPT);
    let urls = vec![
        TRACK_URL.to_string(),
        "https://open.spotify.com/track/1".to_string(),
        "https://open.spotify.com/track/2".to_string(),
    ];

    let results: Vec<_> = harness.manager.batch(urls.clone(), 2).collect().await;
    assert_eq!(results.len(), 3);
    for (_, result) in &results {
        assert_eq!(result.as_ref().unwrap().status, TaskStatus::Completed);
    }
    let mut seen: Vec<String> = results.into_iter().map(|(url, _)| url).collect();
    seen.sort();
    let mut expected = urls;
    expected.sort();
    assert_eq!(seen, expected);
    assert_eq!(harness.manager.get_all_tasks().len(), 3);
}

#[test]
fn test_task_ids_are_unique() {
    assert_ne!(new_task_id(), new_task_id());
}
