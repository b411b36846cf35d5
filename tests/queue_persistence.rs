//! Restart durability of the upload queue
//!
//! Simulates a power cycle: enqueue against a file-backed database, drop
//! every connection, reopen, and check the pending work is still there.

use chrono::Utc;
use replay_station::upload_queue::{NewQueueEntry, UploadQueue};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::io::Write;
use std::path::Path;

async fn open_queue(db_path: &Path) -> UploadQueue {
    let pool = SqlitePoolOptions::new()
        .max_connections(2)
        .connect_with(
            SqliteConnectOptions::new()
                .filename(db_path)
                .create_if_missing(true),
        )
        .await
        .unwrap();
    UploadQueue::new(pool).await.unwrap()
}

fn clip_file(dir: &tempfile::TempDir, name: &str) -> String {
    let path = dir.path().join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(b"clip bytes").unwrap();
    path.to_string_lossy().into_owned()
}

fn entry(video_path: String) -> NewQueueEntry {
    NewQueueEntry {
        video_path,
        camera_id: "camera_1".to_string(),
        destination_key: Some("site/sub/2025/01/01/00/camera_1.mp4".to_string()),
        site: Some("site".to_string()),
        subsite: Some("sub".to_string()),
        session_id: Some("session-1".to_string()),
        file_size: 10,
        priority: 0,
        registration_linked: true,
        recorded_at: Utc::now(),
    }
}

#[tokio::test]
async fn pending_entries_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("upload_queue.db");

    {
        let queue = open_queue(&db_path).await;
        assert!(queue.enqueue(entry(clip_file(&dir, "a.mp4"))).await.unwrap());
        assert!(queue.enqueue(entry(clip_file(&dir, "b.mp4"))).await.unwrap());
        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.pending, 2);
        // queue dropped here, connections closed
    }

    let queue = open_queue(&db_path).await;
    let stats = queue.stats().await.unwrap();
    assert_eq!(stats.pending, 2);

    let batch = queue.dequeue_batch(10, 5).await.unwrap();
    assert_eq!(batch.len(), 2);
    assert_eq!(batch[0].camera_id, "camera_1");
    assert_eq!(batch[0].retry_count, 0);
}

#[tokio::test]
async fn retry_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("upload_queue.db");

    let id = {
        let queue = open_queue(&db_path).await;
        queue.enqueue(entry(clip_file(&dir, "a.mp4"))).await.unwrap();
        let id = queue.dequeue_batch(1, 5).await.unwrap()[0].id;
        queue.mark_attempt(id).await.unwrap();
        queue
            .mark_retryable_failure(id, "connection reset")
            .await
            .unwrap();
        id
    };

    let queue = open_queue(&db_path).await;
    let batch = queue.dequeue_batch(1, 5).await.unwrap();
    assert_eq!(batch[0].id, id);
    assert_eq!(batch[0].retry_count, 1);
    assert_eq!(batch[0].error_message.as_deref(), Some("connection reset"));
    assert!(batch[0].last_attempt.is_some());
}

#[tokio::test]
async fn completed_entries_stay_completed_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("upload_queue.db");

    {
        let queue = open_queue(&db_path).await;
        queue.enqueue(entry(clip_file(&dir, "a.mp4"))).await.unwrap();
        let id = queue.dequeue_batch(1, 5).await.unwrap()[0].id;
        queue.mark_completed(id, "https://example/clip").await.unwrap();
    }

    let queue = open_queue(&db_path).await;
    let stats = queue.stats().await.unwrap();
    assert_eq!(stats.completed, 1);
    assert!(queue.dequeue_batch(10, 5).await.unwrap().is_empty());
}
