//! Durable store-and-forward queue for recorded clips
//!
//! ## Responsibilities
//!
//! - Persist every written clip before any upload attempt
//! - Survive restarts: pending rows are picked up again on boot
//! - Idempotent enqueue keyed on the local clip path
//! - Retry accounting, expiry and terminal-row cleanup
//!
//! Backed by SQLite via `sqlx`. The schema is owned by
//! [`migrations`], which runs at construction; a migration failure is
//! fatal for the caller.

pub mod migrations;
mod repository;
pub mod types;

pub use types::{NewQueueEntry, QueueEntry, QueueStats, QueueStatus};

use crate::error::{Error, Result};
use chrono::Duration;
use sqlx::SqlitePool;
use std::path::Path;

pub struct UploadQueue {
    pool: SqlitePool,
}

impl UploadQueue {
    /// Open the queue over `pool`, applying schema migrations
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        migrations::run(&pool).await?;
        Ok(Self { pool })
    }

    /// Enqueue a clip for upload. Returns `false` when the same local path
    /// is already pending, so a re-trigger over an unuploaded clip does not
    /// double-queue it.
    pub async fn enqueue(&self, entry: NewQueueEntry) -> Result<bool> {
        if !Path::new(&entry.video_path).is_file() {
            return Err(Error::Validation(format!(
                "clip file missing at enqueue: {}",
                entry.video_path
            )));
        }

        if let Some(existing) = repository::find_pending_by_path(&self.pool, &entry.video_path).await?
        {
            tracing::debug!(
                id = existing.id,
                video_path = %entry.video_path,
                "Clip already pending, not re-queued"
            );
            return Ok(false);
        }

        let id = repository::insert(&self.pool, &entry).await?;
        tracing::info!(
            id = id,
            video_path = %entry.video_path,
            camera_id = %entry.camera_id,
            placed = entry.destination_key.is_some(),
            "Clip queued for upload"
        );
        Ok(true)
    }

    /// Next batch of upload-ready entries
    pub async fn dequeue_batch(&self, batch_size: i64, max_retries: i64) -> Result<Vec<QueueEntry>> {
        repository::dequeue_batch(&self.pool, batch_size, max_retries).await
    }

    /// Pending entries held back because the device placement is unknown
    pub async fn unplaced_pending(&self) -> Result<Vec<QueueEntry>> {
        repository::get_unplaced_pending(&self.pool).await
    }

    /// Backfill placement onto an entry queued before resolution succeeded
    pub async fn set_placement(
        &self,
        id: i64,
        site: &str,
        subsite: &str,
        destination_key: &str,
    ) -> Result<()> {
        repository::set_placement(&self.pool, id, site, subsite, destination_key).await
    }

    pub async fn mark_attempt(&self, id: i64) -> Result<()> {
        repository::mark_attempt(&self.pool, id).await
    }

    pub async fn mark_completed(&self, id: i64, remote_url: &str) -> Result<()> {
        repository::mark_status(&self.pool, id, QueueStatus::Completed, None, Some(remote_url))
            .await?;
        Ok(())
    }

    /// Keep the entry pending with the failure recorded; it stays eligible
    /// for retry until the retry budget runs out.
    pub async fn mark_retryable_failure(&self, id: i64, error: &str) -> Result<()> {
        repository::mark_status(&self.pool, id, QueueStatus::Pending, Some(error), None).await?;
        Ok(())
    }

    pub async fn mark_failed(&self, id: i64, error: &str) -> Result<()> {
        repository::mark_status(&self.pool, id, QueueStatus::Failed, Some(error), None).await?;
        Ok(())
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        repository::stats(&self.pool).await
    }

    /// Expire stale pending rows and delete old terminal rows
    pub async fn sweep(&self, cleanup_horizon: Duration, expiry: Duration) -> Result<(u64, u64)> {
        let (deleted, expired) = repository::sweep(&self.pool, cleanup_horizon, expiry).await?;
        if deleted > 0 || expired > 0 {
            tracing::info!(deleted = deleted, expired = expired, "Queue sweep finished");
        }
        Ok((deleted, expired))
    }

    pub async fn log_connectivity(&self, network: bool, service: bool) -> Result<()> {
        repository::log_connectivity(&self.pool, network, service).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::io::Write;

    async fn memory_queue() -> UploadQueue {
        // one connection: each in-memory connection is its own database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        UploadQueue::new(pool).await.unwrap()
    }

    fn clip_file(dir: &tempfile::TempDir, name: &str) -> String {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(b"not really mp4").unwrap();
        path.to_string_lossy().into_owned()
    }

    fn entry(video_path: String, placed: bool) -> NewQueueEntry {
        NewQueueEntry {
            video_path,
            camera_id: "camera_1".to_string(),
            destination_key: placed.then(|| "site/sub/2025/01/01/00/c.mp4".to_string()),
            site: placed.then(|| "site".to_string()),
            subsite: placed.then(|| "sub".to_string()),
            session_id: Some("session-1".to_string()),
            file_size: 14,
            priority: 0,
            registration_linked: placed,
            recorded_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_enqueue_is_idempotent_on_pending_path() {
        let dir = tempfile::tempdir().unwrap();
        let queue = memory_queue().await;
        let path = clip_file(&dir, "a.mp4");

        assert!(queue.enqueue(entry(path.clone(), true)).await.unwrap());
        assert!(!queue.enqueue(entry(path, true)).await.unwrap());

        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.pending, 1);
    }

    #[tokio::test]
    async fn test_enqueue_rejects_missing_file() {
        let queue = memory_queue().await;
        let result = queue
            .enqueue(entry("/nonexistent/clip.mp4".to_string(), true))
            .await;
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn test_dequeue_orders_priority_then_age() {
        let dir = tempfile::tempdir().unwrap();
        let queue = memory_queue().await;

        let mut low = entry(clip_file(&dir, "low.mp4"), true);
        low.priority = 0;
        let mut high = entry(clip_file(&dir, "high.mp4"), true);
        high.priority = 5;
        queue.enqueue(low).await.unwrap();
        queue.enqueue(high).await.unwrap();

        let batch = queue.dequeue_batch(10, 5).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert!(batch[0].video_path.ends_with("high.mp4"));
        assert!(batch[1].video_path.ends_with("low.mp4"));
    }

    #[tokio::test]
    async fn test_unplaced_entries_are_held_back() {
        let dir = tempfile::tempdir().unwrap();
        let queue = memory_queue().await;

        queue
            .enqueue(entry(clip_file(&dir, "a.mp4"), false))
            .await
            .unwrap();

        assert!(queue.dequeue_batch(10, 5).await.unwrap().is_empty());
        let unplaced = queue.unplaced_pending().await.unwrap();
        assert_eq!(unplaced.len(), 1);

        queue
            .set_placement(unplaced[0].id, "site", "sub", "site/sub/k.mp4")
            .await
            .unwrap();
        assert_eq!(queue.dequeue_batch(10, 5).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_retry_budget_excludes_exhausted() {
        let dir = tempfile::tempdir().unwrap();
        let queue = memory_queue().await;
        queue
            .enqueue(entry(clip_file(&dir, "a.mp4"), true))
            .await
            .unwrap();

        let id = queue.dequeue_batch(1, 3).await.unwrap()[0].id;
        for _ in 0..3 {
            queue.mark_attempt(id).await.unwrap();
            queue.mark_retryable_failure(id, "connection reset").await.unwrap();
        }

        assert!(queue.dequeue_batch(1, 3).await.unwrap().is_empty());
        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.pending, 1); // still pending, just out of budget
    }

    #[tokio::test]
    async fn test_completed_is_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let queue = memory_queue().await;
        queue
            .enqueue(entry(clip_file(&dir, "a.mp4"), true))
            .await
            .unwrap();

        let id = queue.dequeue_batch(1, 5).await.unwrap()[0].id;
        queue.mark_completed(id, "https://example/clip").await.unwrap();
        // a late failure report must not resurrect the row
        queue.mark_retryable_failure(id, "late timeout").await.unwrap();

        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.pending, 0);
    }

    #[tokio::test]
    async fn test_sweep_expires_and_deletes() {
        let dir = tempfile::tempdir().unwrap();
        let queue = memory_queue().await;
        queue
            .enqueue(entry(clip_file(&dir, "a.mp4"), true))
            .await
            .unwrap();

        // horizon/expiry of zero: the pending row expires to failed and the
        // now-terminal row is deleted in the same pass
        let (deleted, expired) = queue
            .sweep(Duration::zero(), Duration::zero())
            .await
            .unwrap();
        assert_eq!(expired, 1);
        assert_eq!(deleted, 1);
        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.pending + stats.completed + stats.failed, 0);
    }
}
