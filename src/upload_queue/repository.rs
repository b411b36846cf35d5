//! SQL access for the upload queue
//!
//! All statements live here; the service layer in [`super`] adds the
//! idempotency and policy decisions on top.

use super::types::{NewQueueEntry, QueueEntry, QueueStats, QueueStatus};
use crate::error::Result;
use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;

const SELECT_COLUMNS: &str = r#"
    SELECT id, video_path, camera_id, destination_key, site, subsite,
           session_id, file_size, priority, status, retry_count,
           last_attempt, error_message, remote_url, registration_linked,
           recorded_at, created_at
    FROM upload_queue
"#;

pub async fn find_pending_by_path(pool: &SqlitePool, video_path: &str) -> Result<Option<QueueEntry>> {
    let entry = sqlx::query_as::<_, QueueEntry>(&format!(
        "{SELECT_COLUMNS} WHERE video_path = ? AND status = 'pending'"
    ))
    .bind(video_path)
    .fetch_optional(pool)
    .await?;
    Ok(entry)
}

pub async fn insert(pool: &SqlitePool, entry: &NewQueueEntry) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO upload_queue
            (video_path, camera_id, destination_key, site, subsite, session_id,
             file_size, priority, status, retry_count, registration_linked,
             recorded_at, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'pending', 0, ?, ?, ?)
        "#,
    )
    .bind(&entry.video_path)
    .bind(&entry.camera_id)
    .bind(&entry.destination_key)
    .bind(&entry.site)
    .bind(&entry.subsite)
    .bind(&entry.session_id)
    .bind(entry.file_size)
    .bind(entry.priority)
    .bind(entry.registration_linked)
    .bind(entry.recorded_at)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(result.last_insert_rowid())
}

/// Pending entries ready for an upload attempt: placement resolved and
/// retries not exhausted. Highest priority first, then oldest.
pub async fn dequeue_batch(
    pool: &SqlitePool,
    batch_size: i64,
    max_retries: i64,
) -> Result<Vec<QueueEntry>> {
    let entries = sqlx::query_as::<_, QueueEntry>(&format!(
        r#"{SELECT_COLUMNS}
        WHERE status = 'pending'
          AND retry_count < ?
          AND destination_key IS NOT NULL
          AND site IS NOT NULL
          AND subsite IS NOT NULL
        ORDER BY priority DESC, created_at ASC
        LIMIT ?"#
    ))
    .bind(max_retries)
    .bind(batch_size)
    .fetch_all(pool)
    .await?;
    Ok(entries)
}

/// Pending entries still waiting on placement resolution
pub async fn get_unplaced_pending(pool: &SqlitePool) -> Result<Vec<QueueEntry>> {
    let entries = sqlx::query_as::<_, QueueEntry>(&format!(
        r#"{SELECT_COLUMNS}
        WHERE status = 'pending'
          AND (site IS NULL OR subsite IS NULL OR destination_key IS NULL)
        ORDER BY created_at ASC"#
    ))
    .fetch_all(pool)
    .await?;
    Ok(entries)
}

pub async fn set_placement(
    pool: &SqlitePool,
    id: i64,
    site: &str,
    subsite: &str,
    destination_key: &str,
) -> Result<()> {
    sqlx::query(
        "UPDATE upload_queue SET site = ?, subsite = ?, destination_key = ? WHERE id = ?",
    )
    .bind(site)
    .bind(subsite)
    .bind(destination_key)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Record that an attempt is starting: bumps the retry counter and stamps
/// the attempt time before the upload runs, so a crash mid-upload still
/// counts against the retry budget.
pub async fn mark_attempt(pool: &SqlitePool, id: i64) -> Result<()> {
    sqlx::query(
        "UPDATE upload_queue SET retry_count = retry_count + 1, last_attempt = ? WHERE id = ?",
    )
    .bind(Utc::now())
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Transition an entry. `completed` is terminal: a completed row is never
/// moved back to pending or failed.
pub async fn mark_status(
    pool: &SqlitePool,
    id: i64,
    status: QueueStatus,
    error_message: Option<&str>,
    remote_url: Option<&str>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE upload_queue
        SET status = ?, error_message = ?, remote_url = COALESCE(?, remote_url)
        WHERE id = ? AND status != 'completed'
        "#,
    )
    .bind(status)
    .bind(error_message)
    .bind(remote_url)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn stats(pool: &SqlitePool) -> Result<QueueStats> {
    let rows: Vec<(QueueStatus, i64, i64)> = sqlx::query_as(
        "SELECT status, COUNT(*), COALESCE(SUM(file_size), 0) FROM upload_queue GROUP BY status",
    )
    .fetch_all(pool)
    .await?;

    let mut stats = QueueStats::default();
    for (status, count, bytes) in rows {
        match status {
            QueueStatus::Pending => {
                stats.pending = count;
                stats.total_pending_bytes = bytes;
            }
            QueueStatus::Completed => stats.completed = count,
            QueueStatus::Failed => stats.failed = count,
        }
    }

    let (unplaced,): (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*) FROM upload_queue
        WHERE status = 'pending'
          AND (site IS NULL OR subsite IS NULL OR destination_key IS NULL)
        "#,
    )
    .fetch_one(pool)
    .await?;
    stats.unplaced = unplaced;

    Ok(stats)
}

/// Terminal rows older than `cleanup_horizon` are deleted; pending rows
/// older than `expiry` are failed. Returns (deleted, expired).
pub async fn sweep(
    pool: &SqlitePool,
    cleanup_horizon: Duration,
    expiry: Duration,
) -> Result<(u64, u64)> {
    let now = Utc::now();
    let cleanup_cutoff: DateTime<Utc> = now - cleanup_horizon;
    let expiry_cutoff: DateTime<Utc> = now - expiry;

    let expired = sqlx::query(
        r#"
        UPDATE upload_queue
        SET status = 'failed', error_message = 'expired before delivery'
        WHERE status = 'pending' AND created_at < ?
        "#,
    )
    .bind(expiry_cutoff)
    .execute(pool)
    .await?
    .rows_affected();

    let deleted = sqlx::query(
        "DELETE FROM upload_queue WHERE status IN ('completed', 'failed') AND created_at < ?",
    )
    .bind(cleanup_cutoff)
    .execute(pool)
    .await?
    .rows_affected();

    sqlx::query("DELETE FROM connectivity_log WHERE checked_at < ?")
        .bind(cleanup_cutoff)
        .execute(pool)
        .await?;

    Ok((deleted, expired))
}

pub async fn log_connectivity(
    pool: &SqlitePool,
    network_reachable: bool,
    service_reachable: bool,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO connectivity_log (network_reachable, service_reachable, checked_at) VALUES (?, ?, ?)",
    )
    .bind(network_reachable)
    .bind(service_reachable)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(())
}
