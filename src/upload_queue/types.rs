//! Queue row types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a queued clip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    /// Waiting for upload (or retry)
    Pending,
    /// Durably delivered to the remote store
    Completed,
    /// Permanently abandoned (retries exhausted or file lost)
    Failed,
}

/// One persisted queue row
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct QueueEntry {
    pub id: i64,
    pub video_path: String,
    pub camera_id: String,
    /// NULL while the device placement is unresolved
    pub destination_key: Option<String>,
    pub site: Option<String>,
    pub subsite: Option<String>,
    /// Trigger session the clip belongs to
    pub session_id: Option<String>,
    pub file_size: i64,
    pub priority: i64,
    pub status: QueueStatus,
    pub retry_count: i64,
    pub last_attempt: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub remote_url: Option<String>,
    /// Whether the clip should be registered remotely after delivery
    pub registration_linked: bool,
    pub recorded_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Fields supplied at enqueue time
#[derive(Debug, Clone)]
pub struct NewQueueEntry {
    pub video_path: String,
    pub camera_id: String,
    pub destination_key: Option<String>,
    pub site: Option<String>,
    pub subsite: Option<String>,
    pub session_id: Option<String>,
    pub file_size: i64,
    pub priority: i64,
    pub registration_linked: bool,
    pub recorded_at: DateTime<Utc>,
}

/// Aggregate queue counters for status reporting
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct QueueStats {
    pub pending: i64,
    pub completed: i64,
    pub failed: i64,
    pub unplaced: i64,
    pub total_pending_bytes: i64,
}
