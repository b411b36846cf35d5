//! Application configuration
//!
//! Read once from the environment at startup; not live-reloaded.

use std::path::PathBuf;
use std::time::Duration;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// One configured camera (discovery itself is an external concern)
#[derive(Debug, Clone)]
pub struct CameraConfig {
    /// Stable camera identifier (e.g. "camera_1")
    pub camera_id: String,
    /// Source URI (RTSP or local device)
    pub uri: String,
    /// Frame width the source delivers
    pub width: u32,
    /// Frame height the source delivers
    pub height: u32,
}

/// FFmpeg compression profile for the post-encode pass
#[derive(Debug, Clone)]
pub struct CompressionProfile {
    pub crf: u32,
    pub max_bitrate_kbps: u32,
    pub fps: u32,
    pub width: u32,
    pub height: u32,
}

impl CompressionProfile {
    /// Fallback profile when the first pass leaves the clip over the size ceiling
    pub fn aggressive() -> Self {
        Self {
            crf: 32,
            max_bitrate_kbps: 1000,
            fps: 12,
            width: 960,
            height: 540,
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Configured cameras (CAMERA_URL_<id> environment variables)
    pub cameras: Vec<CameraConfig>,
    /// Device identity, derived externally and injected here
    pub device_id: String,

    /// Ring buffer retention per camera in seconds
    pub retention_seconds: u32,
    /// Native capture rate
    pub native_fps: u32,
    /// Output rate for written clips
    pub downsample_fps: u32,
    /// Windows shorter than this are rejected per camera
    pub min_window_seconds: u32,
    /// Consecutive read failures before the supervisor reconnects
    pub max_consecutive_read_failures: u32,

    /// Local clip storage root
    pub storage_dir: PathBuf,
    /// Durable queue database file
    pub queue_db_path: PathBuf,
    /// Size ceiling for delivered clips
    pub max_clip_size_mb: u64,
    /// Hard wall-clock ceiling for one clip write
    pub clip_write_ceiling: Duration,

    /// Compression pass enabled
    pub compression_enabled: bool,
    /// First-pass compression profile
    pub compression: CompressionProfile,

    /// Remote service base URL
    pub service_base_url: String,
    /// Remote storage bucket name
    pub storage_bucket: String,
    /// API key for the remote service
    pub service_api_key: Option<String>,

    /// Upload workers per drain cycle
    pub batch_size: usize,
    /// Attempts before an entry is permanently failed
    pub max_retries: i64,
    /// Linear backoff base between delivery attempts
    pub backoff_base: Duration,
    /// Per-attempt upload timeout
    pub upload_timeout: Duration,
    /// Connectivity check / queue drain interval
    pub check_interval: Duration,
    /// Per-probe timeout
    pub probe_timeout: Duration,
    /// Retries per connectivity layer
    pub probe_retries: u32,
    /// Fixed delay between probe retries
    pub probe_retry_delay: Duration,
    /// Completed/exhausted entries expire after this horizon
    pub queue_expiry_hours: i64,
    /// Remove the local file once delivery is durable
    pub delete_after_upload: bool,
}

impl AppConfig {
    /// Load configuration from the environment
    pub fn from_env() -> crate::Result<Self> {
        let mut cameras: Vec<CameraConfig> = Vec::new();
        let width = env_or("CAMERA_FRAME_WIDTH", 1280u32);
        let height = env_or("CAMERA_FRAME_HEIGHT", 720u32);

        for (key, value) in std::env::vars() {
            if let Some(id) = key.strip_prefix("CAMERA_URL_") {
                cameras.push(CameraConfig {
                    camera_id: format!("camera_{}", id.to_lowercase()),
                    uri: value,
                    width,
                    height,
                });
            }
        }
        cameras.sort_by(|a, b| a.camera_id.cmp(&b.camera_id));

        if cameras.is_empty() {
            return Err(crate::Error::Config(
                "no cameras configured (set CAMERA_URL_<id>)".to_string(),
            ));
        }

        Ok(Self {
            cameras,
            device_id: std::env::var("DEVICE_ID")
                .map_err(|_| crate::Error::Config("DEVICE_ID not set".to_string()))?,

            retention_seconds: env_or("BUFFER_SECONDS", 25),
            native_fps: env_or("CAMERA_FPS", 30),
            downsample_fps: env_or("VIDEO_FPS_UPLOAD", 15),
            min_window_seconds: env_or("MIN_WINDOW_SECONDS", 5),
            max_consecutive_read_failures: env_or("MAX_CONSECUTIVE_READ_FAILURES", 30),

            storage_dir: std::env::var("STORAGE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("recordings")),
            queue_db_path: std::env::var("QUEUE_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("offline_data/upload_queue.db")),
            max_clip_size_mb: env_or("MAX_FILE_SIZE_MB", 50),
            clip_write_ceiling: Duration::from_secs(env_or("CLIP_WRITE_CEILING_SECONDS", 120)),

            compression_enabled: env_or("VIDEO_COMPRESSION_ENABLED", true),
            compression: CompressionProfile {
                crf: env_or("VIDEO_QUALITY_CRF", 28),
                max_bitrate_kbps: env_or("VIDEO_BITRATE_KBPS", 2000),
                fps: env_or("VIDEO_FPS_UPLOAD", 15),
                width: env_or("VIDEO_SCALE_WIDTH", 1280),
                height: env_or("VIDEO_SCALE_HEIGHT", 720),
            },

            service_base_url: std::env::var("SERVICE_URL")
                .unwrap_or_else(|_| "http://localhost:8000".to_string()),
            storage_bucket: std::env::var("STORAGE_BUCKET")
                .unwrap_or_else(|_| "replays".to_string()),
            service_api_key: std::env::var("SERVICE_API_KEY").ok(),

            batch_size: env_or("OFFLINE_UPLOAD_BATCH_SIZE", 3),
            max_retries: env_or("OFFLINE_MAX_RETRY_ATTEMPTS", 5),
            backoff_base: Duration::from_secs(env_or("OFFLINE_RETRY_DELAY_BASE", 60)),
            upload_timeout: Duration::from_secs(env_or("UPLOAD_TIMEOUT_SECONDS", 300)),
            check_interval: Duration::from_secs(env_or("OFFLINE_CONNECTIVITY_CHECK_INTERVAL", 30)),
            probe_timeout: Duration::from_secs(env_or("NETWORK_CHECK_TIMEOUT", 10)),
            probe_retries: env_or("NETWORK_CHECK_RETRIES", 3),
            probe_retry_delay: Duration::from_secs_f64(env_or("NETWORK_CHECK_RETRY_DELAY", 2.0)),
            queue_expiry_hours: env_or("OFFLINE_EXPIRATION_HOURS", 168),
            delete_after_upload: env_or("OFFLINE_DELETE_AFTER_UPLOAD", true),
        })
    }

    /// Ring capacity per camera
    pub fn buffer_capacity(&self) -> usize {
        (self.native_fps * self.retention_seconds) as usize
    }

    /// Size ceiling in bytes
    pub fn max_clip_size_bytes(&self) -> u64 {
        self.max_clip_size_mb * 1024 * 1024
    }
}
