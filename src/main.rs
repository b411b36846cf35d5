//! Replay Station - multi-camera synchronized replay recorder
//!
//! Main entry point: wires the capture supervisors, the trigger
//! orchestrator and the background upload scheduler together, then reads
//! operator commands from stdin until shutdown.

use replay_station::{
    capture_supervisor::CaptureSupervisor,
    clip_writer::ClipWriter,
    collaborators::{
        ffmpeg::{check_ffmpeg, FfmpegCompressor, FfmpegEncoder, FfmpegVideoSource},
        remote::{HttpHierarchyResolver, HttpRegistrationSink, HttpRemoteStorage, RemoteConfig},
        Compressor,
    },
    connectivity::ConnectivityMonitor,
    frame_buffer::FrameBuffer,
    orchestrator::RecordingOrchestrator,
    snapshot_extractor::SnapshotExtractor,
    state::{AppConfig, CompressionProfile},
    upload_queue::UploadQueue,
    upload_scheduler::{SchedulerSettings, UploadScheduler},
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "replay_station=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Replay Station v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::from_env()?;
    tracing::info!(
        cameras = config.cameras.len(),
        device_id = %config.device_id,
        storage_dir = %config.storage_dir.display(),
        queue_db = %config.queue_db_path.display(),
        service_url = %config.service_base_url,
        "Configuration loaded"
    );

    match check_ffmpeg().await {
        Ok(version) => tracing::info!(version = %version, "ffmpeg available"),
        Err(e) => tracing::warn!(error = %e, "ffmpeg check failed, capture will not work"),
    }

    // Queue database
    if let Some(parent) = config.queue_db_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(10))
        .connect_with(
            SqliteConnectOptions::new()
                .filename(&config.queue_db_path)
                .create_if_missing(true),
        )
        .await?;
    let queue = Arc::new(UploadQueue::new(pool).await?);
    tracing::info!("Upload queue ready");

    // Remote collaborators
    let remote = RemoteConfig {
        base_url: config.service_base_url.clone(),
        bucket: config.storage_bucket.clone(),
        api_key: config.service_api_key.clone(),
    };
    let storage = Arc::new(HttpRemoteStorage::new(remote.clone(), config.upload_timeout)?);
    let resolver = Arc::new(HttpHierarchyResolver::new(remote.clone(), config.probe_timeout)?);
    let registration = Arc::new(HttpRegistrationSink::new(remote, config.probe_timeout)?);
    let monitor = Arc::new(ConnectivityMonitor::new(
        config.service_base_url.clone(),
        config.probe_timeout,
        config.probe_retries,
        config.probe_retry_delay,
    )?);

    // Capture side
    let source = Arc::new(FfmpegVideoSource::new(
        config.cameras[0].width,
        config.cameras[0].height,
        config.native_fps,
    ));
    let mut supervisors = Vec::new();
    let mut capture_handles = Vec::new();
    for camera in &config.cameras {
        let buffer = Arc::new(FrameBuffer::new(
            config.native_fps,
            config.retention_seconds,
        ));
        let supervisor = CaptureSupervisor::new(
            camera.clone(),
            buffer,
            Arc::clone(&source) as Arc<dyn replay_station::collaborators::VideoSource>,
            config.max_consecutive_read_failures,
            Duration::from_secs(1),
            Duration::from_millis(1000 / u64::from(config.native_fps.max(1))),
        );
        capture_handles.push(supervisor.start());
        supervisors.push(supervisor);
    }
    tracing::info!(count = supervisors.len(), "Capture supervisors started");

    // Clip pipeline
    let compressor: Option<Arc<dyn Compressor>> = config
        .compression_enabled
        .then(|| Arc::new(FfmpegCompressor) as Arc<dyn Compressor>);
    let writer = Arc::new(ClipWriter::new(
        Arc::new(FfmpegEncoder),
        compressor,
        None,
        config.native_fps,
        config.downsample_fps,
        config.max_clip_size_bytes(),
        config.clip_write_ceiling,
        config.compression.clone(),
        CompressionProfile::aggressive(),
    ));

    let orchestrator = Arc::new(RecordingOrchestrator::new(
        supervisors.clone(),
        SnapshotExtractor::new(config.native_fps, config.min_window_seconds),
        writer,
        Arc::clone(&queue),
        resolver.clone(),
        config.device_id.clone(),
        config.storage_dir.clone(),
        config.retention_seconds,
    ));

    // Background delivery
    let scheduler = UploadScheduler::new(
        Arc::clone(&queue),
        monitor,
        storage,
        resolver,
        Some(registration),
        config.device_id.clone(),
        SchedulerSettings::from_config(&config),
    );
    let scheduler_handle = scheduler.start();

    tracing::info!("Ready. Commands: s/save = record replay, q/quit = shutdown");

    // Operator command loop on stdin, racing Ctrl-C
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl-C received, shutting down");
                break;
            }
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        match line.trim().to_lowercase().as_str() {
                            "s" | "save" => {
                                let orchestrator = Arc::clone(&orchestrator);
                                match orchestrator.trigger().await {
                                    Ok(report) => tracing::info!(
                                        session_id = %report.session_id,
                                        saved = report.saved(),
                                        total = report.outcomes.len(),
                                        "Replay saved"
                                    ),
                                    Err(e) => tracing::error!(error = %e, "Trigger failed"),
                                }
                            }
                            "q" | "quit" | "exit" => break,
                            "" => {}
                            other => tracing::warn!(command = %other, "Unknown command"),
                        }
                    }
                    Ok(None) => break, // stdin closed
                    Err(e) => {
                        tracing::error!(error = %e, "stdin read failed");
                        break;
                    }
                }
            }
        }
    }

    // Cooperative shutdown: stop the loops, then wait for them to exit
    tracing::info!("Stopping services");
    scheduler.stop();
    for supervisor in &supervisors {
        supervisor.stop();
    }
    for handle in capture_handles {
        let _ = handle.await;
    }
    let _ = scheduler_handle.await;

    tracing::info!("Replay Station stopped");
    Ok(())
}
