//! Background upload scheduler
//!
//! ## Responsibilities
//!
//! - Periodic cycle: connectivity check, placement backfill, queue drain
//! - Linear backoff between attempts per entry
//! - Durable completion before any local file deletion
//! - Daily sweep of expired and terminal queue rows
//!
//! Uploads never run inline with a trigger; the queue is the only path
//! to the network. One cycle uploads at most one batch, concurrently via
//! a `JoinSet`.

use crate::collaborators::{HierarchyResolver, RegistrationSink, RemoteStorage};
use crate::connectivity::ConnectivityMonitor;
use crate::destination::destination_key;
use crate::error::{Error, Result};
use crate::upload_queue::{QueueEntry, UploadQueue};
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;

/// Sweep cadence; one sweep per day is plenty
const SWEEP_INTERVAL: Duration = Duration::from_secs(24 * 3600);

/// Tunables for the scheduler, lifted from [`crate::state::AppConfig`]
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub batch_size: usize,
    pub max_retries: i64,
    pub backoff_base: Duration,
    pub check_interval: Duration,
    pub upload_timeout: Duration,
    pub queue_expiry_hours: i64,
    pub delete_after_upload: bool,
}

impl SchedulerSettings {
    pub fn from_config(config: &crate::state::AppConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            max_retries: config.max_retries,
            backoff_base: config.backoff_base,
            check_interval: config.check_interval,
            upload_timeout: config.upload_timeout,
            queue_expiry_hours: config.queue_expiry_hours,
            delete_after_upload: config.delete_after_upload,
        }
    }
}

pub struct UploadScheduler {
    queue: Arc<UploadQueue>,
    monitor: Arc<ConnectivityMonitor>,
    storage: Arc<dyn RemoteStorage>,
    resolver: Arc<dyn HierarchyResolver>,
    registration: Option<Arc<dyn RegistrationSink>>,
    device_id: String,
    settings: SchedulerSettings,
    running: AtomicBool,
    last_sweep: parking_lot::Mutex<Option<Instant>>,
}

impl UploadScheduler {
    pub fn new(
        queue: Arc<UploadQueue>,
        monitor: Arc<ConnectivityMonitor>,
        storage: Arc<dyn RemoteStorage>,
        resolver: Arc<dyn HierarchyResolver>,
        registration: Option<Arc<dyn RegistrationSink>>,
        device_id: String,
        settings: SchedulerSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            queue,
            monitor,
            storage,
            resolver,
            registration,
            device_id,
            settings,
            running: AtomicBool::new(false),
            last_sweep: parking_lot::Mutex::new(None),
        })
    }

    /// Spawn the periodic cycle. Returns immediately; call [`stop`] for a
    /// cooperative shutdown at the next tick.
    ///
    /// [`stop`]: UploadScheduler::stop
    pub fn start(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(scheduler.settings.check_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            tracing::info!(
                interval_sec = scheduler.settings.check_interval.as_secs(),
                "Upload scheduler started"
            );

            while scheduler.running.load(Ordering::SeqCst) {
                interval.tick().await;
                if !scheduler.running.load(Ordering::SeqCst) {
                    break;
                }
                scheduler.run_cycle().await;
            }
            tracing::info!("Upload scheduler stopped");
        })
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    async fn run_cycle(&self) {
        let state = self.monitor.check().await;
        if let Err(e) = self
            .queue
            .log_connectivity(state.network_reachable, state.service_reachable)
            .await
        {
            tracing::warn!(error = %e, "Connectivity log write failed");
        }

        if state.upload_enabled() {
            if let Err(e) = self.backfill_placement().await {
                tracing::warn!(error = %e, "Placement backfill failed");
            }
            if let Err(e) = self.drain_once().await {
                tracing::warn!(error = %e, "Queue drain failed");
            }
        } else {
            tracing::debug!(
                network = state.network_reachable,
                service = state.service_reachable,
                "Offline, holding queue"
            );
        }

        self.maybe_sweep().await;
    }

    /// Resolve placement for entries queued while the device was not yet
    /// associated, and stamp their destination keys. One resolver call per
    /// cycle regardless of backlog size.
    pub async fn backfill_placement(&self) -> Result<usize> {
        let unplaced = self.queue.unplaced_pending().await?;
        if unplaced.is_empty() {
            return Ok(0);
        }

        let placement = match self.resolver.resolve_destination(&self.device_id).await? {
            Some(placement) => placement,
            None => {
                tracing::debug!(
                    backlog = unplaced.len(),
                    "Device still unplaced, clips stay local"
                );
                return Ok(0);
            }
        };

        let mut updated = 0usize;
        for entry in unplaced {
            let key = destination_key(
                &placement.site,
                &placement.subsite,
                entry.recorded_at,
                &entry.camera_id,
                None,
                "mp4",
            );
            self.queue
                .set_placement(entry.id, &placement.site, &placement.subsite, &key)
                .await?;
            updated += 1;
        }
        tracing::info!(
            site = %placement.site,
            subsite = %placement.subsite,
            updated = updated,
            "Placement backfilled onto queued clips"
        );
        Ok(updated)
    }

    /// Upload one batch of eligible entries. Public so a shutdown path or a
    /// test can drain without the timer.
    pub async fn drain_once(&self) -> Result<usize> {
        let now = Utc::now();
        let batch = self
            .queue
            .dequeue_batch(self.settings.batch_size as i64, self.settings.max_retries)
            .await?;

        let eligible: Vec<QueueEntry> = batch
            .into_iter()
            .filter(|entry| self.backoff_elapsed(entry, now))
            .collect();
        if eligible.is_empty() {
            return Ok(0);
        }

        tracing::info!(count = eligible.len(), "Draining upload batch");

        let mut workers: JoinSet<()> = JoinSet::new();
        for entry in eligible {
            let scheduler = self.clone_refs();
            workers.spawn(async move {
                scheduler.process_entry(entry).await;
            });
        }

        let mut processed = 0usize;
        while let Some(result) = workers.join_next().await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Upload worker panicked");
            } else {
                processed += 1;
            }
        }
        Ok(processed)
    }

    /// Linear backoff: attempt n waits n * base after the previous attempt
    fn backoff_elapsed(&self, entry: &QueueEntry, now: DateTime<Utc>) -> bool {
        if entry.retry_count == 0 {
            return true;
        }
        let last = match entry.last_attempt {
            Some(last) => last,
            None => return true,
        };
        let wait = self.settings.backoff_base.as_secs() as i64 * entry.retry_count;
        (now - last).num_seconds() >= wait
    }

    async fn maybe_sweep(&self) {
        let due = {
            let last = self.last_sweep.lock();
            last.map(|at| at.elapsed() >= SWEEP_INTERVAL).unwrap_or(true)
        };
        if !due {
            return;
        }

        match self
            .queue
            .sweep(
                chrono::Duration::hours(24),
                chrono::Duration::hours(self.settings.queue_expiry_hours),
            )
            .await
        {
            Ok(_) => {
                *self.last_sweep.lock() = Some(Instant::now());
            }
            Err(e) => tracing::warn!(error = %e, "Queue sweep failed"),
        }
    }

    /// Cheap handle clone for worker tasks
    fn clone_refs(&self) -> SchedulerRefs {
        SchedulerRefs {
            queue: Arc::clone(&self.queue),
            storage: Arc::clone(&self.storage),
            registration: self.registration.clone(),
            settings: self.settings.clone(),
        }
    }
}

/// The subset of scheduler state a worker task needs
struct SchedulerRefs {
    queue: Arc<UploadQueue>,
    storage: Arc<dyn RemoteStorage>,
    registration: Option<Arc<dyn RegistrationSink>>,
    settings: SchedulerSettings,
}

impl SchedulerRefs {
    async fn process_entry(&self, entry: QueueEntry) {
        if let Err(e) = self.try_upload(&entry).await {
            let attempts = entry.retry_count + 1;
            let exhausted = attempts >= self.settings.max_retries;
            let permanent = !e.is_retryable_delivery();

            tracing::warn!(
                id = entry.id,
                video_path = %entry.video_path,
                attempts = attempts,
                error = %e,
                "Upload attempt failed"
            );

            let marked = if exhausted || permanent {
                self.queue.mark_failed(entry.id, &e.to_string()).await
            } else {
                self.queue
                    .mark_retryable_failure(entry.id, &e.to_string())
                    .await
            };
            if let Err(e) = marked {
                tracing::error!(id = entry.id, error = %e, "Failed to record upload failure");
            }
        }
    }

    async fn try_upload(&self, entry: &QueueEntry) -> Result<()> {
        let local_path = Path::new(&entry.video_path);
        if !local_path.is_file() {
            return Err(Error::Validation(format!(
                "local clip vanished: {}",
                entry.video_path
            )));
        }

        let key = entry
            .destination_key
            .as_deref()
            .ok_or_else(|| Error::Validation("entry dequeued without destination".to_string()))?;

        self.queue.mark_attempt(entry.id).await?;

        let receipt = tokio::time::timeout(
            self.settings.upload_timeout,
            self.storage.upload(local_path, key),
        )
        .await
        .map_err(|_| {
            Error::Delivery(format!(
                "upload timed out after {}s",
                self.settings.upload_timeout.as_secs()
            ))
        })??;

        self.queue.mark_completed(entry.id, &receipt.remote_url).await?;
        tracing::info!(
            id = entry.id,
            remote_url = %receipt.remote_url,
            duplicate = receipt.duplicate,
            "Clip delivered"
        );

        if entry.registration_linked {
            if let Some(registration) = &self.registration {
                if let Err(e) = registration
                    .record_clip(&entry.camera_id, &receipt.remote_url, entry.recorded_at, key)
                    .await
                {
                    tracing::warn!(id = entry.id, error = %e, "Clip registration failed");
                }
            }
        }

        if self.settings.delete_after_upload {
            if let Err(e) = tokio::fs::remove_file(local_path).await {
                tracing::warn!(
                    video_path = %entry.video_path,
                    error = %e,
                    "Could not remove local clip after delivery"
                );
            }
        }
        Ok(())
    }
}
