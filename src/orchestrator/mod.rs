//! Trigger handling
//!
//! ## Responsibilities
//!
//! - Turn one operator trigger into synchronized clips from every camera
//! - Resolve placement once per trigger; clips from an unplaced device are
//!   still written and queued, held locally until placement appears
//! - Hand every written clip to the durable queue; never upload inline
//!
//! A trigger is serialized: a second trigger while clips are being written
//! is rejected rather than interleaved.

use crate::capture_supervisor::CaptureSupervisor;
use crate::clip_writer::{ClipOutcome, ClipWriter};
use crate::collaborators::{HierarchyResolver, Placement};
use crate::destination::{destination_key, local_clip_path, UNASSIGNED};
use crate::error::{Error, Result};
use crate::frame_buffer::epoch_now;
use crate::snapshot_extractor::{SnapshotExtractor, SyncWindow};
use crate::upload_queue::{NewQueueEntry, UploadQueue};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinSet;

/// Result for one camera within a trigger
pub struct CameraOutcome {
    pub camera_id: String,
    pub result: Result<ClipOutcome>,
}

/// Everything that happened for one trigger
pub struct TriggerReport {
    pub session_id: String,
    pub reference_ts: f64,
    pub recorded_at: DateTime<Utc>,
    pub placement_resolved: bool,
    pub outcomes: Vec<CameraOutcome>,
}

impl TriggerReport {
    pub fn saved(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }
}

pub struct RecordingOrchestrator {
    supervisors: Vec<Arc<CaptureSupervisor>>,
    extractor: SnapshotExtractor,
    writer: Arc<ClipWriter>,
    queue: Arc<UploadQueue>,
    resolver: Arc<dyn HierarchyResolver>,
    device_id: String,
    storage_dir: PathBuf,
    window_seconds: u32,
    trigger_active: AtomicBool,
}

impl RecordingOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        supervisors: Vec<Arc<CaptureSupervisor>>,
        extractor: SnapshotExtractor,
        writer: Arc<ClipWriter>,
        queue: Arc<UploadQueue>,
        resolver: Arc<dyn HierarchyResolver>,
        device_id: String,
        storage_dir: PathBuf,
        window_seconds: u32,
    ) -> Self {
        Self {
            supervisors,
            extractor,
            writer,
            queue,
            resolver,
            device_id,
            storage_dir,
            window_seconds,
            trigger_active: AtomicBool::new(false),
        }
    }

    /// Handle one operator trigger end to end. Per-camera failures are
    /// isolated: the report carries them while the other cameras proceed.
    pub async fn trigger(&self) -> Result<TriggerReport> {
        if self
            .trigger_active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::Validation("a save is already in progress".to_string()));
        }
        let report = self.run_trigger().await;
        self.trigger_active.store(false, Ordering::SeqCst);
        report
    }

    async fn run_trigger(&self) -> Result<TriggerReport> {
        // one reference instant shared by every camera, taken first
        let reference_ts = epoch_now();
        let recorded_at = Utc::now();
        let session_id = uuid::Uuid::new_v4().to_string();

        tracing::info!(
            session_id = %session_id,
            reference_ts = reference_ts,
            cameras = self.supervisors.len(),
            "Trigger received"
        );

        let placement = self.resolve_placement().await;

        // the saving hint spans extraction and writing, so the capture
        // health checks stay quiet for the whole save
        for supervisor in &self.supervisors {
            supervisor.set_saving(true);
        }

        // extract all windows before any write so alignment is not skewed
        // by encode time
        let mut windows: Vec<(String, Result<SyncWindow>)> = Vec::new();
        for supervisor in &self.supervisors {
            let camera_id = supervisor.camera_id().to_string();
            let extracted = self.extractor.extract(
                &camera_id,
                supervisor.buffer(),
                reference_ts,
                self.window_seconds,
            );
            if let Err(e) = &extracted {
                tracing::warn!(camera_id = %camera_id, error = %e, "Camera skipped this trigger");
            }
            windows.push((camera_id, extracted));
        }

        let outcomes = self
            .write_clips(windows, &placement, recorded_at, &session_id)
            .await;
        for supervisor in &self.supervisors {
            supervisor.set_saving(false);
        }

        let report = TriggerReport {
            session_id,
            reference_ts,
            recorded_at,
            placement_resolved: placement.is_some(),
            outcomes,
        };
        tracing::info!(
            session_id = %report.session_id,
            saved = report.saved(),
            total = report.outcomes.len(),
            placement_resolved = report.placement_resolved,
            "Trigger finished"
        );
        Ok(report)
    }

    /// Placement failures degrade to "unplaced", never to a lost trigger
    async fn resolve_placement(&self) -> Option<Placement> {
        match self.resolver.resolve_destination(&self.device_id).await {
            Ok(Some(placement)) => Some(placement),
            Ok(None) => {
                tracing::warn!(
                    device_id = %self.device_id,
                    "Device has no placement yet, clips will stay local"
                );
                None
            }
            Err(e) => {
                tracing::warn!(
                    device_id = %self.device_id,
                    error = %e,
                    "Placement resolution failed, clips will stay local"
                );
                None
            }
        }
    }

    async fn write_clips(
        &self,
        windows: Vec<(String, Result<SyncWindow>)>,
        placement: &Option<Placement>,
        recorded_at: DateTime<Utc>,
        session_id: &str,
    ) -> Vec<CameraOutcome> {
        let mut tasks: JoinSet<(String, Result<ClipOutcome>)> = JoinSet::new();
        let mut outcomes: Vec<CameraOutcome> = Vec::new();

        for (camera_id, extracted) in windows {
            let window = match extracted {
                Ok(window) => window,
                Err(e) => {
                    outcomes.push(CameraOutcome {
                        camera_id,
                        result: Err(e),
                    });
                    continue;
                }
            };

            let key = self.clip_key(placement, recorded_at, &camera_id);
            let path = local_clip_path(&self.storage_dir, &key);
            let writer = Arc::clone(&self.writer);
            tasks.spawn(async move {
                let result = writer.write(window, &path).await;
                (camera_id, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((camera_id, Ok(outcome))) => {
                    let result = self
                        .enqueue_clip(&camera_id, &outcome, placement, recorded_at, session_id)
                        .await
                        .map(|_| outcome);
                    outcomes.push(CameraOutcome { camera_id, result });
                }
                Ok((camera_id, Err(e))) => {
                    tracing::error!(camera_id = %camera_id, error = %e, "Clip write failed");
                    outcomes.push(CameraOutcome {
                        camera_id,
                        result: Err(e),
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "Clip write task panicked");
                }
            }
        }

        outcomes.sort_by(|a, b| a.camera_id.cmp(&b.camera_id));
        outcomes
    }

    fn clip_key(
        &self,
        placement: &Option<Placement>,
        recorded_at: DateTime<Utc>,
        camera_id: &str,
    ) -> String {
        match placement {
            Some(placement) => destination_key(
                &placement.site,
                &placement.subsite,
                recorded_at,
                camera_id,
                None,
                "mp4",
            ),
            None => destination_key(UNASSIGNED, UNASSIGNED, recorded_at, camera_id, None, "mp4"),
        }
    }

    async fn enqueue_clip(
        &self,
        camera_id: &str,
        outcome: &ClipOutcome,
        placement: &Option<Placement>,
        recorded_at: DateTime<Utc>,
        session_id: &str,
    ) -> Result<()> {
        let entry = NewQueueEntry {
            video_path: outcome.path.to_string_lossy().into_owned(),
            camera_id: camera_id.to_string(),
            destination_key: placement
                .as_ref()
                .map(|p| destination_key(&p.site, &p.subsite, recorded_at, camera_id, None, "mp4")),
            site: placement.as_ref().map(|p| p.site.clone()),
            subsite: placement.as_ref().map(|p| p.subsite.clone()),
            session_id: Some(session_id.to_string()),
            file_size: outcome.size_bytes as i64,
            priority: 0,
            registration_linked: placement.is_some(),
            recorded_at,
        };
        self.queue.enqueue(entry).await?;
        Ok(())
    }
}
