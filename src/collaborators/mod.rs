//! Collaborator contracts consumed by the core
//!
//! Each external dependency (camera source, codec, compressor, watermark,
//! remote store, hierarchy, registration) is a narrow capability interface
//! so the orchestrator and scheduler can take test doubles. Production
//! implementations live in [`ffmpeg`] and [`remote`].

pub mod ffmpeg;
pub mod remote;

use crate::error::Result;
use crate::frame_buffer::Frame;
use crate::state::CompressionProfile;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

/// Opens camera sources. Reads are blocking; the supervisor runs them on a
/// dedicated capture thread.
pub trait VideoSource: Send + Sync {
    fn open(&self, uri: &str) -> Result<Box<dyn SourceHandle>>;
}

/// One open camera connection
pub trait SourceHandle: Send {
    /// Blocking read of the next frame. `Ok(None)` means the source yielded
    /// nothing this cycle; the supervisor counts it as a read failure.
    fn read(&mut self) -> Result<Option<Frame>>;

    fn close(&mut self);
}

/// Opens clip sinks for a given container/codec
pub trait Encoder: Send + Sync {
    fn open_writer(&self, path: &Path, fps: u32, size: (u32, u32)) -> Result<Box<dyn ClipSink>>;
}

/// One open clip file being written
pub trait ClipSink: Send {
    fn write_frame(&mut self, bytes: &[u8]) -> Result<()>;

    /// Flush and close the container
    fn finish(&mut self) -> Result<()>;
}

/// Post-encode compression pass
#[async_trait]
pub trait Compressor: Send + Sync {
    async fn compress(
        &self,
        input: &Path,
        output: &Path,
        profile: &CompressionProfile,
    ) -> Result<PathBuf>;
}

/// Per-frame watermark compositing (externally supplied)
pub trait WatermarkApplier: Send + Sync {
    fn apply(&self, frame: &Frame) -> Frame;
}

/// Result of one remote upload
#[derive(Debug, Clone)]
pub struct UploadReceipt {
    pub remote_url: String,
    /// The remote store already held this key; treated as success
    pub duplicate: bool,
}

/// Remote clip store
#[async_trait]
pub trait RemoteStorage: Send + Sync {
    async fn upload(&self, local_path: &Path, remote_key: &str) -> Result<UploadReceipt>;

    async fn verify(&self, remote_key: &str, expected_size: Option<u64>) -> Result<bool>;

    async fn sign_url(&self, remote_key: &str, ttl_secs: u64) -> Result<String>;
}

/// Logical placement of this device, required before any upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub site: String,
    pub subsite: String,
}

/// Maps a device identity to its site/subsite placement
#[async_trait]
pub trait HierarchyResolver: Send + Sync {
    /// `Ok(None)` means the device is not (yet) associated anywhere
    async fn resolve_destination(&self, device_id: &str) -> Result<Option<Placement>>;
}

/// Records a delivered clip in the remote business system
#[async_trait]
pub trait RegistrationSink: Send + Sync {
    async fn record_clip(
        &self,
        camera_id: &str,
        remote_url: &str,
        recorded_at: DateTime<Utc>,
        remote_key: &str,
    ) -> Result<()>;
}
