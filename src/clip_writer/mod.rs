//! Clip encoding and compression
//!
//! ## Responsibilities
//!
//! - Turn an extracted window into a finished MP4 on local disk
//! - Downsample to the upload frame rate while encoding
//! - Run the compression passes and enforce the size ceiling
//!
//! The raw encode goes to a sibling temp file; the final path only ever
//! holds a complete clip. Compression failures fall back to the raw encode
//! rather than losing the clip.

use crate::collaborators::{Compressor, Encoder, WatermarkApplier};
use crate::error::{Error, Result};
use crate::snapshot_extractor::SyncWindow;
use crate::state::CompressionProfile;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A finished clip on local disk
#[derive(Debug, Clone)]
pub struct ClipOutcome {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub frame_count: usize,
    /// Still above the size ceiling after the aggressive pass
    pub oversized: bool,
}

/// Writes extracted windows out as compressed clips
pub struct ClipWriter {
    encoder: Arc<dyn Encoder>,
    compressor: Option<Arc<dyn Compressor>>,
    watermark: Option<Arc<dyn WatermarkApplier>>,
    native_fps: u32,
    downsample_fps: u32,
    max_clip_bytes: u64,
    write_ceiling: Duration,
    profile: CompressionProfile,
    aggressive: CompressionProfile,
}

impl ClipWriter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        encoder: Arc<dyn Encoder>,
        compressor: Option<Arc<dyn Compressor>>,
        watermark: Option<Arc<dyn WatermarkApplier>>,
        native_fps: u32,
        downsample_fps: u32,
        max_clip_bytes: u64,
        write_ceiling: Duration,
        profile: CompressionProfile,
        aggressive: CompressionProfile,
    ) -> Self {
        Self {
            encoder,
            compressor,
            watermark,
            native_fps,
            downsample_fps,
            max_clip_bytes,
            write_ceiling,
            profile,
            aggressive,
        }
    }

    /// Write `window` to `final_path`. The window is consumed; its frames
    /// are released as soon as the raw encode finishes.
    pub async fn write(&self, window: SyncWindow, final_path: &Path) -> Result<ClipOutcome> {
        if window.frames.is_empty() {
            return Err(Error::Encode("window has no frames".to_string()));
        }

        if let Some(parent) = final_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let raw_path = sibling_path(final_path, "raw");
        let frame_count = self.encode_raw(window, raw_path.clone()).await?;

        let outcome = match &self.compressor {
            Some(compressor) => {
                self.compress_into_place(compressor.as_ref(), &raw_path, final_path, frame_count)
                    .await?
            }
            None => {
                tokio::fs::rename(&raw_path, final_path).await?;
                let size_bytes = tokio::fs::metadata(final_path).await?.len();
                ClipOutcome {
                    path: final_path.to_path_buf(),
                    size_bytes,
                    frame_count,
                    oversized: size_bytes > self.max_clip_bytes,
                }
            }
        };

        if raw_path.exists() {
            let _ = tokio::fs::remove_file(&raw_path).await;
        }

        tracing::info!(
            path = %outcome.path.display(),
            size_bytes = outcome.size_bytes,
            frames = outcome.frame_count,
            oversized = outcome.oversized,
            "Clip written"
        );
        Ok(outcome)
    }

    /// Raw encode on a blocking thread; the sink write path is synchronous
    async fn encode_raw(&self, window: SyncWindow, raw_path: PathBuf) -> Result<usize> {
        let encoder = Arc::clone(&self.encoder);
        let watermark = self.watermark.clone();
        let stride = (self.native_fps / self.downsample_fps).max(1) as usize;
        let fps = self.downsample_fps;
        let ceiling = self.write_ceiling;
        let camera_id = window.camera_id.clone();

        let frame_count = tokio::task::spawn_blocking(move || -> Result<usize> {
            let first = &window.frames[0];
            let size = (first.width, first.height);
            let mut sink = encoder.open_writer(&raw_path, fps, size)?;

            let started = Instant::now();
            let mut written = 0usize;
            for frame in window.frames.iter().step_by(stride) {
                // past the ceiling, finalize with what made it in
                if started.elapsed() > ceiling {
                    tracing::warn!(
                        camera_id = %camera_id,
                        written = written,
                        ceiling_sec = ceiling.as_secs(),
                        "Clip write hit the time ceiling, finalizing early"
                    );
                    break;
                }
                match &watermark {
                    Some(watermark) => sink.write_frame(&watermark.apply(frame).bytes)?,
                    None => sink.write_frame(&frame.bytes)?,
                }
                written += 1;
            }
            sink.finish()?;
            Ok(written)
        })
        .await
        .map_err(|e| Error::Internal(format!("encode task panicked: {}", e)))??;

        Ok(frame_count)
    }

    /// Normal pass, then the aggressive pass when still over the ceiling.
    /// A failed compression keeps the raw encode instead.
    async fn compress_into_place(
        &self,
        compressor: &dyn Compressor,
        raw_path: &Path,
        final_path: &Path,
        frame_count: usize,
    ) -> Result<ClipOutcome> {
        let tmp_path = sibling_path(final_path, "tmp");

        let compressed = match compressor.compress(raw_path, &tmp_path, &self.profile).await {
            Ok(path) => Some(path),
            Err(e) => {
                tracing::warn!(error = %e, "Compression failed, keeping raw encode");
                None
            }
        };

        let (source, size_bytes) = match compressed {
            Some(path) => {
                let mut size = tokio::fs::metadata(&path).await?.len();
                if size > self.max_clip_bytes {
                    tracing::info!(
                        size_bytes = size,
                        limit = self.max_clip_bytes,
                        "Clip over size limit, running aggressive pass"
                    );
                    let retry_path = sibling_path(final_path, "tmp2");
                    let retried = match compressor
                        .compress(raw_path, &retry_path, &self.aggressive)
                        .await
                    {
                        Ok(retry) => Some((retry, tokio::fs::metadata(&retry_path).await?.len())),
                        Err(e) => {
                            tracing::warn!(error = %e, "Aggressive pass failed");
                            None
                        }
                    };

                    match retried {
                        Some((retry, retry_size)) if retry_size <= self.max_clip_bytes => {
                            let _ = tokio::fs::remove_file(&path).await;
                            tokio::fs::rename(&retry, final_path).await?;
                            size = retry_size;
                        }
                        // neither pass got under the ceiling: ship the
                        // uncompressed encode rather than a degraded clip
                        other => {
                            if let Some((retry, retry_size)) = other {
                                tracing::warn!(
                                    size_bytes = retry_size,
                                    limit = self.max_clip_bytes,
                                    "Still over size limit, keeping uncompressed encode"
                                );
                                let _ = tokio::fs::remove_file(&retry).await;
                            }
                            let _ = tokio::fs::remove_file(&path).await;
                            tokio::fs::rename(raw_path, final_path).await?;
                            size = tokio::fs::metadata(final_path).await?.len();
                        }
                    }
                    (final_path.to_path_buf(), size)
                } else {
                    tokio::fs::rename(&path, final_path).await?;
                    (final_path.to_path_buf(), size)
                }
            }
            None => {
                tokio::fs::rename(raw_path, final_path).await?;
                let size = tokio::fs::metadata(final_path).await?.len();
                (final_path.to_path_buf(), size)
            }
        };

        Ok(ClipOutcome {
            path: source,
            size_bytes,
            frame_count,
            oversized: size_bytes > self.max_clip_bytes,
        })
    }
}

/// `/a/b/clip.mp4` + `raw` -> `/a/b/clip.raw.mp4`
fn sibling_path(path: &Path, tag: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("clip");
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("mp4");
    path.with_file_name(format!("{}.{}.{}", stem, tag, ext))
}
