//! Cross-camera synchronized window extraction
//!
//! ## Responsibilities
//!
//! - Slice a time-aligned window out of one camera's ring buffer
//! - Guarantee alignment across cameras via a shared reference timestamp
//!
//! Each camera is extracted independently with the *same* reference
//! timestamp captured once at trigger time, so the resulting windows all
//! end at or before that instant regardless of per-camera fill level or
//! clock drift.

use crate::error::{Error, Result};
use crate::frame_buffer::{Frame, FrameBuffer};

/// A time-aligned slice of one camera's buffer, ending at or before the
/// shared reference timestamp. Immutable once produced.
#[derive(Debug, Clone)]
pub struct SyncWindow {
    pub camera_id: String,
    /// Oldest first; each frame carries its capture timestamp
    pub frames: Vec<Frame>,
    pub reference_ts: f64,
    /// Set when fewer frames than the requested window were available
    pub short_window: bool,
}

impl SyncWindow {
    pub fn start_ts(&self) -> Option<f64> {
        self.frames.first().map(|f| f.captured_at)
    }

    pub fn end_ts(&self) -> Option<f64> {
        self.frames.last().map(|f| f.captured_at)
    }

    /// Seconds covered by the window
    pub fn span_seconds(&self) -> f64 {
        match (self.start_ts(), self.end_ts()) {
            (Some(start), Some(end)) => end - start,
            _ => 0.0,
        }
    }
}

/// Extracts synchronized windows from frame buffers
pub struct SnapshotExtractor {
    fps: u32,
    min_window_seconds: u32,
}

impl SnapshotExtractor {
    pub fn new(fps: u32, min_window_seconds: u32) -> Self {
        Self {
            fps,
            min_window_seconds,
        }
    }

    /// Extract up to `window_seconds` of frames ending at the latest frame
    /// with timestamp <= `reference_ts`.
    ///
    /// Returns `BufferUnderrun` when fewer than `min_window_seconds` worth
    /// of frames are available; the caller skips this camera and proceeds
    /// with the others.
    ///
    /// A reference older than the oldest buffered frame yields the earliest
    /// available window instead, flagged `short_window`.
    pub fn extract(
        &self,
        camera_id: &str,
        buffer: &FrameBuffer,
        reference_ts: f64,
        window_seconds: u32,
    ) -> Result<SyncWindow> {
        let frames = buffer.snapshot();
        let min_frames = (self.fps * self.min_window_seconds) as usize;

        if frames.is_empty() {
            return Err(Error::BufferUnderrun {
                camera_id: camera_id.to_string(),
                frames: 0,
                required: min_frames,
            });
        }

        let target_frames = (self.fps * window_seconds) as usize;

        // Latest index at or before the reference; everything in the buffer
        // may be newer than the reference when the trigger raced a stale
        // clock, in which case we fall back to the earliest window.
        let sync_index = frames
            .iter()
            .rposition(|f| f.captured_at <= reference_ts);

        let (slice, short_window) = match sync_index {
            Some(sync_index) => {
                let start = (sync_index + 1).saturating_sub(target_frames);
                let slice = frames[start..=sync_index].to_vec();
                let short = slice.len() < target_frames;
                (slice, short)
            }
            None => {
                tracing::warn!(
                    camera_id = %camera_id,
                    reference_ts = reference_ts,
                    oldest_ts = frames[0].captured_at,
                    "Reference timestamp predates the buffer, using earliest window"
                );
                let end = target_frames.min(frames.len());
                (frames[..end].to_vec(), true)
            }
        };

        if slice.len() < min_frames {
            return Err(Error::BufferUnderrun {
                camera_id: camera_id.to_string(),
                frames: slice.len(),
                required: min_frames,
            });
        }

        let window = SyncWindow {
            camera_id: camera_id.to_string(),
            frames: slice,
            reference_ts,
            short_window,
        };

        tracing::debug!(
            camera_id = %camera_id,
            reference_ts = reference_ts,
            frames = window.frames.len(),
            span_seconds = window.span_seconds(),
            short_window = window.short_window,
            "Window extracted"
        );

        Ok(window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_buffer::test_frame;

    fn filled_buffer(fps: u32, retention: u32, start_ts: f64, count: usize) -> FrameBuffer {
        let buffer = FrameBuffer::new(fps, retention);
        for i in 0..count {
            buffer.push(test_frame(start_ts + i as f64 / f64::from(fps)));
        }
        buffer
    }

    #[test]
    fn test_window_ends_at_or_before_reference() {
        let buffer = filled_buffer(30, 25, 975.0, 750); // spans 975.0..1000.0
        let extractor = SnapshotExtractor::new(30, 5);

        let window = extractor.extract("camera_1", &buffer, 990.0, 25).unwrap();
        assert!(window.end_ts().unwrap() <= 990.0);
        for frame in &window.frames {
            assert!(frame.captured_at <= 990.0);
        }
    }

    #[test]
    fn test_full_window_spans_requested_seconds() {
        // trigger at t=1000.0, window=25s, buffer spans 975.0..1000.0
        let buffer = filled_buffer(30, 25, 975.0, 750);
        let extractor = SnapshotExtractor::new(30, 5);

        let window = extractor.extract("camera_1", &buffer, 1000.0, 25).unwrap();
        assert_eq!(window.frames.len(), 750);
        assert!((window.start_ts().unwrap() - 975.0).abs() < 1.0 / 30.0);
        assert!(!window.short_window);
        assert!((window.span_seconds() - 25.0).abs() < 0.5);
    }

    #[test]
    fn test_two_buffers_align_on_shared_reference() {
        // Independently fed buffers with different fill and slight offset
        let a = filled_buffer(30, 25, 975.0, 750);
        let b = filled_buffer(30, 25, 980.01, 600);
        let extractor = SnapshotExtractor::new(30, 5);
        let reference = 1000.0;

        let wa = extractor.extract("a", &a, reference, 25).unwrap();
        let wb = extractor.extract("b", &b, reference, 25).unwrap();

        assert!(wa.end_ts().unwrap() <= reference);
        assert!(wb.end_ts().unwrap() <= reference);
        // Both end within one frame interval of each other
        assert!((wa.end_ts().unwrap() - wb.end_ts().unwrap()).abs() < 1.0 / 30.0 + 0.02);
    }

    #[test]
    fn test_underrun_rejected() {
        let buffer = filled_buffer(30, 25, 0.0, 60); // 2s worth, minimum is 5s
        let extractor = SnapshotExtractor::new(30, 5);

        let result = extractor.extract("camera_1", &buffer, 2.0, 25);
        assert!(matches!(
            result,
            Err(Error::BufferUnderrun { frames: 60, .. })
        ));
    }

    #[test]
    fn test_partial_fill_flags_short_window() {
        let buffer = filled_buffer(30, 25, 0.0, 300); // 10s worth
        let extractor = SnapshotExtractor::new(30, 5);

        let window = extractor.extract("camera_1", &buffer, 10.0, 25).unwrap();
        assert!(window.short_window);
        assert_eq!(window.frames.len(), 300);
    }

    #[test]
    fn test_reference_before_buffer_uses_earliest() {
        let buffer = filled_buffer(30, 25, 500.0, 300);
        let extractor = SnapshotExtractor::new(30, 5);

        let window = extractor.extract("camera_1", &buffer, 100.0, 25).unwrap();
        assert!(window.short_window);
        assert_eq!(window.start_ts().unwrap(), 500.0);
    }
}
