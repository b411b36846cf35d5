//! Per-camera ring buffer of recent frames
//!
//! ## Responsibilities
//!
//! - Fixed-capacity FIFO store, oldest frame evicted on wrap
//! - Bounded-time consistent snapshot for the extractor
//! - Fill/span health reporting for the capture supervisor
//!
//! The lock is held only for O(1) push/evict or the snapshot copy, never
//! across I/O. Frame payloads are shared (`Arc`), so a snapshot copies
//! handles, not pixels.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Current time as epoch seconds, the process-wide frame clock
pub fn epoch_now() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// One captured frame: packed BGR24 payload plus capture time
#[derive(Debug, Clone)]
pub struct Frame {
    /// Packed BGR24 pixel data, `width * height * 3` bytes
    pub bytes: Arc<[u8]>,
    pub width: u32,
    pub height: u32,
    /// Epoch seconds at capture; comparable across cameras in one process
    pub captured_at: f64,
}

/// Buffer fill/span diagnostics
#[derive(Debug, Clone, Copy)]
pub struct BufferHealth {
    pub frames: usize,
    pub capacity: usize,
    /// Seconds between the oldest and newest buffered frame
    pub span_seconds: f64,
    pub fill_ratio: f64,
    /// Fill or span below 80% of target
    pub degraded: bool,
}

struct BufferInner {
    frames: VecDeque<Frame>,
}

/// Fixed-capacity ring buffer, capacity = fps x retention_seconds
pub struct FrameBuffer {
    inner: Mutex<BufferInner>,
    capacity: usize,
    retention_seconds: u32,
}

impl FrameBuffer {
    /// Create a buffer sized for `retention_seconds` at `fps`
    pub fn new(fps: u32, retention_seconds: u32) -> Self {
        let capacity = (fps * retention_seconds) as usize;
        Self {
            inner: Mutex::new(BufferInner {
                frames: VecDeque::with_capacity(capacity),
            }),
            capacity,
            retention_seconds,
        }
    }

    /// Append a frame, evicting the oldest when full. O(1).
    pub fn push(&self, frame: Frame) {
        let mut inner = self.inner.lock();
        if inner.frames.len() >= self.capacity {
            inner.frames.pop_front();
        }
        debug_assert!(
            inner
                .frames
                .back()
                .map(|f| f.captured_at <= frame.captured_at)
                .unwrap_or(true),
            "timestamps must be non-decreasing"
        );
        inner.frames.push_back(frame);
    }

    /// Consistent copy of the buffered frames, oldest first
    pub fn snapshot(&self) -> Vec<Frame> {
        let inner = self.inner.lock();
        inner.frames.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Timestamp of the newest buffered frame
    pub fn latest_timestamp(&self) -> Option<f64> {
        self.inner.lock().frames.back().map(|f| f.captured_at)
    }

    /// Drop all buffered frames (after a source reconnect)
    pub fn clear(&self) {
        self.inner.lock().frames.clear();
    }

    /// Fill/span health. Degradation means source-side backpressure or
    /// frame loss: fill or span under 80% of the retention target.
    pub fn health(&self) -> BufferHealth {
        let inner = self.inner.lock();
        let frames = inner.frames.len();
        let span_seconds = match (inner.frames.front(), inner.frames.back()) {
            (Some(first), Some(last)) => last.captured_at - first.captured_at,
            _ => 0.0,
        };
        drop(inner);

        let fill_ratio = if self.capacity > 0 {
            frames as f64 / self.capacity as f64
        } else {
            0.0
        };
        let degraded =
            fill_ratio < 0.8 || span_seconds < 0.8 * f64::from(self.retention_seconds);

        BufferHealth {
            frames,
            capacity: self.capacity,
            span_seconds,
            fill_ratio,
            degraded,
        }
    }
}

#[cfg(test)]
pub(crate) fn test_frame(captured_at: f64) -> Frame {
    Frame {
        bytes: Arc::from(vec![0u8; 12].into_boxed_slice()),
        width: 2,
        height: 2,
        captured_at,
    }
}
