//! Per-camera capture loop
//!
//! ## Responsibilities
//!
//! - Own one camera connection and feed its ring buffer
//! - Count consecutive read failures and reconnect past the threshold
//! - Periodic buffer health checks, suppressed while a save is running
//! - Status reporting: primed notice and a periodic fill summary
//!
//! Source reads block, so the whole loop runs on a dedicated blocking
//! thread; everything shared with the async side is behind atomics or the
//! buffer's own lock.

use crate::collaborators::VideoSource;
use crate::frame_buffer::FrameBuffer;
use crate::state::CameraConfig;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Reported once when the buffer first reaches this fill ratio
const PRIMED_FILL_RATIO: f64 = 0.95;
const STATUS_REPORT_INTERVAL: Duration = Duration::from_secs(30);
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(10);

/// Connection lifecycle of one camera
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Disconnected,
    Connecting,
    Streaming,
    /// Connected but the buffer is underfilled or lagging
    Degraded,
    Reconnecting,
}

pub struct CaptureSupervisor {
    camera: CameraConfig,
    buffer: Arc<FrameBuffer>,
    source: Arc<dyn VideoSource>,
    state: parking_lot::RwLock<SupervisorState>,
    saving: AtomicBool,
    running: AtomicBool,
    max_consecutive_failures: u32,
    reconnect_delay: Duration,
    /// Pacing for the failure arm, one native frame period
    frame_interval: Duration,
}

impl CaptureSupervisor {
    pub fn new(
        camera: CameraConfig,
        buffer: Arc<FrameBuffer>,
        source: Arc<dyn VideoSource>,
        max_consecutive_failures: u32,
        reconnect_delay: Duration,
        frame_interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            camera,
            buffer,
            source,
            state: parking_lot::RwLock::new(SupervisorState::Disconnected),
            saving: AtomicBool::new(false),
            running: AtomicBool::new(false),
            max_consecutive_failures,
            reconnect_delay,
            frame_interval,
        })
    }

    pub fn camera_id(&self) -> &str {
        &self.camera.camera_id
    }

    pub fn buffer(&self) -> &Arc<FrameBuffer> {
        &self.buffer
    }

    pub fn state(&self) -> SupervisorState {
        *self.state.read()
    }

    /// Extraction in progress: skip health checks so the snapshot copy
    /// does not read as a capture stall
    pub fn set_saving(&self, saving: bool) {
        self.saving.store(saving, Ordering::SeqCst);
    }

    pub fn is_saving(&self) -> bool {
        self.saving.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Spawn the capture loop on a blocking thread
    pub fn start(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        let supervisor = Arc::clone(self);
        tokio::task::spawn_blocking(move || supervisor.run_loop())
    }

    fn set_state(&self, next: SupervisorState) {
        *self.state.write() = next;
    }

    fn run_loop(&self) {
        tracing::info!(camera_id = %self.camera.camera_id, uri = %self.camera.uri, "Capture loop started");

        while self.running.load(Ordering::SeqCst) {
            self.set_state(SupervisorState::Connecting);
            let mut handle = match self.source.open(&self.camera.uri) {
                Ok(handle) => handle,
                Err(e) => {
                    tracing::warn!(
                        camera_id = %self.camera.camera_id,
                        error = %e,
                        "Source open failed, retrying"
                    );
                    self.set_state(SupervisorState::Disconnected);
                    std::thread::sleep(self.reconnect_delay);
                    continue;
                }
            };

            self.set_state(SupervisorState::Streaming);
            self.buffer.clear();
            let mut consecutive_failures = 0u32;
            let mut primed_reported = false;
            let mut last_status = Instant::now();
            let mut last_health = Instant::now();

            while self.running.load(Ordering::SeqCst) {
                match handle.read() {
                    Ok(Some(frame)) => {
                        self.buffer.push(frame);
                        consecutive_failures = 0;

                        if !primed_reported {
                            let health = self.buffer.health();
                            if health.fill_ratio >= PRIMED_FILL_RATIO {
                                tracing::info!(
                                    camera_id = %self.camera.camera_id,
                                    frames = health.frames,
                                    span_seconds = health.span_seconds,
                                    "Buffer primed"
                                );
                                primed_reported = true;
                            }
                        }

                        if last_status.elapsed() >= STATUS_REPORT_INTERVAL {
                            let health = self.buffer.health();
                            tracing::info!(
                                camera_id = %self.camera.camera_id,
                                frames = health.frames,
                                fill_ratio = health.fill_ratio,
                                span_seconds = health.span_seconds,
                                "Capture status"
                            );
                            last_status = Instant::now();
                        }

                        if last_health.elapsed() >= HEALTH_CHECK_INTERVAL {
                            if !self.saving.load(Ordering::SeqCst) {
                                self.health_check();
                            }
                            last_health = Instant::now();
                        }
                    }
                    Ok(None) | Err(_) => {
                        consecutive_failures += 1;
                        if consecutive_failures >= self.max_consecutive_failures {
                            tracing::warn!(
                                camera_id = %self.camera.camera_id,
                                failures = consecutive_failures,
                                "Read failure streak, reconnecting"
                            );
                            break;
                        }
                        // a dead source must not spin the capture thread
                        std::thread::sleep(self.frame_interval);
                    }
                }
            }

            handle.close();
            if self.running.load(Ordering::SeqCst) {
                self.set_state(SupervisorState::Reconnecting);
                std::thread::sleep(self.reconnect_delay);
            }
        }

        self.set_state(SupervisorState::Disconnected);
        tracing::info!(camera_id = %self.camera.camera_id, "Capture loop stopped");
    }

    fn health_check(&self) {
        let health = self.buffer.health();
        let current = self.state();
        if health.degraded && current == SupervisorState::Streaming {
            tracing::warn!(
                camera_id = %self.camera.camera_id,
                fill_ratio = health.fill_ratio,
                span_seconds = health.span_seconds,
                "Buffer degraded"
            );
            self.set_state(SupervisorState::Degraded);
        } else if !health.degraded && current == SupervisorState::Degraded {
            tracing::info!(camera_id = %self.camera.camera_id, "Buffer recovered");
            self.set_state(SupervisorState::Streaming);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::SourceHandle;
    use crate::error::{Error, Result};
    use crate::frame_buffer::{epoch_now, Frame};
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    enum Step {
        Frame,
        Fail,
    }

    /// Each open pops the next script; an exhausted handle fails every read
    struct ScriptedSource {
        scripts: parking_lot::Mutex<VecDeque<Vec<Step>>>,
        opens: AtomicUsize,
    }

    impl ScriptedSource {
        fn new(scripts: Vec<Vec<Step>>) -> Arc<Self> {
            Arc::new(Self {
                scripts: parking_lot::Mutex::new(scripts.into()),
                opens: AtomicUsize::new(0),
            })
        }
    }

    impl VideoSource for ScriptedSource {
        fn open(&self, _uri: &str) -> Result<Box<dyn SourceHandle>> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            let script = self
                .scripts
                .lock()
                .pop_front()
                .ok_or_else(|| Error::Source("no more scripts".to_string()))?;
            Ok(Box::new(ScriptedHandle {
                steps: script.into(),
            }))
        }
    }

    struct ScriptedHandle {
        steps: VecDeque<Step>,
    }

    impl SourceHandle for ScriptedHandle {
        fn read(&mut self) -> Result<Option<Frame>> {
            // pace reads so the loop does not spin flat out in tests
            std::thread::sleep(Duration::from_millis(1));
            match self.steps.pop_front() {
                Some(Step::Frame) => Ok(Some(Frame {
                    bytes: Arc::from(vec![0u8; 12].into_boxed_slice()),
                    width: 2,
                    height: 2,
                    captured_at: epoch_now(),
                })),
                Some(Step::Fail) => Err(Error::Source("read failed".to_string())),
                None => Err(Error::Source("stream ended".to_string())),
            }
        }

        fn close(&mut self) {}
    }

    fn camera() -> CameraConfig {
        CameraConfig {
            camera_id: "camera_1".to_string(),
            uri: "rtsp://test".to_string(),
            width: 2,
            height: 2,
        }
    }

    async fn wait_until(deadline: Duration, mut check: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_frames_reach_the_buffer() {
        let source = ScriptedSource::new(vec![(0..50).map(|_| Step::Frame).collect()]);
        let buffer = Arc::new(FrameBuffer::new(30, 25));
        let supervisor = CaptureSupervisor::new(
            camera(),
            Arc::clone(&buffer),
            source,
            3,
            Duration::from_millis(5),
            Duration::from_millis(1),
        );

        let handle = supervisor.start();
        assert!(wait_until(Duration::from_secs(2), || buffer.len() >= 50).await);

        supervisor.stop();
        let _ = handle.await;
        assert_eq!(supervisor.state(), SupervisorState::Disconnected);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failure_streak_triggers_reconnect() {
        // first connection dies after 3 failures, second delivers frames
        // (long script so the handle outlives the assertion below)
        let source = ScriptedSource::new(vec![
            vec![Step::Fail, Step::Fail, Step::Fail],
            (0..2000).map(|_| Step::Frame).collect(),
        ]);
        let buffer = Arc::new(FrameBuffer::new(30, 25));
        let supervisor = CaptureSupervisor::new(
            camera(),
            Arc::clone(&buffer),
            Arc::clone(&source) as Arc<dyn VideoSource>,
            3,
            Duration::from_millis(5),
            Duration::from_millis(1),
        );

        let handle = supervisor.start();
        assert!(wait_until(Duration::from_secs(2), || buffer.len() >= 20).await);
        assert_eq!(source.opens.load(Ordering::SeqCst), 2);

        supervisor.stop();
        let _ = handle.await;
    }

    /// Always-failing source that counts read attempts without pacing
    /// itself, so any pacing observed comes from the supervisor.
    struct DeadAirSource {
        reads: Arc<AtomicUsize>,
    }

    impl VideoSource for DeadAirSource {
        fn open(&self, _uri: &str) -> Result<Box<dyn SourceHandle>> {
            Ok(Box::new(DeadAirHandle {
                reads: Arc::clone(&self.reads),
            }))
        }
    }

    struct DeadAirHandle {
        reads: Arc<AtomicUsize>,
    }

    impl SourceHandle for DeadAirHandle {
        fn read(&mut self) -> Result<Option<Frame>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Err(Error::Source("no signal".to_string()))
        }

        fn close(&mut self) {}
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failed_reads_are_paced_at_frame_interval() {
        let reads = Arc::new(AtomicUsize::new(0));
        let supervisor = CaptureSupervisor::new(
            camera(),
            Arc::new(FrameBuffer::new(30, 25)),
            Arc::new(DeadAirSource {
                reads: Arc::clone(&reads),
            }),
            1000,
            Duration::from_millis(5),
            Duration::from_millis(20),
        );

        let handle = supervisor.start();
        tokio::time::sleep(Duration::from_millis(200)).await;
        supervisor.stop();
        let _ = handle.await;

        // ~200ms at a 20ms interval allows about 10 reads; an unpaced
        // loop would rack up thousands
        let observed = reads.load(Ordering::SeqCst);
        assert!(observed >= 2, "loop never ran ({observed} reads)");
        assert!(observed <= 30, "failure arm is not paced ({observed} reads)");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_single_failures_do_not_reconnect() {
        // failures stay under the threshold, interleaved with frames
        let mut script = Vec::new();
        for _ in 0..1000 {
            script.push(Step::Frame);
            script.push(Step::Fail);
        }
        let source = ScriptedSource::new(vec![script]);
        let buffer = Arc::new(FrameBuffer::new(30, 25));
        let supervisor = CaptureSupervisor::new(
            camera(),
            Arc::clone(&buffer),
            Arc::clone(&source) as Arc<dyn VideoSource>,
            3,
            Duration::from_millis(5),
            Duration::from_millis(1),
        );

        let handle = supervisor.start();
        assert!(wait_until(Duration::from_secs(2), || buffer.len() >= 10).await);
        assert_eq!(source.opens.load(Ordering::SeqCst), 1);

        supervisor.stop();
        let _ = handle.await;
    }
}
