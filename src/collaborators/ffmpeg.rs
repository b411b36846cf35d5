//! FFmpeg-backed collaborator implementations
//!
//! The capture source and clip sink run ffmpeg as a child process with raw
//! BGR24 frames on the pipe. Source reads are blocking (the supervisor owns
//! a dedicated capture thread); the compression pass is async and uses
//! `kill_on_drop(true)` so a timeout reliably reaps the process.

use crate::collaborators::{ClipSink, Compressor, Encoder, SourceHandle, VideoSource};
use crate::error::{Error, Result};
use crate::frame_buffer::{epoch_now, Frame};
use crate::state::CompressionProfile;
use async_trait::async_trait;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

/// Compression pass ceiling; a stuck ffmpeg is killed via kill_on_drop
const COMPRESS_TIMEOUT_SECS: u64 = 300;

/// Opens RTSP (or file) sources through an ffmpeg rawvideo pipe
pub struct FfmpegVideoSource {
    width: u32,
    height: u32,
    fps: u32,
}

impl FfmpegVideoSource {
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        Self { width, height, fps }
    }
}

impl VideoSource for FfmpegVideoSource {
    fn open(&self, uri: &str) -> Result<Box<dyn SourceHandle>> {
        // -rtsp_transport tcp: more reliable than UDP for IP cameras
        // rawvideo/bgr24 on stdout, one frame = width * height * 3 bytes
        let mut child = std::process::Command::new("ffmpeg")
            .args([
                "-rtsp_transport",
                "tcp",
                "-i",
                uri,
                "-f",
                "rawvideo",
                "-pix_fmt",
                "bgr24",
                "-s",
                &format!("{}x{}", self.width, self.height),
                "-r",
                &self.fps.to_string(),
                "-loglevel",
                "error",
                "-",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Error::Source(format!("ffmpeg spawn failed: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Source("ffmpeg stdout missing".to_string()))?;

        tracing::debug!(uri = %uri, "Capture source opened");

        Ok(Box::new(FfmpegSourceHandle {
            child,
            stdout,
            width: self.width,
            height: self.height,
        }))
    }
}

struct FfmpegSourceHandle {
    child: std::process::Child,
    stdout: std::process::ChildStdout,
    width: u32,
    height: u32,
}

impl SourceHandle for FfmpegSourceHandle {
    fn read(&mut self) -> Result<Option<Frame>> {
        let frame_len = (self.width * self.height * 3) as usize;
        let mut buf = vec![0u8; frame_len];

        match self.stdout.read_exact(&mut buf) {
            Ok(()) => Ok(Some(Frame {
                bytes: Arc::from(buf.into_boxed_slice()),
                width: self.width,
                height: self.height,
                captured_at: epoch_now(),
            })),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(Error::Source(format!("frame read failed: {}", e))),
        }
    }

    fn close(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl Drop for FfmpegSourceHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// Writes clips through ffmpeg: rawvideo on stdin, H.264 MP4 out
pub struct FfmpegEncoder;

impl Encoder for FfmpegEncoder {
    fn open_writer(&self, path: &Path, fps: u32, size: (u32, u32)) -> Result<Box<dyn ClipSink>> {
        let mut child = std::process::Command::new("ffmpeg")
            .args([
                "-y",
                "-f",
                "rawvideo",
                "-pix_fmt",
                "bgr24",
                "-s",
                &format!("{}x{}", size.0, size.1),
                "-r",
                &fps.to_string(),
                "-i",
                "-",
                "-c:v",
                "libx264",
                "-preset",
                "fast",
                "-pix_fmt",
                "yuv420p",
                "-movflags",
                "+faststart",
                "-loglevel",
                "error",
            ])
            .arg(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Error::Encode(format!("ffmpeg spawn failed: {}", e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Encode("ffmpeg stdin missing".to_string()))?;

        Ok(Box::new(FfmpegClipSink {
            child,
            stdin: Some(stdin),
            path: path.to_path_buf(),
        }))
    }
}

struct FfmpegClipSink {
    child: std::process::Child,
    stdin: Option<std::process::ChildStdin>,
    path: PathBuf,
}

impl ClipSink for FfmpegClipSink {
    fn write_frame(&mut self, bytes: &[u8]) -> Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| Error::Encode("sink already finished".to_string()))?;
        stdin
            .write_all(bytes)
            .map_err(|e| Error::Encode(format!("frame write failed: {}", e)))
    }

    fn finish(&mut self) -> Result<()> {
        // Closing stdin lets ffmpeg flush and finalize the container
        drop(self.stdin.take());
        let status = self
            .child
            .wait()
            .map_err(|e| Error::Encode(format!("ffmpeg wait failed: {}", e)))?;

        if !status.success() {
            return Err(Error::Encode(format!(
                "ffmpeg exited with {} writing {}",
                status,
                self.path.display()
            )));
        }
        Ok(())
    }
}

/// H.264 compression pass via ffmpeg
pub struct FfmpegCompressor;

#[async_trait]
impl Compressor for FfmpegCompressor {
    async fn compress(
        &self,
        input: &Path,
        output: &Path,
        profile: &CompressionProfile,
    ) -> Result<PathBuf> {
        let bufsize_kbps = profile.max_bitrate_kbps * 2;
        let child = tokio::process::Command::new("ffmpeg")
            .arg("-y")
            .arg("-i")
            .arg(input)
            .args([
                "-c:v",
                "libx264",
                "-preset",
                "fast",
                "-crf",
                &profile.crf.to_string(),
                "-maxrate",
                &format!("{}k", profile.max_bitrate_kbps),
                "-bufsize",
                &format!("{}k", bufsize_kbps),
                "-vf",
                &format!("scale={}:{}", profile.width, profile.height),
                "-r",
                &profile.fps.to_string(),
                "-movflags",
                "+faststart",
                "-loglevel",
                "error",
            ])
            .arg(output)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Compression(format!("ffmpeg spawn failed: {}", e)))?;

        // On timeout the future is cancelled, the Child is dropped, and
        // kill_on_drop reaps the ffmpeg process.
        let timeout = Duration::from_secs(COMPRESS_TIMEOUT_SECS);
        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(out)) => {
                if !out.status.success() {
                    let stderr = String::from_utf8_lossy(&out.stderr);
                    return Err(Error::Compression(format!(
                        "ffmpeg failed: {}",
                        stderr.trim()
                    )));
                }
                if !output.exists() {
                    return Err(Error::Compression(
                        "compressed file was not created".to_string(),
                    ));
                }
                Ok(output.to_path_buf())
            }
            Ok(Err(e)) => Err(Error::Compression(format!("ffmpeg execution failed: {}", e))),
            Err(_) => {
                tracing::warn!(
                    input = %input.display(),
                    timeout_sec = COMPRESS_TIMEOUT_SECS,
                    "Compression timeout, process killed via kill_on_drop"
                );
                Err(Error::Compression(format!(
                    "compression timeout ({}s)",
                    COMPRESS_TIMEOUT_SECS
                )))
            }
        }
    }
}

/// Check that ffmpeg is on PATH, reporting the version line
pub async fn check_ffmpeg() -> Result<String> {
    let output = tokio::process::Command::new("ffmpeg")
        .arg("-version")
        .output()
        .await
        .map_err(|e| Error::Internal(format!("ffmpeg not found: {}", e)))?;

    if !output.status.success() {
        return Err(Error::Internal("ffmpeg version check failed".to_string()));
    }

    let version = String::from_utf8_lossy(&output.stdout);
    Ok(version.lines().next().unwrap_or("unknown").to_string())
}
