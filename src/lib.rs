//! Multi-camera replay recording station
//!
//! Continuously buffers the last seconds of every configured camera in
//! memory and, on an operator trigger, extracts one synchronized window
//! per camera, writes compressed clips to local storage and queues them
//! in a durable store-and-forward pipeline that survives restarts and
//! network outages.
//!
//! Components:
//! - [`frame_buffer`]: per-camera in-memory ring buffers
//! - [`capture_supervisor`]: camera connections, reconnects, health
//! - [`snapshot_extractor`]: cross-camera synchronized window slicing
//! - [`clip_writer`]: encoding, compression and the size ceiling
//! - [`upload_queue`]: SQLite-backed durable upload queue
//! - [`connectivity`]: network and service reachability probes
//! - [`upload_scheduler`]: background delivery with retry and backoff
//! - [`orchestrator`]: the trigger path tying the above together
//! - [`collaborators`]: seams for ffmpeg and the remote service

pub mod capture_supervisor;
pub mod clip_writer;
pub mod collaborators;
pub mod connectivity;
pub mod destination;
pub mod error;
pub mod frame_buffer;
pub mod orchestrator;
pub mod snapshot_extractor;
pub mod state;
pub mod upload_queue;
pub mod upload_scheduler;

pub use error::{Error, Result};
