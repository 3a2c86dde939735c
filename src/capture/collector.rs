//! Capture thread.
//!
//! Pulls frames from a [`FrameSource`], filters them through a [`FrameGate`]
//! and offers the survivors to the alarm's command queue. A full queue drops
//! the frame rather than stalling capture.

use crate::capture::gate::{CaptureConfig, FrameGate};
use crate::capture::source::{CaptureError, FrameSource};
use crate::core::detector::ConfigurationError;
use crate::service::AlarmHandle;
use crate::telemetry::SharedStats;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, info};

/// Errors that can occur while running the capture thread.
#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("collector is already running")]
    AlreadyRunning,

    #[error("invalid capture configuration: {0}")]
    Config(#[from] ConfigurationError),

    #[error("capture failed: {0}")]
    Capture(#[from] CaptureError),

    #[error("could not spawn capture thread: {0}")]
    Spawn(std::io::Error),

    #[error("capture thread panicked")]
    Panicked,
}

/// Owns the capture thread feeding frames into an [`AlarmHandle`].
pub struct Collector {
    config: CaptureConfig,
    handle: AlarmHandle,
    stats: SharedStats,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<Result<(), CaptureError>>>,
}

impl Collector {
    pub fn new(config: CaptureConfig, handle: AlarmHandle, stats: SharedStats) -> Self {
        Self {
            config,
            handle,
            stats,
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }

    /// Start pulling frames from `source` on a background thread.
    pub fn start<S>(&mut self, mut source: S) -> Result<(), CollectorError>
    where
        S: FrameSource + 'static,
    {
        if self.running.load(Ordering::SeqCst) {
            return Err(CollectorError::AlreadyRunning);
        }
        let mut gate = FrameGate::new(&self.config)?;
        // Reap a previous thread that ended on its own.
        self.wait()?;

        let running = self.running.clone();
        let handle = self.handle.clone();
        let stats = self.stats.clone();
        running.store(true, Ordering::SeqCst);

        let spawned = thread::Builder::new()
            .name("frame-capture".to_string())
            .spawn(move || {
                let result = capture_loop(&mut source, &mut gate, &handle, &stats, &running);
                running.store(false, Ordering::SeqCst);
                result
            });

        match spawned {
            Ok(thread) => {
                self.thread = Some(thread);
                info!(
                    subsample = self.config.subsample,
                    max_fps = ?self.config.max_process_fps,
                    "Frame capture started"
                );
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                Err(CollectorError::Spawn(e))
            }
        }
    }

    /// Ask the capture thread to stop and wait for it.
    pub fn stop(&mut self) -> Result<(), CollectorError> {
        self.running.store(false, Ordering::SeqCst);
        self.wait()
    }

    /// Wait for the capture thread to end on its own (e.g. end of stream).
    pub fn wait(&mut self) -> Result<(), CollectorError> {
        if let Some(thread) = self.thread.take() {
            thread.join().map_err(|_| CollectorError::Panicked)??;
        }
        Ok(())
    }

    /// Check if the capture thread is currently running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for Collector {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

fn capture_loop<S: FrameSource>(
    source: &mut S,
    gate: &mut FrameGate,
    handle: &AlarmHandle,
    stats: &SharedStats,
    running: &AtomicBool,
) -> Result<(), CaptureError> {
    while running.load(Ordering::SeqCst) {
        let frame = match source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                info!("Frame source exhausted");
                break;
            }
            Err(e) => {
                error!(error = %e, "Frame source failed");
                return Err(e);
            }
        };
        stats.record_frame_captured();

        if !gate.admit(Instant::now()) {
            stats.record_frame_skipped();
            continue;
        }

        match handle.try_submit_frame(frame) {
            Ok(true) => {}
            Ok(false) => stats.record_frame_dropped(),
            Err(_) => {
                debug!("Alarm service gone, stopping capture");
                break;
            }
        }
    }
    Ok(())
}
