//! Frame and alarm counters.

use crate::core::controller::{AlarmEvent, AlarmListener};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counters shared between the capture thread and the command loop.
#[derive(Debug)]
pub struct SessionStats {
    /// Frames produced by the frame source
    frames_captured: AtomicU64,
    /// Frames skipped by subsampling or rate limiting
    frames_skipped: AtomicU64,
    /// Frames dropped because the command queue was full
    frames_dropped: AtomicU64,
    /// Frames that reached the controller outside CALIBRATING/RUNNING
    frames_ignored: AtomicU64,
    /// Frames compared by the detector
    frames_observed: AtomicU64,
    /// Alarm events raised
    alarms: AtomicU64,
    /// Calibration periods started
    sessions_started: AtomicU64,
    /// Sessions torn down by a rejected frame
    sessions_aborted: AtomicU64,
    /// Commands rejected as protocol violations
    invalid_commands: AtomicU64,
    /// When this process started counting
    started_at: DateTime<Utc>,
}

impl SessionStats {
    pub fn new() -> Self {
        Self {
            frames_captured: AtomicU64::new(0),
            frames_skipped: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            frames_ignored: AtomicU64::new(0),
            frames_observed: AtomicU64::new(0),
            alarms: AtomicU64::new(0),
            sessions_started: AtomicU64::new(0),
            sessions_aborted: AtomicU64::new(0),
            invalid_commands: AtomicU64::new(0),
            started_at: Utc::now(),
        }
    }

    pub fn record_frame_captured(&self) {
        self.frames_captured.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_frame_skipped(&self) {
        self.frames_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_frame_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_frame_ignored(&self) {
        self.frames_ignored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_frame_observed(&self) {
        self.frames_observed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_alarm(&self) {
        self.alarms.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_started(&self) {
        self.sessions_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_aborted(&self) {
        self.sessions_aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalid_command(&self) {
        self.invalid_commands.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current statistics.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            frames_skipped: self.frames_skipped.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            frames_ignored: self.frames_ignored.load(Ordering::Relaxed),
            frames_observed: self.frames_observed.load(Ordering::Relaxed),
            alarms: self.alarms.load(Ordering::Relaxed),
            sessions_started: self.sessions_started.load(Ordering::Relaxed),
            sessions_aborted: self.sessions_aborted.load(Ordering::Relaxed),
            invalid_commands: self.invalid_commands.load(Ordering::Relaxed),
            started_at: self.started_at,
            uptime_secs: (Utc::now() - self.started_at).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.snapshot();
        format!(
            "Run Statistics:\n\
             - Frames captured: {}\n\
             - Frames skipped (subsampling/rate limit): {}\n\
             - Frames dropped (queue full): {}\n\
             - Frames ignored while idle or arming: {}\n\
             - Frames observed: {}\n\
             - Calibrations started: {}\n\
             - Sessions aborted: {}\n\
             - Alarms raised: {}\n\
             - Invalid commands: {}\n\
             - Uptime: {} seconds",
            stats.frames_captured,
            stats.frames_skipped,
            stats.frames_dropped,
            stats.frames_ignored,
            stats.frames_observed,
            stats.sessions_started,
            stats.sessions_aborted,
            stats.alarms,
            stats.invalid_commands,
            stats.uptime_secs
        )
    }
}

impl Default for SessionStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`SessionStats`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub frames_captured: u64,
    pub frames_skipped: u64,
    pub frames_dropped: u64,
    pub frames_ignored: u64,
    pub frames_observed: u64,
    pub alarms: u64,
    pub sessions_started: u64,
    pub sessions_aborted: u64,
    pub invalid_commands: u64,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
}

/// Thread-safe shared statistics.
pub type SharedStats = Arc<SessionStats>;

/// Create a new shared statistics block.
pub fn create_shared_stats() -> SharedStats {
    Arc::new(SessionStats::new())
}

/// Listener that counts lifecycle events before passing them on.
pub struct StatsListener<L> {
    stats: SharedStats,
    inner: L,
}

impl<L> StatsListener<L> {
    pub fn new(stats: SharedStats, inner: L) -> Self {
        Self { stats, inner }
    }

    pub fn stats(&self) -> &SharedStats {
        &self.stats
    }

    pub fn into_inner(self) -> L {
        self.inner
    }
}

impl<L: AlarmListener> AlarmListener for StatsListener<L> {
    fn on_event(&mut self, event: &AlarmEvent) {
        match event {
            AlarmEvent::Calibrating => self.stats.record_session_started(),
            AlarmEvent::Observed { .. } => self.stats.record_frame_observed(),
            AlarmEvent::Alarm(_) => self.stats.record_alarm(),
            AlarmEvent::Aborted(_) => self.stats.record_session_aborted(),
            AlarmEvent::Running | AlarmEvent::StateChanged(_) => {}
        }
        self.inner.on_event(event);
    }
}
