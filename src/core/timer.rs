//! Lifecycle timers.
//!
//! The controller never sleeps. It asks a [`Timers`] implementation to
//! deliver a timer later, and the owner of the command queue turns the expiry
//! back into a command. Each scheduled timer carries a fresh token, so an
//! expiry that arrives after its timer was cancelled can be told apart from
//! the one currently pending.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{trace, warn};

/// Which lifecycle delay a timer measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimerKind {
    /// Delay between `start` and the beginning of calibration
    Arming,
    /// Length of the calibration period
    Calibration,
}

impl std::fmt::Display for TimerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimerKind::Arming => write!(f, "arming"),
            TimerKind::Calibration => write!(f, "calibration"),
        }
    }
}

/// Generation number of a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimerToken(pub u64);

impl std::fmt::Display for TimerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Timer {
    pub kind: TimerKind,
    pub token: TimerToken,
}

/// Timer backend used by the controller.
pub trait Timers {
    /// Arrange for `timer` to be delivered after `delay`.
    fn schedule(&mut self, timer: Timer, delay: Duration);

    /// Withdraw `timer` if it has not been delivered yet.
    fn cancel(&mut self, timer: Timer);
}

/// Single-slot deadline timer polled by the command loop.
///
/// Only one lifecycle timer is ever pending, so one slot is enough.
#[derive(Debug, Default)]
pub struct DeadlineTimers {
    pending: Option<(Timer, Instant)>,
}

impl DeadlineTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// The pending timer, if any.
    pub fn pending(&self) -> Option<Timer> {
        self.pending.map(|(timer, _)| timer)
    }

    /// When the pending timer is due.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.map(|(_, deadline)| deadline)
    }

    /// Remove and return the pending timer if it is due at `now`.
    pub fn take_due(&mut self, now: Instant) -> Option<Timer> {
        match self.pending {
            Some((timer, deadline)) if deadline <= now => {
                self.pending = None;
                Some(timer)
            }
            _ => None,
        }
    }

    /// Remove and return the pending timer regardless of its deadline.
    pub fn take_pending(&mut self) -> Option<Timer> {
        self.pending.take().map(|(timer, _)| timer)
    }
}

impl Timers for DeadlineTimers {
    fn schedule(&mut self, timer: Timer, delay: Duration) {
        if let Some((replaced, _)) = self.pending {
            warn!(
                kind = %replaced.kind,
                token = %replaced.token,
                "Replacing a timer that was still pending"
            );
        }
        trace!(kind = %timer.kind, token = %timer.token, ?delay, "Timer scheduled");
        self.pending = Some((timer, Instant::now() + delay));
    }

    fn cancel(&mut self, timer: Timer) {
        if self.pending() == Some(timer) {
            trace!(kind = %timer.kind, token = %timer.token, "Timer cancelled");
            self.pending = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timer(kind: TimerKind, token: u64) -> Timer {
        Timer {
            kind,
            token: TimerToken(token),
        }
    }

    #[test]
    fn test_take_due_respects_deadline() {
        let mut timers = DeadlineTimers::new();
        timers.schedule(timer(TimerKind::Arming, 1), Duration::from_secs(60));

        assert_eq!(timers.take_due(Instant::now()), None);
        let later = Instant::now() + Duration::from_secs(61);
        assert_eq!(timers.take_due(later), Some(timer(TimerKind::Arming, 1)));
        assert_eq!(timers.pending(), None);
    }

    #[test]
    fn test_cancel_only_matching_timer() {
        let mut timers = DeadlineTimers::new();
        timers.schedule(timer(TimerKind::Calibration, 2), Duration::ZERO);

        timers.cancel(timer(TimerKind::Calibration, 1));
        assert!(timers.pending().is_some());

        timers.cancel(timer(TimerKind::Calibration, 2));
        assert!(timers.pending().is_none());
        assert!(timers.next_deadline().is_none());
    }

    #[test]
    fn test_schedule_replaces_pending() {
        let mut timers = DeadlineTimers::new();
        timers.schedule(timer(TimerKind::Arming, 1), Duration::from_secs(5));
        timers.schedule(timer(TimerKind::Calibration, 2), Duration::from_secs(5));

        assert_eq!(timers.take_pending(), Some(timer(TimerKind::Calibration, 2)));
    }
}
