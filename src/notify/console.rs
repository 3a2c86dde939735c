//! Terminal front end: state line, alarm banner and bell.

use crate::core::controller::{AlarmEvent, AlarmListener, AlarmState};
use crate::core::detector::Observation;
use chrono::Local;
use std::io::Write;
use std::time::{Duration, Instant};
use tracing::warn;

/// How the console presents alarms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotifierConfig {
    /// Ring the terminal bell on alarm
    pub sound_enabled: bool,
    /// How long an alarm stays on display; repeats within it are folded
    pub alarm_hold: Duration,
    /// Print the detector readings of every processed frame
    pub show_observations: bool,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            sound_enabled: true,
            alarm_hold: Duration::from_secs(2),
            show_observations: false,
        }
    }
}

/// Alarm banner with a hold time.
///
/// An alarm raised while the banner is still showing neither rings again nor
/// extends the hold.
#[derive(Debug, Clone)]
pub struct AlarmDisplay {
    hold: Duration,
    shown_until: Option<Instant>,
}

impl AlarmDisplay {
    pub fn new(hold: Duration) -> Self {
        Self {
            hold,
            shown_until: None,
        }
    }

    /// Register an alarm at `now`. Returns `true` if it starts a new display.
    pub fn trigger(&mut self, now: Instant) -> bool {
        if self.is_showing(now) {
            return false;
        }
        self.shown_until = Some(now + self.hold);
        true
    }

    pub fn is_showing(&self, now: Instant) -> bool {
        self.shown_until.is_some_and(|until| now < until)
    }

    pub fn clear(&mut self) {
        self.shown_until = None;
    }
}

/// Listener that writes human-readable lines to a terminal.
pub struct ConsoleNotifier<W> {
    config: NotifierConfig,
    display: AlarmDisplay,
    out: W,
}

impl ConsoleNotifier<std::io::Stdout> {
    /// Notifier printing to standard output.
    pub fn stdout(config: NotifierConfig) -> Self {
        Self::new(config, std::io::stdout())
    }
}

impl<W: Write> ConsoleNotifier<W> {
    pub fn new(config: NotifierConfig, out: W) -> Self {
        Self {
            display: AlarmDisplay::new(config.alarm_hold),
            config,
            out,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn render(&mut self, event: &AlarmEvent) -> std::io::Result<()> {
        let now = Local::now().format("%H:%M:%S");
        match event {
            AlarmEvent::StateChanged(state) => {
                if *state == AlarmState::Idle {
                    self.display.clear();
                }
                writeln!(self.out, "[{now}] State: {state}")?;
            }
            AlarmEvent::Calibrating => {
                writeln!(self.out, "[{now}] Calibrating, learning the scene's normal noise")?;
            }
            AlarmEvent::Running => {
                writeln!(self.out, "[{now}] Alarm is live")?;
            }
            AlarmEvent::Observed { observation, .. } if self.config.show_observations => {
                writeln!(self.out, "[{now}] {}", format_observation(observation))?;
            }
            AlarmEvent::Observed { .. } => {}
            AlarmEvent::Alarm(observation) => {
                if self.display.trigger(Instant::now()) {
                    if self.config.sound_enabled {
                        write!(self.out, "\x07")?;
                    }
                    writeln!(
                        self.out,
                        "[{now}] ALARM! change {:.2} exceeded threshold {:.2}",
                        observation.diff, observation.threshold
                    )?;
                }
            }
            AlarmEvent::Aborted(err) => {
                writeln!(self.out, "[{now}] Session aborted: {err}")?;
            }
        }
        self.out.flush()
    }
}

impl<W: Write> AlarmListener for ConsoleNotifier<W> {
    fn on_event(&mut self, event: &AlarmEvent) {
        if let Err(e) = self.render(event) {
            warn!(error = %e, "Could not write to console");
        }
    }
}

/// One-line rendering of the detector readings.
pub fn format_observation(obs: &Observation) -> String {
    format!(
        "threshold {:.2} | avg change {:.2} | volatility {:.2} | max {:.2} | change {:.2}",
        obs.threshold, obs.moving_abs_diff_avg, obs.moving_diff_avg, obs.max_diff_observed, obs.diff
    )
}
