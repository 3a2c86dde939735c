//! Alarm lifecycle state machine.
//!
//! The controller is the single source of truth for the alarm state. It owns
//! the session and its detector, asks a [`Timers`] backend for the arming and
//! calibration delays, and reports everything that happens to an
//! [`AlarmListener`]. It never blocks; commands are applied one at a time by
//! whoever owns it (see [`crate::service`]).
//!
//! ```text
//!          start             armingElapsed           calibrationElapsed
//!   IDLE ────────▶ ARMING ─────────────────▶ CALIBRATING ──────────────▶ RUNNING
//!    ▲               │                            │                        │
//!    └───────────────┴──────── stop / pause ──────┴────────────────────────┘
//! ```

use crate::core::detector::{
    ChangeDetector, ConfigurationError, DetectorConfig, DetectorError, Observation,
};
use crate::core::frame::Frame;
use crate::core::timer::{Timer, TimerKind, TimerToken, Timers};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

/// Externally visible alarm states.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmState {
    #[default]
    Idle,
    Arming,
    Calibrating,
    Running,
}

impl AlarmState {
    pub const ALL: [AlarmState; 4] = [
        AlarmState::Idle,
        AlarmState::Arming,
        AlarmState::Calibrating,
        AlarmState::Running,
    ];

    /// Whether a session is in progress (the start/stop toggle is "on").
    pub fn is_armed(self) -> bool {
        self != AlarmState::Idle
    }

    /// Whether frames are fed to the detector in this state.
    pub fn is_observing(self) -> bool {
        matches!(self, AlarmState::Calibrating | AlarmState::Running)
    }
}

impl std::fmt::Display for AlarmState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlarmState::Idle => write!(f, "IDLE"),
            AlarmState::Arming => write!(f, "ARMING"),
            AlarmState::Calibrating => write!(f, "CALIBRATING"),
            AlarmState::Running => write!(f, "RUNNING"),
        }
    }
}

/// Inputs to the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// User requests arming
    Start,
    /// User cancels or disarms
    Stop,
    /// Host is suspending; handled like `Stop`
    Pause,
    /// Arming delay expired
    ArmingElapsed(TimerToken),
    /// Calibration period expired
    CalibrationElapsed(TimerToken),
    /// A new frame is available
    Frame(Frame),
}

impl Command {
    /// The command a fired timer turns into.
    pub fn from_timer(timer: Timer) -> Self {
        match timer.kind {
            TimerKind::Arming => Command::ArmingElapsed(timer.token),
            TimerKind::Calibration => Command::CalibrationElapsed(timer.token),
        }
    }

    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Start => CommandKind::Start,
            Command::Stop => CommandKind::Stop,
            Command::Pause => CommandKind::Pause,
            Command::ArmingElapsed(_) => CommandKind::ArmingElapsed,
            Command::CalibrationElapsed(_) => CommandKind::CalibrationElapsed,
            Command::Frame(_) => CommandKind::Frame,
        }
    }
}

/// Payload-free tag of a [`Command`], used in reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Start,
    Stop,
    Pause,
    ArmingElapsed,
    CalibrationElapsed,
    Frame,
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CommandKind::Start => "start",
            CommandKind::Stop => "stop",
            CommandKind::Pause => "pause",
            CommandKind::ArmingElapsed => "armingElapsed",
            CommandKind::CalibrationElapsed => "calibrationElapsed",
            CommandKind::Frame => "frame",
        };
        f.write_str(name)
    }
}

/// Notifications for UI and audio collaborators.
#[derive(Debug, Clone, PartialEq)]
pub enum AlarmEvent {
    /// The state changed; carries the new state
    StateChanged(AlarmState),
    /// Calibration has begun
    Calibrating,
    /// Calibration is over; anomalies now raise alarms
    Running,
    /// A frame was processed while calibrating or running
    Observed {
        state: AlarmState,
        observation: Observation,
    },
    /// Motion detected while running
    Alarm(Observation),
    /// The session was torn down because of a bad frame
    Aborted(DetectorError),
}

/// Receiver of [`AlarmEvent`]s, registered at construction.
pub trait AlarmListener {
    fn on_event(&mut self, event: &AlarmEvent);
}

impl<F> AlarmListener for F
where
    F: FnMut(&AlarmEvent),
{
    fn on_event(&mut self, event: &AlarmEvent) {
        self(event)
    }
}

/// Errors reported by [`AlarmController::handle`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ControllerError {
    /// No transition is defined for this command in this state
    #[error("command `{command}` is not valid in state {state}")]
    InvalidTransition {
        state: AlarmState,
        command: CommandKind,
    },

    /// A timer fired after it had been cancelled or superseded
    #[error("{kind} timer {token} is no longer pending")]
    StaleTimer { kind: TimerKind, token: TimerToken },

    /// The detector rejected a frame; the session was aborted
    #[error("session aborted: {0}")]
    Detector(#[from] DetectorError),
}

impl ControllerError {
    /// Protocol anomalies leave the state untouched and are safe to ignore.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ControllerError::Detector(_))
    }
}

/// Timing and detector parameters of the controller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControllerConfig {
    /// Delay between `start` and the beginning of calibration
    pub arm_delay: Duration,
    /// Length of the calibration period
    pub calibration_duration: Duration,
    pub detector: DetectorConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            arm_delay: Duration::from_secs(10),
            calibration_duration: Duration::from_secs(10),
            detector: DetectorConfig::default(),
        }
    }
}

/// The single alarm session of a controller.
///
/// `detector` is present exactly while the state is CALIBRATING or RUNNING.
#[derive(Default)]
pub struct AlarmSession {
    state: AlarmState,
    id: Option<Uuid>,
    armed_at: Option<DateTime<Utc>>,
    calibration_started_at: Option<DateTime<Utc>>,
    detector: Option<ChangeDetector>,
    pending_timer: Option<Timer>,
    last_observation: Option<Observation>,
}

impl AlarmSession {
    pub fn state(&self) -> AlarmState {
        self.state
    }

    /// Identifier of the current arming cycle.
    pub fn id(&self) -> Option<Uuid> {
        self.id
    }

    pub fn armed_at(&self) -> Option<DateTime<Utc>> {
        self.armed_at
    }

    pub fn calibration_started_at(&self) -> Option<DateTime<Utc>> {
        self.calibration_started_at
    }

    pub fn detector(&self) -> Option<&ChangeDetector> {
        self.detector.as_ref()
    }

    pub fn pending_timer(&self) -> Option<Timer> {
        self.pending_timer
    }

    /// The most recent observation of this session.
    pub fn last_observation(&self) -> Option<&Observation> {
        self.last_observation.as_ref()
    }

    fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Finite-state machine sequencing arming, calibration and running.
pub struct AlarmController<T, L> {
    config: ControllerConfig,
    session: AlarmSession,
    timers: T,
    listener: L,
    next_token: u64,
}

impl<T: Timers, L: AlarmListener> AlarmController<T, L> {
    /// Create a controller in IDLE. Fails if the detector parameters are invalid.
    pub fn new(config: ControllerConfig, timers: T, listener: L) -> Result<Self, ConfigurationError> {
        config.detector.validate()?;
        Ok(Self {
            config,
            session: AlarmSession::default(),
            timers,
            listener,
            next_token: 0,
        })
    }

    pub fn state(&self) -> AlarmState {
        self.session.state()
    }

    pub fn session(&self) -> &AlarmSession {
        &self.session
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn timers(&self) -> &T {
        &self.timers
    }

    pub fn timers_mut(&mut self) -> &mut T {
        &mut self.timers
    }

    pub fn listener(&self) -> &L {
        &self.listener
    }

    pub fn listener_mut(&mut self) -> &mut L {
        &mut self.listener
    }

    pub fn into_listener(self) -> L {
        self.listener
    }

    /// Apply one command and return the resulting state.
    ///
    /// Protocol violations leave the state unchanged and come back as
    /// [`ControllerError::InvalidTransition`] or [`ControllerError::StaleTimer`].
    /// A rejected frame aborts the session and returns
    /// [`ControllerError::Detector`] after entering IDLE.
    pub fn handle(&mut self, command: Command) -> Result<AlarmState, ControllerError> {
        let state = self.state();
        trace!(%state, command = %command.kind(), "Handling command");

        match (state, command) {
            (AlarmState::Idle, Command::Start) => self.arm(),
            (AlarmState::Arming, Command::ArmingElapsed(token)) => {
                self.expect_pending(TimerKind::Arming, token)?;
                self.begin_calibration();
            }
            (AlarmState::Calibrating, Command::CalibrationElapsed(token)) => {
                self.expect_pending(TimerKind::Calibration, token)?;
                self.begin_running();
            }
            (AlarmState::Calibrating | AlarmState::Running, Command::Frame(frame)) => {
                self.observe(frame)?;
            }
            (
                AlarmState::Arming | AlarmState::Calibrating | AlarmState::Running,
                cmd @ (Command::Stop | Command::Pause),
            ) => self.disarm(cmd.kind()),
            (state, command) => return Err(self.invalid(state, command.kind())),
        }

        Ok(self.state())
    }

    fn arm(&mut self) {
        let id = Uuid::new_v4();
        self.session.id = Some(id);
        self.session.armed_at = Some(Utc::now());
        self.schedule(TimerKind::Arming, self.config.arm_delay);
        self.enter(AlarmState::Arming);
        info!(session = %id, delay = ?self.config.arm_delay, "Alarm arming");
    }

    fn begin_calibration(&mut self) {
        self.session.detector = Some(ChangeDetector::from_validated(self.config.detector));
        self.session.calibration_started_at = Some(Utc::now());
        self.session.last_observation = None;
        self.schedule(TimerKind::Calibration, self.config.calibration_duration);
        self.enter(AlarmState::Calibrating);
        self.listener.on_event(&AlarmEvent::Calibrating);
        info!(duration = ?self.config.calibration_duration, "Calibrating");
    }

    fn begin_running(&mut self) {
        self.enter(AlarmState::Running);
        self.listener.on_event(&AlarmEvent::Running);
        info!("Alarm running");
    }

    fn disarm(&mut self, reason: CommandKind) {
        let from = self.state();
        self.teardown();
        info!(%from, %reason, "Alarm disarmed");
    }

    fn observe(&mut self, frame: Frame) -> Result<(), ControllerError> {
        let state = self.state();
        let Some(detector) = self.session.detector.as_mut() else {
            // Unreachable while the session invariant holds.
            return Err(self.invalid(state, CommandKind::Frame));
        };

        let observation = match detector.observe(frame) {
            Ok(observation) => observation,
            Err(err) => {
                error!(%state, error = %err, "Frame rejected, aborting session");
                self.listener.on_event(&AlarmEvent::Aborted(err.clone()));
                self.teardown();
                return Err(err.into());
            }
        };

        self.session.last_observation = Some(observation);
        self.listener
            .on_event(&AlarmEvent::Observed { state, observation });

        if state == AlarmState::Running && observation.is_anomalous {
            warn!(
                diff = format_args!("{:.3}", observation.diff),
                threshold = format_args!("{:.3}", observation.threshold),
                "Alarm triggered"
            );
            self.listener.on_event(&AlarmEvent::Alarm(observation));
        }
        Ok(())
    }

    /// Cancel timers, drop the detector and return to IDLE.
    fn teardown(&mut self) {
        if let Some(timer) = self.session.pending_timer.take() {
            self.timers.cancel(timer);
        }
        self.session.clear();
        self.listener
            .on_event(&AlarmEvent::StateChanged(AlarmState::Idle));
    }

    fn enter(&mut self, state: AlarmState) {
        self.session.state = state;
        self.listener.on_event(&AlarmEvent::StateChanged(state));
    }

    fn schedule(&mut self, kind: TimerKind, delay: Duration) {
        if let Some(previous) = self.session.pending_timer.take() {
            self.timers.cancel(previous);
        }
        self.next_token += 1;
        let timer = Timer {
            kind,
            token: TimerToken(self.next_token),
        };
        self.timers.schedule(timer, delay);
        self.session.pending_timer = Some(timer);
    }

    /// Consume the pending timer if it is the one that fired.
    fn expect_pending(&mut self, kind: TimerKind, token: TimerToken) -> Result<(), ControllerError> {
        let expected = Timer { kind, token };
        if self.session.pending_timer != Some(expected) {
            debug!(%kind, %token, "Ignoring stale timer");
            return Err(ControllerError::StaleTimer { kind, token });
        }
        self.session.pending_timer = None;
        Ok(())
    }

    fn invalid(&self, state: AlarmState, command: CommandKind) -> ControllerError {
        // Frames stream in regardless of state; only log them at trace level.
        if command == CommandKind::Frame {
            trace!(%state, "Dropping frame outside an observing state");
        } else {
            warn!(%state, %command, "Invalid command for state, ignored");
        }
        ControllerError::InvalidTransition { state, command }
    }
}
