//! Serialized command loop.
//!
//! The capture thread, the user, and the lifecycle timers all act on the same
//! controller. Instead of sharing it, they send [`Command`]s through one
//! bounded channel and a single thread applies them in arrival order. Timers
//! are deadlines checked by that same thread, so a timer can never interleave
//! with a `stop` that cancels it. Every message is stamped when it is queued,
//! and an expired timer takes its place in that order: after everything sent
//! up to its deadline, before anything sent later.
//!
//! ```text
//!  capture thread ──frame──┐
//!  user / signals ─start───┼──▶ [ queue ] ──▶ AlarmService ──▶ AlarmController ──▶ listener
//!                  stop────┘                       ▲  │
//!                                                  └──┘ deadline timers
//! ```

use crate::core::controller::{
    AlarmController, AlarmListener, AlarmState, Command, CommandKind, ControllerConfig,
    ControllerError,
};
use crate::core::detector::ConfigurationError;
use crate::core::frame::Frame;
use crate::core::timer::DeadlineTimers;
use crate::telemetry::{SharedStats, StatsListener};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info};

/// Default capacity of the command queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Errors from talking to the command loop.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("alarm service is not running")]
    Disconnected,

    #[error("could not spawn the alarm service thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("alarm service thread panicked")]
    Panicked,
}

enum Message {
    Command(Command),
    Shutdown,
}

struct Queued {
    message: Message,
    sent_at: Instant,
}

impl Queued {
    fn now(message: Message) -> Self {
        Self {
            message,
            sent_at: Instant::now(),
        }
    }
}

/// Latest controller state, readable from any thread.
#[derive(Debug, Clone, Default)]
pub struct SharedState(Arc<AtomicU8>);

impl SharedState {
    pub fn get(&self) -> AlarmState {
        match self.0.load(Ordering::Acquire) {
            1 => AlarmState::Arming,
            2 => AlarmState::Calibrating,
            3 => AlarmState::Running,
            _ => AlarmState::Idle,
        }
    }

    fn set(&self, state: AlarmState) {
        let raw = match state {
            AlarmState::Idle => 0,
            AlarmState::Arming => 1,
            AlarmState::Calibrating => 2,
            AlarmState::Running => 3,
        };
        self.0.store(raw, Ordering::Release);
    }
}

/// Cloneable sending side of the command queue.
#[derive(Clone)]
pub struct AlarmHandle {
    sender: Sender<Queued>,
    state: SharedState,
}

impl AlarmHandle {
    /// Queue a command, waiting for room if the queue is full.
    pub fn send(&self, command: Command) -> Result<(), ServiceError> {
        self.sender
            .send(Queued::now(Message::Command(command)))
            .map_err(|_| ServiceError::Disconnected)
    }

    pub fn start(&self) -> Result<(), ServiceError> {
        self.send(Command::Start)
    }

    pub fn stop(&self) -> Result<(), ServiceError> {
        self.send(Command::Stop)
    }

    pub fn pause(&self) -> Result<(), ServiceError> {
        self.send(Command::Pause)
    }

    /// Offer a frame without blocking. Returns `false` if the queue was full
    /// and the frame was dropped.
    pub fn try_submit_frame(&self, frame: Frame) -> Result<bool, ServiceError> {
        let queued = Queued::now(Message::Command(Command::Frame(frame)));
        match self.sender.try_send(queued) {
            Ok(()) => Ok(true),
            Err(TrySendError::Full(_)) => Ok(false),
            Err(TrySendError::Disconnected(_)) => Err(ServiceError::Disconnected),
        }
    }

    /// Ask the loop to disarm and exit once it reaches this message.
    pub fn shutdown(&self) -> Result<(), ServiceError> {
        self.sender
            .send(Queued::now(Message::Shutdown))
            .map_err(|_| ServiceError::Disconnected)
    }

    /// State after the last command the loop applied.
    pub fn state(&self) -> AlarmState {
        self.state.get()
    }
}

/// Single consumer of the command queue; owns the controller.
pub struct AlarmService<L> {
    controller: AlarmController<DeadlineTimers, StatsListener<L>>,
    receiver: Receiver<Queued>,
    state: SharedState,
    stats: SharedStats,
}

impl<L: AlarmListener> AlarmService<L> {
    /// Build the loop and the handle used to feed it.
    pub fn new(
        config: ControllerConfig,
        listener: L,
        stats: SharedStats,
        queue_capacity: usize,
    ) -> Result<(Self, AlarmHandle), ConfigurationError> {
        let listener = StatsListener::new(stats.clone(), listener);
        let controller = AlarmController::new(config, DeadlineTimers::new(), listener)?;
        let (sender, receiver) = bounded(queue_capacity.max(1));
        let state = SharedState::default();

        let handle = AlarmHandle {
            sender,
            state: state.clone(),
        };
        let service = Self {
            controller,
            receiver,
            state,
            stats,
        };
        Ok((service, handle))
    }

    /// Process commands until shutdown or until every handle is dropped.
    /// An armed session is paused on the way out. Returns the listener.
    pub fn run(mut self) -> L {
        loop {
            let received = match self.controller.timers().next_deadline() {
                Some(deadline) => self.receiver.recv_deadline(deadline),
                None => self.receiver.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };

            match received {
                Ok(Queued { message, sent_at }) => {
                    self.fire_timers_due_before(sent_at);
                    match message {
                        Message::Command(command) => self.dispatch(command),
                        Message::Shutdown => {
                            info!("Alarm service shutting down");
                            break;
                        }
                    }
                }
                // Nothing was queued before the deadline.
                Err(RecvTimeoutError::Timeout) => {
                    if let Some(timer) = self.controller.timers_mut().take_due(Instant::now()) {
                        self.dispatch(Command::from_timer(timer));
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    debug!("All alarm handles dropped");
                    break;
                }
            }
        }

        if self.controller.state().is_armed() {
            self.dispatch(Command::Pause);
        }
        self.controller.into_listener().into_inner()
    }

    /// Run the loop on a dedicated thread.
    pub fn spawn(self) -> Result<ServiceThread<L>, ServiceError>
    where
        L: Send + 'static,
    {
        let join = thread::Builder::new()
            .name("alarm-controller".to_string())
            .spawn(move || self.run())?;
        Ok(ServiceThread { join })
    }

    /// Fire timers that expired strictly before a message sent at `sent_at`.
    fn fire_timers_due_before(&mut self, sent_at: Instant) {
        while self
            .controller
            .timers()
            .next_deadline()
            .is_some_and(|deadline| deadline < sent_at)
        {
            let Some(timer) = self.controller.timers_mut().take_pending() else {
                break;
            };
            self.dispatch(Command::from_timer(timer));
        }
    }

    fn dispatch(&mut self, command: Command) {
        match self.controller.handle(command) {
            Ok(_) => {}
            Err(ControllerError::InvalidTransition {
                command: CommandKind::Frame,
                ..
            }) => self.stats.record_frame_ignored(),
            Err(err) if err.is_recoverable() => self.stats.record_invalid_command(),
            // Already logged and reported to the listener as `Aborted`.
            Err(_) => {}
        }
        self.state.set(self.controller.state());
    }
}

/// Join handle of a spawned [`AlarmService`].
pub struct ServiceThread<L> {
    join: JoinHandle<L>,
}

impl<L> ServiceThread<L> {
    /// Wait for the loop to exit and get the listener back.
    pub fn join(self) -> Result<L, ServiceError> {
        self.join.join().map_err(|_| ServiceError::Panicked)
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}
