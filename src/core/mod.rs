//! Core functionality of the motion alarm.
//!
//! This module contains:
//! - Frame buffers and the mean absolute difference primitive
//! - The self-calibrating change detector
//! - Lifecycle timers
//! - The alarm state machine

pub mod controller;
pub mod detector;
pub mod frame;
pub mod timer;

// Re-export commonly used types
pub use controller::{
    AlarmController, AlarmEvent, AlarmListener, AlarmSession, AlarmState, Command, CommandKind,
    ControllerConfig, ControllerError,
};
pub use detector::{
    ChangeDetector, ConfigurationError, DetectorConfig, DetectorError, Observation,
};
pub use frame::{mean_absolute_difference, Frame, FrameError};
pub use timer::{DeadlineTimers, Timer, TimerKind, TimerToken, Timers};
