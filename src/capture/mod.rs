//! Frame capture for the motion alarm.
//!
//! Camera access itself is external; this module defines the boundary a
//! frame producer plugs into, the gate that thins the stream, and the
//! thread that pushes frames into the alarm's command queue.

pub mod collector;
pub mod gate;
pub mod source;

// Re-export commonly used types
pub use collector::{Collector, CollectorError};
pub use gate::{CaptureConfig, FrameGate, DEFAULT_MAX_PROCESS_FPS};
pub use source::{CaptureError, FrameSource, RawVideoSource, SyntheticSource};
