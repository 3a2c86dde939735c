//! Adapters between alarm events and the outside world.
//!
//! The controller only ever talks to an [`AlarmListener`]; these types are
//! the listeners the agent ships with.
//!
//! [`AlarmListener`]: crate::core::AlarmListener

pub mod channel;
pub mod console;

// Re-export commonly used types
pub use channel::ChannelListener;
pub use console::{AlarmDisplay, ConsoleNotifier, NotifierConfig};
