//! Runtime statistics for the motion alarm.
//!
//! Counters describe what the alarm processed during this run. They live in
//! memory only and are printed when the agent exits.

pub mod stats;

// Re-export commonly used types
pub use stats::{create_shared_stats, SessionStats, SharedStats, StatsListener, StatsSnapshot};
