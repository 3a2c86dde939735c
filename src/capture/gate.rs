//! Frame admission: subsampling and processing-rate limit.
//!
//! Cameras deliver far more frames than the detector needs. The gate passes
//! every `subsample`-th frame, and of those at most `max_process_fps` per
//! second; everything else is dropped before it reaches the command queue.

use crate::core::detector::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Default processing rate, in frames per second.
pub const DEFAULT_MAX_PROCESS_FPS: f64 = 4.0;

/// Which captured frames are handed to the alarm.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Process only every Kth captured frame (1 = every frame)
    pub subsample: u32,
    /// Upper bound on processed frames per second; `None` for no limit
    pub max_process_fps: Option<f64>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            subsample: 1,
            max_process_fps: Some(DEFAULT_MAX_PROCESS_FPS),
        }
    }
}

impl CaptureConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.subsample == 0 {
            return Err(ConfigurationError::ZeroSubsample);
        }
        if let Some(fps) = self.max_process_fps {
            if !(fps > 0.0 && fps.is_finite()) {
                return Err(ConfigurationError::NonPositiveRate(fps));
            }
        }
        Ok(())
    }

    /// Minimum spacing between processed frames.
    pub fn min_interval(&self) -> Option<Duration> {
        self.max_process_fps
            .map(|fps| Duration::from_secs_f64(1.0 / fps))
    }
}

/// Stateful filter applying a [`CaptureConfig`].
#[derive(Debug, Clone)]
pub struct FrameGate {
    subsample: u64,
    min_interval: Option<Duration>,
    seen: u64,
    last_admitted: Option<Instant>,
}

impl FrameGate {
    pub fn new(config: &CaptureConfig) -> Result<Self, ConfigurationError> {
        config.validate()?;
        Ok(Self {
            subsample: u64::from(config.subsample),
            min_interval: config.min_interval(),
            seen: 0,
            last_admitted: None,
        })
    }

    /// Gate that lets every frame through.
    pub fn pass_through() -> Self {
        Self {
            subsample: 1,
            min_interval: None,
            seen: 0,
            last_admitted: None,
        }
    }

    /// Decide whether the frame captured at `now` should be processed.
    pub fn admit(&mut self, now: Instant) -> bool {
        let index = self.seen;
        self.seen += 1;

        if index % self.subsample != 0 {
            return false;
        }
        if let (Some(min), Some(last)) = (self.min_interval, self.last_admitted) {
            if now.saturating_duration_since(last) < min {
                return false;
            }
        }
        self.last_admitted = Some(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subsample_every_third() {
        let config = CaptureConfig {
            subsample: 3,
            max_process_fps: None,
        };
        let mut gate = FrameGate::new(&config).unwrap();
        let now = Instant::now();

        let admitted: Vec<bool> = (0..7).map(|_| gate.admit(now)).collect();
        assert_eq!(admitted, vec![true, false, false, true, false, false, true]);
    }

    #[test]
    fn test_rate_limit() {
        let config = CaptureConfig {
            subsample: 1,
            max_process_fps: Some(4.0),
        };
        let mut gate = FrameGate::new(&config).unwrap();
        let t0 = Instant::now();

        assert!(gate.admit(t0));
        assert!(!gate.admit(t0 + Duration::from_millis(100)));
        assert!(!gate.admit(t0 + Duration::from_millis(249)));
        assert!(gate.admit(t0 + Duration::from_millis(250)));
        assert!(!gate.admit(t0 + Duration::from_millis(300)));
    }

    #[test]
    fn test_invalid_capture_config() {
        let zero = CaptureConfig {
            subsample: 0,
            max_process_fps: None,
        };
        assert_eq!(zero.validate(), Err(ConfigurationError::ZeroSubsample));

        let negative = CaptureConfig {
            subsample: 1,
            max_process_fps: Some(-1.0),
        };
        assert!(FrameGate::new(&negative).is_err());
    }

    #[test]
    fn test_pass_through() {
        let mut gate = FrameGate::pass_through();
        let now = Instant::now();
        assert!((0..10).all(|_| gate.admit(now)));
    }
}
