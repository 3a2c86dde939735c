//! Self-calibrating frame-change detector.
//!
//! Consecutive frames are compared by their mean absolute pixel difference.
//! Two exponential moving averages with an effective window of `N` samples
//! track that difference:
//!
//! - `moving_abs_diff_avg`: the ambient change rate (sensor noise, flicker)
//! - `moving_diff_avg`: how much the change rate itself fluctuates
//!
//! A frame is anomalous when its difference exceeds
//! `moving_diff_avg * threshold_factor + moving_abs_diff_avg`, so the
//! threshold follows each scene's noise floor instead of a fixed number.
//!
//! The volatility term uses the moving average *after* it has absorbed the
//! current sample.

use crate::core::frame::{mean_absolute_difference, Frame};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace};

/// Default effective window of the moving averages, in samples.
pub const DEFAULT_AVERAGING_WINDOW: u32 = 25;

/// Default volatility multiplier.
pub const DEFAULT_THRESHOLD_FACTOR: f64 = 8.0;

/// Rejected detector or capture parameters.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    #[error("averaging window must be greater than zero")]
    NonPositiveWindow,

    #[error("threshold factor must not be negative (got {0})")]
    NegativeThresholdFactor(f64),

    #[error("threshold factor must be a finite number")]
    NonFiniteThresholdFactor,

    #[error("subsample factor must be at least 1")]
    ZeroSubsample,

    #[error("processing rate must be positive (got {0})")]
    NonPositiveRate(f64),
}

/// Errors raised by [`ChangeDetector::observe`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DetectorError {
    #[error("frame is {}x{}, session frames are {}x{}", actual.0, actual.1, expected.0, expected.1)]
    DimensionMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },
}

/// Tuning parameters of the detector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Effective window `N` of the moving averages
    pub averaging_window: u32,
    /// Multiplier applied to the volatility average
    pub threshold_factor: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            averaging_window: DEFAULT_AVERAGING_WINDOW,
            threshold_factor: DEFAULT_THRESHOLD_FACTOR,
        }
    }
}

impl DetectorConfig {
    /// Build a validated configuration.
    pub fn new(averaging_window: u32, threshold_factor: f64) -> Result<Self, ConfigurationError> {
        let config = Self {
            averaging_window,
            threshold_factor,
        };
        config.validate()?;
        Ok(config)
    }

    /// Window sized so the averages span roughly 100 processed frames'
    /// worth of history at 1 fps, e.g. 25 samples at 4 fps.
    pub fn for_process_rate(
        process_fps: f64,
        threshold_factor: f64,
    ) -> Result<Self, ConfigurationError> {
        if !(process_fps > 0.0) {
            return Err(ConfigurationError::NonPositiveRate(process_fps));
        }
        let window = (100.0 / process_fps).round().max(1.0) as u32;
        Self::new(window, threshold_factor)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.averaging_window == 0 {
            return Err(ConfigurationError::NonPositiveWindow);
        }
        if !self.threshold_factor.is_finite() {
            return Err(ConfigurationError::NonFiniteThresholdFactor);
        }
        if self.threshold_factor < 0.0 {
            return Err(ConfigurationError::NegativeThresholdFactor(
                self.threshold_factor,
            ));
        }
        Ok(())
    }
}

/// Result of feeding one frame to the detector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Mean absolute difference to the previous frame
    pub diff: f64,
    /// Adaptive threshold the difference was compared against
    pub threshold: f64,
    /// Ambient change rate
    pub moving_abs_diff_avg: f64,
    /// Volatility of the change rate
    pub moving_diff_avg: f64,
    /// Largest difference seen since the last reset
    pub max_diff_observed: f64,
    /// Whether `diff > threshold`
    pub is_anomalous: bool,
}

impl Observation {
    fn neutral(max_diff_observed: f64) -> Self {
        Self {
            diff: 0.0,
            threshold: 0.0,
            moving_abs_diff_avg: 0.0,
            moving_diff_avg: 0.0,
            max_diff_observed,
            is_anomalous: false,
        }
    }

    /// How far the difference sits above (positive) or below the threshold.
    pub fn margin(&self) -> f64 {
        self.diff - self.threshold
    }
}

/// Per-session estimator state.
pub struct ChangeDetector {
    config: DetectorConfig,
    previous_frame: Option<Frame>,
    moving_abs_diff_avg: Option<f64>,
    moving_diff_avg: Option<f64>,
    max_diff_observed: f64,
    comparisons: u64,
}

impl ChangeDetector {
    /// Create a detector, rejecting invalid parameters up front.
    pub fn new(config: DetectorConfig) -> Result<Self, ConfigurationError> {
        config.validate()?;
        Ok(Self::from_validated(config))
    }

    /// Skip validation; the controller checks its configuration once at construction.
    pub(crate) fn from_validated(config: DetectorConfig) -> Self {
        Self {
            config,
            previous_frame: None,
            moving_abs_diff_avg: None,
            moving_diff_avg: None,
            max_diff_observed: 0.0,
            comparisons: 0,
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Feed the next frame of the session.
    pub fn observe(&mut self, frame: Frame) -> Result<Observation, DetectorError> {
        let Some(previous) = self.previous_frame.as_ref() else {
            trace!(dims = ?frame.dimensions(), "Holding first frame of session");
            self.previous_frame = Some(frame);
            return Ok(Observation::neutral(self.max_diff_observed));
        };

        if previous.dimensions() != frame.dimensions() {
            return Err(DetectorError::DimensionMismatch {
                expected: previous.dimensions(),
                actual: frame.dimensions(),
            });
        }

        let diff = mean_absolute_difference(&frame, previous);
        let n = f64::from(self.config.averaging_window);

        let abs_avg = match self.moving_abs_diff_avg {
            None => diff,
            Some(avg) => (avg * (n - 1.0) + diff) / n,
        };
        let delta = (diff - abs_avg).abs();
        let diff_avg = match self.moving_diff_avg {
            None => 0.0,
            Some(avg) => (avg * (n - 1.0) + delta) / n,
        };

        self.moving_abs_diff_avg = Some(abs_avg);
        self.moving_diff_avg = Some(diff_avg);
        self.max_diff_observed = self.max_diff_observed.max(diff);
        self.comparisons += 1;

        let threshold = diff_avg * self.config.threshold_factor + abs_avg;
        let observation = Observation {
            diff,
            threshold,
            moving_abs_diff_avg: abs_avg,
            moving_diff_avg: diff_avg,
            max_diff_observed: self.max_diff_observed,
            is_anomalous: diff > threshold,
        };

        debug!(
            threshold = format_args!("{threshold:.3}"),
            moving_abs_diff_avg = format_args!("{abs_avg:.3}"),
            moving_diff_avg = format_args!("{diff_avg:.3}"),
            max_diff = format_args!("{:.3}", self.max_diff_observed),
            diff = format_args!("{diff:.3}"),
            anomalous = observation.is_anomalous,
            "Processed frame"
        );

        // The old buffer is dropped here.
        self.previous_frame = Some(frame);
        Ok(observation)
    }

    /// Return to the just-created condition.
    ///
    /// The alarm controller does not reuse detectors: each calibration
    /// period starts with a new one, and stopping discards it.
    pub fn reset(&mut self) {
        self.previous_frame = None;
        self.moving_abs_diff_avg = None;
        self.moving_diff_avg = None;
        self.max_diff_observed = 0.0;
        self.comparisons = 0;
    }

    /// Ambient change rate; zero until the first comparison.
    pub fn moving_abs_diff_avg(&self) -> f64 {
        self.moving_abs_diff_avg.unwrap_or(0.0)
    }

    /// Volatility average; zero until two frames have been compared.
    pub fn moving_diff_avg(&self) -> f64 {
        self.moving_diff_avg.unwrap_or(0.0)
    }

    pub fn max_diff_observed(&self) -> f64 {
        self.max_diff_observed
    }

    /// Number of frame pairs compared since the last reset.
    pub fn comparisons(&self) -> u64 {
        self.comparisons
    }

    pub fn has_previous_frame(&self) -> bool {
        self.previous_frame.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(value: u8) -> Frame {
        Frame::filled(16, 12, value).unwrap()
    }

    fn detector(window: u32, factor: f64) -> ChangeDetector {
        ChangeDetector::new(DetectorConfig::new(window, factor).unwrap()).unwrap()
    }

    /// A scene with noisy flicker: alternating brightness with varying step.
    fn noisy_sequence() -> Vec<Frame> {
        let steps = [3u8, 1, 4, 1, 5, 9, 2, 6, 5, 3, 5, 40, 8, 9, 7, 9, 3, 2, 60, 4];
        let mut value = 100u8;
        let mut frames = vec![flat(value)];
        for (i, step) in steps.iter().enumerate() {
            value = if i % 2 == 0 { value + step } else { value - step };
            frames.push(flat(value));
        }
        frames
    }

    #[test]
    fn test_config_validation() {
        assert_eq!(
            DetectorConfig::new(0, 2.0).unwrap_err(),
            ConfigurationError::NonPositiveWindow
        );
        assert_eq!(
            DetectorConfig::new(10, -0.5).unwrap_err(),
            ConfigurationError::NegativeThresholdFactor(-0.5)
        );
        assert_eq!(
            DetectorConfig::new(10, f64::NAN).unwrap_err(),
            ConfigurationError::NonFiniteThresholdFactor
        );
        assert!(DetectorConfig::new(1, 0.0).is_ok());
    }

    #[test]
    fn test_window_from_process_rate() {
        let config = DetectorConfig::for_process_rate(4.0, 8.0).unwrap();
        assert_eq!(config.averaging_window, 25);
        assert!(DetectorConfig::for_process_rate(0.0, 8.0).is_err());
    }

    #[test]
    fn test_first_frame_is_neutral() {
        let mut det = detector(10, 2.0);
        let obs = det.observe(flat(200)).unwrap();

        assert_eq!(obs.diff, 0.0);
        assert!(!obs.is_anomalous);
        assert!(det.has_previous_frame());
        assert_eq!(det.comparisons(), 0);
    }

    #[test]
    fn test_first_frame_is_neutral_after_reset() {
        let mut det = detector(10, 0.0);
        for frame in noisy_sequence() {
            det.observe(frame).unwrap();
        }
        det.reset();

        assert!(!det.has_previous_frame());
        assert_eq!(det.max_diff_observed(), 0.0);
        assert!(!det.observe(flat(0)).unwrap().is_anomalous);
        assert!(!det.observe(flat(255)).unwrap().is_anomalous);
    }

    #[test]
    fn test_first_comparison_seeds_averages() {
        let mut det = detector(10, 2.0);
        det.observe(flat(10)).unwrap();
        let obs = det.observe(flat(14)).unwrap();

        assert_eq!(obs.diff, 4.0);
        assert_eq!(obs.moving_abs_diff_avg, 4.0);
        assert_eq!(obs.moving_diff_avg, 0.0);
        assert_eq!(obs.threshold, 4.0);
        assert!(!obs.is_anomalous);
    }

    #[test]
    fn test_moving_average_update() {
        let mut det = detector(10, 2.0);
        det.observe(flat(0)).unwrap();
        det.observe(flat(2)).unwrap();
        let obs = det.observe(flat(52)).unwrap();

        // abs avg: (2 * 9 + 50) / 10 = 6.8; delta = 43.2; diff avg = 4.32
        assert!((obs.moving_abs_diff_avg - 6.8).abs() < 1e-9);
        assert!((obs.moving_diff_avg - 4.32).abs() < 1e-9);
        assert!((obs.threshold - 15.44).abs() < 1e-9);
        assert!(obs.is_anomalous);
        assert_eq!(obs.max_diff_observed, 50.0);
    }

    #[test]
    fn test_window_of_one_tracks_latest_sample() {
        let mut det = detector(1, 3.0);
        det.observe(flat(0)).unwrap();
        det.observe(flat(5)).unwrap();
        let obs = det.observe(flat(25)).unwrap();

        assert_eq!(obs.moving_abs_diff_avg, 20.0);
        assert_eq!(obs.moving_diff_avg, 0.0);
        assert!(!obs.is_anomalous);
    }

    #[test]
    fn test_zero_factor_compares_against_ambient_average() {
        let mut det = detector(4, 0.0);
        det.observe(flat(0)).unwrap();
        det.observe(flat(4)).unwrap();
        let obs = det.observe(flat(12)).unwrap();

        assert_eq!(obs.threshold, obs.moving_abs_diff_avg);
        assert!(obs.is_anomalous);
    }

    #[test]
    fn test_static_scene_never_alarms() {
        let mut det = detector(12, 1.3);
        det.observe(flat(77)).unwrap();
        for _ in 0..500 {
            let obs = det.observe(flat(77)).unwrap();
            assert_eq!(obs.diff, 0.0);
            assert!(!obs.is_anomalous);
        }
    }

    #[test]
    fn test_dimension_mismatch_is_rejected() {
        let mut det = detector(10, 2.0);
        det.observe(flat(1)).unwrap();
        let err = det.observe(Frame::filled(8, 8, 1).unwrap()).unwrap_err();

        assert_eq!(
            err,
            DetectorError::DimensionMismatch {
                expected: (16, 12),
                actual: (8, 8)
            }
        );
        // State is untouched by the rejected frame.
        assert_eq!(det.comparisons(), 0);
    }

    #[test]
    fn test_replay_is_deterministic() {
        let run = || {
            let mut det = detector(7, 2.5);
            noisy_sequence()
                .into_iter()
                .map(|f| det.observe(f).unwrap())
                .collect::<Vec<_>>()
        };
        let first = run();
        let second = run();

        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(&second) {
            assert_eq!(a.diff.to_bits(), b.diff.to_bits());
            assert_eq!(a.threshold.to_bits(), b.threshold.to_bits());
            assert_eq!(a.is_anomalous, b.is_anomalous);
        }
    }

    #[test]
    fn test_higher_factor_never_adds_anomalies() {
        let verdicts = |factor: f64| {
            let mut det = detector(5, factor);
            noisy_sequence()
                .into_iter()
                .map(|f| det.observe(f).unwrap().is_anomalous)
                .collect::<Vec<_>>()
        };

        let factors = [0.0, 0.5, 1.3, 2.0, 4.0, 8.0];
        for pair in factors.windows(2) {
            let low = verdicts(pair[0]);
            let high = verdicts(pair[1]);
            for (l, h) in low.iter().zip(&high) {
                assert!(!h || *l, "factor {} flagged a frame {} did not", pair[1], pair[0]);
            }
        }
        assert!(verdicts(0.0).iter().any(|a| *a));
    }
}
