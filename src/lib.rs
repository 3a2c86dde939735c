//! Motion Alarm - camera-based intrusion alarm with self-calibrating detection.
//!
//! A video stream is sampled, consecutive grayscale frames are compared, and
//! a change that stands out from the scene's recent normal frame-to-frame
//! change raises an alarm. There is no fixed sensitivity threshold: the
//! detector learns each scene's noise during a calibration period.
//!
//! # Lifecycle
//!
//! - **Arming**: after `start`, a delay lets the user leave the room
//! - **Calibrating**: the detector learns ambient change; alarms are suppressed
//! - **Running**: anomalous frames raise alarm events
//! - **Idle**: reached on stop, pause, or a fatal frame error
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          Motion Alarm                           │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌──────────────────────┐   │
//! │  │  Collector  │──▶│  FrameGate  │──▶│     AlarmService     │   │
//! │  │  (source)   │   │ (subsample) │   │  (serialized queue)  │   │
//! │  └─────────────┘   └─────────────┘   └──────────┬───────────┘   │
//! │                                                 ▼               │
//! │  ┌─────────────┐                     ┌──────────────────────┐   │
//! │  │  Notifier   │◀────── events ──────│   AlarmController    │   │
//! │  │ (UI/sound)  │                     │  └─ ChangeDetector   │   │
//! │  └─────────────┘                     └──────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use motion_alarm::{
//!     capture::{Collector, SyntheticSource},
//!     notify::{ConsoleNotifier, NotifierConfig},
//!     service::{AlarmService, DEFAULT_QUEUE_CAPACITY},
//!     telemetry::create_shared_stats,
//!     Config,
//! };
//!
//! let config = Config::default();
//! let stats = create_shared_stats();
//! let notifier = ConsoleNotifier::stdout(NotifierConfig::default());
//!
//! let (service, handle) = AlarmService::new(
//!     config.controller_config(),
//!     notifier,
//!     stats.clone(),
//!     DEFAULT_QUEUE_CAPACITY,
//! )
//! .expect("valid configuration");
//! let _service = service.spawn().expect("spawn alarm service");
//!
//! let mut collector = Collector::new(config.capture, handle.clone(), stats);
//! collector
//!     .start(SyntheticSource::new(320, 240).with_fps(15.0))
//!     .expect("start capture");
//!
//! handle.start().expect("arm");
//! ```

pub mod capture;
pub mod config;
pub mod core;
pub mod notify;
pub mod service;
pub mod telemetry;

// Re-export key types at crate root for convenience
pub use capture::{CaptureConfig, Collector, CollectorError, FrameSource};
pub use config::{Config, ConfigError};
pub use crate::core::{
    AlarmController, AlarmEvent, AlarmListener, AlarmState, ChangeDetector, Command,
    ConfigurationError, ControllerConfig, ControllerError, DetectorConfig, DetectorError, Frame,
    Observation,
};
pub use service::{AlarmHandle, AlarmService, ServiceError};
pub use telemetry::{SessionStats, SharedStats};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
