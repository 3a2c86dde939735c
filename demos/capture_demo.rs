//! Demonstration of a full alarm cycle on a synthetic scene.
//!
//! This example shows how to:
//! 1. Build the alarm service and its handle
//! 2. Feed it from a paced frame source
//! 3. Arm, calibrate and watch for motion
//! 4. Read the run statistics
//!
//! Run with: cargo run --example capture_demo
//!
//! The scene is static for the first few seconds, then a bright block
//! starts moving through it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use motion_alarm::{
    capture::{CaptureConfig, Collector, SyntheticSource},
    core::{ControllerConfig, DetectorConfig},
    notify::{ConsoleNotifier, NotifierConfig},
    service::{AlarmService, DEFAULT_QUEUE_CAPACITY},
    telemetry::create_shared_stats,
    AlarmState,
};

const CAMERA_FPS: f64 = 15.0;
const PROCESS_FPS: f64 = 4.0;

fn main() {
    println!("Motion Alarm - Capture Demo");
    println!("===========================");
    println!();

    let detector = match DetectorConfig::for_process_rate(PROCESS_FPS, 8.0) {
        Ok(detector) => detector,
        Err(e) => {
            eprintln!("Invalid detector settings: {e}");
            return;
        }
    };
    let config = ControllerConfig {
        arm_delay: Duration::from_secs(2),
        calibration_duration: Duration::from_secs(4),
        detector,
    };
    let capture = CaptureConfig {
        subsample: 1,
        max_process_fps: Some(PROCESS_FPS),
    };

    println!(
        "Arm delay {}s, calibration {}s, window {} frames",
        config.arm_delay.as_secs(),
        config.calibration_duration.as_secs(),
        detector.averaging_window
    );
    println!("Motion starts about 10 seconds in.");
    println!();

    let stats = create_shared_stats();
    let notifier = ConsoleNotifier::stdout(NotifierConfig {
        sound_enabled: false,
        ..NotifierConfig::default()
    });

    let (service, handle) =
        match AlarmService::new(config, notifier, stats.clone(), DEFAULT_QUEUE_CAPACITY) {
            Ok(pair) => pair,
            Err(e) => {
                eprintln!("Error creating alarm service: {e}");
                return;
            }
        };
    let service = match service.spawn() {
        Ok(service) => service,
        Err(e) => {
            eprintln!("Error starting alarm service: {e}");
            return;
        }
    };

    let source = SyntheticSource::new(160, 120)
        .with_fps(CAMERA_FPS)
        .with_motion_from((10.0 * CAMERA_FPS) as u64);
    let mut collector = Collector::new(capture, handle.clone(), stats.clone());
    if let Err(e) = collector.start(source) {
        eprintln!("Error starting capture: {e}");
        return;
    }

    // Set up stop flag
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();

    // Set up Ctrl+C handler
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .expect("Error setting Ctrl-C handler");

    if handle.start().is_err() {
        eprintln!("Alarm service stopped unexpectedly");
        return;
    }

    let deadline = Instant::now() + Duration::from_secs(20);
    let mut last_state = AlarmState::Idle;
    while running.load(Ordering::SeqCst) && Instant::now() < deadline {
        let state = handle.state();
        if state != last_state {
            println!("--- {state} ---");
            last_state = state;
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    println!();
    println!("Stopping...");
    let _ = handle.stop();
    let _ = collector.stop();
    let _ = handle.shutdown();
    let _ = service.join();

    println!();
    println!("{}", stats.summary());
}
