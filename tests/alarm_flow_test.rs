//! End-to-end tests of the alarm lifecycle.

use motion_alarm::capture::{Collector, SyntheticSource};
use motion_alarm::core::{Timer, TimerKind, Timers};
use motion_alarm::notify::ChannelListener;
use motion_alarm::service::AlarmService;
use motion_alarm::telemetry::create_shared_stats;
use motion_alarm::{
    AlarmController, AlarmEvent, AlarmState, CaptureConfig, Command, ControllerConfig,
    ControllerError, DetectorConfig, Frame,
};
use std::thread;
use std::time::{Duration, Instant};

/// Records scheduling requests so the test can fire them by hand.
#[derive(Default)]
struct ManualTimers {
    scheduled: Vec<(Timer, Duration)>,
    cancelled: Vec<Timer>,
}

impl ManualTimers {
    fn last(&self) -> Timer {
        self.scheduled.last().expect("a timer was scheduled").0
    }
}

impl Timers for ManualTimers {
    fn schedule(&mut self, timer: Timer, delay: Duration) {
        self.scheduled.push((timer, delay));
    }

    fn cancel(&mut self, timer: Timer) {
        self.cancelled.push(timer);
    }
}

fn flat(value: u8) -> Command {
    Command::Frame(Frame::filled(4, 4, value).unwrap())
}

fn config() -> ControllerConfig {
    ControllerConfig {
        arm_delay: Duration::from_secs(10),
        calibration_duration: Duration::from_secs(10),
        detector: DetectorConfig::new(10, 2.0).unwrap(),
    }
}

#[test]
fn test_full_session_raises_alarm_after_calibration() {
    let (listener, events) = ChannelListener::new();
    let mut controller = AlarmController::new(config(), ManualTimers::default(), listener).unwrap();

    assert_eq!(controller.handle(Command::Start), Ok(AlarmState::Arming));
    let arming = controller.timers().last();
    assert_eq!(arming.kind, TimerKind::Arming);
    assert_eq!(controller.timers().scheduled[0].1, Duration::from_secs(10));

    assert_eq!(
        controller.handle(Command::from_timer(arming)),
        Ok(AlarmState::Calibrating)
    );
    let calibration = controller.timers().last();
    assert_eq!(calibration.kind, TimerKind::Calibration);

    // Baseline plus five frames that each change by 2.
    for value in [0, 2, 4, 6, 8, 10] {
        controller.handle(flat(value)).unwrap();
    }
    let detector = controller.session().detector().unwrap();
    assert!((detector.moving_abs_diff_avg() - 2.0).abs() < 1e-9);
    assert!(detector.moving_diff_avg().abs() < 1e-9);

    assert_eq!(
        controller.handle(Command::from_timer(calibration)),
        Ok(AlarmState::Running)
    );

    controller.handle(flat(60)).unwrap();
    let observation = *controller.session().last_observation().unwrap();
    assert!((observation.diff - 50.0).abs() < 1e-9);
    assert!((observation.moving_abs_diff_avg - 6.8).abs() < 1e-9);
    assert!((observation.moving_diff_avg - 4.32).abs() < 1e-9);
    assert!((observation.threshold - 15.44).abs() < 1e-9);
    assert!(observation.is_anomalous);
    assert_eq!(controller.state(), AlarmState::Running);

    assert_eq!(controller.handle(Command::Stop), Ok(AlarmState::Idle));
    assert!(controller.session().detector().is_none());
    assert!(controller.session().pending_timer().is_none());

    let events: Vec<_> = events.try_iter().collect();
    let alarms: Vec<_> = events
        .iter()
        .filter(|e| matches!(e, AlarmEvent::Alarm(_)))
        .collect();
    assert_eq!(alarms, vec![&AlarmEvent::Alarm(observation)]);

    let calibrating_observations = events
        .iter()
        .filter(|e| {
            matches!(
                e,
                AlarmEvent::Observed {
                    state: AlarmState::Calibrating,
                    ..
                }
            )
        })
        .count();
    assert_eq!(calibrating_observations, 6);
}

#[test]
fn test_stop_during_arming_cancels_timer() {
    let mut controller =
        AlarmController::new(config(), ManualTimers::default(), |_: &AlarmEvent| {}).unwrap();

    controller.handle(Command::Start).unwrap();
    let arming = controller.timers().last();
    assert_eq!(controller.handle(Command::Stop), Ok(AlarmState::Idle));
    assert_eq!(controller.timers().cancelled, vec![arming]);

    // The cancelled timer arriving late changes nothing.
    assert!(controller.handle(Command::from_timer(arming)).is_err());
    assert_eq!(controller.state(), AlarmState::Idle);
}

#[test]
fn test_restart_uses_fresh_timer_and_detector() {
    let mut controller =
        AlarmController::new(config(), ManualTimers::default(), |_: &AlarmEvent| {}).unwrap();

    controller.handle(Command::Start).unwrap();
    let first = controller.timers().last();
    controller.handle(Command::Pause).unwrap();
    controller.handle(Command::Start).unwrap();
    let second = controller.timers().last();
    assert_ne!(first.token, second.token);

    assert!(matches!(
        controller.handle(Command::from_timer(first)),
        Err(ControllerError::StaleTimer { .. })
    ));
    assert_eq!(controller.state(), AlarmState::Arming);

    controller.handle(Command::from_timer(second)).unwrap();
    let detector = controller.session().detector().unwrap();
    assert!(!detector.has_previous_frame());
    assert_eq!(detector.comparisons(), 0);
}

#[test]
fn test_service_with_synthetic_capture() {
    let stats = create_shared_stats();
    let (listener, events) = ChannelListener::new();
    let controller_config = ControllerConfig {
        arm_delay: Duration::from_millis(10),
        calibration_duration: Duration::from_millis(150),
        detector: DetectorConfig::new(10, 2.0).unwrap(),
    };
    let (service, handle) = AlarmService::new(controller_config, listener, stats.clone(), 16).unwrap();
    let service = service.spawn().unwrap();

    let capture = CaptureConfig {
        subsample: 1,
        max_process_fps: None,
    };
    let mut collector = Collector::new(capture, handle.clone(), stats.clone());
    handle.start().unwrap();
    collector
        .start(
            SyntheticSource::new(32, 24)
                .with_fps(200.0)
                .with_frame_limit(400),
        )
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    while collector.is_running() {
        assert!(Instant::now() < deadline, "capture did not finish");
        thread::sleep(Duration::from_millis(5));
    }
    collector.wait().unwrap();
    handle.shutdown().unwrap();
    service.join().unwrap();

    let events: Vec<_> = events.try_iter().collect();
    assert!(events.contains(&AlarmEvent::Calibrating));
    assert!(events.contains(&AlarmEvent::Running));
    assert_eq!(
        events.last(),
        Some(&AlarmEvent::StateChanged(AlarmState::Idle))
    );

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.frames_captured, 400);
    assert_eq!(snapshot.sessions_started, 1);
    assert!(snapshot.frames_observed > 0);
    assert_eq!(handle.state(), AlarmState::Idle);
}
