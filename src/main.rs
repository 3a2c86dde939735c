//! Motion Alarm CLI
//!
//! Camera-based intrusion alarm with self-calibrating motion detection.

use anyhow::{anyhow, bail, Context};
use clap::{Args, Parser, Subcommand, ValueEnum};
use motion_alarm::{
    capture::{Collector, FrameSource, RawVideoSource, SyntheticSource},
    config::Config,
    notify::{ConsoleNotifier, NotifierConfig},
    service::{AlarmService, DEFAULT_QUEUE_CAPACITY},
    telemetry::create_shared_stats,
    VERSION,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "motion-alarm")]
#[command(version = VERSION)]
#[command(about = "Camera-based motion alarm with self-calibrating detection", long_about = None)]
struct Cli {
    /// Log filter used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Arm the alarm and watch the video source
    Start(StartArgs),

    /// Show the effective configuration
    Config,

    /// Write the default configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SourceKind {
    /// Generated scene, useful for trying the detector out
    Synthetic,
    /// Headerless 8-bit grayscale video from a file or stdin
    Raw,
}

#[derive(Args)]
struct StartArgs {
    /// Seconds between start and the beginning of calibration
    #[arg(long)]
    arm_delay: Option<f64>,

    /// Seconds spent learning the scene before alarms are live
    #[arg(long)]
    calibration: Option<f64>,

    /// Volatility multiplier; higher is less sensitive
    #[arg(long)]
    threshold_factor: Option<f64>,

    /// Effective window of the moving averages, in processed frames
    #[arg(long)]
    window: Option<u32>,

    /// Process only every Kth captured frame
    #[arg(long)]
    subsample: Option<u32>,

    /// Upper bound on processed frames per second
    #[arg(long, conflicts_with = "no_rate_limit")]
    max_fps: Option<f64>,

    /// Process frames as fast as they arrive
    #[arg(long)]
    no_rate_limit: bool,

    /// Do not ring the bell on alarm
    #[arg(long)]
    no_sound: bool,

    /// Print the detector readings of every processed frame
    #[arg(long)]
    show_observations: bool,

    /// Where frames come from
    #[arg(long, value_enum, default_value = "synthetic")]
    source: SourceKind,

    /// Raw video file, or - for stdin (raw source only)
    #[arg(long, default_value = "-")]
    input: PathBuf,

    /// Frame width in pixels
    #[arg(long, default_value = "320")]
    width: u32,

    /// Frame height in pixels
    #[arg(long, default_value = "240")]
    height: u32,

    /// Frame rate of the synthetic camera
    #[arg(long, default_value = "15")]
    fps: f64,

    /// Seconds after launch at which the synthetic scene starts moving
    #[arg(long)]
    motion_at: Option<f64>,

    /// Stop after this many synthetic frames
    #[arg(long)]
    frames: Option<u64>,
}

impl StartArgs {
    /// Layer command-line overrides on top of the stored configuration.
    fn apply(&self, config: &mut Config) -> anyhow::Result<()> {
        if let Some(secs) = self.arm_delay {
            config.arm_delay = seconds("arm-delay", secs)?;
        }
        if let Some(secs) = self.calibration {
            config.calibration_duration = seconds("calibration", secs)?;
        }
        if let Some(factor) = self.threshold_factor {
            config.detector.threshold_factor = factor;
        }
        if let Some(window) = self.window {
            config.detector.averaging_window = window;
        }
        if let Some(subsample) = self.subsample {
            config.capture.subsample = subsample;
        }
        if self.no_rate_limit {
            config.capture.max_process_fps = None;
        } else if let Some(fps) = self.max_fps {
            config.capture.max_process_fps = Some(fps);
        }
        if self.no_sound {
            config.sound_enabled = false;
        }
        Ok(())
    }

    fn build_source(&self) -> anyhow::Result<Box<dyn FrameSource>> {
        match self.source {
            SourceKind::Synthetic => {
                if !(self.fps > 0.0 && self.fps.is_finite()) {
                    bail!("--fps must be a positive number, got {}", self.fps);
                }
                let mut source = SyntheticSource::new(self.width, self.height).with_fps(self.fps);
                if let Some(secs) = self.motion_at {
                    source = source.with_motion_from((secs.max(0.0) * self.fps) as u64);
                }
                if let Some(count) = self.frames {
                    source = source.with_frame_limit(count);
                }
                Ok(Box::new(source))
            }
            SourceKind::Raw => {
                let source = RawVideoSource::open(&self.input, self.width, self.height)
                    .with_context(|| format!("could not open {}", self.input.display()))?;
                Ok(Box::new(source))
            }
        }
    }
}

fn seconds(flag: &str, secs: f64) -> anyhow::Result<Duration> {
    Duration::try_from_secs_f64(secs).map_err(|_| {
        anyhow!("--{flag} must be a finite, non-negative number of seconds, got {secs}")
    })
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    match cli.command {
        Commands::Start(args) => cmd_start(&args),
        Commands::Config => cmd_config(),
        Commands::InitConfig { force } => cmd_init_config(force),
    }
}

fn cmd_start(args: &StartArgs) -> anyhow::Result<()> {
    println!("Motion Alarm v{VERSION}");
    println!();

    let mut config = Config::load().unwrap_or_else(|e| {
        warn!(error = %e, "Could not load configuration, using defaults");
        Config::default()
    });
    args.apply(&mut config)?;
    config.validate().context("invalid configuration")?;
    let source = args.build_source()?;

    println!("  Arm delay: {:.1}s", config.arm_delay.as_secs_f64());
    println!(
        "  Calibration: {:.1}s",
        config.calibration_duration.as_secs_f64()
    );
    println!(
        "  Detector: window {} frames, threshold factor {}",
        config.detector.averaging_window, config.detector.threshold_factor
    );
    match config.capture.max_process_fps {
        Some(fps) => println!(
            "  Capture: every {} frame(s), at most {fps} fps",
            config.capture.subsample
        ),
        None => println!("  Capture: every {} frame(s)", config.capture.subsample),
    }
    println!(
        "  Sound: {}",
        if config.sound_enabled {
            "enabled"
        } else {
            "disabled"
        }
    );
    println!();

    let stats = create_shared_stats();
    let notifier = ConsoleNotifier::stdout(NotifierConfig {
        show_observations: args.show_observations,
        ..config.notifier_config()
    });

    let (service, handle) = AlarmService::new(
        config.controller_config(),
        notifier,
        stats.clone(),
        DEFAULT_QUEUE_CAPACITY,
    )?;
    let service = service.spawn()?;

    // Set up Ctrl+C handler
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || r.store(false, Ordering::SeqCst))
        .context("could not install Ctrl+C handler")?;

    let mut collector = Collector::new(config.capture, handle.clone(), stats.clone());
    collector.start(source)?;

    handle.start()?;
    println!(
        "Arming in {:.0}s, leave the monitored area. Press Ctrl+C to stop.",
        config.arm_delay.as_secs_f64()
    );
    println!();

    while running.load(Ordering::SeqCst) && collector.is_running() && !service.is_finished() {
        thread::sleep(Duration::from_millis(100));
    }

    println!();
    println!("Stopping...");
    // Leaving is a host suspension; shutdown pauses anything still armed.
    let _ = handle.shutdown();

    // A blocked read on stdin would never return, so only reap a capture
    // thread that has already finished.
    if !collector.is_running() {
        if let Err(e) = collector.wait() {
            eprintln!("Capture error: {e}");
        }
    }
    drop(collector);

    service.join()?;

    println!();
    println!("{}", stats.summary());
    Ok(())
}

fn cmd_config() -> anyhow::Result<()> {
    let path = Config::config_path();
    let config = Config::load().with_context(|| format!("could not load {}", path.display()))?;

    println!("Motion Alarm Configuration");
    println!("==========================");
    println!();
    println!(
        "File: {} ({})",
        path.display(),
        if path.exists() { "found" } else { "defaults" }
    );
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn cmd_init_config(force: bool) -> anyhow::Result<()> {
    let path = Config::config_path();
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    Config::default().save()?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}
