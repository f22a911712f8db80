//! edgecam: live edge detection from a camera or synthetic source

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, ValueEnum};
use color_eyre::Result;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use edgecam::capture::TestPattern;
use edgecam::display::LogSink;
use edgecam::{
    CaptureAdapter, CaptureConfig, Config, DisplayAdapter, EdgeDetector, Pipeline, PipelineError,
    RawFrameInfo, StatsSnapshot,
};

#[derive(Debug, Parser)]
#[command(version, about = "Real-time edge detection on live video")]
struct Args {
    /// TOML configuration file, layered under EDGECAM_* environment variables
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Frame source
    #[arg(long, value_enum, default_value_t = Source::Pattern)]
    source: Source,

    /// Stop after this many captured frames
    #[arg(long)]
    frames: Option<u64>,

    /// Log frames instead of opening a window
    #[arg(long)]
    headless: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Source {
    /// Built-in moving test pattern
    Pattern,
    /// V4L2 camera (needs the `v4l2` feature)
    V4l2,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("edgecam=info")),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    let args = Args::parse();
    info!("edgecam launching...");

    let config = Config::load(args.config.as_deref())?;
    debug!("Configuration: {:?}", config);

    let detector = EdgeDetector::new(config.transform.clone())?;
    let pipeline = Arc::new(Pipeline::new(&config, detector)?);
    pipeline.start()?;

    let capture = Arc::new(CaptureAdapter::new(Arc::clone(&pipeline)));
    let shutdown = Arc::new(AtomicBool::new(false));

    {
        let shutdown = Arc::clone(&shutdown);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Ctrl-C received");
                shutdown.store(true, Ordering::Relaxed);
            }
        });
    }

    let capture_handle = match args.source {
        Source::Pattern => spawn_pattern(
            &config.capture,
            Arc::clone(&capture),
            Arc::clone(&shutdown),
            args.frames,
        )?,
        Source::V4l2 => spawn_v4l2(
            &config.capture,
            Arc::clone(&capture),
            Arc::clone(&shutdown),
            args.frames,
        )?,
    };

    let stats_interval = Duration::from_millis(config.pipeline.stats_interval_ms);
    if args.headless || !cfg!(feature = "sdl") {
        run_headless(Arc::clone(&pipeline), Arc::clone(&shutdown), stats_interval).await;
    } else {
        run_window(&config, Arc::clone(&pipeline), &shutdown)?;
    }

    shutdown.store(true, Ordering::Relaxed);
    if let Err(e) = capture_handle.await {
        error!("Capture task failed: {}", e);
    }
    pipeline.stop();

    info!(
        "Captured {} frames ({} rejected before the pipeline, camera {:.1} fps)",
        capture.last_sequence(),
        capture.dropped(),
        capture.fps()
    );
    log_stats(&pipeline.stats(), None);
    info!("edgecam shutting down");
    Ok(())
}

/// Feed the synthetic pattern at the configured rate
fn spawn_pattern(
    config: &CaptureConfig,
    capture: Arc<CaptureAdapter>,
    shutdown: Arc<AtomicBool>,
    limit: Option<u64>,
) -> Result<JoinHandle<()>> {
    let mut pattern = TestPattern::new(config.width, config.height, config.format)?;
    let period = Duration::from_secs_f64(1.0 / config.fps as f64);
    info!(
        "Test pattern {}x{} {} at {} fps",
        config.width, config.height, config.format, config.fps
    );

    Ok(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let (width, height, format) = (pattern.width(), pattern.height(), pattern.format());

        while !shutdown.load(Ordering::Relaxed) {
            ticker.tick().await;
            let raw = pattern.next_frame();
            match capture.deliver_frame(raw, width, height, format, RawFrameInfo::default()) {
                Ok(_) => {}
                Err(PipelineError::Stopped) => break,
                Err(e) if e.is_recoverable() => debug!("Frame dropped: {}", e),
                Err(e) => {
                    error!("Capture error: {}", e);
                    break;
                }
            }
            if limit.is_some_and(|n| capture.last_sequence() >= n) {
                info!("Frame limit reached");
                break;
            }
        }
        shutdown.store(true, Ordering::Relaxed);
    }))
}

#[cfg(feature = "v4l2")]
fn spawn_v4l2(
    config: &CaptureConfig,
    capture: Arc<CaptureAdapter>,
    shutdown: Arc<AtomicBool>,
    limit: Option<u64>,
) -> Result<JoinHandle<()>> {
    use edgecam::capture::V4l2Capture;
    use edgecam::utils;

    let found = match &config.device {
        Some(path) => utils::probe_device(path)?,
        None => utils::auto_detect_device()?,
    };
    info!("Using capture device: {:?}", found);

    let mut camera = V4l2Capture::new(config, &found)?;
    camera.start_stream()?;

    // The V4L2 dequeue blocks, so it gets a blocking thread of its own
    Ok(tokio::task::spawn_blocking(move || {
        while !shutdown.load(Ordering::Relaxed) {
            if let Err(e) = camera.deliver_next(&*capture) {
                match e.downcast_ref::<PipelineError>() {
                    Some(PipelineError::Stopped) => break,
                    Some(pe) if pe.is_recoverable() => debug!("Frame dropped: {}", pe),
                    _ => {
                        error!("Capture error: {}", e);
                        std::thread::sleep(Duration::from_millis(10));
                    }
                }
            }
            if limit.is_some_and(|n| capture.last_sequence() >= n) {
                info!("Frame limit reached");
                break;
            }
        }
        shutdown.store(true, Ordering::Relaxed);
    }))
}

#[cfg(not(feature = "v4l2"))]
fn spawn_v4l2(
    _config: &CaptureConfig,
    _capture: Arc<CaptureAdapter>,
    _shutdown: Arc<AtomicBool>,
    _limit: Option<u64>,
) -> Result<JoinHandle<()>> {
    Err(color_eyre::eyre::eyre!(
        "edgecam was built without the `v4l2` feature"
    ))
}

/// Poll the pipeline at display rate without a window
async fn run_headless(pipeline: Arc<Pipeline>, shutdown: Arc<AtomicBool>, stats_interval: Duration) {
    let mut display = DisplayAdapter::new(Arc::clone(&pipeline), LogSink::new(stats_interval));
    let mut ticker = tokio::time::interval(Duration::from_millis(16));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_stats = Instant::now();

    while !shutdown.load(Ordering::Relaxed) {
        ticker.tick().await;
        if let Err(e) = display.present_latest() {
            warn!("Display error: {}", e);
        }
        if last_stats.elapsed() >= stats_interval {
            log_stats(&pipeline.stats(), Some(display.fps()));
            last_stats = Instant::now();
        }
    }
}

#[cfg(feature = "sdl")]
fn run_window(config: &Config, pipeline: Arc<Pipeline>, shutdown: &AtomicBool) -> Result<()> {
    use color_eyre::eyre::eyre;
    use edgecam::display::{run_window, Sdl2Display};

    let sdl_context = sdl2::init().map_err(|e| eyre!(e))?;
    let sink = Sdl2Display::new(&sdl_context, &config.display)?;
    let mut display = DisplayAdapter::new(pipeline, sink);
    run_window(&sdl_context, &mut display, shutdown)?;

    info!(
        "Window closed after {} frames ({:.1} fps)",
        display.presented(),
        display.fps()
    );
    Ok(())
}

#[cfg(not(feature = "sdl"))]
fn run_window(_config: &Config, _pipeline: Arc<Pipeline>, _shutdown: &AtomicBool) -> Result<()> {
    Ok(())
}

fn log_stats(stats: &StatsSnapshot, display_fps: Option<f64>) {
    info!(
        "Pipeline: {} submitted, {} published, {} superseded, {} invalid, {} exhausted, {} failed | \
         process {:.1} fps, transform avg {:.0}us p99 {:.0}us{}",
        stats.frames_submitted,
        stats.frames_published,
        stats.frames_superseded,
        stats.dropped_invalid,
        stats.dropped_pool_exhausted,
        stats.transform_failures,
        stats.process_fps,
        stats.avg_transform_us,
        stats.p99_transform_us,
        display_fps
            .map(|fps| format!(", display {:.1} fps", fps))
            .unwrap_or_default()
    );
}
