pub mod capture;
pub mod display;
pub mod error;
pub mod pipeline;
pub mod transform;
#[cfg(feature = "v4l2")]
pub mod utils;

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

pub use capture::{CaptureAdapter, Frame, FrameMetadata, PixelFormat, RawFrameInfo};
pub use display::{DisplayAdapter, FrameSink};
pub use error::{PipelineError, Result};
pub use pipeline::{BufferPool, Pipeline, PipelineState, StatsSnapshot, SubmitOutcome};
pub use transform::{EdgeDetector, FrameProcessor};

/// Environment variables override file values, e.g. `EDGECAM_TRANSFORM__THRESHOLD=80`
pub const ENV_PREFIX: &str = "EDGECAM";

/// System configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub display: DisplayConfig,
    pub pipeline: PipelineConfig,
    pub transform: TransformConfig,
    pub pool: PoolConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// V4L2 device path; auto-detected when unset
    pub device: Option<String>,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Format produced by the synthetic source
    pub format: PixelFormat,
    pub buffer_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub width: u32,
    pub height: u32,
    pub title: String,
    pub vsync: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Pin the transform worker to this CPU core
    pub pin_worker_core: Option<usize>,
    /// Number of recent transform timings kept for avg/p99
    pub latency_window: usize,
    pub stats_interval_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeStyle {
    /// 255 where the gradient passes the threshold
    Binary,
    /// Gradient magnitude clamped to 0..=255, zero below threshold
    Scaled,
    /// Canny-style double threshold with 8-connected tracing
    Hysteresis,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    EdgeOnly,
    Overlay,
    Passthrough,
}

/// Transform stage parameters. Swappable at runtime through
/// [`EdgeDetector::set_config`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    /// Binomial kernel radius, 0 disables smoothing
    pub smoothing_radius: u8,
    /// Minimum Sobel magnitude for an edge (low threshold for hysteresis)
    pub threshold: u16,
    pub edge_style: EdgeStyle,
    /// High threshold = threshold * ratio
    pub hysteresis_ratio: f32,
    pub output_mode: OutputMode,
    pub edge_color: [u8; 3],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub max_buffers: usize,
    pub prealloc_buffers: usize,
    pub acquire_timeout_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: None,
            width: 640,
            height: 480,
            fps: 30,
            format: PixelFormat::Nv21,
            buffer_count: 4,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            title: "edgecam".into(),
            vsync: true,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pin_worker_core: None,
            latency_window: 120,
            stats_interval_ms: 1000,
        }
    }
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            smoothing_radius: 1,
            threshold: 50,
            edge_style: EdgeStyle::Binary,
            hysteresis_ratio: 3.0,
            output_mode: OutputMode::EdgeOnly,
            edge_color: [255, 0, 255],
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_buffers: 8,
            prealloc_buffers: 4,
            acquire_timeout_ms: 10,
        }
    }
}

impl Config {
    /// Layer defaults, an optional TOML file and `EDGECAM_*` environment
    /// variables, then validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            info!("Loading configuration from {}", path.display());
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(true),
            );
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.transform.validate()?;
        self.pool.validate()?;

        let CaptureConfig {
            width, height, fps, ..
        } = self.capture;
        if width == 0 || height == 0 || fps == 0 {
            return Err(PipelineError::Config(format!(
                "capture needs a non-zero size and rate, got {width}x{height}@{fps}"
            )));
        }
        if self.pipeline.latency_window == 0 {
            return Err(PipelineError::Config("latency_window must be positive".into()));
        }
        Ok(())
    }

    /// Bytes per pool slot large enough for any frame this config produces.
    pub fn slot_bytes(&self) -> usize {
        let pixels = self.capture.width as usize * self.capture.height as usize;
        // RGBA output is the largest buffer in flight
        pixels * 4
    }
}

impl TransformConfig {
    pub fn validate(&self) -> Result<()> {
        if self.smoothing_radius as usize > transform::filter::MAX_RADIUS {
            return Err(PipelineError::Config(format!(
                "smoothing_radius {} exceeds {}",
                self.smoothing_radius,
                transform::filter::MAX_RADIUS
            )));
        }
        if self.threshold == 0 {
            return Err(PipelineError::Config("threshold must be positive".into()));
        }
        if !self.hysteresis_ratio.is_finite() || self.hysteresis_ratio < 1.0 {
            return Err(PipelineError::Config(format!(
                "hysteresis_ratio must be >= 1, got {}",
                self.hysteresis_ratio
            )));
        }
        Ok(())
    }

    pub fn edge_threshold(&self) -> transform::edge::EdgeThreshold {
        let high = (self.threshold as f32 * self.hysteresis_ratio).round();
        transform::edge::EdgeThreshold {
            style: self.edge_style,
            low: self.threshold,
            high: high.min(u16::MAX as f32) as u16,
        }
    }
}

impl PoolConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_buffers < 3 {
            return Err(PipelineError::Config(format!(
                "max_buffers must be at least 3, got {}",
                self.max_buffers
            )));
        }
        if self.prealloc_buffers > self.max_buffers {
            return Err(PipelineError::Config(format!(
                "prealloc_buffers {} exceeds max_buffers {}",
                self.prealloc_buffers, self.max_buffers
            )));
        }
        Ok(())
    }
}
