//! Boundary between the camera subsystem and the pipeline

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, instrument, warn};

use crate::capture::frame::{Frame, FrameMetadata, PixelFormat};
use crate::error::{PipelineError, Result};
use crate::pipeline::stats::FpsMeter;
use crate::pipeline::{Pipeline, SubmitOutcome};
use crate::transform::{EdgeDetector, FrameProcessor};

/// Optional per-frame details a camera may report
#[derive(Debug, Clone, Copy, Default)]
pub struct RawFrameInfo {
    /// Row pitch in bytes; tightly packed when `None`
    pub stride: Option<u32>,
    pub device_timestamp: Option<Duration>,
}

/// Wraps sensor data into pooled frames and submits them. Called on the
/// capture subsystem's own thread; only the pool acquire can wait, and only
/// up to its timeout.
pub struct CaptureAdapter<P: FrameProcessor = EdgeDetector> {
    pipeline: Arc<Pipeline<P>>,
    sequence: AtomicU64,
    dropped: AtomicU64,
    fps: Mutex<FpsMeter>,
}

impl<P: FrameProcessor> CaptureAdapter<P> {
    pub fn new(pipeline: Arc<Pipeline<P>>) -> Self {
        Self {
            pipeline,
            sequence: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            fps: Mutex::new(FpsMeter::default()),
        }
    }

    /// Copy one camera frame into the pipeline. Returns the sequence number
    /// assigned to it.
    #[instrument(level = "trace", skip(self, raw, info))]
    pub fn deliver_frame(
        &self,
        raw: &[u8],
        width: u32,
        height: u32,
        format: PixelFormat,
        info: RawFrameInfo,
    ) -> Result<u64> {
        let timestamp = Instant::now();
        self.fps.lock().tick(timestamp);
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;

        let meta = FrameMetadata {
            sequence,
            width,
            height,
            // An overflowing packed stride is reported by `validate` below
            stride: info.stride.or(format.min_stride(width)).unwrap_or(0),
            format,
            device_timestamp: info.device_timestamp,
        };
        let len = match meta.validate(raw.len()).and_then(|()| meta.required_len()) {
            Ok(len) => len,
            Err(err) => {
                warn!("Rejecting capture frame {}: {}", sequence, err);
                return Err(self.drop_frame(err));
            }
        };
        let mut buffer = match self.pipeline.pool().acquire(len) {
            Ok(buffer) => buffer,
            Err(PipelineError::Stopped) => return Err(PipelineError::Stopped),
            Err(err) => {
                debug!("No buffer for capture frame {}: {}", sequence, err);
                return Err(self.drop_frame(err));
            }
        };
        buffer.copy_from_slice(&raw[..len]);

        let frame = Frame::from_pooled(buffer, meta, timestamp);
        if let SubmitOutcome::Superseded { dropped } = self.pipeline.submit(frame)? {
            debug!("Frame {} replaced pending frame {}", sequence, dropped);
        }
        Ok(sequence)
    }

    /// Same as [`deliver_frame`](Self::deliver_frame) for cameras that report
    /// a FourCC instead of a format.
    pub fn deliver_fourcc(
        &self,
        raw: &[u8],
        width: u32,
        height: u32,
        fourcc: [u8; 4],
        info: RawFrameInfo,
    ) -> Result<u64> {
        let format = PixelFormat::from_fourcc(fourcc).map_err(|err| self.drop_frame(err))?;
        self.deliver_frame(raw, width, height, format, info)
    }

    fn drop_frame(&self, err: PipelineError) -> PipelineError {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        let reason = match err {
            PipelineError::PoolExhausted { .. } => "pool_exhausted",
            _ => "invalid",
        };
        metrics::counter!("capture_frames_dropped", "reason" => reason).increment(1);
        err
    }

    /// Smoothed camera delivery rate
    pub fn fps(&self) -> f64 {
        self.fps.lock().fps()
    }

    /// Frames rejected before reaching the pipeline
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn last_sequence(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }

    pub fn pipeline(&self) -> &Arc<Pipeline<P>> {
        &self.pipeline
    }
}
