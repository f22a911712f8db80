//! Boundary between the pipeline and whatever draws frames

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, trace};

use crate::capture::Frame;
use crate::error::Result;
use crate::pipeline::stats::FpsMeter;
use crate::pipeline::Pipeline;
use crate::transform::color::write_rgba;
use crate::transform::{EdgeDetector, FrameProcessor};

/// Something that can put a processed frame on screen
pub trait FrameSink {
    fn present(&mut self, frame: &Frame) -> Result<()>;
}

/// Polls the pipeline whenever the display is ready to draw and hands new
/// frames to the sink. Frames already shown are not presented again.
pub struct DisplayAdapter<S: FrameSink, P: FrameProcessor = EdgeDetector> {
    pipeline: Arc<Pipeline<P>>,
    sink: S,
    last_sequence: Option<u64>,
    presented: u64,
    fps: FpsMeter,
    last_latency: Duration,
}

impl<S: FrameSink, P: FrameProcessor> DisplayAdapter<S, P> {
    pub fn new(pipeline: Arc<Pipeline<P>>, sink: S) -> Self {
        Self {
            pipeline,
            sink,
            last_sequence: None,
            presented: 0,
            fps: FpsMeter::default(),
            last_latency: Duration::ZERO,
        }
    }

    /// Present the latest processed frame if it is newer than the last one
    /// shown. Returns its sequence number, or `None` when there was nothing new.
    pub fn present_latest(&mut self) -> Result<Option<u64>> {
        let Some(frame) = self.pipeline.fetch_latest() else {
            return Ok(None);
        };
        let sequence = frame.sequence();
        if self.last_sequence.is_some_and(|last| sequence <= last) {
            return Ok(None);
        }

        self.sink.present(&frame)?;

        let now = Instant::now();
        self.last_latency = now.saturating_duration_since(frame.timestamp);
        self.last_sequence = Some(sequence);
        self.presented += 1;
        self.fps.tick(now);
        metrics::histogram!("present_latency_ms").record(self.last_latency.as_secs_f64() * 1000.0);
        trace!("Presented frame {}", sequence);
        Ok(Some(sequence))
    }

    pub fn presented(&self) -> u64 {
        self.presented
    }

    pub fn last_sequence(&self) -> Option<u64> {
        self.last_sequence
    }

    pub fn fps(&self) -> f64 {
        self.fps.fps()
    }

    /// Capture-to-present delay of the last presented frame
    pub fn last_latency(&self) -> Duration {
        self.last_latency
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }
}

/// Expand any output frame into tightly packed RGBA for blitting.
pub fn expand_to_rgba(frame: &Frame, rgba: &mut Vec<u8>) -> Result<()> {
    frame.validate()?;
    rgba.resize(frame.width() as usize * frame.height() as usize * 4, 0);
    write_rgba(frame, rgba);
    Ok(())
}

/// Headless sink: keeps the latest frame's RGBA and logs a summary now and then
pub struct LogSink {
    interval: Duration,
    last_log: Instant,
    frames_since_log: u64,
    rgba: Vec<u8>,
}

impl LogSink {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_log: Instant::now(),
            frames_since_log: 0,
            rgba: Vec::new(),
        }
    }

    /// RGBA pixels of the most recently presented frame
    pub fn last_rgba(&self) -> &[u8] {
        &self.rgba
    }
}

impl FrameSink for LogSink {
    fn present(&mut self, frame: &Frame) -> Result<()> {
        expand_to_rgba(frame, &mut self.rgba)?;
        self.frames_since_log += 1;

        let elapsed = self.last_log.elapsed();
        if elapsed >= self.interval {
            let edge_pixels = self.rgba.chunks_exact(4).filter(|px| px[..3] != [0, 0, 0]).count();
            info!(
                "Presented {} frames in {:.1}s, latest #{} {}x{} {} ({} lit pixels)",
                self.frames_since_log,
                elapsed.as_secs_f64(),
                frame.sequence(),
                frame.width(),
                frame.height(),
                frame.meta.format,
                edge_pixels
            );
            self.frames_since_log = 0;
            self.last_log = Instant::now();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{FrameMetadata, PixelFormat};
    use bytes::Bytes;

    #[test]
    fn gray_frames_expand_to_opaque_rgba() {
        let meta = FrameMetadata {
            sequence: 3,
            width: 2,
            height: 1,
            stride: 2,
            format: PixelFormat::Gray8,
            device_timestamp: None,
        };
        let frame = Frame::new(Bytes::from_static(&[0, 255]), meta, Instant::now());
        let mut rgba = Vec::new();
        expand_to_rgba(&frame, &mut rgba).unwrap();
        assert_eq!(rgba, vec![0, 0, 0, 255, 255, 255, 255, 255]);
    }

    #[test]
    fn invalid_frames_are_not_expanded() {
        let meta = FrameMetadata {
            sequence: 3,
            width: 4,
            height: 4,
            stride: 4,
            format: PixelFormat::Gray8,
            device_timestamp: None,
        };
        let frame = Frame::new(Bytes::from_static(&[0; 3]), meta, Instant::now());
        assert!(expand_to_rgba(&frame, &mut Vec::new()).is_err());
    }
}
