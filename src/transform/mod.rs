//! Edge-detection transform stage
//!
//! luminance -> binomial smoothing -> Sobel magnitude -> threshold -> compose.
//! Inputs are never mutated; every output frame comes from the buffer pool.

pub mod color;
pub mod compose;
pub mod edge;
pub mod filter;

use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::{info, instrument};

use crate::capture::Frame;
use crate::error::Result;
use crate::pipeline::pool::BufferPool;
use crate::{OutputMode, TransformConfig};

/// One input frame in, one new output frame out.
pub trait FrameProcessor: Send + Sync + 'static {
    fn process(&self, input: &Frame, pool: &BufferPool) -> Result<Frame>;
}

/// Production transform. Parameters can be swapped while frames are flowing.
pub struct EdgeDetector {
    config: ArcSwap<TransformConfig>,
    scratch: Mutex<Scratch>,
}

/// Intermediate planes reused across frames
#[derive(Default)]
struct Scratch {
    luma: Vec<u8>,
    tmp: Vec<u8>,
    magnitude: Vec<u16>,
    edges: Vec<u8>,
    stack: Vec<usize>,
}

impl Scratch {
    fn resize(&mut self, pixels: usize) {
        self.luma.resize(pixels, 0);
        self.tmp.resize(pixels, 0);
        self.magnitude.resize(pixels, 0);
        self.edges.resize(pixels, 0);
    }
}

impl EdgeDetector {
    pub fn new(config: TransformConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: ArcSwap::from_pointee(config),
            scratch: Mutex::new(Scratch::default()),
        })
    }

    pub fn config(&self) -> Arc<TransformConfig> {
        self.config.load_full()
    }

    /// Replace the parameters; the next frame picks them up.
    #[instrument(skip(self))]
    pub fn set_config(&self, config: TransformConfig) -> Result<()> {
        config.validate()?;
        info!("Transform parameters updated");
        self.config.store(Arc::new(config));
        Ok(())
    }

    /// Edge map for `input` as a tightly packed `width * height` plane.
    pub fn edge_map(&self, input: &Frame) -> Result<Vec<u8>> {
        input.validate()?;
        let config = self.config.load();
        let mut scratch = self.scratch.lock();
        detect_edges(&mut scratch, input, &config);
        Ok(scratch.edges.clone())
    }
}

impl FrameProcessor for EdgeDetector {
    fn process(&self, input: &Frame, pool: &BufferPool) -> Result<Frame> {
        input.validate()?;
        let config = self.config.load();

        if config.output_mode == OutputMode::Passthrough {
            return compose::compose(input, &[], config.output_mode, config.edge_color, pool);
        }

        let mut scratch = self.scratch.lock();
        detect_edges(&mut scratch, input, &config);
        compose::compose(
            input,
            &scratch.edges,
            config.output_mode,
            config.edge_color,
            pool,
        )
    }
}

fn detect_edges(scratch: &mut Scratch, input: &Frame, config: &TransformConfig) {
    let width = input.meta.width as usize;
    let height = input.meta.height as usize;
    scratch.resize(width * height);

    let Scratch {
        luma,
        tmp,
        magnitude,
        edges,
        stack,
    } = scratch;

    color::extract_luma(input, luma);
    filter::smooth_in_place(luma, tmp, width, height, config.smoothing_radius as usize);
    edge::sobel_magnitude(luma, magnitude, width, height);
    edge::threshold(magnitude, edges, width, config.edge_threshold(), stack);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{FrameMetadata, PixelFormat};
    use crate::error::PipelineError;
    use crate::{EdgeStyle, PoolConfig};
    use std::time::Instant;

    fn pool() -> BufferPool {
        let config = PoolConfig {
            max_buffers: 8,
            prealloc_buffers: 0,
            acquire_timeout_ms: 50,
        };
        BufferPool::new(&config, 0).unwrap()
    }

    fn frame_from(pool: &BufferPool, pixels: &[u8], width: u32, height: u32, format: PixelFormat) -> Frame {
        let mut buffer = pool.acquire(pixels.len()).unwrap();
        buffer.copy_from_slice(pixels);
        let meta = FrameMetadata {
            sequence: 1,
            width,
            height,
            stride: format.min_stride(width).unwrap(),
            format,
            device_timestamp: None,
        };
        Frame::from_pooled(buffer, meta, Instant::now())
    }

    fn detector(smoothing_radius: u8, output_mode: OutputMode) -> EdgeDetector {
        EdgeDetector::new(TransformConfig {
            smoothing_radius,
            output_mode,
            edge_style: EdgeStyle::Binary,
            ..TransformConfig::default()
        })
        .unwrap()
    }

    /// 4 wide, left half black, right half white
    fn split_4x4() -> Vec<u8> {
        [0u8, 0, 255, 255].repeat(4)
    }

    #[test]
    fn uniform_frame_has_no_edges() {
        let pool = pool();
        let input = frame_from(&pool, &[180u8; 16], 4, 4, PixelFormat::Gray8);
        let out = detector(1, OutputMode::EdgeOnly).process(&input, &pool).unwrap();
        assert!(out.data.iter().all(|&p| p == 0));
    }

    #[test]
    fn split_frame_edges_sit_on_split_columns() {
        let pool = pool();
        let input = frame_from(&pool, &split_4x4(), 4, 4, PixelFormat::Gray8);
        let out = detector(0, OutputMode::EdgeOnly).process(&input, &pool).unwrap();

        for y in 0..4 {
            assert_eq!(out.row(y), &[0, 255, 255, 0], "row {y}");
        }
    }

    #[test]
    fn smoothed_split_edges_stay_near_split() {
        let pool = pool();
        let pixels: Vec<u8> = [0u8, 0, 0, 0, 255, 255, 255, 255].repeat(4);
        let input = frame_from(&pool, &pixels, 8, 4, PixelFormat::Gray8);
        let edges = detector(1, OutputMode::EdgeOnly).edge_map(&input).unwrap();

        for row in edges.chunks_exact(8) {
            // Split between columns 3 and 4; smoothing radius 1 widens by one
            assert_eq!(row, &[0, 0, 255, 255, 255, 255, 0, 0]);
        }
    }

    #[test]
    fn output_dimensions_match_input_for_every_format() {
        let pool = pool();
        let formats = [
            PixelFormat::Gray8,
            PixelFormat::Rgb24,
            PixelFormat::Bgr24,
            PixelFormat::Rgba32,
            PixelFormat::Yuyv,
            PixelFormat::Nv12,
            PixelFormat::Nv21,
        ];
        for format in formats {
            for (w, h) in [(2u32, 2u32), (4, 6), (10, 2), (16, 8)] {
                let stride = format.min_stride(w).unwrap();
                let pixels = vec![0x5Au8; format.required_len(stride, h).unwrap()];
                let input = frame_from(&pool, &pixels, w, h, format);
                for mode in [OutputMode::EdgeOnly, OutputMode::Overlay, OutputMode::Passthrough] {
                    let out = detector(1, mode).process(&input, &pool).unwrap();
                    assert_eq!((out.width(), out.height()), (w, h), "{format} {mode:?}");
                    assert_eq!(out.sequence(), input.sequence());
                    out.validate().unwrap();
                }
            }
        }
    }

    #[test]
    fn extreme_frames_stay_in_range() {
        let pool = pool();
        for value in [0u8, 255] {
            let input = frame_from(&pool, &[value; 5 * 3 * 3], 5, 3, PixelFormat::Rgb24);
            let out = EdgeDetector::new(TransformConfig {
                edge_style: EdgeStyle::Scaled,
                output_mode: OutputMode::EdgeOnly,
                ..TransformConfig::default()
            })
            .unwrap()
            .process(&input, &pool)
            .unwrap();
            // Flat input: no gradient anywhere, so no wraparound either
            assert!(out.data.iter().all(|&p| p == 0));
        }
    }

    #[test]
    fn input_is_not_mutated() {
        let pool = pool();
        let pixels = split_4x4();
        let input = frame_from(&pool, &pixels, 4, 4, PixelFormat::Gray8);
        let _ = detector(1, OutputMode::Overlay).process(&input, &pool).unwrap();
        assert_eq!(&input.data[..], &pixels[..]);
    }

    #[test]
    fn overlay_paints_edges_over_original() {
        let pool = pool();
        let input = frame_from(&pool, &split_4x4(), 4, 4, PixelFormat::Gray8);
        let out = detector(0, OutputMode::Overlay).process(&input, &pool).unwrap();

        assert_eq!(out.meta.format, PixelFormat::Rgba32);
        let row = out.row(0);
        assert_eq!(&row[0..4], &[0, 0, 0, 255]);
        assert_eq!(&row[4..8], &[255, 0, 255, 255]);
        assert_eq!(&row[12..16], &[255, 255, 255, 255]);
    }

    #[test]
    fn zero_sized_frame_is_rejected() {
        let pool = pool();
        let meta = FrameMetadata {
            sequence: 1,
            width: 0,
            height: 4,
            stride: 0,
            format: PixelFormat::Gray8,
            device_timestamp: None,
        };
        let input = Frame::new(bytes::Bytes::new(), meta, Instant::now());
        let err = detector(1, OutputMode::EdgeOnly).process(&input, &pool).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidFrame(_)));
        assert_eq!(pool.allocated(), 0);
    }

    #[test]
    fn set_config_applies_to_next_frame() {
        let pool = pool();
        let input = frame_from(&pool, &split_4x4(), 4, 4, PixelFormat::Gray8);
        let detector = detector(0, OutputMode::EdgeOnly);

        detector
            .set_config(TransformConfig {
                threshold: 1100,
                smoothing_radius: 0,
                ..TransformConfig::default()
            })
            .unwrap();
        let out = detector.process(&input, &pool).unwrap();
        assert!(out.data.iter().all(|&p| p == 0));

        let bad = TransformConfig {
            smoothing_radius: 9,
            ..TransformConfig::default()
        };
        assert!(matches!(detector.set_config(bad), Err(PipelineError::Config(_))));
        assert_eq!(detector.config().threshold, 1100);
    }
}
