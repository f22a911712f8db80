//! Synthetic camera: a grey field with a sliding bright block and a
//! diagonal dark bar, so every frame has edges that move.

use crate::capture::frame::{FrameMetadata, PixelFormat};
use crate::error::{PipelineError, Result};
use crate::transform::color::luma_bt601;

const BACKGROUND: [u8; 3] = [96, 96, 96];
const BLOCK: [u8; 3] = [230, 70, 60];
const BAR: [u8; 3] = [20, 30, 110];

pub struct TestPattern {
    width: u32,
    height: u32,
    format: PixelFormat,
    tick: u32,
    buffer: Vec<u8>,
}

impl TestPattern {
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Result<Self> {
        if !matches!(
            format,
            PixelFormat::Gray8
                | PixelFormat::Rgb24
                | PixelFormat::Bgr24
                | PixelFormat::Nv12
                | PixelFormat::Nv21
        ) {
            return Err(PipelineError::Config(format!(
                "test pattern cannot render {format}"
            )));
        }

        let stride = format
            .min_stride(width)
            .ok_or_else(|| PipelineError::Config(format!("test pattern width {width} too large")))?;
        let meta = FrameMetadata {
            sequence: 0,
            width,
            height,
            stride,
            format,
            device_timestamp: None,
        };
        let len = meta
            .required_len()
            .and_then(|len| meta.validate(len).map(|()| len))
            .map_err(|e| PipelineError::Config(format!("test pattern: {e}")))?;

        Ok(Self {
            width,
            height,
            format,
            tick: 0,
            buffer: vec![0; len],
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Render the next frame. Tightly packed, valid until the next call.
    pub fn next_frame(&mut self) -> &[u8] {
        let (w, h) = (self.width as usize, self.height as usize);
        let tick = self.tick as usize;
        self.tick = self.tick.wrapping_add(1);

        let block_w = (w / 4).max(1);
        let block_h = (h / 4).max(1);
        let block_x = (tick * 4) % w;
        let block_y = (h - block_h) / 2;
        let bar_offset = (tick * 2) % (w + h);

        let shade = |x: usize, y: usize| -> [u8; 3] {
            let in_block = (block_x..block_x + block_w).contains(&x)
                && (block_y..block_y + block_h).contains(&y);
            if in_block {
                BLOCK
            } else if (x + y).abs_diff(bar_offset) < 3 {
                BAR
            } else {
                BACKGROUND
            }
        };

        match self.format {
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => {
                let bgr = self.format == PixelFormat::Bgr24;
                for (i, px) in self.buffer.chunks_exact_mut(3).enumerate() {
                    let [r, g, b] = shade(i % w, i / w);
                    px.copy_from_slice(&if bgr { [b, g, r] } else { [r, g, b] });
                }
            }
            _ => {
                let (luma, chroma) = self.buffer.split_at_mut(w * h);
                for (i, y) in luma.iter_mut().enumerate() {
                    let [r, g, b] = shade(i % w, i / w);
                    *y = luma_bt601(r, g, b);
                }
                // Neutral chroma: the semi-planar variants render in grey
                chroma.fill(128);
            }
        }

        &self.buffer
    }
}
