//! Output frame composition into pooled buffers

use crate::capture::{Frame, FrameMetadata, PixelFormat};
use crate::error::{PipelineError, Result};
use crate::pipeline::pool::BufferPool;
use crate::transform::color::write_rgba;
use crate::OutputMode;

/// Build the output frame for `input`. `edges` is the tightly packed edge map
/// and is ignored in passthrough mode.
pub fn compose(
    input: &Frame,
    edges: &[u8],
    mode: OutputMode,
    edge_color: [u8; 3],
    pool: &BufferPool,
) -> Result<Frame> {
    let width = input.meta.width;
    let height = input.meta.height;
    let format = match mode {
        OutputMode::EdgeOnly => PixelFormat::Gray8,
        OutputMode::Overlay | OutputMode::Passthrough => PixelFormat::Rgba32,
    };
    let stride = format.min_stride(width).ok_or_else(|| {
        PipelineError::InvalidFrame(format!("{format} output row of width {width} overflows"))
    })?;
    let len = FrameMetadata {
        stride,
        format,
        ..input.meta
    }
    .required_len()?;
    let mut buffer = pool.acquire(len)?;

    match mode {
        OutputMode::EdgeOnly => buffer.copy_from_slice(edges),
        OutputMode::Passthrough => write_rgba(input, &mut buffer),
        OutputMode::Overlay => {
            write_rgba(input, &mut buffer);
            let [r, g, b] = edge_color;
            for (px, &e) in buffer.chunks_exact_mut(4).zip(edges) {
                if e != 0 {
                    px.copy_from_slice(&[r, g, b, 255]);
                }
            }
        }
    }

    let meta = FrameMetadata {
        stride,
        format,
        ..input.meta
    };
    Ok(Frame::from_pooled(buffer, meta, input.timestamp))
}
