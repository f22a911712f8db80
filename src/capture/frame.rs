use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::pipeline::pool::PooledBuffer;

/// Frame data with zero-copy semantics
///
/// Cloning is cheap: `data` is reference counted and, when it came from the
/// pool, returns its slot once the last clone is dropped. Pixels are never
/// mutated after construction.
#[derive(Clone)]
pub struct Frame {
    pub data: Bytes,

    pub meta: FrameMetadata,

    /// Capture timestamp for latency tracking
    pub timestamp: Instant,
}

/// Frame metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    /// Bytes per row of the first plane
    pub stride: u32,
    pub format: PixelFormat,
    pub device_timestamp: Option<Duration>, // Hardware timestamp if available
}

impl Frame {
    pub fn new(data: Bytes, meta: FrameMetadata, timestamp: Instant) -> Self {
        Self {
            data,
            meta,
            timestamp,
        }
    }

    /// Freeze a filled pool buffer into an immutable frame.
    pub fn from_pooled(buffer: PooledBuffer, meta: FrameMetadata, timestamp: Instant) -> Self {
        Self::new(Bytes::from_owner(buffer), meta, timestamp)
    }

    pub fn sequence(&self) -> u64 {
        self.meta.sequence
    }

    pub fn width(&self) -> u32 {
        self.meta.width
    }

    pub fn height(&self) -> u32 {
        self.meta.height
    }

    /// Check dimensions, stride and buffer length against the pixel format.
    pub fn validate(&self) -> Result<()> {
        self.meta.validate(self.data.len())
    }

    /// Row `y` of the first plane, trimmed to the visible width.
    pub fn row(&self, y: usize) -> &[u8] {
        let stride = self.meta.stride as usize;
        let start = y * stride;
        let visible = self
            .meta
            .format
            .min_stride(self.meta.width)
            .unwrap_or(self.meta.stride) as usize;
        &self.data[start..start + visible]
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("meta", &self.meta)
            .field("bytes", &self.data.len())
            .finish()
    }
}

impl FrameMetadata {
    pub fn validate(&self, data_len: usize) -> Result<()> {
        let Self {
            width,
            height,
            stride,
            format,
            ..
        } = *self;

        if width == 0 || height == 0 {
            return Err(PipelineError::InvalidFrame(format!(
                "zero-sized frame {width}x{height}"
            )));
        }
        let min_stride = format.min_stride(width).ok_or_else(|| {
            PipelineError::InvalidFrame(format!("{format} row of width {width} overflows"))
        })?;
        if stride < min_stride {
            return Err(PipelineError::InvalidFrame(format!(
                "stride {stride} shorter than one {format} row of width {width}"
            )));
        }
        if format.needs_even_width() && width % 2 != 0 {
            return Err(PipelineError::InvalidFrame(format!(
                "{format} requires an even width, got {width}"
            )));
        }
        if format.is_semi_planar() && height % 2 != 0 {
            return Err(PipelineError::InvalidFrame(format!(
                "{format} requires an even height, got {height}"
            )));
        }
        let required = self.required_len()?;
        if data_len < required {
            return Err(PipelineError::InvalidFrame(format!(
                "{format} {width}x{height} stride {stride} needs {required} bytes, got {data_len}"
            )));
        }
        Ok(())
    }

    /// Bytes a buffer needs to hold this frame.
    pub fn required_len(&self) -> Result<usize> {
        self.format
            .required_len(self.stride, self.height)
            .ok_or_else(|| {
                PipelineError::InvalidFrame(format!(
                    "{} {}x{} stride {} overflows the address space",
                    self.format, self.width, self.height, self.stride
                ))
            })
    }
}

/// Pixel formats we support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Gray8,
    Rgb24,
    Bgr24,
    Rgba32,
    Yuyv,
    Nv12,
    Nv21,
}

impl PixelFormat {
    /// Bytes per pixel in the first (or only) plane
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            Self::Gray8 | Self::Nv12 | Self::Nv21 => 1,
            Self::Yuyv => 2,
            Self::Rgb24 | Self::Bgr24 => 3,
            Self::Rgba32 => 4,
        }
    }

    /// Bytes in one tightly packed row, `None` if that overflows `u32`.
    pub fn min_stride(self, width: u32) -> Option<u32> {
        width.checked_mul(self.bytes_per_pixel())
    }

    pub fn is_semi_planar(self) -> bool {
        matches!(self, Self::Nv12 | Self::Nv21)
    }

    fn needs_even_width(self) -> bool {
        matches!(self, Self::Yuyv | Self::Nv12 | Self::Nv21)
    }

    /// Total bytes for a frame of this format. Semi-planar formats carry a
    /// half-height chroma plane with the same stride after the luma plane.
    pub fn required_len(self, stride: u32, height: u32) -> Option<usize> {
        let luma = (stride as usize).checked_mul(height as usize)?;
        if self.is_semi_planar() {
            luma.checked_add((stride as usize).checked_mul(height.div_ceil(2) as usize)?)
        } else {
            Some(luma)
        }
    }

    pub fn fourcc(self) -> [u8; 4] {
        match self {
            Self::Gray8 => *b"GREY",
            Self::Rgb24 => *b"RGB3",
            Self::Bgr24 => *b"BGR3",
            Self::Rgba32 => *b"AB24",
            Self::Yuyv => *b"YUYV",
            Self::Nv12 => *b"NV12",
            Self::Nv21 => *b"NV21",
        }
    }

    /// Map a V4L2 FourCC onto a format the transform understands.
    pub fn from_fourcc(code: [u8; 4]) -> Result<Self> {
        match &code {
            b"GREY" => Ok(Self::Gray8),
            b"RGB3" | b"RG24" => Ok(Self::Rgb24),
            b"BGR3" | b"BG24" => Ok(Self::Bgr24),
            b"AB24" | b"RGBA" => Ok(Self::Rgba32),
            b"YUYV" | b"YUY2" => Ok(Self::Yuyv),
            b"NV12" => Ok(Self::Nv12),
            b"NV21" => Ok(Self::Nv21),
            _ => Err(PipelineError::InvalidFrame(format!(
                "unrecognized pixel format {:?}",
                String::from_utf8_lossy(&code)
            ))),
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Gray8 => "gray8",
            Self::Rgb24 => "rgb24",
            Self::Bgr24 => "bgr24",
            Self::Rgba32 => "rgba32",
            Self::Yuyv => "yuyv",
            Self::Nv12 => "nv12",
            Self::Nv21 => "nv21",
        };
        f.write_str(name)
    }
}

impl FromStr for PixelFormat {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "gray8" | "gray" | "grey" => Ok(Self::Gray8),
            "rgb24" | "rgb" => Ok(Self::Rgb24),
            "bgr24" | "bgr" => Ok(Self::Bgr24),
            "rgba32" | "rgba" => Ok(Self::Rgba32),
            "yuyv" => Ok(Self::Yuyv),
            "nv12" => Ok(Self::Nv12),
            "nv21" => Ok(Self::Nv21),
            other => Err(PipelineError::InvalidFrame(format!(
                "unrecognized pixel format {other:?}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(width: u32, height: u32, stride: u32, format: PixelFormat) -> FrameMetadata {
        FrameMetadata {
            sequence: 1,
            width,
            height,
            stride,
            format,
            device_timestamp: None,
        }
    }

    #[test]
    fn required_len_includes_chroma_plane() {
        assert_eq!(PixelFormat::Nv21.required_len(640, 480), Some(640 * 480 * 3 / 2));
        assert_eq!(PixelFormat::Rgb24.required_len(1920, 2), Some(3840));
    }

    #[test]
    fn oversized_width_is_rejected_not_wrapped() {
        let width = 0x4000_0001;
        assert_eq!(PixelFormat::Rgba32.min_stride(width), None);
        let err = meta(width, 1, 4, PixelFormat::Rgba32).validate(16).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidFrame(_)), "{err}");

        // Gray rows fit in u32 but still need far more than 16 bytes
        assert!(meta(width, 1, width, PixelFormat::Gray8).validate(16).is_err());
        // Luma plane alone fits in 64 bits, adding chroma does not
        assert_eq!(PixelFormat::Nv12.required_len(u32::MAX, u32::MAX - 1), None);
    }

    #[test]
    fn rejects_zero_dimensions() {
        let err = meta(0, 4, 0, PixelFormat::Gray8).validate(16).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidFrame(_)));
    }

    #[test]
    fn rejects_short_stride_and_short_buffer() {
        assert!(meta(4, 4, 11, PixelFormat::Rgb24).validate(64).is_err());
        assert!(meta(4, 4, 12, PixelFormat::Rgb24).validate(47).is_err());
        assert!(meta(4, 4, 12, PixelFormat::Rgb24).validate(48).is_ok());
    }

    #[test]
    fn padded_stride_is_accepted() {
        assert!(meta(3, 2, 16, PixelFormat::Rgb24).validate(32).is_ok());
    }

    #[test]
    fn semi_planar_needs_even_dimensions() {
        assert!(meta(3, 4, 4, PixelFormat::Nv12).validate(64).is_err());
        assert!(meta(4, 3, 4, PixelFormat::Nv21).validate(64).is_err());
    }

    #[test]
    fn fourcc_parsing() {
        assert_eq!(PixelFormat::from_fourcc(*b"NV21").unwrap(), PixelFormat::Nv21);
        assert_eq!(
            PixelFormat::from_fourcc(PixelFormat::Yuyv.fourcc()).unwrap(),
            PixelFormat::Yuyv
        );
        assert!(matches!(
            PixelFormat::from_fourcc(*b"MJPG"),
            Err(PipelineError::InvalidFrame(_))
        ));
    }

    #[test]
    fn names_parse_case_insensitively() {
        assert_eq!("RGBA".parse::<PixelFormat>().unwrap(), PixelFormat::Rgba32);
        assert!("h264".parse::<PixelFormat>().is_err());
    }
}
