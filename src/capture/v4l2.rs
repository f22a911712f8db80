//! V4L2 camera source feeding the capture adapter

use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use tracing::{info, instrument};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::capture::adapter::{CaptureAdapter, RawFrameInfo};
use crate::capture::decoder;
use crate::capture::frame::PixelFormat;
use crate::transform::FrameProcessor;
use crate::utils::FoundDevice;
use crate::CaptureConfig;

/// Memory-mapped V4L2 capture
pub struct V4l2Capture {
    device: Box<Device>,
    stream: Option<MmapStream<'static>>,
    buffer_count: u32,
    fourcc: FourCC,
    width: u32,
    height: u32,
    stride: u32,
}

impl V4l2Capture {
    /// Open `found` and negotiate the configured size. The driver may pick a
    /// different size; the negotiated one is what frames are tagged with.
    pub fn new(config: &CaptureConfig, found: &FoundDevice) -> Result<Self> {
        info!("Initializing V4L2 capture: {}", found.path);

        let device = Device::with_path(&found.path)?;

        let caps = device.query_caps()?;
        info!("Device: {} ({})", caps.card, caps.driver);

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(eyre!("Device doesn't support video capture"));
        }

        let mut fmt = device.format()?;
        fmt.width = config.width;
        fmt.height = config.height;
        fmt.fourcc = FourCC::new(&found.fourcc);
        let fmt = device.set_format(&fmt)?;

        info!(
            "Negotiated {}x{} {} (stride {})",
            fmt.width, fmt.height, fmt.fourcc, fmt.stride
        );

        Ok(Self {
            device: Box::new(device),
            stream: None,
            buffer_count: config.buffer_count,
            fourcc: fmt.fourcc,
            width: fmt.width,
            height: fmt.height,
            stride: fmt.stride,
        })
    }

    /// Start streaming with memory-mapped buffers
    pub fn start_stream(&mut self) -> Result<()> {
        let stream = MmapStream::with_buffers(&self.device, Type::VideoCapture, self.buffer_count)?;

        self.stream = Some(stream);
        info!("Capture stream started with {} buffers", self.buffer_count);
        Ok(())
    }

    /// Block for the next camera buffer and hand it to the adapter. MJPEG is
    /// decoded to RGB first; raw formats are passed through with their stride.
    #[instrument(level = "trace", skip_all)]
    pub fn deliver_next<P: FrameProcessor>(&mut self, adapter: &CaptureAdapter<P>) -> Result<u64> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| eyre!("Stream not started"))?;

        let (buf, meta) = stream.next()?;
        let info = RawFrameInfo {
            stride: Some(self.stride),
            device_timestamp: Some(
                Duration::from_secs(meta.timestamp.sec as u64)
                    + Duration::from_micros(meta.timestamp.usec as u64),
            ),
        };

        let sequence = if &self.fourcc.repr == b"MJPG" {
            let (rgb, width, height) = decoder::decode_mjpeg(buf)?;
            let info = RawFrameInfo {
                stride: None,
                ..info
            };
            adapter.deliver_frame(&rgb, width, height, PixelFormat::Rgb24, info)?
        } else {
            adapter.deliver_fourcc(buf, self.width, self.height, self.fourcc.repr, info)?
        };
        Ok(sequence)
    }
}
