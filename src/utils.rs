use color_eyre::{eyre::eyre, Result};
use tracing::info;
use v4l::{capability::Flags, video::Capture, Device, FourCC};

use crate::capture::PixelFormat;

/// Detected capture device info
#[derive(Debug, Clone)]
pub struct FoundDevice {
    pub path: String,
    pub fourcc: [u8; 4],
}

impl FoundDevice {
    pub fn new(path: String, fourcc: [u8; 4]) -> Self {
        Self { path, fourcc }
    }
}

/// Pick a capture format on an explicitly configured device
pub fn probe_device(path: &str) -> Result<FoundDevice> {
    let dev = Device::with_path(path)?;
    best_fourcc(&dev)
        .map(|fourcc| FoundDevice::new(path.to_string(), fourcc))
        .ok_or_else(|| eyre!("{} offers no supported capture format", path))
}

/// Auto-detect best capture device
pub fn auto_detect_device() -> Result<FoundDevice> {
    use std::path::Path;

    info!("Auto-detecting capture devices...");

    for i in 0..10 {
        let path = format!("/dev/video{}", i);
        if !Path::new(&path).exists() {
            continue;
        }

        if let Ok(dev) = Device::with_path(&path) {
            if let Ok(caps) = dev.query_caps() {
                if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
                    continue;
                }
                if let Some(fourcc) = best_fourcc(&dev) {
                    info!(
                        "Found {} device: {} - {}",
                        String::from_utf8_lossy(&fourcc),
                        path,
                        caps.card
                    );
                    return Ok(FoundDevice::new(path, fourcc));
                }
            }
        }
    }

    Err(eyre!("No suitable capture device found"))
}

/// Prefer formats carrying luminance directly, then MJPEG
fn best_fourcc(dev: &Device) -> Option<[u8; 4]> {
    let formats = dev.enum_formats().ok()?;
    let offered: Vec<[u8; 4]> = formats.iter().map(|f| f.fourcc.repr).collect();

    offered
        .iter()
        .find(|code| PixelFormat::from_fourcc(**code).is_ok())
        .or_else(|| offered.iter().find(|code| **code == FourCC::new(b"MJPG").repr))
        .copied()
}
