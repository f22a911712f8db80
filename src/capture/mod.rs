pub mod adapter;
#[cfg(feature = "v4l2")]
pub mod decoder;
pub mod frame;
pub mod pattern;
#[cfg(feature = "v4l2")]
pub mod v4l2;

pub use adapter::{CaptureAdapter, RawFrameInfo};
pub use frame::{Frame, FrameMetadata, PixelFormat};
pub use pattern::TestPattern;
#[cfg(feature = "v4l2")]
pub use v4l2::V4l2Capture;
