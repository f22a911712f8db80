pub mod adapter;
#[cfg(feature = "sdl")]
pub mod display;

pub use adapter::{expand_to_rgba, DisplayAdapter, FrameSink, LogSink};
#[cfg(feature = "sdl")]
pub use display::{run as run_window, Sdl2Display};
