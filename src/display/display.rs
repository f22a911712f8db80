//! SDL2 Window Display
//! Blits processed frames into an SDL2 window through a streaming RGBA texture.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use sdl2::event::Event;
use sdl2::pixels::PixelFormatEnum;
use sdl2::render::{Canvas, TextureCreator};
use sdl2::video::{Window, WindowContext};
use tracing::info;

use crate::capture::Frame;
use crate::display::adapter::{expand_to_rgba, DisplayAdapter, FrameSink};
use crate::error::PipelineError;
use crate::transform::FrameProcessor;
use crate::DisplayConfig;

/// SDL2 window sink
pub struct Sdl2Display {
    canvas: Canvas<Window>,
    texture_creator: TextureCreator<WindowContext>,
    rgba: Vec<u8>,
}

impl Sdl2Display {
    pub fn new(sdl_context: &sdl2::Sdl, config: &DisplayConfig) -> Result<Self> {
        let video_subsystem = sdl_context.video().map_err(|e| eyre!(e))?;

        let window = video_subsystem
            .window(&config.title, config.width, config.height)
            .position_centered()
            .resizable()
            .build()?;

        let mut canvas_builder = window.into_canvas();
        if config.vsync {
            canvas_builder = canvas_builder.present_vsync();
        }
        let canvas = canvas_builder.build()?;
        let texture_creator = canvas.texture_creator();

        Ok(Self {
            canvas,
            texture_creator,
            rgba: Vec::new(),
        })
    }

    fn blit(&mut self, frame: &Frame) -> Result<()> {
        expand_to_rgba(frame, &mut self.rgba)?;

        let mut texture = self
            .texture_creator
            .create_texture_streaming(PixelFormatEnum::RGBA32, frame.width(), frame.height())
            .map_err(|e| eyre!(e))?;

        texture
            .update(None, &self.rgba, frame.width() as usize * 4)
            .map_err(|e| eyre!(e))?;

        self.canvas.clear();
        self.canvas
            .copy(&texture, None, None)
            .map_err(|e| eyre!(e))?;

        self.canvas.present();
        Ok(())
    }
}

impl FrameSink for Sdl2Display {
    fn present(&mut self, frame: &Frame) -> crate::Result<()> {
        self.blit(frame)
            .map_err(|e| PipelineError::Sink(e.to_string()))
    }
}

/// Drive the window until it is closed or `shutdown` is raised. Must run on
/// the thread that initialised SDL.
pub fn run<P: FrameProcessor>(
    sdl_context: &sdl2::Sdl,
    display: &mut DisplayAdapter<Sdl2Display, P>,
    shutdown: &AtomicBool,
) -> Result<()> {
    let mut event_pump = sdl_context.event_pump().map_err(|e| eyre!(e))?;

    'running: while !shutdown.load(Ordering::Relaxed) {
        for event in event_pump.poll_iter() {
            if let Event::Quit { .. } = event {
                info!("Quit event received");
                break 'running;
            }
        }

        match display.present_latest() {
            Ok(Some(_)) => {}
            // Nothing new; vsync is not throttling us, so back off briefly
            Ok(None) => std::thread::sleep(Duration::from_millis(2)),
            Err(e) => tracing::error!("Display error: {}", e),
        }
    }

    Ok(())
}
