// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use anyhow::Result;
use clap::Parser;
use shuttle_core::{init_tracing, AppConfig, FrameClock};
use shuttle_platform::FramebufferTracker;
use shuttle_render::{FrameOutcome, MeshData, RenderSize, Renderer, SceneState, TextureData};
use shuttle_render_vk::VkRenderer;
use std::path::PathBuf;
use tracing::{error, info};

use shuttle_platform::winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::{ElementState, KeyEvent, MouseScrollDelta, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{Key, NamedKey},
    window::{Window, WindowId},
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML config; missing file means defaults
    #[arg(long, default_value = "shuttle.toml")]
    config: PathBuf,
    /// Override window.width
    #[arg(long)]
    width: Option<u32>,
    /// Override window.height
    #[arg(long)]
    height: Option<u32>,
    /// Exit after this many presented frames
    #[arg(long)]
    frames: Option<u64>,
}

/// Wheel delta in "lines"; trackpads report pixels.
fn scroll_lines(delta: MouseScrollDelta) -> f32 {
    match delta {
        MouseScrollDelta::LineDelta(_, y) => y,
        MouseScrollDelta::PixelDelta(p) => (p.y / 40.0) as f32,
    }
}

fn render_size(size: PhysicalSize<u32>) -> RenderSize {
    RenderSize {
        width: size.width,
        height: size.height,
    }
}

struct App {
    cfg: AppConfig,
    max_frames: Option<u64>,

    // Field order matters: the renderer holds the surface and goes before the window.
    renderer: Option<Box<dyn Renderer>>,
    window: Option<Window>,
    tracker: Option<FramebufferTracker>,

    clock: FrameClock,
    /// Renderer reported a 0x0 surface; sleep until the next resize.
    surface_paused: bool,
    presented: u64,
    exiting: bool,
    fatal: Option<anyhow::Error>,
}

impl App {
    fn new(cfg: AppConfig, max_frames: Option<u64>) -> Self {
        Self {
            cfg,
            max_frames,
            renderer: None,
            window: None,
            tracker: None,
            clock: FrameClock::new(),
            surface_paused: false,
            presented: 0,
            exiting: false,
            fatal: None,
        }
    }

    fn create(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let attrs = Window::default_attributes()
            .with_title(self.cfg.window.title.clone())
            .with_inner_size(PhysicalSize::new(self.cfg.window.width, self.cfg.window.height));
        let window = event_loop.create_window(attrs)?;
        let size = window.inner_size();

        let texture = TextureData::checkerboard(256, 8, [235, 235, 235, 255], [40, 44, 52, 255]);
        let renderer = VkRenderer::new(
            &window,
            &window,
            render_size(size),
            &self.cfg.render,
            &MeshData::cube(),
            &texture,
            SceneState::default(),
        )?;
        info!(
            "window {}x{}, {} swapchain images",
            size.width,
            size.height,
            renderer.image_count()
        );

        self.tracker = Some(FramebufferTracker::new(size));
        self.renderer = Some(Box::new(renderer));
        self.window = Some(window);
        Ok(())
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        self.exiting = true;
        self.renderer = None;
        self.window = None;
        event_loop.exit();
    }

    fn paused(&self) -> bool {
        self.surface_paused || self.tracker.as_ref().map_or(true, |t| t.is_zero_area())
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        if self.exiting || self.paused() {
            return;
        }
        let Some(renderer) = self.renderer.as_mut() else {
            return;
        };

        self.clock.begin_frame();
        let res = renderer.render();
        match res {
            Ok(outcome) => {
                self.surface_paused = outcome == FrameOutcome::Paused;
                let presented = outcome == FrameOutcome::Presented;
                self.clock.end_frame(presented);
                if presented {
                    self.presented += 1;
                }
                if self.max_frames.is_some_and(|n| self.presented >= n) {
                    info!("presented {} frames, exiting", self.presented);
                    self.shutdown(event_loop);
                }
            }
            Err(e) => {
                error!("render error: {e:#}");
                self.fatal = Some(e);
                self.shutdown(event_loop);
            }
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            if let Err(e) = self.create(event_loop) {
                error!("renderer init failed: {e:#}");
                self.fatal = Some(e);
                self.shutdown(event_loop);
                return;
            }
        }
        event_loop.set_control_flow(ControlFlow::Wait);
        if let Some(w) = &self.window {
            w.request_redraw();
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                match &mut self.tracker {
                    // Torn down in about_to_wait, after this batch of events.
                    Some(t) => t.on_close_requested(),
                    None => self.shutdown(event_loop),
                }
            }

            WindowEvent::Resized(new_size) => {
                let Some(tracker) = &mut self.tracker else {
                    return;
                };
                tracker.on_resized(new_size);
                let (width, height) = tracker.size();
                if tracker.take_resized() {
                    self.surface_paused = false;
                    if let Some(r) = &mut self.renderer {
                        r.resize(RenderSize { width, height });
                    }
                }
                info!(
                    "Resized → {}x{} (paused={})",
                    width,
                    height,
                    tracker.is_zero_area()
                );
                if tracker.is_zero_area() {
                    self.clock.reset_window();
                } else if let Some(w) = &self.window {
                    w.request_redraw();
                }
            }

            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        logical_key: Key::Named(NamedKey::Escape),
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } => self.shutdown(event_loop),

            WindowEvent::MouseWheel { delta, .. } => {
                if let Some(r) = &mut self.renderer {
                    r.scene_mut().camera.zoom(scroll_lines(delta));
                }
            }

            WindowEvent::RedrawRequested => self.redraw(event_loop),

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }
        if self.tracker.as_ref().is_some_and(|t| t.close_requested()) {
            self.shutdown(event_loop);
            return;
        }

        // Minimized: sleep until the next window event.
        event_loop.set_control_flow(ControlFlow::Wait);
        if self.paused() {
            return;
        }
        // FIFO/MAILBOX pace the loop through the fence wait + present.
        if let Some(w) = &self.window {
            w.request_redraw();
        }

        if let Some(fps) = self.clock.poll_fps() {
            info!(
                "fps ~ {:.0} (cpu {:.2} ms)",
                fps,
                self.clock.last_frame_time().as_secs_f64() * 1000.0
            );
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let mut cfg = AppConfig::load_or_default(&args.config);
    if let Some(w) = args.width {
        cfg.window.width = w;
    }
    if let Some(h) = args.height {
        cfg.window.height = h;
    }
    cfg.validate()?;

    let event_loop: EventLoop<()> = EventLoop::new()?;
    let mut app = App::new(cfg, args.frames);
    event_loop.run_app(&mut app)?;

    match app.fatal.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
