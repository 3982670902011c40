// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::path::PathBuf;
use std::time::Instant;

use anyhow::Result;
use clap::Parser;
use tracing::{debug, error, info};
use trigon_core::init_tracing;
use trigon_platform::winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};
use trigon_platform::{create_window, WindowSpec};
use trigon_render::{FrameOutcome, RenderSize, Renderer};
use trigon_render_vk::{PresentMode, PresenterConfig, VkRenderer};

mod config;

use config::{Overrides, DEFAULT_CONFIG_PATH};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML config file; missing means defaults
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Frame slots the CPU may run ahead of the GPU
    #[arg(long)]
    frames_in_flight: Option<usize>,

    /// immediate | mailbox | fifo | fifo_relaxed
    #[arg(long)]
    present_mode: Option<PresentMode>,

    /// Skip validation layers even in debug builds
    #[arg(long)]
    no_validation: bool,
}

struct App {
    window_spec: WindowSpec,
    presenter_cfg: PresenterConfig,

    // Dropped before the window whose surface it presents to.
    renderer: Option<VkRenderer>,
    window: Option<Window>,
    size: RenderSize,

    exiting: bool,
    paused: bool,
    frames: u32,
    dropped: u32,
    last_fps_instant: Instant,
}

impl App {
    fn new(window_spec: WindowSpec, presenter_cfg: PresenterConfig) -> Self {
        App {
            window_spec,
            presenter_cfg,
            renderer: None,
            window: None,
            size: RenderSize::new(0, 0),
            exiting: false,
            paused: false,
            frames: 0,
            dropped: 0,
            last_fps_instant: Instant::now(),
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let window = create_window(event_loop, &self.window_spec)?;
        let size = window.inner_size();
        self.size = RenderSize::new(size.width, size.height);

        let renderer = VkRenderer::new(&window, &window, self.size, self.presenter_cfg.clone())?;
        info!(
            "rendering on {} at {}x{} with {} frames in flight",
            renderer.device_name(),
            renderer.extent().width,
            renderer.extent().height,
            renderer.frames_in_flight()
        );

        self.renderer = Some(renderer);
        self.window = Some(window);
        Ok(())
    }

    /// Idles the device and releases the renderer; safe to call twice.
    fn stop(&mut self, event_loop: &ActiveEventLoop) {
        self.exiting = true;
        if let Some(renderer) = self.renderer.take() {
            if let Err(e) = renderer.shutdown() {
                error!("shutdown: {e:#}");
            }
        }
        self.window = None;
        event_loop.exit();
    }

    fn update_paused(&mut self, now_paused: bool, why: &str) {
        if self.paused != now_paused {
            self.paused = now_paused;
            info!("{why} -> paused={}", self.paused);
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            if let Err(e) = self.init(event_loop) {
                error!("renderer init failed: {e:#}");
                self.stop(event_loop);
                return;
            }
        }
        event_loop.set_control_flow(ControlFlow::Wait);
        self.paused = self.size.is_empty();
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
                self.stop(event_loop);
            }

            WindowEvent::Resized(new_size) => {
                self.size = RenderSize::new(new_size.width, new_size.height);
                debug!("Resized -> {}x{}", self.size.width, self.size.height);
                if let Some(renderer) = &mut self.renderer {
                    if let Err(e) = renderer.resize(self.size) {
                        error!("resize: {e:#}");
                    }
                }
                self.update_paused(self.size.is_empty(), "Resized");
                if !self.paused {
                    if let Some(w) = &self.window {
                        w.request_redraw();
                    }
                }
            }

            WindowEvent::Occluded(occluded) => {
                self.update_paused(occluded || self.size.is_empty(), "Occluded");
            }

            WindowEvent::RedrawRequested => {
                if self.exiting || self.paused {
                    return;
                }
                let Some(renderer) = &mut self.renderer else {
                    return;
                };
                match renderer.render() {
                    Ok(FrameOutcome::Presented { .. }) => {
                        self.frames = self.frames.saturating_add(1);
                    }
                    Ok(FrameOutcome::Dropped(reason)) => {
                        self.dropped = self.dropped.saturating_add(1);
                        debug!("frame dropped: {reason:?}");
                    }
                    Ok(FrameOutcome::Suspended) => {}
                    Err(e) => {
                        error!("render failed, stopping: {e:#}");
                        self.stop(event_loop);
                    }
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }
        if self.paused {
            event_loop.set_control_flow(ControlFlow::Wait);
            self.frames = 0;
            self.dropped = 0;
            return;
        }

        // Presentation paces the loop.
        event_loop.set_control_flow(ControlFlow::Wait);
        if let Some(w) = &self.window {
            w.request_redraw();
        }

        let now = Instant::now();
        if now.duration_since(self.last_fps_instant).as_secs_f32() >= 1.0 {
            if let Some(r) = &self.renderer {
                info!(
                    "fps ~ {} (dropped {}, rebuilds {}, suspended={})",
                    self.frames,
                    self.dropped,
                    r.rebuild_count(),
                    r.is_suspended()
                );
            }
            self.frames = 0;
            self.dropped = 0;
            self.last_fps_instant = now;
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let file = config::load(&args.config);
    let overrides = Overrides {
        frames_in_flight: args.frames_in_flight,
        present_mode: args.present_mode,
        no_validation: args.no_validation,
    };
    let presenter_cfg = file.presenter_config(&overrides)?;
    info!(
        "present modes {:?}, surface formats {:?}, {} frames in flight",
        presenter_cfg.present_modes, presenter_cfg.surface_formats, presenter_cfg.frames_in_flight
    );

    let event_loop: EventLoop<()> = EventLoop::new()?;
    let mut app = App::new(file.window_spec(), presenter_cfg);
    event_loop.run_app(&mut app)?;
    Ok(())
}
