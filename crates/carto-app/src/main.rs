// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use anyhow::{bail, Context, Result};
use carto_core::init_tracing;
use carto_platform::{drawable_size, window_attributes, FramePacer};
use carto_render::{FrameStatus, RenderSize, RendererConfig};
use carto_render_vk::{create_offscreen, create_windowed, VkDrawContext};
use clap::Parser;
use serde::Deserialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{error, info, warn};

use carto_platform::winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};

mod scene;

use scene::MapScene;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML config; a missing file means defaults.
    #[arg(long, default_value = "carto.toml")]
    config: PathBuf,
    /// Render without a window.
    #[arg(long)]
    offscreen: bool,
    #[arg(long)]
    width: Option<u32>,
    #[arg(long)]
    height: Option<u32>,
    /// Frames to render before exiting; 0 runs until the window closes.
    #[arg(long)]
    frames: Option<u64>,
    /// Write the last frame to this PPM file (offscreen only).
    #[arg(long)]
    dump: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
struct WindowCfg {
    title: String,
    width: u32,
    height: u32,
    /// Frame cap while unfocused; 0 keeps the focused policy.
    unfocused_fps: u32,
    /// Frame cap with vsync off; 0 is uncapped.
    fps_when_vsync_off: u32,
}

impl Default for WindowCfg {
    fn default() -> Self {
        Self {
            title: "carto".into(),
            width: 1280,
            height: 720,
            unfocused_fps: 30,
            fps_when_vsync_off: 0,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct AppCfg {
    #[serde(default)]
    render: RendererConfig,
    #[serde(default)]
    window: WindowCfg,
}

struct App {
    cfg: AppCfg,
    max_frames: u64,
    window: Option<Window>,
    renderer: Option<VkDrawContext>,
    scene: Option<MapScene>,
    render_size: RenderSize,
    started: Instant,
    frames: u64,
    pacer: FramePacer,
    unfocused_pacer: FramePacer,
    focused: bool,
    occluded: bool,
    exiting: bool,
    failure: Option<anyhow::Error>,
}

impl App {
    fn new(cfg: AppCfg, max_frames: u64) -> Self {
        let fps = if cfg.render.vsync { 0 } else { cfg.window.fps_when_vsync_off };
        Self {
            pacer: FramePacer::new(fps),
            unfocused_pacer: FramePacer::new(cfg.window.unfocused_fps),
            render_size: RenderSize::new(cfg.window.width, cfg.window.height),
            cfg,
            max_frames,
            window: None,
            renderer: None,
            scene: None,
            started: Instant::now(),
            frames: 0,
            focused: true,
            occluded: false,
            exiting: false,
            failure: None,
        }
    }

    fn paused(&self) -> bool {
        self.occluded || self.render_size.is_empty()
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let w = &self.cfg.window;
        let window = event_loop
            .create_window(window_attributes(&w.title, w.width, w.height))
            .context("create_window")?;
        let (width, height) = drawable_size(&window);
        self.render_size = RenderSize::new(width, height);

        let mut renderer = create_windowed(&window, &self.cfg.render, self.render_size)
            .context("vulkan init")?;
        renderer.set_clear_color(self.cfg.render.clear_color);
        let scene = MapScene::new(&mut renderer)?;
        info!("windowed renderer up ({}x{})", width, height);

        self.window = Some(window);
        self.renderer = Some(renderer);
        self.scene = Some(scene);
        Ok(())
    }

    fn redraw(&mut self) -> Result<()> {
        let (Some(r), Some(scene)) = (self.renderer.as_mut(), self.scene.as_mut()) else {
            return Ok(());
        };
        match r.start_frame()? {
            FrameStatus::Ready => scene.draw(r, self.started.elapsed().as_secs_f32())?,
            FrameStatus::Degraded => {}
        }
        r.end_frame()?;
        self.frames += 1;
        self.pacer.frame_rendered(Instant::now());
        Ok(())
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        self.exiting = true;
        if let (Some(mut r), Some(scene)) = (self.renderer.take(), self.scene.take()) {
            scene.destroy(&mut r);
        }
        self.window = None;
        event_loop.exit();
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, e: anyhow::Error) {
        error!("{e:#}");
        self.failure = Some(e);
        self.shutdown(event_loop);
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            if let Err(e) = self.init(event_loop) {
                self.fail(event_loop, e);
                return;
            }
        }
        event_loop.set_control_flow(ControlFlow::Wait);
        if let Some(w) = &self.window {
            w.request_redraw();
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, window_id: WindowId, event: WindowEvent) {
        if self.window.as_ref().is_some_and(|w| w.id() != window_id) {
            return;
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.shutdown(event_loop);
            }

            WindowEvent::Resized(new_size) => {
                self.render_size = RenderSize::new(new_size.width, new_size.height);
                info!(
                    "Resized → {}x{} (paused={})",
                    new_size.width,
                    new_size.height,
                    self.paused()
                );
                if let Some(r) = &mut self.renderer {
                    r.resize(self.render_size);
                }
                if let Some(w) = &self.window {
                    w.request_redraw();
                }
            }

            WindowEvent::Occluded(occluded) => {
                self.occluded = occluded;
                info!("Occluded={} → paused={}", occluded, self.paused());
            }

            WindowEvent::Focused(focused) => {
                if self.focused != focused {
                    self.focused = focused;
                    info!("Focused({})", focused);
                    self.unfocused_pacer.reset(Instant::now());
                }
            }

            WindowEvent::RedrawRequested => {
                if self.exiting || self.paused() {
                    return;
                }
                if let Err(e) = self.redraw() {
                    if e.downcast_ref::<carto_render_vk::RenderError>().is_some_and(|e| e.is_fatal()) {
                        self.fail(event_loop, e);
                        return;
                    }
                    warn!("frame {}: {e:#}", self.frames);
                }
                if self.max_frames > 0 && self.frames >= self.max_frames {
                    info!("rendered {} frames; exiting", self.frames);
                    self.shutdown(event_loop);
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }
        if self.paused() {
            event_loop.set_control_flow(ControlFlow::Wait);
            self.pacer.reset(Instant::now());
            return;
        }

        let now = Instant::now();
        let throttled = !self.focused && self.cfg.window.unfocused_fps > 0;
        let pacer = if throttled { &mut self.unfocused_pacer } else { &mut self.pacer };
        match pacer.poll(now) {
            Ok(()) => {
                let flow = if throttled || !self.cfg.render.vsync {
                    ControlFlow::Poll
                } else {
                    ControlFlow::Wait
                };
                event_loop.set_control_flow(flow);
                if let Some(w) = &self.window {
                    w.request_redraw();
                }
            }
            Err(deadline) => event_loop.set_control_flow(ControlFlow::WaitUntil(deadline)),
        }
    }
}

/// Render `frames` frames without a window; optionally dump the last one.
fn run_offscreen(cfg: &AppCfg, size: RenderSize, frames: u64, dump: Option<&Path>) -> Result<()> {
    let mut r = create_offscreen(&cfg.render, size).context("vulkan init")?;
    r.set_clear_color(cfg.render.clear_color);
    let mut scene = MapScene::new(&mut r)?;
    let frames = frames.max(1);
    let mut pixels = vec![0u8; size.width as usize * size.height as usize * 4];

    let result = (|| -> Result<()> {
        for i in 0..frames {
            let status = r.start_frame()?;
            if status == FrameStatus::Ready {
                scene.draw(&mut r, i as f32 / 60.0)?;
            } else {
                warn!("offscreen frame {i} degraded");
            }
            if i + 1 == frames && dump.is_some() {
                r.read_framebuffer(&mut pixels, size.width, size.height)?;
            } else {
                r.end_frame()?;
            }
        }
        Ok(())
    })();
    scene.destroy(&mut r);
    result?;

    if let Some(path) = dump {
        write_ppm(path, size.width, size.height, &pixels)?;
        info!("wrote {}", path.display());
    }
    info!("rendered {frames} offscreen frames");
    Ok(())
}

/// Binary PPM (P6); alpha is dropped.
fn write_ppm(path: &Path, width: u32, height: u32, rgba: &[u8]) -> Result<()> {
    let mut out = Vec::with_capacity(rgba.len() / 4 * 3 + 32);
    encode_ppm(&mut out, width, height, rgba)?;
    std::fs::write(path, out).with_context(|| format!("writing {}", path.display()))
}

fn encode_ppm(out: &mut impl Write, width: u32, height: u32, rgba: &[u8]) -> Result<()> {
    let needed = width as usize * height as usize * 4;
    if rgba.len() < needed {
        bail!("{} bytes of pixels for a {width}x{height} image", rgba.len());
    }
    write!(out, "P6\n{width} {height}\n255\n")?;
    for px in rgba[..needed].chunks_exact(4) {
        out.write_all(&px[..3])?;
    }
    Ok(())
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let mut cfg: AppCfg = carto_core::load_config_or_default(&args.config);
    cfg.render = cfg.render.with_env_overrides();
    if let Some(w) = args.width {
        cfg.window.width = w;
    }
    if let Some(h) = args.height {
        cfg.window.height = h;
    }
    info!("vsync cfg = {}, validation = {}", cfg.render.vsync, cfg.render.validation);

    if args.offscreen {
        let size = RenderSize::new(cfg.window.width, cfg.window.height);
        if size.is_empty() {
            bail!("offscreen size must be non-zero, got {}x{}", size.width, size.height);
        }
        return run_offscreen(&cfg, size, args.frames.unwrap_or(1), args.dump.as_deref());
    }
    if args.dump.is_some() {
        warn!("--dump only applies to --offscreen; ignoring");
    }

    let event_loop: EventLoop<()> = EventLoop::new()?;
    let mut app = App::new(cfg, args.frames.unwrap_or(0));
    event_loop.run_app(&mut app)?;
    match app.failure.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
