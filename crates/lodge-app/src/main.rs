// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use lodge_assets::{load_obj, load_texture, MeshData, TextureData};
use lodge_core::{event_queue, init_tracing, EventSender, Key, PlatformEvent};
use lodge_platform::translate;
use lodge_render::{FrameStatus, RenderSize, Renderer, Scene, SurfaceSizeSource};
use lodge_render_vk::VkRenderer;
use tracing::{error, info, warn};

use lodge_platform::winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    platform::pump_events::{EventLoopExtPumpEvents, PumpStatus},
    window::{Window, WindowId},
};

mod config;
mod fps;

use config::AppCfg;
use fps::FpsCounter;

const EVENT_QUEUE_CAPACITY: usize = 256;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML config file; missing means defaults
    #[arg(long, default_value = "lodge.toml")]
    config: PathBuf,
    /// Wavefront OBJ to display instead of the built-in quads
    #[arg(long)]
    model: Option<PathBuf>,
    /// Texture image; a checkerboard when absent
    #[arg(long)]
    texture: Option<PathBuf>,
    #[arg(long)]
    width: Option<u32>,
    #[arg(long)]
    height: Option<u32>,
    #[arg(long)]
    frames_in_flight: Option<usize>,
}

impl Args {
    /// Flags given on the command line win over the file.
    fn apply(&self, cfg: &mut AppCfg) {
        if let Some(p) = &self.model {
            cfg.assets.model = Some(p.clone());
        }
        if let Some(p) = &self.texture {
            cfg.assets.texture = Some(p.clone());
        }
        if let Some(w) = self.width {
            cfg.window.width = w;
        }
        if let Some(h) = self.height {
            cfg.window.height = h;
        }
        if let Some(f) = self.frames_in_flight {
            cfg.render.frames_in_flight = f;
        }
    }
}

/// winit side of the app: owns the window and feeds the event queue.
struct Shell {
    title: String,
    want: PhysicalSize<u32>,
    tx: EventSender,
    window: Option<Window>,
    size: RenderSize,
    exit_requested: bool,
    init_error: Option<anyhow::Error>,
}

impl Shell {
    fn new(title: String, width: u32, height: u32, tx: EventSender) -> Self {
        Shell {
            title,
            want: PhysicalSize::new(width.max(1), height.max(1)),
            tx,
            window: None,
            size: RenderSize::new(0, 0),
            exit_requested: false,
            init_error: None,
        }
    }

    fn request_exit(&mut self, event_loop: &ActiveEventLoop) {
        self.exit_requested = true;
        event_loop.exit();
    }
}

impl ApplicationHandler for Shell {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let attrs = Window::default_attributes()
            .with_title(self.title.as_str())
            .with_inner_size(self.want);
        match event_loop.create_window(attrs) {
            Ok(window) => {
                let inner = window.inner_size();
                self.size = RenderSize::new(inner.width, inner.height);
                info!("window created ({})", self.size);
                self.window = Some(window);
            }
            Err(e) => {
                error!("create_window failed: {e}");
                self.init_error = Some(e.into());
                self.request_exit(event_loop);
            }
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

        match &event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.request_exit(event_loop);
                return;
            }
            WindowEvent::Resized(s) => {
                self.size = RenderSize::new(s.width, s.height);
            }
            _ => {}
        }

        if let Some(ev) = translate(&event) {
            if ev
                == (PlatformEvent::KeyChanged {
                    key: Key::Escape,
                    pressed: true,
                })
            {
                info!("Escape pressed");
                self.request_exit(event_loop);
                return;
            }
            self.tx.post(ev);
        }
    }
}

/// Lets the frame loop block on window events while the surface is 0x0.
struct PumpedSurface<'a> {
    event_loop: &'a mut EventLoop<()>,
    shell: &'a mut Shell,
}

impl SurfaceSizeSource for PumpedSurface<'_> {
    fn framebuffer_size(&self) -> RenderSize {
        self.shell.size
    }

    fn wait_events(&mut self) {
        if let PumpStatus::Exit(_) = self.event_loop.pump_app_events(None, &mut *self.shell) {
            self.shell.exit_requested = true;
        }
    }

    fn is_closing(&self) -> bool {
        self.shell.exit_requested
    }
}

fn load_scene(cfg: &AppCfg) -> Result<(MeshData, TextureData)> {
    let mesh = match &cfg.assets.model {
        Some(p) => load_obj(p).with_context(|| format!("load model {}", p.display()))?,
        None => MeshData::stacked_quads(),
    };
    let texture = match &cfg.assets.texture {
        Some(p) => load_texture(p).with_context(|| format!("load texture {}", p.display()))?,
        None => TextureData::checkerboard(256, 32),
    };
    info!(
        "scene: {} vertices, {} indices, texture {}x{}",
        mesh.vertices.len(),
        mesh.indices.len(),
        texture.width,
        texture.height
    );
    Ok((mesh, texture))
}

fn run(event_loop: &mut EventLoop<()>, shell: &mut Shell, renderer: &mut VkRenderer) -> Result<()> {
    let mut fps = FpsCounter::new(shell.title.clone(), Instant::now());
    loop {
        if let PumpStatus::Exit(_) = event_loop.pump_app_events(Some(Duration::ZERO), &mut *shell) {
            return Ok(());
        }
        if shell.exit_requested {
            return Ok(());
        }

        let status = {
            let mut surface = PumpedSurface {
                event_loop: &mut *event_loop,
                shell: &mut *shell,
            };
            renderer.draw_frame(&mut surface)
        };
        match status {
            Ok(FrameStatus::Presented { .. }) => fps.frame(),
            Ok(FrameStatus::Skipped) => {}
            Ok(FrameStatus::Closing) => return Ok(()),
            Err(e) => {
                error!("fatal frame error: {e}");
                return Err(e.into());
            }
        }

        if let Some(title) = fps.tick(Instant::now()) {
            info!("{title}");
            if let Some(w) = &shell.window {
                w.set_title(&title);
            }
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let mut cfg = AppCfg::load(&args.config);
    args.apply(&mut cfg);
    let settings = cfg.render_settings();
    let (mesh, texture) = load_scene(&cfg)?;

    let mut event_loop: EventLoop<()> = EventLoop::new()?;
    let (tx, rx) = event_queue(EVENT_QUEUE_CAPACITY);
    let mut shell = Shell::new(cfg.window.title.clone(), cfg.window.width, cfg.window.height, tx);

    // the window only exists after the first `resumed`
    while shell.window.is_none() && !shell.exit_requested {
        if let PumpStatus::Exit(_) = event_loop.pump_app_events(Some(Duration::ZERO), &mut shell) {
            break;
        }
    }
    if let Some(e) = shell.init_error.take() {
        return Err(e.context("create_window"));
    }
    let Some(window) = shell.window.as_ref() else {
        return Ok(());
    };

    let mut renderer = VkRenderer::new(
        window,
        window,
        shell.size,
        &settings,
        Scene {
            mesh: &mesh,
            texture: &texture,
        },
        rx,
    )
    .context("renderer init")?;

    let result = run(&mut event_loop, &mut shell, &mut renderer);

    info!(
        "shutting down: {} frames presented, {} swapchain rebuilds",
        renderer.scheduler().frames_presented(),
        renderer.scheduler().invalidation().rebuilds()
    );
    if let Err(e) = renderer.wait_idle() {
        warn!("wait_idle during teardown: {e}");
    }
    // renderer before the window its surface was made from
    drop(renderer);
    drop(shell.window.take());
    info!("teardown complete");
    result
}
