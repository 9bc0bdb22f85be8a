//! tessera - forward renderer demos.
//!
//! ```text
//! tessera [--config tessera.toml] [--demo plain_triangle|mesh_batching|world_space]
//! ```
//!
//! Exits with -1 when initialisation fails.

mod demo;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use winit::application::ApplicationHandler;
use winit::event_loop::ControlFlow;
use winit::window::WindowId;

use tessera_core::{Config, DEFAULT_CONFIG_FILE};
use tessera_platform::{ActiveEventLoop, EventLoop, Window, WindowEvent};
use tessera_renderer::Renderer;
use tessera_resources::ShaderLibrary;

use crate::demo::DemoKind;

#[derive(Parser, Debug)]
#[command(name = "tessera", about = "Forward renderer demo scenes")]
struct Args {
    /// Configuration file; defaults apply when it does not exist.
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Demo to run, overriding `[demo] name`.
    #[arg(long, value_enum)]
    demo: Option<DemoKind>,

    /// Exit after rendering N frames.
    #[arg(long)]
    max_frames: Option<u64>,
}

struct App {
    config: Config,
    demo: DemoKind,
    max_frames: Option<u64>,
    // Renderer before window: the surface must go before the window does.
    renderer: Option<Renderer>,
    window: Option<Window>,
    frames: u64,
    failed: bool,
}

impl App {
    fn new(config: Config, demo: DemoKind, max_frames: Option<u64>) -> Self {
        Self {
            config,
            demo,
            max_frames,
            renderer: None,
            window: None,
            frames: 0,
            failed: false,
        }
    }

    fn initialize(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let window = Window::new(event_loop, &self.config.window)?;
        let mut renderer = Renderer::new(&window, &self.config.graphics)?;

        let library = ShaderLibrary::new(&self.config.materials.dir);
        demo::build(self.demo, &mut renderer, &library, &self.config.demo)
            .map_err(|e| demo::with_shader_hint(e, &self.config.materials.dir))?;

        renderer.on_window_create(window.width(), window.height());
        self.renderer = Some(renderer);
        self.window = Some(window);
        Ok(())
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(renderer) = self.renderer.as_mut() {
            renderer.stop();
        }
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        match self.initialize(event_loop) {
            Ok(()) => info!("Initialization complete, entering main loop"),
            Err(e) => {
                error!("Initialization failed: {e:#}");
                self.failed = true;
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down");
                self.shutdown(event_loop);
            }
            WindowEvent::Resized(size) => {
                if let (Some(window), Some(renderer)) = (self.window.as_mut(), self.renderer.as_mut()) {
                    let (width, height, minimized) = window.resize(size.width, size.height);
                    renderer.on_window_resize(width, height, minimized);
                }
            }
            WindowEvent::RedrawRequested => {
                let Some(renderer) = self.renderer.as_mut() else {
                    return;
                };
                match renderer.update() {
                    Ok(true) => {
                        self.frames += 1;
                        if self.max_frames.is_some_and(|max| self.frames >= max) {
                            info!("Rendered {} frames, exiting", self.frames);
                            self.shutdown(event_loop);
                        }
                    }
                    Ok(false) => event_loop.exit(),
                    Err(e) => {
                        error!("Frame failed: {e}");
                        self.shutdown(event_loop);
                    }
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = self.window.as_ref() {
            window.request_redraw();
        }
    }
}

fn run(args: Args) -> Result<bool> {
    let config = Config::load_or_default(&args.config)?;
    tessera_core::init_logging_with(&config.logging.filter);

    let demo = match args.demo {
        Some(demo) => demo,
        None => DemoKind::from_name(&config.demo.name)?,
    };
    info!("Starting tessera with the {demo:?} demo");

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config, demo, args.max_frames);
    event_loop.run_app(&mut app)?;
    Ok(!app.failed)
}

fn main() {
    let args = Args::parse();
    match run(args) {
        Ok(true) => {}
        Ok(false) => std::process::exit(-1),
        Err(e) => {
            tessera_core::init_logging();
            error!("{e:#}");
            std::process::exit(-1);
        }
    }
}
