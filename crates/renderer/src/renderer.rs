//! Per-frame loop.
//!
//! Each [`Renderer::update`] applies the latest window request, then records
//! one frame:
//!
//! 1. begin the frame (acquire, barrier, clear)
//! 2. traverse the scene, uploading world matrices and keying draws
//! 3. draw in key order, switching materials only when they change
//! 4. end the frame barrier, execute and wait
//! 5. present
//!
//! A failure while recording steps 2 or 3 discards the frame unexecuted.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use tessera_core::{FrameTimer, GraphicsConfig};
use tessera_platform::Window;
use tessera_resources::{Material, MaterialRegistry};
use tessera_rhi::device::Device;
use tessera_rhi::vk;
use tessera_scene::{MeshInstance, NodeId, RenderBatch, Scene, record_draws, record_updates};

use crate::context::GraphicsContext;
use crate::error::RenderResult;
use crate::requests::{SwapChainAction, WindowRequests};

/// Owns the scene, its materials and the graphics context.
///
/// Fields drop top to bottom: scene objects and materials release their GPU
/// resources while the device is still alive.
pub struct Renderer {
    scene: Scene<MeshInstance>,
    batch: RenderBatch<NodeId>,
    materials: MaterialRegistry<Material>,
    context: GraphicsContext,
    requests: WindowRequests,
    timer: FrameTimer,
    running: bool,
}

impl Renderer {
    pub fn new(window: &Window, config: &GraphicsConfig) -> RenderResult<Self> {
        let context = GraphicsContext::new(window, config)?;
        Ok(Self {
            scene: Scene::new(),
            batch: RenderBatch::new(),
            materials: MaterialRegistry::new(),
            context,
            requests: WindowRequests::new(),
            timer: FrameTimer::new(),
            running: true,
        })
    }

    /// Latch swap chain creation for the next frame.
    pub fn on_window_create(&mut self, width: u32, height: u32) {
        debug!("Window created at {width}x{height}");
        self.requests.window_created(width, height);
    }

    /// Latch a resize for the next frame.
    pub fn on_window_resize(&mut self, width: u32, height: u32, minimized: bool) {
        self.requests.window_resized(width, height, minimized);
    }

    /// Render one frame. Returns `false` once the renderer has been stopped.
    pub fn update(&mut self) -> RenderResult<bool> {
        if !self.running {
            return Ok(false);
        }

        let delta_time = self.timer.tick();
        self.apply_window_requests()?;

        if self.requests.is_minimized() || !self.context.has_swap_chain() {
            return Ok(true);
        }

        self.draw(delta_time)?;
        Ok(true)
    }

    /// Record, submit and present one frame.
    pub fn draw(&mut self, delta_time: f32) -> RenderResult<()> {
        let Self {
            scene,
            batch,
            materials,
            context,
            requests,
            timer,
            ..
        } = self;

        let frame = match context.frame_command_list() {
            Ok(frame) => frame,
            Err(e) if e.is_out_of_date() => {
                debug!("Swap chain out of date at acquire, rebuilding next frame");
                requests.swap_chain_lost();
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        // A recording error discards the frame before anything executes.
        let (switches, _) = frame.record_and_submit(|cmd| -> RenderResult<usize> {
            record_updates(scene, batch, cmd, delta_time)?;
            Ok(record_draws(scene, batch, materials, cmd)?)
        })?;

        if context.present()? {
            requests.swap_chain_lost();
        }

        if timer.frame_count() % 600 == 0 {
            debug!(
                "{} draws, {} material switches, {:.1} fps",
                batch.len(),
                switches,
                timer.average_fps()
            );
        }
        Ok(())
    }

    /// Stop rendering and drain the GPU. Later updates return `false`.
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;

        if let Err(e) = self.context.flush_all() {
            error!("Failed to flush on stop: {e}");
        }
        info!(
            "Renderer stopped after {} frames ({:.1} fps average)",
            self.timer.frame_count(),
            self.timer.average_fps()
        );
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Replace the scene; the old one is dropped once the GPU is idle.
    pub fn set_scene(&mut self, scene: Scene<MeshInstance>) {
        if let Err(e) = self.context.wait_for_idle() {
            warn!("Replacing the scene without draining the queue: {e}");
        }
        self.scene = scene;
        self.batch.clear();
    }

    #[inline]
    pub fn scene(&self) -> &Scene<MeshInstance> {
        &self.scene
    }

    #[inline]
    pub fn scene_mut(&mut self) -> &mut Scene<MeshInstance> {
        &mut self.scene
    }

    #[inline]
    pub fn materials(&self) -> &MaterialRegistry<Material> {
        &self.materials
    }

    #[inline]
    pub fn materials_mut(&mut self) -> &mut MaterialRegistry<Material> {
        &mut self.materials
    }

    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        self.context.device()
    }

    #[inline]
    pub fn color_format(&self) -> vk::Format {
        self.context.color_format()
    }

    #[inline]
    pub fn context(&self) -> &GraphicsContext {
        &self.context
    }

    #[inline]
    pub fn context_mut(&mut self) -> &mut GraphicsContext {
        &mut self.context
    }

    fn apply_window_requests(&mut self) -> RenderResult<()> {
        let Some(action) = self.requests.take(self.context.has_swap_chain()) else {
            return Ok(());
        };

        match action {
            SwapChainAction::Create { width, height } => {
                self.context.create_swap_chain(width, height)?;
            }
            SwapChainAction::Resize { width, height } => {
                if !self.context.resize_swap_chain(width, height, false)? {
                    debug!("Resize to {width}x{height} skipped, size unchanged");
                }
            }
            SwapChainAction::Rebuild { width, height } => {
                self.context.resize_swap_chain(width, height, true)?;
            }
        }
        Ok(())
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        self.stop();
    }
}
