//! Device-lifetime GPU objects for one window.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use tessera_core::GraphicsConfig;
use tessera_platform::{Surface, Window, required_extensions};
use tessera_rhi::command::{CommandAllocator, CommandList, FrameCommandList};
use tessera_rhi::command_queue::CommandQueue;
use tessera_rhi::descriptor_heap::{DescriptorHeap, DescriptorHeapType};
use tessera_rhi::device::Device;
use tessera_rhi::instance::Instance;
use tessera_rhi::physical_device::select_physical_device;
use tessera_rhi::swapchain::{SwapChain, SwapChainDesc, SwapchainSupportDetails, choose_surface_format};
use tessera_rhi::{RhiError, vk};

use crate::error::{RenderError, RenderResult};

/// Instance, surface, device, direct queue, the one command allocator, the
/// render-target heap and (once the window exists) the swap chain.
///
/// Fields are declared in reverse creation order so they drop swap chain
/// first and instance last.
pub struct GraphicsContext {
    swap_chain: Option<SwapChain>,
    allocator: CommandAllocator,
    queue: CommandQueue,
    rtv_heap: DescriptorHeap,
    device: Arc<Device>,
    surface: Surface,
    instance: Instance,
    surface_format: vk::SurfaceFormatKHR,
    config: GraphicsConfig,
}

impl GraphicsContext {
    /// Bring up Vulkan for `window`.
    ///
    /// The back buffer format is fixed here so pipelines can be built before
    /// the swap chain exists.
    pub fn new(window: &Window, config: &GraphicsConfig) -> RenderResult<Self> {
        let extensions = required_extensions(window.raw_display_handle()?)?;
        let instance = Instance::new(config.validation, &extensions)?;
        let surface = window.create_surface(instance.entry(), instance.handle())?;

        let adapter = select_physical_device(instance.handle(), surface.handle(), surface.loader())?;
        let support = SwapchainSupportDetails::query(adapter.device, surface.handle(), surface.loader())?;
        let surface_format = choose_surface_format(&support.formats).ok_or_else(|| {
            error!("Surface reports no formats");
            RhiError::SurfaceError("no surface formats".to_string())
        })?;

        let device = Device::new(&instance, &adapter)?;
        let queue = device.create_command_queue(config.initial_fence_value)?;
        let allocator = device.create_command_allocator(&queue)?;
        let rtv_heap =
            device.create_descriptor_heap(DescriptorHeapType::RenderTarget, config.rtv_descriptor_count);

        info!(
            "Graphics context ready ({:?}, {} back buffers, vsync {})",
            surface_format.format, config.buffer_count, config.vsync
        );

        Ok(Self {
            swap_chain: None,
            allocator,
            queue,
            rtv_heap,
            device,
            surface,
            instance,
            surface_format,
            config: config.clone(),
        })
    }

    /// Create the swap chain at `width` x `height`.
    ///
    /// A second call resizes the existing one; the render-target slots it
    /// owns are never handed out twice.
    pub fn create_swap_chain(&mut self, width: u32, height: u32) -> RenderResult<()> {
        if width == 0 || height == 0 {
            return Err(RenderError::Window(format!(
                "cannot create a {width}x{height} swap chain"
            )));
        }
        if self.swap_chain.is_some() {
            warn!("Swap chain already exists, resizing it instead");
            self.resize_swap_chain(width, height, false)?;
            return Ok(());
        }

        let desc = SwapChainDesc {
            width,
            height,
            buffer_count: self.config.buffer_count,
            format: self.surface_format,
            vsync: self.config.vsync,
            clear_color: self.config.clear_color,
        };
        let swap_chain = SwapChain::new(
            &self.instance,
            Arc::clone(&self.device),
            self.surface.handle(),
            desc,
            &mut self.rtv_heap,
        )?;
        info!(
            "Swap chain created: {}x{}, {} buffers, {:?}",
            width,
            height,
            swap_chain.buffer_count(),
            swap_chain.present_mode()
        );
        self.swap_chain = Some(swap_chain);
        Ok(())
    }

    /// Resize the swap chain, or rebuild it unconditionally with `force`.
    ///
    /// Returns whether any buffers were rebuilt.
    pub fn resize_swap_chain(&mut self, width: u32, height: u32, force: bool) -> RenderResult<bool> {
        let swap_chain = self
            .swap_chain
            .as_mut()
            .ok_or(RenderError::NoSwapChain("resize before window creation"))?;

        if force {
            swap_chain.recreate(width, height, &self.queue, &mut self.rtv_heap)?;
            Ok(true)
        } else {
            Ok(swap_chain.resize(width, height, &self.queue, &mut self.rtv_heap)?)
        }
    }

    /// Present the frame just submitted.
    ///
    /// Returns `true` when the swap chain should be rebuilt before the next
    /// frame.
    pub fn present(&mut self) -> RenderResult<bool> {
        let swap_chain = self
            .swap_chain
            .as_mut()
            .ok_or(RenderError::NoSwapChain("present before window creation"))?;

        match swap_chain.present() {
            Ok(suboptimal) => Ok(suboptimal),
            Err(RhiError::SwapchainOutOfDate) => {
                debug!("Swap chain out of date at present");
                Ok(true)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Start a frame on the next back buffer.
    pub fn frame_command_list(&mut self) -> RenderResult<FrameCommandList<'_>> {
        let swap_chain = self.swap_chain.as_mut().ok_or_else(|| {
            error!("Frame requested before the swap chain was created");
            RenderError::NoSwapChain("frame before window creation")
        })?;
        Ok(FrameCommandList::new(&mut self.allocator, &self.queue, swap_chain)?)
    }

    /// Start a command list outside of any frame, e.g. for uploads.
    pub fn command_list(&mut self) -> RenderResult<CommandList<'_>> {
        Ok(self.allocator.begin_list(&self.queue)?)
    }

    /// Drain the queue and release the back buffers.
    pub fn flush_all(&mut self) -> RenderResult<()> {
        match self.swap_chain.as_mut() {
            Some(swap_chain) => swap_chain.flush_all(&self.queue, &mut self.rtv_heap)?,
            None => {
                self.queue.wait_for_idle()?;
            }
        }
        Ok(())
    }

    /// Block until every submission has completed.
    pub fn wait_for_idle(&self) -> RenderResult<u64> {
        Ok(self.queue.wait_for_idle()?)
    }

    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    #[inline]
    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    #[inline]
    pub fn swap_chain(&self) -> Option<&SwapChain> {
        self.swap_chain.as_ref()
    }

    #[inline]
    pub fn has_swap_chain(&self) -> bool {
        self.swap_chain.is_some()
    }

    /// Format of the back buffers and of every material's color attachment.
    #[inline]
    pub fn color_format(&self) -> vk::Format {
        self.surface_format.format
    }
}

impl Drop for GraphicsContext {
    fn drop(&mut self) {
        if let Err(e) = self.queue.wait_for_idle() {
            error!("Failed to drain the queue before teardown: {e}");
        }
        debug!("Graphics context shutting down");
    }
}
