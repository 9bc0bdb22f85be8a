//! Swap chain, back buffer rotation and the present protocol.
//!
//! Each frame follows the same bracket:
//!
//! 1. [`SwapChain::begin_frame`] acquires the next image, moves it from
//!    present to render-target state, clears it and binds it.
//! 2. The caller records its draws.
//! 3. [`SwapChain::end_frame`] moves the image back to present state.
//! 4. The command list is executed and waited on.
//! 5. [`SwapChain::present`] hands the image to the presentation engine.
//!
//! Resizing flushes the queue, drops every back buffer, rebuilds the native
//! swap chain and refills the same slots. The slot vector never changes
//! length, so descriptor heap handles handed out at creation stay valid. A
//! presentation engine that hands back a different image count than the
//! configured one is an error, both at creation and on every rebuild.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, error, info, warn};

use crate::color_buffer::{ColorBuffer, RenderTargetView};
use crate::command::CommandList;
use crate::command_queue::CommandQueue;
use crate::descriptor_heap::{DescriptorHandle, DescriptorHeap};
use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::instance::Instance;
use crate::resource::{Resource, ResourceState};

/// Surface capabilities, formats and present modes.
#[derive(Debug, Clone)]
pub struct SwapchainSupportDetails {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupportDetails {
    pub fn query(
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
    ) -> RhiResult<Self> {
        let capabilities = unsafe {
            surface_loader.get_physical_device_surface_capabilities(physical_device, surface)?
        };
        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(physical_device, surface)?
        };
        let present_modes = unsafe {
            surface_loader.get_physical_device_surface_present_modes(physical_device, surface)?
        };

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }

    #[inline]
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// Creation parameters.
#[derive(Clone, Copy, Debug)]
pub struct SwapChainDesc {
    pub width: u32,
    pub height: u32,
    pub buffer_count: u32,
    pub format: vk::SurfaceFormatKHR,
    pub vsync: bool,
    pub clear_color: [f32; 4],
}

/// Fixed-length back buffer slots, the size they were built for and the slot
/// selected by the frame in flight.
///
/// Slots are emptied and refilled but never added or removed.
#[derive(Debug)]
pub struct BackBuffers<T> {
    slots: Vec<Option<T>>,
    width: u32,
    height: u32,
    current: Option<usize>,
}

impl<T> BackBuffers<T> {
    /// `count` empty slots.
    pub fn new(count: usize) -> Self {
        Self {
            slots: std::iter::repeat_with(|| None).take(count).collect(),
            width: 0,
            height: 0,
            current: None,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Cached (width, height).
    #[inline]
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Every slot holds a buffer.
    pub fn is_populated(&self) -> bool {
        !self.slots.is_empty() && self.slots.iter().all(Option::is_some)
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.slots.get_mut(index).and_then(Option::as_mut)
    }

    /// Empty every slot, dropping the buffers.
    pub fn release_all(&mut self) {
        self.current = None;
        for slot in &mut self.slots {
            *slot = None;
        }
    }

    /// Make slot `index` the frame's buffer after `prepare` succeeds on it.
    ///
    /// Any previous selection is dropped first, so a failure leaves no slot
    /// selected.
    pub fn select_with<F>(&mut self, index: usize, prepare: F) -> RhiResult<()>
    where
        F: FnOnce(&mut T) -> RhiResult<()>,
    {
        self.current = None;
        let buffer = self.get_mut(index).ok_or_else(|| {
            error!("Back buffer {index} is not populated");
            RhiError::InvalidHandle(format!("back buffer {index}"))
        })?;
        prepare(buffer)?;
        self.current = Some(index);
        Ok(())
    }

    /// Forget the selected slot.
    #[inline]
    pub fn deselect(&mut self) {
        self.current = None;
    }

    /// Index of the selected slot.
    #[inline]
    pub fn current(&self) -> Option<usize> {
        self.current
    }

    pub fn current_mut(&mut self) -> Option<&mut T> {
        let index = self.current?;
        self.get_mut(index)
    }

    /// Clear the selection, returning the slot that was selected.
    #[inline]
    pub fn take_current(&mut self) -> Option<usize> {
        self.current.take()
    }

    /// Fill the slots from `items`, in order, and record the size.
    ///
    /// # Errors
    ///
    /// Fails without touching any slot when `items` does not have exactly one
    /// entry per slot.
    pub fn populate(&mut self, width: u32, height: u32, items: Vec<T>) -> RhiResult<()> {
        check_image_count(self.slots.len(), items.len())?;

        for (slot, item) in self.slots.iter_mut().zip(items) {
            *slot = Some(item);
        }
        self.width = width;
        self.height = height;
        Ok(())
    }

    /// Rebuild for a new size unless the buffers already match it.
    ///
    /// Returns `Ok(false)` without calling either closure when the size is
    /// unchanged and every slot is populated.
    pub fn resize_with<F, R>(
        &mut self,
        width: u32,
        height: u32,
        flush: F,
        recreate: R,
    ) -> RhiResult<bool>
    where
        F: FnOnce() -> RhiResult<()>,
        R: FnOnce(u32, u32) -> RhiResult<Vec<T>>,
    {
        if (width, height) == self.size() && self.is_populated() {
            return Ok(false);
        }
        self.rebuild_with(width, height, flush, recreate)?;
        Ok(true)
    }

    /// Flush, release every slot, recreate and refill, regardless of size.
    pub fn rebuild_with<F, R>(
        &mut self,
        width: u32,
        height: u32,
        flush: F,
        recreate: R,
    ) -> RhiResult<()>
    where
        F: FnOnce() -> RhiResult<()>,
        R: FnOnce(u32, u32) -> RhiResult<Vec<T>>,
    {
        flush()?;
        self.release_all();
        let items = recreate(width, height)?;
        self.populate(width, height, items)
    }
}

/// Native swap chain handle and the properties it was created with.
struct NativeSwapChain {
    loader: ash::khr::swapchain::Device,
    handle: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
    present_mode: vk::PresentModeKHR,
}

impl NativeSwapChain {
    fn create(
        device: &Device,
        loader: ash::khr::swapchain::Device,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
        desc: &SwapChainDesc,
        old_swapchain: vk::SwapchainKHR,
    ) -> RhiResult<Self> {
        let support =
            SwapchainSupportDetails::query(device.physical_device(), surface, surface_loader)?;
        if !support.is_adequate() {
            return Err(RhiError::SwapchainError(
                "surface reports no formats or present modes".to_string(),
            ));
        }

        let present_mode = choose_present_mode(&support.present_modes, desc.vsync);
        let extent = choose_extent(&support.capabilities, desc.width, desc.height);
        let image_count = determine_image_count(&support.capabilities, desc.buffer_count);

        let families = device.queue_families();
        let family_indices = families.unique_families();
        let (sharing_mode, shared_families) = if families.is_split() {
            (vk::SharingMode::CONCURRENT, family_indices.as_slice())
        } else {
            (vk::SharingMode::EXCLUSIVE, &[][..])
        };

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(desc.format.format)
            .image_color_space(desc.format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(shared_families)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let handle = unsafe { loader.create_swapchain(&create_info, None)? };
        let images = match unsafe { loader.get_swapchain_images(handle) } {
            Ok(images) => images,
            Err(e) => {
                unsafe { loader.destroy_swapchain(handle, None) };
                return Err(e.into());
            }
        };

        info!(
            "Swap chain created: {}x{}, {:?}, {:?}, {} image(s)",
            extent.width,
            extent.height,
            desc.format.format,
            present_mode,
            images.len()
        );

        Ok(Self {
            loader,
            handle,
            images,
            format: desc.format,
            extent,
            present_mode,
        })
    }
}

impl Drop for NativeSwapChain {
    fn drop(&mut self) {
        if self.handle != vk::SwapchainKHR::null() {
            unsafe { self.loader.destroy_swapchain(self.handle, None) };
            debug!("Swap chain destroyed");
        }
    }
}

/// Presentable back buffers for one window surface.
pub struct SwapChain {
    device: Arc<Device>,
    surface: vk::SurfaceKHR,
    surface_loader: ash::khr::surface::Instance,
    desc: SwapChainDesc,
    back_buffers: BackBuffers<ColorBuffer>,
    native: NativeSwapChain,
    rtv_base: DescriptorHandle,
    acquire_fence: vk::Fence,
}

impl SwapChain {
    /// Create the swap chain and one render-target view per back buffer.
    ///
    /// The views go into freshly allocated slots of `rtv_heap`; the same slots
    /// are reused by every later resize.
    pub fn new(
        instance: &Instance,
        device: Arc<Device>,
        surface: vk::SurfaceKHR,
        desc: SwapChainDesc,
        rtv_heap: &mut DescriptorHeap,
    ) -> RhiResult<Self> {
        if desc.width == 0 || desc.height == 0 {
            return Err(RhiError::InvalidArgument(format!(
                "swap chain size must be non-zero, got {}x{}",
                desc.width, desc.height
            )));
        }

        let surface_loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());
        let loader = ash::khr::swapchain::Device::new(instance.handle(), device.handle());
        let native = NativeSwapChain::create(
            &device,
            loader,
            surface,
            &surface_loader,
            &desc,
            vk::SwapchainKHR::null(),
        )?;

        let count = desc.buffer_count as usize;
        check_image_count(count, native.images.len())?;

        let rtv_base = rtv_heap.allocate_handles(count as u32)?;
        let buffers = create_color_buffers(&device, &native, rtv_heap, rtv_base)?;
        let mut back_buffers = BackBuffers::new(count);
        back_buffers.populate(desc.width, desc.height, buffers)?;

        let acquire_fence = unsafe {
            device
                .handle()
                .create_fence(&vk::FenceCreateInfo::default(), None)?
        };

        Ok(Self {
            device,
            surface,
            surface_loader,
            desc,
            back_buffers,
            native,
            rtv_base,
            acquire_fence,
        })
    }

    /// Resize to `width` x `height`.
    ///
    /// Returns `Ok(false)` and does nothing when the buffers already have that
    /// size. Otherwise the queue is drained before any buffer is released.
    pub fn resize(
        &mut self,
        width: u32,
        height: u32,
        queue: &CommandQueue,
        rtv_heap: &mut DescriptorHeap,
    ) -> RhiResult<bool> {
        if width == 0 || height == 0 {
            return Err(RhiError::InvalidArgument(format!(
                "cannot resize swap chain to {width}x{height}"
            )));
        }

        let resized = self.rebuild(width, height, queue, rtv_heap, false)?;
        if resized {
            info!("Swap chain resized to {width}x{height}");
        }
        Ok(resized)
    }

    /// Rebuild even if the size did not change, e.g. after the surface
    /// reported the swap chain out of date.
    pub fn recreate(
        &mut self,
        width: u32,
        height: u32,
        queue: &CommandQueue,
        rtv_heap: &mut DescriptorHeap,
    ) -> RhiResult<()> {
        self.rebuild(width, height, queue, rtv_heap, true)?;
        info!("Swap chain rebuilt at {width}x{height}");
        Ok(())
    }

    fn rebuild(
        &mut self,
        width: u32,
        height: u32,
        queue: &CommandQueue,
        rtv_heap: &mut DescriptorHeap,
        force: bool,
    ) -> RhiResult<bool> {
        self.back_buffers.deselect();

        let device = &self.device;
        let native = &mut self.native;
        let surface = self.surface;
        let surface_loader = &self.surface_loader;
        let desc = &mut self.desc;
        let rtv_base = self.rtv_base;
        let count = self.back_buffers.len();

        let flush = || -> RhiResult<()> { queue.wait_for_idle().map(|_| ()) };
        let recreate = |width: u32, height: u32| -> RhiResult<Vec<ColorBuffer>> {
            clear_rtv_slots(rtv_heap, rtv_base, count as u32)?;

            desc.width = width;
            desc.height = height;
            let mut replacement = NativeSwapChain::create(
                device,
                native.loader.clone(),
                surface,
                surface_loader,
                desc,
                native.handle,
            )?;
            // The old swap chain is retired by the new one and destroyed here.
            std::mem::swap(native, &mut replacement);
            drop(replacement);

            // Views past `count` would land in heap slots owned by someone else.
            check_image_count(count, native.images.len())?;
            create_color_buffers(device, native, rtv_heap, rtv_base)
        };

        let result = if force {
            self.back_buffers
                .rebuild_with(width, height, flush, recreate)
                .map(|_| true)
        } else {
            self.back_buffers.resize_with(width, height, flush, recreate)
        };
        result.inspect_err(|e| error!("Swap chain rebuild to {width}x{height} failed: {e}"))
    }

    /// Acquire the next back buffer and prepare it for rendering.
    ///
    /// Records the present-to-render-target barrier and the clear, then binds
    /// the buffer as the render target. Returns the back buffer index.
    ///
    /// # Errors
    ///
    /// [`RhiError::SwapchainOutOfDate`] when the surface changed underneath
    /// the swap chain; the caller should rebuild it.
    pub fn begin_frame(&mut self, cmd: &mut CommandList<'_>) -> RhiResult<u32> {
        self.back_buffers.deselect();

        let acquired = unsafe {
            self.native.loader.acquire_next_image(
                self.native.handle,
                u64::MAX,
                vk::Semaphore::null(),
                self.acquire_fence,
            )
        };
        let (index, suboptimal) = match acquired {
            Ok(result) => result,
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => return Err(RhiError::SwapchainOutOfDate),
            Err(e) => {
                error!("Failed to acquire back buffer: {e}");
                return Err(e.into());
            }
        };
        if suboptimal {
            debug!("Swap chain is suboptimal for the surface");
        }

        let fences = [self.acquire_fence];
        unsafe {
            self.device
                .handle()
                .wait_for_fences(&fences, true, u64::MAX)?;
            self.device.handle().reset_fences(&fences)?;
        }

        let clear_color = self.desc.clear_color;
        self.back_buffers.select_with(index as usize, |buffer| {
            cmd.transition(buffer, ResourceState::RenderTarget);
            let target = buffer.render_target();
            cmd.clear_render_target(&target, clear_color);
            cmd.set_render_target(target);
            Ok(())
        })?;
        Ok(index)
    }

    /// Move the current back buffer back to present state.
    pub fn end_frame(&mut self, cmd: &mut CommandList<'_>) -> RhiResult<()> {
        let buffer = self.back_buffers.current_mut().ok_or_else(|| {
            error!("end_frame called without a matching begin_frame");
            RhiError::InvalidHandle("no back buffer acquired".to_string())
        })?;

        cmd.end_rendering();
        cmd.transition(buffer, ResourceState::Present);
        Ok(())
    }

    /// Forget the frame in flight without presenting it.
    ///
    /// The frame's barriers never execute, so the back buffer's tracked state
    /// falls back to [`ResourceState::Undefined`].
    pub fn abort_frame(&mut self) {
        if let Some(buffer) = self.back_buffers.current_mut() {
            buffer.set_state(ResourceState::Undefined);
        }
        self.back_buffers.deselect();
        debug!("Frame aborted before present");
    }

    /// Present the current back buffer.
    ///
    /// Must run after the frame's command list has been executed and waited
    /// on. Returns whether the swap chain is suboptimal.
    pub fn present(&mut self) -> RhiResult<bool> {
        let index = self.back_buffers.take_current().ok_or_else(|| {
            error!("present called without an acquired back buffer");
            RhiError::InvalidHandle("no back buffer acquired".to_string())
        })?;

        let swapchains = [self.native.handle];
        let image_indices = [index as u32];
        let present_info = vk::PresentInfoKHR::default()
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe {
            self.native
                .loader
                .queue_present(self.device.present_queue(), &present_info)
        };
        match result {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(RhiError::SwapchainOutOfDate),
            Err(e) => {
                error!("Present failed: {e}");
                Err(e.into())
            }
        }
    }

    /// Drain the queue and release every back buffer.
    ///
    /// The next [`resize`](Self::resize) or [`recreate`](Self::recreate)
    /// refills the slots.
    pub fn flush_all(
        &mut self,
        queue: &CommandQueue,
        rtv_heap: &mut DescriptorHeap,
    ) -> RhiResult<()> {
        queue.wait_for_idle()?;
        self.back_buffers.release_all();
        clear_rtv_slots(rtv_heap, self.rtv_base, self.back_buffers.len() as u32)?;
        debug!("Swap chain flushed");
        Ok(())
    }

    /// Render target of the back buffer acquired by the current frame.
    pub fn current_render_target(&self) -> Option<RenderTargetView> {
        let index = self.back_buffers.current()?;
        self.back_buffers.get(index).map(ColorBuffer::render_target)
    }

    #[inline]
    pub fn current_index(&self) -> Option<u32> {
        self.back_buffers.current().map(|index| index as u32)
    }

    #[inline]
    pub fn buffer_count(&self) -> usize {
        self.back_buffers.len()
    }

    /// Size the back buffers were last built for.
    #[inline]
    pub fn size(&self) -> (u32, u32) {
        self.back_buffers.size()
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.native.extent
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.native.format.format
    }

    #[inline]
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.native.present_mode
    }
}

impl Drop for SwapChain {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            error!("Failed to wait for device idle before swap chain teardown: {e}");
        }
        self.back_buffers.release_all();
        unsafe {
            self.device
                .handle()
                .destroy_fence(self.acquire_fence, None);
        }
    }
}

/// The presentation engine must hand back exactly the configured count.
fn check_image_count(expected: usize, actual: usize) -> RhiResult<()> {
    if expected == actual {
        return Ok(());
    }
    error!(
        "Presentation engine provided {actual} images for {expected} back buffers; \
         check [graphics] buffer_count against the surface limits"
    );
    Err(RhiError::BackBufferCount { expected, actual })
}

fn clear_rtv_slots(
    rtv_heap: &mut DescriptorHeap,
    base: DescriptorHandle,
    count: u32,
) -> RhiResult<()> {
    for step in 0..count {
        let handle = rtv_heap.offset_handle(base, step);
        rtv_heap.clear(handle)?;
    }
    Ok(())
}

fn create_color_buffers(
    device: &Arc<Device>,
    native: &NativeSwapChain,
    rtv_heap: &mut DescriptorHeap,
    rtv_base: DescriptorHandle,
) -> RhiResult<Vec<ColorBuffer>> {
    let mut buffers = Vec::with_capacity(native.images.len());
    for (i, &image) in native.images.iter().enumerate() {
        let rtv = rtv_heap.offset_handle(rtv_base, i as u32);
        buffers.push(ColorBuffer::from_swap_chain_image(
            Arc::clone(device),
            image,
            native.format.format,
            native.extent,
            rtv_heap,
            rtv,
        )?);
    }
    Ok(buffers)
}

/// Pick the back buffer format.
///
/// Prefers 8-bit UNORM formats with an sRGB non-linear color space; falls back
/// to the first reported format.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    const PREFERRED: [vk::Format; 2] = [vk::Format::B8G8R8A8_UNORM, vk::Format::R8G8B8A8_UNORM];

    let preferred = PREFERRED.iter().find_map(|&wanted| {
        formats
            .iter()
            .copied()
            .find(|f| f.format == wanted && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
    });
    if preferred.is_some() {
        return preferred;
    }

    let first = formats.first().copied();
    if let Some(first) = first {
        warn!("Using first available surface format {:?}", first.format);
    }
    first
}

/// FIFO when synchronised to vblank; otherwise the lowest-latency mode.
fn choose_present_mode(present_modes: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if vsync {
        return vk::PresentModeKHR::FIFO;
    }

    [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
        .into_iter()
        .find(|mode| present_modes.contains(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    width: u32,
    height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    vk::Extent2D {
        width: width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// The requested count clamped to what the surface allows.
fn determine_image_count(capabilities: &vk::SurfaceCapabilitiesKHR, requested: u32) -> u32 {
    let count = requested.max(capabilities.min_image_count);
    if capabilities.max_image_count > 0 {
        count.min(capabilities.max_image_count)
    } else {
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn populated(count: usize, width: u32, height: u32) -> BackBuffers<u32> {
        let mut buffers = BackBuffers::new(count);
        buffers
            .populate(width, height, (0..count as u32).collect())
            .unwrap();
        buffers
    }

    #[test]
    fn test_resize_to_cached_size_is_noop() {
        let mut buffers = populated(3, 800, 600);
        let flushed = Cell::new(false);

        let resized = buffers
            .resize_with(
                800,
                600,
                || {
                    flushed.set(true);
                    Ok(())
                },
                |_, _| panic!("must not recreate"),
            )
            .unwrap();

        assert!(!resized);
        assert!(!flushed.get());
        assert_eq!(buffers.get(2), Some(&2));
    }

    #[test]
    fn test_resize_flushes_then_refills_same_slots() {
        let mut buffers = populated(2, 800, 600);
        let flushed = Cell::new(false);

        let resized = buffers
            .resize_with(
                1024,
                768,
                || {
                    flushed.set(true);
                    Ok(())
                },
                |w, h| {
                    assert!(flushed.get(), "flush must precede recreation");
                    Ok(vec![w, h])
                },
            )
            .unwrap();

        assert!(resized);
        assert_eq!(buffers.size(), (1024, 768));
        assert_eq!(buffers.get(0), Some(&1024));
        assert_eq!(buffers.get(1), Some(&768));
    }

    #[test]
    fn test_length_stable_across_resizes() {
        let mut buffers = populated(3, 640, 480);
        let sizes = [(800, 600), (800, 600), (1, 1), (1920, 1080), (640, 480)];

        for (width, height) in sizes {
            buffers
                .resize_with(width, height, || Ok(()), |_, _| Ok(vec![7, 8, 9]))
                .unwrap();
            assert_eq!(buffers.len(), 3);
            assert!(buffers.is_populated());
        }
    }

    #[test]
    fn test_wrong_item_count_keeps_length() {
        let mut buffers = populated(2, 640, 480);
        let result = buffers.resize_with(800, 600, || Ok(()), |_, _| Ok(vec![1, 2, 3]));

        assert!(matches!(
            result,
            Err(RhiError::BackBufferCount {
                expected: 2,
                actual: 3
            })
        ));
        assert_eq!(buffers.len(), 2);
        assert!(!buffers.is_populated());
        assert_eq!(buffers.size(), (640, 480));
    }

    #[test]
    fn test_changed_image_count_fails_then_recovers() {
        let mut buffers = populated(2, 640, 480);

        let result = buffers.rebuild_with(800, 600, || Ok(()), |_, _| Ok(vec![1, 2, 3]));
        assert!(matches!(
            result,
            Err(RhiError::BackBufferCount {
                expected: 2,
                actual: 3
            })
        ));
        assert_eq!(buffers.len(), 2);

        // The next rebuild at the same size is not skipped.
        let resized = buffers
            .resize_with(640, 480, || Ok(()), |_, _| Ok(vec![4, 5]))
            .unwrap();
        assert!(resized);
        assert!(buffers.is_populated());
        assert_eq!(buffers.len(), 2);
    }

    #[test]
    fn test_image_count_must_match_configuration() {
        assert!(check_image_count(3, 3).is_ok());
        assert!(matches!(
            check_image_count(2, 3),
            Err(RhiError::BackBufferCount {
                expected: 2,
                actual: 3
            })
        ));
    }

    #[test]
    fn test_select_marks_current_after_prepare() {
        let mut buffers = populated(3, 640, 480);
        buffers
            .select_with(1, |buffer| {
                *buffer += 10;
                Ok(())
            })
            .unwrap();

        assert_eq!(buffers.current(), Some(1));
        assert_eq!(buffers.current_mut(), Some(&mut 11));
        assert_eq!(buffers.take_current(), Some(1));
        assert_eq!(buffers.current(), None);
    }

    #[test]
    fn test_failed_select_clears_stale_selection() {
        let mut buffers = populated(2, 640, 480);
        buffers.select_with(0, |_| Ok(())).unwrap();

        let result = buffers.select_with(1, |_| {
            Err(RhiError::VulkanError(vk::Result::ERROR_DEVICE_LOST))
        });
        assert!(result.is_err());
        assert_eq!(buffers.current(), None);

        buffers.select_with(0, |_| Ok(())).unwrap();
        assert!(matches!(
            buffers.select_with(5, |_| Ok(())),
            Err(RhiError::InvalidHandle(_))
        ));
        assert_eq!(buffers.current(), None);
    }

    #[test]
    fn test_release_clears_selection() {
        let mut buffers = populated(2, 640, 480);
        buffers.select_with(1, |_| Ok(())).unwrap();
        buffers.release_all();
        assert_eq!(buffers.current(), None);
        assert!(buffers.current_mut().is_none());
    }

    #[test]
    fn test_failed_flush_keeps_buffers() {
        let mut buffers = populated(2, 640, 480);
        let result = buffers.resize_with(
            800,
            600,
            || Err(RhiError::VulkanError(vk::Result::ERROR_DEVICE_LOST)),
            |_, _| panic!("must not recreate"),
        );

        assert!(result.is_err());
        assert!(buffers.is_populated());
        assert_eq!(buffers.size(), (640, 480));
    }

    #[test]
    fn test_released_buffers_rebuild_at_same_size() {
        let mut buffers = populated(2, 640, 480);
        buffers.release_all();
        assert_eq!(buffers.len(), 2);
        assert_eq!(buffers.get(0), None);

        let resized = buffers
            .resize_with(640, 480, || Ok(()), |_, _| Ok(vec![3, 4]))
            .unwrap();
        assert!(resized);
        assert_eq!(buffers.get(1), Some(&4));
    }

    #[test]
    fn test_forced_rebuild_ignores_cached_size() {
        let mut buffers = populated(2, 640, 480);
        buffers
            .rebuild_with(640, 480, || Ok(()), |_, _| Ok(vec![5, 6]))
            .unwrap();
        assert_eq!(buffers.get(0), Some(&5));
    }

    #[test]
    fn test_choose_surface_format_prefers_unorm() {
        let formats = [
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ];
        assert_eq!(
            choose_surface_format(&formats).map(|f| f.format),
            Some(vk::Format::B8G8R8A8_UNORM)
        );
        assert_eq!(
            choose_surface_format(&formats[..1]).map(|f| f.format),
            Some(vk::Format::B8G8R8A8_SRGB)
        );
        assert!(choose_surface_format(&[]).is_none());
    }

    #[test]
    fn test_vsync_forces_fifo() {
        let modes = [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::FIFO];
        assert_eq!(choose_present_mode(&modes, true), vk::PresentModeKHR::FIFO);
        assert_eq!(
            choose_present_mode(&modes, false),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::FIFO], false),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn test_choose_extent_clamps_when_surface_is_flexible() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 100,
                height: 100,
            },
            max_image_extent: vk::Extent2D {
                width: 2000,
                height: 2000,
            },
            ..Default::default()
        };
        let extent = choose_extent(&capabilities, 3000, 50);
        assert_eq!((extent.width, extent.height), (2000, 100));
    }

    #[test]
    fn test_image_count_respects_surface_limits() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 3,
            ..Default::default()
        };
        assert_eq!(determine_image_count(&capabilities, 2), 2);
        assert_eq!(determine_image_count(&capabilities, 8), 3);

        let unbounded = vk::SurfaceCapabilitiesKHR {
            min_image_count: 3,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(determine_image_count(&unbounded, 2), 3);
    }
}
