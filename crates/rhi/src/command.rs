//! Command allocators and scoped command lists.
//!
//! A [`CommandAllocator`] owns one command pool with a single primary command
//! buffer. [`CommandAllocator::begin_list`] resets the pool and hands out a
//! [`CommandList`] that borrows the allocator for as long as it records, so an
//! allocator can never back two lists at once.
//!
//! A list is finalized exactly once: either explicitly through
//! [`CommandList::submit`], or on drop, which executes the list and blocks
//! until the GPU has finished it. [`FrameCommandList`] additionally brackets
//! the recorded work with the swap chain's begin and end frame barriers. A
//! frame whose begin or end barrier cannot be recorded is abandoned without
//! executing anything.
//!
//! # Example
//!
//! ```no_run
//! # use tessera_rhi::command::CommandAllocator;
//! # use tessera_rhi::command_queue::CommandQueue;
//! # fn example(allocator: &mut CommandAllocator, queue: &CommandQueue) -> tessera_rhi::RhiResult<()> {
//! let list = allocator.begin_list(queue)?;
//! // ... record copies and barriers ...
//! let fence_value = list.submit()?;
//! assert!(queue.completed_fence_value()? >= fence_value);
//! # Ok(())
//! # }
//! ```

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use ash::vk;
use tracing::{debug, error, trace, warn};

use crate::buffer::{DeviceBuffer, UploadBuffer};
use crate::color_buffer::RenderTargetView;
use crate::command_queue::CommandQueue;
use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::pipeline::{PipelineState, PushConstantRange, RootSignature};
use crate::resource::{BarrierRecorder, Resource, ResourceState, TransitionBarrier, transition_resource};
use crate::swapchain::SwapChain;

/// Command pool plus the one command buffer recorded from it.
pub struct CommandAllocator {
    device: Arc<Device>,
    pool: vk::CommandPool,
    buffer: vk::CommandBuffer,
    family_index: u32,
}

impl CommandAllocator {
    /// Create a pool for `family_index` and allocate its command buffer.
    pub fn new(device: Arc<Device>, family_index: u32) -> RhiResult<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(family_index)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);

        let pool = unsafe { device.handle().create_command_pool(&create_info, None)? };

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let buffer = match unsafe { device.handle().allocate_command_buffers(&alloc_info) } {
            Ok(buffers) => buffers.into_iter().next(),
            Err(e) => {
                unsafe { device.handle().destroy_command_pool(pool, None) };
                error!("Failed to allocate command buffer: {e}");
                return Err(e.into());
            }
        };
        let Some(buffer) = buffer else {
            unsafe { device.handle().destroy_command_pool(pool, None) };
            return Err(RhiError::InvalidHandle(
                "command buffer allocation returned nothing".to_string(),
            ));
        };

        debug!("Command allocator created for queue family {family_index}");

        Ok(Self {
            device,
            pool,
            buffer,
            family_index,
        })
    }

    /// Reset the pool and start recording a new list for `queue`.
    ///
    /// The returned list keeps this allocator borrowed until it is submitted
    /// or dropped. Every list is waited on before it releases the borrow, so
    /// the reset here never races the GPU.
    ///
    /// # Errors
    ///
    /// [`RhiError::InvalidArgument`] if `queue` belongs to another queue
    /// family; Vulkan errors from the reset or begin calls.
    pub fn begin_list<'a>(&'a mut self, queue: &'a CommandQueue) -> RhiResult<CommandList<'a>> {
        if queue.family_index() != self.family_index {
            error!(
                "Command allocator for family {} used with a family {} queue",
                self.family_index,
                queue.family_index()
            );
            return Err(RhiError::InvalidArgument(format!(
                "allocator family {} does not match queue family {}",
                self.family_index,
                queue.family_index()
            )));
        }

        let this: &'a Self = self;
        let device = this.device.handle();
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        unsafe {
            device.reset_command_pool(this.pool, vk::CommandPoolResetFlags::empty())?;
            device.begin_command_buffer(this.buffer, &begin_info)?;
        }
        trace!("Command list recording started");

        Ok(CommandList {
            device: &this.device,
            queue,
            cmd: this.buffer,
            render_target: None,
            rendering: false,
            layout: vk::PipelineLayout::null(),
            push_ranges: Vec::new(),
            finalized: false,
        })
    }

    #[inline]
    pub fn family_index(&self) -> u32 {
        self.family_index
    }
}

impl Drop for CommandAllocator {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_command_pool(self.pool, None);
        }
        debug!(
            "Command allocator destroyed for queue family {}",
            self.family_index
        );
    }
}

/// A command buffer in the recording state.
///
/// Copies and barriers are recorded outside any rendering scope. Clearing a
/// render target opens and closes a scope immediately; the first draw after
/// that opens a scope that loads the bound target and stays open until the
/// next copy, barrier or [`CommandList::end_rendering`].
pub struct CommandList<'a> {
    device: &'a Device,
    queue: &'a CommandQueue,
    cmd: vk::CommandBuffer,
    render_target: Option<RenderTargetView>,
    rendering: bool,
    layout: vk::PipelineLayout,
    push_ranges: Vec<PushConstantRange>,
    finalized: bool,
}

impl<'a> CommandList<'a> {
    /// Raw command buffer handle.
    #[inline]
    pub fn handle(&self) -> vk::CommandBuffer {
        self.cmd
    }

    /// Queue this list will be executed on.
    #[inline]
    pub fn queue(&self) -> &'a CommandQueue {
        self.queue
    }

    /// Move `resource` into `state`, recording a barrier only when the
    /// tracked state differs. Returns whether a barrier was recorded.
    pub fn transition<T: Resource + ?Sized>(&mut self, resource: &mut T, state: ResourceState) -> bool {
        transition_resource(self, resource, state)
    }

    /// Copy the first `size` bytes of `src` into `dst`.
    ///
    /// `dst` should be in [`ResourceState::CopyDest`].
    pub fn copy_buffer(&mut self, src: &UploadBuffer, dst: &DeviceBuffer, size: u64) -> RhiResult<()> {
        if size > src.size() || size > dst.size() {
            error!(
                "Copy of {size} bytes from '{}' ({} bytes) into a {} byte buffer",
                src.name(),
                src.size(),
                dst.size()
            );
            return Err(RhiError::InvalidArgument(format!(
                "copy of {size} bytes exceeds buffer bounds"
            )));
        }
        if dst.current_state() != ResourceState::CopyDest {
            warn!(
                "Copy into '{}' while it is in {:?}",
                dst.name(),
                dst.current_state()
            );
        }

        self.end_rendering();
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size,
        };
        unsafe {
            self.device
                .handle()
                .cmd_copy_buffer(self.cmd, src.handle(), dst.handle(), &[region]);
        }
        Ok(())
    }

    /// Clear `target` to `color`.
    ///
    /// The target must already be in [`ResourceState::RenderTarget`].
    pub fn clear_render_target(&mut self, target: &RenderTargetView, color: [f32; 4]) {
        self.end_rendering();
        self.begin_scope(target, vk::AttachmentLoadOp::CLEAR, color);
        self.end_rendering();
    }

    /// Bind `target` for subsequent draws.
    pub fn set_render_target(&mut self, target: RenderTargetView) {
        self.end_rendering();
        self.render_target = Some(target);
    }

    pub fn set_pipeline_state(&mut self, pipeline: &PipelineState) {
        unsafe {
            self.device.handle().cmd_bind_pipeline(
                self.cmd,
                vk::PipelineBindPoint::GRAPHICS,
                pipeline.handle(),
            );
        }
    }

    /// Bind the layout used by [`CommandList::push_constants`].
    pub fn set_root_signature(&mut self, signature: &RootSignature) {
        self.layout = signature.handle();
        self.push_ranges = signature.ranges().to_vec();
    }

    /// Write `bytes` into the push-constant block at `offset`.
    ///
    /// The stages written are those of every range of the bound root
    /// signature that overlaps the written bytes.
    pub fn push_constants(&mut self, offset: u32, bytes: &[u8]) -> RhiResult<()> {
        if self.layout == vk::PipelineLayout::null() {
            error!("push_constants called without a root signature");
            return Err(RhiError::InvalidHandle("no root signature bound".to_string()));
        }

        let end = offset as u64 + bytes.len() as u64;
        let stages = self
            .push_ranges
            .iter()
            .filter(|range| u64::from(range.offset) < end && offset < range.end())
            .fold(vk::ShaderStageFlags::empty(), |stages, range| {
                stages | range.visibility.stage_flags()
            });
        let covered = self
            .push_ranges
            .iter()
            .any(|range| range.offset <= offset && end <= u64::from(range.end()));

        if stages.is_empty() || !covered {
            error!(
                "Push constant write [{offset}, {end}) is outside the bound root signature"
            );
            return Err(RhiError::InvalidArgument(format!(
                "push constant write at {offset} of {} bytes is not covered by a range",
                bytes.len()
            )));
        }

        unsafe {
            self.device
                .handle()
                .cmd_push_constants(self.cmd, self.layout, stages, offset, bytes);
        }
        Ok(())
    }

    /// Bind a position-only vertex buffer at slot 0.
    pub fn set_vertex_buffer(&mut self, buffer: &UploadBuffer) {
        unsafe {
            self.device
                .handle()
                .cmd_bind_vertex_buffers(self.cmd, 0, &[buffer.handle()], &[0]);
        }
    }

    /// Draw `vertex_count` vertices into the bound render target.
    ///
    /// # Errors
    ///
    /// [`RhiError::InvalidHandle`] when no render target is bound.
    pub fn draw(&mut self, vertex_count: u32) -> RhiResult<()> {
        if !self.rendering {
            let Some(target) = self.render_target else {
                error!("draw called without a render target");
                return Err(RhiError::InvalidHandle("no render target bound".to_string()));
            };
            self.begin_scope(&target, vk::AttachmentLoadOp::LOAD, [0.0; 4]);

            let viewport = flipped_viewport(target.extent);
            let scissor = vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent: target.extent,
            };
            unsafe {
                self.device.handle().cmd_set_viewport(self.cmd, 0, &[viewport]);
                self.device.handle().cmd_set_scissor(self.cmd, 0, &[scissor]);
            }
        }

        unsafe {
            self.device.handle().cmd_draw(self.cmd, vertex_count, 1, 0, 0);
        }
        Ok(())
    }

    /// Close the open rendering scope, if any.
    pub fn end_rendering(&mut self) {
        if self.rendering {
            unsafe { self.device.handle().cmd_end_rendering(self.cmd) };
            self.rendering = false;
        }
    }

    /// Execute the list and block until the GPU has finished it.
    ///
    /// Returns the fence value the submission signalled.
    pub fn submit(mut self) -> RhiResult<u64> {
        self.finish()
    }

    /// Close the list without executing it.
    pub fn discard(mut self) {
        self.close_unexecuted();
    }

    /// Push-constant ranges of the bound root signature.
    #[inline]
    pub fn push_constant_ranges(&self) -> &[PushConstantRange] {
        &self.push_ranges
    }

    fn finish(&mut self) -> RhiResult<u64> {
        if self.finalized {
            return Err(RhiError::InvalidHandle(
                "command list already finalized".to_string(),
            ));
        }
        self.finalized = true;
        self.end_rendering();

        let value = self.queue.execute(self.cmd)?;
        self.queue.wait_for_fence_value(value)?;
        trace!("Command list completed at fence value {value}");
        Ok(value)
    }

    fn close_unexecuted(&mut self) {
        if self.finalized {
            return;
        }
        self.finalized = true;
        self.end_rendering();
        if let Err(e) = unsafe { self.device.handle().end_command_buffer(self.cmd) } {
            warn!("Failed to close discarded command list: {e}");
        }
        debug!("Command list discarded without execution");
    }

    fn begin_scope(&mut self, target: &RenderTargetView, load_op: vk::AttachmentLoadOp, clear: [f32; 4]) {
        let attachments = [vk::RenderingAttachmentInfo::default()
            .image_view(target.view)
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(load_op)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue {
                color: vk::ClearColorValue { float32: clear },
            })];

        let rendering_info = vk::RenderingInfo::default()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent: target.extent,
            })
            .layer_count(1)
            .color_attachments(&attachments);

        unsafe {
            self.device
                .handle()
                .cmd_begin_rendering(self.cmd, &rendering_info);
        }
        self.rendering = true;
    }
}

impl BarrierRecorder for CommandList<'_> {
    fn record_barrier(&mut self, barrier: &TransitionBarrier) {
        self.end_rendering();
        unsafe { barrier.record(self.device.handle(), self.cmd) };
    }
}

impl Drop for CommandList<'_> {
    fn drop(&mut self) {
        if self.finalized {
            return;
        }
        if let Err(e) = self.finish() {
            error!("Command list failed to execute on drop: {e}");
        }
    }
}

impl Recording for CommandList<'_> {
    fn execute(&mut self) -> RhiResult<u64> {
        self.finish()
    }

    fn abandon(&mut self) {
        self.close_unexecuted();
    }
}

/// How a recorded list is finalized.
pub trait Recording {
    /// Execute and block until finished. Returns the signalled fence value.
    fn execute(&mut self) -> RhiResult<u64>;

    /// Close without executing.
    fn abandon(&mut self);
}

/// Begin and end-of-frame barriers around a recorded list.
pub trait FrameTarget<L> {
    /// Prepare the next back buffer for rendering and return its index.
    fn begin_frame(&mut self, list: &mut L) -> RhiResult<u32>;

    /// Move the frame's back buffer back to present state.
    fn end_frame(&mut self, list: &mut L) -> RhiResult<()>;

    /// Forget a frame whose list will never execute.
    fn abort_frame(&mut self);
}

impl<'a> FrameTarget<CommandList<'a>> for SwapChain {
    fn begin_frame(&mut self, list: &mut CommandList<'a>) -> RhiResult<u32> {
        SwapChain::begin_frame(self, list)
    }

    fn end_frame(&mut self, list: &mut CommandList<'a>) -> RhiResult<()> {
        SwapChain::end_frame(self, list)
    }

    fn abort_frame(&mut self) {
        SwapChain::abort_frame(self);
    }
}

/// A list bracketed by a target's frame barriers.
///
/// Opening the frame records the begin barrier. Submitting (or dropping)
/// records the end barrier, then executes and waits. The frame is finalized
/// exactly once; a failed barrier or [`Frame::discard`] abandons the list.
pub struct Frame<'a, L, S>
where
    L: Recording,
    S: FrameTarget<L> + ?Sized,
{
    list: L,
    target: &'a mut S,
    back_buffer: u32,
    finalized: bool,
}

/// A frame recorded into a [`CommandList`] for a [`SwapChain`].
pub type FrameCommandList<'a> = Frame<'a, CommandList<'a>, SwapChain>;

impl<'a> Frame<'a, CommandList<'a>, SwapChain> {
    /// Start a list on `allocator` and begin a frame on `swap_chain`.
    ///
    /// # Errors
    ///
    /// Fails if the list cannot be started or the swap chain cannot begin a
    /// frame; nothing is executed in either case.
    pub fn new(
        allocator: &'a mut CommandAllocator,
        queue: &'a CommandQueue,
        swap_chain: &'a mut SwapChain,
    ) -> RhiResult<Self> {
        let list = allocator.begin_list(queue)?;
        Self::begin(list, swap_chain)
    }
}

impl<'a, L, S> Frame<'a, L, S>
where
    L: Recording,
    S: FrameTarget<L> + ?Sized,
{
    /// Record `target`'s begin barrier into `list`.
    ///
    /// On failure the list is abandoned unexecuted and the error returned.
    pub fn begin(mut list: L, target: &'a mut S) -> RhiResult<Self> {
        let back_buffer = match target.begin_frame(&mut list) {
            Ok(index) => index,
            Err(e) => {
                error!("Frame could not be started: {e}");
                list.abandon();
                target.abort_frame();
                return Err(e);
            }
        };

        Ok(Self {
            list,
            target,
            back_buffer,
            finalized: false,
        })
    }

    /// Index of the back buffer being rendered.
    #[inline]
    pub fn back_buffer_index(&self) -> u32 {
        self.back_buffer
    }

    /// Record the end-of-frame barrier, execute and wait.
    pub fn submit(mut self) -> RhiResult<u64> {
        self.close()
    }

    /// Run `record` on the list, then submit.
    ///
    /// When `record` fails nothing is executed: the frame is discarded and the
    /// recording error returned. Returns the recorded value and the fence
    /// value of the submission.
    pub fn record_and_submit<T, E, F>(mut self, record: F) -> Result<(T, u64), E>
    where
        F: FnOnce(&mut L) -> Result<T, E>,
        E: From<RhiError>,
    {
        match record(&mut self.list) {
            Ok(value) => {
                let fence_value = self.close()?;
                Ok((value, fence_value))
            }
            Err(e) => {
                self.discard();
                Err(e)
            }
        }
    }

    /// Abandon the frame without executing anything.
    pub fn discard(mut self) {
        self.finalized = true;
        self.list.abandon();
        self.target.abort_frame();
        warn!("Frame on back buffer {} discarded", self.back_buffer);
    }

    fn close(&mut self) -> RhiResult<u64> {
        self.finalized = true;
        if let Err(e) = self.target.end_frame(&mut self.list) {
            error!("Frame could not be closed: {e}");
            self.list.abandon();
            self.target.abort_frame();
            return Err(e);
        }
        self.list.execute()
    }
}

impl<L, S> Deref for Frame<'_, L, S>
where
    L: Recording,
    S: FrameTarget<L> + ?Sized,
{
    type Target = L;

    fn deref(&self) -> &Self::Target {
        &self.list
    }
}

impl<L, S> DerefMut for Frame<'_, L, S>
where
    L: Recording,
    S: FrameTarget<L> + ?Sized,
{
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.list
    }
}

impl<L, S> Drop for Frame<'_, L, S>
where
    L: Recording,
    S: FrameTarget<L> + ?Sized,
{
    fn drop(&mut self) {
        if self.finalized {
            return;
        }
        if let Err(e) = self.close() {
            error!("Frame failed on drop: {e}");
        }
    }
}

/// Viewport covering `extent` with the y axis pointing up.
pub fn flipped_viewport(extent: vk::Extent2D) -> vk::Viewport {
    let height = extent.height as f32;
    vk::Viewport {
        x: 0.0,
        y: height,
        width: extent.width as f32,
        height: -height,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}
