//! Swap chain back buffer wrapper.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::descriptor_heap::{DescriptorHandle, DescriptorHeap};
use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::resource::{BarrierTarget, Resource, ResourceState};

/// Everything a command list needs to render into a color target.
#[derive(Clone, Copy, Debug)]
pub struct RenderTargetView {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub extent: vk::Extent2D,
    pub format: vk::Format,
}

/// A presentable color image with its render-target view.
///
/// The image itself belongs to the swap chain; this wrapper owns the view and
/// the tracked state. Its view is registered in the render-target descriptor
/// heap slot given at creation.
pub struct ColorBuffer {
    device: Arc<Device>,
    image: vk::Image,
    view: vk::ImageView,
    format: vk::Format,
    extent: vk::Extent2D,
    state: ResourceState,
    rtv: DescriptorHandle,
    name: String,
}

impl ColorBuffer {
    /// Wrap a swap chain image and write its view into `rtv`.
    ///
    /// The buffer starts in [`ResourceState::Undefined`].
    pub fn from_swap_chain_image(
        device: Arc<Device>,
        image: vk::Image,
        format: vk::Format,
        extent: vk::Extent2D,
        heap: &mut DescriptorHeap,
        rtv: DescriptorHandle,
    ) -> RhiResult<Self> {
        let create_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .components(vk::ComponentMapping::default())
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .level_count(1)
                    .layer_count(1),
            );

        let view = unsafe { device.handle().create_image_view(&create_info, None) }.map_err(
            |e| RhiError::SwapchainError(format!("failed to create back buffer view: {e}")),
        )?;

        if let Err(e) = heap.write_render_target_view(rtv, view) {
            unsafe { device.handle().destroy_image_view(view, None) };
            return Err(e);
        }

        let name = format!("back buffer {}", rtv.index());
        debug!("Created {name} ({}x{})", extent.width, extent.height);

        Ok(Self {
            device,
            image,
            view,
            format,
            extent,
            state: ResourceState::Undefined,
            rtv,
            name,
        })
    }

    pub fn render_target(&self) -> RenderTargetView {
        RenderTargetView {
            image: self.image,
            view: self.view,
            extent: self.extent,
            format: self.format,
        }
    }

    /// Heap slot holding this buffer's view.
    #[inline]
    pub fn rtv_handle(&self) -> DescriptorHandle {
        self.rtv
    }

    #[inline]
    pub fn image(&self) -> vk::Image {
        self.image
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

impl Resource for ColorBuffer {
    fn current_state(&self) -> ResourceState {
        self.state
    }

    fn set_state(&mut self, state: ResourceState) {
        self.state = state;
    }

    fn barrier_target(&self) -> BarrierTarget {
        BarrierTarget::Image(self.image)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for ColorBuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_image_view(self.view, None);
        }
        debug!("Released {}", self.name);
    }
}
