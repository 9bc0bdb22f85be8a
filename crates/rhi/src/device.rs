//! Logical device and GPU object factory.
//!
//! [`Device`] owns the `VkDevice`, its queues and the `gpu-allocator` instance.
//! Every other GPU object (queues, command allocators, buffers, descriptor heaps,
//! root signatures) is created through one of its `create_*` methods so that
//! the object keeps an `Arc<Device>` and can never outlive it.
//!
//! # Example
//!
//! ```no_run
//! use tessera_rhi::device::Device;
//! use tessera_rhi::instance::Instance;
//! use tessera_rhi::physical_device::select_physical_device;
//! use tessera_rhi::vk;
//!
//! # fn example(surface: vk::SurfaceKHR) -> Result<(), tessera_rhi::RhiError> {
//! let instance = Instance::new(false, &[])?;
//! let surface_loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());
//! let adapter = select_physical_device(instance.handle(), surface, &surface_loader)?;
//!
//! let device = Device::new(&instance, &adapter)?;
//! let queue = device.create_command_queue(1)?;
//! let mut allocator = device.create_command_allocator(&queue)?;
//! # Ok(())
//! # }
//! ```

use std::ffi::CStr;
use std::mem::ManuallyDrop;
use std::sync::{Arc, Mutex, MutexGuard};

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use tracing::{debug, error, info};

use crate::buffer::{BufferUsage, DeviceBuffer, UploadBuffer};
use crate::command::CommandAllocator;
use crate::command_queue::CommandQueue;
use crate::descriptor_heap::{DescriptorHeap, DescriptorHeapType};
use crate::error::{RhiError, RhiResult};
use crate::instance::Instance;
use crate::physical_device::{PhysicalDeviceInfo, QueueFamilyIndices};
use crate::pipeline::{PushConstantRange, RootSignature};

/// Required device extensions.
const DEVICE_EXTENSIONS: &[&CStr] = &[ash::khr::swapchain::NAME];

/// Vulkan logical device.
///
/// Shared through `Arc`; the allocator sits behind a `Mutex` so buffers can be
/// created and released from any thread.
pub struct Device {
    device: ash::Device,
    physical_device: vk::PhysicalDevice,
    allocator: ManuallyDrop<Mutex<Allocator>>,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    queue_families: QueueFamilyIndices,
    limits: vk::PhysicalDeviceLimits,
}

impl Device {
    /// Create the logical device on the selected adapter.
    ///
    /// Enables timeline semaphores and buffer device addresses (Vulkan 1.2) and
    /// dynamic rendering plus synchronization2 (Vulkan 1.3), then initialises
    /// the memory allocator.
    ///
    /// # Errors
    ///
    /// Returns an error if the adapter reports incomplete queue families,
    /// device creation fails or the allocator cannot be initialised.
    pub fn new(
        instance: &Instance,
        physical_device_info: &PhysicalDeviceInfo,
    ) -> RhiResult<Arc<Self>> {
        let queue_families = physical_device_info.queue_families;
        let (Some(graphics_family), Some(present_family)) =
            (queue_families.graphics_family, queue_families.present_family)
        else {
            return Err(RhiError::NoSuitableGpu);
        };

        let unique_families = queue_families.unique_families();
        let queue_priorities = [1.0f32];
        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
            })
            .collect();

        debug!(
            "Creating {} queue(s) for families {:?}",
            queue_create_infos.len(),
            unique_families
        );

        let mut features_1_2 = vk::PhysicalDeviceVulkan12Features::default()
            .timeline_semaphore(true)
            .buffer_device_address(true);

        let mut features_1_3 = vk::PhysicalDeviceVulkan13Features::default()
            .dynamic_rendering(true)
            .synchronization2(true);

        let extension_names: Vec<*const std::ffi::c_char> =
            DEVICE_EXTENSIONS.iter().map(|ext| ext.as_ptr()).collect();

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_names)
            .push_next(&mut features_1_2)
            .push_next(&mut features_1_3);

        let device = unsafe {
            instance
                .handle()
                .create_device(physical_device_info.device, &create_info, None)?
        };

        info!(
            "Logical device created on '{}'",
            physical_device_info.device_name()
        );

        let graphics_queue = unsafe { device.get_device_queue(graphics_family, 0) };
        let present_queue = unsafe { device.get_device_queue(present_family, 0) };
        debug!("Direct queue from family {graphics_family}, present queue from family {present_family}");

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.handle().clone(),
            device: device.clone(),
            physical_device: physical_device_info.device,
            debug_settings: Default::default(),
            buffer_device_address: true,
            allocation_sizes: Default::default(),
        });
        let allocator = match allocator {
            Ok(allocator) => allocator,
            Err(e) => {
                unsafe { device.destroy_device(None) };
                return Err(e.into());
            }
        };

        debug!("GPU memory allocator initialised");

        Ok(Arc::new(Self {
            device,
            physical_device: physical_device_info.device,
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            graphics_queue,
            present_queue,
            queue_families,
            limits: physical_device_info.properties.limits,
        }))
    }

    #[inline]
    pub fn handle(&self) -> &ash::Device {
        &self.device
    }

    #[inline]
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// The single direct queue all command lists go to.
    #[inline]
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    #[inline]
    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    #[inline]
    pub fn queue_families(&self) -> &QueueFamilyIndices {
        &self.queue_families
    }

    /// Adapter limits captured at device creation.
    #[inline]
    pub fn limits(&self) -> &vk::PhysicalDeviceLimits {
        &self.limits
    }

    /// Lock the memory allocator.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::LockPoisoned`] if a thread panicked while holding it.
    pub fn allocator(&self) -> RhiResult<MutexGuard<'_, Allocator>> {
        self.allocator
            .lock()
            .map_err(|_| RhiError::LockPoisoned("gpu allocator"))
    }

    /// Block until every queue on the device is idle.
    pub fn wait_idle(&self) -> RhiResult<()> {
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }

    /// Create the direct command queue with its fence.
    ///
    /// `initial_fence_value` is the first value the queue signals; it must be
    /// at least 1.
    pub fn create_command_queue(self: &Arc<Self>, initial_fence_value: u64) -> RhiResult<CommandQueue> {
        CommandQueue::new(Arc::clone(self), initial_fence_value)
    }

    /// Create a command allocator whose list submits to `queue`.
    pub fn create_command_allocator(self: &Arc<Self>, queue: &CommandQueue) -> RhiResult<CommandAllocator> {
        CommandAllocator::new(Arc::clone(self), queue.family_index())
    }

    /// Create a CPU-visible buffer. The size is rounded up to 256 bytes.
    pub fn create_upload_buffer(
        self: &Arc<Self>,
        usage: BufferUsage,
        size: u64,
        name: &str,
    ) -> RhiResult<UploadBuffer> {
        UploadBuffer::new(Arc::clone(self), usage, size, name)
    }

    /// Create a GPU-only buffer. The size is rounded up to 256 bytes.
    pub fn create_device_buffer(
        self: &Arc<Self>,
        usage: BufferUsage,
        size: u64,
        name: &str,
    ) -> RhiResult<DeviceBuffer> {
        DeviceBuffer::new(Arc::clone(self), usage, size, name)
    }

    /// Create a descriptor heap of `capacity` slots.
    pub fn create_descriptor_heap(&self, kind: DescriptorHeapType, capacity: u32) -> DescriptorHeap {
        DescriptorHeap::new(kind, capacity)
    }

    /// Create a root signature from push-constant ranges.
    pub fn create_root_signature(
        self: &Arc<Self>,
        ranges: &[PushConstantRange],
    ) -> RhiResult<RootSignature> {
        RootSignature::new(Arc::clone(self), ranges)
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                error!("Failed to wait for device idle during drop: {e}");
            }
        }

        // Allocator memory blocks are freed through the device, so the allocator
        // goes first.
        unsafe { ManuallyDrop::drop(&mut self.allocator) };

        unsafe {
            self.device.destroy_device(None);
        }
        info!("Logical device destroyed");
    }
}

// Safety: the raw handles are plain identifiers, the allocator is only reached
// through its mutex and `ash::Device` is itself Send + Sync.
unsafe impl Send for Device {}
unsafe impl Sync for Device {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_swapchain_extension_required() {
        assert!(DEVICE_EXTENSIONS.contains(&ash::khr::swapchain::NAME));
    }

    #[test]
    fn test_device_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Device>();
    }
}
