//! GPU buffers.
//!
//! Two flavours share one allocation path:
//!
//! - [`UploadBuffer`] lives in CPU-visible memory and is written through a
//!   scoped [`BufferRange`] mapping. It is never transitioned.
//! - [`DeviceBuffer`] lives in GPU-only memory, is filled by copies from an
//!   upload buffer and tracks its [`ResourceState`] for barriers.
//!
//! Sizes are always rounded up to 256 bytes, the constant-buffer alignment.

use std::sync::Arc;

use ash::vk;
use bytemuck::Pod;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::{debug, error};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::resource::{BarrierTarget, Resource, ResourceState};

/// Alignment every buffer size is rounded up to.
pub const BUFFER_ALIGNMENT: u64 = 256;

/// Round `size` up to the next multiple of 256.
#[inline]
pub const fn align_to_256(size: u64) -> u64 {
    (size + (BUFFER_ALIGNMENT - 1)) & !(BUFFER_ALIGNMENT - 1)
}

/// What a buffer is bound as.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferUsage {
    /// Vertex data at binding slot 0.
    Vertex,
    /// Per-object constants read by shaders through a device address.
    Constant,
    /// Copy source only.
    Staging,
}

impl BufferUsage {
    /// Usage flags for a buffer in `location`.
    ///
    /// CPU-visible buffers can always be copied from; GPU-only buffers can
    /// always be copied to.
    pub fn to_vk_usage(self, location: MemoryLocation) -> vk::BufferUsageFlags {
        let base = match self {
            BufferUsage::Vertex => vk::BufferUsageFlags::VERTEX_BUFFER,
            BufferUsage::Constant => {
                vk::BufferUsageFlags::UNIFORM_BUFFER
                    | vk::BufferUsageFlags::STORAGE_BUFFER
                    | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS
            }
            BufferUsage::Staging => vk::BufferUsageFlags::empty(),
        };
        let transfer = match location {
            MemoryLocation::GpuOnly => vk::BufferUsageFlags::TRANSFER_DST,
            _ => vk::BufferUsageFlags::TRANSFER_SRC,
        };
        base | transfer
    }

    pub fn name(self) -> &'static str {
        match self {
            BufferUsage::Vertex => "vertex",
            BufferUsage::Constant => "constant",
            BufferUsage::Staging => "staging",
        }
    }
}

/// Buffer handle plus allocation. Shared by both public buffer types.
struct RawBuffer {
    device: Arc<Device>,
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    size: u64,
    usage: BufferUsage,
    name: String,
}

impl RawBuffer {
    fn new(
        device: Arc<Device>,
        usage: BufferUsage,
        location: MemoryLocation,
        requested: u64,
        name: &str,
    ) -> RhiResult<Self> {
        if requested == 0 {
            return Err(RhiError::InvalidArgument(format!(
                "buffer '{name}' must not be empty"
            )));
        }
        let size = align_to_256(requested);

        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage.to_vk_usage(location))
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { device.handle().create_buffer(&buffer_info, None)? };
        let requirements = unsafe { device.handle().get_buffer_memory_requirements(buffer) };

        let allocation = device.allocator().and_then(|mut allocator| {
            allocator
                .allocate(&AllocationCreateDesc {
                    name,
                    requirements,
                    location,
                    linear: true,
                    allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                })
                .map_err(RhiError::from)
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                error!("Failed to allocate {size} bytes for buffer '{name}': {e}");
                unsafe { device.handle().destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        let bound = unsafe {
            device
                .handle()
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        };

        let raw = Self {
            device,
            buffer,
            allocation: Some(allocation),
            size,
            usage,
            name: name.to_string(),
        };
        bound?;

        debug!(
            "Created {} buffer '{}' ({} bytes, requested {}, {:?})",
            usage.name(),
            name,
            size,
            requested,
            location
        );
        Ok(raw)
    }

    fn mapped_slice_mut(&mut self) -> RhiResult<&mut [u8]> {
        let name = &self.name;
        self.allocation
            .as_mut()
            .and_then(|allocation| allocation.mapped_slice_mut())
            .ok_or_else(|| RhiError::InvalidHandle(format!("buffer '{name}' is not CPU-visible")))
    }

    fn device_address(&self) -> u64 {
        let info = vk::BufferDeviceAddressInfo::default().buffer(self.buffer);
        unsafe { self.device.handle().get_buffer_device_address(&info) }
    }
}

impl Drop for RawBuffer {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            match self.device.allocator() {
                Ok(mut allocator) => {
                    if let Err(e) = allocator.free(allocation) {
                        error!("Failed to free buffer '{}': {e}", self.name);
                    }
                }
                Err(e) => error!("Leaking buffer '{}' memory: {e}", self.name),
            }
        }

        unsafe {
            self.device.handle().destroy_buffer(self.buffer, None);
        }
        debug!("Destroyed {} buffer '{}'", self.usage.name(), self.name);
    }
}

/// CPU-visible buffer.
pub struct UploadBuffer {
    raw: RawBuffer,
}

impl UploadBuffer {
    pub fn new(device: Arc<Device>, usage: BufferUsage, size: u64, name: &str) -> RhiResult<Self> {
        RawBuffer::new(device, usage, MemoryLocation::CpuToGpu, size, name).map(|raw| Self { raw })
    }

    /// Create a buffer big enough for `data` and copy it in.
    pub fn with_data(device: Arc<Device>, usage: BufferUsage, data: &[u8], name: &str) -> RhiResult<Self> {
        let mut buffer = Self::new(device, usage, data.len() as u64, name)?;
        buffer.map()?.write(0, data)?;
        Ok(buffer)
    }

    /// Map the whole buffer for writing. The mapping ends when the returned
    /// range is dropped.
    pub fn map(&mut self) -> RhiResult<BufferRange<'_>> {
        let name = self.raw.name.as_str().to_owned();
        let bytes = self.raw.mapped_slice_mut()?;
        Ok(BufferRange { bytes, name })
    }

    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.raw.buffer
    }

    /// Aligned size in bytes.
    #[inline]
    pub fn size(&self) -> u64 {
        self.raw.size
    }

    #[inline]
    pub fn usage(&self) -> BufferUsage {
        self.raw.usage
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.raw.name
    }
}

/// Scoped CPU write access to an [`UploadBuffer`].
pub struct BufferRange<'a> {
    bytes: &'a mut [u8],
    name: String,
}

impl BufferRange<'_> {
    /// Copy `data` to `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidArgument`] if the write runs past the end.
    pub fn write(&mut self, offset: usize, data: &[u8]) -> RhiResult<()> {
        let end = offset
            .checked_add(data.len())
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| {
                RhiError::InvalidArgument(format!(
                    "write of {} bytes at offset {} overflows buffer '{}' ({} bytes)",
                    data.len(),
                    offset,
                    self.name,
                    self.bytes.len()
                ))
            })?;
        self.bytes[offset..end].copy_from_slice(data);
        Ok(())
    }

    /// Copy a plain-old-data value to `offset`.
    pub fn write_pod<T: Pod>(&mut self, offset: usize, value: &T) -> RhiResult<()> {
        self.write(offset, bytemuck::bytes_of(value))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// GPU-only buffer with a tracked state.
pub struct DeviceBuffer {
    raw: RawBuffer,
    state: ResourceState,
}

impl DeviceBuffer {
    /// Created in [`ResourceState::Common`].
    pub fn new(device: Arc<Device>, usage: BufferUsage, size: u64, name: &str) -> RhiResult<Self> {
        RawBuffer::new(device, usage, MemoryLocation::GpuOnly, size, name).map(|raw| Self {
            raw,
            state: ResourceState::Common,
        })
    }

    /// Address shaders use to reach the buffer. Only meaningful for
    /// [`BufferUsage::Constant`] buffers.
    pub fn device_address(&self) -> u64 {
        self.raw.device_address()
    }

    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.raw.buffer
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.raw.size
    }

    #[inline]
    pub fn usage(&self) -> BufferUsage {
        self.raw.usage
    }
}

impl Resource for DeviceBuffer {
    fn current_state(&self) -> ResourceState {
        self.state
    }

    fn set_state(&mut self, state: ResourceState) {
        self.state = state;
    }

    fn barrier_target(&self) -> BarrierTarget {
        BarrierTarget::Buffer(self.raw.buffer)
    }

    fn name(&self) -> &str {
        &self.raw.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alignment_for_all_small_sizes() {
        for n in 1..=10_000u64 {
            let aligned = align_to_256(n);
            assert_eq!(aligned, (n + 255) & !255);
            assert!(aligned >= n);
            assert_eq!(aligned % 256, 0);
            assert!(aligned - n < 256);
        }
    }

    #[test]
    fn test_alignment_edges() {
        assert_eq!(align_to_256(0), 0);
        assert_eq!(align_to_256(1), 256);
        assert_eq!(align_to_256(256), 256);
        assert_eq!(align_to_256(257), 512);
        assert_eq!(align_to_256(64), 256);
    }

    #[test]
    fn test_constant_buffers_are_addressable() {
        let flags = BufferUsage::Constant.to_vk_usage(MemoryLocation::GpuOnly);
        assert!(flags.contains(vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS));
        assert!(flags.contains(vk::BufferUsageFlags::TRANSFER_DST));
        assert!(!flags.contains(vk::BufferUsageFlags::TRANSFER_SRC));
    }

    #[test]
    fn test_upload_buffers_are_copy_sources() {
        let flags = BufferUsage::Constant.to_vk_usage(MemoryLocation::CpuToGpu);
        assert!(flags.contains(vk::BufferUsageFlags::TRANSFER_SRC));
        assert_eq!(
            BufferUsage::Staging.to_vk_usage(MemoryLocation::CpuToGpu),
            vk::BufferUsageFlags::TRANSFER_SRC
        );
        assert!(
            BufferUsage::Vertex
                .to_vk_usage(MemoryLocation::CpuToGpu)
                .contains(vk::BufferUsageFlags::VERTEX_BUFFER)
        );
    }

    #[test]
    fn test_range_rejects_overflowing_writes() {
        let mut storage = [0u8; 16];
        let mut range = BufferRange {
            bytes: &mut storage,
            name: "test".to_string(),
        };

        range.write(12, &[1, 2, 3, 4]).unwrap();
        assert!(matches!(
            range.write(13, &[1, 2, 3, 4]),
            Err(RhiError::InvalidArgument(_))
        ));
        assert!(range.write(usize::MAX, &[1]).is_err());
        range.write_pod(0, &1.0f32).unwrap();
        drop(range);

        assert_eq!(&storage[12..], &[1, 2, 3, 4]);
        assert_eq!(&storage[..4], &1.0f32.to_ne_bytes());
    }
}
