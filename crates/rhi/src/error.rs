//! RHI error type.

use thiserror::Error;

/// Failures raised by the Vulkan layer.
///
/// Every native call failure is converted into one of these and returned to the
/// caller; the object that raised it stays usable.
#[derive(Error, Debug)]
pub enum RhiError {
    /// Vulkan API error
    #[error("Vulkan error: {0}")]
    VulkanError(#[from] ash::vk::Result),

    /// Failed to load the Vulkan library
    #[error("Failed to load Vulkan: {0}")]
    LoadingError(#[from] ash::LoadingError),

    /// GPU allocator error
    #[error("Allocator error: {0}")]
    AllocatorError(#[from] gpu_allocator::AllocationError),

    /// No adapter satisfies the device requirements
    #[error("No suitable GPU found")]
    NoSuitableGpu,

    /// Shader module creation error
    #[error("Shader error: {0}")]
    ShaderError(String),

    /// Surface query error
    #[error("Surface error: {0}")]
    SurfaceError(String),

    /// Swap chain creation, acquire or present error
    #[error("Swap chain error: {0}")]
    SwapchainError(String),

    /// The presentation engine returned a different number of images than
    /// the configured back buffer count
    #[error("Expected {expected} back buffers, the presentation engine provided {actual}")]
    BackBufferCount { expected: usize, actual: usize },

    /// The swap chain no longer matches the surface and must be rebuilt
    #[error("Swap chain is out of date")]
    SwapchainOutOfDate,

    /// A required object is missing or was already released
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    /// A caller-supplied value is out of range
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Pipeline or root signature creation error
    #[error("Pipeline error: {0}")]
    PipelineError(String),

    /// The descriptor heap cannot satisfy an allocation
    #[error("Not enough free descriptors (requested {requested}, available {available})")]
    DescriptorHeapExhausted { requested: u32, available: u32 },

    /// A mutex guarding device state was poisoned by a panicking thread
    #[error("Lock poisoned: {0}")]
    LockPoisoned(&'static str),
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;
