//! Vulkan render hardware interface.
//!
//! Wraps `ash` into the handful of objects the renderer works with:
//! - [`device::Device`], the factory for every other GPU object
//! - [`command_queue::CommandQueue`] with its timeline fence
//! - [`command::CommandAllocator`] and scoped command lists
//! - buffers and back buffers with tracked resource states
//! - the render-target descriptor heap and the swap chain
//! - shaders, root signatures and pipeline state objects

mod error;

pub mod buffer;
pub mod color_buffer;
pub mod command;
pub mod command_queue;
pub mod descriptor_heap;
pub mod device;
pub mod instance;
pub mod physical_device;
pub mod pipeline;
pub mod resource;
pub mod shader;
pub mod swapchain;

pub use error::{RhiError, RhiResult};

pub use ash::vk;
