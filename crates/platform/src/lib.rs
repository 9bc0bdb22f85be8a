//! Platform glue: the winit window, its Vulkan surface and the instance
//! extensions presenting to it requires.

mod window;

pub use window::{Surface, Window, required_extensions};

pub use winit::event::WindowEvent;
pub use winit::event_loop::{ActiveEventLoop, EventLoop};
