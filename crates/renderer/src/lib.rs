//! Frame loop tying the graphics context, the scene and its materials
//! together.

mod context;
mod error;
mod renderer;
mod requests;

pub use context::GraphicsContext;
pub use error::{RenderError, RenderResult};
pub use renderer::Renderer;
pub use requests::{SwapChainAction, WindowRequests};
