//! Renderer errors.

use thiserror::Error;

use tessera_resources::ResourceError;
use tessera_rhi::RhiError;
use tessera_scene::SceneError;

#[derive(Error, Debug)]
pub enum RenderError {
    /// Window, surface or configuration failure from the platform layer.
    #[error(transparent)]
    Platform(#[from] tessera_core::Error),

    #[error(transparent)]
    Rhi(#[from] RhiError),

    #[error(transparent)]
    Resource(#[from] ResourceError),

    #[error(transparent)]
    Scene(#[from] SceneError),

    /// An operation needed the swap chain before the window created it.
    #[error("No swap chain: {0}")]
    NoSwapChain(&'static str),

    /// The window reported a size the swap chain cannot use.
    #[error("Window error: {0}")]
    Window(String),
}

pub type RenderResult<T> = Result<T, RenderError>;

impl RenderError {
    /// Whether the swap chain no longer matches its surface.
    pub fn is_out_of_date(&self) -> bool {
        matches!(
            self,
            RenderError::Rhi(RhiError::SwapchainOutOfDate)
                | RenderError::Scene(SceneError::Rhi(RhiError::SwapchainOutOfDate))
        )
    }
}
