//! winit window wrapper and Vulkan surface creation.

use std::ffi::c_char;
use std::sync::Arc;

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle};
use winit::dpi::PhysicalSize;
use winit::event_loop::ActiveEventLoop;
use winit::window::{Window as WinitWindow, WindowAttributes};

use tessera_core::{Error, Result, WindowConfig};

/// Owned `VkSurfaceKHR`, destroyed on drop.
///
/// The instance it was created from must outlive it.
pub struct Surface {
    handle: vk::SurfaceKHR,
    loader: ash::khr::surface::Instance,
}

impl Surface {
    #[inline]
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    #[inline]
    pub fn loader(&self) -> &ash::khr::surface::Instance {
        &self.loader
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        // SAFETY: the handle came from ash_window::create_surface with the
        // instance behind `loader`, and nothing else destroys it.
        unsafe {
            self.loader.destroy_surface(self.handle, None);
        }
        tracing::debug!("Vulkan surface destroyed");
    }
}

/// Application window with its last known client size.
pub struct Window {
    window: Arc<WinitWindow>,
    width: u32,
    height: u32,
    minimized: bool,
}

impl Window {
    pub fn new(event_loop: &ActiveEventLoop, config: &WindowConfig) -> Result<Self> {
        let attrs = WindowAttributes::default()
            .with_title(config.title.clone())
            .with_inner_size(PhysicalSize::new(config.width, config.height))
            .with_resizable(true);

        let window = event_loop
            .create_window(attrs)
            .map_err(|e| Error::Window(e.to_string()))?;

        let size = window.inner_size();
        tracing::info!(
            "Window '{}' created: {}x{}",
            config.title,
            size.width,
            size.height
        );

        Ok(Self {
            window: Arc::new(window),
            width: size.width,
            height: size.height,
            minimized: false,
        })
    }

    pub fn inner(&self) -> &WinitWindow {
        &self.window
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn is_minimized(&self) -> bool {
        self.minimized
    }

    /// Record a new client size. A zero-area size means the window is
    /// minimized; the previous size is kept in that case.
    ///
    /// Returns `(width, height, minimized)` for the renderer.
    pub fn resize(&mut self, width: u32, height: u32) -> (u32, u32, bool) {
        self.minimized = width == 0 || height == 0;
        if !self.minimized {
            self.width = width;
            self.height = height;
        }
        tracing::debug!(
            "Window resized: {width}x{height}{}",
            if self.minimized { " (minimized)" } else { "" }
        );
        (self.width, self.height, self.minimized)
    }

    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }

    /// Raw display handle, used to pick instance extensions.
    pub fn raw_display_handle(&self) -> Result<RawDisplayHandle> {
        self.window
            .display_handle()
            .map(|handle| handle.as_raw())
            .map_err(|e| Error::Window(format!("Failed to get display handle: {e}")))
    }

    /// Create a Vulkan surface for this window.
    pub fn create_surface(&self, entry: &ash::Entry, instance: &ash::Instance) -> Result<Surface> {
        let display_handle = self
            .window
            .display_handle()
            .map_err(|e| Error::Window(format!("Failed to get display handle: {e}")))?;
        let window_handle = self
            .window
            .window_handle()
            .map_err(|e| Error::Window(format!("Failed to get window handle: {e}")))?;

        // SAFETY: both handles come from a live winit window; the surface is
        // destroyed by Surface::drop before the instance goes away.
        let handle = unsafe {
            ash_window::create_surface(
                entry,
                instance,
                display_handle.as_raw(),
                window_handle.as_raw(),
                None,
            )
        }
        .map_err(|e| Error::Surface(format!("Failed to create Vulkan surface: {e}")))?;

        let loader = ash::khr::surface::Instance::new(entry, instance);
        tracing::info!("Vulkan surface created");

        Ok(Surface { handle, loader })
    }
}

/// Instance extensions needed to present to windows on `display`.
///
/// The returned pointers reference static strings owned by `ash_window`.
pub fn required_extensions(display: RawDisplayHandle) -> Result<Vec<*const c_char>> {
    let extensions = ash_window::enumerate_required_extensions(display)
        .map_err(|e| Error::Surface(format!("Failed to enumerate surface extensions: {e}")))?;

    tracing::debug!(
        "Surface extensions: {:?}",
        extensions
            .iter()
            // SAFETY: ash_window returns pointers to static NUL-terminated names.
            .map(|&ext| unsafe { std::ffi::CStr::from_ptr(ext) })
            .collect::<Vec<_>>()
    );

    Ok(extensions.to_vec())
}
