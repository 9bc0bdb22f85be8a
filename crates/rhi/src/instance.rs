//! Vulkan instance creation.
//!
//! The instance is created with the surface extensions the windowing layer asks
//! for and, when requested and installed, the Khronos validation layer. Validation
//! messages are routed into `tracing`.

use std::ffi::{CStr, c_char};

use ash::{Entry, vk};
use tracing::{debug, error, info, warn};

use crate::error::RhiError;

/// The Khronos validation layer name.
const VALIDATION_LAYER_NAME: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Vulkan instance plus the optional debug messenger.
pub struct Instance {
    entry: Entry,
    instance: ash::Instance,
    messenger: Option<Messenger>,
}

/// Debug-utils loader and the messenger it created.
struct Messenger {
    loader: ash::ext::debug_utils::Instance,
    handle: vk::DebugUtilsMessengerEXT,
}

impl Messenger {
    fn install(entry: &Entry, instance: &ash::Instance) -> Result<Self, RhiError> {
        let loader = ash::ext::debug_utils::Instance::new(entry, instance);
        let severity = vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
            | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR;
        let kinds = vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE;
        let info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(severity)
            .message_type(kinds)
            .pfn_user_callback(Some(forward_to_tracing));

        let handle = unsafe { loader.create_debug_utils_messenger(&info, None)? };
        debug!("Debug messenger installed");
        Ok(Self { loader, handle })
    }

    /// # Safety
    ///
    /// The owning instance must still be alive.
    unsafe fn destroy(&self) {
        unsafe { self.loader.destroy_debug_utils_messenger(self.handle, None) };
    }
}

impl Instance {
    /// Load Vulkan and create an instance targeting API 1.3.
    ///
    /// # Arguments
    ///
    /// * `enable_validation` - Request the validation layer; silently skipped when
    ///   the layer is not installed.
    /// * `surface_extensions` - Instance extensions needed to create a surface for
    ///   the host window, as reported by the windowing layer.
    ///
    /// # Errors
    ///
    /// Returns an error if the loader is missing or instance creation fails.
    pub fn new(
        enable_validation: bool,
        surface_extensions: &[*const c_char],
    ) -> Result<Self, RhiError> {
        let entry = unsafe { Entry::load()? };

        let validation = enable_validation && has_layer(&entry, VALIDATION_LAYER_NAME)?;
        if enable_validation && !validation {
            warn!("Validation layer requested but not installed, continuing without it");
        }

        let version = vk::make_api_version(0, 0, 1, 0);
        let app_info = vk::ApplicationInfo::default()
            .application_name(c"tessera")
            .application_version(version)
            .engine_name(c"tessera")
            .engine_version(version)
            .api_version(vk::API_VERSION_1_3);

        let mut extensions = surface_extensions.to_vec();
        let mut layers = Vec::new();
        if validation {
            extensions.push(ash::ext::debug_utils::NAME.as_ptr());
            layers.push(VALIDATION_LAYER_NAME.as_ptr());
        }

        let instance = unsafe {
            entry.create_instance(
                &vk::InstanceCreateInfo::default()
                    .application_info(&app_info)
                    .enabled_extension_names(&extensions)
                    .enabled_layer_names(&layers),
                None,
            )?
        };
        info!(
            "Vulkan 1.3 instance up with {} extension(s), validation {}",
            extensions.len(),
            if validation { "on" } else { "off" }
        );

        let messenger = if validation {
            match Messenger::install(&entry, &instance) {
                Ok(messenger) => Some(messenger),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        Ok(Self {
            entry,
            instance,
            messenger,
        })
    }

    #[inline]
    pub fn handle(&self) -> &ash::Instance {
        &self.instance
    }

    #[inline]
    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    /// Whether validation messages are being forwarded.
    #[inline]
    pub fn has_validation(&self) -> bool {
        self.messenger.is_some()
    }
}

fn has_layer(entry: &Entry, wanted: &CStr) -> Result<bool, RhiError> {
    let layers = unsafe { entry.enumerate_instance_layer_properties()? };
    Ok(layers
        .iter()
        .any(|layer| layer.layer_name_as_c_str().is_ok_and(|name| name == wanted)))
}

impl Drop for Instance {
    fn drop(&mut self) {
        if let Some(messenger) = self.messenger.take() {
            unsafe { messenger.destroy() };
        }
        unsafe { self.instance.destroy_instance(None) };
        debug!("Vulkan instance destroyed");
    }
}

/// Forwards validation layer messages to `tracing`.
unsafe extern "system" fn forward_to_tracing(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() {
        return vk::FALSE;
    }

    let callback_data = unsafe { &*p_callback_data };
    let message = if callback_data.p_message.is_null() {
        std::borrow::Cow::Borrowed("(no message)")
    } else {
        unsafe { CStr::from_ptr(callback_data.p_message).to_string_lossy() }
    };

    let kind = match message_type {
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => "validation",
        vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "performance",
        _ => "general",
    };

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => error!(target: "tessera::vulkan", "[{kind}] {message}"),
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => warn!(target: "tessera::vulkan", "[{kind}] {message}"),
        _ => debug!(target: "tessera::vulkan", "[{kind}] {message}"),
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_without_surface_extensions() {
        // Needs a Vulkan loader and driver; skipped when either is missing.
        match Instance::new(false, &[]) {
            Ok(instance) => assert!(!instance.has_validation()),
            Err(e) => eprintln!("Skipping test: {e}"),
        }
    }
}
