//! Adapter (physical device) selection.
//!
//! Only hardware adapters are considered. Among those that expose a graphics
//! queue, can present to the target surface and support the Vulkan 1.2/1.3
//! features the command layer relies on (timeline semaphores, buffer device
//! addresses, dynamic rendering), the one with the best rating wins: discrete
//! GPUs first, then the largest device-local memory.

use std::ffi::CStr;

use ash::vk;
use tracing::{debug, info, warn};

use crate::error::RhiError;

/// Queue families used by the renderer.
///
/// Rendering goes through a single direct (graphics) queue. The present family
/// is usually the same family.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    /// Family of the direct queue.
    pub graphics_family: Option<u32>,
    /// Family able to present to the surface.
    pub present_family: Option<u32>,
}

impl QueueFamilyIndices {
    /// Both a graphics and a present family were found.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.graphics_family.is_some() && self.present_family.is_some()
    }

    /// Distinct family indices, graphics first.
    pub fn unique_families(&self) -> Vec<u32> {
        let mut families = Vec::with_capacity(2);
        if let Some(graphics) = self.graphics_family {
            families.push(graphics);
        }
        if let Some(present) = self.present_family
            && !families.contains(&present)
        {
            families.push(present);
        }
        families
    }

    /// Graphics and present run on different families.
    #[inline]
    pub fn is_split(&self) -> bool {
        self.is_complete() && self.graphics_family != self.present_family
    }
}

/// What the selector learned about the chosen adapter.
#[derive(Clone)]
pub struct PhysicalDeviceInfo {
    pub device: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub queue_families: QueueFamilyIndices,
}

impl PhysicalDeviceInfo {
    /// Adapter name as reported by the driver.
    pub fn device_name(&self) -> &str {
        adapter_name(&self.properties)
    }

    /// Human-readable adapter type.
    pub fn device_type_name(&self) -> &'static str {
        match self.properties.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => "Discrete GPU",
            vk::PhysicalDeviceType::INTEGRATED_GPU => "Integrated GPU",
            vk::PhysicalDeviceType::VIRTUAL_GPU => "Virtual GPU",
            vk::PhysicalDeviceType::CPU => "CPU",
            _ => "Other",
        }
    }

    /// (major, minor, patch) of the supported Vulkan API.
    pub fn api_version(&self) -> (u32, u32, u32) {
        let version = self.properties.api_version;
        (
            vk::api_version_major(version),
            vk::api_version_minor(version),
            vk::api_version_patch(version),
        )
    }

    /// Total size of device-local heaps in bytes.
    pub fn device_local_memory(&self) -> u64 {
        device_local_bytes(&self.memory_properties)
    }
}

impl std::fmt::Debug for PhysicalDeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (major, minor, patch) = self.api_version();
        f.debug_struct("PhysicalDeviceInfo")
            .field("name", &self.device_name())
            .field("type", &self.device_type_name())
            .field("api_version", &format!("{major}.{minor}.{patch}"))
            .field("device_local_mb", &(self.device_local_memory() >> 20))
            .field("queue_families", &self.queue_families)
            .finish()
    }
}

/// Pick the best hardware adapter that can render and present to `surface`.
///
/// # Errors
///
/// Returns [`RhiError::NoSuitableGpu`] when no adapter qualifies.
pub fn select_physical_device(
    instance: &ash::Instance,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> Result<PhysicalDeviceInfo, RhiError> {
    let devices = unsafe { instance.enumerate_physical_devices()? };
    if devices.is_empty() {
        warn!("No Vulkan-capable adapters found");
        return Err(RhiError::NoSuitableGpu);
    }

    info!("Found {} adapter(s)", devices.len());

    let best = devices
        .into_iter()
        .filter_map(|device| check_suitability(instance, device, surface, surface_loader))
        .filter_map(|info| {
            let score = rate_adapter(info.properties.device_type, info.device_local_memory())?;
            debug!(
                "Adapter '{}' ({}) scored {}",
                info.device_name(),
                info.device_type_name(),
                score
            );
            Some((info, score))
        })
        .max_by_key(|(_, score)| *score);

    let Some((selected, score)) = best else {
        warn!("No adapter satisfies the renderer's requirements");
        return Err(RhiError::NoSuitableGpu);
    };

    let (major, minor, patch) = selected.api_version();
    info!(
        "Selected adapter '{}' ({}, {} MiB device-local) - Vulkan {}.{}.{}, score {}",
        selected.device_name(),
        selected.device_type_name(),
        selected.device_local_memory() >> 20,
        major,
        minor,
        patch,
        score
    );

    Ok(selected)
}

/// Score an adapter. Software adapters are rejected.
///
/// The type dominates; device-local memory breaks ties so that the adapter
/// with the most video memory wins within a type.
pub fn rate_adapter(device_type: vk::PhysicalDeviceType, device_local_bytes: u64) -> Option<u64> {
    let type_rank: u64 = match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 3,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 2,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 1,
        vk::PhysicalDeviceType::CPU => return None,
        _ => 0,
    };

    // 2^44 bytes (16 TiB) of memory never outranks a better adapter type.
    Some((type_rank << 44) | device_local_bytes.min((1 << 44) - 1))
}

fn check_suitability(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> Option<PhysicalDeviceInfo> {
    let properties = unsafe { instance.get_physical_device_properties(device) };
    let memory_properties = unsafe { instance.get_physical_device_memory_properties(device) };
    let name = adapter_name(&properties);

    let major = vk::api_version_major(properties.api_version);
    let minor = vk::api_version_minor(properties.api_version);
    if major < 1 || (major == 1 && minor < 3) {
        debug!("Adapter '{name}' skipped: Vulkan {major}.{minor} < 1.3");
        return None;
    }

    let mut features_1_2 = vk::PhysicalDeviceVulkan12Features::default();
    let mut features_1_3 = vk::PhysicalDeviceVulkan13Features::default();
    let mut features = vk::PhysicalDeviceFeatures2::default()
        .push_next(&mut features_1_2)
        .push_next(&mut features_1_3);
    unsafe { instance.get_physical_device_features2(device, &mut features) };

    if features_1_2.timeline_semaphore == vk::FALSE
        || features_1_2.buffer_device_address == vk::FALSE
        || features_1_3.dynamic_rendering == vk::FALSE
    {
        debug!("Adapter '{name}' skipped: missing timeline semaphores, buffer device address or dynamic rendering");
        return None;
    }

    let queue_families = find_queue_families(instance, device, surface, surface_loader);
    if !queue_families.is_complete() {
        debug!(
            "Adapter '{name}' skipped: graphics={} present={}",
            queue_families.graphics_family.is_some(),
            queue_families.present_family.is_some()
        );
        return None;
    }

    Some(PhysicalDeviceInfo {
        device,
        properties,
        memory_properties,
        queue_families,
    })
}

/// Prefer a family that does both graphics and present; otherwise take the
/// first of each.
fn find_queue_families(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> QueueFamilyIndices {
    let families = unsafe { instance.get_physical_device_queue_family_properties(device) };
    let mut indices = QueueFamilyIndices::default();

    for (i, family) in families.iter().enumerate() {
        let i = i as u32;
        if family.queue_count == 0 {
            continue;
        }

        let graphics = family.queue_flags.contains(vk::QueueFlags::GRAPHICS);
        let present = unsafe {
            surface_loader
                .get_physical_device_surface_support(device, i, surface)
                .unwrap_or(false)
        };

        if graphics && present {
            return QueueFamilyIndices {
                graphics_family: Some(i),
                present_family: Some(i),
            };
        }
        if graphics && indices.graphics_family.is_none() {
            indices.graphics_family = Some(i);
        }
        if present && indices.present_family.is_none() {
            indices.present_family = Some(i);
        }
    }

    indices
}

fn adapter_name(properties: &vk::PhysicalDeviceProperties) -> &str {
    unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
        .to_str()
        .unwrap_or("Unknown adapter")
}

fn device_local_bytes(memory: &vk::PhysicalDeviceMemoryProperties) -> u64 {
    memory
        .memory_heaps
        .iter()
        .take(memory.memory_heap_count as usize)
        .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
        .map(|heap| heap.size)
        .sum()
}
