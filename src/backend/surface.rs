// Presentation surface
//
// The window itself belongs to winit; this wraps the VkSurfaceKHR created
// from its raw handles. Device suitability checks need the surface, so it
// exists before any device is picked.

use std::sync::Arc;

use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use super::error::{driver, BootstrapResult, Stage};
use super::instance::VulkanInstance;

pub struct Surface {
    pub loader: ash::extensions::khr::Surface,
    pub surface: vk::SurfaceKHR,
    /// Held so the instance outlives the surface handle
    _instance: Arc<VulkanInstance>,
}

impl Surface {
    pub fn new(
        instance: Arc<VulkanInstance>,
        display: RawDisplayHandle,
        window: RawWindowHandle,
    ) -> BootstrapResult<Self> {
        let loader = ash::extensions::khr::Surface::new(&instance.entry, &instance.instance);

        let surface = unsafe {
            ash_window::create_surface(&instance.entry, &instance.instance, display, window, None)
        }
        .map_err(driver(Stage::Surface))?;

        Ok(Self {
            loader,
            surface,
            _instance: instance,
        })
    }

    /// Driver predicate: can this queue family present to this surface?
    /// Presentation support is surface-specific, not a static device property.
    pub fn supports_present(
        &self,
        physical_device: vk::PhysicalDevice,
        queue_family_index: u32,
    ) -> BootstrapResult<bool> {
        unsafe {
            self.loader.get_physical_device_surface_support(
                physical_device,
                queue_family_index,
                self.surface,
            )
        }
        .map_err(driver(Stage::Surface))
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        log::debug!("destroying {}", Stage::Surface);
        unsafe {
            self.loader.destroy_surface(self.surface, None);
        }
    }
}
