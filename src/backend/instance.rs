// Vulkan instance bootstrap
//
// Snapshots what the runtime supports, gates the requested extensions and
// layers against that snapshot, then creates the instance and (when
// validation is on) the debug messenger.

use std::collections::HashSet;
use std::ffi::{c_char, CStr, CString};
use std::sync::Arc;

use ash::{vk, Entry};
use raw_window_handle::RawDisplayHandle;

use super::error::{driver, BootstrapError, BootstrapResult, CapabilityKind, Stage};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Immutable snapshot of the instance extensions and layers the host runtime
/// supports, queried once before instance creation.
pub struct RuntimeCapabilities {
    extensions: HashSet<String>,
    layers: HashSet<String>,
}

impl RuntimeCapabilities {
    pub fn query(entry: &Entry) -> BootstrapResult<Self> {
        let extensions = entry
            .enumerate_instance_extension_properties(None)
            .map_err(driver(Stage::Instance))?
            .iter()
            .map(|properties| name_to_string(&properties.extension_name))
            .collect();

        let layers = entry
            .enumerate_instance_layer_properties()
            .map_err(driver(Stage::Instance))?
            .iter()
            .map(|properties| name_to_string(&properties.layer_name))
            .collect();

        Ok(Self { extensions, layers })
    }

    /// First requested extension absent from the snapshot, if any.
    /// Names are compared case-sensitively.
    pub fn missing_extension<'a, I>(&self, required: I) -> Option<String>
    where
        I: IntoIterator<Item = &'a CStr>,
    {
        first_missing(required, &self.extensions)
    }

    /// First requested layer absent from the snapshot, if any.
    pub fn missing_layer<'a, I>(&self, required: I) -> Option<String>
    where
        I: IntoIterator<Item = &'a CStr>,
    {
        first_missing(required, &self.layers)
    }
}

fn first_missing<'a, I>(required: I, supported: &HashSet<String>) -> Option<String>
where
    I: IntoIterator<Item = &'a CStr>,
{
    required
        .into_iter()
        .map(|name| name.to_string_lossy())
        .find(|name| !supported.contains(name.as_ref()))
        .map(|name| name.into_owned())
}

/// Fixed-size C string field (driver property structs) to an owned String.
pub(crate) fn name_to_string(raw: &[c_char]) -> String {
    unsafe { CStr::from_ptr(raw.as_ptr()) }
        .to_string_lossy()
        .into_owned()
}

/// The instance and its optional debug messenger. Dropped last of all the
/// driver objects: everything else is created from it.
pub struct VulkanInstance {
    pub instance: ash::Instance,
    debug: Option<(ash::extensions::ext::DebugUtils, vk::DebugUtilsMessengerEXT)>,
    pub entry: Entry,
}

impl VulkanInstance {
    pub fn new(
        app_name: &str,
        display: RawDisplayHandle,
        enable_validation: bool,
    ) -> BootstrapResult<Arc<Self>> {
        let entry = unsafe { Entry::load() }.map_err(BootstrapError::LibraryLoad)?;

        let capabilities = RuntimeCapabilities::query(&entry)?;

        // The windowing library dictates which surface extensions it needs
        let mut extensions = ash_window::enumerate_required_extensions(display)
            .map_err(driver(Stage::Instance))?
            .to_vec();
        if enable_validation {
            extensions.push(ash::extensions::ext::DebugUtils::name().as_ptr());
        }

        let extension_names: Vec<&CStr> = extensions
            .iter()
            .map(|&ptr| unsafe { CStr::from_ptr(ptr) })
            .collect();
        if let Some(name) = capabilities.missing_extension(extension_names.iter().copied()) {
            return Err(BootstrapError::UnsupportedCapability {
                kind: CapabilityKind::Extension,
                name,
            });
        }

        let layers: Vec<*const c_char> = if enable_validation {
            if let Some(name) = capabilities.missing_layer([VALIDATION_LAYER]) {
                return Err(BootstrapError::UnsupportedCapability {
                    kind: CapabilityKind::Layer,
                    name,
                });
            }
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            Vec::new()
        };

        let app_name = CString::new(app_name).unwrap_or_default();
        let engine_name = CString::new("No Engine").unwrap_or_default();
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_1);

        // Chaining the messenger info here covers instance create/destroy
        // calls, which the messenger itself cannot observe
        let mut debug_info = debug_messenger_create_info();
        let mut create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);
        if enable_validation {
            create_info = create_info.push_next(&mut debug_info);
        }

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .map_err(driver(Stage::Instance))?;

        let debug = if enable_validation {
            let loader = ash::extensions::ext::DebugUtils::new(&entry, &instance);
            match unsafe { loader.create_debug_utils_messenger(&debug_info, None) } {
                Ok(messenger) => Some((loader, messenger)),
                Err(source) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(BootstrapError::DriverCall {
                        stage: Stage::DebugMessenger,
                        source,
                    });
                }
            }
        } else {
            None
        };

        log::info!(
            "Created Vulkan instance (validation {})",
            if enable_validation { "on" } else { "off" }
        );

        Ok(Arc::new(Self {
            instance,
            debug,
            entry,
        }))
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        unsafe {
            if let Some((loader, messenger)) = self.debug.take() {
                log::debug!("destroying {}", Stage::DebugMessenger);
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            log::debug!("destroying {}", Stage::Instance);
            self.instance.destroy_instance(None);
        }
    }
}

fn debug_messenger_create_info() -> vk::DebugUtilsMessengerCreateInfoEXT {
    vk::DebugUtilsMessengerCreateInfoEXT::builder()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback))
        .build()
}

// Callback for the validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = CStr::from_ptr((*p_callback_data).p_message);

    if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::error!("[vulkan] {}", message.to_string_lossy());
        // An error-severity report is a programmer error; halt right here so
        // an attached debugger traps at the offending call
        std::process::abort();
    } else if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        log::warn!("[vulkan] {}", message.to_string_lossy());
    } else {
        log::debug!("[vulkan] {}", message.to_string_lossy());
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capabilities(extensions: &[&str], layers: &[&str]) -> RuntimeCapabilities {
        RuntimeCapabilities {
            extensions: extensions.iter().map(|s| s.to_string()).collect(),
            layers: layers.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn complete_required_set_passes() {
        let caps = capabilities(
            &["VK_KHR_surface", "VK_KHR_wayland_surface", "VK_EXT_debug_utils"],
            &["VK_LAYER_KHRONOS_validation"],
        );
        let required = [c"VK_KHR_surface", c"VK_EXT_debug_utils"];
        assert_eq!(caps.missing_extension(required), None);
        assert_eq!(caps.missing_layer([c"VK_LAYER_KHRONOS_validation"]), None);
    }

    #[test]
    fn single_absent_name_fails() {
        let caps = capabilities(&["VK_KHR_surface", "VK_EXT_debug_utils"], &[]);
        let required = [c"VK_KHR_surface", c"VK_KHR_xcb_surface", c"VK_EXT_debug_utils"];
        assert_eq!(
            caps.missing_extension(required),
            Some("VK_KHR_xcb_surface".to_string())
        );
    }

    #[test]
    fn name_match_is_case_sensitive() {
        let caps = capabilities(&["VK_KHR_surface"], &[]);
        assert_eq!(
            caps.missing_extension([c"vk_khr_surface"]),
            Some("vk_khr_surface".to_string())
        );
    }

    #[test]
    fn empty_required_set_passes_trivially() {
        let caps = capabilities(&[], &[]);
        assert_eq!(caps.missing_extension(std::iter::empty::<&CStr>()), None);
    }
}
