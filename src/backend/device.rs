// Physical device selection and logical device creation
//
// Selection is two-tier: a hard suitability gate (queue families, device
// extensions, presentable surface) followed by a score that prefers discrete
// GPUs. The gate runs first so a powerful but headless device can never
// outrank a usable one.

use std::collections::HashSet;
use std::ffi::{c_char, CStr};
use std::sync::Arc;

use ash::vk;

use super::error::{driver, BootstrapError, BootstrapResult, Stage};
use super::instance::{name_to_string, VulkanInstance};
use super::surface::Surface;
use super::swapchain::SurfaceDetails;

const NON_SUITABLE_SCORE: u32 = 0;
const DISCRETE_GPU_BONUS: u32 = 1000;

/// Device extensions every candidate must support.
fn required_device_extensions() -> [&'static CStr; 1] {
    [ash::extensions::khr::Swapchain::name()]
}

// =============================================================================
// QUEUE FAMILY RESOLUTION
// =============================================================================

/// Queue family index per capability; `None` when the device has no family
/// with that capability. Absence is for the caller to judge, not an error.
/// Computed once per selected device and cached for the session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub compute: Option<u32>,
    pub transfer: Option<u32>,
    pub sparse_binding: Option<u32>,
    pub present: Option<u32>,
}

impl QueueFamilyIndices {
    /// Resolve every capability against the device's family list.
    ///
    /// Presentation is resolved through `supports_present`, a per-family
    /// driver predicate, because presentability depends on the surface and
    /// is not a static capability bit.
    pub fn find(
        families: &[vk::QueueFamilyProperties],
        mut supports_present: impl FnMut(u32) -> BootstrapResult<bool>,
    ) -> BootstrapResult<Self> {
        let mut present = None;
        for index in 0..families.len() as u32 {
            if supports_present(index)? {
                present = Some(index);
                break;
            }
        }

        Ok(Self {
            graphics: family_with_capability(families, vk::QueueFlags::GRAPHICS),
            compute: family_with_capability(families, vk::QueueFlags::COMPUTE),
            transfer: family_with_capability(families, vk::QueueFlags::TRANSFER),
            sparse_binding: family_with_capability(families, vk::QueueFlags::SPARSE_BINDING),
            present,
        })
    }

    /// True when the device can both draw and present.
    pub fn supports_rendering(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }
}

/// Index of a family exposing `capability`. A family whose flag set equals
/// the capability exactly wins over one that merely contains it, so a
/// dedicated transfer or compute queue is picked over a general-purpose one
/// when the device has both.
fn family_with_capability(
    families: &[vk::QueueFamilyProperties],
    capability: vk::QueueFlags,
) -> Option<u32> {
    let mut fallback = None;
    for (index, family) in families.iter().enumerate() {
        if family.queue_flags.contains(capability) {
            fallback = Some(index as u32);
            if family.queue_flags == capability {
                return fallback;
            }
        }
    }
    fallback
}

// =============================================================================
// DEVICE SELECTION
// =============================================================================

/// Score a candidate: zero when the suitability gate fails, otherwise one
/// plus a large bonus for discrete GPUs.
fn score_device(device_type: vk::PhysicalDeviceType, suitable: bool) -> u32 {
    if !suitable {
        return NON_SUITABLE_SCORE;
    }

    let mut score = 1;
    if device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
        score += DISCRETE_GPU_BONUS;
    }
    score
}

/// Position of the strictly highest score; ties go to the earlier entry.
/// `None` when every candidate scored zero.
fn pick_highest(scores: &[u32]) -> Option<usize> {
    let mut best = None;
    let mut best_score = NON_SUITABLE_SCORE;
    for (index, &score) in scores.iter().enumerate() {
        if score > best_score {
            best_score = score;
            best = Some(index);
        }
    }
    best
}

/// The hard gate: queue families for drawing and presenting, the required
/// device extensions, and at least one format and present mode to negotiate
/// from. Returns the resolved indices alongside the verdict so the selected
/// device does not get re-queried.
fn assess_candidate(
    instance: &ash::Instance,
    surface: &Surface,
    device: vk::PhysicalDevice,
) -> BootstrapResult<(QueueFamilyIndices, bool)> {
    let families = unsafe { instance.get_physical_device_queue_family_properties(device) };
    let indices = QueueFamilyIndices::find(&families, |index| {
        surface.supports_present(device, index)
    })?;

    if !indices.supports_rendering() {
        return Ok((indices, false));
    }

    if missing_device_extension(instance, device)?.is_some() {
        return Ok((indices, false));
    }

    let details = SurfaceDetails::query(surface, device)?;
    Ok((indices, details.is_adequate()))
}

/// First required device extension the candidate does not support, if any.
fn missing_device_extension(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
) -> BootstrapResult<Option<String>> {
    let supported: HashSet<String> =
        unsafe { instance.enumerate_device_extension_properties(device) }
            .map_err(driver(Stage::Device))?
            .iter()
            .map(|properties| name_to_string(&properties.extension_name))
            .collect();

    Ok(required_device_extensions()
        .iter()
        .map(|name| name.to_string_lossy())
        .find(|name| !supported.contains(name.as_ref()))
        .map(|name| name.into_owned()))
}

fn pick_physical_device(
    instance: &ash::Instance,
    surface: &Surface,
) -> BootstrapResult<(vk::PhysicalDevice, QueueFamilyIndices)> {
    let devices =
        unsafe { instance.enumerate_physical_devices() }.map_err(driver(Stage::Device))?;
    if devices.is_empty() {
        return Err(BootstrapError::NoDevicesPresent);
    }

    let mut indices = Vec::with_capacity(devices.len());
    let mut scores = Vec::with_capacity(devices.len());
    for &device in &devices {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        let (candidate_indices, suitable) = assess_candidate(instance, surface, device)?;
        let score = score_device(properties.device_type, suitable);
        log::debug!(
            "Candidate {}: score {}",
            name_to_string(&properties.device_name),
            score
        );
        indices.push(candidate_indices);
        scores.push(score);
    }

    let best = pick_highest(&scores).ok_or(BootstrapError::NoSuitableDevice)?;
    Ok((devices[best], indices[best]))
}

// =============================================================================
// LOGICAL DEVICE
// =============================================================================

/// The selected physical device and the logical device created from it,
/// along with the graphics and present queue handles.
pub struct VulkanDevice {
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub queue_families: QueueFamilyIndices,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    instance: Arc<VulkanInstance>,
}

impl VulkanDevice {
    pub fn new(instance: Arc<VulkanInstance>, surface: &Surface) -> BootstrapResult<Arc<Self>> {
        let (physical_device, queue_families) =
            pick_physical_device(&instance.instance, surface)?;

        let properties =
            unsafe { instance.instance.get_physical_device_properties(physical_device) };
        log::info!("Selected GPU: {}", name_to_string(&properties.device_name));
        log::info!(
            "API version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );

        // The gate guarantees both of these on the selected device
        let graphics_family = queue_families.graphics.ok_or(BootstrapError::NoSuitableDevice)?;
        let present_family = queue_families.present.ok_or(BootstrapError::NoSuitableDevice)?;

        // One queue per distinct family; graphics and present often share one
        let mut unique_families = vec![graphics_family];
        if present_family != graphics_family {
            unique_families.push(present_family);
        }

        let queue_priorities = [1.0];
        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
                    .build()
            })
            .collect();

        let extensions: Vec<*const c_char> = required_device_extensions()
            .iter()
            .map(|name| name.as_ptr())
            .collect();
        let features = vk::PhysicalDeviceFeatures::default();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        let device = unsafe {
            instance
                .instance
                .create_device(physical_device, &create_info, None)
        }
        .map_err(driver(Stage::Device))?;

        let graphics_queue = unsafe { device.get_device_queue(graphics_family, 0) };
        let present_queue = unsafe { device.get_device_queue(present_family, 0) };

        Ok(Arc::new(Self {
            device,
            physical_device,
            properties,
            queue_families,
            graphics_queue,
            present_queue,
            instance,
        }))
    }

    pub fn instance(&self) -> &ash::Instance {
        &self.instance.instance
    }

    /// Wait for the device to go idle, e.g. before teardown.
    pub fn wait_idle(&self) -> BootstrapResult<()> {
        unsafe { self.device.device_wait_idle() }.map_err(driver(Stage::Device))
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::debug!("destroying {}", Stage::Device);
        unsafe {
            self.device.destroy_device(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn dedicated_family_beats_general_purpose() {
        let families = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::TRANSFER),
        ];
        assert_eq!(
            family_with_capability(&families, vk::QueueFlags::TRANSFER),
            Some(1)
        );
    }

    #[test]
    fn superset_family_found_when_no_dedicated_exists() {
        let families = [family(
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
        )];
        assert_eq!(
            family_with_capability(&families, vk::QueueFlags::COMPUTE),
            Some(0)
        );
    }

    #[test]
    fn absent_capability_is_none_not_an_error() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        assert_eq!(
            family_with_capability(&families, vk::QueueFlags::SPARSE_BINDING),
            None
        );
    }

    #[test]
    fn presentation_resolved_by_surface_predicate() {
        let families = [family(vk::QueueFlags::GRAPHICS), family(vk::QueueFlags::GRAPHICS)];
        let indices = QueueFamilyIndices::find(&families, |index| Ok(index == 1)).unwrap();
        assert_eq!(indices.graphics, Some(0));
        assert_eq!(indices.present, Some(1));
        assert!(indices.supports_rendering());
    }

    #[test]
    fn no_presentable_family_leaves_present_unset() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        let indices = QueueFamilyIndices::find(&families, |_| Ok(false)).unwrap();
        assert_eq!(indices.present, None);
        assert!(!indices.supports_rendering());
    }

    #[test]
    fn unsuitable_candidates_score_zero() {
        assert_eq!(
            score_device(vk::PhysicalDeviceType::DISCRETE_GPU, false),
            NON_SUITABLE_SCORE
        );
    }

    #[test]
    fn discrete_gpu_outranks_integrated() {
        let scores = [
            score_device(vk::PhysicalDeviceType::INTEGRATED_GPU, true),
            score_device(vk::PhysicalDeviceType::DISCRETE_GPU, true),
        ];
        assert_eq!(pick_highest(&scores), Some(1));
    }

    #[test]
    fn all_zero_scores_select_nothing() {
        assert_eq!(pick_highest(&[0, 0, 0]), None);
        assert_eq!(pick_highest(&[]), None);
    }

    #[test]
    fn ties_resolve_to_first_enumerated() {
        let scores = [
            score_device(vk::PhysicalDeviceType::INTEGRATED_GPU, true),
            score_device(vk::PhysicalDeviceType::INTEGRATED_GPU, true),
        ];
        assert_eq!(pick_highest(&scores), Some(0));
    }
}
