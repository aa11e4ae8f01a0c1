// Swapchain negotiation and creation
//
// The surface dictates what it can do; three independent preference rules
// pick a format, a present mode and an extent, and the outcome is captured
// in an immutable SwapchainConfig before any driver object is created.

use std::sync::Arc;

use ash::vk;

use super::device::{QueueFamilyIndices, VulkanDevice};
use super::error::{driver, BootstrapError, BootstrapResult, Stage};
use super::surface::Surface;

/// Everything the surface+device pair reports about presentation, taken as
/// one snapshot. Queried fresh each time; a resized surface would invalidate
/// it, but resize is unhandled here.
pub struct SurfaceDetails {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceDetails {
    pub fn query(surface: &Surface, device: vk::PhysicalDevice) -> BootstrapResult<Self> {
        let capabilities = unsafe {
            surface
                .loader
                .get_physical_device_surface_capabilities(device, surface.surface)
        }
        .map_err(driver(Stage::Surface))?;

        let formats = unsafe {
            surface
                .loader
                .get_physical_device_surface_formats(device, surface.surface)
        }
        .map_err(driver(Stage::Surface))?;

        let present_modes = unsafe {
            surface
                .loader
                .get_physical_device_surface_present_modes(device, surface.surface)
        }
        .map_err(driver(Stage::Surface))?;

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }

    /// A device with nothing to negotiate from cannot present at all.
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

// =============================================================================
// NEGOTIATION POLICY
// =============================================================================

/// Prefer 8-bit BGRA with the non-linear sRGB color space; fall back to the
/// first advertised pair, which is stable across enumerations.
fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .copied()
        .find(|pair| {
            pair.format == vk::Format::B8G8R8A8_SRGB
                && pair.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first().copied())
}

/// MAILBOX gives triple-buffered low latency without tearing; FIFO is the
/// one mode every conformant driver must support.
fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    modes
        .iter()
        .copied()
        .find(|&mode| mode == vk::PresentModeKHR::MAILBOX)
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// The window size is only a request: a defined current extent is fixed by
/// the surface and must be used as-is. A width of `u32::MAX` is the sentinel
/// for "undefined", in which case the request is clamped into bounds.
fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    requested: vk::Extent2D,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    vk::Extent2D {
        width: requested.width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: requested.height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// One more than the minimum, so image acquisition does not stall on the
/// driver every frame. A max_image_count of zero means no upper bound.
fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let mut count = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 && count > capabilities.max_image_count {
        count = capabilities.max_image_count;
    }
    count
}

/// Negotiated swapchain parameters, derived deterministically from a
/// SurfaceDetails snapshot. Immutable once chosen.
#[derive(Debug, Clone)]
pub struct SwapchainConfig {
    pub image_count: u32,
    pub format: vk::SurfaceFormatKHR,
    pub extent: vk::Extent2D,
    pub present_mode: vk::PresentModeKHR,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
    pub sharing_mode: vk::SharingMode,
    /// Families accessing the images; populated only in CONCURRENT mode.
    pub queue_family_indices: Vec<u32>,
}

impl SwapchainConfig {
    pub fn negotiate(
        details: &SurfaceDetails,
        requested: vk::Extent2D,
        families: &QueueFamilyIndices,
    ) -> BootstrapResult<Self> {
        let format =
            choose_surface_format(&details.formats).ok_or(BootstrapError::NoSuitableDevice)?;
        let present_mode = choose_present_mode(&details.present_modes);
        let extent = choose_extent(&details.capabilities, requested);
        let image_count = choose_image_count(&details.capabilities);

        let graphics = families.graphics.ok_or(BootstrapError::NoSuitableDevice)?;
        let present = families.present.ok_or(BootstrapError::NoSuitableDevice)?;

        // When one family both draws and presents the images never change
        // hands, so they can be owned exclusively
        let (sharing_mode, queue_family_indices) = if graphics == present {
            (vk::SharingMode::EXCLUSIVE, Vec::new())
        } else {
            (vk::SharingMode::CONCURRENT, vec![graphics, present])
        };

        Ok(Self {
            image_count,
            format,
            extent,
            present_mode,
            pre_transform: details.capabilities.current_transform,
            sharing_mode,
            queue_family_indices,
        })
    }
}

// =============================================================================
// SWAPCHAIN
// =============================================================================

pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub loader: ash::extensions::khr::Swapchain,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    device: Arc<VulkanDevice>,
}

impl Swapchain {
    pub fn new(
        device: Arc<VulkanDevice>,
        surface: &Surface,
        config: &SwapchainConfig,
    ) -> BootstrapResult<Self> {
        log::info!(
            "Creating swapchain: {}x{}, {} images, {:?}",
            config.extent.width,
            config.extent.height,
            config.image_count,
            config.present_mode
        );

        let loader = ash::extensions::khr::Swapchain::new(device.instance(), &device.device);

        let mut create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface.surface)
            .min_image_count(config.image_count)
            .image_format(config.format.format)
            .image_color_space(config.format.color_space)
            .image_extent(config.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(config.sharing_mode)
            .pre_transform(config.pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(config.present_mode)
            .clipped(true);
        if config.sharing_mode == vk::SharingMode::CONCURRENT {
            create_info = create_info.queue_family_indices(&config.queue_family_indices);
        }

        let swapchain = unsafe { loader.create_swapchain(&create_info, None) }
            .map_err(driver(Stage::Swapchain))?;

        let images = match unsafe { loader.get_swapchain_images(swapchain) } {
            Ok(images) => images,
            Err(source) => {
                unsafe { loader.destroy_swapchain(swapchain, None) };
                return Err(BootstrapError::DriverCall {
                    stage: Stage::Swapchain,
                    source,
                });
            }
        };

        // One view per image; unwind everything created so far if any
        // single view fails
        let mut image_views = Vec::with_capacity(images.len());
        for &image in &images {
            let view_info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(config.format.format)
                .components(vk::ComponentMapping {
                    r: vk::ComponentSwizzle::IDENTITY,
                    g: vk::ComponentSwizzle::IDENTITY,
                    b: vk::ComponentSwizzle::IDENTITY,
                    a: vk::ComponentSwizzle::IDENTITY,
                })
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });

            match unsafe { device.device.create_image_view(&view_info, None) } {
                Ok(view) => image_views.push(view),
                Err(source) => {
                    unsafe {
                        for &view in &image_views {
                            device.device.destroy_image_view(view, None);
                        }
                        loader.destroy_swapchain(swapchain, None);
                    }
                    return Err(BootstrapError::DriverCall {
                        stage: Stage::ImageView,
                        source,
                    });
                }
            }
        }

        log::info!("Swapchain ready with {} images", images.len());

        Ok(Self {
            swapchain,
            loader,
            images,
            image_views,
            format: config.format.format,
            extent: config.extent,
            device,
        })
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            log::debug!("destroying {}", Stage::ImageView);
            for &view in &self.image_views {
                self.device.device.destroy_image_view(view, None);
            }
            log::debug!("destroying {}", Stage::Swapchain);
            self.loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UNDEFINED_EXTENT: vk::Extent2D = vk::Extent2D {
        width: u32::MAX,
        height: u32::MAX,
    };

    fn capabilities(
        min_count: u32,
        max_count: u32,
        current: vk::Extent2D,
    ) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min_count,
            max_image_count: max_count,
            current_extent: current,
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        }
    }

    fn pair(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    #[test]
    fn preferred_format_wins_wherever_it_appears() {
        let formats = [
            pair(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            pair(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        let chosen = choose_surface_format(&formats).unwrap();
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(chosen.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
    }

    #[test]
    fn first_pair_is_the_fallback() {
        let formats = [
            pair(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            pair(vk::Format::R16G16B16A16_SFLOAT, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        let chosen = choose_surface_format(&formats).unwrap();
        assert_eq!(chosen.format, vk::Format::R8G8B8A8_UNORM);
    }

    #[test]
    fn empty_format_list_yields_nothing() {
        assert!(choose_surface_format(&[]).is_none());
    }

    #[test]
    fn mailbox_preferred_when_offered() {
        let modes = [
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::IMMEDIATE,
        ];
        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn fifo_is_the_fallback() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn undefined_extent_clamps_the_request() {
        let caps = capabilities(2, 0, UNDEFINED_EXTENT);
        let extent = choose_extent(
            &caps,
            vk::Extent2D {
                width: 800,
                height: 600,
            },
        );
        assert_eq!(extent.width, 800);
        assert_eq!(extent.height, 600);
    }

    #[test]
    fn undefined_extent_respects_bounds() {
        let caps = capabilities(2, 0, UNDEFINED_EXTENT);
        let extent = choose_extent(
            &caps,
            vk::Extent2D {
                width: 100_000,
                height: 0,
            },
        );
        assert_eq!(extent.width, 4096);
        assert_eq!(extent.height, 1);
    }

    #[test]
    fn defined_extent_overrides_the_request() {
        let current = vk::Extent2D {
            width: 1024,
            height: 768,
        };
        let caps = capabilities(2, 0, current);
        let extent = choose_extent(
            &caps,
            vk::Extent2D {
                width: 800,
                height: 600,
            },
        );
        assert_eq!(extent.width, 1024);
        assert_eq!(extent.height, 768);
    }

    #[test]
    fn image_count_is_min_plus_one_when_unbounded() {
        assert_eq!(choose_image_count(&capabilities(2, 0, UNDEFINED_EXTENT)), 3);
    }

    #[test]
    fn image_count_clamps_to_advertised_max() {
        assert_eq!(choose_image_count(&capabilities(2, 2, UNDEFINED_EXTENT)), 2);
    }

    #[test]
    fn shared_family_negotiates_exclusive_ownership() {
        let details = SurfaceDetails {
            capabilities: capabilities(2, 0, UNDEFINED_EXTENT),
            formats: vec![pair(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR)],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        };
        let families = QueueFamilyIndices {
            graphics: Some(0),
            present: Some(0),
            ..Default::default()
        };
        let config = SwapchainConfig::negotiate(
            &details,
            vk::Extent2D {
                width: 800,
                height: 600,
            },
            &families,
        )
        .unwrap();
        assert_eq!(config.sharing_mode, vk::SharingMode::EXCLUSIVE);
        assert!(config.queue_family_indices.is_empty());
    }

    #[test]
    fn split_families_negotiate_concurrent_sharing() {
        let details = SurfaceDetails {
            capabilities: capabilities(2, 0, UNDEFINED_EXTENT),
            formats: vec![pair(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR)],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        };
        let families = QueueFamilyIndices {
            graphics: Some(0),
            present: Some(2),
            ..Default::default()
        };
        let config = SwapchainConfig::negotiate(
            &details,
            vk::Extent2D {
                width: 800,
                height: 600,
            },
            &families,
        )
        .unwrap();
        assert_eq!(config.sharing_mode, vk::SharingMode::CONCURRENT);
        assert_eq!(config.queue_family_indices, vec![0, 2]);
    }
}
