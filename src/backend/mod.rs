// Backend module - Vulkan bootstrap layer
//
// Thin wrappers around ash. Each wrapper owns its driver handles and
// releases them on Drop, so the dependency chain unwinds in reverse
// construction order on every exit path.

pub mod device;
pub mod error;
pub mod instance;
pub mod pipeline;
pub mod shader;
pub mod surface;
pub mod swapchain;

pub use device::VulkanDevice;
pub use error::{BootstrapError, BootstrapResult, Stage};
pub use instance::VulkanInstance;
pub use pipeline::PipelineResources;
pub use surface::Surface;
pub use swapchain::{SurfaceDetails, Swapchain, SwapchainConfig};
