// Bootstrap error taxonomy
//
// Every fallible step reports one of these kinds; the top-level sequence
// short-circuits on the first failure and the process exits nonzero.

use std::fmt;
use std::io;
use std::path::PathBuf;

use ash::vk;
use thiserror::Error;

pub type BootstrapResult<T> = Result<T, BootstrapError>;

/// Which driver object a failed call was working on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Instance,
    DebugMessenger,
    Surface,
    Device,
    Swapchain,
    ImageView,
    RenderPass,
    PipelineLayout,
    Pipeline,
    ShaderModule,
    Framebuffer,
}

impl Stage {
    /// Driver objects in the order bootstrap constructs them. Shader modules
    /// are absent: they live only for the duration of pipeline creation.
    pub const CONSTRUCTION_ORDER: [Stage; 10] = [
        Stage::Instance,
        Stage::DebugMessenger,
        Stage::Surface,
        Stage::Device,
        Stage::Swapchain,
        Stage::ImageView,
        Stage::RenderPass,
        Stage::PipelineLayout,
        Stage::Pipeline,
        Stage::Framebuffer,
    ];

    /// Shutdown releases the chain in exactly the opposite order; nothing is
    /// destroyed before the objects constructed from it.
    pub const TEARDOWN_ORDER: [Stage; 10] = [
        Stage::Framebuffer,
        Stage::Pipeline,
        Stage::PipelineLayout,
        Stage::RenderPass,
        Stage::ImageView,
        Stage::Swapchain,
        Stage::Device,
        Stage::Surface,
        Stage::DebugMessenger,
        Stage::Instance,
    ];
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Instance => "instance",
            Stage::DebugMessenger => "debug messenger",
            Stage::Surface => "surface",
            Stage::Device => "logical device",
            Stage::Swapchain => "swapchain",
            Stage::ImageView => "image view",
            Stage::RenderPass => "render pass",
            Stage::PipelineLayout => "pipeline layout",
            Stage::Pipeline => "graphics pipeline",
            Stage::ShaderModule => "shader module",
            Stage::Framebuffer => "framebuffer",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityKind {
    Extension,
    Layer,
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CapabilityKind::Extension => "extension",
            CapabilityKind::Layer => "layer",
        })
    }
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("failed to load the Vulkan library, is a driver installed?")]
    LibraryLoad(#[source] ash::LoadingError),

    #[error("requested {kind} is not supported by this Vulkan runtime: {name}")]
    UnsupportedCapability { kind: CapabilityKind, name: String },

    #[error("no Vulkan-capable devices present")]
    NoDevicesPresent,

    #[error("no device satisfies the rendering requirements")]
    NoSuitableDevice,

    #[error("vulkan driver call failed while setting up the {stage}")]
    DriverCall {
        stage: Stage,
        #[source]
        source: vk::Result,
    },

    #[error("failed to load shader bytecode from {path}")]
    ShaderRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Shorthand for mapping a raw `vk::Result` into a stage-tagged error.
pub(crate) fn driver(stage: Stage) -> impl Fn(vk::Result) -> BootstrapError {
    move |source| BootstrapError::DriverCall { stage, source }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn teardown_is_exact_reverse_of_construction() {
        let reversed: Vec<Stage> = Stage::CONSTRUCTION_ORDER.iter().rev().copied().collect();
        assert_eq!(reversed, Stage::TEARDOWN_ORDER);
    }

    #[test]
    fn dependents_torn_down_before_dependencies() {
        let torn_down_at = |stage: Stage| {
            Stage::TEARDOWN_ORDER
                .iter()
                .position(|&s| s == stage)
                .unwrap()
        };
        assert!(torn_down_at(Stage::Framebuffer) < torn_down_at(Stage::RenderPass));
        assert!(torn_down_at(Stage::Swapchain) < torn_down_at(Stage::Device));
        assert!(torn_down_at(Stage::Device) < torn_down_at(Stage::Instance));
        assert!(torn_down_at(Stage::Surface) < torn_down_at(Stage::Instance));
    }
}
