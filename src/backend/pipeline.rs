// Fixed-function graphics pipeline
//
// Assembles the render pass, shader stages, rasterizer and color blend state
// for the hardcoded triangle, then one framebuffer per swapchain image view.
// The vertex positions live in the vertex shader, so the pipeline has no
// vertex input and an empty layout.

use std::ffi::CStr;
use std::path::Path;
use std::sync::Arc;

use ash::vk;

use super::device::VulkanDevice;
use super::error::{driver, BootstrapError, BootstrapResult, Stage};
use super::shader;
use super::swapchain::Swapchain;

const SHADER_ENTRY_POINT: &CStr = c"main";

/// Render pass, layout, pipeline and framebuffers, owned as one unit.
/// Dropped before the swapchain whose image views the framebuffers reference.
pub struct PipelineResources {
    pub framebuffers: Vec<vk::Framebuffer>,
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub render_pass: vk::RenderPass,
    device: Arc<VulkanDevice>,
}

impl PipelineResources {
    /// Build the whole pipeline chain. A failure at any step releases
    /// everything this call already created, in reverse order.
    pub fn new(
        device: Arc<VulkanDevice>,
        swapchain: &Swapchain,
        vertex_shader: &Path,
        fragment_shader: &Path,
    ) -> BootstrapResult<Self> {
        // Read both blobs up front, before any driver object exists
        let vert_code = shader::load_spirv(vertex_shader)?;
        let frag_code = shader::load_spirv(fragment_shader)?;

        let render_pass = create_render_pass(&device.device, swapchain.format)?;

        let layout = create_pipeline_layout(&device.device).map_err(|err| {
            unsafe { device.device.destroy_render_pass(render_pass, None) };
            err
        })?;

        let pipeline = create_graphics_pipeline(
            &device.device,
            render_pass,
            layout,
            swapchain.extent,
            &vert_code,
            &frag_code,
        )
        .map_err(|err| {
            unsafe {
                device.device.destroy_pipeline_layout(layout, None);
                device.device.destroy_render_pass(render_pass, None);
            }
            err
        })?;

        let framebuffers = create_framebuffers(
            &device.device,
            &swapchain.image_views,
            render_pass,
            swapchain.extent,
        )
        .map_err(|err| {
            unsafe {
                device.device.destroy_pipeline(pipeline, None);
                device.device.destroy_pipeline_layout(layout, None);
                device.device.destroy_render_pass(render_pass, None);
            }
            err
        })?;

        log::info!("Graphics pipeline ready, {} framebuffers", framebuffers.len());

        Ok(Self {
            framebuffers,
            pipeline,
            layout,
            render_pass,
            device,
        })
    }
}

impl Drop for PipelineResources {
    fn drop(&mut self) {
        unsafe {
            log::debug!("destroying {}", Stage::Framebuffer);
            for &framebuffer in &self.framebuffers {
                self.device.device.destroy_framebuffer(framebuffer, None);
            }
            log::debug!("destroying {}", Stage::Pipeline);
            self.device.device.destroy_pipeline(self.pipeline, None);
            log::debug!("destroying {}", Stage::PipelineLayout);
            self.device.device.destroy_pipeline_layout(self.layout, None);
            log::debug!("destroying {}", Stage::RenderPass);
            self.device.device.destroy_render_pass(self.render_pass, None);
        }
    }
}

/// Single color attachment: cleared on load, kept on store, arriving with
/// undefined contents and leaving ready to present. One subpass.
fn create_render_pass(device: &ash::Device, format: vk::Format) -> BootstrapResult<vk::RenderPass> {
    let color_attachment = vk::AttachmentDescription::builder()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
        .build();

    let color_attachment_ref = vk::AttachmentReference::builder()
        .attachment(0)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        .build();

    let color_attachment_refs = [color_attachment_ref];
    let subpass = vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_attachment_refs)
        .build();

    let attachments = [color_attachment];
    let subpasses = [subpass];
    let render_pass_info = vk::RenderPassCreateInfo::builder()
        .attachments(&attachments)
        .subpasses(&subpasses);

    unsafe { device.create_render_pass(&render_pass_info, None) }
        .map_err(driver(Stage::RenderPass))
}

/// No descriptor sets and no push constants; the triangle needs neither.
fn create_pipeline_layout(device: &ash::Device) -> BootstrapResult<vk::PipelineLayout> {
    let layout_info = vk::PipelineLayoutCreateInfo::builder();
    unsafe { device.create_pipeline_layout(&layout_info, None) }
        .map_err(driver(Stage::PipelineLayout))
}

/// Wrap the bytecode in shader modules just long enough to create the
/// pipeline; the modules are destroyed on both the success and failure path.
fn create_graphics_pipeline(
    device: &ash::Device,
    render_pass: vk::RenderPass,
    layout: vk::PipelineLayout,
    extent: vk::Extent2D,
    vert_code: &[u32],
    frag_code: &[u32],
) -> BootstrapResult<vk::Pipeline> {
    let vert_module = shader::create_shader_module(device, vert_code)?;
    let frag_module = match shader::create_shader_module(device, frag_code) {
        Ok(module) => module,
        Err(err) => {
            unsafe { device.destroy_shader_module(vert_module, None) };
            return Err(err);
        }
    };

    let result = build_pipeline(device, render_pass, layout, extent, vert_module, frag_module);

    unsafe {
        device.destroy_shader_module(frag_module, None);
        device.destroy_shader_module(vert_module, None);
    }

    result
}

fn build_pipeline(
    device: &ash::Device,
    render_pass: vk::RenderPass,
    layout: vk::PipelineLayout,
    extent: vk::Extent2D,
    vert_module: vk::ShaderModule,
    frag_module: vk::ShaderModule,
) -> BootstrapResult<vk::Pipeline> {
    let vert_stage = vk::PipelineShaderStageCreateInfo::builder()
        .stage(vk::ShaderStageFlags::VERTEX)
        .module(vert_module)
        .name(SHADER_ENTRY_POINT)
        .build();

    let frag_stage = vk::PipelineShaderStageCreateInfo::builder()
        .stage(vk::ShaderStageFlags::FRAGMENT)
        .module(frag_module)
        .name(SHADER_ENTRY_POINT)
        .build();

    let shader_stages = [vert_stage, frag_stage];

    // The vertices are baked into the vertex shader; nothing to bind
    let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder();

    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
        .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
        .primitive_restart_enable(false);

    let viewport = vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    };
    let scissor = vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    };
    let viewports = [viewport];
    let scissors = [scissor];
    let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
        .viewports(&viewports)
        .scissors(&scissors);

    let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(vk::PolygonMode::FILL)
        .line_width(1.0)
        .cull_mode(vk::CullModeFlags::BACK)
        .front_face(vk::FrontFace::CLOCKWISE)
        .depth_bias_enable(false);

    let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
        .sample_shading_enable(false)
        .rasterization_samples(vk::SampleCountFlags::TYPE_1);

    // Opaque output, no blending
    let color_blend_attachment = vk::PipelineColorBlendAttachmentState::builder()
        .color_write_mask(vk::ColorComponentFlags::RGBA)
        .blend_enable(false)
        .build();
    let color_blend_attachments = [color_blend_attachment];
    let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
        .logic_op_enable(false)
        .attachments(&color_blend_attachments);

    let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
        .stages(&shader_stages)
        .vertex_input_state(&vertex_input)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterizer)
        .multisample_state(&multisampling)
        .color_blend_state(&color_blending)
        .layout(layout)
        .render_pass(render_pass)
        .subpass(0)
        .build();

    let pipelines = unsafe {
        device.create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
    }
    .map_err(|(_, source)| BootstrapError::DriverCall {
        stage: Stage::Pipeline,
        source,
    })?;

    Ok(pipelines[0])
}

/// One framebuffer per image view; on failure the ones already created are
/// released before the error propagates.
fn create_framebuffers(
    device: &ash::Device,
    image_views: &[vk::ImageView],
    render_pass: vk::RenderPass,
    extent: vk::Extent2D,
) -> BootstrapResult<Vec<vk::Framebuffer>> {
    let mut framebuffers = Vec::with_capacity(image_views.len());
    for &image_view in image_views {
        let attachments = [image_view];
        let framebuffer_info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass)
            .attachments(&attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        match unsafe { device.create_framebuffer(&framebuffer_info, None) } {
            Ok(framebuffer) => framebuffers.push(framebuffer),
            Err(source) => {
                for &framebuffer in &framebuffers {
                    unsafe { device.destroy_framebuffer(framebuffer, None) };
                }
                return Err(BootstrapError::DriverCall {
                    stage: Stage::Framebuffer,
                    source,
                });
            }
        }
    }
    Ok(framebuffers)
}
