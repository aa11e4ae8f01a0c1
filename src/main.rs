// =============================================================================
// VULKAN TRIANGLE BOOTSTRAP
// =============================================================================
//
// Brings up the full chain of driver objects needed to draw one triangle:
//
//   instance -> surface -> physical device -> logical device -> swapchain
//            -> render pass -> pipeline -> framebuffers
//
// and tears it down in exactly the reverse order. There is no frame loop
// yet: the steady state polls window events and nothing else.

pub mod backend;
pub mod config;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use ash::vk;
use backend::{
    PipelineResources, Stage, Surface, SurfaceDetails, Swapchain, SwapchainConfig, VulkanDevice,
    VulkanInstance,
};
use config::Config;
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Window, WindowAttributes},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    let config = Config::load();

    init_logging();
    log::info!("Starting Vulkan bootstrap");
    log::info!("Window: {}x{}", config.window.width, config.window.height);

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    // A bootstrap failure inside the event loop surfaces here, so the
    // process exits nonzero after the diagnostic has been printed
    match app.fatal.take() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn sequence(stages: &[Stage]) -> String {
    stages
        .iter()
        .map(Stage::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

fn init_logging() {
    use env_logger::Builder;
    use log::LevelFilter;

    let mut builder = Builder::from_default_env();
    builder.filter_level(LevelFilter::Info);
    builder.init();
}

// =============================================================================
// BOOTSTRAP CHAIN
// =============================================================================

/// Every driver object the bootstrap creates, owned as a chain.
///
/// Field order is teardown order: framebuffers, pipeline, pipeline layout and
/// render pass first, then image views and swapchain, then the logical
/// device, surface, debug messenger and instance. No handle is destroyed
/// before the handles constructed from it.
struct Renderer {
    pipeline: PipelineResources,
    swapchain: Swapchain,
    device: Arc<VulkanDevice>,
    _surface: Surface,
    _instance: Arc<VulkanInstance>,
}

impl Renderer {
    /// Run the whole negotiation sequence against a live window. Each step
    /// feeds the next; the first failure short-circuits out, and whatever was
    /// already constructed is released by the wrappers on the way.
    fn bootstrap(config: &Config, window: &Window) -> Result<Self> {
        log::debug!("Bringing up: {}", sequence(&Stage::CONSTRUCTION_ORDER));

        let enable_validation = cfg!(debug_assertions) && config.debug.validation_layers;

        let display = window.raw_display_handle();
        let window_handle = window.raw_window_handle();

        let instance = VulkanInstance::new(&config.window.title, display, enable_validation)?;
        let surface = Surface::new(instance.clone(), display, window_handle)?;
        let device = VulkanDevice::new(instance.clone(), &surface)?;

        let details = SurfaceDetails::query(&surface, device.physical_device)?;
        let requested = vk::Extent2D {
            width: config.window.width,
            height: config.window.height,
        };
        let swapchain_config =
            SwapchainConfig::negotiate(&details, requested, &device.queue_families)?;
        let swapchain = Swapchain::new(device.clone(), &surface, &swapchain_config)?;

        let pipeline = PipelineResources::new(
            device.clone(),
            &swapchain,
            Path::new(&config.shaders.vertex),
            Path::new(&config.shaders.fragment),
        )?;

        Ok(Self {
            pipeline,
            swapchain,
            device,
            _surface: surface,
            _instance: instance,
        })
    }
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

struct App {
    config: Config,
    window: Option<Arc<Window>>,
    renderer: Option<Renderer>,
    /// First fatal error, carried out of the event loop to the process exit
    fatal: Option<anyhow::Error>,
}

impl App {
    fn new(config: Config) -> Self {
        Self {
            config,
            window: None,
            renderer: None,
            fatal: None,
        }
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    /// Called when the application is ready to create windows.
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        // Resize is unhandled, so the window is fixed-size
        let window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ))
            .with_resizable(false);

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                log::error!("Failed to create window: {:?}", e);
                self.fatal = Some(e.into());
                event_loop.exit();
                return;
            }
        };

        match Renderer::bootstrap(&self.config, &window) {
            Ok(renderer) => {
                log::info!(
                    "Bootstrap complete: {} images, {} framebuffers",
                    renderer.swapchain.images.len(),
                    renderer.pipeline.framebuffers.len()
                );
                self.renderer = Some(renderer);
            }
            Err(e) => {
                log::error!("Bootstrap failed: {:?}", e);
                self.fatal = Some(e);
                event_loop.exit();
                return;
            }
        }

        self.window = Some(window);
    }

    /// The steady state: keep the window responsive, nothing more.
    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                if let Some(ref renderer) = self.renderer {
                    let _ = renderer.device.wait_idle();
                }
                event_loop.exit();
            }

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed() {
                    if let PhysicalKey::Code(KeyCode::Escape) = event.physical_key {
                        log::info!("ESC pressed, exiting...");
                        event_loop.exit();
                    }
                }
            }

            _ => {}
        }
    }
}

// =============================================================================
// CLEANUP
// =============================================================================

impl Drop for App {
    fn drop(&mut self) {
        log::info!("Cleaning up Vulkan resources...");

        if let Some(renderer) = self.renderer.take() {
            let _ = renderer.device.wait_idle();
            log::debug!("Tearing down: {}", sequence(&Stage::TEARDOWN_ORDER));
            // Dropping the chain releases framebuffers, pipeline, layout,
            // render pass, image views, swapchain, device, surface, debug
            // messenger and instance, in that order
            drop(renderer);
        }

        log::info!("Cleanup complete");
    }
}
