// =============================================================================
// RENDERER - Every GPU object the triangle needs, and the frame loop
// =============================================================================
//
// FRAME FLOW:
// 1. Wait for the frame slot's fence
// 2. Acquire a swapchain image
// 3. Submit that image's pre-recorded command buffer
// 4. Present
//
// Handles that are not created yet are null. Destroying a null handle is a
// no-op in Vulkan, so Drop can tear down a half-built renderer.

use anyhow::{Context, Result};
use ash::vk;
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use std::sync::Arc;
use winit::window::Window;

use crate::backend::buffer::{Buffer, DepthBuffer, DEPTH_FORMAT};
use crate::backend::command::{self, TriangleDraw};
use crate::backend::descriptor::DescriptorBinding;
use crate::backend::sync::{self, FrameSync};
use crate::backend::{pipeline, shader, Swapchain, VulkanDevice};
use crate::config::{Config, ShaderConfig};
use crate::triangle::TriangleUniform;

/// Field order matters for Drop: the swapchain holds a device reference and
/// the window must outlive the surface owned by the device.
pub struct Renderer {
    // ─────────────────────────────────────────────────────────────────────────
    // SWAPCHAIN-SIZED (rebuilt on resize)
    // ─────────────────────────────────────────────────────────────────────────
    swapchain: Option<Swapchain>,
    depth_buffer: DepthBuffer,
    framebuffers: Vec<vk::Framebuffer>,
    /// One per swapchain image, recorded once
    command_buffers: Vec<vk::CommandBuffer>,
    /// One per swapchain image, waited on by present
    render_finished: Vec<vk::Semaphore>,
    /// Fence of the frame slot currently using each image
    images_in_flight: Vec<vk::Fence>,

    // ─────────────────────────────────────────────────────────────────────────
    // LIVES AS LONG AS THE RENDERER
    // ─────────────────────────────────────────────────────────────────────────
    render_pass: vk::RenderPass,
    uniform_buffer: Buffer,
    descriptor_set_layout: vk::DescriptorSetLayout,
    pipeline_layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
    descriptors: DescriptorBinding,
    command_pool: vk::CommandPool,
    frame_sync: Vec<FrameSync>,
    current_frame: usize,

    // ─────────────────────────────────────────────────────────────────────────
    // SETTINGS
    // ─────────────────────────────────────────────────────────────────────────
    color_format: vk::Format,
    present_mode: vk::PresentModeKHR,
    clear_color: [f32; 4],
    frames_in_flight: usize,

    // ─────────────────────────────────────────────────────────────────────────
    // STATE FLAGS
    // ─────────────────────────────────────────────────────────────────────────
    needs_resize: bool,
    is_minimized: bool,

    device: Arc<VulkanDevice>,
    window: Arc<Window>,
}

impl Renderer {
    pub fn new(config: &Config, window: Arc<Window>) -> Result<Self> {
        log::info!("Initializing Vulkan...");

        if config.debug.validation_layers && !config.validation_enabled() {
            log::info!("Validation layers are only enabled in debug builds");
        }

        let device = VulkanDevice::new(
            &config.window.title,
            config.validation_enabled(),
            window.raw_display_handle(),
            window.raw_window_handle(),
        )?;

        let present_mode = config.present_mode();
        let size = window.inner_size();
        let swapchain = Swapchain::new(device.clone(), present_mode, size.width, size.height)?;

        let mut renderer = Self {
            color_format: swapchain.format,
            swapchain: Some(swapchain),
            depth_buffer: DepthBuffer::default(),
            framebuffers: Vec::new(),
            command_buffers: Vec::new(),
            render_finished: Vec::new(),
            images_in_flight: Vec::new(),
            render_pass: vk::RenderPass::null(),
            uniform_buffer: Buffer::default(),
            descriptor_set_layout: vk::DescriptorSetLayout::null(),
            pipeline_layout: vk::PipelineLayout::null(),
            pipeline: vk::Pipeline::null(),
            descriptors: DescriptorBinding::default(),
            command_pool: vk::CommandPool::null(),
            frame_sync: Vec::new(),
            current_frame: 0,
            present_mode,
            clear_color: config.graphics.clear_color,
            frames_in_flight: config.frames_in_flight(),
            needs_resize: false,
            is_minimized: false,
            device,
            window,
        };

        // On error the partially built renderer is dropped and cleans up
        renderer.create_resources(&config.shaders)?;

        log::info!("Vulkan initialized successfully!");
        Ok(renderer)
    }

    fn swapchain(&self) -> Result<&Swapchain> {
        self.swapchain.as_ref().context("Swapchain not initialized")
    }

    // =========================================================================
    // INITIALIZATION
    // =========================================================================

    fn create_resources(&mut self, shaders: &ShaderConfig) -> Result<()> {
        let device = self.device.clone();

        self.render_pass = pipeline::create_render_pass(&device, self.color_format, DEPTH_FORMAT)?;

        self.uniform_buffer = Buffer::with_data(
            &device,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            &[TriangleUniform::clip_space()],
        )?;
        log::debug!("Uniform buffer: {} bytes", TriangleUniform::size());

        self.descriptor_set_layout = pipeline::create_descriptor_set_layout(&device)?;
        self.pipeline_layout = pipeline::create_pipeline_layout(&device, self.descriptor_set_layout)?;
        self.pipeline = self.create_pipeline(shaders)?;
        self.descriptors =
            DescriptorBinding::new(&device, self.descriptor_set_layout, &self.uniform_buffer)?;

        self.command_pool = command::create_command_pool(&device)?;

        self.create_swapchain_resources()?;

        for _ in 0..self.frames_in_flight {
            self.frame_sync.push(FrameSync::new(&device)?);
        }

        Ok(())
    }

    /// Shader modules are only needed while the pipeline is being created
    fn create_pipeline(&self, shaders: &ShaderConfig) -> Result<vk::Pipeline> {
        let vert_code = shader::load_spirv(&shaders.vertex)?;
        let frag_code = shader::load_spirv(&shaders.fragment)?;

        let vert_module = shader::create_shader_module(&self.device, &vert_code)?;
        let frag_module = match shader::create_shader_module(&self.device, &frag_code) {
            Ok(module) => module,
            Err(e) => {
                unsafe { self.device.device.destroy_shader_module(vert_module, None) };
                return Err(e);
            }
        };

        let pipeline = pipeline::create_graphics_pipeline(
            &self.device,
            self.render_pass,
            self.pipeline_layout,
            vert_module,
            frag_module,
        );

        unsafe {
            self.device.device.destroy_shader_module(vert_module, None);
            self.device.device.destroy_shader_module(frag_module, None);
        }

        pipeline
    }

    /// Depth buffer, framebuffers, command buffers and present semaphores
    /// for the current swapchain
    fn create_swapchain_resources(&mut self) -> Result<()> {
        let device = self.device.clone();
        let swapchain = self.swapchain.as_ref().context("Swapchain not initialized")?;
        let extent = swapchain.extent;
        let image_count = swapchain.images.len();

        self.depth_buffer = DepthBuffer::new(&device, extent)?;

        self.framebuffers = pipeline::create_framebuffers(
            &device,
            &swapchain.image_views,
            self.depth_buffer.view,
            self.render_pass,
            extent,
        )?;

        self.command_buffers =
            command::allocate_command_buffers(&device, self.command_pool, image_count as u32)?;
        self.record_command_buffers()?;

        self.render_finished = sync::create_semaphores(&device, image_count)?;
        self.images_in_flight = vec![vk::Fence::null(); image_count];

        log::info!("Created {} pre-recorded command buffers", image_count);
        Ok(())
    }

    fn destroy_swapchain_resources(&mut self) {
        let device = &self.device.device;

        sync::destroy_semaphores(device, &self.render_finished);
        self.render_finished.clear();
        self.images_in_flight.clear();

        if !self.command_buffers.is_empty() {
            unsafe { device.free_command_buffers(self.command_pool, &self.command_buffers) };
            self.command_buffers.clear();
        }

        pipeline::destroy_framebuffers(device, &self.framebuffers);
        self.framebuffers.clear();

        self.depth_buffer.destroy(device);
        self.depth_buffer = DepthBuffer::default();
    }

    // =========================================================================
    // COMMAND RECORDING
    // =========================================================================

    fn record_command_buffers(&self) -> Result<()> {
        let extent = self.swapchain()?.extent;

        for (&cmd, &framebuffer) in self.command_buffers.iter().zip(&self.framebuffers) {
            let draw = TriangleDraw {
                render_pass: self.render_pass,
                framebuffer,
                extent,
                pipeline: self.pipeline,
                pipeline_layout: self.pipeline_layout,
                descriptor_set: self.descriptors.set,
                clear_values: command::clear_values(self.clear_color),
            };

            command::record_triangle_commands(&self.device.device, cmd, &draw)?;
        }

        Ok(())
    }

    // =========================================================================
    // RESIZE
    // =========================================================================

    /// Rebuild the swapchain at the next frame
    pub fn request_resize(&mut self) {
        self.needs_resize = true;
    }

    pub fn set_minimized(&mut self, minimized: bool) {
        self.is_minimized = minimized;
    }

    fn recreate_swapchain(&mut self) -> Result<()> {
        let size = self.window.inner_size();

        // Nothing to present to while minimized
        if size.width == 0 || size.height == 0 {
            self.is_minimized = true;
            return Ok(());
        }
        self.is_minimized = false;

        self.device.wait_idle()?;

        self.destroy_swapchain_resources();

        // Only one swapchain per surface, drop the old one first
        self.swapchain = None;
        let swapchain = Swapchain::new(
            self.device.clone(),
            self.present_mode,
            size.width,
            size.height,
        )?;
        let format = swapchain.format;
        self.swapchain = Some(swapchain);

        if format != self.color_format {
            anyhow::bail!(
                "Surface format changed from {:?} to {:?}",
                self.color_format,
                format
            );
        }

        self.create_swapchain_resources()?;
        self.needs_resize = false;

        Ok(())
    }

    // =========================================================================
    // RENDER LOOP
    // =========================================================================

    /// Render a single frame. Returns false when nothing was presented.
    pub fn render_frame(&mut self) -> Result<bool> {
        if self.is_minimized {
            return Ok(false);
        }

        if self.needs_resize {
            self.recreate_swapchain()?;
            if self.is_minimized {
                return Ok(false);
            }
        }

        let device = self.device.clone();
        let frame = &self.frame_sync[self.current_frame];
        let image_available = frame.image_available;
        let fence = frame.in_flight_fence;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 1: Wait until this slot's previous submission is done
        // ─────────────────────────────────────────────────────────────────────
        unsafe { device.device.wait_for_fences(&[fence], true, u64::MAX) }
            .context("Failed waiting for frame fence")?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 2: Acquire next swapchain image
        // ─────────────────────────────────────────────────────────────────────
        let acquired = self.swapchain()?.acquire_next_image(u64::MAX, image_available)?;

        let Some((image_index, suboptimal)) = acquired else {
            // Fence still signaled, the slot is reusable as is
            self.needs_resize = true;
            return Ok(false);
        };

        if suboptimal {
            self.needs_resize = true;
        }

        let image = image_index as usize;

        // Another slot may still be drawing into this image
        let image_fence = self.images_in_flight[image];
        if image_fence != vk::Fence::null() && image_fence != fence {
            unsafe { device.device.wait_for_fences(&[image_fence], true, u64::MAX) }
                .context("Failed waiting for image fence")?;
        }
        self.images_in_flight[image] = fence;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 3: Submit command buffer
        // ─────────────────────────────────────────────────────────────────────
        let wait_semaphores = [image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [self.command_buffers[image]];
        let signal_semaphores = [self.render_finished[image]];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            device.device.reset_fences(&[fence])
                .context("Failed to reset frame fence")?;
            device.device.queue_submit(device.queue, &[submit_info.build()], fence)
                .context("Failed to submit draw commands")?;
        }

        // ─────────────────────────────────────────────────────────────────────
        // STEP 4: Present the image
        // ─────────────────────────────────────────────────────────────────────
        if self.swapchain()?.present(device.queue, image_index, &signal_semaphores)? {
            self.needs_resize = true;
        }

        self.current_frame = sync::next_frame(self.current_frame, self.frames_in_flight);

        Ok(true)
    }
}

// =============================================================================
// CLEANUP
// =============================================================================

impl Drop for Renderer {
    fn drop(&mut self) {
        log::info!("Cleaning up Vulkan resources...");

        let _ = self.device.wait_idle();

        let device = self.device.clone();
        let device = &device.device;

        // Reverse order of creation
        for frame in &self.frame_sync {
            frame.destroy(device);
        }

        self.destroy_swapchain_resources();

        unsafe {
            device.destroy_command_pool(self.command_pool, None);
        }

        self.descriptors.destroy(device);

        unsafe {
            device.destroy_pipeline(self.pipeline, None);
            device.destroy_pipeline_layout(self.pipeline_layout, None);
            device.destroy_descriptor_set_layout(self.descriptor_set_layout, None);
        }

        self.uniform_buffer.destroy(device);

        unsafe {
            device.destroy_render_pass(self.render_pass, None);
        }

        self.swapchain = None;

        log::info!("Cleanup complete");
    }
}
