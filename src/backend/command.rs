// Command pool, command buffers and the static triangle recording
//
// Nothing in the frame changes, so every swapchain image gets its command
// buffer recorded once and resubmitted each frame. Re-recorded only when the
// swapchain is rebuilt.

use anyhow::{Context, Result};
use ash::vk;
use crate::triangle::VERTEX_COUNT;
use super::VulkanDevice;

/// Everything one recording needs
pub struct TriangleDraw {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
    pub pipeline: vk::Pipeline,
    pub pipeline_layout: vk::PipelineLayout,
    pub descriptor_set: vk::DescriptorSet,
    pub clear_values: [vk::ClearValue; 2],
}

pub fn create_command_pool(device: &VulkanDevice) -> Result<vk::CommandPool> {
    let pool_info = vk::CommandPoolCreateInfo::builder()
        .queue_family_index(device.queue_family)
        .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

    unsafe { device.device.create_command_pool(&pool_info, None) }
        .context("Failed to create command pool")
}

pub fn allocate_command_buffers(
    device: &VulkanDevice,
    command_pool: vk::CommandPool,
    count: u32,
) -> Result<Vec<vk::CommandBuffer>> {
    let alloc_info = vk::CommandBufferAllocateInfo::builder()
        .command_pool(command_pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(count);

    unsafe { device.device.allocate_command_buffers(&alloc_info) }
        .context("Failed to allocate command buffers")
}

/// Color clear from config, depth cleared to the far plane
pub fn clear_values(color: [f32; 4]) -> [vk::ClearValue; 2] {
    [
        vk::ClearValue {
            color: vk::ClearColorValue { float32: color },
        },
        vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth: 1.0,
                stencil: 0,
            },
        },
    ]
}

/// Viewport and scissor covering the whole extent
pub fn full_viewport(extent: vk::Extent2D) -> (vk::Viewport, vk::Rect2D) {
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

    (viewport, scissor)
}

pub fn record_triangle_commands(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    draw: &TriangleDraw,
) -> Result<()> {
    let (viewport, scissor) = full_viewport(draw.extent);

    let render_pass_begin = vk::RenderPassBeginInfo::builder()
        .render_pass(draw.render_pass)
        .framebuffer(draw.framebuffer)
        .render_area(scissor)
        .clear_values(&draw.clear_values);

    unsafe {
        device.begin_command_buffer(cmd, &vk::CommandBufferBeginInfo::builder())
            .context("Failed to begin command buffer")?;

        device.cmd_begin_render_pass(cmd, &render_pass_begin, vk::SubpassContents::INLINE);
        device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, draw.pipeline);
        device.cmd_bind_descriptor_sets(
            cmd,
            vk::PipelineBindPoint::GRAPHICS,
            draw.pipeline_layout,
            0,
            &[draw.descriptor_set],
            &[],
        );
        device.cmd_set_viewport(cmd, 0, &[viewport]);
        device.cmd_set_scissor(cmd, 0, &[scissor]);
        device.cmd_draw(cmd, VERTEX_COUNT, 1, 0, 0);
        device.cmd_end_render_pass(cmd);

        device.end_command_buffer(cmd)
            .context("Failed to end command buffer")?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clear_values() {
        let values = clear_values([0.1, 0.2, 0.3, 1.0]);
        unsafe {
            assert_eq!(values[0].color.float32, [0.1, 0.2, 0.3, 1.0]);
            assert_eq!(values[1].depth_stencil.depth, 1.0);
            assert_eq!(values[1].depth_stencil.stencil, 0);
        }
    }

    #[test]
    fn test_full_viewport_matches_extent() {
        let extent = vk::Extent2D { width: 1264, height: 681 };
        let (viewport, scissor) = full_viewport(extent);

        assert_eq!((viewport.x, viewport.y), (0.0, 0.0));
        assert_eq!((viewport.width, viewport.height), (1264.0, 681.0));
        assert_eq!((viewport.min_depth, viewport.max_depth), (0.0, 1.0));
        assert_eq!(scissor.offset, vk::Offset2D { x: 0, y: 0 });
        assert_eq!(scissor.extent, extent);
    }
}
