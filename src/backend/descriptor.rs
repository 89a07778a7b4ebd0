// Descriptor pool + the single set pointing at the uniform buffer

use anyhow::{Context, Result};
use ash::vk;
use super::buffer::Buffer;
use super::VulkanDevice;

#[derive(Default)]
pub struct DescriptorBinding {
    pub pool: vk::DescriptorPool,
    pub set: vk::DescriptorSet,
}

impl DescriptorBinding {
    /// Allocate one set for `layout` and point binding 0 at `uniform_buffer`
    pub fn new(
        device: &VulkanDevice,
        layout: vk::DescriptorSetLayout,
        uniform_buffer: &Buffer,
    ) -> Result<Self> {
        let pool_sizes = pool_sizes();
        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .max_sets(1)
            .pool_sizes(&pool_sizes);

        let pool = unsafe { device.device.create_descriptor_pool(&pool_info, None) }
            .context("Failed to create descriptor pool")?;

        let set_layouts = [layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pool)
            .set_layouts(&set_layouts);

        let set = match unsafe { device.device.allocate_descriptor_sets(&alloc_info) } {
            Ok(sets) => sets[0],
            Err(e) => {
                unsafe { device.device.destroy_descriptor_pool(pool, None) };
                return Err(e).context("Failed to allocate descriptor set");
            }
        };

        let buffer_infos = [uniform_buffer.descriptor_info()];
        let write = vk::WriteDescriptorSet::builder()
            .dst_set(set)
            .dst_binding(0)
            .dst_array_element(0)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .buffer_info(&buffer_infos)
            .build();

        unsafe { device.device.update_descriptor_sets(&[write], &[]) };

        Ok(Self { pool, set })
    }

    /// Destroying the pool frees the set
    pub fn destroy(&self, device: &ash::Device) {
        unsafe { device.destroy_descriptor_pool(self.pool, None) };
    }
}

fn pool_sizes() -> [vk::DescriptorPoolSize; 1] {
    [vk::DescriptorPoolSize {
        ty: vk::DescriptorType::UNIFORM_BUFFER,
        descriptor_count: 1,
    }]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_holds_one_uniform_buffer() {
        let sizes = pool_sizes();
        assert_eq!(sizes.len(), 1);
        assert_eq!(sizes[0].ty, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(sizes[0].descriptor_count, 1);
    }
}
