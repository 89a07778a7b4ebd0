// GPU memory: the uniform buffer and the depth buffer
//
// Both are allocated straight from vkAllocateMemory after a linear scan over
// the device's memory types.

use anyhow::{Context, Result};
use ash::vk;
use super::VulkanDevice;

/// Depth format for the single depth attachment. D16 is required to be
/// supported as an optimal-tiling depth attachment on every device.
pub const DEPTH_FORMAT: vk::Format = vk::Format::D16_UNORM;

/// Buffer plus the memory backing it
#[derive(Default)]
pub struct Buffer {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
}

impl Buffer {
    /// Create a host-visible buffer and fill it with `data`
    pub fn with_data<T: Copy>(
        device: &VulkanDevice,
        usage: vk::BufferUsageFlags,
        data: &[T],
    ) -> Result<Self> {
        let size = std::mem::size_of_val(data) as vk::DeviceSize;

        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.device.create_buffer(&buffer_info, None) }
            .context("Failed to create buffer")?;

        let mem_requirements = unsafe { device.device.get_buffer_memory_requirements(buffer) };

        let memory = match allocate(
            device,
            mem_requirements,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ) {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.device.destroy_buffer(buffer, None) };
                return Err(e.context("Failed to allocate buffer memory"));
            }
        };

        let this = Self { buffer, memory, size };

        // Coherent memory, no flush needed after the copy
        let upload = unsafe {
            device
                .device
                .map_memory(memory, 0, size, vk::MemoryMapFlags::empty())
                .map(|ptr| {
                    (ptr as *mut T).copy_from_nonoverlapping(data.as_ptr(), data.len());
                    device.device.unmap_memory(memory);
                })
                .and_then(|()| device.device.bind_buffer_memory(buffer, memory, 0))
        };

        if let Err(e) = upload {
            this.destroy(&device.device);
            return Err(e).context("Failed to upload buffer data");
        }

        Ok(this)
    }

    /// Descriptor info covering the whole buffer
    pub fn descriptor_info(&self) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo {
            buffer: self.buffer,
            offset: 0,
            range: self.size,
        }
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_buffer(self.buffer, None);
            device.free_memory(self.memory, None);
        }
    }
}

/// Depth image, its memory and view. Always `DEPTH_FORMAT`.
#[derive(Default)]
pub struct DepthBuffer {
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub view: vk::ImageView,
}

impl DepthBuffer {
    pub fn new(device: &VulkanDevice, extent: vk::Extent2D) -> Result<Self> {
        let format = DEPTH_FORMAT;

        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let image = unsafe { device.device.create_image(&image_info, None) }
            .context("Failed to create depth image")?;

        let mem_requirements = unsafe { device.device.get_image_memory_requirements(image) };

        let memory = match allocate(device, mem_requirements, vk::MemoryPropertyFlags::DEVICE_LOCAL) {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.device.destroy_image(image, None) };
                return Err(e.context("Failed to allocate depth image memory"));
            }
        };

        if let Err(e) = unsafe { device.device.bind_image_memory(image, memory, 0) } {
            unsafe {
                device.device.destroy_image(image, None);
                device.device.free_memory(memory, None);
            }
            return Err(e).context("Failed to bind depth image memory");
        }

        let view_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::DEPTH,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        let view = match unsafe { device.device.create_image_view(&view_info, None) } {
            Ok(view) => view,
            Err(e) => {
                unsafe {
                    device.device.destroy_image(image, None);
                    device.device.free_memory(memory, None);
                }
                return Err(e).context("Failed to create depth image view");
            }
        };

        log::debug!("Created depth buffer: {}x{} {:?}", extent.width, extent.height, format);

        Ok(Self { image, memory, view })
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_image_view(self.view, None);
            device.destroy_image(self.image, None);
            device.free_memory(self.memory, None);
        }
    }
}

fn allocate(
    device: &VulkanDevice,
    requirements: vk::MemoryRequirements,
    properties: vk::MemoryPropertyFlags,
) -> Result<vk::DeviceMemory> {
    let memory_type_index = find_memory_type(
        &device.memory_properties,
        requirements.memory_type_bits,
        properties,
    )?;

    let alloc_info = vk::MemoryAllocateInfo::builder()
        .allocation_size(requirements.size)
        .memory_type_index(memory_type_index);

    let memory = unsafe { device.device.allocate_memory(&alloc_info, None) }
        .context("vkAllocateMemory failed")?;

    Ok(memory)
}

/// First memory type allowed by `type_bits` that has all of `properties`
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    properties: vk::MemoryPropertyFlags,
) -> Result<u32> {
    let count = memory_properties.memory_type_count.min(vk::MAX_MEMORY_TYPES as u32);

    for i in 0..count {
        let has_type = (type_bits & (1 << i)) != 0;
        let has_properties = memory_properties.memory_types[i as usize]
            .property_flags
            .contains(properties);

        if has_type && has_properties {
            return Ok(i);
        }
    }

    anyhow::bail!(
        "No memory type with {:?} in type bits {:#b}",
        properties,
        type_bits
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_properties(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (slot, &flags) in props.memory_types.iter_mut().zip(types) {
            slot.property_flags = flags;
        }
        props
    }

    fn typical_discrete_gpu() -> vk::PhysicalDeviceMemoryProperties {
        memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            vk::MemoryPropertyFlags::HOST_VISIBLE
                | vk::MemoryPropertyFlags::HOST_COHERENT
                | vk::MemoryPropertyFlags::HOST_CACHED,
            vk::MemoryPropertyFlags::DEVICE_LOCAL
                | vk::MemoryPropertyFlags::HOST_VISIBLE
                | vk::MemoryPropertyFlags::HOST_COHERENT,
        ])
    }

    #[test]
    fn test_depth_format_is_depth() {
        assert!(matches!(
            DEPTH_FORMAT,
            vk::Format::D16_UNORM | vk::Format::D32_SFLOAT | vk::Format::D24_UNORM_S8_UINT
        ));
    }

    #[test]
    fn test_finds_first_matching_type() {
        let props = typical_discrete_gpu();
        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;

        assert_eq!(find_memory_type(&props, 0b1111, host).unwrap(), 1);
        assert_eq!(
            find_memory_type(&props, 0b1111, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap(),
            0
        );
    }

    #[test]
    fn test_respects_type_bits() {
        let props = typical_discrete_gpu();
        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;

        // Type 1 excluded by the resource's requirements
        assert_eq!(find_memory_type(&props, 0b1100, host).unwrap(), 2);
        assert_eq!(
            find_memory_type(&props, 0b1000, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap(),
            3
        );
    }

    #[test]
    fn test_properties_must_all_be_present() {
        let props = memory_properties(&[vk::MemoryPropertyFlags::HOST_VISIBLE]);
        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        assert!(find_memory_type(&props, 0b1, host).is_err());
    }

    #[test]
    fn test_ignores_types_past_count() {
        let mut props = memory_properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        props.memory_types[1].property_flags = vk::MemoryPropertyFlags::HOST_VISIBLE;

        assert!(find_memory_type(&props, 0b11, vk::MemoryPropertyFlags::HOST_VISIBLE).is_err());
    }

    #[test]
    fn test_no_type_bits() {
        let props = typical_discrete_gpu();
        let err = find_memory_type(&props, 0, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap_err();
        assert!(err.to_string().contains("No memory type"));
    }
}
