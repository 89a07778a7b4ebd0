// Backend module - thin wrappers around ash
//
// One file per Vulkan concern. Owning types destroy their handles either in
// Drop (device, swapchain) or through an explicit `destroy` called by the
// renderer in reverse creation order.

pub mod buffer;
pub mod command;
pub mod descriptor;
pub mod device;
pub mod pipeline;
pub mod shader;
pub mod swapchain;
pub mod sync;

pub use device::VulkanDevice;
pub use swapchain::Swapchain;
