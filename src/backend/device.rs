// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Instance creation with the window system's surface extensions
// - Optional validation layer + debug messenger
// - Surface creation for the window
// - Physical device and queue family selection
// - Logical device + queue creation

use anyhow::{Context, Result};
use ash::extensions::{ext::DebugUtils, khr};
use ash::{vk, Entry};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::ffi::{CStr, CString};
use std::sync::Arc;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Vulkan device wrapper with automatic cleanup
pub struct VulkanDevice {
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub instance: ash::Instance,
    _entry: Entry,

    // Presentation target
    pub surface: vk::SurfaceKHR,
    pub surface_loader: khr::Surface,

    // One queue does graphics and present
    pub queue: vk::Queue,
    pub queue_family: u32,

    debug_utils: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,

    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
}

impl VulkanDevice {
    /// Create the instance, surface and logical device for a window
    ///
    /// # Arguments
    /// * `app_name` - Application name reported to the driver
    /// * `enable_validation` - Request the Khronos validation layer
    /// * `display_handle`, `window_handle` - The window to present to
    pub fn new(
        app_name: &str,
        enable_validation: bool,
        display_handle: RawDisplayHandle,
        window_handle: RawWindowHandle,
    ) -> Result<Arc<Self>> {
        log::info!("Creating Vulkan device: {}", app_name);

        let entry = unsafe { Entry::load() }
            .context("Failed to load Vulkan library. Is Vulkan installed?")?;

        let enable_validation = enable_validation && Self::validation_layer_available(&entry);

        let instance = Self::create_instance(&entry, app_name, enable_validation, display_handle)?;

        // Instance-level objects created so far, torn down if a later step fails
        let debug_utils = if enable_validation {
            let messenger = Self::setup_debug_messenger(&entry, &instance);
            Some(or_cleanup(messenger, || unsafe { instance.destroy_instance(None) })?)
        } else {
            None
        };

        let destroy_instance = || unsafe {
            if let Some((loader, messenger)) = &debug_utils {
                loader.destroy_debug_utils_messenger(*messenger, None);
            }
            instance.destroy_instance(None);
        };

        let surface_loader = khr::Surface::new(&entry, &instance);
        let surface = unsafe {
            ash_window::create_surface(&entry, &instance, display_handle, window_handle, None)
        }
        .context("Failed to create window surface");
        let surface = or_cleanup(surface, &destroy_instance)?;

        let destroy_surface = || {
            unsafe { surface_loader.destroy_surface(surface, None) };
            destroy_instance();
        };

        let picked = Self::pick_physical_device(&instance, &surface_loader, surface);
        let (physical_device, queue_family) = or_cleanup(picked, &destroy_surface)?;

        let logical = Self::create_logical_device(&instance, physical_device, queue_family);
        let (device, queue) = or_cleanup(logical, &destroy_surface)?;

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };

        log::info!("Selected GPU: {}", device_name(&properties));
        log::info!("Queue family: {}", queue_family);

        Ok(Arc::new(Self {
            device,
            physical_device,
            instance,
            _entry: entry,
            surface,
            surface_loader,
            queue,
            queue_family,
            debug_utils,
            memory_properties,
        }))
    }

    fn validation_layer_available(entry: &Entry) -> bool {
        #[allow(unused_unsafe)]
        let layers = unsafe { entry.enumerate_instance_layer_properties() }.unwrap_or_default();

        let available = layers
            .iter()
            .any(|layer| unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) } == VALIDATION_LAYER);

        if !available {
            log::warn!(
                "{} requested but not installed, continuing without validation",
                VALIDATION_LAYER.to_string_lossy()
            );
        }

        available
    }

    fn create_instance(
        entry: &Entry,
        app_name: &str,
        enable_validation: bool,
        display_handle: RawDisplayHandle,
    ) -> Result<ash::Instance> {
        let app_name_cstr = CString::new(app_name)?;
        let engine_name = CString::new("vk-triangle")?;

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_0);

        // Surface extensions for whatever window system we are running on
        let mut extensions = ash_window::enumerate_required_extensions(display_handle)
            .context("Window system has no Vulkan surface support")?
            .to_vec();

        if enable_validation {
            extensions.push(DebugUtils::name().as_ptr());
        }

        let layer_names = if enable_validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .context("Failed to create Vulkan instance")?;

        Ok(instance)
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> Result<(DebugUtils, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = DebugUtils::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
            .context("Failed to create debug messenger")?;

        Ok((debug_utils, messenger))
    }

    fn pick_physical_device(
        instance: &ash::Instance,
        surface_loader: &khr::Surface,
        surface: vk::SurfaceKHR,
    ) -> Result<(vk::PhysicalDevice, u32)> {
        let devices = unsafe { instance.enumerate_physical_devices() }
            .context("Failed to enumerate physical devices")?;

        if devices.is_empty() {
            anyhow::bail!("No Vulkan-capable GPU found");
        }

        log::info!("{} physical device(s) found", devices.len());

        let mut best_device = None;
        let mut best_score = 0;

        for (index, &device) in devices.iter().enumerate() {
            let props = unsafe { instance.get_physical_device_properties(device) };
            let queue_families =
                unsafe { instance.get_physical_device_queue_family_properties(device) };

            log_physical_device(index, &props, &queue_families);

            if !Self::supports_swapchain(instance, device) {
                log::info!("  Skipped: no {}", khr::Swapchain::name().to_string_lossy());
                continue;
            }

            let queue_family = find_queue_family(&queue_families, |family| unsafe {
                surface_loader
                    .get_physical_device_surface_support(device, family, surface)
                    .unwrap_or(false)
            });

            let Some(queue_family) = queue_family else {
                log::info!("  Skipped: no queue family with graphics and present");
                continue;
            };

            let score = device_type_score(props.device_type);
            if score > best_score {
                best_score = score;
                best_device = Some((device, queue_family));
            }
        }

        best_device.ok_or_else(|| anyhow::anyhow!("No GPU can present to this window"))
    }

    fn supports_swapchain(instance: &ash::Instance, device: vk::PhysicalDevice) -> bool {
        let extensions =
            unsafe { instance.enumerate_device_extension_properties(device) }.unwrap_or_default();

        has_extension(&extensions, khr::Swapchain::name())
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        queue_family: u32,
    ) -> Result<(ash::Device, vk::Queue)> {
        let queue_priorities = [1.0];
        let queue_create_info = vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(queue_family)
            .queue_priorities(&queue_priorities)
            .build();

        let extensions = [khr::Swapchain::name().as_ptr()];

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(std::slice::from_ref(&queue_create_info))
            .enabled_extension_names(&extensions);

        let device = unsafe { instance.create_device(physical_device, &create_info, None) }
            .context("Failed to create logical device")?;

        let queue = unsafe { device.get_device_queue(queue_family, 0) };

        Ok((device, queue))
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }.context("vkDeviceWaitIdle failed")?;
        Ok(())
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        let _ = self.wait_idle();

        // Reverse creation order
        unsafe {
            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);

            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            self.instance.destroy_instance(None);
        }
    }
}

/// Run `cleanup` before handing back an error
fn or_cleanup<T>(result: Result<T>, cleanup: impl FnOnce()) -> Result<T> {
    if result.is_err() {
        cleanup();
    }
    result
}

fn has_extension(extensions: &[vk::ExtensionProperties], name: &CStr) -> bool {
    extensions.iter().any(|ext| {
        let ext_name = unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) };
        ext_name == name
    })
}

/// Preference order when several GPUs qualify
pub fn device_type_score(device_type: vk::PhysicalDeviceType) -> u32 {
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 10,
        vk::PhysicalDeviceType::CPU => 5,
        _ => 1,
    }
}

/// First queue family that can both draw and present
pub fn find_queue_family<F>(families: &[vk::QueueFamilyProperties], mut supports_present: F) -> Option<u32>
where
    F: FnMut(u32) -> bool,
{
    families
        .iter()
        .enumerate()
        .filter(|(_, props)| props.queue_count > 0)
        .filter(|(_, props)| props.queue_flags.contains(vk::QueueFlags::GRAPHICS))
        .map(|(i, _)| i as u32)
        .find(|&i| supports_present(i))
}

fn device_name(properties: &vk::PhysicalDeviceProperties) -> String {
    unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
        .to_string_lossy()
        .into_owned()
}

fn log_physical_device(
    index: usize,
    props: &vk::PhysicalDeviceProperties,
    queue_families: &[vk::QueueFamilyProperties],
) {
    log::info!("physical_devices[{}]: {}", index, device_name(props));
    log::info!(
        "  Vulkan API {}.{}.{}, driver {}.{}.{}",
        vk::api_version_major(props.api_version),
        vk::api_version_minor(props.api_version),
        vk::api_version_patch(props.api_version),
        vk::api_version_major(props.driver_version),
        vk::api_version_minor(props.driver_version),
        vk::api_version_patch(props.driver_version),
    );
    log::info!(
        "  Vendor: {:#06x}, device: {:#06x}, type: {:?}",
        props.vendor_id,
        props.device_id,
        props.device_type
    );

    for (i, family) in queue_families.iter().enumerate() {
        let granularity = family.min_image_transfer_granularity;
        log::debug!(
            "  queue_families[{}]: {:?}, {} queue(s), transfer granularity ({}, {}, {})",
            i,
            family.queue_flags,
            family.queue_count,
            granularity.width,
            granularity.height,
            granularity.depth
        );
    }
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message.to_string_lossy());
        }
        _ => {
            log::debug!("[Vulkan] {}", message.to_string_lossy());
        }
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags, queue_count: u32) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count,
            ..Default::default()
        }
    }

    #[test]
    fn test_discrete_preferred_over_integrated() {
        assert!(
            device_type_score(vk::PhysicalDeviceType::DISCRETE_GPU)
                > device_type_score(vk::PhysicalDeviceType::INTEGRATED_GPU)
        );
        assert!(
            device_type_score(vk::PhysicalDeviceType::INTEGRATED_GPU)
                > device_type_score(vk::PhysicalDeviceType::VIRTUAL_GPU)
        );
        assert!(
            device_type_score(vk::PhysicalDeviceType::CPU)
                > device_type_score(vk::PhysicalDeviceType::OTHER)
        );
    }

    #[test]
    fn test_every_device_type_scores_above_zero() {
        // best_score starts at zero, so every candidate must be able to win
        assert!(device_type_score(vk::PhysicalDeviceType::OTHER) > 0);
    }

    #[test]
    fn test_queue_family_needs_graphics() {
        let families = [
            family(vk::QueueFlags::TRANSFER, 2),
            family(vk::QueueFlags::COMPUTE, 4),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, 16),
        ];
        assert_eq!(find_queue_family(&families, |_| true), Some(2));
    }

    #[test]
    fn test_queue_family_needs_present() {
        let families = [
            family(vk::QueueFlags::GRAPHICS, 1),
            family(vk::QueueFlags::GRAPHICS, 1),
        ];
        assert_eq!(find_queue_family(&families, |i| i == 1), Some(1));
    }

    #[test]
    fn test_queue_family_skips_empty_families() {
        let families = [family(vk::QueueFlags::GRAPHICS, 0), family(vk::QueueFlags::GRAPHICS, 1)];
        assert_eq!(find_queue_family(&families, |_| true), Some(1));
    }

    #[test]
    fn test_no_suitable_queue_family() {
        let families = [family(vk::QueueFlags::GRAPHICS, 1), family(vk::QueueFlags::TRANSFER, 1)];
        assert_eq!(find_queue_family(&families, |_| false), None);
        assert_eq!(find_queue_family(&[], |_| true), None);
    }

    #[test]
    fn test_present_only_queried_for_graphics_families() {
        let families = [family(vk::QueueFlags::TRANSFER, 1), family(vk::QueueFlags::GRAPHICS, 1)];
        let mut queried = Vec::new();
        find_queue_family(&families, |i| {
            queried.push(i);
            true
        });
        assert_eq!(queried, vec![1]);
    }

    fn extension(name: &CStr) -> vk::ExtensionProperties {
        let mut props = vk::ExtensionProperties::default();
        for (dst, src) in props.extension_name.iter_mut().zip(name.to_bytes_with_nul()) {
            *dst = *src as std::ffi::c_char;
        }
        props
    }

    #[test]
    fn test_has_extension() {
        let extensions = [extension(c"VK_KHR_maintenance1"), extension(khr::Swapchain::name())];
        assert!(has_extension(&extensions, khr::Swapchain::name()));
        assert!(!has_extension(&extensions, c"VK_KHR_swapchain_mutable_format"));
        assert!(!has_extension(&[], khr::Swapchain::name()));
    }

    #[test]
    fn test_cleanup_runs_only_on_error() {
        let mut cleaned = 0;
        let ok = or_cleanup(Ok(7), || cleaned += 1);
        assert_eq!(ok.unwrap(), 7);
        assert_eq!(cleaned, 0);

        let err = or_cleanup(Err::<u32, _>(anyhow::anyhow!("No GPU can present to this window")), || {
            cleaned += 1
        });
        assert!(err.is_err());
        assert_eq!(cleaned, 1);
    }

    #[test]
    fn test_cleanup_chain_tears_down_in_reverse_order() {
        let order = std::cell::RefCell::new(Vec::new());
        let destroy_instance = || order.borrow_mut().push("instance");
        let destroy_surface = || {
            order.borrow_mut().push("surface");
            destroy_instance();
        };

        let picked: Result<(vk::PhysicalDevice, u32)> = Err(anyhow::anyhow!("no device"));
        assert!(or_cleanup(picked, &destroy_surface).is_err());
        assert_eq!(*order.borrow(), vec!["surface", "instance"]);
    }

    #[test]
    fn test_device_name() {
        let mut props = vk::PhysicalDeviceProperties::default();
        for (dst, src) in props.device_name.iter_mut().zip(b"Test GPU\0") {
            *dst = *src as std::ffi::c_char;
        }
        assert_eq!(device_name(&props), "Test GPU");
    }
}
