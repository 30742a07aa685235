/// Vulkan headless device
///
/// Creates an instance (API 1.2), picks the first GPU with a graphics queue
/// that supports timeline semaphores and buffer device addresses, and hands
/// out descriptor heaps and the submission queue. No surface, no swapchain.

use crate::vulkan_context::{GpuContext, SOURCE};
use crate::vulkan_descriptor_heap::VulkanDescriptorHeap;
use crate::vulkan_submission_queue::VulkanSubmissionQueue;
use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use nimbus_renderer::nimbus::backend::{GraphicsDevice, NativeDescriptorHeap, NativeDescriptorHeapDesc, SubmissionQueue};
use nimbus_renderer::nimbus::{Error, Result};
use nimbus_renderer::{engine_error, engine_info};
use std::ffi::CString;
use std::sync::Arc;

/// Device creation options
#[derive(Debug, Clone)]
pub struct VulkanDeviceConfig {
    /// Application name reported to the driver
    pub app_name: String,
    /// Enable VK_LAYER_KHRONOS_validation and route its messages to the log
    ///
    /// Ignored unless the crate is built with `vulkan-validation`.
    pub enable_validation: bool,
}

impl Default for VulkanDeviceConfig {
    fn default() -> Self {
        Self {
            app_name: "Nimbus Application".to_string(),
            enable_validation: cfg!(all(feature = "vulkan-validation", debug_assertions)),
        }
    }
}

/// Vulkan implementation of [`GraphicsDevice`]
pub struct VulkanDevice {
    gpu_context: Arc<GpuContext>,
    device_name: String,
}

fn init_failed(what: &str, detail: impl std::fmt::Debug) -> Error {
    engine_error!(SOURCE, "{}: {:?}", what, detail);
    Error::InitializationFailed(format!("{}: {:?}", what, detail))
}

impl VulkanDevice {
    pub fn new(config: VulkanDeviceConfig) -> Result<Self> {
        let enable_validation = config.enable_validation && cfg!(feature = "vulkan-validation");

        unsafe {
            let entry = ash::Entry::load()
                .map_err(|e| init_failed("Failed to load Vulkan library", e))?;

            let app_name = CString::new(config.app_name.clone())
                .map_err(|e| init_failed("Invalid application name", e))?;
            let app_info = vk::ApplicationInfo::default()
                .application_name(&app_name)
                .application_version(vk::make_api_version(0, 1, 0, 0))
                .engine_name(c"Nimbus")
                .engine_version(vk::make_api_version(0, 0, 1, 0))
                .api_version(vk::API_VERSION_1_2);

            let mut extension_names = Vec::new();
            let mut layer_names = Vec::new();
            if enable_validation {
                extension_names.push(ash::ext::debug_utils::NAME.as_ptr());
                layer_names.push(c"VK_LAYER_KHRONOS_validation".as_ptr());
            }

            let create_info = vk::InstanceCreateInfo::default()
                .application_info(&app_info)
                .enabled_layer_names(&layer_names)
                .enabled_extension_names(&extension_names);

            let instance = entry
                .create_instance(&create_info, None)
                .map_err(|e| init_failed("Failed to create Vulkan instance", e))?;

            let (debug_utils_loader, debug_messenger) = Self::create_debug_messenger(&entry, &instance, enable_validation)?;

            // Pick the first device that can run the frame loop
            let physical_devices = instance
                .enumerate_physical_devices()
                .map_err(|e| init_failed("Failed to enumerate physical devices", e))?;

            let (physical_device, graphics_family_index) = physical_devices
                .into_iter()
                .find_map(|pd| {
                    if !Self::supports_required_features(&instance, pd) {
                        return None;
                    }
                    instance
                        .get_physical_device_queue_family_properties(pd)
                        .iter()
                        .position(|qf| qf.queue_flags.contains(vk::QueueFlags::GRAPHICS))
                        .map(|index| (pd, index as u32))
                })
                .ok_or_else(|| init_failed("No suitable GPU found", "timeline semaphores and buffer device address required"))?;

            let properties = instance.get_physical_device_properties(physical_device);
            let device_name = properties
                .device_name_as_c_str()
                .ok()
                .and_then(|name| name.to_str().ok())
                .unwrap_or("unknown")
                .to_string();

            let queue_priorities = [1.0];
            let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
                .queue_family_index(graphics_family_index)
                .queue_priorities(&queue_priorities)];

            let mut features12 = vk::PhysicalDeviceVulkan12Features::default()
                .timeline_semaphore(true)
                .buffer_device_address(true);

            let device_create_info = vk::DeviceCreateInfo::default()
                .queue_create_infos(&queue_create_infos)
                .push_next(&mut features12);

            let device = instance
                .create_device(physical_device, &device_create_info, None)
                .map_err(|e| init_failed("Failed to create logical device", e))?;

            let graphics_queue = device.get_device_queue(graphics_family_index, 0);

            let allocator = Allocator::new(&AllocatorCreateDesc {
                instance: instance.clone(),
                device: device.clone(),
                physical_device,
                debug_settings: Default::default(),
                buffer_device_address: true,
                allocation_sizes: Default::default(),
            })
            .map_err(|e| init_failed("Failed to create GPU allocator", e))?;

            engine_info!(SOURCE, "Vulkan device '{}' created (validation: {})", device_name, enable_validation);

            Ok(Self {
                gpu_context: Arc::new(GpuContext::new(
                    entry,
                    instance,
                    physical_device,
                    properties.limits,
                    device,
                    allocator,
                    graphics_queue,
                    graphics_family_index,
                    debug_utils_loader,
                    debug_messenger,
                )),
                device_name,
            })
        }
    }

    /// Shared GPU context (device, allocator, queue)
    pub fn gpu_context(&self) -> &Arc<GpuContext> {
        &self.gpu_context
    }

    /// Name of the selected physical device
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    unsafe fn supports_required_features(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> bool {
        let properties = instance.get_physical_device_properties(physical_device);
        if properties.api_version < vk::API_VERSION_1_2 {
            return false;
        }
        let mut features12 = vk::PhysicalDeviceVulkan12Features::default();
        let mut features2 = vk::PhysicalDeviceFeatures2::default().push_next(&mut features12);
        instance.get_physical_device_features2(physical_device, &mut features2);
        features12.timeline_semaphore == vk::TRUE && features12.buffer_device_address == vk::TRUE
    }

    #[cfg(feature = "vulkan-validation")]
    unsafe fn create_debug_messenger(
        entry: &ash::Entry,
        instance: &ash::Instance,
        enable_validation: bool,
    ) -> Result<(Option<ash::ext::debug_utils::Instance>, Option<vk::DebugUtilsMessengerEXT>)> {
        if !enable_validation {
            return Ok((None, None));
        }
        let debug_utils = ash::ext::debug_utils::Instance::new(entry, instance);
        let messenger = debug_utils
            .create_debug_utils_messenger(&crate::vulkan_debug::messenger_create_info(), None)
            .map_err(|e| init_failed("Failed to create debug messenger", e))?;
        Ok((Some(debug_utils), Some(messenger)))
    }

    #[cfg(not(feature = "vulkan-validation"))]
    unsafe fn create_debug_messenger(
        _entry: &ash::Entry,
        _instance: &ash::Instance,
        _enable_validation: bool,
    ) -> Result<(Option<ash::ext::debug_utils::Instance>, Option<vk::DebugUtilsMessengerEXT>)> {
        Ok((None, None))
    }
}

impl GraphicsDevice for VulkanDevice {
    fn backend_name(&self) -> &str {
        "vulkan"
    }

    fn create_descriptor_heap(&mut self, desc: &NativeDescriptorHeapDesc) -> Result<Box<dyn NativeDescriptorHeap>> {
        Ok(Box::new(VulkanDescriptorHeap::new(Arc::clone(&self.gpu_context), desc)?))
    }

    fn create_submission_queue(&mut self, frame_count: usize) -> Result<Box<dyn SubmissionQueue>> {
        Ok(Box::new(VulkanSubmissionQueue::new(Arc::clone(&self.gpu_context), frame_count)?))
    }
}
