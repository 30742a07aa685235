/// GpuContext - Shared GPU objects for every Vulkan resource
///
/// Contains everything the queue and the descriptor heaps need:
/// - Device for Vulkan API calls
/// - Allocator for memory management
/// - Graphics queue and its family
///
/// Shared through `Arc`. The last owner to go away destroys the allocator,
/// the debug messenger, the device and the instance, in that order.

use ash::vk;
use gpu_allocator::vulkan::Allocator;
use nimbus_renderer::engine_error;
use nimbus_renderer::nimbus::Error;
use std::mem::ManuallyDrop;
use std::sync::{Arc, Mutex};

pub(crate) const SOURCE: &str = "nimbus::vulkan";

/// Shared GPU context for all Vulkan objects
pub struct GpuContext {
    /// Vulkan logical device
    pub device: ash::Device,

    /// GPU memory allocator (shared, requires mutex for thread safety)
    /// Wrapped in ManuallyDrop so it is dropped BEFORE the device is destroyed
    pub allocator: ManuallyDrop<Arc<Mutex<Allocator>>>,

    /// Graphics queue for command submission
    pub graphics_queue: vk::Queue,

    /// Graphics queue family index
    pub graphics_queue_family: u32,

    /// Selected physical device
    pub physical_device: vk::PhysicalDevice,

    /// Limits of the selected physical device
    pub limits: vk::PhysicalDeviceLimits,

    instance: ash::Instance,

    /// Loader kept alive for as long as the instance
    _entry: ash::Entry,

    /// Debug utils loader (for validation layers)
    pub(crate) debug_utils_loader: Option<ash::ext::debug_utils::Instance>,

    /// Debug messenger handle
    pub(crate) debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
}

impl GpuContext {
    /// Wrap freshly created Vulkan objects
    ///
    /// Takes ownership: they are destroyed when the context drops.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        entry: ash::Entry,
        instance: ash::Instance,
        physical_device: vk::PhysicalDevice,
        limits: vk::PhysicalDeviceLimits,
        device: ash::Device,
        allocator: Allocator,
        graphics_queue: vk::Queue,
        graphics_queue_family: u32,
        debug_utils_loader: Option<ash::ext::debug_utils::Instance>,
        debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
    ) -> Self {
        Self {
            device,
            allocator: ManuallyDrop::new(Arc::new(Mutex::new(allocator))),
            graphics_queue,
            graphics_queue_family,
            physical_device,
            limits,
            instance,
            _entry: entry,
            debug_utils_loader,
            debug_messenger,
        }
    }

    /// Lock the allocator, reporting a poisoned lock as a backend error
    pub(crate) fn lock_allocator(&self) -> Result<std::sync::MutexGuard<'_, Allocator>, Error> {
        self.allocator.lock().map_err(|_| {
            engine_error!(SOURCE, "GPU allocator lock poisoned");
            Error::BackendError("GPU allocator lock poisoned".to_string())
        })
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        unsafe {
            // Nothing may still run on the device
            self.device.device_wait_idle().ok();

            // Free VkDeviceMemory pages while the device is still valid
            ManuallyDrop::drop(&mut self.allocator);

            // Destroy debug messenger BEFORE device and instance
            if let (Some(debug_utils), Some(messenger)) = (&self.debug_utils_loader, self.debug_messenger) {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}

/// Map a failed Vulkan call to a core error, logging it
///
/// `ERROR_DEVICE_LOST` becomes `DeviceLost`, out-of-memory results become
/// `OutOfMemory`, everything else `BackendError`.
pub(crate) fn vk_error(what: &str, result: vk::Result) -> Error {
    let message = format!("{} failed: {:?}", what, result);
    engine_error!(SOURCE, "{}", message);
    match result {
        vk::Result::ERROR_DEVICE_LOST => Error::DeviceLost(message),
        vk::Result::ERROR_OUT_OF_HOST_MEMORY | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => Error::OutOfMemory(message),
        _ => Error::BackendError(message),
    }
}

#[cfg(test)]
#[path = "vulkan_context_tests.rs"]
mod tests;
