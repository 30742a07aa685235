/*!
# Nimbus Renderer - Vulkan Backend

Vulkan implementation of the `nimbus_renderer` backend boundary.

- **VulkanDevice**: headless device (no surface), factory for the objects below
- **VulkanSubmissionQueue**: graphics queue + one timeline semaphore, one
  command pool per frame slot
- **VulkanDescriptorHeap**: host-visible buffer of descriptor records,
  addressed by shaders through its buffer device address

Uses ash for the Vulkan bindings and gpu-allocator for memory. Validation
layers are compiled in with the `vulkan-validation` feature.
*/

mod vulkan_context;
mod vulkan_descriptor_heap;
mod vulkan_device;
mod vulkan_submission_queue;

#[cfg(feature = "vulkan-validation")]
mod vulkan_debug;

pub use vulkan_context::GpuContext;
pub use vulkan_descriptor_heap::{VulkanDescriptorHeap, DESCRIPTOR_RECORD_SIZE};
pub use vulkan_device::{VulkanDevice, VulkanDeviceConfig};
pub use vulkan_submission_queue::VulkanSubmissionQueue;
