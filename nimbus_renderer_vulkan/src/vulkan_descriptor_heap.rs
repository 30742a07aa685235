/// Vulkan descriptor heap
///
/// A persistently mapped, host-visible storage buffer split into fixed-size
/// descriptor records. Shader-visible heaps also expose the buffer device
/// address, so shaders index the records directly.
///
/// Record layout (little endian): `address: u64`, `size: u64`, rest zero.

use crate::vulkan_context::{vk_error, GpuContext, SOURCE};
use ash::vk;
use ash::vk::Handle;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use nimbus_renderer::nimbus::backend::{BufferViewDesc, NativeDescriptorHeap, NativeDescriptorHeapDesc};
use nimbus_renderer::nimbus::Result;
use nimbus_renderer::{engine_bail, engine_debug, engine_err};
use std::sync::Arc;

/// Bytes of one buffer view record
pub const DESCRIPTOR_RECORD_SIZE: u32 = 16;

/// Distance between two records: a record rounded up to the device's
/// storage buffer offset alignment
pub(crate) fn descriptor_stride(min_storage_buffer_offset_alignment: u64) -> u32 {
    let alignment = min_storage_buffer_offset_alignment.max(1) as u32;
    DESCRIPTOR_RECORD_SIZE.div_ceil(alignment) * alignment
}

/// Vulkan implementation of [`NativeDescriptorHeap`]
pub struct VulkanDescriptorHeap {
    gpu_context: Arc<GpuContext>,
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    /// Mapped pointer of slot 0, kept as an integer so the heap stays `Send`
    cpu_start: u64,
    gpu_start: Option<u64>,
    stride: u32,
    capacity: u32,
}

impl VulkanDescriptorHeap {
    pub(crate) fn new(gpu_context: Arc<GpuContext>, desc: &NativeDescriptorHeapDesc) -> Result<Self> {
        if desc.capacity == 0 {
            engine_bail!(SOURCE, InvalidArgument, "Descriptor heap '{}' needs a non-zero capacity", desc.name);
        }

        let stride = descriptor_stride(gpu_context.limits.min_storage_buffer_offset_alignment);
        let size = stride as u64 * desc.capacity as u64;

        let mut usage = vk::BufferUsageFlags::STORAGE_BUFFER;
        if desc.shader_visible {
            usage |= vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS;
        }

        let device = &gpu_context.device;
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { device.create_buffer(&buffer_info, None) }
            .map_err(|e| vk_error("vkCreateBuffer (descriptor heap)", e))?;

        let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };

        let allocation = {
            let mut allocator = match gpu_context.lock_allocator() {
                Ok(allocator) => allocator,
                Err(e) => {
                    unsafe { device.destroy_buffer(buffer, None) };
                    return Err(e);
                }
            };
            match allocator.allocate(&AllocationCreateDesc {
                name: &desc.name,
                requirements,
                location: MemoryLocation::CpuToGpu,
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            }) {
                Ok(allocation) => allocation,
                Err(e) => {
                    unsafe { device.destroy_buffer(buffer, None) };
                    return Err(engine_err!(SOURCE, OutOfMemory, "Descriptor heap '{}' allocation failed: {:?}", desc.name, e));
                }
            }
        };

        // From here on Drop releases the buffer and the allocation
        let mut heap = Self {
            gpu_context: Arc::clone(&gpu_context),
            buffer,
            allocation: Some(allocation),
            cpu_start: 0,
            gpu_start: None,
            stride,
            capacity: desc.capacity,
        };

        let (memory, offset, mapped) = match heap.allocation.as_ref() {
            Some(allocation) => (
                unsafe { allocation.memory() },
                allocation.offset(),
                allocation.mapped_ptr(),
            ),
            None => engine_bail!(SOURCE, "Descriptor heap '{}' lost its allocation", desc.name),
        };

        unsafe { device.bind_buffer_memory(buffer, memory, offset) }
            .map_err(|e| vk_error("vkBindBufferMemory (descriptor heap)", e))?;

        let Some(mapped) = mapped else {
            engine_bail!(SOURCE, "Descriptor heap '{}' memory is not host visible", desc.name);
        };
        heap.cpu_start = mapped.as_ptr() as usize as u64;

        // Fresh records read as null views
        unsafe { std::ptr::write_bytes(mapped.as_ptr() as *mut u8, 0, size as usize) };

        if desc.shader_visible {
            let address_info = vk::BufferDeviceAddressInfo::default().buffer(buffer);
            heap.gpu_start = Some(unsafe { device.get_buffer_device_address(&address_info) });
        }

        engine_debug!(
            SOURCE,
            "Descriptor heap '{}' ({}) backed by {} bytes, stride {}",
            desc.name,
            desc.heap_type,
            size,
            stride
        );
        Ok(heap)
    }

    /// Backing buffer, for binding the heap as a storage buffer
    pub fn buffer(&self) -> vk::Buffer {
        self.buffer
    }
}

impl NativeDescriptorHeap for VulkanDescriptorHeap {
    fn cpu_start(&self) -> u64 {
        self.cpu_start
    }

    fn gpu_start(&self) -> Option<u64> {
        self.gpu_start
    }

    fn descriptor_stride(&self) -> u32 {
        self.stride
    }

    fn raw_handle(&self) -> u64 {
        self.buffer.as_raw()
    }

    fn write_buffer_view(&mut self, index: u32, view: &BufferViewDesc) -> Result<()> {
        if index >= self.capacity {
            engine_bail!(SOURCE, InvalidArgument, "Descriptor index {} out of range (capacity {})", index, self.capacity);
        }
        let mut record = [0u8; DESCRIPTOR_RECORD_SIZE as usize];
        record[..8].copy_from_slice(&view.address.to_le_bytes());
        record[8..].copy_from_slice(&view.size.to_le_bytes());

        let offset = index as u64 * self.stride as u64;
        let dst = (self.cpu_start + offset) as usize as *mut u8;
        // The record lies inside the mapped buffer: index < capacity
        unsafe { std::ptr::copy_nonoverlapping(record.as_ptr(), dst, record.len()) };
        Ok(())
    }
}

impl Drop for VulkanDescriptorHeap {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            if let Ok(mut allocator) = self.gpu_context.lock_allocator() {
                allocator.free(allocation).ok();
            }
        }
        unsafe { self.gpu_context.device.destroy_buffer(self.buffer, None) };
    }
}

#[cfg(test)]
#[path = "vulkan_descriptor_heap_tests.rs"]
mod tests;
