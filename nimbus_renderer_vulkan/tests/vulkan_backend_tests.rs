//! Tests for the Vulkan backend against the real frame loop
//!
//! These tests verify that VulkanDevice correctly implements the GraphicsDevice trait.
//! All tests require a GPU with Vulkan 1.2 and are marked with #[ignore].
//!
//! Run with: cargo test --test vulkan_backend_tests -- --ignored

use nimbus_renderer::nimbus::backend::{BufferViewDesc, GraphicsDevice, NativeDescriptorHeapDesc};
use nimbus_renderer::nimbus::descriptor::{DescriptorHeap, DescriptorHeapDesc, DescriptorHeapType};
use nimbus_renderer::nimbus::frame::FrameFenceTracker;
use nimbus_renderer::nimbus::{Config, FrameContext, HandleValidation, MIB};
use nimbus_renderer_vulkan::{VulkanDevice, VulkanDeviceConfig, DESCRIPTOR_RECORD_SIZE};

fn create_device() -> VulkanDevice {
    VulkanDevice::new(VulkanDeviceConfig::default()).unwrap()
}

// ============================================================================
// DEVICE TESTS
// ============================================================================

#[test]
#[ignore] // Requires GPU
fn test_vulkan_device_creation() {
    let device = create_device();
    assert_eq!(device.backend_name(), "vulkan");
    assert!(!device.device_name().is_empty());
}

// ============================================================================
// DESCRIPTOR HEAP TESTS
// ============================================================================

#[test]
#[ignore] // Requires GPU
fn test_vulkan_shader_visible_heap_has_gpu_address() {
    let mut device = create_device();
    let heap = device
        .create_descriptor_heap(&NativeDescriptorHeapDesc {
            name: "visible".to_string(),
            heap_type: DescriptorHeapType::CbvSrvUav,
            capacity: 64,
            shader_visible: true,
        })
        .unwrap();

    assert_ne!(heap.cpu_start(), 0);
    assert!(heap.gpu_start().is_some());
    assert!(heap.descriptor_stride() >= DESCRIPTOR_RECORD_SIZE);
}

#[test]
#[ignore] // Requires GPU
fn test_vulkan_cpu_only_heap_has_no_gpu_address() {
    let mut device = create_device();
    let heap = device
        .create_descriptor_heap(&NativeDescriptorHeapDesc {
            name: "cpu only".to_string(),
            heap_type: DescriptorHeapType::RenderTarget,
            capacity: 8,
            shader_visible: false,
        })
        .unwrap();

    assert!(heap.gpu_start().is_none());
}

#[test]
#[ignore] // Requires GPU
fn test_vulkan_write_buffer_view_lands_in_mapped_record() {
    let mut device = create_device();
    let mut heap = DescriptorHeap::new(
        &mut device,
        &DescriptorHeapDesc {
            name: "records".to_string(),
            heap_type: DescriptorHeapType::CbvSrvUav,
            capacity: 4,
            shader_visible: true,
            frame_count: 2,
            handle_validation: HandleValidation::Full,
        },
    )
    .unwrap();

    heap.allocate().unwrap();
    let handle = heap.allocate().unwrap();
    heap.write_buffer_view(&handle, &BufferViewDesc { address: 0xABCD_0000, size: 256 }).unwrap();

    let record = unsafe { std::slice::from_raw_parts(handle.cpu() as *const u8, DESCRIPTOR_RECORD_SIZE as usize) };
    assert_eq!(u64::from_le_bytes(record[..8].try_into().unwrap()), 0xABCD_0000);
    assert_eq!(u64::from_le_bytes(record[8..].try_into().unwrap()), 256);
}

// ============================================================================
// SUBMISSION QUEUE TESTS
// ============================================================================

#[test]
#[ignore] // Requires GPU
fn test_vulkan_timeline_reaches_submitted_value() {
    let mut device = create_device();
    let mut queue = device.create_submission_queue(2).unwrap();

    assert_eq!(queue.completed_value().unwrap(), 0);
    queue.begin_recording(0).unwrap();
    queue.submit(0, 1).unwrap();
    queue.wait_for_value(1).unwrap();
    assert!(queue.completed_value().unwrap() >= 1);
    assert_ne!(queue.native_command_list(0), queue.native_command_list(1));
}

#[test]
#[ignore] // Requires GPU
fn test_vulkan_submit_rejects_non_increasing_value() {
    let mut device = create_device();
    let mut queue = device.create_submission_queue(1).unwrap();

    queue.begin_recording(0).unwrap();
    queue.submit(0, 1).unwrap();
    queue.wait_for_value(1).unwrap();

    queue.begin_recording(0).unwrap();
    assert!(queue.submit(0, 1).is_err());
}

#[test]
#[ignore] // Requires GPU
fn test_vulkan_fence_tracker_cycles_slots() {
    let mut device = create_device();
    let queue = device.create_submission_queue(3).unwrap();
    let mut tracker = FrameFenceTracker::new(queue, 3).unwrap();

    for frame in 0..10 {
        assert_eq!(tracker.begin_frame().unwrap(), frame % 3);
        tracker.end_frame().unwrap();
    }
    assert_eq!(tracker.fence_value_submitted(), 10);

    tracker.drain().unwrap();
    assert!(!tracker.has_submitted_frames());
}

// ============================================================================
// FRAME LOOP TESTS
// ============================================================================

#[test]
#[ignore] // Requires GPU
fn test_vulkan_frame_context_transient_constants() {
    let mut device = create_device();
    let mut context = FrameContext::new(&mut device, &Config::default()).unwrap();
    let mut resources = context.create_resource_allocator("resource", MIB).unwrap();

    for _ in 0..8 {
        context.begin_frame(&mut resources).unwrap();
        let constants = context.create_transient_constants("camera", &[1u8; 64]).unwrap();
        assert!(constants.descriptor.is_shader_visible());
        context.end_frame().unwrap();
    }

    context.shutdown(&mut resources).unwrap();
    assert!(context.heap(DescriptorHeapType::CbvSrvUav).is_empty());
}
