use super::*;
use crate::descriptor::DescriptorHeapType;
use std::sync::mpsc;

fn heap_desc(capacity: u32, shader_visible: bool) -> NativeDescriptorHeapDesc {
    NativeDescriptorHeapDesc {
        name: "test heap".to_string(),
        heap_type: DescriptorHeapType::CbvSrvUav,
        capacity,
        shader_visible,
    }
}

// ============================================================================
// Timeline
// ============================================================================

#[test]
fn test_complete_up_to_clamps_to_signaled() {
    let timeline = HeadlessTimeline::new();
    timeline.signal(2).unwrap();
    assert_eq!(timeline.complete_up_to(10), 2);
    assert_eq!(timeline.completed_value(), 2);
    // Never goes backwards
    assert_eq!(timeline.complete_up_to(1), 2);
}

#[test]
fn test_signal_must_increase() {
    let timeline = HeadlessTimeline::new();
    timeline.signal(1).unwrap();
    assert!(matches!(timeline.signal(1), Err(Error::InvalidArgument(_))));
}

#[test]
fn test_wait_for_unsignaled_value_fails_instead_of_hanging() {
    let timeline = HeadlessTimeline::new();
    assert!(matches!(timeline.wait_for(1), Err(Error::InvalidState(_))));
}

#[test]
fn test_wait_returns_once_completed() {
    let timeline = HeadlessTimeline::new();
    timeline.signal(1).unwrap();

    let (tx, rx) = mpsc::channel();
    let waiter = {
        let timeline = Arc::clone(&timeline);
        thread::spawn(move || tx.send(timeline.wait_for(1)).unwrap())
    };

    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err(), "wait returned before completion");
    timeline.complete_up_to(1);
    assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap().is_ok());
    waiter.join().unwrap();
}

#[test]
fn test_device_loss_wakes_blocked_waiter() {
    let timeline = HeadlessTimeline::new();
    timeline.signal(1).unwrap();

    let (tx, rx) = mpsc::channel();
    let waiter = {
        let timeline = Arc::clone(&timeline);
        thread::spawn(move || tx.send(timeline.wait_for(1)).unwrap())
    };

    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    timeline.lose_device();
    let result = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(matches!(result, Err(Error::DeviceLost(_))));
    assert!(matches!(timeline.query(), Err(Error::DeviceLost(_))));
    waiter.join().unwrap();
}

#[test]
fn test_worker_retires_submissions() {
    let timeline = HeadlessTimeline::new();
    let worker = timeline.spawn_worker(Duration::from_millis(1));
    timeline.signal(1).unwrap();
    timeline.signal(2).unwrap();
    timeline.signal(3).unwrap();
    timeline.wait_for(3).unwrap();
    assert_eq!(timeline.completed_value(), 3);
    drop(worker);
}

// ============================================================================
// Device
// ============================================================================

#[test]
fn test_heap_addresses() {
    let mut device = HeadlessDevice::new();
    let visible = device.create_descriptor_heap(&heap_desc(8, true)).unwrap();
    let hidden = device.create_descriptor_heap(&heap_desc(8, false)).unwrap();

    assert_ne!(visible.cpu_start(), 0);
    assert_eq!(visible.descriptor_stride(), HEADLESS_DESCRIPTOR_STRIDE);
    assert_eq!(visible.gpu_start(), Some(GPU_ADDRESS_BASE));
    assert_eq!(hidden.gpu_start(), None);
    assert_ne!(visible.raw_handle(), hidden.raw_handle());
}

#[test]
fn test_visible_heaps_get_disjoint_gpu_ranges() {
    let mut device = HeadlessDevice::new();
    let first = device.create_descriptor_heap(&heap_desc(4096, true)).unwrap();
    let second = device.create_descriptor_heap(&heap_desc(4, true)).unwrap();
    let first_end = first.gpu_start().unwrap() + 4096 * HEADLESS_DESCRIPTOR_STRIDE as u64;
    assert!(second.gpu_start().unwrap() >= first_end);
}

#[test]
fn test_zero_capacity_heap_rejected() {
    let mut device = HeadlessDevice::new();
    assert!(matches!(device.create_descriptor_heap(&heap_desc(0, true)), Err(Error::InvalidArgument(_))));
}

#[test]
fn test_write_buffer_view_out_of_range() {
    let mut device = HeadlessDevice::new();
    let mut heap = device.create_descriptor_heap(&heap_desc(2, true)).unwrap();
    let view = BufferViewDesc { address: 0x1000, size: 256 };
    assert!(heap.write_buffer_view(1, &view).is_ok());
    assert!(heap.write_buffer_view(2, &view).is_err());
}

#[test]
fn test_write_buffer_view_after_device_loss() {
    let mut device = HeadlessDevice::new();
    let mut heap = device.create_descriptor_heap(&heap_desc(2, true)).unwrap();
    device.timeline().lose_device();
    let view = BufferViewDesc { address: 0x1000, size: 256 };
    assert!(matches!(heap.write_buffer_view(0, &view), Err(Error::DeviceLost(_))));
}

#[test]
fn test_queue_submit_signals_timeline() {
    let mut device = HeadlessDevice::new();
    let timeline = device.timeline();
    let mut queue = device.create_submission_queue(2).unwrap();

    queue.begin_recording(0).unwrap();
    queue.submit(0, 1).unwrap();
    assert_eq!(timeline.signaled_value(), 1);
    assert_eq!(queue.completed_value().unwrap(), 0);

    timeline.complete_all();
    assert_eq!(queue.completed_value().unwrap(), 1);
    queue.wait_for_value(1).unwrap();
}

#[test]
fn test_queue_rejects_out_of_order_calls() {
    let mut device = HeadlessDevice::new();
    let mut queue = device.create_submission_queue(2).unwrap();

    assert!(matches!(queue.submit(0, 1), Err(Error::InvalidState(_))));
    assert!(matches!(queue.begin_recording(2), Err(Error::InvalidArgument(_))));
    queue.begin_recording(1).unwrap();
    assert!(matches!(queue.begin_recording(0), Err(Error::InvalidState(_))));
}

#[test]
fn test_command_lists_are_per_slot() {
    let mut device = HeadlessDevice::new();
    let queue = device.create_submission_queue(3).unwrap();
    let lists: Vec<u64> = (0..3).map(|slot| queue.native_command_list(slot)).collect();
    assert!(lists.iter().all(|&list| list != 0));
    assert_ne!(lists[0], lists[1]);
    assert_eq!(queue.native_command_list(3), 0);
    assert_ne!(queue.native_queue_handle(), 0);
}
