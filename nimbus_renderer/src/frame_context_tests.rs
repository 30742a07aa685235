use super::*;
use crate::backend::{HeadlessDevice, HeadlessTimeline};
use crate::config::{HandleValidation, MIB};
use crate::error::Error;
use crate::memory::DEFAULT_ALIGNMENT;
use std::sync::Arc;

fn small_config(frames_in_flight: usize) -> Config {
    Config {
        frames_in_flight,
        resource_allocator_size: MIB,
        renderer_allocator_size: 64 * 1024,
        cbv_srv_uav_heap_capacity: 16,
        sampler_heap_capacity: 4,
        render_target_heap_capacity: 4,
        depth_stencil_heap_capacity: 4,
        ..Config::default()
    }
}

struct Fixture {
    context: FrameContext,
    resources: DynamicAllocator,
    timeline: Arc<HeadlessTimeline>,
}

impl Fixture {
    fn new(frames_in_flight: usize) -> Self {
        let mut device = HeadlessDevice::new();
        let config = small_config(frames_in_flight);
        let context = FrameContext::new(&mut device, &config).unwrap();
        let resources = DynamicAllocator::new("resource", config.resource_allocator_size, frames_in_flight).unwrap();
        Self { context, resources, timeline: device.timeline() }
    }

    fn begin(&mut self) -> usize {
        self.context.begin_frame(&mut self.resources).unwrap()
    }

    fn end(&mut self) {
        self.context.end_frame().unwrap();
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        // Never leave the tracker blocking on a timeline nobody drives
        self.timeline.complete_all();
    }
}

// ============================================================================
// Construction
// ============================================================================

#[test]
fn test_heaps_created_per_class() {
    let fixture = Fixture::new(2);
    let context = &fixture.context;

    assert!(context.heap(DescriptorHeapType::CbvSrvUav).is_shader_visible());
    assert!(context.heap(DescriptorHeapType::Sampler).is_shader_visible());
    assert!(!context.heap(DescriptorHeapType::RenderTarget).is_shader_visible());
    assert!(!context.heap(DescriptorHeapType::DepthStencil).is_shader_visible());
    assert_eq!(context.heap(DescriptorHeapType::CbvSrvUav).capacity(), 16);
    assert_eq!(context.heap(DescriptorHeapType::Sampler).heap_type(), DescriptorHeapType::Sampler);
    assert_eq!(context.heap(DescriptorHeapType::Sampler).name(), "sampler");
    assert!(context.heap(DescriptorHeapType::Sampler).descriptor_stride() > 0);
    assert_eq!(context.renderer_allocator().name(), "renderer");
    assert_eq!(context.tracker().frame_count(), 2);
}

#[test]
fn test_invalid_config_rejected() {
    let mut device = HeadlessDevice::new();
    let config = Config { frames_in_flight: 0, ..small_config(2) };
    assert!(matches!(FrameContext::new(&mut device, &config), Err(Error::InvalidArgument(_))));
}

// ============================================================================
// Frame loop
// ============================================================================

#[test]
fn test_begin_end_cycles_slots() {
    let mut fixture = Fixture::new(2);
    assert_eq!(fixture.begin(), 0);
    assert_eq!(fixture.context.recording_slot(), Some(0));
    fixture.end();
    assert_eq!(fixture.context.recording_slot(), None);
    assert_eq!(fixture.context.frame_index(), 1);

    assert_eq!(fixture.begin(), 1);
    fixture.end();

    fixture.timeline.complete_up_to(1);
    assert_eq!(fixture.begin(), 0);
    fixture.end();
}

#[test]
fn test_descriptor_freed_in_frame_reused_one_lap_later() {
    let mut fixture = Fixture::new(2);
    let heap_type = DescriptorHeapType::RenderTarget;

    fixture.begin();
    let mut handle = fixture.context.heap_mut(heap_type).allocate().unwrap();
    let index = handle.index();
    fixture.context.heap_mut(heap_type).free(&mut handle).unwrap();
    fixture.end();

    fixture.begin();
    assert_eq!(fixture.context.heap(heap_type).pending_release_count(), 1);
    fixture.end();

    fixture.timeline.complete_all();
    fixture.begin();
    assert_eq!(fixture.context.heap(heap_type).pending_release_count(), 0);
    assert_eq!(fixture.context.heap_mut(heap_type).allocate().unwrap().index(), index);
    fixture.end();
}

#[test]
fn test_resource_allocator_swept_with_frame() {
    let mut fixture = Fixture::new(2);
    fixture.begin();
    let mesh = fixture.resources.allocate(4096, DEFAULT_ALIGNMENT, "mesh").unwrap();
    fixture.resources.release_later(mesh).unwrap();
    fixture.end();

    fixture.begin();
    assert!(fixture.resources.bytes(mesh).is_ok());
    fixture.end();

    fixture.timeline.complete_all();
    fixture.begin();
    assert!(fixture.resources.bytes(mesh).is_err());
    fixture.end();
}

#[test]
fn test_chunk_released_in_slot_zero_waits_full_lap() {
    let mut fixture = Fixture::new(3);
    fixture.begin();
    let mesh = fixture.resources.allocate(256, DEFAULT_ALIGNMENT, "mesh").unwrap();
    fixture.resources.release_later(mesh).unwrap();
    fixture.end();

    // Slots 1 and 2 start while the GPU has not finished frame 0
    assert_eq!(fixture.begin(), 1);
    assert_eq!(fixture.timeline.completed_value(), 0);
    assert!(fixture.resources.bytes(mesh).is_ok());
    fixture.end();
    assert_eq!(fixture.begin(), 2);
    assert!(fixture.resources.bytes(mesh).is_ok());
    fixture.end();

    fixture.timeline.complete_up_to(1);
    assert_eq!(fixture.begin(), 0);
    assert!(fixture.resources.bytes(mesh).is_err());
    fixture.end();
}

// ============================================================================
// Release ring alignment
// ============================================================================

#[test]
fn test_mismatched_release_ring_rejected() {
    let mut fixture = Fixture::new(3);
    let mut single = DynamicAllocator::new("resource", 1024, 1).unwrap();

    let err = fixture.context.begin_frame(&mut single).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
    assert_eq!(fixture.context.recording_slot(), None);
    assert!(!fixture.context.tracker().is_recording());

    assert!(matches!(fixture.context.shutdown(&mut single), Err(Error::InvalidArgument(_))));
    assert!(!fixture.context.is_shut_down());

    // The matching allocator still drives the loop
    assert_eq!(fixture.begin(), 0);
    fixture.end();
}

#[test]
fn test_release_slot_follows_tracker() {
    let mut fixture = Fixture::new(3);
    assert_eq!(fixture.context.release_slot(), 0);

    fixture.begin();
    fixture.end();
    fixture.begin();
    assert_eq!(fixture.context.release_slot(), 1);
    fixture.end();
    assert_eq!(fixture.context.release_slot(), 1);
}

#[test]
fn test_resource_allocator_created_mid_run_waits_for_its_slot() {
    let mut fixture = Fixture::new(3);
    fixture.begin();
    fixture.end();
    assert_eq!(fixture.begin(), 1);

    let mut late = fixture.context.create_resource_allocator("late", 4096).unwrap();
    assert_eq!(late.frame_count(), 3);
    assert_eq!(late.current_frame_slot(), 1);
    let texture = late.allocate(512, DEFAULT_ALIGNMENT, "texture").unwrap();
    late.release_later(texture).unwrap();
    fixture.end();

    // Slots 2 and 0 are older than the release
    for expected in [2, 0] {
        fixture.timeline.complete_all();
        assert_eq!(fixture.context.begin_frame(&mut late).unwrap(), expected);
        assert!(late.bytes(texture).is_ok());
        fixture.end();
    }

    fixture.timeline.complete_all();
    assert_eq!(fixture.context.begin_frame(&mut late).unwrap(), 1);
    assert!(late.bytes(texture).is_err());
    fixture.end();
}

#[test]
fn test_adopt_rejects_heap_with_other_frame_count() {
    let fixture = Fixture::new(3);
    let mut device = HeadlessDevice::new();
    let mut heap = DescriptorHeap::new(
        &mut device,
        &DescriptorHeapDesc {
            name: "streaming".to_string(),
            heap_type: DescriptorHeapType::CbvSrvUav,
            capacity: 4,
            shader_visible: true,
            frame_count: 2,
            handle_validation: HandleValidation::Full,
        },
    )
    .unwrap();
    assert!(matches!(fixture.context.adopt(&mut heap), Err(Error::InvalidArgument(_))));
}

#[test]
fn test_failed_sweep_still_records_and_sweeps_the_rest() {
    let mut fixture = Fixture::new(2);
    let heap_type = DescriptorHeapType::RenderTarget;

    fixture.begin();
    let handle = fixture.context.heap_mut(heap_type).allocate().unwrap();
    fixture.context.heap_mut(heap_type).free_later(handle).unwrap();
    let texture = fixture.resources.allocate(1024, DEFAULT_ALIGNMENT, "texture").unwrap();
    fixture.resources.release_later(texture).unwrap();
    // Not the start of any chunk: this sweep fails
    fixture.context.renderer_allocator_mut().push_deferred_unchecked(MemoryAddress(64));
    fixture.end();

    fixture.begin();
    fixture.end();

    fixture.timeline.complete_all();
    let err = fixture.context.begin_frame(&mut fixture.resources).unwrap_err();
    assert!(matches!(err, Error::InvalidAddress(_)));
    assert_eq!(fixture.context.recording_slot(), Some(0));
    assert!(fixture.context.heap(heap_type).is_empty());
    assert!(fixture.resources.bytes(texture).is_err());

    // The frame can be recorded and submitted as usual
    fixture.context.create_transient_constants("after", &[0u8; 16]).unwrap();
    fixture.end();
}

// ============================================================================
// Transient constants
// ============================================================================

#[test]
fn test_transient_constants_outside_frame_rejected() {
    let mut fixture = Fixture::new(2);
    let result = fixture.context.create_transient_constants("camera", &[0u8; 64]);
    assert!(matches!(result, Err(Error::InvalidState(_))));
}

#[test]
fn test_transient_constants_content_and_alignment() {
    let mut fixture = Fixture::new(2);
    fixture.begin();

    let data: Vec<u8> = (0..100u8).collect();
    let constants = fixture.context.create_transient_constants("object constants", &data).unwrap();

    assert_eq!(constants.size, 256);
    assert_eq!(constants.address.offset() % CONSTANT_BUFFER_ALIGNMENT, 0);
    assert!(constants.descriptor.is_shader_visible());

    let bytes = fixture.context.renderer_allocator().bytes(constants.address).unwrap();
    assert_eq!(&bytes[..100], data.as_slice());
    fixture.end();
}

#[test]
fn test_transient_constants_released_after_lap() {
    let mut fixture = Fixture::new(2);

    fixture.begin();
    let constants = fixture.context.create_transient_constants("per draw", &[1u8; 32]).unwrap();
    fixture.end();

    fixture.begin();
    let stats = fixture.context.renderer_allocator().memory_stats();
    assert_eq!(stats.live_chunk_count, 1);
    assert_eq!(stats.pending_release_count, 1);
    fixture.end();

    fixture.timeline.complete_all();
    fixture.begin();
    let stats = fixture.context.renderer_allocator().memory_stats();
    assert_eq!(stats.live_chunk_count, 0);
    assert!(fixture.context.heap(DescriptorHeapType::CbvSrvUav).is_empty());
    assert!(fixture.context.renderer_allocator().bytes(constants.address).is_err());
    fixture.end();
}

#[test]
fn test_transient_constants_exhaust_heap() {
    let mut fixture = Fixture::new(1);
    fixture.begin();
    for _ in 0..16 {
        fixture.context.create_transient_constants("draw", &[0u8; 16]).unwrap();
    }
    let err = fixture.context.create_transient_constants("draw", &[0u8; 16]).unwrap_err();
    assert!(matches!(err, Error::DescriptorHeapExhausted(_)));
    // The chunk of the failed request was given back
    assert_eq!(fixture.context.renderer_allocator().memory_stats().live_chunk_count, 16);
    fixture.end();
}

#[test]
fn test_transient_constants_rolled_back_when_view_write_fails() {
    let mut fixture = Fixture::new(2);
    fixture.begin();
    fixture.timeline.lose_device();

    let err = fixture.context.create_transient_constants("camera", &[1u8; 64]).unwrap_err();
    assert!(matches!(err, Error::DeviceLost(_)));

    // The chunk is back, the descriptor waits in the release queue
    let stats = fixture.context.renderer_allocator().memory_stats();
    assert_eq!(stats.live_chunk_count, 0);
    assert_eq!(stats.pending_release_count, 0);
    let heap = fixture.context.heap_mut(DescriptorHeapType::CbvSrvUav);
    assert_eq!(heap.pending_release_count(), 1);
    heap.flush_deferred_releases();
    assert!(heap.is_empty());
}

// ============================================================================
// Shutdown
// ============================================================================

#[test]
fn test_shutdown_drains_and_flushes() {
    let mut fixture = Fixture::new(3);
    let worker = fixture.timeline.spawn_worker(std::time::Duration::from_millis(1));

    for _ in 0..5 {
        fixture.begin();
        fixture.context.create_transient_constants("frame", &[7u8; 64]).unwrap();
        let texture = fixture.resources.allocate(1024, DEFAULT_ALIGNMENT, "texture").unwrap();
        fixture.resources.release_later(texture).unwrap();
        fixture.end();
    }

    fixture.context.shutdown(&mut fixture.resources).unwrap();
    assert!(fixture.context.is_shut_down());
    assert!(!fixture.context.tracker().has_submitted_frames());
    assert_eq!(fixture.context.renderer_allocator().memory_stats().used_bytes, 0);
    assert_eq!(fixture.resources.memory_stats().used_bytes, 0);
    assert!(fixture.context.heap(DescriptorHeapType::CbvSrvUav).is_empty());

    // Idempotent, and no more frames afterwards
    fixture.context.shutdown(&mut fixture.resources).unwrap();
    assert!(matches!(fixture.context.begin_frame(&mut fixture.resources), Err(Error::InvalidState(_))));
    drop(worker);
}
