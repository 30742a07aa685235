/// FrameContext - everything the frame loop drives once per frame
///
/// Owns the frame fence tracker, one descriptor heap per descriptor class
/// and the renderer-scoped transient allocator. The process-wide resource
/// allocator is owned by the application and passed in at the frame
/// boundaries, so its deferred releases follow the same clock. Its release
/// ring must have one slot per frame in flight; `create_resource_allocator`
/// builds one that does.
///
/// ```text
/// begin_frame:  wait fence(slot) -> sweep heaps + allocators for slot -> record
/// end_frame:    submit -> signal fence(slot) -> advance slot
/// ```

use crate::backend::{BufferViewDesc, GraphicsDevice};
use crate::config::Config;
use crate::descriptor::{DescriptorHandle, DescriptorHeap, DescriptorHeapDesc, DescriptorHeapType};
use crate::error::Result;
use crate::frame::{DeferredReleaser, FrameFenceTracker};
use crate::memory::{DynamicAllocator, MemoryAddress};
use crate::{engine_err, engine_info, engine_trace, engine_warn};

const SOURCE: &str = "nimbus::FrameContext";

/// Constant buffers are bound on this boundary
pub const CONSTANT_BUFFER_ALIGNMENT: usize = 256;

/// A constant buffer that lives until its frame slot comes around again
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransientConstants {
    /// Chunk in the renderer allocator holding the data
    pub address: MemoryAddress,
    /// Size of the chunk (data size rounded up to 256)
    pub size: usize,
    /// CBV pointing at the chunk
    pub descriptor: DescriptorHandle,
}

/// Per-frame resource lifetime glue
pub struct FrameContext {
    tracker: FrameFenceTracker,
    cbv_srv_uav_heap: DescriptorHeap,
    sampler_heap: DescriptorHeap,
    render_target_heap: DescriptorHeap,
    depth_stencil_heap: DescriptorHeap,
    renderer_allocator: DynamicAllocator,
    /// Frame slot being recorded, if any
    recording_slot: Option<usize>,
    shut_down: bool,
}

impl FrameContext {
    /// Create the tracker, the four heaps and the renderer allocator
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an invalid config, or whatever fatal error the
    /// backend or the allocator reports.
    pub fn new(device: &mut dyn GraphicsDevice, config: &Config) -> Result<Self> {
        config.validate()?;
        let frames = config.frames_in_flight;

        let queue = device.create_submission_queue(frames).map_err(|e| {
            engine_err!(SOURCE, InitializationFailed, "{} backend failed to create the submission queue: {}", device.backend_name(), e)
        })?;
        let tracker = FrameFenceTracker::new(queue, frames)?;

        let cbv_srv_uav_heap = Self::create_heap(device, config, "cbv_srv_uav", DescriptorHeapType::CbvSrvUav, config.cbv_srv_uav_heap_capacity)?;
        let sampler_heap = Self::create_heap(device, config, "sampler", DescriptorHeapType::Sampler, config.sampler_heap_capacity)?;
        let render_target_heap = Self::create_heap(device, config, "render_target", DescriptorHeapType::RenderTarget, config.render_target_heap_capacity)?;
        let depth_stencil_heap = Self::create_heap(device, config, "depth_stencil", DescriptorHeapType::DepthStencil, config.depth_stencil_heap_capacity)?;

        let renderer_allocator = DynamicAllocator::new("renderer", config.renderer_allocator_size, frames)?;

        engine_info!(SOURCE, "Frame context ready on {} backend ({} frames in flight)", device.backend_name(), frames);

        Ok(Self {
            tracker,
            cbv_srv_uav_heap,
            sampler_heap,
            render_target_heap,
            depth_stencil_heap,
            renderer_allocator,
            recording_slot: None,
            shut_down: false,
        })
    }

    /// Create an allocator for application resources, ready to be passed
    /// to `begin_frame` and `shutdown`
    ///
    /// Its release ring matches the tracker and starts at [`Self::release_slot`],
    /// so it may be created at any point of the frame loop.
    pub fn create_resource_allocator(&self, name: &str, total_size: usize) -> Result<DynamicAllocator> {
        let mut allocator = DynamicAllocator::new(name, total_size, self.tracker.frame_count())?;
        self.adopt(&mut allocator)?;
        Ok(allocator)
    }

    /// Make deferred releases of `releaser` land in the slot this context
    /// is on
    ///
    /// For heaps and allocators created after the first frame: their ring
    /// otherwise starts at slot 0, which is swept before the current frame
    /// retires.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the ring size differs from the frame count.
    pub fn adopt(&self, releaser: &mut dyn DeferredReleaser) -> Result<()> {
        self.check_frame_count(releaser, "adopt")?;
        releaser.set_frame_slot(self.release_slot())
    }

    /// Frame slot a deferred release made right now belongs to
    ///
    /// The slot being recorded, else the last one submitted. Before the
    /// first frame this is slot 0, which nothing on the GPU uses yet.
    pub fn release_slot(&self) -> usize {
        if let Some(frame_slot) = self.recording_slot {
            return frame_slot;
        }
        let frames = self.tracker.frame_count();
        if self.tracker.fence_value_submitted() == 0 {
            return self.tracker.get_frame_index();
        }
        (self.tracker.get_frame_index() + frames - 1) % frames
    }

    /// Wait for the next frame slot, then reclaim everything released in it
    ///
    /// `resources` is the application's resource allocator; its
    /// `release_later` queue is swept together with the owned ones.
    /// Returns the frame slot now being recorded.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if `resources` does not have one release slot per
    /// frame in flight (nothing is waited on). Once the slot is acquired the
    /// frame counts as recording: every sweep runs and the first failure is
    /// returned.
    pub fn begin_frame(&mut self, resources: &mut DynamicAllocator) -> Result<usize> {
        if self.shut_down {
            return Err(engine_err!(SOURCE, InvalidState, "begin_frame after shutdown"));
        }
        self.check_frame_count(resources, "begin_frame")?;

        let frame_slot = self.tracker.begin_frame()?;
        self.recording_slot = Some(frame_slot);

        // The GPU is done with this slot: its releases can take effect
        let mut first_error = None;
        for heap in self.heaps_mut() {
            if let Err(e) = heap.do_deferred_releases(frame_slot) {
                first_error.get_or_insert(e);
            }
        }
        if let Err(e) = self.renderer_allocator.do_deferred_releases(frame_slot) {
            first_error.get_or_insert(e);
        }
        if let Err(e) = resources.do_deferred_releases(frame_slot) {
            first_error.get_or_insert(e);
        }

        match first_error {
            Some(e) => {
                engine_warn!(SOURCE, "Frame slot {} recording after a failed sweep: {}", frame_slot, e);
                Err(e)
            }
            None => Ok(frame_slot),
        }
    }

    /// Submit the frame being recorded
    pub fn end_frame(&mut self) -> Result<()> {
        self.tracker.end_frame()?;
        self.recording_slot = None;
        Ok(())
    }

    /// Copy `data` into a fresh constant buffer and give it a CBV
    ///
    /// Both the chunk and the descriptor are released automatically once the
    /// current frame slot comes around again.
    ///
    /// # Errors
    ///
    /// `InvalidState` outside of `begin_frame`/`end_frame`, `OutOfMemory` or
    /// `DescriptorHeapExhausted` when a budget is exceeded.
    pub fn create_transient_constants(&mut self, label: &str, data: &[u8]) -> Result<TransientConstants> {
        if self.recording_slot.is_none() {
            return Err(engine_err!(SOURCE, InvalidState, "transient constants '{}' requested outside of a frame", label));
        }

        let size = data.len().max(1).next_multiple_of(CONSTANT_BUFFER_ALIGNMENT);
        let address = self.renderer_allocator.allocate(size, CONSTANT_BUFFER_ALIGNMENT, label)?;

        let descriptor = match self.cbv_srv_uav_heap.allocate() {
            Ok(descriptor) => descriptor,
            Err(e) => {
                self.discard_transient(label, address, None);
                return Err(e);
            }
        };

        // On failure the chunk goes back at once, the descriptor retires with this slot
        if let Err(e) = self.fill_transient(address, size, &descriptor, data) {
            self.discard_transient(label, address, Some(descriptor));
            return Err(e);
        }
        if let Err(e) = self.cbv_srv_uav_heap.free_later(descriptor) {
            self.discard_transient(label, address, Some(descriptor));
            return Err(e);
        }
        if let Err(e) = self.renderer_allocator.release_later(address) {
            // The descriptor is already queued and goes with its slot
            self.discard_transient(label, address, None);
            return Err(e);
        }

        Ok(TransientConstants { address, size, descriptor })
    }

    /// Wait for the GPU to retire everything, then run every pending release
    ///
    /// Must be called before the context or the resource allocator is torn
    /// down. Idempotent.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if `resources` does not have one release slot per
    /// frame in flight, before anything is drained.
    pub fn shutdown(&mut self, resources: &mut DynamicAllocator) -> Result<()> {
        if self.shut_down {
            return Ok(());
        }
        self.check_frame_count(resources, "shutdown")?;
        if self.recording_slot.take().is_some() {
            engine_warn!(SOURCE, "Shutdown while a frame is being recorded");
        }

        self.tracker.drain()?;
        for heap in self.heaps_mut() {
            heap.flush_deferred_releases();
        }
        self.renderer_allocator.flush_deferred_releases()?;
        resources.flush_deferred_releases()?;

        self.shut_down = true;
        engine_info!(SOURCE, "Frame context shut down after {} frames", self.tracker.fence_value_submitted());
        Ok(())
    }

    // ===== ACCESSORS =====

    /// Heap of the given class
    pub fn heap(&self, heap_type: DescriptorHeapType) -> &DescriptorHeap {
        match heap_type {
            DescriptorHeapType::CbvSrvUav => &self.cbv_srv_uav_heap,
            DescriptorHeapType::Sampler => &self.sampler_heap,
            DescriptorHeapType::RenderTarget => &self.render_target_heap,
            DescriptorHeapType::DepthStencil => &self.depth_stencil_heap,
        }
    }

    /// Mutable heap of the given class
    pub fn heap_mut(&mut self, heap_type: DescriptorHeapType) -> &mut DescriptorHeap {
        match heap_type {
            DescriptorHeapType::CbvSrvUav => &mut self.cbv_srv_uav_heap,
            DescriptorHeapType::Sampler => &mut self.sampler_heap,
            DescriptorHeapType::RenderTarget => &mut self.render_target_heap,
            DescriptorHeapType::DepthStencil => &mut self.depth_stencil_heap,
        }
    }

    pub fn renderer_allocator(&self) -> &DynamicAllocator {
        &self.renderer_allocator
    }

    pub fn renderer_allocator_mut(&mut self) -> &mut DynamicAllocator {
        &mut self.renderer_allocator
    }

    pub fn tracker(&self) -> &FrameFenceTracker {
        &self.tracker
    }

    /// Frame slot being recorded, if any
    pub fn recording_slot(&self) -> Option<usize> {
        self.recording_slot
    }

    /// Frame slot the next `begin_frame` will return
    pub fn frame_index(&self) -> usize {
        self.tracker.get_frame_index()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    fn check_frame_count(&self, releaser: &dyn DeferredReleaser, operation: &str) -> Result<()> {
        let expected = self.tracker.frame_count();
        if releaser.frame_count() != expected {
            return Err(engine_err!(
                SOURCE,
                InvalidArgument,
                "{}: release ring has {} frame slots but {} frames are in flight",
                operation, releaser.frame_count(), expected
            ));
        }
        Ok(())
    }

    /// Copy `data` into the chunk and point the descriptor at it
    fn fill_transient(&mut self, address: MemoryAddress, size: usize, descriptor: &DescriptorHandle, data: &[u8]) -> Result<()> {
        self.renderer_allocator.write(address, data)?;
        let view = BufferViewDesc {
            address: self.renderer_allocator.bytes(address)?.as_ptr() as u64,
            size: size as u64,
        };
        self.cbv_srv_uav_heap.write_buffer_view(descriptor, &view)
    }

    /// Give back the parts of a transient constant buffer that failed halfway
    fn discard_transient(&mut self, label: &str, address: MemoryAddress, descriptor: Option<DescriptorHandle>) {
        if let Err(e) = self.renderer_allocator.release(address) {
            engine_warn!(SOURCE, "Transient constants '{}': chunk {} not given back: {}", label, address, e);
        }
        if let Some(mut descriptor) = descriptor {
            if let Err(e) = self.cbv_srv_uav_heap.free(&mut descriptor) {
                engine_warn!(SOURCE, "Transient constants '{}': descriptor not given back: {}", label, e);
            }
        }
        engine_trace!(SOURCE, "Transient constants '{}' rolled back", label);
    }

    fn create_heap(
        device: &mut dyn GraphicsDevice,
        config: &Config,
        name: &str,
        heap_type: DescriptorHeapType,
        capacity: u32,
    ) -> Result<DescriptorHeap> {
        DescriptorHeap::new(
            device,
            &DescriptorHeapDesc {
                name: name.to_string(),
                heap_type,
                capacity,
                // Render target and depth stencil heaps override this
                shader_visible: true,
                frame_count: config.frames_in_flight,
                handle_validation: config.handle_validation,
            },
        )
    }

    fn heaps_mut(&mut self) -> [&mut DescriptorHeap; 4] {
        [
            &mut self.cbv_srv_uav_heap,
            &mut self.sampler_heap,
            &mut self.render_target_heap,
            &mut self.depth_stencil_heap,
        ]
    }
}

#[cfg(test)]
#[path = "frame_context_tests.rs"]
mod tests;
