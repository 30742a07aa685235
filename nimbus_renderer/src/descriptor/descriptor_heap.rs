/// DescriptorHeap - fixed-capacity descriptor slot heap with deferred release
///
/// Slots are handed out lowest-index-first. `free` does not return a slot
/// to the pool: the slot index is queued in the current frame slot's
/// release queue and only becomes free again when `do_deferred_releases`
/// runs for that same frame slot one lap later, after the frame fence has
/// proven the GPU is done reading it.
///
/// No internal locking; see [`SharedDescriptorHeap`](super::SharedDescriptorHeap)
/// for the thread-safe variant.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::backend::{BufferViewDesc, GraphicsDevice, NativeDescriptorHeap, NativeDescriptorHeapDesc};
use crate::config::HandleValidation;
use crate::descriptor::DescriptorHandle;
use crate::error::Result;
use crate::frame::{DeferredReleaseQueue, DeferredReleaser};
use crate::{engine_debug, engine_err, engine_info, engine_trace, engine_warn};

const SOURCE: &str = "nimbus::DescriptorHeap";

/// Heap ids start at 1; 0 marks the invalid handle
static NEXT_HEAP_ID: AtomicU32 = AtomicU32::new(1);

/// Descriptor class of a heap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorHeapType {
    /// Constant buffer, shader resource and unordered access views
    CbvSrvUav,
    /// Samplers
    Sampler,
    /// Render target views (never read by shaders)
    RenderTarget,
    /// Depth stencil views (never read by shaders)
    DepthStencil,
}

impl DescriptorHeapType {
    /// Whether shaders can ever read descriptors of this class
    pub fn supports_shader_visibility(self) -> bool {
        matches!(self, DescriptorHeapType::CbvSrvUav | DescriptorHeapType::Sampler)
    }
}

impl fmt::Display for DescriptorHeapType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DescriptorHeapType::CbvSrvUav => "CBV/SRV/UAV",
            DescriptorHeapType::Sampler => "sampler",
            DescriptorHeapType::RenderTarget => "render target",
            DescriptorHeapType::DepthStencil => "depth stencil",
        };
        f.write_str(name)
    }
}

/// Descriptor heap creation parameters
#[derive(Debug, Clone)]
pub struct DescriptorHeapDesc {
    /// Name used in diagnostics and exhaustion errors
    pub name: String,
    /// Descriptor class
    pub heap_type: DescriptorHeapType,
    /// Number of slots (fixed for the heap's lifetime)
    pub capacity: u32,
    /// Requested visibility; forced off for render target and depth stencil heaps
    pub shader_visible: bool,
    /// Ring size of the deferred-release queues (frames in flight)
    pub frame_count: usize,
    /// How much of a handle `free` verifies
    pub handle_validation: HandleValidation,
}

/// State of one slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Available to `allocate`
    Free,
    /// Owned by exactly one valid handle
    Live,
    /// Freed, waiting in a release queue for its frame slot to come around
    Retiring,
}

#[derive(Debug, Clone, Copy)]
struct DescriptorSlot {
    state: SlotState,
    /// Bumped on every allocation of the slot
    generation: u32,
}

/// Fixed-capacity descriptor slot heap
pub struct DescriptorHeap {
    id: u32,
    name: String,
    heap_type: DescriptorHeapType,
    shader_visible: bool,
    native: Box<dyn NativeDescriptorHeap>,
    cpu_start: u64,
    gpu_start: Option<u64>,
    stride: u32,
    slots: Vec<DescriptorSlot>,
    /// Live plus retiring slots
    used_count: u32,
    pending_release: DeferredReleaseQueue<u32>,
    handle_validation: HandleValidation,
}

impl DescriptorHeap {
    /// Create the heap and its native memory, every slot free
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a zero capacity, `InitializationFailed` if the
    /// backend cannot create the native heap (fatal).
    pub fn new(device: &mut dyn GraphicsDevice, desc: &DescriptorHeapDesc) -> Result<Self> {
        if desc.capacity == 0 {
            return Err(engine_err!(SOURCE, InvalidArgument, "descriptor heap '{}' has zero capacity", desc.name));
        }

        let shader_visible = desc.shader_visible && desc.heap_type.supports_shader_visibility();
        if desc.shader_visible && !shader_visible {
            engine_debug!(
                SOURCE,
                "Heap '{}': {} descriptors are never read by shaders, creating it non shader-visible",
                desc.name, desc.heap_type
            );
        }

        let native_desc = NativeDescriptorHeapDesc {
            name: desc.name.clone(),
            heap_type: desc.heap_type,
            capacity: desc.capacity,
            shader_visible,
        };
        let native = device.create_descriptor_heap(&native_desc).map_err(|e| {
            engine_err!(
                SOURCE,
                InitializationFailed,
                "{} backend failed to create descriptor heap '{}': {}",
                device.backend_name(), desc.name, e
            )
        })?;

        let (cpu_start, gpu_start, stride) = (native.cpu_start(), native.gpu_start(), native.descriptor_stride());
        if cpu_start == 0 || stride == 0 || (shader_visible && gpu_start.is_none()) {
            return Err(engine_err!(
                SOURCE,
                InitializationFailed,
                "descriptor heap '{}': backend returned an unusable heap (cpu 0x{:x}, gpu {:?}, stride {})",
                desc.name, cpu_start, gpu_start, stride
            ));
        }

        let id = NEXT_HEAP_ID.fetch_add(1, Ordering::Relaxed);
        engine_info!(
            SOURCE,
            "Heap '{}' (#{}, {}) created: {} slots, stride {}, {}",
            desc.name, id, desc.heap_type, desc.capacity, stride,
            if shader_visible { "shader-visible" } else { "CPU only" }
        );

        Ok(Self {
            id,
            name: desc.name.clone(),
            heap_type: desc.heap_type,
            shader_visible,
            native,
            cpu_start,
            gpu_start: if shader_visible { gpu_start } else { None },
            stride,
            slots: vec![DescriptorSlot { state: SlotState::Free, generation: 0 }; desc.capacity as usize],
            used_count: 0,
            pending_release: DeferredReleaseQueue::new(desc.frame_count),
            handle_validation: desc.handle_validation,
        })
    }

    /// Hand out the lowest free slot
    ///
    /// # Errors
    ///
    /// `DescriptorHeapExhausted` naming the heap when every slot is live or
    /// retiring. The heap never grows, so this is fatal.
    pub fn allocate(&mut self) -> Result<DescriptorHandle> {
        if self.used_count == self.capacity() {
            return Err(engine_err!(
                SOURCE,
                DescriptorHeapExhausted,
                "heap '{}' ({}) is full: {} slots, {} waiting for deferred release",
                self.name, self.heap_type, self.capacity(), self.pending_release.pending_count()
            ));
        }

        let Some(index) = self.slots.iter().position(|slot| slot.state == SlotState::Free) else {
            return Err(engine_err!(
                SOURCE,
                DescriptorHeapExhausted,
                "heap '{}': used count {} below capacity but no free slot",
                self.name, self.used_count
            ));
        };

        let slot = &mut self.slots[index];
        slot.state = SlotState::Live;
        slot.generation = slot.generation.wrapping_add(1);
        let generation = slot.generation;
        self.used_count += 1;

        let offset = index as u64 * self.stride as u64;
        Ok(DescriptorHandle {
            cpu: self.cpu_start + offset,
            gpu: self.gpu_start.map_or(0, |start| start + offset),
            heap_id: self.id,
            index: index as u32,
            generation,
        })
    }

    /// Schedule the handle's slot for release and clear the caller's handle
    ///
    /// A no-op on an invalid handle. The slot is reclaimed by the next
    /// `do_deferred_releases` call for the current frame slot.
    ///
    /// # Errors
    ///
    /// `InvalidHandle` if the handle belongs to another heap, is misaligned,
    /// stale, or already freed. Neither the heap nor the handle is modified.
    pub fn free(&mut self, handle: &mut DescriptorHandle) -> Result<()> {
        if !handle.is_valid() {
            return Ok(());
        }
        self.retire(handle, "free")?;
        *handle = DescriptorHandle::INVALID;
        Ok(())
    }

    /// Schedule a transient handle's slot for release
    ///
    /// Same two-phase release as [`free`](Self::free), for views known to be
    /// used only by the frame being recorded. Takes the handle by value since
    /// transient handles are not kept around.
    pub fn free_later(&mut self, handle: DescriptorHandle) -> Result<()> {
        if !handle.is_valid() {
            return Ok(());
        }
        self.retire(&handle, "free_later")
    }

    /// Write a buffer view into the handle's slot
    pub fn write_buffer_view(&mut self, handle: &DescriptorHandle, view: &BufferViewDesc) -> Result<()> {
        let index = self.validate(handle, "write_buffer_view")?;
        self.native.write_buffer_view(index as u32, view)
    }

    /// Return every retiring slot of every frame slot to the pool
    ///
    /// Only valid once the GPU is idle (shutdown).
    pub fn flush_deferred_releases(&mut self) {
        let pending = self.pending_release.drain_all();
        if !pending.is_empty() {
            engine_trace!(SOURCE, "Heap '{}' flushed {} retiring slots", self.name, pending.len());
        }
        for index in pending {
            self.reclaim(index);
        }
    }

    // ===== ACCESSORS =====

    /// Process-unique id carried by this heap's handles
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Diagnostic name, as given in the [`DescriptorHeapDesc`]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Descriptor class every slot of this heap holds
    pub fn heap_type(&self) -> DescriptorHeapType {
        self.heap_type
    }

    /// Whether shaders can index this heap, i.e. handles carry a GPU address
    ///
    /// Always false for render target and depth stencil heaps.
    pub fn is_shader_visible(&self) -> bool {
        self.shader_visible
    }

    /// Total number of slots
    pub fn capacity(&self) -> u32 {
        self.slots.len() as u32
    }

    /// Slots that are not free (live or waiting for deferred release)
    pub fn len(&self) -> u32 {
        self.used_count
    }

    /// Whether every slot is free
    pub fn is_empty(&self) -> bool {
        self.used_count == 0
    }

    /// Number of slots waiting for deferred release, all frame slots together
    pub fn pending_release_count(&self) -> usize {
        self.pending_release.pending_count()
    }

    /// Frame slot `free` currently queues into
    pub fn current_frame_slot(&self) -> usize {
        self.pending_release.current_frame()
    }

    /// Frame slots of the deferred-release ring
    pub fn frame_count(&self) -> usize {
        self.pending_release.frame_count()
    }

    /// CPU address of slot 0
    pub fn cpu_start(&self) -> u64 {
        self.cpu_start
    }

    /// GPU address of slot 0, for shader-visible heaps
    pub fn gpu_start(&self) -> Option<u64> {
        self.gpu_start
    }

    /// Bytes between two consecutive slots, as reported by the backend
    pub fn descriptor_stride(&self) -> u32 {
        self.stride
    }

    /// Opaque native heap handle
    pub fn native_handle(&self) -> u64 {
        self.native.raw_handle()
    }

    /// State of slot `index`, `None` if out of range
    pub fn slot_state(&self, index: u32) -> Option<SlotState> {
        self.slots.get(index as usize).map(|slot| slot.state)
    }

    // ===== INTERNAL =====

    fn retire(&mut self, handle: &DescriptorHandle, operation: &str) -> Result<()> {
        let index = self.validate(handle, operation)?;
        self.slots[index].state = SlotState::Retiring;
        self.pending_release.push(index as u32);
        Ok(())
    }

    fn reclaim(&mut self, index: u32) {
        match self.slots.get_mut(index as usize) {
            Some(slot) if slot.state == SlotState::Retiring => {
                slot.state = SlotState::Free;
                self.used_count -= 1;
            }
            _ => engine_warn!(SOURCE, "Heap '{}': release queue held slot {} which was not retiring", self.name, index),
        }
    }

    /// Check that `handle` designates a live slot of this heap and return
    /// the slot index
    fn validate(&self, handle: &DescriptorHandle, operation: &str) -> Result<usize> {
        if self.handle_validation == HandleValidation::Full && handle.heap_id != self.id {
            return Err(engine_err!(
                SOURCE,
                InvalidHandle,
                "heap '{}' (#{}): {} of a handle owned by heap #{}",
                self.name, self.id, operation, handle.heap_id
            ));
        }

        let span = self.slots.len() as u64 * self.stride as u64;
        let offset = handle.cpu.wrapping_sub(self.cpu_start);
        if handle.cpu < self.cpu_start || offset >= span {
            return Err(engine_err!(
                SOURCE,
                InvalidHandle,
                "heap '{}': {} of a handle outside the heap (cpu 0x{:x}, heap 0x{:x}..0x{:x})",
                self.name, operation, handle.cpu, self.cpu_start, self.cpu_start + span
            ));
        }
        if offset % self.stride as u64 != 0 {
            return Err(engine_err!(
                SOURCE,
                InvalidHandle,
                "heap '{}': {} of a misaligned handle (offset {} not a multiple of stride {})",
                self.name, operation, offset, self.stride
            ));
        }

        let index = (offset / self.stride as u64) as usize;
        let slot = self.slots[index];

        if self.handle_validation == HandleValidation::Full {
            if handle.index as usize != index {
                return Err(engine_err!(
                    SOURCE,
                    InvalidHandle,
                    "heap '{}': {} of a corrupted handle (index {} but address of slot {})",
                    self.name, operation, handle.index, index
                ));
            }
            if handle.generation != slot.generation {
                return Err(engine_err!(
                    SOURCE,
                    InvalidHandle,
                    "heap '{}': {} of a stale handle to slot {} (generation {}, slot is at {})",
                    self.name, operation, index, handle.generation, slot.generation
                ));
            }
        }

        match slot.state {
            SlotState::Live => Ok(index),
            SlotState::Retiring => Err(engine_err!(
                SOURCE,
                InvalidHandle,
                "heap '{}': {} of slot {} which is already freed",
                self.name, operation, index
            )),
            SlotState::Free => Err(engine_err!(
                SOURCE,
                InvalidHandle,
                "heap '{}': {} of slot {} which is not allocated",
                self.name, operation, index
            )),
        }
    }
}

impl DeferredReleaser for DescriptorHeap {
    fn do_deferred_releases(&mut self, frame_slot: usize) -> Result<()> {
        let ready: Vec<u32> = self.pending_release.drain(frame_slot).collect();
        if !ready.is_empty() {
            engine_trace!(
                SOURCE,
                "Heap '{}' reclaimed {} slots (frame slot {})",
                self.name, ready.len(), frame_slot
            );
        }
        for index in ready {
            self.reclaim(index);
        }
        Ok(())
    }

    fn frame_count(&self) -> usize {
        self.pending_release.frame_count()
    }

    fn set_frame_slot(&mut self, frame_slot: usize) -> Result<()> {
        self.pending_release.set_current_frame(frame_slot);
        Ok(())
    }
}

impl Drop for DescriptorHeap {
    fn drop(&mut self) {
        let live = (self.used_count as usize).saturating_sub(self.pending_release.pending_count());
        if live > 0 {
            engine_debug!(SOURCE, "Heap '{}' destroyed with {} live slots", self.name, live);
        }
    }
}

#[cfg(test)]
#[path = "descriptor_heap_tests.rs"]
mod tests;
