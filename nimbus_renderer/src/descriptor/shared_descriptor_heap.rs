/// SharedDescriptorHeap - descriptor heap usable from several threads
///
/// For builds where resource loading runs off the render thread. Every
/// operation takes the one heap-wide lock; there is no per-slot locking.

use std::sync::{Mutex, MutexGuard};

use crate::backend::BufferViewDesc;
use crate::descriptor::{DescriptorHandle, DescriptorHeap, DescriptorHeapType};
use crate::error::Result;
use crate::frame::DeferredReleaser;
use crate::engine_err;

const SOURCE: &str = "nimbus::SharedDescriptorHeap";

/// Mutex-guarded [`DescriptorHeap`]
pub struct SharedDescriptorHeap {
    heap: Mutex<DescriptorHeap>,
    /// Fixed at creation, readable without the lock
    frame_count: usize,
}

impl SharedDescriptorHeap {
    pub fn new(heap: DescriptorHeap) -> Self {
        let frame_count = heap.frame_count();
        Self { heap: Mutex::new(heap), frame_count }
    }

    /// See [`DescriptorHeap::allocate`]
    pub fn allocate(&self) -> Result<DescriptorHandle> {
        self.lock()?.allocate()
    }

    /// See [`DescriptorHeap::free`]
    pub fn free(&self, handle: &mut DescriptorHandle) -> Result<()> {
        self.lock()?.free(handle)
    }

    /// See [`DescriptorHeap::free_later`]
    pub fn free_later(&self, handle: DescriptorHandle) -> Result<()> {
        self.lock()?.free_later(handle)
    }

    /// See [`DescriptorHeap::write_buffer_view`]
    pub fn write_buffer_view(&self, handle: &DescriptorHandle, view: &BufferViewDesc) -> Result<()> {
        self.lock()?.write_buffer_view(handle, view)
    }

    /// Reclaim the slots queued in `frame_slot`
    pub fn do_deferred_releases(&self, frame_slot: usize) -> Result<()> {
        self.lock()?.do_deferred_releases(frame_slot)
    }

    /// See [`DescriptorHeap::flush_deferred_releases`]
    pub fn flush_deferred_releases(&self) -> Result<()> {
        self.lock()?.flush_deferred_releases();
        Ok(())
    }

    pub fn capacity(&self) -> Result<u32> {
        Ok(self.lock()?.capacity())
    }

    pub fn len(&self) -> Result<u32> {
        Ok(self.lock()?.len())
    }

    pub fn heap_type(&self) -> Result<DescriptorHeapType> {
        Ok(self.lock()?.heap_type())
    }

    pub fn pending_release_count(&self) -> Result<usize> {
        Ok(self.lock()?.pending_release_count())
    }

    /// Run `f` with the heap locked, for accessors not mirrored here
    pub fn with_heap<R>(&self, f: impl FnOnce(&mut DescriptorHeap) -> R) -> Result<R> {
        let mut heap = self.lock()?;
        Ok(f(&mut *heap))
    }

    /// Take the heap back
    pub fn into_inner(self) -> Result<DescriptorHeap> {
        self.heap
            .into_inner()
            .map_err(|_| engine_err!(SOURCE, "descriptor heap lock poisoned"))
    }

    fn lock(&self) -> Result<MutexGuard<'_, DescriptorHeap>> {
        // A panic while holding the lock may have left a slot half-updated
        self.heap
            .lock()
            .map_err(|_| engine_err!(SOURCE, "descriptor heap lock poisoned"))
    }
}

impl DeferredReleaser for SharedDescriptorHeap {
    fn do_deferred_releases(&mut self, frame_slot: usize) -> Result<()> {
        SharedDescriptorHeap::do_deferred_releases(self, frame_slot)
    }

    fn frame_count(&self) -> usize {
        self.frame_count
    }

    fn set_frame_slot(&mut self, frame_slot: usize) -> Result<()> {
        self.lock()?.set_frame_slot(frame_slot)
    }
}

#[cfg(test)]
#[path = "shared_descriptor_heap_tests.rs"]
mod tests;
