/// DynamicAllocator - named-chunk heap over one fixed-size block
///
/// Serves every general CPU-side allocation of the renderer: mesh buffers,
/// file contents, per-object constant-buffer shadow copies. The block is
/// carved into contiguous chunks kept sorted by address; allocation is
/// first-fit (lowest address), release merges with both neighbors.
///
/// The allocator never grows. Running out of room is reported as
/// `Error::OutOfMemory` naming the allocator, and callers treat it as fatal.

use rustc_hash::FxHashMap;

use crate::error::{Error, Result};
use crate::frame::DeferredReleaser;
use crate::frame::deferred_release::DeferredReleaseQueue;
use crate::memory::backing_block::BackingBlock;
use crate::memory::memory_chunk::{
    MemoryAddress, MemoryChunk, MemoryStats, FREE_LABEL, UNKNOWN_LABEL,
};
use crate::{engine_debug, engine_err, engine_error, engine_info, engine_trace};

/// Default alignment of an allocation
pub const DEFAULT_ALIGNMENT: usize = 8;

/// Every chunk size and chunk start is a multiple of this
pub const GRANULE: usize = 8;

/// A trailing remainder smaller than this stays attached to the allocation
pub const MIN_SPLIT_REMAINDER: usize = 16;

const SOURCE: &str = "nimbus::DynamicAllocator";

/// `value` rounded up to a power-of-two `alignment`, `None` on overflow
fn round_up(value: usize, alignment: usize) -> Option<usize> {
    value.checked_add(alignment - 1).map(|v| v & !(alignment - 1))
}

/// Named-chunk dynamic allocator
pub struct DynamicAllocator {
    /// Diagnostic name ("resource", "renderer", ...)
    name: String,
    block: BackingBlock,
    /// Contiguous, address-sorted chunks covering the whole block
    chunks: Vec<MemoryChunk>,
    /// Chunks freed with `release_later`, per frame slot
    deferred: DeferredReleaseQueue<MemoryAddress>,
}

impl DynamicAllocator {
    /// Create an allocator whose `release_later` ring has one queue per
    /// frame in flight
    ///
    /// `frames_in_flight` must match the frame fence tracker that drives
    /// [`DeferredReleaser::do_deferred_releases`].
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a zero size or zero frames, `OutOfMemory` if the
    /// system cannot provide the backing block. Both are fatal for the caller.
    pub fn new(name: &str, total_size: usize, frames_in_flight: usize) -> Result<Self> {
        if frames_in_flight == 0 {
            return Err(engine_err!(SOURCE, InvalidArgument, "allocator '{}' needs at least one frame in flight", name));
        }
        let block = BackingBlock::new(total_size).map_err(|e| {
            engine_error!(SOURCE, "Allocator '{}' could not reserve its backing block: {}", name, e);
            e
        })?;

        engine_info!(SOURCE, "Allocator '{}' reserved {} bytes", name, total_size);

        Ok(Self {
            name: name.to_string(),
            chunks: vec![MemoryChunk::free(0, block.len())],
            block,
            deferred: DeferredReleaseQueue::new(frames_in_flight),
        })
    }

    /// Diagnostic name of this allocator
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Size of the backing block
    pub fn total_size(&self) -> usize {
        self.block.len()
    }

    /// Frame slots of the `release_later` ring
    pub fn frame_count(&self) -> usize {
        self.deferred.frame_count()
    }

    /// Frame slot `release_later` currently queues into
    pub fn current_frame_slot(&self) -> usize {
        self.deferred.current_frame()
    }

    /// Allocate `size` bytes aligned to `alignment`, labeled `label`
    ///
    /// An empty label is recorded as "unknown". Sizes are rounded up to
    /// [`GRANULE`]; a zero size still receives one granule.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if `alignment` is not a power of two, `OutOfMemory`
    /// if no free chunk can hold the request.
    pub fn allocate(&mut self, size: usize, alignment: usize, label: &str) -> Result<MemoryAddress> {
        let alignment = self.checked_alignment(alignment)?;
        let size = self.checked_size(size, alignment)?;

        let base = self.block.base_address();
        let found = self.chunks.iter().enumerate().find_map(|(index, chunk)| {
            if !chunk.is_free {
                return None;
            }
            let start = round_up(base.checked_add(chunk.address.0)?, alignment)? - base;
            let padding = start - chunk.address.0;
            (padding.checked_add(size)? <= chunk.size).then_some((index, padding))
        });

        let Some((index, padding)) = found else {
            let largest = self.largest_free_chunk();
            return Err(engine_err!(
                SOURCE,
                OutOfMemory,
                "allocator '{}' cannot fit {} bytes (align {}), largest free chunk is {} of {} bytes",
                self.name, size, alignment, largest, self.block.len()
            ));
        };

        let index = self.carve(index, padding, size);
        let chunk = &mut self.chunks[index];
        chunk.is_free = false;
        chunk.name = if label.is_empty() { UNKNOWN_LABEL.to_string() } else { label.to_string() };

        Ok(chunk.address)
    }

    /// Release the chunk starting at `address` and merge it with free neighbors
    ///
    /// # Errors
    ///
    /// `InvalidAddress` if `address` is not the start of a live chunk (including
    /// double release) or is already queued for a deferred release. The chunk
    /// list is left untouched in that case.
    pub fn release(&mut self, address: MemoryAddress) -> Result<()> {
        let index = self.live_chunk_index(address, "release")?;
        if self.deferred.contains(&address) {
            return Err(engine_err!(
                SOURCE,
                InvalidAddress,
                "allocator '{}': release of {} which is already queued for deferred release",
                self.name, address
            ));
        }
        self.release_at(index);
        Ok(())
    }

    /// Queue the chunk at `address` for release once the current frame slot
    /// comes around again (see [`DeferredReleaser`])
    pub fn release_later(&mut self, address: MemoryAddress) -> Result<()> {
        self.live_chunk_index(address, "release_later")?;
        if self.deferred.contains(&address) {
            return Err(engine_err!(
                SOURCE,
                InvalidAddress,
                "allocator '{}': {} queued for deferred release twice",
                self.name, address
            ));
        }
        self.deferred.push(address);
        Ok(())
    }

    /// Resize the chunk at `address`
    ///
    /// Grows or shrinks in place when the chunk, possibly merged with its
    /// immediately following free neighbor, can hold `new_size` and already
    /// satisfies `alignment`. Otherwise a new chunk is allocated, the first
    /// `min(old_size, new_size)` bytes are copied over and the old chunk is
    /// released. The label is preserved.
    pub fn reallocate(&mut self, address: MemoryAddress, new_size: usize, alignment: usize) -> Result<MemoryAddress> {
        let alignment = self.checked_alignment(alignment)?;
        let index = self.live_chunk_index(address, "reallocate")?;
        if self.deferred.contains(&address) {
            return Err(engine_err!(
                SOURCE,
                InvalidAddress,
                "allocator '{}': reallocate of {} which is queued for deferred release",
                self.name, address
            ));
        }

        let new_size = self.checked_size(new_size, alignment)?;
        let aligned = (self.block.base_address() + address.0) % alignment == 0;

        if aligned {
            let next_free = self
                .chunks
                .get(index + 1)
                .filter(|next| next.is_free)
                .map_or(0, |next| next.size);

            if new_size <= self.chunks[index].size + next_free {
                if new_size > self.chunks[index].size {
                    let next = self.chunks.remove(index + 1);
                    self.chunks[index].size += next.size;
                }
                self.trim(index, new_size);
                return Ok(address);
            }
        }

        let old_size = self.chunks[index].size;
        let label = self.chunks[index].name.clone();
        let new_address = self.allocate(new_size, alignment, &label)?;

        let copy_len = old_size.min(new_size);
        self.block
            .as_mut_slice()
            .copy_within(address.0..address.0 + copy_len, new_address.0);

        // Indices shifted during allocate
        let old_index = self.live_chunk_index(address, "reallocate")?;
        self.release_at(old_index);

        engine_trace!(SOURCE, "Allocator '{}' relocated '{}' {} -> {}", self.name, label, address, new_address);
        Ok(new_address)
    }

    /// Usable bytes of the live chunk at `address`
    pub fn bytes(&self, address: MemoryAddress) -> Result<&[u8]> {
        let index = self.live_chunk_index(address, "bytes")?;
        let chunk = &self.chunks[index];
        Ok(&self.block.as_slice()[chunk.address.0..chunk.end()])
    }

    /// Mutable usable bytes of the live chunk at `address`
    pub fn bytes_mut(&mut self, address: MemoryAddress) -> Result<&mut [u8]> {
        let index = self.live_chunk_index(address, "bytes_mut")?;
        let (start, end) = (self.chunks[index].address.0, self.chunks[index].end());
        Ok(&mut self.block.as_mut_slice()[start..end])
    }

    /// View the live chunk at `address` as a slice of `T`
    ///
    /// Trailing bytes that do not form a whole `T` are excluded.
    pub fn typed_mut<T: bytemuck::Pod>(&mut self, address: MemoryAddress) -> Result<&mut [T]> {
        let element = std::mem::size_of::<T>();
        if element == 0 {
            return Err(Error::InvalidArgument("zero-sized element type".to_string()));
        }
        let bytes = self.bytes_mut(address)?;
        let len = bytes.len() / element * element;
        bytemuck::try_cast_slice_mut(&mut bytes[..len])
            .map_err(|e| Error::InvalidArgument(format!("cannot view {} as {}: {:?}", address, std::any::type_name::<T>(), e)))
    }

    /// Copy `data` to the start of the live chunk at `address`
    pub fn write(&mut self, address: MemoryAddress, data: &[u8]) -> Result<()> {
        let bytes = self.bytes_mut(address)?;
        if data.len() > bytes.len() {
            return Err(Error::InvalidArgument(format!(
                "{} bytes do not fit chunk {} of {} bytes",
                data.len(), address, bytes.len()
            )));
        }
        bytes[..data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Snapshot of every chunk, free and used, in address order
    ///
    /// For diagnostics and tests only.
    pub fn get_memory_chunk_list(&self) -> Vec<MemoryChunk> {
        self.chunks.clone()
    }

    /// Usage summary
    pub fn memory_stats(&self) -> MemoryStats {
        let mut stats = MemoryStats {
            total_bytes: self.block.len(),
            chunk_count: self.chunks.len(),
            pending_release_count: self.deferred.pending_count(),
            ..MemoryStats::default()
        };
        for chunk in &self.chunks {
            if chunk.is_free {
                stats.free_bytes += chunk.size;
                stats.largest_free_chunk = stats.largest_free_chunk.max(chunk.size);
            } else {
                stats.used_bytes += chunk.size;
                stats.live_chunk_count += 1;
            }
        }
        stats
    }

    /// Log the chunk table and per-label totals at DEBUG severity
    pub fn debug_memory(&self) {
        let stats = self.memory_stats();
        engine_debug!(
            SOURCE,
            "Allocator '{}': {} / {} bytes used, {} chunks, largest free {}",
            self.name, stats.used_bytes, stats.total_bytes, stats.chunk_count, stats.largest_free_chunk
        );

        for chunk in &self.chunks {
            engine_debug!(
                SOURCE,
                "  {:>10} {:>10} bytes  {:<4}  {}",
                chunk.address, chunk.size, if chunk.is_free { "free" } else { "used" }, chunk.name
            );
        }

        let mut per_label: FxHashMap<&str, (usize, usize)> = FxHashMap::default();
        for chunk in self.chunks.iter().filter(|chunk| !chunk.is_free) {
            let entry = per_label.entry(chunk.name.as_str()).or_default();
            entry.0 += 1;
            entry.1 += chunk.size;
        }
        let mut labels: Vec<_> = per_label.into_iter().collect();
        labels.sort_by(|a, b| b.1 .1.cmp(&a.1 .1).then(a.0.cmp(b.0)));
        for (label, (count, bytes)) in labels {
            engine_debug!(SOURCE, "  label '{}': {} chunks, {} bytes", label, count, bytes);
        }
    }

    /// Release every chunk queued with `release_later`, whatever its slot
    ///
    /// Only valid once the GPU is idle.
    pub fn flush_deferred_releases(&mut self) -> Result<()> {
        let pending = self.deferred.drain_all();
        self.release_all(pending)
    }

    /// Queue `address` without checking it, to exercise failing sweeps
    #[cfg(test)]
    pub(crate) fn push_deferred_unchecked(&mut self, address: MemoryAddress) {
        self.deferred.push(address);
    }

    // ===== INTERNAL =====

    fn checked_alignment(&self, alignment: usize) -> Result<usize> {
        if !alignment.is_power_of_two() {
            return Err(engine_err!(
                SOURCE,
                InvalidArgument,
                "allocator '{}': alignment {} is not a power of two",
                self.name, alignment
            ));
        }
        Ok(alignment.max(GRANULE))
    }

    /// `size` rounded up to [`GRANULE`], or `OutOfMemory` if that overflows
    fn checked_size(&self, size: usize, alignment: usize) -> Result<usize> {
        round_up(size.max(1), GRANULE).ok_or_else(|| {
            engine_err!(
                SOURCE,
                OutOfMemory,
                "allocator '{}' cannot fit {} bytes (align {}), the size overflows",
                self.name, size, alignment
            )
        })
    }

    fn largest_free_chunk(&self) -> usize {
        self.chunks
            .iter()
            .filter(|chunk| chunk.is_free)
            .map(|chunk| chunk.size)
            .max()
            .unwrap_or(0)
    }

    /// Index of the live chunk starting exactly at `address`
    fn live_chunk_index(&self, address: MemoryAddress, operation: &str) -> Result<usize> {
        match self.chunks.binary_search_by_key(&address, |chunk| chunk.address) {
            Ok(index) if !self.chunks[index].is_free => Ok(index),
            Ok(_) => Err(engine_err!(
                SOURCE,
                InvalidAddress,
                "allocator '{}': {} of {} which is already free",
                self.name, operation, address
            )),
            Err(_) => Err(engine_err!(
                SOURCE,
                InvalidAddress,
                "allocator '{}': {} of {} which is not the start of a chunk",
                self.name, operation, address
            )),
        }
    }

    /// Split the free chunk at `index` into [padding][size][remainder] and
    /// return the index of the middle part
    fn carve(&mut self, index: usize, padding: usize, size: usize) -> usize {
        let mut index = index;
        if padding > 0 {
            let start = self.chunks[index].address.0;
            self.chunks[index].address = MemoryAddress(start + padding);
            self.chunks[index].size -= padding;
            self.chunks.insert(index, MemoryChunk::free(start, padding));
            index += 1;
        }
        self.trim(index, size);
        index
    }

    /// Shrink the chunk at `index` to `size`, handing the remainder to a
    /// following free chunk when it is worth splitting off
    fn trim(&mut self, index: usize, size: usize) {
        let remainder = self.chunks[index].size - size;
        if remainder < MIN_SPLIT_REMAINDER {
            return;
        }
        self.chunks[index].size = size;
        let tail_start = self.chunks[index].end();

        match self.chunks.get_mut(index + 1) {
            Some(next) if next.is_free => {
                next.address = MemoryAddress(tail_start);
                next.size += remainder;
            }
            _ => self.chunks.insert(index + 1, MemoryChunk::free(tail_start, remainder)),
        }
    }

    fn release_at(&mut self, index: usize) {
        let chunk = &mut self.chunks[index];
        chunk.is_free = true;
        chunk.name = FREE_LABEL.to_string();

        // Merge right, then left
        if self.chunks.get(index + 1).is_some_and(|next| next.is_free) {
            let next = self.chunks.remove(index + 1);
            self.chunks[index].size += next.size;
        }
        if index > 0 && self.chunks[index - 1].is_free {
            let current = self.chunks.remove(index);
            self.chunks[index - 1].size += current.size;
        }
    }

    fn release_all(&mut self, addresses: Vec<MemoryAddress>) -> Result<()> {
        let mut first_error = None;
        for address in addresses {
            match self.live_chunk_index(address, "deferred release") {
                Ok(index) => self.release_at(index),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl DeferredReleaser for DynamicAllocator {
    /// Release every chunk that was queued with `release_later` while
    /// `frame_slot` was current, then make `frame_slot` current
    fn do_deferred_releases(&mut self, frame_slot: usize) -> Result<()> {
        let ready: Vec<MemoryAddress> = self.deferred.drain(frame_slot).collect();
        if !ready.is_empty() {
            engine_trace!(SOURCE, "Allocator '{}' released {} deferred chunks (frame slot {})", self.name, ready.len(), frame_slot);
        }
        self.release_all(ready)
    }

    fn frame_count(&self) -> usize {
        self.deferred.frame_count()
    }

    fn set_frame_slot(&mut self, frame_slot: usize) -> Result<()> {
        self.deferred.set_current_frame(frame_slot);
        Ok(())
    }
}

#[cfg(test)]
#[path = "dynamic_allocator_tests.rs"]
mod tests;
