/// Fixed-size, zero-initialized backing block owned by a dynamic allocator

use std::alloc::{self, Layout};
use std::ptr::NonNull;

use crate::error::{Error, Result};

/// Alignment of the block start
///
/// Chunk alignment up to this value is therefore the same whether it is
/// computed on block offsets or on process addresses.
pub const BLOCK_ALIGNMENT: usize = 256;

pub(crate) struct BackingBlock {
    ptr: NonNull<u8>,
    layout: Layout,
}

// The block is plain bytes exclusively owned by its allocator.
unsafe impl Send for BackingBlock {}
unsafe impl Sync for BackingBlock {}

impl BackingBlock {
    /// Reserve `size` bytes from the system allocator
    pub(crate) fn new(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::InvalidArgument("backing block size must be non-zero".to_string()));
        }
        let layout = Layout::from_size_align(size, BLOCK_ALIGNMENT)
            .map_err(|e| Error::InvalidArgument(format!("invalid backing block size {}: {}", size, e)))?;

        // SAFETY: layout has a non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw)
            .ok_or_else(|| Error::OutOfMemory(format!("system refused a {} byte backing block", size)))?;

        Ok(Self { ptr, layout })
    }

    pub(crate) fn len(&self) -> usize {
        self.layout.size()
    }

    /// Process address of the block start
    pub(crate) fn base_address(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    pub(crate) fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr is valid for len() initialized bytes for the life of self.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len()) }
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above, and &mut self guarantees exclusive access.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len()) }
    }
}

impl Drop for BackingBlock {
    fn drop(&mut self) {
        // SAFETY: ptr was returned by alloc_zeroed with this exact layout.
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) }
    }
}
