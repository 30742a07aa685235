/// Chunk bookkeeping types for the dynamic allocator

use std::fmt;

/// Label given to chunks allocated without a name
pub const UNKNOWN_LABEL: &str = "unknown";

/// Label carried by free chunks
pub const FREE_LABEL: &str = "free";

/// Address of a chunk inside an allocator's backing block
///
/// Stored as a byte offset from the block start, so addresses stay valid
/// value types independent of where the block lives in process memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MemoryAddress(pub(crate) usize);

impl MemoryAddress {
    /// Byte offset from the start of the backing block
    pub fn offset(self) -> usize {
        self.0
    }
}

impl fmt::Display for MemoryAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "+0x{:x}", self.0)
    }
}

/// One contiguous region of the backing block, free or in use
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryChunk {
    /// Diagnostic label ([`FREE_LABEL`] for free chunks)
    pub name: String,
    /// Start of the chunk
    pub address: MemoryAddress,
    /// Usable size in bytes (may exceed the requested size by the split slack)
    pub size: usize,
    /// Whether the chunk is available for allocation
    pub is_free: bool,
}

impl MemoryChunk {
    pub(crate) fn free(offset: usize, size: usize) -> Self {
        Self {
            name: FREE_LABEL.to_string(),
            address: MemoryAddress(offset),
            size,
            is_free: true,
        }
    }

    /// One past the last byte of the chunk
    pub fn end(&self) -> usize {
        self.address.0 + self.size
    }
}

/// Usage summary of an allocator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemoryStats {
    /// Backing block size
    pub total_bytes: usize,
    /// Bytes held by live chunks
    pub used_bytes: usize,
    /// Bytes held by free chunks
    pub free_bytes: usize,
    /// Size of the largest free chunk
    pub largest_free_chunk: usize,
    /// Number of chunks (free and used)
    pub chunk_count: usize,
    /// Number of live chunks
    pub live_chunk_count: usize,
    /// Live chunks queued for a deferred release
    pub pending_release_count: usize,
}
