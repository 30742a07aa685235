/// Memory module - CPU-side dynamic allocation

pub mod backing_block;
pub mod dynamic_allocator;
pub mod memory_chunk;

pub use backing_block::BLOCK_ALIGNMENT;
pub use dynamic_allocator::*;
pub use memory_chunk::*;
