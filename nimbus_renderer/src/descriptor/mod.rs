/// Descriptor module - descriptor slot heaps and their handles

pub mod descriptor_handle;
pub mod descriptor_heap;
pub mod shared_descriptor_heap;

pub use descriptor_handle::DescriptorHandle;
pub use descriptor_heap::*;
pub use shared_descriptor_heap::SharedDescriptorHeap;
