/// Graphics API boundary - the native objects the core drives
///
/// The core never talks to a graphics API directly. A backend (Vulkan,
/// headless) implements these traits and hands out boxed native objects;
/// the descriptor heaps and the frame fence tracker own them.

use crate::descriptor::DescriptorHeapType;
use crate::error::Result;

// ============================================================================
// Descriptor heaps
// ============================================================================

/// Parameters for creating a native descriptor heap
#[derive(Debug, Clone)]
pub struct NativeDescriptorHeapDesc {
    /// Debug name
    pub name: String,
    /// Descriptor class
    pub heap_type: DescriptorHeapType,
    /// Number of descriptor slots
    pub capacity: u32,
    /// Whether shaders read the heap (a GPU start address is required)
    pub shader_visible: bool,
}

/// Buffer view written into a descriptor slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferViewDesc {
    /// Address of the first byte the view covers
    pub address: u64,
    /// Size of the view in bytes
    pub size: u64,
}

/// Native descriptor heap memory
///
/// Slot `i` lives at `cpu_start() + i * descriptor_stride()` and, for
/// shader-visible heaps, at `gpu_start() + i * descriptor_stride()`.
pub trait NativeDescriptorHeap: Send {
    /// CPU address of slot 0 (never 0)
    fn cpu_start(&self) -> u64;

    /// GPU address of slot 0, only for shader-visible heaps
    fn gpu_start(&self) -> Option<u64>;

    /// Distance in bytes between two consecutive slots (never 0)
    fn descriptor_stride(&self) -> u32;

    /// Opaque native heap handle, for external collaborators
    fn raw_handle(&self) -> u64;

    /// Write a buffer view into slot `index`
    fn write_buffer_view(&mut self, index: u32, view: &BufferViewDesc) -> Result<()>;
}

// ============================================================================
// Submission
// ============================================================================

/// Command queue plus the monotonically increasing completion counter
/// (fence / timeline semaphore) the frame fence tracker waits on
pub trait SubmissionQueue: Send {
    /// Reset and open the command list of `frame_slot`
    ///
    /// Only called once the GPU has retired the slot's previous work.
    fn begin_recording(&mut self, frame_slot: usize) -> Result<()>;

    /// Close and submit the command list of `frame_slot`, then have the GPU
    /// raise the completion counter to `signal_value` once it is done
    fn submit(&mut self, frame_slot: usize, signal_value: u64) -> Result<()>;

    /// Last value the GPU reported as reached
    ///
    /// # Errors
    ///
    /// `DeviceLost` if the device was removed or reset.
    fn completed_value(&self) -> Result<u64>;

    /// Block the calling thread until the counter reaches `value`
    ///
    /// No timeout: a hang here is a GPU fault.
    fn wait_for_value(&self, value: u64) -> Result<()>;

    /// Opaque native queue handle
    fn native_queue_handle(&self) -> u64;

    /// Opaque native command list handle of `frame_slot`
    fn native_command_list(&self, frame_slot: usize) -> u64;
}

// ============================================================================
// Device
// ============================================================================

/// Factory for the native objects of one GPU
pub trait GraphicsDevice {
    /// Backend name for diagnostics ("vulkan", "headless")
    fn backend_name(&self) -> &str;

    /// Create the memory behind a descriptor heap
    fn create_descriptor_heap(&mut self, desc: &NativeDescriptorHeapDesc) -> Result<Box<dyn NativeDescriptorHeap>>;

    /// Create the submission queue with one command list per frame slot
    fn create_submission_queue(&mut self, frame_count: usize) -> Result<Box<dyn SubmissionQueue>>;
}
