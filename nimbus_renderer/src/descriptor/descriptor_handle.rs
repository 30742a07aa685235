/// DescriptorHandle - copyable reference to one descriptor slot

/// Reference to one live slot of one descriptor heap
///
/// A plain value: copying it does not extend anything's lifetime. Besides
/// the addresses, every handle carries the owning heap id, the slot index and
/// the slot generation, so a heap can reject handles that belong elsewhere or
/// outlived their slot. The zero value is [`DescriptorHandle::INVALID`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DescriptorHandle {
    pub(crate) cpu: u64,
    /// 0 for slots of non shader-visible heaps
    pub(crate) gpu: u64,
    pub(crate) heap_id: u32,
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl DescriptorHandle {
    /// The invalid handle (what `free` leaves behind)
    pub const INVALID: Self = Self {
        cpu: 0,
        gpu: 0,
        heap_id: 0,
        index: 0,
        generation: 0,
    };

    /// Whether this handle refers to a slot at all
    ///
    /// A valid handle may still be stale; only its heap can tell.
    pub fn is_valid(&self) -> bool {
        self.cpu != 0
    }

    /// Whether shaders can address the slot
    pub fn is_shader_visible(&self) -> bool {
        self.gpu != 0
    }

    /// CPU address of the slot
    pub fn cpu(&self) -> u64 {
        self.cpu
    }

    /// GPU address of the slot, for shader-visible heaps
    pub fn gpu(&self) -> Option<u64> {
        (self.gpu != 0).then_some(self.gpu)
    }

    /// Slot index inside the owning heap
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Generation of the slot when this handle was issued
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Id of the owning heap (0 for the invalid handle)
    pub fn heap_id(&self) -> u32 {
        self.heap_id
    }
}
