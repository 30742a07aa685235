/// Per-frame deferred release ring
///
/// One growable queue per frame-in-flight slot. Items pushed while frame slot
/// `f` is current stay queued until the owner drains slot `f` again, which
/// happens one full lap of the ring later, after the fence for `f` has been
/// waited on.
///
/// Both the descriptor heaps (slot indices) and the dynamic allocator
/// (chunk addresses) keep one of these.
#[derive(Debug)]
pub struct DeferredReleaseQueue<T> {
    queues: Vec<Vec<T>>,
    current_frame: usize,
}

impl<T> DeferredReleaseQueue<T> {
    /// Create a ring with one empty queue per frame slot
    ///
    /// `frame_count` of 0 is clamped to 1.
    pub fn new(frame_count: usize) -> Self {
        let frame_count = frame_count.max(1);
        Self {
            queues: (0..frame_count).map(|_| Vec::new()).collect(),
            current_frame: 0,
        }
    }

    /// Number of frame slots in the ring
    pub fn frame_count(&self) -> usize {
        self.queues.len()
    }

    /// Frame slot that new items are queued into
    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    /// Make `frame_slot` (modulo the ring size) the slot new items are
    /// queued into, without draining anything
    pub fn set_current_frame(&mut self, frame_slot: usize) {
        self.current_frame = frame_slot % self.queues.len();
    }

    /// Queue an item into the current frame slot
    pub fn push(&mut self, item: T) {
        self.queues[self.current_frame].push(item);
    }

    /// Take every item queued for `frame_slot` (FIFO order) and make
    /// `frame_slot` the current slot.
    ///
    /// `frame_slot` is reduced modulo the ring size.
    pub fn drain(&mut self, frame_slot: usize) -> std::vec::Drain<'_, T> {
        let slot = frame_slot % self.queues.len();
        self.current_frame = slot;
        self.queues[slot].drain(..)
    }

    /// Take every queued item of every slot, oldest slot first
    ///
    /// Only valid once the GPU is idle (shutdown).
    pub fn drain_all(&mut self) -> Vec<T> {
        let count = self.queues.len();
        let start = (self.current_frame + 1) % count;
        let mut items = Vec::with_capacity(self.pending_count());
        for offset in 0..count {
            items.append(&mut self.queues[(start + offset) % count]);
        }
        items
    }

    /// Items waiting in `frame_slot`
    pub fn pending_in(&self, frame_slot: usize) -> usize {
        self.queues[frame_slot % self.queues.len()].len()
    }

    /// Items waiting across all slots
    pub fn pending_count(&self) -> usize {
        self.queues.iter().map(Vec::len).sum()
    }

    /// Whether `item` is queued in any slot
    pub fn contains(&self, item: &T) -> bool
    where
        T: PartialEq,
    {
        self.queues.iter().any(|queue| queue.contains(item))
    }
}

#[cfg(test)]
#[path = "deferred_release_tests.rs"]
mod tests;
