/// Frame module - frames-in-flight synchronization and deferred release

pub mod deferred_release;
pub mod frame_fence;

pub use deferred_release::DeferredReleaseQueue;
pub use frame_fence::*;

use crate::error::Result;

/// Anything that queues releases per frame slot and reclaims them once the
/// GPU has retired that slot
///
/// Implemented by the descriptor heaps and the dynamic allocator. The frame
/// loop calls `do_deferred_releases(slot)` right after
/// [`FrameFenceTracker::begin_frame`] returned `slot`, and never earlier.
pub trait DeferredReleaser {
    /// Reclaim everything queued while `frame_slot` was current, then make
    /// `frame_slot` the slot new deferred releases are queued into
    fn do_deferred_releases(&mut self, frame_slot: usize) -> Result<()>;

    /// Number of frame slots in the release ring
    ///
    /// Must equal the tracker's frame count, or releases are reclaimed
    /// before the GPU is done with them.
    fn frame_count(&self) -> usize;

    /// Queue future deferred releases into `frame_slot` without reclaiming
    /// anything
    ///
    /// For releasers created while the frame loop is already running.
    fn set_frame_slot(&mut self, frame_slot: usize) -> Result<()>;
}
