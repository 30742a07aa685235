/// FrameFenceTracker - bounds how far the CPU records ahead of the GPU
///
/// One completion value per frame slot. `begin_frame` is the only blocking
/// call of the core: it waits until the GPU has retired the work last
/// submitted from the slot it is about to reuse. Once it returns, every
/// deferred release queued in that slot is safe to process.

use crate::backend::SubmissionQueue;
use crate::error::{Error, Result};
use crate::{engine_debug, engine_err, engine_error, engine_info, engine_trace, engine_warn};

const SOURCE: &str = "nimbus::FrameFenceTracker";

/// Lifecycle of one frame slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    /// No GPU work outstanding, free to record into
    Idle,
    /// Work submitted, GPU completion not yet observed
    Submitted,
}

#[derive(Debug, Clone, Copy)]
struct FrameSlot {
    /// Completion value that retires this slot's last submission
    fence_value: u64,
    state: FrameState,
}

/// Per-frame-slot fence bookkeeping over a [`SubmissionQueue`]
pub struct FrameFenceTracker {
    queue: Box<dyn SubmissionQueue>,
    frames: Vec<FrameSlot>,
    current_frame_index: usize,
    /// Value signaled by the latest submission (0 before the first one)
    fence_value_submitted: u64,
    /// Between `begin_frame` and `end_frame`
    recording: bool,
}

impl FrameFenceTracker {
    /// Create a tracker with `frame_count` slots, all idle
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if `frame_count` is 0.
    pub fn new(queue: Box<dyn SubmissionQueue>, frame_count: usize) -> Result<Self> {
        if frame_count == 0 {
            return Err(engine_err!(SOURCE, InvalidArgument, "frame fence tracker needs at least one frame slot"));
        }

        engine_info!(SOURCE, "Created with {} frames in flight", frame_count);

        Ok(Self {
            queue,
            frames: vec![FrameSlot { fence_value: 0, state: FrameState::Idle }; frame_count],
            current_frame_index: 0,
            fence_value_submitted: 0,
            recording: false,
        })
    }

    /// Number of frame slots
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Slot the next (or current) frame records into
    pub fn get_frame_index(&self) -> usize {
        self.current_frame_index
    }

    /// Value signaled by the latest submission
    pub fn fence_value_submitted(&self) -> u64 {
        self.fence_value_submitted
    }

    /// Completion value that retires `frame_slot`'s last submission
    pub fn fence_value_of_frame(&self, frame_slot: usize) -> Option<u64> {
        self.frames.get(frame_slot).map(|frame| frame.fence_value)
    }

    /// State of `frame_slot` as last observed
    pub fn frame_state(&self, frame_slot: usize) -> Option<FrameState> {
        self.frames.get(frame_slot).map(|frame| frame.state)
    }

    /// Whether a frame is between `begin_frame` and `end_frame`
    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// Completion value the GPU reports right now
    pub fn completed_value(&self) -> Result<u64> {
        self.queue.completed_value().map_err(|e| self.report_failure(e))
    }

    /// Native queue handle, for draw submission code
    pub fn native_queue_handle(&self) -> u64 {
        self.queue.native_queue_handle()
    }

    /// Native command list of the current frame slot
    pub fn native_command_list(&self) -> u64 {
        self.queue.native_command_list(self.current_frame_index)
    }

    /// Wait until the current frame slot is retired, then open its command
    /// list for recording
    ///
    /// Returns the frame slot. The caller must run every deferred-release
    /// sweep for that slot before allocating anything for the new frame.
    ///
    /// # Errors
    ///
    /// `InvalidState` if a frame is already being recorded, `DeviceLost` if
    /// the GPU was removed while (or before) waiting.
    pub fn begin_frame(&mut self) -> Result<usize> {
        if self.recording {
            return Err(engine_err!(
                SOURCE,
                InvalidState,
                "begin_frame called twice without end_frame (frame slot {})",
                self.current_frame_index
            ));
        }

        let frame_slot = self.current_frame_index;
        self.wait_for_slot(frame_slot)?;
        self.queue.begin_recording(frame_slot).map_err(|e| self.report_failure(e))?;
        self.recording = true;

        engine_trace!(SOURCE, "Frame slot {} recording", frame_slot);
        Ok(frame_slot)
    }

    /// Submit the current frame and advance to the next slot
    ///
    /// # Errors
    ///
    /// `InvalidState` if no frame is being recorded. A failed submission is
    /// fatal and leaves the counters untouched.
    pub fn end_frame(&mut self) -> Result<()> {
        if !self.recording {
            return Err(engine_err!(
                SOURCE,
                InvalidState,
                "end_frame called without begin_frame (frame slot {})",
                self.current_frame_index
            ));
        }

        let frame_slot = self.current_frame_index;
        let signal_value = self.fence_value_submitted + 1;
        self.queue.submit(frame_slot, signal_value).map_err(|e| self.report_failure(e))?;

        self.fence_value_submitted = signal_value;
        self.frames[frame_slot] = FrameSlot { fence_value: signal_value, state: FrameState::Submitted };
        self.recording = false;
        self.current_frame_index = (frame_slot + 1) % self.frames.len();

        engine_trace!(SOURCE, "Frame slot {} submitted (fence value {})", frame_slot, signal_value);
        Ok(())
    }

    /// Block until every submitted slot is retired
    ///
    /// Required before tearing down anything the GPU may still read.
    pub fn drain(&mut self) -> Result<()> {
        if self.recording {
            engine_warn!(
                SOURCE,
                "Draining while frame slot {} is still recording; its commands are discarded",
                self.current_frame_index
            );
        }

        // Submissions retire in order: waiting for the newest one covers all
        let newest = self
            .frames
            .iter()
            .filter(|frame| frame.state == FrameState::Submitted)
            .map(|frame| frame.fence_value)
            .max();

        if let Some(value) = newest {
            if self.completed_value()? < value {
                engine_debug!(SOURCE, "Draining: waiting for fence value {}", value);
                self.queue.wait_for_value(value).map_err(|e| self.report_failure(e))?;
            }
            for frame in &mut self.frames {
                frame.state = FrameState::Idle;
            }
        }
        Ok(())
    }

    /// Whether any slot still has work the GPU may not have finished
    pub fn has_submitted_frames(&self) -> bool {
        self.frames.iter().any(|frame| frame.state == FrameState::Submitted)
    }

    // ===== INTERNAL =====

    fn wait_for_slot(&mut self, frame_slot: usize) -> Result<()> {
        let frame = self.frames[frame_slot];
        if frame.state == FrameState::Idle {
            return Ok(());
        }

        let completed = self.completed_value()?;
        if completed < frame.fence_value {
            engine_debug!(
                SOURCE,
                "Frame slot {} waiting for fence value {} (GPU at {})",
                frame_slot, frame.fence_value, completed
            );
            self.queue.wait_for_value(frame.fence_value).map_err(|e| self.report_failure(e))?;
        }

        self.frames[frame_slot].state = FrameState::Idle;
        Ok(())
    }

    fn report_failure(&self, error: Error) -> Error {
        engine_error!(SOURCE, "Frame slot {}: {}", self.current_frame_index, error);
        error
    }
}

impl Drop for FrameFenceTracker {
    fn drop(&mut self) {
        if !self.has_submitted_frames() {
            return;
        }
        engine_warn!(
            SOURCE,
            "Dropped with submitted frames (fence value {}), draining",
            self.fence_value_submitted
        );
        if let Err(e) = self.drain() {
            engine_error!(SOURCE, "Drain on drop failed: {}", e);
        }
    }
}

#[cfg(test)]
#[path = "frame_fence_tests.rs"]
mod tests;
