/// Headless backend - a CPU-simulated GPU
///
/// Descriptor heaps are plain host memory with made-up GPU addresses, and
/// the GPU timeline is a counter that only moves when something completes
/// it: a test calling [`HeadlessTimeline::complete_up_to`], or a
/// [`HeadlessGpuWorker`] thread retiring one submission per tick. This makes
/// fence blocking and device loss reproducible without a graphics driver.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::backend::{
    BufferViewDesc, GraphicsDevice, NativeDescriptorHeap, NativeDescriptorHeapDesc, SubmissionQueue,
};
use crate::error::{Error, Result};
use crate::{engine_debug, engine_err, engine_info, engine_warn};

const SOURCE: &str = "nimbus::headless";

/// Slot stride of headless descriptor heaps (address + size of a buffer view)
pub const HEADLESS_DESCRIPTOR_STRIDE: u32 = 32;

/// First fake GPU address handed to a shader-visible heap
const GPU_ADDRESS_BASE: u64 = 0x1_0000_0000;

/// Fake GPU ranges are spaced on this boundary
const GPU_RANGE_ALIGNMENT: u64 = 0x1_0000;

// ============================================================================
// Timeline
// ============================================================================

#[derive(Debug, Default)]
struct TimelineState {
    /// Highest value a submission asked to be signaled
    signaled: u64,
    /// Highest value the simulated GPU has reached
    completed: u64,
    device_lost: bool,
}

/// Simulated GPU completion counter, shared by the device, its queues and
/// whoever drives the simulation
#[derive(Debug, Default)]
pub struct HeadlessTimeline {
    state: Mutex<TimelineState>,
    changed: Condvar,
}

impl HeadlessTimeline {
    /// Create a timeline at value 0
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, TimelineState> {
        // The state is a few integers, always consistent between statements
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Highest value submitted work will signal
    pub fn signaled_value(&self) -> u64 {
        self.lock().signaled
    }

    /// Highest value the simulated GPU has reached
    pub fn completed_value(&self) -> u64 {
        self.lock().completed
    }

    /// Whether [`lose_device`](Self::lose_device) was called
    pub fn is_device_lost(&self) -> bool {
        self.lock().device_lost
    }

    /// Retire submitted work up to `value`
    ///
    /// The counter never passes the highest signaled value and never goes
    /// backwards. Returns the completed value afterwards.
    pub fn complete_up_to(&self, value: u64) -> u64 {
        let mut state = self.lock();
        let target = value.min(state.signaled);
        if target > state.completed {
            state.completed = target;
            self.changed.notify_all();
        }
        state.completed
    }

    /// Retire every submission so far
    pub fn complete_all(&self) -> u64 {
        self.complete_up_to(u64::MAX)
    }

    /// Simulate a device removal: every query and wait fails from now on,
    /// including waits already blocked
    pub fn lose_device(&self) {
        let mut state = self.lock();
        if !state.device_lost {
            engine_warn!(SOURCE, "Simulating device loss at completed value {}", state.completed);
            state.device_lost = true;
            self.changed.notify_all();
        }
    }

    /// Start a thread that retires one submission every `latency`
    pub fn spawn_worker(self: &Arc<Self>, latency: Duration) -> HeadlessGpuWorker {
        HeadlessGpuWorker::spawn(Arc::clone(self), latency)
    }

    fn signal(&self, value: u64) -> Result<()> {
        let mut state = self.lock();
        if state.device_lost {
            return Err(Error::DeviceLost("headless device lost before submission".to_string()));
        }
        if value <= state.signaled {
            return Err(Error::InvalidArgument(format!(
                "signal value {} does not increase the timeline (already {})",
                value, state.signaled
            )));
        }
        state.signaled = value;
        self.changed.notify_all();
        Ok(())
    }

    fn query(&self) -> Result<u64> {
        let state = self.lock();
        if state.device_lost {
            return Err(Error::DeviceLost(format!(
                "headless device lost (last completed value {})",
                state.completed
            )));
        }
        Ok(state.completed)
    }

    fn wait_for(&self, value: u64) -> Result<()> {
        let mut state = self.lock();
        loop {
            if state.device_lost {
                return Err(Error::DeviceLost(format!(
                    "headless device lost while waiting for value {}",
                    value
                )));
            }
            if state.completed >= value {
                return Ok(());
            }
            if value > state.signaled {
                // Nothing will ever raise the counter that far
                return Err(Error::InvalidState(format!(
                    "wait for value {} which was never signaled (highest {})",
                    value, state.signaled
                )));
            }
            state = self.changed.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
    }
}

// ============================================================================
// Worker
// ============================================================================

/// Background thread playing the GPU: retires one signaled value per tick
///
/// Stops and joins when dropped.
pub struct HeadlessGpuWorker {
    timeline: Arc<HeadlessTimeline>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl HeadlessGpuWorker {
    fn spawn(timeline: Arc<HeadlessTimeline>, latency: Duration) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let thread = {
            let timeline = Arc::clone(&timeline);
            let stop = Arc::clone(&stop);
            thread::spawn(move || Self::run(&timeline, &stop, latency))
        };
        engine_debug!(SOURCE, "GPU worker started ({:?} per submission)", latency);
        Self { timeline, stop, thread: Some(thread) }
    }

    fn run(timeline: &HeadlessTimeline, stop: &AtomicBool, latency: Duration) {
        loop {
            {
                let mut state = timeline.lock();
                while !stop.load(Ordering::Acquire) && !state.device_lost && state.completed >= state.signaled {
                    state = timeline.changed.wait(state).unwrap_or_else(PoisonError::into_inner);
                }
                if stop.load(Ordering::Acquire) || state.device_lost {
                    return;
                }
            }

            thread::sleep(latency);

            let mut state = timeline.lock();
            if state.device_lost {
                return;
            }
            if state.completed < state.signaled {
                state.completed += 1;
                timeline.changed.notify_all();
            }
        }
    }
}

impl Drop for HeadlessGpuWorker {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        {
            let _state = self.timeline.lock();
            self.timeline.changed.notify_all();
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

// ============================================================================
// Device
// ============================================================================

/// CPU-simulated graphics device
pub struct HeadlessDevice {
    timeline: Arc<HeadlessTimeline>,
    next_handle: u64,
    next_gpu_address: u64,
}

impl HeadlessDevice {
    /// Create a device with a fresh timeline
    pub fn new() -> Self {
        engine_info!(SOURCE, "Headless device created");
        Self {
            timeline: HeadlessTimeline::new(),
            next_handle: 1,
            next_gpu_address: GPU_ADDRESS_BASE,
        }
    }

    /// The timeline every queue of this device signals
    pub fn timeline(&self) -> Arc<HeadlessTimeline> {
        Arc::clone(&self.timeline)
    }

    fn next_handle(&mut self) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphicsDevice for HeadlessDevice {
    fn backend_name(&self) -> &str {
        "headless"
    }

    fn create_descriptor_heap(&mut self, desc: &NativeDescriptorHeapDesc) -> Result<Box<dyn NativeDescriptorHeap>> {
        if desc.capacity == 0 {
            return Err(engine_err!(SOURCE, InvalidArgument, "descriptor heap '{}' has zero capacity", desc.name));
        }

        let size = desc.capacity as u64 * HEADLESS_DESCRIPTOR_STRIDE as u64;
        let gpu_start = if desc.shader_visible {
            let start = self.next_gpu_address;
            self.next_gpu_address += size.div_ceil(GPU_RANGE_ALIGNMENT) * GPU_RANGE_ALIGNMENT;
            Some(start)
        } else {
            None
        };

        Ok(Box::new(HeadlessDescriptorHeap {
            timeline: Arc::clone(&self.timeline),
            memory: vec![0; size as usize],
            gpu_start,
            handle: self.next_handle(),
        }))
    }

    fn create_submission_queue(&mut self, frame_count: usize) -> Result<Box<dyn SubmissionQueue>> {
        if frame_count == 0 {
            return Err(engine_err!(SOURCE, InvalidArgument, "submission queue needs at least one frame slot"));
        }
        let handle = self.next_handle();
        let command_lists = (0..frame_count).map(|_| self.next_handle()).collect();
        Ok(Box::new(HeadlessQueue {
            timeline: Arc::clone(&self.timeline),
            handle,
            command_lists,
            recording: None,
        }))
    }
}

// ============================================================================
// Native objects
// ============================================================================

struct HeadlessDescriptorHeap {
    /// Writes fail once the device is lost
    timeline: Arc<HeadlessTimeline>,
    memory: Vec<u8>,
    gpu_start: Option<u64>,
    handle: u64,
}

impl NativeDescriptorHeap for HeadlessDescriptorHeap {
    fn cpu_start(&self) -> u64 {
        self.memory.as_ptr() as u64
    }

    fn gpu_start(&self) -> Option<u64> {
        self.gpu_start
    }

    fn descriptor_stride(&self) -> u32 {
        HEADLESS_DESCRIPTOR_STRIDE
    }

    fn raw_handle(&self) -> u64 {
        self.handle
    }

    fn write_buffer_view(&mut self, index: u32, view: &BufferViewDesc) -> Result<()> {
        if self.timeline.is_device_lost() {
            return Err(Error::DeviceLost(format!("headless device lost, descriptor slot {} not written", index)));
        }
        let start = index as usize * HEADLESS_DESCRIPTOR_STRIDE as usize;
        let slot = self
            .memory
            .get_mut(start..start + HEADLESS_DESCRIPTOR_STRIDE as usize)
            .ok_or_else(|| Error::InvalidArgument(format!("descriptor slot {} out of range", index)))?;
        slot[..8].copy_from_slice(&view.address.to_le_bytes());
        slot[8..16].copy_from_slice(&view.size.to_le_bytes());
        Ok(())
    }
}

struct HeadlessQueue {
    timeline: Arc<HeadlessTimeline>,
    handle: u64,
    command_lists: Vec<u64>,
    recording: Option<usize>,
}

impl SubmissionQueue for HeadlessQueue {
    fn begin_recording(&mut self, frame_slot: usize) -> Result<()> {
        if frame_slot >= self.command_lists.len() {
            return Err(Error::InvalidArgument(format!(
                "frame slot {} out of range ({} command lists)",
                frame_slot,
                self.command_lists.len()
            )));
        }
        if let Some(open) = self.recording {
            return Err(Error::InvalidState(format!("command list of frame slot {} is still open", open)));
        }
        self.recording = Some(frame_slot);
        Ok(())
    }

    fn submit(&mut self, frame_slot: usize, signal_value: u64) -> Result<()> {
        if self.recording != Some(frame_slot) {
            return Err(Error::InvalidState(format!("submit of frame slot {} which is not recording", frame_slot)));
        }
        self.timeline.signal(signal_value)?;
        self.recording = None;
        Ok(())
    }

    fn completed_value(&self) -> Result<u64> {
        self.timeline.query()
    }

    fn wait_for_value(&self, value: u64) -> Result<()> {
        self.timeline.wait_for(value)
    }

    fn native_queue_handle(&self) -> u64 {
        self.handle
    }

    fn native_command_list(&self, frame_slot: usize) -> u64 {
        self.command_lists.get(frame_slot).copied().unwrap_or(0)
    }
}

#[cfg(test)]
#[path = "headless_tests.rs"]
mod tests;
