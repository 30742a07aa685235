/// Vulkan submission queue
///
/// The graphics queue plus one timeline semaphore. Each frame slot owns a
/// command pool with a single primary command buffer; the pool is reset
/// when the slot is reused, which the frame fence tracker only does after
/// the GPU has retired the slot's previous submission.

use crate::vulkan_context::{vk_error, GpuContext, SOURCE};
use ash::vk;
use ash::vk::Handle;
use nimbus_renderer::nimbus::backend::SubmissionQueue;
use nimbus_renderer::nimbus::Result;
use nimbus_renderer::{engine_bail, engine_debug, engine_warn};
use std::sync::Arc;

/// Per-slot command recording state
struct FrameCommands {
    pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,
}

/// Vulkan implementation of [`SubmissionQueue`] over a timeline semaphore
pub struct VulkanSubmissionQueue {
    gpu_context: Arc<GpuContext>,
    timeline: vk::Semaphore,
    frames: Vec<FrameCommands>,
    /// Highest value handed to `submit`
    last_signaled: u64,
}

impl VulkanSubmissionQueue {
    pub(crate) fn new(gpu_context: Arc<GpuContext>, frame_count: usize) -> Result<Self> {
        if frame_count == 0 {
            engine_bail!(SOURCE, InvalidArgument, "Submission queue needs at least one frame slot");
        }

        let device = &gpu_context.device;
        let mut type_info = vk::SemaphoreTypeCreateInfo::default()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(0);
        let semaphore_info = vk::SemaphoreCreateInfo::default().push_next(&mut type_info);
        let timeline = unsafe { device.create_semaphore(&semaphore_info, None) }
            .map_err(|e| vk_error("vkCreateSemaphore (timeline)", e))?;

        let mut queue = Self {
            gpu_context: Arc::clone(&gpu_context),
            timeline,
            frames: Vec::with_capacity(frame_count),
            last_signaled: 0,
        };

        // Partially built queues are cleaned up by Drop
        for _ in 0..frame_count {
            let pool_info = vk::CommandPoolCreateInfo::default()
                .queue_family_index(gpu_context.graphics_queue_family)
                .flags(vk::CommandPoolCreateFlags::TRANSIENT);
            let pool = unsafe { device.create_command_pool(&pool_info, None) }
                .map_err(|e| vk_error("vkCreateCommandPool", e))?;

            let alloc_info = vk::CommandBufferAllocateInfo::default()
                .command_pool(pool)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(1);
            let command_buffer = match unsafe { device.allocate_command_buffers(&alloc_info) } {
                Ok(buffers) => buffers[0],
                Err(e) => {
                    unsafe { device.destroy_command_pool(pool, None) };
                    return Err(vk_error("vkAllocateCommandBuffers", e));
                }
            };
            queue.frames.push(FrameCommands { pool, command_buffer });
        }

        engine_debug!(SOURCE, "Submission queue created with {} frame slots", frame_count);
        Ok(queue)
    }

    fn frame(&self, frame_slot: usize) -> Result<&FrameCommands> {
        match self.frames.get(frame_slot) {
            Some(frame) => Ok(frame),
            None => engine_bail!(
                SOURCE,
                InvalidArgument,
                "Frame slot {} out of range (frame count {})",
                frame_slot,
                self.frames.len()
            ),
        }
    }

    /// Timeline semaphore handle, for external collaborators that wait on frames
    pub fn timeline_semaphore(&self) -> vk::Semaphore {
        self.timeline
    }
}

impl SubmissionQueue for VulkanSubmissionQueue {
    fn begin_recording(&mut self, frame_slot: usize) -> Result<()> {
        let frame = self.frame(frame_slot)?;
        let device = &self.gpu_context.device;
        unsafe {
            device
                .reset_command_pool(frame.pool, vk::CommandPoolResetFlags::empty())
                .map_err(|e| vk_error("vkResetCommandPool", e))?;
            let begin_info = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            device
                .begin_command_buffer(frame.command_buffer, &begin_info)
                .map_err(|e| vk_error("vkBeginCommandBuffer", e))?;
        }
        Ok(())
    }

    fn submit(&mut self, frame_slot: usize, signal_value: u64) -> Result<()> {
        if signal_value <= self.last_signaled {
            engine_bail!(
                SOURCE,
                InvalidArgument,
                "Timeline signal value {} does not exceed {}",
                signal_value,
                self.last_signaled
            );
        }
        let frame = self.frame(frame_slot)?;
        let device = &self.gpu_context.device;

        let command_buffers = [frame.command_buffer];
        let signal_semaphores = [self.timeline];
        let signal_values = [signal_value];
        let mut timeline_info = vk::TimelineSemaphoreSubmitInfo::default()
            .signal_semaphore_values(&signal_values);
        let submit_info = vk::SubmitInfo::default()
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .push_next(&mut timeline_info);

        unsafe {
            device
                .end_command_buffer(frame.command_buffer)
                .map_err(|e| vk_error("vkEndCommandBuffer", e))?;
            device
                .queue_submit(self.gpu_context.graphics_queue, &[submit_info], vk::Fence::null())
                .map_err(|e| vk_error("vkQueueSubmit", e))?;
        }
        self.last_signaled = signal_value;
        Ok(())
    }

    fn completed_value(&self) -> Result<u64> {
        unsafe { self.gpu_context.device.get_semaphore_counter_value(self.timeline) }
            .map_err(|e| vk_error("vkGetSemaphoreCounterValue", e))
    }

    fn wait_for_value(&self, value: u64) -> Result<()> {
        let semaphores = [self.timeline];
        let values = [value];
        let wait_info = vk::SemaphoreWaitInfo::default()
            .semaphores(&semaphores)
            .values(&values);
        unsafe { self.gpu_context.device.wait_semaphores(&wait_info, u64::MAX) }
            .map_err(|e| vk_error("vkWaitSemaphores", e))
    }

    fn native_queue_handle(&self) -> u64 {
        self.gpu_context.graphics_queue.as_raw()
    }

    fn native_command_list(&self, frame_slot: usize) -> u64 {
        self.frames
            .get(frame_slot)
            .map(|frame| frame.command_buffer.as_raw())
            .unwrap_or(0)
    }
}

impl Drop for VulkanSubmissionQueue {
    fn drop(&mut self) {
        let device = &self.gpu_context.device;
        unsafe {
            // Pools may only be destroyed once their buffers are done
            if self.last_signaled > 0 && self.wait_for_value(self.last_signaled).is_err() {
                engine_warn!(SOURCE, "Could not wait for value {} before destroying the queue", self.last_signaled);
                device.device_wait_idle().ok();
            }
            for frame in self.frames.drain(..) {
                device.destroy_command_pool(frame.pool, None);
            }
            device.destroy_semaphore(self.timeline, None);
        }
    }
}
