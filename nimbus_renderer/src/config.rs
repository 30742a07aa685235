//! Configuration for the frame-lifetime core
//!
//! All budgets here are development-time constants: the allocators and heaps
//! never grow past them, so exhausting one is a fatal error rather than a
//! runtime-variable load.

use crate::error::{Error, Result};

/// One mebibyte, for readable allocator sizes
pub const MIB: usize = 1024 * 1024;

/// How much validation payload a descriptor handle carries through `free()`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleValidation {
    /// Only the address-derived bounds check (cannot corrupt the slot array)
    Minimal,
    /// Owning heap id, stride, slot index and generation are all verified
    Full,
}

impl Default for HandleValidation {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            HandleValidation::Full
        } else {
            HandleValidation::Minimal
        }
    }
}

/// Core configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Number of frames the CPU may record ahead of the GPU (ring size)
    pub frames_in_flight: usize,
    /// Backing block size of the process-wide resource allocator (bytes)
    pub resource_allocator_size: usize,
    /// Backing block size of the renderer-scoped transient allocator (bytes)
    pub renderer_allocator_size: usize,
    /// Slots in the shader-visible CBV/SRV/UAV heap
    pub cbv_srv_uav_heap_capacity: u32,
    /// Slots in the shader-visible sampler heap
    pub sampler_heap_capacity: u32,
    /// Slots in the render-target view heap
    pub render_target_heap_capacity: u32,
    /// Slots in the depth-stencil view heap
    pub depth_stencil_heap_capacity: u32,
    /// Descriptor handle validation level
    pub handle_validation: HandleValidation,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            frames_in_flight: 3,
            resource_allocator_size: 64 * MIB,
            renderer_allocator_size: 8 * MIB,
            cbv_srv_uav_heap_capacity: 4096,
            sampler_heap_capacity: 64,
            render_target_heap_capacity: 512,
            depth_stencil_heap_capacity: 512,
            handle_validation: HandleValidation::default(),
        }
    }
}

impl Config {
    /// Check that every budget is non-zero
    pub fn validate(&self) -> Result<()> {
        if self.frames_in_flight == 0 {
            return Err(Error::InvalidArgument("frames_in_flight must be at least 1".to_string()));
        }
        if self.resource_allocator_size == 0 || self.renderer_allocator_size == 0 {
            return Err(Error::InvalidArgument("allocator sizes must be non-zero".to_string()));
        }
        let capacities = [
            ("cbv_srv_uav_heap_capacity", self.cbv_srv_uav_heap_capacity),
            ("sampler_heap_capacity", self.sampler_heap_capacity),
            ("render_target_heap_capacity", self.render_target_heap_capacity),
            ("depth_stencil_heap_capacity", self.depth_stencil_heap_capacity),
        ];
        if let Some((name, _)) = capacities.iter().find(|(_, capacity)| *capacity == 0) {
            return Err(Error::InvalidArgument(format!("{} must be non-zero", name)));
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
