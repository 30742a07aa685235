//! Nimbus demo - drives the frame loop without a window
//!
//! Usage: nimbus_demo [--frames N] [--vulkan] (see `--help`)
//!
//! Without `--vulkan` the headless backend runs with a simulated GPU
//! thread. `--vulkan` needs the `vulkan` feature and a Vulkan 1.2 GPU.

use bytemuck::{Pod, Zeroable};
use clap::Parser;
use nimbus_renderer::nimbus::backend::{GraphicsDevice, HeadlessDevice, HeadlessGpuWorker};
use nimbus_renderer::nimbus::descriptor::{DescriptorHandle, DescriptorHeapType};
use nimbus_renderer::nimbus::memory::{MemoryAddress, DEFAULT_ALIGNMENT};
use nimbus_renderer::nimbus::{Config, FrameContext, Result};
use nimbus_renderer::{engine_error, engine_info};
use std::collections::VecDeque;
use std::time::Duration;

const SOURCE: &str = "nimbus::demo";

/// Objects drawn per frame, each with its own constants
const OBJECTS_PER_FRAME: u32 = 32;

/// Streamed textures kept resident at any time
const RESIDENT_TEXTURES: usize = 8;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct CameraConstants {
    view_proj: [[f32; 4]; 4],
    time: f32,
    _padding: [f32; 3],
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct ObjectConstants {
    model: [[f32; 4]; 4],
    color: [f32; 4],
}

/// Drive the Nimbus frame loop without a window
#[derive(Parser, Debug)]
#[command(name = "nimbus_demo", version)]
struct Options {
    /// Number of frames to run
    #[arg(long, default_value_t = 300)]
    frames: usize,

    /// Use the Vulkan backend instead of the headless one
    #[arg(long)]
    vulkan: bool,
}

/// The backend plus whatever keeps it running
struct Backend {
    device: Box<dyn GraphicsDevice>,
    _worker: Option<HeadlessGpuWorker>,
}

fn create_backend(options: &Options) -> Result<Backend> {
    if options.vulkan {
        return create_vulkan_backend();
    }

    let device = HeadlessDevice::new();
    let worker = device.timeline().spawn_worker(Duration::from_millis(2));
    Ok(Backend { device: Box::new(device), _worker: Some(worker) })
}

#[cfg(feature = "vulkan")]
fn create_vulkan_backend() -> Result<Backend> {
    let device = nimbus_renderer_vulkan::VulkanDevice::new(Default::default())?;
    Ok(Backend { device: Box::new(device), _worker: None })
}

#[cfg(not(feature = "vulkan"))]
fn create_vulkan_backend() -> Result<Backend> {
    Err(nimbus_renderer::nimbus::Error::InvalidArgument("built without the 'vulkan' feature".to_string()))
}

fn identity() -> [[f32; 4]; 4] {
    [
        [1.0, 0.0, 0.0, 0.0],
        [0.0, 1.0, 0.0, 0.0],
        [0.0, 0.0, 1.0, 0.0],
        [0.0, 0.0, 0.0, 1.0],
    ]
}

fn run(options: &Options) -> Result<()> {
    let mut backend = create_backend(options)?;
    let config = Config::default();

    let mut context = FrameContext::new(backend.device.as_mut(), &config)?;
    let mut resources = context.create_resource_allocator("resource", config.resource_allocator_size)?;

    let mut textures: VecDeque<(MemoryAddress, DescriptorHandle)> = VecDeque::new();

    for frame in 0..options.frames {
        context.begin_frame(&mut resources)?;

        let camera = CameraConstants {
            view_proj: identity(),
            time: frame as f32 / 60.0,
            _padding: [0.0; 3],
        };
        context.create_transient_constants("camera", bytemuck::bytes_of(&camera))?;

        for object in 0..OBJECTS_PER_FRAME {
            let mut model = identity();
            model[3][0] = object as f32;
            let constants = ObjectConstants { model, color: [1.0, 0.5, 0.25, 1.0] };
            context.create_transient_constants("object", bytemuck::bytes_of(&constants))?;
        }

        // Stream a texture in every few frames, retire the oldest
        if frame % 10 == 0 {
            let address = resources.allocate(256 * 1024, DEFAULT_ALIGNMENT, "streamed texture")?;
            let srv = context.heap_mut(DescriptorHeapType::CbvSrvUav).allocate()?;
            textures.push_back((address, srv));
            if textures.len() > RESIDENT_TEXTURES {
                if let Some((old_address, old_srv)) = textures.pop_front() {
                    resources.release_later(old_address)?;
                    context.heap_mut(DescriptorHeapType::CbvSrvUav).free_later(old_srv)?;
                }
            }
        }

        context.end_frame()?;

        if frame % 60 == 0 {
            let stats = context.renderer_allocator().memory_stats();
            engine_info!(
                SOURCE,
                "Frame {}: {} CBV/SRV/UAV descriptors live, renderer allocator {} / {} bytes",
                frame,
                context.heap(DescriptorHeapType::CbvSrvUav).len(),
                stats.used_bytes,
                context.renderer_allocator().total_size()
            );
        }
    }

    context.shutdown(&mut resources)?;
    resources.debug_memory();
    engine_info!(SOURCE, "Ran {} frames on the {} backend", options.frames, backend.device.backend_name());
    Ok(())
}

fn main() {
    // Bad arguments print usage and exit with clap's status
    let options = Options::parse();
    if let Err(err) = run(&options) {
        engine_error!(SOURCE, "Demo stopped: {}", err);
        if err.is_fatal() {
            std::process::exit(1);
        }
        std::process::exit(2);
    }
}

#[cfg(test)]
#[path = "main_tests.rs"]
mod tests;
