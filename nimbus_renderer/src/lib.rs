/*!
# Nimbus Renderer

Resource-lifetime core of the Nimbus multi-buffered renderer.

The CPU records up to `frames_in_flight` frames ahead of the GPU. This crate
decides when descriptor slots and CPU-side memory may be reused without
racing the GPU that is still reading them.

## Architecture

- **DynamicAllocator**: named-chunk first-fit heap over one fixed block
- **DescriptorHeap**: fixed-capacity descriptor slots with frame-delayed release
- **FrameFenceTracker**: per-frame-slot fence values, the only blocking point
- **FrameContext**: drives the three above once per frame
- **GraphicsDevice**: boundary traits implemented by graphics backends
  (headless simulation here, Vulkan in `nimbus_renderer_vulkan`)
*/

// Internal modules
mod error;
mod config;
mod frame_context;
pub mod log;
pub mod backend;
pub mod descriptor;
pub mod frame;
pub mod memory;

// Main nimbus namespace module
pub mod nimbus {
    // Error types
    pub use crate::error::{Error, Result};

    // Configuration
    pub use crate::config::{Config, HandleValidation, MIB};

    // Per-frame glue
    pub use crate::frame_context::{FrameContext, TransientConstants, CONSTANT_BUFFER_ALIGNMENT};

    // Logging sub-module (types and dispatch functions used by the macros)
    pub mod log {
        pub use crate::log::{
            log, log_detailed, reset_logger, set_logger, DefaultLogger, LogEntry, LogSeverity, Logger,
        };
    }

    // Backend boundary and headless backend
    pub mod backend {
        pub use crate::backend::*;
    }

    // Descriptor heaps
    pub mod descriptor {
        pub use crate::descriptor::*;
    }

    // Frame synchronization
    pub mod frame {
        pub use crate::frame::*;
    }

    // Dynamic allocator
    pub mod memory {
        pub use crate::memory::*;
    }
}
