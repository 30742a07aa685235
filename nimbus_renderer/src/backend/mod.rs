/// Backend module - graphics API boundary and the headless implementation

pub mod graphics_device;
pub mod headless;

pub use graphics_device::*;
pub use headless::{HeadlessDevice, HeadlessGpuWorker, HeadlessTimeline};
