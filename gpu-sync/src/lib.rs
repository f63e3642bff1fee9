//! # RedLilium GPU Sync
//!
//! Resource synchronization and write scheduling for explicit GPU APIs.
//!
//! ## Overview
//!
//! This crate provides:
//! - [`WriteScheduler`] - Pending buffer writes committed directly or through staging
//! - [`ImageResource`] - Images with per-subresource layout tracking
//! - [`CommandBufferResource`] - Recordable work that retains resources until it completes
//! - [`PresentationSurface`] - The acquire → render → present → recycle loop
//! - [`GraphicsDevice`] - Handle-based facade over all of the above
//! - Multiple context support: Vulkan and Dummy (for testing)
//!
//! ## Example
//!
//! ```ignore
//! use redlilium_gpu_sync::{DeviceConfig, GraphicsDevice};
//!
//! let mut device = GraphicsDevice::new(context, DeviceConfig::default())?;
//! let mut ring = device.create_command_ring()?;
//! let surface = device.create_surface(raw_surface, SurfaceConfiguration::new(1280, 720));
//!
//! loop {
//!     let frame = device.prepare_frame(surface)?;
//!     let cmd = ring.next_slot()?;
//!     cmd.begin()?;
//!     // Commit writes, transition layouts, render...
//!     cmd.end()?;
//!     frame.attach_to(cmd);
//!     cmd.submit()?;
//!     device.present_frame(surface, frame)?;
//! }
//! ```

pub mod backend;
pub mod barriers;
pub mod command;
pub mod config;
pub mod defaults;
pub mod device;
pub mod error;
pub mod profiling;
pub mod recycle;
pub mod resources;
pub mod swapchain;
pub mod sync;
pub mod types;

// Re-export main types for convenience
pub use backend::GpuContext;
pub use barriers::BarrierBatch;
pub use command::{CommandBufferResource, CommandRing, CommandState};
pub use config::DeviceConfig;
pub use defaults::DefaultResources;
pub use device::{BufferHandle, GraphicsDevice, ImageHandle, SurfaceHandle};
pub use error::{GraphicsError, GraphicsResult};
pub use resources::{
    CommitReport, DeviceBuffer, ImageResource, LayoutMap, WritePath, WriteScheduler,
    WriteStrategy,
};
pub use swapchain::{
    FrameResources, PresentMode, PresentationSurface, SurfaceConfiguration, SurfaceState,
};
pub use sync::{FencePool, SemaphorePool, SubmissionPoint, TimelineCounter};
pub use types::{
    BufferDescriptor, BufferUsage, Extent3d, ImageDescriptor, ImageLayout, ResidencyPattern,
    SubresourceRange, TextureFormat, TextureUsage,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
