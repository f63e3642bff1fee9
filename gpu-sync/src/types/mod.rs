//! Common types and descriptors for GPU resources.
//!
//! This module contains format enums, usage and access flags, image layouts and
//! the descriptor structs used throughout the crate.

mod access;
mod buffer;
mod range;
mod texture;

pub use access::{AccessFlags, ImageLayout, PipelineStages};
pub use buffer::{BufferDescriptor, BufferUsage, ResidencyPattern};
pub use range::SubresourceRange;
pub use texture::{Extent3d, ImageAspect, ImageDescriptor, TextureFormat, TextureUsage};
