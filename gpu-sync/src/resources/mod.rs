//! GPU resources and their synchronization state.
//!
//! - [`DeviceBuffer`] - Owned buffer allocation with its last GPU use
//! - [`WriteScheduler`] - Pending writes and the direct/staged commit
//! - [`ImageResource`] - Owned or swapchain image with a [`LayoutMap`]

mod buffer;
mod image;
mod layout_map;
mod write;

pub use buffer::DeviceBuffer;
pub use image::{ImageOwnership, ImageResource};
pub use layout_map::LayoutMap;
pub use write::{
    CommitReport, PendingWriteSet, WritePath, WriteScheduler, WriteSegment, WriteStrategy,
};
