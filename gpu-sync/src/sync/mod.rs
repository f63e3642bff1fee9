//! GPU synchronization primitives.
//!
//! - [`TimelineCounter`] - Completion counter of one submission stream
//! - [`SubmissionPoint`] - Non-owning "value V on timeline T" marker
//! - [`FencePool`] / [`SemaphorePool`] - Recycled binary primitives

mod pool;
mod timeline;

pub use pool::{FencePool, PooledPrimitive, SemaphorePool, SyncPool};
pub use timeline::{SubmissionPoint, TimelineCounter};
