//! Device context abstraction.
//!
//! Everything in this crate talks to the GPU through [`GpuContext`], an
//! object-safe trait shared as `Arc<dyn GpuContext>`. Device objects cross the
//! seam as opaque `u64` handles so the resource logic stays backend neutral.
//!
//! Available contexts:
//! - [`dummy::DummyContext`] - Software device that executes recorded commands
//!   on the CPU (requires `dummy` feature)
//! - [`vulkan::VulkanContext`] - Vulkan via ash and gpu-allocator (requires
//!   `vulkan-backend` feature)
//!
//! Device and queue selection happen outside this crate: a Vulkan context is
//! built from an already created instance, device and queue.

#[cfg(feature = "dummy")]
pub mod dummy;

#[cfg(feature = "vulkan-backend")]
pub mod vulkan;

use std::ops::Range;
use std::time::Duration;

use crate::barriers::BarrierBatch;
use crate::error::GraphicsResult;
use crate::swapchain::PresentMode;
use crate::types::{
    BufferUsage, Extent3d, ImageDescriptor, PipelineStages, ResidencyPattern, TextureFormat,
};

macro_rules! raw_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u64);

        impl $name {
            /// Wrap a raw backend handle.
            pub fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            /// The raw backend handle.
            pub fn raw(self) -> u64 {
                self.0
            }
        }
    };
}

raw_handle!(
    /// Backend buffer object.
    RawBuffer
);
raw_handle!(
    /// Backend image object.
    RawImage
);
raw_handle!(
    /// Backend command buffer.
    RawCommandBuffer
);
raw_handle!(
    /// Backend semaphore, binary or timeline.
    RawSemaphore
);
raw_handle!(
    /// Backend fence.
    RawFence
);
raw_handle!(
    /// Backend swapchain.
    RawSwapchain
);
raw_handle!(
    /// Native presentation surface, created by the windowing layer.
    RawSurface
);

/// Parameters for a raw buffer allocation.
#[derive(Debug, Clone, Copy)]
pub struct RawBufferDescriptor<'a> {
    /// Debug label.
    pub label: Option<&'a str>,
    /// Size in bytes.
    pub size: u64,
    /// Usage flags.
    pub usage: BufferUsage,
    /// Where the memory lives.
    pub pattern: ResidencyPattern,
}

/// Region of a buffer-to-buffer copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferCopy {
    /// Byte offset in the source buffer.
    pub src_offset: u64,
    /// Byte offset in the destination buffer.
    pub dst_offset: u64,
    /// Number of bytes.
    pub size: u64,
}

/// Region of a copy between a buffer and one mip level of an image.
///
/// Buffer data is tightly packed, one layer after another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferImageCopy {
    /// Byte offset of the first texel in the buffer.
    pub buffer_offset: u64,
    /// Mip level copied.
    pub mip_level: u32,
    /// Array layers copied.
    pub layers: Range<u32>,
    /// Extent of the mip level.
    pub extent: Extent3d,
}

/// Result of a bounded timeline wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    /// The timeline reached the requested value.
    Reached,
    /// The timeout elapsed first.
    TimedOut,
}

/// A semaphore the queue waits on before executing a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SemaphoreWait {
    /// Semaphore to wait on.
    pub semaphore: RawSemaphore,
    /// Timeline value, or `None` for a binary semaphore.
    pub value: Option<u64>,
    /// Stages blocked until the wait completes.
    pub stages: PipelineStages,
}

/// A semaphore the queue signals when a submission completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SemaphoreSignal {
    /// Semaphore to signal.
    pub semaphore: RawSemaphore,
    /// Timeline value, or `None` for a binary semaphore.
    pub value: Option<u64>,
}

/// One queue submission.
#[derive(Debug, Clone, Copy)]
pub struct QueueSubmission<'a> {
    /// Command buffers, executed in order.
    pub command_buffers: &'a [RawCommandBuffer],
    /// Semaphores waited on before execution.
    pub waits: &'a [SemaphoreWait],
    /// Semaphores signaled after execution.
    pub signals: &'a [SemaphoreSignal],
    /// Fence signaled after execution.
    pub fence: Option<RawFence>,
}

/// What a surface currently supports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceCapabilities {
    /// Minimum number of swapchain images.
    pub min_image_count: u32,
    /// Maximum number of swapchain images, 0 meaning unbounded.
    pub max_image_count: u32,
    /// Extent the surface demands, or `None` if the swapchain decides.
    pub current_extent: Option<Extent3d>,
    /// Smallest allowed extent.
    pub min_extent: Extent3d,
    /// Largest allowed extent.
    pub max_extent: Extent3d,
    /// Supported image formats, most preferred first.
    pub formats: Vec<TextureFormat>,
    /// Supported present modes.
    pub present_modes: Vec<PresentMode>,
}

/// Parameters for creating a swapchain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapchainDescriptor {
    /// Target surface.
    pub surface: RawSurface,
    /// Image format.
    pub format: TextureFormat,
    /// Present mode.
    pub present_mode: PresentMode,
    /// Image extent.
    pub extent: Extent3d,
    /// Requested image count.
    pub image_count: u32,
    /// Swapchain being replaced. It stays alive until its caller destroys it.
    pub old_swapchain: Option<RawSwapchain>,
}

/// A created swapchain and the images it owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapchainImages {
    /// The swapchain.
    pub swapchain: RawSwapchain,
    /// Images owned by the swapchain, in index order.
    pub images: Vec<RawImage>,
}

/// Result of acquiring a swapchain image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image was acquired.
    Acquired {
        /// Index of the acquired image.
        index: u32,
        /// The swapchain still works but no longer matches the surface exactly.
        suboptimal: bool,
    },
    /// The swapchain must be recreated before anything can be acquired.
    OutOfDate,
}

/// Result of presenting a swapchain image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    /// Presented normally.
    Presented,
    /// Presented, but the swapchain should be recreated.
    Suboptimal,
    /// Not presented; the swapchain must be recreated.
    OutOfDate,
}

/// A present request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresentRequest {
    /// Swapchain to present to.
    pub swapchain: RawSwapchain,
    /// Image index returned by acquire.
    pub image_index: u32,
    /// Binary semaphore signaled when rendering into the image finished.
    pub wait: RawSemaphore,
    /// Fence signaled once the presentation engine no longer uses any
    /// resource referenced by this present.
    pub fence: RawFence,
}

/// Raw memory, command and queue primitives of one device queue.
///
/// Destroy calls on unknown handles are ignored. Command recording calls take
/// `&self`; a command buffer is only ever recorded from one thread at a time.
pub trait GpuContext: Send + Sync + 'static {
    /// Get the context name.
    fn name(&self) -> &'static str;

    // Buffers
    fn create_buffer(&self, descriptor: &RawBufferDescriptor<'_>) -> GraphicsResult<RawBuffer>;
    fn destroy_buffer(&self, buffer: RawBuffer);
    /// Write through the host mapping of a mappable buffer.
    fn write_mapped(&self, buffer: RawBuffer, offset: u64, data: &[u8]) -> GraphicsResult<()>;
    /// Read through the host mapping of a mappable buffer.
    fn read_mapped(&self, buffer: RawBuffer, offset: u64, size: u64) -> GraphicsResult<Vec<u8>>;
    /// Make host writes in `[offset, offset + size)` visible to the device.
    fn flush_mapped(&self, buffer: RawBuffer, offset: u64, size: u64) -> GraphicsResult<()>;
    /// Device address, if the buffer was created with `DEVICE_ADDRESS` usage.
    fn buffer_device_address(&self, buffer: RawBuffer) -> Option<u64>;

    // Images
    fn create_image(&self, descriptor: &ImageDescriptor) -> GraphicsResult<RawImage>;
    fn destroy_image(&self, image: RawImage);

    // Command buffers
    fn allocate_command_buffer(&self) -> GraphicsResult<RawCommandBuffer>;
    fn free_command_buffer(&self, command_buffer: RawCommandBuffer);
    /// Reset the command buffer and start recording.
    fn begin_command_buffer(&self, command_buffer: RawCommandBuffer) -> GraphicsResult<()>;
    fn end_command_buffer(&self, command_buffer: RawCommandBuffer) -> GraphicsResult<()>;
    fn cmd_copy_buffer(
        &self,
        command_buffer: RawCommandBuffer,
        src: RawBuffer,
        dst: RawBuffer,
        regions: &[BufferCopy],
    );
    fn cmd_copy_buffer_to_image(
        &self,
        command_buffer: RawCommandBuffer,
        src: RawBuffer,
        dst: RawImage,
        region: &BufferImageCopy,
    );
    fn cmd_copy_image_to_buffer(
        &self,
        command_buffer: RawCommandBuffer,
        src: RawImage,
        dst: RawBuffer,
        region: &BufferImageCopy,
    );
    fn cmd_pipeline_barrier(&self, command_buffer: RawCommandBuffer, batch: &BarrierBatch);

    // Timelines
    fn create_timeline_semaphore(&self, initial_value: u64) -> GraphicsResult<RawSemaphore>;
    /// Last value the GPU has signaled.
    fn timeline_value(&self, semaphore: RawSemaphore) -> GraphicsResult<u64>;
    /// Block until the timeline reaches `value`.
    ///
    /// Fails with [`GraphicsError::DeviceLost`](crate::GraphicsError::DeviceLost)
    /// when the value can never be reached.
    fn wait_timeline(
        &self,
        semaphore: RawSemaphore,
        value: u64,
        timeout: Option<Duration>,
    ) -> GraphicsResult<WaitStatus>;

    // Binary semaphores and fences
    fn create_semaphore(&self) -> GraphicsResult<RawSemaphore>;
    fn destroy_semaphore(&self, semaphore: RawSemaphore);
    fn create_fence(&self, signaled: bool) -> GraphicsResult<RawFence>;
    fn fence_signaled(&self, fence: RawFence) -> GraphicsResult<bool>;
    fn reset_fence(&self, fence: RawFence) -> GraphicsResult<()>;
    fn destroy_fence(&self, fence: RawFence);

    // Queue
    fn submit(&self, submission: &QueueSubmission<'_>) -> GraphicsResult<()>;
    /// Block until every submission made so far has completed.
    fn wait_idle(&self) -> GraphicsResult<()>;

    // Presentation
    fn surface_capabilities(&self, surface: RawSurface) -> GraphicsResult<SurfaceCapabilities>;
    /// Destroy a surface. Its swapchains must already be destroyed.
    fn destroy_surface(&self, surface: RawSurface);
    fn create_swapchain(&self, descriptor: &SwapchainDescriptor)
    -> GraphicsResult<SwapchainImages>;
    fn destroy_swapchain(&self, swapchain: RawSwapchain);
    /// Acquire the next image, signaling `signal` when it is ready for rendering.
    fn acquire_next_image(
        &self,
        swapchain: RawSwapchain,
        signal: RawSemaphore,
    ) -> GraphicsResult<AcquireOutcome>;
    fn present(&self, request: &PresentRequest) -> GraphicsResult<PresentOutcome>;
}
