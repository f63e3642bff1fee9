//! Presentation surface management.
//!
//! # Overview
//!
//! - [`PresentationSurface`] - Drives the acquire → render → present → recycle loop
//! - [`SurfaceConfiguration`] - Preferred format, size, present mode and image count
//! - [`FrameResources`] - The image and semaphores of one acquired frame
//! - [`PresentMode`] - Controls vsync behavior
//!
//! # Example
//!
//! ```ignore
//! let mut surface = device.create_surface(raw_surface, SurfaceConfiguration::new(1280, 720))?;
//!
//! // In render loop:
//! let frame = surface.prepare_for_render()?;
//! let cmd = ring.next_slot()?;
//! cmd.begin()?;
//! surface
//!     .image_mut(&frame)?
//!     .transition_layout(cmd, &full, ImageLayout::ColorAttachment)?;
//! // ... render ...
//! surface
//!     .image_mut(&frame)?
//!     .transition_layout(cmd, &full, ImageLayout::PresentSrc)?;
//! cmd.end()?;
//! frame.attach_to(cmd);
//! cmd.submit()?;
//! surface.finish_render(frame)?;
//! ```

use std::sync::Arc;

use crate::backend::{
    AcquireOutcome, GpuContext, PresentOutcome, PresentRequest, RawSemaphore, RawSurface,
    RawSwapchain, SurfaceCapabilities, SwapchainDescriptor,
};
use crate::command::CommandBufferResource;
use crate::error::{GraphicsError, GraphicsResult};
use crate::recycle::{OwnedSwapchain, RecycleQueue};
use crate::resources::ImageResource;
use crate::sync::{FencePool, SemaphorePool};
use crate::types::{Extent3d, ImageDescriptor, PipelineStages, TextureFormat, TextureUsage};
use crate::{frame_mark, profile_function};

/// Presentation mode for the swapchain.
///
/// Controls how frames are synchronized with the display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PresentMode {
    /// No synchronization. May cause tearing but has lowest latency.
    Immediate,
    /// Triple buffering. Low latency without tearing.
    Mailbox,
    /// VSync enabled. No tearing, but may have higher latency.
    #[default]
    Fifo,
    /// VSync with relaxed timing. May tear if a frame is late.
    FifoRelaxed,
}

/// Configuration for a surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceConfiguration {
    /// Preferred texture format. Falls back to the surface's first format.
    pub format: TextureFormat,
    /// Width in pixels, used when the surface lets the swapchain decide.
    pub width: u32,
    /// Height in pixels, used when the surface lets the swapchain decide.
    pub height: u32,
    /// Preferred presentation mode. Falls back to FIFO.
    pub present_mode: PresentMode,
    /// Requested image count. Defaults to one more than the surface minimum.
    pub image_count: Option<u32>,
}

impl SurfaceConfiguration {
    /// Create a new surface configuration.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            format: TextureFormat::Bgra8UnormSrgb,
            width,
            height,
            present_mode: PresentMode::default(),
            image_count: None,
        }
    }

    /// Set the texture format.
    pub fn with_format(mut self, format: TextureFormat) -> Self {
        self.format = format;
        self
    }

    /// Set the present mode.
    pub fn with_present_mode(mut self, present_mode: PresentMode) -> Self {
        self.present_mode = present_mode;
        self
    }

    /// Set the requested image count.
    pub fn with_image_count(mut self, image_count: u32) -> Self {
        self.image_count = Some(image_count);
        self
    }
}

/// Lifecycle state of a [`PresentationSurface`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceState {
    /// No swapchain yet.
    Uninitialized,
    /// The swapchain matches the surface.
    Ready,
    /// The swapchain must be recreated before the next acquire.
    Invalid,
}

/// The image and synchronization of one acquired frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameResources {
    /// Index of the acquired swapchain image.
    pub image_index: u32,
    /// Swapchain the image belongs to.
    pub swapchain: RawSwapchain,
    /// Signaled when the image is ready to be rendered into.
    pub image_available: RawSemaphore,
    /// Signaled by the render submission; presentation waits on it.
    pub present_ready: RawSemaphore,
}

impl FrameResources {
    /// Make `cmd` wait for the image and signal presentation readiness.
    pub fn attach_to(&self, cmd: &mut CommandBufferResource) {
        cmd.add_wait_semaphore(self.image_available, PipelineStages::COLOR_ATTACHMENT_OUTPUT);
        cmd.add_signal_semaphore(self.present_ready);
    }
}

struct Swapchain {
    // Images are declared first so they drop before the swapchain owning them.
    images: Vec<ImageResource>,
    owned: OwnedSwapchain,
    extent: Extent3d,
    format: TextureFormat,
}

/// A window surface and its swapchain.
///
/// Objects the presentation engine may still use are never destroyed
/// directly; they go through a [`RecycleQueue`] guarded by present fences.
pub struct PresentationSurface {
    context: Arc<dyn GpuContext>,
    surface: RawSurface,
    config: SurfaceConfiguration,
    state: SurfaceState,
    swapchain: Option<Swapchain>,
    acquired: Option<FrameResources>,
    semaphores: SemaphorePool,
    fences: FencePool,
    recycle: RecycleQueue,
    max_acquire_retries: u32,
    recreate_count: u32,
}

impl PresentationSurface {
    /// Take ownership of a native surface. The swapchain is created lazily.
    pub fn new(
        context: Arc<dyn GpuContext>,
        surface: RawSurface,
        config: SurfaceConfiguration,
        max_acquire_retries: u32,
    ) -> Self {
        Self {
            semaphores: SemaphorePool::new(context.clone()),
            fences: FencePool::new(context.clone()),
            context,
            surface,
            config,
            state: SurfaceState::Uninitialized,
            swapchain: None,
            acquired: None,
            recycle: RecycleQueue::new(),
            max_acquire_retries,
            recreate_count: 0,
        }
    }

    pub fn state(&self) -> SurfaceState {
        self.state
    }

    pub fn config(&self) -> &SurfaceConfiguration {
        &self.config
    }

    /// The native surface.
    pub fn raw(&self) -> RawSurface {
        self.surface
    }

    /// Number of swapchains created so far.
    pub fn recreate_count(&self) -> u32 {
        self.recreate_count
    }

    /// Extent of the current swapchain.
    pub fn extent(&self) -> Option<Extent3d> {
        self.swapchain.as_ref().map(|swapchain| swapchain.extent)
    }

    /// Format of the current swapchain.
    pub fn format(&self) -> Option<TextureFormat> {
        self.swapchain.as_ref().map(|swapchain| swapchain.format)
    }

    /// Number of images in the current swapchain.
    pub fn image_count(&self) -> usize {
        self.swapchain.as_ref().map_or(0, |swapchain| swapchain.images.len())
    }

    /// The recycle queue, for inspection.
    pub fn recycle_queue(&self) -> &RecycleQueue {
        &self.recycle
    }

    pub fn semaphore_pool(&self) -> &SemaphorePool {
        &self.semaphores
    }

    pub fn fence_pool(&self) -> &FencePool {
        &self.fences
    }

    /// Change the configuration. The swapchain is recreated on the next prepare.
    pub fn reconfigure(&mut self, config: SurfaceConfiguration) {
        self.config = config;
        if self.state == SurfaceState::Ready {
            self.state = SurfaceState::Invalid;
        }
    }

    /// Acquire the next image, recreating the swapchain if needed.
    ///
    /// An "out of date" acquire recreates the swapchain and retries, at most
    /// `max_acquire_retries` times.
    pub fn prepare_for_render(&mut self) -> GraphicsResult<FrameResources> {
        profile_function!();

        if let Some(frame) = &self.acquired {
            return Err(GraphicsError::InvalidState(format!(
                "image {} acquired but never presented",
                frame.image_index
            )));
        }

        self.try_recycle()?;

        let attempts = self.max_acquire_retries + 1;
        for attempt in 1..=attempts {
            if self.state != SurfaceState::Ready {
                self.recreate()?;
            }
            let swapchain = self
                .swapchain
                .as_ref()
                .map(|swapchain| swapchain.owned.raw())
                .ok_or_else(|| {
                    GraphicsError::Internal("ready surface without a swapchain".to_string())
                })?;

            let image_available = self.semaphores.acquire()?;
            let outcome = match self.context.acquire_next_image(swapchain, image_available) {
                Ok(outcome) => outcome,
                Err(err) => {
                    self.semaphores.release(image_available)?;
                    return Err(err);
                }
            };

            match outcome {
                AcquireOutcome::Acquired { index, suboptimal } => {
                    if suboptimal {
                        log::warn!("Swapchain {:?} is suboptimal, using it for this frame", swapchain);
                    }
                    let present_ready = self.semaphores.acquire()?;
                    let frame = FrameResources {
                        image_index: index,
                        swapchain,
                        image_available,
                        present_ready,
                    };
                    self.acquired = Some(frame.clone());
                    return Ok(frame);
                }
                AcquireOutcome::OutOfDate => {
                    log::warn!(
                        "Swapchain {:?} out of date on acquire (attempt {}/{})",
                        swapchain,
                        attempt,
                        attempts
                    );
                    self.recycle.retire_semaphore(image_available);
                    self.state = SurfaceState::Invalid;
                }
            }
        }

        Err(GraphicsError::SurfaceOutOfDate { attempts })
    }

    /// The swapchain image of an acquired frame.
    pub fn image_mut(&mut self, frame: &FrameResources) -> GraphicsResult<&mut ImageResource> {
        let swapchain = self
            .swapchain
            .as_mut()
            .filter(|swapchain| swapchain.owned.raw() == frame.swapchain)
            .ok_or_else(|| {
                GraphicsError::InvalidState(format!(
                    "frame belongs to retired swapchain {:?}",
                    frame.swapchain
                ))
            })?;
        swapchain
            .images
            .get_mut(frame.image_index as usize)
            .ok_or_else(|| {
                GraphicsError::InvalidParameter(format!(
                    "image index {} out of range",
                    frame.image_index
                ))
            })
    }

    /// Present the acquired frame and recycle whatever has completed.
    ///
    /// An "out of date" or suboptimal present is not an error; the swapchain is
    /// recreated by the next [`prepare_for_render`](Self::prepare_for_render).
    /// A failed present also leaves the surface `Invalid`; its semaphores stay
    /// in the open batch until a later present seals it.
    pub fn finish_render(&mut self, frame: FrameResources) -> GraphicsResult<()> {
        profile_function!();

        if self.acquired.as_ref() != Some(&frame) {
            return Err(GraphicsError::InvalidState(
                "frame was not acquired from this surface".to_string(),
            ));
        }
        self.acquired = None;

        let fence = self.fences.acquire()?;
        let outcome = self.context.present(&PresentRequest {
            swapchain: frame.swapchain,
            image_index: frame.image_index,
            wait: frame.present_ready,
            fence,
        });

        self.recycle.retire_semaphore(frame.image_available);

        // A failed present never queued the fence, so it cannot seal a batch.
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(err) => {
                log::error!("Present on {:?} failed: {}", frame.swapchain, err);
                self.recycle.discard_semaphore(frame.present_ready);
                self.state = SurfaceState::Invalid;
                if let Err(release_err) = self.fences.release(fence) {
                    log::warn!("Failed to return present fence {:?}: {}", fence, release_err);
                }
                return Err(err);
            }
        };
        self.recycle.retire_semaphore(frame.present_ready);
        self.recycle.seal(fence);

        match outcome {
            PresentOutcome::Presented => {}
            PresentOutcome::Suboptimal => {
                log::warn!("Swapchain {:?} suboptimal on present", frame.swapchain);
                self.state = SurfaceState::Invalid;
            }
            PresentOutcome::OutOfDate => {
                log::warn!("Swapchain {:?} out of date on present", frame.swapchain);
                self.state = SurfaceState::Invalid;
            }
        }

        frame_mark!();
        self.try_recycle()?;
        Ok(())
    }

    /// Release every recycle batch whose present fence has signaled.
    pub fn try_recycle(&mut self) -> GraphicsResult<usize> {
        self.recycle
            .try_recycle(self.context.as_ref(), &mut self.fences, &mut self.semaphores)
    }

    fn recreate(&mut self) -> GraphicsResult<()> {
        profile_function!();

        let capabilities = self.context.surface_capabilities(self.surface)?;
        let extent = choose_extent(&capabilities, &self.config);
        if extent.is_empty() {
            self.state = SurfaceState::Invalid;
            return Err(GraphicsError::SurfaceMinimized);
        }

        let format = if capabilities.formats.contains(&self.config.format) {
            self.config.format
        } else {
            *capabilities.formats.first().ok_or_else(|| {
                GraphicsError::InitializationFailed("surface reports no formats".to_string())
            })?
        };
        let present_mode = if capabilities.present_modes.contains(&self.config.present_mode) {
            self.config.present_mode
        } else {
            PresentMode::Fifo
        };
        let image_count = choose_image_count(&capabilities, self.config.image_count);

        let old = self.swapchain.take();
        let created = self.context.create_swapchain(&SwapchainDescriptor {
            surface: self.surface,
            format,
            present_mode,
            extent,
            image_count,
            old_swapchain: old.as_ref().map(|swapchain| swapchain.owned.raw()),
        });

        // The old swapchain is retired whether or not creation succeeded.
        if let Some(old) = old {
            for image in old.images {
                self.recycle.retire_image(image);
            }
            self.recycle.retire_swapchain(old.owned);
        }

        let created = match created {
            Ok(created) => created,
            Err(err) => {
                self.state = SurfaceState::Invalid;
                return Err(err);
            }
        };

        let descriptor = ImageDescriptor::new_2d(
            extent.width,
            extent.height,
            format,
            TextureUsage::RENDER_ATTACHMENT | TextureUsage::COPY_SRC | TextureUsage::COPY_DST,
        );
        let images = created
            .images
            .iter()
            .enumerate()
            .map(|(i, &raw)| {
                ImageResource::from_swapchain(
                    self.context.clone(),
                    raw,
                    descriptor.clone().with_label(format!("swapchain image {i}")),
                )
            })
            .collect::<Vec<_>>();

        log::info!(
            "Created swapchain {:?}: {}x{}, {:?}, {:?}, {} images",
            created.swapchain,
            extent.width,
            extent.height,
            format,
            present_mode,
            images.len()
        );

        self.swapchain = Some(Swapchain {
            images,
            owned: OwnedSwapchain::new(self.context.clone(), created.swapchain),
            extent,
            format,
        });
        self.state = SurfaceState::Ready;
        self.recreate_count += 1;
        Ok(())
    }
}

fn choose_extent(capabilities: &SurfaceCapabilities, config: &SurfaceConfiguration) -> Extent3d {
    match capabilities.current_extent {
        Some(extent) => extent,
        None => Extent3d::new_2d(
            config.width.clamp(
                capabilities.min_extent.width,
                capabilities.max_extent.width,
            ),
            config.height.clamp(
                capabilities.min_extent.height,
                capabilities.max_extent.height,
            ),
        ),
    }
}

fn choose_image_count(capabilities: &SurfaceCapabilities, requested: Option<u32>) -> u32 {
    let max = if capabilities.max_image_count > 0 {
        capabilities.max_image_count
    } else {
        u32::MAX
    };
    requested
        .unwrap_or(capabilities.min_image_count + 1)
        .clamp(capabilities.min_image_count, max.max(capabilities.min_image_count))
}

impl Drop for PresentationSurface {
    fn drop(&mut self) {
        if let Err(err) = self.context.wait_idle() {
            log::error!("Surface {:?} dropped without idle device: {}", self.surface, err);
        }
        if let Some(frame) = self.acquired.take() {
            self.recycle.retire_semaphore(frame.image_available);
            self.recycle.retire_semaphore(frame.present_ready);
        }
        if let Err(err) = self.recycle.drain(&mut self.fences, &mut self.semaphores) {
            log::error!("Failed to drain recycle queue of {:?}: {}", self.surface, err);
        }
        self.swapchain = None;
        self.context.destroy_surface(self.surface);
    }
}

impl std::fmt::Debug for PresentationSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PresentationSurface")
            .field("surface", &self.surface)
            .field("state", &self.state)
            .field("extent", &self.extent())
            .field("recreate_count", &self.recreate_count)
            .field("pending_batches", &self.recycle.pending_batches())
            .finish()
    }
}

static_assertions::assert_impl_all!(PresentationSurface: Send, Sync);
