//! Deferred destruction of presentation objects.
//!
//! Semaphores, swapchain images and old swapchains used by a present can only
//! be released once the presentation engine is done with them. They collect in
//! an open [`RecycleBatch`]; each present seals the open batch with its fence
//! and queues it. [`RecycleQueue::try_recycle`] releases batches in FIFO order
//! while their fences report signaled.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::backend::{GpuContext, RawFence, RawSemaphore, RawSwapchain};
use crate::error::GraphicsResult;
use crate::resources::ImageResource;
use crate::sync::{FencePool, SemaphorePool};

/// A swapchain destroyed on drop.
pub struct OwnedSwapchain {
    context: Arc<dyn GpuContext>,
    raw: RawSwapchain,
}

impl OwnedSwapchain {
    pub fn new(context: Arc<dyn GpuContext>, raw: RawSwapchain) -> Self {
        Self { context, raw }
    }

    pub fn raw(&self) -> RawSwapchain {
        self.raw
    }
}

impl Drop for OwnedSwapchain {
    fn drop(&mut self) {
        log::trace!("Destroying swapchain {:?}", self.raw);
        self.context.destroy_swapchain(self.raw);
    }
}

impl std::fmt::Debug for OwnedSwapchain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("OwnedSwapchain").field(&self.raw).finish()
    }
}

/// Objects retired together, released once `fence` signals.
#[derive(Debug, Default)]
pub struct RecycleBatch {
    fence: Option<RawFence>,
    semaphores: Vec<RawSemaphore>,
    // Possibly left signaled; destroyed instead of pooled.
    discarded: Vec<RawSemaphore>,
    images: Vec<ImageResource>,
    swapchains: Vec<OwnedSwapchain>,
}

impl RecycleBatch {
    /// The fence guarding this batch, once sealed.
    pub fn fence(&self) -> Option<RawFence> {
        self.fence
    }

    pub fn is_empty(&self) -> bool {
        self.semaphores.is_empty()
            && self.discarded.is_empty()
            && self.images.is_empty()
            && self.swapchains.is_empty()
    }

    /// Number of retired objects, not counting the fence.
    pub fn len(&self) -> usize {
        self.semaphores.len() + self.discarded.len() + self.images.len() + self.swapchains.len()
    }

    /// Return primitives to their pools and destroy everything else.
    fn release(
        self,
        fences: &mut FencePool,
        semaphores: &mut SemaphorePool,
    ) -> GraphicsResult<()> {
        let Self {
            fence,
            semaphores: retired,
            discarded,
            images,
            swapchains,
        } = self;

        // Swapchain images go before their swapchains.
        drop(images);
        drop(swapchains);

        for semaphore in discarded {
            semaphores.discard(semaphore);
        }
        for semaphore in retired {
            semaphores.release(semaphore)?;
        }
        if let Some(fence) = fence {
            fences.release(fence)?;
        }
        Ok(())
    }
}

/// FIFO of sealed batches plus the batch currently being filled.
#[derive(Debug, Default)]
pub struct RecycleQueue {
    open: RecycleBatch,
    sealed: VecDeque<RecycleBatch>,
}

impl RecycleQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn retire_semaphore(&mut self, semaphore: RawSemaphore) {
        self.open.semaphores.push(semaphore);
    }

    /// Retire a semaphore whose signal may never have been waited on.
    pub fn discard_semaphore(&mut self, semaphore: RawSemaphore) {
        self.open.discarded.push(semaphore);
    }

    pub fn retire_image(&mut self, image: ImageResource) {
        self.open.images.push(image);
    }

    pub fn retire_swapchain(&mut self, swapchain: OwnedSwapchain) {
        self.open.swapchains.push(swapchain);
    }

    /// Close the open batch under `fence` and queue it.
    pub fn seal(&mut self, fence: RawFence) {
        let mut batch = std::mem::take(&mut self.open);
        batch.fence = Some(fence);
        self.sealed.push_back(batch);
    }

    /// Number of sealed batches not yet released.
    pub fn pending_batches(&self) -> usize {
        self.sealed.len()
    }

    /// Objects waiting for the next seal.
    pub fn open_batch(&self) -> &RecycleBatch {
        &self.open
    }

    /// Release sealed batches from the front while their fences are signaled.
    ///
    /// Returns the number of batches released.
    pub fn try_recycle(
        &mut self,
        context: &dyn GpuContext,
        fences: &mut FencePool,
        semaphores: &mut SemaphorePool,
    ) -> GraphicsResult<usize> {
        let mut released = 0;
        while let Some(front) = self.sealed.front() {
            let signaled = match front.fence {
                Some(fence) => context.fence_signaled(fence)?,
                None => true,
            };
            if !signaled {
                break;
            }
            if let Some(batch) = self.sealed.pop_front() {
                batch.release(fences, semaphores)?;
                released += 1;
            }
        }
        if released > 0 {
            log::debug!(
                "Recycled {} batches, {} still pending",
                released,
                self.sealed.len()
            );
        }
        Ok(released)
    }

    /// Release every batch, open or sealed, without checking fences.
    ///
    /// Only valid once the device is idle.
    pub fn drain(
        &mut self,
        fences: &mut FencePool,
        semaphores: &mut SemaphorePool,
    ) -> GraphicsResult<()> {
        let open = std::mem::take(&mut self.open);
        for batch in self.sealed.drain(..).chain(std::iter::once(open)) {
            batch.release(fences, semaphores)?;
        }
        Ok(())
    }
}
