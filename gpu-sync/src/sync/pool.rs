//! Pools of binary synchronization primitives.
//!
//! Presentation needs a fresh fence and two semaphores every frame. Pools hand
//! back primitives whose last use is proven complete and allocate a new one
//! when empty, so exhaustion never blocks.

use std::sync::Arc;

use crate::backend::{GpuContext, RawFence, RawSemaphore};
use crate::error::GraphicsResult;

/// A primitive that can live in a [`SyncPool`].
pub trait PooledPrimitive: Copy + std::fmt::Debug {
    /// Name used in log messages.
    const KIND: &'static str;

    /// Create a new, unsignaled primitive.
    fn create(context: &dyn GpuContext) -> GraphicsResult<Self>;

    /// Return the primitive to its unsignaled state before reuse.
    fn reset(self, context: &dyn GpuContext) -> GraphicsResult<()>;

    /// Destroy the primitive.
    fn destroy(self, context: &dyn GpuContext);
}

impl PooledPrimitive for RawFence {
    const KIND: &'static str = "fence";

    fn create(context: &dyn GpuContext) -> GraphicsResult<Self> {
        context.create_fence(false)
    }

    fn reset(self, context: &dyn GpuContext) -> GraphicsResult<()> {
        context.reset_fence(self)
    }

    fn destroy(self, context: &dyn GpuContext) {
        context.destroy_fence(self);
    }
}

impl PooledPrimitive for RawSemaphore {
    const KIND: &'static str = "semaphore";

    fn create(context: &dyn GpuContext) -> GraphicsResult<Self> {
        context.create_semaphore()
    }

    // A binary semaphore is unsignaled again once its wait has executed.
    fn reset(self, _context: &dyn GpuContext) -> GraphicsResult<()> {
        Ok(())
    }

    fn destroy(self, context: &dyn GpuContext) {
        context.destroy_semaphore(self);
    }
}

/// LIFO free list of synchronization primitives.
pub struct SyncPool<P: PooledPrimitive> {
    context: Arc<dyn GpuContext>,
    free: Vec<P>,
    created: usize,
}

/// Pool of fences.
pub type FencePool = SyncPool<RawFence>;

/// Pool of binary semaphores.
pub type SemaphorePool = SyncPool<RawSemaphore>;

impl<P: PooledPrimitive> SyncPool<P> {
    /// Create an empty pool.
    pub fn new(context: Arc<dyn GpuContext>) -> Self {
        Self {
            context,
            free: Vec::new(),
            created: 0,
        }
    }

    /// Take a primitive from the pool, creating one if the pool is empty.
    pub fn acquire(&mut self) -> GraphicsResult<P> {
        if let Some(primitive) = self.free.pop() {
            return Ok(primitive);
        }

        let primitive = P::create(self.context.as_ref())?;
        self.created += 1;
        log::debug!(
            "{} pool empty, created {:?} ({} total)",
            P::KIND,
            primitive,
            self.created
        );
        Ok(primitive)
    }

    /// Return a primitive whose last use has completed.
    pub fn release(&mut self, primitive: P) -> GraphicsResult<()> {
        primitive.reset(self.context.as_ref())?;
        self.free.push(primitive);
        Ok(())
    }

    /// Destroy a primitive that cannot be reset for reuse.
    pub fn discard(&mut self, primitive: P) {
        log::debug!("Discarding {} {:?}", P::KIND, primitive);
        primitive.destroy(self.context.as_ref());
    }

    /// Number of primitives ready for reuse.
    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    /// Number of primitives this pool has ever created.
    pub fn created_count(&self) -> usize {
        self.created
    }
}

impl<P: PooledPrimitive> Drop for SyncPool<P> {
    fn drop(&mut self) {
        for primitive in self.free.drain(..) {
            primitive.destroy(self.context.as_ref());
        }
    }
}

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;
    use crate::backend::dummy::DummyContext;
    use crate::backend::{QueueSubmission, SemaphoreSignal};

    #[test]
    fn test_empty_pool_allocates() {
        let context = DummyContext::new();
        let mut pool = FencePool::new(context.clone());

        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        assert_ne!(a, b);
        assert_eq!(pool.created_count(), 2);
        assert_eq!(context.stats().live_fences, 2);
    }

    #[test]
    fn test_released_primitive_is_reused() {
        let context = DummyContext::new();
        let mut pool = SemaphorePool::new(context.clone());

        let semaphore = pool.acquire().unwrap();
        pool.release(semaphore).unwrap();
        assert_eq!(pool.free_count(), 1);

        assert_eq!(pool.acquire().unwrap(), semaphore);
        assert_eq!(pool.created_count(), 1);
    }

    #[test]
    fn test_release_resets_fence() {
        let context = DummyContext::new();
        let mut pool = FencePool::new(context.clone());

        let fence = pool.acquire().unwrap();
        context
            .submit(&QueueSubmission {
                command_buffers: &[],
                waits: &[],
                signals: &[] as &[SemaphoreSignal],
                fence: Some(fence),
            })
            .unwrap();
        assert!(context.fence_signaled(fence).unwrap());

        pool.release(fence).unwrap();
        assert!(!context.fence_signaled(fence).unwrap());
    }

    #[test]
    fn test_discard_destroys_without_reuse() {
        let context = DummyContext::new();
        let mut pool = SemaphorePool::new(context.clone());

        let semaphore = pool.acquire().unwrap();
        pool.discard(semaphore);
        assert_eq!(pool.free_count(), 0);
        assert_eq!(context.stats().live_semaphores, 0);
        assert_ne!(pool.acquire().unwrap(), semaphore);
    }

    #[test]
    fn test_drop_destroys_free_primitives() {
        let context = DummyContext::new();
        {
            let mut pool = SemaphorePool::new(context.clone());
            let a = pool.acquire().unwrap();
            let b = pool.acquire().unwrap();
            pool.release(a).unwrap();
            pool.release(b).unwrap();
            assert_eq!(context.stats().live_semaphores, 2);
        }
        assert_eq!(context.stats().live_semaphores, 0);
    }
}
