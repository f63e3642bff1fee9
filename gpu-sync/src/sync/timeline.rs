//! Timeline counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::backend::{GpuContext, RawSemaphore, WaitStatus};
use crate::error::{GraphicsError, GraphicsResult};

/// Owner of a timeline semaphore object.
struct TimelineSemaphore {
    context: Arc<dyn GpuContext>,
    raw: RawSemaphore,
    // Highest value handed to a submission.
    submitted: AtomicU64,
}

impl Drop for TimelineSemaphore {
    fn drop(&mut self) {
        log::trace!("Destroying timeline {:?}", self.raw);
        self.context.destroy_semaphore(self.raw);
    }
}

/// A point on a timeline: "the work that signals `value`".
///
/// Holds no ownership of the timeline. Buffers and images record their last GPU
/// use this way. A counter is only dropped once its work has completed, so a
/// point whose timeline is gone counts as reached.
#[derive(Clone)]
pub struct SubmissionPoint {
    timeline: Weak<TimelineSemaphore>,
    value: u64,
}

impl SubmissionPoint {
    /// The timeline value this point waits for.
    pub fn value(&self) -> u64 {
        self.value
    }

    /// The timeline semaphore, if it is still alive.
    pub fn semaphore(&self) -> Option<RawSemaphore> {
        self.timeline.upgrade().map(|timeline| timeline.raw)
    }

    /// Check whether the GPU has reached this point, without blocking.
    pub fn is_reached(&self) -> GraphicsResult<bool> {
        match self.timeline.upgrade() {
            Some(timeline) => Ok(timeline.context.timeline_value(timeline.raw)? >= self.value),
            None => Ok(true),
        }
    }

    /// Check whether a submission signaling this point has been handed out.
    ///
    /// A point taken from a command buffer that is still recording is not
    /// submitted; waiting on it from the CPU would never return.
    pub fn is_submitted(&self) -> bool {
        match self.timeline.upgrade() {
            Some(timeline) => timeline.submitted.load(Ordering::Acquire) >= self.value,
            None => true,
        }
    }

    /// Returns true if both points wait for the same value on the same timeline.
    pub fn same_as(&self, other: &SubmissionPoint) -> bool {
        self.value == other.value && Weak::ptr_eq(&self.timeline, &other.timeline)
    }
}

impl std::fmt::Debug for SubmissionPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubmissionPoint")
            .field("semaphore", &self.semaphore())
            .field("value", &self.value)
            .finish()
    }
}

/// A monotonically increasing completion counter backed by a timeline semaphore.
///
/// `target` is the last value handed to a submission; the GPU signals values
/// in order as work completes. Value 0 is reached on creation.
pub struct TimelineCounter {
    timeline: Arc<TimelineSemaphore>,
    target: u64,
    timeout: Option<Duration>,
}

impl TimelineCounter {
    /// Create a counter starting at zero.
    ///
    /// `timeout` bounds every [`wait`](Self::wait); `None` waits forever.
    pub fn new(context: Arc<dyn GpuContext>, timeout: Option<Duration>) -> GraphicsResult<Self> {
        let raw = context.create_timeline_semaphore(0)?;
        log::trace!("Created timeline counter {:?}", raw);
        Ok(Self {
            timeline: Arc::new(TimelineSemaphore {
                context,
                raw,
                submitted: AtomicU64::new(0),
            }),
            target: 0,
            timeout,
        })
    }

    /// The underlying timeline semaphore.
    pub fn semaphore(&self) -> RawSemaphore {
        self.timeline.raw
    }

    /// The last value assigned to a submission.
    pub fn target(&self) -> u64 {
        self.target
    }

    /// Assign the next value and return it.
    pub fn advance(&mut self) -> u64 {
        self.target += 1;
        self.timeline.submitted.store(self.target, Ordering::Release);
        self.target
    }

    /// The point the next submission will signal.
    pub fn next_point(&self) -> SubmissionPoint {
        self.point(self.target + 1)
    }

    /// The point the last submission will signal.
    pub fn current_point(&self) -> SubmissionPoint {
        self.point(self.target)
    }

    fn point(&self, value: u64) -> SubmissionPoint {
        SubmissionPoint {
            timeline: Arc::downgrade(&self.timeline),
            value,
        }
    }

    /// Last value the GPU has signaled.
    pub fn completed_value(&self) -> GraphicsResult<u64> {
        self.timeline.context.timeline_value(self.timeline.raw)
    }

    /// Check whether `value` has been reached, without blocking.
    pub fn is_reached(&self, value: u64) -> GraphicsResult<bool> {
        if value == 0 {
            return Ok(true);
        }
        Ok(self.completed_value()? >= value)
    }

    /// Check whether every assigned value has been reached.
    pub fn is_complete(&self) -> GraphicsResult<bool> {
        self.is_reached(self.target)
    }

    /// Block until `value` is reached.
    ///
    /// With a configured timeout, an elapsed wait fails with
    /// [`GraphicsError::Timeout`]. A value the GPU can never reach fails with
    /// [`GraphicsError::DeviceLost`].
    pub fn wait(&self, value: u64) -> GraphicsResult<()> {
        if value == 0 {
            return Ok(());
        }
        let status = self
            .timeline
            .context
            .wait_timeline(self.timeline.raw, value, self.timeout)?;
        match status {
            WaitStatus::Reached => Ok(()),
            WaitStatus::TimedOut => Err(GraphicsError::Timeout { value }),
        }
    }

    /// Block until `value` is reached or `timeout` elapses.
    ///
    /// Returns true if the value was reached.
    pub fn wait_timeout(&self, value: u64, timeout: Duration) -> GraphicsResult<bool> {
        if value == 0 {
            return Ok(true);
        }
        let status =
            self.timeline
                .context
                .wait_timeline(self.timeline.raw, value, Some(timeout))?;
        Ok(status == WaitStatus::Reached)
    }

    /// Block until every assigned value is reached.
    pub fn wait_for_target(&self) -> GraphicsResult<()> {
        self.wait(self.target)
    }
}

impl std::fmt::Debug for TimelineCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimelineCounter")
            .field("semaphore", &self.timeline.raw)
            .field("target", &self.target)
            .finish()
    }
}
