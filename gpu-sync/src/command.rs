//! Command recording and submission.
//!
//! A [`CommandBufferResource`] is one recordable unit of GPU work. Besides the
//! backend command buffer it owns a [`TimelineCounter`] and a list of retained
//! resources: anything handed to [`acquire_resource`](CommandBufferResource::acquire_resource)
//! stays alive until the next [`prepare_for_recording`](CommandBufferResource::prepare_for_recording)
//! on the same slot proves the GPU has finished the submission that used it.
//!
//! ```text
//!            begin()             end()              submit()
//!   Idle ───────────► Recording ───────► Executable ─────────► Submitted
//!    ▲                                                             │
//!    └─────────────── prepare_for_recording() (waits) ◄────────────┘
//! ```
//!
//! A [`CommandRing`] cycles N slots so up to N submissions are in flight;
//! reusing a slot blocks only on that slot's own previous submission.

use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use crate::backend::{
    BufferCopy, BufferImageCopy, GpuContext, QueueSubmission, RawBuffer, RawCommandBuffer,
    RawImage, RawSemaphore, SemaphoreSignal, SemaphoreWait,
};
use crate::barriers::BarrierBatch;
use crate::error::{GraphicsError, GraphicsResult};
use crate::resources::{DeviceBuffer, ImageResource};
use crate::sync::{SubmissionPoint, TimelineCounter};
use crate::types::PipelineStages;
use crate::{profile_function, profile_scope};

/// Lifecycle state of a [`CommandBufferResource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandState {
    /// Ready to begin recording.
    Idle,
    /// Between `begin` and `end`.
    Recording,
    /// Recorded and ready to submit.
    Executable,
    /// Handed to the queue; may still be executing.
    Submitted,
}

/// A resource kept alive by a submission.
#[derive(Debug)]
pub enum RetainedResource {
    Buffer(DeviceBuffer),
    Image(ImageResource),
}

impl From<DeviceBuffer> for RetainedResource {
    fn from(buffer: DeviceBuffer) -> Self {
        Self::Buffer(buffer)
    }
}

impl From<ImageResource> for RetainedResource {
    fn from(image: ImageResource) -> Self {
        Self::Image(image)
    }
}

/// One recordable unit of GPU work.
pub struct CommandBufferResource {
    context: Arc<dyn GpuContext>,
    raw: RawCommandBuffer,
    counter: TimelineCounter,
    state: CommandState,
    retained: Vec<RetainedResource>,
    waits: Vec<SemaphoreWait>,
    signals: Vec<SemaphoreSignal>,
    barriers_recorded: usize,
    label: Option<String>,
}

impl CommandBufferResource {
    /// Allocate a command buffer and its timeline counter.
    ///
    /// `timeout` bounds the wait in [`prepare_for_recording`](Self::prepare_for_recording).
    pub fn new(
        context: Arc<dyn GpuContext>,
        label: Option<&str>,
        timeout: Option<Duration>,
    ) -> GraphicsResult<Self> {
        let counter = TimelineCounter::new(context.clone(), timeout)?;
        let raw = context.allocate_command_buffer()?;
        log::trace!("Allocated command buffer {:?} ({:?})", raw, label);

        Ok(Self {
            context,
            raw,
            counter,
            state: CommandState::Idle,
            retained: Vec::new(),
            waits: Vec::new(),
            signals: Vec::new(),
            barriers_recorded: 0,
            label: label.map(str::to_owned),
        })
    }

    /// The backend command buffer.
    pub fn raw(&self) -> RawCommandBuffer {
        self.raw
    }

    /// Current lifecycle state.
    pub fn state(&self) -> CommandState {
        self.state
    }

    /// The completion counter of this slot.
    pub fn counter(&self) -> &TimelineCounter {
        &self.counter
    }

    /// Debug label.
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// The point the next [`submit`](Self::submit) will signal.
    ///
    /// Resources touched by commands recorded now are busy until this point.
    pub fn pending_point(&self) -> SubmissionPoint {
        self.counter.next_point()
    }

    /// Number of resources currently kept alive by this command buffer.
    pub fn retained_count(&self) -> usize {
        self.retained.len()
    }

    /// Number of barriers recorded since the last `prepare_for_recording`.
    pub fn barriers_recorded(&self) -> usize {
        self.barriers_recorded
    }

    /// Wait for this slot's previous submission, then release everything it retained.
    ///
    /// This is the only blocking call in steady-state operation, and it blocks
    /// only on this slot's own work.
    pub fn prepare_for_recording(&mut self) -> GraphicsResult<()> {
        profile_function!();

        self.counter.wait_for_target()?;

        if !self.retained.is_empty() {
            log::trace!(
                "Command buffer {:?} releasing {} retained resources",
                self.raw,
                self.retained.len()
            );
        }
        self.retained.clear();
        self.waits.clear();
        self.signals.clear();
        self.barriers_recorded = 0;
        self.state = CommandState::Idle;
        Ok(())
    }

    /// Start recording.
    pub fn begin(&mut self) -> GraphicsResult<()> {
        if self.state != CommandState::Idle {
            return Err(GraphicsError::InvalidState(format!(
                "begin on command buffer {:?} in state {:?}; call prepare_for_recording first",
                self.raw, self.state
            )));
        }
        self.context.begin_command_buffer(self.raw)?;
        self.state = CommandState::Recording;
        Ok(())
    }

    /// Finish recording.
    pub fn end(&mut self) -> GraphicsResult<()> {
        self.ensure_recording("end")?;
        self.context.end_command_buffer(self.raw)?;
        self.state = CommandState::Executable;
        Ok(())
    }

    /// Keep `resource` alive until this submission completes.
    pub fn acquire_resource(&mut self, resource: impl Into<RetainedResource>) {
        self.retained.push(resource.into());
    }

    /// Wait on a binary semaphore before executing `stages`.
    pub fn add_wait_semaphore(&mut self, semaphore: RawSemaphore, stages: PipelineStages) {
        self.waits.push(SemaphoreWait {
            semaphore,
            value: None,
            stages,
        });
    }

    /// Wait for another submission before executing `stages`.
    ///
    /// Points whose timeline is already gone are complete and add no wait.
    pub fn add_wait_timeline(&mut self, point: &SubmissionPoint, stages: PipelineStages) {
        if let Some(semaphore) = point.semaphore() {
            self.waits.push(SemaphoreWait {
                semaphore,
                value: Some(point.value()),
                stages,
            });
        }
    }

    /// Signal a binary semaphore when this submission completes.
    pub fn add_signal_semaphore(&mut self, semaphore: RawSemaphore) {
        self.signals.push(SemaphoreSignal {
            semaphore,
            value: None,
        });
    }

    /// Record a pipeline barrier. Empty batches record nothing.
    pub fn pipeline_barrier(&mut self, batch: &BarrierBatch) -> GraphicsResult<()> {
        self.ensure_recording("pipeline_barrier")?;
        if batch.is_empty() {
            return Ok(());
        }
        self.context.cmd_pipeline_barrier(self.raw, batch);
        self.barriers_recorded += batch.len();
        Ok(())
    }

    /// Record a buffer-to-buffer copy.
    pub fn copy_buffer(
        &mut self,
        src: RawBuffer,
        dst: RawBuffer,
        regions: &[BufferCopy],
    ) -> GraphicsResult<()> {
        self.ensure_recording("copy_buffer")?;
        self.context.cmd_copy_buffer(self.raw, src, dst, regions);
        Ok(())
    }

    /// Record a copy of one contiguous byte range between buffers.
    pub fn copy_buffer_range(
        &mut self,
        src: RawBuffer,
        src_offset: u64,
        dst: RawBuffer,
        dst_range: Range<u64>,
    ) -> GraphicsResult<()> {
        self.copy_buffer(
            src,
            dst,
            &[BufferCopy {
                src_offset,
                dst_offset: dst_range.start,
                size: dst_range.end - dst_range.start,
            }],
        )
    }

    /// Record a copy from a buffer into one mip level of an image.
    pub fn copy_buffer_to_image(
        &mut self,
        src: RawBuffer,
        dst: RawImage,
        region: &BufferImageCopy,
    ) -> GraphicsResult<()> {
        self.ensure_recording("copy_buffer_to_image")?;
        self.context.cmd_copy_buffer_to_image(self.raw, src, dst, region);
        Ok(())
    }

    /// Record a copy from one mip level of an image into a buffer.
    pub fn copy_image_to_buffer(
        &mut self,
        src: RawImage,
        dst: RawBuffer,
        region: &BufferImageCopy,
    ) -> GraphicsResult<()> {
        self.ensure_recording("copy_image_to_buffer")?;
        self.context.cmd_copy_image_to_buffer(self.raw, src, dst, region);
        Ok(())
    }

    /// Mark a buffer as used by the work being recorded.
    pub fn track_buffer(&self, buffer: &mut DeviceBuffer) {
        buffer.mark_used(self.pending_point());
    }

    /// Mark an image as used by the work being recorded.
    pub fn track_image(&self, image: &mut ImageResource) {
        image.mark_used(self.pending_point());
    }

    /// Hand the recorded work to the queue.
    ///
    /// Advances the timeline target and signals it on completion. Returns the
    /// point that proves completion.
    pub fn submit(&mut self) -> GraphicsResult<SubmissionPoint> {
        profile_function!();

        if self.state != CommandState::Executable {
            return Err(GraphicsError::InvalidState(format!(
                "submit of command buffer {:?} in state {:?}",
                self.raw, self.state
            )));
        }

        let point = self.counter.next_point();
        self.signals.push(SemaphoreSignal {
            semaphore: self.counter.semaphore(),
            value: Some(point.value()),
        });

        {
            profile_scope!("queue_submit");
            self.context.submit(&QueueSubmission {
                command_buffers: &[self.raw],
                waits: &self.waits,
                signals: &self.signals,
                fence: None,
            })?;
        }

        self.counter.advance();
        self.state = CommandState::Submitted;
        log::trace!(
            "Submitted command buffer {:?} (timeline target {}, {} retained)",
            self.raw,
            point.value(),
            self.retained.len()
        );
        Ok(point)
    }

    /// Block until the last submission has completed.
    pub fn wait(&self) -> GraphicsResult<()> {
        self.counter.wait_for_target()
    }

    fn ensure_recording(&self, operation: &str) -> GraphicsResult<()> {
        if self.state == CommandState::Recording {
            Ok(())
        } else {
            Err(GraphicsError::InvalidState(format!(
                "{operation} on command buffer {:?} in state {:?}",
                self.raw, self.state
            )))
        }
    }
}

impl Drop for CommandBufferResource {
    fn drop(&mut self) {
        if let Err(err) = self.counter.wait_for_target() {
            log::error!(
                "Command buffer {:?} dropped without confirmed completion: {}",
                self.raw,
                err
            );
        }
        self.retained.clear();
        self.context.free_command_buffer(self.raw);
    }
}

impl std::fmt::Debug for CommandBufferResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandBufferResource")
            .field("raw", &self.raw)
            .field("label", &self.label)
            .field("state", &self.state)
            .field("target", &self.counter.target())
            .field("retained", &self.retained.len())
            .finish()
    }
}

/// Round-robin set of command buffer slots.
pub struct CommandRing {
    slots: Vec<CommandBufferResource>,
    current: usize,
    frames: u64,
}

impl CommandRing {
    /// Create a ring of `slot_count` command buffers.
    pub fn new(
        context: Arc<dyn GpuContext>,
        slot_count: usize,
        timeout: Option<Duration>,
    ) -> GraphicsResult<Self> {
        if slot_count == 0 {
            return Err(GraphicsError::InvalidParameter(
                "command ring needs at least one slot".to_string(),
            ));
        }

        let slots = (0..slot_count)
            .map(|i| {
                let label = format!("frame_slot_{i}");
                CommandBufferResource::new(context.clone(), Some(&label), timeout)
            })
            .collect::<GraphicsResult<Vec<_>>>()?;

        Ok(Self {
            slots,
            current: slot_count - 1,
            frames: 0,
        })
    }

    /// Number of slots.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Index of the slot returned by the last [`next_slot`](Self::next_slot).
    pub fn current_index(&self) -> usize {
        self.current
    }

    /// Number of slots handed out so far.
    pub fn frame_count(&self) -> u64 {
        self.frames
    }

    /// Move to the next slot and prepare it for recording.
    ///
    /// Blocks until that slot's previous submission has completed.
    pub fn next_slot(&mut self) -> GraphicsResult<&mut CommandBufferResource> {
        self.current = (self.current + 1) % self.slots.len();
        self.frames += 1;
        let slot = &mut self.slots[self.current];
        slot.prepare_for_recording()?;
        Ok(slot)
    }

    /// The slot returned by the last [`next_slot`](Self::next_slot).
    pub fn current(&mut self) -> &mut CommandBufferResource {
        &mut self.slots[self.current]
    }

    /// Block until every slot's submissions have completed.
    pub fn wait_idle(&self) -> GraphicsResult<()> {
        for slot in &self.slots {
            slot.wait()?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for CommandRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRing")
            .field("slots", &self.slots.len())
            .field("current", &self.current)
            .field("frames", &self.frames)
            .finish()
    }
}

static_assertions::assert_impl_all!(CommandBufferResource: Send, Sync);

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;
    use crate::backend::dummy::{DummyContext, ExecutionMode};
    use crate::types::{BufferUsage, ResidencyPattern};

    fn staging(context: &Arc<DummyContext>, size: u64) -> DeviceBuffer {
        DeviceBuffer::new(
            context.clone(),
            size,
            BufferUsage::COPY_SRC,
            ResidencyPattern::Upload,
            Some("staging"),
        )
        .unwrap()
    }

    fn recorded_submit(cmd: &mut CommandBufferResource) -> SubmissionPoint {
        cmd.begin().unwrap();
        cmd.end().unwrap();
        cmd.submit().unwrap()
    }

    #[test]
    fn test_state_machine() {
        let context = DummyContext::new();
        let mut cmd = CommandBufferResource::new(context, None, None).unwrap();
        assert_eq!(cmd.state(), CommandState::Idle);

        cmd.begin().unwrap();
        assert_eq!(cmd.state(), CommandState::Recording);
        cmd.end().unwrap();
        assert_eq!(cmd.state(), CommandState::Executable);
        cmd.submit().unwrap();
        assert_eq!(cmd.state(), CommandState::Submitted);

        cmd.prepare_for_recording().unwrap();
        assert_eq!(cmd.state(), CommandState::Idle);
    }

    #[test]
    fn test_invalid_transitions() {
        let context = DummyContext::new();
        let mut cmd = CommandBufferResource::new(context, None, None).unwrap();

        assert!(matches!(cmd.end(), Err(GraphicsError::InvalidState(_))));
        assert!(matches!(cmd.submit(), Err(GraphicsError::InvalidState(_))));

        recorded_submit(&mut cmd);
        assert!(matches!(cmd.begin(), Err(GraphicsError::InvalidState(_))));
    }

    #[test]
    fn test_submit_advances_counter() {
        let context = DummyContext::new();
        let mut cmd = CommandBufferResource::new(context, None, None).unwrap();

        let first = recorded_submit(&mut cmd);
        assert_eq!(first.value(), 1);
        cmd.prepare_for_recording().unwrap();
        let second = recorded_submit(&mut cmd);
        assert_eq!(second.value(), 2);
        assert_eq!(cmd.counter().target(), 2);
    }

    #[test]
    fn test_retained_resource_outlives_submission() {
        let context = DummyContext::with_mode(ExecutionMode::Deferred);
        let mut cmd = CommandBufferResource::new(context.clone(), None, None).unwrap();

        let buffer = staging(&context, 64);
        let raw = buffer.raw();

        cmd.begin().unwrap();
        cmd.acquire_resource(buffer);
        cmd.end().unwrap();
        let point = cmd.submit().unwrap();

        // GPU has not finished: the buffer must still exist.
        assert!(!point.is_reached().unwrap());
        assert!(context.is_buffer_alive(raw));
        assert_eq!(cmd.retained_count(), 1);

        cmd.prepare_for_recording().unwrap();
        assert!(point.is_reached().unwrap());
        assert!(!context.is_buffer_alive(raw));
        assert_eq!(cmd.retained_count(), 0);
        assert!(context.validation_errors().is_empty());
    }

    #[test]
    fn test_destroyed_no_earlier_than_retain_target() {
        let context = DummyContext::with_mode(ExecutionMode::Deferred);
        let mut cmd = CommandBufferResource::new(context.clone(), None, None).unwrap();

        for _ in 0..4 {
            cmd.prepare_for_recording().unwrap();
            let src = staging(&context, 16);
            let dst = staging(&context, 16);
            let raw = src.raw();
            let retain_target = cmd.pending_point().value();

            cmd.begin().unwrap();
            cmd.copy_buffer_range(src.raw(), 0, dst.raw(), 0..16).unwrap();
            cmd.acquire_resource(src);
            cmd.acquire_resource(dst);
            cmd.end().unwrap();
            cmd.submit().unwrap();

            assert!(context.is_buffer_alive(raw));
            cmd.prepare_for_recording().unwrap();
            assert!(!context.is_buffer_alive(raw));
            assert!(cmd.counter().completed_value().unwrap() >= retain_target);
        }
        assert!(context.validation_errors().is_empty());
    }

    #[test]
    fn test_drop_waits_before_releasing() {
        let context = DummyContext::with_mode(ExecutionMode::Deferred);
        let buffer = staging(&context, 8);
        let raw = buffer.raw();
        {
            let mut cmd = CommandBufferResource::new(context.clone(), None, None).unwrap();
            cmd.begin().unwrap();
            cmd.acquire_resource(buffer);
            cmd.end().unwrap();
            cmd.submit().unwrap();
        }
        assert!(!context.is_buffer_alive(raw));
        assert_eq!(context.pending_submissions(), 0);
        assert!(context.validation_errors().is_empty());
    }

    #[test]
    fn test_prepare_surfaces_device_loss() {
        let context = DummyContext::with_mode(ExecutionMode::Deferred);
        let mut cmd = CommandBufferResource::new(context.clone(), None, None).unwrap();
        recorded_submit(&mut cmd);

        context.lose_device();
        assert_eq!(cmd.prepare_for_recording(), Err(GraphicsError::DeviceLost));
    }

    #[test]
    fn test_timeline_wait_links_submissions() {
        let context = DummyContext::with_mode(ExecutionMode::Deferred);
        let mut producer = CommandBufferResource::new(context.clone(), None, None).unwrap();
        let mut consumer = CommandBufferResource::new(context.clone(), None, None).unwrap();

        let produced = recorded_submit(&mut producer);
        consumer.add_wait_timeline(&produced, PipelineStages::TRANSFER);
        recorded_submit(&mut consumer);

        consumer.wait().unwrap();
        assert!(produced.is_reached().unwrap());
        assert!(context.validation_errors().is_empty());
    }

    #[test]
    fn test_ring_cycles_slots() {
        let context = DummyContext::new();
        let mut ring = CommandRing::new(context, 3, None).unwrap();
        assert_eq!(ring.slot_count(), 3);

        let mut seen = Vec::new();
        for _ in 0..6 {
            let slot = ring.next_slot().unwrap();
            seen.push(slot.raw());
            recorded_submit(slot);
        }
        assert_eq!(seen[0], seen[3]);
        assert_eq!(seen[1], seen[4]);
        assert_ne!(seen[0], seen[1]);
        assert_eq!(ring.frame_count(), 6);
        ring.wait_idle().unwrap();
    }

    #[test]
    fn test_ring_reuse_blocks_only_on_own_slot() {
        let context = DummyContext::with_mode(ExecutionMode::Deferred);
        let mut ring = CommandRing::new(context.clone(), 2, None).unwrap();

        recorded_submit(ring.next_slot().unwrap());
        recorded_submit(ring.next_slot().unwrap());
        assert_eq!(context.pending_submissions(), 2);

        // Reusing slot 0 executes only slot 0's submission.
        ring.next_slot().unwrap();
        assert_eq!(context.pending_submissions(), 1);
    }

    #[test]
    fn test_empty_ring_rejected() {
        let context = DummyContext::new();
        assert!(matches!(
            CommandRing::new(context, 0, None),
            Err(GraphicsError::InvalidParameter(_))
        ));
    }
}
