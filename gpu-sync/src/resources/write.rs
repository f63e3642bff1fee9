//! Buffer write scheduling.
//!
//! Writes are collected as [`WriteSegment`]s and applied in one
//! [`WriteScheduler::commit`]. At commit time the scheduler picks one of two
//! paths:
//!
//! - **Direct**: the buffer is host mapped and no GPU work still uses it, so
//!   segments are copied straight into the mapping.
//! - **Staged**: segments are packed into a transient upload buffer and copied
//!   on the GPU, bracketed by barriers. The live buffer is never touched from
//!   the CPU while the GPU might read it.
//!
//! Growing the buffer allocates a new one and records a device copy of the old
//! contents ahead of the new segments; the old buffer is retained by the
//! command buffer until that copy has executed.

use std::borrow::Cow;
use std::ops::Range;
use std::sync::Arc;

use crate::backend::GpuContext;
use crate::barriers::BarrierBatch;
use crate::command::CommandBufferResource;
use crate::error::{GraphicsError, GraphicsResult};
use crate::types::{AccessFlags, BufferDescriptor, BufferUsage, PipelineStages, ResidencyPattern};
use crate::{profile_function, profile_scope};

use super::DeviceBuffer;

/// One pending write: bytes and their destination offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteSegment {
    data: Cow<'static, [u8]>,
    offset: u64,
}

impl WriteSegment {
    /// Create a segment writing `data` at `offset`.
    ///
    /// Fails if the destination range does not fit in `u64`.
    pub fn new(data: impl Into<Cow<'static, [u8]>>, offset: u64) -> GraphicsResult<Self> {
        let data = data.into();
        if offset.checked_add(data.len() as u64).is_none() {
            return Err(GraphicsError::InvalidParameter(format!(
                "write of {} bytes at offset {offset} overflows",
                data.len()
            )));
        }
        Ok(Self { data, offset })
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Destination byte range.
    pub fn range(&self) -> Range<u64> {
        self.offset..self.offset + self.len()
    }
}

/// Segments waiting for the next commit, with the union of their ranges.
#[derive(Debug, Clone, Default)]
pub struct PendingWriteSet {
    lower: u64,
    upper: u64,
    segments: Vec<WriteSegment>,
}

impl PendingWriteSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a segment. Zero-length segments are ignored and return false.
    pub fn push(&mut self, segment: WriteSegment) -> bool {
        if segment.is_empty() {
            return false;
        }

        let range = segment.range();
        if self.segments.is_empty() {
            self.lower = range.start;
            self.upper = range.end;
        } else {
            self.lower = self.lower.min(range.start);
            self.upper = self.upper.max(range.end);
        }
        self.segments.push(segment);
        true
    }

    /// Returns true if nothing was added since the last commit.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Smallest destination offset of any segment.
    pub fn lower_bound(&self) -> u64 {
        self.lower
    }

    /// End of the furthest segment.
    pub fn upper_bound(&self) -> u64 {
        self.upper
    }

    /// `[lower_bound, upper_bound)`.
    pub fn range(&self) -> Range<u64> {
        self.lower..self.upper
    }

    /// Segments in the order they were added.
    pub fn segments(&self) -> &[WriteSegment] {
        &self.segments
    }

    /// Remove every segment, leaving the set empty.
    pub fn take(&mut self) -> Vec<WriteSegment> {
        self.lower = 0;
        self.upper = 0;
        std::mem::take(&mut self.segments)
    }
}

/// How a buffer's writes may be applied, chosen when the scheduler is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStrategy {
    /// Write through the mapping whenever the buffer is idle.
    DirectWrite,
    /// Always go through a staging copy.
    StagedWrite,
}

impl WriteStrategy {
    /// Strategy for a residency pattern. `allow_direct = false` forces staging.
    pub fn select(pattern: ResidencyPattern, allow_direct: bool) -> Self {
        if allow_direct && pattern.is_host_mappable() {
            Self::DirectWrite
        } else {
            Self::StagedWrite
        }
    }
}

/// The path a commit actually took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePath {
    Direct,
    Staged,
}

/// What a commit did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitReport {
    /// Path the segments took.
    pub path: WritePath,
    /// Byte range written.
    pub range: Range<u64>,
    /// Previous capacity, if the buffer had to grow.
    pub grew_from: Option<u64>,
}

/// Owner of a lazily created buffer and the writes pending against it.
pub struct WriteScheduler {
    context: Arc<dyn GpuContext>,
    descriptor: BufferDescriptor,
    strategy: WriteStrategy,
    buffer: Option<DeviceBuffer>,
    pending: PendingWriteSet,
}

impl WriteScheduler {
    /// Create a scheduler. No memory is allocated until the first commit.
    pub fn new(
        context: Arc<dyn GpuContext>,
        descriptor: BufferDescriptor,
        allow_direct: bool,
    ) -> Self {
        let strategy = WriteStrategy::select(descriptor.pattern, allow_direct);
        log::debug!(
            "Write scheduler {:?}: {:?} residency uses {:?}",
            descriptor.label,
            descriptor.pattern,
            strategy
        );
        Self {
            context,
            descriptor,
            strategy,
            buffer: None,
            pending: PendingWriteSet::new(),
        }
    }

    pub fn descriptor(&self) -> &BufferDescriptor {
        &self.descriptor
    }

    pub fn strategy(&self) -> WriteStrategy {
        self.strategy
    }

    /// The current allocation, if a commit has created one.
    pub fn buffer(&self) -> Option<&DeviceBuffer> {
        self.buffer.as_ref()
    }

    pub fn buffer_mut(&mut self) -> Option<&mut DeviceBuffer> {
        self.buffer.as_mut()
    }

    /// Give up the current allocation, for destruction through a retain.
    pub fn take_buffer(&mut self) -> Option<DeviceBuffer> {
        self.buffer.take()
    }

    /// Current capacity, 0 before the first commit.
    pub fn capacity(&self) -> u64 {
        self.buffer.as_ref().map_or(0, DeviceBuffer::capacity)
    }

    pub fn pending(&self) -> &PendingWriteSet {
        &self.pending
    }

    /// Record an intent to write `data` at `offset`. No side effects until commit.
    pub fn add_write_segment(
        &mut self,
        data: impl Into<Cow<'static, [u8]>>,
        offset: u64,
    ) -> GraphicsResult<()> {
        let segment = WriteSegment::new(data, offset)?;
        let range = segment.range();
        if self.pending.push(segment) {
            log::trace!(
                "Write scheduler {:?}: pending segment {:?}",
                self.descriptor.label,
                range
            );
        }
        Ok(())
    }

    /// Apply every pending segment.
    ///
    /// Commands are recorded into `cmd`, which must be recording whenever the
    /// buffer grows or the staged path is taken. Returns `None` if nothing was
    /// pending. On failure the pending segments are kept.
    pub fn commit(
        &mut self,
        cmd: &mut CommandBufferResource,
    ) -> GraphicsResult<Option<CommitReport>> {
        profile_function!();

        if self.pending.is_empty() {
            return Ok(None);
        }

        let range = self.pending.range();
        let grew_from = self.ensure_capacity(cmd, range.end)?;
        let buffer = self.buffer.as_mut().ok_or_else(|| {
            GraphicsError::Internal("write scheduler has no buffer after growth".to_string())
        })?;

        let path = match (self.strategy, buffer.is_idle()?) {
            (WriteStrategy::DirectWrite, true) => WritePath::Direct,
            (WriteStrategy::DirectWrite, false) | (WriteStrategy::StagedWrite, _) => {
                WritePath::Staged
            }
        };

        match path {
            WritePath::Direct => {
                profile_scope!("direct_write");
                for segment in self.pending.segments() {
                    buffer.write(segment.offset(), segment.data())?;
                }
                buffer.flush(range.start, range.end - range.start)?;
            }
            WritePath::Staged => {
                profile_scope!("staged_write");
                let staging = stage_segments(
                    &self.context,
                    &self.descriptor,
                    self.pending.segments(),
                    range.clone(),
                )?;
                record_staged_copy(cmd, &staging, buffer, range.clone())?;
                cmd.acquire_resource(staging);
            }
        }

        buffer.mark_used(cmd.pending_point());
        let segments = self.pending.take();
        log::debug!(
            "Write scheduler {:?}: committed {} segments over {:?} via {:?}",
            self.descriptor.label,
            segments.len(),
            range,
            path
        );

        Ok(Some(CommitReport {
            path,
            range,
            grew_from,
        }))
    }

    /// Make sure the buffer holds at least `required` bytes.
    ///
    /// Returns the old capacity if the buffer was replaced. Capacity never
    /// shrinks.
    fn ensure_capacity(
        &mut self,
        cmd: &mut CommandBufferResource,
        required: u64,
    ) -> GraphicsResult<Option<u64>> {
        let current = self.capacity();
        if self.buffer.is_some() && required <= current {
            return Ok(None);
        }

        let mut grown = DeviceBuffer::new(
            self.context.clone(),
            required.max(current),
            self.descriptor.usage | BufferUsage::COPY_SRC | BufferUsage::COPY_DST,
            self.descriptor.pattern,
            self.descriptor.label.as_deref(),
        )?;

        let Some(old) = self.buffer.as_ref() else {
            self.buffer = Some(grown);
            return Ok(None);
        };

        {
            profile_scope!("copy_forward");
            let old_range = 0..old.capacity();
            let mut barriers = BarrierBatch::new();
            barriers.add_buffer_barrier(
                old.raw(),
                old_range.clone(),
                prior_access(self.descriptor.usage),
                (PipelineStages::TRANSFER, AccessFlags::TRANSFER_READ),
            );
            cmd.pipeline_barrier(&barriers)?;
            cmd.copy_buffer_range(old.raw(), 0, grown.raw(), old_range)?;
        }

        // The copy-forward makes the new buffer busy until this submission completes.
        grown.mark_used(cmd.pending_point());

        if let Some(old) = self.buffer.replace(grown) {
            log::debug!(
                "Write scheduler {:?}: grew {} -> {} bytes",
                self.descriptor.label,
                current,
                self.capacity()
            );
            cmd.acquire_resource(old);
        }
        Ok(Some(current))
    }
}

impl std::fmt::Debug for WriteScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteScheduler")
            .field("label", &self.descriptor.label)
            .field("strategy", &self.strategy)
            .field("capacity", &self.capacity())
            .field("pending", &self.pending.len())
            .finish()
    }
}

/// Everything that may have touched a buffer with this usage before a transfer.
fn prior_access(usage: BufferUsage) -> (PipelineStages, AccessFlags) {
    let (stages, access) = usage.access_scope();
    (
        stages | PipelineStages::TRANSFER,
        access | AccessFlags::TRANSFER_WRITE,
    )
}

/// Pack segments into a fresh upload buffer covering `range`.
fn stage_segments(
    context: &Arc<dyn GpuContext>,
    descriptor: &BufferDescriptor,
    segments: &[WriteSegment],
    range: Range<u64>,
) -> GraphicsResult<DeviceBuffer> {
    let label = descriptor
        .label
        .as_deref()
        .map(|label| format!("{label} (staging)"));
    let staging = DeviceBuffer::new(
        context.clone(),
        range.end - range.start,
        BufferUsage::COPY_SRC,
        ResidencyPattern::Upload,
        label.as_deref(),
    )?;

    for segment in segments {
        staging.write(segment.offset() - range.start, segment.data())?;
    }
    staging.flush(0, staging.capacity())?;
    Ok(staging)
}

/// Record `staging -> dst[range]` bracketed by its two barriers.
fn record_staged_copy(
    cmd: &mut CommandBufferResource,
    staging: &DeviceBuffer,
    dst: &DeviceBuffer,
    range: Range<u64>,
) -> GraphicsResult<()> {
    let transfer_write = (PipelineStages::TRANSFER, AccessFlags::TRANSFER_WRITE);

    let mut before = BarrierBatch::new();
    before.add_buffer_barrier(
        dst.raw(),
        range.clone(),
        prior_access(dst.usage()),
        transfer_write,
    );
    cmd.pipeline_barrier(&before)?;

    cmd.copy_buffer_range(staging.raw(), 0, dst.raw(), range.clone())?;

    let mut after = BarrierBatch::new();
    after.add_buffer_barrier(dst.raw(), range, transfer_write, dst.usage().access_scope());
    cmd.pipeline_barrier(&after)
}

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;
    use crate::backend::dummy::{DummyContext, ExecutionMode};

    fn recording(context: &Arc<DummyContext>) -> CommandBufferResource {
        let mut cmd = CommandBufferResource::new(context.clone(), None, None).unwrap();
        cmd.begin().unwrap();
        cmd
    }

    fn finish(cmd: &mut CommandBufferResource) {
        cmd.end().unwrap();
        cmd.submit().unwrap();
        cmd.prepare_for_recording().unwrap();
    }

    fn scheduler(
        context: &Arc<DummyContext>,
        usage: BufferUsage,
        pattern: ResidencyPattern,
    ) -> WriteScheduler {
        WriteScheduler::new(
            context.clone(),
            BufferDescriptor::new(usage, pattern).with_label("test"),
            true,
        )
    }

    #[test]
    fn test_pending_bounds_are_union() {
        let mut set = PendingWriteSet::new();
        assert!(set.is_empty());
        set.push(WriteSegment::new(vec![0; 8], 16).unwrap());
        set.push(WriteSegment::new(vec![0; 4], 4).unwrap());
        assert_eq!(set.range(), 4..24);
        assert_eq!(set.len(), 2);

        set.take();
        assert!(set.is_empty());
        assert_eq!(set.range(), 0..0);
    }

    #[test]
    fn test_zero_length_segment_ignored() {
        let mut set = PendingWriteSet::new();
        assert!(!set.push(WriteSegment::new(Vec::new(), 100).unwrap()));
        assert!(set.is_empty());
        assert_eq!(set.upper_bound(), 0);
    }

    #[test]
    fn test_overflowing_segment_rejected() {
        let context = DummyContext::new();
        let mut writes = scheduler(&context, BufferUsage::STORAGE, ResidencyPattern::Dynamic);
        assert!(matches!(
            writes.add_write_segment(vec![1u8, 2], u64::MAX - 1),
            Err(GraphicsError::InvalidParameter(_))
        ));
        assert!(writes.pending().is_empty());

        writes.add_write_segment(vec![1u8], u64::MAX - 1).unwrap();
        assert_eq!(writes.pending().range(), u64::MAX - 1..u64::MAX);
    }

    #[test]
    fn test_strategy_selection() {
        assert_eq!(
            WriteStrategy::select(ResidencyPattern::Dynamic, true),
            WriteStrategy::DirectWrite
        );
        assert_eq!(
            WriteStrategy::select(ResidencyPattern::Static, true),
            WriteStrategy::StagedWrite
        );
        assert_eq!(
            WriteStrategy::select(ResidencyPattern::Dynamic, false),
            WriteStrategy::StagedWrite
        );
    }

    #[test]
    fn test_empty_commit_is_noop() {
        let context = DummyContext::new();
        let mut writes = scheduler(&context, BufferUsage::VERTEX, ResidencyPattern::Static);
        let mut cmd = recording(&context);
        assert_eq!(writes.commit(&mut cmd).unwrap(), None);
        assert!(writes.buffer().is_none());
    }

    #[test]
    fn test_first_commit_sizes_buffer_to_upper_bound() {
        let context = DummyContext::new();
        let mut writes = scheduler(&context, BufferUsage::UNIFORM, ResidencyPattern::Dynamic);
        let mut cmd = recording(&context);

        let bytes: Vec<u8> = (0..50).collect();
        writes.add_write_segment(bytes.clone(), 100).unwrap();
        let report = writes.commit(&mut cmd).unwrap().unwrap();
        finish(&mut cmd);

        assert_eq!(report.path, WritePath::Direct);
        assert_eq!(report.range, 100..150);
        assert!(writes.capacity() >= 150);
        let raw = writes.buffer().unwrap().raw();
        assert_eq!(context.buffer_contents(raw).unwrap()[100..150], bytes[..]);
    }

    #[test]
    fn test_static_buffer_uses_staged_copy() {
        let context = DummyContext::new();
        let mut writes = scheduler(&context, BufferUsage::VERTEX, ResidencyPattern::Static);
        let mut cmd = recording(&context);

        writes.add_write_segment(vec![7u8; 32], 0).unwrap();
        let report = writes.commit(&mut cmd).unwrap().unwrap();
        assert_eq!(report.path, WritePath::Staged);
        assert_eq!(cmd.retained_count(), 1);
        assert_eq!(cmd.barriers_recorded(), 2);
        finish(&mut cmd);

        let raw = writes.buffer().unwrap().raw();
        assert_eq!(context.buffer_contents(raw).unwrap(), vec![7u8; 32]);
        assert!(context.validation_errors().is_empty());
    }

    #[test]
    fn test_busy_dynamic_buffer_falls_back_to_staging() {
        let context = DummyContext::with_mode(ExecutionMode::Deferred);
        let mut writes = scheduler(&context, BufferUsage::UNIFORM, ResidencyPattern::Dynamic);
        let mut cmd = recording(&context);

        writes.add_write_segment(vec![1u8; 16], 0).unwrap();
        assert_eq!(writes.commit(&mut cmd).unwrap().unwrap().path, WritePath::Direct);
        cmd.end().unwrap();
        cmd.submit().unwrap();

        // The GPU may still be reading: the next write must not touch the mapping.
        let mut other = recording(&context);
        writes.add_write_segment(vec![2u8; 16], 0).unwrap();
        assert_eq!(writes.commit(&mut other).unwrap().unwrap().path, WritePath::Staged);
        let raw = writes.buffer().unwrap().raw();
        assert_eq!(context.buffer_contents(raw).unwrap(), vec![1u8; 16]);

        finish(&mut other);
        cmd.prepare_for_recording().unwrap();
        assert_eq!(context.buffer_contents(raw).unwrap(), vec![2u8; 16]);
    }

    #[test]
    fn test_growth_copies_forward_and_new_writes_win() {
        let context = DummyContext::new();
        let mut writes = scheduler(&context, BufferUsage::STORAGE, ResidencyPattern::Static);

        let mut cmd = recording(&context);
        writes.add_write_segment(vec![1u8; 64], 0).unwrap();
        writes.commit(&mut cmd).unwrap();
        finish(&mut cmd);
        let old_raw = writes.buffer().unwrap().raw();

        cmd.begin().unwrap();
        writes.add_write_segment(vec![9u8; 32], 48).unwrap();
        let report = writes.commit(&mut cmd).unwrap().unwrap();
        assert_eq!(report.grew_from, Some(64));
        assert_eq!(writes.capacity(), 80);
        assert!(context.is_buffer_alive(old_raw));
        finish(&mut cmd);
        assert!(!context.is_buffer_alive(old_raw));

        let contents = context.buffer_contents(writes.buffer().unwrap().raw()).unwrap();
        assert_eq!(contents[..48], [1u8; 48]);
        assert_eq!(contents[48..80], [9u8; 32]);
        assert!(context.validation_errors().is_empty());
    }

    #[test]
    fn test_capacity_never_shrinks() {
        let context = DummyContext::new();
        let mut writes = scheduler(&context, BufferUsage::VERTEX, ResidencyPattern::Dynamic);
        let mut cmd = recording(&context);

        writes.add_write_segment(vec![0u8; 256], 0).unwrap();
        writes.commit(&mut cmd).unwrap();
        writes.add_write_segment(vec![0u8; 8], 0).unwrap();
        let report = writes.commit(&mut cmd).unwrap().unwrap();
        assert_eq!(report.grew_from, None);
        assert_eq!(writes.capacity(), 256);
        finish(&mut cmd);
    }

    #[test]
    fn test_overlapping_segments_last_added_wins() {
        let context = DummyContext::new();
        for pattern in [ResidencyPattern::Dynamic, ResidencyPattern::Static] {
            let mut writes = scheduler(&context, BufferUsage::UNIFORM, pattern);
            let mut cmd = recording(&context);
            writes.add_write_segment(vec![1u8; 16], 0).unwrap();
            writes.add_write_segment(vec![2u8; 8], 4).unwrap();
            writes.add_write_segment(vec![3u8; 2], 6).unwrap();
            writes.commit(&mut cmd).unwrap();
            finish(&mut cmd);

            let contents = context.buffer_contents(writes.buffer().unwrap().raw()).unwrap();
            assert_eq!(
                contents,
                vec![1, 1, 1, 1, 2, 2, 3, 3, 2, 2, 2, 2, 1, 1, 1, 1],
                "{pattern:?}"
            );
        }
    }

    #[test]
    fn test_failed_allocation_keeps_pending_writes() {
        let context = DummyContext::new();
        let mut writes = scheduler(&context, BufferUsage::VERTEX, ResidencyPattern::Static);
        let mut cmd = recording(&context);

        context.set_fail_allocations(true);
        writes.add_write_segment(vec![5u8; 4], 0).unwrap();
        let err = writes.commit(&mut cmd).unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(writes.pending().len(), 1);
        assert!(writes.buffer().is_none());
    }
}
