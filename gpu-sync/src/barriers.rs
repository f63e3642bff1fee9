//! Barrier batching.
//!
//! Barriers issued for one logical operation are collected into a
//! [`BarrierBatch`] and recorded as a single pipeline barrier call, with
//! the source and destination stage masks unioned across every entry.

use std::ops::Range;

use crate::backend::{RawBuffer, RawImage};
use crate::types::{AccessFlags, ImageAspect, ImageLayout, PipelineStages, SubresourceRange};

/// Memory dependency on a byte range of a buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferBarrier {
    /// Buffer the barrier applies to.
    pub buffer: RawBuffer,
    /// Byte range covered.
    pub range: Range<u64>,
    /// Accesses made available.
    pub src_access: AccessFlags,
    /// Accesses made visible.
    pub dst_access: AccessFlags,
}

/// Layout transition of a subresource range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBarrier {
    /// Image the barrier applies to.
    pub image: RawImage,
    /// Aspects covered.
    pub aspect: ImageAspect,
    /// Subresources covered.
    pub range: SubresourceRange,
    /// Layout the subresources are in.
    pub old_layout: ImageLayout,
    /// Layout the subresources move to.
    pub new_layout: ImageLayout,
    /// Accesses made available.
    pub src_access: AccessFlags,
    /// Accesses made visible.
    pub dst_access: AccessFlags,
}

/// A batch of barriers recorded together.
#[derive(Debug, Clone, Default)]
pub struct BarrierBatch {
    buffer_barriers: Vec<BufferBarrier>,
    image_barriers: Vec<ImageBarrier>,
    src_stages: PipelineStages,
    dst_stages: PipelineStages,
}

impl BarrierBatch {
    /// Create an empty barrier batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a buffer memory barrier. Empty ranges are skipped.
    pub fn add_buffer_barrier(
        &mut self,
        buffer: RawBuffer,
        range: Range<u64>,
        src: (PipelineStages, AccessFlags),
        dst: (PipelineStages, AccessFlags),
    ) {
        if range.is_empty() {
            return;
        }

        self.src_stages |= src.0;
        self.dst_stages |= dst.0;
        self.buffer_barriers.push(BufferBarrier {
            buffer,
            range,
            src_access: src.1,
            dst_access: dst.1,
        });
    }

    /// Add an image layout transition.
    ///
    /// Returns false, and records nothing, if the layouts match or the range
    /// is empty.
    pub fn add_image_transition(
        &mut self,
        image: RawImage,
        aspect: ImageAspect,
        range: SubresourceRange,
        old_layout: ImageLayout,
        new_layout: ImageLayout,
    ) -> bool {
        if old_layout == new_layout || range.is_empty() {
            return false;
        }

        let (src_stage, src_access) = old_layout.src_scope();
        let (dst_stage, dst_access) = new_layout.dst_scope();
        self.src_stages |= src_stage;
        self.dst_stages |= dst_stage;

        log::trace!(
            "Image {:?} layers {:?} mips {:?}: {:?} -> {:?}",
            image,
            range.layers,
            range.mips,
            old_layout,
            new_layout
        );

        self.image_barriers.push(ImageBarrier {
            image,
            aspect,
            range,
            old_layout,
            new_layout,
            src_access,
            dst_access,
        });
        true
    }

    /// Check if there are any barriers.
    pub fn is_empty(&self) -> bool {
        self.buffer_barriers.is_empty() && self.image_barriers.is_empty()
    }

    /// Number of barriers in the batch.
    pub fn len(&self) -> usize {
        self.buffer_barriers.len() + self.image_barriers.len()
    }

    /// Buffer barriers in insertion order.
    pub fn buffer_barriers(&self) -> &[BufferBarrier] {
        &self.buffer_barriers
    }

    /// Image barriers in insertion order.
    pub fn image_barriers(&self) -> &[ImageBarrier] {
        &self.image_barriers
    }

    /// Union of the source stages of every barrier.
    pub fn src_stages(&self) -> PipelineStages {
        self.src_stages
    }

    /// Union of the destination stages of every barrier.
    pub fn dst_stages(&self) -> PipelineStages {
        self.dst_stages
    }

    /// Clear the batch for reuse.
    pub fn clear(&mut self) {
        self.buffer_barriers.clear();
        self.image_barriers.clear();
        self.src_stages = PipelineStages::empty();
        self.dst_stages = PipelineStages::empty();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_batch() {
        let batch = BarrierBatch::new();
        assert!(batch.is_empty());
        assert_eq!(batch.len(), 0);
        assert!(batch.src_stages().is_empty());
    }

    #[test]
    fn test_same_layout_is_skipped() {
        let mut batch = BarrierBatch::new();
        let added = batch.add_image_transition(
            RawImage::from_raw(1),
            ImageAspect::COLOR,
            SubresourceRange::full(1, 1),
            ImageLayout::ShaderReadOnly,
            ImageLayout::ShaderReadOnly,
        );
        assert!(!added);
        assert!(batch.is_empty());
    }

    #[test]
    fn test_stage_masks_are_unioned() {
        let mut batch = BarrierBatch::new();
        batch.add_image_transition(
            RawImage::from_raw(1),
            ImageAspect::COLOR,
            SubresourceRange::full(1, 1),
            ImageLayout::ColorAttachment,
            ImageLayout::ShaderReadOnly,
        );
        batch.add_buffer_barrier(
            RawBuffer::from_raw(2),
            0..64,
            (PipelineStages::TRANSFER, AccessFlags::TRANSFER_WRITE),
            (PipelineStages::VERTEX_INPUT, AccessFlags::VERTEX_ATTRIBUTE_READ),
        );

        assert_eq!(batch.len(), 2);
        assert!(batch.src_stages().contains(PipelineStages::COLOR_ATTACHMENT_OUTPUT));
        assert!(batch.src_stages().contains(PipelineStages::TRANSFER));
        assert!(batch.dst_stages().contains(PipelineStages::FRAGMENT_SHADER));
        assert!(batch.dst_stages().contains(PipelineStages::VERTEX_INPUT));
    }

    #[test]
    fn test_empty_buffer_range_is_skipped() {
        let mut batch = BarrierBatch::new();
        batch.add_buffer_barrier(
            RawBuffer::from_raw(2),
            16..16,
            (PipelineStages::TRANSFER, AccessFlags::TRANSFER_WRITE),
            (PipelineStages::TRANSFER, AccessFlags::TRANSFER_READ),
        );
        assert!(batch.is_empty());
    }

    #[test]
    fn test_clear() {
        let mut batch = BarrierBatch::new();
        batch.add_image_transition(
            RawImage::from_raw(1),
            ImageAspect::COLOR,
            SubresourceRange::full(1, 1),
            ImageLayout::Undefined,
            ImageLayout::TransferDst,
        );
        batch.clear();
        assert!(batch.is_empty());
        assert!(batch.dst_stages().is_empty());
    }
}
