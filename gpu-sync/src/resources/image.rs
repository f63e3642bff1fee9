//! Image resource with per-subresource layout tracking.

use std::ops::Range;
use std::sync::Arc;

use crate::backend::{GpuContext, RawImage};
use crate::barriers::BarrierBatch;
use crate::command::CommandBufferResource;
use crate::error::{GraphicsError, GraphicsResult};
use crate::profile_function;
use crate::sync::SubmissionPoint;
use crate::types::{ImageAspect, ImageDescriptor, ImageLayout, SubresourceRange};

use super::LayoutMap;

/// Who destroys the backend image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageOwnership {
    /// Created by this resource and destroyed on drop.
    Owned,
    /// Owned by a swapchain; destroyed with it.
    Swapchain,
}

/// A device image and the layout of each of its subresources.
pub struct ImageResource {
    context: Arc<dyn GpuContext>,
    raw: RawImage,
    descriptor: ImageDescriptor,
    layouts: LayoutMap,
    ownership: ImageOwnership,
    last_use: Option<SubmissionPoint>,
}

impl ImageResource {
    /// Create an image. Every subresource starts in [`ImageLayout::Undefined`].
    pub fn new(context: Arc<dyn GpuContext>, descriptor: ImageDescriptor) -> GraphicsResult<Self> {
        descriptor.validate()?;
        let raw = context.create_image(&descriptor)?;
        log::trace!("Created image {:?} {:?}", raw, descriptor.label);
        Ok(Self::wrap(context, raw, descriptor, ImageOwnership::Owned))
    }

    /// Wrap an image owned by a swapchain.
    pub fn from_swapchain(
        context: Arc<dyn GpuContext>,
        raw: RawImage,
        descriptor: ImageDescriptor,
    ) -> Self {
        Self::wrap(context, raw, descriptor, ImageOwnership::Swapchain)
    }

    fn wrap(
        context: Arc<dyn GpuContext>,
        raw: RawImage,
        descriptor: ImageDescriptor,
        ownership: ImageOwnership,
    ) -> Self {
        let count = descriptor.array_layer_count * descriptor.mip_level_count;
        Self {
            context,
            raw,
            layouts: LayoutMap::new(count, ImageLayout::Undefined),
            descriptor,
            ownership,
            last_use: None,
        }
    }

    /// The backend image.
    pub fn raw(&self) -> RawImage {
        self.raw
    }

    pub fn descriptor(&self) -> &ImageDescriptor {
        &self.descriptor
    }

    pub fn ownership(&self) -> ImageOwnership {
        self.ownership
    }

    pub fn label(&self) -> Option<&str> {
        self.descriptor.label.as_deref()
    }

    /// Aspects covered by barriers on this image.
    pub fn aspect(&self) -> ImageAspect {
        self.descriptor.format.aspect()
    }

    /// Every layer and mip of the image.
    pub fn full_range(&self) -> SubresourceRange {
        SubresourceRange::full(
            self.descriptor.array_layer_count,
            self.descriptor.mip_level_count,
        )
    }

    /// The layout map, in linear layer-major order.
    pub fn layouts(&self) -> &LayoutMap {
        &self.layouts
    }

    pub fn last_use(&self) -> Option<&SubmissionPoint> {
        self.last_use.as_ref()
    }

    /// Record that work completing at `point` uses this image.
    pub fn mark_used(&mut self, point: SubmissionPoint) {
        self.last_use = Some(point);
    }

    /// Returns true if no submitted or pending GPU work still uses this image.
    pub fn is_idle(&self) -> GraphicsResult<bool> {
        match &self.last_use {
            Some(point) => point.is_reached(),
            None => Ok(true),
        }
    }

    /// The single layout of every subresource in `range`, or `None` if they differ.
    pub fn get_layout(&self, range: &SubresourceRange) -> GraphicsResult<Option<ImageLayout>> {
        self.check_range(range)?;

        let mut found = None;
        for linear in self.linear_ranges(range) {
            for (_, layout) in self.layouts.query(linear) {
                match found {
                    None => found = Some(layout),
                    Some(existing) if existing != layout => return Ok(None),
                    Some(_) => {}
                }
            }
        }
        Ok(found)
    }

    /// The current layout intervals overlapping `range`, as subresource ranges.
    ///
    /// Intervals are split at layer boundaries where needed, and equal
    /// neighbours in consecutive layers are merged back.
    pub fn layout_regions(
        &self,
        range: &SubresourceRange,
    ) -> GraphicsResult<Vec<(SubresourceRange, ImageLayout)>> {
        self.check_range(range)?;

        let mut regions: Vec<(SubresourceRange, ImageLayout)> = Vec::new();
        for linear in self.linear_ranges(range) {
            for (interval, layout) in self.layouts.query(linear) {
                for rect in self.rectangles(interval) {
                    push_region(&mut regions, rect, layout);
                }
            }
        }
        Ok(regions)
    }

    /// Move every subresource in `range` to `new_layout`.
    ///
    /// Emits one barrier per distinct current layout region, and none for
    /// regions already in `new_layout`. Returns the number of barriers recorded.
    pub fn transition_layout(
        &mut self,
        cmd: &mut CommandBufferResource,
        range: &SubresourceRange,
        new_layout: ImageLayout,
    ) -> GraphicsResult<usize> {
        profile_function!();

        if !new_layout.is_valid_target() {
            return Err(GraphicsError::InvalidParameter(format!(
                "{new_layout:?} is not a valid transition target"
            )));
        }

        let mut batch = BarrierBatch::new();
        for (region, old_layout) in self.layout_regions(range)? {
            batch.add_image_transition(self.raw, self.aspect(), region, old_layout, new_layout);
        }

        let count = batch.len();
        if count > 0 {
            cmd.pipeline_barrier(&batch)?;
            self.mark_used(cmd.pending_point());
        }

        for linear in self.linear_ranges(range) {
            self.layouts.assign(linear, new_layout);
        }
        Ok(count)
    }

    /// Forget the layout of `range` without recording anything.
    ///
    /// Used when the contents are about to be discarded, such as a freshly
    /// acquired swapchain image.
    pub fn discard_layout(&mut self, range: &SubresourceRange) -> GraphicsResult<()> {
        self.check_range(range)?;
        for linear in self.linear_ranges(range) {
            self.layouts.assign(linear, ImageLayout::Undefined);
        }
        Ok(())
    }

    fn check_range(&self, range: &SubresourceRange) -> GraphicsResult<()> {
        let layers = self.descriptor.array_layer_count;
        let mips = self.descriptor.mip_level_count;
        if range.is_empty() || !range.fits(layers, mips) {
            return Err(GraphicsError::InvalidParameter(format!(
                "subresource range layers {:?} mips {:?} outside image with {layers} layers and {mips} mips",
                range.layers, range.mips
            )));
        }
        Ok(())
    }

    /// Linear runs covering `range`: one run when every mip is included,
    /// otherwise one per layer.
    fn linear_ranges(&self, range: &SubresourceRange) -> Vec<Range<u32>> {
        let mips = self.descriptor.mip_level_count;
        if range.mips == (0..mips) {
            vec![range.layers.start * mips..range.layers.end * mips]
        } else {
            range
                .layers
                .clone()
                .map(|layer| layer * mips + range.mips.start..layer * mips + range.mips.end)
                .collect()
        }
    }

    /// Split a linear interval into at most three rectangles: a partial head
    /// layer, a run of full layers, and a partial tail layer.
    fn rectangles(&self, interval: Range<u32>) -> Vec<SubresourceRange> {
        let mips = self.descriptor.mip_level_count;
        let (first_layer, first_mip) = (interval.start / mips, interval.start % mips);
        let (last_layer, end_mip) = (interval.end / mips, interval.end % mips);

        if first_layer == last_layer {
            return vec![SubresourceRange::new(
                first_layer..first_layer + 1,
                first_mip..end_mip,
            )];
        }

        let mut rects = Vec::with_capacity(3);
        let mut full_start = first_layer;
        if first_mip != 0 {
            rects.push(SubresourceRange::new(
                first_layer..first_layer + 1,
                first_mip..mips,
            ));
            full_start += 1;
        }
        if full_start < last_layer {
            rects.push(SubresourceRange::new(full_start..last_layer, 0..mips));
        }
        if end_mip != 0 {
            rects.push(SubresourceRange::new(last_layer..last_layer + 1, 0..end_mip));
        }
        rects
    }
}

/// Add a region, extending an existing one with the same layout and mips
/// whose layers end where this one starts.
fn push_region(
    regions: &mut Vec<(SubresourceRange, ImageLayout)>,
    rect: SubresourceRange,
    layout: ImageLayout,
) {
    let adjacent = regions.iter_mut().find(|(existing, existing_layout)| {
        *existing_layout == layout
            && existing.mips == rect.mips
            && existing.layers.end == rect.layers.start
    });
    match adjacent {
        Some((existing, _)) => existing.layers.end = rect.layers.end,
        None => regions.push((rect, layout)),
    }
}

impl Drop for ImageResource {
    fn drop(&mut self) {
        if self.ownership == ImageOwnership::Owned {
            log::trace!("Destroying image {:?} {:?}", self.raw, self.descriptor.label);
            self.context.destroy_image(self.raw);
        }
    }
}

impl std::fmt::Debug for ImageResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageResource")
            .field("raw", &self.raw)
            .field("label", &self.descriptor.label)
            .field("size", &self.descriptor.size)
            .field("format", &self.descriptor.format)
            .field("ownership", &self.ownership)
            .field("intervals", &self.layouts.interval_count())
            .finish()
    }
}

static_assertions::assert_impl_all!(ImageResource: Send, Sync);

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;
    use crate::backend::dummy::DummyContext;
    use crate::types::{TextureFormat, TextureUsage};

    fn image(context: &Arc<DummyContext>, layers: u32, mips: u32) -> ImageResource {
        let descriptor = ImageDescriptor::new_2d(
            256,
            256,
            TextureFormat::Rgba8Unorm,
            TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
        )
        .with_array_layers(layers)
        .with_mip_levels(mips);
        ImageResource::new(context.clone(), descriptor).unwrap()
    }

    fn recording(context: &Arc<DummyContext>) -> CommandBufferResource {
        let mut cmd = CommandBufferResource::new(context.clone(), None, None).unwrap();
        cmd.begin().unwrap();
        cmd
    }

    #[test]
    fn test_fresh_image_is_undefined() {
        let context = DummyContext::new();
        let image = image(&context, 4, 3);
        assert_eq!(
            image.get_layout(&image.full_range()).unwrap(),
            Some(ImageLayout::Undefined)
        );
        assert_eq!(image.layouts().interval_count(), 1);
    }

    #[test]
    fn test_full_range_transition_is_one_barrier() {
        let context = DummyContext::new();
        let mut image = image(&context, 1, 1);
        let mut cmd = recording(&context);
        let full = image.full_range();

        assert_eq!(
            image
                .transition_layout(&mut cmd, &full, ImageLayout::ShaderReadOnly)
                .unwrap(),
            1
        );
        assert_eq!(
            image
                .transition_layout(&mut cmd, &full, ImageLayout::TransferDst)
                .unwrap(),
            1
        );
        assert_eq!(
            image.get_layout(&full).unwrap(),
            Some(ImageLayout::TransferDst)
        );
    }

    #[test]
    fn test_many_layers_one_barrier() {
        let context = DummyContext::new();
        let mut image = image(&context, 6, 9);
        let mut cmd = recording(&context);
        let full = image.full_range();

        let count = image
            .transition_layout(&mut cmd, &full, ImageLayout::ShaderReadOnly)
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(image.layouts().interval_count(), 1);
    }

    #[test]
    fn test_same_layout_emits_nothing() {
        let context = DummyContext::new();
        let mut image = image(&context, 2, 2);
        let mut cmd = recording(&context);
        let full = image.full_range();

        image
            .transition_layout(&mut cmd, &full, ImageLayout::General)
            .unwrap();
        assert_eq!(
            image
                .transition_layout(&mut cmd, &full, ImageLayout::General)
                .unwrap(),
            0
        );
    }

    #[test]
    fn test_disjoint_transitions_are_ambiguous_together() {
        let context = DummyContext::new();
        let mut image = image(&context, 4, 1);
        let mut cmd = recording(&context);
        let low = SubresourceRange::new(0..2, 0..1);
        let high = SubresourceRange::new(2..4, 0..1);

        image
            .transition_layout(&mut cmd, &low, ImageLayout::ShaderReadOnly)
            .unwrap();
        image
            .transition_layout(&mut cmd, &high, ImageLayout::ColorAttachment)
            .unwrap();

        assert_eq!(image.get_layout(&image.full_range()).unwrap(), None);
        assert_eq!(
            image.get_layout(&low).unwrap(),
            Some(ImageLayout::ShaderReadOnly)
        );
        assert_eq!(
            image.get_layout(&high).unwrap(),
            Some(ImageLayout::ColorAttachment)
        );
        assert_eq!(
            image.get_layout(&SubresourceRange::single(3, 0)).unwrap(),
            Some(ImageLayout::ColorAttachment)
        );
    }

    #[test]
    fn test_barrier_count_tracks_distinct_layouts() {
        let context = DummyContext::new();
        let mut image = image(&context, 3, 4);
        let mut cmd = recording(&context);

        image
            .transition_layout(
                &mut cmd,
                &SubresourceRange::new(0..3, 0..1),
                ImageLayout::TransferDst,
            )
            .unwrap();
        image
            .transition_layout(
                &mut cmd,
                &SubresourceRange::new(0..3, 1..4),
                ImageLayout::ShaderReadOnly,
            )
            .unwrap();

        // Mip 0 of every layer is TransferDst, the rest ShaderReadOnly: two
        // regions, each merged across the three layers.
        let count = image
            .transition_layout(&mut cmd, &image.full_range(), ImageLayout::General)
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(image.layouts().interval_count(), 1);
    }

    #[test]
    fn test_partial_mip_range_per_layer() {
        let context = DummyContext::new();
        let mut image = image(&context, 2, 4);
        let mut cmd = recording(&context);
        let range = SubresourceRange::new(0..2, 1..3);

        let count = image
            .transition_layout(&mut cmd, &range, ImageLayout::TransferSrc)
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(
            image.get_layout(&range).unwrap(),
            Some(ImageLayout::TransferSrc)
        );
        assert_eq!(
            image.get_layout(&SubresourceRange::single(1, 0)).unwrap(),
            Some(ImageLayout::Undefined)
        );
        image.layouts().check_invariants().unwrap();
    }

    #[test]
    fn test_unaligned_interval_splits_into_rectangles() {
        let context = DummyContext::new();
        let mut image = image(&context, 4, 2);
        let mut cmd = recording(&context);

        // Linear 1..7: layer 0 mip 1, layers 1-2 full, layer 3 mip 0.
        image
            .transition_layout(&mut cmd, &SubresourceRange::single(0, 1), ImageLayout::General)
            .unwrap();
        image
            .transition_layout(&mut cmd, &SubresourceRange::new(1..3, 0..2), ImageLayout::General)
            .unwrap();
        image
            .transition_layout(&mut cmd, &SubresourceRange::single(3, 0), ImageLayout::General)
            .unwrap();
        assert_eq!(image.layouts().interval_count(), 3);

        let regions = image.layout_regions(&image.full_range()).unwrap();
        let general: Vec<_> = regions
            .iter()
            .filter(|(_, layout)| *layout == ImageLayout::General)
            .map(|(range, _)| range.clone())
            .collect();
        assert_eq!(
            general,
            vec![
                SubresourceRange::new(0..1, 1..2),
                SubresourceRange::new(1..3, 0..2),
                SubresourceRange::new(3..4, 0..1),
            ]
        );
    }

    #[test]
    fn test_barriers_match_device_layouts() {
        let context = DummyContext::new();
        let mut image = image(&context, 2, 3);
        let mut cmd = recording(&context);

        image
            .transition_layout(&mut cmd, &SubresourceRange::mip(0, 0..2), ImageLayout::TransferDst)
            .unwrap();
        image
            .transition_layout(&mut cmd, &image.full_range(), ImageLayout::ShaderReadOnly)
            .unwrap();
        cmd.end().unwrap();
        cmd.submit().unwrap();
        cmd.wait().unwrap();

        assert!(context.validation_errors().is_empty());
        assert_eq!(
            context.image_layout(image.raw(), 1, 2),
            Some(ImageLayout::ShaderReadOnly)
        );
    }

    #[test]
    fn test_out_of_range_rejected() {
        let context = DummyContext::new();
        let mut image = image(&context, 2, 1);
        let mut cmd = recording(&context);
        let outside = SubresourceRange::new(1..3, 0..1);

        assert!(matches!(
            image.get_layout(&outside),
            Err(GraphicsError::InvalidParameter(_))
        ));
        assert!(matches!(
            image.transition_layout(&mut cmd, &outside, ImageLayout::General),
            Err(GraphicsError::InvalidParameter(_))
        ));
        assert!(matches!(
            image.transition_layout(&mut cmd, &image.full_range(), ImageLayout::Undefined),
            Err(GraphicsError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_swapchain_image_not_destroyed() {
        let context = DummyContext::new();
        let owned = image(&context, 1, 1);
        let raw = owned.raw();
        let borrowed = ImageResource::from_swapchain(
            context.clone(),
            raw,
            owned.descriptor().clone(),
        );
        drop(borrowed);
        assert!(context.is_image_alive(raw));
        drop(owned);
        assert!(!context.is_image_alive(raw));
    }
}
