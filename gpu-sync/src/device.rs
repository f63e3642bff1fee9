//! Graphics device.
//!
//! The [`GraphicsDevice`] is the renderer-facing entry point. It owns the live
//! resource table: write-scheduled buffers, images and presentation surfaces,
//! each addressed by a copyable handle. Command buffers stay with the caller.
//!
//! Destroying a resource never frees it on the spot. It is moved into a command
//! buffer's retained list and released once that submission has completed.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;

use crate::backend::{BufferImageCopy, GpuContext, RawSurface};
use crate::barriers::BarrierBatch;
use crate::command::{CommandBufferResource, CommandRing, CommandState};
use crate::config::DeviceConfig;
use crate::error::{GraphicsError, GraphicsResult};
use crate::resources::{CommitReport, DeviceBuffer, ImageResource, WriteScheduler};
use crate::swapchain::{FrameResources, PresentationSurface, SurfaceConfiguration};
use crate::sync::SubmissionPoint;
use crate::types::{
    AccessFlags, BufferDescriptor, BufferUsage, ImageDescriptor, ImageLayout, PipelineStages,
    ResidencyPattern, SubresourceRange, TextureUsage,
};
use crate::{profile_function, profile_scope};

macro_rules! resource_handle {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u64);

        impl $name {
            /// The raw table index.
            pub fn index(self) -> u64 {
                self.0
            }

            fn unknown(self) -> GraphicsError {
                GraphicsError::UnknownResource(self.to_string())
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{} #{}", $kind, self.0)
            }
        }
    };
}

resource_handle!(
    /// Handle to a write-scheduled buffer.
    BufferHandle,
    "buffer"
);
resource_handle!(
    /// Handle to an image.
    ImageHandle,
    "image"
);
resource_handle!(
    /// Handle to a presentation surface.
    SurfaceHandle,
    "surface"
);

/// Owner of every live resource of one device queue.
///
/// # Example
///
/// ```ignore
/// let mut device = GraphicsDevice::new(context, DeviceConfig::default())?;
/// let mut ring = device.create_command_ring()?;
///
/// let vertices = device.create_buffer(
///     BufferDescriptor::new(BufferUsage::VERTEX, ResidencyPattern::Dynamic),
/// );
/// device.add_write_segment(vertices, bytemuck::cast_slice(&data).to_vec(), 0)?;
///
/// let cmd = ring.next_slot()?;
/// cmd.begin()?;
/// device.commit_writes(cmd, vertices)?;
/// cmd.end()?;
/// cmd.submit()?;
/// ```
pub struct GraphicsDevice {
    context: Arc<dyn GpuContext>,
    config: DeviceConfig,
    buffers: HashMap<BufferHandle, WriteScheduler>,
    images: HashMap<ImageHandle, ImageResource>,
    surfaces: HashMap<SurfaceHandle, PresentationSurface>,
    // One-shot transfers for readbacks, created on first use.
    transfer: Option<CommandBufferResource>,
    next_handle: u64,
}

impl GraphicsDevice {
    /// Create a device on top of a context.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(context: Arc<dyn GpuContext>, config: DeviceConfig) -> GraphicsResult<Self> {
        config.validate()?;
        log::info!(
            "GraphicsDevice: created on {} context ({} frames in flight)",
            context.name(),
            config.frames_in_flight
        );
        Ok(Self {
            context,
            config,
            buffers: HashMap::new(),
            images: HashMap::new(),
            surfaces: HashMap::new(),
            transfer: None,
            next_handle: 1,
        })
    }

    /// The device context.
    pub fn context(&self) -> &Arc<dyn GpuContext> {
        &self.context
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Number of live buffers, images and surfaces.
    pub fn live_resources(&self) -> (usize, usize, usize) {
        (self.buffers.len(), self.images.len(), self.surfaces.len())
    }

    fn allocate_handle(&mut self) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    // Command buffers

    /// Create a standalone command buffer.
    pub fn create_command_buffer(&self, label: Option<&str>) -> GraphicsResult<CommandBufferResource> {
        CommandBufferResource::new(self.context.clone(), label, self.config.wait_timeout)
    }

    /// Create a ring of `frames_in_flight` command buffers.
    pub fn create_command_ring(&self) -> GraphicsResult<CommandRing> {
        CommandRing::new(
            self.context.clone(),
            self.config.frames_in_flight,
            self.config.wait_timeout,
        )
    }

    // Buffers

    /// Register a buffer. Memory is allocated by the first commit.
    pub fn create_buffer(&mut self, descriptor: BufferDescriptor) -> BufferHandle {
        let handle = BufferHandle(self.allocate_handle());
        log::trace!(
            "GraphicsDevice: created buffer {:?} {:?}",
            handle,
            descriptor.label
        );
        let scheduler =
            WriteScheduler::new(self.context.clone(), descriptor, self.config.direct_writes);
        self.buffers.insert(handle, scheduler);
        handle
    }

    /// Queue a write of `data` at byte `offset`.
    pub fn add_write_segment(
        &mut self,
        handle: BufferHandle,
        data: impl Into<Cow<'static, [u8]>>,
        offset: u64,
    ) -> GraphicsResult<()> {
        self.scheduler_mut(handle)?.add_write_segment(data, offset)
    }

    /// Apply every queued write of `handle`, recording into `cmd` as needed.
    pub fn commit_writes(
        &mut self,
        cmd: &mut CommandBufferResource,
        handle: BufferHandle,
    ) -> GraphicsResult<Option<CommitReport>> {
        self.scheduler_mut(handle)?.commit(cmd)
    }

    /// Current capacity in bytes, 0 before the first commit.
    pub fn buffer_capacity(&self, handle: BufferHandle) -> GraphicsResult<u64> {
        Ok(self.scheduler(handle)?.capacity())
    }

    /// The allocation behind `handle`, if one exists yet.
    pub fn buffer(&self, handle: BufferHandle) -> GraphicsResult<Option<&DeviceBuffer>> {
        Ok(self.scheduler(handle)?.buffer())
    }

    /// Record that GPU work completing at `point` reads or writes the buffer.
    ///
    /// Renderer code calls this for draws and dispatches that bind the buffer,
    /// so later writes avoid the direct path while that work is in flight.
    pub fn mark_buffer_used(
        &mut self,
        handle: BufferHandle,
        point: SubmissionPoint,
    ) -> GraphicsResult<()> {
        if let Some(buffer) = self.scheduler_mut(handle)?.buffer_mut() {
            buffer.mark_used(point);
        }
        Ok(())
    }

    /// Read back the whole buffer. Blocks until the copy has completed.
    ///
    /// Writes still pending are not included. Submitted work that uses the
    /// buffer completes before the copy; a use recorded into a command buffer
    /// that was not submitted yet fails with [`GraphicsError::InvalidState`].
    pub fn read_buffer_data(&mut self, handle: BufferHandle) -> GraphicsResult<Vec<u8>> {
        profile_function!();

        let Self {
            context,
            config,
            buffers,
            transfer,
            ..
        } = self;
        let scheduler = buffers
            .get_mut(&handle)
            .ok_or_else(|| handle.unknown())?;
        let usage = scheduler.descriptor().usage;
        let Some(buffer) = scheduler.buffer_mut() else {
            return Ok(Vec::new());
        };
        check_submitted(buffer.last_use())?;

        let cmd = begin_transfer(context, config, transfer)?;
        guard_retirement(cmd, buffer.last_use())?;
        let size = buffer.capacity();
        let readback = DeviceBuffer::new(
            context.clone(),
            size,
            BufferUsage::COPY_DST,
            ResidencyPattern::Readback,
            Some("buffer readback"),
        )?;

        let mut barriers = BarrierBatch::new();
        barriers.add_buffer_barrier(
            buffer.raw(),
            0..size,
            (
                usage.access_scope().0 | PipelineStages::TRANSFER,
                AccessFlags::MEMORY_WRITE,
            ),
            (PipelineStages::TRANSFER, AccessFlags::TRANSFER_READ),
        );
        cmd.pipeline_barrier(&barriers)?;
        cmd.copy_buffer_range(buffer.raw(), 0, readback.raw(), 0..size)?;
        cmd.track_buffer(buffer);

        finish_transfer(cmd)?;
        readback.read(0, size)
    }

    /// Destroy a buffer once `cmd`'s submission has completed.
    ///
    /// Writes still pending are dropped.
    pub fn destroy_buffer(
        &mut self,
        cmd: &mut CommandBufferResource,
        handle: BufferHandle,
    ) -> GraphicsResult<()> {
        if let Some(buffer) = self.scheduler(handle)?.buffer() {
            guard_retirement(cmd, buffer.last_use())?;
        }
        if let Some(mut scheduler) = self.buffers.remove(&handle) {
            if let Some(buffer) = scheduler.take_buffer() {
                cmd.acquire_resource(buffer);
            }
        }
        log::trace!("GraphicsDevice: destroyed buffer {:?}", handle);
        Ok(())
    }

    // Images

    /// Create an image. Every subresource starts out `Undefined`.
    pub fn create_image(&mut self, descriptor: ImageDescriptor) -> GraphicsResult<ImageHandle> {
        let image = ImageResource::new(self.context.clone(), descriptor)?;
        let handle = ImageHandle(self.allocate_handle());
        log::trace!(
            "GraphicsDevice: created image {:?} {:?}",
            handle,
            image.label()
        );
        self.images.insert(handle, image);
        Ok(handle)
    }

    /// The image behind `handle`.
    pub fn image(&self, handle: ImageHandle) -> GraphicsResult<&ImageResource> {
        self.images
            .get(&handle)
            .ok_or_else(|| handle.unknown())
    }

    pub fn image_mut(&mut self, handle: ImageHandle) -> GraphicsResult<&mut ImageResource> {
        self.images
            .get_mut(&handle)
            .ok_or_else(|| handle.unknown())
    }

    /// Upload mip level 0 of one array layer.
    ///
    /// `data` must hold exactly one tightly packed layer. Afterwards the layer
    /// is `ShaderReadOnly` if the image can be sampled, `TransferDst` otherwise.
    pub fn set_image_data(
        &mut self,
        cmd: &mut CommandBufferResource,
        handle: ImageHandle,
        data: &[u8],
        layer: u32,
    ) -> GraphicsResult<()> {
        profile_function!();

        let context = self.context.clone();
        let image = self.image_mut(handle)?;
        let descriptor = image.descriptor().clone();
        if layer >= descriptor.array_layer_count {
            return Err(GraphicsError::InvalidParameter(format!(
                "layer {layer} out of range for image with {} layers",
                descriptor.array_layer_count
            )));
        }
        let expected = descriptor.mip_level_size(0);
        if data.len() as u64 != expected {
            return Err(GraphicsError::InvalidParameter(format!(
                "image data is {} bytes, layer needs {expected}",
                data.len()
            )));
        }

        let label = descriptor.label.as_deref().map(|label| format!("{label} (upload)"));
        let mut staging = DeviceBuffer::new(
            context,
            expected,
            BufferUsage::COPY_SRC,
            ResidencyPattern::Upload,
            label.as_deref(),
        )?;
        staging.write(0, data)?;
        staging.flush(0, expected)?;

        let range = SubresourceRange::mip(0, layer..layer + 1);
        image.transition_layout(cmd, &range, ImageLayout::TransferDst)?;
        {
            profile_scope!("upload_copy");
            cmd.copy_buffer_to_image(
                staging.raw(),
                image.raw(),
                &BufferImageCopy {
                    buffer_offset: 0,
                    mip_level: 0,
                    layers: layer..layer + 1,
                    extent: descriptor.size,
                },
            )?;
        }
        if descriptor.usage.contains(TextureUsage::TEXTURE_BINDING) {
            image.transition_layout(cmd, &range, ImageLayout::ShaderReadOnly)?;
        }

        cmd.track_image(image);
        cmd.track_buffer(&mut staging);
        cmd.acquire_resource(staging);
        Ok(())
    }

    /// Read back mip level 0 of every layer, one layer after another.
    ///
    /// Blocks until the copy has completed. Every subresource touched returns
    /// to its previous layout, except those that were `Undefined`, which stay
    /// in `TransferSrc`. Like [`read_buffer_data`](Self::read_buffer_data),
    /// fails with [`GraphicsError::InvalidState`] while the image is used by
    /// work that was not submitted yet.
    pub fn read_image_data(&mut self, handle: ImageHandle) -> GraphicsResult<Vec<u8>> {
        profile_function!();

        let Self {
            context,
            config,
            images,
            transfer,
            ..
        } = self;
        let image = images
            .get_mut(&handle)
            .ok_or_else(|| handle.unknown())?;
        let descriptor = image.descriptor().clone();
        let layers = descriptor.array_layer_count;
        let size = descriptor.mip_level_size(0) * layers as u64;
        check_submitted(image.last_use())?;

        let cmd = begin_transfer(context, config, transfer)?;
        guard_retirement(cmd, image.last_use())?;
        let readback = DeviceBuffer::new(
            context.clone(),
            size,
            BufferUsage::COPY_DST,
            ResidencyPattern::Readback,
            Some("image readback"),
        )?;

        let range = SubresourceRange::mip(0, 0..layers);
        let previous = image.layout_regions(&range)?;
        image.transition_layout(cmd, &range, ImageLayout::TransferSrc)?;
        cmd.copy_image_to_buffer(
            image.raw(),
            readback.raw(),
            &BufferImageCopy {
                buffer_offset: 0,
                mip_level: 0,
                layers: 0..layers,
                extent: descriptor.size,
            },
        )?;
        for (region, layout) in previous {
            if layout != ImageLayout::Undefined {
                image.transition_layout(cmd, &region, layout)?;
            }
        }
        cmd.track_image(image);

        finish_transfer(cmd)?;
        readback.read(0, size)
    }

    /// Move `range` of an image to `layout`. Returns the number of barriers recorded.
    pub fn transition_layout(
        &mut self,
        cmd: &mut CommandBufferResource,
        handle: ImageHandle,
        range: &SubresourceRange,
        layout: ImageLayout,
    ) -> GraphicsResult<usize> {
        self.image_mut(handle)?.transition_layout(cmd, range, layout)
    }

    /// The layout of `range`, or `None` if its subresources disagree.
    pub fn get_layout(
        &self,
        handle: ImageHandle,
        range: &SubresourceRange,
    ) -> GraphicsResult<Option<ImageLayout>> {
        self.image(handle)?.get_layout(range)
    }

    /// Destroy an image once `cmd`'s submission has completed.
    pub fn destroy_image(
        &mut self,
        cmd: &mut CommandBufferResource,
        handle: ImageHandle,
    ) -> GraphicsResult<()> {
        guard_retirement(cmd, self.image(handle)?.last_use())?;
        if let Some(image) = self.images.remove(&handle) {
            cmd.acquire_resource(image);
        }
        log::trace!("GraphicsDevice: destroyed image {:?}", handle);
        Ok(())
    }

    // Presentation

    /// Take ownership of a native surface.
    pub fn create_surface(
        &mut self,
        surface: RawSurface,
        config: SurfaceConfiguration,
    ) -> SurfaceHandle {
        let handle = SurfaceHandle(self.allocate_handle());
        let surface = PresentationSurface::new(
            self.context.clone(),
            surface,
            config,
            self.config.max_acquire_retries,
        );
        self.surfaces.insert(handle, surface);
        handle
    }

    pub fn surface(&self, handle: SurfaceHandle) -> GraphicsResult<&PresentationSurface> {
        self.surfaces
            .get(&handle)
            .ok_or_else(|| handle.unknown())
    }

    pub fn surface_mut(&mut self, handle: SurfaceHandle) -> GraphicsResult<&mut PresentationSurface> {
        self.surfaces
            .get_mut(&handle)
            .ok_or_else(|| handle.unknown())
    }

    /// Acquire the next frame of a surface.
    pub fn prepare_frame(&mut self, handle: SurfaceHandle) -> GraphicsResult<FrameResources> {
        self.surface_mut(handle)?.prepare_for_render()
    }

    /// Present a frame acquired by [`prepare_frame`](Self::prepare_frame).
    pub fn present_frame(
        &mut self,
        handle: SurfaceHandle,
        frame: FrameResources,
    ) -> GraphicsResult<()> {
        self.surface_mut(handle)?.finish_render(frame)
    }

    /// Destroy a surface. Waits for the device to go idle.
    pub fn destroy_surface(&mut self, handle: SurfaceHandle) -> GraphicsResult<()> {
        let surface = self
            .surfaces
            .remove(&handle)
            .ok_or_else(|| handle.unknown())?;
        drop(surface);
        Ok(())
    }

    // Lifetime

    /// Block until all submitted work has completed, then recycle what it freed.
    pub fn wait_idle(&mut self) -> GraphicsResult<()> {
        self.context.wait_idle()?;
        for surface in self.surfaces.values_mut() {
            surface.try_recycle()?;
        }
        Ok(())
    }

    /// Wait for the device to go idle, then free every resource.
    pub fn shutdown(mut self) -> GraphicsResult<()> {
        self.release_all()
    }

    fn release_all(&mut self) -> GraphicsResult<()> {
        let idle = self.context.wait_idle();
        if idle.is_ok() {
            log::info!(
                "GraphicsDevice: shutting down ({} buffers, {} images, {} surfaces)",
                self.buffers.len(),
                self.images.len(),
                self.surfaces.len()
            );
        }
        self.surfaces.clear();
        self.transfer = None;
        self.images.clear();
        self.buffers.clear();
        idle
    }

    fn scheduler(&self, handle: BufferHandle) -> GraphicsResult<&WriteScheduler> {
        self.buffers
            .get(&handle)
            .ok_or_else(|| handle.unknown())
    }

    fn scheduler_mut(&mut self, handle: BufferHandle) -> GraphicsResult<&mut WriteScheduler> {
        self.buffers
            .get_mut(&handle)
            .ok_or_else(|| handle.unknown())
    }
}

/// Make sure retaining a resource on `cmd` outlives the resource's last use.
///
/// A last use on another timeline becomes a wait of the recording submission.
/// Outside recording there is nothing to attach that wait to, so the use must
/// already be complete.
fn guard_retirement(
    cmd: &mut CommandBufferResource,
    last_use: Option<&SubmissionPoint>,
) -> GraphicsResult<()> {
    let Some(point) = last_use else {
        return Ok(());
    };
    let own_timeline = point.semaphore() == Some(cmd.counter().semaphore());
    if own_timeline || point.is_reached()? {
        return Ok(());
    }
    if cmd.state() == CommandState::Recording {
        cmd.add_wait_timeline(point, PipelineStages::ALL_COMMANDS);
        Ok(())
    } else {
        Err(GraphicsError::InvalidState(format!(
            "resource still in use by {point:?}; destroy it while recording"
        )))
    }
}

/// A blocking readback behind work that was never submitted would not return.
fn check_submitted(last_use: Option<&SubmissionPoint>) -> GraphicsResult<()> {
    match last_use {
        Some(point) if !point.is_submitted() => Err(GraphicsError::InvalidState(format!(
            "readback of a resource used by unsubmitted work {point:?}"
        ))),
        _ => Ok(()),
    }
}

fn begin_transfer<'a>(
    context: &Arc<dyn GpuContext>,
    config: &DeviceConfig,
    transfer: &'a mut Option<CommandBufferResource>,
) -> GraphicsResult<&'a mut CommandBufferResource> {
    if transfer.is_none() {
        *transfer = Some(CommandBufferResource::new(
            context.clone(),
            Some("transfer"),
            config.wait_timeout,
        )?);
    }
    let cmd = transfer
        .as_mut()
        .ok_or_else(|| GraphicsError::Internal("transfer command buffer missing".to_string()))?;
    cmd.prepare_for_recording()?;
    cmd.begin()?;
    Ok(cmd)
}

fn finish_transfer(cmd: &mut CommandBufferResource) -> GraphicsResult<()> {
    cmd.end()?;
    cmd.submit()?;
    cmd.wait()
}

impl Drop for GraphicsDevice {
    fn drop(&mut self) {
        if let Err(err) = self.release_all() {
            log::error!("GraphicsDevice: dropped without idle device: {}", err);
        }
    }
}

impl std::fmt::Debug for GraphicsDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphicsDevice")
            .field("context", &self.context.name())
            .field("config", &self.config)
            .field("buffers", &self.buffers.len())
            .field("images", &self.images.len())
            .field("surfaces", &self.surfaces.len())
            .finish()
    }
}

static_assertions::assert_impl_all!(GraphicsDevice: Send, Sync);

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;
    use crate::backend::dummy::{DummyContext, ExecutionMode};
    use crate::resources::WritePath;
    use crate::types::TextureFormat;

    fn device(context: &Arc<DummyContext>) -> GraphicsDevice {
        GraphicsDevice::new(context.clone(), DeviceConfig::default()).unwrap()
    }

    fn recording(device: &GraphicsDevice) -> CommandBufferResource {
        let mut cmd = device.create_command_buffer(Some("test")).unwrap();
        cmd.begin().unwrap();
        cmd
    }

    fn submit(cmd: &mut CommandBufferResource) {
        cmd.end().unwrap();
        cmd.submit().unwrap();
        cmd.wait().unwrap();
        cmd.prepare_for_recording().unwrap();
        cmd.begin().unwrap();
    }

    #[test]
    fn test_invalid_config_rejected() {
        let context = DummyContext::new();
        let result = GraphicsDevice::new(
            context,
            DeviceConfig::default().with_frames_in_flight(0),
        );
        assert!(matches!(result, Err(GraphicsError::InvalidParameter(_))));
    }

    #[test]
    fn test_buffer_write_and_read_back() {
        let context = DummyContext::new();
        let mut device = device(&context);
        let mut cmd = recording(&device);

        let handle = device.create_buffer(
            BufferDescriptor::new(BufferUsage::STORAGE, ResidencyPattern::Static)
                .with_label("storage"),
        );
        assert_eq!(device.buffer_capacity(handle).unwrap(), 0);
        assert!(device.read_buffer_data(handle).unwrap().is_empty());

        device.add_write_segment(handle, vec![3u8; 16], 8).unwrap();
        let report = device.commit_writes(&mut cmd, handle).unwrap().unwrap();
        assert_eq!(report.path, WritePath::Staged);
        submit(&mut cmd);

        let bytes = device.read_buffer_data(handle).unwrap();
        assert_eq!(bytes.len(), 24);
        assert_eq!(&bytes[8..24], &[3u8; 16]);
        assert!(context.validation_errors().is_empty());
    }

    #[test]
    fn test_unknown_handles() {
        let context = DummyContext::new();
        let mut device = device(&context);
        let mut cmd = recording(&device);

        let buffer = device.create_buffer(BufferDescriptor::new(
            BufferUsage::VERTEX,
            ResidencyPattern::Dynamic,
        ));
        device.destroy_buffer(&mut cmd, buffer).unwrap();

        assert_eq!(
            device.add_write_segment(buffer, vec![1u8], 0),
            Err(GraphicsError::UnknownResource(format!("buffer #{}", buffer.index())))
        );
        assert!(matches!(
            device.commit_writes(&mut cmd, buffer),
            Err(GraphicsError::UnknownResource(_))
        ));
        assert!(matches!(
            device.get_layout(ImageHandle(999), &SubresourceRange::single(0, 0)),
            Err(GraphicsError::UnknownResource(_))
        ));
        assert!(matches!(
            device.prepare_frame(SurfaceHandle(42)),
            Err(GraphicsError::UnknownResource(_))
        ));
    }

    #[test]
    fn test_destroyed_buffer_outlives_submission() {
        let context = DummyContext::with_mode(ExecutionMode::Deferred);
        let mut device = device(&context);
        let mut cmd = recording(&device);

        let handle = device.create_buffer(BufferDescriptor::new(
            BufferUsage::UNIFORM,
            ResidencyPattern::Static,
        ));
        device.add_write_segment(handle, vec![9u8; 64], 0).unwrap();
        device.commit_writes(&mut cmd, handle).unwrap();
        let raw = device.buffer(handle).unwrap().unwrap().raw();

        device.destroy_buffer(&mut cmd, handle).unwrap();
        cmd.end().unwrap();
        cmd.submit().unwrap();
        assert!(context.is_buffer_alive(raw));

        cmd.prepare_for_recording().unwrap();
        assert!(!context.is_buffer_alive(raw));
        assert!(context.validation_errors().is_empty());
    }

    #[test]
    fn test_destroy_busy_buffer_outside_recording() {
        let context = DummyContext::with_mode(ExecutionMode::Deferred);
        let mut device = device(&context);
        let mut writer = recording(&device);

        let handle = device.create_buffer(BufferDescriptor::new(
            BufferUsage::UNIFORM,
            ResidencyPattern::Static,
        ));
        device.add_write_segment(handle, vec![1u8; 4], 0).unwrap();
        device.commit_writes(&mut writer, handle).unwrap();
        writer.end().unwrap();
        writer.submit().unwrap();

        let mut other = device.create_command_buffer(None).unwrap();
        assert!(matches!(
            device.destroy_buffer(&mut other, handle),
            Err(GraphicsError::InvalidState(_))
        ));

        other.begin().unwrap();
        device.destroy_buffer(&mut other, handle).unwrap();
        other.end().unwrap();
        other.submit().unwrap();
        other.wait().unwrap();
        assert!(context.validation_errors().is_empty());
    }

    #[test]
    fn test_image_upload_and_read_back() {
        let context = DummyContext::new();
        let mut device = device(&context);
        let mut cmd = recording(&device);

        let handle = device
            .create_image(
                ImageDescriptor::new_2d(
                    2,
                    2,
                    TextureFormat::Rgba8Unorm,
                    TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST | TextureUsage::COPY_SRC,
                )
                .with_array_layers(2),
            )
            .unwrap();
        let layer0: Vec<u8> = (0..16).collect();
        let layer1: Vec<u8> = (16..32).collect();
        device.set_image_data(&mut cmd, handle, &layer0, 0).unwrap();
        device.set_image_data(&mut cmd, handle, &layer1, 1).unwrap();
        submit(&mut cmd);

        let full = SubresourceRange::full(2, 1);
        assert_eq!(
            device.get_layout(handle, &full).unwrap(),
            Some(ImageLayout::ShaderReadOnly)
        );

        let bytes = device.read_image_data(handle).unwrap();
        assert_eq!(bytes, (0..32).collect::<Vec<u8>>());
        // The prior layout is restored.
        assert_eq!(
            device.get_layout(handle, &full).unwrap(),
            Some(ImageLayout::ShaderReadOnly)
        );
        let raw = device.image(handle).unwrap().raw();
        assert_eq!(
            context.image_layout(raw, 1, 0),
            Some(ImageLayout::ShaderReadOnly)
        );
        assert!(context.validation_errors().is_empty());
    }

    #[test]
    fn test_read_back_leaves_undefined_in_transfer_src() {
        let context = DummyContext::new();
        let mut device = device(&context);
        let mut cmd = recording(&device);

        let handle = device
            .create_image(
                ImageDescriptor::new_2d(
                    1,
                    1,
                    TextureFormat::Rgba8Unorm,
                    TextureUsage::COPY_DST | TextureUsage::COPY_SRC,
                )
                .with_array_layers(2),
            )
            .unwrap();
        device.set_image_data(&mut cmd, handle, &[1, 2, 3, 4], 0).unwrap();
        submit(&mut cmd);

        let bytes = device.read_image_data(handle).unwrap();
        assert_eq!(&bytes[..4], &[1, 2, 3, 4]);
        assert_eq!(
            device
                .get_layout(handle, &SubresourceRange::single(0, 0))
                .unwrap(),
            Some(ImageLayout::TransferDst)
        );
        assert_eq!(
            device
                .get_layout(handle, &SubresourceRange::single(1, 0))
                .unwrap(),
            Some(ImageLayout::TransferSrc)
        );
        assert!(context.validation_errors().is_empty());
    }

    #[test]
    fn test_set_image_data_validates() {
        let context = DummyContext::new();
        let mut device = device(&context);
        let mut cmd = recording(&device);

        let handle = device
            .create_image(ImageDescriptor::new_2d(
                2,
                2,
                TextureFormat::R8Unorm,
                TextureUsage::COPY_DST,
            ))
            .unwrap();
        assert!(matches!(
            device.set_image_data(&mut cmd, handle, &[0u8; 3], 0),
            Err(GraphicsError::InvalidParameter(_))
        ));
        assert!(matches!(
            device.set_image_data(&mut cmd, handle, &[0u8; 4], 1),
            Err(GraphicsError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_destroy_image_is_deferred() {
        let context = DummyContext::with_mode(ExecutionMode::Deferred);
        let mut device = device(&context);
        let mut cmd = recording(&device);

        let handle = device
            .create_image(ImageDescriptor::new_2d(
                4,
                4,
                TextureFormat::Rgba8Unorm,
                TextureUsage::RENDER_ATTACHMENT,
            ))
            .unwrap();
        let raw = device.image(handle).unwrap().raw();
        device
            .transition_layout(
                &mut cmd,
                handle,
                &SubresourceRange::full(1, 1),
                ImageLayout::ColorAttachment,
            )
            .unwrap();
        device.destroy_image(&mut cmd, handle).unwrap();
        cmd.end().unwrap();
        cmd.submit().unwrap();
        assert!(context.is_image_alive(raw));

        cmd.wait().unwrap();
        cmd.prepare_for_recording().unwrap();
        assert!(!context.is_image_alive(raw));
        assert!(device.image(handle).is_err());
    }

    #[test]
    fn test_shutdown_frees_everything() {
        let context = DummyContext::with_mode(ExecutionMode::Deferred);
        let mut device = device(&context);
        let mut ring = device.create_command_ring().unwrap();
        assert_eq!(ring.slot_count(), 2);

        let buffer = device.create_buffer(BufferDescriptor::new(
            BufferUsage::VERTEX,
            ResidencyPattern::Static,
        ));
        device.add_write_segment(buffer, vec![0u8; 32], 0).unwrap();
        let cmd = ring.next_slot().unwrap();
        cmd.begin().unwrap();
        device.commit_writes(cmd, buffer).unwrap();
        cmd.end().unwrap();
        cmd.submit().unwrap();

        let raw_surface = context.create_surface(64, 64);
        device.create_surface(raw_surface, SurfaceConfiguration::new(64, 64));

        device.shutdown().unwrap();
        drop(ring);

        let stats = context.stats();
        assert_eq!(stats.live_buffers, 0);
        assert_eq!(stats.live_images, 0);
        assert!(!context.is_surface_alive(raw_surface));
        assert!(context.validation_errors().is_empty());
    }
}
