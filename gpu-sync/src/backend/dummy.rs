//! Software device context for testing and headless runs.
//!
//! [`DummyContext`] keeps buffer and image memory in byte vectors and really
//! executes recorded copies and barriers when a submission runs, so tests can
//! check what a GPU would observe. It also acts as a small validation layer:
//! misuse that a real driver would reject (destroying an object a pending
//! submission still references, copying into an image in the wrong layout,
//! resetting a command buffer that is still executing) is recorded in
//! [`DummyContext::validation_errors`].
//!
//! Submissions run immediately by default. In [`ExecutionMode::Deferred`] they
//! queue up and run only when something waits on them or the test calls
//! [`DummyContext::complete_all`], which makes asynchronous completion
//! observable.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::barriers::BarrierBatch;
use crate::error::{GraphicsError, GraphicsResult};
use crate::swapchain::PresentMode;
use crate::types::{
    BufferUsage, Extent3d, ImageDescriptor, ImageLayout, PipelineStages, ResidencyPattern,
    TextureFormat, TextureUsage,
};

use super::{
    AcquireOutcome, BufferCopy, BufferImageCopy, GpuContext, PresentOutcome, PresentRequest,
    QueueSubmission, RawBuffer, RawBufferDescriptor, RawCommandBuffer, RawFence, RawImage,
    RawSemaphore, RawSurface, RawSwapchain, SemaphoreSignal, SemaphoreWait, SurfaceCapabilities,
    SwapchainDescriptor, SwapchainImages, WaitStatus,
};

const DEVICE_ADDRESS_BASE: u64 = 0x1_0000_0000;

/// When submitted work executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// Work executes inside `submit` and `present`.
    #[default]
    Immediate,
    /// Work executes when waited on or explicitly completed.
    Deferred,
}

/// Object counts and activity counters of a [`DummyContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DummyStats {
    pub live_buffers: usize,
    pub live_images: usize,
    pub live_command_buffers: usize,
    pub live_semaphores: usize,
    pub live_fences: usize,
    pub live_swapchains: usize,
    pub buffers_created: usize,
    pub images_created: usize,
    pub swapchains_created: usize,
    pub submissions: usize,
    pub presents: usize,
    pub barrier_calls: usize,
    pub buffer_barriers: usize,
    pub image_barriers: usize,
}

/// A command as recorded into a dummy command buffer.
#[derive(Debug, Clone)]
pub enum RecordedCommand {
    CopyBuffer {
        src: RawBuffer,
        dst: RawBuffer,
        regions: Vec<BufferCopy>,
    },
    CopyBufferToImage {
        src: RawBuffer,
        dst: RawImage,
        region: BufferImageCopy,
    },
    CopyImageToBuffer {
        src: RawImage,
        dst: RawBuffer,
        region: BufferImageCopy,
    },
    Barrier(BarrierBatch),
}

impl RecordedCommand {
    fn references_buffer(&self, buffer: RawBuffer) -> bool {
        match self {
            Self::CopyBuffer { src, dst, .. } => *src == buffer || *dst == buffer,
            Self::CopyBufferToImage { src, .. } => *src == buffer,
            Self::CopyImageToBuffer { dst, .. } => *dst == buffer,
            Self::Barrier(batch) => batch.buffer_barriers().iter().any(|b| b.buffer == buffer),
        }
    }

    fn references_image(&self, image: RawImage) -> bool {
        match self {
            Self::CopyBuffer { .. } => false,
            Self::CopyBufferToImage { dst, .. } => *dst == image,
            Self::CopyImageToBuffer { src, .. } => *src == image,
            Self::Barrier(batch) => batch.image_barriers().iter().any(|b| b.image == image),
        }
    }
}

struct BufferState {
    data: Vec<u8>,
    pattern: ResidencyPattern,
    usage: BufferUsage,
}

struct ImageState {
    descriptor: ImageDescriptor,
    /// Texel data per (layer, mip).
    data: HashMap<(u32, u32), Vec<u8>>,
    /// Executed layout per subresource, layer-major.
    layouts: Vec<ImageLayout>,
    swapchain: Option<RawSwapchain>,
}

impl ImageState {
    fn new(descriptor: ImageDescriptor, swapchain: Option<RawSwapchain>) -> Self {
        let mut data = HashMap::new();
        for layer in 0..descriptor.array_layer_count {
            for mip in 0..descriptor.mip_level_count {
                data.insert(
                    (layer, mip),
                    vec![0; descriptor.mip_level_size(mip) as usize],
                );
            }
        }
        let count = (descriptor.array_layer_count * descriptor.mip_level_count) as usize;
        Self {
            descriptor,
            data,
            layouts: vec![ImageLayout::Undefined; count],
            swapchain,
        }
    }

    fn layout_index(&self, layer: u32, mip: u32) -> usize {
        (layer * self.descriptor.mip_level_count + mip) as usize
    }
}

#[derive(Default)]
struct CommandBufferState {
    commands: Vec<RecordedCommand>,
    recording: bool,
}

enum SemaphoreState {
    Timeline(u64),
    Binary { signaled: bool },
}

struct SwapchainState {
    surface: RawSurface,
    extent: Extent3d,
    images: Vec<RawImage>,
    next_image: u32,
    retired: bool,
}

struct SurfaceState {
    extent: Extent3d,
}

struct PendingWork {
    command_buffers: Vec<RawCommandBuffer>,
    commands: Vec<RecordedCommand>,
    waits: Vec<SemaphoreWait>,
    signals: Vec<SemaphoreSignal>,
    fence: Option<RawFence>,
    present: Option<(RawSwapchain, u32)>,
}

struct State {
    next_handle: u64,
    mode: ExecutionMode,
    stalled: bool,
    device_lost: bool,
    fail_allocations: bool,
    acquire_out_of_date: u32,
    present_out_of_date: u32,
    present_error: Option<GraphicsError>,
    buffers: HashMap<u64, BufferState>,
    images: HashMap<u64, ImageState>,
    command_buffers: HashMap<u64, CommandBufferState>,
    semaphores: HashMap<u64, SemaphoreState>,
    fences: HashMap<u64, bool>,
    swapchains: HashMap<u64, SwapchainState>,
    surfaces: HashMap<u64, SurfaceState>,
    pending: VecDeque<PendingWork>,
    validation_errors: Vec<String>,
    stats: DummyStats,
}

impl State {
    fn new(mode: ExecutionMode) -> Self {
        Self {
            next_handle: 1,
            mode,
            stalled: false,
            device_lost: false,
            fail_allocations: false,
            acquire_out_of_date: 0,
            present_out_of_date: 0,
            present_error: None,
            buffers: HashMap::new(),
            images: HashMap::new(),
            command_buffers: HashMap::new(),
            semaphores: HashMap::new(),
            fences: HashMap::new(),
            swapchains: HashMap::new(),
            surfaces: HashMap::new(),
            pending: VecDeque::new(),
            validation_errors: Vec::new(),
            stats: DummyStats::default(),
        }
    }

    fn allocate_handle(&mut self) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    fn validation_error(&mut self, message: String) {
        log::error!("DummyContext validation: {message}");
        self.validation_errors.push(message);
    }

    fn check_device(&self) -> GraphicsResult<()> {
        if self.device_lost {
            Err(GraphicsError::DeviceLost)
        } else {
            Ok(())
        }
    }

    fn check_allocation(&self, what: &str) -> GraphicsResult<()> {
        if self.fail_allocations {
            Err(GraphicsError::AllocationFailed(format!(
                "dummy allocation failure injected for {what}"
            )))
        } else {
            Ok(())
        }
    }

    fn recording_buffer(&mut self, command_buffer: RawCommandBuffer) -> Option<&mut Vec<RecordedCommand>> {
        let recording = self
            .command_buffers
            .get(&command_buffer.raw())
            .is_some_and(|state| state.recording);
        if !recording {
            self.validation_error(format!(
                "command recorded into {command_buffer:?} outside begin/end"
            ));
            return None;
        }
        self.command_buffers
            .get_mut(&command_buffer.raw())
            .map(|state| &mut state.commands)
    }

    fn pending_uses_buffer(&self, buffer: RawBuffer) -> bool {
        self.pending
            .iter()
            .flat_map(|work| work.commands.iter())
            .any(|command| command.references_buffer(buffer))
    }

    fn pending_uses_image(&self, image: RawImage) -> bool {
        self.pending.iter().any(|work| {
            work.commands.iter().any(|command| command.references_image(image))
                || work.present.is_some_and(|(swapchain, index)| {
                    self.swapchains
                        .get(&swapchain.raw())
                        .and_then(|state| state.images.get(index as usize))
                        == Some(&image)
                })
        })
    }

    fn pending_uses_command_buffer(&self, command_buffer: RawCommandBuffer) -> bool {
        self.pending
            .iter()
            .any(|work| work.command_buffers.contains(&command_buffer))
    }

    fn pending_uses_semaphore(&self, semaphore: RawSemaphore) -> bool {
        self.pending.iter().any(|work| {
            work.waits.iter().any(|w| w.semaphore == semaphore)
                || work.signals.iter().any(|s| s.semaphore == semaphore)
        })
    }

    fn timeline_value(&self, semaphore: RawSemaphore) -> GraphicsResult<u64> {
        match self.semaphores.get(&semaphore.raw()) {
            Some(SemaphoreState::Timeline(value)) => Ok(*value),
            Some(SemaphoreState::Binary { .. }) => Err(GraphicsError::InvalidParameter(format!(
                "{semaphore:?} is not a timeline semaphore"
            ))),
            None => Err(GraphicsError::InvalidParameter(format!(
                "unknown semaphore {semaphore:?}"
            ))),
        }
    }

    /// Execute the oldest pending work. Returns false if nothing was pending.
    fn execute_next(&mut self) -> bool {
        let Some(work) = self.pending.pop_front() else {
            return false;
        };

        for wait in &work.waits {
            self.consume_wait(wait);
        }
        for command in &work.commands {
            self.execute_command(command);
        }
        for signal in &work.signals {
            self.apply_signal(signal);
        }
        if let Some((swapchain, index)) = work.present {
            self.check_presented_layout(swapchain, index);
        }
        if let Some(fence) = work.fence {
            match self.fences.get_mut(&fence.raw()) {
                Some(signaled) if *signaled => {
                    self.validation_error(format!("{fence:?} signaled while already signaled"));
                }
                Some(signaled) => *signaled = true,
                None => self.validation_error(format!("signal of destroyed {fence:?}")),
            }
        }
        true
    }

    fn execute_all(&mut self) -> usize {
        let mut executed = 0;
        while self.execute_next() {
            executed += 1;
        }
        executed
    }

    fn consume_wait(&mut self, wait: &SemaphoreWait) {
        let message = match (self.semaphores.get_mut(&wait.semaphore.raw()), wait.value) {
            (Some(SemaphoreState::Binary { signaled }), None) => {
                if *signaled {
                    *signaled = false;
                    return;
                }
                format!("wait on unsignaled binary {:?}", wait.semaphore)
            }
            (Some(SemaphoreState::Timeline(current)), Some(value)) => {
                if *current >= value {
                    return;
                }
                format!(
                    "wait on {:?} for {value} can never be satisfied (at {current})",
                    wait.semaphore
                )
            }
            (Some(_), _) => format!("semaphore kind mismatch in wait on {:?}", wait.semaphore),
            (None, _) => format!("wait on destroyed {:?}", wait.semaphore),
        };
        self.validation_error(message);
    }

    fn apply_signal(&mut self, signal: &SemaphoreSignal) {
        let message = match (self.semaphores.get_mut(&signal.semaphore.raw()), signal.value) {
            (Some(SemaphoreState::Binary { signaled }), None) => {
                if !*signaled {
                    *signaled = true;
                    return;
                }
                format!("signal of already signaled binary {:?}", signal.semaphore)
            }
            (Some(SemaphoreState::Timeline(current)), Some(value)) => {
                if value > *current {
                    *current = value;
                    return;
                }
                format!(
                    "timeline {:?} signaled with {value}, not above {current}",
                    signal.semaphore
                )
            }
            (Some(_), _) => format!("semaphore kind mismatch in signal of {:?}", signal.semaphore),
            (None, _) => format!("signal of destroyed {:?}", signal.semaphore),
        };
        self.validation_error(message);
    }

    fn execute_command(&mut self, command: &RecordedCommand) {
        match command {
            RecordedCommand::CopyBuffer { src, dst, regions } => {
                for region in regions {
                    self.copy_buffer_region(*src, *dst, region);
                }
            }
            RecordedCommand::CopyBufferToImage { src, dst, region } => {
                self.copy_buffer_to_image(*src, *dst, region);
            }
            RecordedCommand::CopyImageToBuffer { src, dst, region } => {
                self.copy_image_to_buffer(*src, *dst, region);
            }
            RecordedCommand::Barrier(batch) => self.apply_barrier(batch),
        }
    }

    fn copy_buffer_region(&mut self, src: RawBuffer, dst: RawBuffer, region: &BufferCopy) {
        let src_range = region.src_offset as usize..(region.src_offset + region.size) as usize;
        let bytes = match self.buffers.get(&src.raw()) {
            Some(state) if src_range.end <= state.data.len() => state.data[src_range].to_vec(),
            Some(_) => {
                return self.validation_error(format!("copy reads past the end of {src:?}"));
            }
            None => return self.validation_error(format!("copy from destroyed {src:?}")),
        };

        let dst_start = region.dst_offset as usize;
        match self.buffers.get_mut(&dst.raw()) {
            Some(state) if dst_start + bytes.len() <= state.data.len() => {
                state.data[dst_start..dst_start + bytes.len()].copy_from_slice(&bytes);
            }
            Some(_) => self.validation_error(format!("copy writes past the end of {dst:?}")),
            None => self.validation_error(format!("copy into destroyed {dst:?}")),
        }
    }

    fn check_copy_layouts(
        &mut self,
        image: RawImage,
        region: &BufferImageCopy,
        expected: ImageLayout,
    ) -> bool {
        let Some(state) = self.images.get(&image.raw()) else {
            self.validation_error(format!("copy touches destroyed {image:?}"));
            return false;
        };
        if region.layers.end > state.descriptor.array_layer_count
            || region.mip_level >= state.descriptor.mip_level_count
        {
            self.validation_error(format!("copy region outside {image:?}"));
            return false;
        }
        let wrong = region.layers.clone().find(|layer| {
            state.layouts[state.layout_index(*layer, region.mip_level)] != expected
        });
        if let Some(layer) = wrong {
            self.validation_error(format!(
                "copy with {image:?} layer {layer} mip {} not in {expected:?}",
                region.mip_level
            ));
            return false;
        }
        true
    }

    fn copy_buffer_to_image(&mut self, src: RawBuffer, dst: RawImage, region: &BufferImageCopy) {
        if !self.check_copy_layouts(dst, region, ImageLayout::TransferDst) {
            return;
        }
        let Some(buffer) = self.buffers.get(&src.raw()) else {
            return self.validation_error(format!("copy from destroyed {src:?}"));
        };
        let Some(image) = self.images.get(&dst.raw()) else {
            return;
        };
        let layer_size = image.descriptor.mip_level_size(region.mip_level) as usize;
        let total = layer_size * region.layers.len();
        let start = region.buffer_offset as usize;
        if start + total > buffer.data.len() {
            return self.validation_error(format!("copy reads past the end of {src:?}"));
        }

        let bytes = buffer.data[start..start + total].to_vec();
        if let Some(image) = self.images.get_mut(&dst.raw()) {
            for (i, layer) in region.layers.clone().enumerate() {
                let chunk = &bytes[i * layer_size..(i + 1) * layer_size];
                if let Some(texels) = image.data.get_mut(&(layer, region.mip_level)) {
                    texels.copy_from_slice(chunk);
                }
            }
        }
    }

    fn copy_image_to_buffer(&mut self, src: RawImage, dst: RawBuffer, region: &BufferImageCopy) {
        if !self.check_copy_layouts(src, region, ImageLayout::TransferSrc) {
            return;
        }
        let Some(image) = self.images.get(&src.raw()) else {
            return;
        };
        let mut bytes = Vec::new();
        for layer in region.layers.clone() {
            if let Some(texels) = image.data.get(&(layer, region.mip_level)) {
                bytes.extend_from_slice(texels);
            }
        }

        let start = region.buffer_offset as usize;
        match self.buffers.get_mut(&dst.raw()) {
            Some(buffer) if start + bytes.len() <= buffer.data.len() => {
                buffer.data[start..start + bytes.len()].copy_from_slice(&bytes);
            }
            Some(_) => self.validation_error(format!("copy writes past the end of {dst:?}")),
            None => self.validation_error(format!("copy into destroyed {dst:?}")),
        }
    }

    fn apply_barrier(&mut self, batch: &BarrierBatch) {
        for barrier in batch.image_barriers() {
            let mut mismatches = Vec::new();
            let Some(image) = self.images.get_mut(&barrier.image.raw()) else {
                self.validation_error(format!("barrier on destroyed {:?}", barrier.image));
                continue;
            };
            for layer in barrier.range.layers.clone() {
                for mip in barrier.range.mips.clone() {
                    let index = image.layout_index(layer, mip);
                    let Some(current) = image.layouts.get_mut(index) else {
                        mismatches.push(format!("barrier outside {:?}", barrier.image));
                        continue;
                    };
                    if barrier.old_layout != ImageLayout::Undefined
                        && *current != barrier.old_layout
                    {
                        mismatches.push(format!(
                            "{:?} layer {layer} mip {mip} is {:?}, barrier assumed {:?}",
                            barrier.image, current, barrier.old_layout
                        ));
                    }
                    *current = barrier.new_layout;
                }
            }
            for message in mismatches {
                self.validation_error(message);
            }
        }
    }

    fn check_presented_layout(&mut self, swapchain: RawSwapchain, index: u32) {
        let image = self
            .swapchains
            .get(&swapchain.raw())
            .and_then(|state| state.images.get(index as usize).copied());
        let Some(image) = image else {
            return self.validation_error(format!("present of unknown image {index} of {swapchain:?}"));
        };
        let presentable = self
            .images
            .get(&image.raw())
            .is_some_and(|state| state.layouts.iter().all(|l| *l == ImageLayout::PresentSrc));
        if !presentable {
            self.validation_error(format!("presented {image:?} is not in PresentSrc"));
        }
    }
}

/// Software device context.
pub struct DummyContext {
    state: Mutex<State>,
}

impl DummyContext {
    /// Create a context that executes work immediately.
    pub fn new() -> Arc<Self> {
        Self::with_mode(ExecutionMode::Immediate)
    }

    /// Create a context with the given execution mode.
    pub fn with_mode(mode: ExecutionMode) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State::new(mode)),
        })
    }

    /// Change the execution mode. Switching to immediate runs pending work.
    pub fn set_mode(&self, mode: ExecutionMode) {
        let mut state = self.state.lock();
        state.mode = mode;
        if mode == ExecutionMode::Immediate && !state.stalled {
            state.execute_all();
        }
    }

    /// Execute all pending work. Returns the number of submissions executed.
    pub fn complete_all(&self) -> usize {
        self.state.lock().execute_all()
    }

    /// Execute the oldest pending submission. Returns false if none was pending.
    pub fn complete_next(&self) -> bool {
        self.state.lock().execute_next()
    }

    /// Number of submissions and presents waiting to execute.
    pub fn pending_submissions(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// A stalled GPU never makes progress: waits time out instead of executing work.
    pub fn set_stalled(&self, stalled: bool) {
        self.state.lock().stalled = stalled;
    }

    /// Simulate device loss. Every later wait and submit fails with `DeviceLost`.
    pub fn lose_device(&self) {
        log::warn!("DummyContext: simulating device loss");
        self.state.lock().device_lost = true;
    }

    /// Make every buffer and image allocation fail.
    pub fn set_fail_allocations(&self, fail: bool) {
        self.state.lock().fail_allocations = fail;
    }

    /// Create a native surface of the given size.
    pub fn create_surface(&self, width: u32, height: u32) -> RawSurface {
        let mut state = self.state.lock();
        let handle = state.allocate_handle();
        state.surfaces.insert(
            handle,
            SurfaceState {
                extent: Extent3d::new_2d(width, height),
            },
        );
        RawSurface::from_raw(handle)
    }

    /// Resize a surface, as a window resize would.
    ///
    /// Swapchains of a different size report "out of date" from then on.
    pub fn resize_surface(&self, surface: RawSurface, width: u32, height: u32) {
        if let Some(state) = self.state.lock().surfaces.get_mut(&surface.raw()) {
            state.extent = Extent3d::new_2d(width, height);
        }
    }

    /// Make the next `count` acquires report "out of date".
    pub fn inject_acquire_out_of_date(&self, count: u32) {
        self.state.lock().acquire_out_of_date += count;
    }

    /// Make the next `count` presents report "out of date".
    pub fn inject_present_out_of_date(&self, count: u32) {
        self.state.lock().present_out_of_date += count;
    }

    /// Make the next present fail with `error` before anything is queued.
    pub fn inject_present_error(&self, error: GraphicsError) {
        self.state.lock().present_error = Some(error);
    }

    /// Current contents of a buffer, as the device sees them.
    pub fn buffer_contents(&self, buffer: RawBuffer) -> Option<Vec<u8>> {
        self.state
            .lock()
            .buffers
            .get(&buffer.raw())
            .map(|state| state.data.clone())
    }

    /// Size in bytes of a live buffer.
    pub fn buffer_size(&self, buffer: RawBuffer) -> Option<u64> {
        self.state
            .lock()
            .buffers
            .get(&buffer.raw())
            .map(|state| state.data.len() as u64)
    }

    /// Current texels of one subresource.
    pub fn image_contents(&self, image: RawImage, layer: u32, mip: u32) -> Option<Vec<u8>> {
        self.state
            .lock()
            .images
            .get(&image.raw())
            .and_then(|state| state.data.get(&(layer, mip)).cloned())
    }

    /// Layout of one subresource after all executed barriers.
    pub fn image_layout(&self, image: RawImage, layer: u32, mip: u32) -> Option<ImageLayout> {
        let state = self.state.lock();
        let image = state.images.get(&image.raw())?;
        if layer >= image.descriptor.array_layer_count || mip >= image.descriptor.mip_level_count {
            return None;
        }
        image.layouts.get(image.layout_index(layer, mip)).copied()
    }

    /// Returns true if the buffer has not been destroyed.
    pub fn is_buffer_alive(&self, buffer: RawBuffer) -> bool {
        self.state.lock().buffers.contains_key(&buffer.raw())
    }

    /// Returns true if the image has not been destroyed.
    pub fn is_image_alive(&self, image: RawImage) -> bool {
        self.state.lock().images.contains_key(&image.raw())
    }

    /// Returns true if the swapchain has not been destroyed.
    pub fn is_swapchain_alive(&self, swapchain: RawSwapchain) -> bool {
        self.state.lock().swapchains.contains_key(&swapchain.raw())
    }

    /// Returns true if the surface has not been destroyed.
    pub fn is_surface_alive(&self, surface: RawSurface) -> bool {
        self.state.lock().surfaces.contains_key(&surface.raw())
    }

    /// Commands currently recorded into a command buffer.
    pub fn recorded_commands(&self, command_buffer: RawCommandBuffer) -> Vec<RecordedCommand> {
        self.state
            .lock()
            .command_buffers
            .get(&command_buffer.raw())
            .map(|state| state.commands.clone())
            .unwrap_or_default()
    }

    /// Everything the validation layer has flagged so far.
    pub fn validation_errors(&self) -> Vec<String> {
        self.state.lock().validation_errors.clone()
    }

    /// Object counts and activity counters.
    pub fn stats(&self) -> DummyStats {
        let state = self.state.lock();
        DummyStats {
            live_buffers: state.buffers.len(),
            live_images: state.images.len(),
            live_command_buffers: state.command_buffers.len(),
            live_semaphores: state.semaphores.len(),
            live_fences: state.fences.len(),
            live_swapchains: state.swapchains.len(),
            ..state.stats
        }
    }

    fn enqueue(&self, state: &mut State, work: PendingWork) {
        state.pending.push_back(work);
        if state.mode == ExecutionMode::Immediate && !state.stalled {
            state.execute_all();
        }
    }
}

impl GpuContext for DummyContext {
    fn name(&self) -> &'static str {
        "Dummy"
    }

    fn create_buffer(&self, descriptor: &RawBufferDescriptor<'_>) -> GraphicsResult<RawBuffer> {
        let mut state = self.state.lock();
        state.check_allocation("buffer")?;
        let handle = state.allocate_handle();
        log::trace!(
            "DummyContext: creating buffer {:?} #{handle} (size: {}, {:?})",
            descriptor.label,
            descriptor.size,
            descriptor.pattern
        );
        state.buffers.insert(
            handle,
            BufferState {
                data: vec![0; descriptor.size as usize],
                pattern: descriptor.pattern,
                usage: descriptor.usage,
            },
        );
        state.stats.buffers_created += 1;
        Ok(RawBuffer::from_raw(handle))
    }

    fn destroy_buffer(&self, buffer: RawBuffer) {
        let mut state = self.state.lock();
        if state.pending_uses_buffer(buffer) {
            state.validation_error(format!("{buffer:?} destroyed while a pending submission uses it"));
        }
        if state.buffers.remove(&buffer.raw()).is_some() {
            log::trace!("DummyContext: destroyed {buffer:?}");
        }
    }

    fn write_mapped(&self, buffer: RawBuffer, offset: u64, data: &[u8]) -> GraphicsResult<()> {
        let mut state = self.state.lock();
        let target = state
            .buffers
            .get_mut(&buffer.raw())
            .ok_or_else(|| GraphicsError::InvalidParameter(format!("unknown {buffer:?}")))?;
        if !target.pattern.is_host_mappable() {
            return Err(GraphicsError::InvalidParameter(format!(
                "{buffer:?} is not host mappable"
            )));
        }
        let start = offset as usize;
        let end = start + data.len();
        if end > target.data.len() {
            return Err(GraphicsError::InvalidParameter(format!(
                "mapped write [{start}, {end}) past the end of {buffer:?}"
            )));
        }
        target.data[start..end].copy_from_slice(data);
        Ok(())
    }

    fn read_mapped(&self, buffer: RawBuffer, offset: u64, size: u64) -> GraphicsResult<Vec<u8>> {
        let state = self.state.lock();
        let source = state
            .buffers
            .get(&buffer.raw())
            .ok_or_else(|| GraphicsError::InvalidParameter(format!("unknown {buffer:?}")))?;
        if !source.pattern.is_host_mappable() {
            return Err(GraphicsError::InvalidParameter(format!(
                "{buffer:?} is not host mappable"
            )));
        }
        let start = offset as usize;
        let end = start + size as usize;
        source
            .data
            .get(start..end)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| {
                GraphicsError::InvalidParameter(format!(
                    "mapped read [{start}, {end}) past the end of {buffer:?}"
                ))
            })
    }

    fn flush_mapped(&self, buffer: RawBuffer, offset: u64, size: u64) -> GraphicsResult<()> {
        let state = self.state.lock();
        let target = state
            .buffers
            .get(&buffer.raw())
            .ok_or_else(|| GraphicsError::InvalidParameter(format!("unknown {buffer:?}")))?;
        if offset + size > target.data.len() as u64 {
            return Err(GraphicsError::InvalidParameter(format!(
                "flush past the end of {buffer:?}"
            )));
        }
        Ok(())
    }

    fn buffer_device_address(&self, buffer: RawBuffer) -> Option<u64> {
        let state = self.state.lock();
        let target = state.buffers.get(&buffer.raw())?;
        target
            .usage
            .contains(BufferUsage::DEVICE_ADDRESS)
            .then(|| DEVICE_ADDRESS_BASE + (buffer.raw() << 20))
    }

    fn create_image(&self, descriptor: &ImageDescriptor) -> GraphicsResult<RawImage> {
        descriptor.validate()?;
        let mut state = self.state.lock();
        state.check_allocation("image")?;
        let handle = state.allocate_handle();
        log::trace!(
            "DummyContext: creating image {:?} #{handle} ({}x{}x{}, {} mips, {} layers)",
            descriptor.label,
            descriptor.size.width,
            descriptor.size.height,
            descriptor.size.depth,
            descriptor.mip_level_count,
            descriptor.array_layer_count
        );
        state
            .images
            .insert(handle, ImageState::new(descriptor.clone(), None));
        state.stats.images_created += 1;
        Ok(RawImage::from_raw(handle))
    }

    fn destroy_image(&self, image: RawImage) {
        let mut state = self.state.lock();
        if state
            .images
            .get(&image.raw())
            .is_some_and(|state| state.swapchain.is_some())
        {
            return state.validation_error(format!("{image:?} is owned by a swapchain"));
        }
        if state.pending_uses_image(image) {
            state.validation_error(format!("{image:?} destroyed while a pending submission uses it"));
        }
        if state.images.remove(&image.raw()).is_some() {
            log::trace!("DummyContext: destroyed {image:?}");
        }
    }

    fn allocate_command_buffer(&self) -> GraphicsResult<RawCommandBuffer> {
        let mut state = self.state.lock();
        let handle = state.allocate_handle();
        state
            .command_buffers
            .insert(handle, CommandBufferState::default());
        Ok(RawCommandBuffer::from_raw(handle))
    }

    fn free_command_buffer(&self, command_buffer: RawCommandBuffer) {
        let mut state = self.state.lock();
        if state.pending_uses_command_buffer(command_buffer) {
            state.validation_error(format!("{command_buffer:?} freed while pending"));
        }
        state.command_buffers.remove(&command_buffer.raw());
    }

    fn begin_command_buffer(&self, command_buffer: RawCommandBuffer) -> GraphicsResult<()> {
        let mut state = self.state.lock();
        if state.pending_uses_command_buffer(command_buffer) {
            state.validation_error(format!("{command_buffer:?} reset while pending"));
        }
        let target = state
            .command_buffers
            .get_mut(&command_buffer.raw())
            .ok_or_else(|| GraphicsError::InvalidParameter(format!("unknown {command_buffer:?}")))?;
        target.commands.clear();
        target.recording = true;
        Ok(())
    }

    fn end_command_buffer(&self, command_buffer: RawCommandBuffer) -> GraphicsResult<()> {
        let mut state = self.state.lock();
        let target = state
            .command_buffers
            .get_mut(&command_buffer.raw())
            .ok_or_else(|| GraphicsError::InvalidParameter(format!("unknown {command_buffer:?}")))?;
        if !target.recording {
            return Err(GraphicsError::InvalidState(format!(
                "{command_buffer:?} ended without begin"
            )));
        }
        target.recording = false;
        Ok(())
    }

    fn cmd_copy_buffer(
        &self,
        command_buffer: RawCommandBuffer,
        src: RawBuffer,
        dst: RawBuffer,
        regions: &[BufferCopy],
    ) {
        let mut state = self.state.lock();
        if let Some(commands) = state.recording_buffer(command_buffer) {
            commands.push(RecordedCommand::CopyBuffer {
                src,
                dst,
                regions: regions.to_vec(),
            });
        }
    }

    fn cmd_copy_buffer_to_image(
        &self,
        command_buffer: RawCommandBuffer,
        src: RawBuffer,
        dst: RawImage,
        region: &BufferImageCopy,
    ) {
        let mut state = self.state.lock();
        if let Some(commands) = state.recording_buffer(command_buffer) {
            commands.push(RecordedCommand::CopyBufferToImage {
                src,
                dst,
                region: region.clone(),
            });
        }
    }

    fn cmd_copy_image_to_buffer(
        &self,
        command_buffer: RawCommandBuffer,
        src: RawImage,
        dst: RawBuffer,
        region: &BufferImageCopy,
    ) {
        let mut state = self.state.lock();
        if let Some(commands) = state.recording_buffer(command_buffer) {
            commands.push(RecordedCommand::CopyImageToBuffer {
                src,
                dst,
                region: region.clone(),
            });
        }
    }

    fn cmd_pipeline_barrier(&self, command_buffer: RawCommandBuffer, batch: &BarrierBatch) {
        let mut state = self.state.lock();
        let recorded = match state.recording_buffer(command_buffer) {
            Some(commands) => {
                commands.push(RecordedCommand::Barrier(batch.clone()));
                true
            }
            None => false,
        };
        if recorded {
            state.stats.barrier_calls += 1;
            state.stats.buffer_barriers += batch.buffer_barriers().len();
            state.stats.image_barriers += batch.image_barriers().len();
        }
    }

    fn create_timeline_semaphore(&self, initial_value: u64) -> GraphicsResult<RawSemaphore> {
        let mut state = self.state.lock();
        let handle = state.allocate_handle();
        state
            .semaphores
            .insert(handle, SemaphoreState::Timeline(initial_value));
        Ok(RawSemaphore::from_raw(handle))
    }

    fn timeline_value(&self, semaphore: RawSemaphore) -> GraphicsResult<u64> {
        let state = self.state.lock();
        state.check_device()?;
        state.timeline_value(semaphore)
    }

    fn wait_timeline(
        &self,
        semaphore: RawSemaphore,
        value: u64,
        timeout: Option<Duration>,
    ) -> GraphicsResult<WaitStatus> {
        let mut state = self.state.lock();
        loop {
            state.check_device()?;
            if state.timeline_value(semaphore)? >= value {
                return Ok(WaitStatus::Reached);
            }
            if state.stalled || state.pending.is_empty() {
                break;
            }
            state.execute_next();
        }

        match timeout {
            Some(_) => Ok(WaitStatus::TimedOut),
            None => {
                log::error!(
                    "DummyContext: wait on {semaphore:?} for {value} can never complete"
                );
                Err(GraphicsError::DeviceLost)
            }
        }
    }

    fn create_semaphore(&self) -> GraphicsResult<RawSemaphore> {
        let mut state = self.state.lock();
        let handle = state.allocate_handle();
        state
            .semaphores
            .insert(handle, SemaphoreState::Binary { signaled: false });
        Ok(RawSemaphore::from_raw(handle))
    }

    fn destroy_semaphore(&self, semaphore: RawSemaphore) {
        let mut state = self.state.lock();
        if state.pending_uses_semaphore(semaphore) {
            state.validation_error(format!("{semaphore:?} destroyed while pending"));
        }
        state.semaphores.remove(&semaphore.raw());
    }

    fn create_fence(&self, signaled: bool) -> GraphicsResult<RawFence> {
        let mut state = self.state.lock();
        let handle = state.allocate_handle();
        state.fences.insert(handle, signaled);
        Ok(RawFence::from_raw(handle))
    }

    fn fence_signaled(&self, fence: RawFence) -> GraphicsResult<bool> {
        let state = self.state.lock();
        state.check_device()?;
        state
            .fences
            .get(&fence.raw())
            .copied()
            .ok_or_else(|| GraphicsError::InvalidParameter(format!("unknown {fence:?}")))
    }

    fn reset_fence(&self, fence: RawFence) -> GraphicsResult<()> {
        let mut state = self.state.lock();
        let signaled = state
            .fences
            .get_mut(&fence.raw())
            .ok_or_else(|| GraphicsError::InvalidParameter(format!("unknown {fence:?}")))?;
        *signaled = false;
        Ok(())
    }

    fn destroy_fence(&self, fence: RawFence) {
        let mut state = self.state.lock();
        if state.pending.iter().any(|work| work.fence == Some(fence)) {
            state.validation_error(format!("{fence:?} destroyed while pending"));
        }
        state.fences.remove(&fence.raw());
    }

    fn submit(&self, submission: &QueueSubmission<'_>) -> GraphicsResult<()> {
        let mut state = self.state.lock();
        state.check_device()?;

        let mut commands = Vec::new();
        for command_buffer in submission.command_buffers {
            let recorded = state
                .command_buffers
                .get(&command_buffer.raw())
                .ok_or_else(|| {
                    GraphicsError::InvalidParameter(format!("unknown {command_buffer:?}"))
                })?;
            if recorded.recording {
                return Err(GraphicsError::InvalidState(format!(
                    "{command_buffer:?} submitted while recording"
                )));
            }
            commands.extend(recorded.commands.iter().cloned());
        }

        state.stats.submissions += 1;
        let work = PendingWork {
            command_buffers: submission.command_buffers.to_vec(),
            commands,
            waits: submission.waits.to_vec(),
            signals: submission.signals.to_vec(),
            fence: submission.fence,
            present: None,
        };
        self.enqueue(&mut state, work);
        Ok(())
    }

    fn wait_idle(&self) -> GraphicsResult<()> {
        let mut state = self.state.lock();
        state.check_device()?;
        if state.stalled && !state.pending.is_empty() {
            log::error!("DummyContext: wait_idle on a stalled queue");
            return Err(GraphicsError::DeviceLost);
        }
        state.execute_all();
        Ok(())
    }

    fn surface_capabilities(&self, surface: RawSurface) -> GraphicsResult<SurfaceCapabilities> {
        let state = self.state.lock();
        let target = state
            .surfaces
            .get(&surface.raw())
            .ok_or(GraphicsError::SurfaceLost)?;
        Ok(SurfaceCapabilities {
            min_image_count: 2,
            max_image_count: 8,
            current_extent: Some(target.extent),
            min_extent: Extent3d::new_2d(1, 1),
            max_extent: Extent3d::new_2d(16384, 16384),
            formats: vec![
                TextureFormat::Bgra8UnormSrgb,
                TextureFormat::Bgra8Unorm,
                TextureFormat::Rgba8Unorm,
            ],
            present_modes: vec![PresentMode::Fifo, PresentMode::Mailbox, PresentMode::Immediate],
        })
    }

    fn destroy_surface(&self, surface: RawSurface) {
        let mut state = self.state.lock();
        if state
            .swapchains
            .values()
            .any(|swapchain| swapchain.surface == surface)
        {
            state.validation_error(format!("{surface:?} destroyed while a swapchain uses it"));
        }
        state.surfaces.remove(&surface.raw());
    }

    fn create_swapchain(
        &self,
        descriptor: &SwapchainDescriptor,
    ) -> GraphicsResult<SwapchainImages> {
        let mut state = self.state.lock();
        state.check_device()?;
        if !state.surfaces.contains_key(&descriptor.surface.raw()) {
            return Err(GraphicsError::SurfaceLost);
        }
        if descriptor.extent.is_empty() {
            return Err(GraphicsError::InvalidParameter(
                "swapchain extent must be non-zero".to_string(),
            ));
        }
        if let Some(old) = descriptor.old_swapchain {
            match state.swapchains.get_mut(&old.raw()) {
                Some(old_state) => old_state.retired = true,
                None => state.validation_error(format!("old swapchain {old:?} is not alive")),
            }
        }

        let swapchain = RawSwapchain::from_raw(state.allocate_handle());
        let image_descriptor = ImageDescriptor::new_2d(
            descriptor.extent.width,
            descriptor.extent.height,
            descriptor.format,
            TextureUsage::RENDER_ATTACHMENT | TextureUsage::COPY_SRC | TextureUsage::COPY_DST,
        );
        let mut images = Vec::with_capacity(descriptor.image_count as usize);
        for _ in 0..descriptor.image_count {
            let handle = state.allocate_handle();
            state.images.insert(
                handle,
                ImageState::new(image_descriptor.clone(), Some(swapchain)),
            );
            images.push(RawImage::from_raw(handle));
        }

        state.swapchains.insert(
            swapchain.raw(),
            SwapchainState {
                surface: descriptor.surface,
                extent: descriptor.extent,
                images: images.clone(),
                next_image: 0,
                retired: false,
            },
        );
        state.stats.swapchains_created += 1;
        log::trace!(
            "DummyContext: created {swapchain:?} with {} images",
            images.len()
        );
        Ok(SwapchainImages { swapchain, images })
    }

    fn destroy_swapchain(&self, swapchain: RawSwapchain) {
        let mut state = self.state.lock();
        let Some(images) = state
            .swapchains
            .get(&swapchain.raw())
            .map(|s| s.images.clone())
        else {
            return;
        };
        if images.iter().any(|image| state.pending_uses_image(*image)) {
            state.validation_error(format!("{swapchain:?} destroyed while an image is in use"));
        }
        for image in images {
            state.images.remove(&image.raw());
        }
        state.swapchains.remove(&swapchain.raw());
        log::trace!("DummyContext: destroyed {swapchain:?}");
    }

    fn acquire_next_image(
        &self,
        swapchain: RawSwapchain,
        signal: RawSemaphore,
    ) -> GraphicsResult<AcquireOutcome> {
        let mut state = self.state.lock();
        state.check_device()?;

        if state.acquire_out_of_date > 0 {
            state.acquire_out_of_date -= 1;
            return Ok(AcquireOutcome::OutOfDate);
        }

        let (surface, extent, retired) = state
            .swapchains
            .get(&swapchain.raw())
            .map(|s| (s.surface, s.extent, s.retired))
            .ok_or_else(|| GraphicsError::InvalidParameter(format!("unknown {swapchain:?}")))?;
        let surface_extent = state.surfaces.get(&surface.raw()).map(|s| s.extent);
        if retired || surface_extent != Some(extent) {
            return Ok(AcquireOutcome::OutOfDate);
        }

        let index = match state.swapchains.get_mut(&swapchain.raw()) {
            Some(target) => {
                let index = target.next_image;
                target.next_image = (index + 1) % target.images.len().max(1) as u32;
                index
            }
            None => return Err(GraphicsError::Internal("swapchain vanished".to_string())),
        };
        state.apply_signal(&SemaphoreSignal {
            semaphore: signal,
            value: None,
        });
        Ok(AcquireOutcome::Acquired {
            index,
            suboptimal: false,
        })
    }

    fn present(&self, request: &PresentRequest) -> GraphicsResult<PresentOutcome> {
        let mut state = self.state.lock();
        state.check_device()?;

        let (surface, extent) = state
            .swapchains
            .get(&request.swapchain.raw())
            .map(|s| (s.surface, s.extent))
            .ok_or_else(|| {
                GraphicsError::InvalidParameter(format!("unknown {:?}", request.swapchain))
            })?;

        if let Some(error) = state.present_error.take() {
            return Err(error);
        }

        let outcome = if state.present_out_of_date > 0 {
            state.present_out_of_date -= 1;
            PresentOutcome::OutOfDate
        } else if state.surfaces.get(&surface.raw()).map(|s| s.extent) != Some(extent) {
            PresentOutcome::OutOfDate
        } else {
            state.stats.presents += 1;
            PresentOutcome::Presented
        };

        // The wait is consumed and the fence signaled even when out of date.
        let work = PendingWork {
            command_buffers: Vec::new(),
            commands: Vec::new(),
            waits: vec![SemaphoreWait {
                semaphore: request.wait,
                value: None,
                stages: PipelineStages::BOTTOM_OF_PIPE,
            }],
            signals: Vec::new(),
            fence: Some(request.fence),
            present: (outcome != PresentOutcome::OutOfDate)
                .then_some((request.swapchain, request.image_index)),
        };
        self.enqueue(&mut state, work);
        Ok(outcome)
    }
}

impl std::fmt::Debug for DummyContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DummyContext")
            .field("stats", &self.stats())
            .finish()
    }
}

static_assertions::assert_impl_all!(DummyContext: Send, Sync);
