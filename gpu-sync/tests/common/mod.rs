//! Common utilities for synchronization integration tests.
//!
//! Every test drives a [`GraphicsDevice`] on top of a [`DummyContext`], which
//! executes recorded commands on the CPU and validates layouts, retention and
//! semaphore use as it goes.

#![allow(dead_code)]

use std::sync::Arc;

use redlilium_gpu_sync::backend::dummy::{DummyContext, ExecutionMode};
use redlilium_gpu_sync::{
    BufferDescriptor, BufferHandle, BufferUsage, CommandBufferResource, DeviceConfig,
    FrameResources, GraphicsDevice, ImageLayout, ResidencyPattern, SurfaceHandle,
};

/// Install a test logger once. Output is captured per test.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A dummy context and a device on top of it.
pub struct TestContext {
    pub context: Arc<DummyContext>,
    pub device: GraphicsDevice,
}

impl TestContext {
    pub fn new(mode: ExecutionMode, direct_writes: bool) -> Self {
        Self::with_config(
            mode,
            DeviceConfig::default().with_direct_writes(direct_writes),
        )
    }

    pub fn with_config(mode: ExecutionMode, config: DeviceConfig) -> Self {
        init_logging();
        let context = DummyContext::with_mode(mode);
        let device = GraphicsDevice::new(context.clone(), config)
            .expect("dummy device creation should not fail");
        Self { context, device }
    }

    /// A command buffer that is already recording.
    pub fn recording_command_buffer(&self) -> CommandBufferResource {
        let mut cmd = self
            .device
            .create_command_buffer(Some("test"))
            .expect("command buffer");
        cmd.begin().expect("begin");
        cmd
    }

    /// Create a buffer with the given residency.
    pub fn buffer(&mut self, pattern: ResidencyPattern) -> BufferHandle {
        self.device.create_buffer(
            BufferDescriptor::new(BufferUsage::VERTEX | BufferUsage::STORAGE, pattern)
                .with_label("test buffer"),
        )
    }

    /// Present the minimal frame: the acquired image moved to `PresentSrc`.
    pub fn render_frame(
        &mut self,
        surface: SurfaceHandle,
        cmd: &mut CommandBufferResource,
        frame: FrameResources,
    ) {
        cmd.prepare_for_recording().expect("prepare");
        cmd.begin().expect("begin");
        let image = self
            .device
            .surface_mut(surface)
            .and_then(|s| s.image_mut(&frame))
            .expect("frame image");
        let full = image.full_range();
        image
            .transition_layout(cmd, &full, ImageLayout::PresentSrc)
            .expect("transition");
        cmd.end().expect("end");
        frame.attach_to(cmd);
        cmd.submit().expect("submit");
        self.device
            .present_frame(surface, frame)
            .expect("present");
    }

    pub fn assert_no_validation_errors(&self) {
        let errors = self.context.validation_errors();
        assert!(errors.is_empty(), "validation errors: {errors:#?}");
    }
}

/// End, submit and wait for a recording command buffer, then get it ready again.
pub fn submit_and_wait(cmd: &mut CommandBufferResource) {
    cmd.end().expect("end");
    cmd.submit().expect("submit");
    cmd.wait().expect("wait");
    cmd.prepare_for_recording().expect("prepare");
    cmd.begin().expect("begin");
}

/// Deterministic byte pattern.
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

/// Apply segments in order onto a zeroed buffer of `len` bytes.
pub fn merge_segments(len: usize, segments: &[(u64, Vec<u8>)]) -> Vec<u8> {
    let mut expected = vec![0u8; len];
    for (offset, data) in segments {
        let start = *offset as usize;
        expected[start..start + data.len()].copy_from_slice(data);
    }
    expected
}
