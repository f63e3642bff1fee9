//! Buffer types and descriptors.

use bitflags::bitflags;

use super::{AccessFlags, PipelineStages};

bitflags! {
    /// Usage flags for buffers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        /// Buffer can be used as a vertex buffer.
        const VERTEX = 1 << 0;
        /// Buffer can be used as an index buffer.
        const INDEX = 1 << 1;
        /// Buffer can be used as a uniform buffer.
        const UNIFORM = 1 << 2;
        /// Buffer can be used as a storage buffer.
        const STORAGE = 1 << 3;
        /// Buffer can be used as an indirect buffer.
        const INDIRECT = 1 << 4;
        /// Buffer can be copied from.
        const COPY_SRC = 1 << 5;
        /// Buffer can be copied to.
        const COPY_DST = 1 << 6;
        /// Buffer exposes a device address to shaders.
        const DEVICE_ADDRESS = 1 << 7;
    }
}

impl Default for BufferUsage {
    fn default() -> Self {
        Self::empty()
    }
}

impl BufferUsage {
    /// Pipeline stages and access flags that will consume a buffer with this usage.
    ///
    /// This is the destination scope of the barrier that makes a copy into the
    /// buffer visible, and the source scope of the barrier that waits for prior
    /// readers before the buffer is overwritten.
    pub fn access_scope(self) -> (PipelineStages, AccessFlags) {
        let shader_stages = PipelineStages::VERTEX_SHADER
            | PipelineStages::FRAGMENT_SHADER
            | PipelineStages::COMPUTE_SHADER;

        let mut stages = PipelineStages::empty();
        let mut access = AccessFlags::empty();

        if self.contains(Self::VERTEX) {
            stages |= PipelineStages::VERTEX_INPUT;
            access |= AccessFlags::VERTEX_ATTRIBUTE_READ;
        }
        if self.contains(Self::INDEX) {
            stages |= PipelineStages::VERTEX_INPUT;
            access |= AccessFlags::INDEX_READ;
        }
        if self.contains(Self::UNIFORM) {
            stages |= shader_stages;
            access |= AccessFlags::UNIFORM_READ;
        }
        if self.intersects(Self::STORAGE | Self::DEVICE_ADDRESS) {
            stages |= shader_stages;
            access |= AccessFlags::SHADER_READ | AccessFlags::SHADER_WRITE;
        }
        if self.contains(Self::INDIRECT) {
            stages |= PipelineStages::DRAW_INDIRECT;
            access |= AccessFlags::INDIRECT_COMMAND_READ;
        }
        if self.contains(Self::COPY_SRC) {
            stages |= PipelineStages::TRANSFER;
            access |= AccessFlags::TRANSFER_READ;
        }

        if stages.is_empty() {
            (PipelineStages::ALL_COMMANDS, AccessFlags::MEMORY_READ)
        } else {
            (stages, access)
        }
    }
}

/// How often a buffer's contents change, which decides where it lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResidencyPattern {
    /// Rarely written. Device local and never mapped; every write is staged.
    #[default]
    Static,
    /// Frequently written. Host mappable; written directly while idle.
    Dynamic,
    /// Transient host-written source of a staged copy.
    Upload,
    /// Host-readable destination of a GPU copy.
    Readback,
}

impl ResidencyPattern {
    /// Returns true if buffers with this pattern have a host mapping.
    pub fn is_host_mappable(self) -> bool {
        !matches!(self, Self::Static)
    }
}

/// Descriptor for a buffer managed by a write scheduler.
///
/// There is no size: the buffer is created on first commit and grows to fit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct BufferDescriptor {
    /// Debug label for the buffer.
    pub label: Option<String>,
    /// Usage flags.
    pub usage: BufferUsage,
    /// Residency pattern.
    pub pattern: ResidencyPattern,
}

impl BufferDescriptor {
    /// Create a new buffer descriptor.
    pub fn new(usage: BufferUsage, pattern: ResidencyPattern) -> Self {
        Self {
            label: None,
            usage,
            pattern,
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}
