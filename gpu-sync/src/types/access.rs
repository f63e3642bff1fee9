//! Backend-neutral pipeline stages, access flags and image layouts.
//!
//! Barriers are described with these types and translated by each device
//! context. The set mirrors what explicit GPU APIs need for the
//! transfer/sample/attach/present transitions this crate performs.

use bitflags::bitflags;

bitflags! {
    /// Pipeline stages a barrier waits on or blocks.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PipelineStages: u32 {
        const TOP_OF_PIPE = 1 << 0;
        const DRAW_INDIRECT = 1 << 1;
        const VERTEX_INPUT = 1 << 2;
        const VERTEX_SHADER = 1 << 3;
        const FRAGMENT_SHADER = 1 << 4;
        const EARLY_FRAGMENT_TESTS = 1 << 5;
        const LATE_FRAGMENT_TESTS = 1 << 6;
        const COLOR_ATTACHMENT_OUTPUT = 1 << 7;
        const COMPUTE_SHADER = 1 << 8;
        const TRANSFER = 1 << 9;
        const BOTTOM_OF_PIPE = 1 << 10;
        const HOST = 1 << 11;
        const ALL_COMMANDS = 1 << 12;
    }
}

impl Default for PipelineStages {
    fn default() -> Self {
        Self::empty()
    }
}

bitflags! {
    /// Memory access kinds made available or visible by a barrier.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AccessFlags: u32 {
        const INDIRECT_COMMAND_READ = 1 << 0;
        const INDEX_READ = 1 << 1;
        const VERTEX_ATTRIBUTE_READ = 1 << 2;
        const UNIFORM_READ = 1 << 3;
        const SHADER_READ = 1 << 4;
        const SHADER_WRITE = 1 << 5;
        const COLOR_ATTACHMENT_READ = 1 << 6;
        const COLOR_ATTACHMENT_WRITE = 1 << 7;
        const DEPTH_STENCIL_ATTACHMENT_READ = 1 << 8;
        const DEPTH_STENCIL_ATTACHMENT_WRITE = 1 << 9;
        const TRANSFER_READ = 1 << 10;
        const TRANSFER_WRITE = 1 << 11;
        const HOST_READ = 1 << 12;
        const HOST_WRITE = 1 << 13;
        const MEMORY_READ = 1 << 14;
        const MEMORY_WRITE = 1 << 15;
    }
}

impl Default for AccessFlags {
    fn default() -> Self {
        Self::empty()
    }
}

/// Access layout of an image subresource.
///
/// Freshly created images start in [`ImageLayout::Undefined`] across their
/// whole subresource space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ImageLayout {
    /// Contents undefined. Valid only as the old layout of a transition.
    #[default]
    Undefined,
    /// Any access; least optimal.
    General,
    /// Optimal for color attachment writes.
    ColorAttachment,
    /// Optimal for depth/stencil attachment writes.
    DepthStencilAttachment,
    /// Optimal for depth testing and sampling without writes.
    DepthStencilReadOnly,
    /// Optimal for shader sampling.
    ShaderReadOnly,
    /// Optimal as a copy source.
    TransferSrc,
    /// Optimal as a copy destination.
    TransferDst,
    /// Ready for presentation.
    PresentSrc,
}

impl ImageLayout {
    /// Stages and accesses that must complete before leaving this layout.
    pub fn src_scope(self) -> (PipelineStages, AccessFlags) {
        match self {
            Self::Undefined => (PipelineStages::TOP_OF_PIPE, AccessFlags::empty()),
            Self::General => (
                PipelineStages::ALL_COMMANDS,
                AccessFlags::MEMORY_READ | AccessFlags::MEMORY_WRITE,
            ),
            Self::ColorAttachment => (
                PipelineStages::COLOR_ATTACHMENT_OUTPUT,
                AccessFlags::COLOR_ATTACHMENT_WRITE,
            ),
            Self::DepthStencilAttachment => (
                PipelineStages::LATE_FRAGMENT_TESTS,
                AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            ),
            Self::DepthStencilReadOnly => (
                PipelineStages::EARLY_FRAGMENT_TESTS | PipelineStages::FRAGMENT_SHADER,
                AccessFlags::empty(),
            ),
            // Read-only layouts only need an execution dependency.
            Self::ShaderReadOnly => (
                PipelineStages::FRAGMENT_SHADER | PipelineStages::COMPUTE_SHADER,
                AccessFlags::empty(),
            ),
            Self::TransferSrc => (PipelineStages::TRANSFER, AccessFlags::empty()),
            Self::TransferDst => (PipelineStages::TRANSFER, AccessFlags::TRANSFER_WRITE),
            Self::PresentSrc => (PipelineStages::BOTTOM_OF_PIPE, AccessFlags::empty()),
        }
    }

    /// Stages and accesses that must wait for entry into this layout.
    pub fn dst_scope(self) -> (PipelineStages, AccessFlags) {
        match self {
            Self::Undefined => (PipelineStages::TOP_OF_PIPE, AccessFlags::empty()),
            Self::General => (
                PipelineStages::ALL_COMMANDS,
                AccessFlags::MEMORY_READ | AccessFlags::MEMORY_WRITE,
            ),
            Self::ColorAttachment => (
                PipelineStages::COLOR_ATTACHMENT_OUTPUT,
                AccessFlags::COLOR_ATTACHMENT_READ | AccessFlags::COLOR_ATTACHMENT_WRITE,
            ),
            Self::DepthStencilAttachment => (
                PipelineStages::EARLY_FRAGMENT_TESTS | PipelineStages::LATE_FRAGMENT_TESTS,
                AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                    | AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            ),
            Self::DepthStencilReadOnly => (
                PipelineStages::EARLY_FRAGMENT_TESTS | PipelineStages::FRAGMENT_SHADER,
                AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ | AccessFlags::SHADER_READ,
            ),
            Self::ShaderReadOnly => (
                PipelineStages::FRAGMENT_SHADER | PipelineStages::COMPUTE_SHADER,
                AccessFlags::SHADER_READ,
            ),
            Self::TransferSrc => (PipelineStages::TRANSFER, AccessFlags::TRANSFER_READ),
            Self::TransferDst => (PipelineStages::TRANSFER, AccessFlags::TRANSFER_WRITE),
            Self::PresentSrc => (PipelineStages::BOTTOM_OF_PIPE, AccessFlags::empty()),
        }
    }

    /// Returns true if the layout may be the target of a transition.
    pub fn is_valid_target(self) -> bool {
        self != Self::Undefined
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_layout_is_undefined() {
        assert_eq!(ImageLayout::default(), ImageLayout::Undefined);
        assert!(!ImageLayout::Undefined.is_valid_target());
        assert!(ImageLayout::TransferDst.is_valid_target());
    }

    #[test]
    fn test_transfer_dst_scopes_write() {
        let (src_stage, src_access) = ImageLayout::TransferDst.src_scope();
        let (dst_stage, dst_access) = ImageLayout::TransferDst.dst_scope();
        assert_eq!(src_stage, PipelineStages::TRANSFER);
        assert_eq!(dst_stage, PipelineStages::TRANSFER);
        assert_eq!(src_access, AccessFlags::TRANSFER_WRITE);
        assert_eq!(dst_access, AccessFlags::TRANSFER_WRITE);
    }

    #[test]
    fn test_undefined_source_has_no_access() {
        let (stage, access) = ImageLayout::Undefined.src_scope();
        assert_eq!(stage, PipelineStages::TOP_OF_PIPE);
        assert!(access.is_empty());
    }
}
