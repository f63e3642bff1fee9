//! Type conversions between crate types and Vulkan types.

use ash::vk;
use gpu_allocator::MemoryLocation;

use crate::error::GraphicsError;
use crate::swapchain::PresentMode;
use crate::types::{
    AccessFlags, BufferUsage, ImageAspect, ImageLayout, PipelineStages, ResidencyPattern,
    SubresourceRange, TextureFormat, TextureUsage,
};

/// Map a failed `vk::Result` to a crate error.
///
/// `what` names the operation for the error message.
pub fn map_vk_result(result: vk::Result, what: &str) -> GraphicsError {
    match result {
        vk::Result::ERROR_DEVICE_LOST => GraphicsError::DeviceLost,
        vk::Result::ERROR_OUT_OF_HOST_MEMORY | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => {
            GraphicsError::OutOfMemory
        }
        vk::Result::ERROR_SURFACE_LOST_KHR => GraphicsError::SurfaceLost,
        vk::Result::ERROR_INITIALIZATION_FAILED => {
            GraphicsError::InitializationFailed(format!("{what}: {result:?}"))
        }
        _ => GraphicsError::Internal(format!("{what}: {result:?}")),
    }
}

/// Convert BufferUsage flags to Vulkan buffer usage flags.
pub fn convert_buffer_usage(usage: BufferUsage) -> vk::BufferUsageFlags {
    let mut result = vk::BufferUsageFlags::empty();

    if usage.contains(BufferUsage::VERTEX) {
        result |= vk::BufferUsageFlags::VERTEX_BUFFER;
    }
    if usage.contains(BufferUsage::INDEX) {
        result |= vk::BufferUsageFlags::INDEX_BUFFER;
    }
    if usage.contains(BufferUsage::UNIFORM) {
        result |= vk::BufferUsageFlags::UNIFORM_BUFFER;
    }
    if usage.contains(BufferUsage::STORAGE) {
        result |= vk::BufferUsageFlags::STORAGE_BUFFER;
    }
    if usage.contains(BufferUsage::INDIRECT) {
        result |= vk::BufferUsageFlags::INDIRECT_BUFFER;
    }
    if usage.contains(BufferUsage::COPY_SRC) {
        result |= vk::BufferUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(BufferUsage::COPY_DST) {
        result |= vk::BufferUsageFlags::TRANSFER_DST;
    }
    if usage.contains(BufferUsage::DEVICE_ADDRESS) {
        result |= vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS;
    }

    result
}

/// Memory location for a residency pattern.
pub fn memory_location(pattern: ResidencyPattern) -> MemoryLocation {
    match pattern {
        ResidencyPattern::Static => MemoryLocation::GpuOnly,
        ResidencyPattern::Dynamic | ResidencyPattern::Upload => MemoryLocation::CpuToGpu,
        ResidencyPattern::Readback => MemoryLocation::GpuToCpu,
    }
}

/// Convert TextureFormat to Vulkan format.
pub fn convert_texture_format(format: TextureFormat) -> vk::Format {
    match format {
        TextureFormat::R8Unorm => vk::Format::R8_UNORM,
        TextureFormat::Rg8Unorm => vk::Format::R8G8_UNORM,
        TextureFormat::R16Float => vk::Format::R16_SFLOAT,
        TextureFormat::R32Float => vk::Format::R32_SFLOAT,
        TextureFormat::R32Uint => vk::Format::R32_UINT,
        TextureFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        TextureFormat::Rgba8UnormSrgb => vk::Format::R8G8B8A8_SRGB,
        TextureFormat::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
        TextureFormat::Bgra8UnormSrgb => vk::Format::B8G8R8A8_SRGB,
        TextureFormat::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,
        TextureFormat::Rgba32Float => vk::Format::R32G32B32A32_SFLOAT,
        TextureFormat::Depth16Unorm => vk::Format::D16_UNORM,
        TextureFormat::Depth32Float => vk::Format::D32_SFLOAT,
        TextureFormat::Depth24PlusStencil8 => vk::Format::D24_UNORM_S8_UINT,
        TextureFormat::Depth32FloatStencil8 => vk::Format::D32_SFLOAT_S8_UINT,
    }
}

/// Convert a surface format back, if it is one this crate knows.
pub fn texture_format_from_vk(format: vk::Format) -> Option<TextureFormat> {
    match format {
        vk::Format::B8G8R8A8_SRGB => Some(TextureFormat::Bgra8UnormSrgb),
        vk::Format::B8G8R8A8_UNORM => Some(TextureFormat::Bgra8Unorm),
        vk::Format::R8G8B8A8_SRGB => Some(TextureFormat::Rgba8UnormSrgb),
        vk::Format::R8G8B8A8_UNORM => Some(TextureFormat::Rgba8Unorm),
        vk::Format::R16G16B16A16_SFLOAT => Some(TextureFormat::Rgba16Float),
        _ => None,
    }
}

/// Convert TextureUsage flags to Vulkan image usage flags.
///
/// The format is needed to determine whether RENDER_ATTACHMENT should map to
/// COLOR_ATTACHMENT or DEPTH_STENCIL_ATTACHMENT.
pub fn convert_texture_usage(usage: TextureUsage, format: TextureFormat) -> vk::ImageUsageFlags {
    let mut result = vk::ImageUsageFlags::empty();

    if usage.contains(TextureUsage::COPY_SRC) {
        result |= vk::ImageUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(TextureUsage::COPY_DST) {
        result |= vk::ImageUsageFlags::TRANSFER_DST;
    }
    if usage.contains(TextureUsage::TEXTURE_BINDING) {
        result |= vk::ImageUsageFlags::SAMPLED;
    }
    if usage.contains(TextureUsage::STORAGE_BINDING) {
        result |= vk::ImageUsageFlags::STORAGE;
    }
    if usage.contains(TextureUsage::RENDER_ATTACHMENT) {
        if format.is_depth_stencil() {
            result |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
        } else {
            result |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
        }
    }

    result
}

/// Convert PresentMode to Vulkan present mode.
pub fn convert_present_mode(mode: PresentMode) -> vk::PresentModeKHR {
    match mode {
        PresentMode::Immediate => vk::PresentModeKHR::IMMEDIATE,
        PresentMode::Mailbox => vk::PresentModeKHR::MAILBOX,
        PresentMode::Fifo => vk::PresentModeKHR::FIFO,
        PresentMode::FifoRelaxed => vk::PresentModeKHR::FIFO_RELAXED,
    }
}

pub fn present_mode_from_vk(mode: vk::PresentModeKHR) -> Option<PresentMode> {
    match mode {
        vk::PresentModeKHR::IMMEDIATE => Some(PresentMode::Immediate),
        vk::PresentModeKHR::MAILBOX => Some(PresentMode::Mailbox),
        vk::PresentModeKHR::FIFO => Some(PresentMode::Fifo),
        vk::PresentModeKHR::FIFO_RELAXED => Some(PresentMode::FifoRelaxed),
        _ => None,
    }
}

/// Convert ImageLayout to Vulkan image layout.
pub fn convert_image_layout(layout: ImageLayout) -> vk::ImageLayout {
    match layout {
        ImageLayout::Undefined => vk::ImageLayout::UNDEFINED,
        ImageLayout::General => vk::ImageLayout::GENERAL,
        ImageLayout::ColorAttachment => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        ImageLayout::DepthStencilAttachment => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        ImageLayout::DepthStencilReadOnly => vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
        ImageLayout::ShaderReadOnly => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        ImageLayout::TransferSrc => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        ImageLayout::TransferDst => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        ImageLayout::PresentSrc => vk::ImageLayout::PRESENT_SRC_KHR,
    }
}

/// Convert PipelineStages flags to Vulkan pipeline stage flags.
pub fn convert_pipeline_stages(stages: PipelineStages) -> vk::PipelineStageFlags {
    const TABLE: [(PipelineStages, vk::PipelineStageFlags); 13] = [
        (PipelineStages::TOP_OF_PIPE, vk::PipelineStageFlags::TOP_OF_PIPE),
        (PipelineStages::DRAW_INDIRECT, vk::PipelineStageFlags::DRAW_INDIRECT),
        (PipelineStages::VERTEX_INPUT, vk::PipelineStageFlags::VERTEX_INPUT),
        (PipelineStages::VERTEX_SHADER, vk::PipelineStageFlags::VERTEX_SHADER),
        (PipelineStages::FRAGMENT_SHADER, vk::PipelineStageFlags::FRAGMENT_SHADER),
        (
            PipelineStages::EARLY_FRAGMENT_TESTS,
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        ),
        (
            PipelineStages::LATE_FRAGMENT_TESTS,
            vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
        ),
        (
            PipelineStages::COLOR_ATTACHMENT_OUTPUT,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        ),
        (PipelineStages::COMPUTE_SHADER, vk::PipelineStageFlags::COMPUTE_SHADER),
        (PipelineStages::TRANSFER, vk::PipelineStageFlags::TRANSFER),
        (PipelineStages::BOTTOM_OF_PIPE, vk::PipelineStageFlags::BOTTOM_OF_PIPE),
        (PipelineStages::HOST, vk::PipelineStageFlags::HOST),
        (PipelineStages::ALL_COMMANDS, vk::PipelineStageFlags::ALL_COMMANDS),
    ];

    let result = TABLE
        .iter()
        .filter(|(ours, _)| stages.contains(*ours))
        .fold(vk::PipelineStageFlags::empty(), |acc, (_, flag)| acc | *flag);

    // An empty mask is invalid in a barrier.
    if result.is_empty() {
        vk::PipelineStageFlags::TOP_OF_PIPE
    } else {
        result
    }
}

/// Convert AccessFlags to Vulkan access flags.
pub fn convert_access_flags(access: AccessFlags) -> vk::AccessFlags {
    const TABLE: [(AccessFlags, vk::AccessFlags); 16] = [
        (
            AccessFlags::INDIRECT_COMMAND_READ,
            vk::AccessFlags::INDIRECT_COMMAND_READ,
        ),
        (AccessFlags::INDEX_READ, vk::AccessFlags::INDEX_READ),
        (
            AccessFlags::VERTEX_ATTRIBUTE_READ,
            vk::AccessFlags::VERTEX_ATTRIBUTE_READ,
        ),
        (AccessFlags::UNIFORM_READ, vk::AccessFlags::UNIFORM_READ),
        (AccessFlags::SHADER_READ, vk::AccessFlags::SHADER_READ),
        (AccessFlags::SHADER_WRITE, vk::AccessFlags::SHADER_WRITE),
        (
            AccessFlags::COLOR_ATTACHMENT_READ,
            vk::AccessFlags::COLOR_ATTACHMENT_READ,
        ),
        (
            AccessFlags::COLOR_ATTACHMENT_WRITE,
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        ),
        (
            AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ,
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ,
        ),
        (
            AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ),
        (AccessFlags::TRANSFER_READ, vk::AccessFlags::TRANSFER_READ),
        (AccessFlags::TRANSFER_WRITE, vk::AccessFlags::TRANSFER_WRITE),
        (AccessFlags::HOST_READ, vk::AccessFlags::HOST_READ),
        (AccessFlags::HOST_WRITE, vk::AccessFlags::HOST_WRITE),
        (AccessFlags::MEMORY_READ, vk::AccessFlags::MEMORY_READ),
        (AccessFlags::MEMORY_WRITE, vk::AccessFlags::MEMORY_WRITE),
    ];

    TABLE
        .iter()
        .filter(|(ours, _)| access.contains(*ours))
        .fold(vk::AccessFlags::empty(), |acc, (_, flag)| acc | *flag)
}

/// Convert ImageAspect flags to Vulkan aspect flags.
pub fn convert_aspect(aspect: ImageAspect) -> vk::ImageAspectFlags {
    let mut result = vk::ImageAspectFlags::empty();
    if aspect.contains(ImageAspect::COLOR) {
        result |= vk::ImageAspectFlags::COLOR;
    }
    if aspect.contains(ImageAspect::DEPTH) {
        result |= vk::ImageAspectFlags::DEPTH;
    }
    if aspect.contains(ImageAspect::STENCIL) {
        result |= vk::ImageAspectFlags::STENCIL;
    }
    result
}

/// Convert a subresource range.
pub fn convert_subresource_range(
    aspect: ImageAspect,
    range: &SubresourceRange,
) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: convert_aspect(aspect),
        base_mip_level: range.mips.start,
        level_count: range.mips.end - range.mips.start,
        base_array_layer: range.layers.start,
        layer_count: range.layers.end - range.layers.start,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_lost_maps_distinctly() {
        assert_eq!(
            map_vk_result(vk::Result::ERROR_DEVICE_LOST, "wait"),
            GraphicsError::DeviceLost
        );
        assert_eq!(
            map_vk_result(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY, "alloc"),
            GraphicsError::OutOfMemory
        );
        assert!(matches!(
            map_vk_result(vk::Result::ERROR_UNKNOWN, "submit"),
            GraphicsError::Internal(_)
        ));
    }

    #[test]
    fn test_residency_locations() {
        assert_eq!(memory_location(ResidencyPattern::Static), MemoryLocation::GpuOnly);
        assert_eq!(memory_location(ResidencyPattern::Dynamic), MemoryLocation::CpuToGpu);
        assert_eq!(memory_location(ResidencyPattern::Readback), MemoryLocation::GpuToCpu);
    }

    #[test]
    fn test_empty_stages_become_top_of_pipe() {
        assert_eq!(
            convert_pipeline_stages(PipelineStages::empty()),
            vk::PipelineStageFlags::TOP_OF_PIPE
        );
        assert_eq!(
            convert_pipeline_stages(PipelineStages::TRANSFER | PipelineStages::HOST),
            vk::PipelineStageFlags::TRANSFER | vk::PipelineStageFlags::HOST
        );
    }

    #[test]
    fn test_access_flags() {
        assert_eq!(
            convert_access_flags(AccessFlags::TRANSFER_WRITE | AccessFlags::SHADER_READ),
            vk::AccessFlags::TRANSFER_WRITE | vk::AccessFlags::SHADER_READ
        );
    }

    #[test]
    fn test_surface_format_round_trip() {
        for format in [
            TextureFormat::Bgra8UnormSrgb,
            TextureFormat::Bgra8Unorm,
            TextureFormat::Rgba8Unorm,
        ] {
            assert_eq!(
                texture_format_from_vk(convert_texture_format(format)),
                Some(format)
            );
        }
    }

    #[test]
    fn test_subresource_range() {
        let range = convert_subresource_range(
            ImageAspect::DEPTH | ImageAspect::STENCIL,
            &SubresourceRange::new(2..4, 1..3),
        );
        assert_eq!(range.base_array_layer, 2);
        assert_eq!(range.layer_count, 2);
        assert_eq!(range.base_mip_level, 1);
        assert_eq!(range.level_count, 2);
        assert_eq!(
            range.aspect_mask,
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
    }

    #[test]
    fn test_depth_attachment_usage() {
        let usage = convert_texture_usage(
            TextureUsage::RENDER_ATTACHMENT,
            TextureFormat::Depth32Float,
        );
        assert_eq!(usage, vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT);
    }
}
