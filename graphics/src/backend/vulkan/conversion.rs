//! Conversions from Meridian graphics types to Vulkan types.

use ash::vk;

use crate::error::GraphicsError;
use crate::types::{
    Access, BufferUsage, Extent3d, ImageLayout, PipelineStage, TextureFormat, TextureUsage,
};

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
    // MAP_WRITE picks the memory location, not a usage bit.

    result
}

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

pub fn convert_texture_format(format: TextureFormat) -> vk::Format {
    match format {
        TextureFormat::R8Unorm => vk::Format::R8_UNORM,
        TextureFormat::R32Float => vk::Format::R32_SFLOAT,
        TextureFormat::R32Uint => vk::Format::R32_UINT,
        TextureFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        TextureFormat::Rgba8UnormSrgb => vk::Format::R8G8B8A8_SRGB,
        TextureFormat::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
        TextureFormat::Bgra8UnormSrgb => vk::Format::B8G8R8A8_SRGB,
        TextureFormat::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,
        TextureFormat::Rgba32Float => vk::Format::R32G32B32A32_SFLOAT,
        TextureFormat::Depth32Float => vk::Format::D32_SFLOAT,
        TextureFormat::Depth24PlusStencil8 => vk::Format::D24_UNORM_S8_UINT,
    }
}

pub fn aspect_mask(format: TextureFormat) -> vk::ImageAspectFlags {
    if format.has_stencil() {
        vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
    } else if format.is_depth_stencil() {
        vk::ImageAspectFlags::DEPTH
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

pub fn convert_image_layout(layout: ImageLayout) -> vk::ImageLayout {
    match layout {
        ImageLayout::Undefined => vk::ImageLayout::UNDEFINED,
        ImageLayout::ColorAttachment => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        ImageLayout::DepthStencilAttachment => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        ImageLayout::DepthStencilReadOnly => vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
        ImageLayout::ShaderReadOnly => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        ImageLayout::TransferSrc => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        ImageLayout::TransferDst => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        ImageLayout::PresentSrc => vk::ImageLayout::PRESENT_SRC_KHR,
        ImageLayout::General => vk::ImageLayout::GENERAL,
    }
}

pub fn convert_pipeline_stage(stage: PipelineStage) -> vk::PipelineStageFlags {
    let mut result = vk::PipelineStageFlags::empty();

    if stage.contains(PipelineStage::DRAW_INDIRECT) {
        result |= vk::PipelineStageFlags::DRAW_INDIRECT;
    }
    if stage.contains(PipelineStage::VERTEX_INPUT) {
        result |= vk::PipelineStageFlags::VERTEX_INPUT;
    }
    if stage.contains(PipelineStage::VERTEX_SHADER) {
        result |= vk::PipelineStageFlags::VERTEX_SHADER;
    }
    if stage.contains(PipelineStage::FRAGMENT_SHADER) {
        result |= vk::PipelineStageFlags::FRAGMENT_SHADER;
    }
    if stage.contains(PipelineStage::EARLY_FRAGMENT_TESTS) {
        result |= vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
    }
    if stage.contains(PipelineStage::LATE_FRAGMENT_TESTS) {
        result |= vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;
    }
    if stage.contains(PipelineStage::COLOR_ATTACHMENT) {
        result |= vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;
    }
    if stage.contains(PipelineStage::COMPUTE) {
        result |= vk::PipelineStageFlags::COMPUTE_SHADER;
    }
    if stage.contains(PipelineStage::TRANSFER) {
        result |= vk::PipelineStageFlags::TRANSFER;
    }
    if stage.contains(PipelineStage::HOST) {
        result |= vk::PipelineStageFlags::HOST;
    }

    result
}

/// Access mask for `access` at the given stages.
///
/// The abstract read/write pair is widened to every Vulkan access kind those
/// stages can perform.
pub fn convert_access(access: Access, stage: PipelineStage) -> vk::AccessFlags {
    let mut result = vk::AccessFlags::empty();
    let shader_stages =
        PipelineStage::VERTEX_SHADER | PipelineStage::FRAGMENT_SHADER | PipelineStage::COMPUTE;
    let depth_stages = PipelineStage::EARLY_FRAGMENT_TESTS | PipelineStage::LATE_FRAGMENT_TESTS;

    if access.contains(Access::READ) {
        if stage.contains(PipelineStage::DRAW_INDIRECT) {
            result |= vk::AccessFlags::INDIRECT_COMMAND_READ;
        }
        if stage.contains(PipelineStage::VERTEX_INPUT) {
            result |= vk::AccessFlags::VERTEX_ATTRIBUTE_READ | vk::AccessFlags::INDEX_READ;
        }
        if stage.intersects(shader_stages) {
            result |= vk::AccessFlags::SHADER_READ | vk::AccessFlags::UNIFORM_READ;
        }
        if stage.intersects(depth_stages) {
            result |= vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ;
        }
        if stage.contains(PipelineStage::COLOR_ATTACHMENT) {
            result |= vk::AccessFlags::COLOR_ATTACHMENT_READ;
        }
        if stage.contains(PipelineStage::TRANSFER) {
            result |= vk::AccessFlags::TRANSFER_READ;
        }
        if stage.contains(PipelineStage::HOST) {
            result |= vk::AccessFlags::HOST_READ;
        }
    }

    if access.contains(Access::WRITE) {
        if stage.intersects(shader_stages) {
            result |= vk::AccessFlags::SHADER_WRITE;
        }
        if stage.intersects(depth_stages) {
            result |= vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE;
        }
        if stage.contains(PipelineStage::COLOR_ATTACHMENT) {
            result |= vk::AccessFlags::COLOR_ATTACHMENT_WRITE;
        }
        if stage.contains(PipelineStage::TRANSFER) {
            result |= vk::AccessFlags::TRANSFER_WRITE;
        }
        if stage.contains(PipelineStage::HOST) {
            result |= vk::AccessFlags::HOST_WRITE;
        }
    }

    result
}

pub fn convert_extent(extent: Extent3d) -> vk::Extent3D {
    vk::Extent3D {
        width: extent.width.max(1),
        height: extent.height.max(1),
        depth: extent.depth.max(1),
    }
}

/// Far corner of an extent as a blit offset.
pub fn extent_offset(extent: Extent3d) -> vk::Offset3D {
    let extent = convert_extent(extent);
    vk::Offset3D {
        x: extent.width as i32,
        y: extent.height as i32,
        z: extent.depth as i32,
    }
}

/// Map a failed Vulkan call to a graphics error.
pub fn convert_result(what: &str, result: vk::Result) -> GraphicsError {
    match result {
        vk::Result::ERROR_DEVICE_LOST => GraphicsError::DeviceLost,
        vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY => {
            GraphicsError::OutOfMemory
        }
        other => GraphicsError::Internal(format!("{what}: {other:?}")),
    }
}
