//! Mip chain generation by successive blits.

use crate::context::RenderContext;
use crate::types::{Access, Barrier, CommandBufferHandle, ImageHandle, ImageLayout, PipelineStage};

/// Stages that sample uploaded textures.
pub(crate) const SAMPLE_STAGES: PipelineStage = PipelineStage::FRAGMENT_SHADER
    .union(PipelineStage::VERTEX_SHADER)
    .union(PipelineStage::COMPUTE);

/// Fill mips `1..mip_count` from mip 0 and leave every mip shader-readable.
///
/// Expects all mips in [`ImageLayout::TransferDst`] with mip 0 written. Each
/// level is blitted from the one above it, so extents halve per level and
/// clamp at 1.
pub fn record_mip_chain(
    ctx: &mut dyn RenderContext,
    cmd: CommandBufferHandle,
    image: ImageHandle,
    mip_count: u32,
) {
    let mip_count = mip_count.max(1);

    for mip in 1..mip_count {
        let src = mip - 1;
        ctx.pipeline_barrier(
            cmd,
            &[Barrier::image_mip(
                image,
                src,
                ImageLayout::TransferDst,
                ImageLayout::TransferSrc,
                (Access::WRITE, PipelineStage::TRANSFER),
                (Access::READ, PipelineStage::TRANSFER),
            )],
        );
        ctx.blit_image(cmd, image, src, mip);
        ctx.pipeline_barrier(
            cmd,
            &[Barrier::image_mip(
                image,
                src,
                ImageLayout::TransferSrc,
                ImageLayout::ShaderReadOnly,
                (Access::READ, PipelineStage::TRANSFER),
                (Access::READ, SAMPLE_STAGES),
            )],
        );
    }

    ctx.pipeline_barrier(
        cmd,
        &[Barrier::image_mip(
            image,
            mip_count - 1,
            ImageLayout::TransferDst,
            ImageLayout::ShaderReadOnly,
            (Access::WRITE, PipelineStage::TRANSFER),
            (Access::READ, SAMPLE_STAGES),
        )],
    );
}
