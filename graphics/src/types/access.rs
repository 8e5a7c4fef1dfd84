//! Access, pipeline stage and image layout vocabulary.
//!
//! These are backend-agnostic: the frame graph plans synchronization with
//! them and each backend translates them to its native flags.

use bitflags::bitflags;

use super::{BufferHandle, ImageHandle};

bitflags! {
    /// How a pass touches a resource.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Access: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const READ_WRITE = Self::READ.bits() | Self::WRITE.bits();
    }
}

impl Default for Access {
    fn default() -> Self {
        Self::empty()
    }
}

impl Access {
    pub fn is_write(self) -> bool {
        self.contains(Self::WRITE)
    }
}

bitflags! {
    /// Pipeline stages at which a resource is accessed.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PipelineStage: u32 {
        const DRAW_INDIRECT = 1 << 0;
        const VERTEX_INPUT = 1 << 1;
        const VERTEX_SHADER = 1 << 2;
        const FRAGMENT_SHADER = 1 << 3;
        const EARLY_FRAGMENT_TESTS = 1 << 4;
        const LATE_FRAGMENT_TESTS = 1 << 5;
        const COLOR_ATTACHMENT = 1 << 6;
        const COMPUTE = 1 << 7;
        const TRANSFER = 1 << 8;
        const HOST = 1 << 9;
        /// Every stage of the graphics pipeline.
        const GRAPHICS = Self::DRAW_INDIRECT.bits()
            | Self::VERTEX_INPUT.bits()
            | Self::VERTEX_SHADER.bits()
            | Self::FRAGMENT_SHADER.bits()
            | Self::EARLY_FRAGMENT_TESTS.bits()
            | Self::LATE_FRAGMENT_TESTS.bits()
            | Self::COLOR_ATTACHMENT.bits();
    }
}

impl Default for PipelineStage {
    fn default() -> Self {
        Self::empty()
    }
}

/// Image layout states.
///
/// Mirrors the layouts an explicit API distinguishes. The frame graph tracks
/// the current layout of every image it owns and emits transitions when a pass
/// needs a different one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ImageLayout {
    /// Contents undefined. Can transition to any layout.
    #[default]
    Undefined,
    /// Optimal for color attachment writes.
    ColorAttachment,
    /// Optimal for depth/stencil attachment writes.
    DepthStencilAttachment,
    /// Optimal for depth read-only (sampling + depth testing).
    DepthStencilReadOnly,
    /// Optimal for shader sampling.
    ShaderReadOnly,
    /// Optimal for transfer source operations.
    TransferSrc,
    /// Optimal for transfer destination operations.
    TransferDst,
    /// Optimal for presentation.
    PresentSrc,
    /// General layout (storage images).
    General,
}

/// The resource a [`Barrier`] applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BarrierTarget {
    /// A whole buffer, or a byte range of it.
    Buffer {
        buffer: BufferHandle,
        offset: u64,
        /// `None` covers the rest of the buffer.
        size: Option<u64>,
    },
    /// A mip range of an image with a layout transition.
    Image {
        image: ImageHandle,
        base_mip: u32,
        /// `None` covers all remaining mips.
        mip_count: Option<u32>,
        old_layout: ImageLayout,
        new_layout: ImageLayout,
    },
}

/// A memory/execution dependency recorded into a command buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Barrier {
    pub target: BarrierTarget,
    pub src_access: Access,
    pub src_stage: PipelineStage,
    pub dst_access: Access,
    pub dst_stage: PipelineStage,
}

impl Barrier {
    /// Barrier over a whole buffer.
    pub fn buffer(
        buffer: BufferHandle,
        src: (Access, PipelineStage),
        dst: (Access, PipelineStage),
    ) -> Self {
        Self {
            target: BarrierTarget::Buffer {
                buffer,
                offset: 0,
                size: None,
            },
            src_access: src.0,
            src_stage: src.1,
            dst_access: dst.0,
            dst_stage: dst.1,
        }
    }

    /// Barrier over a byte range of a buffer.
    pub fn buffer_range(
        buffer: BufferHandle,
        offset: u64,
        size: u64,
        src: (Access, PipelineStage),
        dst: (Access, PipelineStage),
    ) -> Self {
        Self {
            target: BarrierTarget::Buffer {
                buffer,
                offset,
                size: Some(size),
            },
            ..Self::buffer(buffer, src, dst)
        }
    }

    /// Layout transition over all mips of an image.
    pub fn image(
        image: ImageHandle,
        old_layout: ImageLayout,
        new_layout: ImageLayout,
        src: (Access, PipelineStage),
        dst: (Access, PipelineStage),
    ) -> Self {
        Self {
            target: BarrierTarget::Image {
                image,
                base_mip: 0,
                mip_count: None,
                old_layout,
                new_layout,
            },
            src_access: src.0,
            src_stage: src.1,
            dst_access: dst.0,
            dst_stage: dst.1,
        }
    }

    /// Layout transition over a single mip of an image.
    pub fn image_mip(
        image: ImageHandle,
        mip: u32,
        old_layout: ImageLayout,
        new_layout: ImageLayout,
        src: (Access, PipelineStage),
        dst: (Access, PipelineStage),
    ) -> Self {
        Self {
            target: BarrierTarget::Image {
                image,
                base_mip: mip,
                mip_count: Some(1),
                old_layout,
                new_layout,
            },
            ..Self::image(image, old_layout, new_layout, src, dst)
        }
    }

    pub fn is_layout_transition(&self) -> bool {
        matches!(
            self.target,
            BarrierTarget::Image { old_layout, new_layout, .. } if old_layout != new_layout
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_graphics_contains_fragment() {
        assert!(PipelineStage::GRAPHICS.contains(PipelineStage::FRAGMENT_SHADER));
        assert!(!PipelineStage::GRAPHICS.contains(PipelineStage::COMPUTE));
    }

    #[test]
    fn test_access_write() {
        assert!(Access::READ_WRITE.is_write());
        assert!(!Access::READ.is_write());
    }

    #[test]
    fn test_layout_transition_detection() {
        let image = ImageHandle(1);
        let rw = (Access::WRITE, PipelineStage::TRANSFER);
        let same = Barrier::image(image, ImageLayout::General, ImageLayout::General, rw, rw);
        assert!(!same.is_layout_transition());
        let change = Barrier::image_mip(
            image,
            2,
            ImageLayout::TransferDst,
            ImageLayout::ShaderReadOnly,
            rw,
            (Access::READ, PipelineStage::FRAGMENT_SHADER),
        );
        assert!(change.is_layout_transition());
        assert!(matches!(
            change.target,
            BarrierTarget::Image { base_mip: 2, mip_count: Some(1), .. }
        ));
    }
}
