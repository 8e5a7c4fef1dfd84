//! Resource usage declarations.
//!
//! A pass lists every named resource it touches together with how (access),
//! where (pipeline stages) and as what (resource type). The builder derives
//! ordering edges, barriers and image layouts from these declarations alone.

use std::fmt;
use std::sync::Arc;

use crate::types::{
    Access, BufferUsage, Extent3d, ImageLayout, PipelineStage, TextureFormat, TextureUsage,
};

/// What kind of binding a resource is used as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceType {
    /// Shader storage buffer.
    Ssbo,
    UniformBuffer,
    VertexBuffer,
    IndexBuffer,
    /// Indirect draw/dispatch arguments.
    IndirectBuffer,
    /// Source or destination of buffer copies.
    TransferBuffer,
    /// Color image sampled in a shader.
    SampledTexture,
    /// Depth image sampled in a shader.
    SampledDepthTexture,
    /// Image read or written as a storage image.
    ImageStorage,
    ColorAttachment,
    DepthAttachment,
    /// Image used as a copy or blit source.
    TransferSrcImage,
    /// Image used as a copy or blit destination.
    TransferDstImage,
}

impl ResourceType {
    pub fn is_image(self) -> bool {
        !self.is_buffer()
    }

    pub fn is_buffer(self) -> bool {
        matches!(
            self,
            Self::Ssbo
                | Self::UniformBuffer
                | Self::VertexBuffer
                | Self::IndexBuffer
                | Self::IndirectBuffer
                | Self::TransferBuffer
        )
    }

    /// Layout an image must be in for this usage. `None` for buffers.
    pub fn required_layout(self, access: Access) -> Option<ImageLayout> {
        let layout = match self {
            Self::SampledTexture => ImageLayout::ShaderReadOnly,
            Self::SampledDepthTexture => ImageLayout::DepthStencilReadOnly,
            Self::ImageStorage => ImageLayout::General,
            Self::ColorAttachment => ImageLayout::ColorAttachment,
            Self::DepthAttachment if access.is_write() => ImageLayout::DepthStencilAttachment,
            Self::DepthAttachment => ImageLayout::DepthStencilReadOnly,
            Self::TransferSrcImage => ImageLayout::TransferSrc,
            Self::TransferDstImage => ImageLayout::TransferDst,
            _ => return None,
        };
        Some(layout)
    }

    pub fn buffer_usage(self) -> BufferUsage {
        match self {
            Self::Ssbo => BufferUsage::STORAGE,
            Self::UniformBuffer => BufferUsage::UNIFORM,
            Self::VertexBuffer => BufferUsage::VERTEX,
            Self::IndexBuffer => BufferUsage::INDEX,
            Self::IndirectBuffer => BufferUsage::INDIRECT | BufferUsage::STORAGE,
            Self::TransferBuffer => BufferUsage::COPY_SRC | BufferUsage::COPY_DST,
            _ => BufferUsage::empty(),
        }
    }

    pub fn texture_usage(self) -> TextureUsage {
        match self {
            Self::SampledTexture | Self::SampledDepthTexture => TextureUsage::TEXTURE_BINDING,
            Self::ImageStorage => TextureUsage::STORAGE_BINDING,
            Self::ColorAttachment | Self::DepthAttachment => TextureUsage::RENDER_ATTACHMENT,
            Self::TransferSrcImage => TextureUsage::COPY_SRC,
            Self::TransferDstImage => TextureUsage::COPY_DST,
            _ => TextureUsage::empty(),
        }
    }
}

/// Callback that fills a newly created buffer's initial contents.
pub type BufferFillFn = Arc<dyn Fn(&mut [u8]) + Send + Sync>;

/// Size and optional initial contents of a graph-created buffer.
#[derive(Clone)]
pub struct BufferCreateParams {
    pub size: u64,
    pub fill: Option<BufferFillFn>,
}

impl BufferCreateParams {
    pub fn new(size: u64) -> Self {
        Self { size, fill: None }
    }

    pub fn with_fill(mut self, fill: impl Fn(&mut [u8]) + Send + Sync + 'static) -> Self {
        self.fill = Some(Arc::new(fill));
        self
    }
}

impl PartialEq for BufferCreateParams {
    fn eq(&self, other: &Self) -> bool {
        self.size == other.size
            && match (&self.fill, &other.fill) {
                (None, None) => true,
                (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                _ => false,
            }
    }
}

impl fmt::Debug for BufferCreateParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferCreateParams")
            .field("size", &self.size)
            .field("fill", &self.fill.is_some())
            .finish()
    }
}

/// How an image's dimensions are determined.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ImageSize {
    Absolute(Extent3d),
    /// A fraction of the swapchain extent, recomputed on resize.
    SwapchainRelative { scale: f32 },
}

impl ImageSize {
    pub fn resolve(&self, swapchain: Extent3d) -> Extent3d {
        match *self {
            Self::Absolute(extent) => extent,
            Self::SwapchainRelative { scale } => swapchain.scaled(scale),
        }
    }

    pub fn is_swapchain_relative(&self) -> bool {
        matches!(self, Self::SwapchainRelative { .. })
    }
}

/// Dimensions and format of a graph-created image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageCreateParams {
    pub size: ImageSize,
    pub format: TextureFormat,
    pub mip_levels: u32,
}

impl ImageCreateParams {
    pub fn absolute(width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            size: ImageSize::Absolute(Extent3d::new_2d(width, height)),
            format,
            mip_levels: 1,
        }
    }

    /// An image matching the swapchain extent.
    pub fn swapchain(format: TextureFormat) -> Self {
        Self::swapchain_scaled(format, 1.0)
    }

    pub fn swapchain_scaled(format: TextureFormat, scale: f32) -> Self {
        Self {
            size: ImageSize::SwapchainRelative { scale },
            format,
            mip_levels: 1,
        }
    }

    pub fn with_mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels.max(1);
        self
    }
}

/// Creation parameters attached to the usage that owns a resource.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceCreateParams {
    Buffer(BufferCreateParams),
    Image(ImageCreateParams),
}

impl From<BufferCreateParams> for ResourceCreateParams {
    fn from(params: BufferCreateParams) -> Self {
        Self::Buffer(params)
    }
}

impl From<ImageCreateParams> for ResourceCreateParams {
    fn from(params: ImageCreateParams) -> Self {
        Self::Image(params)
    }
}

/// One resource access declared by a pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceUsage {
    pub name: String,
    pub access: Access,
    pub stage: PipelineStage,
    pub resource_type: ResourceType,
    /// Present on the usage that creates the resource.
    pub create: Option<ResourceCreateParams>,
    /// One copy per frame in flight.
    pub multi_buffered: bool,
    /// Survives graph rebuilds even when no pass declares it.
    pub owned_by_engine: bool,
}

impl ResourceUsage {
    pub fn new(
        name: impl Into<String>,
        access: Access,
        stage: PipelineStage,
        resource_type: ResourceType,
    ) -> Self {
        Self {
            name: name.into(),
            access,
            stage,
            resource_type,
            create: None,
            multi_buffered: false,
            owned_by_engine: false,
        }
    }

    pub fn read(name: impl Into<String>, stage: PipelineStage, resource_type: ResourceType) -> Self {
        Self::new(name, Access::READ, stage, resource_type)
    }

    pub fn write(
        name: impl Into<String>,
        stage: PipelineStage,
        resource_type: ResourceType,
    ) -> Self {
        Self::new(name, Access::WRITE, stage, resource_type)
    }

    pub fn read_write(
        name: impl Into<String>,
        stage: PipelineStage,
        resource_type: ResourceType,
    ) -> Self {
        Self::new(name, Access::READ_WRITE, stage, resource_type)
    }

    /// Make this usage create the resource.
    pub fn with_create(mut self, params: impl Into<ResourceCreateParams>) -> Self {
        self.create = Some(params.into());
        self
    }

    pub fn multi_buffered(mut self) -> Self {
        self.multi_buffered = true;
        self
    }

    pub fn owned_by_engine(mut self) -> Self {
        self.owned_by_engine = true;
        self
    }

    pub fn is_write(&self) -> bool {
        self.access.is_write()
    }

    pub fn required_layout(&self) -> Option<ImageLayout> {
        self.resource_type.required_layout(self.access)
    }
}
