//! Streaming of mesh and texture data into GPU memory.
//!
//! The [`UploadQueue`] owns assets waiting for upload. Once per frame,
//! [`UploadQueue::execute`] moves as much as fits in the staging buffer into
//! the fat vertex/index buffers and freshly created images, recording the
//! copies into the frame's command buffer. Whatever does not fit carries over
//! to the next frame in the same order.
//!
//! Meshes go first, then textures. Each finished asset is reported through the
//! `on_uploaded` callback as an [`UploadEvent`].

mod mips;

use std::collections::VecDeque;

use meridian_core::ids::{MaterialId, MeshId, ModelId, TextureId};
use meridian_core::scene::{Aabb, Model, Texture, Vertex};

pub use mips::record_mip_chain;

use crate::context::{MeshDraw, RenderContext};
use crate::error::GraphicsError;
use crate::resources::{BindlessTable, FatBuffer, ResourceHandle, StagingBuffer};
use crate::types::{
    Access, Barrier, BufferCopy, BufferHandle, BufferImageCopy, CommandBufferHandle, Extent3d,
    ImageHandle, ImageLayout, PipelineStage, TextureDescriptor, TextureFormat, TextureUsage,
};

/// Staging alignment of texture data.
pub const TEXTURE_STAGING_ALIGNMENT: u64 = 8;

/// Size of one index in the fat index buffer.
pub const INDEX_SIZE: u64 = std::mem::size_of::<u32>() as u64;

/// Stages that consume uploaded geometry.
const GEOMETRY_STAGES: PipelineStage = PipelineStage::VERTEX_INPUT
    .union(PipelineStage::VERTEX_SHADER)
    .union(PipelineStage::COMPUTE);

/// A mesh resident in the fat buffers.
#[derive(Debug, Clone, PartialEq)]
pub struct InternalMesh {
    pub mesh: MeshId,
    pub model: ModelId,
    pub material: Option<MaterialId>,
    pub vertex_handle: ResourceHandle,
    /// Invalid for non-indexed meshes.
    pub index_handle: ResourceHandle,
    pub vertex_count: u32,
    pub index_count: u32,
    /// First vertex, in vertices.
    pub vertex_offset: i64,
    /// First index, in indices; `-1` without indices.
    pub index_offset: i64,
    pub bounds: Aabb,
}

impl InternalMesh {
    pub fn is_indexed(&self) -> bool {
        self.index_offset >= 0
    }

    /// Draw arguments against the fat buffers this mesh lives in.
    pub fn draw(&self, vertex_buffer: BufferHandle, index_buffer: BufferHandle) -> MeshDraw {
        MeshDraw {
            vertex_buffer,
            index_buffer: self.is_indexed().then_some(index_buffer),
            vertex_offset: self.vertex_offset as i32,
            first_index: self.index_offset.max(0) as u32,
            index_count: self.index_count,
            vertex_count: self.vertex_count,
            instance_count: 1,
            first_instance: 0,
        }
    }
}

/// A texture resident as a sampled image.
#[derive(Debug, Clone, PartialEq)]
pub struct InternalTexture {
    pub texture: TextureId,
    pub image: ImageHandle,
    pub extent: Extent3d,
    pub format: TextureFormat,
    pub mip_count: u32,
    /// `None` when the bindless table was full.
    pub bindless_slot: Option<u32>,
}

static_assertions::assert_impl_all!(InternalMesh: Send, Sync);
static_assertions::assert_impl_all!(InternalTexture: Send, Sync);

/// Notification of one finished upload.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadEvent {
    Mesh(InternalMesh),
    Texture(InternalTexture),
}

/// Destinations of an upload pass.
pub struct UploadTargets<'a> {
    pub staging: &'a mut StagingBuffer,
    pub vertices: &'a mut FatBuffer,
    pub indices: &'a mut FatBuffer,
    pub bindless: &'a mut BindlessTable,
}

/// What one [`UploadQueue::execute`] call did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadReport {
    pub meshes_uploaded: usize,
    pub textures_uploaded: usize,
    /// Items dropped because they can never be uploaded.
    pub dropped: usize,
    pub bytes_staged: u64,
    /// Whether work was left for a later frame for lack of staging space.
    pub deferred: bool,
}

#[derive(Debug)]
struct PendingModel {
    model: Model,
    /// Next mesh to upload.
    cursor: usize,
}

/// FIFO queues of assets waiting for GPU upload.
#[derive(Debug, Default)]
pub struct UploadQueue {
    models: VecDeque<PendingModel>,
    textures: VecDeque<Texture>,
}

impl UploadQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_model(&mut self, model: Model) {
        log::trace!(
            "Queued model {:?} ({} meshes, {} bytes)",
            model.id,
            model.meshes.len(),
            model.byte_size()
        );
        self.models.push_back(PendingModel { model, cursor: 0 });
    }

    pub fn add_texture(&mut self, texture: Texture) {
        log::trace!(
            "Queued texture {:?} ({}x{})",
            texture.id,
            texture.width,
            texture.height
        );
        self.textures.push_back(texture);
    }

    pub fn pending_models(&self) -> usize {
        self.models.len()
    }

    /// Meshes not yet uploaded across all queued models.
    pub fn pending_meshes(&self) -> usize {
        self.models
            .iter()
            .map(|p| p.model.meshes.len() - p.cursor)
            .sum()
    }

    pub fn pending_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty() && self.textures.is_empty()
    }

    pub fn contains_model(&self, id: ModelId) -> bool {
        self.models.iter().any(|p| p.model.id == id)
    }

    pub fn contains_texture(&self, id: TextureId) -> bool {
        self.textures.iter().any(|t| t.id == id)
    }

    /// Upload as much queued work as the staging buffer allows.
    ///
    /// Rewinds the staging cursor first; the caller must only pass a staging
    /// buffer whose previous copies the GPU has finished.
    pub fn execute(
        &mut self,
        ctx: &mut dyn RenderContext,
        cmd: CommandBufferHandle,
        targets: UploadTargets<'_>,
        on_uploaded: &mut dyn FnMut(UploadEvent),
    ) -> UploadReport {
        meridian_core::profile_scope!("upload_queue_execute");

        let UploadTargets {
            staging,
            vertices,
            indices,
            bindless,
        } = targets;
        staging.reset();

        let mut report = UploadReport::default();
        let meshes_deferred =
            self.upload_meshes(ctx, cmd, staging, vertices, indices, on_uploaded, &mut report);
        let textures_deferred =
            self.upload_textures(ctx, cmd, staging, bindless, on_uploaded, &mut report);
        report.deferred = meshes_deferred || textures_deferred;
        report.bytes_staged = staging.current_offset();

        if report.deferred {
            log::debug!(
                "Upload budget exhausted: {} meshes and {} textures carried over",
                self.pending_meshes(),
                self.pending_textures()
            );
        }
        report
    }

    /// Returns whether meshes were deferred for lack of staging space.
    #[allow(clippy::too_many_arguments)]
    fn upload_meshes(
        &mut self,
        ctx: &mut dyn RenderContext,
        cmd: CommandBufferHandle,
        staging: &mut StagingBuffer,
        vertices: &mut FatBuffer,
        indices: &mut FatBuffer,
        on_uploaded: &mut dyn FnMut(UploadEvent),
        report: &mut UploadReport,
    ) -> bool {
        while let Some(pending) = self.models.front_mut() {
            while pending.cursor < pending.model.meshes.len() {
                let model_id = pending.model.id;
                let mesh = &pending.model.meshes[pending.cursor];
                let size = mesh.byte_size();

                if size > staging.capacity() {
                    log::error!(
                        "Mesh {:?} of model {:?} needs {} bytes but the staging buffer holds {}, dropping it",
                        mesh.id,
                        model_id,
                        size,
                        staging.capacity()
                    );
                    pending.cursor += 1;
                    report.dropped += 1;
                    continue;
                }
                if !staging.can_fit(size, 1) {
                    return true;
                }

                match upload_mesh(ctx, cmd, staging, vertices, indices, model_id, mesh) {
                    Ok(Some(internal)) => {
                        report.meshes_uploaded += 1;
                        on_uploaded(UploadEvent::Mesh(internal));
                    }
                    Ok(None) => {}
                    Err(e) => {
                        log::error!("Failed to upload mesh {:?}: {}", mesh.id, e);
                    }
                }
                pending.cursor += 1;
            }
            self.models.pop_front();
        }
        false
    }

    /// Returns whether textures were deferred for lack of staging space.
    fn upload_textures(
        &mut self,
        ctx: &mut dyn RenderContext,
        cmd: CommandBufferHandle,
        staging: &mut StagingBuffer,
        bindless: &mut BindlessTable,
        on_uploaded: &mut dyn FnMut(UploadEvent),
        report: &mut UploadReport,
    ) -> bool {
        while let Some(texture) = self.textures.front() {
            let size = texture.byte_size();
            let expected = u64::from(texture.width)
                * u64::from(texture.height)
                * u64::from(texture.format.bytes_per_pixel());

            if size == 0 || size != expected {
                log::error!(
                    "Texture {:?} '{}' has {} bytes of data for {}x{}, dropping it",
                    texture.id,
                    texture.name,
                    size,
                    texture.width,
                    texture.height
                );
                self.textures.pop_front();
                report.dropped += 1;
                continue;
            }
            if size > staging.capacity() {
                log::error!(
                    "Texture {:?} '{}' needs {} bytes but the staging buffer holds {}, dropping it",
                    texture.id,
                    texture.name,
                    size,
                    staging.capacity()
                );
                self.textures.pop_front();
                report.dropped += 1;
                continue;
            }
            if !staging.can_fit(size, TEXTURE_STAGING_ALIGNMENT) {
                return true;
            }

            let Some(texture) = self.textures.pop_front() else {
                break;
            };
            match upload_texture(ctx, cmd, staging, bindless, &texture) {
                Ok(internal) => {
                    report.textures_uploaded += 1;
                    on_uploaded(UploadEvent::Texture(internal));
                }
                Err(e) => {
                    log::error!(
                        "Failed to upload texture {:?} '{}': {}",
                        texture.id,
                        texture.name,
                        e
                    );
                }
            }
        }
        false
    }
}

/// Stage one mesh and record its copies.
///
/// `Ok(None)` means the fat buffers had no room; the mesh is skipped and the
/// staging cursor is left untouched.
fn upload_mesh(
    ctx: &mut dyn RenderContext,
    cmd: CommandBufferHandle,
    staging: &mut StagingBuffer,
    vertices: &mut FatBuffer,
    indices: &mut FatBuffer,
    model: ModelId,
    mesh: &meridian_core::scene::Mesh,
) -> Result<Option<InternalMesh>, GraphicsError> {
    let vertex_bytes = mesh.vertex_bytes();
    let index_bytes = mesh.index_bytes();

    let vertex_handle = vertices.allocate(vertex_bytes.len() as u64);
    if !vertex_handle.is_valid() {
        log::error!(
            "Fat buffer '{}' cannot hold {} bytes for mesh {:?}, skipping it",
            vertices.label(),
            vertex_bytes.len(),
            mesh.id
        );
        return Ok(None);
    }

    let index_handle = if index_bytes.is_empty() {
        ResourceHandle::INVALID
    } else {
        let handle = indices.allocate(index_bytes.len() as u64);
        if !handle.is_valid() {
            log::error!(
                "Fat buffer '{}' cannot hold {} bytes for mesh {:?}, skipping it",
                indices.label(),
                index_bytes.len(),
                mesh.id
            );
            vertices.free(vertex_handle);
            return Ok(None);
        }
        handle
    };

    let release = |vertices: &mut FatBuffer, indices: &mut FatBuffer| {
        vertices.free(vertex_handle);
        if index_handle.is_valid() {
            indices.free(index_handle);
        }
    };

    let Some(allocation) = staging.allocate(mesh.byte_size(), 1) else {
        release(vertices, indices);
        return Ok(None);
    };
    let staged = staging
        .write(ctx, &allocation, 0, vertex_bytes)
        .and_then(|()| {
            staging.write(ctx, &allocation, vertex_bytes.len() as u64, index_bytes)
        });
    if let Err(e) = staged {
        release(vertices, indices);
        return Err(e);
    }

    let mut barriers = Vec::with_capacity(2);
    ctx.copy_buffer(
        cmd,
        staging.buffer(),
        vertices.buffer(),
        &[BufferCopy::new(
            allocation.offset,
            vertex_handle.offset as u64,
            vertex_handle.size,
        )],
    );
    barriers.push(Barrier::buffer_range(
        vertices.buffer(),
        vertex_handle.offset as u64,
        vertex_handle.size,
        (Access::WRITE, PipelineStage::TRANSFER),
        (Access::READ, GEOMETRY_STAGES),
    ));
    if index_handle.is_valid() {
        ctx.copy_buffer(
            cmd,
            staging.buffer(),
            indices.buffer(),
            &[BufferCopy::new(
                allocation.offset + vertex_handle.size,
                index_handle.offset as u64,
                index_handle.size,
            )],
        );
        barriers.push(Barrier::buffer_range(
            indices.buffer(),
            index_handle.offset as u64,
            index_handle.size,
            (Access::WRITE, PipelineStage::TRANSFER),
            (Access::READ, GEOMETRY_STAGES),
        ));
    }
    ctx.pipeline_barrier(cmd, &barriers);

    Ok(Some(InternalMesh {
        mesh: mesh.id,
        model,
        material: mesh.material,
        vertex_handle,
        index_handle,
        vertex_count: mesh.vertex_count(),
        index_count: mesh.index_count(),
        vertex_offset: vertex_handle.offset / Vertex::SIZE as i64,
        index_offset: if index_handle.is_valid() {
            index_handle.offset / INDEX_SIZE as i64
        } else {
            -1
        },
        bounds: mesh.bounds,
    }))
}

/// Stage one texture, create its image and record the copy and mip chain.
fn upload_texture(
    ctx: &mut dyn RenderContext,
    cmd: CommandBufferHandle,
    staging: &mut StagingBuffer,
    bindless: &mut BindlessTable,
    texture: &Texture,
) -> Result<InternalTexture, GraphicsError> {
    let extent = Extent3d::new_2d(texture.width, texture.height);
    let format = TextureFormat::from(texture.format);
    let mip_count = texture.full_mip_count();

    let allocation = staging
        .allocate(texture.byte_size(), TEXTURE_STAGING_ALIGNMENT)
        .ok_or(GraphicsError::OutOfMemory)?;
    staging.write(ctx, &allocation, 0, &texture.data)?;

    let descriptor = TextureDescriptor::new_2d(
        texture.width,
        texture.height,
        format,
        TextureUsage::COPY_SRC | TextureUsage::COPY_DST | TextureUsage::TEXTURE_BINDING,
    )
    .with_mip_levels(mip_count)
    .with_label(texture.name.clone());
    let image = ctx.create_image(&descriptor)?;

    ctx.pipeline_barrier(
        cmd,
        &[Barrier::image(
            image,
            ImageLayout::Undefined,
            ImageLayout::TransferDst,
            (Access::empty(), PipelineStage::TRANSFER),
            (Access::WRITE, PipelineStage::TRANSFER),
        )],
    );
    ctx.copy_buffer_to_image(
        cmd,
        staging.buffer(),
        image,
        &BufferImageCopy {
            buffer_offset: allocation.offset,
            mip_level: 0,
            extent,
        },
    );
    record_mip_chain(ctx, cmd, image, mip_count);

    let bindless_slot = bindless.insert(image);
    log::trace!(
        "Uploaded texture {:?} '{}' ({}x{}, {} mips, slot {:?})",
        texture.id,
        texture.name,
        texture.width,
        texture.height,
        mip_count,
        bindless_slot
    );

    Ok(InternalTexture {
        texture: texture.id,
        image,
        extent,
        format,
        mip_count,
        bindless_slot,
    })
}
