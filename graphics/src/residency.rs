//! GPU residency of scene assets.
//!
//! The [`ResidencyManager`] owns the fat vertex/index buffers, one staging
//! buffer per frame in flight, the bindless texture table and the upload queue. It ingests
//! [`AssetUpdate`] batches, keeps track of which meshes and textures are
//! resident, and turns the current renderables into [`DrawItem`]s.
//!
//! Removing an asset whose upload has not finished does not cancel the upload.
//! When it completes, the manager notices the asset is gone and retires the
//! freshly written ranges along with the frame that copied into them. Retired
//! ranges are only released once every frame in flight that could still touch
//! them has completed.

use std::collections::{BTreeMap, HashMap, VecDeque};

use meridian_core::ids::{MaterialId, ModelId, RenderableId, TextureId};
use meridian_core::math::mat4_to_cols_array_2d;
use meridian_core::scene::{AssetUpdate, Material, Renderable};

use crate::context::{DrawItem, RenderContext};
use crate::error::GraphicsError;
use crate::renderer::RendererConfig;
use crate::resources::{BindlessTable, FatBuffer, ResourceHandle, StagingBuffer};
use crate::types::{BufferHandle, BufferUsage, CommandBufferHandle};
use crate::upload::{
    InternalMesh, InternalTexture, UploadEvent, UploadQueue, UploadReport, UploadTargets,
};

/// Counters describing what is resident.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResidencyStats {
    pub models: usize,
    pub resident_meshes: usize,
    pub resident_textures: usize,
    pub materials: usize,
    pub renderables: usize,
    pub pending_meshes: usize,
    pub pending_textures: usize,
    pub vertex_bytes_used: u64,
    pub index_bytes_used: u64,
    /// Uploads that finished after their asset had been removed.
    pub orphans_reclaimed: u64,
}

#[derive(Debug)]
struct ModelEntry {
    name: String,
    mesh_count: usize,
    meshes: Vec<InternalMesh>,
}

#[derive(Debug)]
enum TextureEntry {
    Pending,
    Resident(InternalTexture),
}

/// GPU objects waiting for the frames that may read them to finish.
#[derive(Debug, Default)]
struct Retired {
    vertex_ranges: Vec<ResourceHandle>,
    index_ranges: Vec<ResourceHandle>,
    textures: Vec<InternalTexture>,
}

impl Retired {
    fn is_empty(&self) -> bool {
        self.vertex_ranges.is_empty() && self.index_ranges.is_empty() && self.textures.is_empty()
    }
}

/// Tracks scene assets and their GPU counterparts.
///
/// Render-thread only.
#[derive(Debug)]
pub struct ResidencyManager {
    vertices: FatBuffer,
    indices: FatBuffer,
    /// Indexed by frame-in-flight slot.
    staging: Vec<StagingBuffer>,
    bindless: BindlessTable,
    queue: UploadQueue,
    models: HashMap<ModelId, ModelEntry>,
    textures: HashMap<TextureId, TextureEntry>,
    materials: HashMap<MaterialId, Material>,
    renderables: BTreeMap<RenderableId, Renderable>,
    /// Retired objects tagged with the first frame that no longer uses them.
    retired: VecDeque<(u64, Retired)>,
    orphans_reclaimed: u64,
}

impl ResidencyManager {
    /// Create the fat buffers, staging buffers and bindless table.
    ///
    /// `staging_buffer_size` is the budget of each frame slot.
    pub fn new(ctx: &mut dyn RenderContext, config: &RendererConfig) -> Result<Self, GraphicsError> {
        let vertices = FatBuffer::new(
            ctx,
            "fat_vertex_buffer",
            config.vertex_buffer_size,
            BufferUsage::VERTEX | BufferUsage::STORAGE,
        )?;
        let indices = FatBuffer::new(
            ctx,
            "fat_index_buffer",
            config.index_buffer_size,
            BufferUsage::INDEX | BufferUsage::STORAGE,
        )?;
        let staging = (0..ctx.frames_in_flight().max(1))
            .map(|slot| StagingBuffer::new(ctx, config.staging_buffer_size, &format!("upload{slot}")))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            vertices,
            indices,
            staging,
            bindless: BindlessTable::new(config.max_bindless_textures),
            queue: UploadQueue::new(),
            models: HashMap::new(),
            textures: HashMap::new(),
            materials: HashMap::new(),
            renderables: BTreeMap::new(),
            retired: VecDeque::new(),
            orphans_reclaimed: 0,
        })
    }

    /// Apply a batch of scene changes.
    ///
    /// Removals are applied before additions. Animation and skeleton entries
    /// are ignored here; they belong to the animation thread.
    pub fn apply_update(&mut self, ctx: &dyn RenderContext, update: AssetUpdate) {
        meridian_core::profile_scope!("residency_apply_update");

        let mut retired = Retired::default();

        for id in update.removed_renderables {
            if self.renderables.remove(&id).is_none() {
                log::warn!("Cannot remove unknown renderable {}", id);
            }
        }
        for id in update.removed_materials {
            if self.materials.remove(&id).is_none() {
                log::warn!("Cannot remove unknown material {}", id);
            }
        }
        for id in update.removed_models {
            match self.models.remove(&id) {
                Some(entry) => {
                    for mesh in entry.meshes {
                        retired.vertex_ranges.push(mesh.vertex_handle);
                        if mesh.index_handle.is_valid() {
                            retired.index_ranges.push(mesh.index_handle);
                        }
                    }
                    log::debug!("Removed model {} '{}'", id, entry.name);
                }
                None => log::warn!("Cannot remove unknown model {}", id),
            }
        }
        for id in update.removed_textures {
            match self.textures.remove(&id) {
                Some(TextureEntry::Resident(texture)) => retired.textures.push(texture),
                Some(TextureEntry::Pending) => {}
                None => log::warn!("Cannot remove unknown texture {}", id),
            }
        }
        if !retired.is_empty() {
            self.retired.push_back((ctx.frame_index(), retired));
        }

        for texture in update.added_textures {
            if self.textures.contains_key(&texture.id) {
                log::warn!("Texture {} is already known, ignoring", texture.id);
                continue;
            }
            self.textures.insert(texture.id, TextureEntry::Pending);
            self.queue.add_texture(texture);
        }
        for material in update.added_materials {
            for texture in material.textures() {
                if !self.textures.contains_key(&texture) {
                    log::warn!(
                        "Material {} references unknown texture {}",
                        material.id,
                        texture
                    );
                }
            }
            self.materials.insert(material.id, material);
        }
        for model in update.added_models {
            if self.models.contains_key(&model.id) {
                log::warn!("Model {} is already known, ignoring", model.id);
                continue;
            }
            self.models.insert(
                model.id,
                ModelEntry {
                    name: model.name.clone(),
                    mesh_count: model.meshes.len(),
                    meshes: Vec::with_capacity(model.meshes.len()),
                },
            );
            self.queue.add_model(model);
        }
        for renderable in update.added_renderables {
            if !self.models.contains_key(&renderable.model) {
                log::warn!(
                    "Renderable {} references unknown model {}, ignoring",
                    renderable.id,
                    renderable.model
                );
                continue;
            }
            self.renderables.insert(renderable.id, renderable);
        }
    }

    /// Release retired objects, then stream queued uploads into `cmd`.
    pub fn upload(&mut self, ctx: &mut dyn RenderContext, cmd: CommandBufferHandle) -> UploadReport {
        self.release_retired(ctx, false);

        // Only this slot's staging buffer was fenced by begin_frame.
        let slot = ctx.frame_slot() % self.staging.len();
        let mut events = Vec::new();
        let report = self.queue.execute(
            ctx,
            cmd,
            UploadTargets {
                staging: &mut self.staging[slot],
                vertices: &mut self.vertices,
                indices: &mut self.indices,
                bindless: &mut self.bindless,
            },
            &mut |event| events.push(event),
        );
        for event in events {
            self.on_uploaded(ctx, event);
        }
        report
    }

    fn on_uploaded(&mut self, ctx: &dyn RenderContext, event: UploadEvent) {
        // The copies were recorded into the current frame.
        let first_idle_frame = ctx.frame_index() + 1;
        let mut orphan = Retired::default();
        match event {
            UploadEvent::Mesh(mesh) => match self.models.get_mut(&mesh.model) {
                Some(entry) => entry.meshes.push(mesh),
                None => {
                    log::debug!(
                        "Model {} was removed during upload, reclaiming mesh {}",
                        mesh.model,
                        mesh.mesh
                    );
                    orphan.vertex_ranges.push(mesh.vertex_handle);
                    if mesh.index_handle.is_valid() {
                        orphan.index_ranges.push(mesh.index_handle);
                    }
                    self.orphans_reclaimed += 1;
                }
            },
            UploadEvent::Texture(texture) => match self.textures.get_mut(&texture.texture) {
                Some(entry) => *entry = TextureEntry::Resident(texture),
                None => {
                    log::debug!(
                        "Texture {} was removed during upload, reclaiming it",
                        texture.texture
                    );
                    orphan.textures.push(texture);
                    self.orphans_reclaimed += 1;
                }
            },
        }
        if !orphan.is_empty() {
            self.retired.push_back((first_idle_frame, orphan));
        }
    }

    fn release_texture(&mut self, ctx: &mut dyn RenderContext, texture: &InternalTexture) {
        if let Some(slot) = texture.bindless_slot {
            self.bindless.remove(slot);
        }
        ctx.destroy_image(texture.image);
    }

    /// Free retired objects no frame in flight can still read, or all of them.
    fn release_retired(&mut self, ctx: &mut dyn RenderContext, all: bool) {
        let frame = ctx.frame_index();
        // Frames before `retired_at` may have read the objects; the last of
        // them has completed once frame `retired_at - 1 + frames_in_flight`
        // begins.
        let frames_in_flight = ctx.frames_in_flight().max(1) as u64;
        while let Some(&(retired_at, _)) = self.retired.front() {
            if !all && retired_at + frames_in_flight - 1 > frame {
                break;
            }
            let Some((_, retired)) = self.retired.pop_front() else {
                break;
            };
            for handle in retired.vertex_ranges {
                self.vertices.free(handle);
            }
            for handle in retired.index_ranges {
                self.indices.free(handle);
            }
            for texture in &retired.textures {
                self.release_texture(ctx, texture);
            }
        }
    }

    /// Draw items of every visible renderable with resident meshes, ordered by
    /// renderable id and then mesh order.
    pub fn draw_items(&self) -> Vec<DrawItem> {
        let mut items = Vec::new();
        for renderable in self.renderables.values().filter(|r| r.visible) {
            let Some(model) = self.models.get(&renderable.model) else {
                continue;
            };
            let transform = mat4_to_cols_array_2d(&renderable.transform);
            for mesh in &model.meshes {
                items.push(DrawItem {
                    renderable: renderable.id,
                    model: renderable.model,
                    mesh: mesh.mesh,
                    draw: mesh.draw(self.vertices.buffer(), self.indices.buffer()),
                    transform,
                    base_color_texture: mesh
                        .material
                        .and_then(|id| self.base_color_slot(id)),
                    bounds: mesh.bounds,
                });
            }
        }
        items
    }

    /// Bindless slot of a material's base color texture, if resident.
    pub fn base_color_slot(&self, material: MaterialId) -> Option<u32> {
        let texture = self.materials.get(&material)?.base_color_texture?;
        self.texture(texture)?.bindless_slot
    }

    pub fn texture(&self, id: TextureId) -> Option<&InternalTexture> {
        match self.textures.get(&id)? {
            TextureEntry::Resident(texture) => Some(texture),
            TextureEntry::Pending => None,
        }
    }

    /// Resident meshes of a model, in upload order.
    pub fn meshes(&self, id: ModelId) -> Option<&[InternalMesh]> {
        self.models.get(&id).map(|m| m.meshes.as_slice())
    }

    /// Whether every mesh of the model is resident.
    pub fn is_model_resident(&self, id: ModelId) -> bool {
        self.models
            .get(&id)
            .is_some_and(|m| m.meshes.len() == m.mesh_count)
    }

    pub fn material(&self, id: MaterialId) -> Option<&Material> {
        self.materials.get(&id)
    }

    pub fn renderable(&self, id: RenderableId) -> Option<&Renderable> {
        self.renderables.get(&id)
    }

    pub fn vertex_buffer(&self) -> BufferHandle {
        self.vertices.buffer()
    }

    pub fn index_buffer(&self) -> BufferHandle {
        self.indices.buffer()
    }

    pub fn bindless(&self) -> &BindlessTable {
        &self.bindless
    }

    pub fn has_pending_uploads(&self) -> bool {
        !self.queue.is_empty()
    }

    pub fn stats(&self) -> ResidencyStats {
        ResidencyStats {
            models: self.models.len(),
            resident_meshes: self.models.values().map(|m| m.meshes.len()).sum(),
            resident_textures: self
                .textures
                .values()
                .filter(|t| matches!(t, TextureEntry::Resident(_)))
                .count(),
            materials: self.materials.len(),
            renderables: self.renderables.len(),
            pending_meshes: self.queue.pending_meshes(),
            pending_textures: self.queue.pending_textures(),
            vertex_bytes_used: self.vertices.allocator().used_bytes(),
            index_bytes_used: self.indices.allocator().used_bytes(),
            orphans_reclaimed: self.orphans_reclaimed,
        }
    }

    /// Destroy every GPU object. Call after the device is idle.
    pub fn destroy(mut self, ctx: &mut dyn RenderContext) {
        self.release_retired(ctx, true);
        let resident: Vec<InternalTexture> = self
            .textures
            .drain()
            .filter_map(|(_, entry)| match entry {
                TextureEntry::Resident(texture) => Some(texture),
                TextureEntry::Pending => None,
            })
            .collect();
        for texture in &resident {
            self.release_texture(ctx, texture);
        }
        for staging in self.staging.drain(..) {
            staging.destroy(ctx);
        }
        self.vertices.destroy(ctx);
        self.indices.destroy(ctx);
    }
}
