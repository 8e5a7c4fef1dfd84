//! The asset update batch.

use crate::animation::Animation;
use crate::ids::{
    AnimationId, MaterialId, ModelId, RenderableId, SkeletonId, TextureId,
};
use crate::skeleton::Skeleton;

use super::{Material, Model, Renderable, Texture};

/// A batch of scene changes handed to the renderer.
///
/// Additions transfer ownership of the asset data. Removals name assets by id;
/// removing an id the renderer never saw is logged and ignored downstream.
#[derive(Debug, Default)]
pub struct AssetUpdate {
    pub added_models: Vec<Model>,
    pub removed_models: Vec<ModelId>,
    pub added_textures: Vec<Texture>,
    pub removed_textures: Vec<TextureId>,
    pub added_materials: Vec<Material>,
    pub removed_materials: Vec<MaterialId>,
    pub added_animations: Vec<Animation>,
    pub removed_animations: Vec<AnimationId>,
    pub added_skeletons: Vec<Skeleton>,
    pub removed_skeletons: Vec<SkeletonId>,
    pub added_renderables: Vec<Renderable>,
    pub removed_renderables: Vec<RenderableId>,
}

impl AssetUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, model: Model) -> Self {
        self.added_models.push(model);
        self
    }

    pub fn with_texture(mut self, texture: Texture) -> Self {
        self.added_textures.push(texture);
        self
    }

    pub fn with_material(mut self, material: Material) -> Self {
        self.added_materials.push(material);
        self
    }

    pub fn with_renderable(mut self, renderable: Renderable) -> Self {
        self.added_renderables.push(renderable);
        self
    }

    pub fn with_skeleton(mut self, skeleton: Skeleton) -> Self {
        self.added_skeletons.push(skeleton);
        self
    }

    pub fn with_animation(mut self, animation: Animation) -> Self {
        self.added_animations.push(animation);
        self
    }

    pub fn remove_model(mut self, id: ModelId) -> Self {
        self.removed_models.push(id);
        self
    }

    pub fn remove_texture(mut self, id: TextureId) -> Self {
        self.removed_textures.push(id);
        self
    }

    pub fn remove_renderable(mut self, id: RenderableId) -> Self {
        self.removed_renderables.push(id);
        self
    }

    /// Append another batch, keeping the order of both.
    pub fn merge(&mut self, other: AssetUpdate) {
        self.added_models.extend(other.added_models);
        self.removed_models.extend(other.removed_models);
        self.added_textures.extend(other.added_textures);
        self.removed_textures.extend(other.removed_textures);
        self.added_materials.extend(other.added_materials);
        self.removed_materials.extend(other.removed_materials);
        self.added_animations.extend(other.added_animations);
        self.removed_animations.extend(other.removed_animations);
        self.added_skeletons.extend(other.added_skeletons);
        self.removed_skeletons.extend(other.removed_skeletons);
        self.added_renderables.extend(other.added_renderables);
        self.removed_renderables.extend(other.removed_renderables);
    }

    /// Split off the animation-related parts for the animation thread.
    pub fn take_animation_part(&mut self) -> AssetUpdate {
        AssetUpdate {
            added_animations: std::mem::take(&mut self.added_animations),
            removed_animations: std::mem::take(&mut self.removed_animations),
            added_skeletons: std::mem::take(&mut self.added_skeletons),
            removed_skeletons: std::mem::take(&mut self.removed_skeletons),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added_models.is_empty()
            && self.removed_models.is_empty()
            && self.added_textures.is_empty()
            && self.removed_textures.is_empty()
            && self.added_materials.is_empty()
            && self.removed_materials.is_empty()
            && self.added_animations.is_empty()
            && self.removed_animations.is_empty()
            && self.added_skeletons.is_empty()
            && self.removed_skeletons.is_empty()
            && self.added_renderables.is_empty()
            && self.removed_renderables.is_empty()
    }
}
