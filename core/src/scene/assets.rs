//! Asset data types.

use bytemuck::{Pod, Zeroable};

use crate::ids::{MaterialId, MeshId, ModelId, RenderableId, SkeletonId, TextureId};
use crate::math::Mat4;

/// Interleaved vertex as stored in the fat vertex buffer.
///
/// The layout is `#[repr(C)]` and padding-free so meshes can be copied into
/// GPU memory as raw bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
    pub tangent: [f32; 4],
    /// Indices of the joints influencing this vertex.
    pub joints: [u32; 4],
    /// Skinning weights matching `joints`.
    pub weights: [f32; 4],
}

impl Vertex {
    /// Size of one vertex in bytes.
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;

    /// Vertex with only a position set.
    pub fn from_position(position: [f32; 3]) -> Self {
        Self {
            position,
            ..Self::default()
        }
    }
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: [f32; 3],
    pub max: [f32; 3],
}

impl Aabb {
    /// An inverted box that any point will expand.
    pub const EMPTY: Self = Self {
        min: [f32::MAX; 3],
        max: [f32::MIN; 3],
    };

    /// Compute the bounds of a vertex set. Empty input yields [`Aabb::EMPTY`].
    pub fn from_vertices(vertices: &[Vertex]) -> Self {
        let mut aabb = Self::EMPTY;
        for v in vertices {
            for axis in 0..3 {
                aabb.min[axis] = aabb.min[axis].min(v.position[axis]);
                aabb.max[axis] = aabb.max[axis].max(v.position[axis]);
            }
        }
        aabb
    }

    /// Whether the box contains at least one point.
    pub fn is_valid(&self) -> bool {
        (0..3).all(|axis| self.min[axis] <= self.max[axis])
    }

    pub fn center(&self) -> [f32; 3] {
        [
            (self.min[0] + self.max[0]) * 0.5,
            (self.min[1] + self.max[1]) * 0.5,
            (self.min[2] + self.max[2]) * 0.5,
        ]
    }

    /// Radius of the sphere enclosing the box.
    pub fn radius(&self) -> f32 {
        let dx = self.max[0] - self.min[0];
        let dy = self.max[1] - self.min[1];
        let dz = self.max[2] - self.min[2];
        (dx * dx + dy * dy + dz * dz).sqrt() * 0.5
    }
}

impl Default for Aabb {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// A single drawable primitive of a model.
#[derive(Debug, Clone)]
pub struct Mesh {
    pub id: MeshId,
    pub vertices: Vec<Vertex>,
    /// 32-bit indices. Empty for non-indexed meshes.
    pub indices: Vec<u32>,
    pub material: Option<MaterialId>,
    pub bounds: Aabb,
}

impl Mesh {
    /// Create a mesh and compute its bounds from the vertices.
    pub fn new(id: MeshId, vertices: Vec<Vertex>, indices: Vec<u32>) -> Self {
        let bounds = Aabb::from_vertices(&vertices);
        Self {
            id,
            vertices,
            indices,
            material: None,
            bounds,
        }
    }

    /// Set the material.
    pub fn with_material(mut self, material: MaterialId) -> Self {
        self.material = Some(material);
        self
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertices.len() as u32
    }

    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }

    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }

    /// Combined vertex + index byte size.
    pub fn byte_size(&self) -> u64 {
        (self.vertex_bytes().len() + self.index_bytes().len()) as u64
    }
}

/// A model: an ordered list of meshes, optionally skinned.
///
/// Mesh order is significant: meshes are uploaded in declaration order and
/// downstream batching relies on it.
#[derive(Debug, Clone)]
pub struct Model {
    pub id: ModelId,
    pub name: String,
    pub meshes: Vec<Mesh>,
    pub skeleton: Option<SkeletonId>,
}

impl Model {
    pub fn new(id: ModelId, name: impl Into<String>, meshes: Vec<Mesh>) -> Self {
        Self {
            id,
            name: name.into(),
            meshes,
            skeleton: None,
        }
    }

    /// Set the skeleton driving this model.
    pub fn with_skeleton(mut self, skeleton: SkeletonId) -> Self {
        self.skeleton = Some(skeleton);
        self
    }

    /// Total bytes of all meshes.
    pub fn byte_size(&self) -> u64 {
        self.meshes.iter().map(Mesh::byte_size).sum()
    }
}

/// Pixel format of texture source data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureDataFormat {
    /// 8-bit RGBA, linear.
    #[default]
    Rgba8Unorm,
    /// 8-bit RGBA, sRGB encoded.
    Rgba8Srgb,
}

impl TextureDataFormat {
    pub fn bytes_per_pixel(self) -> u32 {
        4
    }
}

/// A 2D texture with tightly packed pixel data for mip level 0.
#[derive(Debug, Clone)]
pub struct Texture {
    pub id: TextureId,
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub format: TextureDataFormat,
    pub data: Vec<u8>,
}

impl Texture {
    pub fn new(
        id: TextureId,
        name: impl Into<String>,
        width: u32,
        height: u32,
        format: TextureDataFormat,
        data: Vec<u8>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            width,
            height,
            format,
            data,
        }
    }

    pub fn byte_size(&self) -> u64 {
        self.data.len() as u64
    }

    /// Number of levels in a full mip chain down to 1x1.
    pub fn full_mip_count(&self) -> u32 {
        32 - self.width.max(self.height).max(1).leading_zeros()
    }
}

/// Surface parameters referencing textures by id.
#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    pub id: MaterialId,
    pub base_color_factor: [f32; 4],
    pub base_color_texture: Option<TextureId>,
    pub normal_texture: Option<TextureId>,
    pub metallic_roughness_texture: Option<TextureId>,
    pub metallic: f32,
    pub roughness: f32,
}

impl Material {
    pub fn new(id: MaterialId) -> Self {
        Self {
            id,
            base_color_factor: [1.0; 4],
            base_color_texture: None,
            normal_texture: None,
            metallic_roughness_texture: None,
            metallic: 0.0,
            roughness: 1.0,
        }
    }

    pub fn with_base_color_texture(mut self, texture: TextureId) -> Self {
        self.base_color_texture = Some(texture);
        self
    }

    /// All textures referenced by this material.
    pub fn textures(&self) -> impl Iterator<Item = TextureId> + '_ {
        [
            self.base_color_texture,
            self.normal_texture,
            self.metallic_roughness_texture,
        ]
        .into_iter()
        .flatten()
    }
}

/// An instance of a model placed in the world.
#[derive(Debug, Clone, PartialEq)]
pub struct Renderable {
    pub id: RenderableId,
    pub model: ModelId,
    pub transform: Mat4,
    pub visible: bool,
}

impl Renderable {
    pub fn new(id: RenderableId, model: ModelId, transform: Mat4) -> Self {
        Self {
            id,
            model,
            transform,
            visible: true,
        }
    }
}
