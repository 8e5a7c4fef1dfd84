//! Scene-authored assets.
//!
//! These are the CPU-side types produced by the asset/tile layer. The renderer
//! turns them into GPU-resident counterparts; the only channel by which scene
//! changes reach it is an [`AssetUpdate`] batch.

mod assets;
mod update;

pub use assets::{Aabb, Material, Mesh, Model, Renderable, Texture, TextureDataFormat, Vertex};
pub use update::AssetUpdate;
