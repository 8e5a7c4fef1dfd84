//! # Meridian Graphics
//!
//! Frame graph, GPU residency and upload streaming for the Meridian engine.
//!
//! ## Overview
//!
//! This crate provides:
//! - [`FrameGraph`] - Passes declaring resource usages, compiled into an
//!   execution order with planned barriers
//! - [`ResourceVault`] - Named GPU resources with per-frame copies
//! - [`ResidencyManager`] - Scene assets mirrored into shared vertex and index
//!   buffers and a bindless texture table
//! - [`UploadQueue`] - Budgeted streaming of meshes and textures through a
//!   staging buffer
//! - [`Renderer`] - Per-frame driver tying the above to the animation thread
//! - [`RenderContext`] - The device seam; [`backend::RecordingContext`] for
//!   tests and `backend::VulkanContext` with the `vulkan-backend` feature
//!
//! ## Example
//!
//! ```ignore
//! use meridian_graphics::{Renderer, RendererConfig, backend::RecordingContext};
//!
//! let mut ctx = RecordingContext::new();
//! let mut renderer = Renderer::new(&mut ctx, RendererConfig::default())?;
//! renderer.asset_update(&ctx, update);
//! renderer.render_frame(&mut ctx)?;
//! ```

pub mod backend;
pub mod context;
pub mod error;
pub mod graph;
pub mod profiling;
pub mod renderer;
pub mod residency;
pub mod resources;
pub mod types;
pub mod upload;
pub mod vault;

// Re-export main types for convenience
pub use context::{Blackboard, BlackboardValue, DrawItem, MeshDraw, RenderContext, RenderTargets};
pub use error::{GraphicsError, RendererError};
pub use graph::{
    ExecutionParams, FrameGraph, GraphError, PipelineCreateParams, RenderPassInfo, ResourceType,
    ResourceUsage,
};
pub use renderer::{FrameStats, Renderer, RendererConfig};
pub use residency::{ResidencyManager, ResidencyStats};
pub use resources::{FreeListAllocator, ResourceHandle};
pub use types::{
    Access, BufferDescriptor, BufferUsage, Extent3d, ImageLayout, PipelineStage,
    TextureDescriptor, TextureFormat, TextureUsage,
};
pub use upload::{InternalMesh, InternalTexture, UploadQueue, UploadReport};
pub use vault::ResourceVault;

/// Graphics library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the graphics subsystem.
///
/// Starts the profiler client when the `profiling` feature is enabled.
pub fn init() {
    profiling::init();
    log::info!("Meridian Graphics v{} initialized", VERSION);
}
