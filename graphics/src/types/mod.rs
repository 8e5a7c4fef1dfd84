//! Common types and descriptors for graphics resources.
//!
//! This module contains format enums, usage and access flags, handles and
//! descriptor structs used throughout the graphics system.

mod access;
mod buffer;
mod common;
mod handle;
mod texture;

pub use access::{Access, Barrier, BarrierTarget, ImageLayout, PipelineStage};
pub use buffer::{BufferCopy, BufferDescriptor, BufferUsage};
pub use common::Extent3d;
pub use handle::{BufferHandle, CommandBufferHandle, ImageHandle, PipelineHandle};
pub use texture::{BufferImageCopy, TextureDescriptor, TextureFormat, TextureUsage};
