//! [`RenderContext`](crate::context::RenderContext) implementations.
//!
//! # Available Backends
//!
//! - `recording` (always built): keeps resources in memory and records every
//!   command for inspection. Used by tests and headless tooling.
//! - `vulkan-backend`: native Vulkan using ash and gpu-allocator.

pub mod recording;

#[cfg(feature = "vulkan-backend")]
pub mod vulkan;

pub use recording::{RecordedCommand, RecordingContext, Submission, SubmissionKind};
#[cfg(feature = "vulkan-backend")]
pub use vulkan::VulkanContext;
