//! # Meridian Core
//!
//! CPU-side building blocks shared by the Meridian renderer:
//!
//! - [`ids`] - typed asset ids and the injectable [`IdAllocator`](ids::IdAllocator)
//! - [`scene`] - scene-authored assets and the [`AssetUpdate`](scene::AssetUpdate) batch
//! - [`skeleton`] - arena-indexed joint hierarchies
//! - [`animation`] - keyframe sampling and the background [`AnimationThread`](animation::AnimationThread)
//! - [`compute`] - a small task pool with channel-backed handles
//! - [`profiling`] - optional Tracy instrumentation

pub mod animation;
pub mod compute;
pub mod error;
pub mod ids;
pub mod math;
pub mod profiling;
pub mod scene;
pub mod skeleton;

pub use error::CoreError;

/// Core library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Log the core crate version. Call once at startup.
pub fn init() {
    log::info!("Meridian Core v{} initialized", VERSION);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
