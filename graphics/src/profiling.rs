//! Profiling support via Tracy.
//!
//! Re-exports the CPU macros of [`meridian_core::profiling`] and adds plots of
//! per-frame renderer counters. Everything compiles to nothing without the
//! `profiling` feature.
//!
//! ```ignore
//! use meridian_graphics::profiling::{profile_scope, frame_mark};
//!
//! fn frame() {
//!     profile_scope!("frame");
//!     // ...
//!     frame_mark!();
//! }
//! ```

pub use meridian_core::profiling::init;
pub use meridian_core::{frame_mark, profile_function, profile_plot, profile_scope};

use crate::renderer::FrameStats;
use crate::residency::ResidencyStats;

/// Plot the counters of one rendered frame.
pub(crate) fn plot_frame(frame: &FrameStats, residency: &ResidencyStats) {
    profile_plot!("draw_count", frame.draw_count);
    profile_plot!("upload_bytes_staged", frame.upload.bytes_staged);
    profile_plot!("upload_meshes", frame.upload.meshes_uploaded);
    profile_plot!("upload_textures", frame.upload.textures_uploaded);
    profile_plot!("pending_meshes", residency.pending_meshes);
    profile_plot!("pending_textures", residency.pending_textures);
    profile_plot!("vertex_bytes_used", residency.vertex_bytes_used);
    profile_plot!("index_bytes_used", residency.index_bytes_used);
}
