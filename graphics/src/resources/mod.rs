//! GPU memory management for streamed assets.
//!
//! - [`FreeListAllocator`] - first-fit bookkeeping over a fixed byte range
//! - [`FatBuffer`] - a device buffer shared by many meshes
//! - [`StagingBuffer`] - host-visible upload buffer with a per-frame cursor
//! - [`BindlessTable`] - texture slots in the bindless descriptor array

mod bindless;
mod fat_buffer;
mod free_list;
mod staging;

pub use bindless::BindlessTable;
pub use fat_buffer::FatBuffer;
pub use free_list::{FreeBlock, FreeListAllocator, ResourceHandle};
pub use staging::{StagingAllocation, StagingBuffer};
