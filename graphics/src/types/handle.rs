//! Opaque handles to backend objects.
//!
//! A [`RenderContext`](crate::context::RenderContext) hands these out and maps
//! them to its native objects. They are plain ids: copying a handle does not
//! extend the object's lifetime.

macro_rules! define_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub u64);

        impl $name {
            pub fn raw(self) -> u64 {
                self.0
            }
        }
    };
}

define_handle!(
    /// A GPU buffer.
    BufferHandle
);
define_handle!(
    /// A GPU image with a default view over all mips.
    ImageHandle
);
define_handle!(
    /// A graphics or compute pipeline.
    PipelineHandle
);
define_handle!(
    /// A command buffer in the recording state.
    CommandBufferHandle
);
