//! Typed asset ids and the id allocator that hands them out.
//!
//! Ids are plain `u64` sequence numbers wrapped in one newtype per asset kind.
//! They are produced by an [`IdAllocator`] that is owned by whoever loads the
//! scene and passed to the code that needs fresh ids. There are no global
//! counters: two allocators hand out independent id spaces, which keeps tests
//! that run concurrently from observing each other.
//!
//! The counters can be snapshotted with [`IdAllocator::state`] and restored
//! with [`IdAllocator::set_state`] so that save/load keeps ids stable.

use std::sync::atomic::{AtomicU64, Ordering};

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub u64);

        impl $name {
            /// Raw sequence number of this id.
            pub fn raw(self) -> u64 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }
    };
}

define_id!(
    /// Id of a [`Model`](crate::scene::Model).
    ModelId
);
define_id!(
    /// Id of a [`Mesh`](crate::scene::Mesh).
    MeshId
);
define_id!(
    /// Id of a [`Texture`](crate::scene::Texture).
    TextureId
);
define_id!(
    /// Id of a [`Material`](crate::scene::Material).
    MaterialId
);
define_id!(
    /// Id of an [`Animation`](crate::animation::Animation).
    AnimationId
);
define_id!(
    /// Id of a [`Skeleton`](crate::skeleton::Skeleton).
    SkeletonId
);
define_id!(
    /// Id of a [`Renderable`](crate::scene::Renderable).
    RenderableId
);
define_id!(
    /// Id of an [`Animator`](crate::animation::Animator).
    AnimatorId
);

/// Snapshot of every counter in an [`IdAllocator`].
///
/// Each field holds the *next* value that will be handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct IdState {
    pub models: u64,
    pub meshes: u64,
    pub textures: u64,
    pub materials: u64,
    pub animations: u64,
    pub skeletons: u64,
    pub renderables: u64,
    pub animators: u64,
}

/// Sequence generator for all asset id kinds.
///
/// Counters are atomic so a single allocator can be shared (for instance
/// behind an `Arc`) between the loader and the animation thread.
#[derive(Debug, Default)]
pub struct IdAllocator {
    models: AtomicU64,
    meshes: AtomicU64,
    textures: AtomicU64,
    materials: AtomicU64,
    animations: AtomicU64,
    skeletons: AtomicU64,
    renderables: AtomicU64,
    animators: AtomicU64,
}

impl IdAllocator {
    /// Create an allocator whose counters all start at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an allocator that continues from a previously captured state.
    pub fn from_state(state: IdState) -> Self {
        let allocator = Self::new();
        allocator.set_state(state);
        allocator
    }

    pub fn next_model(&self) -> ModelId {
        ModelId(self.models.fetch_add(1, Ordering::Relaxed))
    }

    pub fn next_mesh(&self) -> MeshId {
        MeshId(self.meshes.fetch_add(1, Ordering::Relaxed))
    }

    pub fn next_texture(&self) -> TextureId {
        TextureId(self.textures.fetch_add(1, Ordering::Relaxed))
    }

    pub fn next_material(&self) -> MaterialId {
        MaterialId(self.materials.fetch_add(1, Ordering::Relaxed))
    }

    pub fn next_animation(&self) -> AnimationId {
        AnimationId(self.animations.fetch_add(1, Ordering::Relaxed))
    }

    pub fn next_skeleton(&self) -> SkeletonId {
        SkeletonId(self.skeletons.fetch_add(1, Ordering::Relaxed))
    }

    pub fn next_renderable(&self) -> RenderableId {
        RenderableId(self.renderables.fetch_add(1, Ordering::Relaxed))
    }

    pub fn next_animator(&self) -> AnimatorId {
        AnimatorId(self.animators.fetch_add(1, Ordering::Relaxed))
    }

    /// Capture the current counter values.
    pub fn state(&self) -> IdState {
        IdState {
            models: self.models.load(Ordering::Relaxed),
            meshes: self.meshes.load(Ordering::Relaxed),
            textures: self.textures.load(Ordering::Relaxed),
            materials: self.materials.load(Ordering::Relaxed),
            animations: self.animations.load(Ordering::Relaxed),
            skeletons: self.skeletons.load(Ordering::Relaxed),
            renderables: self.renderables.load(Ordering::Relaxed),
            animators: self.animators.load(Ordering::Relaxed),
        }
    }

    /// Restore counter values captured by [`state`](Self::state).
    pub fn set_state(&self, state: IdState) {
        self.models.store(state.models, Ordering::Relaxed);
        self.meshes.store(state.meshes, Ordering::Relaxed);
        self.textures.store(state.textures, Ordering::Relaxed);
        self.materials.store(state.materials, Ordering::Relaxed);
        self.animations.store(state.animations, Ordering::Relaxed);
        self.skeletons.store(state.skeletons, Ordering::Relaxed);
        self.renderables.store(state.renderables, Ordering::Relaxed);
        self.animators.store(state.animators, Ordering::Relaxed);
    }
}
