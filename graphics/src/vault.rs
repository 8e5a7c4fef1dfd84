//! Named GPU resource registry.
//!
//! The vault owns every buffer and image the frame graph creates, keyed by the
//! resource name passes declare. Each entry keeps the spec it was created from
//! so the graph can tell whether a redeclaration still matches, and tracks what
//! the last frame left each copy in: the image layout, and the access scope
//! the next frame's first use has to wait on.
//!
//! Render-thread only.

use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::context::RenderContext;
use crate::error::GraphicsError;
use crate::graph::BufferFillFn;
use crate::types::{
    Access, BufferDescriptor, BufferHandle, BufferUsage, Extent3d, ImageHandle, ImageLayout,
    PipelineStage, TextureDescriptor,
};

/// Lifecycle of a vault entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState {
    /// Created but not yet used by an executed frame.
    Created,
    /// Used by at least one executed frame.
    InUse,
    /// Dimensions no longer match; recreated on the next graph build.
    Stale,
}

/// Description of a vault resource.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceKind {
    Buffer(BufferDescriptor),
    Image {
        descriptor: TextureDescriptor,
        /// Scale against the swapchain extent, for images that follow it.
        swapchain_scale: Option<f32>,
    },
}

/// Everything needed to create, and later recreate, a vault resource.
#[derive(Clone)]
pub struct ResourceSpec {
    pub kind: ResourceKind,
    /// Number of copies; one per frame in flight when multi-buffered.
    pub copies: usize,
    pub owned_by_engine: bool,
    /// Initial contents for buffers.
    pub fill: Option<BufferFillFn>,
}

impl ResourceSpec {
    pub fn buffer(descriptor: BufferDescriptor) -> Self {
        Self {
            kind: ResourceKind::Buffer(descriptor),
            copies: 1,
            owned_by_engine: false,
            fill: None,
        }
    }

    pub fn image(descriptor: TextureDescriptor) -> Self {
        Self {
            kind: ResourceKind::Image {
                descriptor,
                swapchain_scale: None,
            },
            copies: 1,
            owned_by_engine: false,
            fill: None,
        }
    }

    pub fn with_copies(mut self, copies: usize) -> Self {
        self.copies = copies.max(1);
        self
    }

    pub fn with_swapchain_scale(mut self, scale: f32) -> Self {
        if let ResourceKind::Image {
            swapchain_scale, ..
        } = &mut self.kind
        {
            *swapchain_scale = Some(scale);
        }
        self
    }

    pub fn owned_by_engine(mut self, owned: bool) -> Self {
        self.owned_by_engine = owned;
        self
    }

    pub fn with_fill(mut self, fill: Option<BufferFillFn>) -> Self {
        self.fill = fill;
        self
    }

    /// Whether `other` would produce the same objects.
    pub fn matches(&self, other: &ResourceSpec) -> bool {
        self.kind == other.kind
            && self.copies == other.copies
            && self.owned_by_engine == other.owned_by_engine
            && self.fill.is_some() == other.fill.is_some()
    }
}

impl fmt::Debug for ResourceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceSpec")
            .field("kind", &self.kind)
            .field("copies", &self.copies)
            .field("owned_by_engine", &self.owned_by_engine)
            .field("fill", &self.fill.is_some())
            .finish()
    }
}

/// One backing object of a vault entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceObject {
    Buffer(BufferHandle),
    Image(ImageHandle),
}

/// A live vault entry.
#[derive(Debug)]
pub struct VaultResource {
    spec: ResourceSpec,
    objects: Vec<ResourceObject>,
    /// Layout of each image copy at the end of the last recorded use.
    layouts: Vec<ImageLayout>,
    /// Access scope of each copy at the end of the last frame that used it.
    exit_scopes: Vec<Option<(Access, PipelineStage)>>,
    /// Resolved image extent.
    extent: Option<Extent3d>,
    state: ResourceState,
}

impl VaultResource {
    pub fn spec(&self) -> &ResourceSpec {
        &self.spec
    }

    pub fn state(&self) -> ResourceState {
        self.state
    }

    pub fn copies(&self) -> usize {
        self.objects.len()
    }

    /// Extent the image copies were created with.
    pub fn extent(&self) -> Option<Extent3d> {
        self.extent
    }

    /// Backing object for a frame, indexed by frame-in-flight slot.
    pub fn object(&self, frame_index: u64) -> ResourceObject {
        self.objects[(frame_index % self.objects.len() as u64) as usize]
    }

    pub fn objects(&self) -> &[ResourceObject] {
        &self.objects
    }

    fn copy_index(&self, frame_index: u64) -> usize {
        (frame_index % self.objects.len() as u64) as usize
    }
}

/// Registry of named GPU resources.
#[derive(Debug, Default)]
pub struct ResourceVault {
    resources: HashMap<String, VaultResource>,
}

impl ResourceVault {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&VaultResource> {
        self.resources.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.resources.contains_key(name)
    }

    pub fn state(&self, name: &str) -> Option<ResourceState> {
        self.resources.get(name).map(VaultResource::state)
    }

    /// Backing object of `name` for the given frame.
    pub fn resolve(&self, name: &str, frame_index: u64) -> Option<ResourceObject> {
        self.resources.get(name).map(|r| r.object(frame_index))
    }

    /// Create `name` from `spec`, reusing the live entry when it still matches.
    ///
    /// A live entry with a different spec, or one marked stale, is destroyed
    /// and recreated.
    pub fn create(
        &mut self,
        ctx: &mut dyn RenderContext,
        name: &str,
        spec: ResourceSpec,
    ) -> Result<&VaultResource, GraphicsError> {
        let reusable = self
            .resources
            .get(name)
            .is_some_and(|r| r.state != ResourceState::Stale && r.spec.matches(&spec));

        if !reusable {
            if self.resources.contains_key(name) {
                log::debug!("Recreating vault resource '{}'", name);
                self.destroy(ctx, name);
            }
            let swapchain = ctx.swapchain_extent();
            let resource = create_resource(ctx, name, spec, swapchain)?;
            self.resources.insert(name.to_string(), resource);
        }

        self.resources
            .get(name)
            .ok_or_else(|| GraphicsError::Internal(format!("vault lost resource '{name}'")))
    }

    /// Destroy every copy of `name`. Returns whether it existed.
    pub fn destroy(&mut self, ctx: &mut dyn RenderContext, name: &str) -> bool {
        let Some(resource) = self.resources.remove(name) else {
            return false;
        };
        for object in resource.objects {
            match object {
                ResourceObject::Buffer(buffer) => ctx.destroy_buffer(buffer),
                ResourceObject::Image(image) => ctx.destroy_image(image),
            }
        }
        log::trace!("Destroyed vault resource '{}'", name);
        true
    }

    /// Layout the frame's copy of an image was left in.
    pub fn layout(&self, name: &str, frame_index: u64) -> Option<ImageLayout> {
        let resource = self.resources.get(name)?;
        resource.layouts.get(resource.copy_index(frame_index)).copied()
    }

    pub fn set_layout(&mut self, name: &str, frame_index: u64, layout: ImageLayout) {
        if let Some(resource) = self.resources.get_mut(name) {
            let index = resource.copy_index(frame_index);
            if let Some(slot) = resource.layouts.get_mut(index) {
                *slot = layout;
            }
        }
    }

    /// Scope of earlier frames still outstanding on the frame's copy.
    ///
    /// Only single-copy resources have one: every copy of a multi-buffered
    /// resource is fenced before its frame slot comes around again.
    pub fn outstanding_scope(
        &self,
        name: &str,
        frame_index: u64,
    ) -> Option<(Access, PipelineStage)> {
        let resource = self.resources.get(name)?;
        if resource.copies() > 1 {
            return None;
        }
        resource
            .exit_scopes
            .get(resource.copy_index(frame_index))
            .copied()
            .flatten()
            .filter(|(_, stage)| !stage.is_empty())
    }

    /// Record the scope the frame left its copy of `name` in.
    pub fn set_exit_scope(
        &mut self,
        name: &str,
        frame_index: u64,
        scope: (Access, PipelineStage),
    ) {
        if let Some(resource) = self.resources.get_mut(name) {
            let index = resource.copy_index(frame_index);
            if let Some(slot) = resource.exit_scopes.get_mut(index) {
                *slot = Some(scope);
            }
        }
    }

    pub fn mark_in_use(&mut self, name: &str) {
        if let Some(resource) = self.resources.get_mut(name)
            && resource.state == ResourceState::Created
        {
            resource.state = ResourceState::InUse;
        }
    }

    /// Mark swapchain-relative images stale after a resize.
    ///
    /// Returns the number of entries marked.
    pub fn on_resize(&mut self, extent: Extent3d) -> usize {
        let mut marked = 0;
        for (name, resource) in &mut self.resources {
            if let ResourceKind::Image {
                swapchain_scale: Some(scale),
                ..
            } = &resource.spec.kind
                && resource.extent != Some(extent.scaled(*scale))
            {
                log::debug!("Vault resource '{}' is stale after resize", name);
                resource.state = ResourceState::Stale;
                marked += 1;
            }
        }
        marked
    }

    /// Destroy scratch entries that are not in `declared`.
    ///
    /// Entries owned by the engine are kept regardless.
    pub fn retain_declared(&mut self, ctx: &mut dyn RenderContext, declared: &HashSet<String>) {
        let unused: Vec<String> = self
            .resources
            .iter()
            .filter(|(name, r)| !r.spec.owned_by_engine && !declared.contains(*name))
            .map(|(name, _)| name.clone())
            .collect();
        for name in unused {
            self.destroy(ctx, &name);
        }
    }

    /// Destroy everything, engine-owned entries included.
    pub fn clear(&mut self, ctx: &mut dyn RenderContext) {
        let names: Vec<String> = self.resources.keys().cloned().collect();
        for name in names {
            self.destroy(ctx, &name);
        }
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.resources.keys().map(String::as_str)
    }
}

fn create_resource(
    ctx: &mut dyn RenderContext,
    name: &str,
    spec: ResourceSpec,
    swapchain: Extent3d,
) -> Result<VaultResource, GraphicsError> {
    let copies = spec.copies.max(1);
    let mut objects = Vec::with_capacity(copies);
    let mut extent = None;

    for copy in 0..copies {
        let label = if copies == 1 {
            name.to_string()
        } else {
            format!("{name}[{copy}]")
        };

        let object = match &spec.kind {
            ResourceKind::Buffer(descriptor) => {
                let mut descriptor = descriptor.clone().with_label(label);
                if spec.fill.is_some() {
                    descriptor.usage |= BufferUsage::MAP_WRITE;
                }
                ctx.create_buffer(&descriptor).map(ResourceObject::Buffer)
            }
            ResourceKind::Image {
                descriptor,
                swapchain_scale,
            } => {
                let mut descriptor = descriptor.clone().with_label(label);
                if let Some(scale) = swapchain_scale {
                    descriptor.size = swapchain.scaled(*scale);
                }
                extent = Some(descriptor.size);
                ctx.create_image(&descriptor).map(ResourceObject::Image)
            }
        };

        match object {
            Ok(object) => objects.push(object),
            Err(e) => {
                for created in objects {
                    match created {
                        ResourceObject::Buffer(buffer) => ctx.destroy_buffer(buffer),
                        ResourceObject::Image(image) => ctx.destroy_image(image),
                    }
                }
                return Err(e);
            }
        }
    }

    if let (ResourceKind::Buffer(descriptor), Some(fill)) = (&spec.kind, &spec.fill) {
        let mut contents = vec![0u8; descriptor.size as usize];
        fill(&mut contents);
        for object in &objects {
            if let ResourceObject::Buffer(buffer) = object {
                ctx.write_buffer(*buffer, 0, &contents)?;
            }
        }
    }

    log::trace!("Created vault resource '{}' ({} copies)", name, copies);

    Ok(VaultResource {
        spec,
        objects,
        layouts: vec![ImageLayout::Undefined; copies],
        exit_scopes: vec![None; copies],
        extent,
        state: ResourceState::Created,
    })
}
