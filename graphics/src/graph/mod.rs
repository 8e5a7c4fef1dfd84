//! Frame graph infrastructure.
//!
//! Passes register what they touch and how, plus a closure that records their
//! commands. The graph derives everything else:
//!
//! - pass ordering from conflicting resource accesses
//! - barriers and image layout transitions between passes
//! - creation of the resources passes declare, through the [`ResourceVault`]
//! - pipeline creation, cached per pass
//!
//! # Lifecycle
//!
//! | Phase | Entry point |
//! |-------|-------------|
//! | Collecting | [`FrameGraph::register_render_pass`], [`FrameGraph::register_render_pass_exe`], [`FrameGraph::add_pass`] |
//! | Resolving + ordering | [`FrameGraph::build`] |
//! | Executing | [`FrameGraph::execute`], once per frame |
//!
//! Any registration change marks the graph dirty; the next `execute` rebuilds
//! it first.
//!
//! # Example
//!
//! ```ignore
//! let mut graph = FrameGraph::new();
//! graph.register_render_pass(
//!     RenderPassInfo::new("cull")
//!         .with_usage(ResourceUsage::write("visible", PipelineStage::COMPUTE, ResourceType::Ssbo)
//!             .with_create(BufferCreateParams::new(4096)))
//!         .with_pipeline(PipelineCreateParams::Compute(ComputePipelineParams::new(spirv))),
//! );
//! graph.register_render_pass_exe("cull", |params| params.ctx.dispatch(params.cmd, [64, 1, 1]));
//! graph.execute(&mut ctx, cmd, &draws)?;
//! ```

mod compile;
mod pass;
mod usage;

use std::collections::{HashMap, HashSet};

pub use compile::{
    CompiledGraph, FrameEntry, FrameExit, GraphError, LayoutTransition, PassHandle,
    PlannedBarrier, compile,
};
pub use pass::{
    ComputePipelineParams, ExecutionParams, GraphicsPipelineParams, PassExecuteFn,
    PipelineCreateParams, RenderPass, RenderPassInfo, ResolvedResource, ResolvedResources,
};
pub use usage::{
    BufferCreateParams, BufferFillFn, ImageCreateParams, ImageSize, ResourceCreateParams,
    ResourceType, ResourceUsage,
};

use crate::context::{DrawItem, Pipeline, RenderContext, RenderTargets};
use crate::types::{
    Access, Barrier, BufferDescriptor, BufferUsage, CommandBufferHandle, Extent3d, ImageLayout,
    PipelineStage, TextureDescriptor, TextureUsage,
};
use crate::vault::{ResourceKind, ResourceObject, ResourceSpec, ResourceVault};

#[derive(Debug)]
struct CachedPipeline {
    params: PipelineCreateParams,
    pipeline: Pipeline,
}

/// Per-frame render graph.
///
/// Render-thread only.
#[derive(Default)]
pub struct FrameGraph {
    /// Registrations in registration order.
    passes: Vec<RenderPassInfo>,
    executors: HashMap<String, PassExecuteFn>,
    /// Extra `(dependent, dependency)` pairs by pass name.
    dependencies: Vec<(String, String)>,
    /// Passes of the last build, indexed by [`PassHandle`].
    active: Vec<RenderPassInfo>,
    compiled: Option<CompiledGraph>,
    pipelines: HashMap<String, CachedPipeline>,
    vault: ResourceVault,
    dirty: bool,
}

impl FrameGraph {
    pub fn new() -> Self {
        Self {
            dirty: true,
            ..Self::default()
        }
    }

    /// Register a pass declaration.
    ///
    /// A name that is already registered is rejected with a warning. Returns
    /// whether the pass was added.
    pub fn register_render_pass(&mut self, info: RenderPassInfo) -> bool {
        if self.passes.iter().any(|p| p.name == info.name) {
            log::warn!(
                "Render pass '{}' is already registered, ignoring duplicate",
                info.name
            );
            return false;
        }
        self.passes.push(info);
        self.dirty = true;
        true
    }

    /// Register the execution closure of a pass, replacing any previous one.
    pub fn register_render_pass_exe<F>(&mut self, name: impl Into<String>, execute: F)
    where
        F: FnMut(&mut ExecutionParams<'_>) + 'static,
    {
        let name = name.into();
        if self.executors.insert(name.clone(), Box::new(execute)).is_some() {
            log::debug!("Replaced execution closure of render pass '{}'", name);
        }
        self.dirty = true;
    }

    /// Register a pass implemented as a [`RenderPass`].
    pub fn add_pass<P>(&mut self, mut pass: P) -> bool
    where
        P: RenderPass + 'static,
    {
        let info = pass.info();
        let name = info.name.clone();
        if !self.register_render_pass(info) {
            return false;
        }
        self.register_render_pass_exe(name, move |params| pass.execute(params));
        true
    }

    /// Order `dependent` after `dependency` on top of resource-derived edges.
    pub fn add_dependency(&mut self, dependent: impl Into<String>, dependency: impl Into<String>) {
        self.dependencies
            .push((dependent.into(), dependency.into()));
        self.dirty = true;
    }

    /// Remove a pass registration and its closure.
    pub fn remove_pass(&mut self, name: &str) -> bool {
        let before = self.passes.len();
        self.passes.retain(|p| p.name != name);
        self.executors.remove(name);
        self.dependencies
            .retain(|(dependent, dependency)| dependent != name && dependency != name);
        let removed = self.passes.len() != before;
        self.dirty |= removed;
        removed
    }

    /// Drop all registrations. Cached pipelines and vault resources are kept
    /// until the next build shows they are unused.
    pub fn clear(&mut self) {
        self.passes.clear();
        self.executors.clear();
        self.dependencies.clear();
        self.active.clear();
        self.compiled = None;
        self.dirty = true;
    }

    /// Resolve registrations into a compiled graph.
    ///
    /// Creates or recreates declared resources and pipelines, and releases
    /// scratch resources no pass declares anymore.
    pub fn build(&mut self, ctx: &mut dyn RenderContext) -> Result<&CompiledGraph, GraphError> {
        meridian_core::profile_scope!("frame_graph_build");

        let mut active = Vec::with_capacity(self.passes.len());
        let mut dropped = Vec::new();
        for pass in &self.passes {
            if self.executors.contains_key(&pass.name) {
                active.push(pass.clone());
            } else {
                log::warn!(
                    "Render pass '{}' has no execution closure, dropping it",
                    pass.name
                );
                dropped.push(pass.name.clone());
            }
        }

        let index_of: HashMap<&str, usize> = active
            .iter()
            .enumerate()
            .map(|(i, p)| (p.name.as_str(), i))
            .collect();
        let mut dependencies = Vec::with_capacity(self.dependencies.len());
        for (dependent, dependency) in &self.dependencies {
            match (index_of.get(dependent.as_str()), index_of.get(dependency.as_str())) {
                (Some(&a), Some(&b)) => {
                    dependencies.push((PassHandle::new(a), PassHandle::new(b)));
                }
                _ => log::warn!(
                    "Ignoring dependency of '{}' on '{}': pass not in graph",
                    dependent,
                    dependency
                ),
            }
        }

        let mut compiled = compile(&active, &dependencies)?;
        compiled.set_dropped_passes(dropped);

        self.create_resources(ctx, &active)?;
        self.update_pipelines(ctx, &active);

        log::debug!(
            "Built frame graph: {} passes, {} barriers, {} resources",
            compiled.pass_count(),
            compiled.barrier_count(),
            self.vault.len()
        );

        self.active = active;
        self.dirty = false;
        Ok(self.compiled.insert(compiled))
    }

    fn create_resources(
        &mut self,
        ctx: &mut dyn RenderContext,
        passes: &[RenderPassInfo],
    ) -> Result<(), GraphError> {
        let frames_in_flight = ctx.frames_in_flight().max(1);

        let mut declared: HashSet<String> = HashSet::new();
        let mut buffer_usage: HashMap<&str, BufferUsage> = HashMap::new();
        let mut texture_usage: HashMap<&str, TextureUsage> = HashMap::new();
        // First creating usage per resource, in registration order.
        let mut owners: Vec<(&str, &ResourceUsage)> = Vec::new();
        let mut owner_pass: HashMap<&str, &str> = HashMap::new();

        for pass in passes {
            for usage in &pass.resource_usages {
                let name = usage.name.as_str();
                declared.insert(usage.name.clone());
                *buffer_usage.entry(name).or_insert(BufferUsage::empty()) |=
                    usage.resource_type.buffer_usage();
                *texture_usage.entry(name).or_insert(TextureUsage::empty()) |=
                    usage.resource_type.texture_usage();

                let Some(create) = &usage.create else {
                    continue;
                };
                match owner_pass.get(name) {
                    Some(first_pass) => {
                        let (_, first) = owners
                            .iter()
                            .find(|(owned, _)| *owned == name)
                            .copied()
                            .unwrap_or((name, usage));
                        if first.create.as_ref() != Some(create)
                            || first.multi_buffered != usage.multi_buffered
                            || first.owned_by_engine != usage.owned_by_engine
                        {
                            log::warn!(
                                "Pass '{}' declares resource '{}' with conflicting creation parameters, keeping those of pass '{}'",
                                pass.name,
                                name,
                                first_pass
                            );
                        }
                    }
                    None => {
                        owner_pass.insert(name, pass.name.as_str());
                        owners.push((name, usage));
                    }
                }
            }
        }

        for (name, usage) in owners {
            let Some(create) = &usage.create else {
                continue;
            };
            let copies = if usage.multi_buffered {
                frames_in_flight
            } else {
                1
            };

            let spec = match create {
                ResourceCreateParams::Buffer(params) => {
                    let usage_flags = buffer_usage
                        .get(name)
                        .copied()
                        .unwrap_or(BufferUsage::empty())
                        | BufferUsage::COPY_DST;
                    ResourceSpec::buffer(BufferDescriptor::new(params.size, usage_flags))
                        .with_fill(params.fill.clone())
                }
                ResourceCreateParams::Image(params) => {
                    let descriptor = TextureDescriptor {
                        label: None,
                        size: match params.size {
                            ImageSize::Absolute(extent) => extent,
                            ImageSize::SwapchainRelative { .. } => Extent3d::default(),
                        },
                        mip_level_count: params.mip_levels.max(1),
                        format: params.format,
                        usage: texture_usage
                            .get(name)
                            .copied()
                            .unwrap_or(TextureUsage::empty()),
                    };
                    let spec = ResourceSpec::image(descriptor);
                    match params.size {
                        ImageSize::SwapchainRelative { scale } => spec.with_swapchain_scale(scale),
                        ImageSize::Absolute(_) => spec,
                    }
                }
            }
            .with_copies(copies)
            .owned_by_engine(usage.owned_by_engine);

            self.vault
                .create(ctx, name, spec)
                .map_err(|source| GraphError::ResourceCreation {
                    name: name.to_string(),
                    source,
                })?;
        }

        for name in &declared {
            if !self.vault.contains(name) {
                log::warn!("Resource '{}' is used but never created", name);
            }
        }

        self.vault.retain_declared(ctx, &declared);
        Ok(())
    }

    fn update_pipelines(&mut self, ctx: &mut dyn RenderContext, passes: &[RenderPassInfo]) {
        let live: HashSet<&str> = passes
            .iter()
            .filter(|p| !p.pipeline.is_none())
            .map(|p| p.name.as_str())
            .collect();
        self.pipelines.retain(|name, cached| {
            let keep = live.contains(name.as_str());
            if !keep && let Some(handle) = cached.pipeline.handle() {
                ctx.destroy_pipeline(handle);
            }
            keep
        });

        for pass in passes {
            if pass.pipeline.is_none() {
                continue;
            }
            if let Some(cached) = self.pipelines.get(&pass.name)
                && cached.params == pass.pipeline
            {
                continue;
            }
            if let Some(old) = self.pipelines.remove(&pass.name)
                && let Some(handle) = old.pipeline.handle()
            {
                ctx.destroy_pipeline(handle);
            }

            let pipeline = match ctx.create_pipeline(&pass.name, &pass.pipeline) {
                Ok(handle) => Pipeline::new(handle),
                Err(e) => {
                    log::error!("Failed to create pipeline for pass '{}': {}", pass.name, e);
                    Pipeline::invalid()
                }
            };
            self.pipelines.insert(
                pass.name.clone(),
                CachedPipeline {
                    params: pass.pipeline.clone(),
                    pipeline,
                },
            );
        }
    }

    /// Record every pass into `cmd`, rebuilding first if registrations changed.
    ///
    /// Passes whose pipeline failed to create are skipped; their barriers are
    /// still recorded so layout tracking stays consistent.
    pub fn execute(
        &mut self,
        ctx: &mut dyn RenderContext,
        cmd: CommandBufferHandle,
        draws: &[DrawItem],
    ) -> Result<(), GraphError> {
        meridian_core::profile_scope!("frame_graph_execute");

        if self.dirty || self.compiled.is_none() {
            self.build(ctx)?;
        }
        let Some(compiled) = &self.compiled else {
            return Ok(());
        };
        let frame_index = ctx.frame_index();

        for (position, &handle) in compiled.pass_order().iter().enumerate() {
            let pass = &self.active[handle.index()];

            let barriers = resolve_barriers(
                &mut self.vault,
                compiled.barriers_at(position),
                compiled.entries_at(position),
                frame_index,
            );
            ctx.pipeline_barrier(cmd, &barriers);

            let cached = self.pipelines.get(&pass.name);
            if let Some(cached) = cached
                && !cached.pipeline.is_valid()
            {
                log::trace!("Skipping pass '{}' with invalid pipeline", pass.name);
                continue;
            }
            let pipeline = cached.and_then(|c| c.pipeline.handle());

            let mut resources = ResolvedResources::new();
            let mut targets = RenderTargets::default();
            for usage in &pass.resource_usages {
                let Some(resource) = self.vault.get(&usage.name) else {
                    continue;
                };
                let resolved = match (resource.object(frame_index), &resource.spec().kind) {
                    (ResourceObject::Buffer(buffer), ResourceKind::Buffer(descriptor)) => {
                        ResolvedResource::Buffer {
                            buffer,
                            size: descriptor.size,
                        }
                    }
                    (ResourceObject::Image(image), ResourceKind::Image { descriptor, .. }) => {
                        ResolvedResource::Image {
                            image,
                            extent: resource.extent().unwrap_or(descriptor.size),
                            format: descriptor.format,
                        }
                    }
                    _ => continue,
                };
                if let ResolvedResource::Image { image, extent, .. } = &resolved {
                    match usage.resource_type {
                        ResourceType::ColorAttachment => targets.color.push(*image),
                        ResourceType::DepthAttachment => targets.depth = Some(*image),
                        _ => {}
                    }
                    if matches!(
                        usage.resource_type,
                        ResourceType::ColorAttachment | ResourceType::DepthAttachment
                    ) {
                        targets.extent = smallest_extent(targets.extent, *extent);
                    }
                }
                resources.insert(usage.name.clone(), resolved);
                self.vault.mark_in_use(&usage.name);
            }

            let Some(execute) = self.executors.get_mut(&pass.name) else {
                continue;
            };
            let mut params = ExecutionParams {
                pass_name: &pass.name,
                cmd,
                pipeline,
                resources: &resources,
                draws,
                frame_index,
                ctx: &mut *ctx,
            };
            let rendering =
                matches!(pass.pipeline, PipelineCreateParams::Graphics(_)) && !targets.is_empty();
            if rendering {
                params.ctx.begin_rendering(cmd, &targets);
            }
            execute(&mut params);
            if rendering {
                params.ctx.end_rendering(cmd);
            }
        }

        for exit in compiled.exits() {
            self.vault
                .set_exit_scope(&exit.resource, frame_index, (exit.access, exit.stage));
        }
        Ok(())
    }

    /// React to a swapchain resize. Swapchain-relative images go stale and
    /// are recreated on the next build.
    pub fn resize(&mut self, extent: Extent3d) {
        if self.vault.on_resize(extent) > 0 {
            self.dirty = true;
        }
    }

    /// Destroy every pipeline and vault resource.
    pub fn destroy(&mut self, ctx: &mut dyn RenderContext) {
        for (_, cached) in self.pipelines.drain() {
            if let Some(handle) = cached.pipeline.handle() {
                ctx.destroy_pipeline(handle);
            }
        }
        self.vault.clear(ctx);
        self.compiled = None;
        self.dirty = true;
    }

    pub fn compiled(&self) -> Option<&CompiledGraph> {
        self.compiled.as_ref()
    }

    pub fn vault(&self) -> &ResourceVault {
        &self.vault
    }

    pub fn vault_mut(&mut self) -> &mut ResourceVault {
        &mut self.vault
    }

    /// Pipeline of a pass as of the last build.
    pub fn pipeline(&self, pass: &str) -> Option<Pipeline> {
        self.pipelines.get(pass).map(|c| c.pipeline)
    }

    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    pub fn pass_names(&self) -> impl Iterator<Item = &str> {
        self.passes.iter().map(|p| p.name.as_str())
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

impl std::fmt::Debug for FrameGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameGraph")
            .field("passes", &self.passes.len())
            .field("executors", &self.executors.len())
            .field("compiled", &self.compiled.as_ref().map(CompiledGraph::pass_count))
            .field("dirty", &self.dirty)
            .finish_non_exhaustive()
    }
}

/// Render area covering both extents. A zero extent counts as unset.
fn smallest_extent(current: Extent3d, next: Extent3d) -> Extent3d {
    if current.width == 0 || current.height == 0 {
        return next;
    }
    Extent3d {
        width: current.width.min(next.width),
        height: current.height.min(next.height),
        depth: current.depth.min(next.depth).max(1),
    }
}

/// Turn planned barriers into concrete ones for this frame.
///
/// The first use of a resource also waits on the scope earlier frames left
/// it in, widened to every access that precedes the frame's first write.
fn resolve_barriers(
    vault: &mut ResourceVault,
    planned: &[PlannedBarrier],
    entries: &[FrameEntry],
    frame_index: u64,
) -> Vec<Barrier> {
    let mut barriers = Vec::with_capacity(planned.len() + entries.len());
    for barrier in planned {
        let mut src = (barrier.src_access, barrier.src_stage);
        let mut dst = (barrier.dst_access, barrier.dst_stage);
        if barrier.is_first_use()
            && let Some(entry) = entries.iter().find(|e| e.resource == barrier.resource)
        {
            dst = (entry.dst_access, entry.dst_stage);
            if let Some(scope) = vault.outstanding_scope(&barrier.resource, frame_index) {
                src = scope;
            }
        }
        match (vault.resolve(&barrier.resource, frame_index), barrier.layout) {
            (Some(ResourceObject::Buffer(buffer)), _) => {
                barriers.push(Barrier::buffer(buffer, src, dst));
            }
            (Some(ResourceObject::Image(image)), Some(transition)) => {
                let old = transition.old.unwrap_or_else(|| {
                    vault
                        .layout(&barrier.resource, frame_index)
                        .unwrap_or(ImageLayout::Undefined)
                });
                vault.set_layout(&barrier.resource, frame_index, transition.new);
                if barrier.is_first_use() && old == transition.new && !is_hazard(src, dst) {
                    continue;
                }
                barriers.push(Barrier::image(image, old, transition.new, src, dst));
            }
            _ => {}
        }
    }

    // First uses that no planned barrier carries.
    for entry in entries {
        if planned
            .iter()
            .any(|b| b.resource == entry.resource && b.is_first_use())
        {
            continue;
        }
        let Some(src) = vault.outstanding_scope(&entry.resource, frame_index) else {
            continue;
        };
        let dst = (entry.dst_access, entry.dst_stage);
        if !is_hazard(src, dst) {
            continue;
        }
        match vault.resolve(&entry.resource, frame_index) {
            Some(ResourceObject::Buffer(buffer)) => {
                barriers.push(Barrier::buffer(buffer, src, dst));
            }
            Some(ResourceObject::Image(image)) => {
                let layout = vault
                    .layout(&entry.resource, frame_index)
                    .unwrap_or(ImageLayout::Undefined);
                barriers.push(Barrier::image(image, layout, layout, src, dst));
            }
            None => {}
        }
    }
    barriers
}

/// Whether `dst` has to wait on `src`. Reads never wait on reads.
fn is_hazard(src: (Access, PipelineStage), dst: (Access, PipelineStage)) -> bool {
    !src.1.is_empty() && (src.0.is_write() || dst.0.is_write())
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::backend::{RecordedCommand, RecordingContext};
    use crate::types::{Access, BarrierTarget, PipelineStage, TextureFormat};
    use crate::vault::ResourceState;

    type Log = Rc<RefCell<Vec<String>>>;

    fn logging_exe(log: &Log, name: &str) -> impl FnMut(&mut ExecutionParams<'_>) + 'static {
        let log = log.clone();
        let name = name.to_string();
        move |_params| log.borrow_mut().push(name.clone())
    }

    fn compute_params(word: u32) -> PipelineCreateParams {
        PipelineCreateParams::Compute(ComputePipelineParams::new(vec![0x0723_0203, word]))
    }

    fn frame(graph: &mut FrameGraph, ctx: &mut RecordingContext) -> Vec<RecordedCommand> {
        let cmd = ctx.begin_frame().unwrap();
        graph.execute(ctx, cmd, &[]).unwrap();
        ctx.end_frame(cmd).unwrap();
        ctx.last_submission().unwrap().commands.clone()
    }

    #[test]
    fn test_execute_in_dependency_order() {
        let mut ctx = RecordingContext::new();
        let mut graph = FrameGraph::new();
        let log: Log = Rc::default();

        graph.register_render_pass(RenderPassInfo::new("shade").with_usage(
            ResourceUsage::read("lights", PipelineStage::FRAGMENT_SHADER, ResourceType::Ssbo),
        ));
        graph.register_render_pass(
            RenderPassInfo::new("cull").with_usage(
                ResourceUsage::write("lights", PipelineStage::COMPUTE, ResourceType::Ssbo)
                    .with_create(BufferCreateParams::new(256)),
            ),
        );
        graph.register_render_pass_exe("shade", logging_exe(&log, "shade"));
        graph.register_render_pass_exe("cull", logging_exe(&log, "cull"));
        graph.add_dependency("shade", "cull");

        frame(&mut graph, &mut ctx);
        assert_eq!(*log.borrow(), vec!["cull", "shade"]);
        assert!(!graph.is_dirty());
    }

    #[test]
    fn test_pass_without_closure_is_dropped() {
        let mut ctx = RecordingContext::new();
        let mut graph = FrameGraph::new();
        let log: Log = Rc::default();

        graph.register_render_pass(RenderPassInfo::new("orphan"));
        graph.register_render_pass(RenderPassInfo::new("kept"));
        graph.register_render_pass_exe("kept", logging_exe(&log, "kept"));

        let compiled = graph.build(&mut ctx).unwrap();
        assert_eq!(compiled.ordered_names(), vec!["kept"]);
        assert_eq!(compiled.dropped_passes(), &["orphan".to_string()]);

        frame(&mut graph, &mut ctx);
        assert_eq!(*log.borrow(), vec!["kept"]);
    }

    #[test]
    fn test_duplicate_pass_name_ignored() {
        let mut graph = FrameGraph::new();
        assert!(graph.register_render_pass(RenderPassInfo::new("a")));
        assert!(!graph.register_render_pass(
            RenderPassInfo::new("a").with_pipeline(compute_params(1))
        ));
        assert_eq!(graph.pass_count(), 1);
    }

    #[test]
    fn test_conflicting_creation_first_wins() {
        let mut ctx = RecordingContext::new();
        let mut graph = FrameGraph::new();
        for (name, size) in [("first", 128), ("second", 512)] {
            graph.register_render_pass(
                RenderPassInfo::new(name).with_usage(
                    ResourceUsage::write("data", PipelineStage::COMPUTE, ResourceType::Ssbo)
                        .with_create(BufferCreateParams::new(size)),
                ),
            );
            graph.register_render_pass_exe(name, |_| {});
        }
        graph.build(&mut ctx).unwrap();

        let ResourceObject::Buffer(buffer) = graph.vault().resolve("data", 0).unwrap() else {
            panic!("expected buffer");
        };
        assert_eq!(ctx.buffer_descriptor(buffer).unwrap().size, 128);
        assert_eq!(ctx.live_buffer_count(), 1);
    }

    #[test]
    fn test_multi_buffered_resource_per_frame_slot() {
        let mut ctx = RecordingContext::new().with_frames_in_flight(2);
        let mut graph = FrameGraph::new();
        let seen: Rc<RefCell<Vec<_>>> = Rc::default();

        graph.register_render_pass(
            RenderPassInfo::new("write").with_usage(
                ResourceUsage::write("per_frame", PipelineStage::COMPUTE, ResourceType::Ssbo)
                    .with_create(BufferCreateParams::new(64))
                    .multi_buffered(),
            ),
        );
        let sink = seen.clone();
        graph.register_render_pass_exe("write", move |params| {
            sink.borrow_mut()
                .push(params.resources.buffer("per_frame").unwrap());
        });

        for _ in 0..3 {
            frame(&mut graph, &mut ctx);
        }
        let seen = seen.borrow();
        assert_ne!(seen[0], seen[1]);
        assert_eq!(seen[0], seen[2]);
        assert_eq!(
            graph.vault().get("per_frame").unwrap().state(),
            ResourceState::InUse
        );
    }

    #[test]
    fn test_invalid_pipeline_skips_pass() {
        let mut ctx = RecordingContext::new();
        ctx.fail_pipeline("broken");
        let mut graph = FrameGraph::new();
        let log: Log = Rc::default();

        for name in ["broken", "fine"] {
            graph.register_render_pass(
                RenderPassInfo::new(name).with_pipeline(compute_params(0)),
            );
            graph.register_render_pass_exe(name, logging_exe(&log, name));
        }
        graph.register_render_pass(RenderPassInfo::new("no_pipeline"));
        graph.register_render_pass_exe("no_pipeline", logging_exe(&log, "no_pipeline"));

        frame(&mut graph, &mut ctx);
        assert_eq!(*log.borrow(), vec!["fine", "no_pipeline"]);
        assert!(!graph.pipeline("broken").unwrap().is_valid());
        assert!(graph.pipeline("no_pipeline").is_none());
    }

    #[test]
    fn test_pipeline_cache_reused_across_rebuilds() {
        let mut ctx = RecordingContext::new();
        let mut graph = FrameGraph::new();
        graph.register_render_pass(RenderPassInfo::new("cs").with_pipeline(compute_params(1)));
        graph.register_render_pass_exe("cs", |params| {
            params.ctx.dispatch(params.cmd, [1, 1, 1]);
        });
        graph.build(&mut ctx).unwrap();
        let first = graph.pipeline("cs").unwrap();

        graph.register_render_pass_exe("cs", |_| {});
        graph.build(&mut ctx).unwrap();
        assert_eq!(graph.pipeline("cs").unwrap(), first);
        assert_eq!(ctx.pipelines_created(), 1);

        graph.remove_pass("cs");
        graph.register_render_pass(RenderPassInfo::new("cs").with_pipeline(compute_params(2)));
        graph.register_render_pass_exe("cs", |_| {});
        graph.build(&mut ctx).unwrap();
        assert_ne!(graph.pipeline("cs").unwrap(), first);
        assert_eq!(ctx.pipelines_created(), 2);
        assert_eq!(ctx.live_pipeline_count(), 1);
    }

    #[test]
    fn test_resize_recreates_swapchain_images() {
        let mut ctx = RecordingContext::new();
        ctx.set_swapchain_extent(Extent3d::new_2d(640, 480));
        let mut graph = FrameGraph::new();
        graph.register_render_pass(
            RenderPassInfo::new("hdr").with_usage(
                ResourceUsage::write(
                    "hdr_color",
                    PipelineStage::COLOR_ATTACHMENT,
                    ResourceType::ColorAttachment,
                )
                .with_create(ImageCreateParams::swapchain(TextureFormat::Rgba16Float)),
            ),
        );
        graph.register_render_pass_exe("hdr", |_| {});
        frame(&mut graph, &mut ctx);
        assert_eq!(
            graph.vault().get("hdr_color").unwrap().extent(),
            Some(Extent3d::new_2d(640, 480))
        );

        ctx.set_swapchain_extent(Extent3d::new_2d(1920, 1080));
        graph.resize(Extent3d::new_2d(1920, 1080));
        assert!(graph.is_dirty());
        frame(&mut graph, &mut ctx);
        assert_eq!(
            graph.vault().get("hdr_color").unwrap().extent(),
            Some(Extent3d::new_2d(1920, 1080))
        );
        assert_eq!(ctx.live_image_count(), 1);
    }

    #[test]
    fn test_image_layout_carries_across_frames() {
        let mut ctx = RecordingContext::new();
        let mut graph = FrameGraph::new();
        graph.register_render_pass(
            RenderPassInfo::new("draw").with_usage(
                ResourceUsage::write(
                    "target",
                    PipelineStage::COLOR_ATTACHMENT,
                    ResourceType::ColorAttachment,
                )
                .with_create(ImageCreateParams::absolute(64, 64, TextureFormat::Rgba8Unorm)),
            ),
        );
        graph.register_render_pass(RenderPassInfo::new("sample").with_usage(
            ResourceUsage::read(
                "target",
                PipelineStage::FRAGMENT_SHADER,
                ResourceType::SampledTexture,
            ),
        ));
        graph.register_render_pass_exe("draw", |_| {});
        graph.register_render_pass_exe("sample", |_| {});

        let layouts = |commands: &[RecordedCommand]| -> Vec<(ImageLayout, ImageLayout)> {
            commands
                .iter()
                .filter_map(|c| match c {
                    RecordedCommand::Barriers(b) => Some(b.clone()),
                    _ => None,
                })
                .flatten()
                .filter_map(|b| match b.target {
                    BarrierTarget::Image {
                        old_layout,
                        new_layout,
                        ..
                    } => Some((old_layout, new_layout)),
                    _ => None,
                })
                .collect()
        };

        let first = frame(&mut graph, &mut ctx);
        assert_eq!(
            layouts(&first),
            vec![
                (ImageLayout::Undefined, ImageLayout::ColorAttachment),
                (ImageLayout::ColorAttachment, ImageLayout::ShaderReadOnly),
            ]
        );

        let second = frame(&mut graph, &mut ctx);
        assert_eq!(
            layouts(&second)[0],
            (ImageLayout::ShaderReadOnly, ImageLayout::ColorAttachment)
        );
        let RecordedCommand::Barriers(barriers) = &second[0] else {
            panic!("expected a transition first, got {second:?}");
        };
        assert_eq!(
            barriers[0].src_stage,
            PipelineStage::COLOR_ATTACHMENT | PipelineStage::FRAGMENT_SHADER
        );
    }

    #[test]
    fn test_buffer_barrier_between_write_and_read() {
        let mut ctx = RecordingContext::new();
        let mut graph = FrameGraph::new();
        graph.register_render_pass(
            RenderPassInfo::new("sim").with_usage(
                ResourceUsage::write("particles", PipelineStage::COMPUTE, ResourceType::Ssbo)
                    .with_create(BufferCreateParams::new(1024)),
            ),
        );
        graph.register_render_pass(RenderPassInfo::new("draw").with_usage(
            ResourceUsage::read(
                "particles",
                PipelineStage::VERTEX_SHADER,
                ResourceType::Ssbo,
            ),
        ));
        graph.register_render_pass_exe("sim", |_| {});
        graph.register_render_pass_exe("draw", |_| {});

        let commands = frame(&mut graph, &mut ctx);
        let RecordedCommand::Barriers(barriers) = &commands[0] else {
            panic!("expected a barrier, got {:?}", commands);
        };
        assert_eq!(barriers.len(), 1);
        assert_eq!(barriers[0].src_access, Access::WRITE);
        assert_eq!(barriers[0].dst_stage, PipelineStage::VERTEX_SHADER);
    }

    fn write_then_read_graph(copies_per_frame: bool) -> FrameGraph {
        let mut graph = FrameGraph::new();
        let writer = ResourceUsage::write("particles", PipelineStage::COMPUTE, ResourceType::Ssbo)
            .with_create(BufferCreateParams::new(1024));
        let writer = if copies_per_frame {
            writer.multi_buffered()
        } else {
            writer
        };
        graph.register_render_pass(RenderPassInfo::new("sim").with_usage(writer));
        graph.register_render_pass(RenderPassInfo::new("draw").with_usage(
            ResourceUsage::read(
                "particles",
                PipelineStage::FRAGMENT_SHADER,
                ResourceType::Ssbo,
            ),
        ));
        graph.register_render_pass_exe("sim", |_| {});
        graph.register_render_pass_exe("draw", |_| {});
        graph
    }

    fn all_barriers(commands: &[RecordedCommand]) -> Vec<Barrier> {
        commands
            .iter()
            .filter_map(|c| match c {
                RecordedCommand::Barriers(b) => Some(b.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    #[test]
    fn test_next_frame_writer_waits_on_previous_frame() {
        let mut ctx = RecordingContext::new().with_frames_in_flight(2);
        let mut graph = write_then_read_graph(false);

        let first = frame(&mut graph, &mut ctx);
        assert_eq!(all_barriers(&first).len(), 1);

        let second = frame(&mut graph, &mut ctx);
        let RecordedCommand::Barriers(barriers) = &second[0] else {
            panic!("expected a barrier before the writer, got {second:?}");
        };
        assert_eq!(barriers.len(), 1);
        assert_eq!(barriers[0].src_access, Access::WRITE);
        assert_eq!(
            barriers[0].src_stage,
            PipelineStage::COMPUTE | PipelineStage::FRAGMENT_SHADER
        );
        assert_eq!(barriers[0].dst_access, Access::WRITE);
        assert_eq!(barriers[0].dst_stage, PipelineStage::COMPUTE);
        assert_eq!(all_barriers(&second).len(), 2);
    }

    #[test]
    fn test_multi_buffered_copies_need_no_cross_frame_barrier() {
        let mut ctx = RecordingContext::new().with_frames_in_flight(2);
        let mut graph = write_then_read_graph(true);
        for _ in 0..3 {
            let commands = frame(&mut graph, &mut ctx);
            assert_eq!(all_barriers(&commands).len(), 1);
        }
    }

    #[test]
    fn test_leading_readers_wait_on_previous_frame_write() {
        let mut ctx = RecordingContext::new();
        let mut graph = FrameGraph::new();
        graph.register_render_pass(RenderPassInfo::new("shade").with_usage(
            ResourceUsage::read("lights", PipelineStage::FRAGMENT_SHADER, ResourceType::Ssbo)
                .with_create(BufferCreateParams::new(256)),
        ));
        graph.register_render_pass(RenderPassInfo::new("cull").with_usage(
            ResourceUsage::read("lights", PipelineStage::COMPUTE, ResourceType::Ssbo),
        ));
        graph.register_render_pass(RenderPassInfo::new("update").with_usage(
            ResourceUsage::write("lights", PipelineStage::TRANSFER, ResourceType::Ssbo),
        ));
        for name in ["shade", "cull", "update"] {
            graph.register_render_pass_exe(name, |_| {});
        }

        let first = frame(&mut graph, &mut ctx);
        // Only the in-frame write-after-read.
        assert_eq!(all_barriers(&first).len(), 1);

        let second = frame(&mut graph, &mut ctx);
        let RecordedCommand::Barriers(barriers) = &second[0] else {
            panic!("expected a barrier before the first reader, got {second:?}");
        };
        assert_eq!(barriers[0].src_access, Access::WRITE);
        assert_eq!(barriers[0].src_stage, PipelineStage::TRANSFER);
        assert_eq!(
            barriers[0].dst_stage,
            PipelineStage::FRAGMENT_SHADER | PipelineStage::COMPUTE | PipelineStage::TRANSFER
        );
    }

    #[test]
    fn test_cycle_reported() {
        let mut ctx = RecordingContext::new();
        let mut graph = FrameGraph::new();
        for name in ["a", "b"] {
            graph.register_render_pass(RenderPassInfo::new(name));
            graph.register_render_pass_exe(name, |_| {});
        }
        graph.add_dependency("a", "b");
        graph.add_dependency("b", "a");
        assert!(matches!(
            graph.build(&mut ctx),
            Err(GraphError::CyclicDependency)
        ));

        graph.add_dependency("a", "missing");
        graph.remove_pass("b");
        assert!(graph.build(&mut ctx).is_ok());
    }

    #[test]
    fn test_undeclared_scratch_resources_released() {
        let mut ctx = RecordingContext::new();
        let mut graph = FrameGraph::new();
        graph.register_render_pass(
            RenderPassInfo::new("tmp").with_usage(
                ResourceUsage::write("scratch", PipelineStage::COMPUTE, ResourceType::Ssbo)
                    .with_create(BufferCreateParams::new(64)),
            ),
        );
        graph.register_render_pass(
            RenderPassInfo::new("keep").with_usage(
                ResourceUsage::write("history", PipelineStage::COMPUTE, ResourceType::Ssbo)
                    .with_create(BufferCreateParams::new(64))
                    .owned_by_engine(),
            ),
        );
        graph.register_render_pass_exe("tmp", |_| {});
        graph.register_render_pass_exe("keep", |_| {});
        graph.build(&mut ctx).unwrap();
        assert_eq!(graph.vault().len(), 2);

        graph.clear();
        graph.build(&mut ctx).unwrap();
        assert!(!graph.vault().contains("scratch"));
        assert!(graph.vault().contains("history"));

        graph.destroy(&mut ctx);
        assert_eq!(ctx.live_buffer_count(), 0);
    }

    #[test]
    fn test_fill_callback_initialises_buffer() {
        let mut ctx = RecordingContext::new();
        let mut graph = FrameGraph::new();
        graph.register_render_pass(
            RenderPassInfo::new("lut").with_usage(
                ResourceUsage::read("lut", PipelineStage::FRAGMENT_SHADER, ResourceType::UniformBuffer)
                    .with_create(
                        BufferCreateParams::new(4).with_fill(|bytes| bytes.copy_from_slice(&[1, 2, 3, 4])),
                    ),
            ),
        );
        graph.register_render_pass_exe("lut", |_| {});
        graph.build(&mut ctx).unwrap();

        let ResourceObject::Buffer(buffer) = graph.vault().resolve("lut", 0).unwrap() else {
            panic!("expected buffer");
        };
        assert_eq!(ctx.buffer_contents(buffer).unwrap(), &[1, 2, 3, 4]);
    }

    struct DispatchPass;

    impl RenderPass for DispatchPass {
        fn info(&self) -> RenderPassInfo {
            RenderPassInfo::new("dispatch").with_pipeline(compute_params(9))
        }

        fn execute(&mut self, params: &mut ExecutionParams<'_>) {
            if let Some(pipeline) = params.pipeline {
                params.ctx.bind_pipeline(params.cmd, pipeline);
            }
            params.ctx.dispatch(params.cmd, [8, 8, 1]);
        }
    }

    #[test]
    fn test_add_pass_trait_object() {
        let mut ctx = RecordingContext::new();
        let mut graph = FrameGraph::new();
        assert!(graph.add_pass(DispatchPass));
        assert!(!graph.add_pass(DispatchPass));

        let commands = frame(&mut graph, &mut ctx);
        assert!(matches!(commands[0], RecordedCommand::BindPipeline(_)));
        assert_eq!(commands[1], RecordedCommand::Dispatch([8, 8, 1]));
    }

    #[test]
    fn test_graphics_pass_wrapped_in_rendering_scope() {
        let mut ctx = RecordingContext::new();
        let mut graph = FrameGraph::new();
        graph.register_render_pass(
            RenderPassInfo::new("gbuffer")
                .with_usage(
                    ResourceUsage::write(
                        "albedo",
                        PipelineStage::COLOR_ATTACHMENT,
                        ResourceType::ColorAttachment,
                    )
                    .with_create(ImageCreateParams::absolute(128, 64, TextureFormat::Rgba8Unorm)),
                )
                .with_usage(
                    ResourceUsage::write(
                        "depth",
                        PipelineStage::LATE_FRAGMENT_TESTS,
                        ResourceType::DepthAttachment,
                    )
                    .with_create(ImageCreateParams::absolute(
                        64,
                        64,
                        TextureFormat::Depth32Float,
                    )),
                )
                .with_pipeline(PipelineCreateParams::Graphics(
                    GraphicsPipelineParams::new(vec![0x0723_0203], vec![0x0723_0203])
                        .with_color_format(TextureFormat::Rgba8Unorm)
                        .with_depth(TextureFormat::Depth32Float, true),
                )),
        );
        graph.register_render_pass_exe("gbuffer", |params| params.draw_all());

        let commands = frame(&mut graph, &mut ctx);
        let begin = commands
            .iter()
            .position(|c| matches!(c, RecordedCommand::BeginRendering(_)))
            .unwrap();
        let RecordedCommand::BeginRendering(targets) = &commands[begin] else {
            unreachable!();
        };
        assert_eq!(targets.color.len(), 1);
        assert!(targets.depth.is_some());
        assert_eq!(targets.extent, Extent3d::new_2d(64, 64));
        assert_eq!(commands.last(), Some(&RecordedCommand::EndRendering));
        assert!(matches!(commands[0], RecordedCommand::Barriers(_)));
    }
}
