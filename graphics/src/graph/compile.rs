//! Frame graph compilation.
//!
//! Compilation turns the registered passes into an execution plan:
//!
//! 1. **Edges** - two passes touching the same resource where at least one
//!    writes are ordered by registration. Explicit dependencies add more edges.
//! 2. **Topological sort** - Kahn's algorithm with ties broken by registration
//!    order, so an unconstrained graph executes exactly as registered.
//! 3. **Barrier planning** - a single walk over the sorted passes tracking the
//!    last writer, readers and layout of every resource.
//!
//! Planned barriers name resources, not objects. They are resolved to handles
//! at execution, which is also where the first use of a resource in a frame
//! learns what the previous frame left behind: the layout of an image, and the
//! access scope that the first use has to wait on. The plan records, for that
//! purpose, each resource's first use ([`FrameEntry`]) and the scope it is left
//! in once the frame ends.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use crate::error::GraphicsError;
use crate::types::{Access, ImageLayout, PipelineStage};

use super::pass::RenderPassInfo;

/// Handle to a pass within one build of the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PassHandle(u32);

impl PassHandle {
    pub(crate) fn new(index: usize) -> Self {
        Self(index as u32)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Errors produced while building the frame graph.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// Explicit dependencies contradict each other or the resource order.
    #[error("frame graph contains cyclic dependency")]
    CyclicDependency,

    #[error("failed to create graph resource '{name}': {source}")]
    ResourceCreation {
        name: String,
        #[source]
        source: GraphicsError,
    },
}

/// An image layout change attached to a barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LayoutTransition {
    /// `None` on the first use in a frame; the layout the image was left in
    /// is substituted at execution.
    pub old: Option<ImageLayout>,
    pub new: ImageLayout,
}

/// A synchronization point planned before a pass.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PlannedBarrier {
    pub resource: String,
    pub src_access: Access,
    pub src_stage: PipelineStage,
    pub dst_access: Access,
    pub dst_stage: PipelineStage,
    /// Set for images only.
    pub layout: Option<LayoutTransition>,
}

impl PlannedBarrier {
    /// Whether this barrier moves an image into its first layout of the frame.
    ///
    /// Such barriers are planned with an empty source scope; execution fills
    /// in whatever earlier frames left outstanding.
    pub fn is_first_use(&self) -> bool {
        self.src_stage.is_empty()
            && matches!(self.layout, Some(LayoutTransition { old: None, .. }))
    }
}

/// The first use of a resource in a frame.
///
/// Whatever the previous frame did to the resource is only known at execution,
/// so the wait on it is resolved there.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FrameEntry {
    pub resource: String,
    /// Union of every access up to and including the frame's first write, or
    /// of all reads when the frame never writes.
    pub dst_access: Access,
    pub dst_stage: PipelineStage,
}

/// The access scope a resource is left in when the frame ends.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FrameExit {
    pub resource: String,
    pub access: Access,
    pub stage: PipelineStage,
}

/// A compiled frame graph ready for execution.
#[derive(Debug, Default)]
pub struct CompiledGraph {
    pass_names: Vec<String>,
    pass_order: Vec<PassHandle>,
    /// Barriers indexed by position in `pass_order`.
    barriers: Vec<Vec<PlannedBarrier>>,
    /// First uses indexed by position in `pass_order`.
    entries: Vec<Vec<FrameEntry>>,
    exits: Vec<FrameExit>,
    edges: Vec<(PassHandle, PassHandle)>,
    dropped_passes: Vec<String>,
}

impl CompiledGraph {
    /// Pass execution order.
    pub fn pass_order(&self) -> &[PassHandle] {
        &self.pass_order
    }

    /// Pass names in execution order.
    pub fn ordered_names(&self) -> Vec<&str> {
        self.pass_order
            .iter()
            .map(|h| self.pass_names[h.index()].as_str())
            .collect()
    }

    pub fn pass_name(&self, handle: PassHandle) -> &str {
        &self.pass_names[handle.index()]
    }

    /// Position of a pass in the execution order.
    pub fn position_of(&self, name: &str) -> Option<usize> {
        self.pass_order
            .iter()
            .position(|h| self.pass_names[h.index()] == name)
    }

    pub fn pass_count(&self) -> usize {
        self.pass_order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pass_order.is_empty()
    }

    /// Barriers recorded before the pass at `position` in execution order.
    pub fn barriers_at(&self, position: usize) -> &[PlannedBarrier] {
        self.barriers
            .get(position)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Barriers recorded before the named pass.
    pub fn barriers_for(&self, name: &str) -> &[PlannedBarrier] {
        self.position_of(name)
            .map(|position| self.barriers_at(position))
            .unwrap_or_default()
    }

    pub fn barrier_count(&self) -> usize {
        self.barriers.iter().map(Vec::len).sum()
    }

    /// Resources first used by the pass at `position`.
    pub fn entries_at(&self, position: usize) -> &[FrameEntry] {
        self.entries
            .get(position)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Resources first used by the named pass.
    pub fn entries_for(&self, name: &str) -> &[FrameEntry] {
        self.position_of(name)
            .map(|position| self.entries_at(position))
            .unwrap_or_default()
    }

    /// End-of-frame scope of every resource the graph touches.
    pub fn exits(&self) -> &[FrameExit] {
        &self.exits
    }

    /// Dependency edges as `(dependent, dependency)` pairs.
    pub fn edges(&self) -> &[(PassHandle, PassHandle)] {
        &self.edges
    }

    /// Passes declared without an execution closure.
    pub fn dropped_passes(&self) -> &[String] {
        &self.dropped_passes
    }

    pub(crate) fn set_dropped_passes(&mut self, dropped: Vec<String>) {
        self.dropped_passes = dropped;
    }
}

/// Compile passes into an execution plan.
///
/// `dependencies` holds extra `(dependent, dependency)` pairs on top of the
/// edges derived from resource usages.
pub fn compile(
    passes: &[RenderPassInfo],
    dependencies: &[(PassHandle, PassHandle)],
) -> Result<CompiledGraph, GraphError> {
    let edges = collect_edges(passes, dependencies);
    let pass_order = topological_order(passes.len(), &edges)?;
    let plan = plan_barriers(passes, &pass_order);

    Ok(CompiledGraph {
        pass_names: passes.iter().map(|p| p.name.clone()).collect(),
        pass_order,
        barriers: plan.barriers,
        entries: plan.entries,
        exits: plan.exits,
        edges,
        dropped_passes: Vec::new(),
    })
}

fn collect_edges(
    passes: &[RenderPassInfo],
    dependencies: &[(PassHandle, PassHandle)],
) -> Vec<(PassHandle, PassHandle)> {
    let mut accesses: HashMap<&str, Vec<(usize, bool)>> = HashMap::new();
    for (index, pass) in passes.iter().enumerate() {
        for usage in &pass.resource_usages {
            accesses
                .entry(usage.name.as_str())
                .or_default()
                .push((index, usage.is_write()));
        }
    }

    let mut seen = HashSet::new();
    let mut edges = Vec::new();
    let mut push = |edge: (PassHandle, PassHandle)| {
        if edge.0 != edge.1 && seen.insert(edge) {
            edges.push(edge);
        }
    };

    let mut names: Vec<&&str> = accesses.keys().collect();
    names.sort();
    for name in names {
        let list = &accesses[*name];
        for (i, &(earlier, earlier_writes)) in list.iter().enumerate() {
            for &(later, later_writes) in &list[i + 1..] {
                if earlier_writes || later_writes {
                    push((PassHandle::new(later), PassHandle::new(earlier)));
                }
            }
        }
    }

    for &edge in dependencies {
        push(edge);
    }
    edges
}

fn topological_order(
    n: usize,
    edges: &[(PassHandle, PassHandle)],
) -> Result<Vec<PassHandle>, GraphError> {
    let mut in_degree = vec![0u32; n];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
    for &(dependent, dependency) in edges {
        in_degree[dependent.index()] += 1;
        dependents[dependency.index()].push(dependent.index());
    }

    // Min-heap on registration index keeps the order stable.
    let mut ready: BinaryHeap<Reverse<usize>> = (0..n)
        .filter(|&i| in_degree[i] == 0)
        .map(Reverse)
        .collect();

    let mut order = Vec::with_capacity(n);
    while let Some(Reverse(index)) = ready.pop() {
        order.push(PassHandle::new(index));
        for &dependent in &dependents[index] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                ready.push(Reverse(dependent));
            }
        }
    }

    if order.len() != n {
        return Err(GraphError::CyclicDependency);
    }
    Ok(order)
}

/// Hazard state of one resource during barrier planning.
#[derive(Debug, Default)]
struct ResourceTrack {
    last_write: Option<(Access, PipelineStage)>,
    /// Stages that read since the last write.
    reads: PipelineStage,
    /// Reader stages already made to wait on the last write.
    synced: PipelineStage,
    layout: Option<ImageLayout>,
}

impl ResourceTrack {
    fn src_scope(&self) -> (Access, PipelineStage) {
        match self.last_write {
            Some((access, stage)) => (access, stage | self.reads),
            None => (Access::empty(), self.reads),
        }
    }
}

struct BarrierPlan {
    barriers: Vec<Vec<PlannedBarrier>>,
    entries: Vec<Vec<FrameEntry>>,
    exits: Vec<FrameExit>,
}

/// Accesses that must wait on the previous frame, per resource: everything up
/// to and including the first write.
fn leading_scopes<'a>(
    passes: &'a [RenderPassInfo],
    order: &[PassHandle],
) -> HashMap<&'a str, (Access, PipelineStage)> {
    let mut scopes: HashMap<&str, (Access, PipelineStage)> = HashMap::new();
    let mut closed: HashSet<&str> = HashSet::new();
    for handle in order {
        for usage in &passes[handle.index()].resource_usages {
            if closed.contains(usage.name.as_str()) {
                continue;
            }
            let scope = scopes.entry(usage.name.as_str()).or_default();
            scope.0 |= usage.access;
            scope.1 |= usage.stage;
            if usage.is_write() {
                closed.insert(usage.name.as_str());
            }
        }
    }
    scopes
}

fn plan_barriers(passes: &[RenderPassInfo], order: &[PassHandle]) -> BarrierPlan {
    let leading = leading_scopes(passes, order);
    let mut tracks: HashMap<&str, ResourceTrack> = HashMap::new();
    let mut planned = Vec::with_capacity(order.len());
    let mut entries = Vec::with_capacity(order.len());
    // Resource names in first-use order, for a deterministic exit list.
    let mut touched: Vec<&str> = Vec::new();

    for handle in order {
        let mut barriers = Vec::new();
        let mut first_uses = Vec::new();

        for usage in &passes[handle.index()].resource_usages {
            let name = usage.name.as_str();
            if !tracks.contains_key(name) {
                let (dst_access, dst_stage) = leading
                    .get(name)
                    .copied()
                    .unwrap_or((usage.access, usage.stage));
                first_uses.push(FrameEntry {
                    resource: usage.name.clone(),
                    dst_access,
                    dst_stage,
                });
                touched.push(name);
            }
            let track = tracks.entry(name).or_default();
            let required = usage.required_layout();
            let transition = required.is_some_and(|new| track.layout != Some(new));

            let hazard = if usage.is_write() {
                track.last_write.is_some() || !track.reads.is_empty()
            } else {
                track.last_write.is_some() && !track.synced.contains(usage.stage)
            };

            if hazard || transition {
                let (src_access, src_stage) = track.src_scope();
                barriers.push(PlannedBarrier {
                    resource: usage.name.clone(),
                    src_access,
                    src_stage,
                    dst_access: usage.access,
                    dst_stage: usage.stage,
                    layout: required.map(|new| LayoutTransition {
                        old: track.layout,
                        new,
                    }),
                });
            }

            if usage.is_write() {
                track.last_write = Some((usage.access, usage.stage));
                track.reads = PipelineStage::empty();
                track.synced = PipelineStage::empty();
            } else {
                track.reads |= usage.stage;
                if hazard || transition {
                    track.synced |= usage.stage;
                }
            }
            if required.is_some() {
                track.layout = required;
            }
        }

        planned.push(barriers);
        entries.push(first_uses);
    }

    let exits = touched
        .into_iter()
        .filter_map(|name| {
            let (access, stage) = tracks.get(name)?.src_scope();
            Some(FrameExit {
                resource: name.to_string(),
                access,
                stage,
            })
        })
        .collect();

    BarrierPlan {
        barriers: planned,
        entries,
        exits,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{ResourceType, ResourceUsage};

    fn pass(name: &str) -> RenderPassInfo {
        RenderPassInfo::new(name)
    }

    fn ssbo_write(name: &str) -> ResourceUsage {
        ResourceUsage::write(name, PipelineStage::COMPUTE, ResourceType::Ssbo)
    }

    fn ssbo_read(name: &str, stage: PipelineStage) -> ResourceUsage {
        ResourceUsage::read(name, stage, ResourceType::Ssbo)
    }

    #[test]
    fn test_compile_empty_graph() {
        let compiled = compile(&[], &[]).unwrap();
        assert!(compiled.is_empty());
        assert_eq!(compiled.pass_count(), 0);
        assert_eq!(compiled.barrier_count(), 0);
    }

    #[test]
    fn test_compile_single_pass() {
        let compiled = compile(&[pass("main")], &[]).unwrap();
        assert_eq!(compiled.pass_order(), &[PassHandle::new(0)]);
        assert_eq!(compiled.ordered_names(), vec!["main"]);
    }

    #[test]
    fn test_compile_independent_passes_keep_registration_order() {
        let passes = [pass("a"), pass("b"), pass("c")];
        let compiled = compile(&passes, &[]).unwrap();
        assert_eq!(compiled.ordered_names(), vec!["a", "b", "c"]);
        assert!(compiled.edges().is_empty());
    }

    #[test]
    fn test_compile_linear_chain_from_resources() {
        let passes = [
            pass("produce").with_usage(ssbo_write("a")),
            pass("transform")
                .with_usage(ssbo_read("a", PipelineStage::COMPUTE))
                .with_usage(ssbo_write("b")),
            pass("consume").with_usage(ssbo_read("b", PipelineStage::VERTEX_SHADER)),
        ];
        let compiled = compile(&passes, &[]).unwrap();
        assert_eq!(compiled.ordered_names(), vec!["produce", "transform", "consume"]);
        assert_eq!(compiled.edges().len(), 2);
    }

    #[test]
    fn test_compile_diamond_dependency() {
        //     A
        //    / \
        //   B   C
        //    \ /
        //     D
        let passes = [
            pass("A").with_usage(ssbo_write("x")),
            pass("B")
                .with_usage(ssbo_read("x", PipelineStage::COMPUTE))
                .with_usage(ssbo_write("y")),
            pass("C")
                .with_usage(ssbo_read("x", PipelineStage::COMPUTE))
                .with_usage(ssbo_write("z")),
            pass("D")
                .with_usage(ssbo_read("y", PipelineStage::FRAGMENT_SHADER))
                .with_usage(ssbo_read("z", PipelineStage::FRAGMENT_SHADER)),
        ];
        let compiled = compile(&passes, &[]).unwrap();
        assert_eq!(compiled.ordered_names(), vec!["A", "B", "C", "D"]);
    }

    #[test]
    fn test_read_after_read_has_no_edge() {
        let passes = [
            pass("a").with_usage(ssbo_read("x", PipelineStage::COMPUTE)),
            pass("b").with_usage(ssbo_read("x", PipelineStage::FRAGMENT_SHADER)),
        ];
        let compiled = compile(&passes, &[]).unwrap();
        assert!(compiled.edges().is_empty());
        assert_eq!(compiled.barrier_count(), 0);
    }

    #[test]
    fn test_explicit_dependency_reorders() {
        let passes = [pass("late"), pass("early")];
        let deps = [(PassHandle::new(0), PassHandle::new(1))];
        let compiled = compile(&passes, &deps).unwrap();
        assert_eq!(compiled.ordered_names(), vec!["early", "late"]);
    }

    #[test]
    fn test_compile_cycle_two_nodes() {
        let passes = [pass("A"), pass("B")];
        let deps = [
            (PassHandle::new(1), PassHandle::new(0)),
            (PassHandle::new(0), PassHandle::new(1)),
        ];
        assert!(matches!(
            compile(&passes, &deps),
            Err(GraphError::CyclicDependency)
        ));
    }

    #[test]
    fn test_dependency_against_resource_order_is_cycle() {
        let passes = [
            pass("writer").with_usage(ssbo_write("x")),
            pass("reader").with_usage(ssbo_read("x", PipelineStage::COMPUTE)),
        ];
        let deps = [(PassHandle::new(0), PassHandle::new(1))];
        assert!(matches!(
            compile(&passes, &deps),
            Err(GraphError::CyclicDependency)
        ));
    }

    #[test]
    fn test_compile_partial_cycle() {
        let passes = [pass("A"), pass("B"), pass("C"), pass("D")];
        let deps = [
            (PassHandle::new(1), PassHandle::new(0)),
            (PassHandle::new(2), PassHandle::new(1)),
            (PassHandle::new(0), PassHandle::new(2)),
        ];
        assert!(matches!(
            compile(&passes, &deps),
            Err(GraphError::CyclicDependency)
        ));
    }

    #[test]
    fn test_read_after_write_barrier_scoped_to_stages() {
        let passes = [
            pass("simulate").with_usage(ssbo_write("particles")),
            pass("draw").with_usage(ssbo_read("particles", PipelineStage::VERTEX_SHADER)),
        ];
        let compiled = compile(&passes, &[]).unwrap();
        assert!(compiled.barriers_for("simulate").is_empty());

        let barriers = compiled.barriers_for("draw");
        assert_eq!(barriers.len(), 1);
        let barrier = &barriers[0];
        assert_eq!(barrier.resource, "particles");
        assert_eq!(barrier.src_access, Access::WRITE);
        assert_eq!(barrier.src_stage, PipelineStage::COMPUTE);
        assert_eq!(barrier.dst_access, Access::READ);
        assert_eq!(barrier.dst_stage, PipelineStage::VERTEX_SHADER);
        assert_eq!(barrier.layout, None);
    }

    #[test]
    fn test_second_reader_in_synced_stage_needs_no_barrier() {
        let passes = [
            pass("write").with_usage(ssbo_write("x")),
            pass("read_a").with_usage(ssbo_read("x", PipelineStage::FRAGMENT_SHADER)),
            pass("read_b").with_usage(ssbo_read("x", PipelineStage::FRAGMENT_SHADER)),
            pass("read_c").with_usage(ssbo_read("x", PipelineStage::COMPUTE)),
        ];
        let compiled = compile(&passes, &[]).unwrap();
        assert_eq!(compiled.barriers_for("read_a").len(), 1);
        assert!(compiled.barriers_for("read_b").is_empty());
        assert_eq!(compiled.barriers_for("read_c").len(), 1);
    }

    #[test]
    fn test_write_after_read_waits_on_readers() {
        let passes = [
            pass("write").with_usage(ssbo_write("x")),
            pass("read").with_usage(ssbo_read("x", PipelineStage::FRAGMENT_SHADER)),
            pass("rewrite").with_usage(ssbo_write("x")),
        ];
        let compiled = compile(&passes, &[]).unwrap();
        let barrier = &compiled.barriers_for("rewrite")[0];
        assert_eq!(
            barrier.src_stage,
            PipelineStage::COMPUTE | PipelineStage::FRAGMENT_SHADER
        );
        assert_eq!(barrier.dst_access, Access::WRITE);
    }

    #[test]
    fn test_image_layout_transitions() {
        let passes = [
            pass("gbuffer").with_usage(ResourceUsage::write(
                "albedo",
                PipelineStage::COLOR_ATTACHMENT,
                ResourceType::ColorAttachment,
            )),
            pass("lighting").with_usage(ResourceUsage::read(
                "albedo",
                PipelineStage::FRAGMENT_SHADER,
                ResourceType::SampledTexture,
            )),
            pass("post").with_usage(ResourceUsage::read(
                "albedo",
                PipelineStage::FRAGMENT_SHADER,
                ResourceType::SampledTexture,
            )),
        ];
        let compiled = compile(&passes, &[]).unwrap();

        let first = &compiled.barriers_for("gbuffer")[0];
        assert!(first.is_first_use());
        assert_eq!(
            first.layout,
            Some(LayoutTransition {
                old: None,
                new: ImageLayout::ColorAttachment
            })
        );

        let second = &compiled.barriers_for("lighting")[0];
        assert!(!second.is_first_use());
        assert_eq!(
            second.layout,
            Some(LayoutTransition {
                old: Some(ImageLayout::ColorAttachment),
                new: ImageLayout::ShaderReadOnly
            })
        );
        assert!(compiled.barriers_for("post").is_empty());
        assert_eq!(compiled.barrier_count(), 2);
    }

    #[test]
    fn test_read_only_layout_change_still_transitions() {
        let passes = [
            pass("sample").with_usage(ResourceUsage::read(
                "shadow",
                PipelineStage::FRAGMENT_SHADER,
                ResourceType::SampledDepthTexture,
            )),
            pass("copy").with_usage(ResourceUsage::read(
                "shadow",
                PipelineStage::TRANSFER,
                ResourceType::TransferSrcImage,
            )),
        ];
        let compiled = compile(&passes, &[]).unwrap();
        assert!(compiled.edges().is_empty());
        let barrier = &compiled.barriers_for("copy")[0];
        assert_eq!(
            barrier.layout.map(|l| l.new),
            Some(ImageLayout::TransferSrc)
        );
        assert_eq!(barrier.src_stage, PipelineStage::FRAGMENT_SHADER);
    }

    #[test]
    fn test_first_use_covers_leading_reads() {
        let passes = [
            pass("draw").with_usage(ssbo_read("particles", PipelineStage::VERTEX_SHADER)),
            pass("count").with_usage(ssbo_read("particles", PipelineStage::COMPUTE)),
            pass("simulate").with_usage(ssbo_write("particles")),
            pass("trail").with_usage(ssbo_read("particles", PipelineStage::FRAGMENT_SHADER)),
        ];
        let compiled = compile(&passes, &[]).unwrap();

        assert_eq!(
            compiled.entries_for("draw"),
            &[FrameEntry {
                resource: "particles".to_string(),
                dst_access: Access::READ_WRITE,
                dst_stage: PipelineStage::VERTEX_SHADER | PipelineStage::COMPUTE,
            }]
        );
        assert!(compiled.entries_for("simulate").is_empty());
        assert!(compiled.entries_for("trail").is_empty());
    }

    #[test]
    fn test_exit_scope_is_last_write_and_later_reads() {
        let passes = [
            pass("simulate").with_usage(ssbo_write("particles")),
            pass("draw").with_usage(ssbo_read("particles", PipelineStage::FRAGMENT_SHADER)),
            pass("peek").with_usage(ssbo_read("counters", PipelineStage::COMPUTE)),
        ];
        let compiled = compile(&passes, &[]).unwrap();
        assert_eq!(
            compiled.exits(),
            &[
                FrameExit {
                    resource: "particles".to_string(),
                    access: Access::WRITE,
                    stage: PipelineStage::COMPUTE | PipelineStage::FRAGMENT_SHADER,
                },
                FrameExit {
                    resource: "counters".to_string(),
                    access: Access::empty(),
                    stage: PipelineStage::COMPUTE,
                },
            ]
        );
    }

    #[test]
    fn test_compiled_graph_lookup() {
        let compiled = compile(&[pass("a"), pass("b")], &[]).unwrap();
        assert_eq!(compiled.position_of("b"), Some(1));
        assert_eq!(compiled.position_of("zzz"), None);
        assert!(compiled.barriers_for("zzz").is_empty());
        assert_eq!(compiled.pass_name(PassHandle::new(1)), "b");
        assert!(compiled.dropped_passes().is_empty());
    }
}
