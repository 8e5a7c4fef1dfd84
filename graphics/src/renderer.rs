//! Renderer facade tying residency, the frame graph and animation together.

use std::collections::HashMap;
use std::time::Duration;

use meridian_core::animation::{
    AnimatedSkeleton, AnimationThread, AnimationThreadConfig, Animator,
};
use meridian_core::ids::AnimatorId;
use meridian_core::scene::AssetUpdate;

use crate::context::RenderContext;
use crate::error::RendererError;
use crate::graph::FrameGraph;
use crate::residency::{ResidencyManager, ResidencyStats};
use crate::types::Extent3d;
use crate::upload::UploadReport;

/// Sizes and budgets of the renderer.
#[derive(Debug, Clone, PartialEq)]
pub struct RendererConfig {
    /// Bytes of the shared vertex buffer.
    pub vertex_buffer_size: u64,
    /// Bytes of the shared index buffer.
    pub index_buffer_size: u64,
    /// Per-frame upload budget in bytes.
    pub staging_buffer_size: u64,
    pub frames_in_flight: usize,
    pub max_bindless_textures: u32,
    /// Keyframe precomputation rate in samples per second.
    pub animation_framerate: f32,
    /// Animation worker poll interval.
    pub animation_tick: Duration,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            vertex_buffer_size: 256 * 1024 * 1024,
            index_buffer_size: 64 * 1024 * 1024,
            staging_buffer_size: 16 * 1024 * 1024,
            frames_in_flight: 2,
            max_bindless_textures: 4096,
            animation_framerate: 30.0,
            animation_tick: Duration::from_millis(5),
        }
    }
}

impl RendererConfig {
    pub fn with_vertex_buffer_size(mut self, size: u64) -> Self {
        self.vertex_buffer_size = size;
        self
    }

    pub fn with_index_buffer_size(mut self, size: u64) -> Self {
        self.index_buffer_size = size;
        self
    }

    pub fn with_staging_buffer_size(mut self, size: u64) -> Self {
        self.staging_buffer_size = size;
        self
    }

    pub fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = frames;
        self
    }

    pub fn with_max_bindless_textures(mut self, count: u32) -> Self {
        self.max_bindless_textures = count;
        self
    }

    pub fn with_animation_framerate(mut self, framerate: f32) -> Self {
        self.animation_framerate = framerate;
        self
    }

    pub fn with_animation_tick(mut self, tick: Duration) -> Self {
        self.animation_tick = tick;
        self
    }

    fn animation_config(&self) -> AnimationThreadConfig {
        AnimationThreadConfig::default()
            .with_framerate(self.animation_framerate)
            .with_tick(self.animation_tick)
    }
}

/// Outcome of one [`Renderer::render_frame`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub frame_index: u64,
    pub draw_count: usize,
    pub animated_skeletons: usize,
    pub upload: UploadReport,
}

/// Per-frame driver.
///
/// Render-thread only; the animation worker runs on its own thread and is
/// joined when the renderer is dropped.
pub struct Renderer {
    config: RendererConfig,
    residency: ResidencyManager,
    graph: FrameGraph,
    animation: AnimationThread,
    skeletons: HashMap<AnimatorId, AnimatedSkeleton>,
}

impl Renderer {
    pub fn new(ctx: &mut dyn RenderContext, config: RendererConfig) -> Result<Self, RendererError> {
        if config.frames_in_flight != ctx.frames_in_flight() {
            log::warn!(
                "Renderer configured for {} frames in flight but context '{}' uses {}",
                config.frames_in_flight,
                ctx.name(),
                ctx.frames_in_flight()
            );
        }

        let residency = ResidencyManager::new(ctx, &config)?;
        let animation = AnimationThread::spawn(config.animation_config())?;
        log::info!("Renderer initialized on '{}'", ctx.name());

        Ok(Self {
            config,
            residency,
            graph: FrameGraph::new(),
            animation,
            skeletons: HashMap::new(),
        })
    }

    /// Route a scene batch: skeletons and animations to the animation thread,
    /// everything else to residency.
    pub fn asset_update(&mut self, ctx: &dyn RenderContext, mut update: AssetUpdate) {
        let animation = update.take_animation_part();
        if !animation.is_empty() {
            self.animation.apply_update(animation);
        }
        if !update.is_empty() {
            self.residency.apply_update(ctx, update);
        }
    }

    /// Start an animator. Its poses appear once keyframes are precomputed.
    pub fn connect_animator(&self, animator: Animator) -> Result<(), RendererError> {
        self.animation.connect(animator)?;
        Ok(())
    }

    pub fn disconnect_animator(&self, id: AnimatorId) {
        self.animation.disconnect(id);
    }

    pub fn resize(&mut self, ctx: &mut dyn RenderContext, extent: Extent3d) {
        log::debug!("Resizing to {}x{}", extent.width, extent.height);
        ctx.set_swapchain_extent(extent);
        self.graph.resize(extent);
    }

    /// Record and submit one frame.
    ///
    /// Order: begin frame, stream uploads, snapshot animation poses, build the
    /// graph if registrations changed, execute every pass, end frame.
    pub fn render_frame(&mut self, ctx: &mut dyn RenderContext) -> Result<FrameStats, RendererError> {
        meridian_core::profile_function!();

        let cmd = ctx.begin_frame()?;
        let frame_index = ctx.frame_index();

        let upload = self.residency.upload(ctx, cmd);
        self.skeletons = self.animation.get_current_skeletons();
        ctx.blackboard_mut()
            .set("animated_skeletons", self.skeletons.len() as i64);

        let draws = self.residency.draw_items();
        let executed = self.graph.execute(ctx, cmd, &draws);
        // Submit even when the graph failed; the frame slot must close.
        ctx.end_frame(cmd)?;
        executed?;

        let stats = FrameStats {
            frame_index,
            draw_count: draws.len(),
            animated_skeletons: self.skeletons.len(),
            upload,
        };
        crate::profiling::plot_frame(&stats, &self.residency.stats());
        meridian_core::frame_mark!();
        Ok(stats)
    }

    pub fn frame_graph(&self) -> &FrameGraph {
        &self.graph
    }

    /// Register or change passes. Changes take effect on the next frame.
    pub fn frame_graph_mut(&mut self) -> &mut FrameGraph {
        &mut self.graph
    }

    pub fn residency(&self) -> &ResidencyManager {
        &self.residency
    }

    pub fn stats(&self) -> ResidencyStats {
        self.residency.stats()
    }

    /// Poses published by the animation thread as of the last frame.
    pub fn skeletons(&self) -> &HashMap<AnimatorId, AnimatedSkeleton> {
        &self.skeletons
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// Destroy every GPU object. Call after the device is idle.
    pub fn destroy(self, ctx: &mut dyn RenderContext) {
        let Self {
            mut graph,
            residency,
            ..
        } = self;
        graph.destroy(ctx);
        residency.destroy(ctx);
    }
}
