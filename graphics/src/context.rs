//! The render context capability surface.
//!
//! Everything the frame graph, upload queue and residency layer need from the
//! device goes through [`RenderContext`]: resource creation, host writes into
//! mapped buffers, command recording, single-time submission and a handful of
//! per-frame queries. Backends implement it; the core never touches a native
//! API directly.

use std::collections::HashMap;

use meridian_core::ids::{MeshId, ModelId, RenderableId};
use meridian_core::scene::Aabb;

use crate::error::GraphicsError;
use crate::graph::PipelineCreateParams;
use crate::types::{
    Barrier, BufferCopy, BufferDescriptor, BufferHandle, BufferImageCopy, CommandBufferHandle,
    Extent3d, ImageHandle, PipelineHandle, TextureDescriptor,
};

/// Device capabilities used by the renderer.
///
/// Recording methods take the command buffer they record into. Recording never
/// fails at call time; backends report invalid handles through the log and
/// surface device loss on submission.
pub trait RenderContext {
    /// Backend name for logging.
    fn name(&self) -> &'static str;

    fn create_buffer(&mut self, descriptor: &BufferDescriptor)
    -> Result<BufferHandle, GraphicsError>;
    fn destroy_buffer(&mut self, buffer: BufferHandle);

    fn create_image(&mut self, descriptor: &TextureDescriptor)
    -> Result<ImageHandle, GraphicsError>;
    fn destroy_image(&mut self, image: ImageHandle);

    fn create_pipeline(
        &mut self,
        label: &str,
        params: &PipelineCreateParams,
    ) -> Result<PipelineHandle, GraphicsError>;
    fn destroy_pipeline(&mut self, pipeline: PipelineHandle);

    /// Write bytes into a host-visible buffer.
    fn write_buffer(
        &mut self,
        buffer: BufferHandle,
        offset: u64,
        data: &[u8],
    ) -> Result<(), GraphicsError>;

    fn copy_buffer(
        &mut self,
        cmd: CommandBufferHandle,
        src: BufferHandle,
        dst: BufferHandle,
        regions: &[BufferCopy],
    );

    /// Copy tightly packed texel data into one mip of an image in
    /// [`ImageLayout::TransferDst`](crate::types::ImageLayout::TransferDst).
    fn copy_buffer_to_image(
        &mut self,
        cmd: CommandBufferHandle,
        src: BufferHandle,
        dst: ImageHandle,
        region: &BufferImageCopy,
    );

    /// Linear downsampling blit from `src_mip` (in transfer-src layout) to
    /// `dst_mip` (in transfer-dst layout) of the same image.
    fn blit_image(&mut self, cmd: CommandBufferHandle, image: ImageHandle, src_mip: u32, dst_mip: u32);

    fn pipeline_barrier(&mut self, cmd: CommandBufferHandle, barriers: &[Barrier]);

    /// Open a rendering scope over the given attachments. Attachments must
    /// already be in their attachment layouts.
    fn begin_rendering(&mut self, cmd: CommandBufferHandle, targets: &RenderTargets);

    fn end_rendering(&mut self, cmd: CommandBufferHandle);

    fn bind_pipeline(&mut self, cmd: CommandBufferHandle, pipeline: PipelineHandle);

    fn push_constants(&mut self, cmd: CommandBufferHandle, pipeline: PipelineHandle, data: &[u8]);

    fn draw_mesh(&mut self, cmd: CommandBufferHandle, draw: &MeshDraw);

    fn dispatch(&mut self, cmd: CommandBufferHandle, groups: [u32; 3]);

    /// Wait for the current frame slot to become free and start recording.
    fn begin_frame(&mut self) -> Result<CommandBufferHandle, GraphicsError>;

    /// Submit the frame's commands and advance the frame index.
    fn end_frame(&mut self, cmd: CommandBufferHandle) -> Result<(), GraphicsError>;

    fn begin_single_time_commands(&mut self) -> Result<CommandBufferHandle, GraphicsError>;

    /// Submit and wait for a command buffer from
    /// [`begin_single_time_commands`](Self::begin_single_time_commands).
    fn end_single_time_commands(&mut self, cmd: CommandBufferHandle) -> Result<(), GraphicsError>;

    fn swapchain_extent(&self) -> Extent3d;

    /// Size swapchain-relative graph images follow from the next build.
    fn set_swapchain_extent(&mut self, extent: Extent3d);

    /// Monotonic count of frames started.
    fn frame_index(&self) -> u64;

    fn frames_in_flight(&self) -> usize;

    fn debug_options(&self) -> &Blackboard;
    fn debug_options_mut(&mut self) -> &mut Blackboard;

    /// Scratch key/value storage shared between passes.
    fn blackboard(&self) -> &Blackboard;
    fn blackboard_mut(&mut self) -> &mut Blackboard;

    /// Frame-in-flight slot of the current frame.
    fn frame_slot(&self) -> usize {
        (self.frame_index() % self.frames_in_flight().max(1) as u64) as usize
    }
}

/// Record commands into a one-off command buffer and wait for completion.
pub fn submit_single_time<F>(ctx: &mut dyn RenderContext, record: F) -> Result<(), GraphicsError>
where
    F: FnOnce(&mut dyn RenderContext, CommandBufferHandle),
{
    let cmd = ctx.begin_single_time_commands()?;
    record(ctx, cmd);
    ctx.end_single_time_commands(cmd)
}

/// The pipeline resolved for a pass.
///
/// Creation failures produce an invalid pipeline instead of an error; passes
/// holding one are skipped at execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pipeline {
    handle: Option<PipelineHandle>,
}

impl Pipeline {
    pub fn new(handle: PipelineHandle) -> Self {
        Self {
            handle: Some(handle),
        }
    }

    pub fn invalid() -> Self {
        Self { handle: None }
    }

    pub fn is_valid(&self) -> bool {
        self.handle.is_some()
    }

    pub fn handle(&self) -> Option<PipelineHandle> {
        self.handle
    }
}

/// Attachments a graphics pass renders into.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderTargets {
    pub color: Vec<ImageHandle>,
    pub depth: Option<ImageHandle>,
    /// Render area; the smallest attachment extent.
    pub extent: Extent3d,
}

impl RenderTargets {
    pub fn is_empty(&self) -> bool {
        self.color.is_empty() && self.depth.is_none()
    }
}

/// A value stored on a [`Blackboard`].
#[derive(Debug, Clone, PartialEq)]
pub enum BlackboardValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<bool> for BlackboardValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for BlackboardValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for BlackboardValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for BlackboardValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for BlackboardValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

/// String-keyed value map used for debug options and pass-to-pass data.
#[derive(Debug, Clone, Default)]
pub struct Blackboard {
    values: HashMap<String, BlackboardValue>,
}

impl Blackboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<BlackboardValue>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&BlackboardValue> {
        self.values.get(key)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.values.get(key)? {
            BlackboardValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.values.get(key)? {
            BlackboardValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_float(&self, key: &str) -> Option<f64> {
        match self.values.get(key)? {
            BlackboardValue::Float(v) => Some(*v),
            BlackboardValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn get_text(&self, key: &str) -> Option<&str> {
        match self.values.get(key)? {
            BlackboardValue::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<BlackboardValue> {
        self.values.remove(key)
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Arguments of a single mesh draw out of the fat buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MeshDraw {
    pub vertex_buffer: BufferHandle,
    /// `None` for non-indexed meshes.
    pub index_buffer: Option<BufferHandle>,
    /// First vertex in units of vertices.
    pub vertex_offset: i32,
    /// First index in units of indices.
    pub first_index: u32,
    pub index_count: u32,
    pub vertex_count: u32,
    pub instance_count: u32,
    pub first_instance: u32,
}

/// One visible mesh instance prepared for passes to draw.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawItem {
    pub renderable: RenderableId,
    pub model: ModelId,
    pub mesh: MeshId,
    pub draw: MeshDraw,
    /// Column-major model matrix.
    pub transform: [[f32; 4]; 4],
    /// Bindless slot of the base color texture, if resident.
    pub base_color_texture: Option<u32>,
    pub bounds: Aabb,
}

static_assertions::assert_impl_all!(DrawItem: Send, Sync);
