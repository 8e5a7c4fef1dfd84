//! Render pass registration types.
//!
//! A pass is registered in two halves: a [`RenderPassInfo`] describing its
//! resource usages and pipeline, and an execution closure keyed by the same
//! name. [`RenderPass`] bundles both halves for passes implemented as types.

use std::collections::HashMap;

use crate::context::{DrawItem, RenderContext};
use crate::types::{
    BufferHandle, CommandBufferHandle, Extent3d, ImageHandle, PipelineHandle, TextureFormat,
};

use super::usage::ResourceUsage;

/// Graphics pipeline description.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphicsPipelineParams {
    /// SPIR-V words of the vertex shader.
    pub vertex_spirv: Vec<u32>,
    pub vertex_entry: String,
    /// SPIR-V words of the fragment shader.
    pub fragment_spirv: Vec<u32>,
    pub fragment_entry: String,
    pub color_formats: Vec<TextureFormat>,
    pub depth_format: Option<TextureFormat>,
    pub depth_test: bool,
    pub depth_write: bool,
    pub cull_back_faces: bool,
    /// Consume the fat vertex buffer's interleaved layout.
    pub vertex_input: bool,
    pub push_constant_size: u32,
}

impl GraphicsPipelineParams {
    pub fn new(vertex_spirv: Vec<u32>, fragment_spirv: Vec<u32>) -> Self {
        Self {
            vertex_spirv,
            vertex_entry: "main".to_string(),
            fragment_spirv,
            fragment_entry: "main".to_string(),
            color_formats: Vec::new(),
            depth_format: None,
            depth_test: false,
            depth_write: false,
            cull_back_faces: true,
            vertex_input: true,
            push_constant_size: 0,
        }
    }

    pub fn with_color_format(mut self, format: TextureFormat) -> Self {
        self.color_formats.push(format);
        self
    }

    pub fn with_depth(mut self, format: TextureFormat, write: bool) -> Self {
        self.depth_format = Some(format);
        self.depth_test = true;
        self.depth_write = write;
        self
    }

    pub fn with_push_constants(mut self, size: u32) -> Self {
        self.push_constant_size = size;
        self
    }

    /// Fullscreen pass with no vertex input.
    pub fn without_vertex_input(mut self) -> Self {
        self.vertex_input = false;
        self
    }
}

/// Compute pipeline description.
#[derive(Debug, Clone, PartialEq)]
pub struct ComputePipelineParams {
    pub spirv: Vec<u32>,
    pub entry: String,
    pub push_constant_size: u32,
}

impl ComputePipelineParams {
    pub fn new(spirv: Vec<u32>) -> Self {
        Self {
            spirv,
            entry: "main".to_string(),
            push_constant_size: 0,
        }
    }

    pub fn with_push_constants(mut self, size: u32) -> Self {
        self.push_constant_size = size;
        self
    }
}

/// The pipeline a pass wants the builder to create for it.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum PipelineCreateParams {
    /// The pass only records transfers or barriers.
    #[default]
    None,
    Graphics(GraphicsPipelineParams),
    Compute(ComputePipelineParams),
}

impl PipelineCreateParams {
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

/// Declarative half of a pass registration.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderPassInfo {
    pub name: String,
    /// Usages in declaration order.
    pub resource_usages: Vec<ResourceUsage>,
    pub pipeline: PipelineCreateParams,
}

impl RenderPassInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resource_usages: Vec::new(),
            pipeline: PipelineCreateParams::None,
        }
    }

    pub fn with_usage(mut self, usage: ResourceUsage) -> Self {
        self.resource_usages.push(usage);
        self
    }

    pub fn with_pipeline(mut self, pipeline: PipelineCreateParams) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// Find this pass's usage of a resource.
    pub fn usage(&self, name: &str) -> Option<&ResourceUsage> {
        self.resource_usages.iter().find(|u| u.name == name)
    }
}

/// A resource resolved to its backing object for the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedResource {
    Buffer { buffer: BufferHandle, size: u64 },
    Image { image: ImageHandle, extent: Extent3d, format: TextureFormat },
}

/// Name to object map handed to a pass at execution.
#[derive(Debug, Default)]
pub struct ResolvedResources {
    resources: HashMap<String, ResolvedResource>,
}

impl ResolvedResources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, resource: ResolvedResource) {
        self.resources.insert(name.into(), resource);
    }

    pub fn get(&self, name: &str) -> Option<&ResolvedResource> {
        self.resources.get(name)
    }

    pub fn buffer(&self, name: &str) -> Option<BufferHandle> {
        match self.resources.get(name)? {
            ResolvedResource::Buffer { buffer, .. } => Some(*buffer),
            ResolvedResource::Image { .. } => None,
        }
    }

    pub fn image(&self, name: &str) -> Option<ImageHandle> {
        match self.resources.get(name)? {
            ResolvedResource::Image { image, .. } => Some(*image),
            ResolvedResource::Buffer { .. } => None,
        }
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

/// Everything a pass closure gets when it runs.
pub struct ExecutionParams<'a> {
    pub pass_name: &'a str,
    pub cmd: CommandBufferHandle,
    /// `None` for passes without a pipeline.
    pub pipeline: Option<PipelineHandle>,
    pub resources: &'a ResolvedResources,
    pub draws: &'a [DrawItem],
    pub frame_index: u64,
    pub ctx: &'a mut dyn RenderContext,
}

impl ExecutionParams<'_> {
    /// Bind the pass pipeline and draw every item, pushing its transform.
    pub fn draw_all(&mut self) {
        let Some(pipeline) = self.pipeline else {
            return;
        };
        self.ctx.bind_pipeline(self.cmd, pipeline);
        for item in self.draws {
            self.ctx
                .push_constants(self.cmd, pipeline, bytemuck::bytes_of(&item.transform));
            self.ctx.draw_mesh(self.cmd, &item.draw);
        }
    }
}

/// Execution closure registered for a pass.
pub type PassExecuteFn = Box<dyn FnMut(&mut ExecutionParams<'_>)>;

/// A render pass implemented as a type.
pub trait RenderPass {
    /// Resource usages and pipeline of this pass.
    fn info(&self) -> RenderPassInfo;

    /// Record the pass's commands.
    fn execute(&mut self, params: &mut ExecutionParams<'_>);
}
