//! Recording backend for testing and development.
//!
//! This backend performs no GPU work. It hands out handles, keeps the
//! descriptors and host-visible contents of what it created, and records every
//! command so tests can inspect exactly what the renderer would have submitted.

use std::collections::{HashMap, HashSet};

use crate::context::{Blackboard, MeshDraw, RenderContext, RenderTargets};
use crate::error::GraphicsError;
use crate::graph::PipelineCreateParams;
use crate::types::{
    Barrier, BufferCopy, BufferDescriptor, BufferHandle, BufferImageCopy, CommandBufferHandle,
    Extent3d, ImageHandle, PipelineHandle, TextureDescriptor,
};

/// A command recorded into a command buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    CopyBuffer {
        src: BufferHandle,
        dst: BufferHandle,
        regions: Vec<BufferCopy>,
    },
    CopyBufferToImage {
        src: BufferHandle,
        dst: ImageHandle,
        region: BufferImageCopy,
    },
    Blit {
        image: ImageHandle,
        src_mip: u32,
        dst_mip: u32,
    },
    Barriers(Vec<Barrier>),
    BeginRendering(RenderTargets),
    EndRendering,
    BindPipeline(PipelineHandle),
    PushConstants {
        pipeline: PipelineHandle,
        size: usize,
    },
    Draw(MeshDraw),
    Dispatch([u32; 3]),
}

/// How a command buffer was submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionKind {
    Frame,
    SingleTime,
}

/// A submitted command buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub cmd: CommandBufferHandle,
    pub kind: SubmissionKind,
    pub commands: Vec<RecordedCommand>,
}

#[derive(Debug)]
struct RecordedBuffer {
    descriptor: BufferDescriptor,
    /// Kept for host-visible buffers only.
    contents: Option<Vec<u8>>,
}

#[derive(Debug)]
struct RecordedPipeline {
    label: String,
    params: PipelineCreateParams,
}

/// GPU-less [`RenderContext`].
#[derive(Debug)]
pub struct RecordingContext {
    next_handle: u64,
    buffers: HashMap<u64, RecordedBuffer>,
    images: HashMap<u64, TextureDescriptor>,
    pipelines: HashMap<u64, RecordedPipeline>,
    open: HashMap<u64, (SubmissionKind, Vec<RecordedCommand>)>,
    submissions: Vec<Submission>,
    frame_index: u64,
    frames_in_flight: usize,
    swapchain_extent: Extent3d,
    debug_options: Blackboard,
    blackboard: Blackboard,
    creations_left: Option<usize>,
    failing_pipelines: HashSet<String>,
    pipelines_created: usize,
}

impl RecordingContext {
    pub fn new() -> Self {
        Self {
            next_handle: 1,
            buffers: HashMap::new(),
            images: HashMap::new(),
            pipelines: HashMap::new(),
            open: HashMap::new(),
            submissions: Vec::new(),
            frame_index: 0,
            frames_in_flight: 2,
            swapchain_extent: Extent3d::new_2d(1280, 720),
            debug_options: Blackboard::new(),
            blackboard: Blackboard::new(),
            creations_left: None,
            failing_pipelines: HashSet::new(),
            pipelines_created: 0,
        }
    }

    pub fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = frames.max(1);
        self
    }

    /// Let `count` more buffer/image creations succeed, then fail the rest.
    pub fn fail_after_creations(&mut self, count: usize) {
        self.creations_left = Some(count);
    }

    /// Fail pipeline creation for the given label.
    pub fn fail_pipeline(&mut self, label: impl Into<String>) {
        self.failing_pipelines.insert(label.into());
    }

    pub fn buffer_descriptor(&self, buffer: BufferHandle) -> Option<&BufferDescriptor> {
        self.buffers.get(&buffer.raw()).map(|b| &b.descriptor)
    }

    /// Contents of a host-visible buffer.
    pub fn buffer_contents(&self, buffer: BufferHandle) -> Option<&[u8]> {
        self.buffers.get(&buffer.raw())?.contents.as_deref()
    }

    pub fn image_descriptor(&self, image: ImageHandle) -> Option<&TextureDescriptor> {
        self.images.get(&image.raw())
    }

    pub fn pipeline_label(&self, pipeline: PipelineHandle) -> Option<&str> {
        self.pipelines.get(&pipeline.raw()).map(|p| p.label.as_str())
    }

    pub fn pipeline_params(&self, pipeline: PipelineHandle) -> Option<&PipelineCreateParams> {
        self.pipelines.get(&pipeline.raw()).map(|p| &p.params)
    }

    pub fn live_buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn live_image_count(&self) -> usize {
        self.images.len()
    }

    pub fn live_pipeline_count(&self) -> usize {
        self.pipelines.len()
    }

    /// Pipelines created over the context's lifetime.
    pub fn pipelines_created(&self) -> usize {
        self.pipelines_created
    }

    pub fn submissions(&self) -> &[Submission] {
        &self.submissions
    }

    pub fn last_submission(&self) -> Option<&Submission> {
        self.submissions.last()
    }

    /// Commands recorded so far into a still-open command buffer.
    pub fn pending_commands(&self, cmd: CommandBufferHandle) -> &[RecordedCommand] {
        self.open
            .get(&cmd.raw())
            .map(|(_, commands)| commands.as_slice())
            .unwrap_or_default()
    }

    pub fn clear_submissions(&mut self) {
        self.submissions.clear();
    }

    fn allocate_handle(&mut self) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    fn check_creation_budget(&mut self, what: &str) -> Result<(), GraphicsError> {
        match &mut self.creations_left {
            Some(0) => Err(GraphicsError::ResourceCreationFailed(format!(
                "injected failure creating {what}"
            ))),
            Some(left) => {
                *left -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn record(&mut self, cmd: CommandBufferHandle, command: RecordedCommand) {
        match self.open.get_mut(&cmd.raw()) {
            Some((_, commands)) => commands.push(command),
            None => log::warn!(
                "RecordingContext: command recorded into closed command buffer {}",
                cmd.raw()
            ),
        }
    }

    fn begin(&mut self, kind: SubmissionKind) -> CommandBufferHandle {
        let cmd = CommandBufferHandle(self.allocate_handle());
        self.open.insert(cmd.raw(), (kind, Vec::new()));
        cmd
    }

    fn submit(&mut self, cmd: CommandBufferHandle) -> Result<SubmissionKind, GraphicsError> {
        let (kind, commands) = self.open.remove(&cmd.raw()).ok_or_else(|| {
            GraphicsError::InvalidHandle(format!("command buffer {} is not recording", cmd.raw()))
        })?;
        self.submissions.push(Submission {
            cmd,
            kind,
            commands,
        });
        Ok(kind)
    }
}

impl Default for RecordingContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderContext for RecordingContext {
    fn name(&self) -> &'static str {
        "Recording Backend"
    }

    fn create_buffer(
        &mut self,
        descriptor: &BufferDescriptor,
    ) -> Result<BufferHandle, GraphicsError> {
        self.check_creation_budget("buffer")?;
        log::trace!(
            "RecordingContext: creating buffer {:?} (size: {})",
            descriptor.label,
            descriptor.size
        );
        let handle = self.allocate_handle();
        let contents = descriptor
            .is_host_visible()
            .then(|| vec![0u8; descriptor.size as usize]);
        self.buffers.insert(
            handle,
            RecordedBuffer {
                descriptor: descriptor.clone(),
                contents,
            },
        );
        Ok(BufferHandle(handle))
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        if self.buffers.remove(&buffer.raw()).is_none() {
            log::warn!("RecordingContext: destroying unknown buffer {}", buffer.raw());
        }
    }

    fn create_image(
        &mut self,
        descriptor: &TextureDescriptor,
    ) -> Result<ImageHandle, GraphicsError> {
        self.check_creation_budget("image")?;
        log::trace!(
            "RecordingContext: creating image {:?} ({}x{}, {} mips)",
            descriptor.label,
            descriptor.size.width,
            descriptor.size.height,
            descriptor.mip_level_count
        );
        let handle = self.allocate_handle();
        self.images.insert(handle, descriptor.clone());
        Ok(ImageHandle(handle))
    }

    fn destroy_image(&mut self, image: ImageHandle) {
        if self.images.remove(&image.raw()).is_none() {
            log::warn!("RecordingContext: destroying unknown image {}", image.raw());
        }
    }

    fn create_pipeline(
        &mut self,
        label: &str,
        params: &PipelineCreateParams,
    ) -> Result<PipelineHandle, GraphicsError> {
        if self.failing_pipelines.contains(label) || params.is_none() {
            return Err(GraphicsError::PipelineCreationFailed(format!(
                "cannot create pipeline '{label}'"
            )));
        }
        let handle = self.allocate_handle();
        self.pipelines.insert(
            handle,
            RecordedPipeline {
                label: label.to_string(),
                params: params.clone(),
            },
        );
        self.pipelines_created += 1;
        Ok(PipelineHandle(handle))
    }

    fn destroy_pipeline(&mut self, pipeline: PipelineHandle) {
        self.pipelines.remove(&pipeline.raw());
    }

    fn write_buffer(
        &mut self,
        buffer: BufferHandle,
        offset: u64,
        data: &[u8],
    ) -> Result<(), GraphicsError> {
        let recorded = self
            .buffers
            .get_mut(&buffer.raw())
            .ok_or_else(|| GraphicsError::InvalidHandle(format!("buffer {}", buffer.raw())))?;
        let contents = recorded.contents.as_mut().ok_or_else(|| {
            GraphicsError::InvalidParameter(format!(
                "buffer {:?} is not host visible",
                recorded.descriptor.label
            ))
        })?;

        let start = offset as usize;
        let end = start + data.len();
        if end > contents.len() {
            return Err(GraphicsError::InvalidParameter(format!(
                "write of {} bytes at {} exceeds buffer size {}",
                data.len(),
                offset,
                contents.len()
            )));
        }
        contents[start..end].copy_from_slice(data);
        Ok(())
    }

    fn copy_buffer(
        &mut self,
        cmd: CommandBufferHandle,
        src: BufferHandle,
        dst: BufferHandle,
        regions: &[BufferCopy],
    ) {
        self.record(
            cmd,
            RecordedCommand::CopyBuffer {
                src,
                dst,
                regions: regions.to_vec(),
            },
        );
    }

    fn copy_buffer_to_image(
        &mut self,
        cmd: CommandBufferHandle,
        src: BufferHandle,
        dst: ImageHandle,
        region: &BufferImageCopy,
    ) {
        self.record(
            cmd,
            RecordedCommand::CopyBufferToImage {
                src,
                dst,
                region: *region,
            },
        );
    }

    fn blit_image(
        &mut self,
        cmd: CommandBufferHandle,
        image: ImageHandle,
        src_mip: u32,
        dst_mip: u32,
    ) {
        self.record(
            cmd,
            RecordedCommand::Blit {
                image,
                src_mip,
                dst_mip,
            },
        );
    }

    fn pipeline_barrier(&mut self, cmd: CommandBufferHandle, barriers: &[Barrier]) {
        if !barriers.is_empty() {
            self.record(cmd, RecordedCommand::Barriers(barriers.to_vec()));
        }
    }

    fn begin_rendering(&mut self, cmd: CommandBufferHandle, targets: &RenderTargets) {
        self.record(cmd, RecordedCommand::BeginRendering(targets.clone()));
    }

    fn end_rendering(&mut self, cmd: CommandBufferHandle) {
        self.record(cmd, RecordedCommand::EndRendering);
    }

    fn bind_pipeline(&mut self, cmd: CommandBufferHandle, pipeline: PipelineHandle) {
        self.record(cmd, RecordedCommand::BindPipeline(pipeline));
    }

    fn push_constants(&mut self, cmd: CommandBufferHandle, pipeline: PipelineHandle, data: &[u8]) {
        self.record(
            cmd,
            RecordedCommand::PushConstants {
                pipeline,
                size: data.len(),
            },
        );
    }

    fn draw_mesh(&mut self, cmd: CommandBufferHandle, draw: &MeshDraw) {
        self.record(cmd, RecordedCommand::Draw(*draw));
    }

    fn dispatch(&mut self, cmd: CommandBufferHandle, groups: [u32; 3]) {
        self.record(cmd, RecordedCommand::Dispatch(groups));
    }

    fn begin_frame(&mut self) -> Result<CommandBufferHandle, GraphicsError> {
        Ok(self.begin(SubmissionKind::Frame))
    }

    fn end_frame(&mut self, cmd: CommandBufferHandle) -> Result<(), GraphicsError> {
        self.submit(cmd)?;
        self.frame_index += 1;
        Ok(())
    }

    fn begin_single_time_commands(&mut self) -> Result<CommandBufferHandle, GraphicsError> {
        Ok(self.begin(SubmissionKind::SingleTime))
    }

    fn end_single_time_commands(&mut self, cmd: CommandBufferHandle) -> Result<(), GraphicsError> {
        self.submit(cmd).map(|_| ())
    }

    fn set_swapchain_extent(&mut self, extent: Extent3d) {
        self.swapchain_extent = extent;
    }

    fn swapchain_extent(&self) -> Extent3d {
        self.swapchain_extent
    }

    fn frame_index(&self) -> u64 {
        self.frame_index
    }

    fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    fn debug_options(&self) -> &Blackboard {
        &self.debug_options
    }

    fn debug_options_mut(&mut self) -> &mut Blackboard {
        &mut self.debug_options
    }

    fn blackboard(&self) -> &Blackboard {
        &self.blackboard
    }

    fn blackboard_mut(&mut self) -> &mut Blackboard {
        &mut self.blackboard
    }
}
