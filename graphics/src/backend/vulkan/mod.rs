//! Native Vulkan [`RenderContext`] built on ash and gpu-allocator.
//!
//! The context is headless: frames render into images the frame graph owns
//! and no swapchain is created. Presentation is left to the embedding
//! application, which reports its window size through
//! [`RenderContext::set_swapchain_extent`].
//!
//! # Frame slots
//!
//! Each frame in flight owns a primary command buffer and a fence.
//! [`begin_frame`](RenderContext::begin_frame) waits on the slot's fence,
//! destroys the objects released while that slot last recorded and resets
//! the command buffer.
//!
//! # Handles
//!
//! Buffers, images and pipelines are stored in maps keyed by the raw value of
//! the handle given out. Recording against an unknown handle is logged and
//! ignored.

mod barriers;
mod conversion;
mod debug;
mod deferred;
mod device;
mod instance;
mod pipeline;

use std::collections::HashMap;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator};
use parking_lot::Mutex;

use crate::context::{Blackboard, MeshDraw, RenderContext, RenderTargets};
use crate::error::GraphicsError;
use crate::graph::PipelineCreateParams;
use crate::types::{
    Barrier, BufferCopy, BufferDescriptor, BufferHandle, BufferImageCopy, CommandBufferHandle,
    Extent3d, ImageHandle, PipelineHandle, TextureDescriptor, TextureFormat,
};

use barriers::BarrierBatch;
use conversion::{
    aspect_mask, convert_buffer_usage, convert_extent, convert_result, convert_texture_format,
    convert_texture_usage, extent_offset,
};
use deferred::{DeferredQueue, DeferredResource};
pub use deferred::MAX_FRAMES_IN_FLIGHT;
use pipeline::NativePipeline;

/// Upper bound on a single fence wait.
const FENCE_TIMEOUT_NS: u64 = 10_000_000_000;

struct VulkanBuffer {
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    size: u64,
}

struct VulkanImage {
    image: vk::Image,
    view: vk::ImageView,
    allocation: Option<Allocation>,
    format: TextureFormat,
    extent: Extent3d,
}

struct FrameSlot {
    cmd: vk::CommandBuffer,
    fence: vk::Fence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Recording {
    Frame,
    SingleTime,
}

struct OpenCommands {
    native: vk::CommandBuffer,
    kind: Recording,
    /// Pipeline bound most recently, for push constant layouts.
    bound: Option<NativePipeline>,
}

/// Vulkan implementation of [`RenderContext`].
pub struct VulkanContext {
    _entry: ash::Entry,
    instance: ash::Instance,
    debug_utils: Option<ash::ext::debug_utils::Instance>,
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    queue: vk::Queue,
    dynamic_rendering: ash::khr::dynamic_rendering::Device,
    /// Taken in `Drop` so it is released before the device.
    allocator: Option<Mutex<Allocator>>,
    command_pool: vk::CommandPool,
    slots: Vec<FrameSlot>,
    deferred: DeferredQueue,

    next_handle: u64,
    buffers: HashMap<u64, VulkanBuffer>,
    images: HashMap<u64, VulkanImage>,
    pipelines: HashMap<u64, NativePipeline>,
    open: HashMap<u64, OpenCommands>,

    frame_index: u64,
    swapchain_extent: Extent3d,
    debug_options: Blackboard,
    blackboard: Blackboard,
}

impl std::fmt::Debug for VulkanContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanContext")
            .field("frame_index", &self.frame_index)
            .field("frames_in_flight", &self.slots.len())
            .field("buffers", &self.buffers.len())
            .field("images", &self.images.len())
            .field("pipelines", &self.pipelines.len())
            .field("deferred", &self.deferred)
            .finish_non_exhaustive()
    }
}

impl VulkanContext {
    /// Create a context with two frames in flight, validating in debug builds.
    pub fn new() -> Result<Self, GraphicsError> {
        Self::with_params(cfg!(debug_assertions), 2)
    }

    /// Create a context with explicit validation and frame count. The frame
    /// count is clamped to `1..=MAX_FRAMES_IN_FLIGHT`.
    pub fn with_params(validation: bool, frames_in_flight: usize) -> Result<Self, GraphicsError> {
        let entry = unsafe { ash::Entry::load() }.map_err(|e| {
            GraphicsError::InitializationFailed(format!("Failed to load Vulkan library: {e}"))
        })?;

        let instance::InstanceBundle {
            instance,
            debug_utils,
            debug_messenger,
        } = instance::create_instance(&entry, validation)?;

        // Everything created after the instance is torn down by hand on failure.
        let destroy_instance = |instance: &ash::Instance| unsafe {
            if let (Some(utils), Some(messenger)) = (&debug_utils, debug_messenger) {
                utils.destroy_debug_utils_messenger(messenger, None);
            }
            instance.destroy_instance(None);
        };

        let selected = match device::select_physical_device(&instance) {
            Ok(selected) => selected,
            Err(e) => {
                destroy_instance(&instance);
                return Err(e);
            }
        };
        let device = match device::create_logical_device(&instance, selected) {
            Ok(device) => device,
            Err(e) => {
                destroy_instance(&instance);
                return Err(e);
            }
        };

        let setup = (|| {
            let allocator = device::create_allocator(&instance, &device, selected)?;
            let command_pool = device::create_command_pool(&device, selected.queue_family)?;
            let count = frames_in_flight.clamp(1, MAX_FRAMES_IN_FLIGHT);
            let slots = create_frame_slots(&device, command_pool, count).inspect_err(|_| unsafe {
                device.destroy_command_pool(command_pool, None);
            })?;
            Ok::<_, GraphicsError>((allocator, command_pool, slots))
        })();
        let (allocator, command_pool, slots) = match setup {
            Ok(parts) => parts,
            Err(e) => {
                unsafe { device.destroy_device(None) };
                destroy_instance(&instance);
                return Err(e);
            }
        };

        let queue = unsafe { device.get_device_queue(selected.queue_family, 0) };
        let dynamic_rendering = ash::khr::dynamic_rendering::Device::new(&instance, &device);
        let properties = unsafe { instance.get_physical_device_properties(selected.physical_device) };
        log::info!(
            "Vulkan context on {:?} with {} frames in flight",
            properties.device_name_as_c_str().unwrap_or(c"<unnamed>"),
            slots.len()
        );

        Ok(Self {
            _entry: entry,
            instance,
            debug_utils,
            debug_messenger,
            physical_device: selected.physical_device,
            device,
            queue,
            dynamic_rendering,
            allocator: Some(Mutex::new(allocator)),
            command_pool,
            deferred: DeferredQueue::new(slots.len()),
            slots,
            next_handle: 1,
            buffers: HashMap::new(),
            images: HashMap::new(),
            pipelines: HashMap::new(),
            open: HashMap::new(),
            frame_index: 0,
            swapchain_extent: Extent3d::new_2d(1280, 720),
            debug_options: Blackboard::new(),
            blackboard: Blackboard::new(),
        })
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Objects waiting for their frame slot to retire.
    pub fn pending_destruction_count(&self) -> usize {
        self.deferred.pending_count()
    }

    /// Block until the GPU is idle and destroy everything deferred.
    pub fn wait_idle(&mut self) -> Result<(), GraphicsError> {
        unsafe { self.device.device_wait_idle() }
            .map_err(|e| convert_result("device_wait_idle", e))?;
        let pending = self.deferred.take_all();
        self.destroy_now(pending);
        Ok(())
    }

    fn allocate_handle(&mut self) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    fn allocate(
        &self,
        name: &str,
        requirements: vk::MemoryRequirements,
        location: MemoryLocation,
        linear: bool,
    ) -> Result<Allocation, GraphicsError> {
        let Some(allocator) = &self.allocator else {
            return Err(GraphicsError::Internal("allocator already released".to_string()));
        };
        allocator
            .lock()
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location,
                linear,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| match e {
                gpu_allocator::AllocationError::OutOfMemory => GraphicsError::OutOfMemory,
                other => GraphicsError::ResourceCreationFailed(format!(
                    "Failed to allocate memory for '{name}': {other}"
                )),
            })
    }

    fn destroy_now(&self, resources: Vec<DeferredResource>) {
        if resources.is_empty() {
            return;
        }
        let Some(allocator) = &self.allocator else {
            return;
        };
        let mut allocator = allocator.lock();
        for resource in resources {
            // SAFETY: callers only pass objects whose frame slot has retired
            // or after the device went idle.
            unsafe { resource.destroy(&self.device, &mut allocator) };
        }
    }

    /// Queue an object on the slot that is recording, or the next one to
    /// record when between frames.
    fn defer(&mut self, resource: DeferredResource) {
        let slot = self.frame_slot();
        self.deferred.push(slot, resource);
    }

    fn commands(&mut self, cmd: CommandBufferHandle) -> Option<&mut OpenCommands> {
        let open = self.open.get_mut(&cmd.raw());
        if open.is_none() {
            log::warn!("Vulkan: recording into command buffer {} that is not open", cmd.raw());
        }
        open
    }

    fn native_cmd(&mut self, cmd: CommandBufferHandle) -> Option<vk::CommandBuffer> {
        self.commands(cmd).map(|open| open.native)
    }

    fn native_buffer(&self, buffer: BufferHandle) -> Option<vk::Buffer> {
        let found = self.buffers.get(&buffer.raw()).map(|b| b.buffer);
        if found.is_none() {
            log::warn!("Vulkan: unknown buffer {}", buffer.raw());
        }
        found
    }

    fn native_image(&self, image: ImageHandle) -> Option<&VulkanImage> {
        let found = self.images.get(&image.raw());
        if found.is_none() {
            log::warn!("Vulkan: unknown image {}", image.raw());
        }
        found
    }

    fn begin_commands(&mut self, native: vk::CommandBuffer, kind: Recording) -> Result<CommandBufferHandle, GraphicsError> {
        let info =
            vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device.begin_command_buffer(native, &info) }
            .map_err(|e| convert_result("begin_command_buffer", e))?;

        let handle = CommandBufferHandle(self.allocate_handle());
        self.open.insert(
            handle.raw(),
            OpenCommands {
                native,
                kind,
                bound: None,
            },
        );
        Ok(handle)
    }

    fn finish_commands(
        &mut self,
        cmd: CommandBufferHandle,
        expected: Recording,
    ) -> Result<vk::CommandBuffer, GraphicsError> {
        let open = match self.open.remove(&cmd.raw()) {
            Some(open) if open.kind == expected => open,
            Some(open) => {
                self.open.insert(cmd.raw(), open);
                return Err(GraphicsError::InvalidParameter(format!(
                    "command buffer {} was not begun as {expected:?}",
                    cmd.raw()
                )));
            }
            None => {
                return Err(GraphicsError::InvalidHandle(format!(
                    "command buffer {} is not recording",
                    cmd.raw()
                )));
            }
        };
        unsafe { self.device.end_command_buffer(open.native) }
            .map_err(|e| convert_result("end_command_buffer", e))?;
        Ok(open.native)
    }

    fn wait_fence(&self, fence: vk::Fence) -> Result<(), GraphicsError> {
        match unsafe { self.device.wait_for_fences(&[fence], true, FENCE_TIMEOUT_NS) } {
            Ok(()) => Ok(()),
            Err(vk::Result::TIMEOUT) => {
                log::warn!("Fence wait timed out after 10 seconds; the GPU may be hung");
                Err(GraphicsError::SubmissionFailed("fence wait timed out".to_string()))
            }
            Err(e) => Err(convert_result("wait_for_fences", e)),
        }
    }
}

fn create_frame_slots(
    device: &ash::Device,
    command_pool: vk::CommandPool,
    count: usize,
) -> Result<Vec<FrameSlot>, GraphicsError> {
    let info = vk::CommandBufferAllocateInfo::default()
        .command_pool(command_pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(count as u32);
    let buffers = unsafe { device.allocate_command_buffers(&info) }.map_err(|e| {
        GraphicsError::InitializationFailed(format!("Failed to allocate command buffers: {e:?}"))
    })?;

    let mut slots = Vec::with_capacity(count);
    for cmd in buffers {
        // Signaled so the first wait on each slot returns at once.
        let fence_info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);
        match unsafe { device.create_fence(&fence_info, None) } {
            Ok(fence) => slots.push(FrameSlot { cmd, fence }),
            Err(e) => {
                for slot in &slots {
                    unsafe { device.destroy_fence(slot.fence, None) };
                }
                return Err(GraphicsError::InitializationFailed(format!(
                    "Failed to create frame fence: {e:?}"
                )));
            }
        }
    }
    Ok(slots)
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();

            let leaked = self.buffers.len() + self.images.len() + self.pipelines.len();
            if leaked > 0 {
                log::warn!("Vulkan context dropped with {leaked} live objects; destroying them");
            }
            let mut remaining = self.deferred.take_all();
            remaining.extend(self.buffers.drain().map(|(_, b)| DeferredResource::Buffer {
                buffer: b.buffer,
                allocation: b.allocation,
            }));
            remaining.extend(self.images.drain().map(|(_, i)| DeferredResource::Image {
                image: i.image,
                view: i.view,
                allocation: i.allocation,
            }));
            remaining.extend(self.pipelines.drain().map(|(_, p)| DeferredResource::Pipeline {
                pipeline: p.pipeline,
                layout: p.layout,
            }));
            self.destroy_now(remaining);

            for slot in &self.slots {
                self.device.destroy_fence(slot.fence, None);
            }
            self.device.destroy_command_pool(self.command_pool, None);

            drop(self.allocator.take());
            self.device.destroy_device(None);

            if let (Some(utils), Some(messenger)) = (&self.debug_utils, self.debug_messenger) {
                utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

impl RenderContext for VulkanContext {
    fn name(&self) -> &'static str {
        "Vulkan Backend (ash)"
    }

    fn create_buffer(
        &mut self,
        descriptor: &BufferDescriptor,
    ) -> Result<BufferHandle, GraphicsError> {
        let label = descriptor.label.as_deref().unwrap_or("buffer");
        log::trace!("Vulkan: creating buffer '{}' (size: {})", label, descriptor.size);

        let info = vk::BufferCreateInfo::default()
            .size(descriptor.size.max(1))
            .usage(convert_buffer_usage(descriptor.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { self.device.create_buffer(&info, None) }.map_err(|e| {
            GraphicsError::ResourceCreationFailed(format!("Failed to create buffer '{label}': {e:?}"))
        })?;

        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };
        let location = if descriptor.is_host_visible() {
            MemoryLocation::CpuToGpu
        } else {
            MemoryLocation::GpuOnly
        };
        let allocation = match self.allocate(label, requirements, location, true) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };
        if let Err(e) = unsafe {
            self.device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        } {
            self.destroy_now(vec![DeferredResource::Buffer {
                buffer,
                allocation: Some(allocation),
            }]);
            return Err(GraphicsError::ResourceCreationFailed(format!(
                "Failed to bind buffer memory for '{label}': {e:?}"
            )));
        }

        let handle = self.allocate_handle();
        self.buffers.insert(
            handle,
            VulkanBuffer {
                buffer,
                allocation: Some(allocation),
                size: descriptor.size,
            },
        );
        Ok(BufferHandle(handle))
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        match self.buffers.remove(&buffer.raw()) {
            Some(b) => self.defer(DeferredResource::Buffer {
                buffer: b.buffer,
                allocation: b.allocation,
            }),
            None => log::warn!("Vulkan: destroying unknown buffer {}", buffer.raw()),
        }
    }

    fn create_image(
        &mut self,
        descriptor: &TextureDescriptor,
    ) -> Result<ImageHandle, GraphicsError> {
        let label = descriptor.label.as_deref().unwrap_or("image");
        log::trace!(
            "Vulkan: creating image '{}' ({}x{}, {} mips)",
            label,
            descriptor.size.width,
            descriptor.size.height,
            descriptor.mip_level_count
        );

        let format = convert_texture_format(descriptor.format);
        let info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(convert_extent(descriptor.size))
            .mip_levels(descriptor.mip_level_count.max(1))
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(convert_texture_usage(descriptor.usage, descriptor.format))
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let image = unsafe { self.device.create_image(&info, None) }.map_err(|e| {
            GraphicsError::ResourceCreationFailed(format!("Failed to create image '{label}': {e:?}"))
        })?;

        let requirements = unsafe { self.device.get_image_memory_requirements(image) };
        let allocation = match self.allocate(label, requirements, MemoryLocation::GpuOnly, false) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_image(image, None) };
                return Err(e);
            }
        };

        let view_result = unsafe {
            self.device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        }
        .and_then(|()| {
            let view_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(format)
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: aspect_mask(descriptor.format),
                    base_mip_level: 0,
                    level_count: vk::REMAINING_MIP_LEVELS,
                    base_array_layer: 0,
                    layer_count: 1,
                });
            unsafe { self.device.create_image_view(&view_info, None) }
        });
        let view = match view_result {
            Ok(view) => view,
            Err(e) => {
                self.destroy_now(vec![DeferredResource::Image {
                    image,
                    view: vk::ImageView::null(),
                    allocation: Some(allocation),
                }]);
                return Err(GraphicsError::ResourceCreationFailed(format!(
                    "Failed to finish image '{label}': {e:?}"
                )));
            }
        };

        let handle = self.allocate_handle();
        self.images.insert(
            handle,
            VulkanImage {
                image,
                view,
                allocation: Some(allocation),
                format: descriptor.format,
                extent: descriptor.size,
            },
        );
        Ok(ImageHandle(handle))
    }

    fn destroy_image(&mut self, image: ImageHandle) {
        match self.images.remove(&image.raw()) {
            Some(i) => self.defer(DeferredResource::Image {
                image: i.image,
                view: i.view,
                allocation: i.allocation,
            }),
            None => log::warn!("Vulkan: destroying unknown image {}", image.raw()),
        }
    }

    fn create_pipeline(
        &mut self,
        label: &str,
        params: &PipelineCreateParams,
    ) -> Result<PipelineHandle, GraphicsError> {
        let native = match params {
            PipelineCreateParams::None => {
                return Err(GraphicsError::PipelineCreationFailed(format!(
                    "pass '{label}' describes no pipeline"
                )));
            }
            PipelineCreateParams::Graphics(graphics) => {
                pipeline::create_graphics_pipeline(&self.device, graphics)?
            }
            PipelineCreateParams::Compute(compute) => {
                pipeline::create_compute_pipeline(&self.device, compute)?
            }
        };
        log::trace!("Vulkan: created {:?} pipeline '{}'", native.bind_point, label);

        let handle = self.allocate_handle();
        self.pipelines.insert(handle, native);
        Ok(PipelineHandle(handle))
    }

    fn destroy_pipeline(&mut self, pipeline: PipelineHandle) {
        if let Some(native) = self.pipelines.remove(&pipeline.raw()) {
            self.defer(DeferredResource::Pipeline {
                pipeline: native.pipeline,
                layout: native.layout,
            });
        }
    }

    fn write_buffer(
        &mut self,
        buffer: BufferHandle,
        offset: u64,
        data: &[u8],
    ) -> Result<(), GraphicsError> {
        let target = self
            .buffers
            .get_mut(&buffer.raw())
            .ok_or_else(|| GraphicsError::InvalidHandle(format!("buffer {}", buffer.raw())))?;
        let size = target.size;
        let mapped = target
            .allocation
            .as_mut()
            .and_then(Allocation::mapped_slice_mut)
            .ok_or_else(|| {
                GraphicsError::InvalidParameter(format!(
                    "buffer {} is not mapped for CPU access",
                    buffer.raw()
                ))
            })?;

        let start = offset as usize;
        let end = start + data.len();
        if end as u64 > size || end > mapped.len() {
            return Err(GraphicsError::InvalidParameter(format!(
                "write of {} bytes at {} exceeds buffer size {}",
                data.len(),
                offset,
                size
            )));
        }
        mapped[start..end].copy_from_slice(data);
        Ok(())
    }

    fn copy_buffer(
        &mut self,
        cmd: CommandBufferHandle,
        src: BufferHandle,
        dst: BufferHandle,
        regions: &[BufferCopy],
    ) {
        let (Some(src), Some(dst)) = (self.native_buffer(src), self.native_buffer(dst)) else {
            return;
        };
        let Some(native) = self.native_cmd(cmd) else {
            return;
        };
        let regions: Vec<vk::BufferCopy> = regions
            .iter()
            .map(|r| vk::BufferCopy {
                src_offset: r.src_offset,
                dst_offset: r.dst_offset,
                size: r.size,
            })
            .collect();
        if regions.is_empty() {
            return;
        }
        unsafe { self.device.cmd_copy_buffer(native, src, dst, &regions) };
    }

    fn copy_buffer_to_image(
        &mut self,
        cmd: CommandBufferHandle,
        src: BufferHandle,
        dst: ImageHandle,
        region: &BufferImageCopy,
    ) {
        let Some(src) = self.native_buffer(src) else {
            return;
        };
        let Some((image, aspect)) = self
            .native_image(dst)
            .map(|i| (i.image, aspect_mask(i.format)))
        else {
            return;
        };
        let Some(native) = self.native_cmd(cmd) else {
            return;
        };

        let copy = vk::BufferImageCopy::default()
            .buffer_offset(region.buffer_offset)
            .image_subresource(vk::ImageSubresourceLayers {
                aspect_mask: aspect,
                mip_level: region.mip_level,
                base_array_layer: 0,
                layer_count: 1,
            })
            .image_extent(convert_extent(region.extent));
        unsafe {
            self.device.cmd_copy_buffer_to_image(
                native,
                src,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[copy],
            );
        }
    }

    fn blit_image(
        &mut self,
        cmd: CommandBufferHandle,
        image: ImageHandle,
        src_mip: u32,
        dst_mip: u32,
    ) {
        let Some((native_image, extent, aspect)) = self
            .native_image(image)
            .map(|i| (i.image, i.extent, aspect_mask(i.format)))
        else {
            return;
        };
        let Some(native) = self.native_cmd(cmd) else {
            return;
        };

        let layers = |mip_level| vk::ImageSubresourceLayers {
            aspect_mask: aspect,
            mip_level,
            base_array_layer: 0,
            layer_count: 1,
        };
        let blit = vk::ImageBlit::default()
            .src_subresource(layers(src_mip))
            .src_offsets([vk::Offset3D::default(), extent_offset(extent.mip(src_mip))])
            .dst_subresource(layers(dst_mip))
            .dst_offsets([vk::Offset3D::default(), extent_offset(extent.mip(dst_mip))]);
        unsafe {
            self.device.cmd_blit_image(
                native,
                native_image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                native_image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[blit],
                vk::Filter::LINEAR,
            );
        }
    }

    fn pipeline_barrier(&mut self, cmd: CommandBufferHandle, barriers: &[Barrier]) {
        if barriers.is_empty() {
            return;
        }
        let batch = BarrierBatch::build(
            barriers,
            |buffer| self.native_buffer(buffer),
            |image| {
                self.native_image(image)
                    .map(|i| (i.image, aspect_mask(i.format)))
            },
        );
        if let Some(native) = self.native_cmd(cmd) {
            batch.record(&self.device, native);
        }
    }

    fn begin_rendering(&mut self, cmd: CommandBufferHandle, targets: &RenderTargets) {
        let color: Vec<vk::RenderingAttachmentInfo<'static>> = targets
            .color
            .iter()
            .filter_map(|&image| self.native_image(image))
            .map(|image| {
                vk::RenderingAttachmentInfo::default()
                    .image_view(image.view)
                    .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                    .load_op(vk::AttachmentLoadOp::LOAD)
                    .store_op(vk::AttachmentStoreOp::STORE)
            })
            .collect();
        let depth = targets
            .depth
            .and_then(|image| self.native_image(image))
            .map(|image| {
                vk::RenderingAttachmentInfo::default()
                    .image_view(image.view)
                    .image_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                    .load_op(vk::AttachmentLoadOp::LOAD)
                    .store_op(vk::AttachmentStoreOp::STORE)
            });
        let Some(native) = self.native_cmd(cmd) else {
            return;
        };

        let extent = convert_extent(targets.extent);
        let area = vk::Rect2D {
            offset: vk::Offset2D::default(),
            extent: vk::Extent2D {
                width: extent.width,
                height: extent.height,
            },
        };
        let mut info = vk::RenderingInfo::default()
            .render_area(area)
            .layer_count(1)
            .color_attachments(&color);
        if let Some(depth) = &depth {
            info = info.depth_attachment(depth);
        }

        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        unsafe {
            self.dynamic_rendering.cmd_begin_rendering(native, &info);
            self.device.cmd_set_viewport(native, 0, &[viewport]);
            self.device.cmd_set_scissor(native, 0, &[area]);
        }
    }

    fn end_rendering(&mut self, cmd: CommandBufferHandle) {
        if let Some(native) = self.native_cmd(cmd) {
            unsafe { self.dynamic_rendering.cmd_end_rendering(native) };
        }
    }

    fn bind_pipeline(&mut self, cmd: CommandBufferHandle, pipeline: PipelineHandle) {
        let Some(&bound) = self.pipelines.get(&pipeline.raw()) else {
            log::warn!("Vulkan: binding unknown pipeline {}", pipeline.raw());
            return;
        };
        let Some(open) = self.commands(cmd) else {
            return;
        };
        open.bound = Some(bound);
        let native = open.native;
        unsafe {
            self.device
                .cmd_bind_pipeline(native, bound.bind_point, bound.pipeline)
        };
    }

    fn push_constants(&mut self, cmd: CommandBufferHandle, pipeline: PipelineHandle, data: &[u8]) {
        let Some(&target) = self.pipelines.get(&pipeline.raw()) else {
            log::warn!("Vulkan: push constants for unknown pipeline {}", pipeline.raw());
            return;
        };
        if target.push_constant_size == 0 {
            return;
        }
        let Some(native) = self.native_cmd(cmd) else {
            return;
        };
        let len = data.len().min(target.push_constant_size as usize) & !3;
        if len < data.len() {
            log::trace!(
                "Vulkan: truncating {} push constant bytes to {}",
                data.len(),
                len
            );
        }
        unsafe {
            self.device.cmd_push_constants(
                native,
                target.layout,
                target.push_constant_stages,
                0,
                &data[..len],
            );
        }
    }

    fn draw_mesh(&mut self, cmd: CommandBufferHandle, draw: &MeshDraw) {
        let Some(vertex_buffer) = self.native_buffer(draw.vertex_buffer) else {
            return;
        };
        let index_buffer = match draw.index_buffer {
            Some(handle) => match self.native_buffer(handle) {
                Some(buffer) => Some(buffer),
                None => return,
            },
            None => None,
        };
        let Some(native) = self.native_cmd(cmd) else {
            return;
        };

        unsafe {
            self.device
                .cmd_bind_vertex_buffers(native, 0, &[vertex_buffer], &[0]);
            match index_buffer {
                Some(index_buffer) => {
                    self.device
                        .cmd_bind_index_buffer(native, index_buffer, 0, vk::IndexType::UINT32);
                    self.device.cmd_draw_indexed(
                        native,
                        draw.index_count,
                        draw.instance_count,
                        draw.first_index,
                        draw.vertex_offset,
                        draw.first_instance,
                    );
                }
                None => self.device.cmd_draw(
                    native,
                    draw.vertex_count,
                    draw.instance_count,
                    draw.vertex_offset.max(0) as u32,
                    draw.first_instance,
                ),
            }
        }
    }

    fn dispatch(&mut self, cmd: CommandBufferHandle, groups: [u32; 3]) {
        if let Some(native) = self.native_cmd(cmd) {
            unsafe {
                self.device
                    .cmd_dispatch(native, groups[0], groups[1], groups[2])
            };
        }
    }

    fn begin_frame(&mut self) -> Result<CommandBufferHandle, GraphicsError> {
        meridian_core::profile_scope!("vulkan_begin_frame");

        let slot = self.frame_slot();
        let FrameSlot { cmd, fence } = self.slots[slot];
        self.wait_fence(fence)?;

        let retired = self.deferred.take(slot);
        self.destroy_now(retired);

        unsafe {
            self.device
                .reset_fences(&[fence])
                .map_err(|e| convert_result("reset_fences", e))?;
            self.device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .map_err(|e| convert_result("reset_command_buffer", e))?;
        }
        self.begin_commands(cmd, Recording::Frame)
    }

    fn end_frame(&mut self, cmd: CommandBufferHandle) -> Result<(), GraphicsError> {
        let native = self.finish_commands(cmd, Recording::Frame)?;
        let fence = self.slots[self.frame_slot()].fence;

        let buffers = [native];
        let submit = vk::SubmitInfo::default().command_buffers(&buffers);
        let submitted = unsafe { self.device.queue_submit(self.queue, &[submit], fence) };
        // The slot advances even on failure; its fence stays unsignaled and
        // the next wait on it reports the problem again.
        self.frame_index += 1;
        submitted.map_err(|e| convert_result("queue_submit", e))
    }

    fn begin_single_time_commands(&mut self) -> Result<CommandBufferHandle, GraphicsError> {
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let native = unsafe { self.device.allocate_command_buffers(&info) }
            .map_err(|e| convert_result("allocate_command_buffers", e))?
            .into_iter()
            .next()
            .ok_or_else(|| GraphicsError::Internal("no command buffer allocated".to_string()))?;

        self.begin_commands(native, Recording::SingleTime)
            .inspect_err(|_| unsafe {
                self.device.free_command_buffers(self.command_pool, &[native]);
            })
    }

    fn end_single_time_commands(&mut self, cmd: CommandBufferHandle) -> Result<(), GraphicsError> {
        let native = self.finish_commands(cmd, Recording::SingleTime)?;

        let result = (|| {
            let fence = unsafe { self.device.create_fence(&vk::FenceCreateInfo::default(), None) }
                .map_err(|e| convert_result("create_fence", e))?;
            let buffers = [native];
            let submit = vk::SubmitInfo::default().command_buffers(&buffers);
            let waited = unsafe { self.device.queue_submit(self.queue, &[submit], fence) }
                .map_err(|e| convert_result("queue_submit", e))
                .and_then(|()| self.wait_fence(fence));
            unsafe { self.device.destroy_fence(fence, None) };
            waited
        })();

        unsafe { self.device.free_command_buffers(self.command_pool, &[native]) };
        result
    }

    fn swapchain_extent(&self) -> Extent3d {
        self.swapchain_extent
    }

    fn set_swapchain_extent(&mut self, extent: Extent3d) {
        self.swapchain_extent = extent;
    }

    fn frame_index(&self) -> u64 {
        self.frame_index
    }

    fn frames_in_flight(&self) -> usize {
        self.slots.len()
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
