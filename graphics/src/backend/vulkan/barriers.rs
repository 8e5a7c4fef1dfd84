//! Batching of abstract barriers into one `vkCmdPipelineBarrier`.

use ash::vk;

use super::conversion::{convert_access, convert_image_layout, convert_pipeline_stage};
use crate::types::{Barrier, BarrierTarget, BufferHandle, ImageHandle};

/// Native barriers for one pipeline barrier command.
///
/// Stage masks are the union over every barrier in the batch.
#[derive(Debug, Default)]
pub(super) struct BarrierBatch {
    pub buffers: Vec<vk::BufferMemoryBarrier<'static>>,
    pub images: Vec<vk::ImageMemoryBarrier<'static>>,
    src_stage: vk::PipelineStageFlags,
    dst_stage: vk::PipelineStageFlags,
}

impl BarrierBatch {
    /// Translate `barriers`, resolving handles through the lookups. Barriers on
    /// unknown handles are logged and left out.
    pub fn build(
        barriers: &[Barrier],
        buffer: impl Fn(BufferHandle) -> Option<vk::Buffer>,
        image: impl Fn(ImageHandle) -> Option<(vk::Image, vk::ImageAspectFlags)>,
    ) -> Self {
        let mut batch = Self::default();

        for barrier in barriers {
            let src_access = convert_access(barrier.src_access, barrier.src_stage);
            let dst_access = convert_access(barrier.dst_access, barrier.dst_stage);

            match barrier.target {
                BarrierTarget::Buffer {
                    buffer: handle,
                    offset,
                    size,
                } => {
                    let Some(native) = buffer(handle) else {
                        log::warn!("Barrier on unknown buffer {}", handle.raw());
                        continue;
                    };
                    batch.buffers.push(
                        vk::BufferMemoryBarrier::default()
                            .src_access_mask(src_access)
                            .dst_access_mask(dst_access)
                            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                            .buffer(native)
                            .offset(offset)
                            .size(size.unwrap_or(vk::WHOLE_SIZE)),
                    );
                }
                BarrierTarget::Image {
                    image: handle,
                    base_mip,
                    mip_count,
                    old_layout,
                    new_layout,
                } => {
                    let Some((native, aspect_mask)) = image(handle) else {
                        log::warn!("Barrier on unknown image {}", handle.raw());
                        continue;
                    };
                    batch.images.push(
                        vk::ImageMemoryBarrier::default()
                            .src_access_mask(src_access)
                            .dst_access_mask(dst_access)
                            .old_layout(convert_image_layout(old_layout))
                            .new_layout(convert_image_layout(new_layout))
                            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                            .image(native)
                            .subresource_range(vk::ImageSubresourceRange {
                                aspect_mask,
                                base_mip_level: base_mip,
                                level_count: mip_count.unwrap_or(vk::REMAINING_MIP_LEVELS),
                                base_array_layer: 0,
                                layer_count: vk::REMAINING_ARRAY_LAYERS,
                            }),
                    );
                }
            }

            batch.src_stage |= convert_pipeline_stage(barrier.src_stage);
            batch.dst_stage |= convert_pipeline_stage(barrier.dst_stage);
        }

        batch
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty() && self.images.is_empty()
    }

    /// Source stages; first use of a resource waits on nothing.
    pub fn src_stage(&self) -> vk::PipelineStageFlags {
        if self.src_stage.is_empty() {
            vk::PipelineStageFlags::TOP_OF_PIPE
        } else {
            self.src_stage
        }
    }

    pub fn dst_stage(&self) -> vk::PipelineStageFlags {
        if self.dst_stage.is_empty() {
            vk::PipelineStageFlags::BOTTOM_OF_PIPE
        } else {
            self.dst_stage
        }
    }

    /// Record the batch. Does nothing when empty.
    pub fn record(&self, device: &ash::Device, cmd: vk::CommandBuffer) {
        if self.is_empty() {
            return;
        }
        unsafe {
            device.cmd_pipeline_barrier(
                cmd,
                self.src_stage(),
                self.dst_stage(),
                vk::DependencyFlags::empty(),
                &[],
                &self.buffers,
                &self.images,
            );
        }
    }
}
