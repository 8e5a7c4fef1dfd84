//! Deferred destruction of Vulkan objects.
//!
//! The GPU runs up to `frames_in_flight` frames behind the CPU, so an object
//! destroyed while a frame records may still be read by earlier submissions.
//! Destruction is queued on the frame slot that was recording and carried out
//! the next time that slot's fence has been waited on.
//!
//! ```text
//! frame N records in slot s ──> destroy(x) queues x on s
//! frame N + frames_in_flight waits on s's fence ──> x destroyed
//! ```

use ash::vk;
use gpu_allocator::vulkan::{Allocation, Allocator};

/// Upper bound on frames in flight.
pub const MAX_FRAMES_IN_FLIGHT: usize = 3;

/// A Vulkan object waiting for the GPU to finish with it.
pub(super) enum DeferredResource {
    Buffer {
        buffer: vk::Buffer,
        allocation: Option<Allocation>,
    },
    Image {
        image: vk::Image,
        view: vk::ImageView,
        allocation: Option<Allocation>,
    },
    Pipeline {
        pipeline: vk::Pipeline,
        layout: vk::PipelineLayout,
    },
}

impl DeferredResource {
    /// # Safety
    ///
    /// The GPU must no longer use the object.
    pub unsafe fn destroy(self, device: &ash::Device, allocator: &mut Allocator) {
        match self {
            Self::Buffer { buffer, allocation } => {
                if let Some(allocation) = allocation
                    && let Err(e) = allocator.free(allocation)
                {
                    log::error!("Failed to free buffer allocation: {e}");
                }
                unsafe { device.destroy_buffer(buffer, None) };
            }
            Self::Image {
                image,
                view,
                allocation,
            } => {
                if let Some(allocation) = allocation
                    && let Err(e) = allocator.free(allocation)
                {
                    log::error!("Failed to free image allocation: {e}");
                }
                unsafe {
                    device.destroy_image_view(view, None);
                    device.destroy_image(image, None);
                }
            }
            Self::Pipeline { pipeline, layout } => unsafe {
                device.destroy_pipeline(pipeline, None);
                device.destroy_pipeline_layout(layout, None);
            },
        }
    }
}

/// Per-slot queues of objects awaiting destruction.
pub(super) struct DeferredQueue {
    slots: Vec<Vec<DeferredResource>>,
}

impl DeferredQueue {
    pub fn new(frames_in_flight: usize) -> Self {
        Self {
            slots: (0..frames_in_flight.clamp(1, MAX_FRAMES_IN_FLIGHT))
                .map(|_| Vec::new())
                .collect(),
        }
    }

    pub fn push(&mut self, slot: usize, resource: DeferredResource) {
        let index = slot % self.slots.len();
        self.slots[index].push(resource);
    }

    /// Objects queued on `slot`, leaving it empty.
    pub fn take(&mut self, slot: usize) -> Vec<DeferredResource> {
        let index = slot % self.slots.len();
        std::mem::take(&mut self.slots[index])
    }

    /// Everything still queued. Only safe to destroy once the device is idle.
    pub fn take_all(&mut self) -> Vec<DeferredResource> {
        self.slots.iter_mut().flat_map(std::mem::take).collect()
    }

    pub fn pending_count(&self) -> usize {
        self.slots.iter().map(Vec::len).sum()
    }
}

impl std::fmt::Debug for DeferredQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredQueue")
            .field("slots", &self.slots.len())
            .field("pending", &self.pending_count())
            .finish()
    }
}
