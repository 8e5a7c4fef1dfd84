//! A fixed-size device buffer shared by many assets.

use crate::context::RenderContext;
use crate::error::GraphicsError;
use crate::types::{BufferDescriptor, BufferHandle, BufferUsage};

use super::free_list::{FreeListAllocator, ResourceHandle};

/// One physical GPU buffer plus the allocator that carves it up.
///
/// The buffer is sized once at creation and never grows. Assets own byte
/// ranges of it through [`ResourceHandle`]s.
#[derive(Debug)]
pub struct FatBuffer {
    label: String,
    buffer: BufferHandle,
    allocator: FreeListAllocator,
}

impl FatBuffer {
    /// Create the buffer with `COPY_DST` added to `usage`.
    pub fn new(
        ctx: &mut dyn RenderContext,
        label: &str,
        size: u64,
        usage: BufferUsage,
    ) -> Result<Self, GraphicsError> {
        if size == 0 {
            return Err(GraphicsError::InvalidParameter(format!(
                "fat buffer '{label}' cannot be empty"
            )));
        }

        let descriptor =
            BufferDescriptor::new(size, usage | BufferUsage::COPY_DST).with_label(label);
        let buffer = ctx.create_buffer(&descriptor)?;
        log::debug!("Created fat buffer '{}' ({} bytes)", label, size);

        Ok(Self {
            label: label.to_string(),
            buffer,
            allocator: FreeListAllocator::new(size),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn buffer(&self) -> BufferHandle {
        self.buffer
    }

    pub fn size(&self) -> u64 {
        self.allocator.total_size()
    }

    pub fn allocator(&self) -> &FreeListAllocator {
        &self.allocator
    }

    /// Allocate a range, merging the free list once if the first attempt fails.
    pub fn allocate(&mut self, size: u64) -> ResourceHandle {
        let handle = self.allocator.add_data(size);
        if handle.is_valid() || size == 0 {
            return handle;
        }

        if self.allocator.defragment_free_list() == 0 {
            return handle;
        }
        self.allocator.add_data(size)
    }

    pub fn free(&mut self, handle: ResourceHandle) -> bool {
        self.allocator.remove_data(handle)
    }

    pub fn destroy(self, ctx: &mut dyn RenderContext) {
        ctx.destroy_buffer(self.buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RecordingContext;

    #[test]
    fn test_fat_buffer_adds_copy_dst() {
        let mut ctx = RecordingContext::new();
        let fat = FatBuffer::new(&mut ctx, "vertices", 256, BufferUsage::VERTEX).unwrap();
        let desc = ctx.buffer_descriptor(fat.buffer()).unwrap();
        assert!(desc.usage.contains(BufferUsage::VERTEX | BufferUsage::COPY_DST));
        assert_eq!(fat.size(), 256);
    }

    #[test]
    fn test_fat_buffer_allocate_retries_after_merge() {
        let mut ctx = RecordingContext::new();
        let mut fat = FatBuffer::new(&mut ctx, "indices", 90, BufferUsage::INDEX).unwrap();
        let handles: Vec<_> = (0..3).map(|_| fat.allocate(30)).collect();
        for h in handles.into_iter().rev() {
            assert!(fat.free(h));
        }

        let merged = fat.allocate(90);
        assert!(merged.is_valid());
        assert_eq!(merged.offset, 0);
        assert_eq!(fat.allocator().free_block_count(), 0);
    }

    #[test]
    fn test_fat_buffer_exhausted() {
        let mut ctx = RecordingContext::new();
        let mut fat = FatBuffer::new(&mut ctx, "tiny", 16, BufferUsage::VERTEX).unwrap();
        assert!(!fat.allocate(32).is_valid());
        assert!(FatBuffer::new(&mut ctx, "empty", 0, BufferUsage::VERTEX).is_err());
    }
}
