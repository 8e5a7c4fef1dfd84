//! Host-visible staging buffer with a linear per-frame write cursor.
//!
//! Uploads write their bytes at the cursor, then record a copy from the
//! staging buffer to the destination. The cursor only moves forward during a
//! frame and is rewound with [`StagingBuffer::reset`] once the previous frame's
//! copies have completed. A request that does not fit before the end of the
//! buffer is refused rather than wrapped, so the caller defers it to the next
//! frame.

use crate::context::RenderContext;
use crate::error::GraphicsError;
use crate::types::{BufferDescriptor, BufferHandle, BufferUsage};

/// A region reserved in the staging buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StagingAllocation {
    /// Byte offset into the staging buffer.
    pub offset: u64,
    /// Size of the region in bytes.
    pub size: u64,
}

impl StagingAllocation {
    pub fn new(offset: u64, size: u64) -> Self {
        Self { offset, size }
    }

    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// A host-writable intermediate buffer reused every frame.
///
/// Not thread-safe; owned by the render thread.
#[derive(Debug)]
pub struct StagingBuffer {
    buffer: BufferHandle,
    capacity: u64,
    current_offset: u64,
    reset_count: u64,
}

impl StagingBuffer {
    /// Create the staging buffer on the given context.
    pub fn new(
        ctx: &mut dyn RenderContext,
        capacity: u64,
        label: &str,
    ) -> Result<Self, GraphicsError> {
        if capacity == 0 {
            return Err(GraphicsError::InvalidParameter(
                "staging buffer capacity cannot be zero".to_string(),
            ));
        }

        let descriptor =
            BufferDescriptor::new(capacity, BufferUsage::MAP_WRITE | BufferUsage::COPY_SRC)
                .with_label(format!("{label}_staging"));
        let buffer = ctx.create_buffer(&descriptor)?;

        Ok(Self {
            buffer,
            capacity,
            current_offset: 0,
            reset_count: 0,
        })
    }

    pub fn buffer(&self) -> BufferHandle {
        self.buffer
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn current_offset(&self) -> u64 {
        self.current_offset
    }

    /// Bytes left after the cursor.
    pub fn remaining(&self) -> u64 {
        self.capacity - self.current_offset
    }

    /// Number of resets that rewound a non-empty cursor.
    pub fn reset_count(&self) -> u64 {
        self.reset_count
    }

    /// Whether `size` bytes at `alignment` fit before the end of the buffer.
    pub fn can_fit(&self, size: u64, alignment: u64) -> bool {
        align_up(self.current_offset, alignment) + size <= self.capacity
    }

    /// Reserve `size` bytes starting at the cursor rounded up to `alignment`.
    ///
    /// Returns `None` when the padded request does not fit; the cursor is not
    /// moved in that case.
    pub fn allocate(&mut self, size: u64, alignment: u64) -> Option<StagingAllocation> {
        debug_assert!(alignment.is_power_of_two(), "alignment must be power of 2");

        let offset = align_up(self.current_offset, alignment);
        if offset + size > self.capacity {
            return None;
        }

        self.current_offset = offset + size;
        Some(StagingAllocation::new(offset, size))
    }

    /// Write bytes into a previously reserved region.
    pub fn write(
        &self,
        ctx: &mut dyn RenderContext,
        allocation: &StagingAllocation,
        offset_in_allocation: u64,
        data: &[u8],
    ) -> Result<(), GraphicsError> {
        if offset_in_allocation + data.len() as u64 > allocation.size {
            return Err(GraphicsError::InvalidParameter(format!(
                "staging write of {} bytes at {} overflows a {}-byte region",
                data.len(),
                offset_in_allocation,
                allocation.size
            )));
        }
        ctx.write_buffer(
            self.buffer,
            allocation.offset + offset_in_allocation,
            data,
        )
    }

    /// Rewind the cursor to the start of the buffer.
    ///
    /// The caller must ensure the GPU is done reading the previous contents.
    pub fn reset(&mut self) {
        if self.current_offset > 0 {
            self.reset_count += 1;
            self.current_offset = 0;
        }
    }

    pub fn destroy(self, ctx: &mut dyn RenderContext) {
        ctx.destroy_buffer(self.buffer);
    }
}

/// Align a value up to the given power-of-two alignment.
#[inline]
fn align_up(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RecordingContext;

    fn create_staging(capacity: u64) -> (RecordingContext, StagingBuffer) {
        let mut ctx = RecordingContext::new();
        let staging = StagingBuffer::new(&mut ctx, capacity, "test").unwrap();
        (ctx, staging)
    }

    #[test]
    fn test_staging_creation() {
        let (ctx, staging) = create_staging(4096);
        assert_eq!(staging.capacity(), 4096);
        assert_eq!(staging.current_offset(), 0);
        assert_eq!(staging.remaining(), 4096);
        let desc = ctx.buffer_descriptor(staging.buffer()).unwrap();
        assert!(desc.is_host_visible());
    }

    #[test]
    fn test_staging_zero_capacity() {
        let mut ctx = RecordingContext::new();
        assert!(StagingBuffer::new(&mut ctx, 0, "empty").is_err());
    }

    #[test]
    fn test_staging_allocate_sequential() {
        let (_ctx, mut staging) = create_staging(1024);
        let a = staging.allocate(100, 1).unwrap();
        let b = staging.allocate(50, 1).unwrap();
        assert_eq!(a, StagingAllocation::new(0, 100));
        assert_eq!(b.offset, 100);
        assert_eq!(staging.current_offset(), 150);
    }

    #[test]
    fn test_staging_alignment_padding() {
        let (_ctx, mut staging) = create_staging(1024);
        staging.allocate(3, 1).unwrap();
        let aligned = staging.allocate(16, 8).unwrap();
        assert_eq!(aligned.offset, 8);
        assert_eq!(staging.current_offset(), 24);
    }

    #[test]
    fn test_staging_refuses_overflow() {
        let (_ctx, mut staging) = create_staging(1024);
        staging.allocate(600, 1).unwrap();
        assert!(!staging.can_fit(600, 1));
        assert!(staging.allocate(600, 1).is_none());
        assert_eq!(staging.current_offset(), 600);

        // padding alone can push a request over the edge
        staging.allocate(419, 1).unwrap();
        assert!(staging.can_fit(5, 1));
        assert!(!staging.can_fit(5, 8));
    }

    #[test]
    fn test_staging_reset() {
        let (_ctx, mut staging) = create_staging(256);
        staging.reset();
        assert_eq!(staging.reset_count(), 0);

        staging.allocate(200, 1).unwrap();
        staging.reset();
        assert_eq!(staging.current_offset(), 0);
        assert_eq!(staging.reset_count(), 1);
        assert!(staging.allocate(256, 1).is_some());
    }

    #[test]
    fn test_staging_write_bounds() {
        let (mut ctx, mut staging) = create_staging(64);
        let region = staging.allocate(8, 1).unwrap();
        assert!(staging.write(&mut ctx, &region, 0, &[1; 8]).is_ok());
        assert!(staging.write(&mut ctx, &region, 4, &[1; 8]).is_err());
        assert_eq!(ctx.buffer_contents(staging.buffer()).unwrap()[..8], [1; 8]);
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 8), 0);
        assert_eq!(align_up(1, 8), 8);
        assert_eq!(align_up(8, 8), 8);
        assert_eq!(align_up(9, 4), 12);
    }
}
