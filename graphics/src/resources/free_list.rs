//! First-fit free-list allocator over a fixed byte range.
//!
//! The allocator only does bookkeeping: it hands out `{offset, size}` ranges
//! of a buffer it never touches. Freed ranges are appended to the free list
//! as-is; adjacent blocks are merged only by an explicit
//! [`FreeListAllocator::defragment_free_list`] pass.
//!
//! Free blocks plus live handles always partition `[0, total_size)` exactly.
//! Live handles are tracked by offset, so a handle is only accepted back while
//! the exact range it names is still allocated.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

static NEXT_ALLOCATOR_ID: AtomicU32 = AtomicU32::new(1);

/// A byte range owned by one asset inside a fat buffer.
///
/// Valid iff `size > 0`. Each handle is stamped with the id of the allocator
/// that issued it, so it cannot be returned to a different allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceHandle {
    pub offset: i64,
    pub size: u64,
    allocator: u32,
}

impl ResourceHandle {
    /// The handle returned when an allocation does not fit.
    pub const INVALID: Self = Self {
        offset: -1,
        size: 0,
        allocator: 0,
    };

    pub fn is_valid(&self) -> bool {
        self.size > 0
    }

    /// Id of the allocator that issued this handle.
    pub fn allocator_id(&self) -> u32 {
        self.allocator
    }

    /// One past the last byte of the range.
    pub fn end(&self) -> u64 {
        self.offset.max(0) as u64 + self.size
    }

    /// Whether two handles share at least one byte.
    pub fn overlaps(&self, other: &ResourceHandle) -> bool {
        self.is_valid()
            && other.is_valid()
            && (self.offset.max(0) as u64) < other.end()
            && (other.offset.max(0) as u64) < self.end()
    }
}

impl Default for ResourceHandle {
    fn default() -> Self {
        Self::INVALID
    }
}

/// An unallocated range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FreeBlock {
    pub offset: u64,
    pub size: u64,
}

impl FreeBlock {
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// Free-list bookkeeping for one fat buffer.
#[derive(Debug)]
pub struct FreeListAllocator {
    id: u32,
    total_size: u64,
    free_blocks: Vec<FreeBlock>,
    used_bytes: u64,
    /// Offset to size of every live handle.
    live: HashMap<u64, u64>,
}

impl FreeListAllocator {
    /// Create an allocator managing `[0, total_size)`.
    pub fn new(total_size: u64) -> Self {
        let free_blocks = if total_size > 0 {
            vec![FreeBlock {
                offset: 0,
                size: total_size,
            }]
        } else {
            Vec::new()
        };

        Self {
            id: NEXT_ALLOCATOR_ID.fetch_add(1, Ordering::Relaxed),
            total_size,
            free_blocks,
            used_bytes: 0,
            live: HashMap::new(),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Free blocks in list order.
    pub fn free_blocks(&self) -> &[FreeBlock] {
        &self.free_blocks
    }

    /// Allocate `size` bytes from the first free block large enough.
    ///
    /// Returns [`ResourceHandle::INVALID`] when nothing fits or `size` is 0.
    /// Running out of space is a normal outcome and is not logged here.
    pub fn add_data(&mut self, size: u64) -> ResourceHandle {
        if size == 0 {
            return ResourceHandle::INVALID;
        }

        let Some(index) = self.free_blocks.iter().position(|b| b.size >= size) else {
            return ResourceHandle::INVALID;
        };

        let block = &mut self.free_blocks[index];
        let offset = block.offset;
        block.offset += size;
        block.size -= size;
        if block.size == 0 {
            self.free_blocks.remove(index);
        }

        self.used_bytes += size;
        self.live.insert(offset, size);

        ResourceHandle {
            offset: offset as i64,
            size,
            allocator: self.id,
        }
    }

    /// Return a handle's range to the free list.
    ///
    /// Invalid handles, handles of another allocator and out-of-range handles
    /// are rejected with a warning. So is any handle that does not name a live
    /// range exactly, which covers double frees and stale copies of a handle
    /// whose range has since been handed out again. Returns whether the range
    /// was released.
    pub fn remove_data(&mut self, handle: ResourceHandle) -> bool {
        if !handle.is_valid() {
            return false;
        }
        if handle.allocator != self.id {
            log::warn!(
                "Allocator {} rejected handle from allocator {} (offset {}, size {})",
                self.id,
                handle.allocator,
                handle.offset,
                handle.size
            );
            return false;
        }
        if handle.offset < 0 || handle.end() > self.total_size {
            log::warn!(
                "Allocator {} rejected out-of-range handle (offset {}, size {})",
                self.id,
                handle.offset,
                handle.size
            );
            return false;
        }

        let offset = handle.offset as u64;
        if self.live.get(&offset) != Some(&handle.size) {
            log::warn!(
                "Allocator {} rejected stale or already freed handle (offset {}, size {})",
                self.id,
                handle.offset,
                handle.size
            );
            return false;
        }

        self.live.remove(&offset);
        self.free_blocks.push(FreeBlock {
            offset,
            size: handle.size,
        });
        self.used_bytes -= handle.size;
        true
    }

    /// Sort free blocks by offset and merge adjacent ones.
    ///
    /// Returns the number of blocks eliminated by merging.
    pub fn defragment_free_list(&mut self) -> usize {
        let before = self.free_blocks.len();
        self.free_blocks.sort_unstable_by_key(|b| b.offset);

        let mut merged: Vec<FreeBlock> = Vec::with_capacity(before);
        for block in self.free_blocks.drain(..) {
            match merged.last_mut() {
                Some(last) if last.end() == block.offset => last.size += block.size,
                _ => merged.push(block),
            }
        }
        self.free_blocks = merged;

        let eliminated = before - self.free_blocks.len();
        if eliminated > 0 {
            log::debug!(
                "Allocator {} merged {} free block(s), {} remain",
                self.id,
                eliminated,
                self.free_blocks.len()
            );
        }
        eliminated
    }

    pub fn free_bytes(&self) -> u64 {
        self.total_size - self.used_bytes
    }

    pub fn used_bytes(&self) -> u64 {
        self.used_bytes
    }

    pub fn largest_free_block(&self) -> u64 {
        self.free_blocks.iter().map(|b| b.size).max().unwrap_or(0)
    }

    pub fn free_block_count(&self) -> usize {
        self.free_blocks.len()
    }

    pub fn live_handle_count(&self) -> usize {
        self.live.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_fit_reuse() {
        let mut alloc = FreeListAllocator::new(100);
        let a = alloc.add_data(40);
        let b = alloc.add_data(40);
        assert_eq!(a.offset, 0);
        assert_eq!(b.offset, 40);

        assert!(alloc.remove_data(a));
        let c = alloc.add_data(30);
        assert_eq!(c.offset, 0);
        assert!(
            alloc
                .free_blocks()
                .contains(&FreeBlock { offset: 30, size: 10 })
        );
        assert_eq!(alloc.free_bytes(), 30);
    }

    #[test]
    fn test_exhaustion_is_invalid() {
        let mut alloc = FreeListAllocator::new(64);
        assert!(alloc.add_data(64).is_valid());
        let h = alloc.add_data(1);
        assert!(!h.is_valid());
        assert_eq!(h, ResourceHandle::INVALID);
        assert_eq!(alloc.free_block_count(), 0);
    }

    #[test]
    fn test_zero_size_is_invalid() {
        let mut alloc = FreeListAllocator::new(64);
        assert!(!alloc.add_data(0).is_valid());
        assert_eq!(alloc.used_bytes(), 0);
    }

    #[test]
    fn test_free_list_order_tie_break() {
        let mut alloc = FreeListAllocator::new(100);
        let a = alloc.add_data(20);
        let _b = alloc.add_data(20);
        let c = alloc.add_data(20);
        // free list: [60..100]
        assert!(alloc.remove_data(a));
        assert!(alloc.remove_data(c));
        // free list: [60..100], [0..20], [40..60]
        let d = alloc.add_data(20);
        assert_eq!(d.offset, 60);
    }

    #[test]
    fn test_foreign_handle_rejected() {
        let mut first = FreeListAllocator::new(100);
        let mut second = FreeListAllocator::new(100);
        let h = first.add_data(10);
        assert_ne!(first.id(), second.id());
        assert!(!second.remove_data(h));
        assert_eq!(second.free_bytes(), 100);
        assert!(first.remove_data(h));
    }

    #[test]
    fn test_double_free_rejected() {
        let mut alloc = FreeListAllocator::new(100);
        let h = alloc.add_data(10);
        assert!(alloc.remove_data(h));
        assert!(!alloc.remove_data(h));
        assert_eq!(alloc.free_bytes(), 100);
    }

    #[test]
    fn test_stale_handle_rejected_after_reuse() {
        let mut alloc = FreeListAllocator::new(100);
        let old = alloc.add_data(40);
        let _rest = alloc.add_data(60);
        assert!(alloc.remove_data(old));

        // Same offset, different size.
        let smaller = alloc.add_data(30);
        assert_eq!(smaller.offset, old.offset);
        assert!(!alloc.remove_data(old));
        assert_eq!(alloc.used_bytes(), 90);

        // Same offset and size: indistinguishable, so still accepted once.
        assert!(alloc.remove_data(smaller));
        alloc.defragment_free_list();
        let reused = alloc.add_data(40);
        assert_eq!(reused, old);
        assert!(alloc.remove_data(old));
        assert!(!alloc.remove_data(reused));
        assert_eq!(alloc.live_handle_count(), 1);
        assert_eq!(alloc.free_bytes(), 40);
    }

    #[test]
    fn test_handle_inside_live_range_rejected() {
        let mut alloc = FreeListAllocator::new(100);
        let whole = alloc.add_data(60);
        let forged = ResourceHandle {
            offset: 20,
            size: 20,
            allocator: alloc.id(),
        };
        assert!(!alloc.remove_data(forged));
        assert_eq!(alloc.used_bytes(), 60);
        assert!(alloc.remove_data(whole));
    }

    #[test]
    fn test_defragment_merges_adjacent() {
        let mut alloc = FreeListAllocator::new(90);
        let handles: Vec<_> = (0..3).map(|_| alloc.add_data(30)).collect();
        for h in handles.iter().rev() {
            assert!(alloc.remove_data(*h));
        }
        assert_eq!(alloc.free_block_count(), 3);
        assert!(!alloc.add_data(60).is_valid());

        assert_eq!(alloc.defragment_free_list(), 2);
        assert_eq!(alloc.free_blocks(), &[FreeBlock { offset: 0, size: 90 }]);
        assert_eq!(alloc.add_data(60).offset, 0);
    }

    #[test]
    fn test_stats() {
        let mut alloc = FreeListAllocator::new(1000);
        let a = alloc.add_data(100);
        let _b = alloc.add_data(300);
        alloc.remove_data(a);
        assert_eq!(alloc.used_bytes(), 300);
        assert_eq!(alloc.free_bytes(), 700);
        assert_eq!(alloc.largest_free_block(), 600);
        assert_eq!(alloc.free_block_count(), 2);
        assert_eq!(alloc.live_handle_count(), 1);
    }

    #[test]
    fn test_handle_overlap() {
        let mut alloc = FreeListAllocator::new(100);
        let a = alloc.add_data(10);
        let b = alloc.add_data(10);
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&a));
        assert!(!a.overlaps(&ResourceHandle::INVALID));
    }
}
