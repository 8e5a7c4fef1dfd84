//! Bindless texture slot table.

use crate::types::ImageHandle;

/// Fixed-capacity mapping from descriptor array slots to images.
///
/// Freed slots are reused before fresh ones, most recently freed first.
#[derive(Debug)]
pub struct BindlessTable {
    slots: Vec<Option<ImageHandle>>,
    free_slots: Vec<u32>,
    capacity: u32,
}

impl BindlessTable {
    pub fn new(capacity: u32) -> Self {
        Self {
            slots: Vec::new(),
            free_slots: Vec::new(),
            capacity,
        }
    }

    /// Place an image in a slot. Returns `None` when the table is full.
    pub fn insert(&mut self, image: ImageHandle) -> Option<u32> {
        if let Some(slot) = self.free_slots.pop() {
            self.slots[slot as usize] = Some(image);
            return Some(slot);
        }

        if self.slots.len() as u32 >= self.capacity {
            log::error!(
                "Bindless table is full ({} slots), cannot bind image {}",
                self.capacity,
                image.raw()
            );
            return None;
        }

        self.slots.push(Some(image));
        Some(self.slots.len() as u32 - 1)
    }

    /// Clear a slot and return the image it held.
    pub fn remove(&mut self, slot: u32) -> Option<ImageHandle> {
        let image = self.slots.get_mut(slot as usize)?.take()?;
        self.free_slots.push(slot);
        Some(image)
    }

    pub fn get(&self, slot: u32) -> Option<ImageHandle> {
        self.slots.get(slot as usize).copied().flatten()
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.slots.len() - self.free_slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Occupied slots in index order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, ImageHandle)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.map(|image| (i as u32, image)))
    }
}
