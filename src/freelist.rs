use std::ptr::NonNull;

use crate::{
    block::{BlockHeader, FreeAdapter},
    list::{Iter, Link, List},
};

/// Linked list to keep track of free [`BlockHeader`]s, sorted by size.
///
/// The list is threaded through the [`BlockHeader::free`] links of each free
/// block, so keeping track of a free block costs no memory beyond its header.
///
/// ```text
///                        Free List (ascending size)
///
///          +----------------------------------+
///          |                                  v
/// +--------|-----+   +-------+   +-------+   +--------------+
/// |  Free (32)   |   | Block |   | Block |   |  Free (512)  |
/// +--------------+   +-------+   +-------+   +--------------+
///
/// ```
///
/// Entries are kept in non decreasing `size` order, which is what makes the
/// linear "first entry that fits" search return the smallest block that fits.
/// Any insertion that skips the ordering changes which block gets picked.
pub(crate) struct FreeList {
    items: List<FreeAdapter>,
}

impl FreeList {
    /// Creates a new empty List
    pub const fn new() -> Self {
        Self { items: List::new() }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn iter(&self) -> Iter<'_, FreeAdapter> {
        self.items.iter()
    }

    /// Links `block` in front of the first entry at least as large as it,
    /// or at the tail when every entry is smaller.
    ///
    /// **SAFETY**: `block` must be a live header that is not in the list.
    pub unsafe fn insert(&mut self, block: NonNull<BlockHeader>) {
        unsafe {
            let size = block.as_ref().size;
            let before = self.items.iter().find(|node| node.as_ref().size >= size);

            self.items.insert_before(before, block);
        }
    }

    /// Unlinks `block` in O(1).
    ///
    /// **SAFETY**: `block` must be a member of the list.
    #[inline]
    pub unsafe fn remove(&mut self, block: NonNull<BlockHeader>) {
        unsafe { self.items.remove(block) }
    }

    /// Returns the first block with at least `size` payload bytes.
    ///
    /// Because the list is sorted this is also the smallest block that can
    /// hold `size`.
    pub fn find_sufficient(&self, size: usize) -> Link<BlockHeader> {
        self.items
            .iter()
            .find(|node| unsafe { node.as_ref().size >= size })
    }

    /// Sum of the payload bytes of every free block.
    pub fn free_bytes(&self) -> usize {
        self.items.iter().map(|node| unsafe { node.as_ref().size }).sum()
    }
}
