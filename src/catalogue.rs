use std::ptr::NonNull;

use crate::{
    block::{BlockHeader, CatalogueAdapter},
    list::{Iter, Link, List},
};

/// Every block the allocator knows about, free or used, in address order.
///
/// New regions are appended at the tail and split remainders are linked right
/// after the block they came from, so the blocks of one region always form a
/// contiguous run that starts with the region's head block:
///
/// ```text
///  region A                          region B
/// +---------+---------+---------+   +---------+---------+
/// | A (USED)| A (FREE)| A (USED)|-->| B (FREE)| B (USED)|
/// +---------+---------+---------+   +---------+---------+
/// ```
pub(crate) struct Catalogue {
    blocks: List<CatalogueAdapter>,
}

impl Catalogue {
    pub const fn new() -> Self {
        Self { blocks: List::new() }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    #[inline]
    pub fn first(&self) -> Link<BlockHeader> {
        self.blocks.first()
    }

    pub fn iter(&self) -> Iter<'_, CatalogueAdapter> {
        self.blocks.iter()
    }

    /// Adds the head block of a freshly mapped region.
    ///
    /// **SAFETY**: `block` must be a live header that is not in the catalogue.
    #[inline]
    pub unsafe fn append(&mut self, block: NonNull<BlockHeader>) {
        unsafe { self.blocks.push_back(block) }
    }

    /// Links a split remainder right after the block it was carved from.
    ///
    /// **SAFETY**: `after` must be in the catalogue and `block` must not.
    #[inline]
    pub unsafe fn insert_after(&mut self, after: NonNull<BlockHeader>, block: NonNull<BlockHeader>) {
        unsafe { self.blocks.insert_after(after, block) }
    }

    /// **SAFETY**: `block` must be in the catalogue.
    #[inline]
    pub unsafe fn remove(&mut self, block: NonNull<BlockHeader>) {
        unsafe { self.blocks.remove(block) }
    }

    /// Address successor of `block` when it belongs to the same region.
    ///
    /// **SAFETY**: `block` must be in the catalogue.
    pub unsafe fn next_in_region(&self, block: NonNull<BlockHeader>) -> Link<BlockHeader> {
        unsafe {
            self.blocks
                .next(block)
                .filter(|next| next.as_ref().region == block.as_ref().region)
        }
    }

    /// Address predecessor of `block` when it belongs to the same region.
    ///
    /// **SAFETY**: `block` must be in the catalogue.
    pub unsafe fn prev_in_region(&self, block: NonNull<BlockHeader>) -> Link<BlockHeader> {
        unsafe {
            self.blocks
                .prev(block)
                .filter(|prev| prev.as_ref().region == block.as_ref().region)
        }
    }

    /// Blocks still handed out to callers.
    pub fn used(&self) -> impl Iterator<Item = NonNull<BlockHeader>> + '_ {
        self.blocks.iter().filter(|block| unsafe { block.as_ref().used })
    }
}
