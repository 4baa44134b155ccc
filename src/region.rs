//! A region is the span of one mapping call. It has no header of its own:
//! its first block stands for it, and every block carved from it points to
//! that first block through [`BlockHeader::region`].
//!
//! ```text
//! +------------------------------------------------------------+
//! | Block (head) |  payload  | Block | payload | Block | payload |
//! +------------------------------------------------------------+
//!  ^   ^                        |                 |
//!  |   +------------------------+-----------------+  region
//!  mapping start
//! ```
//!
//! Blocks never straddle two regions, which is why merging always checks
//! that both sides share the same head.

use std::ptr::NonNull;

use crate::{
    block::{BLOCK_HEADER_SIZE, BlockHeader},
    error::Result,
    kernel,
    memalloc::Heap,
};

/// Maps a region holding exactly one block of `size` payload bytes and
/// returns that block already marked as used. It is not linked anywhere yet,
/// see [`Heap`] for that.
pub(crate) fn map_region(size: usize) -> Result<NonNull<BlockHeader>> {
    let addr = kernel::acquire(BLOCK_HEADER_SIZE + size)?;

    unsafe {
        let mut block = BlockHeader::init(addr, size, None, false, 0);
        block.as_mut().used = true;
        Ok(block)
    }
}

impl Heap {
    /// Absorbs `right` into `left`, its address successor in the same region.
    ///
    /// `left` may be used (growing a block in place) but `right` must be free.
    ///
    /// **SAFETY**: both must be live catalogue blocks, `right` right after `left`.
    pub(crate) unsafe fn merge_two(&mut self, mut left: NonNull<BlockHeader>, right: NonNull<BlockHeader>) {
        unsafe {
            assert!(
                left.as_ref().region == right.as_ref().region,
                "cross-region merge of {left:p} and {right:p}"
            );
            assert!(!right.as_ref().used, "merge of used block {right:p}");

            log::debug!("lblock: {}", BlockHeader::describe(left));
            log::debug!("rblock: {}", BlockHeader::describe(right));

            self.free_list.remove(right);
            self.catalogue.remove(right);
            left.as_mut().size += BLOCK_HEADER_SIZE + right.as_ref().size;
            BlockHeader::invalidate(right);

            log::debug!("new block: {}", BlockHeader::describe(left));
        }
    }

    /// Merges the free `block` with every free block around it in its region
    /// and returns the surviving (leftmost) block, re-sorted in the free list.
    ///
    /// **SAFETY**: `block` must be a free block of the catalogue and free list.
    pub(crate) unsafe fn coalesce(&mut self, block: NonNull<BlockHeader>) -> NonNull<BlockHeader> {
        unsafe {
            let mut left = block;
            while let Some(prev) = self.catalogue.prev_in_region(left) {
                if prev.as_ref().used {
                    break;
                }
                left = prev;
            }

            while let Some(next) = self.catalogue.next_in_region(left) {
                if next.as_ref().used {
                    break;
                }
                self.merge_two(left, next);
            }

            // Its size changed, so its slot in the free list did too.
            self.free_list.remove(left);
            self.free_list.insert(left);

            left
        }
    }

    /// Whether `block` covers its whole region.
    ///
    /// **SAFETY**: `block` must be in the catalogue.
    pub(crate) unsafe fn is_whole_region(&self, block: NonNull<BlockHeader>) -> bool {
        unsafe { BlockHeader::is_region_head(block) && self.catalogue.next_in_region(block).is_none() }
    }

    /// Bytes mapped for the region that starts with `head`.
    ///
    /// **SAFETY**: `head` must be a region head in the catalogue.
    pub(crate) unsafe fn region_len(&self, head: NonNull<BlockHeader>) -> usize {
        let mut len = 0;
        let mut block = Some(head);

        while let Some(current) = block {
            unsafe {
                len += BLOCK_HEADER_SIZE + current.as_ref().size;
                block = self.catalogue.next_in_region(current);
            }
        }

        len
    }

    /// Unlinks a free block spanning its whole region and unmaps the region.
    /// A failing unmap is logged and the region is leaked.
    ///
    /// **SAFETY**: [`Heap::is_whole_region`] must hold for the free `block`.
    pub(crate) unsafe fn release_region(&mut self, block: NonNull<BlockHeader>) {
        unsafe {
            log::debug!("free merged block: {}", BlockHeader::describe(block));

            let len = BLOCK_HEADER_SIZE + block.as_ref().size;
            self.free_list.remove(block);
            self.catalogue.remove(block);
            BlockHeader::invalidate(block);
            self.regions -= 1;

            let _ = kernel::release(block.cast(), len);
        }
    }

    /// Unmaps every region, used blocks included. Runs on teardown.
    pub(crate) unsafe fn release_all(&mut self) {
        while let Some(head) = self.catalogue.first() {
            unsafe {
                let len = self.region_len(head);

                let mut block = Some(head);
                while let Some(current) = block {
                    block = self.catalogue.next_in_region(current);
                    if !current.as_ref().used {
                        self.free_list.remove(current);
                    }
                    self.catalogue.remove(current);
                    BlockHeader::invalidate(current);
                }

                self.regions -= 1;
                let _ = kernel::release(head.cast(), len);
            }
        }
    }
}
