use std::{mem, ptr::NonNull};

use crate::list::{Adapter, Links};

/// Header size of a block. The payload starts exactly this many bytes after
/// the header, so going from one to the other is plain offset arithmetic.
pub(crate) const BLOCK_HEADER_SIZE: usize = mem::size_of::<BlockHeader>();

/// Written in every live header. Cleared when a header stops describing a
/// block (absorbed by a merge or unmapped with its region).
const BLOCK_MAGIC: usize = 0x626c_6f63_6b68_6472;

/// This is the structure of a block. The fields of the block are its metadata,
/// content is placed after this header.
///
/// ```text
/// +---------------------+ <------+
/// |  magic, size, id    |        |
/// +---------------------+        |
/// |  used, heap_origin  |        |
/// +---------------------+        | -> Header
/// |       region        |        |
/// +---------------------+        |
/// |  catalogue links    |        |
/// |  free list links    |        |
/// +---------------------+ <------+
/// |       Content       |        |
/// |         ...         |        | -> Addressable content (`size` bytes)
/// |                     |        |
/// +---------------------+ <------+
/// ```
///
/// Both list memberships live in the header, next to each other and never
/// overlapping the payload. The free list links are only meaningful while
/// `used` is false.
///
/// Every size is a multiple of the machine word and the header size is too,
/// so a header carved out of the middle of a region is still aligned.
#[repr(C)]
pub(crate) struct BlockHeader {
    magic: usize,
    /// Payload bytes. Never includes the header.
    pub size: usize,
    /// Sequence number used to name the block in diagnostics.
    pub id: u64,
    pub used: bool,
    /// Provenance of the memory: program break (`true`) or anonymous mapping.
    /// Regions always come from anonymous mappings today.
    pub heap_origin: bool,
    /// First block of the region this block was carved from (itself when it
    /// is that first block).
    pub region: NonNull<BlockHeader>,
    /// Membership in the address ordered catalogue of every block.
    pub catalogue: Links<BlockHeader>,
    /// Membership in the size ordered free list.
    pub free: Links<BlockHeader>,
}

/// Threads a list through [`BlockHeader::catalogue`].
pub(crate) struct CatalogueAdapter;

/// Threads a list through [`BlockHeader::free`].
pub(crate) struct FreeAdapter;

impl Adapter for CatalogueAdapter {
    type Owner = BlockHeader;

    #[inline]
    unsafe fn links(owner: NonNull<BlockHeader>) -> NonNull<Links<BlockHeader>> {
        unsafe { NonNull::new_unchecked(&raw mut (*owner.as_ptr()).catalogue) }
    }
}

impl Adapter for FreeAdapter {
    type Owner = BlockHeader;

    #[inline]
    unsafe fn links(owner: NonNull<BlockHeader>) -> NonNull<Links<BlockHeader>> {
        unsafe { NonNull::new_unchecked(&raw mut (*owner.as_ptr()).free) }
    }
}

impl BlockHeader {
    /// Writes a fresh, unlinked, free header at `addr`.
    ///
    /// When `region` is `None` the block starts a new region and points to
    /// itself.
    ///
    /// **SAFETY**: `addr` must be word aligned and valid for writes of
    /// `BLOCK_HEADER_SIZE + size` bytes that belong to a single region.
    pub unsafe fn init(
        addr: NonNull<u8>,
        size: usize,
        region: Option<NonNull<BlockHeader>>,
        heap_origin: bool,
        id: u64,
    ) -> NonNull<BlockHeader> {
        let block = addr.cast::<BlockHeader>();

        unsafe {
            block.as_ptr().write(BlockHeader {
                magic: BLOCK_MAGIC,
                size,
                id,
                used: false,
                heap_origin,
                region: region.unwrap_or(block),
                catalogue: Links::new(),
                free: Links::new(),
            });
        }

        block
    }

    /// Address of the first payload byte.
    #[inline]
    pub fn payload(block: NonNull<BlockHeader>) -> NonNull<u8> {
        unsafe { block.cast::<u8>().add(BLOCK_HEADER_SIZE) }
    }

    /// Address one past the last payload byte, i.e. where the next block of
    /// the same region would start.
    ///
    /// **SAFETY**: `block` must be a live header.
    #[inline]
    pub unsafe fn end(block: NonNull<BlockHeader>) -> NonNull<u8> {
        unsafe { Self::payload(block).add(block.as_ref().size) }
    }

    /// Recovers the header that precedes `ptr`.
    ///
    /// Panics when `ptr` is misaligned or the header does not carry the magic
    /// word, which means `ptr` was never returned by this allocator or its
    /// block no longer exists.
    ///
    /// **SAFETY**: the `BLOCK_HEADER_SIZE` bytes before `ptr` must be readable.
    pub unsafe fn from_payload(ptr: NonNull<u8>) -> NonNull<BlockHeader> {
        assert!(
            ptr.as_ptr() as usize % mem::align_of::<BlockHeader>() == 0
                && ptr.as_ptr() as usize > BLOCK_HEADER_SIZE,
            "invalid pointer {ptr:p}: not the start of an allocated block"
        );

        unsafe {
            let block = ptr.sub(BLOCK_HEADER_SIZE).cast::<BlockHeader>();
            assert!(
                block.as_ref().magic == BLOCK_MAGIC,
                "invalid pointer {ptr:p}: not the start of an allocated block"
            );
            block
        }
    }

    /// Marks the header as dead so a stale pointer to it is rejected by
    /// [`BlockHeader::from_payload`].
    ///
    /// **SAFETY**: `block` must be a live header that is in no list.
    #[inline]
    pub unsafe fn invalidate(mut block: NonNull<BlockHeader>) {
        unsafe { block.as_mut().magic = 0 }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.magic == BLOCK_MAGIC
    }

    /// Whether this block is the one its region starts with.
    #[inline]
    pub fn is_region_head(block: NonNull<BlockHeader>) -> bool {
        unsafe { block.as_ref().region == block }
    }

    /// One line description used by every diagnostic dump.
    ///
    /// **SAFETY**: `block` must be a live header.
    pub unsafe fn describe(block: NonNull<BlockHeader>) -> String {
        unsafe {
            let header = block.as_ref();
            format!(
                "[region: {:p}, block: {:p}, data: {:p}-{:p}] {:>10} [{}] [{}] [block_{}]",
                header.region,
                block,
                Self::payload(block),
                Self::end(block),
                header.size,
                if header.used { "USED" } else { "FREE" },
                if header.heap_origin { "HEAP" } else { "MMAP" },
                header.id,
            )
        }
    }
}
