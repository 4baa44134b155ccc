use std::ptr::{self, NonNull};

use parking_lot::Mutex;

use crate::{
    block::{BLOCK_HEADER_SIZE, BlockHeader},
    catalogue::Catalogue,
    config::Config,
    error::{AllocError, Result},
    freelist::FreeList,
    kernel,
    list::Link,
    region,
    utils::{WORD_SIZE, align, checked_align},
};

/// Snapshot of the allocator's bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Live OS mappings.
    pub regions: usize,
    /// Blocks in the catalogue, free or used.
    pub blocks: usize,
    /// Blocks in the free list.
    pub free_blocks: usize,
    /// Payload bytes handed out to callers.
    pub used_bytes: usize,
    /// Payload bytes sitting in the free list.
    pub free_bytes: usize,
    /// Region lengths rounded up to whole pages.
    pub mapped_bytes: usize,
}

/// Everything the mutex protects.
///
/// A block is always in the catalogue, and it is in the free list exactly
/// when its `used` flag is off. The block and free block counters are the
/// lengths of those two lists.
pub(crate) struct Heap {
    pub catalogue: Catalogue,
    pub free_list: FreeList,
    /// Live regions.
    pub regions: usize,
    pub next_id: u64,
    pub config: Config,
}

// The raw pointers only reach memory mapped by this heap and are only
// followed while holding the allocator's lock.
unsafe impl Send for Heap {}

impl Heap {
    pub const fn new(config: Config) -> Self {
        Self {
            catalogue: Catalogue::new(),
            free_list: FreeList::new(),
            regions: 0,
            next_id: 0,
            config,
        }
    }

    pub fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Hands out the smallest free block that holds `size` bytes, splitting
    /// off whatever is left over when it is worth keeping.
    unsafe fn take_free(&mut self, size: usize) -> Link<BlockHeader> {
        let mut block = self.free_list.find_sufficient(size)?;

        unsafe {
            self.free_list.remove(block);
            block.as_mut().used = true;
            log::debug!("find free block: {}", BlockHeader::describe(block));
            self.split(block, size);
        }

        Some(block)
    }

    /// Shrinks `block` to `size` payload bytes and turns the rest into a new
    /// free block, unless the rest could not hold a header plus the minimum
    /// block size. In that case the block is kept whole.
    ///
    /// **SAFETY**: `block` must be a used block of the catalogue with at
    /// least `size` payload bytes.
    pub unsafe fn split(&mut self, mut block: NonNull<BlockHeader>, size: usize) -> Link<BlockHeader> {
        unsafe {
            let current = block.as_ref().size;
            debug_assert!(current >= size);

            if current - size < BLOCK_HEADER_SIZE + self.config.min_block_size {
                return None;
            }

            log::debug!("split block: {}", BlockHeader::describe(block));

            let (region, heap_origin) = (block.as_ref().region, block.as_ref().heap_origin);
            let id = self.next_id();
            let rest = BlockHeader::init(
                BlockHeader::payload(block).add(size),
                current - size - BLOCK_HEADER_SIZE,
                Some(region),
                heap_origin,
                id,
            );
            block.as_mut().size = size;

            self.catalogue.insert_after(block, rest);
            self.free_list.insert(rest);

            log::debug!("old block: {}", BlockHeader::describe(block));
            log::debug!("new block: {}", BlockHeader::describe(rest));

            Some(rest)
        }
    }

    /// Registers the head block of a region mapped outside the lock.
    pub(crate) unsafe fn adopt_region(&mut self, mut block: NonNull<BlockHeader>) {
        unsafe {
            block.as_mut().id = self.next_id();
            self.catalogue.append(block);
            self.regions += 1;
            log::debug!("new block: {}", BlockHeader::describe(block));
        }
    }

    /// Returns a used block to the free list, merges it with its free
    /// neighbours and unmaps its region when it is entirely free and there
    /// are more live regions than the configuration retains.
    unsafe fn free_block(&mut self, mut block: NonNull<BlockHeader>) {
        unsafe {
            assert!(block.as_ref().used, "double free of {:p}", BlockHeader::payload(block));

            block.as_mut().used = false;
            self.free_list.insert(block);
            log::debug!("free block: {}", BlockHeader::describe(block));

            let merged = self.coalesce(block);
            log::debug!("merged block: {}", BlockHeader::describe(merged));

            if self.regions > self.config.retained_regions && self.is_whole_region(merged) {
                self.release_region(merged);
            }
        }
    }

    /// Grows a used block into its free successor when the two together hold
    /// `size` bytes, giving back any excess.
    unsafe fn grow_in_place(&mut self, block: NonNull<BlockHeader>, size: usize) -> bool {
        unsafe {
            let Some(next) = self.catalogue.next_in_region(block) else {
                return false;
            };

            let joint = block.as_ref().size + BLOCK_HEADER_SIZE + next.as_ref().size;
            if next.as_ref().used || joint < size {
                return false;
            }

            self.merge_two(block, next);
            self.split(block, size);
            true
        }
    }

    fn stats(&self) -> HeapStats {
        let mut stats = HeapStats {
            regions: self.regions,
            blocks: self.catalogue.len(),
            free_blocks: self.free_list.len(),
            free_bytes: self.free_list.free_bytes(),
            ..HeapStats::default()
        };

        for block in self.catalogue.iter() {
            unsafe {
                if block.as_ref().used {
                    stats.used_bytes += block.as_ref().size;
                }
                if BlockHeader::is_region_head(block) {
                    stats.mapped_bytes += align(self.region_len(block), kernel::page_size());
                }
            }
        }

        stats
    }

    fn memory_info(&self) -> String {
        let mut info = format!("-- BlockList[{}/{}] --\n", self.regions, self.catalogue.len());
        let mut total_bytes = 0;
        for block in self.catalogue.iter() {
            unsafe {
                info += &BlockHeader::describe(block);
                total_bytes += block.as_ref().size;
            }
            info.push('\n');
        }

        info += &format!("\n-- FreeBlockList[{}] --\n", self.free_list.len());
        for block in self.free_list.iter() {
            info += &format!("[{block:p}] -> ");
        }
        info += "[NULL]\n";

        let stats = self.stats();
        info += "\n-- Memory Summary --\n";
        info += &format!("total {total_bytes} bytes\n");
        info += &format!("free {} bytes\n", stats.free_bytes);
        info += &format!("mapped {} bytes\n", stats.mapped_bytes);
        info
    }

    fn leak_stats(&self) -> String {
        let mut info = format!("-- LeakStats[{}/{}] --\n", self.regions, self.catalogue.len());
        let mut leak_bytes = 0;
        let mut leak_blocks = 0;

        for block in self.catalogue.used() {
            unsafe {
                info += &BlockHeader::describe(block);
                leak_bytes += block.as_ref().size;
            }
            info.push('\n');
            leak_blocks += 1;
        }

        if leak_blocks == 0 {
            return String::new();
        }

        info += "-- Leak Summary --\n";
        info += &format!("{leak_blocks} blocks lost ({leak_bytes} bytes)");
        info
    }

    fn verify(&self) -> Result<()> {
        let mut last_size = 0;
        for block in self.free_list.iter() {
            let header = unsafe { block.as_ref() };
            if !header.is_valid() {
                return corrupted(format!("free list entry {block:p} has no valid header"));
            }
            if header.used {
                return corrupted(format!("used block {block:p} is in the free list"));
            }
            if header.size < last_size {
                return corrupted(format!(
                    "free list out of order at {block:p}: {} after {last_size}",
                    header.size
                ));
            }
            last_size = header.size;
        }

        let mut regions = 0;
        let mut free_blocks = 0;
        let mut prev: Link<BlockHeader> = None;
        for block in self.catalogue.iter() {
            let header = unsafe { block.as_ref() };
            if !header.is_valid() {
                return corrupted(format!("catalogue entry {block:p} has no valid header"));
            }
            if !header.used {
                free_blocks += 1;
            }
            if BlockHeader::is_region_head(block) {
                regions += 1;
            }

            match prev {
                Some(prev) if unsafe { prev.as_ref().region } == header.region => unsafe {
                    if BlockHeader::end(prev) != block.cast::<u8>() {
                        return corrupted(format!("gap between {prev:p} and {block:p}"));
                    }
                    if !prev.as_ref().used && !header.used {
                        return corrupted(format!("free neighbours {prev:p} and {block:p} were not merged"));
                    }
                },
                _ if !BlockHeader::is_region_head(block) => {
                    return corrupted(format!("block {block:p} is detached from its region"));
                }
                _ => {}
            }
            prev = Some(block);
        }

        if regions != self.regions {
            return corrupted(format!("{regions} region heads but {} regions counted", self.regions));
        }
        if free_blocks != self.free_list.len() {
            return corrupted(format!(
                "{free_blocks} free blocks in the catalogue but {} in the free list",
                self.free_list.len()
            ));
        }

        Ok(())
    }
}

fn corrupted(message: String) -> Result<()> {
    Err(AllocError::Corrupted(message))
}

/// General purpose allocator built on anonymous memory mappings.
///
/// Every request that cannot be served from the free list maps a new region
/// sized for exactly that request. Freed blocks are merged with their free
/// neighbours inside the same region, and a region that becomes entirely
/// free is unmapped once more than [`Config::retained_regions`] regions are
/// live.
///
/// All the bookkeeping sits behind a single mutex. Mapping a new region is a
/// syscall, so it happens with the lock released: two threads missing the
/// free list at the same time simply map two regions.
///
/// Dropping the allocator unmaps every region, including the ones still
/// backing outstanding pointers.
pub struct MemAlloc {
    heap: Mutex<Heap>,
    config: Config,
}

impl Default for MemAlloc {
    fn default() -> Self {
        Self::new()
    }
}

impl MemAlloc {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        Self {
            heap: Mutex::new(Heap::new(config)),
            config,
        }
    }

    pub fn config(&self) -> Config {
        self.config
    }

    /// Payload size actually reserved for a request of `size` bytes. Zero
    /// gets the minimum block like any other small request.
    fn block_size(&self, size: usize) -> Result<usize> {
        checked_align(size, WORD_SIZE)
            .filter(|aligned| *aligned <= isize::MAX as usize - BLOCK_HEADER_SIZE)
            .map(|aligned| aligned.max(self.config.min_block_size))
            .ok_or(AllocError::SizeOverflow { size })
    }

    /// Allocates at least `size` bytes.
    pub fn try_malloc(&self, size: usize) -> Result<NonNull<u8>> {
        let size = self.block_size(size)?;

        let found = unsafe { self.heap.lock().take_free(size) };
        if let Some(block) = found {
            return Ok(BlockHeader::payload(block));
        }

        let block = region::map_region(size)?;
        unsafe { self.heap.lock().adopt_region(block) };

        Ok(BlockHeader::payload(block))
    }

    /// Allocates `count * size` zeroed bytes.
    pub fn try_calloc(&self, count: usize, size: usize) -> Result<NonNull<u8>> {
        let total = count
            .checked_mul(size)
            .ok_or(AllocError::SizeOverflow { size: usize::MAX })?;
        if total == 0 {
            return Err(AllocError::ZeroSize);
        }

        let ptr = self.try_malloc(total)?;

        // Recycled blocks keep whatever their previous owner wrote.
        unsafe { ptr::write_bytes(ptr.as_ptr(), 0, total) };

        Ok(ptr)
    }

    /// Allocates at least `size` bytes, or returns null when the OS refuses
    /// to map more memory.
    pub fn malloc(&self, size: usize) -> *mut u8 {
        match self.try_malloc(size) {
            Ok(ptr) => ptr.as_ptr(),
            Err(_) => ptr::null_mut(),
        }
    }

    /// Zeroed allocation of `count * size` bytes. Null when the product is
    /// zero, overflows, or the allocation fails.
    pub fn calloc(&self, count: usize, size: usize) -> *mut u8 {
        match self.try_calloc(count, size) {
            Ok(ptr) => ptr.as_ptr(),
            Err(_) => ptr::null_mut(),
        }
    }

    /// Gives a block back. Null is ignored.
    ///
    /// Panics on a double free or on a pointer that does not start a block.
    ///
    /// **SAFETY**: `ptr` must be null or a pointer returned by this allocator,
    /// and must not be used after this call.
    pub unsafe fn free(&self, ptr: *mut u8) {
        let Some(ptr) = NonNull::new(ptr) else {
            return;
        };

        let mut heap = self.heap.lock();
        unsafe {
            let block = BlockHeader::from_payload(ptr);
            heap.free_block(block);
        }
    }

    /// Resizes the block behind `ptr` to hold at least `size` bytes.
    ///
    /// A null `ptr` behaves like [`MemAlloc::malloc`] and a zero `size` frees
    /// the block and returns null. A block that is already big enough is
    /// returned as is; otherwise it grows in place into a free neighbour when
    /// possible, and is moved to a new block when not. On failure null is
    /// returned and the old block is left untouched.
    ///
    /// **SAFETY**: same contract as [`MemAlloc::free`] for `ptr`. When the
    /// returned pointer differs from `ptr`, `ptr` has been freed.
    pub unsafe fn realloc(&self, ptr: *mut u8, size: usize) -> *mut u8 {
        let Some(old) = NonNull::new(ptr) else {
            return self.malloc(size);
        };

        if size == 0 {
            unsafe { self.free(ptr) };
            return ptr::null_mut();
        }

        let Ok(wanted) = self.block_size(size) else {
            return ptr::null_mut();
        };

        let old_size = {
            let mut heap = self.heap.lock();
            unsafe {
                let block = BlockHeader::from_payload(old);
                assert!(block.as_ref().used, "realloc of freed block {old:p}");

                let old_size = block.as_ref().size;
                if old_size >= size || heap.grow_in_place(block, wanted) {
                    return ptr;
                }
                old_size
            }
        };

        let new = self.malloc(size);
        if new.is_null() {
            return new;
        }

        unsafe {
            ptr::copy_nonoverlapping(ptr, new, old_size.min(size));
            self.free(ptr);
        }
        new
    }

    /// Dump of every block in address order followed by the free list.
    pub fn memory_info(&self) -> String {
        self.heap.lock().memory_info()
    }

    /// Every block still in use, or an empty string when there is none.
    pub fn leak_stats(&self) -> String {
        self.heap.lock().leak_stats()
    }

    pub fn stats(&self) -> HeapStats {
        self.heap.lock().stats()
    }

    /// Walks both lists and checks every structural invariant.
    pub fn verify(&self) -> Result<()> {
        self.heap.lock().verify()
    }
}

impl Drop for MemAlloc {
    fn drop(&mut self) {
        unsafe { self.heap.get_mut().release_all() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::{slice, thread};

    /// Deterministic generator so failures replay.
    struct XorShift(u64);

    impl XorShift {
        fn next(&mut self) -> u64 {
            self.0 ^= self.0 << 13;
            self.0 ^= self.0 >> 7;
            self.0 ^= self.0 << 17;
            self.0
        }

        fn below(&mut self, bound: usize) -> usize {
            (self.next() % bound as u64) as usize
        }
    }

    /// Leaves a single retained region with one free block of `size` bytes.
    fn with_free_region(allocator: &MemAlloc, size: usize) -> *mut u8 {
        let ptr = allocator.malloc(size);
        assert!(!ptr.is_null());
        unsafe { allocator.free(ptr) };
        ptr
    }

    fn fill(ptr: *mut u8, len: usize, byte: u8) {
        unsafe { ptr::write_bytes(ptr, byte, len) }
    }

    fn holds(ptr: *mut u8, len: usize, byte: u8) -> bool {
        unsafe { slice::from_raw_parts(ptr, len).iter().all(|&b| b == byte) }
    }

    #[test]
    fn basic_alloc() {
        let allocator = MemAlloc::new();
        let block = allocator.malloc(4).cast::<u32>();

        unsafe {
            *block = 23;
            assert_eq!(23, *block);
            allocator.free(block.cast());
        }

        allocator.verify().unwrap();
    }

    #[test]
    fn zero_and_null_are_edge_cases() {
        let allocator = MemAlloc::new();

        assert!(allocator.calloc(0, 8).is_null());
        assert!(allocator.calloc(8, 0).is_null());
        assert!(matches!(allocator.try_calloc(0, 8), Err(AllocError::ZeroSize)));
        unsafe { allocator.free(ptr::null_mut()) };

        assert_eq!(allocator.stats(), HeapStats::default());
    }

    #[test]
    fn zero_byte_requests_get_the_minimum_block() {
        let allocator = MemAlloc::new();
        let min = allocator.config().min_block_size;

        let block = allocator.malloc(0);
        assert!(!block.is_null());
        assert_eq!(allocator.stats().used_bytes, min);

        let typed = allocator.try_malloc(0).unwrap();
        let fresh = unsafe { allocator.realloc(ptr::null_mut(), 0) };
        assert!(!fresh.is_null());

        let stats = allocator.stats();
        assert_eq!(stats.used_bytes, 3 * min);
        assert_eq!(stats.free_blocks, 0);

        unsafe {
            allocator.free(block);
            allocator.free(typed.as_ptr());
            allocator.free(fresh);
        }
        assert_eq!(allocator.leak_stats(), "");
        allocator.verify().unwrap();
    }

    #[test]
    fn space_for_free_block_is_used() {
        let allocator = MemAlloc::new();

        let first_block = allocator.malloc(4);
        let _ = allocator.malloc(8);
        let _ = allocator.malloc(8);

        unsafe { allocator.free(first_block) };

        let second_block = allocator.malloc(4);
        assert_eq!(first_block, second_block);
    }

    #[test]
    fn small_requests_get_the_minimum_block() {
        let allocator = MemAlloc::new();
        allocator.malloc(1);

        assert_eq!(allocator.stats().used_bytes, allocator.config().min_block_size);
    }

    #[test]
    fn new_region_is_sized_for_the_request() {
        let allocator = MemAlloc::new();
        allocator.malloc(100);

        let stats = allocator.stats();
        assert_eq!(stats.regions, 1);
        assert_eq!(stats.blocks, 1);
        assert_eq!(stats.free_blocks, 0);
        assert_eq!(stats.used_bytes, align(100, WORD_SIZE));
        assert_eq!(stats.mapped_bytes, kernel::page_size());
    }

    #[test]
    fn freeing_neighbours_in_any_order_merges_them() {
        for reverse in [false, true] {
            let allocator = MemAlloc::new();
            with_free_region(&allocator, 1024);

            let a = allocator.malloc(100);
            let b = allocator.malloc(100);
            assert_eq!(allocator.stats().blocks, 3);

            unsafe {
                if reverse {
                    allocator.free(b);
                    allocator.free(a);
                } else {
                    allocator.free(a);
                    allocator.free(b);
                }
            }

            let stats = allocator.stats();
            assert_eq!(stats.blocks, 1);
            assert_eq!(stats.free_blocks, 1);
            assert_eq!(stats.used_bytes, 0);
            assert_eq!(stats.free_bytes, 1024);
            allocator.verify().unwrap();
        }
    }

    #[test]
    fn smallest_sufficient_free_block_is_picked() {
        let allocator = MemAlloc::new();
        let small = allocator.malloc(48);
        let medium = allocator.malloc(200);
        let large = allocator.malloc(1000);

        unsafe {
            allocator.free(large);
            allocator.free(small);
            allocator.free(medium);
        }

        assert_eq!(allocator.malloc(80), medium);
        allocator.verify().unwrap();
    }

    #[test]
    fn split_leaves_a_free_remainder() {
        let allocator = MemAlloc::new();
        let block = with_free_region(&allocator, 1000);

        assert_eq!(allocator.malloc(16), block);

        let stats = allocator.stats();
        assert_eq!(stats.blocks, 2);
        assert_eq!(stats.used_bytes, 16);
        assert_eq!(stats.free_bytes, 1000 - 16 - BLOCK_HEADER_SIZE);
    }

    #[test]
    fn split_happens_exactly_at_the_threshold() {
        let allocator = MemAlloc::new();
        let min = allocator.config().min_block_size;
        let block = with_free_region(&allocator, 1000);

        // Leftover is exactly one header plus the minimum block.
        assert_eq!(allocator.malloc(1000 - BLOCK_HEADER_SIZE - min), block);

        let stats = allocator.stats();
        assert_eq!(stats.blocks, 2);
        assert_eq!(stats.free_bytes, min);
    }

    #[test]
    fn small_leftover_is_handed_over_unsplit() {
        let allocator = MemAlloc::new();
        let min = allocator.config().min_block_size;
        let block = with_free_region(&allocator, 1000);

        // One word short of what a split needs.
        assert_eq!(allocator.malloc(1000 - BLOCK_HEADER_SIZE - min + WORD_SIZE), block);

        let stats = allocator.stats();
        assert_eq!(stats.blocks, 1);
        assert_eq!(stats.free_blocks, 0);
        assert_eq!(stats.used_bytes, 1000);
    }

    #[test]
    fn regions_below_the_threshold_are_retained() {
        let allocator = MemAlloc::with_config(Config::default().with_retained_regions(2));
        let blocks: Vec<_> = (0..2).map(|_| allocator.malloc(256)).collect();

        for block in blocks {
            unsafe { allocator.free(block) };
        }

        assert_eq!(allocator.stats().regions, 2);
        assert!(allocator.memory_info().starts_with("-- BlockList[2/2] --"));
    }

    #[test]
    fn regions_above_the_threshold_are_released() {
        let allocator = MemAlloc::with_config(Config::default().with_retained_regions(2));
        let blocks: Vec<_> = (0..3).map(|_| allocator.malloc(256)).collect();
        assert!(allocator.memory_info().starts_with("-- BlockList[3/3] --"));

        for block in blocks {
            unsafe { allocator.free(block) };
        }

        let stats = allocator.stats();
        assert_eq!(stats.regions, 2);
        assert_eq!(stats.free_blocks, 2);
        assert_eq!(stats.mapped_bytes, 2 * kernel::page_size());
        assert!(allocator.memory_info().starts_with("-- BlockList[2/2] --"));
        allocator.verify().unwrap();
    }

    #[test]
    fn partially_used_region_is_never_released() {
        let allocator = MemAlloc::with_config(Config::default().with_retained_regions(1));
        with_free_region(&allocator, 1024);

        let a = allocator.malloc(64);
        let b = allocator.malloc(64);
        let c = allocator.malloc(4096);
        assert_eq!(allocator.stats().regions, 2);

        // Over the threshold, but `a` still lives in the first region.
        unsafe { allocator.free(b) };
        assert_eq!(allocator.stats().regions, 2);

        unsafe { allocator.free(c) };
        assert_eq!(allocator.stats().regions, 1);

        // Back at the threshold, so the now empty first region is retained.
        unsafe { allocator.free(a) };
        let stats = allocator.stats();
        assert_eq!(stats.regions, 1);
        assert_eq!(stats.free_bytes, 1024);
    }

    #[test]
    fn realloc_grows_into_the_free_successor() {
        let allocator = MemAlloc::new();
        with_free_region(&allocator, 1024);

        let a = allocator.malloc(64);
        let b = allocator.malloc(64);
        fill(a, 64, 0x5A);
        unsafe { allocator.free(b) };

        let grown = unsafe { allocator.realloc(a, 128) };
        assert_eq!(grown, a);
        assert!(holds(grown, 64, 0x5A));

        let stats = allocator.stats();
        assert_eq!(stats.used_bytes, 128);
        assert_eq!(stats.blocks, 2);
        allocator.verify().unwrap();
    }

    #[test]
    fn realloc_moves_when_it_cannot_grow() {
        let allocator = MemAlloc::new();
        let a = allocator.malloc(32);
        let _b = allocator.malloc(32);
        fill(a, 32, 0xC3);

        let moved = unsafe { allocator.realloc(a, 4096) };
        assert!(!moved.is_null());
        assert_ne!(moved, a);
        assert!(holds(moved, 32, 0xC3));

        // The old block went back to the free list.
        assert_eq!(allocator.stats().free_blocks, 1);
        allocator.verify().unwrap();
    }

    #[test]
    fn realloc_edge_cases() {
        let allocator = MemAlloc::new();

        let fresh = unsafe { allocator.realloc(ptr::null_mut(), 40) };
        assert!(!fresh.is_null());

        let same = unsafe { allocator.realloc(fresh, 8) };
        assert_eq!(same, fresh);

        assert!(unsafe { allocator.realloc(fresh, 0) }.is_null());
        assert_eq!(allocator.stats().used_bytes, 0);
    }

    #[test]
    fn calloc_zeroes_recycled_memory() {
        let allocator = MemAlloc::new();
        let dirty = allocator.malloc(256);
        fill(dirty, 256, 0xFF);
        unsafe { allocator.free(dirty) };

        let clean = allocator.calloc(16, 16);
        assert_eq!(clean, dirty);
        assert!(holds(clean, 256, 0));

        assert!(allocator.calloc(usize::MAX, 2).is_null());
        assert!(matches!(allocator.try_calloc(usize::MAX, 2), Err(AllocError::SizeOverflow { .. })));
    }

    #[test]
    fn leak_stats_lists_outstanding_blocks() {
        let allocator = MemAlloc::new();
        assert_eq!(allocator.leak_stats(), "");

        let blocks: Vec<_> = (0..5).map(|_| allocator.malloc(96)).collect();
        for block in &blocks[1..] {
            unsafe { allocator.free(*block) };
        }

        let report = allocator.leak_stats();
        assert!(report.starts_with("-- LeakStats["));
        assert_eq!(report.matches("[USED]").count(), 1);
        assert!(report.ends_with("1 blocks lost (96 bytes)"));

        unsafe { allocator.free(blocks[0]) };
        assert_eq!(allocator.leak_stats(), "");
    }

    #[test]
    fn memory_info_lists_both_structures() {
        let allocator = MemAlloc::new();
        with_free_region(&allocator, 512);
        allocator.malloc(64);

        let info = allocator.memory_info();
        assert!(info.starts_with("-- BlockList[1/2] --\n"));
        assert_eq!(info.matches("[USED] [MMAP]").count(), 1);
        assert_eq!(info.matches("[FREE] [MMAP]").count(), 1);
        assert!(info.contains("-- FreeBlockList[1] --\n"));
        assert!(info.contains("-> [NULL]\n"));
        assert!(info.contains(&format!("total {} bytes\n", 512 - BLOCK_HEADER_SIZE)));
    }

    #[test]
    fn mapping_failure_returns_null() {
        let allocator = MemAlloc::new();

        assert!(allocator.malloc(isize::MAX as usize / 2).is_null());
        assert!(matches!(
            allocator.try_malloc(isize::MAX as usize / 2),
            Err(AllocError::MapFailed { .. })
        ));
        assert!(matches!(allocator.try_malloc(usize::MAX), Err(AllocError::SizeOverflow { .. })));
        assert_eq!(allocator.stats(), HeapStats::default());
    }

    #[test]
    #[should_panic(expected = "double free")]
    fn double_free_panics() {
        let allocator = MemAlloc::new();
        let _keep = allocator.malloc(32);
        let block = allocator.malloc(32);

        unsafe {
            allocator.free(block);
            allocator.free(block);
        }
    }

    #[test]
    #[should_panic(expected = "not the start of an allocated block")]
    fn interior_pointer_is_rejected() {
        let allocator = MemAlloc::new();
        let block = allocator.malloc(64);

        unsafe { allocator.free(block.add(WORD_SIZE)) };
    }

    #[test]
    #[should_panic(expected = "not the start of an allocated block")]
    fn pointer_to_a_merged_block_is_rejected() {
        let allocator = MemAlloc::new();
        with_free_region(&allocator, 1024);
        let a = allocator.malloc(64);
        let b = allocator.malloc(64);

        unsafe {
            allocator.free(b);
            // `b` is absorbed into `a` here.
            allocator.free(a);
            allocator.free(b);
        }
    }

    #[test]
    fn random_workload_keeps_every_invariant() {
        let allocator = MemAlloc::with_config(Config::default().with_retained_regions(4));
        let mut rng = XorShift(0x9E37_79B9_7F4A_7C15);
        let mut live: Vec<(*mut u8, usize, u8)> = Vec::new();

        for step in 0..3000usize {
            let tag = (step % 251) as u8;

            match rng.below(4) {
                0 | 1 if live.len() < 400 => {
                    let size = rng.below(10_000) + 1;
                    let ptr = allocator.malloc(size);
                    assert!(!ptr.is_null());
                    fill(ptr, size, tag);
                    live.push((ptr, size, tag));
                }
                2 if !live.is_empty() => {
                    let index = rng.below(live.len());
                    let (ptr, size, old_tag) = live[index];
                    let new_size = rng.below(10_000) + 1;

                    let moved = unsafe { allocator.realloc(ptr, new_size) };
                    assert!(!moved.is_null());
                    assert!(holds(moved, size.min(new_size), old_tag));
                    fill(moved, new_size, tag);
                    live[index] = (moved, new_size, tag);
                }
                _ if !live.is_empty() => {
                    let (ptr, size, tag) = live.swap_remove(rng.below(live.len()));
                    assert!(holds(ptr, size, tag));
                    unsafe { allocator.free(ptr) };
                }
                _ => {}
            }

            if step % 25 == 0 {
                let mut spans: Vec<_> = live.iter().map(|&(ptr, size, _)| (ptr as usize, size)).collect();
                spans.sort_unstable();
                for pair in spans.windows(2) {
                    assert!(pair[0].0 + pair[0].1 <= pair[1].0, "overlapping blocks");
                }
                allocator.verify().unwrap();
            }
        }

        for (ptr, size, tag) in live {
            assert!(holds(ptr, size, tag));
            unsafe { allocator.free(ptr) };
        }

        allocator.verify().unwrap();
        assert_eq!(allocator.leak_stats(), "");
        let stats = allocator.stats();
        assert_eq!(stats.used_bytes, 0);
        // Everything merged back into one free block per region.
        assert_eq!(stats.blocks, stats.regions);
    }

    #[test]
    fn threads_share_one_allocator() {
        let allocator = MemAlloc::new();

        thread::scope(|scope| {
            for seed in 1..=4u64 {
                let allocator = &allocator;
                scope.spawn(move || {
                    let mut rng = XorShift(seed * 0x2545_F491_4F6C_DD1D);
                    let mut mine = Vec::new();

                    for round in 0..500usize {
                        let tag = (seed as u8) ^ (round as u8);
                        let size = rng.below(2048) + 1;
                        let ptr = allocator.malloc(size);
                        assert!(!ptr.is_null());
                        fill(ptr, size, tag);
                        mine.push((ptr as usize, size, tag));

                        if rng.below(2) == 0 {
                            let (ptr, size, tag) = mine.swap_remove(rng.below(mine.len()));
                            assert!(holds(ptr as *mut u8, size, tag));
                            unsafe { allocator.free(ptr as *mut u8) };
                        }
                    }

                    for (ptr, size, tag) in mine {
                        assert!(holds(ptr as *mut u8, size, tag));
                        unsafe { allocator.free(ptr as *mut u8) };
                    }
                });
            }
        });

        allocator.verify().unwrap();
        assert_eq!(allocator.leak_stats(), "");
    }
}
