use crate::memalloc::MemAlloc;

/// What [`MemoryAllocator::memory_info`] and [`MemoryAllocator::leak_stats`]
/// return when an allocator keeps no bookkeeping to report from.
pub const UNSUPPORTED: &str = "unsupported";

/// C-style allocation interface shared by every allocator in this crate.
///
/// Failures are reported the C way: a null pointer. Callers are expected to
/// check for it and run their own out of memory handling.
pub trait MemoryAllocator: Send + Sync {
    /// At least `size` bytes, or null.
    fn malloc(&self, size: usize) -> *mut u8;

    /// **SAFETY**: `ptr` must be null or come from this allocator, and must not
    /// be used afterwards.
    unsafe fn free(&self, ptr: *mut u8);

    /// `count * size` zeroed bytes, or null.
    fn calloc(&self, count: usize, size: usize) -> *mut u8;

    /// **SAFETY**: same contract as [`MemoryAllocator::free`] for `ptr`.
    unsafe fn realloc(&self, ptr: *mut u8, size: usize) -> *mut u8;

    fn memory_info(&self) -> String;

    /// Outstanding allocations, or an empty string when there are none.
    fn leak_stats(&self) -> String;
}

impl MemoryAllocator for MemAlloc {
    fn malloc(&self, size: usize) -> *mut u8 {
        MemAlloc::malloc(self, size)
    }

    unsafe fn free(&self, ptr: *mut u8) {
        unsafe { MemAlloc::free(self, ptr) }
    }

    fn calloc(&self, count: usize, size: usize) -> *mut u8 {
        MemAlloc::calloc(self, count, size)
    }

    unsafe fn realloc(&self, ptr: *mut u8, size: usize) -> *mut u8 {
        unsafe { MemAlloc::realloc(self, ptr, size) }
    }

    fn memory_info(&self) -> String {
        MemAlloc::memory_info(self)
    }

    fn leak_stats(&self) -> String {
        MemAlloc::leak_stats(self)
    }
}

/// Passthrough to the C library allocator, for comparing against
/// [`MemAlloc`] or for consumers that do not want it.
#[cfg(unix)]
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemAllocator;

#[cfg(unix)]
impl MemoryAllocator for SystemAllocator {
    fn malloc(&self, size: usize) -> *mut u8 {
        unsafe { libc::malloc(size).cast() }
    }

    unsafe fn free(&self, ptr: *mut u8) {
        unsafe { libc::free(ptr.cast()) }
    }

    fn calloc(&self, count: usize, size: usize) -> *mut u8 {
        unsafe { libc::calloc(count, size).cast() }
    }

    unsafe fn realloc(&self, ptr: *mut u8, size: usize) -> *mut u8 {
        unsafe { libc::realloc(ptr.cast(), size).cast() }
    }

    fn memory_info(&self) -> String {
        UNSUPPORTED.to_string()
    }

    fn leak_stats(&self) -> String {
        UNSUPPORTED.to_string()
    }
}
