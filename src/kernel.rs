use std::{io, ptr::NonNull, sync::atomic::{AtomicUsize, Ordering}};

use crate::error::{AllocError, Result};

/// Virtual memory page size of the computer. This is usually 4096.
/// Zero until the first query.
static PAGE_SIZE: AtomicUsize = AtomicUsize::new(0);

/// The allocator's view of the operating system. Regions come from here and
/// go back here, nothing else in the crate issues memory syscalls.
pub(crate) struct Kernel;

/// This trait provides an abstraction to handle low level memory operations
/// and syscalls. As the allocator, our top level view of this, has nothing
/// to do with the concrete implementations / APIs offered by each kernel.
trait PlatformMemory {
    /// Request a zeroed, page aligned memory region of at least `len` bytes.
    unsafe fn request_memory(len: usize) -> io::Result<NonNull<u8>>;

    /// Returns the memory of size `len` starting from `addr` back to the kernel.
    unsafe fn return_memory(addr: NonNull<u8>, len: usize) -> io::Result<()>;

    /// Returns the virtual memory page size of the computer in bytes.
    fn page_size() -> usize;
}

/// Wrapper to calculate the computer's page size. The value is cached after
/// the first call.
#[inline]
pub(crate) fn page_size() -> usize {
    match PAGE_SIZE.load(Ordering::Relaxed) {
        0 => {
            let size = Kernel::page_size();
            PAGE_SIZE.store(size, Ordering::Relaxed);
            size
        }
        size => size,
    }
}

/// Maps a fresh region of `len` bytes. Failures are logged and returned,
/// never retried.
pub(crate) fn acquire(len: usize) -> Result<NonNull<u8>> {
    match unsafe { Kernel::request_memory(len) } {
        Ok(addr) => Ok(addr),
        Err(source) => {
            log::error!("mmap failed, size: {len}, error: {source}");
            Err(AllocError::MapFailed { size: len, source })
        }
    }
}

/// Unmaps a region previously returned by [`acquire`].
///
/// **SAFETY**: `addr` and `len` must describe a whole region from [`acquire`]
/// and nothing may touch that memory afterwards.
pub(crate) unsafe fn release(addr: NonNull<u8>, len: usize) -> Result<()> {
    match unsafe { Kernel::return_memory(addr, len) } {
        Ok(()) => Ok(()),
        Err(source) => {
            log::error!("munmap failed, addr: {addr:p}, size: {len}, error: {source}");
            Err(AllocError::UnmapFailed { addr: addr.as_ptr() as usize, size: len, source })
        }
    }
}

#[cfg(unix)]
mod unix {
    use super::{Kernel, PlatformMemory};

    use libc::{mmap, munmap, off_t, size_t};

    use std::{io, os::raw::{c_int, c_void}, ptr::NonNull};

    impl PlatformMemory for Kernel {
        unsafe fn request_memory(len: usize) -> io::Result<NonNull<u8>> {
            // mmap parameters.
            const ADDR: *mut c_void = std::ptr::null_mut::<c_void>();
            // Read-Write only memory.
            const PROT: c_int = libc::PROT_READ | libc::PROT_WRITE;
            const FLAGS: c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
            const FD: c_int = -1;
            const OFFSET: off_t = 0;

            unsafe {
                let addr = mmap(ADDR, len as size_t, PROT, FLAGS, FD, OFFSET);

                match addr {
                    libc::MAP_FAILED => Err(io::Error::last_os_error()),
                    addr => NonNull::new(addr.cast::<u8>())
                        .ok_or_else(|| io::Error::from(io::ErrorKind::OutOfMemory)),
                }
            }
        }

        unsafe fn return_memory(addr: NonNull<u8>, len: usize) -> io::Result<()> {
            unsafe {
                match munmap(addr.as_ptr().cast::<c_void>(), len as size_t) {
                    0 => Ok(()),
                    _ => Err(io::Error::last_os_error()),
                }
            }
        }

        fn page_size() -> usize {
            unsafe { libc::sysconf(libc::_SC_PAGE_SIZE) as usize }
        }
    }
}

#[cfg(windows)]
mod windows {
    use std::{io, mem::MaybeUninit, os::raw::c_void, ptr::NonNull};

    use super::{Kernel, PlatformMemory};

    use windows::Win32::System::{Memory, SystemInformation};

    impl PlatformMemory for Kernel {
        unsafe fn request_memory(len: usize) -> io::Result<NonNull<u8>> {
            // Read-Write only.
            let protection = Memory::PAGE_READWRITE;

            let flags = Memory::MEM_RESERVE | Memory::MEM_COMMIT;

            unsafe {
                let addr = Memory::VirtualAlloc(None, len, flags, protection);

                NonNull::new(addr.cast::<u8>()).ok_or_else(io::Error::last_os_error)
            }
        }

        unsafe fn return_memory(addr: NonNull<u8>, _len: usize) -> io::Result<()> {
            // MEM_RELEASE always frees the whole reservation, which is exactly one region.
            unsafe {
                Memory::VirtualFree(addr.as_ptr().cast::<c_void>(), 0, Memory::MEM_RELEASE)
                    .map_err(|_| io::Error::last_os_error())
            }
        }

        fn page_size() -> usize {
            unsafe {
                let mut system_info = MaybeUninit::uninit();
                SystemInformation::GetSystemInfo(system_info.as_mut_ptr());

                system_info.assume_init().dwPageSize as usize
            }
        }
    }
}
