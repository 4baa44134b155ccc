//! General purpose `malloc`/`free`/`calloc`/`realloc` built on anonymous
//! memory mappings.
//!
//! Every allocation is a block: a header immediately followed by the bytes
//! handed to the caller.
//!
//! ```text
//! +-------------------------------+
//! | Header   | Actual memory block|
//! +-------------------------------+
//!            ^
//!            returned pointer
//! ```
//!
//! Blocks are carved out of regions, one region per mapping call. Each block
//! is threaded through two intrusive lists at once: the catalogue of every
//! block in address order, used to find the neighbours a freed block merges
//! with, and the free list sorted by size, used to find the smallest free
//! block that fits a request.
//!
//! ```text
//!                         Free List (ascending size)
//!                 +-------------------------------------+
//!                 |                                     v
//! +---------------|------------------+      +-------------------+
//! | +-------+  +--|---+  +-------+   |      |  +-------+        |
//! | | Block |->| Free |->| Block |   | ---> |  | Free  | ...    |   Catalogue
//! | +-------+  +------+  +-------+   |      |  +-------+        |
//! +----------------------------------+      +-------------------+
//!               region                           region
//! ```
//!
//! [`MemAlloc`] is the allocator itself; [`global`] hands out a process-wide
//! instance and [`LeakGuard`]/[`register_exit_report`] print what is still
//! allocated when the process is done.

mod allocator;
mod block;
mod catalogue;
mod config;
mod error;
mod freelist;
mod global;
mod kernel;
mod list;
mod memalloc;
mod region;
mod utils;

pub use allocator::{MemoryAllocator, UNSUPPORTED};
#[cfg(unix)]
pub use allocator::SystemAllocator;
pub use config::{Config, DEFAULT_MIN_BLOCK_SIZE, DEFAULT_RETAINED_REGIONS};
pub use error::{AllocError, Result};
pub use global::{LeakGuard, default_allocator, global, register_exit_report, report_leaks};
pub use memalloc::{HeapStats, MemAlloc};

/// Bytes of bookkeeping in front of every block.
pub const BLOCK_HEADER_SIZE: usize = block::BLOCK_HEADER_SIZE;
