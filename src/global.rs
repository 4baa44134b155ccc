//! The process-wide allocator and its leak report.
//!
//! Two ways to get the report out: [`register_exit_report`] hooks it into
//! process exit, while a [`LeakGuard`] held by `main` (or a test harness)
//! runs it at a known point when dropped.

use std::sync::{
    Once, OnceLock,
    atomic::{AtomicBool, Ordering},
};

use crate::{
    allocator::{MemoryAllocator, UNSUPPORTED},
    config::Config,
    memalloc::MemAlloc,
};

static GLOBAL: OnceLock<MemAlloc> = OnceLock::new();

/// The shared allocator, built from [`Config::from_env`] on first use and
/// never torn down.
pub fn global() -> &'static MemAlloc {
    GLOBAL.get_or_init(|| MemAlloc::with_config(Config::from_env()))
}

/// [`global`] behind the allocator interface.
pub fn default_allocator() -> &'static dyn MemoryAllocator {
    global()
}

/// Logs the leak report of `allocator` and writes it to stderr.
///
/// Allocators that keep no bookkeeping are skipped.
pub fn report_leaks(allocator: &dyn MemoryAllocator) {
    let info = allocator.leak_stats();

    if info.is_empty() {
        log::warn!("no memory leak found");
    } else if info != UNSUPPORTED {
        log::warn!("{info}");
        eprintln!("{info}");
    }
}

/// Runs [`report_leaks`] on the wrapped allocator when dropped.
pub struct LeakGuard<'a> {
    allocator: &'a dyn MemoryAllocator,
}

impl<'a> LeakGuard<'a> {
    pub fn new(allocator: &'a dyn MemoryAllocator) -> Self {
        Self { allocator }
    }
}

impl LeakGuard<'static> {
    /// Guard over the process-wide allocator.
    pub fn global() -> Self {
        Self::new(default_allocator())
    }
}

impl Drop for LeakGuard<'_> {
    fn drop(&mut self) {
        report_leaks(self.allocator);
    }
}

#[cfg(unix)]
extern "C" fn report_leaks_at_exit() {
    report_leaks(default_allocator());
}

/// Reports the process-wide allocator's leaks at process exit.
///
/// Registering more than once is a no-op. Returns whether the hook is in
/// place, which is never the case outside unix.
pub fn register_exit_report() -> bool {
    static REGISTER: Once = Once::new();
    static REGISTERED: AtomicBool = AtomicBool::new(false);

    REGISTER.call_once(|| {
        #[cfg(unix)]
        REGISTERED.store(unsafe { libc::atexit(report_leaks_at_exit) } == 0, Ordering::Release);
    });

    REGISTERED.load(Ordering::Acquire)
}
