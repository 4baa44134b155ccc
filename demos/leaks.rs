//! Leaves one allocation behind so the leak report has something to say.
//! Run with `BLOCKALLOC_RETAINED_REGIONS=0` to see regions being unmapped.

use blockalloc::{LeakGuard, global, register_exit_report};

fn main() {
    // The guard reports when `main` returns, the hook again at process exit.
    if !register_exit_report() {
        println!("No exit hook on this platform");
    }
    let _guard = LeakGuard::global();

    let allocator = global();
    let kept = allocator.malloc(128);
    let gone = allocator.malloc(256);
    println!("Kept {kept:p}, freeing {gone:p}");

    unsafe { allocator.free(gone) };

    println!("{}", allocator.memory_info());
}
