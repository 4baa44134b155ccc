//! Several threads sharing one allocator, plus a merge check.

use std::thread;

use blockalloc::MemAlloc;

fn main() {
    let allocator = MemAlloc::new();

    // Merge example: two neighbours carved from the same region come back
    // as one block.
    let region = allocator.malloc(1024);
    unsafe { allocator.free(region) };

    let a = allocator.malloc(64);
    let b = allocator.malloc(64);
    unsafe {
        allocator.free(a);
        allocator.free(b);
    }

    let c = allocator.malloc(128);
    if a == c {
        println!("Correctly reused at {c:p}");
    } else {
        println!("Not correctly reused. A was at {a:p} and C is at {c:p}");
    }
    unsafe { allocator.free(c) };

    thread::scope(|scope| {
        for id in 0..4 {
            let allocator = &allocator;
            scope.spawn(move || {
                for round in 1..=100 {
                    let block = allocator.malloc(round * 8);
                    unsafe {
                        block.write(id as u8);
                        allocator.free(block);
                    }
                }
            });
        }
    });

    println!("{:?}", allocator.stats());
    allocator.verify().expect("heap is consistent");
}
