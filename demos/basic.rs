use blockalloc::MemAlloc;

fn log_alloc(addr: *mut u8, size: usize) {
    println!("Requested {size} bytes of memory");
    println!("Received this address: {addr:?}");
}

fn main() {
    let allocator = MemAlloc::new();

    let addr1 = allocator.malloc(8);
    log_alloc(addr1, 8);

    let addr2 = allocator.malloc(8);
    log_alloc(addr2, 8);

    let addr3 = allocator.calloc(4, 16);
    log_alloc(addr3, 64);

    unsafe {
        allocator.free(addr1);

        // Reuses the block `addr1` left behind.
        let addr4 = allocator.malloc(8);
        log_alloc(addr4, 8);
        println!("Reused: {}", addr1 == addr4);

        let addr5 = allocator.realloc(addr4, 4096);
        log_alloc(addr5, 4096);

        println!("{}", allocator.memory_info());

        allocator.free(addr2);
        allocator.free(addr3);
        allocator.free(addr5);
    }

    println!("{:?}", allocator.stats());
}
