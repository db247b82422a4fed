//! Kernel heap. `#[global_allocator]` only outside `cfg(test)` — host test
//! builds use `std`'s allocator instead.

#![cfg(not(test))]

use linked_list_allocator::LockedHeap;

pub const HEAP_START: usize = 0x_4444_0000_0000;
pub const HEAP_SIZE: usize = 8 * 1024 * 1024;

#[global_allocator]
static KERNEL_HEAP: LockedHeap = LockedHeap::empty();

/// Maps and initialises the kernel heap. Must run after the boot address
/// space has mappings for `[HEAP_START, HEAP_START + HEAP_SIZE)` installed.
pub fn init() {
    unsafe {
        KERNEL_HEAP.lock().init(HEAP_START as *mut u8, HEAP_SIZE);
    }
    crate::log_info!("memory", "kernel heap online: {} KiB at {:#x}", HEAP_SIZE / 1024, HEAP_START);
}
