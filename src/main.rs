//! Freestanding hardware entrypoint.
//!
//! A `src/main.rs`/`src/lib.rs` split: this binary target is the bare-metal
//! `_start` that a bootloader jumps into. All real policy lives in
//! `vesper_kernel_lib`; this file only wires boot-time initialisation order
//! (PFA from memory map → kernel address space → per-CPU idle threads →
//! first user process).

#![no_std]
#![no_main]
#![feature(abi_x86_interrupt)]

use core::panic::PanicInfo;

use vesper_kernel_lib::arch::x86_64::{gdt, idt, serial};
use vesper_kernel_lib::kernel::{Kernel, MemoryRegion};
use vesper_kernel_lib::log;

/// Physical memory map handed off by the bootloader. A real boot protocol
/// (limine/multiboot2/UEFI) would parse this from its own struct; the shape
/// here is deliberately minimal since boot-protocol parsing is out of the
/// scheduler/VMM core's scope.
#[repr(C)]
pub struct BootInfo {
    pub regions: &'static [MemoryRegion],
}

#[no_mangle]
pub extern "C" fn _start(info: &'static BootInfo) -> ! {
    serial::init();
    log::init(log::serial::SerialLogger);
    gdt::init();
    idt::init(0);

    let kernel = Kernel::boot(info.regions);
    log::log_info!("boot", "vesper kernel online, {} cpus", kernel.num_cpus());

    kernel.enter_idle()
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    log::log_err!("panic", "{}", info);
    loop {
        unsafe { core::arch::asm!("hlt", options(nomem, nostack, preserves_flags)) }
    }
}

#[alloc_error_handler]
fn alloc_error(layout: core::alloc::Layout) -> ! {
    log::log_err!("heap", "allocation failure: {:?}", layout);
    loop {
        unsafe { core::arch::asm!("hlt", options(nomem, nostack, preserves_flags)) }
    }
}
