//! The hardware side of `arch::Contract`: CR3 switches, raw register context
//! switches, `invlpg`, and IPI delivery. `arch::sim` implements the same
//! call shape over plain Rust state for host tests.
//!
//! The scheduler-facing shape (switch by `TaskId`, one `context_switch`
//! entry point) avoids the "hidden global state accessed through ad hoc
//! externs" pattern a raw `extern "Rust" { fn task_table_get_mut }` hack
//! would need.

use x86_64::instructions::tlb;
use x86_64::registers::control::{Cr3, Cr3Flags};
use x86_64::structures::paging::PhysFrame;
use x86_64::{PhysAddr, VirtAddr};

use crate::arch::ipi::IpiReason;
use crate::arch::CpuId;

/// Callee-saved register snapshot for a kernel-mode thread. User-mode entry
/// goes through a trampoline that consumes r12/r13 to pass the entry point
/// and stack pointer.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct CpuContext {
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub rbx: u64,
    pub rbp: u64,
    pub rip: u64,
}

impl CpuContext {
    pub const fn empty() -> Self {
        Self { r15: 0, r14: 0, r13: 0, r12: 0, rbx: 0, rbp: 0, rip: 0 }
    }

    pub fn new(entry: u64, stack_top: u64) -> Self {
        Self { r15: 0, r14: 0, r13: 0, r12: 0, rbx: 0, rbp: stack_top, rip: entry }
    }
}

/// Load `cr3` with the given physical root table address. Flushes the whole
/// TLB unless PCID is enabled (not wired; `vesper-pcid` reserved for later).
pub unsafe fn switch_aspace(cr3_phys: u64) {
    let frame = PhysFrame::containing_address(PhysAddr::new(cr3_phys));
    Cr3::write(frame, Cr3Flags::empty());
}

/// Invalidate a single TLB entry for `vaddr` on this CPU. Cross-CPU
/// invalidation is the caller's job via `send_ipi(TlbShootdown)`.
pub fn invlpg(vaddr: u64) {
    tlb::flush(VirtAddr::new(vaddr));
}

/// Save `*from`, load `*to`, and resume execution in `to`'s context. Never
/// returns to the caller on the `from` side until `from` is switched back
/// in by a later call with the roles reversed.
#[unsafe(naked)]
pub unsafe extern "C" fn context_switch(from: *mut CpuContext, to: *const CpuContext) {
    core::arch::naked_asm!(
        "mov [rdi + 0x00], r15",
        "mov [rdi + 0x08], r14",
        "mov [rdi + 0x10], r13",
        "mov [rdi + 0x18], r12",
        "mov [rdi + 0x20], rbx",
        "mov [rdi + 0x28], rbp",
        "mov rax, [rsp]",
        "mov [rdi + 0x30], rax",
        "mov r15, [rsi + 0x00]",
        "mov r14, [rsi + 0x08]",
        "mov r13, [rsi + 0x10]",
        "mov r12, [rsi + 0x18]",
        "mov rbx, [rsi + 0x20]",
        "mov rbp, [rsi + 0x28]",
        "mov rax, [rsi + 0x30]",
        "mov [rsp], rax",
        "ret",
    );
}

/// Deliver `reason` to `cpu`. Without the local/IO-APIC driver wired
/// (`vesper-apic` reserved) this enqueues into the mailbox and relies on the
/// target CPU's next timer tick to drain it rather than sending a real
/// interrupt — acceptable for `Resched`/`MigrationRequest`, best-effort for
/// `TlbShootdown`, whose caller already has a timeout fallback.
pub fn send_ipi(cpu: CpuId, reason: IpiReason) {
    crate::arch::ipi::send(cpu, reason);
}

/// Monotonic nanosecond clock, used to bound the TLB-shootdown ack wait.
pub fn now_ns() -> u64 {
    crate::arch::x86_64::time::now_ns()
}
