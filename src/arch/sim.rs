//! Host-testable stand-in for `arch::x86_64::contract`. Same call shape,
//! no hardware: `switch_aspace` and `invlpg` just record what would have
//! happened so scheduler/VMM unit tests can assert on them, and
//! `context_switch` copies the context struct directly instead of doing a
//! real register save/restore (there is no "this call never returns" on the
//! host — the policy layer under test never actually resumes a different
//! instruction pointer).

use core::sync::atomic::{AtomicU64, Ordering};

use crate::arch::ipi::IpiReason;
use crate::arch::CpuId;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
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

static CURRENT_CR3: AtomicU64 = AtomicU64::new(0);
static INVLPG_COUNT: AtomicU64 = AtomicU64::new(0);

pub unsafe fn switch_aspace(cr3_phys: u64) {
    CURRENT_CR3.store(cr3_phys, Ordering::SeqCst);
}

pub fn invlpg(_vaddr: u64) {
    INVLPG_COUNT.fetch_add(1, Ordering::SeqCst);
}

pub unsafe fn context_switch(from: *mut CpuContext, to: *const CpuContext) {
    *from = *from;
    let next = *to;
    core::ptr::write(from, next);
}

pub fn send_ipi(cpu: CpuId, reason: IpiReason) {
    crate::arch::ipi::send(cpu, reason);
    if let IpiReason::TlbShootdown { .. } = reason {
        // No real interrupt delivery on the host: model the target CPU as
        // having processed the shootdown synchronously, same as it would
        // after draining its mailbox on the next tick in a real run.
        crate::memory::tlb::ack_from_ipi(cpu);
    }
}

static CLOCK_NS: AtomicU64 = AtomicU64::new(0);

/// Fake monotonic clock: advances a fixed step per read so timeout loops in
/// tests terminate deterministically without a real timer.
pub fn now_ns() -> u64 {
    CLOCK_NS.fetch_add(1_000, Ordering::Relaxed)
}

#[cfg(test)]
pub fn current_cr3() -> u64 {
    CURRENT_CR3.load(Ordering::SeqCst)
}

#[cfg(test)]
pub fn invlpg_count() -> u64 {
    INVLPG_COUNT.load(Ordering::SeqCst)
}
