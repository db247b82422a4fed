//! Monotonic nanosecond clock, TSC-backed. The scheduler here drives ticks
//! from the PIT/APIC periodic interrupt and only needs `now_ns()` for
//! vruntime/deadline bookkeeping, so no hrtimer heap or timer wheel lives
//! here — `sched::scheduler` owns "what runs next", this module only owns
//! "what time is it".

use core::sync::atomic::{AtomicU64, Ordering};

#[derive(Clone, Copy)]
struct TscScale {
    mul: u64,
    shift: u8,
}

static SCALE_MUL: AtomicU64 = AtomicU64::new(1);
static SCALE_SHIFT: AtomicU64 = AtomicU64::new(0);
static TSC0: AtomicU64 = AtomicU64::new(0);

fn scale() -> TscScale {
    TscScale {
        mul: SCALE_MUL.load(Ordering::Relaxed),
        shift: SCALE_SHIFT.load(Ordering::Relaxed) as u8,
    }
}

#[inline(always)]
fn rdtsc() -> u64 {
    unsafe {
        let hi: u32;
        let lo: u32;
        core::arch::asm!("rdtsc", out("edx") hi, out("eax") lo, options(nomem, nostack, preserves_flags));
        ((hi as u64) << 32) | (lo as u64)
    }
}

fn tsc_to_ns(delta: u64, sc: TscScale) -> u64 {
    ((delta as u128 * sc.mul as u128) >> sc.shift) as u64
}

/// Calibrate against a short busy-wait and latch `t=0`. Called once from the
/// boot CPU; APs inherit the same scale (no per-core TSC drift modeling).
pub fn init() {
    let t0 = rdtsc();
    for _ in 0..10_000 {
        unsafe { core::arch::asm!("lfence", options(nostack, preserves_flags)) };
        core::hint::spin_loop();
    }
    let t1 = rdtsc();
    let delta = (t1 - t0).max(1);
    let cycles_per_us = delta / 10;
    let freq_hz = (cycles_per_us as u128) * 1_000_000;
    let mut shift: u8 = 26;
    let mut mul = ((1_000_000_000u128 << shift) / freq_hz.max(1)).max(1) as u64;
    while mul > (1u64 << 63) {
        shift -= 1;
        mul = ((1_000_000_000u128 << shift) / freq_hz.max(1)) as u64;
    }
    SCALE_MUL.store(mul, Ordering::Relaxed);
    SCALE_SHIFT.store(shift as u64, Ordering::Relaxed);
    TSC0.store(t1, Ordering::Relaxed);
}

pub fn now_ns() -> u64 {
    tsc_to_ns(rdtsc().saturating_sub(TSC0.load(Ordering::Relaxed)), scale())
}
