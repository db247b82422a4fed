//! TLB shootdown bookkeeping.
//!
//! Shootdown acknowledgement is an architecture-defined policy choice, made
//! here as: `protect`/`unmap_page` block until every targeted CPU
//! acknowledges the invalidation, or `TLB_SHOOTDOWN_ACK_TIMEOUT_NS` elapses,
//! in which case `IpiLost` is raised as a kernel invariant violation, not a
//! recoverable condition — callers should treat it as fatal rather than
//! retry.

use alloc::vec::Vec;

use hashbrown::{HashMap, HashSet};
use spin::Mutex;

use crate::arch::contract;
use crate::arch::ipi::IpiReason;
use crate::arch::CpuId;
use crate::config::TLB_SHOOTDOWN_ACK_TIMEOUT_NS;
use crate::memory::error::{MemError, MemResult};

struct Tracker {
    next_gen: u64,
    pending: HashMap<u64, HashSet<CpuId>>,
    owed: HashMap<CpuId, Vec<u64>>,
}

impl Tracker {
    const fn new() -> Self {
        Self { next_gen: 0, pending: HashMap::new(), owed: HashMap::new() }
    }
}

static TRACKER: Mutex<Tracker> = Mutex::new(Tracker::new());

/// Invalidate `vaddr` locally and request invalidation on every CPU in
/// `targets` (CPUs whose `current` thread runs in the same address space).
/// Blocks until all targets ack or the timeout elapses.
pub fn shootdown(vaddr: u64, targets: &[CpuId]) -> MemResult<()> {
    contract::invlpg(vaddr);

    if targets.is_empty() {
        return Ok(());
    }

    let gen = {
        let mut t = TRACKER.lock();
        let gen = t.next_gen;
        t.next_gen += 1;
        t.pending.insert(gen, targets.iter().copied().collect());
        for &cpu in targets {
            t.owed.entry(cpu).or_default().push(gen);
        }
        gen
    };

    for &cpu in targets {
        contract::send_ipi(cpu, IpiReason::TlbShootdown { vaddr });
    }

    let start = contract::now_ns();
    loop {
        let done = TRACKER.lock().pending.get(&gen).map_or(true, |s| s.is_empty());
        if done {
            TRACKER.lock().pending.remove(&gen);
            return Ok(());
        }
        if contract::now_ns().saturating_sub(start) > TLB_SHOOTDOWN_ACK_TIMEOUT_NS {
            return Err(MemError::IpiLost);
        }
        core::hint::spin_loop();
    }
}

/// Called from the recipient CPU's `on_ipi` dispatch after it performs the
/// local `invlpg` for every shootdown reason in its mailbox.
pub fn ack_from_ipi(cpu: CpuId) {
    let gens = {
        let mut t = TRACKER.lock();
        t.owed.remove(&cpu).unwrap_or_default()
    };
    let mut t = TRACKER.lock();
    for gen in gens {
        if let Some(set) = t.pending.get_mut(&gen) {
            set.remove(&cpu);
        }
    }
}
