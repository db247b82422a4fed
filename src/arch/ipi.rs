//! Typed inter-processor interrupt messages.
//!
//! Interrupt delivery modeled as typed message variants on a bounded
//! per-CPU queue instead of naked function pointers.
//! `RESCHED`/`TLB_SHOOTDOWN`/`MIGRATION_REQUEST` are the three reasons
//! `on_ipi(cpu, reason)` handles.

use arrayvec::ArrayVec;
use spin::Mutex;

use crate::arch::CpuId;
use crate::config::MAX_CPUS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpiReason {
    Resched,
    TlbShootdown { vaddr: u64 },
    MigrationRequest,
}

const MAILBOX_CAP: usize = 64;

struct Mailbox {
    queue: ArrayVec<IpiReason, MAILBOX_CAP>,
}

struct Mailboxes {
    boxes: [Mailbox; MAX_CPUS],
}

impl Mailboxes {
    fn new() -> Self {
        Mailboxes {
            boxes: core::array::from_fn(|_| Mailbox { queue: ArrayVec::new() }),
        }
    }
}

lazy_static::lazy_static! {
    static ref MAILBOXES: Mutex<Mailboxes> = Mutex::new(Mailboxes::new());
}

/// Deliver `reason` to `cpu`'s mailbox. Drops the message (and logs) if the
/// mailbox is full rather than blocking — interrupt context must not block.
pub fn send(cpu: CpuId, reason: IpiReason) {
    let mut mb = MAILBOXES.lock();
    let idx = cpu.index();
    if idx >= MAX_CPUS {
        return;
    }
    if mb.boxes[idx].queue.try_push(reason).is_err() {
        crate::log_warn!("ipi", "mailbox full for cpu {}, dropping {:?}", idx, reason);
    }
}

/// Drain all pending reasons for `cpu`. Called from `on_ipi`'s dispatch loop.
pub fn drain(cpu: CpuId) -> ArrayVec<IpiReason, MAILBOX_CAP> {
    let mut mb = MAILBOXES.lock();
    let idx = cpu.index();
    if idx >= MAX_CPUS {
        return ArrayVec::new();
    }
    core::mem::replace(&mut mb.boxes[idx].queue, ArrayVec::new())
}

#[cfg(test)]
pub fn pending_count(cpu: CpuId) -> usize {
    MAILBOXES.lock().boxes[cpu.index()].queue.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_then_drain_observes_message() {
        let cpu = CpuId(3);
        send(cpu, IpiReason::Resched);
        send(cpu, IpiReason::TlbShootdown { vaddr: 0x1000 });
        let drained = drain(cpu);
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0], IpiReason::Resched);
        assert_eq!(pending_count(cpu), 0);
    }
}
