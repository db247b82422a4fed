//! Architecture-facing contract: `switch_aspace`, `save_context`,
//! `restore_context`, `invlpg`, `send_ipi` — a single interface, not a wire
//! format. Real hardware lives under `x86_64`; `sim` backs the host-testable
//! policy layer with the same call shape as `sched/mod.rs::context_switch`
//! and `memory/virt.rs`'s `invlpg` use.

pub mod ipi;

#[cfg(not(test))]
pub mod x86_64;
#[cfg(test)]
pub mod sim;

#[cfg(not(test))]
pub use self::x86_64::contract;
#[cfg(test)]
pub use sim as contract;

/// Identifies one logical CPU. Per-CPU arrays are indexed by this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct CpuId(pub u32);

impl CpuId {
    pub const BSP: CpuId = CpuId(0);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}
