//! Per-CPU state array: a fixed-size array indexed by `CpuId`, each element
//! padded to a cache line so adjacent CPUs' runqueues never false-share,
//! instead of thread-local-via-GS-base indirection through hidden per-CPU
//! globals.

use spin::Mutex;

use crate::arch::CpuId;
use crate::config::MAX_CPUS;
use crate::sched::runqueue::RunQueue;

#[repr(align(64))]
pub struct PerCpu {
    pub rq: Mutex<RunQueue>,
}

impl PerCpu {
    fn new() -> Self {
        Self { rq: Mutex::new(RunQueue::new()) }
    }
}

pub struct PerCpuTable {
    cpus: [PerCpu; MAX_CPUS],
}

impl PerCpuTable {
    pub fn get(&self, cpu: CpuId) -> &PerCpu {
        &self.cpus[cpu.index() % MAX_CPUS]
    }
}

lazy_static::lazy_static! {
    pub static ref PERCPU: PerCpuTable = PerCpuTable {
        cpus: core::array::from_fn(|_| PerCpu::new()),
    };
}
