//! Kernel boot context: the config bundle and entry points `main.rs` calls.
//!
//! Follows a `main.rs`/`lib.rs` boot-sequence split but gathers state into
//! one `Kernel` value instead of reaching for module-level globals directly
//! — callers get explicit handles through an initialised `Kernel` context
//! rather than ambient statics.

use crate::arch::CpuId;
use crate::config::KernelConfig;
use crate::memory::{AddressSpace, MemError, MemResult};
use crate::sched::class::idle;
use crate::sched::percpu::PERCPU;
use crate::sched::scheduler;
use crate::sched::task::{self, SchedClass};

/// One usable (or reserved) physical range from the boot memory map. The
/// concrete boot protocol (limine/multiboot2/UEFI) that produces these is
/// out of scope — this core targets a generic 64-bit model, not any specific
/// boot protocol's ISA details; this is the minimal shape `Kernel::boot` needs.
#[derive(Clone, Copy)]
pub struct MemoryRegion {
    pub start: u64,
    pub end: u64,
    pub usable: bool,
}

pub struct Kernel {
    pub config: KernelConfig,
}

impl Kernel {
    /// Feeds usable ranges to the frame allocator, brings up the kernel
    /// heap, and parks CPU 0's idle thread on the runqueue. Real AP
    /// bring-up (IPI-driven trampoline to start other cores) is outside
    /// this core's scope; `config.num_cpus` stays 1 until a driver that
    /// owns that sequencing registers more.
    pub fn boot(regions: &[MemoryRegion]) -> Self {
        {
            let mut pfa = crate::memory::PFA.lock();
            for r in regions.iter().filter(|r| r.usable) {
                pfa.add_region(r.start, r.end);
            }
        }

        #[cfg(not(test))]
        crate::memory::heap::init();

        let config = KernelConfig::single_node(1);

        let idle_as = crate::memory::register(AddressSpace::create(0));
        let idle_thread = task::Thread::new(0, idle_as, SchedClass::Idle, 0, 0);
        let idle_tid = task::insert(idle_thread);
        PERCPU.get(CpuId::BSP).rq.lock().enqueue(idle_tid, &SchedClass::Idle);

        crate::log_info!("kernel", "boot complete: {} cpus, idle tid {:?}", config.num_cpus, idle_tid);
        Self { config }
    }

    pub fn num_cpus(&self) -> usize {
        self.config.num_cpus
    }

    /// Runs the idle loop on the calling CPU forever, yielding to
    /// `schedule()` whenever need-resched is set and halting otherwise.
    pub fn enter_idle(&self) -> ! {
        loop {
            scheduler::schedule(CpuId::BSP);
            idle::park();
        }
    }

}

/// Entry point for the page-fault handler (`arch::x86_64::idt`): resolves
/// the fault against the faulting thread's address space. Free-standing
/// (not a `Kernel` method) because the IDT's `extern "x86-interrupt"`
/// handlers fire with no reference to the booted `Kernel` value in scope —
/// only `PERCPU`/`TASKS`/`ADDRESS_SPACES`, which this reaches directly.
pub fn on_page_fault(vaddr: u64, present: bool, write: bool, user: bool) -> MemResult<()> {
    let cpu = CpuId::BSP;
    let current = PERCPU.get(cpu).rq.lock().current;
    let as_id = current
        .and_then(|tid| task::TASKS.lock().get(&tid).map(|t| t.as_id))
        .ok_or(MemError::InvalidRegion)?;

    let mut spaces = crate::memory::address_space::ADDRESS_SPACES.lock();
    let aspace = spaces.get_mut(&as_id).ok_or(MemError::InvalidRegion)?;
    aspace.handle_fault(vaddr, crate::memory::FaultAccess { write, user, present }, &[])
}

/// Entry point for a fatal fault the current thread can't recover from
/// (e.g. `on_page_fault` returning an unrecoverable `MemError`, or an
/// enforced deadline overrun): marks it `Zombie` and reschedules.
pub fn kill_current_thread() {
    let cpu = CpuId::BSP;
    let current = PERCPU.get(cpu).rq.lock().current;
    if let Some(tid) = current {
        if let Some(t) = task::TASKS.lock().get_mut(&tid) {
            t.state = crate::sched::task::ThreadState::Zombie;
        }
        crate::log_warn!("kernel", "killed thread {:?} on fatal fault", tid);
    }
    PERCPU.get(cpu).rq.lock().need_resched = true;
    scheduler::schedule(cpu);
}
