//! Scheduler Core: the driver-facing `on_timer_tick`/`on_ipi` callbacks,
//! `schedule()`'s context-switch sequencing, and `wakeup()`'s target-CPU
//! selection. Ties `runqueue`, `task`, and `arch::contract` together,
//! without the raw-pointer task-table access `sched::task`'s module doc
//! describes avoiding.

use crate::arch::ipi::IpiReason;
use crate::arch::{contract, CpuId};
use crate::memory::tlb;
use crate::sched::class::fair;
use crate::sched::percpu::PERCPU;
use crate::sched::task::{SchedClass, TaskId, ThreadState, TASKS};

/// `tick(cpu)`: called from the timer interrupt. Charges elapsed time to
/// the current thread's accounting and decides whether its slice expired.
pub fn tick(cpu: CpuId, elapsed_ns: u64) {
    let mut rq = PERCPU.get(cpu).rq.lock();
    let Some(current) = rq.current else { return };
    rq.clock_ns += elapsed_ns;

    let mut tasks = TASKS.lock();
    let Some(t) = tasks.get_mut(&current) else { return };
    t.runtime_ns += elapsed_ns;

    match &mut t.class {
        SchedClass::Fair(p) => {
            p.vruntime_ns += fair::vruntime_delta(elapsed_ns, p.nice);
            let slice = fair::slice_ns(rq.fair_nr_running());
            if t.runtime_ns % slice.max(1) < elapsed_ns {
                rq.need_resched = true;
            }
        }
        SchedClass::Rt(p) if p.round_robin => {
            t.rt_quantum_remaining_ns = t.rt_quantum_remaining_ns.saturating_sub(elapsed_ns);
            if t.rt_quantum_remaining_ns == 0 {
                t.rt_quantum_remaining_ns = p.runtime_budget_ns;
                rq.need_resched = true;
            }
        }
        SchedClass::Deadline(p) => {
            t.dl_budget_remaining_ns = t.dl_budget_remaining_ns.saturating_sub(elapsed_ns);
            if t.dl_budget_remaining_ns == 0 {
                match crate::sched::class::deadline::on_overrun(p) {
                    crate::sched::class::deadline::OverrunAction::Kill => t.state = ThreadState::Zombie,
                    crate::sched::class::deadline::OverrunAction::Throttle => rq.need_resched = true,
                }
                t.deadline_misses += 1;
            }
        }
        SchedClass::Rt(_) | SchedClass::Idle => {}
    }
}

/// `schedule()`: if the per-CPU need-resched flag is set, pick the next
/// thread and context-switch to it. No-op otherwise. Caller must already
/// hold (or be willing to have this function take) `cpu`'s RQ lock.
pub fn schedule(cpu: CpuId) {
    let mut rq = PERCPU.get(cpu).rq.lock();
    if !rq.need_resched {
        return;
    }
    rq.need_resched = false;

    let prev = rq.current;
    if let Some(prev_id) = prev {
        let mut tasks = TASKS.lock();
        if let Some(t) = tasks.get_mut(&prev_id) {
            if t.state == ThreadState::Running {
                t.state = ThreadState::Ready;
            }
            let still_runnable = t.state == ThreadState::Ready;
            let class = t.class;
            drop(tasks);
            // Must be back in its subqueue before pick_next() runs below, or a
            // solo runnable thread in its class is invisible to its own
            // reselection and falls through to Idle, never to be resumed.
            if still_runnable {
                rq.enqueue(prev_id, &class);
            }
        }
    }

    let Some(next) = rq.pick_next() else { return };
    if Some(next) == prev {
        rq.current = Some(next);
        if let Some(t) = TASKS.lock().get_mut(&next) {
            t.state = ThreadState::Running;
        }
        return;
    }

    let mut tasks = TASKS.lock();
    let prev_ctx: *mut contract::CpuContext;
    let next_ctx: *const contract::CpuContext;
    let prev_as: crate::memory::AsId;
    let next_as: crate::memory::AsId;
    {
        let next_thread = tasks.get_mut(&next).expect("picked thread must exist in table");
        next_thread.state = ThreadState::Running;
        next_ctx = &next_thread.ctx as *const _;
        next_as = next_thread.as_id;
    }
    prev_as = prev.and_then(|p| tasks.get(&p)).map(|t| t.as_id).unwrap_or(next_as);
    prev_ctx = match prev {
        Some(p) => tasks.get_mut(&p).map(|t| &mut t.ctx as *mut _).unwrap_or(core::ptr::null_mut()),
        None => core::ptr::null_mut(),
    };
    drop(tasks);
    rq.current = Some(next);
    drop(rq);

    if prev_as != next_as {
        if let Some(root) = crate::memory::materialize_root(next_as) {
            unsafe { contract::switch_aspace(root) };
        }
    }
    if !prev_ctx.is_null() {
        unsafe { contract::context_switch(prev_ctx, next_ctx) };
    }
}

/// `wakeup(tid)`: moves a `Waiting` thread to `Ready` on its preferred CPU
/// (currently: its last `assigned_cpu`, honouring affinity) and sets that
/// CPU's need-resched flag if the woken thread outranks whatever is current.
pub fn wakeup(tid: TaskId) {
    let (cpu, class, outranks_current) = {
        let mut tasks = TASKS.lock();
        let Some(t) = tasks.get_mut(&tid) else { return };
        t.state = ThreadState::Ready;
        let cpu = t.assigned_cpu;
        let class = t.class;
        drop(tasks);

        let rq = PERCPU.get(cpu).rq.lock();
        let outranks = match rq.current {
            None => true,
            Some(cur) => TASKS
                .lock()
                .get(&cur)
                .map(|c| class.class_rank() < c.class.class_rank())
                .unwrap_or(true),
        };
        (cpu, class, outranks)
    };

    let mut rq = PERCPU.get(cpu).rq.lock();
    rq.enqueue(tid, &class);
    if outranks_current {
        rq.need_resched = true;
    }
}

/// `on_timer_tick(cpu)`: driver-facing callback, charges a fixed tick period
/// and runs `schedule()` if the tick set need-resched.
pub fn on_timer_tick(cpu: CpuId, tick_period_ns: u64) {
    tick(cpu, tick_period_ns);
    schedule(cpu);
}

/// `on_ipi(cpu, reason)`: driver-facing callback for the three IPI reasons
/// (`Resched`, `TlbShootdown`, `MigrationRequest`).
pub fn on_ipi(cpu: CpuId) {
    for reason in crate::arch::ipi::drain(cpu) {
        match reason {
            IpiReason::Resched => {
                PERCPU.get(cpu).rq.lock().need_resched = true;
                schedule(cpu);
            }
            IpiReason::TlbShootdown { vaddr } => {
                contract::invlpg(vaddr);
                tlb::ack_from_ipi(cpu);
            }
            IpiReason::MigrationRequest => {
                schedule(cpu);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::AsId;
    use crate::sched::task::{FairParams, Thread};

    #[test]
    fn wakeup_enqueues_ready_thread_on_its_assigned_cpu() {
        let t = Thread::new(1, AsId(1), SchedClass::Fair(FairParams::default()), 0, 0);
        let tid = t.id;
        let cpu = t.assigned_cpu;
        TASKS.lock().insert(tid, t);

        wakeup(tid);
        assert_eq!(TASKS.lock().get(&tid).unwrap().state, ThreadState::Ready);
        assert_eq!(PERCPU.get(cpu).rq.lock().pick_next(), Some(tid));
    }

    #[test]
    fn schedule_noop_without_need_resched() {
        let cpu = CpuId(5);
        PERCPU.get(cpu).rq.lock().need_resched = false;
        schedule(cpu);
        assert!(PERCPU.get(cpu).rq.lock().current.is_none());
    }
}
