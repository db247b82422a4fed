//! End-to-end scenarios exercising cross-module behavior. Frame content
//! itself is a no-op in this host-testable model (`address_space::zero_frame`/
//! `copy_frame` have nothing to write to without a hardware direct map), so
//! these check the structural invariants the byte-level behavior reduces
//! to: same frame before a write, distinct frames and refcounts after, PTE
//! flags, admission outcomes, handoff counters, and accumulated runtime.

use crate::memory::address_space::ADDRESS_SPACES;
use crate::memory::frame::{Frame, PFA};
use crate::memory::pte::PteFlags;
use crate::memory::{AddressSpace, FaultAccess, RegionFlags};
use crate::sched::process;
use crate::sched::scheduler;
use crate::sched::task::{RtParams, SchedClass, TaskId, Thread, TASKS};
use crate::sched::{inherit, percpu::PERCPU};
use crate::syscall::{self, capabilities, SyscallError};

fn fresh_caller() -> TaskId {
    let as_id = crate::memory::register(AddressSpace::create(0));
    let pid = process::spawn(None, as_id);
    let thread = Thread::new(pid.0, as_id, SchedClass::Fair(Default::default()), 0, 0);
    let tid = crate::sched::task::insert(thread);
    process::add_thread(pid, tid);
    capabilities::grant(tid, capabilities::Capabilities::all());
    tid
}

/// S1 — fork preserves memory contents: same frame, refcount 2, falls to 1
/// after the child exits.
#[test]
fn s1_fork_preserves_memory() {
    PFA.lock().add_region(0, 4096 * 64);
    let parent = fresh_caller();
    let (_, parent_as) = {
        let tasks = TASKS.lock();
        let t = tasks.get(&parent).unwrap();
        (t.owner_pid, t.as_id)
    };
    {
        let mut spaces = ADDRESS_SPACES.lock();
        let aspace = spaces.get_mut(&parent_as).unwrap();
        aspace.add_region(0x1000_0000, 4096, RegionFlags::ANON | RegionFlags::WRITABLE | RegionFlags::USER, None).unwrap();
        aspace.handle_fault(0x1000_0000, FaultAccess { write: true, user: true, present: false }, &[]).unwrap();
    }

    let child_pid = syscall::fork(parent).unwrap();
    let child_as = process::PROCESSES.lock().get(&child_pid).unwrap().as_id;

    let (parent_frame, child_frame) = {
        let spaces = ADDRESS_SPACES.lock();
        let p = spaces.get(&parent_as).unwrap().translate(0x1000_0000).unwrap();
        let c = spaces.get(&child_as).unwrap().translate(0x1000_0000).unwrap();
        (Frame::from_addr(p), Frame::from_addr(c))
    };
    assert_eq!(parent_frame, child_frame, "fork shares the physical frame until a write");
    assert_eq!(PFA.lock().refcount(parent_frame), 2);

    let child_threads = process::PROCESSES.lock().get(&child_pid).unwrap().threads.clone();
    for tid in child_threads {
        syscall::thread_exit(tid).unwrap();
    }
    crate::memory::destroy_registered(child_as);
    assert_eq!(PFA.lock().refcount(parent_frame), 1);
}

/// S2 — COW copies on first write: child's write gives it a private frame,
/// parent's mapping and refcount are untouched.
#[test]
fn s2_cow_copies_on_write() {
    PFA.lock().add_region(0, 4096 * 64);
    let parent = fresh_caller();
    let parent_as = TASKS.lock().get(&parent).unwrap().as_id;
    {
        let mut spaces = ADDRESS_SPACES.lock();
        let aspace = spaces.get_mut(&parent_as).unwrap();
        aspace.add_region(0x2000_0000, 4096, RegionFlags::ANON | RegionFlags::WRITABLE | RegionFlags::USER, None).unwrap();
        aspace.handle_fault(0x2000_0000, FaultAccess { write: true, user: true, present: false }, &[]).unwrap();
    }
    let child_pid = syscall::fork(parent).unwrap();
    let child_as = process::PROCESSES.lock().get(&child_pid).unwrap().as_id;

    let original_frame = {
        let spaces = ADDRESS_SPACES.lock();
        Frame::from_addr(spaces.get(&parent_as).unwrap().translate(0x2000_0000).unwrap())
    };

    {
        let mut spaces = ADDRESS_SPACES.lock();
        let child = spaces.get_mut(&child_as).unwrap();
        child.handle_fault(0x2000_0000, FaultAccess { write: true, user: true, present: true }, &[]).unwrap();
    }

    let (parent_frame_after, child_frame_after) = {
        let spaces = ADDRESS_SPACES.lock();
        let p = Frame::from_addr(spaces.get(&parent_as).unwrap().translate(0x2000_0000).unwrap());
        let c = Frame::from_addr(spaces.get(&child_as).unwrap().translate(0x2000_0000).unwrap());
        (p, c)
    };
    assert_eq!(parent_frame_after, original_frame, "parent's frame is untouched by the child's COW write");
    assert_ne!(child_frame_after, original_frame, "child's first write breaks sharing onto a private frame");
    assert_eq!(PFA.lock().refcount(original_frame), 1, "only the parent still references the original frame");
}

/// S3 — W^X enforced: a WRITABLE+EXECUTABLE mmap loses exec; mprotect to
/// read+exec loses write; a write after that is rejected.
#[test]
fn s3_wx_enforced_end_to_end() {
    PFA.lock().add_region(0, 4096 * 16);
    let caller = fresh_caller();
    let as_id = TASKS.lock().get(&caller).unwrap().as_id;

    syscall::mmap(caller, 0x3000_0000, 4096, RegionFlags::ANON | RegionFlags::WRITABLE | RegionFlags::USER | RegionFlags::EXECUTABLE).unwrap();
    {
        let mut spaces = ADDRESS_SPACES.lock();
        let aspace = spaces.get_mut(&as_id).unwrap();
        aspace.handle_fault(0x3000_0000, FaultAccess { write: true, user: true, present: false }, &[]).unwrap();
        let flags = aspace.pte_flags(0x3000_0000).unwrap();
        assert!(!flags.is_executable(), "writable mapping must never be executable");
    }

    syscall::mprotect(caller, 0x3000_0000, 4096, PteFlags::PRESENT | PteFlags::USER).unwrap();
    let flags_after = {
        let spaces = ADDRESS_SPACES.lock();
        spaces.get(&as_id).unwrap().pte_flags(0x3000_0000).unwrap()
    };
    assert!(flags_after.is_executable());
    assert!(!flags_after.contains(PteFlags::WRITABLE));

    let write_result = {
        let mut spaces = ADDRESS_SPACES.lock();
        spaces.get_mut(&as_id).unwrap().handle_fault(0x3000_0000, FaultAccess { write: true, user: true, present: true }, &[])
    };
    assert!(write_result.is_err(), "writing a read+exec page must fault");
}

/// S4 — deadline admission: three (2ms/10ms) tasks overcommit the default
/// 0.50 bandwidth on the third; lowering its runtime to 1ms admits it.
#[test]
fn s4_deadline_admission_rejects_then_admits() {
    use crate::sched::task::DeadlineParams;

    let caller = fresh_caller();
    let t1 = fresh_caller();
    let t2 = fresh_caller();
    let t3 = fresh_caller();

    let dl = |runtime_ms: u64| DeadlineParams {
        period_ns: 10_000_000,
        relative_deadline_ns: 10_000_000,
        runtime_budget_ns: runtime_ms * 1_000_000,
        deadline_enforced: false,
        criticality: 0,
    };

    syscall::set_sched(caller, t1, SchedClass::Deadline(dl(2))).unwrap();
    syscall::set_sched(caller, t2, SchedClass::Deadline(dl(2))).unwrap();
    let rejected = syscall::set_sched(caller, t3, SchedClass::Deadline(dl(2)));
    assert_eq!(
        rejected,
        Err(SyscallError::AdmissionRejected(crate::sched::class::deadline::RejectReason::CpuUtilization))
    );

    syscall::set_sched(caller, t3, SchedClass::Deadline(dl(1))).unwrap();
}

/// S5 — priority inheritance unwinds: L boosts to H's priority while H
/// waits, restores on release, and the release is observable via the
/// per-lock handoff counter.
#[test]
fn s5_priority_inheritance_unwinds_with_handoff() {
    let l = crate::sched::task::insert(Thread::new(
        1,
        crate::memory::AsId(1),
        SchedClass::Rt(RtParams { priority: 100, period_ns: 0, runtime_budget_ns: 0, round_robin: false }),
        0,
        0,
    ));
    let lock_id = 42;
    let before_handoffs = inherit::handoff_count(lock_id);

    inherit::boost(l, 10, lock_id);
    assert_eq!(TASKS.lock().get(&l).unwrap().effective_priority, 10);

    inherit::release(l, lock_id);
    assert_eq!(TASKS.lock().get(&l).unwrap().effective_priority, 100);
    assert_eq!(inherit::handoff_count(lock_id), before_handoffs + 1);
}

/// S6 — fairness: two equal-nice Fair threads on one CPU accrue vruntime at
/// the same rate, so over an equal number of ticks each gets within ±4% of
/// the other's runtime.
#[test]
fn s6_fairness_within_bound() {
    let cpu = crate::arch::CpuId(9);
    let a = Thread::new(1, crate::memory::AsId(1), SchedClass::Fair(Default::default()), 0, 0);
    let b = Thread::new(1, crate::memory::AsId(1), SchedClass::Fair(Default::default()), 0, 0);
    let (tid_a, tid_b) = (a.id, b.id);
    TASKS.lock().insert(tid_a, a);
    TASKS.lock().insert(tid_b, b);
    {
        let mut rq = PERCPU.get(cpu).rq.lock();
        rq.enqueue(tid_a, &SchedClass::Fair(Default::default()));
        rq.enqueue(tid_b, &SchedClass::Fair(Default::default()));
    }

    let tick_ns = 1_000_000; // 1 ms
    for _ in 0..1000 {
        let next = PERCPU.get(cpu).rq.lock().pick_next();
        if let Some(cur) = next {
            PERCPU.get(cpu).rq.lock().current = Some(cur);
            scheduler::tick(cpu, tick_ns);
            let mut rq = PERCPU.get(cpu).rq.lock();
            rq.current = None;
            rq.enqueue(cur, &SchedClass::Fair(Default::default()));
        }
    }

    let (rt_a, rt_b) = {
        let tasks = TASKS.lock();
        (tasks.get(&tid_a).unwrap().runtime_ns, tasks.get(&tid_b).unwrap().runtime_ns)
    };
    let total = rt_a + rt_b;
    let share_a = rt_a as f64 / total as f64;
    assert!((0.48..=0.52).contains(&share_a), "share_a = {share_a}");
}
