//! Thread (schedulable entity) and its scheduling-class parameters.
//!
//! `TaskId` allocation and the `New → Ready → Running → {Waiting, Zombie}`
//! state machine follow a conventional `task.rs` shape; the task table
//! itself avoids reaching the current thread through an `extern "Rust" { fn
//! task_table_get_mut }` hack exposing a raw `NonNull<Task>` outside any
//! lock. That hidden-global-state pattern is replaced here with a plain
//! `Mutex<BTreeMap<TaskId, Thread>>` (`sched::TASKS`), and every accessor
//! takes the lock.

use alloc::collections::BTreeMap;
use core::sync::atomic::{AtomicU64, Ordering};

use bitflags::bitflags;
use spin::Mutex;

use crate::arch::contract::CpuContext;
use crate::arch::CpuId;
use crate::memory::AsId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub u64);

static NEXT_TID: AtomicU64 = AtomicU64::new(1);

pub fn alloc_task_id() -> TaskId {
    TaskId(NEXT_TID.fetch_add(1, Ordering::Relaxed))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    New,
    Ready,
    Running,
    Waiting,
    Zombie,
}

bitflags! {
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub struct AffinityMask: u64 {
        const ANY = u64::MAX;
    }
}

impl AffinityMask {
    pub fn single(cpu: CpuId) -> Self {
        AffinityMask::from_bits_truncate(1u64 << cpu.index().min(63))
    }

    pub fn allows(self, cpu: CpuId) -> bool {
        self == AffinityMask::ANY || self.bits() & (1u64 << cpu.index().min(63)) != 0
    }
}

/// Fixed-priority (RT) parameters. Lower `priority` value runs first.
#[derive(Debug, Clone, Copy)]
pub struct RtParams {
    pub priority: u32,
    pub period_ns: u64,
    pub runtime_budget_ns: u64,
    pub round_robin: bool,
}

/// EDF parameters.
#[derive(Debug, Clone, Copy)]
pub struct DeadlineParams {
    pub period_ns: u64,
    pub relative_deadline_ns: u64,
    pub runtime_budget_ns: u64,
    pub deadline_enforced: bool,
    pub criticality: u8,
}

#[derive(Debug, Clone, Copy)]
pub struct FairParams {
    pub nice: i8,
    pub vruntime_ns: u64,
}

impl Default for FairParams {
    fn default() -> Self {
        Self { nice: 0, vruntime_ns: 0 }
    }
}

/// Tagged dispatch replacing a function-pointer vtable: picking rules live
/// in `sched::class::{fair,rt,deadline,idle}`, selected on this tag rather
/// than through an indirect call.
#[derive(Debug, Clone, Copy)]
pub enum SchedClass {
    Deadline(DeadlineParams),
    Rt(RtParams),
    Fair(FairParams),
    Idle,
}

impl SchedClass {
    /// Strict class order: Deadline < Rt < Fair < Idle (lower sorts first).
    pub fn class_rank(&self) -> u8 {
        match self {
            SchedClass::Deadline(_) => 0,
            SchedClass::Rt(_) => 1,
            SchedClass::Fair(_) => 2,
            SchedClass::Idle => 3,
        }
    }
}

pub struct Thread {
    pub id: TaskId,
    pub owner_pid: u64,
    pub as_id: AsId,
    pub state: ThreadState,
    pub class: SchedClass,
    pub assigned_cpu: CpuId,
    pub affinity: AffinityMask,
    pub ctx: CpuContext,
    pub kernel_stack_top: u64,
    pub runtime_ns: u64,
    pub deadline_misses: u64,
    /// Effective priority after priority-inheritance boosting. Only
    /// meaningful for `SchedClass::Rt`; `base_priority` is restored on
    /// unwind.
    pub effective_priority: u32,
    pub base_priority: u32,

    /// Live deadline-class accounting: absolute deadline of the current
    /// period and remaining runtime budget within it.
    pub dl_abs_deadline_ns: u64,
    pub dl_budget_remaining_ns: u64,
    pub dl_period_start_ns: u64,

    /// Live RT round-robin accounting within one priority level.
    pub rt_quantum_remaining_ns: u64,
}

impl Thread {
    pub fn new(owner_pid: u64, as_id: AsId, class: SchedClass, entry: u64, stack_top: u64) -> Self {
        let base_priority = match class {
            SchedClass::Rt(p) => p.priority,
            _ => 0,
        };
        Self {
            id: alloc_task_id(),
            owner_pid,
            as_id,
            state: ThreadState::New,
            class,
            assigned_cpu: CpuId::BSP,
            affinity: AffinityMask::ANY,
            ctx: CpuContext::new(entry, stack_top),
            kernel_stack_top: stack_top,
            runtime_ns: 0,
            deadline_misses: 0,
            effective_priority: base_priority,
            base_priority,
            dl_abs_deadline_ns: 0,
            dl_budget_remaining_ns: 0,
            dl_period_start_ns: 0,
            rt_quantum_remaining_ns: 0,
        }
    }
}

lazy_static::lazy_static! {
    pub static ref TASKS: Mutex<BTreeMap<TaskId, Thread>> = Mutex::new(BTreeMap::new());
}

pub fn insert(thread: Thread) -> TaskId {
    let id = thread.id;
    TASKS.lock().insert(id, thread);
    id
}

pub fn remove(id: TaskId) -> Option<Thread> {
    TASKS.lock().remove(&id)
}
