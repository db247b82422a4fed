//! Syscall dispatch surface: the process/thread/scheduling/memory
//! operations exposed as stable entry points consumed by user-facing
//! syscalls. Uses a capability-gated `enforce` pattern, rekeyed on the
//! calling thread's `TaskId` rather than a single ambient token (see
//! `capabilities`).

pub mod capabilities;

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use spin::Mutex;

use crate::memory::address_space::ADDRESS_SPACES;
use crate::memory::pte::PteFlags;
use crate::memory::{AddressSpace, MemError, MemResult, RegionFlags};
use crate::sched::class::deadline::RejectReason;
use crate::sched::process::{self, ExitStatus, Pid};
use crate::sched::scheduler;
use crate::sched::task::{self, AffinityMask, SchedClass, TaskId, ThreadState, TASKS};
use crate::syscall::capabilities::{has, Capabilities};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallError {
    Denied,
    NoSuchThread,
    NoSuchProcess,
    AdmissionRejected(RejectReason),
    Mem(MemError),
}

impl From<MemError> for SyscallError {
    fn from(e: MemError) -> Self {
        SyscallError::Mem(e)
    }
}

fn require(caller: TaskId, caps: Capabilities) -> Result<(), SyscallError> {
    if has(caller, caps) {
        Ok(())
    } else {
        Err(SyscallError::Denied)
    }
}

fn owner_of(tid: TaskId) -> Result<(Pid, crate::memory::AsId), SyscallError> {
    let tasks = TASKS.lock();
    let t = tasks.get(&tid).ok_or(SyscallError::NoSuchThread)?;
    Ok((Pid(t.owner_pid), t.as_id))
}

// ---- Process: spawn, fork, exit, wait ----

pub fn spawn(caller: TaskId, entry: u64, stack_top: u64) -> Result<Pid, SyscallError> {
    require(caller, Capabilities::PROCESS)?;
    let as_id = crate::memory::register(AddressSpace::create(0));
    let pid = process::spawn(None, as_id);
    let thread = task::Thread::new(pid.0, as_id, SchedClass::Fair(Default::default()), entry, stack_top);
    let tid = task::insert(thread);
    process::add_thread(pid, tid);
    capabilities::grant(tid, Capabilities::all());
    scheduler::wakeup(tid);
    Ok(pid)
}

/// `fork()`: clones the caller's address space copy-on-write and spawns a
/// child process with one thread resuming from the caller's saved context.
pub fn fork(caller: TaskId) -> Result<Pid, SyscallError> {
    require(caller, Capabilities::PROCESS)?;
    let (parent_pid, parent_as, ctx, kernel_stack_top) = {
        let tasks = TASKS.lock();
        let t = tasks.get(&caller).ok_or(SyscallError::NoSuchThread)?;
        (Pid(t.owner_pid), t.as_id, t.ctx, t.kernel_stack_top)
    };

    let child_as_id = crate::memory::register(AddressSpace::create(parent_pid.0));
    {
        let mut spaces = ADDRESS_SPACES.lock();
        let mut child = spaces.remove(&child_as_id).expect("just registered above");
        let result: MemResult<()> = match spaces.get_mut(&parent_as) {
            Some(parent) => crate::memory::cow::clone_cow(&mut child, parent),
            None => Ok(()),
        };
        spaces.insert(child_as_id, child);
        result?;
    }

    let child_pid = process::spawn(Some(parent_pid), child_as_id);
    let mut thread = task::Thread::new(child_pid.0, child_as_id, SchedClass::Fair(Default::default()), 0, kernel_stack_top);
    thread.ctx = ctx;
    let tid = task::insert(thread);
    process::add_thread(child_pid, tid);
    capabilities::grant(tid, Capabilities::all());
    scheduler::wakeup(tid);
    Ok(child_pid)
}

fn mark_zombie(tid: TaskId) {
    if let Some(t) = TASKS.lock().get_mut(&tid) {
        t.state = ThreadState::Zombie;
    }
}

/// `exit(code)`: terminates every thread in the caller's process.
pub fn exit(caller: TaskId, code: i32) -> Result<(), SyscallError> {
    let (pid, _) = owner_of(caller)?;
    let tids: Vec<TaskId> = process::PROCESSES
        .lock()
        .get(&pid)
        .map(|p| p.threads.clone())
        .ok_or(SyscallError::NoSuchProcess)?;
    for tid in tids {
        mark_zombie(tid);
        process::remove_thread(pid, tid);
        capabilities::revoke(tid);
    }
    process::exit(pid, code);
    Ok(())
}

pub fn wait(pid: Pid) -> Option<ExitStatus> {
    process::wait(pid)
}

// ---- Thread: thread_create, thread_exit, yield, sleep, set_affinity ----

pub fn thread_create(caller: TaskId, entry: u64, stack_top: u64) -> Result<TaskId, SyscallError> {
    require(caller, Capabilities::THREAD)?;
    let (pid, as_id) = owner_of(caller)?;
    let thread = task::Thread::new(pid.0, as_id, SchedClass::Fair(Default::default()), entry, stack_top);
    let tid = task::insert(thread);
    process::add_thread(pid, tid);
    capabilities::grant(tid, Capabilities::all());
    scheduler::wakeup(tid);
    Ok(tid)
}

/// `thread_exit`: terminates only the calling thread; tears down the
/// process too if it was the last one standing.
pub fn thread_exit(caller: TaskId) -> Result<(), SyscallError> {
    let (pid, _) = owner_of(caller)?;
    mark_zombie(caller);
    let last = process::remove_thread(pid, caller);
    capabilities::revoke(caller);
    if last {
        process::exit(pid, 0);
    }
    Ok(())
}

pub fn yield_now(caller: TaskId) {
    if let Some(t) = TASKS.lock().get(&caller) {
        crate::sched::percpu::PERCPU.get(t.assigned_cpu).rq.lock().need_resched = true;
    }
}

lazy_static::lazy_static! {
    static ref SLEEPERS: Mutex<BTreeMap<TaskId, u64>> = Mutex::new(BTreeMap::new());
}

/// `sleep(ns)`: arms a timed wait. Parks the caller `Waiting`; resolved by
/// `check_sleepers` on the next tick whose clock has passed `wake_at_ns`.
pub fn sleep(caller: TaskId, wake_at_ns: u64) {
    if let Some(t) = TASKS.lock().get_mut(&caller) {
        t.state = ThreadState::Waiting;
    }
    SLEEPERS.lock().insert(caller, wake_at_ns);
}

/// Called from `scheduler::on_timer_tick`'s driver to fire expired sleeps.
pub fn check_sleepers(now_ns: u64) {
    let due: Vec<TaskId> = SLEEPERS
        .lock()
        .iter()
        .filter(|&(_, &at)| at <= now_ns)
        .map(|(&tid, _)| tid)
        .collect();
    for tid in due {
        SLEEPERS.lock().remove(&tid);
        scheduler::wakeup(tid);
    }
}

pub fn set_affinity(caller: TaskId, target: TaskId, mask: AffinityMask) -> Result<(), SyscallError> {
    require(caller, Capabilities::SCHEDULING)?;
    TASKS.lock().get_mut(&target).ok_or(SyscallError::NoSuchThread)?.affinity = mask;
    Ok(())
}

// ---- Scheduling: set_sched, get_sched ----

pub fn set_sched(caller: TaskId, target: TaskId, class: SchedClass) -> Result<(), SyscallError> {
    require(caller, Capabilities::SCHEDULING)?;
    match class {
        SchedClass::Rt(params) => {
            let existing: Vec<_> = TASKS
                .lock()
                .values()
                .filter_map(|t| if let SchedClass::Rt(p) = t.class { Some(p) } else { None })
                .collect();
            if !crate::sched::class::rt::admit(&existing, params) {
                return Err(SyscallError::AdmissionRejected(RejectReason::CpuUtilization));
            }
        }
        SchedClass::Deadline(params) => {
            let existing: Vec<_> = TASKS
                .lock()
                .values()
                .filter_map(|t| if let SchedClass::Deadline(p) = t.class { Some(p) } else { None })
                .collect();
            crate::sched::class::deadline::admit(&existing, params, crate::config::DEFAULT_DEADLINE_BANDWIDTH)
                .map_err(SyscallError::AdmissionRejected)?;
        }
        SchedClass::Fair(_) | SchedClass::Idle => {}
    }
    TASKS.lock().get_mut(&target).ok_or(SyscallError::NoSuchThread)?.class = class;
    Ok(())
}

pub fn get_sched(target: TaskId) -> Result<SchedClass, SyscallError> {
    TASKS.lock().get(&target).map(|t| t.class).ok_or(SyscallError::NoSuchThread)
}

// ---- Memory: mmap, munmap, mprotect, brk ----

pub fn mmap(caller: TaskId, addr: u64, len: u64, flags: RegionFlags) -> Result<u64, SyscallError> {
    require(caller, Capabilities::MEMORY)?;
    let (_, as_id) = owner_of(caller)?;
    let mut spaces = ADDRESS_SPACES.lock();
    let aspace = spaces.get_mut(&as_id).ok_or(SyscallError::NoSuchThread)?;
    aspace.add_region(addr, len, flags, None)?;
    Ok(addr)
}

pub fn munmap(caller: TaskId, addr: u64, len: u64) -> Result<(), SyscallError> {
    require(caller, Capabilities::MEMORY)?;
    let (_, as_id) = owner_of(caller)?;
    let mut spaces = ADDRESS_SPACES.lock();
    let aspace = spaces.get_mut(&as_id).ok_or(SyscallError::NoSuchThread)?;
    aspace.remove_region(addr, len)?;
    Ok(())
}

pub fn mprotect(caller: TaskId, addr: u64, len: u64, flags: PteFlags) -> Result<(), SyscallError> {
    require(caller, Capabilities::MEMORY)?;
    let (_, as_id) = owner_of(caller)?;
    let mut spaces = ADDRESS_SPACES.lock();
    let aspace = spaces.get_mut(&as_id).ok_or(SyscallError::NoSuchThread)?;
    aspace.protect(addr, len, flags, &[])?;
    Ok(())
}

pub fn brk(caller: TaskId, new_brk: u64) -> Result<u64, SyscallError> {
    require(caller, Capabilities::MEMORY)?;
    let (_, as_id) = owner_of(caller)?;
    let mut spaces = ADDRESS_SPACES.lock();
    let aspace = spaces.get_mut(&as_id).ok_or(SyscallError::NoSuchThread)?;
    aspace.brk = new_brk;
    Ok(new_brk)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::AsId;

    fn boot_caller() -> TaskId {
        let as_id = crate::memory::register(AddressSpace::create(0));
        let pid = process::spawn(None, as_id);
        let thread = task::Thread::new(pid.0, as_id, SchedClass::Fair(Default::default()), 0, 0);
        let tid = task::insert(thread);
        process::add_thread(pid, tid);
        capabilities::grant(tid, Capabilities::all());
        tid
    }

    #[test]
    fn spawn_denied_without_capability() {
        let caller = task::insert(task::Thread::new(1, AsId(1), SchedClass::Fair(Default::default()), 0, 0));
        assert_eq!(spawn(caller, 0, 0), Err(SyscallError::Denied));
    }

    #[test]
    fn fork_shares_memory_until_write() {
        crate::memory::frame::PFA.lock().add_region(0, 4096 * 64);
        let parent = boot_caller();
        let (_, parent_as) = owner_of(parent).unwrap();
        {
            let mut spaces = ADDRESS_SPACES.lock();
            let aspace = spaces.get_mut(&parent_as).unwrap();
            aspace.add_region(0x1000, 4096, RegionFlags::ANON | RegionFlags::WRITABLE | RegionFlags::USER, None).unwrap();
            aspace
                .handle_fault(0x1000, crate::memory::FaultAccess { write: true, user: true, present: false }, &[])
                .unwrap();
        }
        let child_pid = fork(parent).unwrap();
        let child_as = process::PROCESSES.lock().get(&child_pid).unwrap().as_id;
        let mut spaces = ADDRESS_SPACES.lock();
        let child = spaces.get_mut(&child_as).unwrap();
        let flags = child.pte_flags(0x1000).unwrap();
        assert!(!flags.contains(PteFlags::WRITABLE));
        assert!(flags.contains(PteFlags::COW));
    }

    #[test]
    fn set_sched_rejects_overcommitted_rt() {
        let caller = boot_caller();
        let target = boot_caller();
        let hog = crate::sched::task::RtParams { priority: 1, period_ns: 10_000_000, runtime_budget_ns: 4_000_000, round_robin: false };
        set_sched(caller, caller, SchedClass::Rt(hog)).unwrap();
        let res = set_sched(caller, target, SchedClass::Rt(hog));
        assert_eq!(res, Err(SyscallError::AdmissionRejected(RejectReason::CpuUtilization)));
    }
}
