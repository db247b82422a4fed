//! Process table: a container of threads sharing an `AddressSpace`.
//!
//! `spawn`/`fork`/`exit`/`wait` operate at the process level, and a process
//! is a container of threads created by spawn or fork and terminated when
//! its last thread exits; the table backing that lifecycle wasn't
//! otherwise specified. Grounded on the same id-table redesign as
//! `sched::task`: a `Pid` plus a central `BTreeMap`, replacing intrusive
//! parent/child back-pointers with lookups.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

use crate::memory::AsId;
use crate::sched::task::TaskId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pid(pub u64);

static NEXT_PID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Running,
    Exited(i32),
}

pub struct Process {
    pub pid: Pid,
    pub parent: Option<Pid>,
    pub as_id: AsId,
    pub threads: Vec<TaskId>,
    pub status: ExitStatus,
}

lazy_static::lazy_static! {
    pub static ref PROCESSES: Mutex<BTreeMap<Pid, Process>> = Mutex::new(BTreeMap::new());
}

pub fn spawn(parent: Option<Pid>, as_id: AsId) -> Pid {
    let pid = Pid(NEXT_PID.fetch_add(1, Ordering::Relaxed));
    PROCESSES.lock().insert(pid, Process { pid, parent, as_id, threads: Vec::new(), status: ExitStatus::Running });
    pid
}

pub fn add_thread(pid: Pid, tid: TaskId) {
    if let Some(p) = PROCESSES.lock().get_mut(&pid) {
        p.threads.push(tid);
    }
}

pub fn remove_thread(pid: Pid, tid: TaskId) -> bool {
    let mut procs = PROCESSES.lock();
    if let Some(p) = procs.get_mut(&pid) {
        p.threads.retain(|&t| t != tid);
        p.threads.is_empty()
    } else {
        false
    }
}

pub fn exit(pid: Pid, code: i32) {
    if let Some(p) = PROCESSES.lock().get_mut(&pid) {
        p.status = ExitStatus::Exited(code);
    }
}

pub fn wait(pid: Pid) -> Option<ExitStatus> {
    PROCESSES.lock().get(&pid).map(|p| p.status)
}

pub fn reap(pid: Pid) -> Option<Process> {
    PROCESSES.lock().remove(&pid)
}
