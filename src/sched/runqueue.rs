//! Per-CPU runqueue: four sub-queues in strict priority order (Deadline →
//! RT → Fair → Idle), a `current` slot, and a per-CPU clock.
//!
//! Invariant held throughout: a thread id appears in at most one sub-queue,
//! or is `current`, never both (`enqueue`/`set_current` enforce this by
//! removing from every sub-queue before inserting).

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use crate::sched::task::{SchedClass, TaskId, TASKS};

#[derive(Default)]
pub struct RunQueue {
    deadline: Vec<TaskId>,
    rt: Vec<TaskId>,
    fair: Vec<TaskId>,
    idle: VecDeque<TaskId>,
    pub current: Option<TaskId>,
    pub clock_ns: u64,
    pub need_resched: bool,
}

impl RunQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn remove_everywhere(&mut self, tid: TaskId) {
        self.deadline.retain(|&t| t != tid);
        self.rt.retain(|&t| t != tid);
        self.fair.retain(|&t| t != tid);
        self.idle.retain(|&t| t != tid);
    }

    /// Places `thread` into its class's sub-queue. Ordering within the
    /// sub-queue is decided at `pick_next` time by reading live params from
    /// the task table, so insertion order here doesn't matter except for
    /// FIFO tie-breaking among equal-priority RT tasks.
    pub fn enqueue(&mut self, tid: TaskId, class: &SchedClass) {
        self.remove_everywhere(tid);
        match class {
            SchedClass::Deadline(_) => self.deadline.push(tid),
            SchedClass::Rt(_) => self.rt.push(tid),
            SchedClass::Fair(_) => self.fair.push(tid),
            SchedClass::Idle => self.idle.push_back(tid),
        }
    }

    pub fn dequeue(&mut self, tid: TaskId) {
        self.remove_everywhere(tid);
    }

    pub fn is_empty(&self) -> bool {
        self.deadline.is_empty() && self.rt.is_empty() && self.fair.is_empty() && self.idle.is_empty()
    }

    fn pick_deadline(&mut self) -> Option<TaskId> {
        let tasks = TASKS.lock();
        self.deadline
            .iter()
            .copied()
            .min_by_key(|&tid| {
                let t = tasks.get(&tid);
                (t.map(|t| t.dl_abs_deadline_ns).unwrap_or(u64::MAX), tid.0)
            })
    }

    fn pick_rt(&mut self) -> Option<TaskId> {
        let tasks = TASKS.lock();
        self.rt.iter().copied().min_by_key(|&tid| {
            let t = tasks.get(&tid);
            (t.map(|t| t.effective_priority).unwrap_or(u32::MAX), tid.0)
        })
    }

    fn pick_fair(&mut self) -> Option<TaskId> {
        let tasks = TASKS.lock();
        self.fair.iter().copied().min_by_key(|&tid| {
            let vr = match tasks.get(&tid).map(|t| t.class) {
                Some(SchedClass::Fair(p)) => p.vruntime_ns,
                _ => u64::MAX,
            };
            (vr, tid.0)
        })
    }

    /// Strict class order, then class rule. Removes the chosen thread from
    /// its sub-queue — the caller is expected to set it `current`.
    pub fn pick_next(&mut self) -> Option<TaskId> {
        let next = self
            .pick_deadline()
            .or_else(|| self.pick_rt())
            .or_else(|| self.pick_fair())
            .or_else(|| self.idle.front().copied());

        if let Some(tid) = next {
            self.remove_everywhere(tid);
        }
        next
    }

    pub fn nr_running(&self) -> usize {
        self.deadline.len() + self.rt.len() + self.fair.len()
    }

    pub fn fair_nr_running(&self) -> usize {
        self.fair.len() + self.current.is_some() as usize
    }

    pub fn iter_migratable(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.fair.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::task::{FairParams, Thread, ThreadState};
    use crate::memory::AsId;

    fn fair_thread(vruntime: u64) -> TaskId {
        let mut t = Thread::new(1, AsId(1), SchedClass::Fair(FairParams { nice: 0, vruntime_ns: vruntime }), 0, 0);
        t.state = ThreadState::Ready;
        let id = t.id;
        TASKS.lock().insert(id, t);
        id
    }

    #[test]
    fn picks_lowest_vruntime_fair_thread() {
        let a = fair_thread(1000);
        let b = fair_thread(100);
        let mut rq = RunQueue::new();
        rq.enqueue(a, &SchedClass::Fair(FairParams { nice: 0, vruntime_ns: 1000 }));
        rq.enqueue(b, &SchedClass::Fair(FairParams { nice: 0, vruntime_ns: 100 }));
        assert_eq!(rq.pick_next(), Some(b));
    }

    #[test]
    fn deadline_outranks_fair() {
        let fair = fair_thread(0);
        let mut dl = Thread::new(1, AsId(1), SchedClass::Deadline(crate::sched::task::DeadlineParams {
            period_ns: 10_000_000, relative_deadline_ns: 10_000_000, runtime_budget_ns: 2_000_000,
            deadline_enforced: false, criticality: 0,
        }), 0, 0);
        dl.dl_abs_deadline_ns = 5_000_000;
        let dl_id = dl.id;
        TASKS.lock().insert(dl_id, dl);

        let mut rq = RunQueue::new();
        rq.enqueue(fair, &SchedClass::Fair(Default::default()));
        rq.enqueue(dl_id, &SchedClass::Deadline(crate::sched::task::DeadlineParams {
            period_ns: 10_000_000, relative_deadline_ns: 10_000_000, runtime_budget_ns: 2_000_000,
            deadline_enforced: false, criticality: 0,
        }));
        assert_eq!(rq.pick_next(), Some(dl_id));
    }
}
