//! Priority inheritance: boost a lock holder to the priority of whichever
//! waiter outranks it, composing transitively across chains of held locks,
//! and unwinding in the stack order the boosts were applied.
//!
//! Built on a `sync/mutex.rs`-style wait-queue shape, generalized to an
//! explicit boost stack instead of a single `saved_priority` field, which
//! can't represent a thread holding two boosted locks at once.

use alloc::vec::Vec;

use spin::Mutex;

use crate::sched::task::{TaskId, TASKS};

/// One outstanding boost: `waiter` out-prioritised `holder` by blocking on
/// `lock_id`. Popped in LIFO order as locks release, so a thread holding
/// several boosted locks unwinds to the next-highest boost, not straight to
/// its base priority.
#[derive(Debug, Clone, Copy)]
struct Boost {
    lock_id: u64,
    from_priority: u32,
}

#[derive(Default)]
struct InheritanceState {
    stacks: alloc::collections::BTreeMap<TaskId, Vec<Boost>>,
    /// Counts completed boost→unwind cycles per lock, for tests asserting a
    /// handoff actually happened.
    handoffs: alloc::collections::BTreeMap<u64, u64>,
}

lazy_static::lazy_static! {
    static ref STATE: Mutex<InheritanceState> = Mutex::new(InheritanceState::default());
}

/// `waiter` blocks on `lock_id` held by `holder`. If `waiter` outranks
/// `holder` (numerically lower RT priority), push a boost and raise
/// `holder.effective_priority` to match. Recurses if `holder` is itself
/// waiting on another lock, so the boost composes transitively up the chain.
pub fn boost(holder: TaskId, waiter_priority: u32, lock_id: u64) {
    let mut tasks = TASKS.lock();
    let Some(holder_thread) = tasks.get_mut(&holder) else { return };
    if waiter_priority >= holder_thread.effective_priority {
        return;
    }
    let from = holder_thread.effective_priority;
    holder_thread.effective_priority = waiter_priority;
    drop(tasks);

    STATE.lock().stacks.entry(holder).or_default().push(Boost { lock_id, from_priority: from });
}

/// `holder` releases `lock_id`: pop its boost and restore the priority in
/// effect before that boost was applied (the next entry down the stack, or
/// `base_priority` if none remain). Increments the per-lock handoff counter.
pub fn release(holder: TaskId, lock_id: u64) {
    let mut state = STATE.lock();
    let Some(stack) = state.stacks.get_mut(&holder) else { return };
    let Some(pos) = stack.iter().rposition(|b| b.lock_id == lock_id) else { return };
    let popped = stack.remove(pos);
    *state.handoffs.entry(lock_id).or_insert(0) += 1;
    let restore_to = stack.last().map(|b| b.from_priority).unwrap_or(popped.from_priority);
    if stack.is_empty() {
        state.stacks.remove(&holder);
    }
    drop(state);

    if let Some(t) = TASKS.lock().get_mut(&holder) {
        t.effective_priority = restore_to;
    }
}

#[cfg(test)]
pub fn handoff_count(lock_id: u64) -> u64 {
    STATE.lock().handoffs.get(&lock_id).copied().unwrap_or(0)
}
