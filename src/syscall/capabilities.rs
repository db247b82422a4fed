//! Capability enforcement for syscall dispatch.
//!
//! `Capability`/`CapabilityToken`/`verify_capability` rekeyed off `TaskId`
//! in a `Mutex<BTreeMap>` instead of a single `static mut CURRENT_TOKEN` —
//! the same hidden-global-state pattern the task table used to have, fixed
//! here the same way `sched::task::TASKS` is.

use alloc::collections::BTreeMap;

use bitflags::bitflags;
use spin::Mutex;

use crate::sched::task::TaskId;

bitflags! {
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub struct Capabilities: u32 {
        const PROCESS     = 1 << 0;
        const THREAD      = 1 << 1;
        const SCHEDULING  = 1 << 2;
        const MEMORY      = 1 << 3;
        const MODULE_LOAD = 1 << 4;
    }
}

lazy_static::lazy_static! {
    static ref TOKENS: Mutex<BTreeMap<TaskId, Capabilities>> = Mutex::new(BTreeMap::new());
}

pub fn grant(tid: TaskId, caps: Capabilities) {
    TOKENS.lock().insert(tid, caps);
}

pub fn revoke(tid: TaskId) {
    TOKENS.lock().remove(&tid);
}

pub fn has(tid: TaskId, required: Capabilities) -> bool {
    TOKENS.lock().get(&tid).map(|c| c.contains(required)).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ungranted_task_has_nothing() {
        assert!(!has(TaskId(999), Capabilities::PROCESS));
    }

    #[test]
    fn grant_then_revoke() {
        let tid = TaskId(1000);
        grant(tid, Capabilities::PROCESS | Capabilities::MEMORY);
        assert!(has(tid, Capabilities::PROCESS));
        assert!(!has(tid, Capabilities::SCHEDULING));
        revoke(tid);
        assert!(!has(tid, Capabilities::PROCESS));
    }
}
