//! Scheduling-class rules. Each submodule owns one class's picking and
//! accounting logic; `sched::task::SchedClass` is a tagged dispatch instead
//! of a function-pointer vtable — callers match on the tag and call
//! straight into the matching module instead of through an indirect call.

pub mod deadline;
pub mod fair;
pub mod idle;
pub mod rt;
