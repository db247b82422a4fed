//! RT FIFO/RR class: fixed priority, admission via a utilisation bound,
//! and rate-monotonic priority (re)assignment.

use crate::config::RT_UTIL_BOUND;
use crate::sched::task::RtParams;

/// RT fixed-priority admission: accept iff adding this task keeps total
/// utilisation at or under `RT_UTIL_BOUND` (Liu & Layland's 0.69 bound).
pub fn admit(existing: &[RtParams], candidate: RtParams) -> bool {
    let util: f64 = existing
        .iter()
        .chain(core::iter::once(&candidate))
        .map(|p| p.runtime_budget_ns as f64 / p.period_ns.max(1) as f64)
        .sum();
    util <= RT_UTIL_BOUND
}

/// Rate-monotonic assignment: shorter period gets the numerically lower
/// (higher) priority. Returns `(original_index, new_priority)` pairs.
pub fn rate_monotonic_priorities(tasks: &[RtParams]) -> alloc::vec::Vec<(usize, u32)> {
    let mut idx: alloc::vec::Vec<usize> = (0..tasks.len()).collect();
    idx.sort_by_key(|&i| tasks[i].period_ns);
    idx.into_iter().enumerate().map(|(prio, i)| (i, prio as u32)).collect()
}
