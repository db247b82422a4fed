//! EDF (earliest-deadline-first) class: bandwidth admission control, period
//! rollover, and throttle-vs-kill enforcement on budget exhaustion.

use crate::config::DEFAULT_DEADLINE_BANDWIDTH;
use crate::sched::task::DeadlineParams;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    CpuUtilization,
    MemoryBandwidth,
    DeadlineNotSchedulable,
    IsolationConflict,
    OtherResources,
}

/// EDF admission: accept iff total utilisation stays within the configured
/// per-CPU bandwidth fraction, and the candidate's own runtime fits inside
/// its period (runtime == period is the admissible boundary; runtime >
/// period can never be scheduled regardless of bandwidth headroom).
pub fn admit(existing: &[DeadlineParams], candidate: DeadlineParams, bandwidth: f64) -> Result<(), RejectReason> {
    if candidate.runtime_budget_ns > candidate.period_ns {
        return Err(RejectReason::DeadlineNotSchedulable);
    }
    let util: f64 = existing
        .iter()
        .chain(core::iter::once(&candidate))
        .map(|p| p.runtime_budget_ns as f64 / p.period_ns.max(1) as f64)
        .sum();
    if util > bandwidth {
        return Err(RejectReason::CpuUtilization);
    }
    Ok(())
}

pub fn default_bandwidth() -> f64 {
    DEFAULT_DEADLINE_BANDWIDTH
}

/// Called when the current period elapses: resets the budget and pushes the
/// absolute deadline out by one more period.
pub fn replenish(params: &DeadlineParams, period_start_ns: u64) -> (u64, u64) {
    let new_deadline = period_start_ns + params.relative_deadline_ns;
    (params.runtime_budget_ns, new_deadline)
}

/// Outcome when a thread's budget hits zero before its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrunAction {
    Throttle,
    Kill,
}

pub fn on_overrun(params: &DeadlineParams) -> OverrunAction {
    if params.deadline_enforced {
        OverrunAction::Kill
    } else {
        OverrunAction::Throttle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dl(runtime_ms: u64, period_ms: u64, enforced: bool) -> DeadlineParams {
        DeadlineParams {
            period_ns: period_ms * 1_000_000,
            relative_deadline_ns: period_ms * 1_000_000,
            runtime_budget_ns: runtime_ms * 1_000_000,
            deadline_enforced: enforced,
            criticality: 0,
        }
    }

    #[test]
    fn admits_within_bandwidth() {
        assert!(admit(&[], dl(1, 10, false), 0.5).is_ok());
    }

    #[test]
    fn rejects_over_bandwidth() {
        let existing = [dl(4, 10, false)];
        assert_eq!(admit(&existing, dl(4, 10, false), 0.5), Err(RejectReason::CpuUtilization));
    }

    #[test]
    fn rejects_runtime_exceeding_period() {
        assert_eq!(admit(&[], dl(20, 10, false), 0.5), Err(RejectReason::DeadlineNotSchedulable));
    }

    #[test]
    fn boundary_check_tracks_period_not_relative_deadline() {
        // runtime fits within period but exceeds the shorter relative_deadline:
        // must still admit, since the boundary rule is about period, not
        // relative_deadline.
        let mut p = dl(4, 10, false);
        p.relative_deadline_ns = 2_000_000;
        assert!(admit(&[], p, 0.5).is_ok());
    }

    #[test]
    fn enforced_overrun_kills_unenforced_throttles() {
        assert_eq!(on_overrun(&dl(1, 10, true)), OverrunAction::Kill);
        assert_eq!(on_overrun(&dl(1, 10, false)), OverrunAction::Throttle);
    }
}
