//! Periodic load balancer: NUMA-aware migration of fair-class threads from
//! the busiest CPU to the least-loaded one in the same node, with an
//! optional external load hint and deterministic dual-lock ordering.
//!
//! Built on a `sched/balance.rs`-style load-metric shape, against
//! `percpu::PERCPU`/`sched::runqueue::RunQueue` instead of a global
//! thread-array scan.

use crate::arch::CpuId;
use crate::config::{CROSS_NODE_IMBALANCE_THRESHOLD, INTRA_NODE_IMBALANCE_THRESHOLD, KernelConfig};
use crate::sched::percpu::PERCPU;
use crate::sched::task::{SchedClass, TaskId, TASKS};

/// An externally supplied demand signal (e.g. from a power/thermal driver)
/// that scales a CPU's load metric beyond raw `nr_running`. Named interface
/// only: no concrete hint source ships with this core — the load metric is
/// the sum of per-thread weight times average CPU demand, and demand
/// sourcing beyond queue depth is left to whatever driver registers one.
pub trait HintSource: Send + Sync {
    fn demand_factor(&self, cpu: CpuId) -> f32;
}

fn load_of(cpu: CpuId, hint: Option<&dyn HintSource>) -> u64 {
    let rq = PERCPU.get(cpu).rq.lock();
    let base = rq.nr_running() as u64;
    match hint {
        Some(h) => (base as f32 * h.demand_factor(cpu)) as u64,
        None => base,
    }
}

/// One balancing pass: picks a source/destination pair and migrates at most
/// one migratable fair-class thread. Returns the migrated task id, if any.
pub fn rebalance(config: &KernelConfig, hint: Option<&dyn HintSource>) -> Option<TaskId> {
    let candidates: alloc::vec::Vec<CpuId> = (0..config.num_cpus)
        .map(|i| CpuId(i as u32))
        .filter(|&c| !config.is_isolated(c.index()))
        .collect();
    if candidates.len() < 2 {
        return None;
    }

    let mut best: Option<(CpuId, CpuId, u64, bool)> = None;
    for &busy in &candidates {
        for &idle in &candidates {
            if busy == idle {
                continue;
            }
            let same_node = config.numa_node_of_cpu[busy.index()] == config.numa_node_of_cpu[idle.index()];
            let lb = load_of(busy, hint);
            let li = load_of(idle, hint);
            if lb <= li {
                continue;
            }
            let delta = lb - li;
            let threshold = if same_node { INTRA_NODE_IMBALANCE_THRESHOLD } else { CROSS_NODE_IMBALANCE_THRESHOLD };
            if delta < threshold {
                continue;
            }
            let better = best.map(|(_, _, bd, _)| delta > bd).unwrap_or(true);
            if better {
                best = Some((busy, idle, delta, same_node));
            }
        }
    }

    let (busy, idle, _, _) = best?;
    migrate_one(busy, idle)
}

/// Moves one fair-class, non-current, non-pinned thread from `src` to `dst`.
/// Locks are taken lower-CPU-id-first regardless of which is source or
/// destination, to avoid cross-RQ deadlock.
fn migrate_one(src: CpuId, dst: CpuId) -> Option<TaskId> {
    let (first, second) = if src.index() <= dst.index() { (src, dst) } else { (dst, src) };
    let mut first_rq = PERCPU.get(first).rq.lock();
    let mut second_rq = PERCPU.get(second).rq.lock();
    let (src_rq, dst_rq) = if first == src { (&mut first_rq, &mut second_rq) } else { (&mut second_rq, &mut first_rq) };

    let candidate = src_rq.iter_migratable().find(|&tid| {
        let tasks = TASKS.lock();
        match tasks.get(&tid) {
            Some(t) => matches!(t.class, SchedClass::Fair(_)) && t.affinity.allows(dst),
            None => false,
        }
    })?;

    src_rq.dequeue(candidate);
    let class = TASKS.lock().get(&candidate).map(|t| t.class)?;
    dst_rq.enqueue(candidate, &class);
    if let Some(t) = TASKS.lock().get_mut(&candidate) {
        t.assigned_cpu = dst;
    }
    dst_rq.need_resched = true;
    Some(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::AsId;
    use crate::sched::task::{FairParams, Thread, ThreadState};

    fn fair_on(cpu: CpuId) -> TaskId {
        let mut t = Thread::new(1, AsId(1), SchedClass::Fair(FairParams::default()), 0, 0);
        t.state = ThreadState::Ready;
        t.assigned_cpu = cpu;
        let id = t.id;
        TASKS.lock().insert(id, t);
        let class = TASKS.lock().get(&id).unwrap().class;
        PERCPU.get(cpu).rq.lock().enqueue(id, &class);
        id
    }

    #[test]
    fn migrates_from_busy_to_idle_same_node() {
        let busy = CpuId(0);
        let idle = CpuId(1);
        for _ in 0..30 {
            fair_on(busy);
        }
        let mut config = KernelConfig::single_node(2);
        config.numa_node_of_cpu[0] = 0;
        config.numa_node_of_cpu[1] = 0;
        let migrated = rebalance(&config, None);
        assert!(migrated.is_some());
        let tid = migrated.unwrap();
        assert_eq!(TASKS.lock().get(&tid).unwrap().assigned_cpu, idle);
    }

    #[test]
    fn isolated_cpu_never_selected() {
        let busy = CpuId(2);
        let isolated = CpuId(3);
        for _ in 0..30 {
            fair_on(busy);
        }
        let mut config = KernelConfig::single_node(4);
        config.set_isolated(isolated.index(), true);
        let migrated = rebalance(&config, None);
        if let Some(tid) = migrated {
            assert_ne!(TASKS.lock().get(&tid).unwrap().assigned_cpu, isolated);
        }
    }
}
