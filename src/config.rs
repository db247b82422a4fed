//! Compile-time tunables and the runtime `KernelConfig` assembled at boot.
//!
//! The numeric knobs this core needs are kept as `const`s here rather than
//! buried in the modules that use them, so one file documents every tunable
//! by value.

/// 4 KiB, the only page size the PFA/AS model supports: a generic 64-bit
/// paging model, no huge-page semantics required.
pub const PAGE_SIZE: usize = 4096;

/// Fair-class (CFS-style) scheduling latency target.
pub const FAIR_TARGET_LATENCY_NS: u64 = 6_000_000;
/// Fair-class minimum granularity.
pub const FAIR_MIN_GRANULARITY_NS: u64 = 750_000;

/// RT fixed-priority utilisation bound (Liu & Layland worst case for an
/// unbounded task count).
pub const RT_UTIL_BOUND: f64 = 0.69;
/// Default EDF bandwidth fraction reserved per CPU.
pub const DEFAULT_DEADLINE_BANDWIDTH: f64 = 0.50;

/// Load balancer period.
pub const BALANCE_PERIOD_NS: u64 = 10_000_000;
/// Minimum per-CPU load delta (fraction of total) to trigger a within-node
/// migration. Cross-node migration requires `CROSS_NODE_IMBALANCE_THRESHOLD`.
pub const INTRA_NODE_IMBALANCE_THRESHOLD: u64 = 25;
pub const CROSS_NODE_IMBALANCE_THRESHOLD: u64 = 60;

/// RT FIFO/RR round-robin quantum within one priority level.
pub const RT_RR_QUANTUM_NS: u64 = 4_000_000;

/// Bound on outstanding TLB-shootdown IPI acknowledgement: block
/// `protect`/`unmap` until all targeted CPUs ack or this elapses, then
/// raise `IpiLost`.
pub const TLB_SHOOTDOWN_ACK_TIMEOUT_NS: u64 = 1_000_000;

/// Maximum number of CPUs the per-CPU arrays are sized for.
pub const MAX_CPUS: usize = 32;

/// RT fixed-priority levels, 0 = highest.
pub const RT_PRIORITY_LEVELS: usize = 100;

/// Runtime configuration assembled once at boot and threaded through the
/// `Kernel` context as an explicit handle rather than ambient globals.
#[derive(Debug, Clone)]
pub struct KernelConfig {
    pub num_cpus: usize,
    /// CPUs excluded from load-balancer source/destination selection.
    pub isolated_cpus: u64,
    /// NUMA node id per CPU index; balancer prefers within-node moves.
    pub numa_node_of_cpu: [u8; MAX_CPUS],
    pub rt_util_bound: f64,
    pub deadline_bandwidth: f64,
}

impl KernelConfig {
    pub fn single_node(num_cpus: usize) -> Self {
        Self {
            num_cpus,
            isolated_cpus: 0,
            numa_node_of_cpu: [0; MAX_CPUS],
            rt_util_bound: RT_UTIL_BOUND,
            deadline_bandwidth: DEFAULT_DEADLINE_BANDWIDTH,
        }
    }

    pub fn is_isolated(&self, cpu: usize) -> bool {
        cpu < 64 && (self.isolated_cpus & (1 << cpu)) != 0
    }

    pub fn set_isolated(&mut self, cpu: usize, isolated: bool) {
        if cpu >= 64 {
            return;
        }
        if isolated {
            self.isolated_cpus |= 1 << cpu;
        } else {
            self.isolated_cpus &= !(1 << cpu);
        }
    }
}
