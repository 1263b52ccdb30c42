//! Per-category contention statistics.
//!
//! One [`LockStat`] per capability order, shared by every mutex of that
//! order, alive for the process lifetime. Counters use relaxed atomics;
//! readers may observe momentarily inconsistent tuples.

use std::sync::LazyLock;

use clave_types::LockStatSnapshot;

use crate::atomic::{RelaxedAccum, RelaxedCounter};
use crate::order::LockOrder;

pub struct LockStat {
    pub(crate) locks: RelaxedCounter,
    pub(crate) unlocks: RelaxedCounter,
    /// Acquisitions that had to block.
    pub(crate) waits: RelaxedCounter,
    pub(crate) wait_sum_ns: RelaxedAccum,
    pub(crate) wait_sumsq_ns: RelaxedAccum,
}

impl LockStat {
    fn new() -> Self {
        Self {
            locks: RelaxedCounter::new(0),
            unlocks: RelaxedCounter::new(0),
            waits: RelaxedCounter::new(0),
            wait_sum_ns: RelaxedAccum::new(0.0),
            wait_sumsq_ns: RelaxedAccum::new(0.0),
        }
    }

    pub(crate) fn add_wait_ns(&self, wait_ns: f64) {
        self.wait_sum_ns.add(wait_ns);
        self.wait_sumsq_ns.add(wait_ns * wait_ns);
    }

    pub(crate) fn snapshot(&self, order_name: &str) -> LockStatSnapshot {
        let locks = self.locks.load();
        let waits = self.waits.load();
        let sum_ns = self.wait_sum_ns.load();
        let sumsq_ns = self.wait_sumsq_ns.load();

        let recip = if waits == 0 { 0.0 } else { 1.0 / waits as f64 };
        let avg_wait_ms = sum_ns * 1e-6 * recip;
        let std_wait_ms = if waits < 2 {
            0.0
        } else {
            (sumsq_ns * recip * 1e-12 - avg_wait_ms * avg_wait_ms)
                .max(0.0)
                .sqrt()
        };

        LockStatSnapshot {
            order: order_name.to_string(),
            locks,
            uncontested: locks.saturating_sub(waits),
            waits,
            unlocks: self.unlocks.load(),
            avg_wait_ms,
            std_wait_ms,
        }
    }
}

static STATS: LazyLock<[LockStat; LockOrder::COUNT]> =
    LazyLock::new(|| std::array::from_fn(|_| LockStat::new()));

pub(crate) fn stat_for(order: LockOrder) -> &'static LockStat {
    &STATS[order as usize]
}

pub(crate) fn all_stats() -> &'static [LockStat; LockOrder::COUNT] {
    &STATS
}
