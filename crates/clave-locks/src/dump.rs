//! Process-wide introspection.
//!
//! Textual dumps for logs and watchdog reports, plus typed snapshots
//! for tooling. Everything here reads through the registry copy and
//! relaxed counters: cheap, racy, informative only.

use clave_types::{DeadlockInfo, LockStatSnapshot, ThreadSnapshot, Tid};

use crate::config;
use crate::order::ORDER_NAMES;
use crate::registry;
use crate::stats;

/// Per-category statistics for every order with any activity.
pub fn stats_snapshot() -> Vec<LockStatSnapshot> {
    stats::all_stats()
        .iter()
        .zip(ORDER_NAMES.iter())
        .filter(|(stat, _)| stat.locks.load() != 0)
        .map(|(stat, name)| stat.snapshot(name))
        .collect()
}

/// Locking statistics per capability order, one block per active
/// category.
pub fn all_stats_to_string() -> String {
    let mut out = format!(
        "lock stats: priority inheritance {}\n",
        if config::priority_inheritance_enabled() {
            "enabled"
        } else {
            "disabled"
        }
    );
    for snap in stats_snapshot() {
        out.push_str(&format!("capability: {}\n{}", snap.order, snap));
    }
    out
}

/// Sorted snapshot of every registered thread's descriptor.
pub fn threads_snapshot() -> Vec<ThreadSnapshot> {
    registry::global().snapshots()
}

/// The lock metadata held per tid, active threads first.
pub fn all_threads_to_string() -> String {
    registry::global().dump()
}

/// Walks the wait graph from `tid`; see the registry for the traversal
/// contract. Meant for watchdogs examining a thread believed stuck,
/// not for the lock path.
pub fn deadlock_detection(tid: Tid) -> DeadlockInfo {
    registry::global().deadlock_detection(tid, &ORDER_NAMES)
}

// ── Tests ────────────────────────────────────────────────────────
