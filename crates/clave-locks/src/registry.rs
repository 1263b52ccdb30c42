//! Process-wide thread registry.
//!
//! Maps kernel tids to weak references to their [`ThreadLockInfo`], so
//! that thread exit promptly releases the descriptor. The internal
//! mutex is held only across insert, remove, and snapshot copy;
//! traversal consumers work on the copy through atomic loads.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, LazyLock, Mutex as StdMutex, Weak};

use clave_types::{ChainLink, DeadlockInfo, OtherWaitReason, Tid, INVALID_TID};
use tracing::{debug, warn};

use crate::thread_info::ThreadLockInfo;

pub(crate) struct ThreadRegistry {
    threads: StdMutex<HashMap<Tid, Weak<ThreadLockInfo>>>,
}

static REGISTRY: LazyLock<ThreadRegistry> = LazyLock::new(|| ThreadRegistry {
    threads: StdMutex::new(HashMap::new()),
});

pub(crate) fn global() -> &'static ThreadRegistry {
    &REGISTRY
}

impl ThreadRegistry {
    /// Inserts a thread's descriptor. A duplicate tid is a diagnostic
    /// inconsistency, not an error.
    pub(crate) fn add(&self, info: &Arc<ThreadLockInfo>) -> bool {
        let mut threads = self.threads.lock().unwrap();
        if threads.contains_key(&info.tid) {
            warn!(tid = info.tid, "thread already registered");
            return false;
        }
        threads.insert(info.tid, Arc::downgrade(info));
        true
    }

    pub(crate) fn remove(&self, tid: Tid) -> bool {
        let removed = self.threads.lock().unwrap().remove(&tid).is_some();
        if !removed {
            warn!(tid, "no registry entry to remove");
        }
        removed
    }

    pub(crate) fn copy_map(&self) -> HashMap<Tid, Weak<ThreadLockInfo>> {
        self.threads.lock().unwrap().clone()
    }

    /// Textual dump, sorted by tid: full descriptors for threads with
    /// activity, then a compact list of idle tids.
    pub(crate) fn dump(&self) -> String {
        let sorted: BTreeMap<Tid, Weak<ThreadLockInfo>> =
            self.copy_map().into_iter().collect();

        let mut out = format!("thread count: {}\n", sorted.len());
        let mut idle = Vec::new();
        for (tid, weak) in &sorted {
            let Some(info) = weak.upgrade() else { continue };
            if info.is_idle() {
                idle.push(*tid);
            } else {
                out.push_str(&info.snapshot().to_string());
            }
        }

        out.push_str("tids without current activity [ ");
        for tid in idle {
            out.push_str(&format!("{tid} "));
        }
        out.push_str("]\n");
        out
    }

    pub(crate) fn snapshots(&self) -> Vec<clave_types::ThreadSnapshot> {
        let sorted: BTreeMap<Tid, Weak<ThreadLockInfo>> =
            self.copy_map().into_iter().collect();
        sorted
            .values()
            .filter_map(Weak::upgrade)
            .map(|info| info.snapshot())
            .collect()
    }

    /// Walks the wait graph from `tid`: thread → mutex it blocks on →
    /// owning thread, with condition-variable, join, and queue waits as
    /// additional edges, until the chain ends or revisits a tid.
    ///
    /// Not fast; intended for watchdog diagnostics, not the lock path.
    /// Reads are racy by design, so stale or partial chains are
    /// possible (mostly as false negatives).
    pub(crate) fn deadlock_detection(
        &self,
        tid: Tid,
        order_names: &[&'static str],
    ) -> DeadlockInfo {
        let map = self.copy_map();
        let mut info = DeadlockInfo::new(tid);

        let Some(start) = map.get(&tid).and_then(Weak::upgrade) else {
            return info;
        };

        let mut waiting = start.waiting.get();
        let mut other_tid = start.other_wait.tid.get();
        let mut other_reason = start.other_wait.reason.get();
        let mut other_order = start.other_wait.order.get();
        if waiting == 0 && other_tid == INVALID_TID {
            return info;
        }

        // Map each held mutex handle to (owner tid, order). Built from
        // the per-thread stacks rather than a global mutex list: the
        // handles are opaque and may already be dead, and threads are
        // fewer than mutexes. Entries dropped at stack capacity are
        // missing here, which can hide edges.
        let mut owners: HashMap<usize, (Tid, u32)> = HashMap::new();
        let mut subset = false;
        for (tid2, weak) in &map {
            let Some(thread) = weak.upgrade() else { continue };
            subset = subset || !thread.held.is_complete();
            for i in 0..thread.held.len() {
                let Some((handle, order)) = thread.held.bottom(i) else {
                    continue;
                };
                if handle != 0 {
                    owners.insert(handle, (*tid2, order));
                }
            }
        }
        if subset {
            debug!("held stacks truncated; deadlock detection may be incomplete");
        }

        let name_of = |index: u32| -> &'static str {
            order_names
                .get(index as usize)
                .copied()
                .unwrap_or("unknown")
        };

        let mut visited: HashSet<Tid> = HashSet::new();
        visited.insert(tid);
        loop {
            let next_tid;
            let label;
            if waiting != 0 && owners.contains_key(&waiting) {
                // blocked on a mutex held by another thread
                let (owner, order) = owners[&waiting];
                next_tid = owner;
                label = name_of(order).to_string();
            } else if other_tid != INVALID_TID {
                // waiting on a thread rather than a mutex
                next_tid = other_tid;
                info.other_wait_reason = other_reason;
                label = match other_reason {
                    OtherWaitReason::Cv => format!("cv-{}", name_of(other_order)),
                    OtherWaitReason::Join => "join".to_string(),
                    OtherWaitReason::Queue => "queue".to_string(),
                    OtherWaitReason::None => name_of(other_order).to_string(),
                };
            } else {
                // chain ends; the thread may be blocked on something
                // we cannot see.
                return info;
            }

            info.chain.push(ChainLink {
                tid: next_tid,
                label,
            });

            if !visited.insert(next_tid) {
                info.has_cycle = true;
                return info;
            }

            let Some(next) = map.get(&next_tid).and_then(Weak::upgrade) else {
                // thread may have exited mid-walk
                return info;
            };
            waiting = next.waiting.get();
            other_tid = next.other_wait.tid.get();
            other_reason = next.other_wait.reason.get();
            other_order = next.other_wait.order.get();
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
