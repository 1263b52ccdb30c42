//! Instrumented, capability-ordered mutexes for the clave audio engine.
//!
//! Drop-in exclusive locks that additionally maintain an out-of-band
//! observability layer: which mutexes each thread waits on and holds,
//! per-category contention statistics, and a wait-graph walk usable
//! from a watchdog to spot deadlocks.
//!
//! Every [`Mutex`] carries a fixed [`LockOrder`]; acquisitions must
//! follow the hierarchy (strictly increasing order per thread) and
//! violations are fatal by build-time configuration. Instrumentation is
//! lockless on the lock path: per-thread metadata is single-writer and
//! read by traversals through atomics, so sampling is best-effort and
//! biased toward cheap instrumentation over perfectly consistent
//! observation.
//!
//! ```
//! use clave_locks::{LockOrder, Mutex};
//!
//! let queue = Mutex::with_order(LockOrder::Command, Vec::new());
//! queue.lock().push("start");
//!
//! println!("{}", clave_locks::all_stats_to_string());
//! ```

mod atomic;
mod condvar;
mod dump;
mod guard;
mod mutex;
mod order;
mod raw;
mod registry;
mod stack;
mod stats;
mod thread_info;

pub mod config;

pub use atomic::{metadata_barrier, RelaxedAccum, RelaxedCounter, Word, WordCell};
pub use condvar::Condvar;
pub use dump::{
    all_stats_to_string, all_threads_to_string, deadlock_detection, stats_snapshot,
    threads_snapshot,
};
pub use guard::{lock_pair, lock_triple};
pub use mutex::{Mutex, MutexGuard};
pub use order::{LockOrder, ORDER_NAMES};
pub use thread_info::{JoinWaitGuard, QueueWaitGuard};

pub use clave_types::{
    ChainLink, DeadlockInfo, HeldEntry, LockStatSnapshot, OtherWaitReason, OtherWaitSnapshot,
    ThreadSnapshot, Tid, INVALID_TID,
};

/// Kernel tid of the calling thread, as the instrumentation records it.
pub fn current_tid() -> Tid {
    thread_info::current_tid()
}
