//! Per-thread lock metadata.
//!
//! Every thread gets a [`ThreadLockInfo`] on its first mutex operation,
//! via a thread-local once-init that also registers it in the process
//! registry. The owning thread is the sole writer; registry traversals
//! read the fields through their atomics. On thread exit the
//! thread-local slot drops and deregisters.

use std::sync::Arc;

use clave_types::{
    HeldEntry, OtherWaitReason, OtherWaitSnapshot, ThreadSnapshot, Tid, INVALID_TID,
};

use crate::atomic::{metadata_barrier, Word, WordCell};
use crate::config;
use crate::order::order_name;
use crate::registry;
use crate::stack::AtomicStack;

pub(crate) type HeldStack = AtomicStack<{ config::LOCK_STACK_DEPTH }>;

/// Order index meaning "not set" in the auxiliary wait slot.
const INVALID_ORDER: u32 = u32::MAX;

impl Word for OtherWaitReason {
    fn into_word(self) -> u64 {
        self as u8 as u64
    }
    fn from_word(word: u64) -> Self {
        match word as u8 {
            1 => OtherWaitReason::Cv,
            2 => OtherWaitReason::Join,
            3 => OtherWaitReason::Queue,
            _ => OtherWaitReason::None,
        }
    }
}

/// Auxiliary "why am I blocked" slot for non-mutex waits: condition
/// variables, thread joins, queue sends.
pub(crate) struct OtherWaitInfo {
    pub(crate) tid: WordCell<Tid>,
    pub(crate) reason: WordCell<OtherWaitReason>,
    pub(crate) order: WordCell<u32>,
}

impl OtherWaitInfo {
    fn new() -> Self {
        Self {
            tid: WordCell::new(INVALID_TID),
            reason: WordCell::new(OtherWaitReason::None),
            order: WordCell::new(INVALID_ORDER),
        }
    }
}

pub(crate) struct ThreadLockInfo {
    pub(crate) tid: Tid,
    /// Handle of the mutex this thread is blocked acquiring, 0 if none.
    pub(crate) waiting: WordCell<usize>,
    pub(crate) other_wait: OtherWaitInfo,
    pub(crate) held: HeldStack,
}

impl ThreadLockInfo {
    pub(crate) fn new(tid: Tid) -> Self {
        Self {
            tid,
            waiting: WordCell::new(0),
            other_wait: OtherWaitInfo::new(),
            held: HeldStack::new(),
        }
    }

    /// Records the mutex this thread is about to block on; 0 clears.
    /// Writer is the thread itself.
    pub(crate) fn reset_waiter(&self, handle: usize) {
        self.waiting.set(handle);
    }

    /// Returns the held entry that conflicts with acquiring
    /// `(handle, order)`, or `None` when the acquisition would keep the
    /// stack strictly increasing without duplicating a handle.
    ///
    /// A strictly greater stored order is an inversion; an equal order
    /// is recursion within the order class (or of this very mutex).
    pub(crate) fn check_held(&self, handle: usize, order: u32) -> Option<(usize, u32)> {
        let len = self.held.len();
        for i in 0..len {
            let Some((top_handle, top_order)) = self.held.top(i) else {
                break;
            };
            if top_order < order {
                break;
            }
            // >= order: inversion if greater, recursion class if equal.
            return Some((top_handle, top_order));
        }
        None
    }

    /// Unverified push; run [`Self::check_held`] first.
    pub(crate) fn push_held(&self, handle: usize, order: u32) {
        self.held.push(handle, order);
    }

    pub(crate) fn remove_held(&self, handle: usize) -> bool {
        self.held.remove(handle)
    }

    // Variants used around a condition-variable wait. While waiting,
    // the mutex leaves the held stack and the auxiliary slot names the
    // thread expected to notify; reacquisition undoes both.

    pub(crate) fn push_held_for_cv(&self, handle: usize, order: u32) {
        self.push_held(handle, order);
        // the condition wait is over; invalidate.
        self.other_wait.tid.set(INVALID_TID);
    }

    pub(crate) fn remove_held_for_cv(&self, handle: usize, order: u32, notifier: Tid) -> bool {
        // the latest condition wait on the mutex overwrites.
        self.other_wait.order.set(order);
        self.other_wait.reason.set(OtherWaitReason::Cv);
        self.other_wait.tid.set(notifier);
        self.remove_held(handle)
    }

    pub(crate) fn add_wait_join(&self, joined_tid: Tid) {
        self.other_wait.reason.set(OtherWaitReason::Join);
        self.other_wait.tid.set(joined_tid);
    }

    pub(crate) fn remove_wait_join(&self) {
        self.other_wait.tid.set(INVALID_TID);
    }

    pub(crate) fn add_wait_queue(&self, receiver_tid: Tid) {
        self.other_wait.reason.set(OtherWaitReason::Queue);
        self.other_wait.tid.set(receiver_tid);
    }

    pub(crate) fn remove_wait_queue(&self) {
        self.other_wait.tid.set(INVALID_TID);
    }

    /// True when the thread neither waits for nor holds any mutex.
    pub(crate) fn is_idle(&self) -> bool {
        self.waiting.get() == 0 && self.held.len() == 0
    }

    pub(crate) fn snapshot(&self) -> ThreadSnapshot {
        let other_tid = self.other_wait.tid.get();
        let other_wait = (other_tid != INVALID_TID).then(|| {
            let reason = self.other_wait.reason.get();
            let order = (reason == OtherWaitReason::Cv)
                .then(|| order_name(self.other_wait.order.get()).to_string());
            OtherWaitSnapshot {
                tid: other_tid,
                reason,
                order,
            }
        });

        let held = (0..self.held.len())
            .filter_map(|i| self.held.bottom(i))
            .map(|(handle, order)| HeldEntry {
                handle: handle as u64,
                order: order_name(order).to_string(),
            })
            .collect();

        ThreadSnapshot {
            tid: self.tid,
            waiting: self.waiting.get() as u64,
            other_wait,
            held,
            held_true_len: self.held.true_len() as u64,
        }
    }
}

// ── Thread-local once-init ───────────────────────────────────────

pub(crate) fn current_tid() -> Tid {
    unsafe { libc::gettid() }
}

/// Deregisters the thread's entry on exit.
struct Registered(Arc<ThreadLockInfo>);

impl Drop for Registered {
    fn drop(&mut self) {
        registry::global().remove(self.0.tid);
    }
}

thread_local! {
    static CURRENT: Registered = {
        let info = Arc::new(ThreadLockInfo::new(current_tid()));
        registry::global().add(&info);
        Registered(info)
    };
}

pub(crate) fn with_current<R>(f: impl FnOnce(&ThreadLockInfo) -> R) -> R {
    CURRENT.with(|slot| f(&slot.0))
}

// ── RAII wait scopes for non-mutex blocking ──────────────────────

/// Marks the current thread as blocked joining `tid` for the guard's
/// lifetime, so the deadlock detector can follow the edge.
///
/// ```ignore
/// let _wait = JoinWaitGuard::new(worker_tid);
/// worker.join().unwrap();
/// ```
pub struct JoinWaitGuard(());

impl JoinWaitGuard {
    pub fn new(tid: Tid) -> Self {
        with_current(|t| t.add_wait_join(tid));
        metadata_barrier();
        Self(())
    }
}

impl Drop for JoinWaitGuard {
    fn drop(&mut self) {
        with_current(|t| t.remove_wait_join());
        metadata_barrier();
    }
}

/// Marks the current thread as blocked handing work to the thread
/// draining a queue, for the guard's lifetime.
pub struct QueueWaitGuard(());

impl QueueWaitGuard {
    pub fn new(tid: Tid) -> Self {
        with_current(|t| t.add_wait_queue(tid));
        metadata_barrier();
        Self(())
    }
}

impl Drop for QueueWaitGuard {
    fn drop(&mut self) {
        with_current(|t| t.remove_wait_queue());
        metadata_barrier();
    }
}

// ── Tests ────────────────────────────────────────────────────────
