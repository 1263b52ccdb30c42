//! Condition variable integrated with the lock instrumentation.
//!
//! Waiting releases the mutex, so the wait scope mirrors an
//! unlock/lock pair in the statistics and swaps the mutex off the held
//! stack for an auxiliary "waiting on thread" record. Every wait
//! variant takes an optional notifier tid naming the thread expected to
//! signal; the deadlock detector follows that edge when the thread is
//! parked here.

use std::time::Duration;

use clave_types::{Tid, INVALID_TID};

use crate::atomic::metadata_barrier;
use crate::config;
use crate::mutex::{Mutex, MutexGuard};
use crate::raw::{self, RawCondvar};
use crate::stats::LockStat;
use crate::thread_info::with_current;

pub struct Condvar {
    raw: RawCondvar,
}

impl Condvar {
    pub fn new() -> Self {
        Self {
            raw: RawCondvar::new(),
        }
    }

    pub fn notify_one(&self) {
        self.raw.notify_one();
    }

    pub fn notify_all(&self) {
        self.raw.notify_all();
    }

    // ── Untimed waits ────────────────────────────────────────────

    pub fn wait<'a, T>(&self, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
        self.wait_with_notifier(guard, INVALID_TID)
    }

    /// `notifier` names the thread expected to signal this wait, for
    /// wait-graph traversal. Pass [`INVALID_TID`] when unknown.
    pub fn wait_with_notifier<'a, T>(
        &self,
        guard: MutexGuard<'a, T>,
        notifier: Tid,
    ) -> MutexGuard<'a, T> {
        let mutex = guard.mutex_ref();
        let scope = CvWaitScope::enter(mutex, notifier);
        unsafe { self.raw.wait(mutex.raw()) };
        drop(scope);
        metadata_barrier();
        guard
    }

    /// Waits as long as `condition` holds. Each iteration re-enters
    /// the wait scope, so after a spurious wake the descriptor shows
    /// the mutex reacquired before the next wait is recorded.
    pub fn wait_while<'a, T, F>(&self, guard: MutexGuard<'a, T>, condition: F) -> MutexGuard<'a, T>
    where
        F: FnMut(&mut T) -> bool,
    {
        self.wait_while_with_notifier(guard, condition, INVALID_TID)
    }

    pub fn wait_while_with_notifier<'a, T, F>(
        &self,
        mut guard: MutexGuard<'a, T>,
        mut condition: F,
        notifier: Tid,
    ) -> MutexGuard<'a, T>
    where
        F: FnMut(&mut T) -> bool,
    {
        while condition(&mut guard) {
            guard = self.wait_with_notifier(guard, notifier);
        }
        guard
    }

    // ── Timed waits ──────────────────────────────────────────────

    /// Returns the reacquired guard and whether the wait timed out.
    pub fn wait_timeout<'a, T>(
        &self,
        guard: MutexGuard<'a, T>,
        timeout: Duration,
    ) -> (MutexGuard<'a, T>, bool) {
        self.wait_timeout_with_notifier(guard, timeout, INVALID_TID)
    }

    pub fn wait_timeout_with_notifier<'a, T>(
        &self,
        guard: MutexGuard<'a, T>,
        timeout: Duration,
        notifier: Tid,
    ) -> (MutexGuard<'a, T>, bool) {
        let mutex = guard.mutex_ref();
        let scope = CvWaitScope::enter(mutex, notifier);
        let woken = unsafe { self.raw.timed_wait(mutex.raw(), saturate_ns(timeout)) };
        drop(scope);
        metadata_barrier();
        (guard, !woken)
    }

    pub fn wait_timeout_while<'a, T, F>(
        &self,
        guard: MutexGuard<'a, T>,
        timeout: Duration,
        condition: F,
    ) -> (MutexGuard<'a, T>, bool)
    where
        F: FnMut(&mut T) -> bool,
    {
        self.wait_timeout_while_with_notifier(guard, timeout, condition, INVALID_TID)
    }

    pub fn wait_timeout_while_with_notifier<'a, T, F>(
        &self,
        mut guard: MutexGuard<'a, T>,
        timeout: Duration,
        mut condition: F,
        notifier: Tid,
    ) -> (MutexGuard<'a, T>, bool)
    where
        F: FnMut(&mut T) -> bool,
    {
        let deadline = raw::now_ns().saturating_add(saturate_ns(timeout));
        while condition(&mut guard) {
            let remaining = deadline - raw::now_ns();
            if remaining <= 0 {
                return (guard, true);
            }
            let (reacquired, _) = self.wait_timeout_with_notifier(
                guard,
                Duration::from_nanos(remaining as u64),
                notifier,
            );
            guard = reacquired;
        }
        (guard, false)
    }
}

impl Default for Condvar {
    fn default() -> Self {
        Self::new()
    }
}

fn saturate_ns(timeout: Duration) -> i64 {
    timeout.as_nanos().min(i64::MAX as u128) as i64
}

/// Descriptor and statistics bookkeeping around one OS wait: entering
/// relinquishes the mutex (unlock count, held-stack removal, auxiliary
/// cv record naming the notifier), leaving mirrors the reacquisition.
struct CvWaitScope {
    handle: usize,
    order: u32,
    stat: &'static LockStat,
}

impl CvWaitScope {
    fn enter<T>(mutex: &Mutex<T>, notifier: Tid) -> Self {
        let scope = Self {
            handle: mutex.handle(),
            order: mutex.order_index(),
            stat: mutex.stat(),
        };
        if config::TRACKING_ENABLED {
            scope.stat.unlocks.incr();
            let removed =
                with_current(|t| t.remove_held_for_cv(scope.handle, scope.order, notifier));
            if config::ABORT_ON_INVALID_UNLOCK && !removed {
                panic!("condition wait on a mutex not held by this thread");
            }
        }
        scope
    }
}

impl Drop for CvWaitScope {
    fn drop(&mut self) {
        if config::TRACKING_ENABLED {
            self.stat.locks.incr();
            with_current(|t| t.push_held_for_cv(self.handle, self.order));
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::LockOrder;
    use crate::thread_info::with_current;
    use clave_types::OtherWaitReason;
    use std::sync::Arc;

    #[test]
    fn wait_timeout_expires_and_keeps_lock() {
        std::thread::spawn(|| {
            let m = Mutex::with_order(LockOrder::Command, 0u32);
            let cv = Condvar::new();

            let guard = m.lock();
            let held_before: Vec<u32> =
                with_current(|t| (0..t.held.len()).filter_map(|i| t.held.bottom(i)).map(|(_, o)| o).collect());

            let (guard, timed_out) = cv.wait_timeout(guard, Duration::from_millis(10));
            assert!(timed_out);

            // the mutex is back on the held stack and the cv record is
            // cleared
            let held_after: Vec<u32> =
                with_current(|t| (0..t.held.len()).filter_map(|i| t.held.bottom(i)).map(|(_, o)| o).collect());
            assert_eq!(held_before, held_after);
            with_current(|t| {
                assert_eq!(t.other_wait.tid.get(), clave_types::INVALID_TID);
            });
            drop(guard);
        })
        .join()
        .unwrap();
    }

    #[test]
    fn wait_while_sees_notification() {
        let shared = Arc::new((
            Mutex::with_order(LockOrder::DeviceEffectHandle, false),
            Condvar::new(),
        ));

        let notifier = {
            let shared = Arc::clone(&shared);
            std::thread::spawn(move || {
                let (m, cv) = &*shared;
                std::thread::sleep(Duration::from_millis(20));
                *m.lock() = true;
                cv.notify_all();
            })
        };

        let (m, cv) = &*shared;
        let guard = cv.wait_while(m.lock(), |ready| !*ready);
        assert!(*guard);
        drop(guard);
        notifier.join().unwrap();
    }

    #[test]
    fn wait_with_notifier_publishes_expected_thread() {
        // The waiter records the notifier's tid while parked; the
        // notifier observes it through the waiter's descriptor
        // snapshot before signalling.
        let shared = Arc::new((
            Mutex::with_order(LockOrder::RoomRenderer, false),
            Condvar::new(),
        ));

        let main_tid = crate::thread_info::current_tid();

        let waiter = {
            let shared = Arc::clone(&shared);
            std::thread::spawn(move || {
                let (m, cv) = &*shared;
                let guard =
                    cv.wait_while_with_notifier(m.lock(), |ready| !*ready, main_tid);
                assert!(*guard);
            })
        };

        // Wait until the waiter's descriptor shows the cv record.
        let waiter_visible = || {
            crate::dump::threads_snapshot().iter().any(|t| {
                t.other_wait
                    .as_ref()
                    .is_some_and(|o| o.reason == OtherWaitReason::Cv && o.tid == main_tid)
            })
        };
        let mut tries = 0;
        while !waiter_visible() && tries < 500 {
            std::thread::sleep(Duration::from_millis(2));
            tries += 1;
        }
        assert!(waiter_visible(), "cv wait never became observable");

        let (m, cv) = &*shared;
        *m.lock() = true;
        cv.notify_all();
        waiter.join().unwrap();
    }

    #[test]
    fn wait_timeout_while_gives_up_when_never_satisfied() {
        std::thread::spawn(|| {
            let m = Mutex::with_order(LockOrder::PolicyEffects, ());
            let cv = Condvar::new();

            let (guard, timed_out) =
                cv.wait_timeout_while(m.lock(), Duration::from_millis(15), |_| true);
            assert!(timed_out);
            drop(guard);
        })
        .join()
        .unwrap();
    }
}
