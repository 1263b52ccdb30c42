//! The instrumented mutex.
//!
//! An exclusive, data-owning mutex permanently tagged with a
//! [`LockOrder`]. Acquisition runs the pre-lock order and recursion
//! checks against the calling thread's held stack, accounts contention
//! into the order's category statistics, and keeps the thread
//! descriptor's waiting/holding metadata current so the registry can
//! build wait graphs asynchronously.

use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::time::{Duration, SystemTime};

use crate::atomic::metadata_barrier;
use crate::config;
use crate::order::{order_name, LockOrder};
use crate::raw::{self, RawMutex};
use crate::stats::{stat_for, LockStat};
use crate::thread_info::with_current;

/// Exclusive mutex tagged with a capability order.
///
/// Acquiring a mutex whose order is less than or equal to any order the
/// thread already holds is a programming error (fatal per the
/// `config::ABORT_ON_*` flags).
pub struct Mutex<T> {
    raw: RawMutex,
    order: LockOrder,
    stat: &'static LockStat,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for Mutex<T> {}
unsafe impl<T: Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    /// New mutex in the generic [`LockOrder::Other`] category, with
    /// priority inheritance per the process-wide flag.
    pub fn new(value: T) -> Self {
        Self::with_order(LockOrder::Other, value)
    }

    pub fn with_order(order: LockOrder, value: T) -> Self {
        Self::with_priority_inheritance(config::priority_inheritance_enabled(), order, value)
    }

    /// Explicit priority-inheritance override; failure to apply the
    /// protocol is logged and the mutex degrades to the default.
    pub fn with_priority_inheritance(priority_inheritance: bool, order: LockOrder, value: T) -> Self {
        Self {
            raw: RawMutex::new(priority_inheritance),
            order,
            stat: stat_for(order),
            data: UnsafeCell::new(value),
        }
    }

    pub fn order(&self) -> LockOrder {
        self.order
    }

    /// Underlying OS mutex handle, for callers that drive pthread
    /// interfaces directly. Use is implementation defined.
    pub fn native_handle(&self) -> *mut libc::pthread_mutex_t {
        self.raw.as_ptr()
    }

    /// Opaque identity of this mutex while borrowed: used as a map key
    /// and for equality by the instrumentation, never dereferenced.
    pub(crate) fn handle(&self) -> usize {
        self as *const Self as usize
    }

    pub(crate) fn order_index(&self) -> u32 {
        self.order as u32
    }

    pub(crate) fn raw(&self) -> &RawMutex {
        &self.raw
    }

    pub(crate) fn stat(&self) -> &'static LockStat {
        self.stat
    }

    pub fn lock(&self) -> MutexGuard<'_, T> {
        pre_lock(self.handle(), self.order);
        self.lock_raw();
        self.guard()
    }

    /// Lock with the order and recursion checks suppressed.
    ///
    /// For the rare call sites where two distinct mutexes legitimately
    /// share an order class (for example two streams of the same kind
    /// locked for a handover). Statistics and held-stack bookkeeping
    /// still apply.
    pub fn lock_unchecked(&self) -> MutexGuard<'_, T> {
        self.lock_raw();
        self.guard()
    }

    fn lock_raw(&self) {
        if !self.raw.try_lock() {
            let wait = WaitScope::begin(self.handle(), self.stat);
            self.raw.lock();
            drop(wait);
        }
        post_lock(self.handle(), self.order, self.stat);
        metadata_barrier();
    }

    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        self.try_lock_ns(0)
    }

    /// Timed acquisition against an absolute deadline computed from
    /// now + `timeout`. Wait-time accounting is discarded on expiry.
    pub fn try_lock_for(&self, timeout: Duration) -> Option<MutexGuard<'_, T>> {
        self.try_lock_ns(saturate_ns(timeout))
    }

    pub fn try_lock_until(&self, deadline: SystemTime) -> Option<MutexGuard<'_, T>> {
        let timeout = deadline
            .duration_since(SystemTime::now())
            .unwrap_or(Duration::ZERO);
        self.try_lock_ns(saturate_ns(timeout))
    }

    fn try_lock_ns(&self, timeout_ns: i64) -> Option<MutexGuard<'_, T>> {
        pre_lock(self.handle(), self.order);
        if timeout_ns <= 0 {
            // single attempt, never the OS timed lock
            if !self.raw.try_lock() {
                return None;
            }
        } else {
            let mut wait = WaitScope::begin(self.handle(), self.stat);
            if !self.raw.timed_lock(timeout_ns) {
                wait.ignore_wait_time();
                drop(wait);
                metadata_barrier();
                return None;
            }
        }
        post_lock(self.handle(), self.order, self.stat);
        metadata_barrier();
        Some(self.guard())
    }

    fn guard(&self) -> MutexGuard<'_, T> {
        MutexGuard {
            mutex: self,
            _not_send: PhantomData,
        }
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: Default> Default for Mutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

fn saturate_ns(timeout: Duration) -> i64 {
    timeout.as_nanos().min(i64::MAX as u128) as i64
}

// ── Instrumentation hooks ────────────────────────────────────────
//
// Each hook returns immediately when tracking is compiled out, leaving
// a plain exclusive lock behind.

fn pre_lock(handle: usize, order: LockOrder) {
    if !config::TRACKING_ENABLED {
        return;
    }
    if !config::ABORT_ON_ORDER_CHECK && !config::ABORT_ON_RECURSION_CHECK {
        return;
    }
    let Some((held_handle, held_order)) = with_current(|t| t.check_held(handle, order as u32))
    else {
        return;
    };

    let new_order = order as u32;
    if config::ABORT_ON_ORDER_CHECK && held_order > new_order {
        panic!(
            "invalid lock order: holding order {} ({}) while acquiring order {} ({})",
            held_order,
            order_name(held_order),
            new_order,
            order.name(),
        );
    }
    if config::ABORT_ON_RECURSION_CHECK && held_order == new_order {
        if held_handle == handle {
            panic!(
                "recursive lock of the same mutex (order {} {})",
                new_order,
                order.name(),
            );
        }
        panic!(
            "recursive lock within order {} ({})",
            new_order,
            order.name(),
        );
    }
}

fn post_lock(handle: usize, order: LockOrder, stat: &LockStat) {
    if !config::TRACKING_ENABLED {
        return;
    }
    stat.locks.incr();
    with_current(|t| t.push_held(handle, order as u32));
}

pub(crate) fn pre_unlock(handle: usize, stat: &LockStat) {
    if !config::TRACKING_ENABLED {
        return;
    }
    stat.unlocks.incr();
    let removed = with_current(|t| t.remove_held(handle));
    if config::ABORT_ON_INVALID_UNLOCK && !removed {
        panic!("unlock of a mutex not held by this thread");
    }
}

/// Accounts one blocking acquisition: bumps the category's wait count
/// and publishes the waiting handle up front, samples the wait duration
/// on drop (unless discarded by a timeout) and clears the waiting
/// marker.
pub(crate) struct WaitScope<'a> {
    stat: &'a LockStat,
    start_ns: i64,
    discard: bool,
}

impl<'a> WaitScope<'a> {
    pub(crate) fn begin(handle: usize, stat: &'a LockStat) -> Self {
        if config::TRACKING_ENABLED {
            stat.waits.incr();
            with_current(|t| t.reset_waiter(handle));
        }
        Self {
            stat,
            start_ns: raw::now_ns(),
            discard: false,
        }
    }

    pub(crate) fn ignore_wait_time(&mut self) {
        self.discard = true;
    }
}

impl Drop for WaitScope<'_> {
    fn drop(&mut self) {
        if !config::TRACKING_ENABLED {
            return;
        }
        if !self.discard {
            self.stat.add_wait_ns((raw::now_ns() - self.start_ns) as f64);
        }
        with_current(|t| t.reset_waiter(0));
    }
}

// ── Guard ────────────────────────────────────────────────────────

/// RAII scope over an acquired [`Mutex`]; releases on drop.
///
/// Not `Send`: the raw unlock (and priority-inheritance bookkeeping)
/// must happen on the locking thread.
pub struct MutexGuard<'a, T> {
    mutex: &'a Mutex<T>,
    _not_send: PhantomData<*const ()>,
}

impl<'a, T> MutexGuard<'a, T> {
    pub(crate) fn mutex_ref(&self) -> &'a Mutex<T> {
        self.mutex
    }
}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        pre_unlock(self.mutex.handle(), self.mutex.stat);
        self.mutex.raw.unlock();
        metadata_barrier();
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::stat_for;
    use crate::thread_info::with_current;
    use std::sync::Arc;

    fn held_orders() -> Vec<u32> {
        with_current(|t| (0..t.held.len()).filter_map(|i| t.held.bottom(i)).map(|(_, o)| o).collect())
    }

    // Each test runs on its own spawned thread so held-stack assertions
    // see only that thread's activity, and uses its own orders so the
    // global per-category counters are not shared with other tests.
    fn on_own_thread(f: impl FnOnce() + Send + 'static) {
        std::thread::spawn(f).join().unwrap();
    }

    #[test]
    fn nested_lock_unlock_tracks_held_stack() {
        on_own_thread(|| {
            let a = Mutex::with_order(LockOrder::EffectPolicy, 0u32); // order 3
            let b = Mutex::with_order(LockOrder::CommandThread, 0u32); // order 5

            let stat_a = stat_for(LockOrder::EffectPolicy);
            let stat_b = stat_for(LockOrder::CommandThread);
            let (locks_a, locks_b) = (stat_a.locks.load(), stat_b.locks.load());

            let ga = a.lock();
            assert_eq!(held_orders(), vec![3]);
            let gb = b.lock();
            assert_eq!(held_orders(), vec![3, 5]);
            drop(gb);
            assert_eq!(held_orders(), vec![3]);
            drop(ga);
            assert_eq!(held_orders(), Vec::<u32>::new());

            assert_eq!(stat_a.locks.load(), locks_a + 1);
            assert_eq!(stat_b.locks.load(), locks_b + 1);
            assert_eq!(stat_a.unlocks.load(), stat_a.locks.load());
            assert_eq!(stat_b.unlocks.load(), stat_b.locks.load());
        });
    }

    #[test]
    fn balanced_sequence_restores_descriptor() {
        on_own_thread(|| {
            let outer = Mutex::with_order(LockOrder::ClientPolicy, ());
            let _guard = outer.lock();
            let before = held_orders();

            let m = Mutex::with_order(LockOrder::LoudnessReporter, ());
            for _ in 0..20 {
                let g = m.lock();
                drop(g);
            }

            assert_eq!(held_orders(), before);
        });
    }

    #[test]
    fn deep_nesting_past_stack_depth_unwinds_clean() {
        on_own_thread(|| {
            // 20 mutexes of strictly increasing order, nested deeper
            // than the 16-entry stack, then released LIFO.
            let orders = [
                LockOrder::RoomRenderer,
                LockOrder::PolicyEffects,
                LockOrder::EffectHandle,
                LockOrder::PolicyService,
                LockOrder::Command,
                LockOrder::ClientPolicy,
                LockOrder::Engine,
                LockOrder::DeviceEffectManager,
                LockOrder::DeviceEffectProxy,
                LockOrder::DeviceEffectHandle,
                LockOrder::PatchCommands,
                LockOrder::Stream,
                LockOrder::EffectChain,
                LockOrder::Effect,
                LockOrder::Hardware,
                LockOrder::LoudnessReporter,
                LockOrder::RetiredWriters,
                LockOrder::AsyncCallback,
                LockOrder::ConfigEvent,
                LockOrder::TrackMetadata,
            ];
            let mutexes: Vec<Mutex<()>> =
                orders.iter().map(|&order| Mutex::with_order(order, ())).collect();

            let guards: Vec<_> = mutexes.iter().map(|m| m.lock()).collect();
            with_current(|t| {
                assert_eq!(t.held.len(), crate::config::LOCK_STACK_DEPTH);
                assert_eq!(t.held.true_len(), 20);
                assert!(!t.held.is_complete());
            });

            drop(guards);
            with_current(|t| {
                assert_eq!(t.held.len(), 0);
                assert_eq!(t.held.true_len(), 0);
            });
        });
    }

    #[test]
    fn order_inversion_panics_with_both_names() {
        let result = std::thread::spawn(|| {
            let high = Mutex::with_order(LockOrder::ConfigEvent, ()); // 21
            let low = Mutex::with_order(LockOrder::PatchCommands, ()); // 12
            let _g = high.lock();
            let _bad = low.lock();
        })
        .join();

        let err = result.unwrap_err();
        let message = err.downcast_ref::<String>().unwrap();
        assert!(message.contains("invalid lock order"), "{message}");
        assert!(message.contains("21 (ConfigEvent)"), "{message}");
        assert!(message.contains("12 (PatchCommands)"), "{message}");
    }

    #[test]
    fn same_mutex_recursion_panics() {
        let result = std::thread::spawn(|| {
            let m = Mutex::with_order(LockOrder::TrackMetadata, ());
            let _g = m.lock();
            let _bad = m.lock();
        })
        .join();

        let err = result.unwrap_err();
        let message = err.downcast_ref::<String>().unwrap();
        assert!(message.contains("recursive lock of the same mutex"), "{message}");
    }

    #[test]
    fn same_order_different_mutex_panics_unless_unchecked() {
        let result = std::thread::spawn(|| {
            let a = Mutex::with_order(LockOrder::PatchRead, ());
            let b = Mutex::with_order(LockOrder::PatchRead, ());
            let _ga = a.lock();
            let _bad = b.lock();
        })
        .join();
        assert!(result.is_err());

        on_own_thread(|| {
            let a = Mutex::with_order(LockOrder::PatchListeners, ());
            let b = Mutex::with_order(LockOrder::PatchListeners, ());
            let _ga = a.lock();
            let _gb = b.lock_unchecked();
            assert_eq!(held_orders(), vec![24, 24]);
        });
    }

    #[test]
    fn try_lock_reports_contention_without_blocking() {
        let m = Arc::new(Mutex::with_order(LockOrder::StreamCallback, 0u32));
        let guard = m.lock();

        let m2 = Arc::clone(&m);
        std::thread::spawn(move || {
            assert!(m2.try_lock().is_none());
        })
        .join()
        .unwrap();

        drop(guard);
        assert!(m.try_lock().is_some());
    }

    #[test]
    fn timed_lock_expiry_discards_wait_time() {
        let m = Arc::new(Mutex::with_order(LockOrder::PolicyClients, ()));
        let stat = stat_for(LockOrder::PolicyClients);
        let guard = m.lock();

        let (sum_before, waits_before) = (stat.wait_sum_ns.load(), stat.waits.load());

        let m2 = Arc::clone(&m);
        std::thread::spawn(move || {
            assert!(m2.try_lock_for(Duration::from_millis(15)).is_none());
        })
        .join()
        .unwrap();

        // the wait was counted but its duration discarded
        assert_eq!(stat.waits.load(), waits_before + 1);
        assert_eq!(stat.wait_sum_ns.load(), sum_before);
        drop(guard);
    }

    #[test]
    fn timed_lock_acquires_once_released() {
        let m = Arc::new(Mutex::with_order(LockOrder::LogNotifier, 7u32));
        let guard = m.lock();

        let m2 = Arc::clone(&m);
        let waiter = std::thread::spawn(move || {
            let g = m2.try_lock_for(Duration::from_secs(5)).expect("lock freed");
            *g
        });

        std::thread::sleep(Duration::from_millis(20));
        drop(guard);
        assert_eq!(waiter.join().unwrap(), 7);
    }

    #[test]
    fn try_lock_until_past_deadline_is_single_try() {
        on_own_thread(|| {
            let m = Mutex::with_order(LockOrder::DeviceEffectProxy, ());
            let past = SystemTime::now() - Duration::from_secs(1);
            // free mutex: a single try succeeds even with an expired deadline
            assert!(m.try_lock_until(past).is_some());
        });
    }

    #[test]
    fn contended_counters_balance() {
        const THREADS: usize = 8;
        const ROUNDS: u64 = 10_000;

        let m = Arc::new(Mutex::with_order(LockOrder::EngineClients, 0u64));
        let stat = stat_for(LockOrder::EngineClients);
        let (locks_before, unlocks_before) = (stat.locks.load(), stat.unlocks.load());

        std::thread::scope(|s| {
            for _ in 0..THREADS {
                let m = Arc::clone(&m);
                s.spawn(move || {
                    for _ in 0..ROUNDS {
                        *m.lock() += 1;
                    }
                });
            }
        });

        let total = THREADS as u64 * ROUNDS;
        assert_eq!(*m.lock(), total);
        assert_eq!(stat.locks.load(), locks_before + total + 1);
        assert_eq!(stat.unlocks.load(), unlocks_before + total + 1);
        assert!(stat.waits.load() <= stat.locks.load());
    }
}
