//! Raw pthread mutex and condition variable.
//!
//! `std::sync::Mutex` keeps its native handle private, and timed
//! acquisition plus the priority-inheritance protocol both need one, so
//! the OS mutex is driven through `libc` directly. Timed operations
//! take an absolute `CLOCK_REALTIME` deadline, which is what
//! `pthread_mutex_timedlock` and `pthread_cond_timedwait` expect.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;

use tracing::warn;

// ── Clocks ───────────────────────────────────────────────────────

fn clock_ns(clock: libc::clockid_t) -> i64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    unsafe { libc::clock_gettime(clock, &mut ts) };
    ts.tv_sec as i64 * 1_000_000_000 + ts.tv_nsec as i64
}

/// Monotonic time in nanoseconds; the wait-time sampling clock.
pub(crate) fn now_ns() -> i64 {
    clock_ns(libc::CLOCK_MONOTONIC)
}

/// Absolute realtime deadline `timeout_ns` from now, saturating.
fn deadline_after(timeout_ns: i64) -> libc::timespec {
    let deadline_ns = clock_ns(libc::CLOCK_REALTIME).saturating_add(timeout_ns);
    libc::timespec {
        tv_sec: (deadline_ns / 1_000_000_000) as libc::time_t,
        tv_nsec: (deadline_ns % 1_000_000_000) as _,
    }
}

// ── Mutex ────────────────────────────────────────────────────────

pub(crate) struct RawMutex {
    inner: UnsafeCell<libc::pthread_mutex_t>,
}

unsafe impl Send for RawMutex {}
unsafe impl Sync for RawMutex {}

impl RawMutex {
    /// Initializes the OS mutex, with the priority-inheritance
    /// protocol when requested. Any attribute failure is logged and
    /// the mutex degrades to the default protocol.
    pub(crate) fn new(priority_inheritance: bool) -> Self {
        let mut mutex = MaybeUninit::<libc::pthread_mutex_t>::uninit();
        unsafe {
            if !priority_inheritance || !init_with_priority_inheritance(mutex.as_mut_ptr()) {
                libc::pthread_mutex_init(mutex.as_mut_ptr(), std::ptr::null());
            }
            Self {
                inner: UnsafeCell::new(mutex.assume_init()),
            }
        }
    }

    pub(crate) fn lock(&self) {
        let ret = unsafe { libc::pthread_mutex_lock(self.inner.get()) };
        debug_assert_eq!(ret, 0);
    }

    pub(crate) fn unlock(&self) {
        let ret = unsafe { libc::pthread_mutex_unlock(self.inner.get()) };
        debug_assert_eq!(ret, 0);
    }

    pub(crate) fn try_lock(&self) -> bool {
        unsafe { libc::pthread_mutex_trylock(self.inner.get()) == 0 }
    }

    /// Blocks up to `timeout_ns`. Callers route non-positive timeouts
    /// through [`Self::try_lock`]; this always reaches the OS timed
    /// lock.
    pub(crate) fn timed_lock(&self, timeout_ns: i64) -> bool {
        let ts = deadline_after(timeout_ns);
        unsafe { libc::pthread_mutex_timedlock(self.inner.get(), &ts) == 0 }
    }

    pub(crate) fn as_ptr(&self) -> *mut libc::pthread_mutex_t {
        self.inner.get()
    }
}

impl Drop for RawMutex {
    fn drop(&mut self) {
        // UB if still locked, same as dropping a locked std mutex.
        unsafe { libc::pthread_mutex_destroy(self.inner.get()) };
    }
}

unsafe fn init_with_priority_inheritance(mutex: *mut libc::pthread_mutex_t) -> bool {
    let mut attr = MaybeUninit::<libc::pthread_mutexattr_t>::uninit();
    let mut ret = libc::pthread_mutexattr_init(attr.as_mut_ptr());
    if ret != 0 {
        warn!(ret, "pthread_mutexattr_init failed");
        return false;
    }
    ret = libc::pthread_mutexattr_setprotocol(attr.as_mut_ptr(), libc::PTHREAD_PRIO_INHERIT);
    if ret != 0 {
        warn!(ret, "pthread_mutexattr_setprotocol failed");
    } else {
        ret = libc::pthread_mutex_init(mutex, attr.as_ptr());
        if ret != 0 {
            warn!(ret, "pthread_mutex_init with PRIO_INHERIT failed");
        }
    }
    libc::pthread_mutexattr_destroy(attr.as_mut_ptr());
    ret == 0
}

// ── Condition variable ───────────────────────────────────────────

pub(crate) struct RawCondvar {
    inner: UnsafeCell<libc::pthread_cond_t>,
}

unsafe impl Send for RawCondvar {}
unsafe impl Sync for RawCondvar {}

impl RawCondvar {
    pub(crate) fn new() -> Self {
        Self {
            inner: UnsafeCell::new(libc::PTHREAD_COND_INITIALIZER),
        }
    }

    pub(crate) fn notify_one(&self) {
        unsafe { libc::pthread_cond_signal(self.inner.get()) };
    }

    pub(crate) fn notify_all(&self) {
        unsafe { libc::pthread_cond_broadcast(self.inner.get()) };
    }

    /// # Safety
    /// The caller must hold `mutex` on this thread.
    pub(crate) unsafe fn wait(&self, mutex: &RawMutex) {
        libc::pthread_cond_wait(self.inner.get(), mutex.as_ptr());
    }

    /// Returns false on timeout. Either way the mutex is reacquired.
    ///
    /// # Safety
    /// The caller must hold `mutex` on this thread.
    pub(crate) unsafe fn timed_wait(&self, mutex: &RawMutex, timeout_ns: i64) -> bool {
        let ts = deadline_after(timeout_ns.max(0));
        libc::pthread_cond_timedwait(self.inner.get(), mutex.as_ptr(), &ts) == 0
    }
}

impl Drop for RawCondvar {
    fn drop(&mut self) {
        unsafe { libc::pthread_cond_destroy(self.inner.get()) };
    }
}

// ── Tests ────────────────────────────────────────────────────────
