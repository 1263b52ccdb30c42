//! Deadlock-free multi-mutex acquisition.
//!
//! The capability hierarchy already defines the one legal acquisition
//! sequence, so taking several mutexes together just means sorting by
//! (order, handle) and locking ascending; every caller converges on
//! the same sequence, so the group cannot deadlock against itself.
//! When two of the mutexes share an order class, the later ones take
//! the unchecked path, the same escape hatch as
//! [`Mutex::lock_unchecked`].

use crate::mutex::{Mutex, MutexGuard};

fn key<T>(m: &Mutex<T>) -> (u32, usize) {
    (m.order_index(), m.handle())
}

/// Locks the second of two same-group mutexes: checked when its order
/// is new to the group, unchecked when it repeats one.
fn lock_after<'a, T>(m: &'a Mutex<T>, taken_order: u32) -> MutexGuard<'a, T> {
    if m.order_index() == taken_order {
        m.lock_unchecked()
    } else {
        m.lock()
    }
}

/// Acquires both mutexes without deadlock risk among multi-lock
/// callers, returning the guards in argument order.
pub fn lock_pair<'a, 'b, T, U>(
    a: &'a Mutex<T>,
    b: &'b Mutex<U>,
) -> (MutexGuard<'a, T>, MutexGuard<'b, U>) {
    if key(a) <= key(b) {
        let ga = a.lock();
        let gb = lock_after(b, a.order_index());
        (ga, gb)
    } else {
        let gb = b.lock();
        let ga = lock_after(a, b.order_index());
        (ga, gb)
    }
}

/// Three-mutex variant of [`lock_pair`].
pub fn lock_triple<'a, 'b, 'c, T, U, V>(
    a: &'a Mutex<T>,
    b: &'b Mutex<U>,
    c: &'c Mutex<V>,
) -> (MutexGuard<'a, T>, MutexGuard<'b, U>, MutexGuard<'c, V>) {
    // rank each mutex by its position in the sorted key sequence
    let mut keys = [key(a), key(b), key(c)];
    keys.sort_unstable();

    let rank = |k: (u32, usize)| keys.iter().position(|&x| x == k).unwrap();
    let (ra, rb, rc) = (rank(key(a)), rank(key(b)), rank(key(c)));

    let mut ga = None;
    let mut gb = None;
    let mut gc = None;
    let mut taken_order = None;
    for slot in 0..3 {
        if ra == slot {
            ga = Some(match taken_order {
                Some(order) => lock_after(a, order),
                None => a.lock(),
            });
            taken_order = Some(a.order_index());
        } else if rb == slot {
            gb = Some(match taken_order {
                Some(order) => lock_after(b, order),
                None => b.lock(),
            });
            taken_order = Some(b.order_index());
        } else if rc == slot {
            gc = Some(match taken_order {
                Some(order) => lock_after(c, order),
                None => c.lock(),
            });
            taken_order = Some(c.order_index());
        }
    }
    (ga.unwrap(), gb.unwrap(), gc.unwrap())
}

// ── Tests ────────────────────────────────────────────────────────
