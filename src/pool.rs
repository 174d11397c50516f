//! Per-origin bounded connection pool.
//!
//! Authored from scratch for this crate -- the donor repo has no standalone
//! pool module to generalize (its async hyper client pools connections
//! internally via `hyper::client::pool`, which this crate does not depend
//! on). Grounded instead directly on `original_source/urllib3/
//! connectionpool.py`'s `HTTPConnectionPool`: a bounded LIFO queue seeded
//! with `maxsize` `None` placeholders, where a placeholder stands for "a
//! permit to create a new connection" and a real `Connection` stands for
//! "an idle, ready-to-reuse connection". Translated from Python's
//! `queue.LifoQueue` + GIL-protected refcounts to `std::sync::{Mutex,
//! Condvar}` around a `Vec` used as a stack.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::connection::{ConnState, Connection};
use crate::error::{Error, Result};

enum Slot {
    Empty,
    Idle(Connection),
}

struct Inner {
    slots: Vec<Slot>,
    closed: bool,
}

/// A bounded LIFO pool of connections to a single origin (scheme + host +
/// port), spec §4.7. `maxsize` placeholders are handed out as permits: a
/// caller that pops an `Empty` slot is responsible for dialing a new
/// connection and returning it (or the slot) to the pool when done.
pub struct Pool {
    inner: Mutex<Inner>,
    not_empty: Condvar,
    maxsize: usize,
}

/// What `Pool::get` handed the caller: either a ready-to-use idle
/// connection, or a bare permit (the caller must dial).
pub enum Lease {
    Idle(Connection),
    Permit,
}

impl Pool {
    pub fn new(maxsize: usize) -> Pool {
        let slots = (0..maxsize).map(|_| Slot::Empty).collect();
        Pool {
            inner: Mutex::new(Inner { slots, closed: false }),
            not_empty: Condvar::new(),
            maxsize,
        }
    }

    /// Blocks (up to `timeout`, or forever if `None`) for either an idle
    /// connection or a free permit, per spec §4.7: "blocks the caller ...
    /// until either an idle connection becomes available or the pool's
    /// timeout expires".
    pub fn get(&self, timeout: Option<Duration>) -> Result<Lease> {
        let mut guard = self.inner.lock().expect("pool mutex poisoned");
        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            if guard.closed {
                return Err(Error::closed_pool());
            }
            if let Some(pos) = guard.slots.iter().rposition(|s| matches!(s, Slot::Idle(_))) {
                let slot = guard.slots.remove(pos);
                return match slot {
                    Slot::Idle(conn) => Ok(Lease::Idle(conn)),
                    Slot::Empty => unreachable!(),
                };
            }
            if let Some(pos) = guard.slots.iter().rposition(|s| matches!(s, Slot::Empty)) {
                guard.slots.remove(pos);
                return Ok(Lease::Permit);
            }

            match deadline {
                None => {
                    guard = self.not_empty.wait(guard).expect("pool mutex poisoned");
                }
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        return Err(Error::empty_pool());
                    }
                    let (g, timeout_result) = self
                        .not_empty
                        .wait_timeout(guard, d - now)
                        .expect("pool mutex poisoned");
                    guard = g;
                    if timeout_result.timed_out() && !guard.slots.iter().any(|s| matches!(s, Slot::Idle(_) | Slot::Empty)) {
                        return Err(Error::empty_pool());
                    }
                }
            }
        }
    }

    /// Returns a connection to the pool. A connection in `MustClose`/
    /// `Closed` state is dropped and its slot replaced with a fresh permit,
    /// per spec §4.7's "a `MustClose` connection is discarded, its slot
    /// becoming a free permit again".
    pub fn put(&self, mut conn: Connection) {
        let mut guard = self.inner.lock().expect("pool mutex poisoned");
        let keep = matches!(conn.state, ConnState::Idle) && !guard.closed;
        if keep {
            conn.mark_idle();
            guard.slots.push(Slot::Idle(conn));
        } else {
            conn.close();
            guard.slots.push(Slot::Empty);
        }
        self.not_empty.notify_one();
    }

    /// Returns a bare permit (e.g. a dial attempt failed) so another waiter
    /// can try.
    pub fn release_permit(&self) {
        let mut guard = self.inner.lock().expect("pool mutex poisoned");
        guard.slots.push(Slot::Empty);
        self.not_empty.notify_one();
    }

    /// Closes the pool: subsequent `get` calls fail immediately, and all
    /// currently idle connections are dropped, per spec §4.7.
    pub fn close(&self) {
        let mut guard = self.inner.lock().expect("pool mutex poisoned");
        guard.closed = true;
        for slot in guard.slots.iter_mut() {
            if let Slot::Idle(conn) = slot {
                conn.close();
            }
            *slot = Slot::Empty;
        }
        self.not_empty.notify_all();
    }

    pub fn maxsize(&self) -> usize {
        self.maxsize
    }

    /// Count of currently idle (reusable) connections, for diagnostics/tests.
    pub fn idle_count(&self) -> usize {
        let guard = self.inner.lock().expect("pool mutex poisoned");
        guard.slots.iter().filter(|s| matches!(s, Slot::Idle(_))).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_pool_hands_out_permits_up_to_maxsize() {
        let pool = Pool::new(2);
        assert!(matches!(pool.get(Some(Duration::from_millis(10))).unwrap(), Lease::Permit));
        assert!(matches!(pool.get(Some(Duration::from_millis(10))).unwrap(), Lease::Permit));
        assert!(pool.get(Some(Duration::from_millis(10))).is_err());
    }

    #[test]
    fn released_permit_can_be_reacquired() {
        let pool = Pool::new(1);
        assert!(matches!(pool.get(Some(Duration::from_millis(10))).unwrap(), Lease::Permit));
        pool.release_permit();
        assert!(matches!(pool.get(Some(Duration::from_millis(10))).unwrap(), Lease::Permit));
    }

    #[test]
    fn closed_pool_rejects_get() {
        let pool = Pool::new(1);
        pool.close();
        assert!(pool.get(Some(Duration::from_millis(10))).is_err());
    }

    #[test]
    fn get_times_out_when_exhausted() {
        let pool = Pool::new(1);
        let _lease = pool.get(Some(Duration::from_millis(10))).unwrap();
        let start = Instant::now();
        let result = pool.get(Some(Duration::from_millis(50)));
        assert!(result.is_err());
        assert!(start.elapsed() >= Duration::from_millis(40));
    }
}
