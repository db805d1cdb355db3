//! Counting semaphore.
//!
//! Dijkstra's P/V pair on top of the scheduler. `down` uses the Mesa
//! discipline: a woken waiter loops back and re-checks the count, so a
//! racing `down` may still win the unit. Waiters queue FIFO through their
//! TCB's state node; `up` wakes the longest waiter.

use core::cell::UnsafeCell;
use core::ptr::addr_of_mut;

use crate::interrupts::InterruptGuard;
use crate::sched::{self, ThreadState};
use crate::sched::queue::ThreadQueue;

pub struct Semaphore {
    inner: UnsafeCell<SemInner>,
}

struct SemInner {
    count: u32,
    waiters: ThreadQueue,
}

// SAFETY: single-CPU kernel; the inner state is only touched inside
// `InterruptGuard::disabled()` scopes, which serializes all access.
unsafe impl Sync for Semaphore {}
// SAFETY: the queue holds raw pointers to TCBs that are never owned by the
// semaphore; moving the semaphore between threads is harmless.
unsafe impl Send for Semaphore {}

impl Semaphore {
    pub const fn new(count: u32) -> Semaphore {
        Semaphore {
            inner: UnsafeCell::new(SemInner {
                count,
                waiters: ThreadQueue::new(),
            }),
        }
    }

    /// P: wait until a unit is available, then take it.
    pub fn down(&self) {
        let _guard = InterruptGuard::disabled();
        loop {
            // SAFETY: interrupts are disabled on a single CPU; exclusive.
            let inner = unsafe { &mut *self.inner.get() };
            if inner.count > 0 {
                inner.count -= 1;
                return;
            }
            let cur = sched::current();
            // SAFETY: `cur` is the live running thread; a running thread
            // sits in no state queue, so its node is free to use here.
            unsafe {
                assert_eq!(cur.as_ref().state(), ThreadState::Running);
                inner
                    .waiters
                    .push_back(addr_of_mut!((*cur.as_ptr()).state_node));
            }
            sched::block_current();
            // Woken by `up`; re-compete for the count.
        }
    }

    /// V: release a unit and wake the longest waiter, if any.
    pub fn up(&self) {
        let _guard = InterruptGuard::disabled();
        // SAFETY: interrupts are disabled on a single CPU; exclusive.
        let inner = unsafe { &mut *self.inner.get() };
        inner.count += 1;
        // SAFETY: queued waiters are live blocked threads.
        if let Some(waiter) = unsafe { inner.waiters.pop_front() } {
            sched::unblock(waiter);
        }
    }

    pub fn count(&self) -> u32 {
        let _guard = InterruptGuard::disabled();
        // SAFETY: interrupts are disabled on a single CPU; exclusive.
        unsafe { (*self.inner.get()).count }
    }

    pub fn waiter_count(&self) -> usize {
        let _guard = InterruptGuard::disabled();
        // SAFETY: interrupts are disabled on a single CPU; exclusive.
        unsafe { (*self.inner.get()).waiters.len() }
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;
    use crate::sched::test_support::*;

    #[test]
    fn down_then_up_with_no_waiters_is_identity() {
        let _serial = crate::test_sync::serialize();
        reset();
        let sema = Semaphore::new(2);
        sema.down();
        assert_eq!(sema.count(), 1);
        sema.up();
        assert_eq!(sema.count(), 2);
        assert_eq!(sema.waiter_count(), 0);
    }

    #[test]
    fn up_with_no_waiters_just_banks_the_unit() {
        let _serial = crate::test_sync::serialize();
        reset();
        let sema = Semaphore::new(0);
        sema.up();
        sema.up();
        assert_eq!(sema.count(), 2);
    }

    #[test]
    fn waiters_are_woken_fifo() {
        let _serial = crate::test_sync::serialize();
        reset();
        let sema = Semaphore::new(0);

        // A, B and C block on the semaphore in that order; a fourth
        // thread keeps the scheduler busy while they do.
        let mut a = make_thread(1, "a", ThreadState::Running);
        let mut b = make_thread(2, "b", ThreadState::Ready);
        let mut c = make_thread(3, "c", ThreadState::Ready);
        let mut d = make_thread(4, "d", ThreadState::Ready);
        enqueue_ready(&mut b);
        enqueue_ready(&mut c);
        enqueue_ready(&mut d);

        set_current(&mut a);
        sema.down_until_blocked();
        sema.down_until_blocked();
        sema.down_until_blocked();
        assert_eq!(sema.waiter_count(), 3);
        assert_eq!(a.state(), ThreadState::Blocked);
        assert_eq!(b.state(), ThreadState::Blocked);
        assert_eq!(c.state(), ThreadState::Blocked);

        // D releases three units: the wake order must be A, B, C.
        sema.up();
        sema.up();
        sema.up();
        assert_eq!(ready_tids(), [1, 2, 3]);
        assert_eq!(sema.waiter_count(), 0);
    }
}

#[cfg(all(test, not(target_os = "none")))]
impl Semaphore {
    /// Test-only single step of `down` for a zero count: park the current
    /// thread on the waiter queue and dispatch the next ready thread. The
    /// host context switch is a no-op, so this returns with the *next*
    /// thread installed as current instead of looping.
    pub(crate) fn down_until_blocked(&self) {
        let _guard = InterruptGuard::disabled();
        // SAFETY: interrupts "disabled" via the host shim; serialized by
        // the test lock.
        let inner = unsafe { &mut *self.inner.get() };
        assert_eq!(inner.count, 0);
        let cur = sched::current();
        // SAFETY: the test keeps all fabricated TCBs alive.
        unsafe {
            inner
                .waiters
                .push_back(addr_of_mut!((*cur.as_ptr()).state_node));
        }
        sched::block_current();
    }
}
