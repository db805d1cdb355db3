//! Recursive kernel lock.
//!
//! A sleeping mutual-exclusion lock built on a binary [`Semaphore`]. The
//! owning thread may re-acquire freely; each nested acquire increments a
//! depth that release unwinds before the semaphore is finally released.
//! This is a thread-context primitive only; holding it across an ISR is
//! undefined.

use core::cell::UnsafeCell;
use core::ptr;

use super::semaphore::Semaphore;
use crate::interrupts::InterruptGuard;
use crate::sched::{self, Tcb};

pub struct RecursiveLock {
    inner: UnsafeCell<LockInner>,
    sema: Semaphore,
}

struct LockInner {
    owner: *mut Tcb,
    depth: u32,
}

// SAFETY: single-CPU kernel; the inner state is only touched inside
// `InterruptGuard::disabled()` scopes, which serializes all access.
unsafe impl Sync for RecursiveLock {}
// SAFETY: the owner pointer is bookkeeping, never owned data.
unsafe impl Send for RecursiveLock {}

impl RecursiveLock {
    pub const fn new() -> RecursiveLock {
        RecursiveLock {
            inner: UnsafeCell::new(LockInner {
                owner: ptr::null_mut(),
                depth: 0,
            }),
            sema: Semaphore::new(1),
        }
    }

    /// Take the lock, sleeping while another thread holds it. Re-entrant
    /// for the owner.
    pub fn acquire(&self) {
        let me = sched::current().as_ptr();
        {
            let _guard = InterruptGuard::disabled();
            // SAFETY: interrupts are disabled on a single CPU; exclusive.
            let inner = unsafe { &mut *self.inner.get() };
            if inner.owner == me {
                inner.depth += 1;
                return;
            }
        }
        self.sema.down();
        let _guard = InterruptGuard::disabled();
        // SAFETY: interrupts are disabled on a single CPU; exclusive.
        let inner = unsafe { &mut *self.inner.get() };
        debug_assert!(inner.owner.is_null() && inner.depth == 0);
        inner.owner = me;
        inner.depth = 1;
    }

    /// Unwind one acquire; the outermost release hands the lock on.
    pub fn release(&self) {
        let me = sched::current().as_ptr();
        {
            let _guard = InterruptGuard::disabled();
            // SAFETY: interrupts are disabled on a single CPU; exclusive.
            let inner = unsafe { &mut *self.inner.get() };
            assert!(inner.owner == me, "release by a thread that is not the owner");
            if inner.depth > 1 {
                inner.depth -= 1;
                return;
            }
            inner.owner = ptr::null_mut();
            inner.depth = 0;
        }
        self.sema.up();
    }

    /// Whether any thread currently owns the lock.
    pub fn is_held(&self) -> bool {
        let _guard = InterruptGuard::disabled();
        // SAFETY: interrupts are disabled on a single CPU; exclusive.
        unsafe { !(*self.inner.get()).owner.is_null() }
    }

    /// Nesting depth of the current ownership (0 when free).
    pub fn depth(&self) -> u32 {
        let _guard = InterruptGuard::disabled();
        // SAFETY: interrupts are disabled on a single CPU; exclusive.
        unsafe { (*self.inner.get()).depth }
    }

    #[cfg(all(test, not(target_os = "none")))]
    fn semaphore_count(&self) -> u32 {
        self.sema.count()
    }
}

impl Default for RecursiveLock {
    fn default() -> RecursiveLock {
        RecursiveLock::new()
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;
    use crate::sched::test_support::*;
    use crate::sched::ThreadState;

    #[test]
    fn acquire_release_on_a_free_lock_is_identity() {
        let _serial = crate::test_sync::serialize();
        reset();
        let mut a = make_thread(1, "a", ThreadState::Running);
        set_current(&mut a);

        let lock = RecursiveLock::new();
        lock.acquire();
        assert!(lock.is_held());
        lock.release();
        assert!(!lock.is_held());
        assert_eq!(lock.depth(), 0);
        assert_eq!(lock.semaphore_count(), 1);
    }

    #[test]
    fn reacquisition_by_the_owner_nests_without_blocking() {
        let _serial = crate::test_sync::serialize();
        reset();
        let mut a = make_thread(1, "a", ThreadState::Running);
        set_current(&mut a);

        let lock = RecursiveLock::new();
        lock.acquire();
        lock.acquire();
        assert_eq!(lock.depth(), 2);
        lock.release();
        assert_eq!(lock.depth(), 1);
        assert!(lock.is_held());
        lock.release();
        assert_eq!(lock.depth(), 0);
        assert!(!lock.is_held());
        assert_eq!(lock.semaphore_count(), 1);
    }

    #[test]
    #[should_panic(expected = "not the owner")]
    fn release_by_a_stranger_is_fatal() {
        let _serial = crate::test_sync::serialize();
        reset();
        let mut a = make_thread(1, "a", ThreadState::Running);
        let mut b = make_thread(2, "b", ThreadState::Running);
        set_current(&mut a);

        let lock = RecursiveLock::new();
        lock.acquire();
        set_current(&mut b);
        lock.release();
    }

    #[test]
    fn contended_acquire_parks_on_the_semaphore() {
        let _serial = crate::test_sync::serialize();
        reset();
        let mut a = make_thread(1, "a", ThreadState::Running);
        let mut b = make_thread(2, "b", ThreadState::Running);
        let mut idle = make_thread(3, "idle", ThreadState::Ready);
        set_current(&mut a);
        enqueue_ready(&mut idle);

        let lock = RecursiveLock::new();
        lock.acquire();
        assert_eq!(lock.semaphore_count(), 0);
        // B tries to take the held lock: it must end up blocked on the
        // semaphore's waiter queue while the CPU moves on.
        set_current(&mut b);
        lock.contended_acquire_first_step();
        assert_eq!(b.state(), ThreadState::Blocked);
        assert_eq!(idle.state(), ThreadState::Running);
        assert_eq!(lock.sema.waiter_count(), 1);
    }
}

#[cfg(all(test, not(target_os = "none")))]
impl RecursiveLock {
    /// Test-only first half of a contended `acquire`: park on the
    /// semaphore. On the host the context switch is a no-op, so control
    /// returns with the next ready thread installed as current.
    fn contended_acquire_first_step(&self) {
        self.sema.down_until_blocked();
    }
}
