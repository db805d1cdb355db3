//! Producer/consumer bounded buffer.
//!
//! A 128-slot ring with a single producer slot and a single consumer
//! slot: at most one thread may sleep on either side at a time, and a
//! second simultaneous sleeper is a hard error. Head, tail and the sleep
//! slots are all mutated under the buffer's lock, including the
//! read-then-advance in `get`, which closes the classic two-consumer
//! window. The keyboard ISR uses this type to hand decoded keys to its
//! consumer thread.

use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use core::ptr::{self, NonNull};

use super::lock::RecursiveLock;
use crate::interrupts::InterruptGuard;
use crate::sched::{self, Tcb};

/// Ring size; one slot stays empty to distinguish full from empty, so the
/// buffer holds at most `CAPACITY - 1` items.
pub const CAPACITY: usize = 128;

pub struct BoundedBuffer<T: Copy> {
    lock: RecursiveLock,
    inner: UnsafeCell<RingInner<T>>,
}

struct RingInner<T: Copy> {
    slots: [MaybeUninit<T>; CAPACITY],
    /// Next slot `put` writes.
    head: usize,
    /// Next slot `get` reads.
    tail: usize,
    producer: *mut Tcb,
    consumer: *mut Tcb,
}

// SAFETY: single-CPU kernel; the ring is only touched while holding the
// buffer lock inside an interrupt-disabled scope.
unsafe impl<T: Copy + Send> Sync for BoundedBuffer<T> {}
// SAFETY: the sleeper pointers are bookkeeping, never owned data.
unsafe impl<T: Copy + Send> Send for BoundedBuffer<T> {}

impl<T: Copy> RingInner<T> {
    fn next(index: usize) -> usize {
        (index + 1) % CAPACITY
    }

    fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    fn is_full(&self) -> bool {
        Self::next(self.head) == self.tail
    }

    fn len(&self) -> usize {
        (self.head + CAPACITY - self.tail) % CAPACITY
    }
}

impl<T: Copy> BoundedBuffer<T> {
    pub const fn new() -> BoundedBuffer<T> {
        BoundedBuffer {
            lock: RecursiveLock::new(),
            inner: UnsafeCell::new(RingInner {
                slots: [MaybeUninit::uninit(); CAPACITY],
                head: 0,
                tail: 0,
                producer: ptr::null_mut(),
                consumer: ptr::null_mut(),
            }),
        }
    }

    /// Append `item`, sleeping in the producer slot while the ring is
    /// full. Only one producer may sleep at a time.
    pub fn put(&self, item: T) {
        let _guard = InterruptGuard::disabled();
        loop {
            self.lock.acquire();
            // SAFETY: buffer lock held, interrupts disabled; exclusive.
            let inner = unsafe { &mut *self.inner.get() };
            if inner.is_full() {
                assert!(
                    inner.producer.is_null(),
                    "a second producer tried to sleep on the buffer"
                );
                inner.producer = sched::current().as_ptr();
                self.lock.release();
                sched::block_current();
                continue;
            }
            inner.slots[inner.head] = MaybeUninit::new(item);
            inner.head = RingInner::<T>::next(inner.head);
            let sleeper = inner.consumer;
            inner.consumer = ptr::null_mut();
            self.lock.release();
            if let Some(consumer) = NonNull::new(sleeper) {
                sched::unblock(consumer);
            }
            return;
        }
    }

    /// Remove the oldest item, sleeping in the consumer slot while the
    /// ring is empty. Only one consumer may sleep at a time.
    pub fn get(&self) -> T {
        let _guard = InterruptGuard::disabled();
        loop {
            self.lock.acquire();
            // SAFETY: buffer lock held, interrupts disabled; exclusive.
            let inner = unsafe { &mut *self.inner.get() };
            if inner.is_empty() {
                assert!(
                    inner.consumer.is_null(),
                    "a second consumer tried to sleep on the buffer"
                );
                inner.consumer = sched::current().as_ptr();
                self.lock.release();
                sched::block_current();
                continue;
            }
            // SAFETY: head != tail, so the slot at tail holds a value a
            // previous put wrote and nothing has consumed since. The tail
            // advances under the same lock hold.
            let item = unsafe { inner.slots[inner.tail].assume_init() };
            inner.tail = RingInner::<T>::next(inner.tail);
            let sleeper = inner.producer;
            inner.producer = ptr::null_mut();
            self.lock.release();
            if let Some(producer) = NonNull::new(sleeper) {
                sched::unblock(producer);
            }
            return item;
        }
    }

    /// Items currently buffered.
    pub fn len(&self) -> usize {
        let _guard = InterruptGuard::disabled();
        self.lock.acquire();
        // SAFETY: buffer lock held, interrupts disabled; exclusive.
        let len = unsafe { (*self.inner.get()).len() };
        self.lock.release();
        len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Most items the ring can hold at once.
    pub fn capacity(&self) -> usize {
        CAPACITY - 1
    }
}

impl<T: Copy> Default for BoundedBuffer<T> {
    fn default() -> BoundedBuffer<T> {
        BoundedBuffer::new()
    }
}
