//! Blocking synchronization primitives, layered bottom-up: the semaphore
//! sits directly on the scheduler, the recursive lock on the semaphore,
//! and the bounded buffer on the lock.

pub mod bounded;
pub mod lock;
pub mod semaphore;

pub use bounded::BoundedBuffer;
pub use lock::RecursiveLock;
pub use semaphore::Semaphore;
