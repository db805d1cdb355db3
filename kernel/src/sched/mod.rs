//! Cooperative kernel threads with preemptive round-robin scheduling.

pub mod queue;
pub mod scheduler;
pub mod thread;

pub use scheduler::{
    block_current, current, exit_current, spawn, thread_count, unblock, yield_now, ThreadEntry,
    DEFAULT_PRIORITY, TIMER_VECTOR,
};
pub use thread::{Tcb, ThreadState};

#[cfg(target_os = "none")]
pub use scheduler::init;

#[cfg(all(test, not(target_os = "none")))]
pub(crate) use scheduler::test_support;
