//! Kestrel kernel library.
//!
//! An educational 32-bit x86 protected-mode kernel: bitmap-backed page
//! pools under a recursively-mapped page directory, a 48-vector interrupt
//! path over the legacy cascaded PIC, a preemptive round-robin thread
//! scheduler ticked by the PIT, and the blocking primitives built on it
//! (semaphore, recursive lock, bounded buffer).
//!
//! The library compiles for two targets: the bare-metal kernel
//! (`target_os = "none"`), and the host, where hardware access is stubbed
//! so the unit suite runs under the standard test harness.

#![no_std]

#[cfg(not(target_os = "none"))]
extern crate std;

#[macro_use]
pub mod print;

pub mod arch;
pub mod drivers;
pub mod error;
pub mod interrupts;
pub mod logger;
pub mod mm;
pub mod sched;
pub mod sync;

pub use error::KernelError;

/// Serializes host tests that touch process-global kernel state (the
/// interrupt-flag shim, the scheduler queues, the installed current
/// thread).
#[cfg(all(test, not(target_os = "none")))]
pub(crate) mod test_sync {
    use std::sync::{Mutex, MutexGuard};

    static LOCK: Mutex<()> = Mutex::new(());

    pub fn serialize() -> MutexGuard<'static, ()> {
        LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
