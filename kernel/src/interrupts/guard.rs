//! RAII interrupt-enable guard.
//!
//! The guard captures the interrupt flag at construction, writes the
//! requested state, and restores the captured state when dropped, on
//! every exit path. It is the only sanctioned way to build a critical
//! section in code that is not already running in an ISR.

use crate::arch;

pub struct InterruptGuard {
    saved: bool,
}

impl InterruptGuard {
    /// Enter a critical section: remember the flag, then mask interrupts.
    pub fn disabled() -> InterruptGuard {
        let saved = arch::interrupts_enabled();
        arch::disable_interrupts();
        InterruptGuard { saved }
    }

    /// Remember the flag, then unmask interrupts.
    pub fn enabled() -> InterruptGuard {
        let saved = arch::interrupts_enabled();
        arch::enable_interrupts();
        InterruptGuard { saved }
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        if self.saved {
            arch::enable_interrupts();
        } else {
            arch::disable_interrupts();
        }
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn guard_restores_the_captured_state() {
        let _serial = crate::test_sync::serialize();
        arch::enable_interrupts();
        {
            let _outer = InterruptGuard::disabled();
            assert!(!arch::interrupts_enabled());
            {
                let _inner = InterruptGuard::disabled();
                assert!(!arch::interrupts_enabled());
            }
            // The inner guard captured "disabled" and must not re-enable.
            assert!(!arch::interrupts_enabled());
        }
        assert!(arch::interrupts_enabled());
    }

    #[test]
    fn enabling_guard_restores_disabled_state() {
        let _serial = crate::test_sync::serialize();
        arch::disable_interrupts();
        {
            let _guard = InterruptGuard::enabled();
            assert!(arch::interrupts_enabled());
        }
        assert!(!arch::interrupts_enabled());
        arch::enable_interrupts();
    }
}
