//! Host-build stand-ins for the CPU primitives.
//!
//! The interrupt flag becomes a process-global atomic and the context
//! switch becomes a recorded no-op. This is a test seam only; nothing in
//! this file is compiled for the bare-metal target.
//!
//! The surface is deliberately asymmetric with [`super::x86`]: the host
//! adds `context_switch_count` for test assertions and omits
//! `stack_pointer`, whose only callers (the scheduler's current-thread
//! mask and boot-stack adoption) are bare-metal-gated; host tests install
//! the current thread explicitly instead of masking a stack pointer.

use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

static INTERRUPTS_ENABLED: AtomicBool = AtomicBool::new(true);
static CONTEXT_SWITCHES: AtomicUsize = AtomicUsize::new(0);

pub fn interrupts_enabled() -> bool {
    INTERRUPTS_ENABLED.load(Ordering::SeqCst)
}

pub fn enable_interrupts() {
    INTERRUPTS_ENABLED.store(true, Ordering::SeqCst);
}

pub fn disable_interrupts() {
    INTERRUPTS_ENABLED.store(false, Ordering::SeqCst);
}

/// Host stand-in for the context-switch routine. Records the call so tests
/// can observe that a switch was requested; control simply continues in
/// the caller.
///
/// # Safety
///
/// Callers must uphold the same contract as the real routine: both slots
/// must point at the saved-stack-pointer field of a live thread control
/// block. The host shim never dereferences them.
pub unsafe fn switch_context(_old_sp_slot: *mut *mut u32, _new_sp_slot: *mut *mut u32) {
    CONTEXT_SWITCHES.fetch_add(1, Ordering::SeqCst);
}

/// Number of context switches requested since process start.
pub fn context_switch_count() -> usize {
    CONTEXT_SWITCHES.load(Ordering::SeqCst)
}

pub fn halt() -> ! {
    panic!("cpu halted");
}
