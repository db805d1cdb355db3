//! x86 (32-bit protected mode) primitives.

pub mod port;
pub mod stubs;

/// Interrupt-enable bit in EFLAGS.
const EFLAGS_IF: u32 = 0x0200;

/// Whether maskable interrupts are currently enabled.
pub fn interrupts_enabled() -> bool {
    // SAFETY: reading EFLAGS has no side effects.
    let eflags = unsafe { stubs::__read_eflags() };
    eflags & EFLAGS_IF != 0
}

pub fn enable_interrupts() {
    // SAFETY: `sti` is always legal at CPL 0.
    unsafe { stubs::__sti() };
}

pub fn disable_interrupts() {
    // SAFETY: `cli` is always legal at CPL 0.
    unsafe { stubs::__cli() };
}

/// Current value of ESP. The scheduler masks this down to a page boundary
/// to find the running thread's control block.
pub fn stack_pointer() -> usize {
    // SAFETY: reading ESP has no side effects.
    unsafe { stubs::__read_esp() as usize }
}

/// Switch from the thread whose saved-SP slot is `old_sp_slot` to the one
/// whose slot is `new_sp_slot`. Returns when the outgoing thread is next
/// dispatched.
///
/// # Safety
///
/// Both slots must point at the saved-stack-pointer field of a live thread
/// control block, and the incoming stack must hold either a frame produced
/// by a previous switch or a freshly built spawn frame.
pub unsafe fn switch_context(old_sp_slot: *mut *mut u32, new_sp_slot: *mut *mut u32) {
    // SAFETY: forwarded contract; see above.
    unsafe { stubs::__thread_switch(old_sp_slot, new_sp_slot) };
}

/// Stop executing. Interrupts may still wake the CPU between `hlt`
/// instructions; the loop makes this terminal regardless.
pub fn halt() -> ! {
    loop {
        // SAFETY: `hlt` is always legal at CPL 0.
        unsafe { stubs::__hlt() };
    }
}
