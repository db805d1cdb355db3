//! Assembly contracts provided by the loader object.
//!
//! The boot sector, second-stage loader and the handful of instruction-level
//! stubs live outside this crate. The kernel is linked against them and
//! assumes exactly the symbols below:
//!
//! - `__vector_stubs`: one entry point per interrupt vector. Each stub
//!   pushes a uniform frame, calls [`crate::interrupts::dispatch`] with the
//!   vector number, sends the PIC end-of-interrupt, and returns with `iret`.
//! - `__thread_switch`: pushes the callee-saved registers on the outgoing
//!   stack, stores the outgoing stack pointer through `old_sp_slot`, loads
//!   the incoming one from `new_sp_slot`, pops the callee-saved registers
//!   and returns on the incoming stack.
//! - port I/O, EFLAGS/ESP accessors, `lidt` and `hlt` wrappers.

/// Number of interrupt vectors the loader provides stubs for.
pub const VECTOR_STUB_COUNT: usize = 48;

/// Entry point of a per-vector interrupt stub.
pub type VectorStub = unsafe extern "C" fn();

/// Operand for the `lidt` instruction.
#[repr(C, packed)]
pub struct DescriptorTablePointer {
    /// Table size in bytes, minus one.
    pub limit: u16,
    /// Linear address of the first descriptor.
    pub base: u32,
}

extern "C" {
    /// Per-vector interrupt entry stubs, indexed by vector number.
    pub static __vector_stubs: [VectorStub; VECTOR_STUB_COUNT];

    /// The context-switch routine.
    pub fn __thread_switch(old_sp_slot: *mut *mut u32, new_sp_slot: *mut *mut u32);

    /// Write one byte to an I/O port.
    pub fn __outb(port: u16, value: u8);

    /// Read one byte from an I/O port.
    pub fn __inb(port: u16) -> u8;

    /// Set the interrupt-enable flag (`sti`).
    pub fn __sti();

    /// Clear the interrupt-enable flag (`cli`).
    pub fn __cli();

    /// Read the EFLAGS register.
    pub fn __read_eflags() -> u32;

    /// Read the current stack pointer.
    pub fn __read_esp() -> u32;

    /// Load the interrupt descriptor table register.
    pub fn __lidt(pointer: *const DescriptorTablePointer);

    /// Halt until the next interrupt.
    pub fn __hlt();
}
