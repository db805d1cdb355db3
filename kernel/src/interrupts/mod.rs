//! Interrupt dispatch.
//!
//! The loader provides one tiny assembly stub per vector; every stub
//! pushes a uniform frame and calls [`interrupt_dispatch`] with its vector
//! number. From there a fixed 48-slot table of registered handlers takes
//! over. An unhandled CPU exception is fatal; an unclaimed device IRQ is
//! dropped (the stub still sends the PIC end-of-interrupt).

pub mod guard;
pub mod idt;
pub mod pic;

pub use guard::InterruptGuard;

use core::cell::UnsafeCell;

/// Number of installed vectors: 32 CPU exceptions + 16 remapped IRQs.
pub const VECTOR_COUNT: usize = 48;

/// Vectors below this are CPU exceptions.
pub const EXCEPTION_COUNT: usize = 32;

/// A registered interrupt handler; receives the vector number.
pub type Handler = fn(u8);

struct HandlerTable {
    slots: [Option<Handler>; VECTOR_COUNT],
}

struct HandlerCell(UnsafeCell<HandlerTable>);

// SAFETY: single-CPU kernel. The table is only written under
// `InterruptGuard::disabled()` and only read from interrupt context, where
// the CPU has already masked interrupts; all access is serialized.
unsafe impl Sync for HandlerCell {}

static HANDLERS: HandlerCell = HandlerCell(UnsafeCell::new(HandlerTable {
    slots: [None; VECTOR_COUNT],
}));

/// Install `handler` for `vector`, replacing any previous registration.
pub fn register(vector: u8, handler: Handler) {
    assert!((vector as usize) < VECTOR_COUNT, "vector out of range");
    let _guard = InterruptGuard::disabled();
    // SAFETY: interrupts are disabled on a single CPU; no other access to
    // the table can be live.
    let table = unsafe { &mut *HANDLERS.0.get() };
    table.slots[vector as usize] = Some(handler);
}

/// Entry point the per-vector stubs call.
#[no_mangle]
pub extern "C" fn interrupt_dispatch(vector: u32) {
    let index = vector as usize;
    assert!(index < VECTOR_COUNT, "vector out of range");
    // SAFETY: dispatch runs with interrupts masked (interrupt gates clear
    // IF on entry); reads are serialized with `register`.
    let handler = unsafe { (*HANDLERS.0.get()).slots[index] };
    match handler {
        Some(handler) => handler(vector as u8),
        None if index < EXCEPTION_COUNT => {
            log::error!(target: "intr", "unhandled {}", vector_name(vector as u8));
            crate::println!("unhandled {}", vector_name(vector as u8));
            crate::arch::halt();
        }
        None => {
            // Unclaimed device IRQ; the stub has already sent the EOI.
        }
    }
}

/// Human-readable name for each installed vector.
pub fn vector_name(vector: u8) -> &'static str {
    const NAMES: [&str; VECTOR_COUNT] = [
        "exception 0x00 #DE divide error",
        "exception 0x01 #DB debug",
        "exception 0x02 NMI",
        "exception 0x03 #BP breakpoint",
        "exception 0x04 #OF overflow",
        "exception 0x05 #BR bound range exceeded",
        "exception 0x06 #UD invalid opcode",
        "exception 0x07 #NM device not available",
        "exception 0x08 #DF double fault",
        "exception 0x09 (reserved)",
        "exception 0x0a #TS invalid TSS",
        "exception 0x0b #NP segment not present",
        "exception 0x0c #SS stack-segment fault",
        "exception 0x0d #GP general protection fault",
        "exception 0x0e #PF page fault",
        "exception 0x0f (reserved)",
        "exception 0x10 #MF x87 floating-point error",
        "exception 0x11 #AC alignment check",
        "exception 0x12 #MC machine check",
        "exception 0x13 #XM SIMD floating-point error",
        "exception 0x14 #VE virtualization exception",
        "exception 0x15 (reserved)",
        "exception 0x16 (reserved)",
        "exception 0x17 (reserved)",
        "exception 0x18 (reserved)",
        "exception 0x19 (reserved)",
        "exception 0x1a (reserved)",
        "exception 0x1b (reserved)",
        "exception 0x1c (reserved)",
        "exception 0x1d (reserved)",
        "exception 0x1e #SX security exception",
        "exception 0x1f (reserved)",
        "irq 0x20 timer",
        "irq 0x21 keyboard",
        "irq 0x22 cascade",
        "irq 0x23 COM2",
        "irq 0x24 COM1",
        "irq 0x25 LPT2",
        "irq 0x26 floppy",
        "irq 0x27 LPT1",
        "irq 0x28 real-time clock",
        "irq 0x29 (unassigned)",
        "irq 0x2a (unassigned)",
        "irq 0x2b (unassigned)",
        "irq 0x2c PS/2 mouse",
        "irq 0x2d FPU",
        "irq 0x2e primary ATA",
        "irq 0x2f secondary ATA",
    ];
    NAMES
        .get(vector as usize)
        .copied()
        .unwrap_or("unknown vector")
}
