//! 8253/8254 programmable interval timer.
//!
//! Channel 0 drives the scheduler tick. Mode 2 (rate generator) divides
//! the chip's fixed input clock by a 16-bit reload value, raising IRQ 0
//! each time the counter hits one.

// Divisor math is shared with the host tests; the port writes are not.
#![allow(dead_code)]

/// The PIT's fixed input clock.
pub const INPUT_FREQUENCY_HZ: u32 = 1_193_181;

/// Tick rate the kernel runs at: the scheduler's quantum granularity.
pub const DEFAULT_TICK_HZ: u32 = 4_000;

/// Channel 0 data port.
pub const CHANNEL0_PORT: u16 = 0x40;

/// Control word port.
pub const CONTROL_PORT: u16 = 0x43;

/// Channel 0, lobyte/hibyte access, mode 2, binary counting.
const CONTROL_WORD: u8 = 0b0011_0100;

/// Reload value for a requested rate, clamped to the 16-bit counter.
pub fn divisor_for(hz: u32) -> u16 {
    let divisor = INPUT_FREQUENCY_HZ / hz.max(1);
    divisor.clamp(1, u32::from(u16::MAX)) as u16
}

/// Program channel 0 for `hz` interrupts per second.
#[cfg(target_os = "none")]
pub fn configure(hz: u32) {
    use crate::arch::x86::port::Port;

    let divisor = divisor_for(hz);
    let mut control = Port::new(CONTROL_PORT);
    let mut channel0 = Port::new(CHANNEL0_PORT);
    // SAFETY: the standard programming sequence: control word first, then
    // the reload value low byte before high byte.
    unsafe {
        control.write(CONTROL_WORD);
        channel0.write(divisor as u8);
        channel0.write((divisor >> 8) as u8);
    }
    log::info!(target: "timer", "pit channel 0 at {hz} Hz (divisor {divisor})");
}
