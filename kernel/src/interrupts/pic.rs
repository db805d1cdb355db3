//! Legacy cascaded 8259A interrupt controller.
//!
//! The pair is initialized with the standard ICW1..ICW4 sequence, remapping
//! the master's IRQs to vectors 0x20..0x27 and the slave's to 0x28..0x2F so
//! device interrupts stay clear of the CPU exception range. Every line
//! starts masked; subsystems unmask their own line once their handler is
//! registered.

// The ICW words and mask math are only reachable from the bare-metal path.
#![allow(dead_code)]

/// Master command/status port.
pub const MASTER_COMMAND: u16 = 0x20;
/// Master data/mask port.
pub const MASTER_DATA: u16 = 0x21;
/// Slave command/status port.
pub const SLAVE_COMMAND: u16 = 0xA0;
/// Slave data/mask port.
pub const SLAVE_DATA: u16 = 0xA1;

/// First vector the master delivers after remapping.
pub const MASTER_VECTOR_BASE: u8 = 0x20;
/// First vector the slave delivers after remapping.
pub const SLAVE_VECTOR_BASE: u8 = 0x28;

/// ICW1: edge-triggered, cascade mode, ICW4 follows.
const ICW1_INIT: u8 = 0x11;
/// ICW3 (master): a slave hangs off IR line 2.
const ICW3_SLAVE_ON_IR2: u8 = 0x04;
/// ICW3 (slave): cascade identity 2.
const ICW3_SLAVE_ID: u8 = 0x02;
/// ICW4: 8086 mode, normal EOI.
const ICW4_8086: u8 = 0x01;
/// OCW2: non-specific end of interrupt.
const OCW2_EOI: u8 = 0x20;

/// Which chip serves `vector`, and the line's bit in that chip's mask
/// register. `None` for vectors outside the remapped IRQ range.
fn mask_bit(vector: u8) -> Option<(Chip, u8)> {
    match vector {
        v if (MASTER_VECTOR_BASE..MASTER_VECTOR_BASE + 8).contains(&v) => {
            Some((Chip::Master, v - MASTER_VECTOR_BASE))
        }
        v if (SLAVE_VECTOR_BASE..SLAVE_VECTOR_BASE + 8).contains(&v) => {
            Some((Chip::Slave, v - SLAVE_VECTOR_BASE))
        }
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Chip {
    Master,
    Slave,
}

#[cfg(target_os = "none")]
mod hw {
    use super::*;
    use crate::arch::x86::port::Port;

    /// Run the ICW sequence on both chips and mask every line.
    pub fn init() {
        let mut master_command = Port::new(MASTER_COMMAND);
        let mut master_data = Port::new(MASTER_DATA);
        let mut slave_command = Port::new(SLAVE_COMMAND);
        let mut slave_data = Port::new(SLAVE_DATA);
        // SAFETY: the standard 8259A initialization sequence; each write is
        // the next word the chip expects.
        unsafe {
            master_command.write(ICW1_INIT);
            master_data.write(MASTER_VECTOR_BASE);
            master_data.write(ICW3_SLAVE_ON_IR2);
            master_data.write(ICW4_8086);

            slave_command.write(ICW1_INIT);
            slave_data.write(SLAVE_VECTOR_BASE);
            slave_data.write(ICW3_SLAVE_ID);
            slave_data.write(ICW4_8086);

            // OCW1: a set bit masks the line. Start with everything off.
            master_data.write(0xFF);
            slave_data.write(0xFF);
        }
        log::info!(
            target: "intr",
            "pic remapped to {:#04x}/{:#04x}, all lines masked",
            MASTER_VECTOR_BASE,
            SLAVE_VECTOR_BASE
        );
    }

    /// Unmask the line delivering `vector`.
    pub fn enable(vector: u8) {
        let (chip, bit) = mask_bit(vector).expect("vector is not a PIC line");
        let mut data = Port::new(match chip {
            Chip::Master => MASTER_DATA,
            Chip::Slave => SLAVE_DATA,
        });
        // SAFETY: read-modify-write of the interrupt mask register.
        unsafe {
            let mask = data.read();
            data.write(mask & !(1 << bit));
        }
    }

    /// Mask the line delivering `vector`.
    pub fn disable(vector: u8) {
        let (chip, bit) = mask_bit(vector).expect("vector is not a PIC line");
        let mut data = Port::new(match chip {
            Chip::Master => MASTER_DATA,
            Chip::Slave => SLAVE_DATA,
        });
        // SAFETY: read-modify-write of the interrupt mask register.
        unsafe {
            let mask = data.read();
            data.write(mask | (1 << bit));
        }
    }

    /// Acknowledge `vector`. The interrupt stubs send this on the normal
    /// path; handlers that never return (exception reporting) use it
    /// directly.
    pub fn end_of_interrupt(vector: u8) {
        let Some((chip, _)) = mask_bit(vector) else {
            return;
        };
        // SAFETY: OCW2 EOI writes; a slave interrupt must be acknowledged
        // on both chips.
        unsafe {
            if chip == Chip::Slave {
                Port::new(SLAVE_COMMAND).write(OCW2_EOI);
            }
            Port::new(MASTER_COMMAND).write(OCW2_EOI);
        }
    }
}

#[cfg(target_os = "none")]
pub use hw::{disable, enable, end_of_interrupt, init};

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn master_lines_map_to_master_bits() {
        assert_eq!(mask_bit(0x20), Some((Chip::Master, 0)));
        assert_eq!(mask_bit(0x21), Some((Chip::Master, 1)));
        assert_eq!(mask_bit(0x27), Some((Chip::Master, 7)));
    }

    #[test]
    fn slave_lines_map_to_slave_bits() {
        assert_eq!(mask_bit(0x28), Some((Chip::Slave, 0)));
        assert_eq!(mask_bit(0x2C), Some((Chip::Slave, 4)));
        assert_eq!(mask_bit(0x2F), Some((Chip::Slave, 7)));
    }

    #[test]
    fn non_irq_vectors_have_no_mask_bit() {
        assert_eq!(mask_bit(0x1F), None);
        assert_eq!(mask_bit(0x30), None);
        assert_eq!(mask_bit(0x0E), None);
    }
}
