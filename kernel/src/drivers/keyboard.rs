//! PS/2 keyboard.
//!
//! The IRQ handler reads one scan code per interrupt from port 0x60 and
//! feeds it to a `pc-keyboard` decoder, which tracks the 0xE0 extended
//! prefix and the modifier state. Decoded unicode keys flow through the
//! global bounded buffer to whichever thread consumes them, which is
//! exactly the ISR-to-thread handoff the buffer exists for.

use crate::sync::BoundedBuffer;

/// Vector the keyboard interrupts on after the PIC remap.
pub const KEYBOARD_VECTOR: u8 = 0x21;

/// Scan-code output buffer of the controller.
pub const DATA_PORT: u16 = 0x60;

static KEYS: BoundedBuffer<char> = BoundedBuffer::new();

/// Take the oldest decoded key, sleeping until one arrives.
pub fn next_key() -> char {
    KEYS.get()
}

/// Decoded keys waiting to be consumed.
pub fn pending_keys() -> usize {
    KEYS.len()
}

#[cfg(target_os = "none")]
mod hw {
    use lazy_static::lazy_static;
    use pc_keyboard::{layouts, DecodedKey, HandleControl, Keyboard, ScancodeSet1};
    use spin::Mutex;

    use super::{DATA_PORT, KEYBOARD_VECTOR, KEYS};
    use crate::arch::x86::port::Port;
    use crate::interrupts::{self, pic};

    lazy_static! {
        static ref DECODER: Mutex<Keyboard<layouts::Us104Key, ScancodeSet1>> = Mutex::new(
            Keyboard::new(ScancodeSet1::new(), layouts::Us104Key, HandleControl::Ignore)
        );
    }

    /// Register the handler and unmask the keyboard line.
    pub fn init() {
        interrupts::register(KEYBOARD_VECTOR, scancode_irq);
        pic::enable(KEYBOARD_VECTOR);
        log::info!(target: "kbd", "keyboard online on vector {KEYBOARD_VECTOR:#04x}");
    }

    fn scancode_irq(_vector: u8) {
        let mut data = Port::new(DATA_PORT);
        // SAFETY: reading port 0x60 pops the byte this IRQ announced.
        let scancode = unsafe { data.read() };
        let mut decoder = DECODER.lock();
        let event = decoder.add_byte(scancode).ok().flatten();
        let key = event.and_then(|event| decoder.process_keyevent(event));
        drop(decoder);
        if let Some(DecodedKey::Unicode(character)) = key {
            // May park the interrupted thread in the producer slot if the
            // consumer has fallen far behind.
            KEYS.put(character);
        }
    }
}

#[cfg(target_os = "none")]
pub use hw::init;
