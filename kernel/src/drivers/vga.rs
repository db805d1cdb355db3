//! Text-mode console.
//!
//! 80x25 cells of `{character, attribute}` at the VGA buffer, which the
//! loader maps at `0xC00B_8000` once paging is on. Output appends on the
//! bottom row and scrolls; the hardware cursor is kept in step through
//! the CRTC index/data ports.

/// VGA text buffer, kernel-virtual (physical 0x000B_8000).
pub const VGA_BUFFER_ADDR: usize = 0xC00B_8000;

pub const BUFFER_WIDTH: usize = 80;
pub const BUFFER_HEIGHT: usize = 25;

/// CRTC index port.
pub const CRTC_INDEX_PORT: u16 = 0x3D4;
/// CRTC data port.
pub const CRTC_DATA_PORT: u16 = 0x3D5;
/// CRTC register: cursor location high byte.
pub const CRTC_CURSOR_HIGH: u8 = 0x0E;
/// CRTC register: cursor location low byte.
pub const CRTC_CURSOR_LOW: u8 = 0x0F;

/// The 16-color VGA palette. The whole palette is defined even though the
/// kernel only uses a few entries.
#[allow(dead_code)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Color {
    Black = 0,
    Blue = 1,
    Green = 2,
    Cyan = 3,
    Red = 4,
    Magenta = 5,
    Brown = 6,
    LightGray = 7,
    DarkGray = 8,
    LightBlue = 9,
    LightGreen = 10,
    LightCyan = 11,
    LightRed = 12,
    Pink = 13,
    Yellow = 14,
    White = 15,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct ColorCode(u8);

impl ColorCode {
    pub const fn new(foreground: Color, background: Color) -> ColorCode {
        ColorCode(((background as u8) << 4) | (foreground as u8))
    }

    pub const fn as_u8(self) -> u8 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct ScreenChar {
    pub character: u8,
    pub attribute: ColorCode,
}

#[cfg(target_os = "none")]
mod hw {
    use core::fmt;
    use core::ptr::{read_volatile, write_volatile};

    use lazy_static::lazy_static;
    use spin::Mutex;

    use super::*;
    use crate::arch::x86::port::Port;
    use crate::interrupts::InterruptGuard;

    #[repr(transparent)]
    struct Buffer {
        cells: [[ScreenChar; BUFFER_WIDTH]; BUFFER_HEIGHT],
    }

    pub struct Writer {
        column: usize,
        attribute: ColorCode,
        buffer: &'static mut Buffer,
    }

    impl Writer {
        pub fn write_byte(&mut self, byte: u8) {
            match byte {
                b'\n' => self.new_line(),
                byte => {
                    if self.column >= BUFFER_WIDTH {
                        self.new_line();
                    }
                    let row = BUFFER_HEIGHT - 1;
                    let column = self.column;
                    let attribute = self.attribute;
                    // SAFETY: the VGA buffer is memory-mapped I/O; the
                    // write must not be elided. Row and column are in
                    // bounds by the checks above.
                    unsafe {
                        write_volatile(
                            &mut self.buffer.cells[row][column],
                            ScreenChar {
                                character: byte,
                                attribute,
                            },
                        );
                    }
                    self.column += 1;
                }
            }
        }

        pub fn write_string(&mut self, s: &str) {
            for byte in s.bytes() {
                match byte {
                    0x20..=0x7E | b'\n' => self.write_byte(byte),
                    _ => self.write_byte(0xFE),
                }
            }
        }

        fn new_line(&mut self) {
            for row in 1..BUFFER_HEIGHT {
                for column in 0..BUFFER_WIDTH {
                    // SAFETY: volatile copy within the fixed 80x25 cell
                    // grid; row starts at 1 so row-1 is in bounds.
                    unsafe {
                        let cell = read_volatile(&self.buffer.cells[row][column]);
                        write_volatile(&mut self.buffer.cells[row - 1][column], cell);
                    }
                }
            }
            self.clear_row(BUFFER_HEIGHT - 1);
            self.column = 0;
        }

        fn clear_row(&mut self, row: usize) {
            let blank = ScreenChar {
                character: b' ',
                attribute: self.attribute,
            };
            for column in 0..BUFFER_WIDTH {
                // SAFETY: volatile write within the fixed cell grid.
                unsafe {
                    write_volatile(&mut self.buffer.cells[row][column], blank);
                }
            }
        }

        pub fn set_attribute(&mut self, attribute: ColorCode) {
            self.attribute = attribute;
        }

        /// Repaint every cell with the current attribute.
        pub fn clear_screen(&mut self) {
            for row in 0..BUFFER_HEIGHT {
                self.clear_row(row);
            }
            self.column = 0;
        }

        /// Move the hardware cursor to the append position.
        pub fn sync_cursor(&mut self) {
            let position = ((BUFFER_HEIGHT - 1) * BUFFER_WIDTH + self.column) as u16;
            let mut index = Port::new(CRTC_INDEX_PORT);
            let mut data = Port::new(CRTC_DATA_PORT);
            // SAFETY: CRTC cursor-location protocol: select the register
            // on the index port, write its byte on the data port.
            unsafe {
                index.write(CRTC_CURSOR_HIGH);
                data.write((position >> 8) as u8);
                index.write(CRTC_CURSOR_LOW);
                data.write(position as u8);
            }
        }
    }

    impl fmt::Write for Writer {
        fn write_str(&mut self, s: &str) -> fmt::Result {
            self.write_string(s);
            Ok(())
        }
    }

    lazy_static! {
        static ref WRITER: Mutex<Writer> = Mutex::new(Writer {
            column: 0,
            attribute: ColorCode::new(Color::LightGray, Color::Black),
            // SAFETY: VGA_BUFFER_ADDR is the loader-mapped text buffer,
            // static for the kernel's lifetime and guarded by this Mutex.
            buffer: unsafe { &mut *(VGA_BUFFER_ADDR as *mut Buffer) },
        });
    }

    #[doc(hidden)]
    pub fn _print(args: fmt::Arguments) {
        use core::fmt::Write;

        // ISRs print too; mask interrupts so one cannot deadlock on the
        // writer it interrupted.
        let _guard = InterruptGuard::disabled();
        let mut writer = WRITER.lock();
        writer.write_fmt(args).ok();
        writer.sync_cursor();
    }

    /// Switch the whole screen to white-on-red for the panic report.
    /// Steals the writer unconditionally: the panicking context may have
    /// been holding it.
    pub fn panic_screen() {
        // SAFETY: the panic path runs with interrupts disabled and never
        // returns to the interrupted holder, so breaking its lock cannot
        // produce a second concurrent user.
        unsafe { WRITER.force_unlock() };
        let mut writer = WRITER.lock();
        writer.set_attribute(ColorCode::new(Color::White, Color::Red));
        writer.clear_screen();
        writer.sync_cursor();
    }
}

#[cfg(target_os = "none")]
pub use hw::{_print, panic_screen};

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn attribute_packs_background_high() {
        assert_eq!(ColorCode::new(Color::White, Color::Red).as_u8(), 0x4F);
        assert_eq!(ColorCode::new(Color::LightGray, Color::Black).as_u8(), 0x07);
    }

    #[test]
    fn cells_are_two_bytes() {
        assert_eq!(core::mem::size_of::<ScreenChar>(), 2);
    }
}
